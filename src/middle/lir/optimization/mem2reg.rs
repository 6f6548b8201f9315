//! Promotion of stack slots into SSA registers.
//!
//! A slot qualifies when its pointer is only ever used as the address of
//! loads and stores. Phis are placed at the iterated dominance frontier of the
//! blocks storing to the slot, then a walk over the dominator tree rewires
//! every load to the value stored last on the path to it. Loads that can see
//! no store read zero.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::middle::lir::{
    self, BlockId, Immediate, Instruction, Operand, RegisterId, Type,
    cfg::{self, DominatorTree},
};

pub fn promote_memory_to_registers(function: &mut lir::FunctionDefinition) -> bool {
    let tree = DominatorTree::compute(function);
    let Some(entry) = tree.entry() else {
        return false;
    };

    let slots = promotable_slots(function, &tree);

    if slots.is_empty() {
        return false;
    }

    let frontiers = tree.dominance_frontiers(function);
    let predecessors = cfg::predecessors(function);

    // (block, slot) -> phi merging the slot's value at the block's start
    let mut phis: HashMap<(BlockId, RegisterId), RegisterId> = HashMap::new();

    // Sorted so that register numbering does not depend on hashing
    for (slot, ty) in slots.iter().sorted_by_key(|(slot, _)| **slot) {
        let mut worklist = function
            .ordered_blocks()
            .filter(|block| {
                block.instructions.iter().any(|instruction| {
                    matches!(
                        instruction,
                        Instruction::StoreMem { destination, .. }
                            if *destination == Operand::Register(*slot)
                    )
                })
            })
            .map(|block| block.id)
            .collect::<Vec<_>>();
        let mut has_phi = HashSet::new();

        while let Some(block) = worklist.pop() {
            for frontier in frontiers.get(&block).into_iter().flatten().sorted() {
                if !has_phi.insert(*frontier) {
                    continue;
                }

                let phi = function.new_register(*ty);
                phis.insert((*frontier, *slot), phi);

                if let Some(target) = function.blocks.get_mut(frontier) {
                    target.instructions.insert(
                        0,
                        Instruction::Phi {
                            destination: phi,
                            sources: Vec::new(),
                        },
                    );
                }

                worklist.push(*frontier);
            }
        }
    }

    let mut renamer = Renamer {
        slots: &slots,
        phis: &phis,
        tree: &tree,
        replacements: HashMap::new(),
        incoming: HashMap::new(),
    };

    let initial = slots
        .iter()
        .map(|(slot, ty)| (*slot, zero_of(*ty)))
        .collect::<HashMap<_, _>>();

    renamer.rename(function, entry, initial);

    let Renamer {
        replacements,
        incoming,
        ..
    } = renamer;

    // Fill in the phi inputs. Edges from unreachable predecessors carry zero.
    for ((block, slot), phi) in &phis {
        let Some(target) = function.blocks.get_mut(block) else {
            continue;
        };

        for instruction in &mut target.instructions {
            let Instruction::Phi {
                destination,
                sources,
            } = instruction
            else {
                continue;
            };

            if destination != phi {
                continue;
            }

            for predecessor in predecessors.get(block).into_iter().flatten() {
                let value = incoming
                    .get(&(*predecessor, *block, *slot))
                    .copied()
                    .unwrap_or_else(|| zero_of(slots[slot]));

                sources.push((*predecessor, value));
            }
        }
    }

    for block in function.blocks.values_mut() {
        block.instructions.retain(|instruction| match instruction {
            Instruction::AllocStack { destination, .. } => !slots.contains_key(destination),
            Instruction::LoadMem { source, .. } | Instruction::StoreMem { destination: source, .. } => {
                source
                    .as_register()
                    .is_none_or(|register| !slots.contains_key(&register))
            }
            _ => true,
        });
    }

    function.replace_uses(&replacements);

    true
}

/// Slots allocated in reachable blocks whose address never escapes
fn promotable_slots(
    function: &lir::FunctionDefinition,
    tree: &DominatorTree,
) -> HashMap<RegisterId, Type> {
    let mut slots = HashMap::new();

    for block in function.ordered_blocks() {
        for instruction in &block.instructions {
            let Instruction::AllocStack { destination, ty } = instruction else {
                continue;
            };

            if tree.is_reachable(block.id) && (ty.is_integer() || ty.is_float()) {
                slots.insert(*destination, *ty);
            }
        }
    }

    for block in function.ordered_blocks() {
        for instruction in &block.instructions {
            let escaping = match instruction {
                Instruction::LoadMem { .. } => vec![],
                Instruction::StoreMem { source, .. } => vec![*source],
                _ => instruction.operands(),
            };

            let is_memory_access = matches!(
                instruction,
                Instruction::LoadMem { .. } | Instruction::StoreMem { .. }
            );

            for operand in escaping {
                if let Operand::Register(register) = operand {
                    slots.remove(&register);
                }
            }

            // Accesses from unreachable code are never renamed
            if is_memory_access && !tree.is_reachable(block.id) {
                for operand in instruction.operands() {
                    if let Operand::Register(register) = operand {
                        slots.remove(&register);
                    }
                }
            }
        }
    }

    slots
}

struct Renamer<'a> {
    slots: &'a HashMap<RegisterId, Type>,
    phis: &'a HashMap<(BlockId, RegisterId), RegisterId>,
    tree: &'a DominatorTree,
    /// Loaded registers and the value they are replaced with
    replacements: HashMap<RegisterId, Operand>,
    /// (predecessor, block, slot) -> value of the slot along that edge
    incoming: HashMap<(BlockId, BlockId, RegisterId), Operand>,
}

impl Renamer<'_> {
    fn rename(
        &mut self,
        function: &lir::FunctionDefinition,
        block_id: BlockId,
        mut current: HashMap<RegisterId, Operand>,
    ) {
        let Some(block) = function.blocks.get(&block_id) else {
            return;
        };

        for slot in self.slots.keys() {
            if let Some(phi) = self.phis.get(&(block_id, *slot)) {
                current.insert(*slot, (*phi).into());
            }
        }

        for instruction in &block.instructions {
            match instruction {
                Instruction::LoadMem {
                    destination,
                    source: Operand::Register(slot),
                } if self.slots.contains_key(slot) => {
                    if let Some(value) = current.get(slot) {
                        self.replacements.insert(*destination, *value);
                    }
                }
                Instruction::StoreMem {
                    destination: Operand::Register(slot),
                    source,
                } if self.slots.contains_key(slot) => {
                    current.insert(*slot, *source);
                }
                _ => {}
            }
        }

        for successor in block.successors() {
            for (slot, value) in &current {
                if self.phis.contains_key(&(successor, *slot)) {
                    self.incoming.insert((block_id, successor, *slot), *value);
                }
            }
        }

        let tree = self.tree;
        for child in tree.children(block_id) {
            self.rename(function, *child, current.clone());
        }
    }
}

fn zero_of(ty: Type) -> Operand {
    match ty {
        Type::Integer(width) => Immediate::int(0, width).into(),
        Type::Float(width) => Immediate::float(0.0, width).into(),
        Type::Void | Type::Pointer => Immediate::Void.into(),
    }
}
