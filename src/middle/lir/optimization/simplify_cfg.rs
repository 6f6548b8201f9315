use hashbrown::HashMap;

use crate::middle::lir::{self, Instruction, Operand, RegisterId, cfg};

/// Cleans up the block structure lowering leaves behind: unreachable blocks,
/// blocks that only jump somewhere else, and straight line chains of blocks.
pub fn simplify_cfg(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = false;

    loop {
        let mut round = eliminate_unreachable_blocks(function);
        round |= thread_jumps(function);
        round |= merge_blocks(function);

        if !round {
            return changed;
        }

        changed = true;
    }
}

/// Deletes the blocks that cannot be reached from the entry, and the phi
/// inputs they fed.
fn eliminate_unreachable_blocks(function: &mut lir::FunctionDefinition) -> bool {
    let reachable = cfg::reachable(function);

    let unreachable = function
        .layout
        .iter()
        .copied()
        .filter(|block| !reachable.contains(block))
        .collect::<Vec<_>>();

    for block_id in &unreachable {
        let Some(block) = function.remove_block(*block_id) else {
            continue;
        };

        for successor in block.successors() {
            if let Some(successor) = function.blocks.get_mut(&successor) {
                successor.remove_phi_sources_from(*block_id);
            }
        }
    }

    !unreachable.is_empty()
}

/// Jump threading. Predecessors of a block that is nothing but a jump are
/// pointed at the jump's destination directly.
fn thread_jumps(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = false;
    let entry = function.entry();

    for block_id in function.layout.clone() {
        if Some(block_id) == entry {
            continue;
        }

        let Some(block) = function.blocks.get(&block_id) else {
            continue;
        };

        let [Instruction::Jump { destination }] = block.instructions.as_slice() else {
            continue;
        };
        let destination = *destination;

        if destination == block_id {
            continue;
        }

        let predecessors = cfg::predecessors(function);
        let incoming = predecessors.get(&block_id).cloned().unwrap_or_default();
        let destination_predecessors = predecessors.get(&destination).cloned().unwrap_or_default();

        if incoming.is_empty() {
            continue;
        }

        // A predecessor that already reaches the destination would need two
        // phi inputs from the same block
        let has_phis = function
            .blocks
            .get(&destination)
            .is_some_and(|block| block.phi_count() > 0);

        if has_phis
            && incoming
                .iter()
                .any(|predecessor| destination_predecessors.contains(predecessor))
        {
            continue;
        }

        for predecessor in &incoming {
            if let Some(terminator) = function
                .blocks
                .get_mut(predecessor)
                .and_then(|block| block.instructions.last_mut())
            {
                terminator.replace_successor(block_id, destination);
            }
        }

        if let Some(target) = function.blocks.get_mut(&destination) {
            for instruction in &mut target.instructions {
                let Instruction::Phi { sources, .. } = instruction else {
                    continue;
                };

                let Some(position) = sources.iter().position(|(from, _)| *from == block_id)
                else {
                    continue;
                };

                let (_, value) = sources.remove(position);
                sources.extend(incoming.iter().map(|predecessor| (*predecessor, value)));
            }
        }

        function.remove_block(block_id);
        changed = true;
    }

    changed
}

/// A block whose single predecessor jumps only to it is appended to that
/// predecessor.
fn merge_blocks(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = false;
    let entry = function.entry();

    for block_id in function.layout.clone() {
        if Some(block_id) == entry || !function.blocks.contains_key(&block_id) {
            continue;
        }

        let predecessors = cfg::predecessors(function);
        let [predecessor] = predecessors.get(&block_id).map(Vec::as_slice).unwrap_or(&[]) else {
            continue;
        };
        let predecessor = *predecessor;

        if predecessor == block_id {
            continue;
        }

        let jumps_here = function
            .blocks
            .get(&predecessor)
            .and_then(|block| block.instructions.last())
            .is_some_and(|last| *last == Instruction::Jump {
                destination: block_id,
            });

        if !jumps_here {
            continue;
        }

        let Some(mut block) = function.remove_block(block_id) else {
            continue;
        };

        // With one predecessor every phi has one input
        let mut replacements: HashMap<RegisterId, Operand> = HashMap::new();
        let phi_count = block.phi_count();

        for phi in block.instructions.drain(..phi_count) {
            let Instruction::Phi {
                destination,
                sources,
            } = phi
            else {
                continue;
            };

            if let Some((_, value)) = sources.first() {
                replacements.insert(destination, *value);
            }
        }

        for successor in block.successors() {
            if let Some(successor) = function.blocks.get_mut(&successor) {
                successor.rename_phi_sources(block_id, predecessor);
            }
        }

        if let Some(target) = function.blocks.get_mut(&predecessor) {
            target.instructions.pop();
            target.instructions.append(&mut block.instructions);
        }

        function.replace_uses(&replacements);
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::lir::{
        IntegerWidth, Type, builder::FunctionBuilder, optimization::test_utils::*,
    };

    #[test]
    fn removes_unreachable_blocks_and_their_phi_inputs() {
        let mut b = FunctionBuilder::new(symbol("dead"), signature(vec![], I32));
        let entry = b.append_new_block("entry");
        let dead = b.append_new_block("dead");
        let exit = b.append_new_block("exit");

        b.position_at_end(entry);
        b.jump(exit);
        b.position_at_end(dead);
        b.jump(exit);
        b.position_at_end(exit);
        let one = b.const_int(1, IntegerWidth::I32);
        let two = b.const_int(2, IntegerWidth::I32);
        let phi = b.phi(I32, vec![(entry, one), (dead, two)]);
        b.ret(Some(phi.into()));

        let mut function = b.finish();
        assert!(simplify_cfg(&mut function));
        assert_valid(&function);

        // `exit` is merged into `entry` once `dead` is gone
        assert_eq!(function.layout, vec![entry]);
        assert_eq!(
            function.blocks[&entry].instructions,
            vec![Instruction::Return { value: Some(one) }]
        );
    }

    #[test]
    fn threads_jumps_through_empty_blocks() {
        let mut b = FunctionBuilder::new(symbol("thread"), signature(vec![Type::BOOL], I32));
        let entry = b.append_new_block("entry");
        let then = b.append_new_block("then");
        let otherwise = b.append_new_block("else");
        let merge = b.append_new_block("ifcont");

        let condition = b.argument(0).unwrap().into();

        b.position_at_end(entry);
        b.branch(condition, then, otherwise);
        b.position_at_end(then);
        b.jump(merge);
        b.position_at_end(otherwise);
        let seven = b.const_int(7, IntegerWidth::I32);
        b.jump(merge);
        b.position_at_end(merge);
        let zero = b.const_int(0, IntegerWidth::I32);
        let phi = b.phi(I32, vec![(then, zero), (otherwise, seven)]);
        b.ret(Some(phi.into()));

        let mut function = b.finish();
        assert!(simplify_cfg(&mut function));
        assert_valid(&function);

        assert!(!function.blocks.contains_key(&then));
        assert_eq!(
            function.blocks[&entry].instructions.last(),
            Some(&Instruction::Branch {
                condition,
                positive: merge,
                negative: otherwise,
            })
        );
        assert_eq!(
            function.blocks[&merge].instructions[0],
            Instruction::Phi {
                destination: phi,
                sources: vec![(otherwise, seven), (entry, zero)],
            }
        );
    }

    #[test]
    fn keeps_loops_intact() {
        let mut b = FunctionBuilder::new(symbol("spin"), signature(vec![Type::BOOL], Type::Void));
        let entry = b.append_new_block("entry");
        let header = b.append_new_block("loop_cond");
        let exit = b.append_new_block("loop_cont");

        let condition = b.argument(0).unwrap().into();

        b.position_at_end(entry);
        b.jump(header);
        b.position_at_end(header);
        b.branch(condition, header, exit);
        b.position_at_end(exit);
        b.ret(None);

        let mut function = b.finish();
        simplify_cfg(&mut function);
        assert_valid(&function);

        assert_eq!(function.layout, vec![entry, header, exit]);
    }
}
