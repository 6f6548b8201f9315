use hashbrown::{HashMap, HashSet};

use crate::middle::lir::{
    self, BinaryOperator, BlockId, CastKind, ComparePredicate, FloatWidth, Immediate,
    Instruction, IntegerWidth, Operand, RegisterId, Type, cfg::DominatorTree,
};

/// Operands made hashable. Floats are compared by their bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum OperandKey {
    Register(RegisterId),
    Int(u64, IntegerWidth),
    Float(u64, FloatWidth),
    Void,
}

impl From<Operand> for OperandKey {
    fn from(operand: Operand) -> Self {
        match operand {
            Operand::Register(register) => OperandKey::Register(register),
            Operand::Immediate(Immediate::Int(bits, width)) => OperandKey::Int(bits, width),
            Operand::Immediate(Immediate::Float(value, width)) => {
                OperandKey::Float(value.to_bits(), width)
            }
            Operand::Immediate(Immediate::Void) => OperandKey::Void,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ExpressionKey {
    Binary(BinaryOperator, OperandKey, OperandKey),
    Compare(ComparePredicate, OperandKey, OperandKey),
    Cast(CastKind, OperandKey, Type),
}

/// Removes pure instructions that recompute a value already available in a
/// dominating block
pub fn eliminate_redundancy(function: &mut lir::FunctionDefinition) -> bool {
    let tree = DominatorTree::compute(function);
    let Some(entry) = tree.entry() else {
        return false;
    };

    let mut numbering = ValueNumbering {
        function,
        tree: &tree,
        available: HashMap::new(),
        replacements: HashMap::new(),
        redundant: HashSet::new(),
    };

    numbering.visit(entry);

    let ValueNumbering {
        replacements,
        redundant,
        ..
    } = numbering;

    if redundant.is_empty() {
        return false;
    }

    for block in function.blocks.values_mut() {
        block.instructions.retain(|instruction| {
            instruction
                .destination()
                .is_none_or(|destination| !redundant.contains(&destination))
        });
    }

    function.replace_uses(&replacements);

    true
}

struct ValueNumbering<'a> {
    function: &'a lir::FunctionDefinition,
    tree: &'a DominatorTree,
    /// Expressions computed in the blocks dominating the current one
    available: HashMap<ExpressionKey, RegisterId>,
    replacements: HashMap<RegisterId, Operand>,
    redundant: HashSet<RegisterId>,
}

impl ValueNumbering<'_> {
    fn visit(&mut self, block_id: BlockId) {
        let mut introduced = Vec::new();

        if let Some(block) = self.function.blocks.get(&block_id) {
            for instruction in &block.instructions {
                let Some((key, destination)) = self.key_of(instruction) else {
                    continue;
                };

                match self.available.get(&key) {
                    Some(existing) => {
                        self.replacements.insert(destination, (*existing).into());
                        self.redundant.insert(destination);
                    }
                    None => {
                        self.available.insert(key.clone(), destination);
                        introduced.push(key);
                    }
                }
            }
        }

        let tree = self.tree;
        for child in tree.children(block_id) {
            self.visit(*child);
        }

        // Leaving the dominator subtree
        for key in introduced {
            self.available.remove(&key);
        }
    }

    fn resolve(&self, operand: Operand) -> OperandKey {
        match operand {
            Operand::Register(register) => match self.replacements.get(&register) {
                Some(replacement) => (*replacement).into(),
                None => operand.into(),
            },
            Operand::Immediate(_) => operand.into(),
        }
    }

    fn key_of(&self, instruction: &Instruction) -> Option<(ExpressionKey, RegisterId)> {
        match instruction {
            Instruction::BinaryOperation {
                operator,
                destination,
                lhs,
                rhs,
            } => {
                let (mut a, mut b) = (self.resolve(*lhs), self.resolve(*rhs));

                if operator.is_commutative() && b < a {
                    std::mem::swap(&mut a, &mut b);
                }

                Some((ExpressionKey::Binary(*operator, a, b), *destination))
            }
            Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => Some((
                ExpressionKey::Compare(*predicate, self.resolve(*lhs), self.resolve(*rhs)),
                *destination,
            )),
            Instruction::Cast {
                kind,
                destination,
                operand,
            } => Some((
                ExpressionKey::Cast(
                    *kind,
                    self.resolve(*operand),
                    self.function.register_type(*destination),
                ),
                *destination,
            )),
            _ => None,
        }
    }
}
