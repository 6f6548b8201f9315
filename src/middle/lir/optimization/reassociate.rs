use hashbrown::HashMap;

use crate::middle::lir::{
    self, BinaryOperator, Immediate, Instruction, IntegerWidth, Operand, RegisterId,
};

/// Canonicalizes integer arithmetic so that constants end up on the right
/// and chains such as `(x + 1) + 2` collapse into `x + 3`. Float arithmetic
/// is not associative and is left alone.
pub fn reassociate(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = canonicalize(function);

    // `register -> (operator, register operand, constant)` for every
    // canonical `x op c` seen so far
    let mut chains: HashMap<RegisterId, (BinaryOperator, Operand, u64)> = HashMap::new();

    let order = lir::cfg::reverse_postorder(function);

    for block_id in order {
        let Some(block) = function.blocks.get_mut(&block_id) else {
            continue;
        };

        for instruction in &mut block.instructions {
            let Instruction::BinaryOperation {
                operator,
                destination,
                lhs,
                rhs,
            } = instruction
            else {
                continue;
            };

            let (Operand::Register(inner), Some(Immediate::Int(constant, width))) =
                (*lhs, rhs.as_immediate())
            else {
                continue;
            };

            if !matches!(operator, BinaryOperator::Add | BinaryOperator::Multiply) {
                continue;
            }

            let inner_chain = chains
                .get(&inner)
                .copied()
                .filter(|(inner_operator, _, _)| *inner_operator == *operator);

            if let Some((_, inner_lhs, inner_constant)) = inner_chain {
                let combined = combine(*operator, inner_constant, constant, width);

                *lhs = inner_lhs;
                *rhs = Immediate::Int(combined, width).into();
                changed = true;

                chains.insert(*destination, (*operator, inner_lhs, combined));
            } else {
                chains.insert(*destination, (*operator, *lhs, constant));
            }
        }
    }

    changed
}

fn combine(operator: BinaryOperator, a: u64, b: u64, width: IntegerWidth) -> u64 {
    match operator {
        BinaryOperator::Multiply => width.wrap(a.wrapping_mul(b)),
        _ => width.wrap(a.wrapping_add(b)),
    }
}

/// Moves constants of commutative operators to the right and rewrites
/// `x - c` as `x + (-c)`
fn canonicalize(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = false;

    for block in function.blocks.values_mut() {
        for instruction in &mut block.instructions {
            let Instruction::BinaryOperation {
                operator, lhs, rhs, ..
            } = instruction
            else {
                continue;
            };

            if operator.is_float() {
                continue;
            }

            if operator.is_commutative()
                && lhs.as_immediate().is_some()
                && rhs.as_register().is_some()
            {
                std::mem::swap(lhs, rhs);
                changed = true;
            }

            if *operator != BinaryOperator::Subtract || lhs.as_register().is_none() {
                continue;
            }

            if let Some(Immediate::Int(constant, width)) = rhs.as_immediate() {
                *operator = BinaryOperator::Add;
                *rhs = Immediate::Int(width.wrap(constant.wrapping_neg()), width).into();
                changed = true;
            }
        }
    }

    changed
}
