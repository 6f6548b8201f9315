use hashbrown::HashMap;

use crate::middle::lir::{
    self, BinaryOperator, Immediate, Instruction, Operand, RegisterId,
    interpret::{self, Value},
};

/// Folds constants and trivial instructions until nothing changes
pub fn combine_instructions(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = false;

    loop {
        let mut round = fold_instructions(function);
        round |= fold_branches(function);
        round |= remove_dead_instructions(function);

        if !round {
            return changed;
        }

        changed = true;
    }
}

/// Replaces instructions whose result is known with that result
fn fold_instructions(function: &mut lir::FunctionDefinition) -> bool {
    let mut replacements: HashMap<RegisterId, Operand> = HashMap::new();

    for block in function.blocks.values() {
        for instruction in &block.instructions {
            let Some(destination) = instruction.destination() else {
                continue;
            };

            if let Some(value) = simplify(function, instruction) {
                replacements.insert(destination, value);
            }
        }
    }

    if replacements.is_empty() {
        return false;
    }

    for block in function.blocks.values_mut() {
        block.instructions.retain(|instruction| {
            instruction
                .destination()
                .is_none_or(|destination| !replacements.contains_key(&destination))
        });
    }

    function.replace_uses(&replacements);

    true
}

fn simplify(function: &lir::FunctionDefinition, instruction: &Instruction) -> Option<Operand> {
    match instruction {
        Instruction::BinaryOperation {
            operator, lhs, rhs, ..
        } => {
            if let (Some(a), Some(b)) = (lhs.as_immediate(), rhs.as_immediate()) {
                let folded = interpret::evaluate_binary(*operator, a.into(), b.into())?;
                return immediate_of(folded).map(Operand::from);
            }

            simplify_identity(*operator, *lhs, *rhs)
        }
        Instruction::Compare {
            predicate,
            lhs,
            rhs,
            ..
        } => {
            let (a, b) = (lhs.as_immediate()?, rhs.as_immediate()?);
            let result = interpret::evaluate_compare(*predicate, a.into(), b.into());

            Some(Immediate::bool(result).into())
        }
        Instruction::Cast {
            kind,
            destination,
            operand,
        } => {
            let value = operand.as_immediate()?;
            let folded =
                interpret::evaluate_cast(*kind, value.into(), function.register_type(*destination));

            immediate_of(folded).map(Operand::from)
        }
        Instruction::Phi {
            destination,
            sources,
        } => {
            // A phi whose inputs are all the same value (or itself) is that value
            let mut inputs = sources
                .iter()
                .map(|(_, operand)| *operand)
                .filter(|operand| *operand != Operand::Register(*destination));

            let first = inputs.next()?;
            inputs.all(|operand| operand == first).then_some(first)
        }
        _ => None,
    }
}

/// Integer identities. Float identities are left alone because of signed
/// zeros and NaNs.
fn simplify_identity(operator: BinaryOperator, lhs: Operand, rhs: Operand) -> Option<Operand> {
    let int = |operand: Operand| match operand.as_immediate()? {
        Immediate::Int(bits, width) => Some((bits, width)),
        _ => None,
    };

    match (operator, int(lhs), int(rhs)) {
        (BinaryOperator::Add | BinaryOperator::Subtract, _, Some((0, _))) => Some(lhs),
        (BinaryOperator::Add, Some((0, _)), _) => Some(rhs),
        (
            BinaryOperator::Multiply
            | BinaryOperator::SignedDivide
            | BinaryOperator::UnsignedDivide,
            _,
            Some((1, _)),
        ) => Some(lhs),
        (BinaryOperator::Multiply, Some((1, _)), _) => Some(rhs),
        (BinaryOperator::Multiply, _, Some((0, width)))
        | (BinaryOperator::Multiply, Some((0, width)), _) => {
            Some(Immediate::int(0, width).into())
        }
        _ => None,
    }
}

fn immediate_of(value: Value) -> Option<Immediate> {
    match value {
        Value::Int(bits, width) => Some(Immediate::Int(bits, width)),
        Value::Float(value, width) => Some(Immediate::Float(value, width)),
        Value::Void => Some(Immediate::Void),
        Value::Pointer(_) => None,
    }
}

/// Branches on a constant become jumps, and the phis of the block no longer
/// jumped to forget this predecessor
fn fold_branches(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = false;
    let mut removed_edges = Vec::new();

    for block in function.blocks.values_mut() {
        let Some(last) = block.instructions.last_mut() else {
            continue;
        };

        let Instruction::Branch {
            condition,
            positive,
            negative,
        } = *last
        else {
            continue;
        };

        let taken = if positive == negative {
            positive
        } else {
            let Some(Immediate::Int(bits, _)) = condition.as_immediate() else {
                continue;
            };

            let (taken, skipped) = if bits != 0 {
                (positive, negative)
            } else {
                (negative, positive)
            };

            removed_edges.push((block.id, skipped));
            taken
        };

        *last = Instruction::Jump { destination: taken };
        changed = true;
    }

    for (from, to) in removed_edges {
        if let Some(target) = function.blocks.get_mut(&to) {
            target.remove_phi_sources_from(from);
        }
    }

    changed
}

/// Removes pure instructions whose results are never read
fn remove_dead_instructions(function: &mut lir::FunctionDefinition) -> bool {
    let mut changed = false;

    loop {
        let uses = function.use_counts();
        let mut removed = false;

        for block in function.blocks.values_mut() {
            let before = block.instructions.len();

            block.instructions.retain(|instruction| {
                !instruction.is_removable_when_unused()
                    || instruction
                        .destination()
                        .is_some_and(|destination| uses.get(&destination).is_some_and(|n| *n > 0))
            });

            removed |= block.instructions.len() != before;
        }

        if !removed {
            return changed;
        }

        changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::lir::{
        ComparePredicate, IntegerWidth, Type, builder::FunctionBuilder,
        optimization::test_utils::*,
    };

    fn instructions(function: &lir::FunctionDefinition) -> Vec<&Instruction> {
        function.ordered_blocks().flat_map(|b| &b.instructions).collect()
    }

    #[test]
    fn folds_constant_arithmetic_into_the_return() {
        let mut b = FunctionBuilder::new(symbol("constant"), signature(vec![], I32));
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);

        let two = b.const_int(2, IntegerWidth::I32);
        let three = b.const_int(3, IntegerWidth::I32);
        let product = b.binary(BinaryOperator::Multiply, two, three).into();
        let sum = b.binary(BinaryOperator::Add, product, three);
        b.ret(Some(sum.into()));

        let mut function = b.finish();
        assert!(combine_instructions(&mut function));
        assert_valid(&function);

        assert_eq!(
            instructions(&function),
            vec![&Instruction::Return {
                value: Some(Immediate::int(9, IntegerWidth::I32).into())
            }]
        );
    }

    #[test]
    fn leaves_division_by_zero_for_runtime() {
        let mut b = FunctionBuilder::new(symbol("divide"), signature(vec![], I32));
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);

        let one = b.const_int(1, IntegerWidth::I32);
        let zero = b.const_int(0, IntegerWidth::I32);
        let quotient = b.binary(BinaryOperator::SignedDivide, one, zero);
        b.ret(Some(quotient.into()));

        let mut function = b.finish();
        assert!(!combine_instructions(&mut function));
    }

    #[test]
    fn constant_branch_becomes_a_jump_and_prunes_phis() {
        let mut b = FunctionBuilder::new(symbol("select"), signature(vec![I32], I32));
        let entry = b.append_new_block("entry");
        let then = b.append_new_block("then");
        let merge = b.append_new_block("ifcont");

        let argument = b.argument(0).unwrap().into();

        b.position_at_end(entry);
        let one = b.const_int(1, IntegerWidth::I32);
        let condition = b.compare(ComparePredicate::SignedLessEqual, one, one);
        b.branch(condition.into(), then, merge);

        b.position_at_end(then);
        b.jump(merge);

        b.position_at_end(merge);
        let phi = b.phi(I32, vec![(entry, argument), (then, one)]);
        b.ret(Some(phi.into()));

        let mut function = b.finish();
        assert!(combine_instructions(&mut function));
        assert_valid(&function);

        assert_eq!(
            function.blocks[&entry].instructions,
            vec![Instruction::Jump { destination: then }]
        );
        // the phi lost its `entry` source, then collapsed to the constant
        assert_eq!(
            function.blocks[&merge].instructions,
            vec![Instruction::Return { value: Some(one) }]
        );
    }

    #[test]
    fn integer_identities_and_dead_code() {
        let mut b = FunctionBuilder::new(symbol("identity"), signature(vec![I32], I32));
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);

        let x = b.argument(0).unwrap().into();
        let zero = b.const_int(0, IntegerWidth::I32);
        let one = b.const_int(1, IntegerWidth::I32);

        let a = b.binary(BinaryOperator::Add, zero, x).into();
        let m = b.binary(BinaryOperator::Multiply, a, one).into();
        b.binary(BinaryOperator::Subtract, m, x);
        b.ret(Some(m));

        let mut function = b.finish();
        assert!(combine_instructions(&mut function));

        assert_eq!(
            function.blocks[&entry].instructions,
            vec![Instruction::Return { value: Some(x) }]
        );
    }

    #[test]
    fn float_additions_of_zero_are_kept() {
        let f64 = Type::Float(lir::FloatWidth::F64);
        let mut b = FunctionBuilder::new(symbol("float"), signature(vec![f64], f64));
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);

        let x = b.argument(0).unwrap().into();
        let zero = b.const_float(0.0, lir::FloatWidth::F64);
        let sum = b.binary(BinaryOperator::FloatAdd, x, zero);
        b.ret(Some(sum.into()));

        let mut function = b.finish();
        assert!(!combine_instructions(&mut function));
    }
}
