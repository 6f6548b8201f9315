//! Function local LIR optimizations. Every pass keeps the function valid for
//! the verifier and reports whether it changed anything.

use strum::{Display, EnumIter, EnumString};

use crate::{log_trace, middle::lir};

mod combine;
mod mem2reg;
mod reassociate;
mod redundancy;
mod simplify_cfg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Pass {
    /// Constant folding, algebraic identities and dead code removal
    #[strum(serialize = "instcombine")]
    InstructionCombining,
    #[strum(serialize = "reassociate")]
    Reassociation,
    /// Dominator scoped removal of redundant pure instructions
    #[strum(serialize = "gvn")]
    GlobalValueNumbering,
    #[strum(serialize = "simplifycfg")]
    SimplifyCfg,
    /// Promotes stack slots into registers
    #[strum(serialize = "mem2reg")]
    PromoteMemoryToRegister,
}

impl Pass {
    pub fn run(self, function: &mut lir::FunctionDefinition) -> bool {
        match self {
            Pass::InstructionCombining => combine::combine_instructions(function),
            Pass::Reassociation => reassociate::reassociate(function),
            Pass::GlobalValueNumbering => redundancy::eliminate_redundancy(function),
            Pass::SimplifyCfg => simplify_cfg::simplify_cfg(function),
            Pass::PromoteMemoryToRegister => mem2reg::promote_memory_to_registers(function),
        }
    }
}

/// The passes run for `OptLevel::Default`, in order
pub const PIPELINE: [Pass; 7] = [
    Pass::InstructionCombining,
    Pass::Reassociation,
    Pass::GlobalValueNumbering,
    Pass::SimplifyCfg,
    Pass::PromoteMemoryToRegister,
    Pass::InstructionCombining,
    Pass::SimplifyCfg,
];

pub fn optimize_function(function: &mut lir::FunctionDefinition) {
    run_passes(function, &PIPELINE);
}

pub fn run_passes(function: &mut lir::FunctionDefinition, passes: &[Pass]) {
    if function.is_external {
        return;
    }

    for pass in passes {
        let changed = pass.run(function);

        log_trace!(
            "{pass} on {}: {}",
            function.symbol_name,
            if changed { "changed" } else { "unchanged" }
        );
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{
        frontend::intern::InternedSymbol,
        middle::lir::{FunctionDefinition, IntegerWidth, Module, Signature, Type, verify},
    };

    pub const I32: Type = Type::Integer(IntegerWidth::I32);

    pub fn signature(parameters: Vec<Type>, return_type: Type) -> Signature {
        Signature {
            parameters,
            return_type,
        }
    }

    pub fn symbol(name: &str) -> InternedSymbol {
        InternedSymbol::new(name)
    }

    pub fn assert_valid(function: &FunctionDefinition) {
        let module = Module {
            functions: vec![function.clone()],
        };

        if let Err(errors) = verify::verify_function(function, &module) {
            panic!("{function}\n{errors:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::{test_utils::*, *};
    use crate::middle::lir::{
        BinaryOperator, ComparePredicate, IntegerWidth, Module,
        builder::FunctionBuilder,
        interpret::{Interpreter, Value},
    };

    #[test]
    fn pass_names_round_trip() {
        for pass in Pass::iter() {
            assert_eq!(Pass::from_str(&pass.to_string()), Ok(pass));
        }
        assert_eq!(Pass::from_str("mem2reg"), Ok(Pass::PromoteMemoryToRegister));
    }

    /// max(a, b) through a stack slot, the shape lowering produces
    fn max_through_memory() -> lir::FunctionDefinition {
        let mut b = FunctionBuilder::new(symbol("max"), signature(vec![I32, I32], I32));

        let entry = b.append_new_block("entry");
        let then = b.append_new_block("then");
        let otherwise = b.append_new_block("else");
        let merge = b.append_new_block("ifcont");

        let (x, y) = (b.argument(0).unwrap().into(), b.argument(1).unwrap().into());

        b.position_at_end(entry);
        let slot = b.alloca(I32).into();
        let zero = b.const_int(0, IntegerWidth::I32);
        let x_plus_zero = b.binary(BinaryOperator::Add, x, zero).into();
        let greater = b.compare(ComparePredicate::SignedGreater, x_plus_zero, y);
        b.branch(greater.into(), then, otherwise);

        b.position_at_end(then);
        b.store(slot, x);
        b.jump(merge);

        b.position_at_end(otherwise);
        b.store(slot, y);
        b.jump(merge);

        b.position_at_end(merge);
        let result = b.load(I32, slot);
        b.ret(Some(result.into()));

        b.finish()
    }

    #[test]
    fn pipeline_keeps_behaviour_and_validity() {
        let mut function = max_through_memory();
        assert_valid(&function);

        optimize_function(&mut function);
        assert_valid(&function);

        let has_memory = function.blocks.values().flat_map(|b| &b.instructions).any(|i| {
            matches!(
                i,
                lir::Instruction::AllocStack { .. }
                    | lir::Instruction::LoadMem { .. }
                    | lir::Instruction::StoreMem { .. }
            )
        });
        assert!(!has_memory, "{function}");

        let module = Module {
            functions: vec![function],
        };
        let mut interpreter = Interpreter::new(&module);

        for (a, b) in [(3, 9), (9, 3), (-4, -4)] {
            assert_eq!(
                interpreter.call("max", &[Value::int32(a), Value::int32(b)]),
                Ok(Value::int32(a.max(b)))
            );
        }
    }
}
