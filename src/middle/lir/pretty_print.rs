use colored::Colorize;
use itertools::Itertools;

use crate::{index::Index, middle::lir};

pub fn pretty_print_lir(module: &lir::Module) {
    print!("{module}");
}

impl core::fmt::Display for lir::Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, function) in self.functions.iter().enumerate() {
            if i != 0 && !function.is_external {
                writeln!(f)?;
            }

            write!(f, "{function}")?;
        }

        Ok(())
    }
}

impl core::fmt::Display for lir::FunctionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_external {
            return writeln!(
                f,
                "{} {} {}{}{}{} {}",
                "extern".magenta(),
                "fn".magenta(),
                self.symbol_name.value().blue(),
                "(".white(),
                self.signature.parameters.iter().join(", "),
                ")".white(),
                format!("-> {}", self.signature.return_type).white()
            );
        }

        write!(
            f,
            "{} {}{}",
            "fn".magenta(),
            self.symbol_name.value().blue(),
            "(".white()
        )?;

        write!(
            f,
            "{}",
            self.arguments
                .iter()
                .map(|arg| format!("{arg}: {}", self.register_type(*arg)))
                .join(", ")
        )?;

        writeln!(
            f,
            "{} {} {}",
            ")".white(),
            format!("-> {}", self.signature.return_type).white(),
            "{".white()
        )?;

        for block in self.ordered_blocks() {
            writeln!(
                f,
                "{}",
                format!("{} ({}):", block.id, block.label).bright_red()
            )?;

            for instruction in &block.instructions {
                writeln!(f, "    {}", DisplayInstruction(self, instruction))?;
            }
        }

        writeln!(f, "{}", "}".white())
    }
}

/// Instructions print the type of the register they define, which lives on
/// the function
struct DisplayInstruction<'a>(&'a lir::FunctionDefinition, &'a lir::Instruction);

impl core::fmt::Display for DisplayInstruction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let DisplayInstruction(function, instruction) = self;
        let ty = |register: &lir::RegisterId| function.register_type(*register);

        match instruction {
            lir::Instruction::LoadMem {
                destination,
                source,
            } => write!(
                f,
                "{destination} {} {} {} {source}",
                "=".white(),
                "load".cyan(),
                ty(destination)
            ),
            lir::Instruction::StoreMem {
                destination,
                source,
            } => {
                write!(
                    f,
                    "{} {destination} {} {source}",
                    "store".cyan(),
                    "<-".white()
                )
            }
            lir::Instruction::AllocStack { destination, ty } => {
                write!(f, "{destination} {} {} {ty}", "=".white(), "alloca".cyan())
            }
            lir::Instruction::BinaryOperation {
                operator,
                destination,
                lhs,
                rhs,
            } => {
                write!(
                    f,
                    "{destination} {} {} {} {lhs}, {rhs}",
                    "=".white(),
                    operator.to_string().cyan(),
                    ty(destination)
                )
            }
            lir::Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => {
                write!(
                    f,
                    "{destination} {} {} {lhs}, {rhs}",
                    "=".white(),
                    format!("cmp {predicate}").cyan(),
                )
            }
            lir::Instruction::Cast {
                kind,
                destination,
                operand,
            } => {
                write!(
                    f,
                    "{destination} {} {} {operand} {} {}",
                    "=".white(),
                    kind.to_string().cyan(),
                    "to".white(),
                    ty(destination)
                )
            }
            lir::Instruction::Branch {
                condition,
                positive,
                negative,
            } => {
                write!(
                    f,
                    "{} {condition}, {}, {}",
                    "br".cyan(),
                    positive.to_string().blue(),
                    negative.to_string().blue()
                )
            }
            lir::Instruction::Jump { destination } => {
                write!(f, "{} {}", "jmp".cyan(), destination.to_string().blue())
            }
            lir::Instruction::Return { value: Some(value) } => {
                write!(f, "{} {value}", "ret".cyan())
            }
            lir::Instruction::Return { value: None } => {
                write!(f, "{}", "ret".cyan())
            }
            lir::Instruction::FunctionCall {
                target,
                arguments,
                destination,
            } => {
                if let Some(dest) = destination {
                    write!(f, "{dest} {} ", "=".white())?;
                }

                write!(
                    f,
                    "{} {}({})",
                    "call".cyan(),
                    target.value().blue(),
                    arguments.iter().map(|op| op.to_string()).join(", ")
                )
            }
            lir::Instruction::Phi {
                destination,
                sources,
            } => {
                write!(
                    f,
                    "{destination} {} {} {} ",
                    "=".white(),
                    "phi".bright_green(),
                    ty(destination)
                )?;

                write!(
                    f,
                    "{}",
                    sources
                        .iter()
                        .map(|(block, value)| format!(
                            "[{}: {value}]",
                            block.to_string().blue()
                        ))
                        .join(", ")
                )
            }
        }
    }
}

impl core::fmt::Display for lir::RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("%{}", self.index()).yellow())
    }
}

impl core::fmt::Display for lir::BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ".label_{}", self.index())
    }
}

impl core::fmt::Display for lir::Immediate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Immediate::Int(value, lir::IntegerWidth::I1) => write!(f, "{}", *value != 0),
            lir::Immediate::Int(value, width) => write!(f, "{}", width.sign_extend(*value)),
            lir::Immediate::Float(value, _) => write!(f, "{value:?}"),
            lir::Immediate::Void => write!(f, "void"),
        }
    }
}

impl core::fmt::Display for lir::Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Operand::Immediate(immediate) => write!(f, "{}", immediate.to_string().purple()),
            lir::Operand::Register(register_id) => write!(f, "{register_id}"),
        }
    }
}

impl core::fmt::Display for lir::Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            lir::Type::Void => write!(f, "void"),
            lir::Type::Integer(integer_width) => write!(f, "i{}", integer_width.bits()),
            lir::Type::Float(float_width) => write!(
                f,
                "{}",
                match float_width {
                    lir::FloatWidth::F32 => "f32",
                    lir::FloatWidth::F64 => "f64",
                }
            ),
            lir::Type::Pointer => write!(f, "ptr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::lir::{
            BinaryOperator, FunctionDefinition, Immediate, IntegerWidth, Signature, Type,
            builder::FunctionBuilder,
        },
    };

    #[test]
    fn prints_functions_and_externs() {
        let i32 = Type::Integer(IntegerWidth::I32);

        let mut builder = FunctionBuilder::new(
            InternedSymbol::new("increment"),
            Signature {
                parameters: vec![i32],
                return_type: i32,
            },
        );
        let entry = builder.append_new_block("entry");
        builder.position_at_end(entry);
        let argument = builder.argument(0).unwrap().into();
        let sum = builder.binary(
            BinaryOperator::Add,
            argument,
            Immediate::int(-1, IntegerWidth::I32).into(),
        );
        builder.ret(Some(sum.into()));

        let module = lir::Module {
            functions: vec![
                FunctionDefinition::external(
                    InternedSymbol::new("print_n"),
                    Signature {
                        parameters: vec![i32],
                        return_type: Type::Void,
                    },
                ),
                builder.finish(),
            ],
        };

        let printed = strip_ansi_escapes::strip_str(module.to_string());

        assert_eq!(
            printed,
            indoc! {"
                extern fn print_n(i32) -> void

                fn increment(%0: i32) -> i32 {
                .label_0 (entry):
                    %1 = add i32 %0, -1
                    ret %1
                }
            "}
        );
    }
}
