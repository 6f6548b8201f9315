//! Structural verification of LIR functions. Lowering and every optimization
//! pass must leave functions in a state this accepts.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::{
    frontend::intern::InternedSymbol,
    middle::lir::{
        BlockId, CastKind, FunctionDefinition, Instruction, Module, Operand, RegisterId,
        Signature, Type, cfg,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    EmptyFunction,
    EntryHasPredecessors {
        entry: BlockId,
    },
    EmptyBlock {
        block: BlockId,
    },
    MissingTerminator {
        block: BlockId,
    },
    TerminatorNotLast {
        block: BlockId,
    },
    PhiNotAtStart {
        block: BlockId,
    },
    PhiSourcesMismatch {
        block: BlockId,
        register: RegisterId,
    },
    UnknownBlock {
        block: BlockId,
        target: BlockId,
    },
    RegisterRedefined {
        register: RegisterId,
    },
    UndefinedRegister {
        block: BlockId,
        register: RegisterId,
    },
    UseNotDominated {
        block: BlockId,
        register: RegisterId,
    },
    VoidOperand {
        block: BlockId,
    },
    UnknownCallee {
        block: BlockId,
        callee: InternedSymbol,
    },
    ReturnTypeMismatch {
        block: BlockId,
        expected: Type,
        found: Type,
    },
    TypeMismatch {
        block: BlockId,
        detail: String,
    },
}

impl core::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::EmptyFunction => write!(f, "function has no blocks"),
            VerifyError::EntryHasPredecessors { entry } => {
                write!(f, "entry block {entry} has predecessors")
            }
            VerifyError::EmptyBlock { block } => write!(f, "block {block} is empty"),
            VerifyError::MissingTerminator { block } => {
                write!(f, "block {block} does not end in a terminator")
            }
            VerifyError::TerminatorNotLast { block } => {
                write!(f, "block {block} has instructions after its terminator")
            }
            VerifyError::PhiNotAtStart { block } => {
                write!(f, "block {block} has a phi after a non-phi instruction")
            }
            VerifyError::PhiSourcesMismatch { block, register } => write!(
                f,
                "phi {register} in block {block} does not have exactly one entry per predecessor"
            ),
            VerifyError::UnknownBlock { block, target } => {
                write!(f, "block {block} branches to unknown block {target}")
            }
            VerifyError::RegisterRedefined { register } => {
                write!(f, "register {register} is defined more than once")
            }
            VerifyError::UndefinedRegister { block, register } => {
                write!(f, "register {register} used in block {block} is never defined")
            }
            VerifyError::UseNotDominated { block, register } => write!(
                f,
                "register {register} used in block {block} does not dominate its use"
            ),
            VerifyError::VoidOperand { block } => {
                write!(f, "a void value is used as an operand in block {block}")
            }
            VerifyError::UnknownCallee { block, callee } => {
                write!(f, "block {block} calls unknown function `{callee}`")
            }
            VerifyError::ReturnTypeMismatch {
                block,
                expected,
                found,
            } => write!(
                f,
                "block {block} returns {found} from a function returning {expected}"
            ),
            VerifyError::TypeMismatch { block, detail } => {
                write!(f, "type error in block {block}: {detail}")
            }
        }
    }
}

/// Where a register gets its value
#[derive(Debug, Clone, Copy)]
enum Definition {
    Argument,
    Instruction { block: BlockId, index: usize },
}

pub fn verify_function(
    function: &FunctionDefinition,
    module: &Module,
) -> Result<(), Vec<VerifyError>> {
    if function.is_external {
        return Ok(());
    }

    let Some(entry) = function.entry() else {
        return Err(vec![VerifyError::EmptyFunction]);
    };

    let mut verifier = Verifier {
        function,
        module,
        errors: Vec::new(),
    };

    verifier.check_structure(entry);

    // Dominance and types rely on a well formed CFG
    if verifier.errors.is_empty() {
        verifier.check_definitions();
    }

    if verifier.errors.is_empty() {
        for block in function.ordered_blocks() {
            for instruction in &block.instructions {
                verifier.check_types(block.id, instruction);
            }
        }
    }

    if verifier.errors.is_empty() {
        Ok(())
    } else {
        Err(verifier.errors)
    }
}

struct Verifier<'a> {
    function: &'a FunctionDefinition,
    module: &'a Module,
    errors: Vec<VerifyError>,
}

impl Verifier<'_> {
    fn check_structure(&mut self, entry: BlockId) {
        let predecessors = cfg::predecessors(self.function);

        if predecessors.get(&entry).is_some_and(|p| !p.is_empty()) {
            self.errors.push(VerifyError::EntryHasPredecessors { entry });
        }

        for block in self.function.ordered_blocks() {
            let Some(last) = block.instructions.last() else {
                self.errors.push(VerifyError::EmptyBlock { block: block.id });
                continue;
            };

            if !last.is_terminator() {
                self.errors
                    .push(VerifyError::MissingTerminator { block: block.id });
            }

            let body = &block.instructions[..block.instructions.len() - 1];
            if body.iter().any(Instruction::is_terminator) {
                self.errors
                    .push(VerifyError::TerminatorNotLast { block: block.id });
            }

            let phi_count = block.phi_count();
            if block.instructions[phi_count..]
                .iter()
                .any(|i| matches!(i, Instruction::Phi { .. }))
            {
                self.errors.push(VerifyError::PhiNotAtStart { block: block.id });
            }

            for target in last.successors() {
                if !self.function.blocks.contains_key(&target) {
                    self.errors.push(VerifyError::UnknownBlock {
                        block: block.id,
                        target,
                    });
                }
            }

            let expected = predecessors
                .get(&block.id)
                .map(|p| p.iter().copied().sorted().collect::<Vec<_>>())
                .unwrap_or_default();

            for instruction in &block.instructions[..phi_count] {
                let Instruction::Phi {
                    destination,
                    sources,
                } = instruction
                else {
                    continue;
                };

                let found = sources.iter().map(|(b, _)| *b).sorted().collect::<Vec<_>>();

                if found != expected {
                    self.errors.push(VerifyError::PhiSourcesMismatch {
                        block: block.id,
                        register: *destination,
                    });
                }
            }
        }
    }

    fn check_definitions(&mut self) {
        let mut definitions: HashMap<RegisterId, Definition> = HashMap::new();

        for argument in &self.function.arguments {
            definitions.insert(*argument, Definition::Argument);
        }

        for block in self.function.ordered_blocks() {
            for (index, instruction) in block.instructions.iter().enumerate() {
                let Some(destination) = instruction.destination() else {
                    continue;
                };

                let definition = Definition::Instruction {
                    block: block.id,
                    index,
                };

                if definitions.insert(destination, definition).is_some() {
                    self.errors.push(VerifyError::RegisterRedefined {
                        register: destination,
                    });
                }
            }
        }

        let tree = cfg::DominatorTree::compute(self.function);
        let reachable = tree.reverse_postorder().iter().copied().collect::<HashSet<_>>();

        for block in self.function.ordered_blocks() {
            for (index, instruction) in block.instructions.iter().enumerate() {
                // (register, block whose end the value must be available at)
                let uses: Vec<(RegisterId, Option<BlockId>)> = match instruction {
                    Instruction::Phi { sources, .. } => sources
                        .iter()
                        .filter_map(|(from, op)| op.as_register().map(|r| (r, Some(*from))))
                        .collect(),
                    _ => instruction
                        .operands()
                        .iter()
                        .filter_map(|op| op.as_register().map(|r| (r, None)))
                        .collect(),
                };

                for (register, incoming) in uses {
                    let Some(definition) = definitions.get(&register) else {
                        self.errors.push(VerifyError::UndefinedRegister {
                            block: block.id,
                            register,
                        });
                        continue;
                    };

                    let Definition::Instruction {
                        block: defining_block,
                        index: defining_index,
                    } = *definition
                    else {
                        continue;
                    };

                    let dominated = match incoming {
                        Some(from) if !reachable.contains(&from) => true,
                        Some(from) => tree.dominates(defining_block, from),
                        None if !reachable.contains(&block.id) => true,
                        None if defining_block == block.id => defining_index < index,
                        None => tree.dominates(defining_block, block.id),
                    };

                    if !dominated {
                        self.errors.push(VerifyError::UseNotDominated {
                            block: block.id,
                            register,
                        });
                    }
                }
            }
        }
    }

    fn ty(&self, operand: Operand) -> Type {
        self.function.operand_type(operand)
    }

    fn mismatch(&mut self, block: BlockId, detail: String) {
        self.errors.push(VerifyError::TypeMismatch { block, detail });
    }

    fn check_types(&mut self, block: BlockId, instruction: &Instruction) {
        let uses_void = match instruction {
            // A missing return value is expressed with `None`
            Instruction::Return { value: Some(value) } => self.ty(*value) == Type::Void,
            _ => instruction
                .operands()
                .into_iter()
                .any(|op| self.ty(op) == Type::Void),
        };

        if uses_void {
            self.errors.push(VerifyError::VoidOperand { block });
            return;
        }

        match instruction {
            Instruction::AllocStack { ty, .. } => {
                if *ty == Type::Void {
                    self.mismatch(block, "stack slot of type void".to_owned());
                }
            }
            Instruction::LoadMem { source, .. } => {
                if self.ty(*source) != Type::Pointer {
                    self.mismatch(block, format!("load from non-pointer {}", self.ty(*source)));
                }
            }
            Instruction::StoreMem { destination, .. } => {
                if self.ty(*destination) != Type::Pointer {
                    self.mismatch(
                        block,
                        format!("store to non-pointer {}", self.ty(*destination)),
                    );
                }
            }
            Instruction::BinaryOperation {
                operator,
                destination,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (self.ty(*lhs), self.ty(*rhs));
                let result = self.function.register_type(*destination);

                let kind_matches = if operator.is_float() {
                    lhs.is_float()
                } else {
                    lhs.is_integer()
                };

                if lhs != rhs || lhs != result || !kind_matches {
                    self.mismatch(
                        block,
                        format!("{operator} of {lhs} and {rhs} producing {result}"),
                    );
                }
            }
            Instruction::Compare {
                predicate,
                destination,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (self.ty(*lhs), self.ty(*rhs));

                let kind_matches = if predicate.is_float() {
                    lhs.is_float()
                } else {
                    lhs.is_integer()
                };

                if lhs != rhs
                    || !kind_matches
                    || self.function.register_type(*destination) != Type::BOOL
                {
                    self.mismatch(block, format!("{predicate} compare of {lhs} and {rhs}"));
                }
            }
            Instruction::Cast {
                kind,
                destination,
                operand,
            } => {
                let from = self.ty(*operand);
                let to = self.function.register_type(*destination);

                if !cast_is_valid(*kind, from, to) {
                    self.mismatch(block, format!("{kind} from {from} to {to}"));
                }
            }
            Instruction::Branch { condition, .. } => {
                if self.ty(*condition) != Type::BOOL {
                    self.mismatch(
                        block,
                        format!("branch on {} instead of i1", self.ty(*condition)),
                    );
                }
            }
            Instruction::Jump { .. } => {}
            Instruction::Return { value } => {
                let expected = self.function.signature.return_type;
                let found = value.map(|v| self.ty(v)).unwrap_or(Type::Void);

                if expected != found {
                    self.errors.push(VerifyError::ReturnTypeMismatch {
                        block,
                        expected,
                        found,
                    });
                }
            }
            Instruction::FunctionCall {
                target,
                arguments,
                destination,
            } => {
                let signature: &Signature = if *target == self.function.symbol_name {
                    &self.function.signature
                } else if let Some(callee) = self.module.function(*target) {
                    &callee.signature
                } else {
                    self.errors.push(VerifyError::UnknownCallee {
                        block,
                        callee: *target,
                    });
                    return;
                };

                let argument_types = arguments.iter().map(|a| self.ty(*a)).collect::<Vec<_>>();

                if argument_types != signature.parameters {
                    let detail = format!(
                        "call to `{target}` with ({}) but it takes ({})",
                        argument_types.iter().join(", "),
                        signature.parameters.iter().join(", ")
                    );
                    self.mismatch(block, detail);
                }

                let result = destination
                    .map(|d| self.function.register_type(d))
                    .unwrap_or(Type::Void);

                if result != signature.return_type {
                    let detail = format!(
                        "call to `{target}` produces {result} but it returns {}",
                        signature.return_type
                    );
                    self.mismatch(block, detail);
                }
            }
            Instruction::Phi {
                destination,
                sources,
            } => {
                let result = self.function.register_type(*destination);

                for (_, source) in sources {
                    if self.ty(*source) != result {
                        let detail = format!("phi of {result} merging {}", self.ty(*source));
                        self.mismatch(block, detail);
                    }
                }
            }
        }
    }
}

fn cast_is_valid(kind: CastKind, from: Type, to: Type) -> bool {
    match (kind, from, to) {
        (CastKind::Truncate, Type::Integer(from), Type::Integer(to)) => from > to,
        (CastKind::ZeroExtend | CastKind::SignExtend, Type::Integer(from), Type::Integer(to)) => {
            from < to
        }
        (CastKind::FloatToSigned | CastKind::FloatToUnsigned, Type::Float(_), Type::Integer(_)) => {
            true
        }
        (CastKind::SignedToFloat | CastKind::UnsignedToFloat, Type::Integer(_), Type::Float(_)) => {
            true
        }
        (CastKind::FloatTruncate, Type::Float(from), Type::Float(to)) => from > to,
        (CastKind::FloatExtend, Type::Float(from), Type::Float(to)) => from < to,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::lir::{
        BinaryOperator, Immediate, IntegerWidth, builder::FunctionBuilder,
    };

    const I32: Type = Type::Integer(IntegerWidth::I32);

    fn builder(return_type: Type) -> FunctionBuilder {
        FunctionBuilder::new(
            InternedSymbol::new("verified"),
            Signature {
                parameters: vec![I32],
                return_type,
            },
        )
    }

    fn verify(function: &FunctionDefinition) -> Result<(), Vec<VerifyError>> {
        verify_function(function, &Module::default())
    }

    #[test]
    fn accepts_a_simple_function() {
        let mut b = builder(I32);
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);

        let argument = b.argument(0).unwrap().into();
        let sum = b.binary(BinaryOperator::Add, argument, argument);
        b.ret(Some(sum.into()));

        assert_eq!(verify(&b.finish()), Ok(()));
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut b = builder(Type::Void);
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);
        b.alloca(I32);

        assert_eq!(
            verify(&b.finish()),
            Err(vec![VerifyError::MissingTerminator { block: entry }])
        );
    }

    #[test]
    fn rejects_wrong_return_type() {
        let mut b = builder(I32);
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);
        b.ret(None);

        assert_eq!(
            verify(&b.finish()),
            Err(vec![VerifyError::ReturnTypeMismatch {
                block: entry,
                expected: I32,
                found: Type::Void
            }])
        );
    }

    #[test]
    fn rejects_use_that_is_not_dominated() {
        let mut b = builder(I32);
        let entry = b.append_new_block("entry");
        let then = b.append_new_block("then");
        let merge = b.append_new_block("merge");

        let argument = b.argument(0).unwrap().into();

        b.position_at_end(entry);
        let condition = b.compare(
            crate::middle::lir::ComparePredicate::Equal,
            argument,
            Immediate::int(0, IntegerWidth::I32).into(),
        );
        b.branch(condition.into(), then, merge);

        b.position_at_end(then);
        let doubled = b.binary(BinaryOperator::Add, argument, argument);
        b.jump(merge);

        b.position_at_end(merge);
        b.ret(Some(doubled.into()));

        assert_eq!(
            verify(&b.finish()),
            Err(vec![VerifyError::UseNotDominated {
                block: merge,
                register: doubled
            }])
        );
    }

    #[test]
    fn rejects_phi_with_missing_predecessor() {
        let mut b = builder(I32);
        let entry = b.append_new_block("entry");
        let merge = b.append_new_block("merge");

        b.position_at_end(entry);
        b.jump(merge);

        b.position_at_end(merge);
        let phi = b.phi(I32, vec![]);
        b.ret(Some(phi.into()));

        assert_eq!(
            verify(&b.finish()),
            Err(vec![VerifyError::PhiSourcesMismatch {
                block: merge,
                register: phi
            }])
        );
    }

    #[test]
    fn rejects_call_to_unknown_function() {
        let mut b = builder(Type::Void);
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);
        b.call(InternedSymbol::new("nowhere"), Type::Void, vec![]);
        b.ret(None);

        assert!(matches!(
            verify(&b.finish()).unwrap_err()[..],
            [VerifyError::UnknownCallee { .. }]
        ));
    }
}
