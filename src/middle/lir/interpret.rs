//! Reference interpreter for LIR modules. Used to run programs without a
//! native backend and to check that optimizations preserve behaviour.

use hashbrown::HashMap;

use crate::{
    frontend::intern::InternedSymbol,
    middle::lir::{
        BinaryOperator, BlockId, CastKind, ComparePredicate, FloatWidth, FunctionDefinition,
        Immediate, Instruction, IntegerWidth, Module, Operand, RegisterId, Type,
    },
};

/// Upper bound on executed instructions across one top level call
const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

const MAX_CALL_DEPTH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Bits truncated to the width
    Int(u64, IntegerWidth),
    Float(f64, FloatWidth),
    /// Index of a stack slot
    Pointer(usize),
    Void,
}

impl Value {
    pub fn int32(value: i32) -> Self {
        Value::Int(value as u32 as u64, IntegerWidth::I32)
    }

    pub fn int(value: i64, width: IntegerWidth) -> Self {
        Value::Int(width.wrap(value as u64), width)
    }

    pub fn bool(value: bool) -> Self {
        Value::Int(value as u64, IntegerWidth::I1)
    }

    pub fn as_signed(&self) -> Option<i64> {
        match self {
            Value::Int(bits, width) => Some(width.sign_extend(*bits)),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Int(bits, _) => Some(*bits),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value, _) => Some(*value),
            _ => None,
        }
    }

    /// Zero of the given type, used for slots read before being written
    fn zero(ty: Type) -> Self {
        match ty {
            Type::Integer(width) => Value::Int(0, width),
            Type::Float(width) => Value::Float(0.0, width),
            Type::Pointer => Value::Pointer(0),
            Type::Void => Value::Void,
        }
    }
}

impl From<Immediate> for Value {
    fn from(immediate: Immediate) -> Self {
        match immediate {
            Immediate::Int(bits, width) => Value::Int(bits, width),
            Immediate::Float(value, width) => Value::Float(value, width),
            Immediate::Void => Value::Void,
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(bits, IntegerWidth::I1) => write!(f, "{}", *bits != 0),
            Value::Int(bits, width) => write!(f, "{}", width.sign_extend(*bits)),
            Value::Float(value, _) => write!(f, "{value}"),
            Value::Pointer(slot) => write!(f, "<slot {slot}>"),
            Value::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionError {
    UnknownFunction(InternedSymbol),
    MissingHostFunction(InternedSymbol),
    ArityMismatch {
        function: InternedSymbol,
        expected: usize,
        found: usize,
    },
    DivisionByZero {
        function: InternedSymbol,
    },
    UndefinedRegister {
        function: InternedSymbol,
        register: RegisterId,
    },
    InvalidPointer {
        function: InternedSymbol,
    },
    MissingBlock {
        function: InternedSymbol,
        block: BlockId,
    },
    FellOffBlock {
        function: InternedSymbol,
        block: BlockId,
    },
    StepLimitExceeded,
    StackOverflow,
}

impl core::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::UnknownFunction(name) => write!(f, "no function named `{name}`"),
            ExecutionError::MissingHostFunction(name) => {
                write!(f, "external function `{name}` has no host implementation")
            }
            ExecutionError::ArityMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "`{function}` takes {expected} argument(s) but was given {found}"
            ),
            ExecutionError::DivisionByZero { function } => {
                write!(f, "division by zero in `{function}`")
            }
            ExecutionError::UndefinedRegister { function, register } => {
                write!(f, "read of undefined register {register} in `{function}`")
            }
            ExecutionError::InvalidPointer { function } => {
                write!(f, "memory access through an invalid pointer in `{function}`")
            }
            ExecutionError::MissingBlock { function, block } => {
                write!(f, "jump to missing block {block} in `{function}`")
            }
            ExecutionError::FellOffBlock { function, block } => {
                write!(f, "block {block} in `{function}` ended without a terminator")
            }
            ExecutionError::StepLimitExceeded => write!(f, "step limit exceeded"),
            ExecutionError::StackOverflow => write!(f, "call stack overflow"),
        }
    }
}

impl std::error::Error for ExecutionError {}

pub type HostFunction = Box<dyn FnMut(&[Value]) -> Value>;

pub struct Interpreter<'module> {
    module: &'module Module,
    host_functions: HashMap<InternedSymbol, HostFunction>,
    /// Stack slots of every active frame
    memory: Vec<Value>,
    steps: u64,
    step_limit: u64,
    depth: usize,
}

impl<'module> Interpreter<'module> {
    pub fn new(module: &'module Module) -> Self {
        Self {
            module,
            host_functions: HashMap::new(),
            memory: Vec::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            depth: 0,
        }
    }

    pub fn with_step_limit(mut self, step_limit: u64) -> Self {
        self.step_limit = step_limit;
        self
    }

    /// Provides the implementation of an `extern` function
    pub fn register_host_function(
        &mut self,
        name: &str,
        function: impl FnMut(&[Value]) -> Value + 'static,
    ) {
        self.host_functions
            .insert(InternedSymbol::new(name), Box::new(function));
    }

    pub fn call(&mut self, name: &str, arguments: &[Value]) -> Result<Value, ExecutionError> {
        self.steps = 0;
        self.call_symbol(InternedSymbol::new(name), arguments)
    }

    fn call_symbol(
        &mut self,
        name: InternedSymbol,
        arguments: &[Value],
    ) -> Result<Value, ExecutionError> {
        let module = self.module;

        let Some(function) = module.function(name) else {
            return Err(ExecutionError::UnknownFunction(name));
        };

        if function.arguments.len() != arguments.len() {
            return Err(ExecutionError::ArityMismatch {
                function: name,
                expected: function.arguments.len(),
                found: arguments.len(),
            });
        }

        if function.is_external {
            let Some(host) = self.host_functions.get_mut(&name) else {
                return Err(ExecutionError::MissingHostFunction(name));
            };

            return Ok(host(arguments));
        }

        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecutionError::StackOverflow);
        }

        self.depth += 1;
        let stack_base = self.memory.len();

        let result = self.execute(function, arguments);

        self.memory.truncate(stack_base);
        self.depth -= 1;

        result
    }

    fn execute(
        &mut self,
        function: &'module FunctionDefinition,
        arguments: &[Value],
    ) -> Result<Value, ExecutionError> {
        let name = function.symbol_name;

        let mut frame = Frame {
            function,
            registers: HashMap::new(),
        };

        for (register, value) in function.arguments.iter().zip(arguments) {
            frame.registers.insert(*register, *value);
        }

        let Some(mut current) = function.entry() else {
            return Err(ExecutionError::UnknownFunction(name));
        };
        let mut previous: Option<BlockId> = None;

        loop {
            let Some(block) = function.blocks.get(&current) else {
                return Err(ExecutionError::MissingBlock {
                    function: name,
                    block: current,
                });
            };

            // Phis read their inputs simultaneously on block entry
            let phi_count = block.phi_count();
            let mut phi_values = Vec::with_capacity(phi_count);

            for instruction in &block.instructions[..phi_count] {
                let Instruction::Phi {
                    destination,
                    sources,
                } = instruction
                else {
                    continue;
                };

                let incoming = sources
                    .iter()
                    .find(|(from, _)| Some(*from) == previous)
                    .map(|(_, operand)| *operand);

                let value = match incoming {
                    Some(operand) => frame.read(operand)?,
                    None => Value::zero(function.register_type(*destination)),
                };

                phi_values.push((*destination, value));
            }

            frame.registers.extend(phi_values);

            let mut next = None;

            for instruction in &block.instructions[phi_count..] {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(ExecutionError::StepLimitExceeded);
                }

                match instruction {
                    Instruction::AllocStack { destination, ty } => {
                        self.memory.push(Value::zero(*ty));
                        frame
                            .registers
                            .insert(*destination, Value::Pointer(self.memory.len() - 1));
                    }
                    Instruction::LoadMem {
                        destination,
                        source,
                    } => {
                        let Value::Pointer(slot) = frame.read(*source)? else {
                            return Err(ExecutionError::InvalidPointer { function: name });
                        };
                        let Some(value) = self.memory.get(slot).copied() else {
                            return Err(ExecutionError::InvalidPointer { function: name });
                        };

                        frame.registers.insert(*destination, value);
                    }
                    Instruction::StoreMem {
                        destination,
                        source,
                    } => {
                        let Value::Pointer(slot) = frame.read(*destination)? else {
                            return Err(ExecutionError::InvalidPointer { function: name });
                        };
                        let value = frame.read(*source)?;

                        match self.memory.get_mut(slot) {
                            Some(cell) => *cell = value,
                            None => return Err(ExecutionError::InvalidPointer { function: name }),
                        }
                    }
                    Instruction::BinaryOperation {
                        operator,
                        destination,
                        lhs,
                        rhs,
                    } => {
                        let lhs = frame.read(*lhs)?;
                        let rhs = frame.read(*rhs)?;

                        let value = evaluate_binary(*operator, lhs, rhs)
                            .ok_or(ExecutionError::DivisionByZero { function: name })?;

                        frame.registers.insert(*destination, value);
                    }
                    Instruction::Compare {
                        predicate,
                        destination,
                        lhs,
                        rhs,
                    } => {
                        let value = evaluate_compare(
                            *predicate,
                            frame.read(*lhs)?,
                            frame.read(*rhs)?,
                        );

                        frame.registers.insert(*destination, Value::bool(value));
                    }
                    Instruction::Cast {
                        kind,
                        destination,
                        operand,
                    } => {
                        let to = function.register_type(*destination);
                        let value = evaluate_cast(*kind, frame.read(*operand)?, to);

                        frame.registers.insert(*destination, value);
                    }
                    Instruction::FunctionCall {
                        target,
                        arguments,
                        destination,
                    } => {
                        let arguments = arguments
                            .iter()
                            .map(|argument| frame.read(*argument))
                            .collect::<Result<Vec<_>, _>>()?;

                        let value = self.call_symbol(*target, &arguments)?;

                        if let Some(destination) = destination {
                            frame.registers.insert(*destination, value);
                        }
                    }
                    Instruction::Branch {
                        condition,
                        positive,
                        negative,
                    } => {
                        let taken = frame.read(*condition)?.as_unsigned().unwrap_or(0) != 0;
                        next = Some(if taken { *positive } else { *negative });
                        break;
                    }
                    Instruction::Jump { destination } => {
                        next = Some(*destination);
                        break;
                    }
                    Instruction::Return { value } => {
                        return match value {
                            Some(value) => frame.read(*value),
                            None => Ok(Value::Void),
                        };
                    }
                    // Only legal at the start of a block, handled above
                    Instruction::Phi { .. } => {}
                }
            }

            let Some(next) = next else {
                return Err(ExecutionError::FellOffBlock {
                    function: name,
                    block: current,
                });
            };

            previous = Some(current);
            current = next;
        }
    }
}

struct Frame<'module> {
    function: &'module FunctionDefinition,
    registers: HashMap<RegisterId, Value>,
}

impl Frame<'_> {
    fn read(&self, operand: Operand) -> Result<Value, ExecutionError> {
        match operand {
            Operand::Immediate(immediate) => Ok(immediate.into()),
            Operand::Register(register) => self.registers.get(&register).copied().ok_or(
                ExecutionError::UndefinedRegister {
                    function: self.function.symbol_name,
                    register,
                },
            ),
        }
    }
}

/// `None` on division by zero
pub fn evaluate_binary(operator: BinaryOperator, lhs: Value, rhs: Value) -> Option<Value> {
    match (lhs, rhs) {
        (Value::Int(a, width), Value::Int(b, _)) => {
            let (sa, sb) = (width.sign_extend(a), width.sign_extend(b));

            let bits = match operator {
                BinaryOperator::Add => a.wrapping_add(b),
                BinaryOperator::Subtract => a.wrapping_sub(b),
                BinaryOperator::Multiply => a.wrapping_mul(b),
                BinaryOperator::SignedDivide => {
                    if sb == 0 {
                        return None;
                    }
                    sa.wrapping_div(sb) as u64
                }
                BinaryOperator::UnsignedDivide => {
                    if b == 0 {
                        return None;
                    }
                    a / b
                }
                _ => return Some(Value::Int(a, width)),
            };

            Some(Value::Int(width.wrap(bits), width))
        }
        (Value::Float(a, width), Value::Float(b, _)) => {
            let value = match operator {
                BinaryOperator::FloatAdd => a + b,
                BinaryOperator::FloatSubtract => a - b,
                BinaryOperator::FloatMultiply => a * b,
                BinaryOperator::FloatDivide => a / b,
                _ => a,
            };

            Some(float_value(value, width))
        }
        _ => Some(lhs),
    }
}

pub fn evaluate_compare(predicate: ComparePredicate, lhs: Value, rhs: Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a, width), Value::Int(b, _)) => {
            let (sa, sb) = (width.sign_extend(a), width.sign_extend(b));

            match predicate {
                ComparePredicate::Equal => a == b,
                ComparePredicate::NotEqual => a != b,
                ComparePredicate::SignedLess => sa < sb,
                ComparePredicate::SignedLessEqual => sa <= sb,
                ComparePredicate::SignedGreater => sa > sb,
                ComparePredicate::SignedGreaterEqual => sa >= sb,
                ComparePredicate::UnsignedLess => a < b,
                ComparePredicate::UnsignedLessEqual => a <= b,
                ComparePredicate::UnsignedGreater => a > b,
                ComparePredicate::UnsignedGreaterEqual => a >= b,
                _ => false,
            }
        }
        (Value::Float(a, _), Value::Float(b, _)) => match predicate {
            // Ordered predicates are false when either side is NaN
            ComparePredicate::FloatEqual => a == b,
            ComparePredicate::FloatNotEqual => !a.is_nan() && !b.is_nan() && a != b,
            ComparePredicate::FloatLess => a < b,
            ComparePredicate::FloatLessEqual => a <= b,
            ComparePredicate::FloatGreater => a > b,
            ComparePredicate::FloatGreaterEqual => a >= b,
            _ => false,
        },
        _ => false,
    }
}

pub fn evaluate_cast(kind: CastKind, value: Value, to: Type) -> Value {
    match (kind, value, to) {
        (CastKind::Truncate | CastKind::ZeroExtend, Value::Int(bits, _), Type::Integer(to)) => {
            Value::Int(to.wrap(bits), to)
        }
        (CastKind::SignExtend, Value::Int(bits, from), Type::Integer(to)) => {
            Value::Int(to.wrap(from.sign_extend(bits) as u64), to)
        }
        (CastKind::FloatToSigned, Value::Float(value, _), Type::Integer(to)) => {
            Value::Int(to.wrap(value as i64 as u64), to)
        }
        (CastKind::FloatToUnsigned, Value::Float(value, _), Type::Integer(to)) => {
            Value::Int(to.wrap(value as u64), to)
        }
        (CastKind::SignedToFloat, Value::Int(bits, from), Type::Float(to)) => {
            float_value(from.sign_extend(bits) as f64, to)
        }
        (CastKind::UnsignedToFloat, Value::Int(bits, _), Type::Float(to)) => {
            float_value(bits as f64, to)
        }
        (CastKind::FloatTruncate | CastKind::FloatExtend, Value::Float(value, _), Type::Float(to)) => {
            float_value(value, to)
        }
        _ => value,
    }
}

fn float_value(value: f64, width: FloatWidth) -> Value {
    match width {
        FloatWidth::F32 => Value::Float(value as f32 as f64, width),
        FloatWidth::F64 => Value::Float(value, width),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::middle::lir::{Signature, builder::FunctionBuilder};

    const I32: Type = Type::Integer(IntegerWidth::I32);

    /// sum(n) = n + (n - 1) + ... + 1, with a loop through a stack slot
    fn sum_module() -> Module {
        let mut b = FunctionBuilder::new(
            InternedSymbol::new("sum"),
            Signature {
                parameters: vec![I32],
                return_type: I32,
            },
        );

        let entry = b.append_new_block("entry");
        let condition = b.append_new_block("loop_cond");
        let body = b.append_new_block("loop_body");
        let exit = b.append_new_block("loop_cont");

        let n = b.argument(0).unwrap().into();
        let zero = Immediate::int(0, IntegerWidth::I32).into();
        let one = Immediate::int(1, IntegerWidth::I32).into();

        b.position_at_end(entry);
        let total = b.alloca(I32).into();
        let counter = b.alloca(I32).into();
        b.store(total, zero);
        b.store(counter, n);
        b.jump(condition);

        b.position_at_end(condition);
        let current = b.load(I32, counter).into();
        let more = b.compare(ComparePredicate::SignedGreater, current, zero);
        b.branch(more.into(), body, exit);

        b.position_at_end(body);
        let current = b.load(I32, counter).into();
        let accumulated = b.load(I32, total).into();
        let next_total = b.binary(BinaryOperator::Add, accumulated, current);
        b.store(total, next_total.into());
        let next_counter = b.binary(BinaryOperator::Subtract, current, one);
        b.store(counter, next_counter.into());
        b.jump(condition);

        b.position_at_end(exit);
        let result = b.load(I32, total);
        b.ret(Some(result.into()));

        Module {
            functions: vec![b.finish()],
        }
    }

    #[test]
    fn runs_a_loop() {
        let module = sum_module();
        let mut interpreter = Interpreter::new(&module);

        assert_eq!(interpreter.call("sum", &[Value::int32(10)]), Ok(Value::int32(55)));
    }

    #[test]
    fn step_limit_stops_long_runs() {
        let module = sum_module();
        let mut interpreter = Interpreter::new(&module).with_step_limit(100);

        assert_eq!(
            interpreter.call("sum", &[Value::int32(1_000)]),
            Err(ExecutionError::StepLimitExceeded)
        );
    }

    #[test]
    fn external_functions_go_to_the_host() {
        let mut b = FunctionBuilder::new(
            InternedSymbol::new("main"),
            Signature {
                parameters: vec![],
                return_type: Type::Void,
            },
        );
        let entry = b.append_new_block("entry");
        b.position_at_end(entry);
        b.call(
            InternedSymbol::new("print_n"),
            Type::Void,
            vec![Immediate::int(7, IntegerWidth::I32).into()],
        );
        b.ret(None);

        let module = Module {
            functions: vec![
                FunctionDefinition::external(
                    InternedSymbol::new("print_n"),
                    Signature {
                        parameters: vec![I32],
                        return_type: Type::Void,
                    },
                ),
                b.finish(),
            ],
        };

        let printed = Rc::new(RefCell::new(Vec::new()));
        let sink = printed.clone();

        let mut interpreter = Interpreter::new(&module);
        interpreter.register_host_function("print_n", move |arguments| {
            sink.borrow_mut().extend(arguments.iter().filter_map(Value::as_signed));
            Value::Void
        });

        assert_eq!(interpreter.call("main", &[]), Ok(Value::Void));
        assert_eq!(*printed.borrow(), vec![7]);
    }

    #[test]
    fn arithmetic_wraps_at_the_register_width() {
        let max = Value::int32(i32::MAX);

        assert_eq!(
            evaluate_binary(BinaryOperator::Add, max, Value::int32(1)),
            Some(Value::int32(i32::MIN))
        );
        assert_eq!(
            evaluate_binary(BinaryOperator::SignedDivide, Value::int32(-7), Value::int32(2)),
            Some(Value::int32(-3))
        );
        assert_eq!(
            evaluate_binary(BinaryOperator::UnsignedDivide, Value::int32(-2), Value::int32(2)),
            Some(Value::int32(i32::MAX))
        );
        assert_eq!(
            evaluate_binary(BinaryOperator::SignedDivide, max, Value::int32(0)),
            None
        );
    }

    #[test]
    fn casts_follow_their_kind() {
        let minus_one = Value::int32(-1);
        let i64 = Type::Integer(IntegerWidth::I64);

        assert_eq!(
            evaluate_cast(CastKind::ZeroExtend, minus_one, i64),
            Value::Int(0xffff_ffff, IntegerWidth::I64)
        );
        assert_eq!(
            evaluate_cast(CastKind::SignExtend, minus_one, i64).as_signed(),
            Some(-1)
        );
        assert_eq!(
            evaluate_cast(
                CastKind::FloatToSigned,
                Value::Float(-2.75, FloatWidth::F64),
                I32
            ),
            Value::int32(-2)
        );
    }
}
