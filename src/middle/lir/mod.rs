//! LIR (Low-level Intermediate Representation). A typed SSA form: every
//! register is assigned exactly once, control flow is made of basic blocks
//! that each end in a single terminator, and values flowing in from several
//! predecessors are merged with phis.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use strum::Display;

use crate::{
    frontend::intern::InternedSymbol,
    index::{IndexVec, simple_index},
};

pub mod builder;
pub mod cfg;
pub mod interpret;
pub mod optimization;
pub mod pretty_print;
pub mod verify;

#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Definitions and external declarations in declaration order
    pub functions: Vec<FunctionDefinition>,
}

impl Module {
    pub fn function(&self, name: InternedSymbol) -> Option<&FunctionDefinition> {
        self.functions.iter().find(|f| f.symbol_name == name)
    }

    pub fn function_mut(&mut self, name: InternedSymbol) -> Option<&mut FunctionDefinition> {
        self.functions.iter_mut().find(|f| f.symbol_name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub symbol_name: InternedSymbol,
    pub signature: Signature,
    /// Allocated virtual registers used to store temporary data
    pub registers: IndexVec<RegisterId, Register>,
    pub arguments: Vec<RegisterId>,
    pub blocks: BTreeMap<BlockId, Block>,
    /// Order the blocks are laid out in. The first block is the entry.
    pub layout: Vec<BlockId>,
    /// Declared with `extern`, has no body
    pub is_external: bool,
}

impl FunctionDefinition {
    /// A function with argument registers and no blocks
    pub fn new(symbol_name: InternedSymbol, signature: Signature) -> Self {
        let mut registers = IndexVec::new();

        let arguments = signature
            .parameters
            .iter()
            .map(|ty| {
                let id = registers.next_index();
                registers.push(Register { id, ty: *ty })
            })
            .collect();

        Self {
            symbol_name,
            signature,
            registers,
            arguments,
            blocks: BTreeMap::new(),
            layout: Vec::new(),
            is_external: false,
        }
    }

    pub fn external(symbol_name: InternedSymbol, signature: Signature) -> Self {
        Self {
            is_external: true,
            ..Self::new(symbol_name, signature)
        }
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Blocks in layout order
    pub fn ordered_blocks(&self) -> impl Iterator<Item = &Block> {
        self.layout.iter().filter_map(|id| self.blocks.get(id))
    }

    pub fn new_register(&mut self, ty: Type) -> RegisterId {
        let id = self.registers.next_index();
        self.registers.push(Register { id, ty })
    }

    pub fn register_type(&self, register: RegisterId) -> Type {
        self.registers
            .get(register)
            .map(|register| register.ty)
            .unwrap_or(Type::Void)
    }

    pub fn operand_type(&self, operand: Operand) -> Type {
        match operand {
            Operand::Immediate(immediate) => immediate.ty(),
            Operand::Register(register) => self.register_type(register),
        }
    }

    pub fn remove_block(&mut self, id: BlockId) -> Option<Block> {
        self.layout.retain(|b| *b != id);
        self.blocks.remove(&id)
    }

    /// Rewrites every use of the registers in `replacements`. Chains
    /// (`%1 -> %2`, `%2 -> 5`) are followed to their end.
    pub fn replace_uses(&mut self, replacements: &HashMap<RegisterId, Operand>) {
        if replacements.is_empty() {
            return;
        }

        let resolve = |mut operand: Operand| {
            // Bounded so that a cyclic map cannot hang
            for _ in 0..=replacements.len() {
                match operand {
                    Operand::Register(register) => match replacements.get(&register) {
                        Some(replacement) => operand = *replacement,
                        None => break,
                    },
                    Operand::Immediate(_) => break,
                }
            }

            operand
        };

        for block in self.blocks.values_mut() {
            for instruction in &mut block.instructions {
                for operand in instruction.operands_mut() {
                    *operand = resolve(*operand);
                }
            }
        }
    }

    /// Number of times each register is read
    pub fn use_counts(&self) -> HashMap<RegisterId, usize> {
        let mut counts = HashMap::new();

        for block in self.blocks.values() {
            for instruction in &block.instructions {
                for operand in instruction.operands() {
                    if let Operand::Register(register) = operand {
                        *counts.entry(register).or_default() += 1;
                    }
                }
            }
        }

        counts
    }

    /// Locates the instruction defining a register
    pub fn definition(&self, register: RegisterId) -> Option<&Instruction> {
        self.blocks
            .values()
            .flat_map(|block| &block.instructions)
            .find(|instruction| instruction.destination() == Some(register))
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// Human readable hint for what lowering created the block for
    pub label: &'static str,
    pub instructions: Vec<Instruction>,
}

impl Block {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    pub fn returns(&self) -> bool {
        self.instructions
            .last()
            .is_some_and(|i| matches!(i, Instruction::Return { .. }))
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator()
            .map(Instruction::successors)
            .unwrap_or_default()
    }

    /// Number of leading phi instructions
    pub fn phi_count(&self) -> usize {
        self.instructions
            .iter()
            .take_while(|i| matches!(i, Instruction::Phi { .. }))
            .count()
    }

    /// Drops the phi entries flowing in from `predecessor`
    pub fn remove_phi_sources_from(&mut self, predecessor: BlockId) {
        for instruction in &mut self.instructions {
            if let Instruction::Phi { sources, .. } = instruction {
                sources.retain(|(block, _)| *block != predecessor);
            }
        }
    }

    /// Renames `old` to `new` in the incoming edges of this block's phis
    pub fn rename_phi_sources(&mut self, old: BlockId, new: BlockId) {
        for instruction in &mut self.instructions {
            if let Instruction::Phi { sources, .. } = instruction {
                for (block, _) in sources.iter_mut() {
                    if *block == old {
                        *block = new;
                    }
                }
            }
        }
    }
}

simple_index! {
    /// Identifies an LIR block
    pub struct BlockId;
}

/// A temporary virtual register of some type
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Register {
    pub id: RegisterId,
    pub ty: Type,
}

simple_index! {
    /// Identifies a virtual LIR register which holds a temporary value
    pub struct RegisterId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Integer(IntegerWidth),
    Float(FloatWidth),
    Pointer,
}

impl Type {
    pub const BOOL: Type = Type::Integer(IntegerWidth::I1);

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Integer(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntegerWidth {
    I1,
    I8,
    I16,
    I32,
    I64,
}

impl IntegerWidth {
    pub fn bits(&self) -> u32 {
        match self {
            IntegerWidth::I1 => 1,
            IntegerWidth::I8 => 8,
            IntegerWidth::I16 => 16,
            IntegerWidth::I32 => 32,
            IntegerWidth::I64 => 64,
        }
    }

    pub fn mask(&self) -> u64 {
        match self.bits() {
            64 => u64::MAX,
            bits => (1 << bits) - 1,
        }
    }

    /// Truncates to the width
    pub fn wrap(&self, value: u64) -> u64 {
        value & self.mask()
    }

    /// Interprets the low bits as a two's complement number
    pub fn sign_extend(&self, value: u64) -> i64 {
        let shift = 64 - self.bits();

        ((value << shift) as i64) >> shift
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    AllocStack {
        destination: RegisterId,
        ty: Type,
    },
    LoadMem {
        destination: RegisterId,
        source: Operand,
    },
    StoreMem {
        destination: Operand,
        source: Operand,
    },
    BinaryOperation {
        operator: BinaryOperator,
        destination: RegisterId,
        lhs: Operand,
        rhs: Operand,
    },
    Compare {
        predicate: ComparePredicate,
        destination: RegisterId,
        lhs: Operand,
        rhs: Operand,
    },
    Cast {
        kind: CastKind,
        destination: RegisterId,
        operand: Operand,
    },
    Branch {
        condition: Operand,
        positive: BlockId,
        negative: BlockId,
    },
    Jump {
        destination: BlockId,
    },
    Return {
        value: Option<Operand>,
    },
    FunctionCall {
        target: InternedSymbol,
        arguments: Vec<Operand>,
        destination: Option<RegisterId>,
    },
    Phi {
        destination: RegisterId,
        sources: Vec<(BlockId, Operand)>,
    },
}

impl Instruction {
    pub fn destination(&self) -> Option<RegisterId> {
        match self {
            Instruction::AllocStack { destination, .. }
            | Instruction::LoadMem { destination, .. }
            | Instruction::BinaryOperation { destination, .. }
            | Instruction::Compare { destination, .. }
            | Instruction::Cast { destination, .. }
            | Instruction::Phi { destination, .. } => Some(*destination),
            Instruction::FunctionCall { destination, .. } => *destination,
            Instruction::StoreMem { .. }
            | Instruction::Branch { .. }
            | Instruction::Jump { .. }
            | Instruction::Return { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Instruction::AllocStack { .. } | Instruction::Jump { .. } => vec![],
            Instruction::LoadMem { source, .. } => vec![*source],
            Instruction::StoreMem {
                destination,
                source,
            } => vec![*destination, *source],
            Instruction::BinaryOperation { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Instruction::Cast { operand, .. } => vec![*operand],
            Instruction::Branch { condition, .. } => vec![*condition],
            Instruction::Return { value } => value.iter().copied().collect(),
            Instruction::FunctionCall { arguments, .. } => arguments.clone(),
            Instruction::Phi { sources, .. } => sources.iter().map(|(_, op)| *op).collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Instruction::AllocStack { .. } | Instruction::Jump { .. } => vec![],
            Instruction::LoadMem { source, .. } => vec![source],
            Instruction::StoreMem {
                destination,
                source,
            } => vec![destination, source],
            Instruction::BinaryOperation { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            Instruction::Cast { operand, .. } => vec![operand],
            Instruction::Branch { condition, .. } => vec![condition],
            Instruction::Return { value } => value.iter_mut().collect(),
            Instruction::FunctionCall { arguments, .. } => arguments.iter_mut().collect(),
            Instruction::Phi { sources, .. } => sources.iter_mut().map(|(_, op)| op).collect(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. } | Instruction::Jump { .. } | Instruction::Return { .. }
        )
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instruction::Branch {
                positive, negative, ..
            } if positive == negative => vec![*positive],
            Instruction::Branch {
                positive, negative, ..
            } => vec![*positive, *negative],
            Instruction::Jump { destination } => vec![*destination],
            _ => vec![],
        }
    }

    /// Points every edge to `old` at `new` instead
    pub fn replace_successor(&mut self, old: BlockId, new: BlockId) {
        match self {
            Instruction::Branch {
                positive, negative, ..
            } => {
                if *positive == old {
                    *positive = new;
                }
                if *negative == old {
                    *negative = new;
                }
            }
            Instruction::Jump { destination } if *destination == old => *destination = new,
            _ => {}
        }
    }

    /// Whether removing the instruction when its result is unused changes
    /// nothing observable
    pub fn is_removable_when_unused(&self) -> bool {
        matches!(
            self,
            Instruction::AllocStack { .. }
                | Instruction::LoadMem { .. }
                | Instruction::BinaryOperation { .. }
                | Instruction::Compare { .. }
                | Instruction::Cast { .. }
                | Instruction::Phi { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOperator {
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Subtract,
    #[strum(serialize = "mul")]
    Multiply,
    #[strum(serialize = "sdiv")]
    SignedDivide,
    #[strum(serialize = "udiv")]
    UnsignedDivide,
    #[strum(serialize = "fadd")]
    FloatAdd,
    #[strum(serialize = "fsub")]
    FloatSubtract,
    #[strum(serialize = "fmul")]
    FloatMultiply,
    #[strum(serialize = "fdiv")]
    FloatDivide,
}

impl BinaryOperator {
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Multiply | Self::FloatAdd | Self::FloatMultiply
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Self::FloatAdd | Self::FloatSubtract | Self::FloatMultiply | Self::FloatDivide
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ComparePredicate {
    #[strum(serialize = "eq")]
    Equal,
    #[strum(serialize = "ne")]
    NotEqual,
    #[strum(serialize = "slt")]
    SignedLess,
    #[strum(serialize = "sle")]
    SignedLessEqual,
    #[strum(serialize = "sgt")]
    SignedGreater,
    #[strum(serialize = "sge")]
    SignedGreaterEqual,
    #[strum(serialize = "ult")]
    UnsignedLess,
    #[strum(serialize = "ule")]
    UnsignedLessEqual,
    #[strum(serialize = "ugt")]
    UnsignedGreater,
    #[strum(serialize = "uge")]
    UnsignedGreaterEqual,
    #[strum(serialize = "oeq")]
    FloatEqual,
    #[strum(serialize = "one")]
    FloatNotEqual,
    #[strum(serialize = "olt")]
    FloatLess,
    #[strum(serialize = "ole")]
    FloatLessEqual,
    #[strum(serialize = "ogt")]
    FloatGreater,
    #[strum(serialize = "oge")]
    FloatGreaterEqual,
}

impl ComparePredicate {
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Self::FloatEqual
                | Self::FloatNotEqual
                | Self::FloatLess
                | Self::FloatLessEqual
                | Self::FloatGreater
                | Self::FloatGreaterEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CastKind {
    #[strum(serialize = "trunc")]
    Truncate,
    #[strum(serialize = "zext")]
    ZeroExtend,
    #[strum(serialize = "sext")]
    SignExtend,
    #[strum(serialize = "fptosi")]
    FloatToSigned,
    #[strum(serialize = "fptoui")]
    FloatToUnsigned,
    #[strum(serialize = "sitofp")]
    SignedToFloat,
    #[strum(serialize = "uitofp")]
    UnsignedToFloat,
    #[strum(serialize = "fptrunc")]
    FloatTruncate,
    #[strum(serialize = "fpext")]
    FloatExtend,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Stored truncated to its width
    Int(u64, IntegerWidth),
    Float(f64, FloatWidth),
    /// The "value" of an expression of type void
    Void,
}

impl Immediate {
    pub fn int(value: i64, width: IntegerWidth) -> Self {
        Immediate::Int(width.wrap(value as u64), width)
    }

    pub fn bool(value: bool) -> Self {
        Immediate::Int(value as u64, IntegerWidth::I1)
    }

    pub fn float(value: f64, width: FloatWidth) -> Self {
        match width {
            FloatWidth::F32 => Immediate::Float(value as f32 as f64, width),
            FloatWidth::F64 => Immediate::Float(value, width),
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Immediate::Int(_, width) => Type::Integer(*width),
            Immediate::Float(_, width) => Type::Float(*width),
            Immediate::Void => Type::Void,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Immediate(Immediate),
    Register(RegisterId),
}

impl Operand {
    pub const VOID: Operand = Operand::Immediate(Immediate::Void);

    pub fn as_register(&self) -> Option<RegisterId> {
        match self {
            Operand::Register(register) => Some(*register),
            Operand::Immediate(_) => None,
        }
    }

    pub fn as_immediate(&self) -> Option<Immediate> {
        match self {
            Operand::Immediate(immediate) => Some(*immediate),
            Operand::Register(_) => None,
        }
    }
}

impl From<RegisterId> for Operand {
    fn from(register: RegisterId) -> Self {
        Operand::Register(register)
    }
}

impl From<Immediate> for Operand {
    fn from(immediate: Immediate) -> Self {
        Operand::Immediate(immediate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn integer_widths_wrap_and_sign_extend() {
        assert_eq!(IntegerWidth::I8.wrap(0x1ff), 0xff);
        assert_eq!(IntegerWidth::I8.sign_extend(0xff), -1);
        assert_eq!(IntegerWidth::I32.sign_extend(0x7fff_ffff), i32::MAX as i64);
        assert_eq!(IntegerWidth::I64.mask(), u64::MAX);
        assert_eq!(IntegerWidth::I1.sign_extend(1), -1);
    }

    #[test]
    fn negative_immediates_are_stored_truncated() {
        assert_eq!(
            Immediate::int(-1, IntegerWidth::I32),
            Immediate::Int(0xffff_ffff, IntegerWidth::I32)
        );
        assert_eq!(Immediate::bool(true).ty(), Type::BOOL);
    }

    #[test]
    fn replace_uses_follows_chains() {
        let mut function = FunctionDefinition::new(
            InternedSymbol::new("chains"),
            Signature {
                parameters: vec![],
                return_type: Type::Integer(IntegerWidth::I32),
            },
        );

        let a = function.new_register(Type::Integer(IntegerWidth::I32));
        let b = function.new_register(Type::Integer(IntegerWidth::I32));
        let entry = BlockId::new(0);

        function.blocks.insert(
            entry,
            Block {
                id: entry,
                label: "entry",
                instructions: vec![Instruction::Return {
                    value: Some(a.into()),
                }],
            },
        );
        function.layout.push(entry);

        let five = Operand::Immediate(Immediate::int(5, IntegerWidth::I32));
        function.replace_uses(&HashMap::from([(a, b.into()), (b, five)]));

        assert_eq!(
            function.blocks[&entry].instructions[0],
            Instruction::Return { value: Some(five) }
        );
    }
}
