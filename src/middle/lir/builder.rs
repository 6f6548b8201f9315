//! Incremental construction of a single LIR function. Blocks are created
//! detached, appended to the layout when lowering is ready to fill them, and
//! instructions are always emitted at the end of the block under the cursor.

use std::collections::BTreeMap;

use crate::{
    frontend::intern::InternedSymbol,
    index::Index,
    middle::lir::{
        BinaryOperator, Block, BlockId, CastKind, ComparePredicate, FloatWidth,
        FunctionDefinition, Immediate, Instruction, IntegerWidth, Operand, RegisterId, Signature,
        Type,
    },
};

#[derive(Debug)]
pub struct FunctionBuilder {
    function: FunctionDefinition,
    /// Blocks that have been created but not yet appended to the layout
    detached: BTreeMap<BlockId, Block>,
    next_block: BlockId,
    cursor: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(symbol_name: InternedSymbol, signature: Signature) -> Self {
        Self {
            function: FunctionDefinition::new(symbol_name, signature),
            detached: BTreeMap::new(),
            next_block: BlockId::new(0),
            cursor: None,
        }
    }

    pub fn function(&self) -> &FunctionDefinition {
        &self.function
    }

    /// Hands out the function. Blocks that were never appended are dropped.
    pub fn finish(self) -> FunctionDefinition {
        self.function
    }

    pub fn argument(&self, index: usize) -> Option<RegisterId> {
        self.function.arguments.get(index).copied()
    }

    pub fn return_type(&self) -> Type {
        self.function.signature.return_type
    }

    pub fn operand_type(&self, operand: Operand) -> Type {
        self.function.operand_type(operand)
    }

    /* Blocks */

    /// Creates a block which is not yet part of the function
    pub fn create_block(&mut self, label: &'static str) -> BlockId {
        let id = self.next_block;
        self.next_block = self.next_block.plus(1);

        self.detached.insert(
            id,
            Block {
                id,
                label,
                instructions: Vec::new(),
            },
        );

        id
    }

    /// Appends a detached block to the end of the layout
    pub fn append_block(&mut self, id: BlockId) {
        if let Some(block) = self.detached.remove(&id) {
            self.function.blocks.insert(id, block);
            self.function.layout.push(id);
        }
    }

    /// Creates a block and appends it in one step
    pub fn append_new_block(&mut self, label: &'static str) -> BlockId {
        let id = self.create_block(label);
        self.append_block(id);
        id
    }

    pub fn position_at_end(&mut self, id: BlockId) {
        self.cursor = Some(id);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.cursor
    }

    pub fn is_appended(&self, id: BlockId) -> bool {
        self.function.blocks.contains_key(&id)
    }

    /// Whether the block under the cursor already ends in a terminator
    pub fn current_block_is_terminated(&self) -> bool {
        self.cursor
            .and_then(|id| self.function.blocks.get(&id))
            .is_some_and(Block::is_terminated)
    }

    fn current_block_mut(&mut self) -> Option<&mut Block> {
        let id = self.cursor?;

        match self.function.blocks.get_mut(&id) {
            Some(block) => Some(block),
            None => self.detached.get_mut(&id),
        }
    }

    fn push_instruction(&mut self, instruction: Instruction) {
        if let Some(block) = self.current_block_mut() {
            block.instructions.push(instruction);
        }
    }

    fn create_register(&mut self, ty: Type) -> RegisterId {
        self.function.new_register(ty)
    }

    /* Memory */

    pub fn alloca(&mut self, ty: Type) -> RegisterId {
        let destination = self.create_register(Type::Pointer);
        self.push_instruction(Instruction::AllocStack { destination, ty });
        destination
    }

    pub fn load(&mut self, ty: Type, source: Operand) -> RegisterId {
        let destination = self.create_register(ty);
        self.push_instruction(Instruction::LoadMem {
            destination,
            source,
        });
        destination
    }

    pub fn store(&mut self, destination: Operand, source: Operand) {
        self.push_instruction(Instruction::StoreMem {
            destination,
            source,
        });
    }

    /* Arithmetic */

    /// The result has the type of the left operand
    pub fn binary(&mut self, operator: BinaryOperator, lhs: Operand, rhs: Operand) -> RegisterId {
        let destination = self.create_register(self.operand_type(lhs));
        self.push_instruction(Instruction::BinaryOperation {
            operator,
            destination,
            lhs,
            rhs,
        });
        destination
    }

    pub fn compare(
        &mut self,
        predicate: ComparePredicate,
        lhs: Operand,
        rhs: Operand,
    ) -> RegisterId {
        let destination = self.create_register(Type::BOOL);
        self.push_instruction(Instruction::Compare {
            predicate,
            destination,
            lhs,
            rhs,
        });
        destination
    }

    /* Casts */

    pub fn cast(&mut self, kind: CastKind, operand: Operand, to: Type) -> RegisterId {
        let destination = self.create_register(to);
        self.push_instruction(Instruction::Cast {
            kind,
            destination,
            operand,
        });
        destination
    }

    /// Integer to integer conversion. Narrowing truncates, widening extends
    /// with the requested signedness and equal widths emit nothing.
    pub fn int_cast(&mut self, operand: Operand, to: IntegerWidth, signed: bool) -> Operand {
        let Type::Integer(from) = self.operand_type(operand) else {
            return operand;
        };

        let kind = match from.cmp(&to) {
            std::cmp::Ordering::Equal => return operand,
            std::cmp::Ordering::Greater => CastKind::Truncate,
            std::cmp::Ordering::Less if signed => CastKind::SignExtend,
            std::cmp::Ordering::Less => CastKind::ZeroExtend,
        };

        self.cast(kind, operand, Type::Integer(to)).into()
    }

    /// Float to float conversion, a no-op between equal widths
    pub fn float_cast(&mut self, operand: Operand, to: FloatWidth) -> Operand {
        let Type::Float(from) = self.operand_type(operand) else {
            return operand;
        };

        let kind = match from.cmp(&to) {
            std::cmp::Ordering::Equal => return operand,
            std::cmp::Ordering::Greater => CastKind::FloatTruncate,
            std::cmp::Ordering::Less => CastKind::FloatExtend,
        };

        self.cast(kind, operand, Type::Float(to)).into()
    }

    /* Control flow */

    pub fn branch(&mut self, condition: Operand, positive: BlockId, negative: BlockId) {
        self.push_instruction(Instruction::Branch {
            condition,
            positive,
            negative,
        });
    }

    pub fn jump(&mut self, destination: BlockId) {
        self.push_instruction(Instruction::Jump { destination });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.push_instruction(Instruction::Return { value });
    }

    /// Emits a phi after any phis already at the start of the current block
    pub fn phi(&mut self, ty: Type, sources: Vec<(BlockId, Operand)>) -> RegisterId {
        let destination = self.create_register(ty);

        if let Some(block) = self.current_block_mut() {
            let position = block.phi_count();
            block.instructions.insert(
                position,
                Instruction::Phi {
                    destination,
                    sources,
                },
            );
        }

        destination
    }

    /// Returns the destination register unless the callee returns void
    pub fn call(
        &mut self,
        target: InternedSymbol,
        return_type: Type,
        arguments: Vec<Operand>,
    ) -> Option<RegisterId> {
        let destination = (return_type != Type::Void).then(|| self.create_register(return_type));

        self.push_instruction(Instruction::FunctionCall {
            target,
            arguments,
            destination,
        });

        destination
    }

    /* Constants */

    pub fn const_int(&self, value: i64, width: IntegerWidth) -> Operand {
        Immediate::int(value, width).into()
    }

    pub fn const_bool(&self, value: bool) -> Operand {
        Immediate::bool(value).into()
    }

    pub fn const_float(&self, value: f64, width: FloatWidth) -> Operand {
        Immediate::float(value, width).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const I32: Type = Type::Integer(IntegerWidth::I32);

    fn builder() -> FunctionBuilder {
        FunctionBuilder::new(
            InternedSymbol::new("build"),
            Signature {
                parameters: vec![I32],
                return_type: I32,
            },
        )
    }

    #[test]
    fn detached_blocks_are_dropped_on_finish() {
        let mut builder = builder();

        let entry = builder.append_new_block("entry");
        let unused = builder.create_block("unused");
        builder.position_at_end(entry);
        builder.ret(Some(builder.const_int(0, IntegerWidth::I32)));

        let function = builder.finish();

        assert_eq!(function.layout, vec![entry]);
        assert!(!function.blocks.contains_key(&unused));
    }

    #[test]
    fn int_cast_picks_the_instruction_by_width() {
        let mut builder = builder();
        let entry = builder.append_new_block("entry");
        builder.position_at_end(entry);

        let argument = Operand::Register(builder.argument(0).unwrap());

        assert_eq!(builder.int_cast(argument, IntegerWidth::I32, true), argument);

        let widened = builder.int_cast(argument, IntegerWidth::I64, true);
        let narrowed = builder.int_cast(argument, IntegerWidth::I8, false);

        let instructions = &builder.function().blocks[&entry].instructions;
        assert!(matches!(
            instructions[0],
            Instruction::Cast {
                kind: CastKind::SignExtend,
                ..
            }
        ));
        assert!(matches!(
            instructions[1],
            Instruction::Cast {
                kind: CastKind::Truncate,
                ..
            }
        ));
        assert_eq!(
            builder.operand_type(widened),
            Type::Integer(IntegerWidth::I64)
        );
        assert_eq!(builder.operand_type(narrowed), Type::Integer(IntegerWidth::I8));
    }

    #[test]
    fn phis_are_kept_at_the_start_of_a_block() {
        let mut builder = builder();
        let entry = builder.append_new_block("entry");
        let merge = builder.append_new_block("merge");

        builder.position_at_end(entry);
        builder.jump(merge);

        builder.position_at_end(merge);
        let argument = Operand::Register(builder.argument(0).unwrap());
        builder.binary(BinaryOperator::Add, argument, argument);
        let phi = builder.phi(I32, vec![(entry, argument)]);

        let instructions = &builder.function().blocks[&merge].instructions;
        assert_eq!(instructions[0].destination(), Some(phi));
    }

    #[test]
    fn void_calls_have_no_destination() {
        let mut builder = builder();
        let entry = builder.append_new_block("entry");
        builder.position_at_end(entry);

        let print = InternedSymbol::new("print_n");
        assert_eq!(builder.call(print, Type::Void, vec![]), None);
        assert!(builder.call(print, I32, vec![]).is_some());
    }
}
