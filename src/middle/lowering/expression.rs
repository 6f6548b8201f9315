use crate::{
    frontend::ast,
    middle::{
        coerce,
        error::{CompileErrorKind, CompileResult, compile_error_at},
        lir::{BinaryOperator, ComparePredicate, FloatWidth, Immediate, IntegerWidth},
        lowering::BodyLoweringContext,
        scope::Storage,
        ty::{Type, TypedValue},
    },
};

/// Whether the value of an expression is needed. Only matters for `if`,
/// which is lowered without a phi when used as a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionContext {
    Statement,
    Value,
}

impl BodyLoweringContext<'_> {
    pub(super) fn lower_expression(
        &mut self,
        expression: &ast::Expression,
        context: ExpressionContext,
    ) -> CompileResult<TypedValue> {
        match &expression.kind {
            ast::ExpressionKind::Literal(literal) => Ok(self.lower_literal(*literal)),
            ast::ExpressionKind::Variable(identifier) => self.lower_variable(identifier),
            ast::ExpressionKind::Binary { operator, lhs, rhs } => {
                self.lower_binary(expression, *operator, lhs, rhs)
            }
            ast::ExpressionKind::Call { callee, arguments } => self.lower_call(callee, arguments),
            ast::ExpressionKind::If(if_expression) => {
                self.lower_if(if_expression, expression.span, context)
            }
            ast::ExpressionKind::Cast { value, ty } => self.lower_cast(expression, value, ty),
        }
    }

    fn lower_literal(&self, literal: ast::Literal) -> TypedValue {
        match literal {
            ast::Literal::Integer(value) => TypedValue::new(
                self.registry.int32(),
                Immediate::int(value as i64, IntegerWidth::I32),
            ),
            ast::Literal::Float(value) => TypedValue::new(
                self.registry.float64(),
                Immediate::float(value, FloatWidth::F64),
            ),
            ast::Literal::Boolean(value) => {
                TypedValue::new(self.registry.bool(), Immediate::bool(value))
            }
        }
    }

    fn lower_variable(&mut self, identifier: &ast::Identifier) -> CompileResult<TypedValue> {
        let Some(variable) = self.symbols.lookup(identifier.symbol) else {
            return Err(compile_error_at!(
                identifier.span,
                CompileErrorKind::UnknownSymbol {
                    name: identifier.symbol
                }
            ));
        };

        let (ty, storage) = (variable.ty, variable.storage);

        match storage {
            Storage::Parameter(register) => Ok(TypedValue::new(ty, register)),
            Storage::StackSlot(slot) => {
                let value = self.builder.load(self.registry.lir_type(ty), slot.into());

                Ok(TypedValue::new(ty, value))
            }
        }
    }

    fn lower_binary(
        &mut self,
        expression: &ast::Expression,
        operator: ast::BinaryOperator,
        lhs: &ast::Expression,
        rhs: &ast::Expression,
    ) -> CompileResult<TypedValue> {
        let lhs = self.lower_expression(lhs, ExpressionContext::Value)?;
        let rhs = self.lower_expression(rhs, ExpressionContext::Value)?;

        if self.is_unreachable() {
            return Ok(self.void());
        }

        let (lhs, rhs) = coerce::coerce(&mut self.builder, self.registry, lhs, rhs);

        if lhs.ty != rhs.ty {
            return Err(compile_error_at!(
                expression.span,
                CompileErrorKind::TypeMismatch {
                    lhs: self.registry.name(lhs.ty),
                    rhs: self.registry.name(rhs.ty),
                }
            ));
        }

        let ty = lhs.ty;
        let unknown_operator = || {
            compile_error_at!(
                expression.span,
                CompileErrorKind::UnknownOperator {
                    operator: operator.into(),
                    ty: self.registry.name(ty),
                }
            )
        };

        let instruction = if ty == self.registry.bool() {
            match operator {
                ast::BinaryOperator::Equal => Operation::Compare(ComparePredicate::Equal),
                ast::BinaryOperator::NotEqual => Operation::Compare(ComparePredicate::NotEqual),
                _ => return Err(unknown_operator()),
            }
        } else if self.registry.is_integer(ty) {
            integer_operation(operator, self.registry.is_signed(ty))
        } else if self.registry.is_float(ty) {
            float_operation(operator)
        } else {
            return Err(unknown_operator());
        };

        match instruction {
            Operation::Arithmetic(operator) => {
                let result = self.builder.binary(operator, lhs.value, rhs.value);

                Ok(TypedValue::new(ty, result))
            }
            Operation::Compare(predicate) => {
                let result = self.builder.compare(predicate, lhs.value, rhs.value);

                Ok(TypedValue::new(self.registry.bool(), result))
            }
        }
    }

    fn lower_call(
        &mut self,
        callee: &ast::Identifier,
        arguments: &[ast::Expression],
    ) -> CompileResult<TypedValue> {
        let Some(record) = self.functions.get(&callee.symbol) else {
            return Err(compile_error_at!(
                callee.span,
                CompileErrorKind::UnknownFunction {
                    name: callee.symbol
                }
            ));
        };

        if record.parameters.len() != arguments.len() {
            return Err(compile_error_at!(
                callee.span,
                CompileErrorKind::ArityMismatch {
                    function: callee.symbol,
                    expected: record.parameters.len(),
                    found: arguments.len(),
                }
            ));
        }

        let (parameters, return_type) = (record.parameters.clone(), record.return_type);
        let mut values = Vec::with_capacity(arguments.len());

        for (position, (argument, expected)) in arguments.iter().zip(parameters).enumerate() {
            let value = self.lower_expression(argument, ExpressionContext::Value)?;

            if self.is_unreachable() {
                return Ok(self.void());
            }

            // Arguments must match exactly, there is no widening at call sites
            if value.ty != expected {
                return Err(compile_error_at!(
                    argument.span,
                    CompileErrorKind::ArgTypeMismatch {
                        function: callee.symbol,
                        position,
                        expected: self.registry.name(expected),
                        found: self.registry.name(value.ty),
                    }
                ));
            }

            values.push(value.value);
        }

        let result = self.builder.call(
            callee.symbol,
            self.registry.lir_type(return_type),
            values,
        );

        Ok(match result {
            Some(register) => TypedValue::new(return_type, register),
            None => self.void(),
        })
    }

    fn lower_cast(
        &mut self,
        expression: &ast::Expression,
        value: &ast::Expression,
        ty: &ast::TypeName,
    ) -> CompileResult<TypedValue> {
        let value = self.lower_expression(value, ExpressionContext::Value)?;
        let destination: Type = self.resolve_type(ty)?;

        if self.is_unreachable() {
            return Ok(self.void());
        }

        coerce::cast(&mut self.builder, self.registry, value, destination)
            .map_err(|kind| compile_error_at!(expression.span, kind))
    }
}

enum Operation {
    Arithmetic(BinaryOperator),
    Compare(ComparePredicate),
}

fn integer_operation(operator: ast::BinaryOperator, signed: bool) -> Operation {
    use ComparePredicate::*;

    let ordered = |signed_predicate, unsigned_predicate| {
        Operation::Compare(if signed {
            signed_predicate
        } else {
            unsigned_predicate
        })
    };

    match operator {
        ast::BinaryOperator::Add => Operation::Arithmetic(BinaryOperator::Add),
        ast::BinaryOperator::Subtract => Operation::Arithmetic(BinaryOperator::Subtract),
        ast::BinaryOperator::Multiply => Operation::Arithmetic(BinaryOperator::Multiply),
        ast::BinaryOperator::Divide if signed => {
            Operation::Arithmetic(BinaryOperator::SignedDivide)
        }
        ast::BinaryOperator::Divide => Operation::Arithmetic(BinaryOperator::UnsignedDivide),
        ast::BinaryOperator::Equal => Operation::Compare(Equal),
        ast::BinaryOperator::NotEqual => Operation::Compare(NotEqual),
        ast::BinaryOperator::Less => ordered(SignedLess, UnsignedLess),
        ast::BinaryOperator::LessEqual => ordered(SignedLessEqual, UnsignedLessEqual),
        ast::BinaryOperator::Greater => ordered(SignedGreater, UnsignedGreater),
        ast::BinaryOperator::GreaterEqual => ordered(SignedGreaterEqual, UnsignedGreaterEqual),
    }
}

fn float_operation(operator: ast::BinaryOperator) -> Operation {
    match operator {
        ast::BinaryOperator::Add => Operation::Arithmetic(BinaryOperator::FloatAdd),
        ast::BinaryOperator::Subtract => Operation::Arithmetic(BinaryOperator::FloatSubtract),
        ast::BinaryOperator::Multiply => Operation::Arithmetic(BinaryOperator::FloatMultiply),
        ast::BinaryOperator::Divide => Operation::Arithmetic(BinaryOperator::FloatDivide),
        ast::BinaryOperator::Equal => Operation::Compare(ComparePredicate::FloatEqual),
        ast::BinaryOperator::NotEqual => Operation::Compare(ComparePredicate::FloatNotEqual),
        ast::BinaryOperator::Less => Operation::Compare(ComparePredicate::FloatLess),
        ast::BinaryOperator::LessEqual => Operation::Compare(ComparePredicate::FloatLessEqual),
        ast::BinaryOperator::Greater => Operation::Compare(ComparePredicate::FloatGreater),
        ast::BinaryOperator::GreaterEqual => {
            Operation::Compare(ComparePredicate::FloatGreaterEqual)
        }
    }
}
