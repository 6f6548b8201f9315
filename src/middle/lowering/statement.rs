use crate::{
    frontend::ast,
    middle::{
        coerce,
        error::{CompileErrorKind, CompileResult, compile_error_at},
        lowering::{BodyLoweringContext, ExpressionContext},
        scope::Storage,
        ty::TypedValue,
    },
};

/// How control leaves a statement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Flow {
    /// Continues with the next statement. Carries the value of an expression
    /// statement, void otherwise.
    Fallthrough(TypedValue),
    /// Every path through the statement returned
    Returned,
}

impl BodyLoweringContext<'_> {
    /// Lowers statements in order, stopping at the first one that returns.
    /// Anything after it is unreachable and is not lowered.
    pub(super) fn lower_statements(&mut self, statements: &[ast::Statement]) -> CompileResult<Flow> {
        let mut flow = Flow::Fallthrough(self.void());

        for statement in statements {
            flow = self.lower_statement(statement)?;

            if flow == Flow::Returned {
                break;
            }
        }

        Ok(flow)
    }

    pub(super) fn lower_statement(&mut self, statement: &ast::Statement) -> CompileResult<Flow> {
        match &statement.kind {
            ast::StatementKind::Expression(expression) => {
                let value = self.lower_expression(expression, ExpressionContext::Statement)?;

                if self.is_unreachable() {
                    return Ok(Flow::Returned);
                }

                Ok(Flow::Fallthrough(value))
            }
            ast::StatementKind::Return(value) => self.lower_return(value.as_ref()),
            ast::StatementKind::Assignment { target, value } => {
                self.lower_assignment(statement, target, value)
            }
            ast::StatementKind::While { condition, body } => self.lower_while(condition, body),
        }
    }

    /// The returned value is checked against the signature by the verifier
    fn lower_return(&mut self, value: Option<&ast::Expression>) -> CompileResult<Flow> {
        let Some(value) = value else {
            self.builder.ret(None);
            return Ok(Flow::Returned);
        };

        let value = self.lower_expression(value, ExpressionContext::Value)?;

        if self.is_unreachable() {
            return Ok(Flow::Returned);
        }

        if value.ty == self.registry.void() {
            self.builder.ret(None);
        } else {
            self.builder.ret(Some(value.value));
        }

        Ok(Flow::Returned)
    }

    fn lower_assignment(
        &mut self,
        statement: &ast::Statement,
        target: &ast::Identifier,
        value: &ast::Expression,
    ) -> CompileResult<Flow> {
        let value = self.lower_expression(value, ExpressionContext::Value)?;

        if self.is_unreachable() {
            return Ok(Flow::Returned);
        }

        let registry = self.registry;

        let Some(variable) = self.symbols.lookup(target.symbol) else {
            return Err(compile_error_at!(
                target.span,
                CompileErrorKind::UnknownSymbol {
                    name: target.symbol
                }
            ));
        };

        let (ty, storage) = (variable.ty, variable.storage);

        let slot = match storage {
            Storage::StackSlot(slot) if variable.can_assign() => slot,
            _ => {
                return Err(compile_error_at!(
                    statement.span,
                    CompileErrorKind::ImmutableAssignment {
                        name: target.symbol
                    }
                ));
            }
        };

        // Integers convert to the variable's type, anything else must match
        let value = if value.ty == ty {
            value
        } else if registry.is_integer(value.ty) && registry.is_integer(ty) {
            coerce::cast_to_int(&mut self.builder, registry, value, ty)
        } else {
            return Err(compile_error_at!(
                statement.span,
                CompileErrorKind::TypeMismatch {
                    lhs: registry.name(ty),
                    rhs: registry.name(value.ty),
                }
            ));
        };

        if let Some(variable) = self.symbols.lookup_mut(target.symbol) {
            variable.flags.is_initialized = true;
        }

        self.builder.store(slot.into(), value.value);

        Ok(Flow::Fallthrough(self.void()))
    }
}
