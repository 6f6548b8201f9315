//! `if` and `while`.
//!
//! ```text
//! if c { a } else { b }         while c { body }
//!
//!   entry:  br c then else        entry:     jmp loop_cond
//!   then:   a; jmp ifcont         loop_cond: br c loop_body loop_cont
//!   else:   b; jmp ifcont         loop_body: body; jmp loop_cond
//!   ifcont: phi [then a] [else b] loop_cont: ...
//! ```
//!
//! Without an else branch the conditional branch goes straight to `ifcont`.
//! When both arms return, `ifcont` is never appended to the function.

use crate::{
    frontend::{ast, lexer::Span},
    middle::{
        error::{CompileErrorKind, CompileResult, compile_error_at},
        lir::BlockId,
        lowering::{BodyLoweringContext, ExpressionContext, Flow},
        ty::TypedValue,
    },
};

impl BodyLoweringContext<'_> {
    pub(super) fn lower_if(
        &mut self,
        if_expression: &ast::IfExpression,
        span: Span,
        context: ExpressionContext,
    ) -> CompileResult<TypedValue> {
        let wants_value = context == ExpressionContext::Value;

        if wants_value {
            let has_empty_arm = if_expression.then_branch.is_empty()
                || if_expression.else_branch.as_ref().is_some_and(Vec::is_empty);

            if has_empty_arm {
                return Err(compile_error_at!(span, CompileErrorKind::EmptyBranch));
            }

            if !if_expression.can_be_expression() {
                return Err(compile_error_at!(
                    span,
                    CompileErrorKind::IllegalIfExpression
                ));
            }
        }

        let condition = self.lower_expression(&if_expression.condition, ExpressionContext::Value)?;

        if self.is_unreachable() {
            return Ok(self.void());
        }

        self.expect_condition(condition, if_expression.condition.span)?;

        let then_block = self.builder.create_block("then");
        let merge_block = self.builder.create_block("ifcont");
        let else_block = match if_expression.else_branch {
            Some(_) => self.builder.create_block("else"),
            None => merge_block,
        };

        self.builder.branch(condition.value, then_block, else_block);

        let then_arm = self.lower_arm(then_block, &if_expression.then_branch, merge_block, context)?;

        let else_arm = match &if_expression.else_branch {
            Some(statements) => Some(self.lower_arm(else_block, statements, merge_block, context)?),
            None => None,
        };

        let both_returned =
            then_arm.is_none() && else_arm.as_ref().is_some_and(Option::is_none);

        if both_returned {
            self.enter_unreachable();
            return Ok(self.void());
        }

        self.builder.append_block(merge_block);
        self.builder.position_at_end(merge_block);

        if !wants_value {
            return Ok(self.void());
        }

        // Arms that returned don't reach the merge block
        let incoming = [then_arm, else_arm.flatten()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        if let [(then_value, _), (else_value, _)] = incoming[..] {
            if then_value.ty != else_value.ty {
                return Err(compile_error_at!(
                    span,
                    CompileErrorKind::BranchTypeMismatch {
                        then_type: self.registry.name(then_value.ty),
                        else_type: self.registry.name(else_value.ty),
                    }
                ));
            }
        }

        let Some((first, _)) = incoming.first() else {
            return Ok(self.void());
        };
        let ty = first.ty;

        if ty == self.registry.void() {
            return Ok(self.void());
        }

        let sources = incoming
            .iter()
            .map(|(value, block)| (*block, value.value))
            .collect();
        let phi = self.builder.phi(self.registry.lir_type(ty), sources);

        Ok(TypedValue::new(ty, phi))
    }

    /// Lowers one arm of an `if` starting in `block`. Returns the arm's value
    /// and the block it ends in, or `None` if it returned.
    fn lower_arm(
        &mut self,
        block: BlockId,
        statements: &[ast::Statement],
        merge_block: BlockId,
        context: ExpressionContext,
    ) -> CompileResult<Option<(TypedValue, BlockId)>> {
        self.builder.append_block(block);
        self.builder.position_at_end(block);

        let flow = match context {
            ExpressionContext::Statement => self.lower_statements(statements)?,
            ExpressionContext::Value => self.lower_value_statements(statements)?,
        };

        let Flow::Fallthrough(value) = flow else {
            return Ok(None);
        };

        let Some(end) = self.builder.current_block() else {
            return Ok(None);
        };

        self.builder.jump(merge_block);

        Ok(Some((value, end)))
    }

    /// Like [`Self::lower_statements`], except that the trailing expression is
    /// lowered in value context so nested `if` expressions produce a value.
    fn lower_value_statements(&mut self, statements: &[ast::Statement]) -> CompileResult<Flow> {
        let Some((last, leading)) = statements.split_last() else {
            return Ok(Flow::Fallthrough(self.void()));
        };

        if let Flow::Returned = self.lower_statements(leading)? {
            return Ok(Flow::Returned);
        }

        let ast::StatementKind::Expression(expression) = &last.kind else {
            return self.lower_statement(last);
        };

        let value = self.lower_expression(expression, ExpressionContext::Value)?;

        if self.is_unreachable() {
            return Ok(Flow::Returned);
        }

        Ok(Flow::Fallthrough(value))
    }

    pub(super) fn lower_while(
        &mut self,
        condition: &ast::Expression,
        body: &[ast::Statement],
    ) -> CompileResult<Flow> {
        let condition_block = self.builder.create_block("loop_cond");
        let body_block = self.builder.create_block("loop_body");
        let exit_block = self.builder.create_block("loop_cont");

        self.builder.jump(condition_block);

        self.builder.append_block(condition_block);
        self.builder.position_at_end(condition_block);

        let value = self.lower_expression(condition, ExpressionContext::Value)?;

        if self.is_unreachable() {
            return Ok(Flow::Returned);
        }

        self.expect_condition(value, condition.span)?;
        self.builder.branch(value.value, body_block, exit_block);

        self.builder.append_block(body_block);
        self.builder.position_at_end(body_block);

        // A body that returns has no back edge
        if let Flow::Fallthrough(_) = self.lower_statements(body)? {
            self.builder.jump(condition_block);
        }

        self.builder.append_block(exit_block);
        self.builder.position_at_end(exit_block);

        Ok(Flow::Fallthrough(self.void()))
    }
}
