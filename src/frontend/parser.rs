use colored::Colorize;
use itertools::{PeekNth, peek_nth};

use super::{
    SourceFile,
    ast::{
        BinaryOperator, Expression, ExpressionKind, FunctionDeclaration, Identifier,
        IfExpression, Item, ItemKind, Literal, LocalDeclaration, Module, Mutability, Parameter,
        Prototype, Statement, StatementKind, TypeName,
    },
    intern::InternedSymbol,
    lexer::{Keyword, Lexer, Span, Token, TokenKind},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    pub fn report(&self, source: &SourceFile) {
        eprintln!(
            "{}: {} ({}:{}:{})",
            "error".red(),
            self.message,
            source.origin,
            source.row_for_position(self.span.start),
            source.column_for_position(self.span.start)
        );
        eprintln!("{}", source.highlight_span(self.span));
    }
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = Result<T, ParseError>;

/// Binding power of each binary operator; higher binds tighter
fn precedence_of(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::Equals => 1,
        TokenKind::DoubleEquals
        | TokenKind::NotEquals
        | TokenKind::LessThanOrEqualTo
        | TokenKind::GreaterThanOrEqualTo => 10,
        TokenKind::LessThan | TokenKind::GreaterThan => 20,
        TokenKind::Plus | TokenKind::Minus => 30,
        TokenKind::Asterisk | TokenKind::Divide => 40,
        TokenKind::Keyword(Keyword::To) => 100,
        _ => return None,
    })
}

fn binary_operator_of(kind: TokenKind) -> Option<BinaryOperator> {
    Some(match kind {
        TokenKind::Plus => BinaryOperator::Add,
        TokenKind::Minus => BinaryOperator::Subtract,
        TokenKind::Asterisk => BinaryOperator::Multiply,
        TokenKind::Divide => BinaryOperator::Divide,
        TokenKind::DoubleEquals => BinaryOperator::Equal,
        TokenKind::NotEquals => BinaryOperator::NotEqual,
        TokenKind::LessThan => BinaryOperator::Less,
        TokenKind::LessThanOrEqualTo => BinaryOperator::LessEqual,
        TokenKind::GreaterThan => BinaryOperator::Greater,
        TokenKind::GreaterThanOrEqualTo => BinaryOperator::GreaterEqual,
        _ => return None,
    })
}

#[derive(Debug)]
pub struct Parser<'source> {
    source: &'source SourceFile,
    tokens: PeekNth<std::vec::IntoIter<Token>>,
    /// Locals of the function currently being parsed
    locals: Vec<LocalDeclaration>,
}

impl<'source> Parser<'source> {
    pub fn parse_module(source: &'source SourceFile) -> ParseResult<Module> {
        let mut parser = Self {
            source,
            tokens: peek_nth(Lexer::tokenize(source)?),
            locals: Vec::new(),
        };

        let mut module = Module { items: Vec::new() };

        parser.skip_terminators();

        while parser.tokens.peek().is_some() {
            module.items.push(parser.parse_module_item()?);
            parser.skip_terminators();
        }

        Ok(module)
    }

    fn end_of_file_span(&self) -> Span {
        let end = self.source.contents.len();

        Span::new(end, end)
    }

    fn describe(&self, token: &Token) -> String {
        match token.kind {
            TokenKind::Newline => "end of line".to_owned(),
            _ => format!("`{}`", self.source.value_of_span(token.span)),
        }
    }

    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.tokens.peek().map(|token| token.kind)
    }

    fn at(&mut self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn expect_next(&mut self, expecting: &str) -> ParseResult<Token> {
        match self.tokens.next() {
            Some(token) => Ok(token),
            None => Err(ParseError::new(
                format!("expected {expecting} but reached end of file"),
                self.end_of_file_span(),
            )),
        }
    }

    fn expect_next_to_be(&mut self, kind: TokenKind, expecting: &str) -> ParseResult<Token> {
        let token = self.expect_next(expecting)?;

        if token.kind != kind {
            return Err(ParseError::new(
                format!("expected {expecting} but found {}", self.describe(&token)),
                token.span,
            ));
        }

        Ok(token)
    }

    /// Consumes newlines and semicolons
    fn skip_terminators(&mut self) {
        while self.peek_kind().is_some_and(|kind| kind.is_statement_terminator()) {
            self.tokens.next();
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.tokens.next();
        }
    }

    fn parse_module_item(&mut self) -> ParseResult<Item> {
        match self.peek_kind() {
            Some(TokenKind::Keyword(Keyword::Func)) => {
                let function = self.parse_function_declaration()?;

                Ok(Item {
                    span: function.prototype.span,
                    kind: ItemKind::Function(function),
                })
            }
            Some(TokenKind::Keyword(Keyword::Extern)) => {
                let extern_keyword = self.expect_next("`extern`")?;
                let prototype = self.parse_prototype()?;
                self.expect_end_of_statement()?;

                Ok(Item {
                    span: extern_keyword.span.to(prototype.span),
                    kind: ItemKind::Extern(prototype),
                })
            }
            _ => {
                let start = self.tokens.peek().map(|token| token.span).unwrap_or_default();

                let Some(statement) = self.parse_statement()? else {
                    return Err(ParseError::new(
                        "variable declarations are only allowed inside a function",
                        start,
                    ));
                };
                self.expect_end_of_statement()?;

                // Declarations outside of a function have nowhere to live
                self.locals.clear();

                Ok(Item {
                    span: statement.span,
                    kind: ItemKind::Statement(statement),
                })
            }
        }
    }

    /// func name(param: ty): return_type { ... }
    fn parse_function_declaration(&mut self) -> ParseResult<FunctionDeclaration> {
        self.expect_next_to_be(TokenKind::Keyword(Keyword::Func), "`func`")?;

        let prototype = self.parse_prototype()?;

        self.locals.clear();
        let (body, _) = self.parse_body()?;
        let locals = std::mem::take(&mut self.locals);

        Ok(FunctionDeclaration {
            prototype,
            locals,
            body,
        })
    }

    /// name(param: ty, ...): return_type
    fn parse_prototype(&mut self) -> ParseResult<Prototype> {
        let name = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::OpenParen, "`(` after function name")?;

        let mut parameters = Vec::new();

        let close = loop {
            self.skip_newlines();

            if self.at(TokenKind::CloseParen) {
                break self.expect_next("`)`")?;
            }

            if !parameters.is_empty() {
                self.expect_next_to_be(TokenKind::Comma, "`,` between parameters")?;
                self.skip_newlines();
            }

            let name = self.parse_identifier()?;
            self.expect_next_to_be(TokenKind::Colon, "`:` after parameter name")?;
            let ty = self.parse_type_name()?;

            parameters.push(Parameter {
                span: name.span.to(ty.span),
                name,
                ty,
            });
        };

        let return_type = if self.at(TokenKind::Colon) {
            self.tokens.next();
            Some(self.parse_type_name()?)
        } else {
            None
        };

        let end = return_type.map(|ty| ty.span).unwrap_or(close.span);

        Ok(Prototype {
            span: name.span.to(end),
            name,
            parameters,
            return_type,
        })
    }

    fn parse_identifier(&mut self) -> ParseResult<Identifier> {
        let token = self.expect_next_to_be(TokenKind::Identifier, "identifier")?;

        Ok(Identifier {
            span: token.span,
            symbol: InternedSymbol::new(self.source.value_of_span(token.span)),
        })
    }

    fn parse_type_name(&mut self) -> ParseResult<TypeName> {
        let token = self.expect_next_to_be(TokenKind::Identifier, "type name")?;

        Ok(TypeName {
            span: token.span,
            symbol: InternedSymbol::new(self.source.value_of_span(token.span)),
        })
    }

    /// `{ statement* }`, returning the statements and the span of the braces
    fn parse_body(&mut self) -> ParseResult<(Vec<Statement>, Span)> {
        let open = self.expect_next_to_be(TokenKind::OpenBrace, "`{` to open block")?;
        let mut statements = Vec::new();

        loop {
            self.skip_terminators();

            if self.at(TokenKind::CloseBrace) {
                let close = self.expect_next("`}`")?;

                return Ok((statements, open.span.to(close.span)));
            }

            statements.extend(self.parse_statement()?);

            if !self.at(TokenKind::CloseBrace) {
                self.expect_end_of_statement()?;
            }
        }
    }

    fn expect_end_of_statement(&mut self) -> ParseResult<()> {
        match self.tokens.next() {
            None => Ok(()),
            Some(token) if token.kind.is_statement_terminator() => Ok(()),
            Some(token) => Err(ParseError::new(
                format!("expected end of statement but found {}", self.describe(&token)),
                token.span,
            )),
        }
    }


    /// Returns `None` for a declaration without a value, which only adds a local
    fn parse_statement(&mut self) -> ParseResult<Option<Statement>> {
        let Some(peeked) = self.tokens.peek().copied() else {
            return Err(ParseError::new(
                "expected statement but reached end of file",
                self.end_of_file_span(),
            ));
        };

        let statement = match peeked.kind {
            TokenKind::Keyword(Keyword::Let) => {
                return self.parse_declaration(Mutability::Immutable);
            }
            TokenKind::Keyword(Keyword::Var) => {
                return self.parse_declaration(Mutability::Mutable);
            }
            TokenKind::Keyword(Keyword::While) => self.parse_while()?,
            TokenKind::Keyword(Keyword::For) => {
                return Err(ParseError::new(
                    "`for` loops are not supported, use `while`",
                    peeked.span,
                ));
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.tokens.next();

                let value = match self.peek_kind() {
                    None | Some(TokenKind::CloseBrace) => None,
                    Some(kind) if kind.is_statement_terminator() => None,
                    Some(_) => Some(self.parse_expression()?),
                };

                let span = value
                    .as_ref()
                    .map(|value| peeked.span.to(value.span))
                    .unwrap_or(peeked.span);

                Statement {
                    span,
                    kind: StatementKind::Return(value),
                }
            }
            TokenKind::Identifier
                if self
                    .tokens
                    .peek_nth(1)
                    .is_some_and(|token| token.kind == TokenKind::Equals) =>
            {
                let target = self.parse_identifier()?;
                self.tokens.next();
                let value = self.parse_expression()?;

                Statement {
                    span: target.span.to(value.span),
                    kind: StatementKind::Assignment { target, value },
                }
            }
            _ => {
                let expression = self.parse_expression()?;

                Statement {
                    span: expression.span,
                    kind: StatementKind::Expression(expression),
                }
            }
        };

        Ok(Some(statement))
    }

    /// let name: ty = value
    /// var name: ty [= value]
    ///
    /// The declaration itself is recorded on the enclosing function, the
    /// initializer becomes an assignment statement.
    fn parse_declaration(&mut self, mutability: Mutability) -> ParseResult<Option<Statement>> {
        let keyword = self.expect_next("`let` or `var`")?;
        let name = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::Colon, "`:` and a type for variable declaration")?;
        let ty = self.parse_type_name()?;

        let declaration_span = keyword.span.to(ty.span);

        self.locals.push(LocalDeclaration {
            span: declaration_span,
            name,
            ty,
            mutability,
        });

        if !self.at(TokenKind::Equals) {
            if mutability == Mutability::Immutable {
                return Err(ParseError::new(
                    format!("immutable variable `{}` requires a value", name.symbol),
                    declaration_span,
                ));
            }

            return Ok(None);
        }

        self.tokens.next();
        let value = self.parse_expression()?;

        Ok(Some(Statement {
            span: keyword.span.to(value.span),
            kind: StatementKind::Assignment {
                target: name,
                value,
            },
        }))
    }

    /// while condition { ... }
    fn parse_while(&mut self) -> ParseResult<Statement> {
        let keyword = self.expect_next_to_be(TokenKind::Keyword(Keyword::While), "`while`")?;

        let condition = self.parse_expression()?;
        self.skip_newlines();
        let (body, body_span) = self.parse_body()?;

        Ok(Statement {
            span: keyword.span.to(body_span),
            kind: StatementKind::While { condition, body },
        })
    }

    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_binary_expression(0)
    }

    /// Precedence climbing. Operators of equal precedence associate to the left.
    fn parse_binary_expression(&mut self, minimum_precedence: u8) -> ParseResult<Expression> {
        let mut lhs = self.parse_primary()?;

        loop {
            let Some(operator_token) = self.tokens.peek().copied() else {
                break;
            };

            let Some(precedence) = precedence_of(operator_token.kind) else {
                break;
            };

            if precedence < minimum_precedence {
                break;
            }

            self.tokens.next();

            if operator_token.kind == TokenKind::Keyword(Keyword::To) {
                let ty = self.parse_type_name()?;

                lhs = Expression {
                    span: lhs.span.to(ty.span),
                    kind: ExpressionKind::Cast {
                        value: Box::new(lhs),
                        ty,
                    },
                };

                continue;
            }

            let Some(operator) = binary_operator_of(operator_token.kind) else {
                return Err(ParseError::new(
                    "assignment is only allowed as a statement to a variable",
                    operator_token.span,
                ));
            };

            let rhs = self.parse_binary_expression(precedence + 1)?;

            lhs = Expression {
                span: lhs.span.to(rhs.span),
                kind: ExpressionKind::Binary {
                    operator,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }

        Ok(lhs)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        // An expression may continue on the next line after an operator
        self.skip_newlines();

        let token = self.expect_next("expression")?;
        let text = self.source.value_of_span(token.span);

        let kind = match token.kind {
            TokenKind::IntegerLiteral => {
                let value = text.parse::<i32>().map_err(|_| {
                    ParseError::new(
                        format!("integer literal `{text}` does not fit in Int32"),
                        token.span,
                    )
                })?;

                ExpressionKind::Literal(Literal::Integer(value))
            }
            TokenKind::FloatLiteral => {
                let value = text.parse::<f64>().map_err(|_| {
                    ParseError::new(format!("invalid float literal `{text}`"), token.span)
                })?;

                ExpressionKind::Literal(Literal::Float(value))
            }
            TokenKind::BooleanLiteral => ExpressionKind::Literal(Literal::Boolean(text == "true")),
            TokenKind::Identifier => {
                let identifier = Identifier {
                    span: token.span,
                    symbol: InternedSymbol::new(text),
                };

                if self.at(TokenKind::OpenParen) {
                    return self.parse_call(identifier);
                }

                ExpressionKind::Variable(identifier)
            }
            TokenKind::Keyword(Keyword::If) => return self.parse_if(token),
            TokenKind::OpenParen => {
                let inner = self.parse_expression()?;
                self.skip_newlines();
                let close = self.expect_next_to_be(TokenKind::CloseParen, "`)`")?;

                return Ok(Expression {
                    span: token.span.to(close.span),
                    kind: inner.kind,
                });
            }
            _ => {
                return Err(ParseError::new(
                    format!("expected expression but found {}", self.describe(&token)),
                    token.span,
                ));
            }
        };

        Ok(Expression {
            span: token.span,
            kind,
        })
    }

    /// callee(argument, ...)
    fn parse_call(&mut self, callee: Identifier) -> ParseResult<Expression> {
        self.expect_next_to_be(TokenKind::OpenParen, "`(`")?;

        let mut arguments = Vec::new();

        let close = loop {
            self.skip_newlines();

            if self.at(TokenKind::CloseParen) {
                break self.expect_next("`)`")?;
            }

            if !arguments.is_empty() {
                self.expect_next_to_be(TokenKind::Comma, "`,` between arguments")?;
            }

            arguments.push(self.parse_expression()?);
        };

        Ok(Expression {
            span: callee.span.to(close.span),
            kind: ExpressionKind::Call { callee, arguments },
        })
    }

    /// if condition { ... } [else { ... }]
    fn parse_if(&mut self, keyword: Token) -> ParseResult<Expression> {
        let condition = self.parse_expression()?;
        self.skip_newlines();

        let (then_branch, then_span) = self.parse_body()?;
        let mut span = keyword.span.to(then_span);

        // `else` may sit on the line after the closing brace
        let mut lookahead = 0;
        while self
            .tokens
            .peek_nth(lookahead)
            .is_some_and(|token| token.kind == TokenKind::Newline)
        {
            lookahead += 1;
        }

        let has_else = self
            .tokens
            .peek_nth(lookahead)
            .is_some_and(|token| token.kind == TokenKind::Keyword(Keyword::Else));

        let else_branch = if has_else {
            self.skip_newlines();
            self.tokens.next();
            self.skip_newlines();

            let (else_branch, else_span) = self.parse_body()?;
            span = span.to(else_span);

            Some(else_branch)
        } else {
            None
        };

        Ok(Expression {
            span,
            kind: ExpressionKind::If(Box::new(IfExpression {
                condition,
                then_branch,
                else_branch,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn parse(source: &str) -> Module {
        Parser::parse_module(&SourceFile::from_memory(source)).unwrap()
    }

    fn parse_error(source: &str) -> ParseError {
        Parser::parse_module(&SourceFile::from_memory(source)).unwrap_err()
    }

    fn function(module: &Module, index: usize) -> &FunctionDeclaration {
        match &module.items[index].kind {
            ItemKind::Function(function) => function,
            other => panic!("expected function, found {other:?}"),
        }
    }

    fn body_expression(module: &Module) -> &Expression {
        match &function(module, 0).body[0].kind {
            StatementKind::Expression(expression) | StatementKind::Return(Some(expression)) => {
                expression
            }
            other => panic!("expected expression statement, found {other:?}"),
        }
    }

    #[test]
    fn function_and_extern_items() {
        let module = parse(indoc! {"
            extern print_n(n: Int32)

            func add(a: Int32, b: Int32): Int32 {
                return a + b
            }
        "});

        assert_eq!(module.items.len(), 2);

        let ItemKind::Extern(prototype) = &module.items[0].kind else {
            panic!("expected extern");
        };
        assert_eq!(prototype.name.symbol.value(), "print_n");
        assert!(prototype.return_type.is_none());

        let add = function(&module, 1);
        assert_eq!(add.prototype.parameters.len(), 2);
        assert_eq!(
            add.prototype.return_type.map(|ty| ty.symbol.value()),
            Some("Int32")
        );
    }

    #[test]
    fn declarations_are_collected_as_locals() {
        let module = parse(indoc! {"
            func main() {
                let x: Int32 = 5
                var y: Int64
                y = x to Int64
            }
        "});

        let main = function(&module, 0);

        let locals = main
            .locals
            .iter()
            .map(|local| (local.name.symbol.value(), local.mutability))
            .collect::<Vec<_>>();
        assert_eq!(
            locals,
            vec![("x", Mutability::Immutable), ("y", Mutability::Mutable)]
        );

        // `var y: Int64` has no initializer so it produces no statement
        assert_eq!(main.body.len(), 2);
        assert!(matches!(
            main.body[0].kind,
            StatementKind::Assignment { .. }
        ));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let module = parse("func f(): Int32 { return 1 + 2 * 3 }");

        let ExpressionKind::Binary { operator, rhs, .. } = &body_expression(&module).kind else {
            panic!("expected binary expression");
        };

        assert_eq!(*operator, BinaryOperator::Add);
        assert!(matches!(
            rhs.kind,
            ExpressionKind::Binary {
                operator: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn subtraction_is_left_associative() {
        let module = parse("func f(): Int32 { return 10 - 4 - 3 }");

        let ExpressionKind::Binary { lhs, rhs, .. } = &body_expression(&module).kind else {
            panic!("expected binary expression");
        };

        assert!(matches!(lhs.kind, ExpressionKind::Binary { .. }));
        assert!(matches!(rhs.kind, ExpressionKind::Literal(Literal::Integer(3))));
    }

    #[test]
    fn cast_binds_tightest() {
        let module = parse("func f(a: Int8): Int64 { return a + a to Int64 }");

        let ExpressionKind::Binary { lhs, rhs, .. } = &body_expression(&module).kind else {
            panic!("expected binary expression");
        };

        assert!(matches!(lhs.kind, ExpressionKind::Variable(_)));
        assert!(matches!(rhs.kind, ExpressionKind::Cast { .. }));
    }

    #[test]
    fn if_else_across_lines() {
        let module = parse(indoc! {"
            func f(c: Bool): Int32 {
                return if c {
                    1
                }
                else {
                    -2
                }
            }
        "});

        let ExpressionKind::If(if_expression) = &body_expression(&module).kind else {
            panic!("expected if expression");
        };

        assert!(if_expression.can_be_expression());
        assert_eq!(if_expression.else_branch.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn if_without_else_cannot_be_an_expression() {
        let module = parse("func f(c: Bool) { if c { 1 } }");

        let ExpressionKind::If(if_expression) = &body_expression(&module).kind else {
            panic!("expected if expression");
        };

        assert!(!if_expression.can_be_expression());
    }

    #[test]
    fn top_level_statements_are_kept_for_the_compiler() {
        let module = parse("print_n(1)");

        assert!(matches!(module.items[0].kind, ItemKind::Statement(_)));
    }

    #[test]
    fn let_requires_a_value() {
        let error = parse_error("func f() { let x: Int32 }");

        assert!(error.message.contains("requires a value"));
    }

    #[test]
    fn assignment_inside_expression_is_rejected() {
        let error = parse_error("func f() { var x: Int32\n print_n(x = 1) }");

        assert!(error.message.contains("assignment"));
    }

    #[test]
    fn integer_literal_out_of_range() {
        let error = parse_error("func f(): Int32 { return 3000000000 }");

        assert!(error.message.contains("does not fit"));
    }

    #[test]
    fn missing_statement_terminator() {
        let error = parse_error("func f() { print_n(1) print_n(2) }");

        assert!(error.message.contains("end of statement"));
    }
}
