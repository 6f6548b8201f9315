//! Untyped syntax tree produced by the parser. Every expression and statement
//! kind is a closed enum so lowering can match on it exhaustively.

use strum::{Display, IntoStaticStr};

use super::{intern::InternedSymbol, lexer::Span};

#[derive(Debug)]
pub struct Module {
    pub items: Vec<Item>,
}

#[derive(Debug)]
pub struct Item {
    pub span: Span,
    pub kind: ItemKind,
}

#[derive(Debug)]
pub enum ItemKind {
    Function(FunctionDeclaration),
    Extern(Prototype),
    /// Anything else found at the top level. Kept so the compiler can reject it.
    Statement(Statement),
}

#[derive(Debug)]
pub struct FunctionDeclaration {
    pub prototype: Prototype,
    /// Every `let`/`var` in the body, in source order
    pub locals: Vec<LocalDeclaration>,
    pub body: Vec<Statement>,
}

#[derive(Debug)]
pub struct Prototype {
    pub span: Span,
    pub name: Identifier,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeName>,
}

#[derive(Debug)]
pub struct Parameter {
    pub span: Span,
    pub name: Identifier,
    pub ty: TypeName,
}

#[derive(Debug)]
pub struct LocalDeclaration {
    pub span: Span,
    pub name: Identifier,
    pub ty: TypeName,
    pub mutability: Mutability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// `let`
    Immutable,
    /// `var`
    Mutable,
}

#[derive(Debug, Clone, Copy)]
pub struct Identifier {
    pub span: Span,
    pub symbol: InternedSymbol,
}

#[derive(Debug, Clone, Copy)]
pub struct TypeName {
    pub span: Span,
    pub symbol: InternedSymbol,
}

#[derive(Debug)]
pub struct Statement {
    pub span: Span,
    pub kind: StatementKind,
}

#[derive(Debug)]
pub enum StatementKind {
    Expression(Expression),
    Return(Option<Expression>),
    Assignment {
        target: Identifier,
        value: Expression,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
}

impl Statement {
    pub fn is_expression(&self) -> bool {
        matches!(self.kind, StatementKind::Expression(_))
    }
}

#[derive(Debug)]
pub struct Expression {
    pub span: Span,
    pub kind: ExpressionKind,
}

#[derive(Debug)]
pub enum ExpressionKind {
    Literal(Literal),
    Variable(Identifier),
    Binary {
        operator: BinaryOperator,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Call {
        callee: Identifier,
        arguments: Vec<Expression>,
    },
    If(Box<IfExpression>),
    /// `value to Type`
    Cast {
        value: Box<Expression>,
        ty: TypeName,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Integer(i32),
    Float(f64),
    Boolean(bool),
}

#[derive(Debug)]
pub struct IfExpression {
    pub condition: Expression,
    pub then_branch: Vec<Statement>,
    pub else_branch: Option<Vec<Statement>>,
}

impl IfExpression {
    /// Whether the construct can produce a value: it needs an else branch and
    /// both branches must end in an expression statement.
    pub fn can_be_expression(&self) -> bool {
        let Some(else_branch) = &self.else_branch else {
            return false;
        };

        [&self.then_branch, else_branch]
            .into_iter()
            .all(|branch| branch.last().is_some_and(Statement::is_expression))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BinaryOperator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "==")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        !self.is_arithmetic()
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide
        )
    }
}
