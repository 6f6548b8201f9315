use colored::Colorize;
use itertools::Itertools;

use crate::{
    frontend::{SourceFile, intern::InternedSymbol, lexer::Span},
    middle::lir::verify::VerifyError,
};

/// Builds a [`CompileError`] that remembers where in the compiler it was
/// raised
macro_rules! compile_error_at {
    ($span:expr, $kind:expr $(,)?) => {
        $crate::middle::error::CompileError::new($kind, Some($span)).raised_at(
            $crate::middle::error::RaisedAt {
                module: module_path!(),
                file: file!(),
                line: line!(),
                column: column!(),
            },
        )
    };
}

pub(crate) use compile_error_at;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    UnknownSymbol {
        name: InternedSymbol,
    },
    UnknownFunction {
        name: InternedSymbol,
    },
    UnknownType {
        name: InternedSymbol,
    },
    DuplicateFunction {
        name: InternedSymbol,
    },
    ArityMismatch {
        function: InternedSymbol,
        expected: usize,
        found: usize,
    },
    ArgTypeMismatch {
        function: InternedSymbol,
        /// Zero based
        position: usize,
        expected: &'static str,
        found: &'static str,
    },
    TypeMismatch {
        lhs: &'static str,
        rhs: &'static str,
    },
    BranchTypeMismatch {
        then_type: &'static str,
        else_type: &'static str,
    },
    ConditionTypeError {
        found: &'static str,
    },
    UnsupportedCast {
        from: &'static str,
        to: &'static str,
    },
    UnknownOperator {
        operator: &'static str,
        ty: &'static str,
    },
    ImmutableAssignment {
        name: InternedSymbol,
    },
    MissingReturn {
        function: InternedSymbol,
    },
    IllegalIfExpression,
    IllegalTopLevelStatement,
    VerificationFailure {
        function: InternedSymbol,
        errors: Vec<VerifyError>,
    },
    /// An `if` used as a value with an empty arm
    EmptyBranch,
    /// A parameter or variable declared as `Void`
    VoidBinding {
        name: InternedSymbol,
    },
}

impl core::fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileErrorKind::UnknownSymbol { name } => write!(f, "unknown variable `{name}`"),
            CompileErrorKind::UnknownFunction { name } => {
                write!(f, "call to unknown function `{name}`")
            }
            CompileErrorKind::UnknownType { name } => write!(f, "unknown type `{name}`"),
            CompileErrorKind::DuplicateFunction { name } => {
                write!(f, "function `{name}` is already defined")
            }
            CompileErrorKind::ArityMismatch {
                function,
                expected,
                found,
            } => write!(
                f,
                "`{function}` takes {expected} argument(s) but {found} were supplied"
            ),
            CompileErrorKind::ArgTypeMismatch {
                function,
                position,
                expected,
                found,
            } => write!(
                f,
                "argument {} of `{function}` must be `{expected}`, found `{found}`",
                position + 1
            ),
            CompileErrorKind::TypeMismatch { lhs, rhs } => {
                write!(f, "mismatched operand types `{lhs}` and `{rhs}`")
            }
            CompileErrorKind::BranchTypeMismatch {
                then_type,
                else_type,
            } => write!(
                f,
                "if branches have different types: `{then_type}` and `{else_type}`"
            ),
            CompileErrorKind::ConditionTypeError { found } => {
                write!(f, "condition must be `Bool`, found `{found}`")
            }
            CompileErrorKind::UnsupportedCast { from, to } => {
                write!(f, "can't cast from `{from}` to `{to}`")
            }
            CompileErrorKind::UnknownOperator { operator, ty } => {
                write!(f, "operator `{operator}` is not supported for `{ty}`")
            }
            CompileErrorKind::ImmutableAssignment { name } => {
                write!(f, "cannot assign twice to immutable variable `{name}`")
            }
            CompileErrorKind::MissingReturn { function } => {
                write!(f, "function `{function}` is missing a return statement")
            }
            CompileErrorKind::IllegalIfExpression => write!(
                f,
                "an if used as a value needs an else branch and both branches must end in an expression"
            ),
            CompileErrorKind::IllegalTopLevelStatement => write!(
                f,
                "only functions and extern declarations are allowed at the top level"
            ),
            CompileErrorKind::VerificationFailure { function, errors } => write!(
                f,
                "function `{function}` failed verification: {}",
                errors.iter().join("; ")
            ),
            CompileErrorKind::EmptyBranch => {
                write!(f, "an if used as a value can't have an empty branch")
            }
            CompileErrorKind::VoidBinding { name } => {
                write!(f, "`{name}` can't be declared with type `Void`")
            }
        }
    }
}

/// Location in the compiler's own source where a diagnostic was raised
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaisedAt {
    pub module: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Option<Span>,
    pub raised_at: Option<RaisedAt>,
}

pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: Option<Span>) -> Self {
        Self {
            kind,
            span,
            raised_at: None,
        }
    }

    pub fn raised_at(mut self, location: RaisedAt) -> Self {
        self.raised_at = Some(location);
        self
    }

    pub fn report(&self, source: &SourceFile) {
        #[cfg(feature = "error-backtrace")]
        if let Some(location) = self.raised_at {
            eprintln!(
                "{}: {} {}",
                "backtrace".blue(),
                location.module,
                format!("(at {}:{}:{})", location.file, location.line, location.column).white()
            );
        }

        let Some(span) = self.span else {
            eprintln!("{}: {} ({})", "error".red(), self.kind, source.origin);
            return;
        };

        eprintln!(
            "{}: {} ({}:{}:{})",
            "error".red(),
            self.kind,
            source.origin,
            source.row_for_position(span.start),
            source.column_for_position(span.start)
        );
        eprintln!("{}", source.highlight_span(span));
    }
}

impl core::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for CompileError {}
