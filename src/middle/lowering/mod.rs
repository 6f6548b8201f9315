//! Lowering of the syntax tree into LIR.
//!
//! The [`ModuleCompiler`] owns everything that outlives a single function: the
//! type registry, the table of known functions and the module being built.
//! Each function body is lowered by a [`BodyLoweringContext`] that borrows
//! those and drives a [`FunctionBuilder`] whose cursor is the insertion point.

use hashbrown::HashMap;

use crate::{
    config::CompilerOptions,
    frontend::{ast, intern::InternedSymbol, lexer::Span},
    middle::{
        error::{CompileErrorKind, CompileResult, compile_error_at},
        lir::{self, builder::FunctionBuilder},
        scope::SymbolTable,
        ty::{Type, TypeRegistry, TypedValue},
    },
};

mod control_flow;
mod expression;
mod function;
mod statement;

pub use expression::ExpressionContext;
pub use statement::Flow;

/// A declared function and its resolved prototype
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRecord {
    pub name: InternedSymbol,
    pub parameters: Vec<Type>,
    pub return_type: Type,
    pub is_external: bool,
}

impl FunctionRecord {
    pub fn signature(&self, registry: &TypeRegistry) -> lir::Signature {
        lir::Signature {
            parameters: self
                .parameters
                .iter()
                .map(|ty| registry.lir_type(*ty))
                .collect(),
            return_type: registry.lir_type(self.return_type),
        }
    }
}

#[derive(Debug)]
pub struct ModuleCompiler {
    options: CompilerOptions,
    registry: TypeRegistry,
    functions: HashMap<InternedSymbol, FunctionRecord>,
    symbols: SymbolTable,
    module: lir::Module,
}

impl ModuleCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            registry: TypeRegistry::new(),
            functions: HashMap::new(),
            symbols: SymbolTable::new(),
            module: lir::Module::default(),
        }
    }

    /// Compiles every top level declaration in source order, stopping at the
    /// first one that fails.
    pub fn compile(&mut self, module: &ast::Module) -> CompileResult<()> {
        for item in &module.items {
            match &item.kind {
                ast::ItemKind::Function(declaration) => self.compile_function(declaration)?,
                ast::ItemKind::Extern(prototype) => self.declare_extern(prototype)?,
                ast::ItemKind::Statement(_) => {
                    return Err(compile_error_at!(
                        item.span,
                        CompileErrorKind::IllegalTopLevelStatement
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn module(&self) -> &lir::Module {
        &self.module
    }

    pub fn lookup_function(&self, name: InternedSymbol) -> Option<&FunctionRecord> {
        self.functions.get(&name)
    }

    pub fn finish(self) -> lir::Module {
        self.module
    }

    /// Resolves a type annotation, `None` meaning `Void`
    fn resolve_type(&self, name: Option<&ast::TypeName>) -> CompileResult<Type> {
        match name {
            None => Ok(self.registry.void()),
            Some(name) => self
                .registry
                .lookup(Some(name.symbol.value()))
                .ok_or_else(|| {
                    compile_error_at!(name.span, CompileErrorKind::UnknownType { name: name.symbol })
                }),
        }
    }
}

/// State for lowering one function body
pub(crate) struct BodyLoweringContext<'compiler> {
    registry: &'compiler TypeRegistry,
    functions: &'compiler HashMap<InternedSymbol, FunctionRecord>,
    symbols: &'compiler mut SymbolTable,
    builder: FunctionBuilder,
}

impl BodyLoweringContext<'_> {
    /// Whether the cursor sits in a block that will never be part of the
    /// function, which is the case after every path has returned.
    fn is_unreachable(&self) -> bool {
        self.builder
            .current_block()
            .is_none_or(|block| !self.builder.is_appended(block))
    }

    /// Moves the cursor into a scratch block that is never appended, so
    /// anything emitted after a diverging construct is dropped.
    fn enter_unreachable(&mut self) {
        let dead = self.builder.create_block("unreachable");
        self.builder.position_at_end(dead);
    }

    fn void(&self) -> TypedValue {
        TypedValue::void(self.registry)
    }

    fn resolve_type(&self, name: &ast::TypeName) -> CompileResult<Type> {
        self.registry
            .lookup(Some(name.symbol.value()))
            .ok_or_else(|| {
                compile_error_at!(name.span, CompileErrorKind::UnknownType { name: name.symbol })
            })
    }

    fn expect_condition(&self, condition: TypedValue, span: Span) -> CompileResult<()> {
        if condition.ty != self.registry.bool() {
            return Err(compile_error_at!(
                span,
                CompileErrorKind::ConditionTypeError {
                    found: self.registry.name(condition.ty),
                }
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::{
        config::CompilerOptions,
        frontend::{SourceFile, parser::Parser},
        middle::{
            error::{CompileError, CompileErrorKind},
            lir,
        },
    };

    pub fn compile_with(source: &str, options: CompilerOptions) -> Result<lir::Module, CompileError> {
        let source = SourceFile::from_memory(source);
        let module = match Parser::parse_module(&source) {
            Ok(module) => module,
            Err(error) => panic!("parse error: {}", error.message),
        };

        let mut compiler = super::ModuleCompiler::new(options);
        compiler.compile(&module)?;

        Ok(compiler.finish())
    }

    pub fn compile(source: &str) -> Result<lir::Module, CompileError> {
        compile_with(source, CompilerOptions::default())
    }

    pub fn compile_error(source: &str) -> CompileErrorKind {
        match compile(source) {
            Ok(module) => panic!("expected a compile error, got\n{module}"),
            Err(error) => error.kind,
        }
    }
}
