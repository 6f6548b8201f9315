use crate::{
    config::OptLevel,
    frontend::ast,
    log_phase, log_trace,
    middle::{
        error::{CompileErrorKind, CompileResult, compile_error_at},
        lir::{self, builder::FunctionBuilder, optimization, verify},
        lowering::{BodyLoweringContext, Flow, FunctionRecord, ModuleCompiler},
    },
};

impl ModuleCompiler {
    /// Resolves the parameter and return types of a declaration
    fn resolve_prototype(&self, prototype: &ast::Prototype) -> CompileResult<FunctionRecord> {
        let mut parameters = Vec::with_capacity(prototype.parameters.len());

        for parameter in &prototype.parameters {
            let ty = self.resolve_type(Some(&parameter.ty))?;

            if ty == self.registry.void() {
                return Err(compile_error_at!(
                    parameter.span,
                    CompileErrorKind::VoidBinding {
                        name: parameter.name.symbol
                    }
                ));
            }

            parameters.push(ty);
        }

        let return_type = self.resolve_type(prototype.return_type.as_ref())?;

        if self.functions.contains_key(&prototype.name.symbol) {
            return Err(compile_error_at!(
                prototype.name.span,
                CompileErrorKind::DuplicateFunction {
                    name: prototype.name.symbol
                }
            ));
        }

        Ok(FunctionRecord {
            name: prototype.name.symbol,
            parameters,
            return_type,
            is_external: false,
        })
    }

    pub(super) fn declare_extern(&mut self, prototype: &ast::Prototype) -> CompileResult<()> {
        let record = FunctionRecord {
            is_external: true,
            ..self.resolve_prototype(prototype)?
        };

        log_phase!("declaring extern {}", record.name);

        let signature = record.signature(&self.registry);
        self.module
            .functions
            .push(lir::FunctionDefinition::external(record.name, signature));
        self.functions.insert(record.name, record);

        Ok(())
    }

    pub(super) fn compile_function(
        &mut self,
        declaration: &ast::FunctionDeclaration,
    ) -> CompileResult<()> {
        let record = self.resolve_prototype(&declaration.prototype)?;
        let name = record.name;

        log_phase!("lowering function {}", name);

        // Known before the body so the function can call itself
        self.functions.insert(name, record.clone());

        match self.lower_function(declaration, &record) {
            Ok(function) => {
                self.module.functions.push(function);
                Ok(())
            }
            Err(error) => {
                self.functions.remove(&name);
                Err(error)
            }
        }
    }

    fn lower_function(
        &mut self,
        declaration: &ast::FunctionDeclaration,
        record: &FunctionRecord,
    ) -> CompileResult<lir::FunctionDefinition> {
        let prototype = &declaration.prototype;

        self.symbols.clear();

        let mut context = BodyLoweringContext {
            registry: &self.registry,
            functions: &self.functions,
            symbols: &mut self.symbols,
            builder: FunctionBuilder::new(record.name, record.signature(&self.registry)),
        };

        let entry = context.builder.append_new_block("entry");
        context.builder.position_at_end(entry);

        let parameters = prototype.parameters.iter().zip(&record.parameters);

        for (index, (parameter, ty)) in parameters.enumerate() {
            if let Some(register) = context.builder.argument(index) {
                context
                    .symbols
                    .bind_parameter(parameter.name.symbol, *ty, register);
            }
        }

        // Every local gets its slot up front, before the first statement
        for local in &declaration.locals {
            let ty = context.resolve_type(&local.ty)?;

            if ty == context.registry.void() {
                return Err(compile_error_at!(
                    local.span,
                    CompileErrorKind::VoidBinding {
                        name: local.name.symbol
                    }
                ));
            }

            let slot = context.builder.alloca(context.registry.lir_type(ty));
            let mutable = local.mutability == ast::Mutability::Mutable;

            context
                .symbols
                .bind_local(local.name.symbol, ty, slot, mutable);
        }

        if let Flow::Fallthrough(_) = context.lower_statements(&declaration.body)? {
            if record.return_type != context.registry.void() {
                return Err(compile_error_at!(
                    prototype.span,
                    CompileErrorKind::MissingReturn {
                        function: record.name
                    }
                ));
            }

            context.builder.ret(None);
        }

        let mut function = context.builder.finish();

        self.verify(&function, prototype)?;

        if self.options.opt_level == OptLevel::Default {
            log_trace!("optimizing {}", record.name);
            optimization::optimize_function(&mut function);

            if self.options.verify_after_optimization {
                self.verify(&function, prototype)?;
            }
        }

        Ok(function)
    }

    fn verify(
        &self,
        function: &lir::FunctionDefinition,
        prototype: &ast::Prototype,
    ) -> CompileResult<()> {
        verify::verify_function(function, &self.module).map_err(|errors| {
            compile_error_at!(
                prototype.span,
                CompileErrorKind::VerificationFailure {
                    function: function.symbol_name,
                    errors,
                }
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{
        config::CompilerOptions,
        frontend::intern::InternedSymbol,
        middle::{
            error::CompileErrorKind,
            lir::{
                Instruction,
                interpret::{Interpreter, Value},
            },
            lowering::test_utils::*,
        },
    };

    #[test]
    fn void_functions_get_an_implicit_return() {
        let module = compile("func nothing() { }").unwrap();
        let function = module.function(InternedSymbol::new("nothing")).unwrap();

        assert_eq!(
            function.blocks[&function.layout[0]].instructions,
            vec![Instruction::Return { value: None }]
        );
    }

    #[test]
    fn non_void_functions_must_return() {
        assert_eq!(
            compile_error("func f(): Int32 { 1 }"),
            CompileErrorKind::MissingReturn {
                function: InternedSymbol::new("f")
            }
        );

        // Returning from a loop does not count
        assert_eq!(
            compile_error("func g(): Int32 { while true { return 1 } }"),
            CompileErrorKind::MissingReturn {
                function: InternedSymbol::new("g")
            }
        );
    }

    #[test]
    fn unknown_and_void_types_are_rejected_in_prototypes() {
        assert_eq!(
            compile_error("func f(a: Int128) { }"),
            CompileErrorKind::UnknownType {
                name: InternedSymbol::new("Int128")
            }
        );
        assert_eq!(
            compile_error("extern f(): Quad"),
            CompileErrorKind::UnknownType {
                name: InternedSymbol::new("Quad")
            }
        );
        assert_eq!(
            compile_error("func f(a: Void) { }"),
            CompileErrorKind::VoidBinding {
                name: InternedSymbol::new("a")
            }
        );
        assert_eq!(
            compile_error("func f() { var v: Void }"),
            CompileErrorKind::VoidBinding {
                name: InternedSymbol::new("v")
            }
        );
    }

    #[test]
    fn duplicate_definitions_fail() {
        assert_eq!(
            compile_error(indoc! {"
                func f() { }
                func f() { }
            "}),
            CompileErrorKind::DuplicateFunction {
                name: InternedSymbol::new("f")
            }
        );
    }

    #[test]
    fn returning_the_wrong_type_fails_verification() {
        let error = compile_error(indoc! {"
            func f(): Int64 {
                return 1
            }
        "});

        assert!(matches!(
            error,
            CompileErrorKind::VerificationFailure { function, .. } if function == InternedSymbol::new("f")
        ));
    }

    #[test]
    fn functions_can_recurse() {
        let source = indoc! {"
            func fib(n: Int32): Int32 {
                if n < 2 {
                    return n
                }
                return fib(n - 1) + fib(n - 2)
            }
        "};

        for options in [CompilerOptions::default(), CompilerOptions::optimized()] {
            let module = compile_with(source, options).unwrap();
            let mut interpreter = Interpreter::new(&module);

            assert_eq!(
                interpreter.call("fib", &[Value::int32(15)]),
                Ok(Value::int32(610))
            );
        }
    }

    #[test]
    fn optimizing_removes_stack_traffic() {
        let module = compile_with(
            indoc! {"
                func sum(n: Int32): Int32 {
                    var total: Int32 = 0
                    var i: Int32 = 0
                    while i < n {
                        i = i + 1
                        total = total + i
                    }
                    return total
                }
            "},
            CompilerOptions::optimized(),
        )
        .unwrap();

        let function = module.function(InternedSymbol::new("sum")).unwrap();
        let memory_operations = function
            .ordered_blocks()
            .flat_map(|block| &block.instructions)
            .filter(|instruction| {
                matches!(
                    instruction,
                    Instruction::AllocStack { .. }
                        | Instruction::LoadMem { .. }
                        | Instruction::StoreMem { .. }
                )
            })
            .count();

        assert_eq!(memory_operations, 0, "{function}");

        let mut interpreter = Interpreter::new(&module);
        assert_eq!(interpreter.call("sum", &[Value::int32(100)]), Ok(Value::int32(5050)));
    }
}
