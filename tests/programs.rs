use std::{cell::RefCell, rc::Rc};

use indoc::indoc;
use pastelc::{
    config::CompilerOptions,
    frontend::{SourceFile, intern::InternedSymbol, parser::Parser},
    middle::{
        error::{CompileError, CompileErrorKind},
        lir::{
            self, IntegerWidth,
            interpret::{ExecutionError, Interpreter, Value},
            verify::verify_function,
        },
        lowering::ModuleCompiler,
    },
};

fn compile_with(source: &SourceFile, options: CompilerOptions) -> Result<lir::Module, CompileError> {
    let module = Parser::parse_module(source).unwrap();
    let mut compiler = ModuleCompiler::new(options);
    compiler.compile(&module)?;

    Ok(compiler.finish())
}

/// Compiles with and without optimizations, checking both stay valid
fn compile_both(source: &str) -> [lir::Module; 2] {
    let source = SourceFile::from_memory(source);

    [CompilerOptions::default(), CompilerOptions::optimized()].map(|options| {
        let module = compile_with(&source, options).unwrap();

        for function in &module.functions {
            if let Err(errors) = verify_function(function, &module) {
                panic!("{function}\n{errors:?}");
            }
        }

        module
    })
}

fn run(module: &lir::Module, function: &str, arguments: &[Value]) -> Result<Value, ExecutionError> {
    Interpreter::new(module).call(function, arguments)
}

fn error_of(source: &str) -> CompileError {
    compile_with(&SourceFile::from_memory(source), CompilerOptions::default()).unwrap_err()
}

#[test]
fn greatest_common_divisor() {
    let source = indoc! {"
        // Euclid by repeated subtraction
        func gcd(a: Int32, b: Int32): Int32 {
            var x: Int32 = a
            var y: Int32 = b
            while x != y {
                if x > y {
                    x = x - y
                } else {
                    y = y - x
                }
            }
            return x
        }
    "};

    for module in compile_both(source) {
        assert_eq!(
            run(&module, "gcd", &[Value::int32(1071), Value::int32(462)]),
            Ok(Value::int32(21))
        );
    }
}

#[test]
fn collatz_steps_with_nested_if_expressions() {
    let source = indoc! {"
        func next(n: Int64): Int64 {
            return if n / 2 * 2 == n { n / 2 } else { 3 * n + 1 }
        }

        func steps(start: Int64): Int32 {
            var n: Int64 = start
            var count: Int32 = 0
            while n != 1 {
                n = next(n)
                count = count + 1
            }
            return count
        }
    "};

    for module in compile_both(source) {
        assert_eq!(
            run(&module, "steps", &[Value::int(27, IntegerWidth::I64)]),
            Ok(Value::int32(111))
        );
    }
}

#[test]
fn floating_point_arithmetic() {
    let source = indoc! {"
        func average(a: Float64, b: Float64): Float64 {
            return (a + b) / 2.0
        }

        func truncate(x: Float64): Int32 {
            return x to Int32
        }

        func main(): Int32 {
            return truncate(average(3.5, 4.0) * 10.0)
        }
    "};

    for module in compile_both(source) {
        assert_eq!(run(&module, "main", &[]), Ok(Value::int32(37)));
    }
}

#[test]
fn a_variable_reads_back_what_was_bound() {
    let [plain, optimized] = compile_both(indoc! {"
        func main(): Int32 {
            let x: Int32 = 5
            return x
        }
    "});

    assert_eq!(run(&plain, "main", &[]), Ok(Value::int32(5)));

    // Everything folds down to the constant
    let main = optimized.function(InternedSymbol::new("main")).unwrap();
    assert_eq!(
        main.ordered_blocks().flat_map(|b| &b.instructions).collect::<Vec<_>>(),
        [&lir::Instruction::Return {
            value: Some(lir::Immediate::int(5, IntegerWidth::I32).into())
        }]
    );
}

#[test]
fn widening_a_negative_value_keeps_its_bit_pattern() {
    for module in compile_both(indoc! {"
        func widen(n: Int32): Int64 {
            return n to Int64
        }
    "}) {
        assert_eq!(
            run(&module, "widen", &[Value::int32(-1)]),
            Ok(Value::int(0xffff_ffff, IntegerWidth::I64))
        );
    }
}

#[test]
fn extern_functions_call_into_the_host() {
    let [module, _] = compile_both(indoc! {"
        extern print_n(n: Int32)
        extern foo(n: Int32): Int32

        func main(): Int32 {
            var i: Int32 = 0
            while i < 3 {
                print_n(i)
                i = foo(i)
            }
            return i
        }
    "});

    let printed = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(&module);

    let sink = printed.clone();
    interpreter.register_host_function("print_n", move |arguments| {
        sink.borrow_mut().push(arguments[0].as_signed().unwrap());
        Value::Void
    });
    interpreter.register_host_function("foo", |arguments| {
        Value::int32(arguments[0].as_signed().unwrap() as i32 + 1)
    });

    assert_eq!(interpreter.call("main", &[]), Ok(Value::int32(3)));
    assert_eq!(*printed.borrow(), [0, 1, 2]);
}

#[test]
fn the_first_failure_aborts_the_module() {
    let source = SourceFile::from_memory(indoc! {"
        func ok(): Int32 {
            return 1
        }

        func broken(): Int32 {
            return g()
        }

        func never_reached(): Int32 {
            return 1 +
        }
    "});

    // Parse errors come before any lowering
    assert!(Parser::parse_module(&source).is_err());

    let source = SourceFile::from_memory(indoc! {"
        func ok(): Int32 {
            return 1
        }

        func broken(): Int32 {
            return g()
        }

        func never_reached(): Int32 {
            return true
        }
    "});

    let module = Parser::parse_module(&source).unwrap();
    let mut compiler = ModuleCompiler::new(CompilerOptions::default());
    let error = compiler.compile(&module).unwrap_err();

    assert_eq!(
        error.kind,
        CompileErrorKind::UnknownFunction {
            name: InternedSymbol::new("g")
        }
    );

    let span = error.span.unwrap();
    assert_eq!(source.row_for_position(span.start), 6);
    assert_eq!(source.column_for_position(span.start), 12);

    let compiled = compiler
        .module()
        .functions
        .iter()
        .map(|f| f.symbol_name.value())
        .collect::<Vec<_>>();
    assert_eq!(compiled, ["ok"]);
    assert!(compiler.lookup_function(InternedSymbol::new("broken")).is_none());
}

#[test]
fn diagnostics_name_what_went_wrong() {
    let cases = [
        (
            "func f(): Int32 { let x: Int32 = 1; x = 2; return x }",
            "cannot assign twice to immutable variable `x`",
        ),
        (
            "func f(a: Int8, b: UInt8): Int8 { return a + b }",
            "mismatched operand types `Int8` and `UInt8`",
        ),
        (
            "func f(): Int32 { return h(1, 2) }\nfunc h(a: Int32): Int32 { return a }",
            "call to unknown function `h`",
        ),
        (
            "func f(c: Bool): Int32 { return if c { 1 } else { 2.0 } }",
            "if branches have different types: `Int32` and `Float64`",
        ),
        ("func f(): Int32 { }", "function `f` is missing a return statement"),
        (
            "let x: Int32 = 1",
            "variable declarations are only allowed inside a function",
        ),
    ];

    for (source, message) in cases {
        let file = SourceFile::from_memory(source);

        let rendered = match Parser::parse_module(&file) {
            Ok(module) => {
                let mut compiler = ModuleCompiler::new(CompilerOptions::default());
                compiler.compile(&module).unwrap_err().to_string()
            }
            Err(error) => error.message,
        };

        assert_eq!(rendered, message, "{source}");
    }
}

#[test]
fn arity_is_checked_before_anything_is_emitted() {
    let error = error_of(indoc! {"
        extern foo(n: Int32): Int32

        func main(): Int32 {
            return foo(1, 2)
        }
    "});

    assert_eq!(
        error.kind,
        CompileErrorKind::ArityMismatch {
            function: InternedSymbol::new("foo"),
            expected: 1,
            found: 2
        }
    );
}

#[test]
fn runaway_recursion_is_stopped() {
    let [module, _] = compile_both(indoc! {"
        func forever(n: Int32): Int32 {
            return forever(n + 1)
        }
    "});

    let result = Interpreter::new(&module)
        .with_step_limit(10_000)
        .call("forever", &[Value::int32(0)]);

    assert!(result.is_err());
}
