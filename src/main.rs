use std::{path::PathBuf, process::ExitCode};

use clap::{CommandFactory, Parser as ClapParser, ValueEnum, error::ErrorKind};
use colored::Colorize;
use pastelc::{
    config::{CompilerOptions, OptLevel},
    frontend::{SourceFile, SourceFileOrigin, parser::Parser},
    log::set_verbosity,
    log_phase,
    middle::{
        lir::{
            self,
            interpret::{Interpreter, Value},
            pretty_print::pretty_print_lir,
        },
        lowering::ModuleCompiler,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// The lowered (and optionally optimized) LIR
    Lir,
    /// The parsed syntax tree
    Ast,
}

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    source_files: Vec<PathBuf>,

    #[arg(short = 'O', long, value_enum, default_value_t = OptLevel::None)]
    opt_level: OptLevel,

    /// Pretty print an intermediate form to stdout
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Execute `main` with the LIR interpreter
    #[arg(long)]
    run: bool,

    /// Increase logging, may be repeated
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    set_verbosity(args.verbose);

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.exists() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' does not exist!", source_file.display()),
                )
                .exit()
        }

        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    /* Read in source files */

    let mut source_files = Vec::with_capacity(args.source_files.len());

    for path in &args.source_files {
        match std::fs::read_to_string(path) {
            Ok(contents) => source_files.push(SourceFile {
                contents,
                origin: SourceFileOrigin::File(path.clone()),
            }),
            Err(error) => Args::command()
                .error(
                    ErrorKind::Io,
                    format!("Failed to read '{}': {error}", path.display()),
                )
                .exit(),
        }
    }

    let options = CompilerOptions {
        opt_level: args.opt_level,
        ..CompilerOptions::default()
    };

    for source_file in &source_files {
        log_phase!("compiling {}", source_file.origin);

        let module = match Parser::parse_module(source_file) {
            Ok(module) => module,
            Err(error) => {
                error.report(source_file);
                return ExitCode::FAILURE;
            }
        };

        if args.emit == Some(Emit::Ast) {
            println!("{module:#?}");
        }

        let mut compiler = ModuleCompiler::new(options);

        if let Err(error) = compiler.compile(&module) {
            error.report(source_file);
            return ExitCode::FAILURE;
        }

        let lir_module = compiler.finish();

        if args.emit == Some(Emit::Lir) {
            pretty_print_lir(&lir_module);
        }

        if args.run && !run_main(&lir_module) {
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

/// Runs `main` with the host functions Pastel programs can declare as extern
fn run_main(module: &lir::Module) -> bool {
    let mut interpreter = Interpreter::new(module);

    interpreter.register_host_function("print_n", |arguments| {
        if let Some(n) = arguments.first() {
            println!("{n}");
        }
        Value::Void
    });

    interpreter.register_host_function("foo", |arguments| {
        let n = arguments.first().and_then(Value::as_signed).unwrap_or_default();
        Value::int32(n as i32 + 1)
    });

    match interpreter.call("main", &[]) {
        Ok(Value::Void) => true,
        Ok(value) => {
            println!("Result: {value}");
            true
        }
        Err(error) => {
            eprintln!("{}: {error}", "error".red());
            false
        }
    }
}
