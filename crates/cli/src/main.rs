//! emberc: REPL and file runner for the Ember bytecode interpreter (spec §6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use ember_runtime::{InterpretError, Vm};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(ClapParser)]
#[command(name = "emberc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ember bytecode interpreter", long_about = None)]
struct Args {
    /// Ember source file to run. Omit to start the REPL.
    file: Option<PathBuf>,

    /// In the REPL, echo the value of a bare expression statement as `Ans = <value>`.
    #[arg(short = 'a', long)]
    ans: bool,

    /// Print disassembled bytecode for every chunk before running it.
    #[arg(long)]
    disassemble: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("emberc=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.file {
        Some(path) => run_file(&path, args.disassemble),
        None => run_repl(args.ans, args.disassemble),
    }
}

fn run_file(path: &std::path::Path, disassemble: bool) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Could not read {}: {e}", path.display());
            return ExitCode::from(74);
        }
    };

    let mut vm = Vm::new();
    interpret_and_report(&mut vm, &source, disassemble)
}

fn run_repl(ans: bool, disassemble: bool) -> ExitCode {
    let mut vm = Vm::new();
    vm.repl_echo = ans;

    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Could not start line editor: {e}");
            return ExitCode::from(74);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                interpret_and_report(&mut vm, &line, disassemble);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Readline error: {e}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Compiles and runs `source`, printing any error to stderr. Returns the
/// exit code spec §6 assigns: 0 success, 65 compile error, 70 runtime error.
fn interpret_and_report(vm: &mut Vm, source: &str, disassemble: bool) -> ExitCode {
    let result = if disassemble {
        vm.interpret_and_disassemble(source)
    } else {
        vm.interpret(source)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ InterpretError::Compile(_)) => {
            eprint!("{e}");
            ExitCode::from(65)
        }
        Err(e @ InterpretError::Runtime(_)) => {
            eprint!("{e}");
            ExitCode::from(70)
        }
    }
}
