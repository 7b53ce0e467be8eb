//! Thin command-line wrapper around the Meow VM.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::debug;

use meow_vm::{loader, ExecutionEngine, MemoryManager, VmArgs, VmError};

/// Run a Meow bytecode program.
#[derive(Parser, Debug)]
#[command(name = "meow", version, about)]
struct Cli {
    /// Entry bytecode file
    entry: PathBuf,

    /// Extra module resolution root
    #[arg(long)]
    lib_root: Option<PathBuf>,

    /// Print the entry file's disassembly instead of executing it
    #[arg(long)]
    disassemble: bool,

    /// Arguments passed through to the program
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.disassemble {
        return match disassemble(&cli) {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("meow: {err:#}");
                ExitCode::FAILURE
            }
        };
    }

    let mut args = VmArgs::new(cli.entry, cli.args);
    args.library_root = cli.lib_root;
    debug!(entry = %args.entry_path.display(), "starting vm");

    let mut engine = ExecutionEngine::new(args);
    match engine.interpret() {
        Ok(()) => ExitCode::SUCCESS,
        Err(VmError::UncaughtThrow { value, backtrace }) => {
            eprintln!("uncaught throw: {value}");
            for frame in backtrace {
                eprintln!("    {frame}");
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("meow: {err}");
            ExitCode::FAILURE
        }
    }
}

fn disassemble(cli: &Cli) -> anyhow::Result<String> {
    let source = std::fs::read_to_string(&cli.entry)
        .with_context(|| format!("reading {}", cli.entry.display()))?;
    let origin = cli.entry.to_string_lossy().into_owned();

    let mut heap = MemoryManager::new();
    let protos = loader::parse_source(&mut heap, &source, &origin)?;

    let mut names: Vec<&String> = protos.keys().collect();
    names.sort();
    let mut output = String::new();
    for name in names {
        let proto = heap.proto(protos[name]);
        output.push_str(&meow_vm::debug::disassemble_chunk(&heap, proto.chunk(), name));
        output.push('\n');
    }
    Ok(output)
}
