use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, process};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use vm::samples::{self, DEMOS};
use vm::{Interpreter, InterpreterSettings, compile_module};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile and run one of the bundled demo programs
    Demo {
        name: String,

        /// Print the disassembly of every routine before running
        #[arg(long, help = "Dump bytecode + constant pool before running")]
        dump_bytecode: bool,

        /// Write the compiled routines to a bytecode image
        #[arg(long, value_name = "PATH")]
        emit: Option<PathBuf>,
    },
    /// Disassemble a bytecode image written with `demo --emit`
    Disasm { image: PathBuf },
    /// List the bundled demos
    List,
}

fn main() {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    match cli.command {
        Command::Demo {
            name,
            dump_bytecode,
            emit,
        } => run_demo(&name, dump_bytecode, emit),
        Command::Disasm { image } => disasm(&image),
        Command::List => {
            for demo in &DEMOS {
                println!("{:<10} {}", demo.name, demo.about);
            }
        }
    }
}

fn run_demo(name: &str, dump_bytecode: bool, emit: Option<PathBuf>) {
    let Some(demo) = samples::demo(name) else {
        eprintln!("Unknown demo '{}' (try `list`)", name);
        process::exit(1);
    };

    let program = match compile_module(&demo.module()) {
        Ok(program) => Arc::new(program),
        Err(err) => {
            eprintln!("Error compiling {}: {}", name, err);
            process::exit(1);
        }
    };

    if dump_bytecode {
        match program.disassemble() {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("Error disassembling {}: {}", name, err);
                process::exit(1);
            }
        }
    }

    if let Some(path) = emit {
        let written = bytecode::image_to_bytes(program.routines())
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(&path, bytes).map_err(|e| e.to_string()));
        if let Err(err) = written {
            eprintln!("Error writing image '{}': {}", path.display(), err);
            process::exit(1);
        }
    }

    let mut interp = Interpreter::new(Arc::clone(&program), InterpreterSettings::default());
    let value = match interp.run() {
        Ok(value) => value,
        Err(fault) => {
            eprintln!("Error executing {}: {}", name, fault.report());
            for entry in &fault.trace {
                if let Some(span) = entry.span {
                    let text = demo
                        .source
                        .get(span.start as usize..span.end as usize)
                        .unwrap_or("");
                    eprintln!("  {}: {}", entry.routine, text.trim());
                }
            }
            process::exit(1);
        }
    };
    match interp.stringify(&value) {
        Ok(text) => println!("{text}"),
        Err(fault) => {
            eprintln!("Error printing result: {}", fault.report());
            process::exit(1);
        }
    }
}

fn disasm(path: &Path) {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Error reading file '{}': {}", path.display(), err);
            process::exit(1);
        }
    };
    let routines = match bytecode::read_image(&bytes) {
        Ok(routines) => routines,
        Err(err) => {
            eprintln!("Error loading image '{}': {}", path.display(), err);
            process::exit(1);
        }
    };
    for routine in &routines {
        match routine.disassemble() {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("Error disassembling {}: {}", routine.name, err);
                process::exit(1);
            }
        }
    }
}
