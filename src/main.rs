// File: src/main.rs
//
// CLI entry point: `run <file>` lexes, parses, compiles and executes;
// `disasm <file>` stops after compiling and prints the prototype
// tree's mnemonic instruction listing.

mod ast;
mod builtins;
mod compiler;
mod errors;
mod instruction;
mod lexer;
mod parser;
mod proto;
mod value;
mod vm;

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;
use errors::KalaError;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(ClapParser)]
#[command(name = "kala", about = "A register-based bytecode interpreter", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lex, parse, compile and execute a script
    Run { file: PathBuf },
    /// Lex, parse and compile a script, printing its instruction stream
    Disasm { file: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run { file } => run(&file),
        Commands::Disasm { file } => disasm(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render(&e));
            ExitCode::FAILURE
        }
    }
}

fn compile_file(path: &PathBuf) -> Result<std::rc::Rc<proto::FuncProto>, KalaError> {
    let filename = path.to_string_lossy().to_string();
    let source = fs::read_to_string(path)
        .map_err(|e| KalaError::compile(format!("could not read {}: {}", filename, e)))?;
    let tokens = lexer::tokenize(&source)?;
    let mut parser = parser::Parser::new(tokens);
    let chunk = parser.parse()?;
    compiler::compile(&chunk)
}

fn run(path: &PathBuf) -> Result<(), KalaError> {
    let proto = compile_file(path)?;
    vm::run(proto)?;
    Ok(())
}

fn disasm(path: &PathBuf) -> Result<(), KalaError> {
    let proto = compile_file(path)?;
    let mut out = String::new();
    proto::disassemble(&proto, "<chunk>", &mut out);
    print!("{}", out);
    Ok(())
}

/// Renders a fatal in rustc-flavored shape: a bold colored kind
/// header, a dim location line, optional source context and a yellow
/// suggestion.
fn render(e: &KalaError) -> String {
    let mut out = format!("{}: {}", e.kind.to_string().red().bold(), e.message);
    out.push('\n');
    out.push_str(&format!("  {} {}", "at".blue(), e.location.to_string().blue()));
    if let Some(ref src) = e.source_line {
        out.push('\n');
        out.push_str(&format!("  {}", src.dimmed()));
    }
    if let Some(ref suggestion) = e.suggestion {
        out.push('\n');
        out.push_str(&format!("  {} {}", "help:".yellow(), suggestion.yellow()));
    }
    out
}
