//! Pascal-family compiler: lexes, parses, and lowers a single source file
//! straight to x86-64 Intel-syntax assembly text. No assembler or linker is
//! invoked; the assembly is simply returned (or, from the CLI, printed).

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod emitter;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod scope;
pub mod types;

pub use ast::Program;
pub use codegen::Compiler;
pub use errors::{CompileError, ErrorKind, Result};
pub use parser::Parser;

use std::fs;
use std::path::Path;

/// Flags controlling the two trace switches exposed on the CLI (`-s`, `-p`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Trace every token produced by the lexer at `trace` level.
    pub trace_scan: bool,
    /// Pretty-print the parsed program to stderr before lowering.
    pub print_ast: bool,
}

/// Compiles `source` to assembly text. `name` is used only for the `tracing`
/// span, so callers without a real file path (e.g. tests) can pass anything.
pub fn compile_source(name: &str, source: &str, options: CompileOptions) -> Result<String> {
    let span = tracing::info_span!("compile", program = name);
    let _guard = span.enter();
    tracing::info!(bytes = source.len(), "starting compilation");

    let mut parser = Parser::new(source, options.trace_scan)?;
    let program = parser.parse_program()?;
    tracing::debug!(name = %program.name, "parsed program");

    if options.print_ast {
        eprintln!("{}", printer::print_program(&program));
    }

    let mut compiler = Compiler::new();
    let assembly = compiler.compile(&program)?;
    tracing::info!("compilation finished");
    Ok(assembly)
}

/// Reads `path` from disk and compiles it, per `compile_source`.
pub fn compile_file(path: &Path, options: CompileOptions) -> Result<String> {
    let source = fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program");
    compile_source(name, &source, options)
}
