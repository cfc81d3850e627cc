//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns the program AST.
//! - `resolver` α-renames variables and associates loops with labels.
//! - `tacky` lowers the resolved AST into three-address code.
//! - `codegen` lowers three-address code into x86-64 AT&T assembly.
//! - `error` centralises the per-stage error types.

pub mod codegen;
pub mod error;
pub mod parser;
pub mod resolver;
pub mod tacky;
pub mod tokenizer;

pub use error::{CompileError, CompileResult};

/// Compile a preprocessed source string into AT&T assembly.
pub fn compile(source: &str) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let program = parser::parse(tokens, source)?;
  let program = resolver::resolve(program)?;
  let tacky = tacky::emit(&program);
  Ok(codegen::generate(&tacky))
}
