//! Shared error types for the compilation pipeline.
//!
//! Each stage owns a flat error enum; [`CompileError`] wraps them so the
//! driver sees a single type and every diagnostic names the stage it came
//! from. Reporting is kept lightweight on purpose – offset-anchored errors
//! format in a style reminiscent of chibicc, pointing at the offending
//! character with a caret.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// Any stage failure. Stage errors convert with `?` thanks to
/// `context(false)`.
#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(context(false), display("lex error: {source}"))]
  Lex { source: LexError },

  #[snafu(context(false), display("parse error: {source}"))]
  Parse { source: ParseError },

  #[snafu(context(false), display("semantic error: {source}"))]
  Semantic { source: SemError },
}

/// Lexical errors: the scanner found text no token rule accepts.
#[derive(Debug, Snafu)]
pub enum LexError {
  #[snafu(display("line {line}: unrecognized token\n{source_line}\n{marker}"))]
  Unrecognized {
    offset: usize,
    line: usize,
    source_line: String,
    marker: String,
  },
}

impl LexError {
  /// Construct an `Unrecognized` error anchored at a byte offset, rendering
  /// the offending source line with a caret under the bad column.
  pub fn unrecognized(source: &str, offset: usize) -> Self {
    let offset = offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map_or(0, |p| p + 1);
    let line_end = source[offset..]
      .find('\n')
      .map_or(source.len(), |p| offset + p);
    let line = source[..offset].matches('\n').count() + 1;
    let column = source[line_start..offset].chars().count();
    Self::Unrecognized {
      offset,
      line,
      source_line: source[line_start..line_end].to_string(),
      marker: format!("{}^", " ".repeat(column)),
    }
  }
}

/// Syntax errors raised by the parser.
#[derive(Debug, Snafu)]
pub enum ParseError {
  #[snafu(display("line {line}: expected {expected}, but got \"{found}\""))]
  Unexpected {
    found: String,
    expected: String,
    line: usize,
  },

  #[snafu(display("unexpected end of input, expected {expected}"))]
  UnexpectedEof { expected: String },
}

/// Errors raised while resolving names and loop structure.
#[derive(Debug, Snafu)]
pub enum SemError {
  #[snafu(display("redeclaration of '{name}'"))]
  DuplicateDecl { name: String },

  #[snafu(display("use of undeclared identifier '{name}'"))]
  UndeclaredVar { name: String },

  #[snafu(display("expression is not assignable"))]
  InvalidLValue,

  #[snafu(display("'{keyword}' statement not within a loop"))]
  BreakOutsideLoop { keyword: &'static str },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn caret_points_at_offending_column() {
    let err = LexError::unrecognized("int a;\nreturn @;\n", 14);
    let rendered = err.to_string();
    assert!(rendered.contains("line 2"));
    assert!(rendered.contains("return @;"));
    assert!(rendered.ends_with("       ^"));
  }

  #[test]
  fn stage_prefix_survives_wrapping() {
    let err: CompileError = LexError::unrecognized("@", 0).into();
    assert!(err.to_string().starts_with("lex error:"));
  }
}
