//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer is intentionally tiny – it knows nothing about semantics
//! beyond recognising keywords, identifiers, numeric literals and
//! punctuators. Multi-character punctuators are matched before shorter
//! prefixes so the longest lexeme always wins, and identifier-shaped
//! lexemes are looked up in the keyword table after the fact.

use crate::error::LexError;

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Keyword,
  Ident,
  Num,
  Punctuator,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub value: Option<i64>,
  pub loc: usize,
  pub len: usize,
  pub line: usize,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, loc: usize, len: usize, line: usize, value: Option<i64>) -> Self {
    Self {
      kind,
      value,
      loc,
      len,
      line,
    }
  }
}

/// Reserved words; identifier-shaped lexemes are checked against this table.
const KEYWORDS: [&str; 10] = [
  "int", "void", "return", "if", "else", "for", "while", "do", "break", "continue",
];

/// Punctuators ordered longest first, so a `starts_with` scan implements
/// maximal munch (`<<=` wins over `<<` wins over `<`).
const PUNCTUATORS: [&str; 40] = [
  "<<=", ">>=", // three-character
  "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
  "++", "--", // two-character
  "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&", "|", "^", // one-character operators
  "(", ")", "{", "}", ";", ":", "?", // punctuation
];

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;
  let mut line = 1;

  while i < bytes.len() {
    let c = bytes[i];

    if c == b'\n' {
      line += 1;
      i += 1;
      continue;
    }
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if input[i..].starts_with("//") {
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }

    if input[i..].starts_with("/*") {
      let start = i;
      i += 2;
      loop {
        if i + 1 >= bytes.len() {
          // unterminated block comment
          return Err(LexError::unrecognized(input, start));
        }
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
          i += 2;
          break;
        }
        if bytes[i] == b'\n' {
          line += 1;
        }
        i += 1;
      }
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      i += 1;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let kind = if KEYWORDS.contains(&&input[start..i]) {
        TokenKind::Keyword
      } else {
        TokenKind::Ident
      };
      tokens.push(Token::new(kind, start, i - start, line, None));
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      // a literal must end at a word boundary: `123abc` is not a number
      if i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        return Err(LexError::unrecognized(input, i));
      }
      let value = input[start..i]
        .parse::<i64>()
        .map_err(|_| LexError::unrecognized(input, start))?;
      tokens.push(Token::new(TokenKind::Num, start, i - start, line, Some(value)));
      continue;
    }

    if let Some(op) = PUNCTUATORS
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Punctuator, i, op.len(), line, None));
      i += op.len();
      continue;
    }

    return Err(LexError::unrecognized(input, i));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, line, None));
  Ok(tokens)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lexemes(source: &str) -> Vec<String> {
    tokenize(source)
      .unwrap()
      .iter()
      .filter(|t| t.kind != TokenKind::Eof)
      .map(|t| token_text(t, source).to_string())
      .collect()
  }

  #[test]
  fn maximal_munch_on_shift_assign() {
    assert_eq!(lexemes("a <<= b << c < d"), ["a", "<<=", "b", "<<", "c", "<", "d"]);
    assert_eq!(lexemes("x>>=1"), ["x", ">>=", "1"]);
  }

  #[test]
  fn adjacent_operators_split_greedily() {
    // `a+++b` lexes as `a ++ + b`, exactly like a real C lexer
    assert_eq!(lexemes("a+++b"), ["a", "++", "+", "b"]);
    assert_eq!(lexemes("a---b"), ["a", "--", "-", "b"]);
  }

  #[test]
  fn keywords_are_not_identifiers() {
    let tokens = tokenize("int returned = return1;").unwrap();
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
      kinds,
      [
        TokenKind::Keyword,
        TokenKind::Ident,
        TokenKind::Punctuator,
        TokenKind::Ident,
        TokenKind::Punctuator,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn comments_and_newlines_update_line_numbers() {
    let source = "int a; // trailing\n/* block\ncomment */ return";
    let tokens = tokenize(source).unwrap();
    let ret = tokens
      .iter()
      .find(|t| t.kind == TokenKind::Keyword && token_text(t, source) == "return")
      .unwrap();
    assert_eq!(ret.line, 3);
  }

  #[test]
  fn number_must_end_at_word_boundary() {
    assert!(tokenize("return 123abc;").is_err());
  }

  #[test]
  fn rejects_unknown_characters() {
    assert!(matches!(
      tokenize("int a = @;"),
      Err(LexError::Unrecognized { offset: 8, .. })
    ));
  }

  #[test]
  fn unterminated_block_comment_is_an_error() {
    assert!(tokenize("int a; /* no end").is_err());
  }

  #[test]
  fn relexing_joined_lexemes_round_trips() {
    let source = "int main(void) { int a = 1; return a <<= 2; }";
    let first = tokenize(source).unwrap();
    let joined = first
      .iter()
      .filter(|t| t.kind != TokenKind::Eof)
      .map(|t| token_text(t, source))
      .collect::<Vec<_>>()
      .join(" ");
    let second = tokenize(&joined).unwrap();
    let kinds = |ts: &[Token]| ts.iter().map(|t| t.kind).collect::<Vec<_>>();
    assert_eq!(kinds(&first), kinds(&second));
    let texts: Vec<String> = second
      .iter()
      .filter(|t| t.kind != TokenKind::Eof)
      .map(|t| token_text(t, &joined).to_string())
      .collect();
    assert_eq!(joined, texts.join(" "));
  }
}
