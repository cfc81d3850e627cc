//! Recursive-descent parser producing the abstract syntax tree.
//!
//! Declarations and statements descend in the classic chibicc manner; the
//! expression grammar is a single precedence-climbing loop driven by an
//! operator table instead of one function per precedence level, since the
//! operator set here is large. Associativity falls out of the recursion
//! depth: left-associative operators recurse with `prec + 1`, the
//! right-associative assignment family and the ternary recurse with `prec`.

use crate::error::ParseError;
use crate::tokenizer::{Token, TokenKind, describe_token, token_text};

/// Unary operators applicable to a factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Complement,
  Negate,
  Not,
}

/// Binary operators. `And`/`Or` are the short-circuit forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Subtract,
  Multiply,
  Divide,
  Remainder,
  ShiftLeft,
  ShiftRight,
  BitAnd,
  BitXor,
  BitOr,
  And,
  Or,
  Equal,
  NotEqual,
  Less,
  LessEqual,
  Greater,
  GreaterEqual,
}

/// Increment/decrement flavour shared by the prefix and postfix forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDec {
  Increment,
  Decrement,
}

/// Expression tree produced by the parser.
#[derive(Debug, Clone)]
pub enum Expr {
  Constant(i64),
  Var(String),
  Unary {
    op: UnaryOp,
    expr: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Assignment {
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  CompoundAssignment {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Conditional {
    cond: Box<Expr>,
    then: Box<Expr>,
    otherwise: Box<Expr>,
  },
  Prefix {
    op: IncDec,
    expr: Box<Expr>,
  },
  Postfix {
    op: IncDec,
    expr: Box<Expr>,
  },
}

impl Expr {
  pub fn unary(op: UnaryOp, expr: Expr) -> Self {
    Self::Unary {
      op,
      expr: Box::new(expr),
    }
  }

  pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn assignment(lhs: Expr, rhs: Expr) -> Self {
    Self::Assignment {
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn compound_assignment(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
    Self::CompoundAssignment {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn conditional(cond: Expr, then: Expr, otherwise: Expr) -> Self {
    Self::Conditional {
      cond: Box::new(cond),
      then: Box::new(then),
      otherwise: Box::new(otherwise),
    }
  }

  pub fn prefix(op: IncDec, expr: Expr) -> Self {
    Self::Prefix {
      op,
      expr: Box::new(expr),
    }
  }

  pub fn postfix(op: IncDec, expr: Expr) -> Self {
    Self::Postfix {
      op,
      expr: Box::new(expr),
    }
  }
}

/// A variable declaration, optionally initialised.
#[derive(Debug, Clone)]
pub struct Declaration {
  pub name: String,
  pub init: Option<Expr>,
}

/// The first clause of a `for` header.
#[derive(Debug, Clone)]
pub enum ForInit {
  Decl(Declaration),
  Expr(Option<Expr>),
}

/// Statements. Loop variants carry a label slot the resolver fills in.
#[derive(Debug, Clone)]
pub enum Statement {
  Return(Expr),
  Expression(Expr),
  Null,
  If {
    cond: Expr,
    then: Box<Statement>,
    otherwise: Option<Box<Statement>>,
  },
  Compound(Block),
  While {
    label: Option<String>,
    cond: Expr,
    body: Box<Statement>,
  },
  DoWhile {
    label: Option<String>,
    body: Box<Statement>,
    cond: Expr,
  },
  For {
    label: Option<String>,
    init: ForInit,
    cond: Option<Expr>,
    post: Option<Expr>,
    body: Box<Statement>,
  },
  Break {
    label: Option<String>,
  },
  Continue {
    label: Option<String>,
  },
}

/// Either a declaration or a statement; blocks hold an ordered list of these.
#[derive(Debug, Clone)]
pub enum BlockItem {
  Decl(Declaration),
  Stmt(Statement),
}

#[derive(Debug, Clone)]
pub struct Block(pub Vec<BlockItem>);

#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  pub body: Block,
}

#[derive(Debug, Clone)]
pub struct Program {
  pub function: Function,
}

/// Parse a whole translation unit: exactly one `int <name>(void)` function,
/// with nothing but EOF allowed afterwards.
pub fn parse(tokens: Vec<Token>, source: &str) -> Result<Program, ParseError> {
  let mut stream = TokenStream::new(tokens, source);
  let function = parse_function(&mut stream)?;
  stream.expect_eof()?;
  Ok(Program { function })
}

fn parse_function(stream: &mut TokenStream) -> Result<Function, ParseError> {
  stream.skip("int")?;
  let name = stream.get_ident()?;
  stream.skip("(")?;
  stream.skip("void")?;
  stream.skip(")")?;
  let body = parse_block(stream)?;
  Ok(Function { name, body })
}

// ----- Statement parsing -----

fn parse_block(stream: &mut TokenStream) -> Result<Block, ParseError> {
  stream.skip("{")?;
  let mut items = Vec::new();
  while !stream.peek_is("}") {
    if stream.is_eof() {
      return Err(ParseError::UnexpectedEof {
        expected: "\"}\"".to_string(),
      });
    }
    items.push(parse_block_item(stream)?);
  }
  stream.skip("}")?;
  Ok(Block(items))
}

fn parse_block_item(stream: &mut TokenStream) -> Result<BlockItem, ParseError> {
  if stream.peek_is("int") {
    Ok(BlockItem::Decl(parse_declaration(stream)?))
  } else {
    Ok(BlockItem::Stmt(parse_statement(stream)?))
  }
}

fn parse_declaration(stream: &mut TokenStream) -> Result<Declaration, ParseError> {
  stream.skip("int")?;
  let name = stream.get_ident()?;
  let init = if stream.equal("=") {
    Some(parse_expr(stream, 0)?)
  } else {
    None
  };
  stream.skip(";")?;
  Ok(Declaration { name, init })
}

fn parse_statement(stream: &mut TokenStream) -> Result<Statement, ParseError> {
  match stream.peek_keyword() {
    Some("return") => {
      stream.skip("return")?;
      let expr = parse_expr(stream, 0)?;
      stream.skip(";")?;
      Ok(Statement::Return(expr))
    }
    Some("if") => parse_if_stmt(stream),
    Some("while") => parse_while_stmt(stream),
    Some("do") => parse_do_while_stmt(stream),
    Some("for") => parse_for_stmt(stream),
    Some("break") => {
      stream.skip("break")?;
      stream.skip(";")?;
      Ok(Statement::Break { label: None })
    }
    Some("continue") => {
      stream.skip("continue")?;
      stream.skip(";")?;
      Ok(Statement::Continue { label: None })
    }
    Some("else") => Err(stream.unexpected("a statement ('else' has no matching 'if')")),
    _ if stream.peek_is("{") => Ok(Statement::Compound(parse_block(stream)?)),
    _ if stream.equal(";") => Ok(Statement::Null),
    _ => {
      let expr = parse_expr(stream, 0)?;
      stream.skip(";")?;
      Ok(Statement::Expression(expr))
    }
  }
}

fn parse_if_stmt(stream: &mut TokenStream) -> Result<Statement, ParseError> {
  stream.skip("if")?;
  stream.skip("(")?;
  let cond = parse_expr(stream, 0)?;
  stream.skip(")")?;
  // greedy: the nearest unmatched `if` claims a following `else`
  let then = Box::new(parse_statement(stream)?);
  let otherwise = if stream.equal("else") {
    Some(Box::new(parse_statement(stream)?))
  } else {
    None
  };
  Ok(Statement::If {
    cond,
    then,
    otherwise,
  })
}

fn parse_while_stmt(stream: &mut TokenStream) -> Result<Statement, ParseError> {
  stream.skip("while")?;
  stream.skip("(")?;
  let cond = parse_expr(stream, 0)?;
  stream.skip(")")?;
  let body = Box::new(parse_statement(stream)?);
  Ok(Statement::While {
    label: None,
    cond,
    body,
  })
}

fn parse_do_while_stmt(stream: &mut TokenStream) -> Result<Statement, ParseError> {
  stream.skip("do")?;
  let body = Box::new(parse_statement(stream)?);
  stream.skip("while")?;
  stream.skip("(")?;
  let cond = parse_expr(stream, 0)?;
  stream.skip(")")?;
  stream.skip(";")?;
  Ok(Statement::DoWhile {
    label: None,
    body,
    cond,
  })
}

fn parse_for_stmt(stream: &mut TokenStream) -> Result<Statement, ParseError> {
  stream.skip("for")?;
  stream.skip("(")?;

  let init = if stream.peek_is("int") {
    // the declaration consumes its own ';'
    ForInit::Decl(parse_declaration(stream)?)
  } else if stream.equal(";") {
    ForInit::Expr(None)
  } else {
    let expr = parse_expr(stream, 0)?;
    stream.skip(";")?;
    ForInit::Expr(Some(expr))
  };

  let cond = if stream.peek_is(";") {
    None
  } else {
    Some(parse_expr(stream, 0)?)
  };
  stream.skip(";")?;

  let post = if stream.peek_is(")") {
    None
  } else {
    Some(parse_expr(stream, 0)?)
  };
  stream.skip(")")?;

  let body = Box::new(parse_statement(stream)?);
  Ok(Statement::For {
    label: None,
    init,
    cond,
    post,
    body,
  })
}

// ----- Expression parsing -----

/// How an infix lexeme combines a left operand with what follows.
enum Infix {
  Assign,
  Compound(BinaryOp),
  Ternary,
  Binary(BinaryOp),
}

/// The operator table: infix role and binding power (higher binds tighter).
fn infix_op(text: &str) -> Option<(Infix, u16)> {
  use BinaryOp::*;
  let entry = match text {
    "*" => (Infix::Binary(Multiply), 500),
    "/" => (Infix::Binary(Divide), 500),
    "%" => (Infix::Binary(Remainder), 500),
    "+" => (Infix::Binary(Add), 450),
    "-" => (Infix::Binary(Subtract), 450),
    "<<" => (Infix::Binary(ShiftLeft), 400),
    ">>" => (Infix::Binary(ShiftRight), 400),
    "<" => (Infix::Binary(Less), 370),
    "<=" => (Infix::Binary(LessEqual), 370),
    ">" => (Infix::Binary(Greater), 370),
    ">=" => (Infix::Binary(GreaterEqual), 370),
    "==" => (Infix::Binary(Equal), 360),
    "!=" => (Infix::Binary(NotEqual), 360),
    "&" => (Infix::Binary(BitAnd), 350),
    "^" => (Infix::Binary(BitXor), 325),
    "|" => (Infix::Binary(BitOr), 300),
    "&&" => (Infix::Binary(And), 290),
    "||" => (Infix::Binary(Or), 280),
    "?" => (Infix::Ternary, 50),
    "=" => (Infix::Assign, 1),
    "+=" => (Infix::Compound(Add), 1),
    "-=" => (Infix::Compound(Subtract), 1),
    "*=" => (Infix::Compound(Multiply), 1),
    "/=" => (Infix::Compound(Divide), 1),
    "%=" => (Infix::Compound(Remainder), 1),
    "&=" => (Infix::Compound(BitAnd), 1),
    "|=" => (Infix::Compound(BitOr), 1),
    "^=" => (Infix::Compound(BitXor), 1),
    "<<=" => (Infix::Compound(ShiftLeft), 1),
    ">>=" => (Infix::Compound(ShiftRight), 1),
    _ => return None,
  };
  Some(entry)
}

/// Precedence climbing: combine factors with any infix operator binding at
/// least as tightly as `min_prec`.
fn parse_expr(stream: &mut TokenStream, min_prec: u16) -> Result<Expr, ParseError> {
  let mut lhs = parse_factor(stream)?;

  while let Some((op, prec)) = stream.peek_punctuator().and_then(infix_op) {
    if prec < min_prec {
      break;
    }
    stream.advance();
    lhs = match op {
      // right-associative: recurse at the same level
      Infix::Assign => {
        let rhs = parse_expr(stream, prec)?;
        Expr::assignment(lhs, rhs)
      }
      Infix::Compound(base) => {
        let rhs = parse_expr(stream, prec)?;
        Expr::compound_assignment(base, lhs, rhs)
      }
      Infix::Ternary => {
        // the middle operand is bracketed by `?` and `:`, so it restarts
        let then = parse_expr(stream, 0)?;
        stream.skip(":")?;
        let otherwise = parse_expr(stream, prec)?;
        Expr::conditional(lhs, then, otherwise)
      }
      // left-associative: recurse one level tighter
      Infix::Binary(op) => {
        let rhs = parse_expr(stream, prec + 1)?;
        Expr::binary(op, lhs, rhs)
      }
    };
  }

  Ok(lhs)
}

fn parse_factor(stream: &mut TokenStream) -> Result<Expr, ParseError> {
  let node = parse_prefix(stream)?;

  // postfix ++/-- binds immediately after a factor, at most once
  if stream.equal("++") {
    return Ok(Expr::postfix(IncDec::Increment, node));
  }
  if stream.equal("--") {
    return Ok(Expr::postfix(IncDec::Decrement, node));
  }
  Ok(node)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
  if stream.equal("~") {
    return Ok(Expr::unary(UnaryOp::Complement, parse_factor(stream)?));
  }
  if stream.equal("-") {
    return Ok(Expr::unary(UnaryOp::Negate, parse_factor(stream)?));
  }
  if stream.equal("!") {
    return Ok(Expr::unary(UnaryOp::Not, parse_factor(stream)?));
  }
  if stream.equal("+") {
    // unary plus is a no-op
    return parse_factor(stream);
  }
  if stream.equal("++") {
    return Ok(Expr::prefix(IncDec::Increment, parse_factor(stream)?));
  }
  if stream.equal("--") {
    return Ok(Expr::prefix(IncDec::Decrement, parse_factor(stream)?));
  }
  if stream.equal("(") {
    let expr = parse_expr(stream, 0)?;
    stream.skip(")")?;
    return Ok(expr);
  }

  match stream.peek().map(|token| token.kind) {
    Some(TokenKind::Ident) => {
      let name = stream.get_ident()?;
      Ok(Expr::Var(name))
    }
    Some(TokenKind::Num) => {
      let value = stream.get_number()?;
      Ok(Expr::Constant(value))
    }
    _ => Err(stream.unexpected("an expression")),
  }
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser advances `pos` as it
  /// consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn advance(&mut self) {
    self.pos += 1;
  }

  fn peek_is(&self, symbol: &str) -> bool {
    self
      .peek()
      .filter(|token| {
        matches!(token.kind, TokenKind::Punctuator | TokenKind::Keyword)
          && token_text(token, self.source) == symbol
      })
      .is_some()
  }

  fn peek_keyword(&self) -> Option<&'a str> {
    let token = self.peek()?;
    if token.kind == TokenKind::Keyword {
      Some(token_text(token, self.source))
    } else {
      None
    }
  }

  fn peek_punctuator(&self) -> Option<&'a str> {
    let token = self.peek()?;
    if token.kind == TokenKind::Punctuator {
      Some(token_text(token, self.source))
    } else {
      None
    }
  }

  /// Consume the current token if it matches the given lexeme.
  fn equal(&mut self, symbol: &str) -> bool {
    if self.peek_is(symbol) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, symbol: &str) -> Result<(), ParseError> {
    if self.equal(symbol) {
      Ok(())
    } else {
      Err(self.unexpected(format!("\"{symbol}\"")))
    }
  }

  /// Parse the current token as an integer literal.
  fn get_number(&mut self) -> Result<i64, ParseError> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
      && let Some(value) = token.value
    {
      self.pos += 1;
      return Ok(value);
    }
    Err(self.unexpected("a number"))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> Result<String, ParseError> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
    {
      let text = token_text(token, self.source).to_string();
      self.pos += 1;
      return Ok(text);
    }
    Err(self.unexpected("an identifier"))
  }

  fn is_eof(&self) -> bool {
    matches!(
      self.peek().map(|token| token.kind),
      None | Some(TokenKind::Eof)
    )
  }

  /// Every token must have been consumed once the function body closes.
  fn expect_eof(&self) -> Result<(), ParseError> {
    if self.is_eof() {
      Ok(())
    } else {
      Err(self.unexpected("end of input"))
    }
  }

  fn unexpected(&self, expected: impl Into<String>) -> ParseError {
    match self.peek() {
      Some(token) if token.kind != TokenKind::Eof => ParseError::Unexpected {
        found: describe_token(Some(token), self.source),
        expected: expected.into(),
        line: token.line,
      },
      _ => ParseError::UnexpectedEof {
        expected: expected.into(),
      },
    }
  }
}
