//! Three-address code: the linear IR between the AST and assembly.
//!
//! Expressions lower post-order into fresh temporaries; control flow
//! (including `&&`, `||` and `?:`, which are jumps rather than operators)
//! lowers into labels and conditional jumps. Emission is infallible: the
//! resolver has already rejected everything this stage cannot express.

use crate::parser::{self, Block, BlockItem, Declaration, Expr, ForInit, Statement};
pub use crate::parser::UnaryOp;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Binary operators at the TAC level. The short-circuit forms are gone by
/// construction.
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
  Equal,
  NotEqual,
  Less,
  LessEqual,
  Greater,
  GreaterEqual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
  Constant(i64),
  Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
  Return(Value),
  Unary {
    op: UnaryOp,
    src: Value,
    dst: Value,
  },
  Binary {
    op: BinaryOp,
    src1: Value,
    src2: Value,
    dst: Value,
  },
  Copy {
    src: Value,
    dst: Value,
  },
  Jump(String),
  JumpIfZero {
    cond: Value,
    target: String,
  },
  JumpIfNotZero {
    cond: Value,
    target: String,
  },
  Label(String),
}

#[derive(Debug)]
pub struct Function {
  pub name: String,
  pub instructions: Vec<Instruction>,
}

#[derive(Debug)]
pub struct Program {
  pub function: Function,
}

/// Lower a resolved program. The body always ends in a `Return`, and every
/// remaining label is the target of at least one jump.
pub fn emit(program: &parser::Program) -> Program {
  let mut emitter = Emitter::new();
  emitter.emit_block(&program.function.body);
  if !matches!(emitter.instructions.last(), Some(Instruction::Return(_))) {
    emitter.emit(Instruction::Return(Value::Constant(0)));
  }
  let instructions = prune_unreferenced_labels(emitter.instructions);
  Program {
    function: Function {
      name: program.function.name.clone(),
      instructions,
    },
  }
}

/// Labels are no-ops; dropping the ones nothing jumps to keeps the listing
/// tight (a loop body without `continue` never targets its continue label).
fn prune_unreferenced_labels(instructions: Vec<Instruction>) -> Vec<Instruction> {
  let referenced: HashSet<String> = instructions
    .iter()
    .filter_map(|instr| match instr {
      Instruction::Jump(target)
      | Instruction::JumpIfZero { target, .. }
      | Instruction::JumpIfNotZero { target, .. } => Some(target.clone()),
      _ => None,
    })
    .collect();
  instructions
    .into_iter()
    .filter(|instr| match instr {
      Instruction::Label(name) => referenced.contains(name),
      _ => true,
    })
    .collect()
}

struct Emitter {
  instructions: Vec<Instruction>,
  tmp_count: usize,
  label_counts: HashMap<String, usize>,
}

impl Emitter {
  fn new() -> Self {
    Self {
      instructions: Vec::new(),
      tmp_count: 0,
      label_counts: HashMap::new(),
    }
  }

  fn emit(&mut self, instr: Instruction) {
    self.instructions.push(instr);
  }

  fn new_tmp(&mut self) -> Value {
    let n = self.tmp_count;
    self.tmp_count += 1;
    Value::Var(format!("tmp.{n}"))
  }

  fn new_label(&mut self, base: &str) -> String {
    let count = self.label_counts.entry(base.to_string()).or_insert(0);
    let label = format!("{base}.{count}");
    *count += 1;
    label
  }

  fn emit_block(&mut self, block: &Block) {
    for item in &block.0 {
      match item {
        BlockItem::Decl(decl) => self.emit_declaration(decl),
        BlockItem::Stmt(stmt) => self.emit_statement(stmt),
      }
    }
  }

  fn emit_declaration(&mut self, decl: &Declaration) {
    if let Some(init) = &decl.init {
      let value = self.emit_expr(init);
      self.emit(Instruction::Copy {
        src: value,
        dst: Value::Var(decl.name.clone()),
      });
    }
  }

  fn emit_statement(&mut self, stmt: &Statement) {
    match stmt {
      Statement::Return(expr) => {
        let value = self.emit_expr(expr);
        self.emit(Instruction::Return(value));
      }
      Statement::Expression(expr) => {
        self.emit_expr(expr);
      }
      Statement::Null => {}
      Statement::If {
        cond,
        then,
        otherwise: None,
      } => {
        let end = self.new_label("if_end");
        let cond = self.emit_expr(cond);
        self.emit(Instruction::JumpIfZero {
          cond,
          target: end.clone(),
        });
        self.emit_statement(then);
        self.emit(Instruction::Label(end));
      }
      Statement::If {
        cond,
        then,
        otherwise: Some(otherwise),
      } => {
        let else_label = self.new_label("if_else");
        let end = self.new_label("if_end");
        let cond = self.emit_expr(cond);
        self.emit(Instruction::JumpIfZero {
          cond,
          target: else_label.clone(),
        });
        self.emit_statement(then);
        self.emit(Instruction::Jump(end.clone()));
        self.emit(Instruction::Label(else_label));
        self.emit_statement(otherwise);
        self.emit(Instruction::Label(end));
      }
      Statement::Compound(block) => self.emit_block(block),
      Statement::While { label, cond, body } => {
        let label = loop_label(label);
        let continue_label = format!("{label}.continue");
        let break_label = format!("{label}.break");
        self.emit(Instruction::Label(continue_label.clone()));
        let cond = self.emit_expr(cond);
        self.emit(Instruction::JumpIfZero {
          cond,
          target: break_label.clone(),
        });
        self.emit_statement(body);
        self.emit(Instruction::Jump(continue_label));
        self.emit(Instruction::Label(break_label));
      }
      Statement::DoWhile { label, body, cond } => {
        let label = loop_label(label);
        let start = format!("{label}.start");
        let continue_label = format!("{label}.continue");
        let break_label = format!("{label}.break");
        self.emit(Instruction::Label(start.clone()));
        self.emit_statement(body);
        self.emit(Instruction::Label(continue_label));
        let cond = self.emit_expr(cond);
        self.emit(Instruction::JumpIfNotZero {
          cond,
          target: start,
        });
        self.emit(Instruction::Label(break_label));
      }
      Statement::For {
        label,
        init,
        cond,
        post,
        body,
      } => {
        let label = loop_label(label);
        let start = format!("{label}.start");
        let continue_label = format!("{label}.continue");
        let break_label = format!("{label}.break");
        match init {
          ForInit::Decl(decl) => self.emit_declaration(decl),
          ForInit::Expr(Some(expr)) => {
            self.emit_expr(expr);
          }
          ForInit::Expr(None) => {}
        }
        self.emit(Instruction::Label(start.clone()));
        if let Some(cond) = cond {
          let cond = self.emit_expr(cond);
          self.emit(Instruction::JumpIfZero {
            cond,
            target: break_label.clone(),
          });
        }
        self.emit_statement(body);
        self.emit(Instruction::Label(continue_label));
        if let Some(post) = post {
          self.emit_expr(post);
        }
        self.emit(Instruction::Jump(start));
        self.emit(Instruction::Label(break_label));
      }
      Statement::Break { label } => {
        self.emit(Instruction::Jump(format!("{}.break", loop_label(label))));
      }
      Statement::Continue { label } => {
        self.emit(Instruction::Jump(format!("{}.continue", loop_label(label))));
      }
    }
  }

  fn emit_expr(&mut self, expr: &Expr) -> Value {
    match expr {
      Expr::Constant(value) => Value::Constant(*value),
      Expr::Var(name) => Value::Var(name.clone()),
      Expr::Unary { op, expr } => {
        let src = self.emit_expr(expr);
        let dst = self.new_tmp();
        self.emit(Instruction::Unary {
          op: *op,
          src,
          dst: dst.clone(),
        });
        dst
      }
      Expr::Binary {
        op: parser::BinaryOp::And,
        lhs,
        rhs,
      } => self.emit_and(lhs, rhs),
      Expr::Binary {
        op: parser::BinaryOp::Or,
        lhs,
        rhs,
      } => self.emit_or(lhs, rhs),
      Expr::Binary { op, lhs, rhs } => {
        let src1 = self.emit_expr(lhs);
        let src2 = self.emit_expr(rhs);
        let dst = self.new_tmp();
        self.emit(Instruction::Binary {
          op: binary_op(*op),
          src1,
          src2,
          dst: dst.clone(),
        });
        dst
      }
      Expr::Assignment { lhs, rhs } => {
        let dst = self.emit_expr(lhs);
        let src = self.emit_expr(rhs);
        self.emit(Instruction::Copy {
          src,
          dst: dst.clone(),
        });
        dst
      }
      Expr::CompoundAssignment { op, lhs, rhs } => {
        let dst = self.emit_expr(lhs);
        let src2 = self.emit_expr(rhs);
        self.emit(Instruction::Binary {
          op: binary_op(*op),
          src1: dst.clone(),
          src2,
          dst: dst.clone(),
        });
        dst
      }
      Expr::Conditional {
        cond,
        then,
        otherwise,
      } => {
        let else_label = self.new_label("cond_else");
        let end = self.new_label("cond_end");
        let result = self.new_tmp();
        let cond = self.emit_expr(cond);
        self.emit(Instruction::JumpIfZero {
          cond,
          target: else_label.clone(),
        });
        let v1 = self.emit_expr(then);
        self.emit(Instruction::Copy {
          src: v1,
          dst: result.clone(),
        });
        self.emit(Instruction::Jump(end.clone()));
        self.emit(Instruction::Label(else_label));
        let v2 = self.emit_expr(otherwise);
        self.emit(Instruction::Copy {
          src: v2,
          dst: result.clone(),
        });
        self.emit(Instruction::Label(end));
        result
      }
      Expr::Prefix { op, expr } => {
        let var = self.emit_expr(expr);
        self.emit(Instruction::Binary {
          op: inc_dec_op(*op),
          src1: var.clone(),
          src2: Value::Constant(1),
          dst: var.clone(),
        });
        var
      }
      Expr::Postfix { op, expr } => {
        let var = self.emit_expr(expr);
        let original = self.new_tmp();
        self.emit(Instruction::Copy {
          src: var.clone(),
          dst: original.clone(),
        });
        self.emit(Instruction::Binary {
          op: inc_dec_op(*op),
          src1: var.clone(),
          src2: Value::Constant(1),
          dst: var,
        });
        original
      }
    }
  }

  /// `a && b` evaluates `b` only when `a` is non-zero.
  fn emit_and(&mut self, lhs: &Expr, rhs: &Expr) -> Value {
    let false_label = self.new_label("and_false");
    let end = self.new_label("and_end");
    let result = self.new_tmp();
    let v1 = self.emit_expr(lhs);
    self.emit(Instruction::JumpIfZero {
      cond: v1,
      target: false_label.clone(),
    });
    let v2 = self.emit_expr(rhs);
    self.emit(Instruction::JumpIfZero {
      cond: v2,
      target: false_label.clone(),
    });
    self.emit(Instruction::Copy {
      src: Value::Constant(1),
      dst: result.clone(),
    });
    self.emit(Instruction::Jump(end.clone()));
    self.emit(Instruction::Label(false_label));
    self.emit(Instruction::Copy {
      src: Value::Constant(0),
      dst: result.clone(),
    });
    self.emit(Instruction::Label(end));
    result
  }

  /// `a || b` evaluates `b` only when `a` is zero.
  fn emit_or(&mut self, lhs: &Expr, rhs: &Expr) -> Value {
    let true_label = self.new_label("or_true");
    let end = self.new_label("or_end");
    let result = self.new_tmp();
    let v1 = self.emit_expr(lhs);
    self.emit(Instruction::JumpIfNotZero {
      cond: v1,
      target: true_label.clone(),
    });
    let v2 = self.emit_expr(rhs);
    self.emit(Instruction::JumpIfNotZero {
      cond: v2,
      target: true_label.clone(),
    });
    self.emit(Instruction::Copy {
      src: Value::Constant(0),
      dst: result.clone(),
    });
    self.emit(Instruction::Jump(end.clone()));
    self.emit(Instruction::Label(true_label));
    self.emit(Instruction::Copy {
      src: Value::Constant(1),
      dst: result.clone(),
    });
    self.emit(Instruction::Label(end));
    result
  }
}

/// Loops are labeled by the resolver before this stage runs.
fn loop_label(label: &Option<String>) -> &str {
  label.as_deref().expect("resolver labels every loop")
}

fn binary_op(op: parser::BinaryOp) -> BinaryOp {
  match op {
    parser::BinaryOp::Add => BinaryOp::Add,
    parser::BinaryOp::Subtract => BinaryOp::Subtract,
    parser::BinaryOp::Multiply => BinaryOp::Multiply,
    parser::BinaryOp::Divide => BinaryOp::Divide,
    parser::BinaryOp::Remainder => BinaryOp::Remainder,
    parser::BinaryOp::ShiftLeft => BinaryOp::ShiftLeft,
    parser::BinaryOp::ShiftRight => BinaryOp::ShiftRight,
    parser::BinaryOp::BitAnd => BinaryOp::BitAnd,
    parser::BinaryOp::BitXor => BinaryOp::BitXor,
    parser::BinaryOp::BitOr => BinaryOp::BitOr,
    parser::BinaryOp::Equal => BinaryOp::Equal,
    parser::BinaryOp::NotEqual => BinaryOp::NotEqual,
    parser::BinaryOp::Less => BinaryOp::Less,
    parser::BinaryOp::LessEqual => BinaryOp::LessEqual,
    parser::BinaryOp::Greater => BinaryOp::Greater,
    parser::BinaryOp::GreaterEqual => BinaryOp::GreaterEqual,
    parser::BinaryOp::And | parser::BinaryOp::Or => {
      unreachable!("short-circuit operators lower to jumps")
    }
  }
}

fn inc_dec_op(op: parser::IncDec) -> BinaryOp {
  match op {
    parser::IncDec::Increment => BinaryOp::Add,
    parser::IncDec::Decrement => BinaryOp::Subtract,
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Constant(value) => write!(f, "{value}"),
      Value::Var(name) => write!(f, "{name}"),
    }
  }
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Instruction::Return(value) => write!(f, "  ret {value}"),
      Instruction::Unary { op, src, dst } => {
        let op = match op {
          UnaryOp::Complement => "~",
          UnaryOp::Negate => "-",
          UnaryOp::Not => "!",
        };
        write!(f, "  {dst} = {op}{src}")
      }
      Instruction::Binary {
        op,
        src1,
        src2,
        dst,
      } => {
        let op = match op {
          BinaryOp::Add => "+",
          BinaryOp::Subtract => "-",
          BinaryOp::Multiply => "*",
          BinaryOp::Divide => "/",
          BinaryOp::Remainder => "%",
          BinaryOp::ShiftLeft => "<<",
          BinaryOp::ShiftRight => ">>",
          BinaryOp::BitAnd => "&",
          BinaryOp::BitXor => "^",
          BinaryOp::BitOr => "|",
          BinaryOp::Equal => "==",
          BinaryOp::NotEqual => "!=",
          BinaryOp::Less => "<",
          BinaryOp::LessEqual => "<=",
          BinaryOp::Greater => ">",
          BinaryOp::GreaterEqual => ">=",
        };
        write!(f, "  {dst} = {src1} {op} {src2}")
      }
      Instruction::Copy { src, dst } => write!(f, "  {dst} = {src}"),
      Instruction::Jump(target) => write!(f, "  jump {target}"),
      Instruction::JumpIfZero { cond, target } => write!(f, "  jz {cond}, {target}"),
      Instruction::JumpIfNotZero { cond, target } => write!(f, "  jnz {cond}, {target}"),
      Instruction::Label(name) => write!(f, "{name}:"),
    }
  }
}
