//! Code generation: lower three-address code into AT&T x86-64 assembly.
//!
//! Three passes over an assembly IR: instruction selection keeps variable
//! references as pseudo operands and knows nothing about encoding;
//! pseudo replacement assigns every distinct pseudo a stack slot relative
//! to `%rbp`; legalization is the one pass that knows which operand
//! combinations x86-64 cannot encode and rewrites them through the scratch
//! registers `%r10d` and `%r11d` (shift counts go through `%cl`). Text
//! emission then prints the finished instruction list.

use crate::parser::UnaryOp as TackyUnaryOp;
use crate::tacky::{self, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
  Ax,
  Cx,
  Dx,
  R10,
  R11,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  Imm(i64),
  Reg(Register),
  Pseudo(String),
  Stack(i64),
}

impl Operand {
  fn is_mem(&self) -> bool {
    matches!(self, Operand::Stack(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mult,
  And,
  Or,
  Xor,
  Shl,
  Sar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
  E,
  Ne,
  L,
  Le,
  G,
  Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
  Mov { src: Operand, dst: Operand },
  MovB { src: Operand, dst: Operand },
  Unary { op: UnaryOp, operand: Operand },
  Binary { op: BinaryOp, src: Operand, dst: Operand },
  Idiv(Operand),
  Cdq,
  /// `cmpl src, dst` — AT&T order, flags reflect `dst - src`.
  Cmp { src: Operand, dst: Operand },
  Jmp(String),
  JmpCC { cc: CondCode, target: String },
  SetCC { cc: CondCode, operand: Operand },
  Label(String),
  AllocateStack(i64),
  Ret,
}

#[derive(Debug)]
pub struct Function {
  pub name: String,
  pub instructions: Vec<Instruction>,
}

/// Emit assembly text for a lowered program.
pub fn generate(program: &tacky::Program) -> String {
  let function = select_function(&program.function);
  let function = replace_pseudos(function);
  let function = legalize(function);
  emit_function(&function)
}

// ----- Pass A: instruction selection -----

fn operand(value: &Value) -> Operand {
  match value {
    Value::Constant(value) => Operand::Imm(*value),
    Value::Var(name) => Operand::Pseudo(name.clone()),
  }
}

fn select_function(function: &tacky::Function) -> Function {
  let mut instructions = Vec::new();
  for instr in &function.instructions {
    select_instruction(instr, &mut instructions);
  }
  Function {
    name: function.name.clone(),
    instructions,
  }
}

fn select_instruction(instr: &tacky::Instruction, out: &mut Vec<Instruction>) {
  match instr {
    tacky::Instruction::Return(value) => {
      out.push(Instruction::Mov {
        src: operand(value),
        dst: Operand::Reg(Register::Ax),
      });
      out.push(Instruction::Ret);
    }
    // logical not is a comparison against zero
    tacky::Instruction::Unary {
      op: TackyUnaryOp::Not,
      src,
      dst,
    } => {
      out.push(Instruction::Cmp {
        src: Operand::Imm(0),
        dst: operand(src),
      });
      out.push(Instruction::Mov {
        src: Operand::Imm(0),
        dst: operand(dst),
      });
      out.push(Instruction::SetCC {
        cc: CondCode::E,
        operand: operand(dst),
      });
    }
    tacky::Instruction::Unary { op, src, dst } => {
      out.push(Instruction::Mov {
        src: operand(src),
        dst: operand(dst),
      });
      out.push(Instruction::Unary {
        op: match op {
          TackyUnaryOp::Complement => UnaryOp::Not,
          TackyUnaryOp::Negate => UnaryOp::Neg,
          TackyUnaryOp::Not => unreachable!("handled above"),
        },
        operand: operand(dst),
      });
    }
    tacky::Instruction::Binary {
      op,
      src1,
      src2,
      dst,
    } => select_binary(*op, src1, src2, dst, out),
    tacky::Instruction::Copy { src, dst } => {
      out.push(Instruction::Mov {
        src: operand(src),
        dst: operand(dst),
      });
    }
    tacky::Instruction::Jump(target) => out.push(Instruction::Jmp(target.clone())),
    tacky::Instruction::JumpIfZero { cond, target } => {
      out.push(Instruction::Cmp {
        src: Operand::Imm(0),
        dst: operand(cond),
      });
      out.push(Instruction::JmpCC {
        cc: CondCode::E,
        target: target.clone(),
      });
    }
    tacky::Instruction::JumpIfNotZero { cond, target } => {
      out.push(Instruction::Cmp {
        src: Operand::Imm(0),
        dst: operand(cond),
      });
      out.push(Instruction::JmpCC {
        cc: CondCode::Ne,
        target: target.clone(),
      });
    }
    tacky::Instruction::Label(name) => out.push(Instruction::Label(name.clone())),
  }
}

fn select_binary(
  op: tacky::BinaryOp,
  src1: &Value,
  src2: &Value,
  dst: &Value,
  out: &mut Vec<Instruction>,
) {
  use tacky::BinaryOp as B;
  match op {
    // idivl takes the dividend in %edx:%eax; cdq sign-extends into %edx
    B::Divide | B::Remainder => {
      out.push(Instruction::Mov {
        src: operand(src1),
        dst: Operand::Reg(Register::Ax),
      });
      out.push(Instruction::Cdq);
      out.push(Instruction::Idiv(operand(src2)));
      let result = if op == B::Divide {
        Register::Ax
      } else {
        Register::Dx
      };
      out.push(Instruction::Mov {
        src: Operand::Reg(result),
        dst: operand(dst),
      });
    }
    B::Equal | B::NotEqual | B::Less | B::LessEqual | B::Greater | B::GreaterEqual => {
      // `cmpl s2, s1` computes s1 - s2, so the condition reads naturally
      out.push(Instruction::Cmp {
        src: operand(src2),
        dst: operand(src1),
      });
      out.push(Instruction::Mov {
        src: Operand::Imm(0),
        dst: operand(dst),
      });
      out.push(Instruction::SetCC {
        cc: cond_code(op),
        operand: operand(dst),
      });
    }
    B::Add | B::Subtract | B::Multiply | B::BitAnd | B::BitXor | B::BitOr | B::ShiftLeft
    | B::ShiftRight => {
      out.push(Instruction::Mov {
        src: operand(src1),
        dst: operand(dst),
      });
      out.push(Instruction::Binary {
        op: binary_op(op),
        src: operand(src2),
        dst: operand(dst),
      });
    }
  }
}

fn binary_op(op: tacky::BinaryOp) -> BinaryOp {
  use tacky::BinaryOp as B;
  match op {
    B::Add => BinaryOp::Add,
    B::Subtract => BinaryOp::Sub,
    B::Multiply => BinaryOp::Mult,
    B::BitAnd => BinaryOp::And,
    B::BitOr => BinaryOp::Or,
    B::BitXor => BinaryOp::Xor,
    B::ShiftLeft => BinaryOp::Shl,
    // arithmetic right shift: int is signed
    B::ShiftRight => BinaryOp::Sar,
    _ => unreachable!("not a plain binary instruction"),
  }
}

fn cond_code(op: tacky::BinaryOp) -> CondCode {
  use tacky::BinaryOp as B;
  match op {
    B::Equal => CondCode::E,
    B::NotEqual => CondCode::Ne,
    B::Less => CondCode::L,
    B::LessEqual => CondCode::Le,
    B::Greater => CondCode::G,
    B::GreaterEqual => CondCode::Ge,
    _ => unreachable!("not a relational instruction"),
  }
}

// ----- Pass B: pseudo replacement -----

fn replace_pseudos(function: Function) -> Function {
  let mut slots: HashMap<String, i64> = HashMap::new();
  let mut count = 0i64;
  let mut replace = |op: Operand| -> Operand {
    match op {
      Operand::Pseudo(name) => Operand::Stack(*slots.entry(name).or_insert_with(|| {
        count += 1;
        -4 * count
      })),
      other => other,
    }
  };

  let mut instructions: Vec<Instruction> = function
    .instructions
    .into_iter()
    .map(|instr| match instr {
      Instruction::Mov { src, dst } => Instruction::Mov {
        src: replace(src),
        dst: replace(dst),
      },
      Instruction::MovB { src, dst } => Instruction::MovB {
        src: replace(src),
        dst: replace(dst),
      },
      Instruction::Unary { op, operand } => Instruction::Unary {
        op,
        operand: replace(operand),
      },
      Instruction::Binary { op, src, dst } => Instruction::Binary {
        op,
        src: replace(src),
        dst: replace(dst),
      },
      Instruction::Idiv(operand) => Instruction::Idiv(replace(operand)),
      Instruction::Cmp { src, dst } => Instruction::Cmp {
        src: replace(src),
        dst: replace(dst),
      },
      Instruction::SetCC { cc, operand } => Instruction::SetCC {
        cc,
        operand: replace(operand),
      },
      other => other,
    })
    .collect();

  instructions.insert(0, Instruction::AllocateStack(4 * count));
  Function {
    name: function.name,
    instructions,
  }
}

// ----- Pass C: legalization -----

fn legalize(function: Function) -> Function {
  let mut out = Vec::with_capacity(function.instructions.len());
  for instr in function.instructions {
    match instr {
      // mov cannot take two memory operands
      Instruction::Mov { src, dst } if src.is_mem() && dst.is_mem() => {
        out.push(Instruction::Mov {
          src,
          dst: Operand::Reg(Register::R10),
        });
        out.push(Instruction::Mov {
          src: Operand::Reg(Register::R10),
          dst,
        });
      }
      // idiv cannot take an immediate
      Instruction::Idiv(Operand::Imm(value)) => {
        out.push(Instruction::Mov {
          src: Operand::Imm(value),
          dst: Operand::Reg(Register::R10),
        });
        out.push(Instruction::Idiv(Operand::Reg(Register::R10)));
      }
      // imul cannot write to memory
      Instruction::Binary {
        op: BinaryOp::Mult,
        src,
        dst,
      } if dst.is_mem() => {
        out.push(Instruction::Mov {
          src: dst.clone(),
          dst: Operand::Reg(Register::R11),
        });
        out.push(Instruction::Binary {
          op: BinaryOp::Mult,
          src,
          dst: Operand::Reg(Register::R11),
        });
        out.push(Instruction::Mov {
          src: Operand::Reg(Register::R11),
          dst,
        });
      }
      // a variable shift count must sit in %cl
      Instruction::Binary {
        op: op @ (BinaryOp::Shl | BinaryOp::Sar),
        src,
        dst,
      } if !matches!(src, Operand::Imm(_)) => {
        out.push(Instruction::MovB {
          src,
          dst: Operand::Reg(Register::Cx),
        });
        if dst.is_mem() {
          out.push(Instruction::Mov {
            src: dst.clone(),
            dst: Operand::Reg(Register::R10),
          });
          out.push(Instruction::Binary {
            op,
            src: Operand::Reg(Register::Cx),
            dst: Operand::Reg(Register::R10),
          });
          out.push(Instruction::Mov {
            src: Operand::Reg(Register::R10),
            dst,
          });
        } else {
          out.push(Instruction::Binary {
            op,
            src: Operand::Reg(Register::Cx),
            dst,
          });
        }
      }
      // the remaining two-operand forms take at most one memory operand
      Instruction::Binary { op, src, dst } if src.is_mem() && dst.is_mem() => {
        out.push(Instruction::Mov {
          src,
          dst: Operand::Reg(Register::R10),
        });
        out.push(Instruction::Binary {
          op,
          src: Operand::Reg(Register::R10),
          dst,
        });
      }
      // cmp takes at most one memory operand and no immediate destination
      Instruction::Cmp { src, dst } if src.is_mem() && dst.is_mem() => {
        out.push(Instruction::Mov {
          src,
          dst: Operand::Reg(Register::R10),
        });
        out.push(Instruction::Cmp {
          src: Operand::Reg(Register::R10),
          dst,
        });
      }
      Instruction::Cmp {
        src,
        dst: Operand::Imm(value),
      } => {
        out.push(Instruction::Mov {
          src: Operand::Imm(value),
          dst: Operand::Reg(Register::R11),
        });
        out.push(Instruction::Cmp {
          src,
          dst: Operand::Reg(Register::R11),
        });
      }
      other => out.push(other),
    }
  }
  Function {
    name: function.name,
    instructions: out,
  }
}

// ----- Pass D: text emission -----

fn symbol_name(name: &str) -> String {
  if cfg!(target_os = "macos") {
    format!("_{name}")
  } else {
    name.to_string()
  }
}

fn local_label(name: &str) -> String {
  if cfg!(target_os = "macos") {
    format!("L{name}")
  } else {
    format!(".L{name}")
  }
}

fn emit_function(function: &Function) -> String {
  let mut asm = String::new();
  let symbol = symbol_name(&function.name);
  asm.push_str(&format!("    .globl {symbol}\n"));
  asm.push_str(&format!("{symbol}:\n"));
  asm.push_str("    pushq %rbp\n");
  asm.push_str("    movq %rsp, %rbp\n");
  for instr in &function.instructions {
    emit_instruction(instr, &mut asm);
  }
  if cfg!(target_os = "linux") {
    asm.push_str("    .section .note.GNU-stack,\"\",@progbits\n");
  }
  asm
}

fn emit_instruction(instr: &Instruction, asm: &mut String) {
  match instr {
    Instruction::Mov { src, dst } => {
      asm.push_str(&format!("    movl {}, {}\n", show(src), show(dst)));
    }
    Instruction::MovB { src, dst } => {
      asm.push_str(&format!("    movb {}, {}\n", show_byte(src), show_byte(dst)));
    }
    Instruction::Unary { op, operand } => {
      let mnemonic = match op {
        UnaryOp::Neg => "negl",
        UnaryOp::Not => "notl",
      };
      asm.push_str(&format!("    {mnemonic} {}\n", show(operand)));
    }
    Instruction::Binary { op, src, dst } => {
      let mnemonic = match op {
        BinaryOp::Add => "addl",
        BinaryOp::Sub => "subl",
        BinaryOp::Mult => "imull",
        BinaryOp::And => "andl",
        BinaryOp::Or => "orl",
        BinaryOp::Xor => "xorl",
        BinaryOp::Shl => "sall",
        BinaryOp::Sar => "sarl",
      };
      // shift counts are a byte register (or an immediate)
      let src = match op {
        BinaryOp::Shl | BinaryOp::Sar => show_byte(src),
        _ => show(src),
      };
      asm.push_str(&format!("    {mnemonic} {src}, {}\n", show(dst)));
    }
    Instruction::Idiv(operand) => {
      asm.push_str(&format!("    idivl {}\n", show(operand)));
    }
    Instruction::Cdq => asm.push_str("    cdq\n"),
    Instruction::Cmp { src, dst } => {
      asm.push_str(&format!("    cmpl {}, {}\n", show(src), show(dst)));
    }
    Instruction::Jmp(target) => {
      asm.push_str(&format!("    jmp {}\n", local_label(target)));
    }
    Instruction::JmpCC { cc, target } => {
      asm.push_str(&format!("    j{} {}\n", cc_suffix(*cc), local_label(target)));
    }
    Instruction::SetCC { cc, operand } => {
      asm.push_str(&format!("    set{} {}\n", cc_suffix(*cc), show_byte(operand)));
    }
    Instruction::Label(name) => {
      asm.push_str(&format!("{}:\n", local_label(name)));
    }
    Instruction::AllocateStack(bytes) => {
      if *bytes > 0 {
        asm.push_str(&format!("    subq ${bytes}, %rsp\n"));
      }
    }
    Instruction::Ret => {
      asm.push_str("    movq %rbp, %rsp\n");
      asm.push_str("    popq %rbp\n");
      asm.push_str("    ret\n");
    }
  }
}

fn show(operand: &Operand) -> String {
  match operand {
    Operand::Imm(value) => format!("${value}"),
    Operand::Reg(Register::Ax) => "%eax".to_string(),
    Operand::Reg(Register::Cx) => "%ecx".to_string(),
    Operand::Reg(Register::Dx) => "%edx".to_string(),
    Operand::Reg(Register::R10) => "%r10d".to_string(),
    Operand::Reg(Register::R11) => "%r11d".to_string(),
    Operand::Stack(offset) => format!("{offset}(%rbp)"),
    Operand::Pseudo(name) => panic!("pseudo operand '{name}' survived replacement"),
  }
}

fn show_byte(operand: &Operand) -> String {
  match operand {
    Operand::Reg(Register::Ax) => "%al".to_string(),
    Operand::Reg(Register::Cx) => "%cl".to_string(),
    Operand::Reg(Register::Dx) => "%dl".to_string(),
    Operand::Reg(Register::R10) => "%r10b".to_string(),
    Operand::Reg(Register::R11) => "%r11b".to_string(),
    other => show(other),
  }
}

fn cc_suffix(cc: CondCode) -> &'static str {
  match cc {
    CondCode::E => "e",
    CondCode::Ne => "ne",
    CondCode::L => "l",
    CondCode::Le => "le",
    CondCode::G => "g",
    CondCode::Ge => "ge",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::resolver::resolve;
  use crate::tokenizer::tokenize;

  fn lower_to(source: &str, stage: fn(Function) -> Function) -> Function {
    let program = resolve(parse(tokenize(source).unwrap(), source).unwrap()).unwrap();
    stage(replace_pseudos(select_function(&tacky::emit(&program).function)))
  }

  fn operands(instr: &Instruction) -> Vec<&Operand> {
    match instr {
      Instruction::Mov { src, dst }
      | Instruction::MovB { src, dst }
      | Instruction::Binary { src, dst, .. }
      | Instruction::Cmp { src, dst } => vec![src, dst],
      Instruction::Unary { operand, .. }
      | Instruction::Idiv(operand)
      | Instruction::SetCC { operand, .. } => vec![operand],
      _ => Vec::new(),
    }
  }

  const BUSY_SOURCE: &str = "int main(void) {
    int a = 20;
    int b = 3;
    int c = a / b + a % b * (a * b);
    c = c << b >> 1 << 2;
    int d = (a & b) | (a ^ b);
    if (a < b || a >= c && !(b == 0)) d = -d;
    return d != 0 ? c : ~d;
  }";

  #[test]
  fn no_pseudo_survives_replacement() {
    let function = lower_to(BUSY_SOURCE, |f| f);
    for instr in &function.instructions {
      for op in operands(instr) {
        assert!(!matches!(op, Operand::Pseudo(_)), "pseudo in {instr:?}");
      }
    }
  }

  #[test]
  fn stack_allocation_covers_every_slot() {
    let function = lower_to("int main(void) { int a = 1; int b = 2; return a + b; }", |f| f);
    let Some(Instruction::AllocateStack(bytes)) = function.instructions.first() else {
      panic!("expected AllocateStack first");
    };
    let deepest = function
      .instructions
      .iter()
      .flat_map(|i| operands(i).into_iter().cloned().collect::<Vec<_>>())
      .filter_map(|op| match op {
        Operand::Stack(offset) => Some(-offset),
        _ => None,
      })
      .max()
      .unwrap();
    assert_eq!(*bytes, deepest);
  }

  #[test]
  fn legalized_code_respects_operand_forms() {
    let function = lower_to(BUSY_SOURCE, legalize);
    for instr in &function.instructions {
      match instr {
        Instruction::Mov { src, dst } => {
          assert!(!(src.is_mem() && dst.is_mem()), "mem-to-mem mov: {instr:?}");
        }
        Instruction::Cmp { src, dst } => {
          assert!(!(src.is_mem() && dst.is_mem()), "mem-to-mem cmp: {instr:?}");
          assert!(!matches!(dst, Operand::Imm(_)), "immediate cmp dst: {instr:?}");
        }
        Instruction::Idiv(operand) => {
          assert!(!matches!(operand, Operand::Imm(_)), "immediate idiv: {instr:?}");
        }
        Instruction::Binary {
          op: BinaryOp::Mult,
          dst,
          ..
        } => {
          assert!(!dst.is_mem(), "imul writing to memory: {instr:?}");
        }
        Instruction::Binary {
          op: BinaryOp::Shl | BinaryOp::Sar,
          src,
          ..
        } => {
          assert!(
            matches!(src, Operand::Imm(_) | Operand::Reg(Register::Cx)),
            "shift count outside %cl: {instr:?}"
          );
        }
        Instruction::Binary { src, dst, .. } => {
          assert!(!(src.is_mem() && dst.is_mem()), "mem-to-mem binary: {instr:?}");
        }
        _ => {}
      }
    }
  }

  #[test]
  fn relational_compare_uses_att_operand_order() {
    // a < b must become `cmpl <b>, <a>` followed by setl
    let source = "int main(void) { int a = 1; int b = 2; return a < b; }";
    let program = resolve(parse(tokenize(source).unwrap(), source).unwrap()).unwrap();
    let function = select_function(&tacky::emit(&program).function);
    let cmp = function
      .instructions
      .iter()
      .position(|i| matches!(i, Instruction::Cmp { src: Operand::Pseudo(s), .. } if s.starts_with("b.")))
      .expect("compare against b");
    assert!(matches!(
      &function.instructions[cmp],
      Instruction::Cmp { dst: Operand::Pseudo(d), .. } if d.starts_with("a.")
    ));
    assert!(function.instructions.iter().any(|i| matches!(
      i,
      Instruction::SetCC {
        cc: CondCode::L,
        ..
      }
    )));
  }

  #[test]
  fn return_two_moves_into_eax() {
    let source = "int main(void) { return 2; }";
    let program = resolve(parse(tokenize(source).unwrap(), source).unwrap()).unwrap();
    let asm = generate(&tacky::emit(&program));
    assert!(asm.contains("movl $2, %eax"));
    assert!(asm.contains("ret"));
    assert!(asm.contains("pushq %rbp"));
  }

  #[test]
  fn division_routes_through_eax_and_edx() {
    let source = "int main(void) { int a = 9; int b = a / 2; return a % (b + 1); }";
    let program = resolve(parse(tokenize(source).unwrap(), source).unwrap()).unwrap();
    let asm = generate(&tacky::emit(&program));
    assert!(asm.contains("cdq"));
    assert!(asm.contains("idivl"));
    assert!(!asm.contains("idivl $"));
  }

  #[test]
  fn shifts_with_variable_count_use_cl() {
    let source = "int main(void) { int a = 1; int b = 3; return a << b; }";
    let program = resolve(parse(tokenize(source).unwrap(), source).unwrap()).unwrap();
    let asm = generate(&tacky::emit(&program));
    assert!(asm.contains("movb"));
    assert!(asm.contains("sall %cl"));
  }
}
