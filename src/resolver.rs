//! Semantic analysis: variable resolution, lvalue checking and loop
//! labeling.
//!
//! The pass rewrites the tree rather than annotating it: every variable is
//! α-renamed to a globally unique name, and every loop (and the `break`/
//! `continue` statements under it) is stamped with a fresh label. Fresh
//! names use `.` as a separator, which cannot occur in a C identifier, so
//! generated names never collide with source names.

use crate::error::SemError;
use crate::parser::{Block, BlockItem, Declaration, Expr, ForInit, Function, Program, Statement};
use std::collections::HashMap;

/// Resolve a parsed program into an equivalent one upholding the naming and
/// labeling invariants the later stages rely on.
pub fn resolve(program: Program) -> Result<Program, SemError> {
  let mut resolver = Resolver::new();
  let function = resolver.resolve_function(program.function)?;
  Ok(Program { function })
}

struct Resolver {
  /// Per-base counters backing fresh-name generation.
  counters: HashMap<String, usize>,
  /// Scope stack: source name → unique name. Innermost scope last.
  scopes: Vec<HashMap<String, String>>,
  /// Labels of the loops currently being resolved. Innermost last.
  loops: Vec<String>,
  loop_count: usize,
}

impl Resolver {
  fn new() -> Self {
    Self {
      counters: HashMap::new(),
      scopes: Vec::new(),
      loops: Vec::new(),
      loop_count: 0,
    }
  }

  fn resolve_function(&mut self, function: Function) -> Result<Function, SemError> {
    self.scopes.push(HashMap::new());
    let body = self.resolve_block(function.body)?;
    self.scopes.pop();
    Ok(Function {
      name: function.name,
      body,
    })
  }

  fn resolve_block(&mut self, block: Block) -> Result<Block, SemError> {
    let Block(items) = block;
    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
      resolved.push(match item {
        BlockItem::Decl(decl) => BlockItem::Decl(self.resolve_declaration(decl)?),
        BlockItem::Stmt(stmt) => BlockItem::Stmt(self.resolve_statement(stmt)?),
      });
    }
    Ok(Block(resolved))
  }

  fn resolve_declaration(&mut self, decl: Declaration) -> Result<Declaration, SemError> {
    let name = self.declare(&decl.name)?;
    // the name is already in scope inside its own initializer
    let init = decl.init.map(|expr| self.resolve_expr(expr)).transpose()?;
    Ok(Declaration { name, init })
  }

  fn resolve_statement(&mut self, stmt: Statement) -> Result<Statement, SemError> {
    match stmt {
      Statement::Return(expr) => Ok(Statement::Return(self.resolve_expr(expr)?)),
      Statement::Expression(expr) => Ok(Statement::Expression(self.resolve_expr(expr)?)),
      Statement::Null => Ok(Statement::Null),
      Statement::If {
        cond,
        then,
        otherwise,
      } => {
        let cond = self.resolve_expr(cond)?;
        let then = Box::new(self.resolve_statement(*then)?);
        let otherwise = match otherwise {
          Some(stmt) => Some(Box::new(self.resolve_statement(*stmt)?)),
          None => None,
        };
        Ok(Statement::If {
          cond,
          then,
          otherwise,
        })
      }
      Statement::Compound(block) => {
        self.scopes.push(HashMap::new());
        let block = self.resolve_block(block)?;
        self.scopes.pop();
        Ok(Statement::Compound(block))
      }
      Statement::While { cond, body, .. } => {
        let cond = self.resolve_expr(cond)?;
        let label = self.enter_loop();
        let body = self.resolve_statement(*body)?;
        self.exit_loop();
        Ok(Statement::While {
          label: Some(label),
          cond,
          body: Box::new(body),
        })
      }
      Statement::DoWhile { body, cond, .. } => {
        let label = self.enter_loop();
        let body = self.resolve_statement(*body)?;
        self.exit_loop();
        let cond = self.resolve_expr(cond)?;
        Ok(Statement::DoWhile {
          label: Some(label),
          body: Box::new(body),
          cond,
        })
      }
      Statement::For {
        init,
        cond,
        post,
        body,
        ..
      } => {
        // a for-init declaration is visible through the whole statement
        self.scopes.push(HashMap::new());
        let init = match init {
          ForInit::Decl(decl) => ForInit::Decl(self.resolve_declaration(decl)?),
          ForInit::Expr(Some(expr)) => ForInit::Expr(Some(self.resolve_expr(expr)?)),
          ForInit::Expr(None) => ForInit::Expr(None),
        };
        let cond = cond.map(|expr| self.resolve_expr(expr)).transpose()?;
        let post = post.map(|expr| self.resolve_expr(expr)).transpose()?;
        let label = self.enter_loop();
        let body = self.resolve_statement(*body)?;
        self.exit_loop();
        self.scopes.pop();
        Ok(Statement::For {
          label: Some(label),
          init,
          cond,
          post,
          body: Box::new(body),
        })
      }
      Statement::Break { .. } => match self.loops.last() {
        Some(label) => Ok(Statement::Break {
          label: Some(label.clone()),
        }),
        None => Err(SemError::BreakOutsideLoop { keyword: "break" }),
      },
      Statement::Continue { .. } => match self.loops.last() {
        Some(label) => Ok(Statement::Continue {
          label: Some(label.clone()),
        }),
        None => Err(SemError::BreakOutsideLoop {
          keyword: "continue",
        }),
      },
    }
  }

  fn resolve_expr(&mut self, expr: Expr) -> Result<Expr, SemError> {
    match expr {
      Expr::Constant(value) => Ok(Expr::Constant(value)),
      Expr::Var(name) => Ok(Expr::Var(self.lookup(&name)?)),
      Expr::Unary { op, expr } => Ok(Expr::unary(op, self.resolve_expr(*expr)?)),
      Expr::Binary { op, lhs, rhs } => Ok(Expr::binary(
        op,
        self.resolve_expr(*lhs)?,
        self.resolve_expr(*rhs)?,
      )),
      Expr::Assignment { lhs, rhs } => {
        let lhs = Self::expect_lvalue(*lhs)?;
        Ok(Expr::assignment(
          self.resolve_expr(lhs)?,
          self.resolve_expr(*rhs)?,
        ))
      }
      Expr::CompoundAssignment { op, lhs, rhs } => {
        let lhs = Self::expect_lvalue(*lhs)?;
        Ok(Expr::compound_assignment(
          op,
          self.resolve_expr(lhs)?,
          self.resolve_expr(*rhs)?,
        ))
      }
      Expr::Conditional {
        cond,
        then,
        otherwise,
      } => Ok(Expr::conditional(
        self.resolve_expr(*cond)?,
        self.resolve_expr(*then)?,
        self.resolve_expr(*otherwise)?,
      )),
      Expr::Prefix { op, expr } => {
        let operand = Self::expect_lvalue(*expr)?;
        Ok(Expr::prefix(op, self.resolve_expr(operand)?))
      }
      Expr::Postfix { op, expr } => {
        let operand = Self::expect_lvalue(*expr)?;
        Ok(Expr::postfix(op, self.resolve_expr(operand)?))
      }
    }
  }

  /// Assignment targets and `++`/`--` operands must name a variable.
  fn expect_lvalue(expr: Expr) -> Result<Expr, SemError> {
    match expr {
      Expr::Var(_) => Ok(expr),
      _ => Err(SemError::InvalidLValue),
    }
  }

  /// Bind `name` in the innermost scope, rejecting same-block redeclaration.
  /// Shadowing an outer scope is fine.
  fn declare(&mut self, name: &str) -> Result<String, SemError> {
    if let Some(scope) = self.scopes.last()
      && scope.contains_key(name)
    {
      return Err(SemError::DuplicateDecl {
        name: name.to_string(),
      });
    }
    let fresh = self.fresh_name(name);
    if let Some(scope) = self.scopes.last_mut() {
      scope.insert(name.to_string(), fresh.clone());
    }
    Ok(fresh)
  }

  fn lookup(&self, name: &str) -> Result<String, SemError> {
    for scope in self.scopes.iter().rev() {
      if let Some(unique) = scope.get(name) {
        return Ok(unique.clone());
      }
    }
    Err(SemError::UndeclaredVar {
      name: name.to_string(),
    })
  }

  fn fresh_name(&mut self, base: &str) -> String {
    let count = self.counters.entry(base.to_string()).or_insert(0);
    let fresh = format!("{base}.{count}");
    *count += 1;
    fresh
  }

  fn enter_loop(&mut self) -> String {
    let label = format!("loop.{}", self.loop_count);
    self.loop_count += 1;
    self.loops.push(label.clone());
    label
  }

  fn exit_loop(&mut self) {
    self.loops.pop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn resolve_source(source: &str) -> Result<Program, SemError> {
    resolve(parse(tokenize(source).unwrap(), source).unwrap())
  }

  fn collect_var_names(block: &Block, out: &mut Vec<String>) {
    fn walk_expr(expr: &Expr, out: &mut Vec<String>) {
      match expr {
        Expr::Constant(_) => {}
        Expr::Var(name) => out.push(name.clone()),
        Expr::Unary { expr, .. } | Expr::Prefix { expr, .. } | Expr::Postfix { expr, .. } => {
          walk_expr(expr, out);
        }
        Expr::Binary { lhs, rhs, .. }
        | Expr::Assignment { lhs, rhs }
        | Expr::CompoundAssignment { lhs, rhs, .. } => {
          walk_expr(lhs, out);
          walk_expr(rhs, out);
        }
        Expr::Conditional {
          cond,
          then,
          otherwise,
        } => {
          walk_expr(cond, out);
          walk_expr(then, out);
          walk_expr(otherwise, out);
        }
      }
    }
    fn walk_stmt(stmt: &Statement, out: &mut Vec<String>) {
      match stmt {
        Statement::Return(expr) | Statement::Expression(expr) => walk_expr(expr, out),
        Statement::Null | Statement::Break { .. } | Statement::Continue { .. } => {}
        Statement::If {
          cond,
          then,
          otherwise,
        } => {
          walk_expr(cond, out);
          walk_stmt(then, out);
          if let Some(otherwise) = otherwise {
            walk_stmt(otherwise, out);
          }
        }
        Statement::Compound(block) => collect_var_names(block, out),
        Statement::While { cond, body, .. } => {
          walk_expr(cond, out);
          walk_stmt(body, out);
        }
        Statement::DoWhile { body, cond, .. } => {
          walk_stmt(body, out);
          walk_expr(cond, out);
        }
        Statement::For {
          init,
          cond,
          post,
          body,
          ..
        } => {
          match init {
            ForInit::Decl(decl) => {
              out.push(decl.name.clone());
              if let Some(expr) = &decl.init {
                walk_expr(expr, out);
              }
            }
            ForInit::Expr(Some(expr)) => walk_expr(expr, out),
            ForInit::Expr(None) => {}
          }
          if let Some(cond) = cond {
            walk_expr(cond, out);
          }
          if let Some(post) = post {
            walk_expr(post, out);
          }
          walk_stmt(body, out);
        }
      }
    }
    for item in &block.0 {
      match item {
        BlockItem::Decl(decl) => {
          out.push(decl.name.clone());
          if let Some(expr) = &decl.init {
            walk_expr(expr, out);
          }
        }
        BlockItem::Stmt(stmt) => walk_stmt(stmt, out),
      }
    }
  }

  #[test]
  fn shadowed_declarations_get_distinct_names() {
    let program =
      resolve_source("int main(void) { int x = 1; { int x = 2; x = 3; } return x; }").unwrap();
    let mut names = Vec::new();
    collect_var_names(&program.function.body, &mut names);
    // declarations: outer x.0, inner x.1; uses resolve to the nearest one
    assert_eq!(names, ["x.0", "x.1", "x.1", "x.0"]);
  }

  #[test]
  fn declaration_names_are_globally_unique() {
    let program = resolve_source(
      "int main(void) { int a = 1; { int a = 2; { int a = 3; a = a; } } return a; }",
    )
    .unwrap();
    let mut names = Vec::new();
    collect_var_names(&program.function.body, &mut names);
    // three declarations, three distinct fresh names
    assert!(["a.0", "a.1", "a.2"].iter().all(|n| names.iter().any(|m| m == n)));
  }

  #[test]
  fn same_block_redeclaration_is_rejected() {
    assert!(matches!(
      resolve_source("int main(void) { int x; int x; return 0; }"),
      Err(SemError::DuplicateDecl { name }) if name == "x"
    ));
  }

  #[test]
  fn use_before_declaration_is_rejected() {
    assert!(matches!(
      resolve_source("int main(void) { return x; }"),
      Err(SemError::UndeclaredVar { name }) if name == "x"
    ));
  }

  #[test]
  fn for_init_scope_ends_with_the_loop() {
    assert!(resolve_source("int main(void) { for (int i = 0; i < 3; i = i + 1) ; return i; }")
      .is_err());
    assert!(resolve_source(
      "int main(void) { int i = 9; for (int i = 0; i < 3; i = i + 1) ; return i; }"
    )
    .is_ok());
  }

  #[test]
  fn constants_are_not_assignable() {
    assert!(matches!(
      resolve_source("int main(void) { int x; 5 = x; return 0; }"),
      Err(SemError::InvalidLValue)
    ));
    assert!(matches!(
      resolve_source("int main(void) { int x = 0; (x + 1)++; return 0; }"),
      Err(SemError::InvalidLValue)
    ));
    assert!(matches!(
      resolve_source("int main(void) { int x = 0; x + 1 += 2; return 0; }"),
      Err(SemError::InvalidLValue)
    ));
  }

  #[test]
  fn break_and_continue_need_a_loop() {
    assert!(matches!(
      resolve_source("int main(void) { break; }"),
      Err(SemError::BreakOutsideLoop { keyword: "break" })
    ));
    assert!(matches!(
      resolve_source("int main(void) { if (1) continue; return 0; }"),
      Err(SemError::BreakOutsideLoop { keyword: "continue" })
    ));
  }

  #[test]
  fn nested_loops_label_break_with_the_innermost_loop() {
    let program = resolve_source(
      "int main(void) { while (1) { while (1) { break; } break; } return 0; }",
    )
    .unwrap();
    let Block(items) = &program.function.body;
    let Some(BlockItem::Stmt(Statement::While { label, body, .. })) = items.first() else {
      panic!("expected an outer while");
    };
    let outer_label = label.clone().unwrap();
    let Statement::Compound(Block(inner_items)) = body.as_ref() else {
      panic!("expected a compound body");
    };
    let Some(BlockItem::Stmt(Statement::While {
      label: inner_label,
      body: inner_body,
      ..
    })) = inner_items.first()
    else {
      panic!("expected an inner while");
    };
    let inner_label = inner_label.clone().unwrap();
    assert_ne!(outer_label, inner_label);

    let Statement::Compound(Block(innermost)) = inner_body.as_ref() else {
      panic!("expected a compound body");
    };
    assert!(matches!(
      innermost.first(),
      Some(BlockItem::Stmt(Statement::Break { label: Some(l) })) if *l == inner_label
    ));
    // the second break sits after the inner loop has been exited
    assert!(matches!(
      inner_items.get(1),
      Some(BlockItem::Stmt(Statement::Break { label: Some(l) })) if *l == outer_label
    ));
  }

  #[test]
  fn resolving_twice_preserves_structure() {
    let once = resolve_source("int main(void) { int a = 1; while (a < 3) a = a + 1; return a; }")
      .unwrap();
    let twice = resolve(once.clone()).unwrap();
    let (mut first, mut second) = (Vec::new(), Vec::new());
    collect_var_names(&once.function.body, &mut first);
    collect_var_names(&twice.function.body, &mut second);
    assert_eq!(first.len(), second.len());
  }
}
