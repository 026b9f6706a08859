// Carbon Analyzer - Statements and Blocks

use super::{Analyzer, Container, Scope, VarContext};
use crate::ast::*;
use crate::error::{CarbonResult, ErrorKind, Span, WarningKind};
use crate::native::{BindData, MemberInfo};
use crate::vm::value::Value;

const STAND_ALONE: &str = "stand-alone expression has no effect.";
const UNREACHABLE: &str = "unreachable code.";
const NON_TERMINATING: &str = "non-terminating loop.";
const MISSED_ENUM: &str = "missed enum value in switch.";

impl Analyzer<'_> {
    /// Top level block of a function; a constructor may open it with `super(...)`
    pub(super) fn reduce_function_body(&mut self, body: &mut Block) -> CarbonResult<()> {
        let is_constructor = self.ctx.func.as_ref().is_some_and(|f| f.is_constructor);
        self.push_scope(body);
        let result = self.reduce_statements(body, is_constructor);
        self.pop_scope(body);
        result
    }

    pub(super) fn reduce_block(&mut self, block: &mut Block) -> CarbonResult<()> {
        self.push_scope(block);
        let result = self.reduce_statements(block, false);
        self.pop_scope(block);
        result
    }

    fn push_scope(&mut self, block: &mut Block) {
        self.ctx.scopes.push(Scope {
            vars: block.local_vars.clone(),
            consts: std::mem::take(&mut block.local_consts),
        });
    }

    fn pop_scope(&mut self, block: &mut Block) {
        if let Some(scope) = self.ctx.scopes.pop() {
            block.local_consts = scope.consts;
        }
    }

    /// Reduce the statements of the innermost scope's block, then drop dead code
    fn reduce_statements(&mut self, block: &mut Block, constructor_body: bool) -> CarbonResult<()> {
        let depth = self.ctx.scopes.len() - 1;
        for index in 0..self.ctx.scopes[depth].consts.len() {
            self.resolve_local_const(depth, index)?;
        }

        let statements = std::mem::take(&mut block.statements);
        let mut kept = Vec::with_capacity(statements.len());
        for (index, mut stmt) in statements.into_iter().enumerate() {
            self.super_call_allowed = constructor_body
                && index == 0
                && matches!(&stmt.kind, StmtKind::Expr(e) if e.is_super_call());
            let keep = self.reduce_statement(&mut stmt);
            self.super_call_allowed = false;
            if keep? {
                kept.push(stmt);
            }
        }
        block.statements = kept;

        self.remove_dead_code(block);
        Ok(())
    }

    /// Returns false when the statement should be dropped
    fn reduce_statement(&mut self, stmt: &mut Stmt) -> CarbonResult<bool> {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Expr(expr) => self.reduce_expr_statement(expr),
            StmtKind::Var(var) => {
                self.reduce_local_var(var)?;
                Ok(true)
            }
            StmtKind::If {
                cond,
                body,
                else_body,
            } => {
                self.reduce_expr(cond)?;
                self.reduce_block(body)?;
                if let Some(block) = else_body {
                    self.reduce_block(block)?;
                    if block.is_empty() {
                        *else_body = None;
                    }
                }
                Ok(true)
            }
            StmtKind::While { cond, body } => {
                self.reduce_expr(cond)?;
                self.reduce_block(body)?;
                match cond.as_const().map(Value::is_truthy) {
                    Some(false) => {
                        self.warn(WarningKind::UnreachableCode, UNREACHABLE, span);
                        Ok(false)
                    }
                    Some(true) if !body.has_break() => {
                        self.warn(WarningKind::NonTerminatingLoop, NON_TERMINATING, span);
                        Ok(true)
                    }
                    _ => Ok(true),
                }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push_scope(body);
                let result = self.reduce_for(init, cond, step, body);
                self.pop_scope(body);
                result?;
                if init.is_none() && cond.is_none() && step.is_none() && !body.has_break() {
                    self.warn(WarningKind::NonTerminatingLoop, NON_TERMINATING, span);
                }
                Ok(true)
            }
            StmtKind::Foreach {
                var: _,
                iterable,
                body,
            } => {
                self.push_scope(body);
                let result = self
                    .reduce_expr(iterable)
                    .and_then(|_| self.reduce_statements(body, false));
                self.pop_scope(body);
                result?;
                Ok(true)
            }
            StmtKind::Switch { value, cases } => {
                self.reduce_switch(value, cases, span)?;
                Ok(true)
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.reduce_expr(value)?;
                }
                Ok(true)
            }
            StmtKind::Break | StmtKind::Continue => Ok(true),
        }
    }

    fn reduce_expr_statement(&mut self, expr: &mut Expr) -> CarbonResult<bool> {
        match expr.kind {
            ExprKind::Identifier(_) => {
                self.reduce_expr(expr)?;
                self.warn(WarningKind::StandAloneExpression, STAND_ALONE, expr.span);
                Ok(false)
            }
            ExprKind::Const(_)
            | ExprKind::Array(_)
            | ExprKind::Map(_)
            | ExprKind::This
            | ExprKind::Super
            | ExprKind::BuiltinFunc(_)
            | ExprKind::BuiltinType(_) => {
                self.warn(WarningKind::StandAloneExpression, STAND_ALONE, expr.span);
                Ok(false)
            }
            _ => {
                let compiletime = expr.is_compiletime_call();
                self.reduce_expr(expr)?;
                if compiletime {
                    return Ok(false);
                }
                if expr.is_const() {
                    self.warn(WarningKind::StandAloneExpression, STAND_ALONE, expr.span);
                    return Ok(false);
                }
                Ok(true)
            }
        }
    }

    fn reduce_local_var(&mut self, var: &mut VarNode) -> CarbonResult<()> {
        let Some(init) = var.init.as_mut() else {
            return Ok(());
        };
        let saved = self.ctx.var.replace(VarContext {
            name: var.name.clone(),
            is_static: false,
        });
        let result = self.reduce_expr(init);
        self.ctx.var = saved;
        result
    }

    /// The loop body's scope is already pushed: the init variable lives in it
    fn reduce_for(
        &mut self,
        init: &mut Option<Box<Stmt>>,
        cond: &mut Option<Expr>,
        step: &mut Option<Expr>,
        body: &mut Block,
    ) -> CarbonResult<()> {
        if let Some(init) = init {
            match &mut init.kind {
                StmtKind::Var(var) => self.reduce_local_var(var)?,
                StmtKind::Expr(expr) => self.reduce_expr(expr)?,
                _ => {}
            }
        }
        if let Some(cond) = cond {
            self.reduce_expr(cond)?;
        }
        if let Some(step) = step {
            self.reduce_expr(step)?;
        }
        self.reduce_statements(body, false)
    }

    fn reduce_switch(&mut self, value: &mut Expr, cases: &mut [SwitchCase], span: Span) -> CarbonResult<()> {
        self.reduce_expr(value)?;

        // Enum coverage is judged on the case labels as written, before folding
        let mut coverage: Option<(String, usize)> = None;
        let mut covered = 0;
        let mut check_coverage = !cases.is_empty();
        let mut seen: Vec<(i64, usize)> = Vec::new();

        for case in cases.iter_mut() {
            match &case.value {
                None => check_coverage = false,
                Some(label) if check_coverage => match self.case_enum(label)? {
                    Some((key, total)) => match &coverage {
                        None => {
                            coverage = Some((key, total));
                            covered += 1;
                        }
                        Some((current, _)) if *current == key => covered += 1,
                        Some(_) => check_coverage = false,
                    },
                    None => check_coverage = false,
                },
                Some(_) => {}
            }

            if let Some(label) = &mut case.value {
                self.reduce_expr(label)?;
                let value = match label.as_const() {
                    Some(Value::Int(value)) => *value,
                    _ => {
                        return Err(self.error(
                            ErrorKind::TypeError,
                            "switch case value must be a constant integer.",
                            label.span,
                        ))
                    }
                };
                if let Some((_, line)) = seen.iter().find(|(v, _)| *v == value) {
                    return Err(self.error(
                        ErrorKind::TypeError,
                        format!("case value {} has already defined at line {}.", value, line),
                        label.span,
                    ));
                }
                seen.push((value, label.span.line()));
            }
            self.reduce_block(&mut case.body)?;
        }

        if let (true, Some((_, total))) = (check_coverage, &coverage) {
            if covered < *total {
                self.warn(WarningKind::MissedEnumInSwitch, MISSED_ENUM, span);
            }
        }
        Ok(())
    }

    /// Enum a case label belongs to, as an identity key and its value count
    fn case_enum(&mut self, label: &Expr) -> CarbonResult<Option<(String, usize)>> {
        match &label.kind {
            ExprKind::Index { base, .. } => {
                let ExprKind::Identifier(id) = &base.kind else {
                    return Ok(None);
                };
                let ident_ref = if id.ident_ref.is_unknown() {
                    self.resolve_identifier(&id.name, id.span)?
                } else {
                    id.ident_ref.clone()
                };
                match ident_ref {
                    IdentRef::EnumName(enum_ref) => Ok(self.enum_identity(&enum_ref)),
                    _ => Ok(None),
                }
            }
            ExprKind::Identifier(id) => {
                if !matches!(self.resolve_identifier(&id.name, id.span)?, IdentRef::EnumValue(_)) {
                    return Ok(None);
                }
                let containers = self
                    .ctx
                    .class
                    .map(Container::Class)
                    .into_iter()
                    .chain(std::iter::once(Container::File));
                for container in containers {
                    if let Some(node) = &self.members(container).unnamed_enum {
                        if node.find(&id.name).is_some() {
                            return Ok(Some((format!("{:?}", container), node.values.len())));
                        }
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn enum_identity(&self, enum_ref: &EnumRef) -> Option<(String, usize)> {
        match enum_ref {
            EnumRef::Local { class, index } => {
                let container = Container::of(*class);
                self.members(container)
                    .enums
                    .get(*index)
                    .map(|node| (format!("{:?}.{}", container, node.name), node.values.len()))
            }
            EnumRef::Native { class, name } => match self.natives.find_bind_data(class, name) {
                Some(BindData::Enum(info)) => Some((format!("{}.{}", class, name), info.values.len())),
                _ => None,
            },
            EnumRef::Extern { bytecode, name } => match bytecode.find_member_info(name) {
                Some(MemberInfo::Enum(info)) => Some((
                    format!("{}:{}.{}", bytecode.path(), bytecode.name(), name),
                    info.values.len(),
                )),
                _ => None,
            },
        }
    }

    /// Drop statements after a return and `if` blocks that can never run
    fn remove_dead_code(&mut self, block: &mut Block) {
        let mut index = 0;
        while index < block.statements.len() {
            match &block.statements[index].kind {
                StmtKind::Return(_) if index + 1 < block.statements.len() => {
                    let span = block.statements[index + 1].span;
                    self.warn(WarningKind::UnreachableCode, UNREACHABLE, span);
                    block.statements.truncate(index + 1);
                }
                StmtKind::If {
                    cond, else_body, ..
                } if cond.as_const().is_some_and(|c| !c.is_truthy()) => {
                    let span = block.statements[index].span;
                    let has_else = else_body.is_some();
                    self.warn(WarningKind::UnreachableCode, UNREACHABLE, span);
                    if !has_else {
                        block.statements.remove(index);
                        continue;
                    }
                }
                _ => {}
            }
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analyzer::Analyzer;
    use crate::ast::*;
    use crate::error::{CarbonResult, ErrorKind, Warning, WarningKind};
    use crate::lexer::Scanner;
    use crate::native::NativeClasses;
    use crate::parser::Parser;

    fn analyze(source: &str) -> CarbonResult<(FileNode, Vec<Warning>)> {
        let tokens = Scanner::new(source, "test.cb").scan_tokens().unwrap();
        let mut file = Parser::new(tokens, "test.cb", source).parse().unwrap();
        let natives = NativeClasses::new();
        let warnings = Analyzer::new(&mut file, &natives).analyze()?;
        Ok((file, warnings))
    }

    fn main_body(file: &FileNode) -> &Block {
        let index = file.members.find_function("main").unwrap();
        &file.members.functions[index].body
    }

    fn kinds(warnings: &[Warning]) -> Vec<WarningKind> {
        warnings.iter().map(|w| w.kind).collect()
    }

    #[test]
    fn test_stand_alone_expression() {
        let (file, warnings) = analyze("func main() { var x = 1; x; 3 + 4; }").unwrap();
        assert_eq!(
            kinds(&warnings),
            vec![
                WarningKind::StandAloneExpression,
                WarningKind::StandAloneExpression
            ]
        );
        assert_eq!(main_body(&file).statements.len(), 1);
    }

    #[test]
    fn test_false_branches_removed() {
        let (file, warnings) =
            analyze("func main() { if (false) { print(1); } while (false) { print(2); } return 0; }")
                .unwrap();
        assert_eq!(
            kinds(&warnings),
            vec![WarningKind::UnreachableCode, WarningKind::UnreachableCode]
        );
        let body = main_body(&file);
        assert_eq!(body.statements.len(), 1);
        assert!(matches!(body.statements[0].kind, StmtKind::Return(_)));
    }

    #[test]
    fn test_code_after_return() {
        let (file, warnings) = analyze("func main() { return 1; print(2); }").unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::UnreachableCode]);
        assert_eq!(main_body(&file).statements.len(), 1);
    }

    #[test]
    fn test_non_terminating_loops() {
        let (_, warnings) = analyze("func main() { while (true) { print(1); } }").unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::NonTerminatingLoop]);

        let (_, warnings) = analyze("func main() { for (;;) { break; } }").unwrap();
        assert!(warnings.is_empty());

        let (_, warnings) = analyze("func main() { for (;;) {} }").unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::NonTerminatingLoop]);
    }

    #[test]
    fn test_switch_cases() {
        let err = analyze("func main(x) { switch (x) { case 1: break; case 1: break; } }")
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert_eq!(err.message, "case value 1 has already defined at line 1.");

        let err = analyze("func main(x) { switch (x) { case x: break; } }")
            .err()
            .unwrap();
        assert_eq!(err.message, "switch case value must be a constant integer.");
    }

    #[test]
    fn test_missed_enum_value() {
        let source = "enum E { A, B, C } func main(x) { switch (x) { case E.A: break; case E.B: break; } }";
        let (_, warnings) = analyze(source).unwrap();
        assert_eq!(kinds(&warnings), vec![WarningKind::MissedEnumInSwitch]);

        let source = "enum E { A, B } func main(x) { switch (x) { case E.A: break; case E.B: break; } }";
        let (_, warnings) = analyze(source).unwrap();
        assert!(warnings.is_empty());

        let source = "enum E { A, B } func main(x) { switch (x) { case E.A: break; default: break; } }";
        let (_, warnings) = analyze(source).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_compiletime_statement_removed() {
        let (file, warnings) = analyze("func main() { __assert(true); return 0; }").unwrap();
        assert!(warnings.is_empty());
        assert_eq!(main_body(&file).statements.len(), 1);
    }

    #[test]
    fn test_empty_else_dropped() {
        let (file, _) = analyze("func main(x) { if (x) { print(1); } else { 1; } }").unwrap();
        let StmtKind::If { else_body, .. } = &main_body(&file).statements[0].kind else {
            panic!("expected if");
        };
        assert!(else_body.is_none());
    }
}
