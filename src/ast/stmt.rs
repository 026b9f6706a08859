// Carbon Statement AST Nodes

use super::decl::{ConstNode, VarNode};
use super::expr::Expr;
use crate::error::Span;

/// A local variable visible in a block, with its declaration site
#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: String,
    pub span: Span,
}

/// `{ statements }`. Owns its statements, and records every variable and
/// constant declared directly inside it.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub local_vars: Vec<LocalVar>,
    pub local_consts: Vec<ConstNode>,
    pub span: Span,
}

impl Block {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn find_local(&self, name: &str) -> Option<&LocalVar> {
        self.local_vars.iter().find(|v| v.name == name)
    }

    /// Whether a `break` targets the enclosing loop from inside this block.
    /// Nested loops and switches own their own breaks.
    pub fn has_break(&self) -> bool {
        self.statements.iter().any(Stmt::has_break)
    }
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// `None` for `default:`
    pub value: Option<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Var(VarNode),
    If {
        cond: Expr,
        body: Block,
        else_body: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    /// `for (init; cond; step)`, the init variable lives in the body's scope
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Block,
    },
    /// `for (var x : iterable)`
    Foreach {
        var: VarNode,
        iterable: Expr,
        body: Block,
    },
    Switch {
        value: Expr,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn expr(expr: Expr) -> Self {
        let span = expr.span;
        Self::new(StmtKind::Expr(expr), span)
    }

    fn has_break(&self) -> bool {
        match &self.kind {
            StmtKind::Break => true,
            StmtKind::If { body, else_body, .. } => {
                body.has_break() || else_body.as_ref().map(Block::has_break).unwrap_or(false)
            }
            _ => false,
        }
    }
}
