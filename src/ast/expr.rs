// Carbon Expression AST Nodes

use crate::builtins::{BuiltinFunction, BuiltinType};
use crate::compiler::Bytecode;
use crate::error::Span;
use crate::lexer::TokenKind;
use crate::vm::ops::Operator;
use crate::vm::value::Value;
use std::rc::Rc;

/// Operators as written in source, including the assignment family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    // Assignment
    Eq,
    PlusEq,
    MinusEq,
    MulEq,
    DivEq,
    ModEq,
    LShiftEq,
    RShiftEq,
    AndEq,
    XorEq,
    OrEq,

    // Binary
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    BitLShift,
    BitRShift,
    BitAnd,
    BitOr,
    BitXor,

    // Unary
    Not,
    BitNot,
    Positive,
    Negative,
}

impl OpType {
    pub fn from_assign_token(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Equal => Some(OpType::Eq),
            TokenKind::PlusEqual => Some(OpType::PlusEq),
            TokenKind::MinusEqual => Some(OpType::MinusEq),
            TokenKind::StarEqual => Some(OpType::MulEq),
            TokenKind::SlashEqual => Some(OpType::DivEq),
            TokenKind::PercentEqual => Some(OpType::ModEq),
            TokenKind::LessLessEqual => Some(OpType::LShiftEq),
            TokenKind::GreaterGreaterEqual => Some(OpType::RShiftEq),
            TokenKind::AmpersandEqual => Some(OpType::AndEq),
            TokenKind::CaretEqual => Some(OpType::XorEq),
            TokenKind::PipeEqual => Some(OpType::OrEq),
            _ => None,
        }
    }

    pub fn from_unary_token(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Bang => Some(OpType::Not),
            TokenKind::Tilde => Some(OpType::BitNot),
            TokenKind::Plus => Some(OpType::Positive),
            TokenKind::Minus => Some(OpType::Negative),
            _ => None,
        }
    }

    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            OpType::Eq
                | OpType::PlusEq
                | OpType::MinusEq
                | OpType::MulEq
                | OpType::DivEq
                | OpType::ModEq
                | OpType::LShiftEq
                | OpType::RShiftEq
                | OpType::AndEq
                | OpType::XorEq
                | OpType::OrEq
        )
    }

    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            OpType::Not | OpType::BitNot | OpType::Positive | OpType::Negative
        )
    }

    /// The runtime operator. Compound assignments map to their arithmetic part,
    /// plain `=` has none.
    pub fn to_operator(&self) -> Option<Operator> {
        let op = match self {
            OpType::Eq => return None,
            OpType::PlusEq | OpType::Plus => Operator::Addition,
            OpType::MinusEq | OpType::Minus => Operator::Subtraction,
            OpType::MulEq | OpType::Mul => Operator::Multiplication,
            OpType::DivEq | OpType::Div => Operator::Division,
            OpType::ModEq | OpType::Mod => Operator::Modulo,
            OpType::LShiftEq | OpType::BitLShift => Operator::BitLShift,
            OpType::RShiftEq | OpType::BitRShift => Operator::BitRShift,
            OpType::AndEq | OpType::BitAnd => Operator::BitAnd,
            OpType::XorEq | OpType::BitXor => Operator::BitXor,
            OpType::OrEq | OpType::BitOr => Operator::BitOr,
            OpType::EqEq => Operator::EqCheck,
            OpType::NotEq => Operator::NotEqCheck,
            OpType::Lt => Operator::Lt,
            OpType::LtEq => Operator::LtEq,
            OpType::Gt => Operator::Gt,
            OpType::GtEq => Operator::GtEq,
            OpType::And => Operator::And,
            OpType::Or => Operator::Or,
            OpType::Not => Operator::Not,
            OpType::BitNot => Operator::BitNot,
            OpType::Positive => Operator::Positive,
            OpType::Negative => Operator::Negative,
        };
        Some(op)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            OpType::Eq => "=",
            OpType::PlusEq => "+=",
            OpType::MinusEq => "-=",
            OpType::MulEq => "*=",
            OpType::DivEq => "/=",
            OpType::ModEq => "%=",
            OpType::LShiftEq => "<<=",
            OpType::RShiftEq => ">>=",
            OpType::AndEq => "&=",
            OpType::XorEq => "^=",
            OpType::OrEq => "|=",
            OpType::Plus | OpType::Positive => "+",
            OpType::Minus | OpType::Negative => "-",
            OpType::Mul => "*",
            OpType::Div => "/",
            OpType::Mod => "%",
            OpType::EqEq => "==",
            OpType::NotEq => "!=",
            OpType::Lt => "<",
            OpType::LtEq => "<=",
            OpType::Gt => ">",
            OpType::GtEq => ">=",
            OpType::And => "&&",
            OpType::Or => "||",
            OpType::BitLShift => "<<",
            OpType::BitRShift => ">>",
            OpType::BitAnd => "&",
            OpType::BitOr => "|",
            OpType::BitXor => "^",
            OpType::Not => "!",
            OpType::BitNot => "~",
        }
    }
}

/// Where a resolved member lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefBase {
    Unknown,
    Local,
    Native,
    Extern,
}

/// Enough of a function's signature to check a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncSig {
    pub base: RefBase,
    /// -1 when variadic
    pub arg_count: i32,
    pub default_count: i32,
    pub is_static: bool,
}

/// Declaration site of a local enum: the file (`None`) or a class index
#[derive(Debug, Clone)]
pub enum EnumRef {
    Local { class: Option<usize>, index: usize },
    Native { class: String, name: String },
    Extern { bytecode: Rc<Bytecode>, name: String },
}

/// What an identifier resolved to
#[derive(Debug, Clone)]
pub enum IdentRef {
    Unknown,
    Parameter(usize),
    LocalVar,
    LocalConst(Value),
    MemberVar(RefBase),
    StaticVar(RefBase),
    MemberConst(Value),
    EnumName(EnumRef),
    EnumValue(Value),
    Function(FuncSig),
    CarbonClass(usize),
    NativeClass(String),
    Extern(Rc<Bytecode>),
}

impl IdentRef {
    pub fn is_unknown(&self) -> bool {
        matches!(self, IdentRef::Unknown)
    }

    /// Folded value for constants and enum values
    pub fn const_value(&self) -> Option<&Value> {
        match self {
            IdentRef::LocalConst(v) | IdentRef::MemberConst(v) | IdentRef::EnumValue(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            IdentRef::Parameter(_)
                | IdentRef::LocalVar
                | IdentRef::MemberVar(_)
                | IdentRef::StaticVar(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
    pub ident_ref: IdentRef,
}

impl Identifier {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
            ident_ref: IdentRef::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Identifier(Identifier),
    /// A literal, or anything the analyzer folded into one
    Const(Value),
    Array(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    This,
    Super,
    BuiltinFunc(BuiltinFunction),
    BuiltinType(BuiltinType),
    /// `f(x)` has no base; `a.f(x)` has both; `expr(x)`, `this(x)`, `super(x)`,
    /// `print(x)` and `int(x)` have a base and no method
    Call {
        base: Option<Box<Expr>>,
        method: Option<Identifier>,
        args: Vec<Expr>,
    },
    /// `base.member`
    Index {
        base: Box<Expr>,
        member: Identifier,
    },
    /// `base[key]`
    MappedIndex {
        base: Box<Expr>,
        key: Box<Expr>,
    },
    Operator {
        op: OpType,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Set once the analyzer has visited this node
    pub reduced: bool,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            reduced: false,
        }
    }

    pub fn constant(value: Value, span: Span) -> Self {
        Self {
            kind: ExprKind::Const(value),
            span,
            reduced: true,
        }
    }

    pub fn identifier(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Identifier(Identifier::new(name, span)), span)
    }

    pub fn as_const(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self.kind, ExprKind::Const(_))
    }

    /// A bare `super(...)` call
    pub fn is_super_call(&self) -> bool {
        matches!(
            &self.kind,
            ExprKind::Call { base: Some(base), method: None, .. }
                if matches!(base.kind, ExprKind::Super)
        )
    }

    /// Call to `__assert`, `__func`, `__line` or `__file`
    pub fn is_compiletime_call(&self) -> bool {
        matches!(
            &self.kind,
            ExprKind::Call { base: Some(base), method: None, .. }
                if matches!(base.kind, ExprKind::BuiltinFunc(f) if f.is_compiletime())
        )
    }
}

impl Default for Expr {
    fn default() -> Self {
        Expr::constant(Value::Null, Span::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_assignment_maps_to_operator() {
        assert_eq!(OpType::PlusEq.to_operator(), Some(Operator::Addition));
        assert_eq!(OpType::Eq.to_operator(), None);
        assert!(OpType::XorEq.is_assignment());
        assert!(!OpType::Lt.is_assignment());
    }

    #[test]
    fn test_super_call_shape() {
        let span = Span::default();
        let call = Expr::new(
            ExprKind::Call {
                base: Some(Box::new(Expr::new(ExprKind::Super, span))),
                method: None,
                args: vec![],
            },
            span,
        );
        assert!(call.is_super_call());
        let method_call = Expr::new(
            ExprKind::Call {
                base: Some(Box::new(Expr::new(ExprKind::Super, span))),
                method: Some(Identifier::new("f", span)),
                args: vec![],
            },
            span,
        );
        assert!(!method_call.is_super_call());
    }
}
