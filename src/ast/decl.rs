// Carbon Declaration AST Nodes
// Files, classes, functions, variables, constants, enums and imports

use super::expr::Expr;
use super::stmt::Block;
use crate::compiler::Bytecode;
use crate::error::Span;
use crate::vm::value::Value;
use std::rc::Rc;

/// Progress marker for nodes resolved on demand (classes, constants, enum values).
/// Re-entering an `InProgress` node means a dependency cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReduceState {
    #[default]
    Pending,
    InProgress,
    Done,
}

#[derive(Debug, Clone)]
pub struct VarNode {
    pub name: String,
    pub span: Span,
    pub is_static: bool,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ConstNode {
    pub name: String,
    pub span: Span,
    /// Folds to `ExprKind::Const` once resolved
    pub value: Expr,
    pub state: ReduceState,
}

impl ConstNode {
    pub fn resolved(&self) -> Option<&Value> {
        match self.state {
            ReduceState::Done => self.value.as_const(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumValueNode {
    pub name: String,
    pub span: Span,
    pub expr: Option<Expr>,
    pub value: i64,
    pub state: ReduceState,
}

#[derive(Debug, Clone)]
pub struct EnumNode {
    /// Empty for the container's unnamed enum
    pub name: String,
    pub span: Span,
    pub values: Vec<EnumValueNode>,
}

impl EnumNode {
    pub fn find(&self, name: &str) -> Option<usize> {
        self.values.iter().position(|v| v.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ParamNode {
    pub name: String,
    pub span: Span,
    /// `name&`: writes are visible to the caller
    pub is_reference: bool,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct FunctionNode {
    pub name: String,
    pub span: Span,
    pub is_static: bool,
    pub is_constructor: bool,
    pub params: Vec<ParamNode>,
    /// Folded defaults of the trailing parameters, filled in by the analyzer
    pub default_args: Vec<Value>,
    pub body: Block,
}

impl FunctionNode {
    pub fn arg_count(&self) -> i32 {
        self.params.len() as i32
    }

    pub fn default_count(&self) -> i32 {
        self.params.iter().filter(|p| p.default.is_some()).count() as i32
    }

    pub fn find_param(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

/// Members shared by files and classes, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Members {
    pub vars: Vec<VarNode>,
    pub functions: Vec<FunctionNode>,
    pub constants: Vec<ConstNode>,
    pub enums: Vec<EnumNode>,
    pub unnamed_enum: Option<EnumNode>,
    /// `__assert(...)` and friends at declaration level
    pub compiletime_calls: Vec<Expr>,
}

impl Members {
    pub fn find_var(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| v.name == name)
    }

    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn find_constant(&self, name: &str) -> Option<usize> {
        self.constants.iter().position(|c| c.name == name)
    }

    pub fn find_enum(&self, name: &str) -> Option<usize> {
        self.enums.iter().position(|e| e.name == name)
    }

    /// Declaration site of any member named `name`
    pub fn declared_at(&self, name: &str) -> Option<Span> {
        if let Some(v) = self.vars.iter().find(|v| v.name == name) {
            return Some(v.span);
        }
        if let Some(f) = self.functions.iter().find(|f| f.name == name) {
            return Some(f.span);
        }
        if let Some(c) = self.constants.iter().find(|c| c.name == name) {
            return Some(c.span);
        }
        if let Some(e) = self.enums.iter().find(|e| e.name == name) {
            return Some(e.span);
        }
        self.unnamed_enum
            .as_ref()
            .and_then(|e| e.values.iter().find(|v| v.name == name))
            .map(|v| v.span)
    }
}

#[derive(Debug, Clone)]
pub enum ClassBase {
    None,
    /// Named in source, resolved by the analyzer to a sibling class or a native class
    Named(String),
    Local(usize),
    Native(String),
    /// `class A : alias.Base`
    Extern {
        alias: String,
        name: String,
        bytecode: Option<Rc<Bytecode>>,
    },
}

impl ClassBase {
    pub fn is_none(&self) -> bool {
        matches!(self, ClassBase::None)
    }
}

#[derive(Debug, Clone)]
pub struct ClassNode {
    pub name: String,
    pub span: Span,
    pub base: ClassBase,
    pub base_span: Span,
    pub members: Members,
    /// Index into `members.functions`
    pub constructor: Option<usize>,
    pub has_super_ctor_call: bool,
    pub state: ReduceState,
}

impl ClassNode {
    pub fn constructor(&self) -> Option<&FunctionNode> {
        self.constructor.map(|i| &self.members.functions[i])
    }
}

#[derive(Debug, Clone)]
pub struct ImportNode {
    pub alias: String,
    pub path: String,
    pub span: Span,
    /// Compiled by the driver before analysis
    pub bytecode: Option<Rc<Bytecode>>,
}

#[derive(Debug, Clone, Default)]
pub struct FileNode {
    pub path: String,
    pub members: Members,
    pub classes: Vec<ClassNode>,
    pub imports: Vec<ImportNode>,
}

impl FileNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn find_class(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name == name)
    }

    pub fn find_import(&self, alias: &str) -> Option<&ImportNode> {
        self.imports.iter().find(|i| i.alias == alias)
    }

    pub fn main_function(&self) -> Option<&FunctionNode> {
        self.members
            .find_function("main")
            .map(|i| &self.members.functions[i])
    }
}
