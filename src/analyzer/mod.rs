// Carbon Analyzer
// Resolves identifiers, folds constants, checks call sites and strips dead
// code, rewriting the parsed file in place before code generation

mod block;
mod call;
mod expression;
mod identifier;

use crate::ast::*;
use crate::error::{CarbonError, CarbonResult, ErrorKind, Span, Warning, WarningKind};
use crate::native::{MemberInfo, NativeClasses};
use crate::vm::value::Value;
use tracing::{debug, trace};

/// Owner of a member list: the file itself or one of its classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Container {
    File,
    Class(usize),
}

impl Container {
    fn class(self) -> Option<usize> {
        match self {
            Container::File => None,
            Container::Class(index) => Some(index),
        }
    }

    fn of(class: Option<usize>) -> Container {
        class.map_or(Container::File, Container::Class)
    }
}

/// Location of an enum: named enums by index, `None` for the unnamed one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EnumLoc {
    container: Container,
    index: Option<usize>,
}

struct FuncContext {
    name: String,
    class_name: Option<String>,
    params: Vec<String>,
    is_static: bool,
    is_constructor: bool,
}

struct VarContext {
    name: String,
    is_static: bool,
}

/// Locals of one block. Constants are moved in for the duration of the block.
struct Scope {
    vars: Vec<LocalVar>,
    consts: Vec<ConstNode>,
}

/// Where the analyzer currently is
#[derive(Default)]
struct Context {
    class: Option<usize>,
    func: Option<FuncContext>,
    var: Option<VarContext>,
    enum_loc: Option<EnumLoc>,
    scopes: Vec<Scope>,
    /// Literal arrays and maps fold only inside constants, enum values and defaults
    const_expr: bool,
}

impl Context {
    fn member(container: Container) -> Self {
        Context {
            class: container.class(),
            ..Default::default()
        }
    }
}

pub struct Analyzer<'a> {
    file: &'a mut FileNode,
    natives: &'a NativeClasses,
    path: String,
    warnings: Vec<Warning>,
    ctx: Context,
    /// Set only while the leading `super(...)` statement of a constructor is reduced
    super_call_allowed: bool,
}

impl<'a> Analyzer<'a> {
    pub fn new(file: &'a mut FileNode, natives: &'a NativeClasses) -> Self {
        let path = file.path.clone();
        Self {
            file,
            natives,
            path,
            warnings: Vec::new(),
            ctx: Context::default(),
            super_call_allowed: false,
        }
    }

    pub fn analyze(mut self) -> CarbonResult<Vec<Warning>> {
        let class_count = self.file.classes.len();
        let containers: Vec<Container> = std::iter::once(Container::File)
            .chain((0..class_count).map(Container::Class))
            .collect();

        for class in 0..class_count {
            self.resolve_inheritance(class)?;
        }
        for &container in &containers {
            self.resolve_constants(container)?;
        }
        for &container in &containers {
            self.resolve_enums(container)?;
        }
        for &container in &containers {
            self.resolve_compiletime_calls(container)?;
        }
        for &container in &containers {
            self.reduce_var_initializers(container)?;
        }
        for &container in &containers {
            self.resolve_parameters(container)?;
        }
        for &container in &containers {
            let count = self.members(container).functions.len();
            for index in 0..count {
                self.reduce_function(container, index)?;
            }
        }
        for class in 0..class_count {
            self.add_default_constructor(class)?;
        }

        debug!(
            file = %self.path,
            classes = class_count,
            warnings = self.warnings.len(),
            "analysis finished"
        );
        Ok(self.warnings)
    }

    fn members(&self, container: Container) -> &Members {
        match container {
            Container::File => &self.file.members,
            Container::Class(index) => &self.file.classes[index].members,
        }
    }

    fn members_mut(&mut self, container: Container) -> &mut Members {
        match container {
            Container::File => &mut self.file.members,
            Container::Class(index) => &mut self.file.classes[index].members,
        }
    }

    /// Run `f` in a fresh context, restoring the current one afterwards even on error
    fn with_context<T>(
        &mut self,
        ctx: Context,
        f: impl FnOnce(&mut Self) -> CarbonResult<T>,
    ) -> CarbonResult<T> {
        let saved = std::mem::replace(&mut self.ctx, ctx);
        let result = f(self);
        self.ctx = saved;
        result
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>, span: Span) -> CarbonError {
        CarbonError::new(kind, message, span, &self.path)
    }

    /// Locate an error raised by the value layer at the expression that caused it
    fn rethrow(&self, err: CarbonError, span: Span) -> CarbonError {
        err.at(span, &self.path)
    }

    fn warn(&mut self, kind: WarningKind, message: &str, span: Span) {
        debug!(%kind, line = span.line(), "warning: {}", message);
        let warning = Warning::new(kind, message, span, &self.path);
        self.warnings.push(warning);
    }

    /// Static functions, static initializers and constant expressions
    fn in_static_context(&self) -> bool {
        match (&self.ctx.func, &self.ctx.var) {
            (Some(func), _) => func.is_static,
            (None, Some(var)) => var.is_static,
            (None, None) => true,
        }
    }

    fn check_arg_count(
        &self,
        arg_count: i32,
        default_count: i32,
        given: usize,
        span: Span,
    ) -> CarbonResult<()> {
        match crate::error::arg_count_mismatch(arg_count, default_count, given) {
            Some(message) => Err(self.error(ErrorKind::InvalidArgCount, message, span)),
            None => Ok(()),
        }
    }

    /// A folded literal, or an error at the expression
    fn constant_value(&self, expr: &Expr) -> CarbonResult<Value> {
        match expr.as_const() {
            Some(value) if value.is_literal() => Ok(value.clone()),
            _ => Err(self.error(
                ErrorKind::TypeError,
                "expected a constant expression.",
                expr.span,
            )),
        }
    }

    // Inheritance

    fn resolve_inheritance(&mut self, index: usize) -> CarbonResult<()> {
        let class = &self.file.classes[index];
        match class.state {
            ReduceState::Done => return Ok(()),
            ReduceState::InProgress => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    "cyclic inheritance. class inherits itself isn't allowed.",
                    class.span,
                ))
            }
            ReduceState::Pending => {}
        }

        self.file.classes[index].state = ReduceState::InProgress;
        let result = self.link_base(index);
        self.file.classes[index].state = match result {
            Ok(()) => ReduceState::Done,
            Err(_) => ReduceState::Pending,
        };
        result
    }

    fn link_base(&mut self, index: usize) -> CarbonResult<()> {
        let base = self.file.classes[index].base.clone();
        let base_span = self.file.classes[index].base_span;

        let resolved = match base {
            ClassBase::Named(name) => {
                if let Some(local) = self.file.find_class(&name) {
                    self.resolve_inheritance(local)?;
                    ClassBase::Local(local)
                } else if self.natives.is_class_registered(&name) {
                    ClassBase::Native(name)
                } else {
                    return Err(self.error(
                        ErrorKind::TypeError,
                        format!("base class \"{}\" not found.", name),
                        base_span,
                    ));
                }
            }
            ClassBase::Local(local) => {
                self.resolve_inheritance(local)?;
                ClassBase::Local(local)
            }
            ClassBase::Extern {
                alias,
                name,
                bytecode: None,
            } => {
                let file = self
                    .file
                    .find_import(&alias)
                    .and_then(|import| import.bytecode.clone())
                    .ok_or_else(|| {
                        self.error(
                            ErrorKind::NameError,
                            format!("identifier \"{}\" isn't defined.", alias),
                            base_span,
                        )
                    })?;
                let class = file.get_class(&name).ok_or_else(|| {
                    self.error(
                        ErrorKind::TypeError,
                        format!("base class \"{}.{}\" not found.", alias, name),
                        base_span,
                    )
                })?;
                ClassBase::Extern {
                    alias,
                    name,
                    bytecode: Some(class),
                }
            }
            other => other,
        };

        self.file.classes[index].base = resolved;
        self.check_member_shadowing(index)
    }

    /// A derived class may not redeclare a non-static attribute of any ancestor
    fn check_member_shadowing(&self, index: usize) -> CarbonResult<()> {
        let class = &self.file.classes[index];
        let own: Vec<&VarNode> = class.members.vars.iter().collect();
        let shadow_error = |var: &VarNode, base: &str| {
            self.error(
                ErrorKind::AttributeError,
                format!(
                    "member named \"{}\" already exists in base \"{}\"",
                    var.name, base
                ),
                var.span,
            )
        };

        let mut base = class.base.clone();
        loop {
            match base {
                ClassBase::Local(local) => {
                    let parent = &self.file.classes[local];
                    for var in own.iter().filter(|v| !v.is_static) {
                        let clash = parent
                            .members
                            .vars
                            .iter()
                            .any(|v| !v.is_static && v.name == var.name);
                        if clash {
                            return Err(shadow_error(var, &parent.name));
                        }
                    }
                    base = parent.base.clone();
                }
                ClassBase::Native(native) => {
                    for var in &own {
                        if let Some(MemberInfo::Property { is_static: false }) =
                            self.natives.get_member_info(&native, &var.name)
                        {
                            return Err(shadow_error(var, &native));
                        }
                    }
                    return Ok(());
                }
                ClassBase::Extern {
                    bytecode: Some(bytecode),
                    ..
                } => {
                    for var in &own {
                        if let Some(MemberInfo::Property { is_static: false }) =
                            bytecode.find_member_info(&var.name)
                        {
                            return Err(shadow_error(var, bytecode.name()));
                        }
                    }
                    match bytecode.native_base() {
                        Some(native) => base = ClassBase::Native(native),
                        None => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Argument counts of the direct base's constructor, `None` when it has none
    fn base_constructor(&self, class: usize) -> Option<(i32, i32)> {
        match &self.file.classes[class].base {
            ClassBase::Local(base) => self.file.classes[*base]
                .constructor()
                .map(|ctor| (ctor.arg_count(), ctor.default_count())),
            ClassBase::Native(name) => self
                .natives
                .get_constructor(name)
                .map(|ctor| (ctor.arg_count(), ctor.default_arg_count())),
            ClassBase::Extern {
                bytecode: Some(bytecode),
                ..
            } => match bytecode.constructor() {
                Some(ctor) => Some((ctor.arg_count as i32, ctor.default_count() as i32)),
                None => bytecode
                    .native_base()
                    .and_then(|native| self.natives.get_constructor(&native))
                    .map(|ctor| (ctor.arg_count(), ctor.default_arg_count())),
            },
            _ => None,
        }
    }

    fn base_name(&self, class: usize) -> String {
        match &self.file.classes[class].base {
            ClassBase::Local(base) => self.file.classes[*base].name.clone(),
            ClassBase::Native(name) | ClassBase::Named(name) => name.clone(),
            ClassBase::Extern { alias, name, .. } => format!("{}.{}", alias, name),
            ClassBase::None => String::new(),
        }
    }

    // Constants

    fn resolve_constants(&mut self, container: Container) -> CarbonResult<()> {
        for index in 0..self.members(container).constants.len() {
            self.resolve_constant(container, index)?;
        }
        Ok(())
    }

    fn resolve_constant(&mut self, container: Container, index: usize) -> CarbonResult<Value> {
        let node = &self.members(container).constants[index];
        match node.state {
            ReduceState::Done => return self.constant_value(&node.value),
            ReduceState::InProgress => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    "cyclic constant value dependancy found.",
                    node.span,
                ))
            }
            ReduceState::Pending => {}
        }

        let node = &mut self.members_mut(container).constants[index];
        node.state = ReduceState::InProgress;
        let mut expr = std::mem::take(&mut node.value);

        let ctx = Context {
            const_expr: true,
            ..Context::member(container)
        };
        let result = self.with_context(ctx, |this| {
            this.reduce_expr(&mut expr)?;
            this.constant_value(&expr)
        });

        let node = &mut self.members_mut(container).constants[index];
        node.value = expr;
        node.state = if result.is_ok() {
            ReduceState::Done
        } else {
            ReduceState::Pending
        };
        result
    }

    /// Local constants resolve in the current context, with literal folding on
    fn resolve_local_const(&mut self, depth: usize, index: usize) -> CarbonResult<Value> {
        let node = &self.ctx.scopes[depth].consts[index];
        match node.state {
            ReduceState::Done => return self.constant_value(&node.value),
            ReduceState::InProgress => {
                return Err(self.error(
                    ErrorKind::TypeError,
                    "cyclic constant value dependancy found.",
                    node.span,
                ))
            }
            ReduceState::Pending => {}
        }

        let node = &mut self.ctx.scopes[depth].consts[index];
        node.state = ReduceState::InProgress;
        let mut expr = std::mem::take(&mut node.value);

        let saved = std::mem::replace(&mut self.ctx.const_expr, true);
        let result = self
            .reduce_expr(&mut expr)
            .and_then(|_| self.constant_value(&expr));
        self.ctx.const_expr = saved;

        let node = &mut self.ctx.scopes[depth].consts[index];
        node.value = expr;
        node.state = if result.is_ok() {
            ReduceState::Done
        } else {
            ReduceState::Pending
        };
        result
    }

    // Enums

    fn resolve_enums(&mut self, container: Container) -> CarbonResult<()> {
        let members = self.members(container);
        let mut locations: Vec<(EnumLoc, usize)> = members
            .enums
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let loc = EnumLoc {
                    container,
                    index: Some(index),
                };
                (loc, node.values.len())
            })
            .collect();
        if let Some(unnamed) = &members.unnamed_enum {
            let loc = EnumLoc {
                container,
                index: None,
            };
            locations.push((loc, unnamed.values.len()));
        }

        for (loc, count) in locations {
            for value in 0..count {
                self.resolve_enum_value(loc, value)?;
            }
        }
        Ok(())
    }

    fn enum_node(&self, loc: EnumLoc) -> Option<&EnumNode> {
        let members = self.members(loc.container);
        match loc.index {
            Some(index) => members.enums.get(index),
            None => members.unnamed_enum.as_ref(),
        }
    }

    fn enum_value_mut(&mut self, loc: EnumLoc, index: usize) -> CarbonResult<&mut EnumValueNode> {
        let members = self.members_mut(loc.container);
        let node = match loc.index {
            Some(i) => members.enums.get_mut(i),
            None => members.unnamed_enum.as_mut(),
        };
        node.and_then(|node| node.values.get_mut(index))
            .ok_or_else(|| CarbonError::bug("enum value location out of range."))
    }

    fn resolve_enum_value(&mut self, loc: EnumLoc, index: usize) -> CarbonResult<i64> {
        let node = self.enum_value_mut(loc, index)?;
        match node.state {
            ReduceState::Done => return Ok(node.value),
            ReduceState::InProgress => {
                let span = node.span;
                return Err(self.error(
                    ErrorKind::TypeError,
                    "cyclic enum value dependancy found.",
                    span,
                ));
            }
            ReduceState::Pending => {}
        }
        node.state = ReduceState::InProgress;
        let mut expr = node.expr.take();

        let result = match expr.as_mut() {
            Some(expr) => {
                let ctx = Context {
                    enum_loc: Some(loc),
                    const_expr: true,
                    ..Context::member(loc.container)
                };
                self.with_context(ctx, |this| {
                    this.reduce_expr(expr)?;
                    match expr.as_const() {
                        Some(Value::Int(value)) => Ok(*value),
                        _ => Err(this.error(
                            ErrorKind::TypeError,
                            "enum value must be a constant integer.",
                            expr.span,
                        )),
                    }
                })
            }
            None if index == 0 => Ok(0),
            None => self
                .resolve_enum_value(loc, index - 1)
                .map(|previous| previous + 1),
        };

        let node = self.enum_value_mut(loc, index)?;
        node.expr = expr;
        match result {
            Ok(value) => {
                node.value = value;
                node.state = ReduceState::Done;
            }
            Err(_) => node.state = ReduceState::Pending,
        }
        result
    }

    // Member level declarations

    fn resolve_compiletime_calls(&mut self, container: Container) -> CarbonResult<()> {
        let mut calls = std::mem::take(&mut self.members_mut(container).compiletime_calls);
        let result = self.with_context(Context::member(container), |this| {
            calls.iter_mut().try_for_each(|call| this.reduce_expr(call))
        });
        self.members_mut(container).compiletime_calls = calls;
        result
    }

    fn reduce_var_initializers(&mut self, container: Container) -> CarbonResult<()> {
        for index in 0..self.members(container).vars.len() {
            let var = &mut self.members_mut(container).vars[index];
            let Some(mut init) = var.init.take() else {
                continue;
            };
            let ctx = Context {
                var: Some(VarContext {
                    name: var.name.clone(),
                    is_static: var.is_static,
                }),
                ..Context::member(container)
            };
            let result = self.with_context(ctx, |this| this.reduce_expr(&mut init));
            self.members_mut(container).vars[index].init = Some(init);
            result?;
        }
        Ok(())
    }

    /// Default parameter values must fold to literals; they are stored on the function
    fn resolve_parameters(&mut self, container: Container) -> CarbonResult<()> {
        for func in 0..self.members(container).functions.len() {
            let mut defaults = Vec::new();
            for param in 0..self.members(container).functions[func].params.len() {
                let node = &mut self.members_mut(container).functions[func].params[param];
                let Some(mut expr) = node.default.take() else {
                    continue;
                };
                let ctx = Context {
                    const_expr: true,
                    ..Context::member(container)
                };
                let result = self.with_context(ctx, |this| {
                    this.reduce_expr(&mut expr)?;
                    this.constant_value(&expr)
                });
                self.members_mut(container).functions[func].params[param].default = Some(expr);
                defaults.push(result?);
            }
            self.members_mut(container).functions[func].default_args = defaults;
        }
        Ok(())
    }

    // Function bodies

    fn reduce_function(&mut self, container: Container, index: usize) -> CarbonResult<()> {
        let func = &self.members(container).functions[index];
        if container == Container::File && func.name == "main" && func.params.len() >= 2 {
            return Err(self.error(
                ErrorKind::InvalidArgCount,
                "main function takes at most 1 argument.",
                func.span,
            ));
        }

        let class_name = container
            .class()
            .map(|class| self.file.classes[class].name.clone());
        let func_ctx = FuncContext {
            name: func.name.clone(),
            class_name,
            params: func.params.iter().map(|p| p.name.clone()).collect(),
            is_static: func.is_static,
            is_constructor: func.is_constructor,
        };
        let needs_super_check = func.is_constructor
            && container
                .class()
                .is_some_and(|class| !self.file.classes[class].base.is_none());
        trace!(function = %func_ctx.name, "reducing function");

        let mut body = std::mem::take(&mut self.members_mut(container).functions[index].body);
        let ctx = Context {
            func: Some(func_ctx),
            ..Context::member(container)
        };
        let result = self.with_context(ctx, |this| {
            if let (true, Some(class)) = (needs_super_check, container.class()) {
                this.check_super_constructor_call(class, &body)?;
            }
            this.reduce_function_body(&mut body)
        });
        self.members_mut(container).functions[index].body = body;
        result
    }

    fn check_super_constructor_call(&mut self, class: usize, body: &Block) -> CarbonResult<()> {
        let first = body.statements.first();
        let first_is_super =
            first.is_some_and(|stmt| matches!(&stmt.kind, StmtKind::Expr(e) if e.is_super_call()));

        if let Some((arg_count, default_count)) = self.base_constructor(class) {
            if arg_count > default_count && !first_is_super {
                let span = first.map_or(body.span, |stmt| stmt.span);
                return Err(self
                    .error(
                        ErrorKind::NotImplemented,
                        "super constructor call expected since base class doesn't have a default constructor.",
                        span,
                    )
                    .with_help("call super(...) as the first statement of the constructor"));
            }
        }
        if first_is_super {
            self.file.classes[class].has_super_ctor_call = true;
        }
        Ok(())
    }

    /// Derived classes without an explicit `super(...)` get one prepended,
    /// synthesizing an empty constructor when the class declares none
    fn add_default_constructor(&mut self, class: usize) -> CarbonResult<()> {
        let node = &self.file.classes[class];
        if node.base.is_none() || node.has_super_ctor_call {
            return Ok(());
        }
        if let Some((arg_count, default_count)) = self.base_constructor(class) {
            if arg_count > default_count {
                return Err(self.error(
                    ErrorKind::TypeError,
                    "super constructor call needed since base class doesn't have a default constructor.",
                    node.span,
                ));
            }
        }

        let span = node.span;
        let existing = node.constructor;
        let ctor = match existing {
            Some(index) => index,
            None => {
                let ctor = FunctionNode {
                    name: node.name.clone(),
                    span,
                    is_static: false,
                    is_constructor: true,
                    params: Vec::new(),
                    default_args: Vec::new(),
                    body: Block::new(span),
                };
                let node = &mut self.file.classes[class];
                node.members.functions.push(ctor);
                let index = node.members.functions.len() - 1;
                node.constructor = Some(index);
                index
            }
        };

        let super_call = Expr {
            kind: ExprKind::Call {
                base: Some(Box::new(Expr {
                    kind: ExprKind::Super,
                    span,
                    reduced: true,
                })),
                method: None,
                args: Vec::new(),
            },
            span,
            reduced: true,
        };
        let node = &mut self.file.classes[class];
        node.members.functions[ctor]
            .body
            .statements
            .insert(0, Stmt::expr(super_call));
        node.has_super_ctor_call = true;
        debug!(class = %node.name, "implicit super constructor call added");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn parse(source: &str) -> FileNode {
        let tokens = Scanner::new(source, "test.cb").scan_tokens().unwrap();
        Parser::new(tokens, "test.cb", source).parse().unwrap()
    }

    fn analyze(source: &str) -> CarbonResult<(FileNode, Vec<Warning>)> {
        let natives = NativeClasses::new();
        let mut file = parse(source);
        let warnings = Analyzer::new(&mut file, &natives).analyze()?;
        Ok((file, warnings))
    }

    fn analyze_err(source: &str) -> CarbonError {
        match analyze(source) {
            Ok(_) => panic!("expected an analyzer error"),
            Err(err) => err,
        }
    }

    fn is_super_stmt(stmt: &Stmt) -> bool {
        matches!(&stmt.kind, StmtKind::Expr(e) if e.is_super_call())
    }

    fn file_const(file: &FileNode, name: &str) -> Value {
        let index = file.members.find_constant(name).unwrap();
        file.members.constants[index].value.as_const().unwrap().clone()
    }

    #[test]
    fn test_constant_folding() {
        let (file, _) = analyze("const A = 2 + 3 * 4; const B = \"a\" + \"b\"; const C = A;").unwrap();
        assert!(matches!(file_const(&file, "A"), Value::Int(14)));
        assert_eq!(file_const(&file, "B").to_string(), "ab");
        assert!(matches!(file_const(&file, "C"), Value::Int(14)));
    }

    #[test]
    fn test_constant_array_folds() {
        let (file, _) = analyze("const L = [1, 2 + 1];").unwrap();
        assert_eq!(file_const(&file, "L").to_string(), "[1, 3]");
    }

    #[test]
    fn test_non_constant_expression() {
        let err = analyze_err("var x = 1; const A = x;");
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert_eq!(err.message, "expected a constant expression.");
    }

    #[test]
    fn test_cyclic_constant() {
        let err = analyze_err("const A = B; const B = A;");
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(err.message.contains("cyclic constant"));
    }

    #[test]
    fn test_cyclic_inheritance() {
        let err = analyze_err("class A : B {} class B : A {}");
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(err.message.contains("cyclic inheritance"));
    }

    #[test]
    fn test_unknown_base() {
        let err = analyze_err("class A : Missing {}");
        assert_eq!(err.message, "base class \"Missing\" not found.");
    }

    #[test]
    fn test_static_shadowing_is_permitted() {
        let (file, _) = analyze("class A { static var s = 1; } class B : A { var s = 2; }").unwrap();
        assert_eq!(file.classes[1].members.vars[0].name, "s");
        assert!(analyze("class A { var t; } class B : A { static var t = 0; }").is_ok());
    }

    #[test]
    fn test_second_analysis_changes_nothing() {
        let source = "
            const K = 2 * 3;
            enum Color { RED, GREEN }
            class A { var x = K; func A(v = 1) { x = v; } }
            class B : A { var y = Color.GREEN; func sum() { return x + y; } }
            func main() {
                var total = 0;
                for (var i = 0; i < 3; i += 1) { total += B().sum() + i; }
                return total;
            }
        ";
        let (mut file, warnings) = analyze(source).unwrap();
        assert!(warnings.is_empty());
        let first = format!("{:?}", file);

        let natives = NativeClasses::new();
        let again = Analyzer::new(&mut file, &natives).analyze().unwrap();
        assert!(again.is_empty());
        assert_eq!(format!("{:?}", file), first);
    }

    #[test]
    fn test_attribute_shadowing() {
        let err = analyze_err("class A { var x; } class B : A { var x; }");
        assert_eq!(err.kind, ErrorKind::AttributeError);
        assert!(err.message.contains("already exists in base \"A\""));
    }

    #[test]
    fn test_enum_values() {
        let (file, _) = analyze("enum E { A, B = 5, C } enum { X = E.C + 1, Y }").unwrap();
        let named = &file.members.enums[0];
        let values: Vec<i64> = named.values.iter().map(|v| v.value).collect();
        assert_eq!(values, vec![0, 5, 6]);
        let unnamed = file.members.unnamed_enum.as_ref().unwrap();
        let values: Vec<i64> = unnamed.values.iter().map(|v| v.value).collect();
        assert_eq!(values, vec![7, 8]);
    }

    #[test]
    fn test_enum_value_must_be_integer() {
        let err = analyze_err("enum E { A = \"a\" }");
        assert_eq!(err.message, "enum value must be a constant integer.");
    }

    #[test]
    fn test_cyclic_enum() {
        let err = analyze_err("enum E { A = B, B = A }");
        assert!(err.message.contains("cyclic enum"));
    }

    #[test]
    fn test_default_arguments_fold() {
        let (file, _) = analyze("const D = 4; func f(a, b = D * 2, c = [1]) {}").unwrap();
        let func = &file.members.functions[0];
        assert_eq!(func.default_args.len(), 2);
        assert!(matches!(func.default_args[0], Value::Int(8)));
    }

    #[test]
    fn test_main_argument_count() {
        let err = analyze_err("func main(a, b) {}");
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
    }

    #[test]
    fn test_compiletime_assertion() {
        let err = analyze_err("const A = 1; __assert(A == 2);");
        assert_eq!(err.kind, ErrorKind::Assertion);
        assert!(analyze("const A = 1; __assert(A == 1);").is_ok());
    }

    #[test]
    fn test_default_constructor_synthesis() {
        let (file, _) = analyze("class A { func A() {} } class B : A {}").unwrap();
        let class = &file.classes[1];
        let ctor = class.constructor().unwrap();
        assert!(class.has_super_ctor_call);
        assert!(is_super_stmt(&ctor.body.statements[0]));
    }

    #[test]
    fn test_missing_super_constructor_call() {
        let err = analyze_err("class A { func A(x) {} } class B : A { func B() {} }");
        assert_eq!(err.kind, ErrorKind::NotImplemented);

        let err = analyze_err("class A { func A(x) {} } class B : A {}");
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(err.message.contains("super constructor call needed"));
    }

    #[test]
    fn test_super_call_position() {
        let err = analyze_err(
            "class A { func A() {} } class B : A { func B() { var x = 1; super(); } }",
        );
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert_eq!(
            err.message,
            "super call should be the first and stand-alone statement of a constructor."
        );
    }

    #[test]
    fn test_super_constructor_arity() {
        let err = analyze_err("class A { func A(x) {} } class B : A { func B() { super(); } }");
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
        assert!(analyze("class A { func A(x) {} } class B : A { func B() { super(1); } }").is_ok());
    }
}
