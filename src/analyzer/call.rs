// Carbon Analyzer - Call Sites
// Arity checks against known callees and compile-time evaluation of builtins

use super::{Analyzer, Container};
use crate::ast::*;
use crate::builtins::{self, BuiltinFunction};
use crate::error::{CarbonError, CarbonResult, ErrorKind, Span};
use crate::native::{BindData, MemberInfo, NativeCallable};
use crate::vm::value::Value;

impl Analyzer<'_> {
    pub(super) fn reduce_call(&mut self, expr: &mut Expr) -> CarbonResult<()> {
        let span = expr.span;
        let ExprKind::Call { base, method, args } = &mut expr.kind else {
            return Err(CarbonError::bug("reduce_call on a non-call expression."));
        };
        // Only the statement itself may be a leading super(); its arguments may not
        let super_allowed = std::mem::take(&mut self.super_call_allowed);
        for arg in args.iter_mut() {
            self.reduce_expr(arg)?;
        }

        let folded = match base.as_deref_mut() {
            Some(base) => self.reduce_based_call(base, method, args, span, super_allowed)?,
            None => {
                let Some(id) = method.as_mut() else {
                    return Err(CarbonError::bug("call without a callee."));
                };
                if self.reduce_named_call(id, args)? {
                    // Calling a variable: the callee becomes the base value
                    if let Some(id) = method.take() {
                        let id_span = id.span;
                        *base = Some(Box::new(Expr {
                            kind: ExprKind::Identifier(id),
                            span: id_span,
                            reduced: true,
                        }));
                    }
                }
                None
            }
        };

        if let Some(kind) = folded {
            expr.kind = kind;
        }
        Ok(())
    }

    /// `name(args)`. Returns true when `name` is a variable holding a callable.
    fn reduce_named_call(&mut self, id: &mut Identifier, args: &[Expr]) -> CarbonResult<bool> {
        if id.ident_ref.is_unknown() {
            id.ident_ref = self.resolve_identifier(&id.name, id.span)?;
        }

        match id.ident_ref.clone() {
            IdentRef::Unknown => Err(self.error(
                ErrorKind::NameError,
                format!("identifier \"{}\" isn't defined.", id.name),
                id.span,
            )),
            IdentRef::Parameter(_)
            | IdentRef::LocalVar
            | IdentRef::MemberVar(_)
            | IdentRef::StaticVar(_) => {
                self.reduce_identifier(id)?;
                Ok(true)
            }
            IdentRef::LocalConst(_) | IdentRef::MemberConst(_) | IdentRef::EnumValue(_) => Err(self
                .error(ErrorKind::TypeError, "constant value is not callable.", id.span)),
            IdentRef::Function(sig) => {
                if !sig.is_static && self.ctx.class.is_some() && self.in_static_context() {
                    return Err(self.error(
                        ErrorKind::AttributeError,
                        format!("can't access non-static attribute \"{}\" statically", id.name),
                        id.span,
                    ));
                }
                self.check_arg_count(sig.arg_count, sig.default_count, args.len(), id.span)?;
                Ok(false)
            }
            IdentRef::CarbonClass(class) => {
                let ctor = self.file.classes[class]
                    .constructor()
                    .map(|ctor| (ctor.arg_count(), ctor.default_count()));
                self.check_constructor_args(ctor, args.len(), id.span)?;
                Ok(false)
            }
            IdentRef::NativeClass(class) => {
                let ctor = self.natives.get_constructor(&class);
                self.check_constructor_args(
                    ctor.map(|c| (c.arg_count(), c.default_arg_count())),
                    args.len(),
                    id.span,
                )?;
                if let Some(ctor) = ctor {
                    self.check_native_arg_types(ctor, args)?;
                }
                Ok(false)
            }
            IdentRef::EnumName(_) | IdentRef::Extern(_) => Err(self.error(
                ErrorKind::TypeError,
                format!("attribute \"{}\" is not callable.", id.name),
                id.span,
            )),
        }
    }

    fn check_constructor_args(
        &self,
        ctor: Option<(i32, i32)>,
        given: usize,
        span: Span,
    ) -> CarbonResult<()> {
        match ctor {
            Some((arg_count, default_count)) => {
                self.check_arg_count(arg_count, default_count, given, span)
            }
            None if given > 0 => Err(self.error(
                ErrorKind::InvalidArgCount,
                "default constructor takes exactly 0 argument.",
                span,
            )),
            None => Ok(()),
        }
    }

    /// Literal arguments are checked against the declared native parameter types
    fn check_native_arg_types(&self, callable: &NativeCallable, args: &[Expr]) -> CarbonResult<()> {
        for (index, arg) in args.iter().enumerate() {
            if let Some(value) = arg.as_const() {
                if let Some(message) = callable.check_arg_type(index, value) {
                    return Err(self.error(ErrorKind::TypeError, message, arg.span));
                }
            }
        }
        Ok(())
    }

    fn reduce_based_call(
        &mut self,
        base: &mut Expr,
        method: &mut Option<Identifier>,
        args: &[Expr],
        span: Span,
        super_allowed: bool,
    ) -> CarbonResult<Option<ExprKind>> {
        match base.kind {
            ExprKind::This => return self.reduce_this_call(base, method, args, span),
            ExprKind::Super => return self.reduce_super_call(method, args, span, super_allowed),
            _ => {}
        }
        self.reduce_expr(base)?;

        let values: Option<Vec<Value>> = args.iter().map(|a| a.as_const().cloned()).collect();
        match (&base.kind, method.as_ref()) {
            (ExprKind::BuiltinFunc(func), None) => self.reduce_builtin_call(*func, args, values, span),
            (ExprKind::BuiltinType(ty), None) => match values {
                Some(values) if ty.can_construct_compile_time() => ty
                    .construct(&values)
                    .map(|value| Some(ExprKind::Const(value)))
                    .map_err(|e| self.rethrow(e, span)),
                _ => Ok(None),
            },
            (ExprKind::Const(value), Some(method)) => match values {
                Some(values) => builtins::call_method(value, &method.name, &values)
                    .map(|value| Some(ExprKind::Const(value)))
                    .map_err(|e| self.rethrow(e, method.span)),
                None => Ok(None),
            },
            (ExprKind::Const(_), None) => Err(self.error(
                ErrorKind::TypeError,
                "constant value is not callable.",
                base.span,
            )),
            (ExprKind::Identifier(id), Some(method)) => {
                let (ident_ref, name) = (id.ident_ref.clone(), id.name.clone());
                self.check_member_call(&ident_ref, &name, base.span, method, args)?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn reduce_builtin_call(
        &mut self,
        func: BuiltinFunction,
        args: &[Expr],
        values: Option<Vec<Value>>,
        span: Span,
    ) -> CarbonResult<Option<ExprKind>> {
        if func.is_compiletime() {
            let Some(values) = values else {
                let arg = args.iter().find(|a| !a.is_const()).map_or(span, |a| a.span);
                return Err(self.error(
                    ErrorKind::TypeError,
                    "compiletime function arguments must be compile time known values.",
                    arg,
                ));
            };
            return self
                .call_compiletime(func, &values, span)
                .map(|value| Some(ExprKind::Const(value)));
        }

        self.check_arg_count(func.arg_count(), 0, args.len(), span)?;
        match values {
            Some(values) if func.can_const_fold() => func
                .call(&values)
                .map(|value| Some(ExprKind::Const(value)))
                .map_err(|e| self.rethrow(e, span)),
            _ => Ok(None),
        }
    }

    fn call_compiletime(&self, func: BuiltinFunction, args: &[Value], span: Span) -> CarbonResult<Value> {
        self.check_arg_count(func.arg_count(), 0, args.len(), span)?;
        match func {
            BuiltinFunction::Assert => {
                if args.first().is_some_and(Value::is_truthy) {
                    Ok(Value::Null)
                } else {
                    Err(self.error(ErrorKind::Assertion, "assertion failed.", span))
                }
            }
            BuiltinFunction::Func => match &self.ctx.func {
                Some(func) => Ok(Value::string(&match &func.class_name {
                    Some(class) => format!("{}.{}", class, func.name),
                    None => func.name.clone(),
                })),
                None => Err(self.error(
                    ErrorKind::SyntaxError,
                    "__func() must be called inside a function.",
                    span,
                )),
            },
            BuiltinFunction::Line => Ok(Value::Int(span.line() as i64)),
            BuiltinFunction::File => Ok(Value::string(&self.path)),
            other => Err(CarbonError::bug(format!(
                "{}() is not a compile time function.",
                other.name()
            ))),
        }
    }

    /// `this(args)` and `this.name(args)`
    fn reduce_this_call(
        &mut self,
        base: &mut Expr,
        method: &mut Option<Identifier>,
        args: &[Expr],
        span: Span,
    ) -> CarbonResult<Option<ExprKind>> {
        let Some(class) = self.ctx.class else {
            return Err(self.error(
                ErrorKind::SyntaxError,
                "keyword \"this\" only be used in non-static member function.",
                span,
            ));
        };
        let class_name = self.file.classes[class].name.clone();

        let Some(member) = method.as_ref() else {
            return match self.find_member(Container::Class(class), "__call")? {
                IdentRef::Function(sig) => {
                    self.check_arg_count(sig.arg_count, sig.default_count, args.len(), span)?;
                    Ok(None)
                }
                _ => Err(self.error(
                    ErrorKind::NotImplemented,
                    format!("operator method __call not implemented on base {}", class_name),
                    span,
                )),
            };
        };

        let (name, member_span) = (member.name.clone(), member.span);
        match self.find_member(Container::Class(class), &name)? {
            IdentRef::Unknown => Err(self.error(
                ErrorKind::AttributeError,
                format!("attribute \"{}\" isn't exists in base \"{}\".", name, class_name),
                member_span,
            )),
            found @ (IdentRef::MemberVar(_) | IdentRef::StaticVar(_)) => {
                let mut id = Identifier {
                    name,
                    span: member_span,
                    ident_ref: found,
                };
                self.reduce_identifier(&mut id)?;
                *base = Expr {
                    kind: ExprKind::Identifier(id),
                    span: member_span,
                    reduced: true,
                };
                *method = None;
                Ok(None)
            }
            IdentRef::MemberConst(_) | IdentRef::EnumName(_) | IdentRef::EnumValue(_) => Err(self
                .error(ErrorKind::TypeError, "constant value is not callable.", member_span)),
            IdentRef::Function(sig) => {
                if !sig.is_static && self.in_static_context() {
                    return Err(self.error(
                        ErrorKind::AttributeError,
                        format!("can't access non-static attribute \"{}\" statically", name),
                        member_span,
                    ));
                }
                self.check_arg_count(sig.arg_count, sig.default_count, args.len(), member_span)?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// `super(args)` and `super.name(args)`
    fn reduce_super_call(
        &mut self,
        method: &Option<Identifier>,
        args: &[Expr],
        span: Span,
        super_allowed: bool,
    ) -> CarbonResult<Option<ExprKind>> {
        let class = match self.ctx.class {
            Some(class) if !self.file.classes[class].base.is_none() => class,
            _ => return Err(self.error(ErrorKind::SyntaxError, "invalid super call.", span)),
        };

        let Some(member) = method else {
            let in_constructor = self.ctx.func.as_ref().is_some_and(|f| f.is_constructor);
            if !in_constructor {
                return Err(self.error(ErrorKind::SyntaxError, "invalid super call.", span));
            }
            if !super_allowed {
                return Err(self.error(
                    ErrorKind::SyntaxError,
                    "super call should be the first and stand-alone statement of a constructor.",
                    span,
                ));
            }
            let (arg_count, default_count) = self.base_constructor(class).unwrap_or((0, 0));
            self.check_arg_count(arg_count, default_count, args.len(), span)?;
            return Ok(None);
        };

        if let ClassBase::Native(native) = &self.file.classes[class].base {
            let native = native.clone();
            return self.check_native_super_call(&native, member, args).map(|_| None);
        }

        match self.find_base_member(class, &member.name)? {
            IdentRef::Unknown => Err(self.error(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" isn't exists in base \"{}\".",
                    member.name,
                    self.base_name(class)
                ),
                member.span,
            )),
            IdentRef::MemberVar(_) => Err(self.error(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" cannot be access with \"super\" use \"this\" instead.",
                    member.name
                ),
                member.span,
            )),
            IdentRef::MemberConst(_) | IdentRef::EnumName(_) | IdentRef::EnumValue(_) => Err(self
                .error(ErrorKind::TypeError, "constant value is not callable.", member.span)),
            IdentRef::Function(sig) => {
                if !sig.is_static && self.in_static_context() {
                    return Err(self.error(
                        ErrorKind::AttributeError,
                        format!("can't access non-static attribute \"{}\" statically", member.name),
                        member.span,
                    ));
                }
                self.check_arg_count(sig.arg_count, sig.default_count, args.len(), member.span)
                    .map(|_| None)
            }
            _ => Ok(None),
        }
    }

    fn check_native_super_call(&self, native: &str, member: &Identifier, args: &[Expr]) -> CarbonResult<()> {
        match self.natives.find_bind_data(native, &member.name) {
            None => Err(self.error(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" isn't exists in base \"{}\".",
                    member.name, native
                ),
                member.span,
            )),
            Some(BindData::Method(callable)) => {
                if self.in_static_context() {
                    return Err(self.error(
                        ErrorKind::AttributeError,
                        format!("can't access non-static attribute \"{}\" statically", member.name),
                        member.span,
                    ));
                }
                self.check_native_callable(callable, args, member.span)
            }
            Some(BindData::StaticFunc(callable)) => self.check_native_callable(callable, args, member.span),
            Some(BindData::MemberVar) => Err(self.error(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" cannot be access with \"super\" use \"this\" instead.",
                    member.name
                ),
                member.span,
            )),
            Some(BindData::StaticVar(_)) => Ok(()),
            Some(_) => Err(self.error(
                ErrorKind::TypeError,
                "constant value is not callable.",
                member.span,
            )),
        }
    }

    fn check_native_callable(&self, callable: &NativeCallable, args: &[Expr], span: Span) -> CarbonResult<()> {
        self.check_arg_count(callable.arg_count(), callable.default_arg_count(), args.len(), span)?;
        self.check_native_arg_types(callable, args)
    }

    /// `Name.method(args)` where `Name` is already resolved
    fn check_member_call(
        &mut self,
        base: &IdentRef,
        base_name: &str,
        base_span: Span,
        method: &Identifier,
        args: &[Expr],
    ) -> CarbonResult<()> {
        let qualified = format!("{}.{}()", base_name, method.name);
        let not_callable = |this: &Self, message: String| {
            Err(this.error(ErrorKind::TypeError, message, method.span))
        };

        match base {
            IdentRef::CarbonClass(class) => match self.find_member(Container::Class(*class), &method.name)? {
                IdentRef::Unknown => Err(self.error(
                    ErrorKind::NameError,
                    format!(
                        "attribute \"{}\" doesn't exists on base {}",
                        method.name, base_name
                    ),
                    method.span,
                )),
                IdentRef::MemberVar(_) => Err(self.error(
                    ErrorKind::AttributeError,
                    format!("can't access non-static attribute \"{}\" statically", method.name),
                    method.span,
                )),
                IdentRef::MemberConst(_) => {
                    not_callable(self, format!("constant value (\"{}\") is not callable.", qualified))
                }
                IdentRef::EnumName(_) => {
                    not_callable(self, format!("enums (\"{}\") are not callable.", qualified))
                }
                IdentRef::EnumValue(_) => {
                    not_callable(self, format!("enum value (\"{}\") is not callable.", qualified))
                }
                IdentRef::Function(sig) => {
                    if !sig.is_static {
                        return Err(self.error(
                            ErrorKind::AttributeError,
                            format!("can't call non-static method \"{}\" statically", method.name),
                            method.span,
                        ));
                    }
                    self.check_arg_count(sig.arg_count, sig.default_count, args.len(), method.span)
                }
                _ => Ok(()),
            },

            IdentRef::NativeClass(class) => match self.natives.find_bind_data(class, &method.name) {
                None => Err(self.error(
                    ErrorKind::AttributeError,
                    format!(
                        "attribute \"{}\" does not exists on base {}.",
                        method.name, class
                    ),
                    method.span,
                )),
                Some(BindData::StaticFunc(callable)) => {
                    self.check_native_callable(callable, args, method.span)
                }
                Some(BindData::StaticVar(_)) => Ok(()),
                Some(BindData::StaticConst(_)) => {
                    not_callable(self, format!("constant value \"{}\" is not callable.", qualified))
                }
                Some(BindData::Method(_)) => Err(self.error(
                    ErrorKind::TypeError,
                    format!("can't call non-static method \"{}\" statically.", qualified),
                    method.span,
                )),
                Some(BindData::MemberVar) => Err(self.error(
                    ErrorKind::AttributeError,
                    format!("can't access non-static attribute \"{}\" statically", method.name),
                    method.span,
                )),
                Some(BindData::Enum(_)) => {
                    not_callable(self, format!("enums (\"{}\") are not callable.", qualified))
                }
                Some(BindData::EnumValue(_)) => {
                    not_callable(self, format!("enum value (\"{}\") is not callable.", qualified))
                }
            },

            IdentRef::Extern(bytecode) => match bytecode.find_member_info(&method.name) {
                None => Err(self.error(
                    ErrorKind::AttributeError,
                    format!(
                        "attribute \"{}\" isn't exists in base \"{}\".",
                        method.name, base_name
                    ),
                    method.span,
                )),
                Some(MemberInfo::Method {
                    arg_count,
                    default_count,
                    ..
                }) => self.check_arg_count(arg_count, default_count, args.len(), method.span),
                Some(MemberInfo::Class) => {
                    let ctor = bytecode.get_class(&method.name).and_then(|class| {
                        class
                            .constructor()
                            .map(|ctor| (ctor.arg_count as i32, ctor.default_count() as i32))
                    });
                    self.check_constructor_args(ctor, args.len(), method.span)
                }
                Some(MemberInfo::Constant(_)) | Some(MemberInfo::EnumValue(_)) => {
                    not_callable(self, format!("constant value (\"{}\") is not callable.", qualified))
                }
                Some(MemberInfo::Enum(_)) => {
                    not_callable(self, format!("enums (\"{}\") are not callable.", qualified))
                }
                Some(MemberInfo::Property { .. }) => Ok(()),
            },

            IdentRef::EnumName(_) => Err(self.error(
                ErrorKind::TypeError,
                format!("attribute \"{}\" doesn't support method calls.", base_name),
                base_span,
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analyzer::Analyzer;
    use crate::ast::*;
    use crate::error::{CarbonError, CarbonResult, ErrorKind};
    use crate::lexer::Scanner;
    use crate::native::NativeClasses;
    use crate::parser::Parser;
    use crate::vm::value::Value;

    fn analyze(source: &str) -> CarbonResult<FileNode> {
        let tokens = Scanner::new(source, "test.cb").scan_tokens().unwrap();
        let mut file = Parser::new(tokens, "test.cb", source).parse().unwrap();
        let natives = NativeClasses::new();
        Analyzer::new(&mut file, &natives).analyze()?;
        Ok(file)
    }

    fn analyze_err(source: &str) -> CarbonError {
        analyze(source).err().expect("expected an analyzer error")
    }

    fn returned(file: &FileNode, func: &str) -> Expr {
        let index = file.members.find_function(func).unwrap();
        match &file.members.functions[index].body.statements[0].kind {
            StmtKind::Return(Some(expr)) => expr.clone(),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_arity_messages() {
        let err = analyze_err("func f(a, b, c = 1) {} func main() { f(1); }");
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
        assert_eq!(err.message, "expected at least 2 argument(s).");

        let err = analyze_err("func f(a, b, c = 1) {} func main() { f(1, 2, 3, 4); }");
        assert_eq!(err.message, "expected minimum 2 and maximum 3 argument(s).");

        let err = analyze_err("func f(a) {} func main() { f(); }");
        assert_eq!(err.message, "expected exactly 1 argument(s).");
    }

    #[test]
    fn test_builtin_folding() {
        let file = analyze("func main() { return hex(255); }").unwrap();
        assert_eq!(returned(&file, "main").as_const().unwrap().to_string(), "0xff");

        let file = analyze("func main() { return \"a,b\".split(\",\").size(); }").unwrap();
        assert!(matches!(returned(&file, "main").as_const(), Some(Value::Int(2))));
    }

    #[test]
    fn test_print_is_not_folded() {
        let file = analyze("func main() { print(1); }").unwrap();
        let body = &file.members.functions[0].body;
        assert_eq!(body.statements.len(), 1);
    }

    #[test]
    fn test_compiletime_functions() {
        let file = analyze("class A { func f() { return __func(); } } func main() { return __line(); }")
            .unwrap();
        assert!(matches!(returned(&file, "main").as_const(), Some(Value::Int(1))));
        let body = &file.classes[0].members.functions[0].body;
        let StmtKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        assert_eq!(expr.as_const().unwrap().to_string(), "A.f");

        let err = analyze_err("func main() { var x = 1; __assert(x); }");
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_constant_not_callable() {
        let err = analyze_err("const K = 1; func main() { K(); }");
        assert_eq!(err.message, "constant value is not callable.");
    }

    #[test]
    fn test_static_method_call_rules() {
        let err = analyze_err("class A { func f() {} } func main() { A.f(); }");
        assert!(err.message.contains("can't call non-static method"));

        let err = analyze_err("class A { static func f(x) {} } func main() { A.f(); }");
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);

        let err = analyze_err("class A { enum E { X } } func main() { A.E(); }");
        assert_eq!(err.message, "enums (\"A.E()\") are not callable.");
    }

    #[test]
    fn test_constructor_arity() {
        let err = analyze_err("class A {} func main() { A(1); }");
        assert_eq!(err.message, "default constructor takes exactly 0 argument.");

        let err = analyze_err("class A { func A(x) {} } func main() { A(); }");
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
    }

    #[test]
    fn test_callable_variable_becomes_value_call() {
        let file = analyze("func main(f) { return f(1); }").unwrap();
        let expr = returned(&file, "main");
        let ExprKind::Call { base, method, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert!(method.is_none());
        assert!(matches!(
            &base.as_ref().unwrap().kind,
            ExprKind::Identifier(id) if matches!(id.ident_ref, IdentRef::Parameter(0))
        ));
    }

    #[test]
    fn test_call_operator_requires_method() {
        let err = analyze_err("class A { func f() { this(); } }");
        assert_eq!(err.kind, ErrorKind::NotImplemented);
        assert!(analyze("class A { func __call(x) {} func f() { this(1); } }").is_ok());
    }

    #[test]
    fn test_super_outside_constructor() {
        let err = analyze_err("class A {} class B : A { func f() { super(); } }");
        assert_eq!(err.message, "invalid super call.");
    }

    #[test]
    fn test_super_method_call() {
        assert!(analyze("class A { func f() {} } class B : A { func f() { return super.f(); } }").is_ok());
        let err = analyze_err("class A { func f() {} } class B : A { func g() { super.h(); } }");
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_native_class_checks() {
        let err = analyze_err("func main() { Buffer(\"x\"); }");
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(analyze("func main() { var b = Buffer(4); }").is_ok());
    }
}
