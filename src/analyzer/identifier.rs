// Carbon Analyzer - Identifier Resolution

use super::{Analyzer, Container, EnumLoc};
use crate::ast::*;
use crate::error::{CarbonResult, ErrorKind, Span};
use crate::native::{BindData, MemberInfo};
use crate::vm::value::Value;

impl Analyzer<'_> {
    /// Look a name up in the current function, scopes, class, file and imports
    pub(super) fn resolve_identifier(&mut self, name: &str, span: Span) -> CarbonResult<IdentRef> {
        if let Some(func) = &self.ctx.func {
            if let Some(index) = func.params.iter().position(|p| p == name) {
                return Ok(IdentRef::Parameter(index));
            }
        }

        // Variables of every enclosing scope win over local constants
        for scope in self.ctx.scopes.iter().rev() {
            if let Some(var) = scope.vars.iter().find(|v| v.name == name) {
                if span.is_before(&var.span) {
                    return Err(self.error(
                        ErrorKind::NameError,
                        format!("local variable \"{}\" referenced before assigned", name),
                        span,
                    ));
                }
                return Ok(IdentRef::LocalVar);
            }
        }
        for depth in (0..self.ctx.scopes.len()).rev() {
            if let Some(index) = self.ctx.scopes[depth].consts.iter().position(|c| c.name == name) {
                let value = self.resolve_local_const(depth, index)?;
                return Ok(IdentRef::LocalConst(value));
            }
        }

        if let Some(loc) = self.ctx.enum_loc {
            if let Some(index) = self.enum_node(loc).and_then(|node| node.find(name)) {
                let value = self.resolve_enum_value(loc, index)?;
                return Ok(IdentRef::EnumValue(Value::Int(value)));
            }
        }

        if let Some(class) = self.ctx.class {
            let found = self.find_member(Container::Class(class), name)?;
            if !found.is_unknown() {
                return Ok(found);
            }
        }

        let found = self.find_member(Container::File, name)?;
        if !found.is_unknown() {
            return Ok(found);
        }

        if let Some(import) = self.file.find_import(name) {
            if let Some(bytecode) = &import.bytecode {
                return Ok(IdentRef::Extern(bytecode.clone()));
            }
        }
        Ok(IdentRef::Unknown)
    }

    /// Members declared on `container`, then on its bases. At file level
    /// classes and registered native classes are members too.
    pub(super) fn find_member(&mut self, container: Container, name: &str) -> CarbonResult<IdentRef> {
        let members = self.members(container);
        if let Some(var) = members.vars.iter().find(|v| v.name == name) {
            return Ok(if var.is_static {
                IdentRef::StaticVar(RefBase::Local)
            } else {
                IdentRef::MemberVar(RefBase::Local)
            });
        }
        if let Some(func) = members
            .functions
            .iter()
            .find(|f| !f.is_constructor && f.name == name)
        {
            return Ok(IdentRef::Function(FuncSig {
                base: RefBase::Local,
                arg_count: func.arg_count(),
                default_count: func.default_count(),
                is_static: func.is_static,
            }));
        }
        let constant = members.find_constant(name);
        let unnamed = members
            .unnamed_enum
            .as_ref()
            .and_then(|node| node.find(name));
        let named = members.find_enum(name);

        if let Some(index) = constant {
            let value = self.resolve_constant(container, index)?;
            return Ok(IdentRef::MemberConst(value));
        }
        if let Some(index) = unnamed {
            let loc = EnumLoc {
                container,
                index: None,
            };
            let value = self.resolve_enum_value(loc, index)?;
            return Ok(IdentRef::EnumValue(Value::Int(value)));
        }
        if let Some(index) = named {
            return Ok(IdentRef::EnumName(EnumRef::Local {
                class: container.class(),
                index,
            }));
        }

        match container {
            Container::Class(class) => self.find_base_member(class, name),
            Container::File => {
                if let Some(class) = self.file.find_class(name) {
                    Ok(IdentRef::CarbonClass(class))
                } else if self.natives.is_class_registered(name) {
                    Ok(IdentRef::NativeClass(name.to_string()))
                } else {
                    Ok(IdentRef::Unknown)
                }
            }
        }
    }

    pub(super) fn find_base_member(&mut self, class: usize, name: &str) -> CarbonResult<IdentRef> {
        match self.file.classes[class].base.clone() {
            ClassBase::Local(base) => self.find_member(Container::Class(base), name),
            ClassBase::Native(native) => Ok(self.find_native_member(&native, name)),
            ClassBase::Extern {
                bytecode: Some(bytecode),
                ..
            } => match bytecode.find_member_info(name) {
                Some(info) => {
                    let enum_ref = EnumRef::Extern {
                        bytecode: bytecode.clone(),
                        name: name.to_string(),
                    };
                    Ok(from_member_info(info, RefBase::Extern, enum_ref))
                }
                None => Ok(bytecode
                    .native_base()
                    .map_or(IdentRef::Unknown, |native| {
                        self.find_native_member(&native, name)
                    })),
            },
            _ => Ok(IdentRef::Unknown),
        }
    }

    fn find_native_member(&self, class: &str, name: &str) -> IdentRef {
        match self.natives.get_member_info(class, name) {
            Some(info) => {
                let enum_ref = EnumRef::Native {
                    class: class.to_string(),
                    name: name.to_string(),
                };
                from_member_info(info, RefBase::Native, enum_ref)
            }
            None => IdentRef::Unknown,
        }
    }

    /// Resolve and validate an identifier. Returns the folded replacement
    /// when it names a constant or an enum value.
    pub(super) fn reduce_identifier(&mut self, id: &mut Identifier) -> CarbonResult<Option<ExprKind>> {
        if id.ident_ref.is_unknown() {
            id.ident_ref = self.resolve_identifier(&id.name, id.span)?;
        }

        match &id.ident_ref {
            IdentRef::Unknown => Err(self
                .error(
                    ErrorKind::NameError,
                    format!("identifier \"{}\" isn't defined.", id.name),
                    id.span,
                )
                .with_help("declare it with \"var\", \"const\" or as a parameter")),
            IdentRef::LocalConst(value) | IdentRef::MemberConst(value) | IdentRef::EnumValue(value) => {
                Ok(Some(ExprKind::Const(value.clone())))
            }
            IdentRef::LocalVar
            | IdentRef::StaticVar(RefBase::Local)
            | IdentRef::MemberVar(RefBase::Local)
                if self.ctx.var.as_ref().is_some_and(|var| var.name == id.name) =>
            {
                Err(self.error(
                    ErrorKind::AttributeError,
                    format!(
                        "invalid attribute access \"{}\" can't be used in it's own initialization.",
                        id.name
                    ),
                    id.span,
                ))
            }
            IdentRef::MemberVar(_) if self.in_static_context() => Err(self.error(
                ErrorKind::AttributeError,
                format!("can't access non-static attribute \"{}\" statically", id.name),
                id.span,
            )),
            _ => Ok(None),
        }
    }

    /// Value of `enum_ref.name`, `None` when the enum has no such value
    pub(super) fn enum_ref_value(&mut self, enum_ref: &EnumRef, name: &str) -> CarbonResult<Option<i64>> {
        match enum_ref {
            EnumRef::Local { class, index } => {
                let loc = EnumLoc {
                    container: Container::of(*class),
                    index: Some(*index),
                };
                match self.enum_node(loc).and_then(|node| node.find(name)) {
                    Some(value) => self.resolve_enum_value(loc, value).map(Some),
                    None => Ok(None),
                }
            }
            EnumRef::Native { class, name: enum_name } => {
                match self.natives.find_bind_data(class, enum_name) {
                    Some(BindData::Enum(info)) => Ok(info.get(name)),
                    _ => Ok(None),
                }
            }
            EnumRef::Extern {
                bytecode,
                name: enum_name,
            } => match bytecode.find_member_info(enum_name) {
                Some(MemberInfo::Enum(info)) => Ok(info.get(name)),
                _ => Ok(None),
            },
        }
    }
}

fn from_member_info(info: MemberInfo, base: RefBase, enum_ref: EnumRef) -> IdentRef {
    match info {
        MemberInfo::Method {
            arg_count,
            default_count,
            is_static,
        } => IdentRef::Function(FuncSig {
            base,
            arg_count,
            default_count,
            is_static,
        }),
        MemberInfo::Property { is_static: true } => IdentRef::StaticVar(base),
        MemberInfo::Property { is_static: false } => IdentRef::MemberVar(base),
        MemberInfo::Constant(value) => IdentRef::MemberConst(value),
        MemberInfo::Enum(_) => IdentRef::EnumName(enum_ref),
        MemberInfo::EnumValue(value) => IdentRef::EnumValue(Value::Int(value)),
        MemberInfo::Class => IdentRef::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::error::ErrorKind;
    use crate::native::NativeClasses;
    use crate::analyzer::Analyzer;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn analyze(source: &str) -> crate::error::CarbonResult<FileNode> {
        let tokens = Scanner::new(source, "test.cb").scan_tokens().unwrap();
        let mut file = Parser::new(tokens, "test.cb", source).parse().unwrap();
        let natives = NativeClasses::new();
        Analyzer::new(&mut file, &natives).analyze()?;
        Ok(file)
    }

    fn first_statement(file: &FileNode, func: &str) -> Stmt {
        let index = file.members.find_function(func).unwrap();
        file.members.functions[index].body.statements[0].clone()
    }

    #[test]
    fn test_undefined_identifier() {
        let err = analyze("func main() { return y; }").err().unwrap();
        assert_eq!(err.kind, ErrorKind::NameError);
        assert_eq!(err.message, "identifier \"y\" isn't defined.");
    }

    #[test]
    fn test_use_before_declaration() {
        let err = analyze("func main() { x = 1; var x = 2; }").err().unwrap();
        assert_eq!(err.kind, ErrorKind::NameError);
        assert!(err.message.contains("referenced before assigned"));
    }

    #[test]
    fn test_own_initialization() {
        let err = analyze("func main() { var x = x + 1; }").err().unwrap();
        assert_eq!(err.kind, ErrorKind::AttributeError);
        assert!(err.message.contains("own initialization"));
    }

    #[test]
    fn test_parameter_shadows_member() {
        let file = analyze("class A { var x; func f(x) { return x; } }").unwrap();
        let body = &file.classes[0].members.functions[0].body;
        let StmtKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Identifier(id) = &expr.kind else {
            panic!("expected identifier");
        };
        assert!(matches!(id.ident_ref, IdentRef::Parameter(0)));
    }

    #[test]
    fn test_constants_and_enums_inline() {
        let file =
            analyze("enum Color { RED, GREEN } const K = 3; func main() { return Color.GREEN + K; }")
                .unwrap();
        let StmtKind::Return(Some(expr)) = first_statement(&file, "main").kind else {
            panic!("expected return");
        };
        assert!(matches!(expr.as_const(), Some(crate::vm::value::Value::Int(4))));
    }

    #[test]
    fn test_outer_variable_wins_over_inner_constant() {
        let file =
            analyze("func f(c) { var k = 1; if (c) { const k = 5; return k; } return 0; }").unwrap();
        let body = &file.members.functions[0].body;
        let StmtKind::If { body: inner, .. } = &body.statements[1].kind else {
            panic!("expected if");
        };
        let StmtKind::Return(Some(expr)) = &inner.statements[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Identifier(id) = &expr.kind else {
            panic!("expected identifier");
        };
        assert!(matches!(id.ident_ref, IdentRef::LocalVar));
    }

    #[test]
    fn test_local_constant() {
        let file = analyze("func main() { const N = 2 * 3; return N; }").unwrap();
        let StmtKind::Return(Some(expr)) = first_statement(&file, "main").kind else {
            panic!("expected return");
        };
        assert!(matches!(expr.as_const(), Some(crate::vm::value::Value::Int(6))));
    }

    #[test]
    fn test_non_static_access_from_static() {
        let err = analyze("class A { var x; static func f() { return x; } }")
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::AttributeError);
        assert!(err.message.contains("statically"));
    }

    #[test]
    fn test_inherited_member_resolves() {
        let file = analyze("class A { var x; } class B : A { func f() { return x; } }").unwrap();
        let body = &file.classes[1].members.functions[0].body;
        let StmtKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Identifier(id) = &expr.kind else {
            panic!("expected identifier");
        };
        assert!(matches!(id.ident_ref, IdentRef::MemberVar(RefBase::Local)));
    }
}
