// Carbon Analyzer - Expression Reduction

use super::{Analyzer, Container};
use crate::ast::*;
use crate::error::{CarbonError, CarbonResult, ErrorKind, Span};
use crate::native::{BindData, MemberInfo};
use crate::vm::ops;
use crate::vm::value::{MapData, MapKey, Value};

impl Analyzer<'_> {
    /// Resolve and fold `expr` in place. Each node is visited once.
    pub(super) fn reduce_expr(&mut self, expr: &mut Expr) -> CarbonResult<()> {
        if expr.reduced {
            return Ok(());
        }
        expr.reduced = true;
        if matches!(expr.kind, ExprKind::Call { .. }) {
            return self.reduce_call(expr);
        }

        let span = expr.span;
        let folded = match &mut expr.kind {
            ExprKind::Identifier(id) => self.reduce_identifier(id)?,
            ExprKind::Array(items) => self.reduce_array(items)?,
            ExprKind::Map(pairs) => self.reduce_map(pairs)?,
            ExprKind::Index { base, member } => self.reduce_index(base, member)?,
            ExprKind::MappedIndex { base, key } => self.reduce_mapped_index(base, key)?,
            ExprKind::Operator { op, args } => self.reduce_operator(*op, args, span)?,
            ExprKind::Const(_)
            | ExprKind::This
            | ExprKind::Super
            | ExprKind::BuiltinFunc(_)
            | ExprKind::BuiltinType(_)
            | ExprKind::Call { .. } => None,
        };
        if let Some(kind) = folded {
            expr.kind = kind;
        }
        Ok(())
    }

    fn reduce_array(&mut self, items: &mut [Expr]) -> CarbonResult<Option<ExprKind>> {
        for item in items.iter_mut() {
            self.reduce_expr(item)?;
        }
        if !self.ctx.const_expr || !items.iter().all(Expr::is_const) {
            return Ok(None);
        }
        let values = items.iter().filter_map(|item| item.as_const().cloned()).collect();
        Ok(Some(ExprKind::Const(Value::array(values))))
    }

    fn reduce_map(&mut self, pairs: &mut [(Expr, Expr)]) -> CarbonResult<Option<ExprKind>> {
        for (key, value) in pairs.iter_mut() {
            self.reduce_expr(key)?;
            let unhashable = match &key.kind {
                ExprKind::Const(constant) if MapKey::from_value(constant).is_err() => {
                    Some(constant.type_name())
                }
                ExprKind::Array(_) => Some("Array".to_string()),
                ExprKind::Map(_) => Some("Map".to_string()),
                _ => None,
            };
            if let Some(type_name) = unhashable {
                return Err(self.error(
                    ErrorKind::TypeError,
                    format!("unhashable type {} used as map key.", type_name),
                    key.span,
                ));
            }
            self.reduce_expr(value)?;
        }
        if !self.ctx.const_expr || !pairs.iter().all(|(k, v)| k.is_const() && v.is_const()) {
            return Ok(None);
        }

        let mut data = MapData::default();
        for (key, value) in pairs.iter() {
            if let (Some(key), Some(value)) = (key.as_const(), value.as_const()) {
                data.insert(MapKey::from_value(key)?, value.clone());
            }
        }
        Ok(Some(ExprKind::Const(Value::map(data))))
    }

    fn reduce_mapped_index(&mut self, base: &mut Expr, key: &mut Expr) -> CarbonResult<Option<ExprKind>> {
        self.reduce_expr(base)?;
        self.reduce_expr(key)?;
        match (base.as_const(), key.as_const()) {
            (Some(on), Some(index)) => on
                .get_mapped(index)
                .map(|value| Some(ExprKind::Const(value)))
                .map_err(|e| self.rethrow(e, key.span)),
            _ => Ok(None),
        }
    }

    fn reduce_operator(&mut self, op: OpType, args: &mut [Expr], span: Span) -> CarbonResult<Option<ExprKind>> {
        for arg in args.iter_mut() {
            self.reduce_expr(arg)?;
        }
        if op.is_assignment() {
            self.check_assignment_target(&args[0])?;
            return Ok(None);
        }

        let Some(values) = args.iter().map(Expr::as_const).collect::<Option<Vec<&Value>>>() else {
            return Ok(None);
        };
        let folded = match op {
            OpType::And => Value::Bool(values[0].is_truthy() && values[1].is_truthy()),
            OpType::Or => Value::Bool(values[0].is_truthy() || values[1].is_truthy()),
            _ => {
                let operator = op
                    .to_operator()
                    .ok_or_else(|| CarbonError::bug(format!("no operator for {}", op.symbol())))?;
                let result = if op.is_unary() {
                    ops::unary(operator, values[0])
                } else {
                    ops::binary(operator, values[0], values[1])
                };
                result.map_err(|e| self.rethrow(e, span))?
            }
        };
        Ok(Some(ExprKind::Const(folded)))
    }

    fn check_assignment_target(&self, target: &Expr) -> CarbonResult<()> {
        let message = match &target.kind {
            ExprKind::Identifier(id) if id.ident_ref.is_assignable() => return Ok(()),
            ExprKind::Index { .. } | ExprKind::MappedIndex { .. } => return Ok(()),
            ExprKind::Identifier(_) | ExprKind::Call { .. } | ExprKind::Operator { .. } => {
                "invalid assignment (only assignment on variables/parameters are valid)."
            }
            ExprKind::This => "can't assign anything to \"this\".",
            ExprKind::Super => "can't assign anything to \"super\".",
            ExprKind::Const(_) => "can't assign anything to constant values.",
            ExprKind::Array(_) => "can't assign anything to array literal.",
            ExprKind::Map(_) => "can't assign anything to map literal.",
            ExprKind::BuiltinFunc(_) => "can't assign anything to builtin function.",
            ExprKind::BuiltinType(_) => "can't assign anything to builtin type.",
        };
        Err(self.error(ErrorKind::TypeError, message, target.span))
    }

    fn reduce_index(&mut self, base: &mut Expr, member: &mut Identifier) -> CarbonResult<Option<ExprKind>> {
        match base.kind {
            ExprKind::This => return self.reduce_this_member(member),
            ExprKind::Super => return self.reduce_super_member(member),
            _ => {}
        }
        self.reduce_expr(base)?;

        match &base.kind {
            ExprKind::BuiltinType(ty) => ty
                .get_member(&member.name)
                .map(|value| Some(ExprKind::Const(value)))
                .map_err(|e| self.rethrow(e, member.span)),
            ExprKind::Const(value) => value
                .get_member(&member.name)
                .map(|value| Some(ExprKind::Const(value)))
                .map_err(|e| self.rethrow(e, member.span)),
            ExprKind::Identifier(id) => {
                let (ident_ref, name) = (id.ident_ref.clone(), id.name.clone());
                self.reduce_named_member(&ident_ref, &name, member)
            }
            _ => Ok(None),
        }
    }

    /// `this.x` becomes a resolved identifier; functions stay as an index so
    /// the instance is bound when they are read
    fn reduce_this_member(&mut self, member: &mut Identifier) -> CarbonResult<Option<ExprKind>> {
        let class = self.ctx.class.ok_or_else(|| {
            self.error(
                ErrorKind::SyntaxError,
                "keyword \"this\" only be used in non-static member function.",
                member.span,
            )
        })?;
        let found = self.find_member(Container::Class(class), &member.name)?;
        match found {
            IdentRef::Unknown => Err(self.error(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" isn't exists in base \"{}\".",
                    member.name, self.file.classes[class].name
                ),
                member.span,
            )),
            IdentRef::MemberConst(value) | IdentRef::EnumValue(value) => {
                Ok(Some(ExprKind::Const(value)))
            }
            IdentRef::Function(_) | IdentRef::EnumName(_) => {
                member.ident_ref = found;
                Ok(None)
            }
            found => {
                let mut id = Identifier {
                    name: member.name.clone(),
                    span: member.span,
                    ident_ref: found,
                };
                let folded = self.reduce_identifier(&mut id)?;
                Ok(Some(folded.unwrap_or(ExprKind::Identifier(id))))
            }
        }
    }

    fn reduce_super_member(&mut self, member: &mut Identifier) -> CarbonResult<Option<ExprKind>> {
        let Some(class) = self.ctx.class else {
            return Err(self.error(ErrorKind::SyntaxError, "invalid super call.", member.span));
        };
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
            IdentRef::MemberConst(value) | IdentRef::EnumValue(value) => {
                Ok(Some(ExprKind::Const(value)))
            }
            IdentRef::MemberVar(_) => Err(self.error(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" cannot be access with \"super\" use \"this\" instead.",
                    member.name
                ),
                member.span,
            )),
            _ => Ok(None),
        }
    }

    /// `Name.member` where `Name` is an enum, a class or an import
    fn reduce_named_member(
        &mut self,
        base: &IdentRef,
        base_name: &str,
        member: &Identifier,
    ) -> CarbonResult<Option<ExprKind>> {
        let missing = |this: &Self, kind| {
            Err(this.error(
                kind,
                format!(
                    "attribute \"{}\" isn't exists in base \"{}\".",
                    member.name, base_name
                ),
                member.span,
            ))
        };

        match base {
            IdentRef::EnumName(enum_ref) => match self.enum_ref_value(enum_ref, &member.name)? {
                Some(value) => Ok(Some(ExprKind::Const(Value::Int(value)))),
                None => missing(self, ErrorKind::AttributeError),
            },
            IdentRef::CarbonClass(class) => match self.find_member(Container::Class(*class), &member.name)? {
                IdentRef::Unknown => missing(self, ErrorKind::AttributeError),
                IdentRef::MemberVar(_) => Err(self.error(
                    ErrorKind::AttributeError,
                    format!(
                        "non-static attribute \"{}\" cannot be access with a class reference \"{}\".",
                        member.name, base_name
                    ),
                    member.span,
                )),
                IdentRef::MemberConst(value) | IdentRef::EnumValue(value) => {
                    Ok(Some(ExprKind::Const(value)))
                }
                _ => Ok(None),
            },
            IdentRef::NativeClass(class) => match self.natives.find_bind_data(class, &member.name) {
                None => Err(self.error(
                    ErrorKind::NameError,
                    format!(
                        "attribute \"{}\" doesn't exists on base {}.",
                        member.name, class
                    ),
                    member.span,
                )),
                Some(BindData::StaticConst(value)) => Ok(Some(ExprKind::Const(value.clone()))),
                Some(BindData::EnumValue(value)) => Ok(Some(ExprKind::Const(Value::Int(*value)))),
                Some(_) => Ok(None),
            },
            IdentRef::Extern(bytecode) => match bytecode.find_member_info(&member.name) {
                None => missing(self, ErrorKind::AttributeError),
                Some(MemberInfo::Constant(value)) => Ok(Some(ExprKind::Const(value))),
                Some(MemberInfo::EnumValue(value)) => Ok(Some(ExprKind::Const(Value::Int(value)))),
                Some(_) => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analyzer::Analyzer;
    use crate::ast::*;
    use crate::error::{CarbonResult, ErrorKind};
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

    fn const_of(source: &str) -> Value {
        let file = analyze(source).unwrap();
        let index = file.members.find_constant("R").unwrap();
        file.members.constants[index].value.as_const().unwrap().clone()
    }

    #[test]
    fn test_operator_folding() {
        assert!(matches!(const_of("const R = -(2 + 3) * 2;"), Value::Int(-10)));
        assert!(matches!(const_of("const R = 1 < 2 && !false;"), Value::Bool(true)));
        assert!(matches!(const_of("const R = 7 % 4;"), Value::Int(3)));
    }

    #[test]
    fn test_builtin_type_members() {
        assert!(matches!(const_of("const R = int.MAX;"), Value::Int(i64::MAX)));
        let err = analyze("const R = int.nothing;").err().unwrap();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_mapped_index_folding() {
        assert!(matches!(const_of("const R = [10, 20, 30][1];"), Value::Int(20)));
        assert_eq!(const_of("const R = {\"a\" : 1}[\"a\"];").to_string(), "1");
    }

    #[test]
    fn test_division_by_zero_is_located() {
        let err = analyze("const R = 1 / 0;").err().unwrap();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        assert_eq!(err.span.line(), 1);
    }

    #[test]
    fn test_unhashable_map_key() {
        let err = analyze("func main() { var m = { [1] : 2 }; }").err().unwrap();
        assert_eq!(err.kind, ErrorKind::TypeError);
        assert!(err.message.contains("unhashable"));
    }

    #[test]
    fn test_invalid_assignments() {
        let cases = [
            ("const K = 1; func main() { K = 2; }", "constant values"),
            ("func main() { [1] = 2; }", "array literal"),
            ("func f() {} func main() { f = 2; }", "only assignment on variables"),
            ("func main() { print = 2; }", "builtin function"),
        ];
        for (source, expected) in cases {
            let err = analyze(source).err().unwrap();
            assert_eq!(err.kind, ErrorKind::TypeError, "{}", source);
            assert!(err.message.contains(expected), "{}", err.message);
        }
    }

    #[test]
    fn test_class_reference_members() {
        let err = analyze("class A { var x; } func main() { return A.x; }")
            .err()
            .unwrap();
        assert!(err.message.contains("cannot be access with a class reference"));

        let file = analyze("class A { const K = 9; } func main() { return A.K; }").unwrap();
        let body = &file.members.functions[0].body;
        let StmtKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(expr.as_const(), Some(Value::Int(9))));
    }

    #[test]
    fn test_this_member_resolves() {
        let file = analyze("class A { var x; func f() { return this.x; } }").unwrap();
        let body = &file.classes[0].members.functions[0].body;
        let StmtKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(
            &expr.kind,
            ExprKind::Identifier(id) if matches!(id.ident_ref, IdentRef::MemberVar(RefBase::Local))
        ));

        let err = analyze("class A { func f() { return this.y; } }").err().unwrap();
        assert_eq!(err.kind, ErrorKind::AttributeError);
    }

    #[test]
    fn test_super_member_var_rejected() {
        let err = analyze("class A { var x; } class B : A { func f() { return super.x; } }")
            .err()
            .unwrap();
        assert!(err.message.contains("use \"this\" instead"));
    }
}
