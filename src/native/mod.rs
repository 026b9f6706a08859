// Carbon Native Class Registry
// Host-provided classes: constructors, methods, properties, constants and enums

mod buffer;

pub use buffer::Buffer;

use crate::compiler::EnumInfo;
use crate::error::{arg_count_mismatch, CarbonError, CarbonResult, ErrorKind};
use crate::vm::value::{Value, ValueType};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Object created by a native class
pub trait NativeObject {
    fn class_name(&self) -> &str;

    fn to_string(&self) -> String {
        format!("[{} instance]", self.class_name())
    }

    /// Member variable read
    fn get_member(&self, name: &str) -> CarbonResult<Value> {
        Err(CarbonError::runtime(
            ErrorKind::AttributeError,
            format!(
                "attribute \"{}\" does not exists on base {}.",
                name,
                self.class_name()
            ),
        ))
    }

    fn set_member(&self, name: &str, _value: Value) -> CarbonResult<()> {
        Err(CarbonError::runtime(
            ErrorKind::AttributeError,
            format!(
                "attribute \"{}\" does not exists on base {}.",
                name,
                self.class_name()
            ),
        ))
    }

    fn get_mapped(&self, _key: &Value) -> CarbonResult<Value> {
        Err(CarbonError::runtime(
            ErrorKind::OperatorNotSupported,
            format!("operator[] not supported on base {}", self.class_name()),
        ))
    }

    fn set_mapped(&self, _key: &Value, _value: Value) -> CarbonResult<()> {
        Err(CarbonError::runtime(
            ErrorKind::OperatorNotSupported,
            format!("operator[] not supported on base {}", self.class_name()),
        ))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Native function signature: bound self (`Null` for statics and constructors), then arguments
pub type NativeFn = fn(&Value, &[Value]) -> CarbonResult<Value>;

/// A native function with a uniform calling convention
#[derive(Clone)]
pub struct NativeCallable {
    pub name: String,
    /// Declared parameter types, `ValueType::Var` accepts anything
    pub arg_types: Vec<ValueType>,
    /// Defaults for the trailing parameters
    pub default_args: Vec<Value>,
    pub variadic: bool,
    pub func: NativeFn,
}

impl NativeCallable {
    pub fn new(name: &str, arg_types: Vec<ValueType>, func: NativeFn) -> Self {
        Self {
            name: name.to_string(),
            arg_types,
            default_args: Vec::new(),
            variadic: false,
            func,
        }
    }

    pub fn variadic(name: &str, func: NativeFn) -> Self {
        Self {
            variadic: true,
            ..Self::new(name, Vec::new(), func)
        }
    }

    pub fn with_defaults(mut self, defaults: Vec<Value>) -> Self {
        self.default_args = defaults;
        self
    }

    /// -1 when variadic
    pub fn arg_count(&self) -> i32 {
        if self.variadic {
            -1
        } else {
            self.arg_types.len() as i32
        }
    }

    pub fn default_arg_count(&self) -> i32 {
        self.default_args.len() as i32
    }

    /// Check a literal argument against the declared type, 0-based index
    pub fn check_arg_type(&self, index: usize, value: &Value) -> Option<String> {
        let expected = self.arg_types.get(index)?;
        if expected.accepts(value.value_type()) {
            None
        } else {
            Some(format!(
                "expected type \"{}\" at argument {}.",
                expected.name(),
                index
            ))
        }
    }

    pub fn invoke(&self, this: &Value, args: &[Value]) -> CarbonResult<Value> {
        if self.variadic {
            return (self.func)(this, args);
        }
        if let Some(message) =
            arg_count_mismatch(self.arg_count(), self.default_arg_count(), args.len())
        {
            return Err(CarbonError::runtime(ErrorKind::InvalidArgCount, message));
        }
        for (i, arg) in args.iter().enumerate() {
            if let Some(message) = self.check_arg_type(i, arg) {
                return Err(CarbonError::runtime(ErrorKind::TypeError, message));
            }
        }

        if args.len() < self.arg_types.len() {
            let mut filled = args.to_vec();
            let skip = self.default_args.len() - (self.arg_types.len() - args.len());
            filled.extend(self.default_args[skip..].iter().map(|v| v.copy(true)));
            return (self.func)(this, &filled);
        }
        (self.func)(this, args)
    }
}

impl std::fmt::Debug for NativeCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeCallable({})", self.name)
    }
}

/// A named binding on a native class
#[derive(Debug)]
pub enum BindData {
    Method(NativeCallable),
    StaticFunc(NativeCallable),
    /// Stored on the object; read and written through `NativeObject`
    MemberVar,
    StaticVar(RefCell<Value>),
    StaticConst(Value),
    Enum(Rc<EnumInfo>),
    EnumValue(i64),
}

/// Reflective view of a class member, shared by native classes and compiled bytecode
#[derive(Debug, Clone)]
pub enum MemberInfo {
    Method {
        arg_count: i32,
        default_count: i32,
        is_static: bool,
    },
    Property {
        is_static: bool,
    },
    Constant(Value),
    Enum(Rc<EnumInfo>),
    EnumValue(i64),
    Class,
}

#[derive(Debug)]
pub struct NativeClassInfo {
    pub name: String,
    pub parent: Option<String>,
    pub constructor: Option<NativeCallable>,
    pub binds: FxHashMap<String, BindData>,
}

impl NativeClassInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            constructor: None,
            binds: FxHashMap::default(),
        }
    }

    pub fn bind(&mut self, name: &str, data: BindData) {
        self.binds.insert(name.to_string(), data);
    }

    pub fn bind_enum(&mut self, name: &str, values: &[(&str, i64)]) {
        let info = EnumInfo::new(
            name,
            values.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        );
        for (value_name, value) in values {
            self.bind(value_name, BindData::EnumValue(*value));
        }
        self.bind(name, BindData::Enum(Rc::new(info)));
    }
}

/// Registry of every native class visible to scripts
#[derive(Debug, Default)]
pub struct NativeClasses {
    classes: FxHashMap<String, NativeClassInfo>,
}

impl NativeClasses {
    /// Registry with the shipped classes
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(buffer::create_buffer_class());
        registry
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: NativeClassInfo) {
        self.classes.insert(info.name.clone(), info);
    }

    pub fn is_class_registered(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Parent class name, if any
    pub fn get_inheritance(&self, name: &str) -> Option<&str> {
        self.classes.get(name).and_then(|c| c.parent.as_deref())
    }

    /// Binding declared directly on `class`
    pub fn get_bind_data(&self, class: &str, name: &str) -> Option<&BindData> {
        self.classes.get(class).and_then(|c| c.binds.get(name))
    }

    /// Binding on `class` or its nearest ancestor
    pub fn find_bind_data(&self, class: &str, name: &str) -> Option<&BindData> {
        let mut current = Some(class);
        while let Some(class_name) = current {
            if let Some(bind) = self.get_bind_data(class_name, name) {
                return Some(bind);
            }
            current = self.get_inheritance(class_name);
        }
        None
    }

    /// Constructor of `class` or its nearest ancestor
    pub fn get_constructor(&self, class: &str) -> Option<&NativeCallable> {
        let mut current = Some(class);
        while let Some(class_name) = current {
            if let Some(ctor) = self.classes.get(class_name).and_then(|c| c.constructor.as_ref()) {
                return Some(ctor);
            }
            current = self.get_inheritance(class_name);
        }
        None
    }

    pub fn get_member_info(&self, class: &str, name: &str) -> Option<MemberInfo> {
        let info = match self.find_bind_data(class, name)? {
            BindData::Method(f) => MemberInfo::Method {
                arg_count: f.arg_count(),
                default_count: f.default_arg_count(),
                is_static: false,
            },
            BindData::StaticFunc(f) => MemberInfo::Method {
                arg_count: f.arg_count(),
                default_count: f.default_arg_count(),
                is_static: true,
            },
            BindData::MemberVar => MemberInfo::Property { is_static: false },
            BindData::StaticVar(_) => MemberInfo::Property { is_static: true },
            BindData::StaticConst(v) => MemberInfo::Constant(v.clone()),
            BindData::Enum(info) => MemberInfo::Enum(info.clone()),
            BindData::EnumValue(v) => MemberInfo::EnumValue(*v),
        };
        Some(info)
    }

    /// Run the constructor of `class` and return the new object
    pub fn construct(&self, class: &str, args: &[Value]) -> CarbonResult<Rc<dyn NativeObject>> {
        let ctor = self.get_constructor(class).ok_or_else(|| {
            CarbonError::runtime(
                ErrorKind::NotImplemented,
                format!("native class \"{}\" has no constructor.", class),
            )
        })?;
        match ctor.invoke(&Value::Null, args)? {
            Value::Native(object) => Ok(object),
            other => Err(CarbonError::bug(format!(
                "native constructor of \"{}\" returned {}.",
                class,
                other.type_name()
            ))),
        }
    }

    /// Invoke a method (or static function) on a native object
    pub fn call_method_on(
        &self,
        object: &Rc<dyn NativeObject>,
        name: &str,
        args: &[Value],
    ) -> CarbonResult<Value> {
        let class = object.class_name().to_string();
        match self.find_bind_data(&class, name) {
            Some(BindData::Method(f)) => f.invoke(&Value::Native(object.clone()), args),
            Some(BindData::StaticFunc(f)) => f.invoke(&Value::Null, args),
            Some(BindData::MemberVar) => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("member \"{}\" of {} is not callable.", name, class),
            )),
            Some(_) => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("constant value \"{}.{}()\" is not callable.", class, name),
            )),
            None => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("attribute \"{}\" does not exists on base {}.", name, class),
            )),
        }
    }

    /// `Class.name(args)` on a native class
    pub fn call_static(&self, class: &str, name: &str, args: &[Value]) -> CarbonResult<Value> {
        match self.find_bind_data(class, name) {
            Some(BindData::StaticFunc(f)) => f.invoke(&Value::Null, args),
            Some(BindData::Method(_)) => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("can't call non-static method \"{}.{}()\" statically.", class, name),
            )),
            Some(_) => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("attribute \"{}.{}\" is not callable.", class, name),
            )),
            None => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("attribute \"{}\" does not exists on base {}.", name, class),
            )),
        }
    }

    /// Static read: `Class.NAME`
    pub fn get_static(&self, class: &str, name: &str) -> CarbonResult<Value> {
        match self.find_bind_data(class, name) {
            Some(BindData::StaticVar(v)) => Ok(v.borrow().clone()),
            Some(BindData::StaticConst(v)) => Ok(v.clone()),
            Some(BindData::Enum(info)) => Ok(Value::Enum(info.clone())),
            Some(BindData::EnumValue(v)) => Ok(Value::Int(*v)),
            Some(_) => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("can't access non-static attribute \"{}\" statically", name),
            )),
            None => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("attribute \"{}\" does not exists on base {}.", name, class),
            )),
        }
    }

    /// Static write: `Class.name = value`
    pub fn set_static(&self, class: &str, name: &str, value: Value) -> CarbonResult<()> {
        match self.find_bind_data(class, name) {
            Some(BindData::StaticVar(v)) => {
                *v.borrow_mut() = value;
                Ok(())
            }
            Some(BindData::StaticConst(_))
            | Some(BindData::Enum(_))
            | Some(BindData::EnumValue(_)) => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                "can't assign to constant values.",
            )),
            Some(_) => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("can't access non-static attribute \"{}\" statically", name),
            )),
            None => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("attribute \"{}\" does not exists on base {}.", name, class),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child_registry() -> NativeClasses {
        let mut registry = NativeClasses::new();
        let mut child = NativeClassInfo::new("SmallBuffer");
        child.parent = Some("Buffer".to_string());
        child.bind("LIMIT", BindData::StaticConst(Value::Int(16)));
        registry.register(child);
        registry
    }

    #[test]
    fn test_find_bind_data_walks_parents() {
        let registry = child_registry();
        assert!(registry.get_bind_data("SmallBuffer", "size").is_none());
        assert!(matches!(
            registry.find_bind_data("SmallBuffer", "size"),
            Some(BindData::Method(_))
        ));
        assert_eq!(registry.get_inheritance("SmallBuffer"), Some("Buffer"));
        assert!(registry.get_constructor("SmallBuffer").is_some());
    }

    #[test]
    fn test_member_info() {
        let registry = NativeClasses::new();
        assert!(matches!(
            registry.get_member_info("Buffer", "from_string"),
            Some(MemberInfo::Method { is_static: true, .. })
        ));
        assert!(matches!(
            registry.get_member_info("Buffer", "encoding"),
            Some(MemberInfo::Property { is_static: false })
        ));
        assert!(matches!(
            registry.get_member_info("Buffer", "UTF8"),
            Some(MemberInfo::EnumValue(1))
        ));
        assert!(registry.get_member_info("Buffer", "missing").is_none());
    }

    #[test]
    fn test_callable_arity_and_defaults() {
        fn second(_: &Value, args: &[Value]) -> CarbonResult<Value> {
            Ok(args[1].clone())
        }
        let f = NativeCallable::new("f", vec![ValueType::Int, ValueType::Var], second)
            .with_defaults(vec![Value::Int(7)]);
        assert_eq!(f.invoke(&Value::Null, &[Value::Int(1)]).unwrap(), Value::Int(7));
        let err = f.invoke(&Value::Null, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
        let err = f
            .invoke(&Value::Null, &[Value::string("x"), Value::Null])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_static_var_is_shared() {
        let registry = NativeClasses::new();
        registry
            .set_static("Buffer", "default_encoding", Value::Int(0))
            .unwrap();
        assert_eq!(
            registry.get_static("Buffer", "default_encoding").unwrap(),
            Value::Int(0)
        );
        assert!(registry.set_static("Buffer", "MAX_SIZE", Value::Int(1)).is_err());
    }
}
