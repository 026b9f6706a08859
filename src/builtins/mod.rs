// Carbon Built-in Module
// Builtin functions (print, hex, min, ...), builtin types (int(..), Array(..), ...)
// and the methods every String, Array and Map value carries

mod array;
mod functions;
mod map;
mod string;
mod types;

use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::value::Value;
use std::fmt;

/// Native method on a builtin value: receiver, then arguments
pub type MethodFn = fn(&Value, &[Value]) -> CarbonResult<Value>;

/// Functions callable by name without an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BuiltinFunction {
    Assert = 0,
    Func,
    Line,
    File,
    Print,
    Println,
    Input,
    Hex,
    Bin,
    Min,
    Max,
    Pow,
}

const ALL_FUNCTIONS: [BuiltinFunction; 12] = [
    BuiltinFunction::Assert,
    BuiltinFunction::Func,
    BuiltinFunction::Line,
    BuiltinFunction::File,
    BuiltinFunction::Print,
    BuiltinFunction::Println,
    BuiltinFunction::Input,
    BuiltinFunction::Hex,
    BuiltinFunction::Bin,
    BuiltinFunction::Min,
    BuiltinFunction::Max,
    BuiltinFunction::Pow,
];

impl BuiltinFunction {
    pub fn from_name(name: &str) -> Option<BuiltinFunction> {
        ALL_FUNCTIONS.iter().copied().find(|f| f.name() == name)
    }

    pub fn from_u32(raw: u32) -> Option<BuiltinFunction> {
        ALL_FUNCTIONS.get(raw as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinFunction::Assert => "__assert",
            BuiltinFunction::Func => "__func",
            BuiltinFunction::Line => "__line",
            BuiltinFunction::File => "__file",
            BuiltinFunction::Print => "print",
            BuiltinFunction::Println => "println",
            BuiltinFunction::Input => "input",
            BuiltinFunction::Hex => "hex",
            BuiltinFunction::Bin => "bin",
            BuiltinFunction::Min => "min",
            BuiltinFunction::Max => "max",
            BuiltinFunction::Pow => "pow",
        }
    }

    /// Declared argument count, -1 when variadic
    pub fn arg_count(&self) -> i32 {
        match self {
            BuiltinFunction::Assert => 1,
            BuiltinFunction::Func | BuiltinFunction::Line | BuiltinFunction::File => 0,
            BuiltinFunction::Print
            | BuiltinFunction::Println
            | BuiltinFunction::Input
            | BuiltinFunction::Min
            | BuiltinFunction::Max => -1,
            BuiltinFunction::Hex | BuiltinFunction::Bin => 1,
            BuiltinFunction::Pow => 2,
        }
    }

    /// Whether a call with literal arguments may be evaluated by the analyzer
    pub fn can_const_fold(&self) -> bool {
        !matches!(
            self,
            BuiltinFunction::Print | BuiltinFunction::Println | BuiltinFunction::Input
        )
    }

    /// Compile-time-only functions never reach the VM
    pub fn is_compiletime(&self) -> bool {
        matches!(
            self,
            BuiltinFunction::Assert
                | BuiltinFunction::Func
                | BuiltinFunction::Line
                | BuiltinFunction::File
        )
    }

    /// Evaluate a pure builtin. I/O functions are serviced by the VM.
    pub fn call(&self, args: &[Value]) -> CarbonResult<Value> {
        match self {
            BuiltinFunction::Hex => functions::hex(args),
            BuiltinFunction::Bin => functions::bin(args),
            BuiltinFunction::Min => functions::min(args),
            BuiltinFunction::Max => functions::max(args),
            BuiltinFunction::Pow => functions::pow(args),
            BuiltinFunction::Assert
            | BuiltinFunction::Func
            | BuiltinFunction::Line
            | BuiltinFunction::File => Err(CarbonError::bug(
                "the compile time func should be called by the analyzer.",
            )),
            BuiltinFunction::Print | BuiltinFunction::Println | BuiltinFunction::Input => {
                Err(CarbonError::bug(format!(
                    "builtin \"{}\" needs the VM's I/O.",
                    self.name()
                )))
            }
        }
    }
}

impl fmt::Display for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Builtin type names usable as constructors and as static bases (`int.MAX`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BuiltinType {
    Null = 0,
    Bool,
    Int,
    Float,
    String,
    Str,
    Array,
    Map,
}

const ALL_TYPES: [BuiltinType; 8] = [
    BuiltinType::Null,
    BuiltinType::Bool,
    BuiltinType::Int,
    BuiltinType::Float,
    BuiltinType::String,
    BuiltinType::Str,
    BuiltinType::Array,
    BuiltinType::Map,
];

impl BuiltinType {
    pub fn from_name(name: &str) -> Option<BuiltinType> {
        ALL_TYPES.iter().copied().find(|t| t.name() == name)
    }

    pub fn from_u32(raw: u32) -> Option<BuiltinType> {
        ALL_TYPES.get(raw as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinType::Null => "null",
            BuiltinType::Bool => "bool",
            BuiltinType::Int => "int",
            BuiltinType::Float => "float",
            BuiltinType::String => "String",
            BuiltinType::Str => "str",
            BuiltinType::Array => "Array",
            BuiltinType::Map => "Map",
        }
    }

    /// Containers need a fresh object per evaluation, so only scalars fold
    pub fn can_construct_compile_time(&self) -> bool {
        !matches!(self, BuiltinType::Array | BuiltinType::Map)
    }

    pub fn construct(&self, args: &[Value]) -> CarbonResult<Value> {
        types::construct(*self, args)
    }

    /// Static constants such as `int.MAX`
    pub fn constant(&self, name: &str) -> Option<Value> {
        types::constant(*self, name)
    }

    pub fn get_member(&self, name: &str) -> CarbonResult<Value> {
        self.constant(name).ok_or_else(|| {
            CarbonError::runtime(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" doesn't exists on base {}.",
                    name,
                    self.name()
                ),
            )
        })
    }
}

impl fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Call a method on a builtin value (`"abc".upper()`, `arr.push(x)`, ...)
pub fn call_method(value: &Value, name: &str, args: &[Value]) -> CarbonResult<Value> {
    let method = match value {
        Value::String(_) => string::lookup(name),
        Value::Array(_) => array::lookup(name),
        Value::Map(_) => map::lookup(name),
        _ => None,
    };
    if let Some(method) = method {
        return method(value, args);
    }
    match name {
        "to_string" => {
            check_arity(name, 0, args.len())?;
            Ok(Value::from(value.to_string()))
        }
        "copy" => {
            check_arity_range(name, 0, 1, args.len())?;
            let deep = args.first().map(Value::is_truthy).unwrap_or(false);
            Ok(value.copy(deep))
        }
        "get_type_name" => {
            check_arity(name, 0, args.len())?;
            Ok(Value::from(value.type_name()))
        }
        "hash" => {
            check_arity(name, 0, args.len())?;
            Ok(Value::Int(value.hash_value()?))
        }
        _ => Err(match value {
            Value::Null => CarbonError::runtime(
                ErrorKind::NullPointer,
                format!("method \"{}\" called on null.", name),
            ),
            _ => CarbonError::runtime(
                ErrorKind::AttributeError,
                format!(
                    "{} has no member named \"{}\".",
                    value.type_name(),
                    name
                ),
            ),
        }),
    }
}

/// Whether `name` is a method every value answers to
pub fn has_common_method(name: &str) -> bool {
    matches!(name, "to_string" | "copy" | "get_type_name" | "hash")
}

/// Helper: check arity
pub fn check_arity(name: &str, expected: usize, got: usize) -> CarbonResult<()> {
    if expected != got {
        Err(CarbonError::runtime(
            ErrorKind::InvalidArgCount,
            format!(
                "{}() expected exactly {} argument{} but got {}.",
                name,
                expected,
                if expected == 1 { "" } else { "s" },
                got
            ),
        ))
    } else {
        Ok(())
    }
}

/// Helper: check arity with range (min, max)
pub fn check_arity_range(name: &str, min: usize, max: usize, got: usize) -> CarbonResult<()> {
    if got < min || got > max {
        Err(CarbonError::runtime(
            ErrorKind::InvalidArgCount,
            format!(
                "{}() expected minimum {} and maximum {} arguments but got {}.",
                name, min, max, got
            ),
        ))
    } else {
        Ok(())
    }
}

/// Helper: get int argument
pub fn get_int_arg(value: &Value, index: usize) -> CarbonResult<i64> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(*b as i64),
        _ => Err(CarbonError::runtime(
            ErrorKind::TypeError,
            format!(
                "expected type \"int\" at argument {}, got \"{}\".",
                index,
                value.type_name()
            ),
        )),
    }
}

/// Helper: get string argument
pub fn get_str_arg(value: &Value, index: usize) -> CarbonResult<String> {
    match value {
        Value::String(s) => Ok(s.to_string()),
        _ => Err(CarbonError::runtime(
            ErrorKind::TypeError,
            format!(
                "expected type \"String\" at argument {}, got \"{}\".",
                index,
                value.type_name()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names_round_trip() {
        for func in ALL_FUNCTIONS {
            assert_eq!(BuiltinFunction::from_name(func.name()), Some(func));
            assert_eq!(BuiltinFunction::from_u32(func as u32), Some(func));
        }
        assert_eq!(BuiltinFunction::from_name("printf"), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(BuiltinType::from_name("str"), Some(BuiltinType::Str));
        assert_eq!(BuiltinType::from_name("String"), Some(BuiltinType::String));
        assert_eq!(BuiltinType::from_name("string"), None);
    }

    #[test]
    fn test_fold_classification() {
        assert!(BuiltinFunction::Assert.is_compiletime());
        assert!(BuiltinFunction::Hex.can_const_fold());
        assert!(!BuiltinFunction::Hex.is_compiletime());
        assert!(!BuiltinFunction::Print.can_const_fold());
        assert!(BuiltinType::Int.can_construct_compile_time());
        assert!(!BuiltinType::Array.can_construct_compile_time());
    }

    #[test]
    fn test_common_methods() {
        let v = Value::Int(3);
        assert_eq!(call_method(&v, "to_string", &[]).unwrap(), Value::string("3"));
        assert_eq!(call_method(&v, "get_type_name", &[]).unwrap(), Value::string("int"));
        let err = call_method(&v, "nope", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
        let err = call_method(&Value::Null, "nope", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NullPointer);
    }
}
