// Carbon Runtime Values
// Tagged dynamic value shared by the analyzer (folded literals) and the VM
// Single-threaded: reference types use Rc/RefCell

use crate::builtins::{BuiltinFunction, BuiltinType};
use crate::compiler::{Bytecode, EnumInfo, Function};
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::native::NativeObject;
use crate::vm::instance::Instance;
use rustc_hash::{FxHashMap, FxHasher};
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type MapRef = Rc<RefCell<MapData>>;

/// Runtime value types
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Map(MapRef),
    /// Instance of a scripted class
    Instance(Rc<Instance>),
    /// A compiled class, or an imported file module
    Class(Rc<Bytecode>),
    /// A scripted function together with the bytecode it runs in
    Function(FunctionRef),
    Enum(Rc<EnumInfo>),
    /// Instance of a host-provided class
    Native(Rc<dyn NativeObject>),
    /// Reference to a registered native class (constructible, has statics)
    NativeClass(Rc<str>),
    BuiltinFunc(BuiltinFunction),
    BuiltinType(BuiltinType),
    Iterator(Rc<RefCell<ValueIter>>),
}

#[derive(Clone)]
pub struct FunctionRef {
    pub function: Rc<Function>,
    pub owner: Rc<Bytecode>,
}

/// Coarse value classification, used for native argument type checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Var,
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Map,
    Object,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Var => "var",
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "String",
            ValueType::Array => "Array",
            ValueType::Map => "Map",
            ValueType::Object => "Object",
        }
    }

    /// Whether a value of type `actual` can be passed where `self` is expected
    pub fn accepts(&self, actual: ValueType) -> bool {
        match self {
            ValueType::Var => true,
            ValueType::Float => matches!(actual, ValueType::Float | ValueType::Int),
            expected => *expected == actual,
        }
    }
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    pub fn map(data: MapData) -> Value {
        Value::Map(Rc::new(RefCell::new(data)))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Map(_) => ValueType::Map,
            _ => ValueType::Object,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::String(_) => "String".to_string(),
            Value::Array(_) => "Array".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::Instance(instance) => instance.blueprint.name().to_string(),
            Value::Class(bytecode) => bytecode.name().to_string(),
            Value::Function(_) => "Function".to_string(),
            Value::Enum(info) => info.name.clone(),
            Value::Native(object) => object.class_name().to_string(),
            Value::NativeClass(name) => name.to_string(),
            Value::BuiltinFunc(_) => "BuiltinFunction".to_string(),
            Value::BuiltinType(_) => "BuiltinType".to_string(),
            Value::Iterator(_) => "Iterator".to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(arr) => !arr.borrow().is_empty(),
            Value::Map(map) => !map.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> CarbonResult<i64> {
        match self {
            Value::Bool(b) => Ok(*b as i64),
            Value::Int(n) => Ok(*n),
            Value::Float(n) => Ok(*n as i64),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("can't cast \"{}\" to \"int\".", other.type_name()),
            )),
        }
    }

    pub fn as_float(&self) -> CarbonResult<f64> {
        match self {
            Value::Bool(b) => Ok(*b as i64 as f64),
            Value::Int(n) => Ok(*n as f64),
            Value::Float(n) => Ok(*n),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("can't cast \"{}\" to \"float\".", other.type_name()),
            )),
        }
    }

    pub fn as_str(&self) -> CarbonResult<Rc<str>> {
        match self {
            Value::String(s) => Ok(s.clone()),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("can't cast \"{}\" to \"String\".", other.type_name()),
            )),
        }
    }

    pub fn as_array(&self) -> CarbonResult<ArrayRef> {
        match self {
            Value::Array(arr) => Ok(arr.clone()),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("can't cast \"{}\" to \"Array\".", other.type_name()),
            )),
        }
    }

    /// Literal kinds the analyzer may fold into the constant table
    pub fn is_literal(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                true
            }
            Value::Array(arr) => arr.borrow().iter().all(Value::is_literal),
            Value::Map(map) => map.borrow().values().all(Value::is_literal),
            _ => false,
        }
    }

    /// Structural equality for primitives and containers, identity for objects
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => *a == (*b != 0),
            (Value::Bool(a), Value::Float(b)) | (Value::Float(b), Value::Bool(a)) => {
                *a == (*b != 0.0)
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map(|w| v.equals(w)).unwrap_or(false))
            }
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(&a.function, &b.function),
            (Value::Enum(a), Value::Enum(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::NativeClass(a), Value::NativeClass(b)) => a == b,
            (Value::BuiltinFunc(a), Value::BuiltinFunc(b)) => a == b,
            (Value::BuiltinType(a), Value::BuiltinType(b)) => a == b,
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Same type tag and equal, used to deduplicate the constant table
    pub fn same_literal(&self, other: &Value) -> bool {
        self.value_type() == other.value_type() && self.equals(other)
    }

    pub fn hash_value(&self) -> CarbonResult<i64> {
        let key = MapKey::from_value(self)?;
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        Ok(hasher.finish() as i64)
    }

    /// Copy a value. Containers are always duplicated; `deep` also duplicates nested containers.
    pub fn copy(&self, deep: bool) -> Value {
        match self {
            Value::Array(arr) => {
                let items = arr
                    .borrow()
                    .iter()
                    .map(|v| if deep { v.copy(true) } else { v.clone() })
                    .collect();
                Value::array(items)
            }
            Value::Map(map) => {
                let mut data = MapData::default();
                for (k, v) in map.borrow().iter() {
                    data.insert(k.clone(), if deep { v.copy(true) } else { v.clone() });
                }
                Value::map(data)
            }
            other => other.clone(),
        }
    }

    /// Quoted representation used inside container displays
    pub fn repr(&self) -> String {
        match self {
            Value::String(s) => format!("\"{}\"", s),
            other => other.to_string(),
        }
    }

    pub fn get_mapped(&self, key: &Value) -> CarbonResult<Value> {
        match self {
            Value::String(s) => {
                let index = checked_index(key, s.chars().count())?;
                Ok(s.chars()
                    .nth(index)
                    .map(|c| Value::string(&c.to_string()))
                    .unwrap_or(Value::Null))
            }
            Value::Array(arr) => {
                let arr = arr.borrow();
                let index = checked_index(key, arr.len())?;
                Ok(arr[index].clone())
            }
            Value::Map(map) => {
                let key_ref = MapKey::from_value(key)?;
                map.borrow().get(&key_ref).cloned().ok_or_else(|| {
                    CarbonError::runtime(
                        ErrorKind::AttributeError,
                        format!("key {} does not exists on base Map.", key.repr()),
                    )
                })
            }
            Value::Native(object) => object.get_mapped(key),
            other => Err(CarbonError::runtime(
                ErrorKind::OperatorNotSupported,
                format!("operator[] not supported on base {}", other.type_name()),
            )),
        }
    }

    /// Strings are values, so assigning a character replaces `self`
    pub fn set_mapped(&mut self, key: &Value, value: Value) -> CarbonResult<()> {
        match self {
            Value::String(s) => {
                let mut chars: Vec<char> = s.chars().collect();
                let index = checked_index(key, chars.len())?;
                let replacement = match &value {
                    Value::String(v) if v.chars().count() == 1 => v.chars().next(),
                    Value::String(_) => {
                        return Err(CarbonError::runtime(
                            ErrorKind::TypeError,
                            "expected a string of size 1 to assign",
                        ))
                    }
                    _ => {
                        return Err(CarbonError::runtime(
                            ErrorKind::TypeError,
                            "expected a string value to assign",
                        ))
                    }
                };
                if let Some(c) = replacement {
                    chars[index] = c;
                }
                *s = Rc::from(chars.into_iter().collect::<String>());
                Ok(())
            }
            Value::Array(arr) => {
                let mut arr = arr.borrow_mut();
                let index = checked_index(key, arr.len())?;
                arr[index] = value;
                Ok(())
            }
            Value::Map(map) => {
                let key = MapKey::from_value(key)?;
                map.borrow_mut().insert(key, value);
                Ok(())
            }
            Value::Native(object) => object.set_mapped(key, value),
            other => Err(CarbonError::runtime(
                ErrorKind::OperatorNotSupported,
                format!("operator[] not supported on base {}", other.type_name()),
            )),
        }
    }

    /// Start the iteration protocol for builtin iterables
    pub fn iter_begin(&self) -> CarbonResult<Value> {
        let iter = match self {
            Value::Int(n) => ValueIter::Range { next: 0, end: *n },
            Value::String(s) => ValueIter::Chars {
                chars: s.chars().collect(),
                pos: 0,
            },
            Value::Array(arr) => ValueIter::Array {
                array: arr.clone(),
                pos: 0,
            },
            Value::Map(map) => ValueIter::Keys {
                keys: map.borrow().keys().map(MapKey::to_value).collect(),
                pos: 0,
            },
            Value::Null => {
                return Err(CarbonError::runtime(
                    ErrorKind::NullPointer,
                    "null is not iterable.",
                ))
            }
            other => {
                return Err(CarbonError::runtime(
                    ErrorKind::OperatorNotSupported,
                    format!("{} is not iterable.", other.type_name()),
                ))
            }
        };
        Ok(Value::Iterator(Rc::new(RefCell::new(iter))))
    }

    /// Attribute access on values without a member table
    pub fn get_member(&self, name: &str) -> CarbonResult<Value> {
        match self {
            Value::Null => Err(CarbonError::runtime(
                ErrorKind::NullPointer,
                format!("attribute \"{}\" accessed on null.", name),
            )),
            Value::Enum(info) => info.get(name).map(Value::Int).ok_or_else(|| {
                CarbonError::runtime(
                    ErrorKind::AttributeError,
                    format!("\"{}\" doesn't exists on base enum \"{}\".", name, info.name),
                )
            }),
            Value::Native(object) => object.get_member(name),
            other => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!(
                    "attribute \"{}\" does not exists on base {}.",
                    name,
                    other.type_name()
                ),
            )),
        }
    }
}

fn checked_index(key: &Value, len: usize) -> CarbonResult<usize> {
    let index = match key {
        Value::Int(n) => *n,
        _ => {
            return Err(CarbonError::runtime(
                ErrorKind::TypeError,
                "expected a numeric value for indexing.",
            ))
        }
    };
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved as usize >= len {
        return Err(CarbonError::runtime(
            ErrorKind::InvalidIndex,
            format!("index {} out of range (size {}).", index, len),
        ));
    }
    Ok(resolved as usize)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Array(arr) => {
                let items: Vec<String> = arr.borrow().iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Map(map) => {
                let items: Vec<String> = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k.to_value().repr(), v.repr()))
                    .collect();
                write!(f, "{{ {} }}", items.join(", "))
            }
            Value::Instance(instance) => write!(f, "[{} Object]", instance.blueprint.name()),
            Value::Class(bytecode) => write!(f, "[Class {}]", bytecode.name()),
            Value::Function(func) => write!(f, "[Function {}]", func.function.name),
            Value::Enum(info) => write!(f, "[Enum {}]", info.name),
            Value::Native(object) => write!(f, "{}", object.to_string()),
            Value::NativeClass(name) => write!(f, "[NativeClass {}]", name),
            Value::BuiltinFunc(func) => write!(f, "[BuiltinFunction {}]", func.name()),
            Value::BuiltinType(ty) => write!(f, "[BuiltinType {}]", ty.name()),
            Value::Iterator(_) => write!(f, "[Iterator]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

/// Hashable projection of a value, used as map key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    String(Rc<str>),
}

impl MapKey {
    pub fn from_value(value: &Value) -> CarbonResult<MapKey> {
        match value {
            Value::Bool(b) => Ok(MapKey::Bool(*b)),
            Value::Int(n) => Ok(MapKey::Int(*n)),
            Value::Float(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Ok(MapKey::Int(*n as i64)),
            Value::Float(n) => Ok(MapKey::Float(n.to_bits())),
            Value::String(s) => Ok(MapKey::String(s.clone())),
            Value::Null => Err(CarbonError::runtime(
                ErrorKind::NullPointer,
                "null can't be used as a key.",
            )),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("key of type {} is unhashable.", other.type_name()),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Int(n) => Value::Int(*n),
            MapKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            MapKey::String(s) => Value::String(s.clone()),
        }
    }
}

/// Insertion-ordered hash map backing `Map` values
#[derive(Debug, Clone, Default)]
pub struct MapData {
    entries: Vec<(MapKey, Value)>,
    index: FxHashMap<MapKey, usize>,
}

impl MapData {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.index.get(key).map(|i| &self.entries[*i].1)
    }

    pub fn contains(&self, key: &MapKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, key: MapKey, value: Value) {
        if let Some(i) = self.index.get(&key) {
            self.entries[*i].1 = value;
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &MapKey) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

/// State of a builtin iteration (`for (var x : iterable)`)
#[derive(Debug)]
pub enum ValueIter {
    Range { next: i64, end: i64 },
    Chars { chars: Vec<char>, pos: usize },
    Array { array: ArrayRef, pos: usize },
    Keys { keys: Vec<Value>, pos: usize },
}

impl ValueIter {
    pub fn has_next(&self) -> bool {
        match self {
            ValueIter::Range { next, end } => next < end,
            ValueIter::Chars { chars, pos } => *pos < chars.len(),
            ValueIter::Array { array, pos } => *pos < array.borrow().len(),
            ValueIter::Keys { keys, pos } => *pos < keys.len(),
        }
    }

    pub fn next_value(&mut self) -> Option<Value> {
        if !self.has_next() {
            return None;
        }
        Some(match self {
            ValueIter::Range { next, .. } => {
                *next += 1;
                Value::Int(*next - 1)
            }
            ValueIter::Chars { chars, pos } => {
                *pos += 1;
                Value::string(&chars[*pos - 1].to_string())
            }
            ValueIter::Array { array, pos } => {
                *pos += 1;
                array.borrow()[*pos - 1].clone()
            }
            ValueIter::Keys { keys, pos } => {
                *pos += 1;
                keys[*pos - 1].clone()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Float(0.5).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::array(vec![Value::Null]).is_truthy());
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::Int(1).same_literal(&Value::Float(1.0)));
        assert!(!Value::string("1").equals(&Value::Int(1)));
    }

    #[test]
    fn test_float_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_container_display() {
        let arr = Value::array(vec![Value::Int(1), Value::string("a")]);
        assert_eq!(arr.to_string(), "[1, \"a\"]");
    }

    #[test]
    fn test_map_preserves_insertion_order() {
        let mut data = MapData::default();
        data.insert(MapKey::String(Rc::from("b")), Value::Int(1));
        data.insert(MapKey::String(Rc::from("a")), Value::Int(2));
        data.insert(MapKey::String(Rc::from("c")), Value::Int(3));
        data.remove(&MapKey::String(Rc::from("a")));
        let keys: Vec<Value> = data.keys().map(MapKey::to_value).collect();
        assert_eq!(keys, vec![Value::string("b"), Value::string("c")]);
        assert_eq!(data.get(&MapKey::String(Rc::from("c"))), Some(&Value::Int(3)));
    }

    #[test]
    fn test_mapped_access() {
        let arr = Value::array(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(arr.get_mapped(&Value::Int(1)).unwrap(), Value::Int(20));
        assert_eq!(arr.get_mapped(&Value::Int(-1)).unwrap(), Value::Int(20));
        let err = arr.get_mapped(&Value::Int(5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIndex);

        let mut s = Value::string("cat");
        s.set_mapped(&Value::Int(0), Value::string("b")).unwrap();
        assert_eq!(s, Value::string("bat"));
    }

    #[test]
    fn test_unhashable_key() {
        let map = Value::map(MapData::default());
        let err = map.get_mapped(&Value::array(vec![])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }

    #[test]
    fn test_copy_is_independent() {
        let inner = Value::array(vec![Value::Int(1)]);
        let outer = Value::array(vec![inner.clone()]);
        let deep = outer.copy(true);
        inner.as_array().unwrap().borrow_mut().push(Value::Int(2));
        let copied_inner = deep.get_mapped(&Value::Int(0)).unwrap();
        assert_eq!(copied_inner.as_array().unwrap().borrow().len(), 1);
    }

    #[test]
    fn test_iteration() {
        let iter = Value::Int(3).iter_begin().unwrap();
        let Value::Iterator(iter) = iter else {
            panic!("expected an iterator");
        };
        let mut seen = Vec::new();
        while let Some(v) = iter.borrow_mut().next_value() {
            seen.push(v);
        }
        assert_eq!(seen, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
    }
}
