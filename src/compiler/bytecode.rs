// Carbon Bytecode
// Compiled files and classes: member layout, statics, constants, enums and functions

use super::function::Function;
use crate::native::MemberInfo;
use crate::vm::value::{FunctionRef, Value};
use rustc_hash::FxHashMap;
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// A compiled enum
#[derive(Debug, Clone, PartialEq)]
pub struct EnumInfo {
    pub name: String,
    pub values: Vec<(String, i64)>,
}

impl EnumInfo {
    pub fn new(name: impl Into<String>, values: Vec<(String, i64)>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Base of a class bytecode
#[derive(Clone, Default)]
pub enum BytecodeBase {
    #[default]
    None,
    Local(Rc<Bytecode>),
    Native(String),
    Extern(Rc<Bytecode>),
}

/// A compiled file, or a class inside one
pub struct Bytecode {
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) is_class: bool,
    /// Owning file of a class
    pub(crate) file: RefCell<Weak<Bytecode>>,
    pub(crate) base: RefCell<BytecodeBase>,

    // File only
    pub(crate) global_names: Vec<String>,
    pub(crate) global_consts: Vec<Value>,
    pub(crate) classes: FxHashMap<String, Rc<Bytecode>>,
    pub(crate) externs: FxHashMap<String, Rc<Bytecode>>,

    /// Own instance members; indices start after the inherited ones
    pub(crate) members: FxHashMap<String, u32>,
    /// Inherited plus own instance members
    pub(crate) member_count: usize,
    pub(crate) static_vars: RefCell<FxHashMap<String, Value>>,
    pub(crate) constants: FxHashMap<String, Value>,
    pub(crate) enums: FxHashMap<String, Rc<EnumInfo>>,
    pub(crate) unnamed_enums: FxHashMap<String, i64>,
    pub(crate) functions: FxHashMap<String, Rc<Function>>,
    pub(crate) constructor: Option<Rc<Function>>,
    pub(crate) member_initializer: Option<Rc<Function>>,
    pub(crate) static_initializer: Option<Rc<Function>>,

    initialized: Cell<bool>,
    member_info: RefCell<FxHashMap<String, Option<MemberInfo>>>,
}

impl Bytecode {
    fn empty(name: &str, path: &str, is_class: bool) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            is_class,
            file: RefCell::new(Weak::new()),
            base: RefCell::new(BytecodeBase::None),
            global_names: Vec::new(),
            global_consts: Vec::new(),
            classes: FxHashMap::default(),
            externs: FxHashMap::default(),
            members: FxHashMap::default(),
            member_count: 0,
            static_vars: RefCell::new(FxHashMap::default()),
            constants: FxHashMap::default(),
            enums: FxHashMap::default(),
            unnamed_enums: FxHashMap::default(),
            functions: FxHashMap::default(),
            constructor: None,
            member_initializer: None,
            static_initializer: None,
            initialized: Cell::new(false),
            member_info: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn new_file(path: &str) -> Self {
        Self::empty(path, path, false)
    }

    pub fn new_class(name: &str, path: &str) -> Self {
        Self::empty(name, path, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_class(&self) -> bool {
        self.is_class
    }

    /// The file this bytecode belongs to (itself for a file)
    pub fn file(self: &Rc<Self>) -> Option<Rc<Bytecode>> {
        if self.is_class {
            self.file.borrow().upgrade()
        } else {
            Some(self.clone())
        }
    }

    pub fn set_file(&self, file: &Rc<Bytecode>) {
        *self.file.borrow_mut() = Rc::downgrade(file);
    }

    pub fn base(&self) -> Ref<'_, BytecodeBase> {
        self.base.borrow()
    }

    pub fn set_base(&self, base: BytecodeBase) {
        *self.base.borrow_mut() = base;
    }

    /// Scripted parent (local or imported)
    pub fn base_bytecode(&self) -> Option<Rc<Bytecode>> {
        match &*self.base.borrow() {
            BytecodeBase::Local(b) | BytecodeBase::Extern(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// Name of the native class at the root of the inheritance chain
    pub fn native_base(&self) -> Option<String> {
        match &*self.base.borrow() {
            BytecodeBase::Native(name) => Some(name.clone()),
            BytecodeBase::Local(b) | BytecodeBase::Extern(b) => b.native_base(),
            BytecodeBase::None => None,
        }
    }

    pub fn global_name(&self, index: u32) -> Option<&str> {
        self.global_names.get(index as usize).map(String::as_str)
    }

    pub fn global_const(&self, index: u32) -> Option<&Value> {
        self.global_consts.get(index as usize)
    }

    pub fn get_class(&self, name: &str) -> Option<Rc<Bytecode>> {
        self.classes.get(name).cloned()
    }

    pub fn get_extern(&self, alias: &str) -> Option<Rc<Bytecode>> {
        self.externs.get(alias).cloned()
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    /// Layout index of an instance member, searching the scripted bases
    pub fn get_member_index(&self, name: &str) -> Option<u32> {
        if let Some(index) = self.members.get(name) {
            return Some(*index);
        }
        self.base_bytecode()?.get_member_index(name)
    }

    pub fn constructor(&self) -> Option<&Rc<Function>> {
        self.constructor.as_ref()
    }

    pub fn member_initializer(&self) -> Option<&Rc<Function>> {
        self.member_initializer.as_ref()
    }

    pub fn static_initializer(&self) -> Option<&Rc<Function>> {
        self.static_initializer.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    pub fn set_initialized(&self) {
        self.initialized.set(true);
    }

    pub fn get_function(&self, name: &str) -> Option<&Rc<Function>> {
        self.functions.get(name)
    }

    /// Function by name on this class or its scripted bases, with the bytecode defining it
    pub fn find_function(self: &Rc<Self>, name: &str) -> Option<(Rc<Function>, Rc<Bytecode>)> {
        if let Some(func) = self.functions.get(name) {
            return Some((func.clone(), self.clone()));
        }
        self.base_bytecode()?.find_function(name)
    }

    /// Static read: vars, constants, enums, functions and (for files) classes
    pub fn get_static_member(self: &Rc<Self>, name: &str) -> Option<Value> {
        if let Some(value) = self.static_vars.borrow().get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.constants.get(name) {
            return Some(value.clone());
        }
        if let Some(info) = self.enums.get(name) {
            return Some(Value::Enum(info.clone()));
        }
        if let Some(value) = self.unnamed_enums.get(name) {
            return Some(Value::Int(*value));
        }
        if let Some(func) = self.functions.get(name) {
            return Some(Value::Function(FunctionRef {
                function: func.clone(),
                owner: self.clone(),
            }));
        }
        if let Some(class) = self.classes.get(name) {
            return Some(Value::Class(class.clone()));
        }
        self.base_bytecode()?.get_static_member(name)
    }

    /// Static write. Returns false when no static variable has that name.
    pub fn set_static_member(&self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.static_vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        match self.base_bytecode() {
            Some(base) => base.set_static_member(name, value),
            None => false,
        }
    }

    /// Reflective lookup used when another file inherits from or calls into this one
    pub fn find_member_info(&self, name: &str) -> Option<MemberInfo> {
        if let Some(cached) = self.member_info.borrow().get(name) {
            return cached.clone();
        }
        let info = self.lookup_member_info(name);
        self.member_info
            .borrow_mut()
            .insert(name.to_string(), info.clone());
        info
    }

    fn lookup_member_info(&self, name: &str) -> Option<MemberInfo> {
        if self.members.contains_key(name) {
            return Some(MemberInfo::Property { is_static: false });
        }
        if self.static_vars.borrow().contains_key(name) {
            return Some(MemberInfo::Property { is_static: true });
        }
        if let Some(func) = self.functions.get(name) {
            return Some(MemberInfo::Method {
                arg_count: func.arg_count as i32,
                default_count: func.default_count() as i32,
                is_static: func.is_static,
            });
        }
        if let Some(value) = self.constants.get(name) {
            return Some(MemberInfo::Constant(value.clone()));
        }
        if let Some(info) = self.enums.get(name) {
            return Some(MemberInfo::Enum(info.clone()));
        }
        if let Some(value) = self.unnamed_enums.get(name) {
            return Some(MemberInfo::EnumValue(*value));
        }
        if self.classes.contains_key(name) {
            return Some(MemberInfo::Class);
        }
        self.base_bytecode()?.find_member_info(name)
    }

    /// Listing of every function in the file and its classes
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut functions: Vec<&Rc<Function>> = self
            .static_initializer
            .iter()
            .chain(self.member_initializer.iter())
            .chain(self.functions.values())
            .collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        for func in functions {
            out.push_str(&func.disassemble(&self.global_names, &self.global_consts));
            out.push('\n');
        }

        let mut classes: Vec<&Rc<Bytecode>> = self.classes.values().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        for class in classes {
            let mut functions: Vec<&Rc<Function>> = class
                .static_initializer
                .iter()
                .chain(class.member_initializer.iter())
                .chain(class.functions.values())
                .collect();
            functions.sort_by(|a, b| a.name.cmp(&b.name));
            for func in functions {
                out.push_str(&func.disassemble(&self.global_names, &self.global_consts));
                out.push('\n');
            }
        }
        out
    }
}

impl fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_class {
            write!(f, "Bytecode(class {})", self.name)
        } else {
            write!(f, "Bytecode(file {})", self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_with_members(name: &str, offset: u32, own: &[&str]) -> Bytecode {
        let mut class = Bytecode::new_class(name, "test.cb");
        for (i, member) in own.iter().enumerate() {
            class.members.insert(member.to_string(), offset + i as u32);
        }
        class.member_count = offset as usize + own.len();
        class
    }

    #[test]
    fn test_member_layout_extends_base() {
        let base = Rc::new(class_with_members("A", 0, &["x", "y"]));
        let derived = class_with_members("B", 2, &["z"]);
        derived.set_base(BytecodeBase::Local(base));
        assert_eq!(derived.get_member_index("x"), Some(0));
        assert_eq!(derived.get_member_index("y"), Some(1));
        assert_eq!(derived.get_member_index("z"), Some(2));
        assert_eq!(derived.member_count(), 3);
    }

    #[test]
    fn test_static_lookup_walks_bases() {
        let base = Bytecode::new_class("A", "test.cb");
        base.static_vars
            .borrow_mut()
            .insert("count".to_string(), Value::Int(1));
        let derived = Rc::new(Bytecode::new_class("B", "test.cb"));
        derived.set_base(BytecodeBase::Local(Rc::new(base)));
        assert_eq!(derived.get_static_member("count"), Some(Value::Int(1)));
        assert!(derived.set_static_member("count", Value::Int(5)));
        assert_eq!(derived.get_static_member("count"), Some(Value::Int(5)));
        assert!(!derived.set_static_member("missing", Value::Null));
    }

    #[test]
    fn test_native_base_found_through_chain() {
        let root = Bytecode::new_class("A", "test.cb");
        root.set_base(BytecodeBase::Native("Buffer".to_string()));
        let derived = Bytecode::new_class("B", "test.cb");
        derived.set_base(BytecodeBase::Local(Rc::new(root)));
        assert_eq!(derived.native_base().as_deref(), Some("Buffer"));
    }

    #[test]
    fn test_member_info_is_cached() {
        let mut class = Bytecode::new_class("A", "test.cb");
        class.constants.insert("K".to_string(), Value::Int(3));
        assert!(matches!(
            class.find_member_info("K"),
            Some(MemberInfo::Constant(Value::Int(3)))
        ));
        assert!(class.member_info.borrow().contains_key("K"));
        assert!(class.find_member_info("missing").is_none());
    }
}
