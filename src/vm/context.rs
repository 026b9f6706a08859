// Carbon Runtime Context
// State of one function invocation: stack frame, parameters, `this` and the
// bytecode the function belongs to. Resolves operand addresses to values.

use crate::builtins::{BuiltinFunction, BuiltinType};
use crate::compiler::{Address, AddressKind, Bytecode, Function};
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::instance::Instance;
use crate::vm::value::Value;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::rc::Rc;

/// Argument list of a call
pub type Args = SmallVec<[Value; 8]>;

/// Long-lived reference values, one per native class name
#[derive(Default)]
pub struct RefCache {
    native_classes: FxHashMap<String, Value>,
}

impl RefCache {
    pub fn native_class(&mut self, name: &str) -> Value {
        self.native_classes
            .entry(name.to_string())
            .or_insert_with(|| Value::NativeClass(Rc::from(name)))
            .clone()
    }
}

pub struct RuntimeContext<'a> {
    pub function: &'a Rc<Function>,
    /// Class or file that defines `function`
    pub bytecode: &'a Rc<Bytecode>,
    /// File owning `bytecode`: names, constants and file level statics
    pub file: Rc<Bytecode>,
    pub this: Option<Rc<Instance>>,
    pub stack: Vec<Value>,
    pub args: &'a mut Args,
    pub ip: usize,
}

impl<'a> RuntimeContext<'a> {
    pub fn new(
        function: &'a Rc<Function>,
        bytecode: &'a Rc<Bytecode>,
        this: Option<Rc<Instance>>,
        args: &'a mut Args,
    ) -> CarbonResult<Self> {
        let file = bytecode.file().ok_or_else(|| {
            CarbonError::bug(format!(
                "class \"{}\" outlived its file bytecode.",
                bytecode.name()
            ))
        })?;
        Ok(Self {
            function,
            bytecode,
            file,
            this,
            stack: vec![Value::Null; function.stack_size],
            args,
            ip: 0,
        })
    }

    /// Next word of the opcode stream
    pub fn read(&mut self) -> CarbonResult<u32> {
        let word = self.function.opcodes.get(self.ip).copied().ok_or_else(|| {
            CarbonError::bug(format!(
                "function \"{}\" ran past its last opcode.",
                self.function.qualified_name()
            ))
        })?;
        self.ip += 1;
        Ok(word)
    }

    pub fn read_addr(&mut self) -> CarbonResult<Address> {
        self.read().map(Address::from_word)
    }

    /// `argc` followed by that many addresses
    pub fn read_args(&mut self) -> CarbonResult<SmallVec<[Address; 8]>> {
        let argc = self.read()? as usize;
        let mut addrs = SmallVec::with_capacity(argc);
        for _ in 0..argc {
            addrs.push(self.read_addr()?);
        }
        Ok(addrs)
    }

    /// A name operand
    pub fn read_name(&mut self) -> CarbonResult<Rc<str>> {
        let index = self.read()?;
        self.name(index)
    }

    pub fn name(&self, index: u32) -> CarbonResult<Rc<str>> {
        self.file
            .global_name(index)
            .map(Rc::from)
            .ok_or_else(|| CarbonError::bug(format!("name index {} out of range.", index)))
    }

    pub fn this_instance(&self) -> CarbonResult<&Rc<Instance>> {
        self.this.as_ref().ok_or_else(|| {
            CarbonError::bug(format!(
                "\"{}\" accessed an instance member without an instance.",
                self.function.qualified_name()
            ))
        })
    }

    pub fn get_var_at(&self, addr: Address, refs: &mut RefCache) -> CarbonResult<Value> {
        let index = addr.index();
        match addr.kind() {
            Some(AddressKind::Null) => Ok(Value::Null),
            Some(AddressKind::Stack) => self
                .stack
                .get(index as usize)
                .cloned()
                .ok_or_else(|| bad_slot("stack", index)),
            Some(AddressKind::Parameter) => self
                .args
                .get(index as usize)
                .cloned()
                .ok_or_else(|| bad_slot("parameter", index)),
            Some(AddressKind::This) => Ok(self
                .this
                .as_ref()
                .map_or(Value::Null, |this| Value::Instance(this.clone()))),
            Some(AddressKind::MemberVar) => self.this_instance()?.get_member(index),
            Some(AddressKind::StaticMember) => {
                let name = self.name(index)?;
                self.get_static(&name).ok_or_else(|| {
                    CarbonError::bug(format!("static member \"{}\" doesn't exist.", name))
                })
            }
            Some(AddressKind::Extern) => {
                let name = self.name(index)?;
                self.file.get_extern(&name).map(Value::Class).ok_or_else(|| {
                    CarbonError::bug(format!("import \"{}\" isn't linked.", name))
                })
            }
            Some(AddressKind::NativeClass) => Ok(refs.native_class(&self.name(index)?)),
            Some(AddressKind::BuiltinFunc) => BuiltinFunction::from_u32(index)
                .map(Value::BuiltinFunc)
                .ok_or_else(|| bad_slot("builtin function", index)),
            Some(AddressKind::BuiltinType) => BuiltinType::from_u32(index)
                .map(Value::BuiltinType)
                .ok_or_else(|| bad_slot("builtin type", index)),
            Some(AddressKind::ConstValue) => self
                .file
                .global_const(index)
                .map(|value| value.copy(true))
                .ok_or_else(|| bad_slot("constant", index)),
            None => Err(CarbonError::bug(format!("invalid address {:?}.", addr))),
        }
    }

    pub fn set_var_at(&mut self, addr: Address, value: Value) -> CarbonResult<()> {
        let index = addr.index();
        match addr.kind() {
            // Discarded result
            Some(AddressKind::Null) => Ok(()),
            Some(AddressKind::Stack) => {
                let slot = self
                    .stack
                    .get_mut(index as usize)
                    .ok_or_else(|| bad_slot("stack", index))?;
                *slot = value;
                Ok(())
            }
            Some(AddressKind::Parameter) => {
                let slot = self
                    .args
                    .get_mut(index as usize)
                    .ok_or_else(|| bad_slot("parameter", index))?;
                *slot = value;
                Ok(())
            }
            Some(AddressKind::MemberVar) => self.this_instance()?.set_member(index, value),
            Some(AddressKind::StaticMember) => {
                let name = self.name(index)?;
                if self.set_static(&name, value) {
                    Ok(())
                } else {
                    Err(CarbonError::runtime(
                        ErrorKind::AttributeError,
                        format!("can't assign to \"{}\", it isn't a static variable.", name),
                    ))
                }
            }
            _ => Err(CarbonError::bug(format!(
                "address {:?} can't be assigned.",
                addr
            ))),
        }
    }

    /// Store a reference parameter's final value in the caller's storage.
    /// Functions and classes passed by name have no static variable to update.
    pub fn write_back(&mut self, addr: Address, value: Value) -> CarbonResult<()> {
        match addr.kind() {
            Some(AddressKind::StaticMember) => {
                let name = self.name(addr.index())?;
                self.set_static(&name, value);
                Ok(())
            }
            _ => self.set_var_at(addr, value),
        }
    }

    /// Static lookup: the instance's blueprint, then the defining class, then the file
    fn get_static(&self, name: &str) -> Option<Value> {
        if let Some(this) = &self.this {
            if let Some(value) = this.blueprint.get_static_member(name) {
                return Some(value);
            }
        }
        if self.bytecode.is_class() {
            if let Some(value) = self.bytecode.get_static_member(name) {
                return Some(value);
            }
        }
        self.file.get_static_member(name)
    }

    fn set_static(&self, name: &str, value: Value) -> bool {
        if let Some(this) = &self.this {
            if this.blueprint.set_static_member(name, value.clone()) {
                return true;
            }
        }
        if self.bytecode.is_class() && self.bytecode.set_static_member(name, value.clone()) {
            return true;
        }
        self.file.set_static_member(name, value)
    }
}

fn bad_slot(what: &str, index: u32) -> CarbonError {
    CarbonError::bug(format!("{} slot {} out of range.", what, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with_const() -> Rc<Bytecode> {
        let mut file = Bytecode::new_file("test.cb");
        file.global_names = vec!["count".to_string(), "Buffer".to_string()];
        file.global_consts = vec![Value::array(vec![Value::Int(1)])];
        file.static_vars
            .borrow_mut()
            .insert("count".to_string(), Value::Int(0));
        Rc::new(file)
    }

    fn function(stack_size: usize) -> Rc<Function> {
        Rc::new(Function {
            name: "f".to_string(),
            stack_size,
            ..Default::default()
        })
    }

    #[test]
    fn test_stack_and_parameters() {
        let file = file_with_const();
        let func = function(2);
        let mut args: Args = smallvec::smallvec![Value::Int(7)];
        let mut refs = RefCache::default();
        let mut ctx = RuntimeContext::new(&func, &file, None, &mut args).unwrap();

        ctx.set_var_at(Address::stack(1), Value::Int(3)).unwrap();
        assert_eq!(ctx.get_var_at(Address::stack(1), &mut refs).unwrap(), Value::Int(3));
        let param = Address::new(AddressKind::Parameter, 0);
        assert_eq!(ctx.get_var_at(param, &mut refs).unwrap(), Value::Int(7));
        assert!(ctx.get_var_at(Address::stack(5), &mut refs).is_err());
        assert_eq!(ctx.get_var_at(Address::this(), &mut refs).unwrap(), Value::Null);
    }

    #[test]
    fn test_constants_are_copied() {
        let file = file_with_const();
        let func = function(0);
        let mut args = Args::new();
        let mut refs = RefCache::default();
        let ctx = RuntimeContext::new(&func, &file, None, &mut args).unwrap();

        let addr = Address::new(AddressKind::ConstValue, 0);
        let first = ctx.get_var_at(addr, &mut refs).unwrap();
        first.as_array().unwrap().borrow_mut().push(Value::Int(2));
        let second = ctx.get_var_at(addr, &mut refs).unwrap();
        assert_eq!(second.as_array().unwrap().borrow().len(), 1);
    }

    #[test]
    fn test_file_statics() {
        let file = file_with_const();
        let func = function(0);
        let mut args = Args::new();
        let mut refs = RefCache::default();
        let mut ctx = RuntimeContext::new(&func, &file, None, &mut args).unwrap();

        let addr = Address::new(AddressKind::StaticMember, 0);
        ctx.set_var_at(addr, Value::Int(9)).unwrap();
        assert_eq!(ctx.get_var_at(addr, &mut refs).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_write_back_skips_non_variable_statics() {
        let file = file_with_const();
        let func = function(0);
        let mut args = Args::new();
        let mut refs = RefCache::default();
        let mut ctx = RuntimeContext::new(&func, &file, None, &mut args).unwrap();

        let count = Address::new(AddressKind::StaticMember, 0);
        ctx.write_back(count, Value::Int(4)).unwrap();
        assert_eq!(ctx.get_var_at(count, &mut refs).unwrap(), Value::Int(4));

        let class_name = Address::new(AddressKind::StaticMember, 1);
        assert!(ctx.set_var_at(class_name, Value::Int(1)).is_err());
        assert!(ctx.write_back(class_name, Value::Int(1)).is_ok());
    }

    #[test]
    fn test_native_class_refs_are_cached() {
        let file = file_with_const();
        let func = function(0);
        let mut args = Args::new();
        let mut refs = RefCache::default();
        let ctx = RuntimeContext::new(&func, &file, None, &mut args).unwrap();

        let addr = Address::new(AddressKind::NativeClass, 1);
        let (Value::NativeClass(a), Value::NativeClass(b)) = (
            ctx.get_var_at(addr, &mut refs).unwrap(),
            ctx.get_var_at(addr, &mut refs).unwrap(),
        ) else {
            panic!("expected native class refs");
        };
        assert!(Rc::ptr_eq(&a, &b));
    }
}
