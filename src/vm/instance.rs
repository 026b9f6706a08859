// Carbon Instance
// Object of a scripted class. The members of every class in the inheritance
// chain share one array; a native base contributes an embedded native object.

use crate::compiler::Bytecode;
use crate::error::{CarbonError, CarbonResult};
use crate::native::NativeObject;
use crate::vm::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Instance {
    pub blueprint: Rc<Bytecode>,
    members: RefCell<Vec<Value>>,
    native: RefCell<Option<Rc<dyn NativeObject>>>,
}

impl Instance {
    pub fn new(blueprint: Rc<Bytecode>) -> Self {
        let members = vec![Value::Null; blueprint.member_count()];
        Self {
            blueprint,
            members: RefCell::new(members),
            native: RefCell::new(None),
        }
    }

    pub fn get_member(&self, index: u32) -> CarbonResult<Value> {
        self.members
            .borrow()
            .get(index as usize)
            .cloned()
            .ok_or_else(|| self.bad_index(index))
    }

    pub fn set_member(&self, index: u32, value: Value) -> CarbonResult<()> {
        let mut members = self.members.borrow_mut();
        match members.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.bad_index(index)),
        }
    }

    /// Member slot by name, including inherited members
    pub fn member_index(&self, name: &str) -> Option<u32> {
        self.blueprint.get_member_index(name)
    }

    /// The native object built by the base constructor, if any
    pub fn native(&self) -> Option<Rc<dyn NativeObject>> {
        self.native.borrow().clone()
    }

    pub fn set_native(&self, object: Rc<dyn NativeObject>) {
        *self.native.borrow_mut() = Some(object);
    }

    fn bad_index(&self, index: u32) -> CarbonError {
        CarbonError::bug(format!(
            "member index {} out of range for class \"{}\".",
            index,
            self.blueprint.name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::Buffer;

    #[test]
    fn test_members_start_null() {
        let mut class = Bytecode::new_class("Point", "test.cb");
        class.members.insert("x".to_string(), 0);
        class.members.insert("y".to_string(), 1);
        class.member_count = 2;
        let instance = Instance::new(Rc::new(class));

        assert_eq!(instance.get_member(1).unwrap(), Value::Null);
        instance.set_member(1, Value::Int(4)).unwrap();
        assert_eq!(instance.get_member(1).unwrap(), Value::Int(4));
        assert_eq!(instance.member_index("y"), Some(1));
        assert!(instance.get_member(2).is_err());
    }

    #[test]
    fn test_native_part() {
        let instance = Instance::new(Rc::new(Bytecode::new_class("Bytes", "test.cb")));
        assert!(instance.native().is_none());
        instance.set_native(Rc::new(Buffer::new(4)));
        assert_eq!(instance.native().unwrap().class_name(), "Buffer");
    }
}
