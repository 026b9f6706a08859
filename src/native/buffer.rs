// Buffer native class
// Provides: Buffer(size), size(), [] get/set, to_string(), from_string(s),
// MAX_SIZE, enum Encoding { ASCII, UTF8 }, encoding, default_encoding

use super::{BindData, NativeCallable, NativeClassInfo, NativeObject};
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::value::{Value, ValueType};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub const MAX_SIZE: i64 = 1 << 24;

const ENCODING_ASCII: i64 = 0;
const ENCODING_UTF8: i64 = 1;

/// Fixed size byte buffer
#[derive(Debug)]
pub struct Buffer {
    data: RefCell<Vec<u8>>,
    encoding: Cell<i64>,
}

impl Buffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: RefCell::new(vec![0; size]),
            encoding: Cell::new(ENCODING_UTF8),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: RefCell::new(bytes.to_vec()),
            encoding: Cell::new(ENCODING_UTF8),
        }
    }

    pub fn size(&self) -> usize {
        self.data.borrow().len()
    }

    fn index(&self, key: &Value) -> CarbonResult<usize> {
        let len = self.size() as i64;
        let index = match key {
            Value::Int(i) => *i,
            other => {
                return Err(CarbonError::runtime(
                    ErrorKind::TypeError,
                    format!("expected an integer index, got {}.", other.type_name()),
                ))
            }
        };
        let resolved = if index < 0 { len + index } else { index };
        if resolved < 0 || resolved >= len {
            return Err(CarbonError::runtime(
                ErrorKind::InvalidIndex,
                format!("index {} out of range for a buffer of size {}.", index, len),
            ));
        }
        Ok(resolved as usize)
    }
}

impl NativeObject for Buffer {
    fn class_name(&self) -> &str {
        "Buffer"
    }

    fn to_string(&self) -> String {
        let data = self.data.borrow();
        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        match self.encoding.get() {
            ENCODING_ASCII => data[..end].iter().map(|b| (*b & 0x7f) as char).collect(),
            _ => String::from_utf8_lossy(&data[..end]).into_owned(),
        }
    }

    fn get_member(&self, name: &str) -> CarbonResult<Value> {
        match name {
            "encoding" => Ok(Value::Int(self.encoding.get())),
            _ => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("attribute \"{}\" does not exists on base Buffer.", name),
            )),
        }
    }

    fn set_member(&self, name: &str, value: Value) -> CarbonResult<()> {
        match (name, value) {
            ("encoding", Value::Int(e)) if e == ENCODING_ASCII || e == ENCODING_UTF8 => {
                self.encoding.set(e);
                Ok(())
            }
            ("encoding", _) => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                "expected a Buffer.Encoding value.",
            )),
            (name, _) => Err(CarbonError::runtime(
                ErrorKind::AttributeError,
                format!("attribute \"{}\" does not exists on base Buffer.", name),
            )),
        }
    }

    fn get_mapped(&self, key: &Value) -> CarbonResult<Value> {
        let index = self.index(key)?;
        Ok(Value::Int(self.data.borrow()[index] as i64))
    }

    fn set_mapped(&self, key: &Value, value: Value) -> CarbonResult<()> {
        let index = self.index(key)?;
        let byte = match value {
            Value::Int(b) if (0..=255).contains(&b) => b as u8,
            Value::String(s) if s.len() == 1 => s.as_bytes()[0],
            other => {
                return Err(CarbonError::runtime(
                    ErrorKind::TypeError,
                    format!("expected a byte value, got {}.", other.repr()),
                ))
            }
        };
        self.data.borrow_mut()[index] = byte;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn create_buffer_class() -> NativeClassInfo {
    let mut class = NativeClassInfo::new("Buffer");

    class.constructor = Some(NativeCallable::new(
        "Buffer",
        vec![ValueType::Int],
        buffer_new,
    ));
    class.bind(
        "size",
        BindData::Method(NativeCallable::new("size", vec![], buffer_size)),
    );
    class.bind(
        "to_string",
        BindData::Method(NativeCallable::new("to_string", vec![], buffer_to_string)),
    );
    class.bind(
        "from_string",
        BindData::StaticFunc(NativeCallable::new(
            "from_string",
            vec![ValueType::String],
            buffer_from_string,
        )),
    );
    class.bind("encoding", BindData::MemberVar);
    class.bind(
        "default_encoding",
        BindData::StaticVar(RefCell::new(Value::Int(ENCODING_UTF8))),
    );
    class.bind("MAX_SIZE", BindData::StaticConst(Value::Int(MAX_SIZE)));
    class.bind_enum(
        "Encoding",
        &[("ASCII", ENCODING_ASCII), ("UTF8", ENCODING_UTF8)],
    );

    class
}

fn this_buffer(this: &Value) -> CarbonResult<&Buffer> {
    match this {
        Value::Native(object) => object
            .as_any()
            .downcast_ref::<Buffer>()
            .ok_or_else(|| CarbonError::bug("Buffer method bound to a foreign object.")),
        _ => Err(CarbonError::bug("Buffer method called without an instance.")),
    }
}

fn buffer_new(_this: &Value, args: &[Value]) -> CarbonResult<Value> {
    let size = match &args[0] {
        Value::Int(n) => *n,
        _ => 0,
    };
    if !(0..=MAX_SIZE).contains(&size) {
        return Err(CarbonError::runtime(
            ErrorKind::InvalidIndex,
            format!("buffer size {} is out of range (0..{}).", size, MAX_SIZE),
        ));
    }
    Ok(Value::Native(Rc::new(Buffer::new(size as usize))))
}

fn buffer_size(this: &Value, _args: &[Value]) -> CarbonResult<Value> {
    Ok(Value::Int(this_buffer(this)?.size() as i64))
}

fn buffer_to_string(this: &Value, _args: &[Value]) -> CarbonResult<Value> {
    Ok(Value::from(NativeObject::to_string(this_buffer(this)?)))
}

fn buffer_from_string(_this: &Value, args: &[Value]) -> CarbonResult<Value> {
    let s = args[0].as_str()?;
    Ok(Value::Native(Rc::new(Buffer::from_bytes(s.as_bytes()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeClasses;

    #[test]
    fn test_construct_and_index() {
        let registry = NativeClasses::new();
        let object = registry.construct("Buffer", &[Value::Int(3)]).unwrap();
        object.set_mapped(&Value::Int(0), Value::Int(104)).unwrap();
        object.set_mapped(&Value::Int(1), Value::string("i")).unwrap();
        assert_eq!(object.get_mapped(&Value::Int(-3)).unwrap(), Value::Int(104));
        assert_eq!(object.to_string(), "hi");
        let size = registry.call_method_on(&object, "size", &[]).unwrap();
        assert_eq!(size, Value::Int(3));
    }

    #[test]
    fn test_index_out_of_range() {
        let buffer = Buffer::new(2);
        let err = buffer.get_mapped(&Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIndex);
    }

    #[test]
    fn test_from_string_and_encoding() {
        let registry = NativeClasses::new();
        let value = registry
            .call_static("Buffer", "from_string", &[Value::string("abc")])
            .unwrap();
        let Value::Native(object) = value else {
            panic!("expected a native object");
        };
        assert_eq!(object.get_member("encoding").unwrap(), Value::Int(ENCODING_UTF8));
        object.set_member("encoding", Value::Int(ENCODING_ASCII)).unwrap();
        assert!(object.set_member("encoding", Value::Int(9)).is_err());
    }

    #[test]
    fn test_constructor_rejects_wrong_type() {
        let registry = NativeClasses::new();
        let err = registry.construct("Buffer", &[Value::string("x")]).err().unwrap();
        assert_eq!(err.kind, ErrorKind::TypeError);
    }
}
