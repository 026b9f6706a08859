// Map built-in methods

use super::{check_arity, MethodFn};
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::value::{MapKey, MapRef, Value};

pub fn lookup(name: &str) -> Option<MethodFn> {
    let method: MethodFn = match name {
        "size" => map_size,
        "empty" => map_empty,
        "insert" => map_insert,
        "clear" => map_clear,
        "has" => map_has,
        "at" => map_at,
        "keys" => map_keys,
        "values" => map_values,
        "remove" => map_remove,
        _ => return None,
    };
    Some(method)
}

fn this_map(recv: &Value) -> CarbonResult<MapRef> {
    match recv {
        Value::Map(map) => Ok(map.clone()),
        other => Err(CarbonError::runtime(
            ErrorKind::TypeError,
            format!("can't cast \"{}\" to \"Map\".", other.type_name()),
        )),
    }
}

fn map_size(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("size", 0, args.len())?;
    Ok(Value::Int(this_map(recv)?.borrow().len() as i64))
}

fn map_empty(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("empty", 0, args.len())?;
    Ok(Value::Bool(this_map(recv)?.borrow().is_empty()))
}

/// insert(key, value) - add or overwrite
fn map_insert(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("insert", 2, args.len())?;
    let key = MapKey::from_value(&args[0])?;
    this_map(recv)?.borrow_mut().insert(key, args[1].clone());
    Ok(Value::Null)
}

fn map_clear(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("clear", 0, args.len())?;
    this_map(recv)?.borrow_mut().clear();
    Ok(Value::Null)
}

fn map_has(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("has", 1, args.len())?;
    let key = MapKey::from_value(&args[0])?;
    Ok(Value::Bool(this_map(recv)?.borrow().contains(&key)))
}

/// at(key) - same as `map[key]`
fn map_at(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("at", 1, args.len())?;
    recv.get_mapped(&args[0])
}

fn map_keys(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("keys", 0, args.len())?;
    let keys = this_map(recv)?.borrow().keys().map(MapKey::to_value).collect();
    Ok(Value::array(keys))
}

fn map_values(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("values", 0, args.len())?;
    let values = this_map(recv)?.borrow().values().cloned().collect();
    Ok(Value::array(values))
}

/// remove(key) - delete an entry, error if missing
fn map_remove(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("remove", 1, args.len())?;
    let key = MapKey::from_value(&args[0])?;
    this_map(recv)?.borrow_mut().remove(&key).ok_or_else(|| {
        CarbonError::runtime(
            ErrorKind::AttributeError,
            format!("key {} does not exists on base Map.", args[0].repr()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::value::MapData;

    fn call(recv: &Value, name: &str, args: &[Value]) -> CarbonResult<Value> {
        let method = lookup(name).expect("method exists");
        method(recv, args)
    }

    #[test]
    fn test_insert_and_lookup() {
        let map = Value::map(MapData::default());
        call(&map, "insert", &[Value::string("a"), Value::Int(1)]).unwrap();
        call(&map, "insert", &[Value::Int(2), Value::Int(4)]).unwrap();
        assert_eq!(call(&map, "size", &[]).unwrap(), Value::Int(2));
        assert_eq!(call(&map, "at", &[Value::Float(2.0)]).unwrap(), Value::Int(4));
        assert_eq!(call(&map, "has", &[Value::string("b")]).unwrap(), Value::Bool(false));
        assert_eq!(call(&map, "keys", &[]).unwrap().to_string(), "[\"a\", 2]");
    }

    #[test]
    fn test_remove() {
        let map = Value::map(MapData::default());
        call(&map, "insert", &[Value::string("k"), Value::Int(1)]).unwrap();
        assert_eq!(call(&map, "remove", &[Value::string("k")]).unwrap(), Value::Int(1));
        let err = call(&map, "remove", &[Value::string("k")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AttributeError);
        assert_eq!(call(&map, "empty", &[]).unwrap(), Value::Bool(true));
    }
}
