// Array built-in methods
// Arrays are shared references; mutating methods act in place

use super::{check_arity, get_int_arg, MethodFn};
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::ops::{compare, Operator};
use crate::vm::value::Value;
use std::cmp::Ordering;

pub fn lookup(name: &str) -> Option<MethodFn> {
    let method: MethodFn = match name {
        "size" => array_size,
        "empty" => array_empty,
        "push" | "append" => array_push,
        "pop" => array_pop,
        "insert" => array_insert,
        "clear" => array_clear,
        "reverse" => array_reverse,
        "sort" => array_sort,
        "at" => array_at,
        "has" => array_has,
        _ => return None,
    };
    Some(method)
}

fn array_size(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("size", 0, args.len())?;
    Ok(Value::Int(recv.as_array()?.borrow().len() as i64))
}

fn array_empty(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("empty", 0, args.len())?;
    Ok(Value::Bool(recv.as_array()?.borrow().is_empty()))
}

/// push(value) / append(value) - add to the end
fn array_push(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("push", 1, args.len())?;
    recv.as_array()?.borrow_mut().push(args[0].clone());
    Ok(Value::Null)
}

/// pop() - remove and return the last element
fn array_pop(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("pop", 0, args.len())?;
    recv.as_array()?.borrow_mut().pop().ok_or_else(|| {
        CarbonError::runtime(ErrorKind::InvalidIndex, "pop from an empty Array.")
    })
}

/// insert(index, value)
fn array_insert(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("insert", 2, args.len())?;
    let array = recv.as_array()?;
    let mut items = array.borrow_mut();
    let index = get_int_arg(&args[0], 0)?;
    if index < 0 || index as usize > items.len() {
        return Err(CarbonError::runtime(
            ErrorKind::InvalidIndex,
            format!("insert index {} out of range (size {}).", index, items.len()),
        ));
    }
    items.insert(index as usize, args[1].clone());
    Ok(Value::Null)
}

fn array_clear(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("clear", 0, args.len())?;
    recv.as_array()?.borrow_mut().clear();
    Ok(Value::Null)
}

fn array_reverse(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("reverse", 0, args.len())?;
    recv.as_array()?.borrow_mut().reverse();
    Ok(Value::Null)
}

/// sort() - ascending, in place; elements must be mutually comparable
fn array_sort(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("sort", 0, args.len())?;
    let array = recv.as_array()?;
    let mut items = array.borrow().clone();
    let mut failure = None;
    items.sort_by(|a, b| match compare(Operator::Lt, a, b) {
        Ok(ordering) => ordering,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    *array.borrow_mut() = items;
    Ok(Value::Null)
}

/// at(index) - same as `arr[index]`
fn array_at(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("at", 1, args.len())?;
    recv.get_mapped(&args[0])
}

/// has(value) - membership by equality
fn array_has(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("has", 1, args.len())?;
    let found = recv.as_array()?.borrow().iter().any(|v| v.equals(&args[0]));
    Ok(Value::Bool(found))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(recv: &Value, name: &str, args: &[Value]) -> CarbonResult<Value> {
        let method = lookup(name).expect("method exists");
        method(recv, args)
    }

    #[test]
    fn test_push_pop_in_place() {
        let arr = Value::array(vec![]);
        call(&arr, "push", &[Value::Int(1)]).unwrap();
        call(&arr, "append", &[Value::Int(2)]).unwrap();
        assert_eq!(call(&arr, "size", &[]).unwrap(), Value::Int(2));
        assert_eq!(call(&arr, "pop", &[]).unwrap(), Value::Int(2));
        call(&arr, "clear", &[]).unwrap();
        assert!(call(&arr, "pop", &[]).is_err());
    }

    #[test]
    fn test_sort_and_reverse() {
        let arr = Value::array(vec![Value::Int(3), Value::Float(1.5), Value::Int(2)]);
        call(&arr, "sort", &[]).unwrap();
        assert_eq!(arr.to_string(), "[1.5, 2, 3]");
        call(&arr, "reverse", &[]).unwrap();
        assert_eq!(arr.to_string(), "[3, 2, 1.5]");
    }

    #[test]
    fn test_sort_incomparable_fails() {
        let arr = Value::array(vec![Value::Int(3), Value::string("a")]);
        let err = call(&arr, "sort", &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
        assert_eq!(arr.to_string(), "[3, \"a\"]");
    }

    #[test]
    fn test_insert_and_has() {
        let arr = Value::array(vec![Value::Int(1), Value::Int(3)]);
        call(&arr, "insert", &[Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(arr.to_string(), "[1, 2, 3]");
        assert_eq!(call(&arr, "has", &[Value::Int(2)]).unwrap(), Value::Bool(true));
        assert_eq!(call(&arr, "at", &[Value::Int(2)]).unwrap(), Value::Int(3));
    }
}
