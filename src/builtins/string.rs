// String built-in methods
// Strings are immutable; every method returns a new value

use super::{check_arity, check_arity_range, get_int_arg, get_str_arg, MethodFn};
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::value::Value;
use std::rc::Rc;

pub fn lookup(name: &str) -> Option<MethodFn> {
    let method: MethodFn = match name {
        "size" | "length" => string_size,
        "to_int" => string_to_int,
        "to_float" => string_to_float,
        "upper" => string_upper,
        "lower" => string_lower,
        "substr" => string_substr,
        "startswith" => string_starts_with,
        "endswith" => string_ends_with,
        "strip" => string_strip,
        "split" => string_split,
        "join" => string_join,
        "replace" => string_replace,
        "find" => string_find,
        _ => return None,
    };
    Some(method)
}

fn this_str(recv: &Value) -> CarbonResult<Rc<str>> {
    recv.as_str()
}

/// size() / length() - number of characters
fn string_size(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("size", 0, args.len())?;
    Ok(Value::Int(this_str(recv)?.chars().count() as i64))
}

/// to_int() - parse as integer
fn string_to_int(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("to_int", 0, args.len())?;
    let s = this_str(recv)?;
    super::types::parse_int(s.trim()).map(Value::Int).ok_or_else(|| {
        CarbonError::runtime(
            ErrorKind::TypeError,
            format!("can't convert \"{}\" to int.", s),
        )
    })
}

/// to_float() - parse as float
fn string_to_float(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("to_float", 0, args.len())?;
    let s = this_str(recv)?;
    s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
        CarbonError::runtime(
            ErrorKind::TypeError,
            format!("can't convert \"{}\" to float.", s),
        )
    })
}

fn string_upper(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("upper", 0, args.len())?;
    Ok(Value::from(this_str(recv)?.to_uppercase()))
}

fn string_lower(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("lower", 0, args.len())?;
    Ok(Value::from(this_str(recv)?.to_lowercase()))
}

/// substr(start[, end]) - characters in [start, end)
fn string_substr(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity_range("substr", 1, 2, args.len())?;
    let chars: Vec<char> = this_str(recv)?.chars().collect();
    let len = chars.len() as i64;
    let start = get_int_arg(&args[0], 0)?;
    let end = match args.get(1) {
        Some(end) => get_int_arg(end, 1)?,
        None => len,
    };
    if start < 0 || end > len || start > end {
        return Err(CarbonError::runtime(
            ErrorKind::InvalidIndex,
            format!("substr range [{}, {}) out of bounds (size {}).", start, end, len),
        ));
    }
    Ok(Value::from(
        chars[start as usize..end as usize].iter().collect::<String>(),
    ))
}

fn string_starts_with(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("startswith", 1, args.len())?;
    let prefix = get_str_arg(&args[0], 0)?;
    Ok(Value::Bool(this_str(recv)?.starts_with(prefix.as_str())))
}

fn string_ends_with(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("endswith", 1, args.len())?;
    let suffix = get_str_arg(&args[0], 0)?;
    Ok(Value::Bool(this_str(recv)?.ends_with(suffix.as_str())))
}

/// strip() - remove surrounding whitespace
fn string_strip(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("strip", 0, args.len())?;
    Ok(Value::string(this_str(recv)?.trim()))
}

/// split([delimiter]) - split on a delimiter, whitespace by default
fn string_split(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity_range("split", 0, 1, args.len())?;
    let s = this_str(recv)?;
    let parts: Vec<Value> = match args.first() {
        Some(delim) => {
            let delim = get_str_arg(delim, 0)?;
            if delim.is_empty() {
                s.chars().map(|c| Value::from(c.to_string())).collect()
            } else {
                s.split(delim.as_str()).map(Value::from).collect()
            }
        }
        None => s.split_whitespace().map(Value::from).collect(),
    };
    Ok(Value::array(parts))
}

/// join(array) - join the elements' string forms with this string
fn string_join(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("join", 1, args.len())?;
    let sep = this_str(recv)?;
    let items = args[0].as_array()?;
    let parts: Vec<String> = items.borrow().iter().map(Value::to_string).collect();
    Ok(Value::from(parts.join(&sep)))
}

/// replace(from, to) - replace all occurrences
fn string_replace(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("replace", 2, args.len())?;
    let from = get_str_arg(&args[0], 0)?;
    let to = get_str_arg(&args[1], 1)?;
    Ok(Value::from(this_str(recv)?.replace(from.as_str(), &to)))
}

/// find(needle) - character index of the first match or -1
fn string_find(recv: &Value, args: &[Value]) -> CarbonResult<Value> {
    check_arity("find", 1, args.len())?;
    let needle = get_str_arg(&args[0], 0)?;
    let s = this_str(recv)?;
    Ok(Value::Int(match s.find(needle.as_str()) {
        Some(byte) => s[..byte].chars().count() as i64,
        None => -1,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(recv: &str, name: &str, args: &[Value]) -> CarbonResult<Value> {
        let method = lookup(name).expect("method exists");
        method(&Value::string(recv), args)
    }

    #[test]
    fn test_case_and_size() {
        assert_eq!(call("abc", "upper", &[]).unwrap(), Value::string("ABC"));
        assert_eq!(call("héllo", "size", &[]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_split_join() {
        let parts = call("a,b,c", "split", &[Value::string(",")]).unwrap();
        assert_eq!(parts.to_string(), "[\"a\", \"b\", \"c\"]");
        assert_eq!(call("-", "join", &[parts]).unwrap(), Value::string("a-b-c"));
    }

    #[test]
    fn test_substr_and_find() {
        assert_eq!(
            call("carbon", "substr", &[Value::Int(1), Value::Int(3)]).unwrap(),
            Value::string("ar")
        );
        assert_eq!(call("carbon", "find", &[Value::string("bo")]).unwrap(), Value::Int(3));
        assert_eq!(call("carbon", "find", &[Value::string("x")]).unwrap(), Value::Int(-1));
        let err = call("abc", "substr", &[Value::Int(2), Value::Int(9)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidIndex);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call(" 12 ", "to_int", &[]).unwrap(), Value::Int(12));
        assert!(call("x", "to_float", &[]).is_err());
    }

    #[test]
    fn test_arity_error() {
        let err = call("abc", "upper", &[Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
    }
}
