// Carbon Builtin Functions
// Pure builtins the analyzer may fold and the VM calls directly

use super::{check_arity, get_int_arg};
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::ops::{compare, Operator};
use crate::vm::value::Value;
use std::cmp::Ordering;

/// hex(n) - "0x" prefixed hexadecimal
pub fn hex(args: &[Value]) -> CarbonResult<Value> {
    check_arity("hex", 1, args.len())?;
    let n = get_int_arg(&args[0], 0)?;
    let digits = if n < 0 {
        format!("-0x{:x}", n.unsigned_abs())
    } else {
        format!("0x{:x}", n)
    };
    Ok(Value::from(digits))
}

/// bin(n) - "0b" prefixed binary
pub fn bin(args: &[Value]) -> CarbonResult<Value> {
    check_arity("bin", 1, args.len())?;
    let n = get_int_arg(&args[0], 0)?;
    let digits = if n < 0 {
        format!("-0b{:b}", n.unsigned_abs())
    } else {
        format!("0b{:b}", n)
    };
    Ok(Value::from(digits))
}

fn extreme(name: &str, args: &[Value], keep: Ordering, op: Operator) -> CarbonResult<Value> {
    if args.len() <= 1 {
        return Err(CarbonError::runtime(
            ErrorKind::InvalidArgCount,
            format!("{}() expected at least 2 arguments.", name),
        ));
    }
    let mut best = &args[0];
    for candidate in &args[1..] {
        if compare(op, candidate, best)? == keep {
            best = candidate;
        }
    }
    Ok(best.clone())
}

/// min(a, b, ...) - smallest argument
pub fn min(args: &[Value]) -> CarbonResult<Value> {
    extreme("min", args, Ordering::Less, Operator::Lt)
}

/// max(a, b, ...) - largest argument
pub fn max(args: &[Value]) -> CarbonResult<Value> {
    extreme("max", args, Ordering::Greater, Operator::Gt)
}

/// pow(base, exp) - float power
pub fn pow(args: &[Value]) -> CarbonResult<Value> {
    check_arity("pow", 2, args.len())?;
    for (i, arg) in args.iter().enumerate() {
        if !matches!(arg, Value::Int(_) | Value::Float(_)) {
            return Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("expected a numeric value at argument {}.", i),
            ));
        }
    }
    Ok(Value::Float(args[0].as_float()?.powf(args[1].as_float()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_and_bin() {
        assert_eq!(hex(&[Value::Int(255)]).unwrap(), Value::string("0xff"));
        assert_eq!(bin(&[Value::Int(5)]).unwrap(), Value::string("0b101"));
        assert_eq!(hex(&[Value::Int(-16)]).unwrap(), Value::string("-0x10"));
        assert!(hex(&[Value::string("1")]).is_err());
    }

    #[test]
    fn test_min_max() {
        let args = [Value::Int(4), Value::Float(1.5), Value::Int(9), Value::Int(2)];
        assert_eq!(min(&args).unwrap(), Value::Float(1.5));
        assert_eq!(max(&args).unwrap(), Value::Int(9));
        let err = min(&[Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
    }

    #[test]
    fn test_pow() {
        assert_eq!(pow(&[Value::Int(2), Value::Int(10)]).unwrap(), Value::Float(1024.0));
        assert!(pow(&[Value::Int(2), Value::string("x")]).is_err());
    }
}
