// Carbon Builtin Types
// Constructors for bool/int/float/String/Array/Map and their static constants

use super::BuiltinType;
use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::value::{MapData, Value};

fn expect_one(args: &[Value]) -> CarbonResult<&Value> {
    match args {
        [one] => Ok(one),
        _ => Err(CarbonError::runtime(
            ErrorKind::InvalidArgCount,
            "expected exactly 1 argument.",
        )),
    }
}

pub fn construct(ty: BuiltinType, args: &[Value]) -> CarbonResult<Value> {
    match ty {
        BuiltinType::Null => Err(CarbonError::runtime(
            ErrorKind::OperatorNotSupported,
            "can't construct null instance.",
        )),
        BuiltinType::Bool => Ok(Value::Bool(expect_one(args)?.is_truthy())),
        BuiltinType::Int => match expect_one(args)? {
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::Int(n) => Ok(Value::Int(*n)),
            Value::Float(n) => Ok(Value::Int(*n as i64)),
            Value::String(s) => parse_int(s.trim()).map(Value::Int).ok_or_else(|| {
                CarbonError::runtime(
                    ErrorKind::TypeError,
                    format!("can't convert \"{}\" to int.", s),
                )
            }),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("cannot construct integer from type {}", other.type_name()),
            )),
        },
        BuiltinType::Float => match expect_one(args)? {
            Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
            Value::Int(n) => Ok(Value::Float(*n as f64)),
            Value::Float(n) => Ok(Value::Float(*n)),
            Value::String(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                CarbonError::runtime(
                    ErrorKind::TypeError,
                    format!("can't convert \"{}\" to float.", s),
                )
            }),
            other => Err(CarbonError::runtime(
                ErrorKind::TypeError,
                format!("cannot construct float from type {}", other.type_name()),
            )),
        },
        BuiltinType::String | BuiltinType::Str => match args {
            [] => Ok(Value::string("")),
            [one] => Ok(Value::from(one.to_string())),
            _ => Err(CarbonError::runtime(
                ErrorKind::InvalidArgCount,
                "expected at most 1 argument.",
            )),
        },
        BuiltinType::Array => Ok(Value::array(args.to_vec())),
        BuiltinType::Map => {
            if !args.is_empty() {
                return Err(CarbonError::runtime(
                    ErrorKind::InvalidArgCount,
                    "expected exactly 0 argument.",
                ));
            }
            Ok(Value::map(MapData::default()))
        }
    }
}

/// Parses decimal, `0x` and `0b` integers with an optional sign
pub(crate) fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if negative { value.wrapping_neg() } else { value })
}

pub fn constant(ty: BuiltinType, name: &str) -> Option<Value> {
    match (ty, name) {
        (BuiltinType::Int, "MAX") => Some(Value::Int(i64::MAX)),
        (BuiltinType::Int, "MIN") => Some(Value::Int(i64::MIN)),
        (BuiltinType::Float, "INF") => Some(Value::Float(f64::INFINITY)),
        (BuiltinType::Float, "NAN") => Some(Value::Float(f64::NAN)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_construction() {
        assert_eq!(construct(BuiltinType::Int, &[Value::string(" 42 ")]).unwrap(), Value::Int(42));
        assert_eq!(construct(BuiltinType::Int, &[Value::string("0x1f")]).unwrap(), Value::Int(31));
        assert_eq!(construct(BuiltinType::Int, &[Value::Float(3.9)]).unwrap(), Value::Int(3));
        assert_eq!(
            construct(BuiltinType::Float, &[Value::string("2.5")]).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(construct(BuiltinType::Bool, &[Value::Int(0)]).unwrap(), Value::Bool(false));
        assert_eq!(construct(BuiltinType::Str, &[Value::Float(1.0)]).unwrap(), Value::string("1.0"));
    }

    #[test]
    fn test_construction_errors() {
        let err = construct(BuiltinType::Int, &[Value::string("abc")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeError);
        let err = construct(BuiltinType::Bool, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgCount);
        let err = construct(BuiltinType::Null, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
    }

    #[test]
    fn test_containers_are_fresh() {
        let a = construct(BuiltinType::Array, &[Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(a.to_string(), "[1, 2]");
        let m = construct(BuiltinType::Map, &[]).unwrap();
        assert!(!m.is_truthy());
    }

    #[test]
    fn test_constants() {
        assert_eq!(constant(BuiltinType::Int, "MAX"), Some(Value::Int(i64::MAX)));
        assert!(constant(BuiltinType::String, "MAX").is_none());
    }
}
