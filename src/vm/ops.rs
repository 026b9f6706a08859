// Carbon Value Operators
// Arithmetic, comparison, logical and bitwise semantics on plain values.
// Instance operator overloads are dispatched by the VM before reaching here.

use crate::error::{CarbonError, CarbonResult, ErrorKind};
use crate::vm::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Operator encoded as the operand of the OPERATOR opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Operator {
    Assignment = 0,
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    Positive,
    Negative,
    EqCheck,
    NotEqCheck,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    BitLShift,
    BitRShift,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
}

const ALL_OPERATORS: [Operator; 23] = [
    Operator::Assignment,
    Operator::Addition,
    Operator::Subtraction,
    Operator::Multiplication,
    Operator::Division,
    Operator::Modulo,
    Operator::Positive,
    Operator::Negative,
    Operator::EqCheck,
    Operator::NotEqCheck,
    Operator::Lt,
    Operator::LtEq,
    Operator::Gt,
    Operator::GtEq,
    Operator::And,
    Operator::Or,
    Operator::Not,
    Operator::BitLShift,
    Operator::BitRShift,
    Operator::BitAnd,
    Operator::BitOr,
    Operator::BitXor,
    Operator::BitNot,
];

impl Operator {
    pub fn from_u32(raw: u32) -> Option<Operator> {
        ALL_OPERATORS.get(raw as usize).copied()
    }

    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            Operator::Positive | Operator::Negative | Operator::Not | Operator::BitNot
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Assignment => "=",
            Operator::Addition | Operator::Positive => "+",
            Operator::Subtraction | Operator::Negative => "-",
            Operator::Multiplication => "*",
            Operator::Division => "/",
            Operator::Modulo => "%",
            Operator::EqCheck => "==",
            Operator::NotEqCheck => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
            Operator::BitLShift => "<<",
            Operator::BitRShift => ">>",
            Operator::BitAnd => "&",
            Operator::BitOr => "|",
            Operator::BitXor => "^",
            Operator::BitNot => "~",
        }
    }

    /// Name of the magic method a class defines to overload this operator
    pub fn magic_method(&self) -> Option<&'static str> {
        match self {
            Operator::Addition => Some("__add"),
            Operator::Subtraction => Some("__sub"),
            Operator::Multiplication => Some("__mul"),
            Operator::Division => Some("__div"),
            Operator::EqCheck => Some("__eq"),
            Operator::Lt => Some("__lt"),
            Operator::Gt => Some("__gt"),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Float(n) => Some(Num::Float(*n)),
        _ => None,
    }
}

fn unsupported(op: Operator, left: &Value, right: &Value) -> CarbonError {
    CarbonError::runtime(
        ErrorKind::OperatorNotSupported,
        format!(
            "operator \"{}\" not supported on operands \"{}\" and \"{}\".",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
    )
}

fn unsupported_unary(op: Operator, value: &Value) -> CarbonError {
    CarbonError::runtime(
        ErrorKind::OperatorNotSupported,
        format!(
            "operator ({}) not supported on base {}.",
            op.symbol(),
            value.type_name()
        ),
    )
}

fn zero_division() -> CarbonError {
    CarbonError::runtime(ErrorKind::ZeroDivision, "division by zero.")
}

/// Apply a unary operator
pub fn unary(op: Operator, value: &Value) -> CarbonResult<Value> {
    match op {
        Operator::Positive => match value {
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => Ok(value.clone()),
            _ => Err(unsupported_unary(op, value)),
        },
        Operator::Negative => match value {
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
            Value::Float(n) => Ok(Value::Float(-n)),
            _ => Err(unsupported_unary(op, value)),
        },
        Operator::Not => Ok(Value::Bool(!value.is_truthy())),
        Operator::BitNot => match value {
            Value::Int(n) => Ok(Value::Int(!n)),
            _ => Err(unsupported_unary(op, value)),
        },
        _ => Err(CarbonError::bug(format!(
            "operator {:?} is not unary",
            op
        ))),
    }
}

/// Apply a binary operator
pub fn binary(op: Operator, left: &Value, right: &Value) -> CarbonResult<Value> {
    match op {
        Operator::Addition => add(left, right),
        Operator::Subtraction => arithmetic(op, left, right, i64::wrapping_sub, |a, b| a - b),
        Operator::Multiplication => multiply(left, right),
        Operator::Division => divide(left, right),
        Operator::Modulo => modulo(left, right),
        Operator::EqCheck => Ok(Value::Bool(left.equals(right))),
        Operator::NotEqCheck => Ok(Value::Bool(!left.equals(right))),
        Operator::Lt => Ok(Value::Bool(compare(op, left, right)? == Ordering::Less)),
        Operator::LtEq => Ok(Value::Bool(compare(op, left, right)? != Ordering::Greater)),
        Operator::Gt => Ok(Value::Bool(compare(op, left, right)? == Ordering::Greater)),
        Operator::GtEq => Ok(Value::Bool(compare(op, left, right)? != Ordering::Less)),
        Operator::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        Operator::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        Operator::BitLShift | Operator::BitRShift => shift(op, left, right),
        Operator::BitAnd => bitwise(op, left, right, |a, b| a & b),
        Operator::BitOr => bitwise(op, left, right, |a, b| a | b),
        Operator::BitXor => bitwise(op, left, right, |a, b| a ^ b),
        _ => Err(CarbonError::bug(format!(
            "operator {:?} is not binary",
            op
        ))),
    }
}

fn arithmetic(
    op: Operator,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> CarbonResult<Value> {
    match (as_num(left), as_num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Value::Int(int_op(a, b))),
        (Some(Num::Int(a)), Some(Num::Float(b))) => Ok(Value::Float(float_op(a as f64, b))),
        (Some(Num::Float(a)), Some(Num::Int(b))) => Ok(Value::Float(float_op(a, b as f64))),
        (Some(Num::Float(a)), Some(Num::Float(b))) => Ok(Value::Float(float_op(a, b))),
        _ => Err(unsupported(op, left, right)),
    }
}

fn add(left: &Value, right: &Value) -> CarbonResult<Value> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::from(s))
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::array(items))
        }
        _ => arithmetic(Operator::Addition, left, right, i64::wrapping_add, |a, b| a + b),
    }
}

fn repeat_count(n: i64) -> usize {
    if n < 0 {
        0
    } else {
        n as usize
    }
}

fn multiply(left: &Value, right: &Value) -> CarbonResult<Value> {
    match (left, right) {
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
            Ok(Value::from(s.repeat(repeat_count(*n))))
        }
        (Value::Array(a), Value::Int(n)) | (Value::Int(n), Value::Array(a)) => {
            let a = a.borrow();
            let mut items = Vec::with_capacity(a.len() * repeat_count(*n));
            for _ in 0..repeat_count(*n) {
                items.extend(a.iter().cloned());
            }
            Ok(Value::array(items))
        }
        _ => arithmetic(
            Operator::Multiplication,
            left,
            right,
            i64::wrapping_mul,
            |a, b| a * b,
        ),
    }
}

fn divide(left: &Value, right: &Value) -> CarbonResult<Value> {
    match (as_num(left), as_num(right)) {
        (Some(_), Some(Num::Int(0))) => Err(zero_division()),
        (Some(_), Some(Num::Float(b))) if b == 0.0 => Err(zero_division()),
        _ => arithmetic(
            Operator::Division,
            left,
            right,
            i64::wrapping_div,
            |a, b| a / b,
        ),
    }
}

fn modulo(left: &Value, right: &Value) -> CarbonResult<Value> {
    match (as_num(left), as_num(right)) {
        (Some(_), Some(Num::Int(0))) => Err(zero_division()),
        (Some(_), Some(Num::Float(b))) if b == 0.0 => Err(zero_division()),
        _ => arithmetic(Operator::Modulo, left, right, i64::wrapping_rem, |a, b| a % b),
    }
}

/// Ordering for `<`, `<=`, `>`, `>=` on numbers, strings and arrays
pub fn compare(op: Operator, left: &Value, right: &Value) -> CarbonResult<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.as_ref().cmp(b.as_ref())),
        (Value::Array(a), Value::Array(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            for (x, y) in a.iter().zip(b.iter()) {
                match compare(op, x, y)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => match (as_num(left), as_num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => {
                let a = match a {
                    Num::Int(n) => n as f64,
                    Num::Float(n) => n,
                };
                let b = match b {
                    Num::Int(n) => n as f64,
                    Num::Float(n) => n,
                };
                a.partial_cmp(&b).ok_or_else(|| unsupported(op, left, right))
            }
            _ => Err(unsupported(op, left, right)),
        },
    }
}

fn ints(op: Operator, left: &Value, right: &Value) -> CarbonResult<(i64, i64)> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok((*a, *b)),
        (Value::Bool(a), Value::Int(b)) => Ok((*a as i64, *b)),
        (Value::Int(a), Value::Bool(b)) => Ok((*a, *b as i64)),
        _ => Err(unsupported(op, left, right)),
    }
}

fn bitwise(
    op: Operator,
    left: &Value,
    right: &Value,
    f: fn(i64, i64) -> i64,
) -> CarbonResult<Value> {
    let (a, b) = ints(op, left, right)?;
    Ok(Value::Int(f(a, b)))
}

fn shift(op: Operator, left: &Value, right: &Value) -> CarbonResult<Value> {
    let (a, b) = ints(op, left, right)?;
    let amount = u32::try_from(b).map_err(|_| {
        CarbonError::runtime(
            ErrorKind::OperatorNotSupported,
            format!("negative shift count {}.", b),
        )
    })?;
    let shifted = if op == Operator::BitLShift {
        a.checked_shl(amount).unwrap_or(0)
    } else {
        a.checked_shr(amount).unwrap_or(if a < 0 { -1 } else { 0 })
    };
    Ok(Value::Int(shifted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_encoding_order() {
        assert_eq!(Operator::Assignment as u32, 0);
        assert_eq!(Operator::Addition as u32, 1);
        assert_eq!(Operator::EqCheck as u32, 8);
        assert_eq!(Operator::BitNot as u32, 22);
        assert_eq!(Operator::from_u32(13), Some(Operator::GtEq));
        assert_eq!(Operator::from_u32(23), None);
    }

    #[test]
    fn test_numeric_promotion() {
        let v = binary(Operator::Addition, &Value::Int(2), &Value::Float(0.5)).unwrap();
        assert_eq!(v, Value::Float(2.5));
        let v = binary(Operator::Addition, &Value::Bool(true), &Value::Int(2)).unwrap();
        assert!(matches!(v, Value::Int(3)));
        let v = binary(Operator::Division, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(matches!(v, Value::Int(3)));
    }

    #[test]
    fn test_string_operators() {
        let v = binary(Operator::Addition, &Value::string("a"), &Value::string("b")).unwrap();
        assert_eq!(v, Value::string("ab"));
        let v = binary(Operator::Multiplication, &Value::Int(3), &Value::string("ab")).unwrap();
        assert_eq!(v, Value::string("ababab"));
        let lt = binary(Operator::Lt, &Value::string("abc"), &Value::string("abd")).unwrap();
        assert_eq!(lt, Value::Bool(true));
    }

    #[test]
    fn test_unsupported_operands_message() {
        let err = binary(Operator::Addition, &Value::string("a"), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OperatorNotSupported);
        assert_eq!(
            err.message,
            "operator \"+\" not supported on operands \"String\" and \"int\"."
        );
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(Operator::Division, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        let err = binary(Operator::Modulo, &Value::Float(1.0), &Value::Float(0.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(
            binary(Operator::BitLShift, &Value::Int(1), &Value::Int(4)).unwrap(),
            Value::Int(16)
        );
        assert_eq!(
            binary(Operator::BitXor, &Value::Int(6), &Value::Int(3)).unwrap(),
            Value::Int(5)
        );
        assert_eq!(unary(Operator::BitNot, &Value::Int(0)).unwrap(), Value::Int(-1));
        assert!(binary(Operator::BitAnd, &Value::Float(1.0), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(Operator::Negative, &Value::Int(5)).unwrap(), Value::Int(-5));
        assert_eq!(unary(Operator::Not, &Value::Null).unwrap(), Value::Bool(true));
        let err = unary(Operator::Negative, &Value::string("x")).unwrap_err();
        assert_eq!(err.message, "operator (-) not supported on base String.");
    }

    #[test]
    fn test_array_concat_and_compare() {
        let a = Value::array(vec![Value::Int(1)]);
        let b = Value::array(vec![Value::Int(2)]);
        let joined = binary(Operator::Addition, &a, &b).unwrap();
        assert_eq!(joined, Value::array(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(binary(Operator::Lt, &a, &b).unwrap(), Value::Bool(true));
    }
}
