//! The boxed runtime value the generic interpreter operates on, plus the
//! numeric-coercion rules every `Binary`/`Cast` opcode relies on.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::ConstPayload;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(u32),
    String(Arc<str>),
    Array(Arc<RwLock<Vec<Value>>>),
}

impl Value {
    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(elements)))
    }

    /// `ToLong`: every integer-like value widens to `i64`; floats
    /// truncate toward zero (Rust's saturating `as` cast); everything
    /// else has no long form.
    pub fn to_long(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Char(c) => Some(*c as i64),
            Value::Float(f) => Some(crate::arith::float_to_int(*f)),
            _ => None,
        }
    }

    /// `ToDouble`: any numeric value widens to `f64`.
    pub fn to_double(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Char(c) => Some(*c as f64),
            _ => None,
        }
    }

    /// `ToBool`: nonzero numerics and `true`/non-null are truthy; `Null`
    /// and empty string are not.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Char(c) => *c != 0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) => true,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Char(_))
    }

    /// Mixed-type equality: numeric values compare by numeric value
    /// (`1 == 1.0`, `true == 1`); everything else compares structurally.
    pub fn values_equal(&self, other: &Value) -> bool {
        if self.is_numeric() && other.is_numeric() {
            if matches!(self, Value::Float(_)) || matches!(other, Value::Float(_)) {
                return self.to_double() == other.to_double();
            }
            return self.to_long() == other.to_long();
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&ConstPayload> for Value {
    fn from(payload: &ConstPayload) -> Self {
        match payload {
            ConstPayload::Null => Value::Null,
            ConstPayload::Bool(b) => Value::Bool(*b),
            ConstPayload::Int(i) => Value::Int(*i),
            ConstPayload::Float(f) => Value::Float(*f),
            ConstPayload::Char(c) => Value::Char(*c as u32),
            ConstPayload::String(s) => Value::String(s.as_str().into()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Char(c) => write!(f, "{}", char::from_u32(*c).unwrap_or('\u{FFFD}')),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(elements) => {
                write!(f, "[")?;
                let guard = elements.read();
                for (i, v) in guard.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).values_equal(&Value::Float(1.0)));
        assert!(Value::Bool(true).values_equal(&Value::Int(1)));
        assert!(!Value::Int(2).values_equal(&Value::Float(1.9)));
    }

    #[test]
    fn to_long_truncates_float_toward_zero() {
        assert_eq!(Value::Float(3.9).to_long(), Some(3));
        assert_eq!(Value::Float(-3.9).to_long(), Some(-3));
    }

    #[test]
    fn null_and_empty_string_are_falsy() {
        assert!(!Value::Null.to_bool());
        assert!(!Value::String(Arc::from("")).to_bool());
        assert!(Value::String(Arc::from("x")).to_bool());
    }
}
