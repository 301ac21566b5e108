//! IR value and type system for the Oaf language core.

use std::fmt;
use serde::{Deserialize, Serialize};

/// Types that flow through the IR and bytecode layers.
///
/// `Unknown` is produced by a caller that could not infer a type; it must
/// propagate through optimization unchanged and must never be treated as
/// "integer-like" by the fast-path eligibility predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    Void,
    Int,
    Float,
    Bool,
    Char,
    String,
    Unknown,
}

impl IrType {
    /// `Int`, `Char`, and `Bool` share a 64-bit-representable runtime
    /// encoding and are eligible for the bytecode generator's integer
    /// specialization and the VM's fast path.
    pub fn is_integer_like(self) -> bool {
        matches!(self, IrType::Int | IrType::Char | IrType::Bool)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, IrType::Int | IrType::Float)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int => write!(f, "int"),
            IrType::Float => write!(f, "float"),
            IrType::Bool => write!(f, "bool"),
            IrType::Char => write!(f, "char"),
            IrType::String => write!(f, "string"),
            IrType::Unknown => write!(f, "unknown"),
        }
    }
}

/// A literal payload carried by a `Constant` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstPayload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    String(String),
}

impl ConstPayload {
    /// Key used for constant-pool interning: identical literals of the
    /// same type share one constant-pool slot.
    pub fn intern_key(&self) -> String {
        match self {
            ConstPayload::Null => "null".to_string(),
            ConstPayload::Bool(b) => b.to_string(),
            ConstPayload::Int(i) => i.to_string(),
            ConstPayload::Float(f) => f.to_bits().to_string(),
            ConstPayload::Char(c) => (*c as u32).to_string(),
            ConstPayload::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for ConstPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstPayload::Null => write!(f, "null"),
            ConstPayload::Bool(b) => write!(f, "{}", b),
            ConstPayload::Int(i) => write!(f, "{}", i),
            ConstPayload::Float(x) => write!(f, "{}", x),
            ConstPayload::Char(c) => write!(f, "'{}'", c.escape_default()),
            ConstPayload::String(s) => write!(f, "\"{}\"", s.escape_default()),
        }
    }
}

/// The operand kind used by every IR instruction: exactly one of a
/// constant literal, a named mutable variable, or a single-assignment
/// temporary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrValue {
    Constant(IrType, ConstPayload),
    /// A qualified name unique within its declaring scope (`module.sym`,
    /// `obj.field`, or a bare local name).
    Variable(IrType, String),
    /// A single-assignment intermediate named `t0, t1, ...`.
    Temporary(IrType, String),
}

impl IrValue {
    pub fn ir_type(&self) -> IrType {
        match self {
            IrValue::Constant(ty, _) | IrValue::Variable(ty, _) | IrValue::Temporary(ty, _) => *ty,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, IrValue::Constant(..))
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, IrValue::Variable(..))
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, IrValue::Temporary(..))
    }

    /// The storage name for a `Variable` or `Temporary`, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            IrValue::Variable(_, name) | IrValue::Temporary(_, name) => Some(name.as_str()),
            IrValue::Constant(..) => None,
        }
    }

    pub fn int(value: i64) -> Self {
        IrValue::Constant(IrType::Int, ConstPayload::Int(value))
    }

    pub fn boolean(value: bool) -> Self {
        IrValue::Constant(IrType::Bool, ConstPayload::Bool(value))
    }

    pub fn null() -> Self {
        IrValue::Constant(IrType::Unknown, ConstPayload::Null)
    }

    /// The integer literal this value carries, if it is an integer
    /// constant. Used by the bytecode generator's const-right
    /// specialization rule.
    pub fn as_int_literal(&self) -> Option<i64> {
        match self {
            IrValue::Constant(_, ConstPayload::Int(i)) => Some(*i),
            IrValue::Constant(_, ConstPayload::Bool(b)) => Some(*b as i64),
            IrValue::Constant(_, ConstPayload::Char(c)) => Some(*c as i64),
            _ => None,
        }
    }
}

impl fmt::Display for IrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrValue::Constant(_, payload) => write!(f, "{}", payload),
            IrValue::Variable(_, name) => write!(f, "%{}", name),
            IrValue::Temporary(_, name) => write!(f, "%{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_like_excludes_unknown_and_float() {
        assert!(IrType::Int.is_integer_like());
        assert!(IrType::Char.is_integer_like());
        assert!(IrType::Bool.is_integer_like());
        assert!(!IrType::Float.is_integer_like());
        assert!(!IrType::Unknown.is_integer_like());
        assert!(!IrType::String.is_integer_like());
    }

    #[test]
    fn intern_key_distinguishes_types_with_equal_text() {
        // 1 as an Int and 1.0 as a Float must not collide even though a
        // naive string key of the numeric value would make them equal.
        let a = ConstPayload::Int(1).intern_key();
        let b = ConstPayload::Float(1.0).intern_key();
        assert_ne!(a, b);
    }

    #[test]
    fn as_int_literal_widens_char_and_bool() {
        assert_eq!(IrValue::boolean(true).as_int_literal(), Some(1));
        assert_eq!(
            IrValue::Constant(IrType::Char, ConstPayload::Char('a')).as_int_literal(),
            Some('a' as i64)
        );
        assert_eq!(
            IrValue::Constant(IrType::String, ConstPayload::String("x".into())).as_int_literal(),
            None
        );
    }

    #[test]
    fn variable_and_temporary_expose_their_name() {
        let v = IrValue::Variable(IrType::Int, "counter".to_string());
        assert_eq!(v.name(), Some("counter"));
        let t = IrValue::Temporary(IrType::Int, "t3".to_string());
        assert_eq!(t.name(), Some("t3"));
        assert_eq!(IrValue::int(4).name(), None);
    }
}
