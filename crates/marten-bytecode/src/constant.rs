//! Constant pool values
//!
//! Equality and hashing are deliberately keyed by kind plus canonical bit
//! pattern, so that integer `1`, float `1.0`, and string `"1"` occupy
//! distinct pool slots and NaN deduplicates against itself.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A constant value in a function's constant pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    /// nil
    Nil,
    /// true / false
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// 64-bit IEEE-754 float
    Float(f64),
    /// immutable string
    Str(String),
}

impl Constant {
    /// Human-readable kind name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Constant::Nil => "nil",
            Constant::Boolean(_) => "boolean",
            Constant::Integer(_) => "integer",
            Constant::Float(_) => "float",
            Constant::Str(_) => "string",
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Integer(a), Constant::Integer(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Constant::Nil => {}
            Constant::Boolean(b) => b.hash(state),
            Constant::Integer(i) => i.hash(state),
            Constant::Float(f) => f.to_bits().hash(state),
            Constant::Str(s) => s.hash(state),
        }
    }
}

impl From<i64> for Constant {
    fn from(value: i64) -> Self {
        Constant::Integer(value)
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Constant::Float(value)
    }
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::Str(value.to_string())
    }
}

impl From<String> for Constant {
    fn from(value: String) -> Self {
        Constant::Str(value)
    }
}

impl From<bool> for Constant {
    fn from(value: bool) -> Self {
        Constant::Boolean(value)
    }
}
