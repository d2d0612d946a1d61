use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::context::Fact;
use super::error::EngineError;
use super::expr::BinOp;

/// Runtime value domain of the interpreter.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// A UTF-8 string.
    String(String),
    /// The absent value.
    #[default]
    Nil,
    /// A pass-through handle to a host aggregate.
    Fact(FactHandle),
}

/// Shared handle to a host-supplied [`Fact`]. Cloning shares the underlying
/// host object; equality is handle identity.
#[derive(Clone)]
pub struct FactHandle(pub Arc<dyn Fact>);

impl fmt::Debug for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FactHandle").field(&self.0.fact_type()).finish()
    }
}

impl Value {
    /// Wrap a host aggregate as a value.
    #[must_use]
    pub fn fact(fact: Arc<dyn Fact>) -> Self {
        Value::Fact(FactHandle(fact))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Nil => "nil",
            Value::Fact(_) => "fact",
        }
    }

    /// Apply a comparison operator. Numerics promote int to float; strings
    /// compare lexicographically; bool, nil, and facts support equality only.
    ///
    /// # Errors
    ///
    /// Returns a type error for cross-type comparisons and for ordering
    /// operators on non-ordered values.
    pub fn compare(&self, op: BinOp, other: &Value) -> Result<bool, EngineError> {
        if let Some(ord) = self.numeric_cmp(other) {
            return Ok(apply_ordering(op, ord));
        }
        match (self, other) {
            (Value::String(a), Value::String(b)) => Ok(apply_ordering(op, a.cmp(b))),
            (Value::Bool(a), Value::Bool(b)) => equality_only(op, a == b, "bool"),
            (Value::Nil, Value::Nil) => equality_only(op, true, "nil"),
            (Value::Nil, Value::Fact(h)) | (Value::Fact(h), Value::Nil) => {
                equality_only(op, h.0.is_nil(), "fact")
            }
            (Value::Fact(a), Value::Fact(b)) => {
                equality_only(op, Arc::ptr_eq(&a.0, &b.0), "fact")
            }
            (a, b) => Err(EngineError::Type {
                message: format!(
                    "cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                ),
            }),
        }
    }

    /// Binary `+`. Numeric addition with promotion, or string concatenation.
    pub fn add(&self, other: &Value) -> Result<Value, EngineError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (Value::String(a), Value::String(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Ok(Value::String(s))
            }
            _ => self.float_op(other, "+", |a, b| a + b),
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, EngineError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
            _ => self.float_op(other, "-", |a, b| a - b),
        }
    }

    pub fn mul(&self, other: &Value) -> Result<Value, EngineError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
            _ => self.float_op(other, "*", |a, b| a * b),
        }
    }

    /// Binary `/`. Integer division truncates toward zero.
    pub fn div(&self, other: &Value) -> Result<Value, EngineError> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(EngineError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_div(*b))),
            _ => self.float_op(other, "/", |a, b| a / b),
        }
    }

    /// Binary `%`. Defined for integers only.
    pub fn rem(&self, other: &Value) -> Result<Value, EngineError> {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(EngineError::DivisionByZero),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_rem(*b))),
            (a, b) => Err(EngineError::Type {
                message: format!(
                    "% is not defined for {} and {}",
                    a.type_name(),
                    b.type_name()
                ),
            }),
        }
    }

    /// Unary `-`.
    pub fn neg(&self) -> Result<Value, EngineError> {
        match self {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(EngineError::Type {
                message: format!("cannot negate {}", other.type_name()),
            }),
        }
    }

    /// Unary `!`.
    pub fn not(&self) -> Result<Value, EngineError> {
        match self {
            Value::Bool(v) => Ok(Value::Bool(!v)),
            other => Err(EngineError::Type {
                message: format!("! expects bool, got {}", other.type_name()),
            }),
        }
    }

    /// Require this value to be a bool, as rule conditions and `if` guards do.
    pub(crate) fn as_bool(&self, what: &str) -> Result<bool, EngineError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(EngineError::Type {
                message: format!("{what} must be bool, got {}", other.type_name()),
            }),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn numeric_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        }
    }

    fn float_op(
        &self,
        other: &Value,
        sym: &str,
        f: impl FnOnce(f64, f64) -> f64,
    ) -> Result<Value, EngineError> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
            _ => Err(EngineError::Type {
                message: format!(
                    "{sym} is not defined for {} and {}",
                    self.type_name(),
                    other.type_name()
                ),
            }),
        }
    }
}

fn apply_ordering(op: BinOp, ord: Ordering) -> bool {
    match op {
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Neq => ord != Ordering::Equal,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Gte => ord != Ordering::Less,
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Lte => ord != Ordering::Greater,
        _ => unreachable!("not a comparison operator"),
    }
}

fn equality_only(op: BinOp, equal: bool, kind: &str) -> Result<bool, EngineError> {
    match op {
        BinOp::Eq => Ok(equal),
        BinOp::Neq => Ok(!equal),
        _ => Err(EngineError::Type {
            message: format!("{op} is not defined for {kind}"),
        }),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            #[allow(clippy::cast_precision_loss)]
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Nil, Value::Fact(h)) | (Value::Fact(h), Value::Nil) => h.0.is_nil(),
            (Value::Fact(a), Value::Fact(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "\"{v}\""),
            Value::Nil => write!(f, "nil"),
            Value::Fact(h) => write!(f, "<{}>", h.0.fact_type()),
        }
    }
}
