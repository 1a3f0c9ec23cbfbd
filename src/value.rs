//! Boxed operator arguments and results.

use crate::error::DispatchError;
use crate::tensors::Ten64;

/// One boxed argument or result of an operator call.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Ten64),
    Scalar(f64),
    Int(i64),
    Bool(bool),
    None,
    List(Vec<Value>),
}

impl Value {
    /// Short name of the variant, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tensor(_) => "tensor",
            Self::Scalar(_) => "scalar",
            Self::Int(_) => "int",
            Self::Bool(_) => "bool",
            Self::None => "none",
            Self::List(_) => "list",
        }
    }

    #[must_use]
    pub const fn as_tensor(&self) -> Option<&Ten64> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Numeric view of scalars and ints.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(x) => Some(*x),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Unwraps a tensor result, failing with a kernel error naming `op`.
    pub fn into_tensor(self, op: &str) -> Result<Ten64, DispatchError> {
        match self {
            Self::Tensor(t) => Ok(t),
            other => Err(DispatchError::kernel(
                op,
                format!("expected a tensor result, got {}", other.kind()),
            )),
        }
    }
}

impl From<Ten64> for Value {
    fn from(t: Ten64) -> Self {
        Self::Tensor(t)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Scalar(x)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
