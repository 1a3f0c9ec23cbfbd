//! Handler values bound in the dispatch table.
//!
//! A [`Handler`] is what a mode contributes for one operator (or, through the
//! wildcard, for all of them). It is a closed sum type so the resolution walk
//! in [`dispatcher`](crate::dispatcher) matches every case explicitly:
//!
//! - [`Handler::Concrete`] intercepts the call.
//! - [`Handler::Fallthrough`] declines it; dispatch continues one mode lower.
//! - [`Handler::Unset`] is an empty table slot.

use core::fmt;
use std::sync::Arc;

use crate::dispatcher::Redispatch;
use crate::error::DispatchError;
use crate::value::Value;

/// Signature of a concrete mode handler.
///
/// The handler receives a [`Redispatch`] handle for continuing below its own
/// frame, and the boxed arguments of the call.
pub type HandlerFn =
    dyn Fn(&Redispatch<'_>, &[Value]) -> Result<Value, DispatchError> + Send + Sync;

/// Signature of a backend kernel.
pub type KernelFn = dyn Fn(&[Value]) -> Result<Value, DispatchError> + Send + Sync;

/// What a mode does with a call.
#[derive(Clone, Default)]
pub enum Handler {
    /// Operator-specific logic.
    Concrete(Arc<HandlerFn>),
    /// Do not intercept; re-dispatch to the next lower mode, unchanged.
    Fallthrough,
    /// No binding.
    #[default]
    Unset,
}

impl Handler {
    /// Wraps a closure as a concrete handler.
    pub fn concrete<F>(f: F) -> Self
    where
        F: Fn(&Redispatch<'_>, &[Value]) -> Result<Value, DispatchError> + Send + Sync + 'static,
    {
        Self::Concrete(Arc::new(f))
    }

    /// The fallthrough sentinel.
    #[must_use]
    pub const fn fallthrough() -> Self {
        Self::Fallthrough
    }

    #[must_use]
    pub const fn kind(&self) -> HandlerKind {
        match self {
            Self::Concrete(_) => HandlerKind::Concrete,
            Self::Fallthrough => HandlerKind::Fallthrough,
            Self::Unset => HandlerKind::Unset,
        }
    }

    #[must_use]
    pub const fn is_fallthrough(&self) -> bool {
        matches!(self, Self::Fallthrough)
    }

    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(h) => write!(f, "Concrete({:p})", Arc::as_ptr(h).cast::<()>()),
            Self::Fallthrough => f.write_str("Fallthrough"),
            Self::Unset => f.write_str("Unset"),
        }
    }
}

/// The variant of a [`Handler`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Concrete,
    Fallthrough,
    Unset,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Concrete => "concrete",
            Self::Fallthrough => "fallthrough",
            Self::Unset => "unset",
        })
    }
}
