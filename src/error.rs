//! Error types.
//!
//! Three kinds of failure exist:
//!
//! - [`ConfigurationError`]: a registration was rejected while building the
//!   [`Registry`](crate::registry::Registry). Fatal for initialization.
//! - [`HandlerError`]: raised by a concrete mode handler. It travels back to
//!   the caller exactly as raised, through every fallthrough frame passed on
//!   the way down.
//! - [`DispatchError`]: everything a call to
//!   [`Dispatcher::call`](crate::dispatcher::Dispatcher::call) can return.

use std::error::Error as StdError;

use thiserror::Error;

use crate::backend::Backend;
use crate::handler::HandlerKind;
use crate::key::ModeKey;

/// A registration rejected while building the handler table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A second, non-idempotent handler for an already bound pair.
    #[error("{target} already has a {existing} handler for mode {key}; refusing {incoming}")]
    DuplicateHandler {
        key: ModeKey,
        target: String,
        existing: HandlerKind,
        incoming: HandlerKind,
    },

    /// `Unset` is the absence of a binding and cannot be registered.
    #[error("cannot register an unset handler for {target} under mode {key}")]
    UnsetHandler { key: ModeKey, target: String },

    /// A second kernel for the same operator and backend.
    #[error("operator `{op}` already has a {backend:?} kernel")]
    DuplicateKernel { op: String, backend: Backend },

    /// Operator names must be non-empty, free of whitespace, and not the wildcard.
    #[error("invalid operator name `{0}`")]
    InvalidOperatorName(String),
}

/// Failure raised by a concrete mode handler.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    /// Creates a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a handler error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned from dispatching an operator call.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Every mode fell through and no backend kernel exists for the operator.
    #[error("no kernel for operator `{op}` on backend {backend:?} and no mode intercepted it")]
    Exhausted { op: String, backend: Backend },

    /// A concrete handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// A backend kernel rejected its arguments.
    #[error("kernel `{op}` failed: {message}")]
    Kernel { op: String, message: String },

    /// Handlers re-entered the dispatcher too deeply.
    #[error("re-entrant dispatch of `{op}` exceeded depth {depth}")]
    ReentryLimit { op: String, depth: usize },
}

impl DispatchError {
    /// Shorthand for [`DispatchError::Kernel`].
    pub fn kernel(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Kernel {
            op: op.into(),
            message: message.into(),
        }
    }

    /// The handler error, if this is one.
    #[must_use]
    pub fn as_handler(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler(err) => Some(err),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = DispatchError> = core::result::Result<T, E>;
