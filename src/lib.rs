//! # `briny_dispatch`
//!
//! Mode-stack operator dispatch for tensor engines.
//!
//! Operator calls (`"add"`, `"matmul"`, ...) are routed through a
//! thread-local stack of active *modes*: vmap regions, gradient recording,
//! tracing and the like. Each mode either intercepts a call with a concrete
//! handler or declares it uninteresting with a **fallthrough**, in which case
//! the call continues at the next mode down and finally at a backend kernel.
//!
//! ## Features
//!
//! - **Registry**: write-once handler table, built at startup and shared
//!   read-only between threads
//! - **Fallthrough**: per-operator or catch-all (`_`) bindings that skip a mode
//! - **Mode stack**: RAII guards that always pop, including on error paths
//! - **Redispatch**: handlers forward below themselves or re-enter fully
//! - **Kernels**: per-backend kernels with CPU fallback, rayon-parallel
//!   reference implementations
//!
//! ## Modules
//!
//! - [`key`] — mode keys and key sets
//! - [`handler`] — the handler sum type
//! - [`registry`] — registration and the frozen table
//! - [`mode_stack`] — thread-local stack and scope guards
//! - [`dispatcher`] — resolution and invocation
//! - [`vmap`] — the vmap mode's registrations and region manager
//! - [`ops`] — backend kernels
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use briny_dispatch::prelude::*;
//!
//! let mut builder = RegistryBuilder::new();
//! builder
//!     .register(ModeKey::Autograd, "mul", Handler::concrete(|ctx, args| {
//!         // record something, then let the layers below compute
//!         ctx.call_next(args)
//!     }))
//!     .unwrap();
//! briny_dispatch::ops::cpu::register_kernels(&mut builder).unwrap();
//! let dispatcher = Dispatcher::new(Arc::new(builder.build()));
//!
//! let _grad = ModeGuard::enter(ModeKey::Autograd);
//! let y = dispatcher
//!     .call("mul", &[Value::Scalar(3.0), Value::Scalar(4.0)])
//!     .unwrap();
//! assert_eq!(y, Value::Scalar(12.0));
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]
#![deny(unsafe_code)]
#![forbid(unused_must_use)]

pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod key;
pub mod mode_stack;
pub mod ops;
pub mod registry;
pub mod tensors;
pub mod value;
pub mod vmap;

/// Commonly used items.
pub mod prelude {
    pub use crate::backend::Backend;
    pub use crate::dispatcher::{DispatchConfig, Dispatcher, Redispatch, Resolution, Terminal};
    pub use crate::error::{ConfigurationError, DispatchError, HandlerError};
    pub use crate::handler::Handler;
    pub use crate::key::{ModeKey, ModeKeySet};
    pub use crate::mode_stack::{ExcludeModeGuard, ModeGuard};
    pub use crate::registry::{Registry, RegistryBuilder};
    pub use crate::tensors::Tensor;
    pub use crate::value::Value;
}
