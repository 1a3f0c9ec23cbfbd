//! Vectorized-map mode.
//!
//! `VmapMode` is active for the whole extent of a vmap region, whether or not
//! the tensors flowing through it are batched. Its catch-all is a
//! fallthrough: by default the mode intercepts nothing and every call goes on
//! to the modes below it (typically `Batched`, which holds the real batching
//! rules). The only operators it does intercept are random ones, so that
//! randomness inside a vmap region follows the region's [`Randomness`] policy.
//!
//! ```
//! use std::sync::Arc;
//! use briny_dispatch::prelude::*;
//! use briny_dispatch::vmap::{self, VmapScope};
//!
//! let mut builder = RegistryBuilder::new();
//! vmap::register_fallthrough(&mut builder).unwrap();
//! briny_dispatch::ops::cpu::register_kernels(&mut builder).unwrap();
//! let dispatcher = Dispatcher::new(Arc::new(builder.build()));
//!
//! let scope = VmapScope::enter();
//! assert_eq!(vmap::level(), 1);
//! assert_eq!(dispatcher.resolve("mul").hops(), 1);
//! drop(scope);
//! assert_eq!(vmap::level(), 0);
//! ```

use core::cell::Cell;
use core::fmt;
use core::str::FromStr;

use crate::error::{ConfigurationError, HandlerError};
use crate::handler::Handler;
use crate::key::ModeKey;
use crate::mode_stack::ModeGuard;
use crate::registry::RegistryBuilder;

/// Random operators checked by [`register_randomness_checks`].
pub const RANDOM_OPS: [&str; 5] = ["rand", "randn", "bernoulli", "dropout", "normal"];

thread_local! {
    static VMAP_LEVEL: Cell<usize> = const { Cell::new(0) };
}

/// Installs the wildcard fallthrough for [`ModeKey::VmapMode`].
///
/// Safe to call from several initialization paths; repeats are no-ops.
///
/// # Errors
/// Fails if a concrete catch-all was already bound for `VmapMode`.
pub fn register_fallthrough(builder: &mut RegistryBuilder) -> Result<(), ConfigurationError> {
    builder.library(ModeKey::VmapMode, |lib| {
        lib.fallback(Handler::fallthrough())?;
        Ok(())
    })?;
    Ok(())
}

/// How random operators behave inside a vmap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Randomness {
    /// Calling a random operator is an error.
    #[default]
    Error,
    /// Each batch element draws independently.
    Different,
    /// Every batch element sees the same draw.
    Same,
}

impl fmt::Display for Randomness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Different => "different",
            Self::Same => "same",
        })
    }
}

impl FromStr for Randomness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "different" => Ok(Self::Different),
            "same" => Ok(Self::Same),
            other => Err(format!("unknown randomness policy `{other}`")),
        }
    }
}

/// Binds per-operator `VmapMode` handlers for [`RANDOM_OPS`].
///
/// With [`Randomness::Error`] they fail the call. Otherwise they pass it on
/// unchanged to the modes below; drawing per-element or shared values is the
/// batching layer's job.
///
/// # Errors
/// Fails if any of these operators already has a `VmapMode` binding.
pub fn register_randomness_checks(
    builder: &mut RegistryBuilder,
    policy: Randomness,
) -> Result<(), ConfigurationError> {
    builder.library(ModeKey::VmapMode, |lib| {
        for op in RANDOM_OPS {
            let handler = match policy {
                Randomness::Error => Handler::concrete(|ctx, _| {
                    Err(HandlerError::new(format!(
                        "vmap: called random operation `{}` while in randomness error mode",
                        ctx.op()
                    ))
                    .into())
                }),
                Randomness::Different | Randomness::Same => {
                    Handler::concrete(|ctx, args| ctx.call_next(args))
                }
            };
            lib.op(op, handler)?;
        }
        Ok(())
    })?;
    Ok(())
}

/// Current vmap nesting level on this thread.
#[must_use]
pub fn level() -> usize {
    VMAP_LEVEL.with(Cell::get)
}

/// One vmap region: pushes [`ModeKey::VmapMode`] and bumps the nesting level
/// until dropped.
#[derive(Debug)]
#[must_use = "the vmap region ends as soon as the scope is dropped"]
pub struct VmapScope {
    level: usize,
    _mode: ModeGuard,
}

impl VmapScope {
    pub fn enter() -> Self {
        let level = VMAP_LEVEL.with(|l| {
            let next = l.get() + 1;
            l.set(next);
            next
        });
        Self {
            level,
            _mode: ModeGuard::enter(ModeKey::VmapMode),
        }
    }

    /// Nesting level of this region, starting at 1.
    #[must_use]
    pub const fn level(&self) -> usize {
        self.level
    }
}

impl Drop for VmapScope {
    fn drop(&mut self) {
        let _ = VMAP_LEVEL.try_with(|l| l.set(self.level - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_is_idempotent() {
        let mut b = RegistryBuilder::new();
        register_fallthrough(&mut b).unwrap();
        register_fallthrough(&mut b).unwrap();
        assert!(b.build().catch_all(ModeKey::VmapMode).is_fallthrough());
    }

    #[test]
    fn random_ops_get_their_own_bindings() {
        let mut b = RegistryBuilder::new();
        register_fallthrough(&mut b).unwrap();
        register_randomness_checks(&mut b, Randomness::Error).unwrap();
        let r = b.build();
        for op in RANDOM_OPS {
            assert!(!r.handler(op, ModeKey::VmapMode).is_fallthrough());
        }
        assert!(r.handler("add", ModeKey::VmapMode).is_fallthrough());
    }

    #[test]
    fn nested_scopes_track_level() {
        let outer = VmapScope::enter();
        let inner = VmapScope::enter();
        assert_eq!((outer.level(), inner.level()), (1, 2));
        assert_eq!(level(), 2);
        drop(inner);
        assert_eq!(level(), 1);
        drop(outer);
        assert_eq!(level(), 0);
    }

    #[test]
    fn policy_round_trips_through_strings() {
        for p in [Randomness::Error, Randomness::Different, Randomness::Same] {
            assert_eq!(p.to_string().parse::<Randomness>(), Ok(p));
        }
        assert!("chaos".parse::<Randomness>().is_err());
    }
}
