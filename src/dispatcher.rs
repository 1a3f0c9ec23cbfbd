//! Operator dispatch over the mode stack.
//!
//! A call walks this thread's mode stack from the innermost mode outwards.
//! At each mode the operator's own binding is looked up, then the mode's
//! catch-all:
//!
//! 1. `Concrete` — the handler runs and its result (or error) is the result
//!    of the call. Nothing below it is consulted unless the handler asks.
//! 2. `Fallthrough` or `Unset` — the mode declines; continue one level lower.
//! 3. Keys masked by [`ExcludeModeGuard`](crate::mode_stack::ExcludeModeGuard)
//!    are skipped outright.
//!
//! Once the stack is exhausted the backend kernel runs, following the
//! configured backend's fallback chain. No kernel means
//! [`DispatchError::Exhausted`].
//!
//! Handlers receive a [`Redispatch`] handle. [`Redispatch::call_next`]
//! continues the walk strictly below the handler's own frame, which is how a
//! mode forwards to the layers beneath it. [`Redispatch::dispatcher`] gives
//! full re-entry: the new call reads the stack as it is at that moment,
//! including any modes the handler entered itself.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use briny_dispatch::prelude::*;
//!
//! let mut builder = RegistryBuilder::new();
//! briny_dispatch::vmap::register_fallthrough(&mut builder).unwrap();
//! briny_dispatch::ops::cpu::register_kernels(&mut builder).unwrap();
//! let dispatcher = Dispatcher::new(Arc::new(builder.build()));
//!
//! let _vmap = ModeGuard::enter(ModeKey::VmapMode);
//! let out = dispatcher
//!     .call("add", &[Value::Scalar(1.0), Value::Scalar(2.0)])
//!     .unwrap();
//! assert_eq!(out, Value::Scalar(3.0));
//! ```

use std::sync::Arc;

use tracing::trace;

use crate::backend::{get_backend, Backend};
use crate::error::DispatchError;
use crate::handler::{Handler, HandlerFn};
use crate::key::{ModeKey, ModeKeySet};
use crate::mode_stack::{self, ReentryGuard};
use crate::registry::{OperatorEntry, Registry};
use crate::value::Value;

/// Per-dispatcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Backend whose kernels run once every mode has fallen through.
    pub backend: Backend,
    /// Maximum nesting of dispatch calls on one thread.
    pub max_reentry_depth: usize,
}

impl DispatchConfig {
    /// Default nesting limit for re-entrant dispatch.
    pub const DEFAULT_MAX_REENTRY_DEPTH: usize = 64;

    #[must_use]
    pub const fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub const fn with_max_reentry_depth(mut self, depth: usize) -> Self {
        self.max_reentry_depth = depth;
        self
    }
}

impl Default for DispatchConfig {
    /// Picks up the process default backend from [`get_backend`].
    fn default() -> Self {
        Self {
            backend: get_backend(),
            max_reentry_depth: Self::DEFAULT_MAX_REENTRY_DEPTH,
        }
    }
}

/// Where a call ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// A concrete handler of the mode at `position` intercepts the call.
    Handler { key: ModeKey, position: usize },
    /// Every mode fell through; this backend's kernel runs.
    Kernel(Backend),
    /// Every mode fell through and there is no kernel.
    Exhausted,
}

/// The route a call would take, computed without running anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Modes passed through, innermost first.
    pub fallthrough: Vec<ModeKey>,
    /// Masked modes skipped, innermost first.
    pub excluded: Vec<ModeKey>,
    pub terminal: Terminal,
}

impl Resolution {
    /// Number of fallthrough hops taken before the terminal.
    #[must_use]
    pub fn hops(&self) -> usize {
        self.fallthrough.len()
    }
}

/// A mode passed over during the walk.
enum Pass {
    Fallthrough(ModeKey),
    Excluded(ModeKey),
}

/// Where the walk stopped.
enum Stop<'r> {
    Handler {
        key: ModeKey,
        position: usize,
        handler: &'r Arc<HandlerFn>,
    },
    Exhausted,
}

/// Routes operator calls through the mode stack.
///
/// Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher with the default configuration.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, DispatchConfig::default())
    }

    #[must_use]
    pub const fn with_config(registry: Arc<Registry>, config: DispatchConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatches `op` against the whole current mode stack.
    ///
    /// # Errors
    /// - Whatever the intercepting handler or the kernel returns, unchanged.
    /// - [`DispatchError::Exhausted`] when nothing handles the call.
    /// - [`DispatchError::ReentryLimit`] when nested too deeply.
    pub fn call(&self, op: &str, args: &[Value]) -> Result<Value, DispatchError> {
        self.dispatch_below(op, mode_stack::extent(), args)
    }

    /// Computes the route `op` would take right now.
    #[must_use]
    pub fn resolve(&self, op: &str) -> Resolution {
        let entry = self.registry.entry(op);
        let mut fallthrough = Vec::new();
        let mut excluded = Vec::new();
        let stop = self.walk(entry, mode_stack::extent(), mode_stack::excluded(), |pass| {
            match pass {
                Pass::Fallthrough(key) => fallthrough.push(key),
                Pass::Excluded(key) => excluded.push(key),
            }
        });
        let terminal = match stop {
            Stop::Handler { key, position, .. } => Terminal::Handler { key, position },
            Stop::Exhausted => self
                .registry
                .kernel_in(entry, self.config.backend)
                .map_or(Terminal::Exhausted, |(backend, _)| Terminal::Kernel(backend)),
        };
        Resolution {
            fallthrough,
            excluded,
            terminal,
        }
    }

    /// Dispatches `op` considering only stack positions below `start`.
    fn dispatch_below(
        &self,
        op: &str,
        start: usize,
        args: &[Value],
    ) -> Result<Value, DispatchError> {
        let _reentry = ReentryGuard::enter(op, self.config.max_reentry_depth)?;
        let entry = self.registry.entry(op);

        let stop = self.walk(entry, start, mode_stack::excluded(), |pass| match pass {
            Pass::Fallthrough(key) => trace!(op, %key, "fallthrough"),
            Pass::Excluded(key) => trace!(op, %key, "skipping excluded mode"),
        });

        match stop {
            Stop::Handler {
                key,
                position,
                handler,
            } => {
                trace!(op, %key, position, "invoking mode handler");
                let frame = Redispatch {
                    dispatcher: self,
                    op,
                    key,
                    position,
                };
                handler(&frame, args)
            }
            Stop::Exhausted => self.run_kernel(op, entry, args),
        }
    }

    /// Walks positions `start - 1` down to `0`, reporting every mode passed.
    fn walk<'r>(
        &'r self,
        entry: Option<&'r OperatorEntry>,
        start: usize,
        excluded: ModeKeySet,
        mut on_pass: impl FnMut(Pass),
    ) -> Stop<'r> {
        for position in (0..start).rev() {
            let Some(key) = mode_stack::key_at(position) else {
                continue;
            };
            if excluded.contains(key) {
                on_pass(Pass::Excluded(key));
                continue;
            }
            match self.registry.resolve_in(entry, key) {
                Handler::Concrete(handler) => {
                    return Stop::Handler {
                        key,
                        position,
                        handler,
                    };
                }
                Handler::Fallthrough | Handler::Unset => on_pass(Pass::Fallthrough(key)),
            }
        }
        Stop::Exhausted
    }

    fn run_kernel(
        &self,
        op: &str,
        entry: Option<&OperatorEntry>,
        args: &[Value],
    ) -> Result<Value, DispatchError> {
        match self.registry.kernel_in(entry, self.config.backend) {
            Some((backend, kernel)) => {
                trace!(op, ?backend, "running kernel");
                kernel(args)
            }
            None => Err(DispatchError::Exhausted {
                op: op.to_owned(),
                backend: self.config.backend,
            }),
        }
    }
}

/// Handle given to a concrete handler for the call it intercepted.
pub struct Redispatch<'d> {
    dispatcher: &'d Dispatcher,
    op: &'d str,
    key: ModeKey,
    position: usize,
}

impl Redispatch<'_> {
    /// The operator being dispatched.
    #[must_use]
    pub const fn op(&self) -> &str {
        self.op
    }

    /// The mode whose handler is running.
    #[must_use]
    pub const fn key(&self) -> ModeKey {
        self.key
    }

    /// Stack position of the intercepting mode.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Full re-entry point. Calls made through it see the live stack.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
    }

    /// Continues this call below the current mode, possibly with new arguments.
    ///
    /// # Errors
    /// Same as [`Dispatcher::call`].
    pub fn call_next(&self, args: &[Value]) -> Result<Value, DispatchError> {
        self.dispatcher.dispatch_below(self.op, self.position, args)
    }

    /// Dispatches a different operator below the current mode.
    ///
    /// # Errors
    /// Same as [`Dispatcher::call`].
    pub fn call_below(&self, op: &str, args: &[Value]) -> Result<Value, DispatchError> {
        self.dispatcher.dispatch_below(op, self.position, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode_stack::{ExcludeModeGuard, ModeGuard};
    use crate::registry::RegistryBuilder;

    fn cpu_config() -> DispatchConfig {
        DispatchConfig::default().with_backend(Backend::Cpu)
    }

    fn dispatcher(f: impl FnOnce(&mut RegistryBuilder)) -> Dispatcher {
        let mut b = RegistryBuilder::new();
        b.register_kernel("add", Backend::Cpu, |_| Ok(Value::Int(0))).unwrap();
        f(&mut b);
        Dispatcher::with_config(Arc::new(b.build()), cpu_config())
    }

    #[test]
    fn unset_modes_do_not_intercept() {
        let d = dispatcher(|_| {});
        let _g = ModeGuard::enter(ModeKey::Autograd);
        let r = d.resolve("add");
        assert_eq!(r.fallthrough, vec![ModeKey::Autograd]);
        assert_eq!(r.terminal, Terminal::Kernel(Backend::Cpu));
    }

    #[test]
    fn excluded_modes_are_skipped() {
        let d = dispatcher(|b| {
            b.register(ModeKey::Tracer, "add", Handler::concrete(|_, _| Ok(Value::Int(1))))
                .unwrap();
        });
        let _g = ModeGuard::enter(ModeKey::Tracer);
        assert_eq!(d.call("add", &[]).unwrap(), Value::Int(1));
        let _x = ExcludeModeGuard::new(ModeKey::Tracer);
        let r = d.resolve("add");
        assert_eq!(r.excluded, vec![ModeKey::Tracer]);
        assert_eq!(d.call("add", &[]).unwrap(), Value::Int(0));
    }

    #[test]
    fn unknown_operator_is_exhausted() {
        let d = dispatcher(|_| {});
        assert_eq!(d.resolve("gelu").terminal, Terminal::Exhausted);
        assert!(matches!(
            d.call("gelu", &[]),
            Err(DispatchError::Exhausted { ref op, backend: Backend::Cpu }) if op == "gelu"
        ));
    }

    #[test]
    fn selected_backend_kernel_wins_over_cpu() {
        let mut b = RegistryBuilder::new();
        b.register_kernel("add", Backend::Cpu, |_| Ok(Value::Int(0))).unwrap();
        b.register_kernel("add", Backend::Wgpu, |_| Ok(Value::Int(1))).unwrap();
        let registry = Arc::new(b.build());
        let cpu = Dispatcher::with_config(registry.clone(), cpu_config());
        let gpu =
            Dispatcher::with_config(registry.clone(), cpu_config().with_backend(Backend::Wgpu));
        assert_eq!(cpu.call("add", &[]).unwrap(), Value::Int(0));
        assert_eq!(gpu.call("add", &[]).unwrap(), Value::Int(1));
        let cuda = Dispatcher::with_config(registry, cpu_config().with_backend(Backend::Cuda));
        assert_eq!(cuda.call("add", &[]).unwrap(), Value::Int(0));
    }

    #[test]
    fn runaway_reentry_hits_the_limit() {
        let d = dispatcher(|b| {
            b.register(
                ModeKey::Python,
                "_",
                Handler::concrete(|ctx, args| ctx.dispatcher().call(ctx.op(), args)),
            )
            .unwrap();
        });
        let d = Dispatcher::with_config(d.registry.clone(), d.config.with_max_reentry_depth(8));
        let _g = ModeGuard::enter(ModeKey::Python);
        assert!(matches!(
            d.call("add", &[]),
            Err(DispatchError::ReentryLimit { depth: 8, .. })
        ));
    }
}
