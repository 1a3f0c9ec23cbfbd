//! The operator handler table.
//!
//! # Lifecycle
//!
//! Registration happens on a [`RegistryBuilder`], typically from several
//! independent initialization functions, each adding the bindings of one
//! component. [`RegistryBuilder::build`] consumes the builder and returns an
//! immutable [`Registry`]. Dispatchers can only be created from a built
//! registry, so every registration is applied before the first dispatch, and
//! the read path needs no locking.
//!
//! # Layout
//!
//! Each operator owns a dense row of handlers indexed by [`ModeKey::index`]
//! plus one kernel slot per [`Backend`]. Next to the rows sits one catch-all
//! row, bound through the wildcard target `_`, consulted for any key whose
//! operator slot is unset.
//!
//! # Example
//!
//! ```
//! use briny_dispatch::handler::Handler;
//! use briny_dispatch::key::ModeKey;
//! use briny_dispatch::registry::RegistryBuilder;
//!
//! let mut builder = RegistryBuilder::new();
//! builder
//!     .register(ModeKey::VmapMode, "_", Handler::fallthrough())
//!     .unwrap();
//! let registry = builder.build();
//! assert!(registry.handler("add", ModeKey::VmapMode).is_fallthrough());
//! ```

use core::borrow::Borrow;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::backend::Backend;
use crate::error::{ConfigurationError, DispatchError};
use crate::handler::{Handler, KernelFn};
use crate::key::ModeKey;
use crate::value::Value;

/// The wildcard operator identifier.
pub const WILDCARD: &str = "_";

/// Validated operator identifier, e.g. `add` or `matmul`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorName(Arc<str>);

impl OperatorName {
    /// Validates and interns an operator name.
    ///
    /// # Errors
    /// Fails on empty names, names containing whitespace, and the wildcard.
    pub fn new(name: impl AsRef<str>) -> Result<Self, ConfigurationError> {
        let name = name.as_ref();
        if name.is_empty() || name == WILDCARD || name.chars().any(char::is_whitespace) {
            return Err(ConfigurationError::InvalidOperatorName(name.to_owned()));
        }
        Ok(Self(Arc::from(name)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for OperatorName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Left-hand side of a registration: one operator, or all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperatorTarget {
    /// The catch-all entry, written `_`.
    Wildcard,
    Operator(OperatorName),
}

impl OperatorTarget {
    /// Parses `_` as the wildcard and anything else as an operator name.
    ///
    /// # Errors
    /// Fails when the string is not a valid operator name.
    pub fn parse(s: &str) -> Result<Self, ConfigurationError> {
        if s == WILDCARD {
            Ok(Self::Wildcard)
        } else {
            OperatorName::new(s).map(Self::Operator)
        }
    }
}

impl fmt::Display for OperatorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str("catch-all `_`"),
            Self::Operator(name) => write!(f, "operator `{name}`"),
        }
    }
}

/// Handlers and kernels bound to one operator.
#[derive(Clone)]
pub(crate) struct OperatorEntry {
    name: OperatorName,
    handlers: [Handler; ModeKey::COUNT],
    kernels: [Option<Arc<KernelFn>>; Backend::COUNT],
}

impl OperatorEntry {
    fn new(name: OperatorName) -> Self {
        Self {
            name,
            handlers: core::array::from_fn(|_| Handler::Unset),
            kernels: core::array::from_fn(|_| None),
        }
    }
}

/// Binds `incoming` into `slot`, enforcing the one-binding-per-pair rule.
fn bind(
    slot: &mut Handler,
    key: ModeKey,
    target: &OperatorTarget,
    incoming: Handler,
) -> Result<(), ConfigurationError> {
    match (&*slot, &incoming) {
        (_, Handler::Unset) => Err(ConfigurationError::UnsetHandler {
            key,
            target: target.to_string(),
        }),
        (Handler::Unset, _) => {
            debug!(%key, %target, kind = %incoming.kind(), "registered handler");
            *slot = incoming;
            Ok(())
        }
        (Handler::Fallthrough, Handler::Fallthrough) => {
            debug!(%key, %target, "fallthrough already registered; ignoring duplicate");
            Ok(())
        }
        (existing, _) => Err(ConfigurationError::DuplicateHandler {
            key,
            target: target.to_string(),
            existing: existing.kind(),
            incoming: incoming.kind(),
        }),
    }
}

/// Mutable table used during initialization.
#[derive(Default)]
pub struct RegistryBuilder {
    operators: Vec<OperatorEntry>,
    index: HashMap<OperatorName, usize>,
    catch_all: [Handler; ModeKey::COUNT],
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_mut(&mut self, name: OperatorName) -> &mut OperatorEntry {
        let idx = match self.index.get(&name) {
            Some(&idx) => idx,
            None => {
                let idx = self.operators.len();
                self.operators.push(OperatorEntry::new(name.clone()));
                self.index.insert(name, idx);
                idx
            }
        };
        &mut self.operators[idx]
    }

    /// Binds `handler` to `target` (an operator name or `_`) under `key`.
    ///
    /// # Errors
    /// - [`ConfigurationError::DuplicateHandler`] if the pair is already bound,
    ///   unless both bindings are fallthrough, in which case this is a no-op.
    /// - [`ConfigurationError::UnsetHandler`] if `handler` is [`Handler::Unset`].
    /// - [`ConfigurationError::InvalidOperatorName`] for a malformed target.
    pub fn register(
        &mut self,
        key: ModeKey,
        target: impl AsRef<str>,
        handler: Handler,
    ) -> Result<&mut Self, ConfigurationError> {
        let target = OperatorTarget::parse(target.as_ref())?;
        self.register_target(key, target, handler)
    }

    /// Same as [`RegistryBuilder::register`] with an already parsed target.
    ///
    /// # Errors
    /// See [`RegistryBuilder::register`].
    pub fn register_target(
        &mut self,
        key: ModeKey,
        target: OperatorTarget,
        handler: Handler,
    ) -> Result<&mut Self, ConfigurationError> {
        let slot = match &target {
            OperatorTarget::Wildcard => &mut self.catch_all[key.index()],
            OperatorTarget::Operator(name) => {
                &mut self.entry_mut(name.clone()).handlers[key.index()]
            }
        };
        bind(slot, key, &target, handler)?;
        Ok(self)
    }

    /// Registers a backend kernel for `op`.
    ///
    /// # Errors
    /// Fails if `op` already has a kernel for `backend`, or the name is invalid.
    pub fn register_kernel<F>(
        &mut self,
        op: impl AsRef<str>,
        backend: Backend,
        kernel: F,
    ) -> Result<&mut Self, ConfigurationError>
    where
        F: Fn(&[Value]) -> Result<Value, DispatchError> + Send + Sync + 'static,
    {
        let name = OperatorName::new(op)?;
        let entry = self.entry_mut(name);
        let slot = &mut entry.kernels[backend.index()];
        if slot.is_some() {
            return Err(ConfigurationError::DuplicateKernel {
                op: entry.name.to_string(),
                backend,
            });
        }
        debug!(op = %entry.name, ?backend, "registered kernel");
        *slot = Some(Arc::new(kernel));
        Ok(self)
    }

    /// Runs `f` with a [`Library`] scoped to `key`.
    ///
    /// This is how one component declares everything it binds for its mode.
    ///
    /// # Errors
    /// Propagates the first registration error raised inside `f`.
    pub fn library<F>(&mut self, key: ModeKey, f: F) -> Result<&mut Self, ConfigurationError>
    where
        F: FnOnce(&mut Library<'_>) -> Result<(), ConfigurationError>,
    {
        f(&mut Library { builder: self, key })?;
        Ok(self)
    }

    /// Freezes the table.
    #[must_use]
    pub fn build(self) -> Registry {
        debug!(operators = self.operators.len(), "dispatch registry built");
        Registry {
            operators: self.operators,
            index: self.index,
            catch_all: self.catch_all,
        }
    }
}

/// Registrations of one component for one mode key.
pub struct Library<'a> {
    builder: &'a mut RegistryBuilder,
    key: ModeKey,
}

impl Library<'_> {
    /// The key every registration in this library targets.
    #[must_use]
    pub const fn key(&self) -> ModeKey {
        self.key
    }

    /// Binds the catch-all handler for this key.
    ///
    /// # Errors
    /// See [`RegistryBuilder::register`].
    pub fn fallback(&mut self, handler: Handler) -> Result<&mut Self, ConfigurationError> {
        self.builder
            .register_target(self.key, OperatorTarget::Wildcard, handler)?;
        Ok(self)
    }

    /// Binds a handler for one operator under this key.
    ///
    /// # Errors
    /// See [`RegistryBuilder::register`].
    pub fn op(
        &mut self,
        name: impl AsRef<str>,
        handler: Handler,
    ) -> Result<&mut Self, ConfigurationError> {
        let target = OperatorTarget::Operator(OperatorName::new(name)?);
        self.builder.register_target(self.key, target, handler)?;
        Ok(self)
    }
}

/// Immutable operator handler table.
///
/// Shared between threads behind an `Arc`; see [`Dispatcher`](crate::dispatcher::Dispatcher).
pub struct Registry {
    operators: Vec<OperatorEntry>,
    index: HashMap<OperatorName, usize>,
    catch_all: [Handler; ModeKey::COUNT],
}

impl Registry {
    pub(crate) fn entry(&self, op: &str) -> Option<&OperatorEntry> {
        self.index.get(op).map(|&idx| &self.operators[idx])
    }

    /// Resolves the handler for `key` given an already looked-up operator entry.
    pub(crate) fn resolve_in<'r>(
        &'r self,
        entry: Option<&'r OperatorEntry>,
        key: ModeKey,
    ) -> &'r Handler {
        match entry.map(|e| &e.handlers[key.index()]) {
            Some(h) if !h.is_unset() => h,
            _ => &self.catch_all[key.index()],
        }
    }

    /// Kernel for `entry` following `backend`'s fallback chain.
    pub(crate) fn kernel_in<'r>(
        &self,
        entry: Option<&'r OperatorEntry>,
        backend: Backend,
    ) -> Option<(Backend, &'r Arc<KernelFn>)> {
        let entry = entry?;
        backend
            .fallback_chain()
            .iter()
            .find_map(|b| entry.kernels[b.index()].as_ref().map(|k| (*b, k)))
    }

    /// The handler `key` applies to `op`: the operator's own binding if
    /// present, otherwise the catch-all, otherwise [`Handler::Unset`].
    #[must_use]
    pub fn handler(&self, op: &str, key: ModeKey) -> &Handler {
        self.resolve_in(self.entry(op), key)
    }

    /// The catch-all binding for `key`.
    #[must_use]
    pub fn catch_all(&self, key: ModeKey) -> &Handler {
        &self.catch_all[key.index()]
    }

    /// Whether `op` can reach a kernel when `backend` is selected.
    #[must_use]
    pub fn has_kernel(&self, op: &str, backend: Backend) -> bool {
        self.kernel_in(self.entry(op), backend).is_some()
    }

    /// Names of all operators with at least one binding, in registration order.
    pub fn operators(&self) -> impl Iterator<Item = &str> {
        self.operators.iter().map(|e| e.name.as_str())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("operators", &self.operators.len())
            .field("catch_all", &self.catch_all)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Registry {
    /// Dumps every non-empty binding, one per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in ModeKey::ALL {
            let h = &self.catch_all[key.index()];
            if !h.is_unset() {
                writeln!(f, "{WILDCARD} [{key}]: {}", h.kind())?;
            }
        }
        for entry in &self.operators {
            for key in ModeKey::ALL {
                let h = &entry.handlers[key.index()];
                if !h.is_unset() {
                    writeln!(f, "{} [{key}]: {}", entry.name, h.kind())?;
                }
            }
            for (i, kernel) in entry.kernels.iter().enumerate() {
                if kernel.is_some() {
                    let backend = u8::try_from(i)
                        .ok()
                        .and_then(|b| Backend::try_from(b).ok())
                        .unwrap_or_default();
                    writeln!(f, "{} [kernel {backend:?}]", entry.name)?;
                }
            }
        }
        Ok(())
    }
}
