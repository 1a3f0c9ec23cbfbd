//! Backend selection module.
//!
//! Backend kernels are the last stop of a dispatch: once every active mode has
//! fallen through, the call runs the operator's kernel for the configured
//! backend.
//!
//! # Supported Backends
//!
//! - `Cpu` — Pure Rust kernels (default, always the last resort).
//! - `Wgpu` — GPU kernels, when a component registers them.
//! - `Cuda` — Reserved; resolves like `Wgpu`.
//!
//! The process-wide default is stored in an `AtomicU8`. Each
//! [`Dispatcher`](crate::dispatcher::Dispatcher) captures the default when its
//! [`DispatchConfig`](crate::dispatcher::DispatchConfig) is created, so
//! switching the default never changes the routing of a dispatcher that is
//! already in use.
//!
//! # Fallback
//!
//! When the selected backend has no kernel for an operator, the `Cpu` kernel
//! is used instead. Only when neither exists is the call reported as
//! exhausted.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of kernel backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Backend {
    /// Pure CPU kernels (default).
    #[default]
    Cpu = 0,
    /// GPU kernels through `wgpu`.
    Wgpu,
    /// CUDA kernels.
    Cuda,
}

impl Backend {
    /// Number of backends.
    pub const COUNT: usize = 3;

    /// Dense index of this backend, in `0..COUNT`.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Backends to try, in order, when `self` is selected.
    #[must_use]
    pub const fn fallback_chain(self) -> &'static [Self] {
        match self {
            Self::Cpu => &[Self::Cpu],
            Self::Wgpu => &[Self::Wgpu, Self::Cpu],
            Self::Cuda => &[Self::Cuda, Self::Cpu],
        }
    }
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            2 => Ok(Self::Cuda),
            _ => Err(()),
        }
    }
}

/// Process-wide default backend.
///
/// Stored with release and read with acquire ordering, so a thread that sees
/// a new default also sees whatever the setter wrote before switching.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the default backend picked up by new dispatch configurations.
///
/// # Example
///
/// ```
/// use briny_dispatch::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Cpu);
/// assert_eq!(get_backend(), Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
#[must_use]
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}
