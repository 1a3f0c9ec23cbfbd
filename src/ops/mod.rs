//! # Backend Kernels
//!
//! Kernels are the terminal stage of dispatch: they run once every active
//! mode has fallen through. They are registered per operator and per
//! [`Backend`](crate::backend::Backend) on the
//! [`RegistryBuilder`](crate::registry::RegistryBuilder).
//!
//! ## Submodules
//!
//! - [`cpu`] — rayon-parallel reference kernels (the last-resort backend)
//!
//! ## Adding a kernel
//!
//! 1. Write a `fn(&[Value]) -> Result<Value, DispatchError>`
//! 2. Register it with `register_kernel(op, backend, kernel)` at startup
//! 3. Report bad arguments with `DispatchError::Kernel`, do not panic

pub mod cpu;
