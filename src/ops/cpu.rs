//! Parallel CPU reference kernels
//!
//! # CPU Backend
//!
//! These kernels are what a call reaches once every active mode has fallen
//! through and the configured backend resolves to [`Backend::Cpu`]. They are
//! deliberately small: enough operators to exercise routing end to end.
//!
//! ## Implemented Ops
//!
//! - `add`, `mul`: elementwise, tensor ⊕ tensor (same shape), tensor ⊕ scalar,
//!   or scalar ⊕ scalar
//! - `relu`: elementwise `max(0, x)`
//! - `matmul`: `A (m×k) · B (k×n)`
//! - `sum`: reduction of a tensor to a scalar
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Argument problems surface as [`DispatchError::Kernel`], never as panics

use rayon::prelude::*;

use crate::backend::Backend;
use crate::error::{ConfigurationError, DispatchError};
use crate::registry::RegistryBuilder;
use crate::tensors::{Ten64, Tensor};
use crate::value::Value;

/// Registers every CPU kernel in this module.
///
/// # Errors
/// Fails if any of these operators already has a CPU kernel.
pub fn register_kernels(builder: &mut RegistryBuilder) -> Result<(), ConfigurationError> {
    builder
        .register_kernel("add", Backend::Cpu, add)?
        .register_kernel("mul", Backend::Cpu, mul)?
        .register_kernel("relu", Backend::Cpu, relu)?
        .register_kernel("matmul", Backend::Cpu, matmul)?
        .register_kernel("sum", Backend::Cpu, sum)?;
    Ok(())
}

fn arity<'a>(op: &str, args: &'a [Value], n: usize) -> Result<&'a [Value], DispatchError> {
    if args.len() == n {
        Ok(args)
    } else {
        Err(DispatchError::kernel(
            op,
            format!("expected {n} argument(s), got {}", args.len()),
        ))
    }
}

/// Rejects tensors whose data length disagrees with their shape.
fn checked<'a>(op: &str, t: &'a Ten64) -> Result<&'a Ten64, DispatchError> {
    if t.is_consistent() {
        Ok(t)
    } else {
        Err(DispatchError::kernel(
            op,
            format!(
                "malformed tensor: shape {:?} needs {} elements, data has {}",
                t.shape,
                t.shape.iter().product::<usize>(),
                t.data.len()
            ),
        ))
    }
}

fn tensor_arg<'a>(op: &str, v: &'a Value) -> Result<&'a Ten64, DispatchError> {
    let t = v
        .as_tensor()
        .ok_or_else(|| DispatchError::kernel(op, format!("expected a tensor, got {}", v.kind())))?;
    checked(op, t)
}

/// Shared body of the elementwise binary kernels.
fn binary(
    op: &str,
    args: &[Value],
    f: impl Fn(f64, f64) -> f64 + Sync,
) -> Result<Value, DispatchError> {
    let args = arity(op, args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Tensor(a), Value::Tensor(b)) => {
            let (a, b) = (checked(op, a)?, checked(op, b)?);
            if a.shape != b.shape {
                return Err(DispatchError::kernel(
                    op,
                    format!("shape mismatch: {:?} vs {:?}", a.shape, b.shape),
                ));
            }
            let data = a
                .data
                .par_iter()
                .zip(&b.data)
                .map(|(&x, &y)| f(x, y))
                .collect();
            Ok(Value::Tensor(Tensor::new(a.shape.clone(), data)))
        }
        (Value::Tensor(a), s) | (s, Value::Tensor(a)) => {
            let a = checked(op, a)?;
            let y = s.as_f64().ok_or_else(|| {
                DispatchError::kernel(op, format!("cannot combine tensor with {}", s.kind()))
            })?;
            let tensor_first = matches!(args[0], Value::Tensor(_));
            let data = a
                .data
                .par_iter()
                .map(|&x| if tensor_first { f(x, y) } else { f(y, x) })
                .collect();
            Ok(Value::Tensor(Tensor::new(a.shape.clone(), data)))
        }
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Scalar(f(x, y))),
            _ => Err(DispatchError::kernel(
                op,
                format!("unsupported operands {} and {}", a.kind(), b.kind()),
            )),
        },
    }
}

/// Elementwise addition.
///
/// # Errors
/// Wrong arity, malformed or mismatched shapes, or non-numeric operands.
pub fn add(args: &[Value]) -> Result<Value, DispatchError> {
    binary("add", args, |x, y| x + y)
}

/// Elementwise multiplication.
///
/// # Errors
/// Wrong arity, malformed or mismatched shapes, or non-numeric operands.
pub fn mul(args: &[Value]) -> Result<Value, DispatchError> {
    binary("mul", args, |x, y| x * y)
}

/// Applies `max(0, x)` element-wise.
///
/// # Errors
/// Wrong arity or a non-numeric operand.
pub fn relu(args: &[Value]) -> Result<Value, DispatchError> {
    let args = arity("relu", args, 1)?;
    match &args[0] {
        Value::Tensor(t) => {
            let t = checked("relu", t)?;
            let mut data = vec![0.0f64; t.data.len()];
            data.par_iter_mut()
                .zip(t.data.par_iter())
                .for_each(|(y, &x)| {
                    *y = if x > 0.0 { x } else { 0.0 };
                });
            Ok(Value::Tensor(Tensor::new(t.shape.clone(), data)))
        }
        other => other
            .as_f64()
            .map(|x| Value::Scalar(x.max(0.0)))
            .ok_or_else(|| {
                DispatchError::kernel("relu", format!("unsupported operand {}", other.kind()))
            }),
    }
}

/// Performs a matrix multiplication `C = A × B` on two 2D tensors (`A: m×k`, `B: k×n`).
///
/// Rows of the output are computed in parallel.
///
/// # Errors
/// Malformed or non-2D operands, or mismatched inner dimensions.
pub fn matmul(args: &[Value]) -> Result<Value, DispatchError> {
    let args = arity("matmul", args, 2)?;
    let a = tensor_arg("matmul", &args[0])?;
    let b = tensor_arg("matmul", &args[1])?;
    if a.rank() != 2 || b.rank() != 2 {
        return Err(DispatchError::kernel(
            "matmul",
            format!("expected 2D operands, got {:?} and {:?}", a.shape, b.shape),
        ));
    }
    let (m, k, n) = (a.shape[0], a.shape[1], b.shape[1]);
    if k != b.shape[0] {
        return Err(DispatchError::kernel(
            "matmul",
            format!("inner dimensions differ: {:?} · {:?}", a.shape, b.shape),
        ));
    }

    let a_data = &a.data;
    let b_data = &b.data;
    let mut out_data = vec![0.0; m * n];
    if n > 0 {
        out_data
            .par_chunks_mut(n)
            .enumerate()
            .for_each(|(i, row)| {
                for (j, out) in row.iter_mut().enumerate() {
                    let mut acc = 0.0;
                    for l in 0..k {
                        acc += a_data[i * k + l] * b_data[l * n + j];
                    }
                    *out = acc;
                }
            });
    }

    Ok(Value::Tensor(Tensor::new(vec![m, n], out_data)))
}

/// Sums every element of a tensor into a scalar.
///
/// # Errors
/// Wrong arity or a non-tensor operand.
pub fn sum(args: &[Value]) -> Result<Value, DispatchError> {
    let args = arity("sum", args, 1)?;
    let t = tensor_arg("sum", &args[0])?;
    Ok(Value::Scalar(t.data.par_iter().sum()))
}
