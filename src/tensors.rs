//! Minimal dense tensor used as a boxed operator argument.
//!
//! The dispatcher never looks inside a tensor; this type exists so backend
//! kernels and mode handlers have something concrete to pass around.
//!
//! - Shape is a `Vec<usize>`, data is flat and row-major.
//! - The `tensor!` macro builds tensors from nested array literals.
//!
//! ## Example
//!
//! ```rust
//! use briny_dispatch::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

/// An N-dimensional tensor with a shape and flat row-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

/// The element type the reference kernels operate on.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Like [`Tensor::new`], but returns `None` on a shape/data mismatch.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Option<Self> {
        let shape = shape.into();
        (shape.iter().product::<usize>() == data.len()).then_some(Self { shape, data })
    }

    /// Number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Whether `data` holds exactly as many elements as `shape` describes.
    ///
    /// Always true for tensors built through [`Tensor::new`]; the fields are
    /// public, so a hand-assembled tensor may not be.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.data.len()
    }
}

impl<T: Clone> Tensor<T> {
    /// A rank-0 tensor holding one value.
    pub fn scalar(value: T) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_dispatch::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_builds_row_major_data() {
        let t = crate::tensor!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        assert_eq!(t.shape, vec![3, 2]);
        assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn try_new_rejects_mismatched_data() {
        assert!(Tensor::try_new(vec![2, 2], vec![1.0, 2.0, 3.0]).is_none());
        assert!(Tensor::try_new(vec![3], vec![1.0, 2.0, 3.0]).is_some());
    }

    #[test]
    #[should_panic(expected = "incompatible")]
    fn new_panics_on_mismatch() {
        let _ = Tensor::new(vec![2], vec![1.0]);
    }

    #[test]
    fn scalar_has_rank_zero() {
        let t = Tensor::scalar(4.5);
        assert_eq!(t.rank(), 0);
        assert_eq!(t.numel(), 1);
    }
}
