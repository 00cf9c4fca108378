// src/linalg_backends.rs

use crate::error::{FldaError, Result};
use ndarray::{Array1, Array2, Axis};
use std::marker::PhantomData;

/// Output of a symmetric eigendecomposition.
#[derive(Debug, Clone)]
pub struct EighOutput<F: 'static> {
    /// Eigenvalues, ascending as returned by the backend unless re-sorted.
    pub eigenvalues: Array1<F>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<F>,
}

impl EighOutput<f64> {
    /// Reorders the eigenpairs so the largest eigenvalue comes first.
    ///
    /// Backends disagree on the order they return eigenvalues in, so callers
    /// that select "the top k" go through this instead of slicing off the end.
    pub fn into_descending(self) -> Self {
        let mut order: Vec<usize> = (0..self.eigenvalues.len()).collect();
        order.sort_by(|&a, &b| {
            self.eigenvalues[b]
                .partial_cmp(&self.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self {
            eigenvalues: self.eigenvalues.select(Axis(0), &order),
            eigenvectors: self.eigenvectors.select(Axis(1), &order),
        }
    }

    /// Largest eigenvalue, or `None` for an empty decomposition.
    pub fn largest_eigenvalue(&self) -> Option<f64> {
        self.eigenvalues.iter().cloned().reduce(f64::max)
    }
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVR or DSYEVD).
/// Only the upper triangle of `matrix` is read.
pub trait BackendEigh<F: 'static + Copy + Send + Sync> {
    fn eigh_upper(&self, matrix: &Array2<F>) -> Result<EighOutput<F>>;
}

// --- ndarray-linalg (LAPACK) backend ---
use ndarray_linalg::{Eigh as NdLinalgEigh, UPLO};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

impl BackendEigh<f64> for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>> {
        if matrix.nrows() != matrix.ncols() {
            return Err(FldaError::Backend(format!(
                "eigendecomposition needs a square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let (eigenvalues, eigenvectors) = matrix
            .eigh(UPLO::Upper)
            .map_err(|e| FldaError::Backend(e.to_string()))?;
        Ok(EighOutput {
            eigenvalues,
            eigenvectors,
        })
    }
}

// --- faer backend ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{BackendEigh, EighOutput};
    use crate::error::{FldaError, Result};
    use ndarray::{Array1, Array2};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    impl BackendEigh<f64> for FaerLinAlgBackend {
        fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>> {
            let (nrows, ncols) = matrix.dim();
            if nrows != ncols {
                return Err(FldaError::Backend(format!(
                    "eigendecomposition needs a square matrix, got {}x{}",
                    nrows, ncols
                )));
            }
            if matrix.is_empty() {
                return Ok(EighOutput {
                    eigenvalues: Array1::zeros(0),
                    eigenvectors: Array2::zeros((0, 0)),
                });
            }
            // An owned copy sidesteps layout checks on strided or transposed views.
            let faer_mat = faer::Mat::<f64>::from_fn(nrows, ncols, |i, j| matrix[[i, j]]);
            let evd = faer_mat
                .as_ref()
                .self_adjoint_eigen(faer::Side::Upper)
                .map_err(|e| FldaError::Backend(format!("faer eigendecomposition failed: {:?}", e)))?;
            let s = evd.S().column_vector();
            let u = evd.U();
            Ok(EighOutput {
                eigenvalues: Array1::from_shape_fn(nrows, |i| s[i]),
                eigenvectors: Array2::from_shape_fn((nrows, ncols), |(i, j)| u[(i, j)]),
            })
        }
    }
}

/// Dispatches to the backend selected by compile-time feature flags.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

impl BackendEigh<f64> for LinAlgBackendProvider<f64> {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput<f64>> {
        #[cfg(feature = "backend_faer")]
        {
            faer_specific_code::FaerLinAlgBackend.eigh_upper(matrix)
        }
        #[cfg(not(feature = "backend_faer"))]
        {
            NdarrayLinAlgBackend.eigh_upper(matrix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn descending_order_keeps_pairs_together() {
        let m = array![[2.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, -1.0]];
        let eig = LinAlgBackendProvider::<f64>::new()
            .eigh_upper(&m)
            .unwrap()
            .into_descending();
        assert_abs_diff_eq!(eig.eigenvalues[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.eigenvalues[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.eigenvalues[2], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.eigenvectors[[1, 0]].abs(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.eigenvectors[[2, 2]].abs(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(eig.largest_eigenvalue().unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_non_square_input() {
        let m = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            NdarrayLinAlgBackend.eigh_upper(&m),
            Err(FldaError::Backend(_))
        ));
    }
}
