// src/dense.rs

//! Whitened solver for the dense generalized eigenproblem
//! `max x^T T x  s.t.  x^T D x = 1`.

use crate::error::{FldaError, Result};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};
use log::{debug, info};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

/// Default relative threshold below which an eigenvalue of D counts as zero.
pub const DEFAULT_WHITENING_TOLERANCE: f64 = 1e-10;

/// The map `Z = U diag(1 / sqrt(S))` from the eigendecomposition `D = U S U^T`,
/// so that `Z^T D Z = I`.
#[derive(Clone, Debug)]
pub struct Whitening {
    pub map: Array2<f64>,
    /// Eigenvalues of D in ascending order.
    pub covariance_eigenvalues: Array1<f64>,
}

impl Whitening {
    /// Fails when D has an eigenvalue at or below `tolerance * s_max`, or no
    /// positive eigenvalue at all; `1 / sqrt(s)` would be infinite or NaN.
    pub fn from_covariance(pooled_covariance: &Array2<f64>, tolerance: f64) -> Result<Self> {
        if pooled_covariance.nrows() != pooled_covariance.ncols() {
            return Err(FldaError::DimensionMismatch {
                context: "pooled covariance columns",
                expected: pooled_covariance.nrows(),
                found: pooled_covariance.ncols(),
            });
        }
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(FldaError::InvalidParameter(format!(
                "whitening tolerance must be finite and non-negative, got {}",
                tolerance
            )));
        }
        let backend = LinAlgBackendProvider::<f64>::new();
        let eig = backend.eigh_upper(pooled_covariance)?;

        let largest = eig.largest_eigenvalue().unwrap_or(0.0);
        let threshold = tolerance * largest.max(0.0);
        if let Some(&smallest) = eig
            .eigenvalues
            .iter()
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        {
            if !(smallest > threshold) || !(largest > 0.0) {
                return Err(FldaError::IllConditionedCovariance {
                    eigenvalue: smallest,
                    threshold,
                });
            }
        }
        debug!(
            "Whitening pooled covariance: eigenvalues in [{:.4e}, {:.4e}].",
            eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min),
            largest
        );

        let inv_sqrt = eig.eigenvalues.mapv(|s| 1.0 / s.sqrt());
        let map = &eig.eigenvectors * &inv_sqrt;
        Ok(Self {
            map,
            covariance_eigenvalues: eig.eigenvalues,
        })
    }

    pub fn n_features(&self) -> usize {
        self.map.nrows()
    }
}

/// Leading discriminant directions for one factor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenseFactorSolution {
    /// `p x nc` directions in the original coordinates, most significant first.
    /// Each column has unit D-norm.
    pub eigenvectors: Array2<f64>,
    /// Matching eigenvalues, largest first.
    pub eigenvalues: Array1<f64>,
}

impl DenseFactorSolution {
    /// Most significant direction, the default start for the sparse solver.
    pub fn leading_eigenvector(&self) -> Array1<f64> {
        self.eigenvectors.column(0).to_owned()
    }
}

/// Extracts top eigenvectors of whitened contrasts. The whitening is computed
/// once and shared across factors.
#[derive(Clone, Debug)]
pub struct DenseGeneralizedEigensolver {
    whitening: Whitening,
}

impl DenseGeneralizedEigensolver {
    pub fn new(pooled_covariance: &Array2<f64>, tolerance: f64) -> Result<Self> {
        Ok(Self {
            whitening: Whitening::from_covariance(pooled_covariance, tolerance)?,
        })
    }

    pub fn whitening(&self) -> &Whitening {
        &self.whitening
    }

    /// Eigenvectors of `Z^T T Z` for the `n_components` largest eigenvalues,
    /// mapped back through `Z`.
    pub fn solve(&self, contrast: &Array2<f64>, n_components: usize) -> Result<DenseFactorSolution> {
        let p = self.whitening.n_features();
        if contrast.dim() != (p, p) {
            return Err(FldaError::DimensionMismatch {
                context: "contrast matrix rows",
                expected: p,
                found: contrast.nrows(),
            });
        }
        if n_components == 0 || n_components > p {
            return Err(FldaError::InvalidComponentCount {
                factor: 0,
                requested: n_components,
                n_features: p,
            });
        }

        let z = &self.whitening.map;
        let whitened = z.t().dot(contrast).dot(z);
        let eig = LinAlgBackendProvider::<f64>::new()
            .eigh_upper(&whitened)?
            .into_descending();

        let top = eig.eigenvectors.slice(s![.., ..n_components]);
        let eigenvectors = z.dot(&top);
        let eigenvalues = eig.eigenvalues.slice(s![..n_components]).to_owned();
        Ok(DenseFactorSolution {
            eigenvectors,
            eigenvalues,
        })
    }

    /// Solves all three factors, tagging component-count errors with the factor.
    pub fn solve_all(
        &self,
        contrasts: &[Array2<f64>; 3],
        component_counts: [usize; 3],
    ) -> Result<[DenseFactorSolution; 3]> {
        let p = self.whitening.n_features();
        for (f, &nc) in component_counts.iter().enumerate() {
            if nc == 0 || nc > p {
                return Err(FldaError::InvalidComponentCount {
                    factor: f + 1,
                    requested: nc,
                    n_features: p,
                });
            }
        }
        let first = self.solve(&contrasts[0], component_counts[0])?;
        let second = self.solve(&contrasts[1], component_counts[1])?;
        let third = self.solve(&contrasts[2], component_counts[2])?;
        info!(
            "Dense discriminant directions: leading eigenvalues {:.4e}, {:.4e}, {:.4e}.",
            first.eigenvalues[0], second.eigenvalues[0], third.eigenvalues[0]
        );
        Ok([first, second, third])
    }
}
