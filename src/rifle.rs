// src/rifle.rs

//! Truncated power iteration for a sparse leading generalized eigenvector.
//!
//! Given symmetric `A` and `B`, each step moves `x` along
//! `C = I + (eta / rho) (A - rho B)`, where `rho` is the current Rayleigh
//! quotient, then hard-thresholds the result to its `k` largest-magnitude
//! entries. The step is only contractive when `eta * lambda_max(B) < 1`, which
//! is checked once when the solver is built.

use crate::error::{FldaError, Result};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};
use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Iteration parameters for the truncated power method.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RifleConfig {
    /// Step size `eta`.
    pub step_size: f64,
    /// Iteration stops once consecutive iterates are closer than this (Euclidean).
    pub convergence_tolerance: f64,
    pub max_iterations: usize,
}

impl Default for RifleConfig {
    fn default() -> Self {
        RifleConfig {
            step_size: 0.01,
            convergence_tolerance: 1e-3,
            max_iterations: 5000,
        }
    }
}

impl RifleConfig {
    fn validate(&self) -> Result<()> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(FldaError::InvalidParameter(format!(
                "step size must be finite and positive, got {}",
                self.step_size
            )));
        }
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance >= 0.0) {
            return Err(FldaError::InvalidParameter(format!(
                "convergence tolerance must be finite and non-negative, got {}",
                self.convergence_tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(FldaError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A unit-norm sparse approximate eigenvector and how the iteration ended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SparseEigenvector {
    pub vector: Array1<f64>,
    pub iterations: usize,
    /// `false` when the iteration budget ran out first; `vector` is then the last iterate.
    pub converged: bool,
    /// `x^T A x / x^T B x` at the returned vector.
    pub rayleigh_quotient: f64,
}

impl SparseEigenvector {
    /// Indices of the nonzero entries.
    pub fn support(&self) -> Vec<usize> {
        self.vector
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Truncated power iteration against a fixed denominator matrix `B`.
///
/// `B` is shared read-only, so one solver can serve several numerators
/// concurrently.
#[derive(Debug)]
pub struct TruncatedPowerIteration<'a> {
    denominator: &'a Array2<f64>,
    largest_eigenvalue: f64,
    config: RifleConfig,
}

impl<'a> TruncatedPowerIteration<'a> {
    /// Fails with `StepSizeTooLarge` unless `step_size * lambda_max(B) < 1`.
    pub fn new(denominator: &'a Array2<f64>, config: RifleConfig) -> Result<Self> {
        config.validate()?;
        if denominator.nrows() != denominator.ncols() {
            return Err(FldaError::DimensionMismatch {
                context: "denominator matrix columns",
                expected: denominator.nrows(),
                found: denominator.ncols(),
            });
        }
        let largest_eigenvalue = LinAlgBackendProvider::<f64>::new()
            .eigh_upper(denominator)?
            .largest_eigenvalue()
            .unwrap_or(0.0);
        info!(
            "Truncated power iteration: largest eigenvalue of B = {:.6e}, step size = {}.",
            largest_eigenvalue, config.step_size
        );
        if !(config.step_size * largest_eigenvalue < 1.0) {
            return Err(FldaError::StepSizeTooLarge {
                step_size: config.step_size,
                largest_eigenvalue,
            });
        }
        Ok(Self {
            denominator,
            largest_eigenvalue,
            config,
        })
    }

    pub fn largest_eigenvalue(&self) -> f64 {
        self.largest_eigenvalue
    }

    pub fn config(&self) -> &RifleConfig {
        &self.config
    }

    /// Runs the iteration for numerator `a` from `init`, keeping `k` entries.
    pub fn solve(&self, a: &Array2<f64>, init: ArrayView1<f64>, k: usize) -> Result<SparseEigenvector> {
        let b = self.denominator;
        let p = b.nrows();
        if a.dim() != (p, p) {
            return Err(FldaError::DimensionMismatch {
                context: "numerator matrix rows",
                expected: p,
                found: a.nrows(),
            });
        }
        if init.len() != p {
            return Err(FldaError::DimensionMismatch {
                context: "initial vector length",
                expected: p,
                found: init.len(),
            });
        }
        if k == 0 || k > p {
            return Err(FldaError::InvalidSparsity { k, n_features: p });
        }

        let mut x = init.to_owned();
        if !normalize(&mut x) {
            return Err(FldaError::InvalidParameter(
                "initial vector must be finite with nonzero norm".to_string(),
            ));
        }

        let eta = self.config.step_size;
        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.config.max_iterations {
            let ax = a.dot(&x);
            let bx = b.dot(&x);
            let rho = rayleigh_quotient(&x, &ax, &bx);
            if !rho.is_finite() || rho == 0.0 {
                return Err(FldaError::DegenerateRayleighQuotient {
                    iteration: iterations,
                    value: rho,
                });
            }

            // C x without forming C.
            let mut next = &ax - &(&bx * rho);
            next *= eta / rho;
            next += &x;
            if !normalize(&mut next) {
                return Err(FldaError::DegenerateRayleighQuotient {
                    iteration: iterations,
                    value: rho,
                });
            }
            hard_threshold(&mut next, k);
            normalize(&mut next);

            let criterion = (&x - &next).mapv(|v| v * v).sum().sqrt();
            x = next;
            iterations += 1;
            trace!("rifle iteration {}: rho = {:.6e}, step = {:.3e}", iterations, rho, criterion);
            if criterion < self.config.convergence_tolerance {
                converged = true;
                break;
            }
        }

        let rayleigh = rayleigh_quotient(&x, &a.dot(&x), &b.dot(&x));
        if converged {
            debug!(
                "rifle converged after {} iterations (k = {}, rho = {:.6e}).",
                iterations, k, rayleigh
            );
        } else {
            warn!(
                "rifle did not converge within {} iterations (k = {}); returning the last iterate.",
                self.config.max_iterations, k
            );
        }
        Ok(SparseEigenvector {
            vector: x,
            iterations,
            converged,
            rayleigh_quotient: rayleigh,
        })
    }
}

/// One-shot convenience wrapper: builds the solver for `b` and runs it once.
pub fn rifle(
    a: &Array2<f64>,
    b: &Array2<f64>,
    init: ArrayView1<f64>,
    k: usize,
    config: RifleConfig,
) -> Result<SparseEigenvector> {
    TruncatedPowerIteration::new(b, config)?.solve(a, init, k)
}

fn rayleigh_quotient(x: &Array1<f64>, ax: &Array1<f64>, bx: &Array1<f64>) -> f64 {
    x.dot(ax) / x.dot(bx)
}

/// Scales `x` to unit Euclidean norm. Returns `false`, leaving `x` untouched,
/// when the norm is zero or not finite.
fn normalize(x: &mut Array1<f64>) -> bool {
    let norm = x.dot(x).sqrt();
    if norm > 0.0 && norm.is_finite() {
        *x /= norm;
        true
    } else {
        false
    }
}

/// Zeroes every entry whose magnitude is strictly below the `k`-th largest
/// magnitude. Entries tied with that threshold all survive, so more than `k`
/// entries can remain.
pub fn hard_threshold(x: &mut Array1<f64>, k: usize) {
    if k == 0 || k >= x.len() {
        return;
    }
    let mut magnitudes: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    magnitudes.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = magnitudes[k - 1];
    x.mapv_inplace(|v| if v.abs() < threshold { 0.0 } else { v });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn hard_threshold_keeps_k_largest_magnitudes() {
        let mut x = array![0.1, -0.9, 0.3, 0.5, -0.2];
        hard_threshold(&mut x, 2);
        assert_eq!(x, array![0.0, -0.9, 0.0, 0.5, 0.0]);
    }

    #[test]
    fn hard_threshold_retains_ties_at_the_cutoff() {
        let mut x = array![0.5, -0.5, 0.5, 0.1];
        hard_threshold(&mut x, 2);
        assert_eq!(x, array![0.5, -0.5, 0.5, 0.0]);
    }

    #[test]
    fn step_size_precondition_fails_before_iterating() {
        let b = array![[4.0, 0.0], [0.0, 1.0]];
        let config = RifleConfig {
            step_size: 0.25,
            ..RifleConfig::default()
        };
        match TruncatedPowerIteration::new(&b, config) {
            Err(FldaError::StepSizeTooLarge {
                step_size,
                largest_eigenvalue,
            }) => {
                assert_abs_diff_eq!(step_size, 0.25);
                assert_abs_diff_eq!(largest_eigenvalue, 4.0, epsilon = 1e-12);
            }
            other => panic!("expected StepSizeTooLarge, got {:?}", other),
        }
        let ok = RifleConfig {
            step_size: 0.24,
            ..RifleConfig::default()
        };
        assert!(TruncatedPowerIteration::new(&b, ok).is_ok());
    }

    #[test]
    fn full_support_with_identity_denominator_finds_ordinary_eigenvector() {
        let a = array![
            [4.0, 1.0, 0.0, 0.0],
            [1.0, 3.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 0.5]
        ];
        let b = Array2::<f64>::eye(4);
        let config = RifleConfig {
            step_size: 0.5,
            convergence_tolerance: 1e-12,
            max_iterations: 10_000,
        };
        let init = array![1.0, 1.0, 1.0, 1.0];
        let result = rifle(&a, &b, init.view(), 4, config).unwrap();
        assert!(result.converged);

        let eig = LinAlgBackendProvider::<f64>::new()
            .eigh_upper(&a)
            .unwrap()
            .into_descending();
        let leading = eig.eigenvectors.column(0);
        assert_abs_diff_eq!(result.vector.dot(&leading).abs(), 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(result.rayleigh_quotient, eig.eigenvalues[0], epsilon = 1e-8);
    }

    #[test]
    fn sparse_result_is_unit_norm_with_k_entries() {
        let a = array![
            [5.0, 0.5, 0.2, 0.1],
            [0.5, 1.0, 0.0, 0.0],
            [0.2, 0.0, 0.8, 0.0],
            [0.1, 0.0, 0.0, 0.6]
        ];
        let b = array![
            [1.0, 0.1, 0.0, 0.0],
            [0.1, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0]
        ];
        let init = array![0.7, 0.5, 0.3, 0.2];
        let result = rifle(&a, &b, init.view(), 2, RifleConfig::default()).unwrap();
        assert_abs_diff_eq!(result.vector.dot(&result.vector), 1.0, epsilon = 1e-12);
        assert!(result.support().len() <= 2);
        assert!(result.support().contains(&0));
    }

    #[test]
    fn non_convergence_is_flagged_not_fatal() {
        let a = array![[2.0, 0.0], [0.0, 1.0]];
        let b = Array2::<f64>::eye(2);
        let config = RifleConfig {
            step_size: 0.01,
            convergence_tolerance: 0.0,
            max_iterations: 3,
        };
        let result = rifle(&a, &b, array![1.0, 1.0].view(), 2, config).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
        assert_abs_diff_eq!(result.vector.dot(&result.vector), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let a = Array2::<f64>::eye(3);
        let b = Array2::<f64>::eye(3);
        let solver = TruncatedPowerIteration::new(&b, RifleConfig::default()).unwrap();
        assert!(matches!(
            solver.solve(&a, array![1.0, 0.0, 0.0].view(), 0),
            Err(FldaError::InvalidSparsity { k: 0, n_features: 3 })
        ));
        assert!(matches!(
            solver.solve(&a, array![1.0, 0.0].view(), 1),
            Err(FldaError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            solver.solve(&a, array![0.0, 0.0, 0.0].view(), 1),
            Err(FldaError::InvalidParameter(_))
        ));
    }

    #[test]
    fn zero_rayleigh_quotient_is_reported() {
        let a = array![[1.0, 0.0], [0.0, -1.0]];
        let b = Array2::<f64>::eye(2);
        assert!(matches!(
            rifle(&a, &b, array![1.0, 1.0].view(), 2, RifleConfig::default()),
            Err(FldaError::DegenerateRayleighQuotient { iteration: 0, .. })
        ));
    }
}
