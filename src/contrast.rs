// src/contrast.rs

use crate::error::{FldaError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Signed coefficients `b` combining A, B, C into the per-factor contrasts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights(pub [f64; 3]);

impl Default for FactorWeights {
    fn default() -> Self {
        FactorWeights([1.0, 1.0, 1.0])
    }
}

/// Per-factor contrast matrices `[T1, T2, T3]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContrastMatrices {
    pub matrices: [Array2<f64>; 3],
}

impl ContrastMatrices {
    /// `T_f = b_f S_f - sum_{g != f} b_g S_g` with `S = [A, B, C]`.
    pub fn compose(between: [&Array2<f64>; 3], weights: FactorWeights) -> Self {
        let b = weights.0;
        let matrices = std::array::from_fn(|f| {
            let mut contrast = between[f] * b[f];
            for g in (0..3).filter(|&g| g != f) {
                contrast.scaled_add(-b[g], between[g]);
            }
            contrast
        });
        Self { matrices }
    }

    pub fn factor(&self, f: usize) -> &Array2<f64> {
        &self.matrices[f]
    }

    pub fn n_features(&self) -> usize {
        self.matrices[0].nrows()
    }

    /// Checks that all three contrasts are `n_features x n_features`.
    pub fn validate(&self, n_features: usize) -> Result<()> {
        for m in &self.matrices {
            for (expected_dim, found_dim) in [(n_features, m.nrows()), (n_features, m.ncols())] {
                if expected_dim != found_dim {
                    return Err(FldaError::DimensionMismatch {
                        context: "contrast matrix",
                        expected: expected_dim,
                        found: found_dim,
                    });
                }
            }
        }
        Ok(())
    }
}
