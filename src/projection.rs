// src/projection.rs

use crate::error::{FldaError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

fn check_features(x: &ArrayView2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(FldaError::DimensionMismatch {
            context: "features of data to project",
            expected: n_features,
            found: x.ncols(),
        });
    }
    Ok(())
}

/// `X V` for an `m x p` data matrix and `p x nc` directions.
pub fn project_dense(x: ArrayView2<f64>, directions: ArrayView2<f64>) -> Result<Array2<f64>> {
    check_features(&x, directions.nrows())?;
    Ok(x.dot(&directions))
}

/// `X v` for an `m x p` data matrix and a single `p`-vector.
pub fn project_sparse(x: ArrayView2<f64>, direction: ArrayView1<f64>) -> Result<Array1<f64>> {
    check_features(&x, direction.len())?;
    Ok(x.dot(&direction))
}
