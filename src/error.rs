// src/error.rs

use thiserror::Error;

/// Every way fitting, sparse fitting, or projecting can fail.
#[derive(Error, Debug)]
pub enum FldaError {
    #[error("Dimension mismatch for {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid factor labels: {0}")]
    InvalidLabels(String),

    #[error("Input contains a non-finite value at row {row}, column {col}.")]
    NonFiniteInput { row: usize, col: usize },

    #[error("Cell (factor1={i}, factor2={j}, factor3={k}) has no observations; the pooled within-cell covariance is undefined.")]
    EmptyCell { i: usize, j: usize, k: usize },

    #[error("Within-cell degrees of freedom n - l1*l2 - l3 + 2 = {dof} must be positive (n = {n_samples}).")]
    InsufficientDegreesOfFreedom { n_samples: usize, dof: i64 },

    #[error("Pooled covariance is not positive definite: eigenvalue {eigenvalue:e} is at or below the whitening threshold {threshold:e}.")]
    IllConditionedCovariance { eigenvalue: f64, threshold: f64 },

    #[error("Step size {step_size} times the largest eigenvalue of the denominator matrix ({largest_eigenvalue}) must be below 1.")]
    StepSizeTooLarge {
        step_size: f64,
        largest_eigenvalue: f64,
    },

    #[error("Component count {requested} for factor {factor} must lie in 1..={n_features}.")]
    InvalidComponentCount {
        factor: usize,
        requested: usize,
        n_features: usize,
    },

    #[error("Sparsity level {k} must lie in 1..={n_features}.")]
    InvalidSparsity { k: usize, n_features: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Rayleigh quotient became {value} at iteration {iteration}; the power iteration cannot continue.")]
    DegenerateRayleighQuotient { iteration: usize, value: f64 },

    #[error("{0} called before the model was fitted.")]
    NotFitted(&'static str),

    #[error("Linear algebra backend failed: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, FldaError>;
