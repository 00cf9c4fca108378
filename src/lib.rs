// Three-way factorial discriminant analysis

#![doc = include_str!("../README.md")]

pub mod contrast;
pub mod dense;
pub mod design;
pub mod error;
pub mod linalg_backends;
pub mod model;
pub mod projection;
pub mod rifle;
pub mod scatter;

pub use contrast::{ContrastMatrices, FactorWeights};
pub use dense::{DenseFactorSolution, DenseGeneralizedEigensolver, Whitening};
pub use design::{CellStatistics, FactorLevels, FactorMeans, GroupStatistics};
pub use error::{FldaError, Result};
pub use model::{fit, sparse_fit, DenseFit, FactorialLda, FactorialLdaConfig, SparseFit, SparseFitOptions};
pub use projection::{project_dense, project_sparse};
pub use rifle::{rifle, RifleConfig, SparseEigenvector, TruncatedPowerIteration};
pub use scatter::ScatterMatrices;
