// src/model.rs

use crate::contrast::{ContrastMatrices, FactorWeights};
use crate::dense::{DenseFactorSolution, DenseGeneralizedEigensolver, DEFAULT_WHITENING_TOLERANCE};
use crate::design::{validate_observations, GroupStatistics};
use crate::error::{FldaError, Result};
use crate::projection::{project_dense, project_sparse};
use crate::rifle::{RifleConfig, SparseEigenvector, TruncatedPowerIteration};
use crate::scatter::ScatterMatrices;
use log::info;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Settings shared by dense and sparse fitting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactorialLdaConfig {
    /// Number of dense discriminant directions `nc_f` kept per factor.
    pub component_counts: [usize; 3],
    /// Weights `b` used to build the contrast matrices.
    pub weights: FactorWeights,
    /// Relative eigenvalue floor for whitening by the pooled covariance.
    pub whitening_tolerance: f64,
}

impl Default for FactorialLdaConfig {
    fn default() -> Self {
        FactorialLdaConfig {
            component_counts: [1, 1, 1],
            weights: FactorWeights::default(),
            whitening_tolerance: DEFAULT_WHITENING_TOLERANCE,
        }
    }
}

impl FactorialLdaConfig {
    fn validate(&self) -> Result<()> {
        if let Some(w) = self.weights.0.iter().find(|w| !w.is_finite()) {
            return Err(FldaError::InvalidParameter(format!(
                "factor weights must be finite, got {}",
                w
            )));
        }
        Ok(())
    }
}

/// Scatter matrices and contrasts for one data set, before any eigensolve.
fn build_contrasts(
    x: ArrayView2<f64>,
    labels: ArrayView2<usize>,
    weights: FactorWeights,
) -> Result<(ScatterMatrices, ContrastMatrices)> {
    let stats = GroupStatistics::compute(x, labels)?;
    let scatter = ScatterMatrices::compute(x, labels, &stats)?;
    let contrasts = ContrastMatrices::compose(scatter.between(), weights);
    Ok((scatter, contrasts))
}

/// Result of a dense fit: the matrices it was built from and the
/// discriminant directions for each factor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenseFit {
    pub config: FactorialLdaConfig,
    pub scatter: ScatterMatrices,
    pub contrasts: ContrastMatrices,
    pub solutions: [DenseFactorSolution; 3],
}

/// Fits the dense three-way discriminant directions.
///
/// * `x` - observations, shape `(n, p)`.
/// * `labels` - factor levels, shape `(n, 3)`, each column 0-based and contiguous.
///
/// # Errors
/// Empty cells, a pooled covariance that cannot be whitened, component counts
/// outside `1..=p`, and malformed inputs are all reported rather than turned
/// into NaN.
pub fn fit(x: ArrayView2<f64>, labels: ArrayView2<usize>, config: &FactorialLdaConfig) -> Result<DenseFit> {
    config.validate()?;
    info!(
        "Fitting three-way discriminant model: {} observations, {} features, components {:?}.",
        x.nrows(),
        x.ncols(),
        config.component_counts
    );
    let (scatter, contrasts) = build_contrasts(x, labels, config.weights)?;
    let solver = DenseGeneralizedEigensolver::new(&scatter.pooled_covariance, config.whitening_tolerance)?;
    let solutions = solver.solve_all(&contrasts.matrices, config.component_counts)?;
    Ok(DenseFit {
        config: config.clone(),
        scatter,
        contrasts,
        solutions,
    })
}

impl DenseFit {
    pub fn n_features(&self) -> usize {
        self.scatter.n_features()
    }

    /// Per-factor `p x nc_f` directions, most significant column first.
    pub fn eigenvectors(&self) -> [&Array2<f64>; 3] {
        [
            &self.solutions[0].eigenvectors,
            &self.solutions[1].eigenvectors,
            &self.solutions[2].eigenvectors,
        ]
    }

    /// Per-factor eigenvalues, largest first.
    pub fn eigenvalues(&self) -> [&Array1<f64>; 3] {
        [
            &self.solutions[0].eigenvalues,
            &self.solutions[1].eigenvalues,
            &self.solutions[2].eigenvalues,
        ]
    }

    pub fn pooled_covariance(&self) -> &Array2<f64> {
        &self.scatter.pooled_covariance
    }

    /// Leading dense direction per factor; the sparse solver's default start.
    pub fn initial_vectors(&self) -> [Array1<f64>; 3] {
        std::array::from_fn(|f| self.solutions[f].leading_eigenvector())
    }

    /// Projects `x` (`m x p`) onto each factor's directions.
    pub fn transform(&self, x: ArrayView2<f64>) -> Result<[Array2<f64>; 3]> {
        Ok([
            project_dense(x, self.solutions[0].eigenvectors.view())?,
            project_dense(x, self.solutions[1].eigenvectors.view())?,
            project_dense(x, self.solutions[2].eigenvectors.view())?,
        ])
    }

    /// Sparse fit reusing this fit's contrasts, pooled covariance and leading
    /// directions.
    pub fn sparse_fit(&self, sparsity: [usize; 3], rifle: RifleConfig) -> Result<SparseFit> {
        run_sparse(
            &self.contrasts,
            &self.scatter.pooled_covariance,
            &self.initial_vectors(),
            sparsity,
            rifle,
        )
    }
}

/// Optional inputs to [`sparse_fit`]. Supplying both the contrasts and the
/// pooled covariance skips recomputing them from the data.
#[derive(Clone, Debug, Default)]
pub struct SparseFitOptions {
    pub contrast_matrices: Option<ContrastMatrices>,
    pub pooled_covariance: Option<Array2<f64>>,
    /// Starting vectors per factor. Defaults to the leading dense directions.
    pub initial_vectors: Option<[Array1<f64>; 3]>,
    pub rifle: RifleConfig,
}

/// One sparse, unit-norm generalized eigenvector per factor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SparseFit {
    pub components: [SparseEigenvector; 3],
    pub sparsity: [usize; 3],
    pub rifle: RifleConfig,
}

impl SparseFit {
    pub fn vectors(&self) -> [&Array1<f64>; 3] {
        [
            &self.components[0].vector,
            &self.components[1].vector,
            &self.components[2].vector,
        ]
    }

    pub fn all_converged(&self) -> bool {
        self.components.iter().all(|c| c.converged)
    }

    /// Projects `x` (`m x p`) onto each factor's sparse direction.
    pub fn transform(&self, x: ArrayView2<f64>) -> Result<[Array1<f64>; 3]> {
        Ok([
            project_sparse(x, self.components[0].vector.view())?,
            project_sparse(x, self.components[1].vector.view())?,
            project_sparse(x, self.components[2].vector.view())?,
        ])
    }
}

/// Fits one sparse generalized eigenvector per factor with truncated power
/// iteration.
///
/// When `options` carries both contrast matrices and a pooled covariance they
/// are used as-is and `x` only fixes the feature count; otherwise both are
/// rebuilt from `x`, `labels` and `config.weights`.
///
/// # Errors
/// `StepSizeTooLarge` if `step_size * lambda_max(D) >= 1`, checked before any
/// iteration runs; `InvalidSparsity` for a level outside `1..=p`.
pub fn sparse_fit(
    x: ArrayView2<f64>,
    labels: ArrayView2<usize>,
    config: &FactorialLdaConfig,
    sparsity: [usize; 3],
    options: &SparseFitOptions,
) -> Result<SparseFit> {
    config.validate()?;
    let (contrasts, pooled_covariance) = match (&options.contrast_matrices, &options.pooled_covariance) {
        (Some(contrasts), Some(pooled_covariance)) => {
            let p = pooled_covariance.nrows();
            if pooled_covariance.ncols() != p {
                return Err(FldaError::DimensionMismatch {
                    context: "pooled covariance columns",
                    expected: p,
                    found: pooled_covariance.ncols(),
                });
            }
            contrasts.validate(p)?;
            validate_observations(x, labels)?;
            if x.ncols() != p {
                return Err(FldaError::DimensionMismatch {
                    context: "observation features vs supplied matrices",
                    expected: p,
                    found: x.ncols(),
                });
            }
            info!("Sparse fit reusing supplied contrast and pooled covariance matrices ({}x{}).", p, p);
            (contrasts.clone(), pooled_covariance.clone())
        }
        _ => {
            let (scatter, contrasts) = build_contrasts(x, labels, config.weights)?;
            (contrasts, scatter.pooled_covariance)
        }
    };

    let initial_vectors = match &options.initial_vectors {
        Some(vectors) => vectors.clone(),
        None => {
            let solver = DenseGeneralizedEigensolver::new(&pooled_covariance, config.whitening_tolerance)?;
            let [first, second, third] = solver.solve_all(&contrasts.matrices, [1, 1, 1])?;
            [
                first.leading_eigenvector(),
                second.leading_eigenvector(),
                third.leading_eigenvector(),
            ]
        }
    };

    run_sparse(&contrasts, &pooled_covariance, &initial_vectors, sparsity, options.rifle)
}

fn run_sparse(
    contrasts: &ContrastMatrices,
    pooled_covariance: &Array2<f64>,
    initial_vectors: &[Array1<f64>; 3],
    sparsity: [usize; 3],
    rifle: RifleConfig,
) -> Result<SparseFit> {
    let p = pooled_covariance.nrows();
    if let Some(&k) = sparsity.iter().find(|&&k| k == 0 || k > p) {
        return Err(FldaError::InvalidSparsity { k, n_features: p });
    }
    let solver = TruncatedPowerIteration::new(pooled_covariance, rifle)?;

    // Factors share only read-only state, so they run concurrently.
    let solve = |f: usize| solver.solve(&contrasts.matrices[f], initial_vectors[f].view(), sparsity[f]);
    let (first, (second, third)) = rayon::join(|| solve(0), || rayon::join(|| solve(1), || solve(2)));
    let components = [first?, second?, third?];

    info!(
        "Sparse fit done: supports {:?}, iterations {:?}, converged {:?}.",
        components.iter().map(|c| c.support().len()).collect::<Vec<_>>(),
        components.iter().map(|c| c.iterations).collect::<Vec<_>>(),
        components.iter().map(|c| c.converged).collect::<Vec<_>>()
    );
    Ok(SparseFit {
        components,
        sparsity,
        rifle,
    })
}

/// Stateful estimator over [`fit`] and [`sparse_fit`].
///
/// Holds the most recent dense and sparse results so `transform` and
/// `sparse_transform` can be called without threading them through; both
/// report `NotFitted` until the matching fit has run.
#[derive(Clone, Debug, Default)]
pub struct FactorialLda {
    config: FactorialLdaConfig,
    dense: Option<DenseFit>,
    sparse: Option<SparseFit>,
}

impl FactorialLda {
    pub fn new(config: FactorialLdaConfig) -> Self {
        Self {
            config,
            dense: None,
            sparse: None,
        }
    }

    pub fn config(&self) -> &FactorialLdaConfig {
        &self.config
    }

    pub fn dense_fit(&self) -> Option<&DenseFit> {
        self.dense.as_ref()
    }

    pub fn sparse_result(&self) -> Option<&SparseFit> {
        self.sparse.as_ref()
    }

    /// Fits the dense directions and caches them, together with the
    /// contrasts and pooled covariance, for later sparse fits.
    pub fn fit(&mut self, x: ArrayView2<f64>, labels: ArrayView2<usize>) -> Result<&DenseFit> {
        let result = fit(x, labels, &self.config)?;
        let fitted: &DenseFit = self.dense.insert(result);
        Ok(fitted)
    }

    /// Sparse fit. Initial vectors not given in `options` come from the
    /// cached dense fit when there is one.
    pub fn sparse_fit(
        &mut self,
        x: ArrayView2<f64>,
        labels: ArrayView2<usize>,
        sparsity: [usize; 3],
        mut options: SparseFitOptions,
    ) -> Result<&SparseFit> {
        if options.initial_vectors.is_none() {
            options.initial_vectors = self.dense.as_ref().map(DenseFit::initial_vectors);
        }
        let result = sparse_fit(x, labels, &self.config, sparsity, &options)?;
        let fitted: &SparseFit = self.sparse.insert(result);
        Ok(fitted)
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<[Array2<f64>; 3]> {
        self.dense
            .as_ref()
            .ok_or(FldaError::NotFitted("transform"))?
            .transform(x)
    }

    pub fn sparse_transform(&self, x: ArrayView2<f64>) -> Result<[Array1<f64>; 3]> {
        self.sparse
            .as_ref()
            .ok_or(FldaError::NotFitted("sparse_transform"))?
            .transform(x)
    }
}
