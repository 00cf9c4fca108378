// src/scatter.rs

use crate::design::{FactorLevels, GroupStatistics};
use crate::error::{FldaError, Result};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Between-factor scatter matrices A, B, C and the pooled within-cell
/// covariance D, all `p x p`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScatterMatrices {
    pub factor1: Array2<f64>,
    pub factor2: Array2<f64>,
    pub factor3: Array2<f64>,
    pub pooled_covariance: Array2<f64>,
    /// `n - l1*l2 - l3 + 2`, the divisor applied to D.
    pub degrees_of_freedom: f64,
    pub levels: FactorLevels,
}

impl ScatterMatrices {
    /// Builds A, B, C and D from the observations and their group statistics.
    pub fn compute(x: ArrayView2<f64>, labels: ArrayView2<usize>, stats: &GroupStatistics) -> Result<Self> {
        let levels = stats.levels();
        let means = &stats.means;
        info!(
            "Building scatter matrices for {} observations x {} features, levels {:?}.",
            x.nrows(),
            x.ncols(),
            levels.counts
        );

        let factor1 = between_factor_scatter(&means.factor1, &means.grand);
        let factor2 = between_factor_scatter(&means.factor2, &means.grand);
        let factor3 = between_factor_scatter(&means.factor3, &means.grand);
        let (pooled_covariance, degrees_of_freedom) = pooled_within_cell_covariance(x, labels, stats)?;

        Ok(Self {
            factor1,
            factor2,
            factor3,
            pooled_covariance,
            degrees_of_freedom,
            levels,
        })
    }

    /// `[A, B, C]`.
    pub fn between(&self) -> [&Array2<f64>; 3] {
        [&self.factor1, &self.factor2, &self.factor3]
    }

    pub fn n_features(&self) -> usize {
        self.pooled_covariance.nrows()
    }
}

/// `(M - x_bar)^T (M - x_bar) / (l - 1)` over the rows of a marginal-means matrix `M`.
pub fn between_factor_scatter(marginal_means: &Array2<f64>, grand_mean: &Array1<f64>) -> Array2<f64> {
    let centered = marginal_means - grand_mean;
    let mut scatter = centered.t().dot(&centered);
    scatter /= (marginal_means.nrows() - 1) as f64;
    scatter
}

/// Residual degrees of freedom for the within-cell covariance, `n - l1*l2 - l3 + 2`.
///
/// This is not the textbook three-way ANOVA count; downstream results depend
/// on it exactly, so it must not be "corrected".
pub fn within_cell_degrees_of_freedom(n_samples: usize, levels: &FactorLevels) -> i64 {
    let [l1, l2, l3] = levels.counts;
    n_samples as i64 - (l1 * l2) as i64 - l3 as i64 + 2
}

/// Pooled within-cell covariance D and the degrees of freedom it was divided by.
///
/// Each observation contributes its residual
/// `x - xi[i] - xj[j] - xk[k] + 2 x_bar`, weighted by the inverse of its cell's
/// count. The weighted residuals are stacked into one matrix `R` so that
/// `D = R^T R / dof` runs as a single product.
pub fn pooled_within_cell_covariance(
    x: ArrayView2<f64>,
    labels: ArrayView2<usize>,
    stats: &GroupStatistics,
) -> Result<(Array2<f64>, f64)> {
    let levels = stats.levels();
    let n_samples = x.nrows();
    if let Some((i, j, k)) = stats.cells.first_empty_cell() {
        return Err(FldaError::EmptyCell { i, j, k });
    }
    let dof = within_cell_degrees_of_freedom(n_samples, &levels);
    if dof <= 0 {
        return Err(FldaError::InsufficientDegreesOfFreedom { n_samples, dof });
    }

    let means = &stats.means;
    let twice_grand = &means.grand * 2.0;
    let mut residuals = x.to_owned();
    Zip::from(residuals.axis_iter_mut(Axis(0)))
        .and(labels.axis_iter(Axis(0)))
        .par_for_each(|mut row, label| {
            let (i, j, k) = (label[0], label[1], label[2]);
            let weight = 1.0 / (stats.cells.counts[[i, j, k]] as f64).sqrt();
            row -= &means.factor1.row(i);
            row -= &means.factor2.row(j);
            row -= &means.factor3.row(k);
            row += &twice_grand;
            row *= weight;
        });

    let mut covariance = residuals.t().dot(&residuals);
    covariance /= dof as f64;
    debug!(
        "Pooled within-cell covariance: {}x{}, dof = {}, trace = {:.6e}.",
        covariance.nrows(),
        covariance.ncols(),
        dof,
        covariance.diag().sum()
    );
    Ok((covariance, dof as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn noisy_design(reps: usize, p: usize, seed: u64) -> (Array2<f64>, Array2<usize>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut labels = Vec::new();
        let mut data = Vec::new();
        for i in 0..2 {
            for j in 0..3 {
                for k in 0..2 {
                    for _ in 0..reps {
                        labels.extend_from_slice(&[i, j, k]);
                        for f in 0..p {
                            data.push(normal.sample(&mut rng) + (i * f) as f64 - j as f64);
                        }
                    }
                }
            }
        }
        let n = labels.len() / 3;
        (
            Array2::from_shape_vec((n, p), data).unwrap(),
            Array2::from_shape_vec((n, 3), labels).unwrap(),
        )
    }

    #[test]
    fn degrees_of_freedom_follow_the_three_way_formula() {
        let levels = FactorLevels { counts: [2, 3, 4] };
        assert_eq!(within_cell_degrees_of_freedom(100, &levels), 100 - 6 - 4 + 2);
        assert_eq!(within_cell_degrees_of_freedom(5, &levels), -3);
    }

    #[test]
    fn between_scatter_matches_hand_computation() {
        let marginals = array![[1.0, 0.0], [3.0, 2.0]];
        let grand = array![2.0, 1.0];
        let scatter = between_factor_scatter(&marginals, &grand);
        // Both rows deviate by (+-1, +-1); sum of outer products / (2 - 1).
        assert_abs_diff_eq!(scatter, array![[2.0, 2.0], [2.0, 2.0]], epsilon = 1e-12);
    }

    #[test]
    fn pooled_covariance_is_symmetric_and_psd() {
        let (x, labels) = noisy_design(6, 5, 7);
        let stats = GroupStatistics::compute(x.view(), labels.view()).unwrap();
        let scatter = ScatterMatrices::compute(x.view(), labels.view(), &stats).unwrap();
        let d = &scatter.pooled_covariance;
        assert_abs_diff_eq!(*d, d.t().to_owned(), epsilon = 1e-10);
        assert_abs_diff_eq!(scatter.degrees_of_freedom, (72 - 6 - 2 + 2) as f64);
        for f in 0..5 {
            assert!(d[[f, f]] > 0.0);
        }
        for m in scatter.between() {
            assert_abs_diff_eq!(*m, m.t().to_owned(), epsilon = 1e-10);
        }
    }

    #[test]
    fn pooled_covariance_matches_per_cell_accumulation() {
        let (x, labels) = noisy_design(4, 3, 11);
        let stats = GroupStatistics::compute(x.view(), labels.view()).unwrap();
        let (d, dof) = pooled_within_cell_covariance(x.view(), labels.view(), &stats).unwrap();

        let means = &stats.means;
        let mut expected = Array2::<f64>::zeros((3, 3));
        for (i, j, k) in stats.levels().cells() {
            let rows = &stats.cells.members[stats.levels().cell_index(i, j, k)];
            let mut block = x.select(Axis(0), rows);
            for mut row in block.axis_iter_mut(Axis(0)) {
                row -= &means.factor1.row(i);
                row -= &means.factor2.row(j);
                row -= &means.factor3.row(k);
                row += &(&means.grand * 2.0);
            }
            expected = expected + block.t().dot(&block) / rows.len() as f64;
        }
        expected /= dof;
        assert_abs_diff_eq!(d, expected, epsilon = 1e-10);
    }

    #[test]
    fn empty_cell_is_reported_before_accumulating() {
        let (x, labels) = noisy_design(3, 2, 5);
        let mut cells = GroupStatistics::compute(x.view(), labels.view()).unwrap();
        cells.cells.counts[[1, 2, 0]] = 0;
        assert!(matches!(
            pooled_within_cell_covariance(x.view(), labels.view(), &cells),
            Err(FldaError::EmptyCell { i: 1, j: 2, k: 0 })
        ));
    }
}
