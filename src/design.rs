// src/design.rs

//! Three-factor design bookkeeping: label validation, per-cell counts and
//! means, factor marginal means and the grand mean.

use crate::error::{FldaError, Result};
use log::debug;
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Number of factors in the design.
pub const NUM_FACTORS: usize = 3;

/// Level counts `[l1, l2, l3]` of the three factors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorLevels {
    pub counts: [usize; NUM_FACTORS],
}

impl FactorLevels {
    /// Reads `l_f = max(labels[:, f]) + 1` for each factor.
    ///
    /// Every factor needs at least two levels, otherwise its between-factor
    /// scatter would be normalized by zero.
    pub fn from_labels(labels: ArrayView2<usize>) -> Result<Self> {
        if labels.ncols() != NUM_FACTORS {
            return Err(FldaError::InvalidLabels(format!(
                "label matrix must have {} columns, found {}",
                NUM_FACTORS,
                labels.ncols()
            )));
        }
        if labels.nrows() == 0 {
            return Err(FldaError::InvalidLabels("label matrix has no rows".to_string()));
        }
        let mut counts = [0usize; NUM_FACTORS];
        for (factor, column) in labels.axis_iter(Axis(1)).enumerate() {
            let max_level = column.iter().copied().max().unwrap_or(0);
            counts[factor] = max_level + 1;
            if counts[factor] < 2 {
                return Err(FldaError::InvalidLabels(format!(
                    "factor {} has a single level; at least two are required",
                    factor + 1
                )));
            }
        }
        Ok(Self { counts })
    }

    pub fn num_cells(&self) -> usize {
        self.counts.iter().product()
    }

    /// Flat index of cell `(i, j, k)`, row-major over the three factors.
    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.counts[1] + j) * self.counts[2] + k
    }

    /// All cells `(i, j, k)` in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let [l1, l2, l3] = self.counts;
        (0..l1).flat_map(move |i| (0..l2).flat_map(move |j| (0..l3).map(move |k| (i, j, k))))
    }
}

/// Checks that `x` and `labels` describe the same observations and that `x`
/// holds only finite values.
pub fn validate_observations(x: ArrayView2<f64>, labels: ArrayView2<usize>) -> Result<()> {
    if x.nrows() != labels.nrows() {
        return Err(FldaError::DimensionMismatch {
            context: "label rows vs observation rows",
            expected: x.nrows(),
            found: labels.nrows(),
        });
    }
    if x.ncols() == 0 {
        return Err(FldaError::InvalidParameter(
            "observation matrix has no features".to_string(),
        ));
    }
    if let Some(((row, col), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(FldaError::NonFiniteInput { row, col });
    }
    Ok(())
}

/// Per-cell membership, counts and means.
///
/// An empty cell keeps `None` as its mean; nothing is zero-filled.
#[derive(Clone, Debug)]
pub struct CellStatistics {
    pub levels: FactorLevels,
    /// Observation counts, indexed `[i, j, k]`.
    pub counts: Array3<usize>,
    /// Row indices of the observations in each cell, flat cell order.
    pub members: Vec<Vec<usize>>,
    /// Mean feature vector per cell, flat cell order. `None` marks an empty cell.
    pub means: Vec<Option<Array1<f64>>>,
}

impl CellStatistics {
    pub fn compute(x: ArrayView2<f64>, labels: ArrayView2<usize>) -> Result<Self> {
        validate_observations(x, labels)?;
        let levels = FactorLevels::from_labels(labels)?;
        let [l1, l2, l3] = levels.counts;

        let mut members = vec![Vec::new(); levels.num_cells()];
        for (row, label) in labels.axis_iter(Axis(0)).enumerate() {
            members[levels.cell_index(label[0], label[1], label[2])].push(row);
        }

        let counts = Array3::from_shape_fn((l1, l2, l3), |(i, j, k)| {
            members[levels.cell_index(i, j, k)].len()
        });
        let means = members
            .iter()
            .map(|rows| x.select(Axis(0), rows).mean_axis(Axis(0)))
            .collect();

        debug!(
            "Grouped {} observations into {} cells (levels {:?}).",
            x.nrows(),
            levels.num_cells(),
            levels.counts
        );
        Ok(Self {
            levels,
            counts,
            members,
            means,
        })
    }

    /// First empty cell in row-major order, if any.
    pub fn first_empty_cell(&self) -> Option<(usize, usize, usize)> {
        self.levels
            .cells()
            .find(|&(i, j, k)| self.counts[[i, j, k]] == 0)
    }

    pub fn mean(&self, i: usize, j: usize, k: usize) -> Option<&Array1<f64>> {
        self.means[self.levels.cell_index(i, j, k)].as_ref()
    }
}

/// Factor marginal means and the grand mean.
///
/// Marginals are unweighted averages of cell means over the other two
/// factors, so every cell counts once regardless of its population.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactorMeans {
    /// `xi`, shape `(l1, p)`.
    pub factor1: Array2<f64>,
    /// `xj`, shape `(l2, p)`.
    pub factor2: Array2<f64>,
    /// `xk`, shape `(l3, p)`.
    pub factor3: Array2<f64>,
    /// Average of the factor-1 marginals, shape `(p,)`.
    pub grand: Array1<f64>,
}

impl FactorMeans {
    /// Fails with `EmptyCell` on the first empty cell.
    pub fn from_cells(cells: &CellStatistics) -> Result<Self> {
        if let Some((i, j, k)) = cells.first_empty_cell() {
            return Err(FldaError::EmptyCell { i, j, k });
        }
        let [l1, l2, l3] = cells.levels.counts;
        let n_features = cells
            .means
            .iter()
            .flatten()
            .next()
            .map_or(0, |m| m.len());

        let mut factor1 = Array2::<f64>::zeros((l1, n_features));
        let mut factor2 = Array2::<f64>::zeros((l2, n_features));
        let mut factor3 = Array2::<f64>::zeros((l3, n_features));
        for (i, j, k) in cells.levels.cells() {
            let mean = cells.mean(i, j, k).ok_or(FldaError::EmptyCell { i, j, k })?;
            let mut row = factor1.row_mut(i);
            row += mean;
            let mut row = factor2.row_mut(j);
            row += mean;
            let mut row = factor3.row_mut(k);
            row += mean;
        }
        factor1 /= (l2 * l3) as f64;
        factor2 /= (l1 * l3) as f64;
        factor3 /= (l1 * l2) as f64;

        let grand = factor1
            .mean_axis(Axis(0))
            .ok_or_else(|| FldaError::InvalidLabels("factor 1 has no levels".to_string()))?;
        Ok(Self {
            factor1,
            factor2,
            factor3,
            grand,
        })
    }

    /// Marginal means of factor `f` (0-based).
    pub fn factor(&self, f: usize) -> &Array2<f64> {
        match f {
            0 => &self.factor1,
            1 => &self.factor2,
            _ => &self.factor3,
        }
    }
}

/// Cell statistics together with the marginal means they imply.
#[derive(Clone, Debug)]
pub struct GroupStatistics {
    pub cells: CellStatistics,
    pub means: FactorMeans,
}

impl GroupStatistics {
    pub fn compute(x: ArrayView2<f64>, labels: ArrayView2<usize>) -> Result<Self> {
        let cells = CellStatistics::compute(x, labels)?;
        let means = FactorMeans::from_cells(&cells)?;
        Ok(Self { cells, means })
    }

    pub fn levels(&self) -> FactorLevels {
        self.cells.levels
    }

    pub fn n_samples(&self) -> usize {
        self.cells.counts.sum()
    }
}
