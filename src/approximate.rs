//! Approximate PCA through norm-weighted row and column sampling.
//!
//! Rows and columns are drawn without replacement with probability
//! proportional to their squared norm, so large-magnitude rows and columns
//! are more likely to be kept:
//!
//! - Column `j` is kept with weight `‖X[:, j]‖² / ‖X‖_F²` and rescaled by
//!   `1 / sqrt(p_j * n_col)`, keeping the second-moment estimate unbiased
//! - Row `i` is kept with weight `‖X[i, :]‖² / ‖X‖_F²` and left unscaled
//!
//! Exact PCA is then fitted on the sub-sample and the full column-reduced
//! dataset is projected through it.

use crate::reducer::{check_projectable, validate_target_dimension, DimReducer};
use crate::SparseComputationError;
use bon::bon;
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use petal_decomposition::Pca;
use rand::rngs::SmallRng;
use rand::seq::index::sample_weighted;
use rand::{thread_rng, Rng, SeedableRng};
use tracing::{debug, warn};

/// Column fractions this close to 1 skip column sampling entirely.
const FULL_FRACTION_TOLERANCE: f64 = 1e-8;

/// Randomized PCA fitted on a norm-weighted sub-sample of the data.
///
/// Built through [`ApproximatePca::builder`]; invalid settings are rejected
/// when `build` is called.
///
/// ```rust,no_run
/// use sparse_computation::ApproximatePca;
///
/// let reducer = ApproximatePca::builder()
///     .dim_low(3)
///     .frac_row(0.05)
///     .min_row(500)
///     .seed(7)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct ApproximatePca {
    dim_low: usize,
    frac_row: f64,
    frac_col: f64,
    min_row: usize,
    min_col: usize,
    seed: Option<u64>,
}

#[bon]
impl ApproximatePca {
    /// Validates and stores the sampling configuration.
    ///
    /// # Arguments
    /// * `dim_low` - Number of output dimensions
    /// * `frac_row` - Fraction of rows used to fit, in `(0, 1]`
    /// * `frac_col` - Fraction of columns kept, in `(0, 1]`
    /// * `min_row` - Floor on the number of rows used to fit
    /// * `min_col` - Floor on the number of columns kept
    /// * `seed` - Optional seed making the sampling reproducible
    ///
    /// # Errors
    /// * `SparseComputationError::InvalidTargetDimension` - `dim_low` is 0
    /// * `SparseComputationError::InvalidFraction` - A fraction is outside
    ///   `(0, 1]`
    /// * `SparseComputationError::InvalidMinimum` - A floor is 0
    #[builder]
    pub fn new(
        dim_low: usize,
        #[builder(default = 0.01)] frac_row: f64,
        #[builder(default = 1.0)] frac_col: f64,
        #[builder(default = 150)] min_row: usize,
        #[builder(default = 150)] min_col: usize,
        seed: Option<u64>,
    ) -> Result<Self, SparseComputationError> {
        validate_target_dimension(dim_low)?;
        validate_fraction("frac_row", frac_row)?;
        validate_fraction("frac_col", frac_col)?;
        validate_minimum("min_row", min_row)?;
        validate_minimum("min_col", min_col)?;

        Ok(Self {
            dim_low,
            frac_row,
            frac_col,
            min_row,
            min_col,
            seed,
        })
    }

    /// Fraction of rows used to fit.
    pub fn frac_row(&self) -> f64 {
        self.frac_row
    }

    /// Fraction of columns kept.
    pub fn frac_col(&self) -> f64 {
        self.frac_col
    }

    /// Floor on the number of rows used to fit.
    pub fn min_row(&self) -> usize {
        self.min_row
    }

    /// Floor on the number of columns kept.
    pub fn min_col(&self) -> usize {
        self.min_col
    }

    /// Seed for the sampling, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Runs the sampling and projection with the given random source.
    fn fit_transform_with<R>(
        &self,
        x: ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<Array2<f64>, SparseComputationError>
    where
        R: Rng + ?Sized,
    {
        check_projectable(x, self.dim_low)?;

        let col_reduced = if (self.frac_col - 1.0).abs() <= FULL_FRACTION_TOLERANCE {
            x.to_owned()
        } else {
            reduce_columns(x, self.frac_col, self.min_col, rng)?
        };

        if col_reduced.ncols() < self.dim_low {
            return Err(SparseComputationError::DimensionExceedsFeatures {
                requested: self.dim_low,
                available: col_reduced.ncols(),
            });
        }

        let row_reduced = reduce_rows(col_reduced.view(), self.frac_row, self.min_row, rng)?;
        if row_reduced.nrows() < self.dim_low {
            return Err(SparseComputationError::InsufficientSamples {
                required: self.dim_low,
                available: row_reduced.nrows(),
            });
        }

        debug!(
            "Fitting PCA on a {} x {} sample of a {} x {} dataset",
            row_reduced.nrows(),
            row_reduced.ncols(),
            x.nrows(),
            x.ncols()
        );

        let mut pca = Pca::new(self.dim_low);
        pca.fit(&row_reduced)?;
        Ok(pca.transform(&col_reduced)?)
    }
}

impl DimReducer for ApproximatePca {
    fn target_dimensions(&self) -> Option<usize> {
        Some(self.dim_low)
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparseComputationError> {
        match self.seed {
            Some(seed) => self.fit_transform_with(x, &mut SmallRng::seed_from_u64(seed)),
            None => self.fit_transform_with(x, &mut thread_rng()),
        }
    }
}

fn validate_fraction(name: &'static str, value: f64) -> Result<(), SparseComputationError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(SparseComputationError::InvalidFraction { name, value })
    }
}

fn validate_minimum(name: &'static str, value: usize) -> Result<(), SparseComputationError> {
    if value == 0 {
        return Err(SparseComputationError::InvalidMinimum { name });
    }
    Ok(())
}

/// Normalizes squared norms into probabilities.
///
/// An all-zero input has no preferred direction and gets uniform weights.
#[allow(clippy::cast_precision_loss)]
fn normalize(squared_norms: Array1<f64>) -> Array1<f64> {
    let total = squared_norms.sum();
    if total > 0.0 {
        squared_norms / total
    } else {
        let len = squared_norms.len();
        Array1::from_elem(len, 1.0 / len as f64)
    }
}

/// Probability of keeping each column: its squared norm over the squared
/// Frobenius norm.
pub fn column_probabilities(x: ArrayView2<f64>) -> Array1<f64> {
    normalize(x.mapv(|v| v * v).sum_axis(Axis(0)))
}

/// Probability of keeping each row: its squared norm over the squared
/// Frobenius norm.
pub fn row_probabilities(x: ArrayView2<f64>) -> Array1<f64> {
    normalize(x.mapv(|v| v * v).sum_axis(Axis(1)))
}

/// Number of items to keep: `max(minimum, total * fraction)`, capped at
/// `total` and truncated.
#[allow(clippy::cast_precision_loss)]
fn sample_size(total: usize, fraction: f64, minimum: usize) -> usize {
    let wanted = (minimum as f64).max(total as f64 * fraction);
    wanted.min(total as f64) as usize
}

/// Whether the floor alone forces every item into the sample.
#[allow(clippy::cast_precision_loss)]
fn floor_covers_all(total: usize, fraction: f64, minimum: usize) -> bool {
    minimum >= total && (total as f64 * fraction) < total as f64
}

/// Draws `amount` distinct indices with probability proportional to
/// `probabilities`, in ascending order.
fn draw_indices<R>(
    rng: &mut R,
    probabilities: &Array1<f64>,
    amount: usize,
) -> Result<Vec<usize>, SparseComputationError>
where
    R: Rng + ?Sized,
{
    let mut indices =
        sample_weighted(rng, probabilities.len(), |i| probabilities[i], amount)?.into_vec();
    indices.sort_unstable();
    Ok(indices)
}

/// Keeps a norm-weighted subset of columns, each divided by
/// `sqrt(p_j * n_col)`.
///
/// # Errors
/// * `SparseComputationError::Sampling` - Weighted sampling failed
#[allow(clippy::cast_precision_loss)]
pub fn reduce_columns<R>(
    x: ArrayView2<f64>,
    frac_col: f64,
    min_col: usize,
    rng: &mut R,
) -> Result<Array2<f64>, SparseComputationError>
where
    R: Rng + ?Sized,
{
    let p = x.ncols();
    let n_col = sample_size(p, frac_col, min_col);
    if floor_covers_all(p, frac_col, min_col) {
        warn!("min_col {min_col} covers all {p} columns, sampling them all");
    }

    let probabilities = column_probabilities(x);
    let kept = draw_indices(rng, &probabilities, n_col)?;

    let mut reduced = x.select(Axis(1), &kept);
    let factors: Array1<f64> = kept
        .iter()
        .map(|&j| (probabilities[j] * n_col as f64).sqrt())
        .collect();

    Zip::from(reduced.columns_mut())
        .and(&factors)
        .for_each(|mut column, &factor| {
            if factor > 0.0 {
                column.mapv_inplace(|v| v / factor);
            }
        });

    Ok(reduced)
}

/// Keeps a norm-weighted subset of rows.
///
/// # Errors
/// * `SparseComputationError::Sampling` - Weighted sampling failed
pub fn reduce_rows<R>(
    x: ArrayView2<f64>,
    frac_row: f64,
    min_row: usize,
    rng: &mut R,
) -> Result<Array2<f64>, SparseComputationError>
where
    R: Rng + ?Sized,
{
    let n = x.nrows();
    let n_row = sample_size(n, frac_row, min_row);
    if floor_covers_all(n, frac_row, min_row) {
        warn!("min_row {min_row} covers all {n} rows, sampling them all");
    }

    let probabilities = row_probabilities(x);
    let kept = draw_indices(rng, &probabilities, n_row)?;
    Ok(x.select(Axis(0), &kept))
}
