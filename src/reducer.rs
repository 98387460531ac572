//! Dimensionality reduction in front of the grid.
//!
//! A [`DimReducer`] projects an `n × p` dataset onto `n × k` coordinates,
//! keeping row order so that row `i` of the output still labels observation
//! `i`. The grid only ever sees the projected coordinates.

use crate::SparseComputationError;
use ndarray::{Array2, ArrayView2};
use petal_decomposition::{Pca, RandomizedPca as PetalRandomizedPca, RandomizedPcaBuilder};
use rand::SeedableRng;
use rand_pcg::Mcg128Xsl64;
use tracing::debug;

/// Projects high-dimensional rows onto a smaller number of dimensions.
pub trait DimReducer {
    /// Number of columns produced by [`DimReducer::fit_transform`], or
    /// `None` when the output keeps the width of the input.
    fn target_dimensions(&self) -> Option<usize>;

    /// Fits the projection on `x` and returns the projected rows, in the same
    /// order as the input.
    ///
    /// # Errors
    /// Implementations fail with `SparseComputationError::EmptyData` on an
    /// empty input and with `SparseComputationError::DimensionExceedsFeatures`
    /// when `x` has fewer columns than the target dimension.
    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparseComputationError>;
}

impl<T: DimReducer + ?Sized> DimReducer for Box<T> {
    fn target_dimensions(&self) -> Option<usize> {
        (**self).target_dimensions()
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparseComputationError> {
        (**self).fit_transform(x)
    }
}

impl<T: DimReducer + ?Sized> DimReducer for &T {
    fn target_dimensions(&self) -> Option<usize> {
        (**self).target_dimensions()
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparseComputationError> {
        (**self).fit_transform(x)
    }
}

/// Validates a target dimension at construction time.
pub(crate) fn validate_target_dimension(dim_low: usize) -> Result<(), SparseComputationError> {
    if dim_low == 0 {
        return Err(SparseComputationError::InvalidTargetDimension);
    }
    Ok(())
}

/// Checks that `x` can be projected onto `dim_low` components.
///
/// # Errors
/// * `SparseComputationError::EmptyData` - `x` has no rows
/// * `SparseComputationError::DimensionExceedsFeatures` - `x` has fewer than
///   `dim_low` columns
/// * `SparseComputationError::InsufficientSamples` - `x` has fewer than
///   `dim_low` rows
pub(crate) fn check_projectable(
    x: ArrayView2<f64>,
    dim_low: usize,
) -> Result<(), SparseComputationError> {
    let (n, p) = x.dim();
    if n == 0 {
        return Err(SparseComputationError::EmptyData);
    }

    if p < dim_low {
        return Err(SparseComputationError::DimensionExceedsFeatures {
            requested: dim_low,
            available: p,
        });
    }

    if n < dim_low {
        return Err(SparseComputationError::InsufficientSamples {
            required: dim_low,
            available: n,
        });
    }

    Ok(())
}

/// Principal component analysis over the whole dataset.
///
/// Deterministic for a given input.
#[derive(Clone, Debug)]
pub struct ExactPca {
    dim_low: usize,
}

impl ExactPca {
    /// Creates an exact PCA projecting onto `dim_low` components.
    ///
    /// # Errors
    /// * `SparseComputationError::InvalidTargetDimension` - `dim_low` is 0
    pub fn new(dim_low: usize) -> Result<Self, SparseComputationError> {
        validate_target_dimension(dim_low)?;
        Ok(Self { dim_low })
    }
}

impl DimReducer for ExactPca {
    fn target_dimensions(&self) -> Option<usize> {
        Some(self.dim_low)
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparseComputationError> {
        check_projectable(x, self.dim_low)?;

        let mut pca = Pca::new(self.dim_low);
        let reduced = pca.fit_transform(&x)?;

        debug!("Applied PCA, the dimensionality becomes {}", self.dim_low);
        Ok(reduced)
    }
}

/// PCA through a randomized singular value decomposition.
///
/// Cheaper than [`ExactPca`] on wide inputs. Results vary between runs unless
/// a seed is given.
#[derive(Clone, Debug)]
pub struct RandomizedPca {
    dim_low: usize,
    seed: Option<u64>,
}

impl RandomizedPca {
    /// Creates a randomized PCA projecting onto `dim_low` components.
    ///
    /// # Errors
    /// * `SparseComputationError::InvalidTargetDimension` - `dim_low` is 0
    pub fn new(dim_low: usize, seed: Option<u64>) -> Result<Self, SparseComputationError> {
        validate_target_dimension(dim_low)?;
        Ok(Self { dim_low, seed })
    }
}

impl DimReducer for RandomizedPca {
    fn target_dimensions(&self) -> Option<usize> {
        Some(self.dim_low)
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparseComputationError> {
        check_projectable(x, self.dim_low)?;

        let reduced = match self.seed {
            None => {
                let mut pca = PetalRandomizedPca::new(self.dim_low);
                pca.fit_transform(&x)?
            }
            Some(seed) => {
                let mut pca =
                    RandomizedPcaBuilder::with_rng(Mcg128Xsl64::seed_from_u64(seed), self.dim_low)
                        .build();
                pca.fit_transform(&x)?
            }
        };

        debug!(
            "Applied randomized PCA, the dimensionality becomes {}",
            self.dim_low
        );
        Ok(reduced)
    }
}

/// Passes data through unchanged.
///
/// For inputs that are already low-dimensional, such as an embedding computed
/// elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl DimReducer for Identity {
    fn target_dimensions(&self) -> Option<usize> {
        None
    }

    fn fit_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, SparseComputationError> {
        Ok(x.to_owned())
    }
}
