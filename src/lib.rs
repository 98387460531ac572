#![allow(clippy::multiple_crate_versions)]

//! # Sparse computation: candidate similar pairs without all-pairs comparison
//!
//! This crate finds, for a large collection of high-dimensional vectors, the
//! pairs that are plausibly similar without computing all `n²` pairwise
//! comparisons. It is a pre-filter: the returned pairs are meant to be handed
//! to an expensive exact-similarity step, which then only compares vectors
//! that lie close together.
//!
//! ## How it works
//!
//! 1. A [`DimReducer`] projects the `n × p` data onto `k ≤ 3` dimensions
//! 2. Each axis of the projection is split into `grid_resolution` bins,
//!    building a uniform grid of `grid_resolution^k` boxes
//! 3. Every point is assigned to the box containing it
//! 4. Points in the same box, or in boxes adjacent along every axis, are
//!    reported as candidate pairs
//!
//! The result favors recall over precision and makes no promise of finding
//! every truly similar pair.
//!
//! ## Examples
//!
//! Exact PCA onto three dimensions with the default resolution:
//! ```rust,no_run
//! use ndarray::Array2;
//! use sparse_computation::{ExactPca, SparseComputation};
//!
//! let data: Array2<f64> = // ... load your high-dimensional data
//! # Array2::zeros((100, 50));
//! let sparse = SparseComputation::builder()
//!     .reducer(ExactPca::new(3).unwrap())
//!     .build()
//!     .unwrap();
//! let pairs = sparse.get_similar_indices(data.view()).unwrap();
//! for pair in pairs.rows() {
//!     let (a, b) = (pair[0], pair[1]);
//!     // ... compare vectors a and b exactly
//! }
//! ```
//!
//! Approximate PCA on a sub-sample, with a finer grid:
//! ```rust,no_run
//! use sparse_computation::{ApproximatePca, SparseComputation};
//!
//! let reducer = ApproximatePca::builder()
//!     .dim_low(2)
//!     .frac_row(0.05)
//!     .min_row(200)
//!     .seed(42)
//!     .build()
//!     .unwrap();
//! let sparse = SparseComputation::builder()
//!     .reducer(reducer)
//!     .grid_resolution(50)
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Configuration
//!
//! - `grid_resolution`: bins per axis (default: 25). Higher values produce
//!   fewer candidate pairs with lower occupancy per box
//! - `reducer`: any [`DimReducer`]:
//!   - [`ExactPca`] - PCA over the full dataset
//!   - [`ApproximatePca`] - PCA fitted on norm-weighted row and column samples
//!   - [`RandomizedPca`] - PCA through a randomized SVD
//!   - [`Identity`] - data that is already low-dimensional
//!
//! ## Implementation Notes
//!
//! - Box ids use mixed-radix encoding, so a neighbor offset that steps off the
//!   grid on one axis can reach a box that is not geometrically adjacent.
//!   Such pairs are kept
//! - Neighbor expansion runs in parallel via rayon; the output is sorted, so
//!   it does not depend on scheduling
//! - Leverages ndarray for matrix operations and petal-decomposition for PCA

mod approximate;
pub mod grid;
pub mod pairs;
mod reducer;


use bon::bon;
use ndarray::{Array2, ArrayView2};
use petal_decomposition::DecompositionError;
use rand::distributions::WeightedError;
use thiserror::Error;
use tracing::debug;

pub use crate::approximate::{column_probabilities, row_probabilities, ApproximatePca};
pub use crate::pairs::similar_pairs;
pub use crate::reducer::{DimReducer, ExactPca, Identity, RandomizedPca};

/// Largest projected dimensionality the grid supports.
///
/// Neighbor expansion visits `3^k` offsets per box.
pub const MAX_GRID_DIMENSIONS: usize = 3;

/// Default number of bins per axis.
pub const DEFAULT_GRID_RESOLUTION: usize = 25;

/// Finds candidate similar pairs by projecting data onto a low-dimensional
/// grid.
///
/// Built through [`SparseComputation::builder`]; the grid resolution is
/// validated when `build` is called, before any data is seen.
#[derive(Clone, Debug)]
pub struct SparseComputation<R> {
    reducer: R,
    grid_resolution: usize,
}

#[bon]
impl<R: DimReducer> SparseComputation<R> {
    /// Validates and stores the configuration.
    ///
    /// # Arguments
    /// * `reducer` - Projection applied before binning
    /// * `grid_resolution` - Number of bins per axis, at least 1
    ///
    /// # Errors
    /// * `SparseComputationError::InvalidGridResolution` - `grid_resolution`
    ///   is 0
    #[builder]
    pub fn new(
        reducer: R,
        #[builder(default = DEFAULT_GRID_RESOLUTION)] grid_resolution: usize,
    ) -> Result<Self, SparseComputationError> {
        if grid_resolution == 0 {
            return Err(SparseComputationError::InvalidGridResolution);
        }

        Ok(Self {
            reducer,
            grid_resolution,
        })
    }

    /// Number of bins per axis.
    pub fn grid_resolution(&self) -> usize {
        self.grid_resolution
    }

    /// The projection applied before binning.
    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    /// Returns the candidate similar pairs of `x`.
    ///
    /// # Arguments
    /// * `x` - Input data matrix where each row is an observation
    ///
    /// # Returns
    /// Matrix of shape `(m, 2)` whose rows `(a, b)` are row indices of `x`
    /// with `a < b`, sorted ascending, each unordered pair once
    ///
    /// # Errors
    /// * `SparseComputationError::EmptyData` - `x` has no rows
    /// * `SparseComputationError::NonFiniteValue` - `x` contains NaN or
    ///   infinite values
    /// * `SparseComputationError::TooManySamples` - Row indices do not fit in
    ///   `u32`
    /// * `SparseComputationError::ReducedRowMismatch` - The reducer changed
    ///   the number of rows
    /// * `SparseComputationError::TooManyDimensions` - The reducer produced
    ///   more than three columns
    /// * Any error raised by the reducer
    pub fn get_similar_indices(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Array2<u32>, SparseComputationError> {
        let n = x.nrows();
        if n == 0 {
            return Err(SparseComputationError::EmptyData);
        }

        if x.iter().any(|v| !v.is_finite()) {
            return Err(SparseComputationError::NonFiniteValue);
        }

        if u32::try_from(n).is_err() {
            return Err(SparseComputationError::TooManySamples);
        }

        let reduced = self.reducer.fit_transform(x)?;
        if reduced.nrows() != n {
            return Err(SparseComputationError::ReducedRowMismatch {
                expected: n,
                actual: reduced.nrows(),
            });
        }

        debug!(
            "Reduced {} x {} data to {} dimensions",
            n,
            x.ncols(),
            reduced.ncols()
        );
        similar_pairs(reduced.view(), self.grid_resolution)
    }
}

/// Errors that can occur while configuring or running sparse computation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SparseComputationError {
    /// Grid resolution is zero
    #[error("Grid resolution must be a positive integer")]
    InvalidGridResolution,

    /// Target dimension of a reducer is zero
    #[error("Target dimension must be a positive integer")]
    InvalidTargetDimension,

    /// Sampling fraction outside `(0, 1]`
    #[error("{name} must be in (0, 1], got {value}")]
    InvalidFraction {
        /// Name of the offending parameter
        name: &'static str,
        /// Rejected value
        value: f64,
    },

    /// Sampling floor is zero
    #[error("{name} must be a positive integer")]
    InvalidMinimum {
        /// Name of the offending parameter
        name: &'static str,
    },

    /// Input has no rows
    #[error("Data must contain at least one row")]
    EmptyData,

    /// Input contains NaN or infinite values
    #[error("Data contains NaN or infinite values")]
    NonFiniteValue,

    /// Projected data is too wide for neighbor search
    #[error("Grid search supports at most 3 dimensions, got {dimensions}")]
    TooManyDimensions {
        /// Number of projected dimensions
        dimensions: usize,
    },

    /// Target dimension exceeds the number of available features
    #[error("Cannot reduce {available} features to {requested} dimensions")]
    DimensionExceedsFeatures {
        /// Target dimension
        requested: usize,
        /// Number of input features
        available: usize,
    },

    /// Too few rows to fit the requested number of components
    #[error("Fitting {required} components needs at least {required} rows, got {available}")]
    InsufficientSamples {
        /// Minimum number of rows
        required: usize,
        /// Number of rows available
        available: usize,
    },

    /// Reducer did not preserve the number of rows
    #[error("Reducer returned {actual} rows for {expected} input rows")]
    ReducedRowMismatch {
        /// Number of input rows
        expected: usize,
        /// Number of rows returned by the reducer
        actual: usize,
    },

    /// Row indices do not fit in `u32`
    #[error("Sample size exceeds u32::MAX")]
    TooManySamples,

    /// Box ids would overflow
    #[error("A grid of resolution {resolution} in {dimensions} dimensions has too many boxes")]
    GridTooLarge {
        /// Bins per axis
        resolution: usize,
        /// Number of axes
        dimensions: usize,
    },

    /// PCA decomposition failed
    #[error(transparent)]
    Pca(#[from] DecompositionError),

    /// Weighted row or column sampling failed
    #[error(transparent)]
    Sampling(#[from] WeightedError),
}
