//! Uniform grid binning of a low-dimensional embedding.
//!
//! Points are mapped onto an isotropic grid with `resolution` bins per axis:
//!
//! 1. A per-axis min/max scan bounds the occupied region
//! 2. Each coordinate is rescaled affinely into `[0, resolution - 1]`
//! 3. The integer coordinates of a point are folded into a single box id by
//!    mixed-radix encoding, axis `i` contributing `coordinate[i] * resolution^i`
//! 4. Row indices are grouped by box id, creating boxes lazily
//!
//! The encoding is linear rather than a true lattice, so shifting an id by a
//! neighbor offset at the edge of the grid can land in a box that is not
//! geometrically adjacent. Callers rely on occupancy checks only.

use crate::SparseComputationError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use std::collections::BTreeMap;
use tracing::warn;

/// Per-axis extremes of a dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisBounds {
    /// Smallest value observed on each axis
    pub min: Array1<f64>,

    /// Largest value observed on each axis
    pub max: Array1<f64>,
}

/// Scans the dataset once per axis for its minimum and maximum.
///
/// # Errors
/// * `SparseComputationError::EmptyData` - The dataset has no rows
/// * `SparseComputationError::NonFiniteValue` - A value is NaN or infinite
pub fn axis_bounds(x: ArrayView2<f64>) -> Result<AxisBounds, SparseComputationError> {
    if x.nrows() == 0 {
        return Err(SparseComputationError::EmptyData);
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(SparseComputationError::NonFiniteValue);
    }

    let min = x.fold_axis(Axis(0), f64::INFINITY, |&lo, &v| lo.min(v));
    let max = x.fold_axis(Axis(0), f64::NEG_INFINITY, |&hi, &v| hi.max(v));

    Ok(AxisBounds { min, max })
}

/// Computes the factor mapping each axis range onto `resolution` bins.
///
/// A constant axis gets a factor of zero, which sends every row to bin 0.
#[allow(clippy::cast_precision_loss)]
pub fn scale_factors(bounds: &AxisBounds, resolution: usize) -> Array1<f64> {
    Zip::from(&bounds.min)
        .and(&bounds.max)
        .map_collect(|&lo, &hi| {
            let range = hi - lo;
            if range > 0.0 {
                resolution as f64 / range
            } else {
                warn!("Constant axis at {lo}, collapsing it to bin 0");
                0.0
            }
        })
}

/// Rescales a dataset into integer grid coordinates in `[0, resolution - 1]`.
///
/// Values equal to an axis maximum would land on `resolution`; they are
/// clamped into the last bin.
///
/// # Errors
/// * `SparseComputationError::EmptyData` - The dataset has no rows
/// * `SparseComputationError::NonFiniteValue` - A value is NaN or infinite
pub fn rescale(
    x: ArrayView2<f64>,
    resolution: usize,
) -> Result<Array2<usize>, SparseComputationError> {
    let bounds = axis_bounds(x)?;
    let scale = scale_factors(&bounds, resolution);
    let last_bin = resolution.saturating_sub(1);

    let mut bins = Array2::zeros(x.dim());
    Zip::from(&mut bins)
        .and(&x)
        .and_broadcast(&bounds.min)
        .and_broadcast(&scale)
        .par_for_each(|bin, &v, &lo, &s| {
            *bin = (((v - lo) * s).floor() as usize).min(last_bin);
        });

    Ok(bins)
}

/// An isotropic grid of `resolution^dimensions` boxes.
#[derive(Clone, Debug)]
pub struct Grid {
    resolution: usize,

    /// `resolution^i` for each axis `i`
    strides: Vec<u64>,
}

impl Grid {
    /// Creates a grid, checking that every box id fits in a signed 64-bit
    /// integer so neighbor offsets can be applied without overflow.
    ///
    /// # Errors
    /// * `SparseComputationError::InvalidGridResolution` - `resolution` is 0
    /// * `SparseComputationError::GridTooLarge` - `resolution^dimensions`
    ///   exceeds `i64::MAX`
    pub fn new(resolution: usize, dimensions: usize) -> Result<Self, SparseComputationError> {
        if resolution == 0 {
            return Err(SparseComputationError::InvalidGridResolution);
        }

        let too_large = || SparseComputationError::GridTooLarge {
            resolution,
            dimensions,
        };
        let base = u64::try_from(resolution).map_err(|_| too_large())?;
        let exponent = u32::try_from(dimensions).map_err(|_| too_large())?;
        let fits = base
            .checked_pow(exponent)
            .is_some_and(|cells| i64::try_from(cells).is_ok());
        if !fits {
            return Err(too_large());
        }

        let strides = (0..exponent).map(|i| base.pow(i)).collect();
        Ok(Self {
            resolution,
            strides,
        })
    }

    /// Number of bins per axis.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Number of axes.
    pub fn dimensions(&self) -> usize {
        self.strides.len()
    }

    /// Encodes grid coordinates as `Σ coordinate[i] * resolution^i`.
    ///
    /// Coordinates are assumed to be in range already.
    pub fn box_id(&self, coordinates: ArrayView1<usize>) -> u64 {
        coordinates
            .iter()
            .zip(&self.strides)
            .map(|(&c, &stride)| c as u64 * stride)
            .sum()
    }

    /// Returns the distinct id deltas of the offsets in
    /// `{-1, 0, +1}^dimensions`, ascending, the zero offset included.
    ///
    /// Below resolution 3 different offsets share a delta; each is kept once.
    pub fn neighbor_offsets(&self) -> Vec<i64> {
        let mut offsets = vec![0_i64];
        for &stride in &self.strides {
            // Grid::new guarantees every stride fits in i64
            let stride = stride as i64;
            offsets = offsets
                .iter()
                .flat_map(|&o| [o - stride, o, o + stride])
                .collect();
        }
        offsets.sort_unstable();
        offsets.dedup();
        offsets
    }
}

/// Groups row indices by the box their grid coordinates fall in.
///
/// Rows are visited in order, so each box lists its members ascending.
pub fn assign_boxes(bins: ArrayView2<usize>, grid: &Grid) -> BTreeMap<u64, Vec<u32>> {
    let mut boxes: BTreeMap<u64, Vec<u32>> = BTreeMap::new();
    for (i, row) in bins.rows().into_iter().enumerate() {
        boxes.entry(grid.box_id(row)).or_default().push(i as u32);
    }
    boxes
}
