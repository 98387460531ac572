//! Candidate pair emission from occupied grid boxes.
//!
//! Every occupied box is paired with itself and with each occupied box whose
//! id differs by one of the grid's neighbor offsets. Pairs are oriented with
//! the smaller row index first and each unordered pair is reported once.

use crate::grid::{assign_boxes, rescale, Grid};
use crate::{SparseComputationError, MAX_GRID_DIMENSIONS};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// Finds candidate similar pairs in an already reduced dataset.
///
/// # Arguments
/// * `reduced` - Low-dimensional data, one row per observation
/// * `grid_resolution` - Number of bins per axis
///
/// # Returns
/// Matrix of shape `(m, 2)` whose rows are `(a, b)` with `a < b`, sorted
/// ascending and free of duplicates
///
/// # Errors
/// * `SparseComputationError::InvalidGridResolution` - `grid_resolution` is 0
/// * `SparseComputationError::EmptyData` - `reduced` has no rows
/// * `SparseComputationError::TooManyDimensions` - `reduced` has more than
///   three columns
/// * `SparseComputationError::TooManySamples` - Row indices do not fit in
///   `u32`
/// * `SparseComputationError::NonFiniteValue` - A value is NaN or infinite
pub fn similar_pairs(
    reduced: ArrayView2<f64>,
    grid_resolution: usize,
) -> Result<Array2<u32>, SparseComputationError> {
    let start_time = Instant::now();
    let (n, dimensions) = reduced.dim();

    if grid_resolution == 0 {
        return Err(SparseComputationError::InvalidGridResolution);
    }

    if dimensions > MAX_GRID_DIMENSIONS {
        return Err(SparseComputationError::TooManyDimensions { dimensions });
    }

    if u32::try_from(n).is_err() {
        return Err(SparseComputationError::TooManySamples);
    }

    let grid = Grid::new(grid_resolution, dimensions)?;
    let bins = rescale(reduced, grid_resolution)?;
    let boxes = assign_boxes(bins.view(), &grid);
    debug!(
        "Assigned {n} points to {} of {} boxes",
        boxes.len(),
        grid_resolution.saturating_pow(dimensions as u32)
    );

    let pairs = emit_pairs(&boxes, &grid.neighbor_offsets());

    debug!(
        "Found {} candidate pairs in {:.2?}",
        pairs.nrows(),
        start_time.elapsed()
    );
    Ok(pairs)
}

/// Pairs the members of every box with those of its occupied neighbors.
///
/// Boxes are expanded in parallel, each worker collecting its own pairs;
/// the merged list is sorted and deduplicated so the result does not depend
/// on scheduling.
pub fn emit_pairs(boxes: &BTreeMap<u64, Vec<u32>>, offsets: &[i64]) -> Array2<u32> {
    let mut pairs: Vec<(u32, u32)> = boxes
        .par_iter()
        .flat_map_iter(move |(&id, members)| {
            offsets
                .iter()
                .filter_map(move |&offset| id.checked_add_signed(offset))
                .filter_map(move |neighbor_id| boxes.get(&neighbor_id))
                .flat_map(move |neighbors| {
                    members.iter().flat_map(move |&a| {
                        neighbors
                            .iter()
                            .filter(move |&&b| a < b)
                            .map(move |&b| (a, b))
                    })
                })
        })
        .collect();

    pairs.par_sort_unstable();
    pairs.dedup();

    Array2::from_shape_fn((pairs.len(), 2), |(i, j)| {
        let (a, b) = pairs[i];
        if j == 0 {
            a
        } else {
            b
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Axis};
    use quickcheck::{Arbitrary, Gen, TestResult};
    use quickcheck_macros::quickcheck;
    use std::collections::HashSet;

    fn pair_list(pairs: &Array2<u32>) -> Vec<(u32, u32)> {
        pairs.rows().into_iter().map(|r| (r[0], r[1])).collect()
    }

    fn pair_set(pairs: &Array2<u32>) -> HashSet<(u32, u32)> {
        pair_list(pairs).into_iter().collect()
    }

    #[test]
    fn test_one_dimensional_scenario() {
        let reduced = array![[0.0], [1.0], [2.0], [3.0], [10.0]];
        let pairs = similar_pairs(reduced.view(), 4).unwrap();
        assert_eq!(
            pair_list(&pairs),
            vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
        );
    }

    #[test]
    fn test_single_point() {
        let reduced = array![[1.0, 2.0]];
        let pairs = similar_pairs(reduced.view(), 5).unwrap();
        assert_eq!(pairs.dim(), (0, 2));
    }

    #[test]
    fn test_same_box_completeness() {
        // Three tight points plus two outliers stretching the range
        let reduced = array![
            [0.0, 0.0],
            [5.0, 5.0],
            [5.1, 5.1],
            [5.2, 5.0],
            [10.0, 10.0]
        ];
        let pairs = pair_set(&similar_pairs(reduced.view(), 10).unwrap());
        for (a, b) in [(1, 2), (1, 3), (2, 3)] {
            assert!(pairs.contains(&(a, b)), "missing in-box pair ({a}, {b})");
        }
        assert!(!pairs.contains(&(0, 4)));
    }

    #[test]
    fn test_diagonal_neighbors() {
        // Bins (0, 0), (1, 1), (2, 2), (3, 3)
        let reduced = array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [4.0, 4.0]];
        let pairs = similar_pairs(reduced.view(), 4).unwrap();
        assert_eq!(pair_list(&pairs), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_non_adjacent_boxes_excluded() {
        // Bins (0, 0), (2, 2), (4, 4), (0, 2) on a 5x5 grid: ids 0, 12, 24, 10
        let reduced = array![[0.0, 0.0], [2.0, 2.0], [4.0, 4.0], [0.0, 2.0]];
        let pairs = similar_pairs(reduced.view(), 5).unwrap();
        assert_eq!(pairs.nrows(), 0);
    }

    #[test]
    fn test_edge_offsets_alias_across_rows() {
        // Bin (3, 0) has id 3 and bin (0, 1) has id 4. They are three columns
        // apart, but id 3 shifted by +1 on the first axis lands on id 4.
        let reduced = array![[4.0, 0.0], [0.0, 1.0], [0.0, 4.0]];
        let bins = rescale(reduced.view(), 4).unwrap();
        let expected: Array2<usize> = array![[3, 0], [0, 1], [0, 3]];
        assert_eq!(bins, expected);

        let pairs = similar_pairs(reduced.view(), 4).unwrap();
        assert_eq!(pair_list(&pairs), vec![(0, 1)]);
    }

    #[test]
    fn test_resolution_one_pairs_everything() {
        let reduced = array![[0.0, 3.0, 1.0], [9.0, -1.0, 2.0], [4.0, 4.0, 4.0]];
        let pairs = similar_pairs(reduced.view(), 1).unwrap();
        assert_eq!(pair_list(&pairs), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_constant_axis_does_not_fail() {
        // First axis bins 0, 1, 2, 4 on a 5-bin grid, second axis constant
        let reduced = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [5.0, 1.0]];
        let pairs = pair_set(&similar_pairs(reduced.view(), 5).unwrap());
        assert!(pairs.contains(&(0, 1)));
        assert!(pairs.contains(&(1, 2)));
        assert!(!pairs.contains(&(0, 2)));
        assert!(!pairs.contains(&(2, 3)));
    }

    #[test]
    fn test_too_many_dimensions() {
        let reduced = Array2::<f64>::zeros((3, 4));
        assert!(matches!(
            similar_pairs(reduced.view(), 3),
            Err(SparseComputationError::TooManyDimensions { dimensions: 4 })
        ));
    }

    #[test]
    fn test_zero_resolution() {
        let reduced = array![[0.0], [1.0]];
        assert!(matches!(
            similar_pairs(reduced.view(), 0),
            Err(SparseComputationError::InvalidGridResolution)
        ));
    }

    #[test]
    fn test_empty_data() {
        let reduced = Array2::<f64>::zeros((0, 2));
        assert!(matches!(
            similar_pairs(reduced.view(), 3),
            Err(SparseComputationError::EmptyData)
        ));
    }

    #[test]
    fn test_emit_pairs_deduplicates_aliased_offsets() {
        // Repeated deltas must not repeat pairs
        let mut boxes = BTreeMap::new();
        boxes.insert(0, vec![0, 1, 2]);
        let pairs = emit_pairs(&boxes, &[-1, 0, 0, 1, 1]);
        assert_eq!(pair_list(&pairs), vec![(0, 1), (0, 2), (1, 2)]);
    }

    /// Small low-dimensional dataset with a grid resolution, for property
    /// tests.
    #[derive(Clone, Debug)]
    struct Embedding {
        points: Array2<f64>,
        resolution: usize,
    }

    impl Arbitrary for Embedding {
        fn arbitrary(g: &mut Gen) -> Embedding {
            let dimensions = 1 + usize::arbitrary(g) % MAX_GRID_DIMENSIONS;
            let n = 1 + usize::arbitrary(g) % 40;
            let resolution = 1 + usize::arbitrary(g) % 8;
            let points = Array2::from_shape_fn((n, dimensions), |_| {
                f64::from(i16::arbitrary(g) % 64) / 4.0
            });
            Embedding { points, resolution }
        }
    }

    /// Returns true when two grid coordinates differ by at most one per axis.
    fn adjacent(bins: &Array2<usize>, a: usize, b: usize) -> bool {
        bins.row(a)
            .iter()
            .zip(bins.row(b).iter())
            .all(|(&x, &y)| x.abs_diff(y) <= 1)
    }

    #[quickcheck]
    fn pairs_are_ordered_and_unique(e: Embedding) -> bool {
        let pairs = similar_pairs(e.points.view(), e.resolution).unwrap();
        let ordered = pairs.rows().into_iter().all(|r| r[0] < r[1]);
        pair_set(&pairs).len() == pairs.nrows() && ordered
    }

    #[quickcheck]
    fn pairs_are_deterministic(e: Embedding) -> bool {
        let first = similar_pairs(e.points.view(), e.resolution).unwrap();
        let second = similar_pairs(e.points.view(), e.resolution).unwrap();
        first == second
    }

    #[quickcheck]
    fn adjacent_points_are_paired(e: Embedding) -> TestResult {
        let bins = rescale(e.points.view(), e.resolution).unwrap();
        let pairs = pair_set(&similar_pairs(e.points.view(), e.resolution).unwrap());
        let n = e.points.len_of(Axis(0));

        for a in 0..n {
            for b in (a + 1)..n {
                if adjacent(&bins, a, b) && !pairs.contains(&(a as u32, b as u32)) {
                    return TestResult::error(format!("missing adjacent pair ({a}, {b})"));
                }
            }
        }
        TestResult::passed()
    }

    #[quickcheck]
    fn pairs_come_from_neighbor_offsets(e: Embedding) -> bool {
        let dimensions = e.points.ncols();
        let grid = Grid::new(e.resolution, dimensions).unwrap();
        let offsets: HashSet<i64> = grid.neighbor_offsets().into_iter().collect();
        let bins = rescale(e.points.view(), e.resolution).unwrap();
        let pairs = similar_pairs(e.points.view(), e.resolution).unwrap();

        pairs.rows().into_iter().all(|r| {
            let a = grid.box_id(bins.row(r[0] as usize)) as i64;
            let b = grid.box_id(bins.row(r[1] as usize)) as i64;
            offsets.contains(&(b - a))
        })
    }
}
