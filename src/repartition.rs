//! # Repartitioner
//!
//! Converts a block collection from one tiling scheme to another while
//! covering the same logical matrix. Every source block is decomposed
//! into its box intersections with the target grid, the overlapping
//! cells are shipped to the target block's partition, and each target
//! block is assembled from its contributions and re-encoded by
//! density. Every logical entry is covered by exactly one contribution
//! to exactly one target block; the intersection step is what rules
//! out double-counting and gaps across ragged edges.

use std::time::Instant;

use log::{debug, info};

use crate::block::{density_encode, Block, BlockCoord};
use crate::error::EngineError;
use crate::matrix::BlockMatrix;
use crate::partitioner::GridPartitioner;

/// Exact overlap of one source block with one target block
#[derive(Debug, Clone)]
struct Contribution {
    /// Global row indices covered, ascending
    rows: Vec<usize>,
    /// Global column indices covered, ascending
    cols: Vec<usize>,
    /// Column-major cell values: `values[c * rows.len() + r]`
    values: Vec<f64>,
}

/// Sorted two-pointer merge: advance whichever side lags, emit the
/// indices where both coincide.
fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(a[i]);
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Decompose one source block into contributions to every target
/// block its global index ranges span.
#[allow(clippy::too_many_arguments)]
fn decompose(
    coord: &BlockCoord,
    block: &Block,
    cur_rows: usize,
    cur_cols: usize,
    tgt_rows: usize,
    tgt_cols: usize,
    num_rows: usize,
    num_cols: usize,
) -> Vec<(BlockCoord, Contribution)> {
    if num_rows == 0 || num_cols == 0 || block.rows() == 0 || block.cols() == 0 {
        return Vec::new();
    }
    let row_start = coord.row * cur_rows;
    let row_end = ((coord.row + 1) * cur_rows - 1).min(num_rows - 1);
    let col_start = coord.col * cur_cols;
    let col_end = ((coord.col + 1) * cur_cols - 1).min(num_cols - 1);
    let source_rows: Vec<usize> = (row_start..=row_end).collect();
    let source_cols: Vec<usize> = (col_start..=col_end).collect();
    let dense = block.to_dense();

    let mut out = Vec::new();
    for target_row in row_start / tgt_rows..=row_end / tgt_rows {
        let target_row_end = ((target_row + 1) * tgt_rows - 1).min(num_rows - 1);
        let target_range: Vec<usize> = (target_row * tgt_rows..=target_row_end).collect();
        let row_overlap = intersect_sorted(&source_rows, &target_range);
        if row_overlap.is_empty() {
            continue;
        }
        for target_col in col_start / tgt_cols..=col_end / tgt_cols {
            let target_col_end = ((target_col + 1) * tgt_cols - 1).min(num_cols - 1);
            let target_range: Vec<usize> = (target_col * tgt_cols..=target_col_end).collect();
            let col_overlap = intersect_sorted(&source_cols, &target_range);
            if col_overlap.is_empty() {
                continue;
            }
            let mut values = Vec::with_capacity(row_overlap.len() * col_overlap.len());
            for &gc in &col_overlap {
                for &gr in &row_overlap {
                    values.push(dense[[gr - row_start, gc - col_start]]);
                }
            }
            out.push((
                BlockCoord::new(target_row, target_col),
                Contribution {
                    rows: row_overlap.clone(),
                    cols: col_overlap,
                    values,
                },
            ));
        }
    }
    out
}

/// Scatter every contribution into a zero-filled buffer of the target
/// block's shape, then pick the storage encoding by density.
fn assemble_target(
    coord: &BlockCoord,
    contributions: &[Contribution],
    tgt_rows: usize,
    tgt_cols: usize,
    num_rows: usize,
    num_cols: usize,
) -> Block {
    let row_offset = coord.row * tgt_rows;
    let col_offset = coord.col * tgt_cols;
    let rows = tgt_rows.min(num_rows - row_offset);
    let cols = tgt_cols.min(num_cols - col_offset);
    let mut buffer = vec![0.0; rows * cols];
    for contribution in contributions {
        let contributed_rows = contribution.rows.len();
        for (ci, &gc) in contribution.cols.iter().enumerate() {
            for (ri, &gr) in contribution.rows.iter().enumerate() {
                buffer[(gc - col_offset) * rows + (gr - row_offset)] =
                    contribution.values[ci * contributed_rows + ri];
            }
        }
    }
    density_encode(&buffer, rows, cols)
}

/// Re-tile `matrix` to `tgt_rows x tgt_cols` blocks.
pub fn repartition(
    matrix: &BlockMatrix,
    tgt_rows: usize,
    tgt_cols: usize,
) -> Result<BlockMatrix, EngineError> {
    if tgt_rows == 0 || tgt_cols == 0 {
        return Err(EngineError::Configuration(format!(
            "target tile dimensions must be positive, got {}x{}",
            tgt_rows, tgt_cols
        )));
    }
    let cur_rows = matrix.rows_per_block();
    let cur_cols = matrix.cols_per_block();
    if cur_rows == tgt_rows && cur_cols == tgt_cols {
        return Ok(matrix.clone());
    }
    let started = Instant::now();
    let num_rows = matrix.n_rows();
    let num_cols = matrix.n_cols();
    info!(
        "Repartitioning {}x{} matrix from {}x{} to {}x{} tiles",
        num_rows, num_cols, cur_rows, cur_cols, tgt_rows, tgt_cols
    );

    let contributions = matrix.blocks().flat_map(|coord, block| {
        decompose(
            coord, block, cur_rows, cur_cols, tgt_rows, tgt_cols, num_rows, num_cols,
        )
    });
    let target_row_blocks = (num_rows + tgt_rows - 1) / tgt_rows;
    let target_col_blocks = (num_cols + tgt_cols - 1) / tgt_cols;
    let partitioner = GridPartitioner::new(
        target_row_blocks.max(1),
        target_col_blocks.max(1),
        matrix.blocks().partition_count().max(1),
    )?;
    let blocks = contributions.group_by_key(&partitioner).map(|coord, parts| {
        (
            *coord,
            assemble_target(coord, parts, tgt_rows, tgt_cols, num_rows, num_cols),
        )
    });
    debug!("Repartition completed in {:?}", started.elapsed());
    BlockMatrix::with_dims(blocks, tgt_rows, tgt_cols, num_rows, num_cols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use ndarray::Array2;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn config(rpb: usize, cpb: usize) -> EngineConfig {
        EngineConfig::new(rpb, cpb).with_partitions(3)
    }

    #[test]
    fn test_intersect_sorted() {
        assert_eq!(intersect_sorted(&[0, 1, 2, 3], &[2, 3, 4]), vec![2, 3]);
        assert_eq!(intersect_sorted(&[0, 2, 4], &[1, 3, 5]), Vec::<usize>::new());
        assert_eq!(intersect_sorted(&[], &[1, 2]), Vec::<usize>::new());
        assert_eq!(intersect_sorted(&[5], &[5]), vec![5]);
    }

    #[test]
    fn test_round_trip_even_tiles() {
        let local = Array2::from_shape_fn((6, 6), |(i, j)| (i * 6 + j + 1) as f64);
        let m = BlockMatrix::from_dense(&local, &config(3, 3)).unwrap();
        let regridded = m.repartition(2, 2).unwrap();
        regridded.validate().unwrap();
        assert_eq!(regridded.rows_per_block(), 2);
        assert_eq!(regridded.to_local().unwrap(), local);
        let back = regridded.repartition(3, 3).unwrap();
        back.validate().unwrap();
        assert_eq!(back.to_local().unwrap(), local);
    }

    #[test]
    fn test_round_trip_ragged_tiles() {
        let local = Array2::from_shape_fn((5, 7), |(i, j)| ((i * 7 + j) as f64) - 10.0);
        let m = BlockMatrix::from_dense(&local, &config(2, 3)).unwrap();
        let regridded = m.repartition(3, 2).unwrap();
        regridded.validate().unwrap();
        assert_eq!(regridded.to_local().unwrap(), local);
        let back = regridded.repartition(2, 3).unwrap();
        back.validate().unwrap();
        assert_eq!(back.to_local().unwrap(), local);
    }

    #[test]
    fn test_round_trip_random_matrix() {
        let local: Array2<f64> = Array2::random((11, 13), Uniform::new(-1.0, 1.0));
        let m = BlockMatrix::from_dense(&local, &config(4, 5)).unwrap();
        for (r, c) in [(1, 1), (3, 7), (11, 13), (5, 2)] {
            let regridded = m.repartition(r, c).unwrap();
            regridded.validate().unwrap();
            let diff = &regridded.to_local().unwrap() - &local;
            assert!(
                diff.iter().all(|&d| d == 0.0),
                "retiling to {}x{} moved values",
                r,
                c
            );
        }
    }

    #[test]
    fn test_coarsen_to_single_block() {
        let local = Array2::from_shape_fn((6, 6), |(i, j)| (i + j) as f64);
        let m = BlockMatrix::from_dense(&local, &config(2, 2)).unwrap();
        let single = m.repartition(10, 10).unwrap();
        single.validate().unwrap();
        assert_eq!(single.row_block_count(), 1);
        assert_eq!(single.col_block_count(), 1);
        assert_eq!(single.blocks().len(), 1);
        assert_eq!(single.to_local().unwrap(), local);
    }

    #[test]
    fn test_same_tiling_is_passthrough() {
        let local = Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as f64);
        let m = BlockMatrix::from_dense(&local, &config(2, 2)).unwrap();
        let same = m.repartition(2, 2).unwrap();
        assert_eq!(same.blocks().len(), m.blocks().len());
        assert_eq!(same.to_local().unwrap(), local);
    }

    #[test]
    fn test_reencodes_negative_mass_as_sparse() {
        // all cells nonzero but negative: the strictly-positive
        // occupancy test classifies every rebuilt block as sparse
        let local = Array2::from_elem((4, 4), -1.0);
        let m = BlockMatrix::from_dense(&local, &config(4, 4)).unwrap();
        let regridded = m.repartition(2, 2).unwrap();
        for (_, block) in regridded.blocks().collect() {
            assert!(matches!(block, Block::Sparse { .. }));
        }
        assert_eq!(regridded.to_local().unwrap(), local);
    }

    #[test]
    fn test_zero_target_tile_rejected() {
        let m = BlockMatrix::from_dense(&Array2::ones((2, 2)), &config(2, 2)).unwrap();
        assert!(matches!(
            m.repartition(0, 2),
            Err(EngineError::Configuration(_))
        ));
    }
}
