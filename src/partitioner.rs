//! # Grid Partitioner
//!
//! Assigns block coordinates to worker partitions with a
//! row/column-cyclic scheme. Both grid indices feed the partition id,
//! so shuffle traffic spreads across all partitions instead of
//! following a single grid axis; keying by one axis alone skews every
//! block of a grid row or column onto the same worker and only
//! tolerable for narrow, low-block-count matrices.

use crate::block::BlockCoord;
use crate::dataflow::Partitioner;
use crate::error::EngineError;

/// Row/column-cyclic partitioner over a block grid
#[derive(Debug, Clone)]
pub struct GridPartitioner {
    grid_rows: usize,
    grid_cols: usize,
    num_partitions: usize,
}

impl GridPartitioner {
    /// Build a partitioner for a `grid_rows x grid_cols` block grid
    /// with at most `suggested_partitions` partitions. A partitioner
    /// never carries more partitions than the grid has cells.
    pub fn new(
        grid_rows: usize,
        grid_cols: usize,
        suggested_partitions: usize,
    ) -> Result<Self, EngineError> {
        if grid_rows == 0 || grid_cols == 0 {
            return Err(EngineError::Configuration(format!(
                "block grid must be non-empty, got {}x{}",
                grid_rows, grid_cols
            )));
        }
        if suggested_partitions == 0 {
            return Err(EngineError::Configuration(
                "partition count must be positive".to_string(),
            ));
        }
        let num_partitions = suggested_partitions.min(grid_rows * grid_cols);
        Ok(Self {
            grid_rows,
            grid_cols,
            num_partitions,
        })
    }

    fn slot(&self, row: usize, col: usize) -> usize {
        (row % self.grid_rows) + (col % self.grid_cols) * self.grid_rows
    }
}

/// Two partitioners are interchangeable for shuffle planning exactly
/// when their partition counts match.
impl PartialEq for GridPartitioner {
    fn eq(&self, other: &Self) -> bool {
        self.num_partitions == other.num_partitions
    }
}

impl Eq for GridPartitioner {}

impl Partitioner<BlockCoord> for GridPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn partition(&self, key: &BlockCoord) -> usize {
        self.slot(key.row, key.col) % self.num_partitions
    }
}

/// Triple keys `(i, j, k)` arise when blocks are replicated along a
/// shared inner dimension; the third field disambiguates the replicas
/// so they spread over partitions too.
impl Partitioner<(usize, usize, usize)> for GridPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn partition(&self, key: &(usize, usize, usize)) -> usize {
        let &(i, j, k) = key;
        (self.slot(i, j) + k * self.grid_rows * self.grid_cols) % self.num_partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_degenerate_construction() {
        assert!(GridPartitioner::new(0, 3, 4).is_err());
        assert!(GridPartitioner::new(3, 0, 4).is_err());
        assert!(GridPartitioner::new(3, 3, 0).is_err());
    }

    #[test]
    fn test_partition_count_capped_by_grid() {
        let p = GridPartitioner::new(2, 2, 100).unwrap();
        assert_eq!(Partitioner::<BlockCoord>::num_partitions(&p), 4);
    }

    #[test]
    fn test_ids_in_range_and_deterministic() {
        let p = GridPartitioner::new(5, 7, 6).unwrap();
        for row in 0..10 {
            for col in 0..10 {
                let coord = BlockCoord::new(row, col);
                let id = p.partition(&coord);
                assert!(id < 6, "id {} out of range for {}", id, coord);
                assert_eq!(id, p.partition(&coord));
            }
        }
    }

    #[test]
    fn test_both_axes_move_the_id() {
        let p = GridPartitioner::new(4, 4, 8).unwrap();
        let base = p.partition(&BlockCoord::new(0, 0));
        let along_row: Vec<usize> = (0..4).map(|c| p.partition(&BlockCoord::new(0, c))).collect();
        let along_col: Vec<usize> = (0..4).map(|r| p.partition(&BlockCoord::new(r, 0))).collect();
        assert!(along_row.iter().any(|&id| id != base));
        assert!(along_col.iter().any(|&id| id != base));
    }

    #[test]
    fn test_equality_is_partition_count_only() {
        let a = GridPartitioner::new(2, 3, 6).unwrap();
        let b = GridPartitioner::new(10, 10, 6).unwrap();
        let c = GridPartitioner::new(2, 3, 5).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_triple_key_spreads_inner_dimension() {
        let p = GridPartitioner::new(3, 3, 9).unwrap();
        let ids: Vec<usize> = (0..9).map(|k| p.partition(&(1usize, 1usize, k))).collect();
        assert!(ids.iter().all(|&id| id < 9));
        assert!(ids.windows(2).any(|w| w[0] != w[1]));
    }
}
