//! # Top-K Selection
//!
//! Two-phase extraction of the k largest entries. Each block keeps a
//! bounded min-heap of its own cells in parallel; the survivors are
//! translated to global coordinates and merged through a second
//! bounded heap on the coordinating host.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use log::debug;

use crate::block::Block;
use crate::matrix::BlockMatrix;

/// A matrix entry at its global coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedEntry {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

#[derive(Debug, Clone, Copy)]
struct HeapCell {
    value: f64,
    row: usize,
    col: usize,
}

impl Ord for HeapCell {
    fn cmp(&self, other: &Self) -> Ordering {
        // coordinates break value ties only to give the heap a total
        // order; ties between equal values carry no ranking meaning
        self.value
            .total_cmp(&other.value)
            .then(self.row.cmp(&other.row))
            .then(self.col.cmp(&other.col))
    }
}

impl PartialOrd for HeapCell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapCell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapCell {}

/// Insert into a min-heap bounded at `k` elements, evicting the
/// smallest when the bound is exceeded.
fn bounded_push(heap: &mut BinaryHeap<Reverse<HeapCell>>, k: usize, cell: HeapCell) {
    heap.push(Reverse(cell));
    if heap.len() > k {
        heap.pop();
    }
}

/// Per-block candidates: up to `k` local `(row, col, value)` triples.
/// Every logical cell participates, implicit zeros of sparse blocks
/// included.
fn local_top_k(block: &Block, k: usize) -> Vec<(usize, usize, f64)> {
    let dense = block.to_dense();
    let mut heap = BinaryHeap::new();
    for ((row, col), &value) in dense.indexed_iter() {
        bounded_push(&mut heap, k, HeapCell { value, row, col });
    }
    heap.into_iter()
        .map(|Reverse(cell)| (cell.row, cell.col, cell.value))
        .collect()
}

/// The `k` largest entries of `matrix`, descending by value. Order
/// among equal values is unspecified.
pub fn top_k(matrix: &BlockMatrix, k: usize) -> Vec<RankedEntry> {
    if k == 0 {
        return Vec::new();
    }
    let candidates = matrix
        .blocks()
        .map(|coord, block| (*coord, local_top_k(block, k)));

    let rows_per_block = matrix.rows_per_block();
    let cols_per_block = matrix.cols_per_block();
    let mut heap = BinaryHeap::new();
    for (coord, cells) in candidates.collect() {
        for (row, col, value) in cells {
            bounded_push(
                &mut heap,
                k,
                HeapCell {
                    value,
                    row: coord.row * rows_per_block + row,
                    col: coord.col * cols_per_block + col,
                },
            );
        }
    }
    debug!("Merged top-{} candidates from {} blocks", k, matrix.blocks().len());
    let mut ranked: Vec<RankedEntry> = heap
        .into_iter()
        .map(|Reverse(cell)| RankedEntry {
            row: cell.row,
            col: cell.col,
            value: cell.value,
        })
        .collect();
    ranked.sort_by(|a, b| b.value.total_cmp(&a.value));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::matrix::BlockMatrix;
    use ndarray::Array2;

    fn config(rpb: usize, cpb: usize) -> EngineConfig {
        EngineConfig::new(rpb, cpb).with_partitions(3)
    }

    fn row_major_1_to_36() -> Array2<f64> {
        Array2::from_shape_fn((6, 6), |(i, j)| (i * 6 + j + 1) as f64)
    }

    #[test]
    fn test_top_three_independent_of_tiling() {
        let local = row_major_1_to_36();
        for (r, c) in [(3, 3), (2, 2), (4, 4), (6, 6), (1, 6)] {
            let m = BlockMatrix::from_dense(&local, &config(r, c)).unwrap();
            let top = m.top_k(3);
            let as_triples: Vec<(usize, usize, f64)> =
                top.iter().map(|e| (e.row, e.col, e.value)).collect();
            assert_eq!(
                as_triples,
                vec![(5, 5, 36.0), (5, 4, 35.0), (4, 5, 34.0)],
                "tiling {}x{}",
                r,
                c
            );
        }
    }

    #[test]
    fn test_k_zero_and_k_beyond_entry_count() {
        let m = BlockMatrix::from_dense(&row_major_1_to_36(), &config(3, 3)).unwrap();
        assert!(m.top_k(0).is_empty());
        let all = m.top_k(100);
        assert_eq!(all.len(), 36);
        assert_eq!(all[0].value, 36.0);
        assert_eq!(all[35].value, 1.0);
    }

    #[test]
    fn test_threshold_property_against_full_sort() {
        let local = Array2::from_shape_fn((5, 4), |(i, j)| ((i * 13 + j * 7) % 11) as f64 - 5.0);
        let m = BlockMatrix::from_dense(&local, &config(2, 3)).unwrap();
        let k = 6;
        let top = m.top_k(k);
        assert_eq!(top.len(), k);
        let mut all: Vec<f64> = local.iter().copied().collect();
        all.sort_by(|a, b| b.total_cmp(a));
        let cutoff = all[k - 1];
        for entry in &top {
            assert!(entry.value >= cutoff);
            // each returned triple names a real matrix entry
            assert_eq!(local[[entry.row, entry.col]], entry.value);
        }
    }

    #[test]
    fn test_implicit_zeros_outrank_negatives() {
        // a sparse tile's absent cells are logical zeros and must
        // participate in the ranking
        let m = BlockMatrix::from_entries_with_dims(
            vec![(0, 0, -3.0), (1, 1, -1.0)],
            &config(2, 2),
            4,
            4,
        )
        .unwrap();
        let top = m.top_k(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].value, 0.0);
        assert_eq!(top[1].value, 0.0);
    }

    #[test]
    fn test_descending_order() {
        let m = BlockMatrix::from_dense(&row_major_1_to_36(), &config(2, 3)).unwrap();
        let top = m.top_k(10);
        for pair in top.windows(2) {
            assert!(pair[0].value >= pair[1].value);
        }
    }
}
