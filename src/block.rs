//! # Local Blocks
//!
//! Tile-local storage and the single-machine linear algebra primitives
//! every distributed operation is built from. A block is an immutable
//! rectangular array of `f64` values held in one of two encodings:
//! dense (every cell materialized) or sparse (coordinate list of the
//! nonzero cells only).

use std::collections::HashMap;
use std::fmt;

use ndarray::{Array2, ShapeBuilder};

use crate::error::EngineError;

/// Position of a tile in the block grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockCoord {
    pub row: usize,
    pub col: usize,
}

impl BlockCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn transposed(self) -> Self {
        Self {
            row: self.col,
            col: self.row,
        }
    }
}

impl fmt::Display for BlockCoord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Fraction of strictly positive cells above which a buffer is stored dense
pub const DENSITY_THRESHOLD: f64 = 0.5;

/// One tile of a block matrix
#[derive(Debug, Clone)]
pub enum Block {
    /// Every cell materialized, `rows x cols`
    Dense(Array2<f64>),
    /// Only nonzero cells materialized as `(row, col, value)` triples
    Sparse {
        rows: usize,
        cols: usize,
        entries: Vec<(usize, usize, f64)>,
    },
}

impl Block {
    pub fn rows(&self) -> usize {
        match self {
            Block::Dense(values) => values.nrows(),
            Block::Sparse { rows, .. } => *rows,
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            Block::Dense(values) => values.ncols(),
            Block::Sparse { cols, .. } => *cols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    /// Number of materialized cells
    pub fn stored_len(&self) -> usize {
        match self {
            Block::Dense(values) => values.len(),
            Block::Sparse { entries, .. } => entries.len(),
        }
    }

    /// Logical cell value; absent sparse cells read as zero.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            Block::Dense(values) => values[[row, col]],
            Block::Sparse { entries, .. } => entries
                .iter()
                .find(|&&(r, c, _)| r == row && c == col)
                .map(|&(_, _, v)| v)
                .unwrap_or(0.0),
        }
    }

    /// Materialize every cell of the block.
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Block::Dense(values) => values.clone(),
            Block::Sparse {
                rows,
                cols,
                entries,
            } => {
                let mut dense = Array2::zeros((*rows, *cols));
                for &(r, c, v) in entries {
                    dense[[r, c]] = v;
                }
                dense
            }
        }
    }

    /// Multiply every cell by a scalar; the encoding is preserved.
    pub fn scale(&self, alpha: f64) -> Block {
        match self {
            Block::Dense(values) => Block::Dense(values * alpha),
            Block::Sparse {
                rows,
                cols,
                entries,
            } => Block::Sparse {
                rows: *rows,
                cols: *cols,
                entries: entries.iter().map(|&(r, c, v)| (r, c, v * alpha)).collect(),
            },
        }
    }

    pub fn transpose(&self) -> Block {
        match self {
            Block::Dense(values) => Block::Dense(values.t().to_owned()),
            Block::Sparse {
                rows,
                cols,
                entries,
            } => Block::Sparse {
                rows: *cols,
                cols: *rows,
                entries: entries.iter().map(|&(r, c, v)| (c, r, v)).collect(),
            },
        }
    }

    /// Elementwise sum of two blocks of identical shape.
    ///
    /// Two sparse operands stay sparse; any dense operand promotes the
    /// result to dense.
    pub fn add(&self, other: &Block) -> Result<Block, EngineError> {
        if self.shape() != other.shape() {
            return Err(EngineError::DimensionMismatch {
                op: "block add",
                left: self.shape(),
                right: other.shape(),
            });
        }
        match (self, other) {
            (
                Block::Sparse { entries: a, .. },
                Block::Sparse {
                    rows,
                    cols,
                    entries: b,
                },
            ) => {
                let mut cells: HashMap<(usize, usize), f64> = HashMap::new();
                for &(r, c, v) in a.iter().chain(b.iter()) {
                    *cells.entry((r, c)).or_insert(0.0) += v;
                }
                let mut entries: Vec<(usize, usize, f64)> = cells
                    .into_iter()
                    .filter(|&(_, v)| v != 0.0)
                    .map(|((r, c), v)| (r, c, v))
                    .collect();
                entries.sort_by_key(|&(r, c, _)| (r, c));
                Ok(Block::Sparse {
                    rows: *rows,
                    cols: *cols,
                    entries,
                })
            }
            _ => Ok(Block::Dense(self.to_dense() + other.to_dense())),
        }
    }

    /// Local matrix product.
    ///
    /// Sparse x sparse goes through a dedicated entry-merge multiply;
    /// any mix with a dense operand promotes the sparse side to dense
    /// first.
    pub fn multiply(&self, other: &Block) -> Result<Block, EngineError> {
        if self.cols() != other.rows() {
            return Err(EngineError::DimensionMismatch {
                op: "block multiply",
                left: self.shape(),
                right: other.shape(),
            });
        }
        match (self, other) {
            (Block::Sparse { entries: a, .. }, Block::Sparse { entries: b, .. }) => {
                let m = self.rows();
                let n = other.cols();
                // index the right operand by row so each left entry joins
                // only the rows it actually hits
                let mut by_row: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
                for &(k, j, v) in b {
                    by_row.entry(k).or_default().push((j, v));
                }
                let mut product = vec![0.0; m * n];
                for &(i, k, va) in a {
                    if let Some(row) = by_row.get(&k) {
                        for &(j, vb) in row {
                            product[j * m + i] += va * vb;
                        }
                    }
                }
                Ok(density_encode(&product, m, n))
            }
            _ => Ok(Block::Dense(self.to_dense().dot(&other.to_dense()))),
        }
    }
}

/// Choose the storage encoding for a column-major value buffer.
///
/// The buffer is stored dense when the fraction of strictly positive
/// cells exceeds [`DENSITY_THRESHOLD`], sparse otherwise. The
/// occupancy test counts `value > 0` cells, not nonzero cells, so a
/// buffer with heavy negative mass still encodes as sparse; callers
/// depend on this exact predicate.
pub fn density_encode(values: &[f64], rows: usize, cols: usize) -> Block {
    debug_assert_eq!(values.len(), rows * cols);
    let positive = values.iter().filter(|&&v| v > 0.0).count();
    let occupancy = if values.is_empty() {
        0.0
    } else {
        positive as f64 / values.len() as f64
    };
    if occupancy > DENSITY_THRESHOLD {
        let dense = Array2::from_shape_vec((rows, cols).f(), values.to_vec())
            .expect("value buffer matches block shape");
        Block::Dense(dense)
    } else {
        let mut entries = Vec::new();
        for c in 0..cols {
            for r in 0..rows {
                let v = values[c * rows + r];
                if v != 0.0 {
                    entries.push((r, c, v));
                }
            }
        }
        Block::Sparse {
            rows,
            cols,
            entries,
        }
    }
}
