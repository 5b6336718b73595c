//! # Block Matrix
//!
//! The tiled matrix abstraction: a logical `num_rows x num_cols`
//! matrix cut into `rows_per_block x cols_per_block` tiles, each tile
//! stored as a local [`Block`] and the tiles sharded across worker
//! partitions. A `BlockMatrix` is an immutable handle; every operation
//! returns a new handle and never mutates in place.

use std::collections::HashMap;
use std::sync::OnceLock;

use log::{debug, info};
use ndarray::Array2;

use crate::block::{density_encode, Block, BlockCoord};
use crate::config::EngineConfig;
use crate::dataflow::KeyedVec;
use crate::error::EngineError;
use crate::partitioner::GridPartitioner;
use crate::topk::RankedEntry;

/// Largest row count, column count, or entry count a single-host
/// materialization may have.
pub const MAX_LOCAL_DIM: usize = i32::MAX as usize;

/// Distributed block-partitioned matrix
#[derive(Debug, Clone)]
pub struct BlockMatrix {
    rows_per_block: usize,
    cols_per_block: usize,
    blocks: KeyedVec<BlockCoord, Block>,
    /// Global dimensions; set eagerly when declared at construction,
    /// otherwise inferred from the blocks at most once.
    dims: OnceLock<(usize, usize)>,
}

impl BlockMatrix {
    /// Wrap a block collection; global dimensions are inferred lazily
    /// from the blocks on first use.
    pub fn new(
        blocks: KeyedVec<BlockCoord, Block>,
        rows_per_block: usize,
        cols_per_block: usize,
    ) -> Result<Self, EngineError> {
        check_tile(rows_per_block, cols_per_block)?;
        Ok(Self {
            rows_per_block,
            cols_per_block,
            blocks,
            dims: OnceLock::new(),
        })
    }

    /// Wrap a block collection with declared global dimensions.
    pub fn with_dims(
        blocks: KeyedVec<BlockCoord, Block>,
        rows_per_block: usize,
        cols_per_block: usize,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<Self, EngineError> {
        check_tile(rows_per_block, cols_per_block)?;
        let dims = OnceLock::new();
        let _ = dims.set((num_rows, num_cols));
        Ok(Self {
            rows_per_block,
            cols_per_block,
            blocks,
            dims,
        })
    }

    pub(crate) fn assemble(
        blocks: KeyedVec<BlockCoord, Block>,
        rows_per_block: usize,
        cols_per_block: usize,
        dims: OnceLock<(usize, usize)>,
    ) -> Self {
        Self {
            rows_per_block,
            cols_per_block,
            blocks,
            dims,
        }
    }

    pub fn rows_per_block(&self) -> usize {
        self.rows_per_block
    }

    pub fn cols_per_block(&self) -> usize {
        self.cols_per_block
    }

    pub fn blocks(&self) -> &KeyedVec<BlockCoord, Block> {
        &self.blocks
    }

    fn dims(&self) -> (usize, usize) {
        *self.dims.get_or_init(|| {
            let (rows, cols) = self.blocks.collect().into_iter().fold(
                (0usize, 0usize),
                |(rows, cols), (coord, block)| {
                    (
                        rows.max(coord.row * self.rows_per_block + block.rows()),
                        cols.max(coord.col * self.cols_per_block + block.cols()),
                    )
                },
            );
            debug!("Inferred global dimensions {}x{}", rows, cols);
            (rows, cols)
        })
    }

    pub fn n_rows(&self) -> usize {
        self.dims().0
    }

    pub fn n_cols(&self) -> usize {
        self.dims().1
    }

    pub fn row_block_count(&self) -> usize {
        let rows = self.n_rows();
        (rows + self.rows_per_block - 1) / self.rows_per_block
    }

    pub fn col_block_count(&self) -> usize {
        let cols = self.n_cols();
        (cols + self.cols_per_block - 1) / self.cols_per_block
    }

    /// Partitioner matching this matrix's block grid.
    pub(crate) fn grid_partitioner(&self) -> Result<GridPartitioner, EngineError> {
        GridPartitioner::new(
            self.row_block_count().max(1),
            self.col_block_count().max(1),
            self.blocks.partition_count().max(1),
        )
    }

    /// Eagerly check the structural invariants: unique block
    /// coordinates, and every block shaped by the edge rule. Not run
    /// implicitly by other operations.
    pub fn validate(&self) -> Result<(), EngineError> {
        let (num_rows, num_cols) = self.dims();
        let row_blocks = self.row_block_count();
        let col_blocks = self.col_block_count();
        let grouped = self.blocks.group_by_key(&self.grid_partitioner()?);
        for (coord, group) in grouped.collect() {
            if group.len() > 1 {
                return Err(EngineError::Structural(format!(
                    "found {} blocks at coordinate {}",
                    group.len(),
                    coord
                )));
            }
            if coord.row >= row_blocks || coord.col >= col_blocks {
                return Err(EngineError::Structural(format!(
                    "block {} lies outside the {}x{} block grid of a {}x{} matrix",
                    coord, row_blocks, col_blocks, num_rows, num_cols
                )));
            }
            let block = &group[0];
            let last_rows = num_rows - (row_blocks - 1) * self.rows_per_block;
            let last_cols = num_cols - (col_blocks - 1) * self.cols_per_block;
            if coord.row + 1 < row_blocks && block.rows() != self.rows_per_block {
                return Err(EngineError::Structural(format!(
                    "block {} has {} rows, interior blocks must have exactly {}",
                    coord,
                    block.rows(),
                    self.rows_per_block
                )));
            }
            if coord.row + 1 == row_blocks && (block.rows() == 0 || block.rows() > last_rows) {
                return Err(EngineError::Structural(format!(
                    "block {} has {} rows, blocks on the last block-row must have between 1 and {}",
                    coord,
                    block.rows(),
                    last_rows
                )));
            }
            if coord.col + 1 < col_blocks && block.cols() != self.cols_per_block {
                return Err(EngineError::Structural(format!(
                    "block {} has {} columns, interior blocks must have exactly {}",
                    coord,
                    block.cols(),
                    self.cols_per_block
                )));
            }
            if coord.col + 1 == col_blocks && (block.cols() == 0 || block.cols() > last_cols) {
                return Err(EngineError::Structural(format!(
                    "block {} has {} columns, blocks on the last block-column must have between 1 and {}",
                    coord,
                    block.cols(),
                    last_cols
                )));
            }
        }
        Ok(())
    }

    /// Relabel every block, transpose it locally, and swap the tiling
    /// scheme and global dimensions. No data moves between blocks.
    pub fn transpose(&self) -> BlockMatrix {
        let (rows, cols) = self.dims();
        let blocks = self
            .blocks
            .map(|coord, block| (coord.transposed(), block.transpose()));
        let dims = OnceLock::new();
        let _ = dims.set((cols, rows));
        Self::assemble(blocks, self.cols_per_block, self.rows_per_block, dims)
    }

    /// Multiply every entry by `alpha`.
    pub fn scale(&self, alpha: f64) -> BlockMatrix {
        let blocks = self.blocks.map(|coord, block| (*coord, block.scale(alpha)));
        Self::assemble(
            blocks,
            self.rows_per_block,
            self.cols_per_block,
            self.dims.clone(),
        )
    }

    pub fn cache(&self) -> BlockMatrix {
        Self::assemble(
            self.blocks.cache(),
            self.rows_per_block,
            self.cols_per_block,
            self.dims.clone(),
        )
    }

    pub fn persist(&self) -> BlockMatrix {
        self.cache()
    }

    /// Re-tile to a new block size. See [`crate::repartition`].
    pub fn repartition(
        &self,
        rows_per_block: usize,
        cols_per_block: usize,
    ) -> Result<BlockMatrix, EngineError> {
        crate::repartition::repartition(self, rows_per_block, cols_per_block)
    }

    /// Elementwise sum, tiled at this matrix's block size.
    pub fn add(&self, other: &BlockMatrix) -> Result<BlockMatrix, EngineError> {
        crate::arithmetic::add(self, other, self.rows_per_block, self.cols_per_block)
    }

    /// Elementwise sum, tiled at an explicit target block size.
    pub fn add_with_tile(
        &self,
        other: &BlockMatrix,
        rows_per_block: usize,
        cols_per_block: usize,
    ) -> Result<BlockMatrix, EngineError> {
        crate::arithmetic::add(self, other, rows_per_block, cols_per_block)
    }

    /// Block matrix product. See [`crate::arithmetic`].
    pub fn multiply(&self, other: &BlockMatrix) -> Result<BlockMatrix, EngineError> {
        crate::arithmetic::multiply(self, other)
    }

    /// The `k` largest entries with their global coordinates.
    pub fn top_k(&self, k: usize) -> Vec<RankedEntry> {
        crate::topk::top_k(self, k)
    }

    /// Materialize the whole matrix on the calling host.
    ///
    /// Fails up front when the dimensions or entry count exceed what a
    /// single host can address; invoking it on such a matrix is a
    /// caller error, not a recoverable condition.
    pub fn to_local(&self) -> Result<Array2<f64>, EngineError> {
        let (rows, cols) = self.dims();
        if rows > MAX_LOCAL_DIM || cols > MAX_LOCAL_DIM {
            return Err(EngineError::Capacity(format!(
                "{}x{} exceeds the single-host dimension limit {}",
                rows, cols, MAX_LOCAL_DIM
            )));
        }
        match rows.checked_mul(cols) {
            Some(entries) if entries <= MAX_LOCAL_DIM => {}
            _ => {
                return Err(EngineError::Capacity(format!(
                    "{}x{} entries exceed the single-host entry limit {}",
                    rows, cols, MAX_LOCAL_DIM
                )))
            }
        }
        let mut local = Array2::zeros((rows, cols));
        for (coord, block) in self.blocks.collect() {
            let row_offset = coord.row * self.rows_per_block;
            let col_offset = coord.col * self.cols_per_block;
            if row_offset + block.rows() > rows || col_offset + block.cols() > cols {
                return Err(EngineError::Structural(format!(
                    "block {} extends past the {}x{} global bound",
                    coord, rows, cols
                )));
            }
            for ((i, j), &v) in block.to_dense().indexed_iter() {
                local[[row_offset + i, col_offset + j]] = v;
            }
        }
        Ok(local)
    }

    /// Tile a collection of `(row, col, value)` entries. Entries
    /// landing on the same cell are summed. Dimensions are taken from
    /// the largest indices seen.
    pub fn from_entries(
        entries: Vec<(usize, usize, f64)>,
        config: &EngineConfig,
    ) -> Result<BlockMatrix, EngineError> {
        let dims = entries
            .iter()
            .fold((0usize, 0usize), |(rows, cols), &(i, j, _)| {
                (rows.max(i + 1), cols.max(j + 1))
            });
        Self::build_from_entries(entries, config, dims)
    }

    /// Tile entries into a matrix of declared dimensions.
    pub fn from_entries_with_dims(
        entries: Vec<(usize, usize, f64)>,
        config: &EngineConfig,
        num_rows: usize,
        num_cols: usize,
    ) -> Result<BlockMatrix, EngineError> {
        if let Some(&(i, j, _)) = entries
            .iter()
            .find(|&&(i, j, _)| i >= num_rows || j >= num_cols)
        {
            return Err(EngineError::Structural(format!(
                "entry at ({}, {}) lies outside the declared {}x{} bound",
                i, j, num_rows, num_cols
            )));
        }
        Self::build_from_entries(entries, config, (num_rows, num_cols))
    }

    /// Build a stochastic transition matrix from weighted edges:
    /// each source row's outgoing weights are divided by that row's
    /// out-degree before tiling. Used for iterative computations such
    /// as power-iteration ranking.
    pub fn from_edges(
        edges: Vec<(usize, usize, f64)>,
        config: &EngineConfig,
    ) -> Result<BlockMatrix, EngineError> {
        let mut out_degree: HashMap<usize, usize> = HashMap::new();
        for &(src, _, _) in &edges {
            *out_degree.entry(src).or_insert(0) += 1;
        }
        let normalized = edges
            .into_iter()
            .map(|(src, dst, weight)| (src, dst, weight / out_degree[&src] as f64))
            .collect();
        Self::from_entries(normalized, config)
    }

    /// Tile a local dense matrix; zero cells are left out of the entry
    /// stream so mostly-empty tiles encode sparse.
    pub fn from_dense(local: &Array2<f64>, config: &EngineConfig) -> Result<BlockMatrix, EngineError> {
        let entries = local
            .indexed_iter()
            .filter(|&(_, &v)| v != 0.0)
            .map(|((i, j), &v)| (i, j, v))
            .collect();
        Self::build_from_entries(entries, config, local.dim())
    }

    fn build_from_entries(
        entries: Vec<(usize, usize, f64)>,
        config: &EngineConfig,
        (num_rows, num_cols): (usize, usize),
    ) -> Result<BlockMatrix, EngineError> {
        config.validate()?;
        let rpb = config.rows_per_block;
        let cpb = config.cols_per_block;
        let row_blocks = (num_rows + rpb - 1) / rpb;
        let col_blocks = (num_cols + cpb - 1) / cpb;
        let block_shape = |coord: BlockCoord| {
            let rows = if coord.row + 1 == row_blocks {
                num_rows - coord.row * rpb
            } else {
                rpb
            };
            let cols = if coord.col + 1 == col_blocks {
                num_cols - coord.col * cpb
            } else {
                cpb
            };
            (rows, cols)
        };

        let entry_count = entries.len();
        let mut buffers: HashMap<BlockCoord, Vec<f64>> = HashMap::new();
        for (i, j, v) in entries {
            let coord = BlockCoord::new(i / rpb, j / cpb);
            let (brows, bcols) = block_shape(coord);
            let buffer = buffers
                .entry(coord)
                .or_insert_with(|| vec![0.0; brows * bcols]);
            buffer[(j - coord.col * cpb) * brows + (i - coord.row * rpb)] += v;
        }
        let pairs: Vec<(BlockCoord, Block)> = buffers
            .into_iter()
            .map(|(coord, buffer)| {
                let (brows, bcols) = block_shape(coord);
                (coord, density_encode(&buffer, brows, bcols))
            })
            .collect();
        info!(
            "Tiled {} entries into {} blocks on a {}x{} block grid",
            entry_count,
            pairs.len(),
            row_blocks,
            col_blocks
        );
        let blocks = KeyedVec::from_pairs(pairs, config.suggested_partitions, config.parallel);
        Self::with_dims(blocks, rpb, cpb, num_rows, num_cols)
    }
}

fn check_tile(rows_per_block: usize, cols_per_block: usize) -> Result<(), EngineError> {
    if rows_per_block == 0 || cols_per_block == 0 {
        return Err(EngineError::Configuration(format!(
            "tile dimensions must be positive, got {}x{}",
            rows_per_block, cols_per_block
        )));
    }
    Ok(())
}
