//! # Arithmetic Protocols
//!
//! The distributed combine pipelines: block-aligned elementwise
//! addition, and the replicate-join-reduce multiplication protocol.
//! Operands whose tiling disagrees with the target are re-tiled first
//! (multiplication always adjusts the right operand, never the left),
//! so the combine steps themselves only ever see aligned grids.

use std::time::Instant;

use log::{debug, info};

use crate::block::BlockCoord;
use crate::error::EngineError;
use crate::matrix::BlockMatrix;
use crate::partitioner::GridPartitioner;

/// Elementwise sum of two matrices of equal global dimensions, tiled
/// at `tgt_rows x tgt_cols`.
pub fn add(
    a: &BlockMatrix,
    b: &BlockMatrix,
    tgt_rows: usize,
    tgt_cols: usize,
) -> Result<BlockMatrix, EngineError> {
    let (num_rows, num_cols) = (a.n_rows(), a.n_cols());
    if num_rows != b.n_rows() || num_cols != b.n_cols() {
        return Err(EngineError::DimensionMismatch {
            op: "add",
            left: (num_rows, num_cols),
            right: (b.n_rows(), b.n_cols()),
        });
    }
    let lhs = align(a, tgt_rows, tgt_cols)?;
    let rhs = align(b, tgt_rows, tgt_cols)?;

    let partitioner = lhs.grid_partitioner()?;
    let blocks = lhs
        .blocks()
        .cogroup(rhs.blocks(), &partitioner)
        .try_flat_map(|coord, (left, right)| {
            if left.len() > 1 {
                return Err(EngineError::Structural(format!(
                    "left operand supplies {} blocks at coordinate {}",
                    left.len(),
                    coord
                )));
            }
            if right.len() > 1 {
                return Err(EngineError::Structural(format!(
                    "right operand supplies {} blocks at coordinate {}",
                    right.len(),
                    coord
                )));
            }
            let combined = match (left.first(), right.first()) {
                (Some(lhs), Some(rhs)) => lhs.add(rhs)?,
                (Some(lhs), None) => lhs.clone(),
                (None, Some(rhs)) => rhs.clone(),
                (None, None) => unreachable!("cogroup emitted an empty group"),
            };
            Ok(vec![(*coord, combined)])
        })?;
    BlockMatrix::with_dims(blocks, tgt_rows, tgt_cols, num_rows, num_cols)
}

fn align(m: &BlockMatrix, tgt_rows: usize, tgt_cols: usize) -> Result<BlockMatrix, EngineError> {
    if m.rows_per_block() == tgt_rows && m.cols_per_block() == tgt_cols {
        Ok(m.clone())
    } else {
        m.repartition(tgt_rows, tgt_cols)
    }
}

/// Block matrix product.
///
/// Every left block `(i, k)` is replicated once per result column
/// block `j`, every right block `(k, j)` once per result row block
/// `i`; the replicas are joined on the full `(i, j, k)` triple, local
/// products computed, and partial products sharing `(i, j)` reduced by
/// elementwise sum. Block sum is associative and commutative, so the
/// partials may combine in any order and on any partition.
pub fn multiply(a: &BlockMatrix, b: &BlockMatrix) -> Result<BlockMatrix, EngineError> {
    if a.n_cols() != b.n_rows() {
        return Err(EngineError::DimensionMismatch {
            op: "multiply",
            left: (a.n_rows(), a.n_cols()),
            right: (b.n_rows(), b.n_cols()),
        });
    }
    let started = Instant::now();
    let inner = a.cols_per_block();
    // the join indexes the right operand by the result grid, so it
    // must sit on square inner x inner tiles along both axes
    let rhs = if b.rows_per_block() == inner && b.cols_per_block() == inner {
        b.clone()
    } else {
        info!(
            "Re-tiling right operand from {}x{} to {}x{} blocks for multiply",
            b.rows_per_block(),
            b.cols_per_block(),
            inner,
            inner
        );
        b.repartition(inner, inner)?
    };

    let result_row_blocks = a.row_block_count();
    let result_col_blocks = (b.n_cols() + inner - 1) / inner;
    let partitioner = GridPartitioner::new(
        result_row_blocks.max(1),
        result_col_blocks.max(1),
        a.blocks().partition_count().max(1),
    )?;

    let a_replicated = a.blocks().flat_map(|coord, block| {
        (0..result_col_blocks)
            .map(|j| ((coord.row, j, coord.col), block.clone()))
            .collect()
    });
    let b_replicated = rhs.blocks().flat_map(|coord, block| {
        (0..result_row_blocks)
            .map(|i| ((i, coord.col, coord.row), block.clone()))
            .collect()
    });

    let partials = a_replicated
        .cogroup(&b_replicated, &partitioner)
        .try_flat_map(|&(i, j, k), (left, right)| {
            if left.len() > 1 || right.len() > 1 {
                return Err(EngineError::Structural(format!(
                    "{} blocks joined for partial product ({}, {}) over inner block {}",
                    left.len().max(right.len()),
                    i,
                    j,
                    k
                )));
            }
            match (left.first(), right.first()) {
                (Some(lhs), Some(rhs)) => Ok(vec![(BlockCoord::new(i, j), lhs.multiply(rhs)?)]),
                // the absent side is an implicit zero block
                _ => Ok(Vec::new()),
            }
        })?;
    let blocks = partials.reduce_by_key(&partitioner, |x, y| x.add(&y))?;
    debug!("Multiply completed in {:?}", started.elapsed());
    BlockMatrix::with_dims(
        blocks,
        a.rows_per_block(),
        a.cols_per_block(),
        a.n_rows(),
        b.n_cols(),
    )
}
