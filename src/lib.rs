//! # blockgrid
//!
//! A block-partitioned matrix engine: matrices too large for one
//! machine are cut into fixed-size rectangular tiles, each tile stored
//! as a dense or sparse local block, and the tiles sharded across
//! worker partitions of an in-process dataflow layer. On top of the
//! tiled representation the engine provides scalar scaling, aligned
//! and misaligned elementwise addition, block matrix multiplication,
//! re-tiling between block grids, and distributed top-k extraction.
//!
//! ```
//! use blockgrid::{BlockMatrix, EngineConfig};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), blockgrid::EngineError> {
//! let config = EngineConfig::new(3, 3).with_partitions(4);
//! let local = Array2::from_shape_fn((6, 6), |(i, j)| (i * 6 + j + 1) as f64);
//! let m = BlockMatrix::from_dense(&local, &config)?;
//! let doubled = m.add(&m)?;
//! assert_eq!(doubled.to_local()?, &local * 2.0);
//! # Ok(())
//! # }
//! ```

pub mod arithmetic;
pub mod block;
pub mod config;
pub mod dataflow;
pub mod error;
pub mod matrix;
pub mod partitioner;
pub mod repartition;
pub mod topk;

pub use block::{density_encode, Block, BlockCoord};
pub use config::EngineConfig;
pub use dataflow::{KeyedVec, Partitioner};
pub use error::EngineError;
pub use matrix::BlockMatrix;
pub use partitioner::GridPartitioner;
pub use topk::RankedEntry;

use log::LevelFilter;

/// Initialize console logging at `Info`. Safe to call more than once;
/// later calls are ignored.
pub fn init_logging() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// One power-iteration-style step over a small transition matrix,
    /// exercising the factory, multiply, scale, and top-k together.
    #[test]
    fn test_end_to_end_ranking_step() {
        init_logging();
        let config = EngineConfig::new(2, 2).with_partitions(2);
        // a 4-node cycle with one shortcut out of node 0
        let edges = vec![
            (0, 1, 1.0),
            (0, 2, 1.0),
            (1, 2, 1.0),
            (2, 3, 1.0),
            (3, 0, 1.0),
        ];
        let transition = BlockMatrix::from_edges(edges, &config).unwrap().cache();
        transition.validate().unwrap();

        let squared = transition.multiply(&transition).unwrap();
        let expected = transition
            .to_local()
            .unwrap()
            .dot(&transition.to_local().unwrap());
        assert_eq!(squared.to_local().unwrap(), expected);

        let damped = squared.scale(0.85);
        let top = damped.top_k(1);
        assert_eq!(top.len(), 1);
        let local = damped.to_local().unwrap();
        let max = local.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(top[0].value, max);
    }

    #[test]
    fn test_transpose_round_trip_through_operations() {
        let config = EngineConfig::new(2, 3).with_partitions(2);
        let local = Array2::from_shape_fn((4, 6), |(i, j)| (i * 6 + j) as f64 - 11.0);
        let m = BlockMatrix::from_dense(&local, &config).unwrap();
        let back = m.transpose().transpose();
        assert_eq!(back.to_local().unwrap(), local);
    }
}
