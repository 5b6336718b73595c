//! Engine configuration: default tiling scheme and execution knobs
//! for matrices built from raw coordinate entries.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Configuration for building and operating on block matrices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Nominal rows per tile
    pub rows_per_block: usize,
    /// Nominal columns per tile
    pub cols_per_block: usize,
    /// Suggested number of worker partitions for shuffles
    pub suggested_partitions: usize,
    /// Whether per-partition work runs on the rayon pool
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rows_per_block: 1024,
            cols_per_block: 1024,
            suggested_partitions: 8,
            parallel: true,
        }
    }
}

impl EngineConfig {
    pub fn new(rows_per_block: usize, cols_per_block: usize) -> Self {
        Self {
            rows_per_block,
            cols_per_block,
            ..Self::default()
        }
    }

    pub fn with_partitions(mut self, suggested_partitions: usize) -> Self {
        self.suggested_partitions = suggested_partitions;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Tile dimensions and partition count must be positive.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.rows_per_block == 0 || self.cols_per_block == 0 {
            return Err(EngineError::Configuration(format!(
                "tile dimensions must be positive, got {}x{}",
                self.rows_per_block, self.cols_per_block
            )));
        }
        if self.suggested_partitions == 0 {
            return Err(EngineError::Configuration(
                "suggested partition count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
