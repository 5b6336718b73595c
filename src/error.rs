//! # Engine Errors
//!
//! Failure taxonomy for block matrix construction and distributed
//! block operations. Every variant is fatal: the transformations are
//! deterministic, so retrying the same inputs would reproduce the
//! same failure.

use std::error::Error;
use std::fmt;

/// Errors surfaced by block matrix construction and operations
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Non-positive tile dimension or zero partition count, caught
    /// eagerly at construction
    Configuration(String),
    /// Operand dimensions incompatible for add/multiply
    DimensionMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    /// Duplicate block coordinate or a block whose local shape violates
    /// the tiling rules
    Structural(String),
    /// A single-host materialization whose row, column, or entry count
    /// exceeds the addressable range of one machine
    Capacity(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            EngineError::DimensionMismatch { op, left, right } => write!(
                f,
                "Dimension mismatch in {}: left is {}x{}, right is {}x{}",
                op, left.0, left.1, right.0, right.1
            ),
            EngineError::Structural(msg) => write!(f, "Structural error: {}", msg),
            EngineError::Capacity(msg) => write!(f, "Capacity exceeded: {}", msg),
        }
    }
}

impl Error for EngineError {}
