use crate::types::{DataType, Rank};

pub type Result<T> = std::result::Result<T, LockstepError>;

/// Errors produced by collective operations.
///
/// The enum is `Clone` so a single failure on the authoritative rank can be
/// recorded once and delivered to every rank's output slot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LockstepError {
    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: usize },

    #[error("{operation}: rank {rank} contributed twice in one round")]
    DuplicateContribution {
        operation: &'static str,
        rank: Rank,
    },

    #[error("{operation}: peers did not reach the rendezvous within {timeout_ms}ms")]
    RendezvousTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("{operation}: round did not complete within {timeout_ms}ms (a peer may have crashed)")]
    RoundIncomplete {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("{operation} combine function failed: {reason}")]
    CombineFailed {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation}: combine returned {actual} buffers, expected {expected}")]
    ArityMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("data type mismatch: expected {expected}, got {actual}")]
    DTypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("shape {shape:?} does not hold {elements} elements")]
    ShapeMismatch {
        shape: Vec<usize>,
        elements: usize,
    },

    #[error("axis {axis} out of range for shape {shape:?}")]
    AxisOutOfRange { axis: usize, shape: Vec<usize> },

    #[error("{operation} requires at least one buffer")]
    EmptyBufferSet { operation: &'static str },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl LockstepError {
    /// Create a `CombineFailed` error from any displayable failure.
    pub fn combine_failed(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::CombineFailed {
            operation,
            reason: reason.to_string(),
        }
    }
}
