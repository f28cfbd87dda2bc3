//! Collective operations over `world_size` cooperating worker threads.
//!
//! Every operation is a long-lived shared instance: construct it once,
//! hand an `Arc` to each worker, and have every rank call `apply` at the
//! same logical point of its computation, once per round. The instance
//! resets itself between rounds; nothing ties a rank to a particular OS
//! thread across rounds.

mod allgather;
mod allreduce;
mod native;
mod operation;
mod scatter_reduce;

pub use allgather::{AllGather, ConcatGather, GatherFn};
pub use allreduce::AllReduce;
pub use native::{HostBackend, NativeAllGather, NativeAllReduce, NativeBackend};
pub use operation::{CollectiveOperation, CombineFn};
pub use scatter_reduce::{ElementwiseReduce, ReduceFn, ScatterReduce};

use crate::buffer::TensorBuffer;
use crate::error::{LockstepError, Result};
use crate::types::Rank;

/// The common contract of every collective variant: apply a collective to
/// one rank's local buffer and return that rank's share of the result.
///
/// Callers must invoke `apply` concurrently from `world_size` distinct
/// threads, each with its own rank in `[0, world_size)`, exactly once per
/// round. Calling with fewer ranks stalls the round until the configured
/// timeout fires on the ranks that did call.
pub trait Collective: Send + Sync {
    fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer>;
}

pub(crate) fn check_rank(rank: Rank, world_size: usize) -> Result<()> {
    if rank >= world_size {
        return Err(LockstepError::InvalidRank { rank, world_size });
    }
    Ok(())
}
