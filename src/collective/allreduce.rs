use crate::buffer::TensorBuffer;
use crate::collective::{AllGather, Collective, GatherFn, ReduceFn, ScatterReduce};
use crate::config::LockstepConfig;
use crate::error::Result;
use crate::types::Rank;

/// All-reduce as reduce-then-broadcast: a scatter-reduce hands each rank
/// one reduced part, an all-gather reassembles the full reduced buffer on
/// every rank. Avoids the O(N²) pairwise exchange of a naive all-to-all.
///
/// The inner all-gather skips its entry barrier: a rank only leaves the
/// scatter-reduce once its own part index is complete, and the gather's
/// publish/arrival counting provides the remaining ordering.
pub struct AllReduce {
    scatter: ScatterReduce,
    gather: AllGather,
}

impl AllReduce {
    pub fn new(
        world_size: usize,
        reduce: impl ReduceFn + 'static,
        gather: impl GatherFn + 'static,
    ) -> Self {
        Self {
            scatter: ScatterReduce::new(world_size, reduce),
            gather: AllGather::new(world_size, gather, false),
        }
    }

    /// Replace the default timeouts on both stages.
    pub fn with_config(mut self, config: LockstepConfig) -> Self {
        self.scatter = self.scatter.with_config(config.clone());
        self.gather = self.gather.with_config(config);
        self
    }

    pub fn world_size(&self) -> usize {
        self.scatter.world_size()
    }

    /// Reduce all ranks' buffers element-wise and return the full result,
    /// reshaped to the input buffer's shape, to every rank.
    pub fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        let shape = buffer.shape().to_vec();
        let part = self.scatter.apply(buffer, rank)?;
        let full = self.gather.apply(part, rank)?;
        full.reshape(shape)
    }
}

impl Collective for AllReduce {
    fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        AllReduce::apply(self, buffer, rank)
    }
}
