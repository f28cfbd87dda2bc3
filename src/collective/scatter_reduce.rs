use std::sync::{Mutex, PoisonError};

use tracing::warn;

use crate::buffer::TensorBuffer;
use crate::collective::{check_rank, Collective};
use crate::config::LockstepConfig;
use crate::error::{LockstepError, Result};
use crate::sync::{ReadySignal, WaitError};
use crate::types::{Rank, ReduceOp};

const OPERATION: &str = "scatter_reduce";

/// A user-supplied reduction: folds the `world_size` same-index parts into
/// the single reduced part owned by rank `index`.
pub trait ReduceFn: Send + Sync {
    fn reduce(&self, parts: Vec<TensorBuffer>, index: usize) -> Result<TensorBuffer>;
}

impl<F> ReduceFn for F
where
    F: Fn(Vec<TensorBuffer>, usize) -> Result<TensorBuffer> + Send + Sync,
{
    fn reduce(&self, parts: Vec<TensorBuffer>, index: usize) -> Result<TensorBuffer> {
        self(parts, index)
    }
}

/// Stock element-wise reduction over the parts.
pub struct ElementwiseReduce(pub ReduceOp);

impl ReduceFn for ElementwiseReduce {
    fn reduce(&self, parts: Vec<TensorBuffer>, _index: usize) -> Result<TensorBuffer> {
        TensorBuffer::reduce_parts(parts, self.0)
    }
}

/// Rank-indexed slots for one part index, plus the signal that fires when
/// the last contribution lands.
struct ChunkState {
    slots: Mutex<ChunkSlots>,
    ready: ReadySignal,
}

struct ChunkSlots {
    parts: Vec<Option<TensorBuffer>>,
    filled: usize,
}

/// Scatter-reduce: each rank splits its buffer into `world_size` contiguous
/// parts; the parts at index `i` from every rank are reduced into one part
/// returned to rank `i`.
///
/// Counts not divisible by `world_size` follow the split rule of
/// [`TensorBuffer::split_parts`]: the first `count % world_size` parts get
/// one extra element.
///
/// There is no global barrier — ordering is per part index, via one
/// readiness signal each, so ranks may move through different indices at
/// different speeds. On exit the calling rank drains and resets only its
/// own index, which makes the instance reusable as soon as every rank has
/// retrieved its part.
pub struct ScatterReduce {
    world_size: usize,
    reduce: Box<dyn ReduceFn>,
    chunks: Vec<ChunkState>,
    config: LockstepConfig,
}

impl ScatterReduce {
    pub fn new(world_size: usize, reduce: impl ReduceFn + 'static) -> Self {
        assert!(world_size > 0, "world size must be at least 1");
        Self {
            world_size,
            reduce: Box::new(reduce),
            chunks: (0..world_size)
                .map(|_| ChunkState {
                    slots: Mutex::new(ChunkSlots {
                        parts: (0..world_size).map(|_| None).collect(),
                        filled: 0,
                    }),
                    ready: ReadySignal::new(),
                })
                .collect(),
            config: LockstepConfig::default(),
        }
    }

    /// Replace the default timeouts.
    pub fn with_config(mut self, config: LockstepConfig) -> Self {
        self.config = config;
        self
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Contribute this rank's buffer and receive the reduced part for its
    /// own rank-numbered index.
    pub fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        check_rank(rank, self.world_size)?;

        for (index, part) in buffer.split_parts(self.world_size).into_iter().enumerate() {
            self.contribute(index, rank, part)?;
        }

        let parts = self.collect_own(rank)?;
        self.reduce.reduce(parts, rank)
    }

    fn contribute(&self, index: usize, rank: Rank, part: TensorBuffer) -> Result<()> {
        let chunk = &self.chunks[index];
        let mut slots = chunk
            .slots
            .lock()
            .map_err(|_| LockstepError::LockPoisoned("chunk slots"))?;
        if slots.parts[rank].is_some() {
            return Err(LockstepError::DuplicateContribution {
                operation: OPERATION,
                rank,
            });
        }
        slots.parts[rank] = Some(part);
        slots.filled += 1;
        if slots.filled == self.world_size {
            chunk.ready.set();
        }
        Ok(())
    }

    /// Wait for the calling rank's own index to fill, then drain and reset
    /// it. Other indices are left untouched — their owners drain them.
    fn collect_own(&self, rank: Rank) -> Result<Vec<TensorBuffer>> {
        let chunk = &self.chunks[rank];

        if let Err(e) = chunk.ready.wait(self.config.round_timeout) {
            // Failed round: still drain our own index so the instance is
            // not left holding stale parts.
            self.reset_own(rank);
            return Err(match e {
                WaitError::Timeout => {
                    let timeout_ms = self.config.round_timeout.as_millis() as u64;
                    warn!(rank, operation = OPERATION, timeout_ms, "chunk never filled");
                    LockstepError::RoundIncomplete {
                        operation: OPERATION,
                        timeout_ms,
                    }
                }
                WaitError::Poisoned => LockstepError::LockPoisoned("chunk signal"),
            });
        }

        let drained: Option<Vec<TensorBuffer>> = {
            let mut slots = chunk
                .slots
                .lock()
                .map_err(|_| LockstepError::LockPoisoned("chunk slots"))?;
            let drained = slots.parts.iter_mut().map(|slot| slot.take()).collect();
            slots.filled = 0;
            drained
        };
        chunk.ready.reset();

        drained.ok_or_else(|| LockstepError::CombineFailed {
            operation: OPERATION,
            reason: "chunk signaled ready with a missing contribution".into(),
        })
    }

    fn reset_own(&self, rank: Rank) {
        let chunk = &self.chunks[rank];
        let mut slots = chunk
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for slot in slots.parts.iter_mut() {
            *slot = None;
        }
        slots.filled = 0;
        drop(slots);
        chunk.ready.reset();
    }
}

impl Collective for ScatterReduce {
    fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        ScatterReduce::apply(self, buffer, rank)
    }
}
