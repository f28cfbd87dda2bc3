use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{trace, warn};

use crate::buffer::TensorBuffer;
use crate::collective::{check_rank, Collective};
use crate::config::LockstepConfig;
use crate::error::{LockstepError, Result};
use crate::sync::{ReadySignal, Rendezvous, WaitError};
use crate::types::Rank;

const OPERATION: &str = "all_gather";

/// A user-supplied assembly function: builds the full result from the
/// ordered per-rank contributions.
///
/// Every rank runs it independently over the same inputs, so it must be
/// deterministic and side-effect-free.
pub trait GatherFn: Send + Sync {
    fn gather(&self, parts: Vec<TensorBuffer>, rank: Rank) -> Result<TensorBuffer>;
}

impl<F> GatherFn for F
where
    F: Fn(Vec<TensorBuffer>, Rank) -> Result<TensorBuffer> + Send + Sync,
{
    fn gather(&self, parts: Vec<TensorBuffer>, rank: Rank) -> Result<TensorBuffer> {
        self(parts, rank)
    }
}

/// Stock rank-order concatenation along the flattened element sequence.
pub struct ConcatGather;

impl GatherFn for ConcatGather {
    fn gather(&self, parts: Vec<TensorBuffer>, _rank: Rank) -> Result<TensorBuffer> {
        TensorBuffer::concat(&parts)
    }
}

struct GatherState {
    slots: Vec<Option<TensorBuffer>>,
    arrivals: Vec<Rank>,
}

/// All-gather: every rank publishes its buffer and receives the assembly of
/// all `world_size` buffers in rank order.
///
/// Cleanup follows the last-one-out rule: an explicit departure counter
/// identifies the final rank to finish assembling, and only that rank
/// resets the shared slots, arrival list, and readiness signal. Everyone
/// else must not touch shared state on the way out, so no rank can reset
/// while a peer is still reading.
pub struct AllGather {
    world_size: usize,
    gather: Box<dyn GatherFn>,
    use_barrier: bool,
    entry: Rendezvous,
    state: Mutex<GatherState>,
    ready: ReadySignal,
    departures: AtomicUsize,
    config: LockstepConfig,
}

impl AllGather {
    /// `use_barrier` controls whether ranks rendezvous before publishing.
    ///
    /// Pass `false` only when the caller already orders rounds — e.g.
    /// immediately after a scatter-reduce, whose per-index signals guarantee
    /// no rank can lap the group. A bare instance reused across rounds
    /// without the barrier may see round N+1 publications race the round N
    /// reset.
    pub fn new(world_size: usize, gather: impl GatherFn + 'static, use_barrier: bool) -> Self {
        assert!(world_size > 0, "world size must be at least 1");
        Self {
            world_size,
            gather: Box::new(gather),
            use_barrier,
            entry: Rendezvous::new(world_size),
            state: Mutex::new(GatherState {
                slots: (0..world_size).map(|_| None).collect(),
                arrivals: Vec::with_capacity(world_size),
            }),
            ready: ReadySignal::new(),
            departures: AtomicUsize::new(0),
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

    /// Publish this rank's buffer and receive the assembled result.
    pub fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        check_rank(rank, self.world_size)?;

        if self.use_barrier {
            self.entry
                .wait(self.config.rendezvous_timeout)
                .map_err(|e| match e {
                    WaitError::Timeout => {
                        let timeout_ms = self.config.rendezvous_timeout.as_millis() as u64;
                        warn!(rank, operation = OPERATION, timeout_ms, "entry rendezvous timed out");
                        LockstepError::RendezvousTimeout {
                            operation: OPERATION,
                            timeout_ms,
                        }
                    }
                    WaitError::Poisoned => LockstepError::LockPoisoned("rendezvous"),
                })?;
        }

        self.publish(buffer, rank)?;

        if let Err(e) = self.ready.wait(self.config.round_timeout) {
            // Failed round: withdraw our own contribution so the instance
            // is not left holding stale state.
            self.withdraw(rank);
            return Err(match e {
                WaitError::Timeout => {
                    let timeout_ms = self.config.round_timeout.as_millis() as u64;
                    warn!(rank, operation = OPERATION, timeout_ms, "gather never completed");
                    LockstepError::RoundIncomplete {
                        operation: OPERATION,
                        timeout_ms,
                    }
                }
                WaitError::Poisoned => LockstepError::LockPoisoned("gather signal"),
            });
        }

        let parts = self.snapshot()?;
        let result = self.gather.gather(parts, rank);
        self.depart();
        result
    }

    fn publish(&self, buffer: TensorBuffer, rank: Rank) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| LockstepError::LockPoisoned("gather slots"))?;
        if state.slots[rank].is_some() {
            return Err(LockstepError::DuplicateContribution {
                operation: OPERATION,
                rank,
            });
        }
        state.slots[rank] = Some(buffer);
        state.arrivals.push(rank);
        if state.arrivals.len() == self.world_size {
            trace!(operation = OPERATION, arrivals = ?state.arrivals, "all ranks published");
            self.ready.set();
        }
        Ok(())
    }

    /// Clone the full slot array in rank order. Each rank assembles from
    /// its own copy, so no reader outlives the shared state.
    fn snapshot(&self) -> Result<Vec<TensorBuffer>> {
        let state = self
            .state
            .lock()
            .map_err(|_| LockstepError::LockPoisoned("gather slots"))?;
        let parts: Option<Vec<TensorBuffer>> = state.slots.iter().cloned().collect();
        parts.ok_or_else(|| LockstepError::CombineFailed {
            operation: OPERATION,
            reason: "gather signaled ready with a missing contribution".into(),
        })
    }

    fn withdraw(&self, rank: Rank) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.slots[rank] = None;
        state.arrivals.retain(|r| *r != rank);
    }

    fn depart(&self) {
        if self.departures.fetch_add(1, Ordering::SeqCst) + 1 == self.world_size {
            // Last one out resets everything for the next round.
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for slot in state.slots.iter_mut() {
                *slot = None;
            }
            state.arrivals.clear();
            drop(state);
            self.ready.reset();
            self.departures.store(0, Ordering::SeqCst);
            trace!(operation = OPERATION, "round state reset");
        }
    }
}

impl Collective for AllGather {
    fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        AllGather::apply(self, buffer, rank)
    }
}
