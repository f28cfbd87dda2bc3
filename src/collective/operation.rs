use std::sync::{Mutex, PoisonError};

use tracing::{trace, warn};

use crate::buffer::TensorBuffer;
use crate::collective::{check_rank, Collective};
use crate::config::LockstepConfig;
use crate::error::{LockstepError, Result};
use crate::sync::{Rendezvous, WaitError};
use crate::types::Rank;

const OPERATION: &str = "collective";

/// A user-supplied combining function: takes the ordered contributions of
/// all ranks, returns one result buffer per rank.
///
/// Runs exactly once per round, on the authoritative rank only.
pub trait CombineFn<T>: Send + Sync {
    fn combine(&self, inputs: Vec<T>) -> Result<Vec<T>>;
}

impl<T, F> CombineFn<T> for F
where
    F: Fn(Vec<T>) -> Result<Vec<T>> + Send + Sync,
{
    fn combine(&self, inputs: Vec<T>) -> Result<Vec<T>> {
        self(inputs)
    }
}

/// Generic collective: every rank contributes a payload, one designated
/// authoritative rank runs the combining function over all contributions,
/// and each rank receives its own share of the result (or the combine
/// failure, delivered identically to every rank).
///
/// The payload is opaque to the engine; it is only moved, never inspected.
///
/// Round protocol: stage own input → entry rendezvous → authoritative rank
/// combines and publishes → exit rendezvous → take own output → clear own
/// slots. Slot cleanup runs on every exit path past staging, so the
/// instance is immediately reusable — including by a different set of
/// threads on the next round.
pub struct CollectiveOperation<T> {
    world_size: usize,
    authoritative_rank: Rank,
    combine: Box<dyn CombineFn<T>>,
    inputs: Mutex<Vec<Option<T>>>,
    outputs: Mutex<Vec<Option<Result<T>>>>,
    entry: Rendezvous,
    exit: Rendezvous,
    config: LockstepConfig,
}

impl<T: Send> CollectiveOperation<T> {
    /// Create a collective with rank 0 as the authoritative rank.
    pub fn new(world_size: usize, combine: impl CombineFn<T> + 'static) -> Self {
        assert!(world_size > 0, "world size must be at least 1");
        Self {
            world_size,
            authoritative_rank: 0,
            combine: Box::new(combine),
            inputs: Mutex::new((0..world_size).map(|_| None).collect()),
            outputs: Mutex::new((0..world_size).map(|_| None).collect()),
            entry: Rendezvous::new(world_size),
            exit: Rendezvous::new(world_size),
            config: LockstepConfig::default(),
        }
    }

    /// Designate a different rank to run the combining function.
    pub fn with_authoritative_rank(mut self, rank: Rank) -> Self {
        assert!(
            rank < self.world_size,
            "authoritative rank {rank} out of range for world size {}",
            self.world_size
        );
        self.authoritative_rank = rank;
        self
    }

    /// Replace the default timeouts.
    pub fn with_config(mut self, config: LockstepConfig) -> Self {
        self.config = config;
        self
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Contribute this rank's payload and receive its share of the round's
    /// result.
    pub fn apply(&self, buffer: T, rank: Rank) -> Result<T> {
        check_rank(rank, self.world_size)?;
        self.stage_input(buffer, rank)?;
        let result = self.run_round(rank);
        // Guaranteed cleanup: the calling rank's slots are cleared on every
        // exit path, success or failure.
        self.release_slots(rank);
        result
    }

    fn stage_input(&self, buffer: T, rank: Rank) -> Result<()> {
        let mut inputs = self
            .inputs
            .lock()
            .map_err(|_| LockstepError::LockPoisoned("inputs"))?;
        if inputs[rank].is_some() {
            return Err(LockstepError::DuplicateContribution {
                operation: OPERATION,
                rank,
            });
        }
        inputs[rank] = Some(buffer);
        Ok(())
    }

    fn run_round(&self, rank: Rank) -> Result<T> {
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

        if rank == self.authoritative_rank {
            self.combine_and_publish()?;
        }

        // Bounded: if the authoritative rank crashed before publishing, the
        // survivors report the round incomplete instead of hanging.
        self.exit
            .wait(self.config.round_timeout)
            .map_err(|e| match e {
                WaitError::Timeout => {
                    let timeout_ms = self.config.round_timeout.as_millis() as u64;
                    warn!(rank, operation = OPERATION, timeout_ms, "exit rendezvous timed out");
                    LockstepError::RoundIncomplete {
                        operation: OPERATION,
                        timeout_ms,
                    }
                }
                WaitError::Poisoned => LockstepError::LockPoisoned("rendezvous"),
            })?;

        let mut outputs = self
            .outputs
            .lock()
            .map_err(|_| LockstepError::LockPoisoned("outputs"))?;
        outputs[rank]
            .take()
            .ok_or_else(|| LockstepError::CombineFailed {
                operation: OPERATION,
                reason: "no output was published for this rank".into(),
            })?
    }

    /// Runs on the authoritative rank only, after the entry rendezvous has
    /// guaranteed that every slot holds a contribution.
    fn combine_and_publish(&self) -> Result<()> {
        let staged: Option<Vec<T>> = {
            let mut inputs = self
                .inputs
                .lock()
                .map_err(|_| LockstepError::LockPoisoned("inputs"))?;
            inputs.iter_mut().map(|slot| slot.take()).collect()
        };

        let round = match staged {
            Some(bufs) => self.combine.combine(bufs).and_then(|outs| {
                if outs.len() == self.world_size {
                    Ok(outs)
                } else {
                    Err(LockstepError::ArityMismatch {
                        operation: OPERATION,
                        expected: self.world_size,
                        actual: outs.len(),
                    })
                }
            }),
            None => Err(LockstepError::CombineFailed {
                operation: OPERATION,
                reason: "a contribution slot was empty at combine time".into(),
            }),
        };

        let mut outputs = self
            .outputs
            .lock()
            .map_err(|_| LockstepError::LockPoisoned("outputs"))?;
        match round {
            Ok(outs) => {
                trace!(operation = OPERATION, world_size = self.world_size, "combine succeeded");
                for (slot, out) in outputs.iter_mut().zip(outs) {
                    *slot = Some(Ok(out));
                }
            }
            Err(e) => {
                // No partial success: every rank observes the same failure.
                warn!(operation = OPERATION, error = %e, "combine failed, broadcasting to all ranks");
                for slot in outputs.iter_mut() {
                    *slot = Some(Err(e.clone()));
                }
            }
        }
        Ok(())
    }

    fn release_slots(&self, rank: Rank) {
        // Best-effort through poison: a panicking peer must not leave our
        // slots staged for the next round.
        let mut inputs = self
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inputs[rank] = None;
        drop(inputs);

        let mut outputs = self
            .outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outputs[rank] = None;
    }
}

impl Collective for CollectiveOperation<TensorBuffer> {
    fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        CollectiveOperation::apply(self, buffer, rank)
    }
}
