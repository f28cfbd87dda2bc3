//! Blocking synchronization primitives consumed by the collective
//! operations.
//!
//! Both primitives bound every wait: a crashed peer surfaces as a
//! [`WaitError::Timeout`] on the survivors instead of hanging them forever.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Outcome of a bounded wait on a [`Rendezvous`] or [`ReadySignal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("wait timed out")]
    Timeout,
    #[error("synchronization state poisoned")]
    Poisoned,
}

/// Reusable rendezvous barrier: blocks until a fixed number of callers have
/// arrived, then releases them together.
///
/// Reusable across rounds via a generation counter. A caller that times out
/// backs its own arrival out, so the barrier count stays consistent for the
/// peers that are still waiting.
pub struct Rendezvous {
    world_size: usize,
    state: Mutex<RendezvousState>,
    cv: Condvar,
}

struct RendezvousState {
    arrived: usize,
    generation: u64,
}

impl Rendezvous {
    pub fn new(world_size: usize) -> Self {
        assert!(world_size > 0, "rendezvous needs at least one participant");
        Self {
            world_size,
            state: Mutex::new(RendezvousState {
                arrived: 0,
                generation: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Block until `world_size` callers (including this one) have arrived.
    ///
    /// The last arrival releases everyone and advances the generation, which
    /// makes the barrier immediately reusable for the next round.
    pub fn wait(&self, timeout: Duration) -> Result<(), WaitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().map_err(|_| WaitError::Poisoned)?;
        let generation = state.generation;

        state.arrived += 1;
        if state.arrived == self.world_size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cv.notify_all();
            return Ok(());
        }

        while state.generation == generation {
            let now = Instant::now();
            if now >= deadline {
                // Withdraw our arrival so the count is not corrupted for
                // whoever is still waiting.
                state.arrived -= 1;
                return Err(WaitError::Timeout);
            }
            state = self
                .cv
                .wait_timeout(state, deadline - now)
                .map_err(|_| WaitError::Poisoned)?
                .0;
        }
        Ok(())
    }
}

/// One-shot multi-waiter gate: once set, releases all current and future
/// waiters until explicitly reset.
pub struct ReadySignal {
    set: Mutex<bool>,
    cv: Condvar,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self {
            set: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Set the signal. Setting an already-set signal is a no-op.
    pub fn set(&self) {
        let mut flag = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        *flag = true;
        self.cv.notify_all();
    }

    /// Block until the signal is set.
    pub fn wait(&self, timeout: Duration) -> Result<(), WaitError> {
        let deadline = Instant::now() + timeout;
        let mut flag = self.set.lock().map_err(|_| WaitError::Poisoned)?;
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout);
            }
            flag = self
                .cv
                .wait_timeout(flag, deadline - now)
                .map_err(|_| WaitError::Poisoned)?
                .0;
        }
        Ok(())
    }

    /// Clear the signal for the next round.
    pub fn reset(&self) {
        let mut flag = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        *flag = false;
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}
