//! Hardware-backed collective variants.
//!
//! These satisfy the same [`Collective`] contract as the software
//! implementations, so the orchestration layer can swap backends without
//! touching call sites. The accelerator-native collective library sits
//! behind the [`NativeBackend`] trait: one call operates on all ranks'
//! buffers at once, and the wrapping [`CollectiveOperation`] provides the
//! authoritative-rank execution, failure broadcast, and round reset.
//!
//! [`HostBackend`] is the in-crate reference implementation over host
//! memory; accelerator bindings implement the trait externally.

use std::sync::Arc;

use crate::buffer::TensorBuffer;
use crate::collective::{Collective, CollectiveOperation};
use crate::config::LockstepConfig;
use crate::error::{LockstepError, Result};
use crate::types::{Rank, ReduceOp};

/// An accelerator-native collective library: reduces or gathers every
/// rank's buffer in a single call.
pub trait NativeBackend: Send + Sync {
    /// Element-wise reduction across all buffers; returns one reduced
    /// buffer per rank.
    fn all_reduce(&self, buffers: Vec<TensorBuffer>, op: ReduceOp) -> Result<Vec<TensorBuffer>>;

    /// Assemble all buffers along the leading axis into one buffer.
    fn all_gather(&self, buffers: Vec<TensorBuffer>) -> Result<TensorBuffer>;
}

/// Reference backend over host memory.
pub struct HostBackend;

impl NativeBackend for HostBackend {
    fn all_reduce(&self, buffers: Vec<TensorBuffer>, op: ReduceOp) -> Result<Vec<TensorBuffer>> {
        let world = buffers.len();
        let reduced = TensorBuffer::reduce_parts(buffers, op)?;
        Ok(vec![reduced; world])
    }

    fn all_gather(&self, buffers: Vec<TensorBuffer>) -> Result<TensorBuffer> {
        TensorBuffer::concat(&buffers)
    }
}

/// All-reduce delegating the reduction to a native backend in one call.
pub struct NativeAllReduce {
    inner: CollectiveOperation<TensorBuffer>,
}

impl NativeAllReduce {
    pub fn new(world_size: usize, backend: Arc<dyn NativeBackend>, op: ReduceOp) -> Self {
        let combine =
            move |inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
                backend.all_reduce(inputs, op)
            };
        Self {
            inner: CollectiveOperation::new(world_size, combine),
        }
    }

    /// Replace the default timeouts.
    pub fn with_config(mut self, config: LockstepConfig) -> Self {
        self.inner = self.inner.with_config(config);
        self
    }

    pub fn world_size(&self) -> usize {
        self.inner.world_size()
    }

    pub fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        self.inner.apply(buffer, rank)
    }
}

impl Collective for NativeAllReduce {
    fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        NativeAllReduce::apply(self, buffer, rank)
    }
}

/// All-gather delegating assembly to a native backend, with the gathered
/// pieces interleaved back into the caller's requested concatenation axis.
///
/// Native gathers assemble along the leading axis; when the caller wants
/// the pieces joined along a later axis (the common case for
/// column-sharded layers), the wrapper re-splits the assembled buffer and
/// interleaves per outer index.
pub struct NativeAllGather {
    inner: CollectiveOperation<TensorBuffer>,
}

impl NativeAllGather {
    pub fn new(world_size: usize, backend: Arc<dyn NativeBackend>, concat_axis: usize) -> Self {
        let combine = move |inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
            let world = inputs.len();
            let part_shape = inputs
                .first()
                .ok_or(LockstepError::EmptyBufferSet {
                    operation: "native all_gather",
                })?
                .shape()
                .to_vec();

            let assembled = backend.all_gather(inputs)?;

            let out = if concat_axis == 0 {
                assembled
            } else {
                let parts: Result<Vec<TensorBuffer>> = assembled
                    .split_parts(world)
                    .into_iter()
                    .map(|p| p.reshape(part_shape.clone()))
                    .collect();
                TensorBuffer::concat_along(&parts?, concat_axis)?
            };
            Ok(vec![out; world])
        };
        Self {
            inner: CollectiveOperation::new(world_size, combine),
        }
    }

    /// Replace the default timeouts.
    pub fn with_config(mut self, config: LockstepConfig) -> Self {
        self.inner = self.inner.with_config(config);
        self
    }

    pub fn world_size(&self) -> usize {
        self.inner.world_size()
    }

    pub fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        self.inner.apply(buffer, rank)
    }
}

impl Collective for NativeAllGather {
    fn apply(&self, buffer: TensorBuffer, rank: Rank) -> Result<TensorBuffer> {
        NativeAllGather::apply(self, buffer, rank)
    }
}
