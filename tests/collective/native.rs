use std::sync::Arc;

use lockstep::{
    Collective, HostBackend, LockstepError, NativeAllGather, NativeAllReduce, NativeBackend,
    ReduceOp, Result, TensorBuffer,
};

use super::helpers::run_ranks;

#[test]
fn test_native_allreduce_sum() {
    let ar = Arc::new(NativeAllReduce::new(
        3,
        Arc::new(HostBackend),
        ReduceOp::Sum,
    ));

    run_ranks(3, |rank| {
        let buf = TensorBuffer::from_f32(vec![rank as f32 + 1.0; 4]);
        let out = ar.apply(buf, rank).unwrap();
        assert_eq!(out.to_f32().unwrap(), vec![6.0; 4], "rank {rank}");
    });
}

#[test]
fn test_native_allgather_leading_axis() {
    let ag = Arc::new(NativeAllGather::new(2, Arc::new(HostBackend), 0));

    run_ranks(2, |rank| {
        let buf = match rank {
            0 => TensorBuffer::from_i32(vec![1, 2]),
            _ => TensorBuffer::from_i32(vec![3, 4]),
        };
        let out = ag.apply(buf, rank).unwrap();
        assert_eq!(out.to_i32().unwrap(), vec![1, 2, 3, 4], "rank {rank}");
    });
}

#[test]
fn test_native_allgather_interleaves_later_axis() {
    // Each rank contributes a [2, 1] column; concatenating along axis 1
    // interleaves the columns into a [2, 2] row-major result.
    let ag = Arc::new(NativeAllGather::new(2, Arc::new(HostBackend), 1));

    run_ranks(2, |rank| {
        let buf = match rank {
            0 => TensorBuffer::from_i32(vec![1, 3]),
            _ => TensorBuffer::from_i32(vec![2, 4]),
        }
        .reshape(vec![2, 1])
        .unwrap();
        let out = ag.apply(buf, rank).unwrap();
        assert_eq!(out.shape(), &[2, 2], "rank {rank}");
        assert_eq!(out.to_i32().unwrap(), vec![1, 2, 3, 4], "rank {rank}");
    });
}

struct FailingBackend;

impl NativeBackend for FailingBackend {
    fn all_reduce(&self, _buffers: Vec<TensorBuffer>, _op: ReduceOp) -> Result<Vec<TensorBuffer>> {
        Err(LockstepError::combine_failed("native", "device lost"))
    }

    fn all_gather(&self, _buffers: Vec<TensorBuffer>) -> Result<TensorBuffer> {
        Err(LockstepError::combine_failed("native", "device lost"))
    }
}

#[test]
fn test_backend_failure_reaches_every_rank() {
    let ar = Arc::new(NativeAllReduce::new(
        2,
        Arc::new(FailingBackend),
        ReduceOp::Sum,
    ));

    run_ranks(2, |rank| {
        let buf = TensorBuffer::from_f32(vec![1.0]);
        let err = ar.apply(buf, rank).unwrap_err();
        assert!(
            matches!(err, LockstepError::CombineFailed { .. }),
            "rank {rank}: {err}"
        );
        assert!(err.to_string().contains("device lost"));
    });
}

#[test]
fn test_backends_are_swappable_behind_the_trait() {
    // The orchestration layer sees only `Collective`; software and
    // hardware-backed variants must agree.
    let software: Arc<dyn Collective> = Arc::new(lockstep::AllReduce::new(
        2,
        lockstep::ElementwiseReduce(ReduceOp::Sum),
        lockstep::ConcatGather,
    ));
    let native: Arc<dyn Collective> =
        Arc::new(NativeAllReduce::new(2, Arc::new(HostBackend), ReduceOp::Sum));

    for op in [software, native] {
        let op = Arc::clone(&op);
        run_ranks(2, move |rank| {
            let buf = TensorBuffer::from_i64(vec![rank as i64 + 1; 4]);
            let out = op.apply(buf, rank).unwrap();
            assert_eq!(out.to_i64().unwrap(), vec![3; 4], "rank {rank}");
        });
    }
}
