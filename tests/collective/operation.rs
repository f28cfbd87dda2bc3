use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lockstep::{CollectiveOperation, LockstepError, Result, TensorBuffer};

use super::helpers::{fast_config, run_ranks};

#[test]
fn test_combine_runs_exactly_once_per_round() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let op = Arc::new(CollectiveOperation::new(
        4,
        move |inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(inputs)
        },
    ));

    for _ in 0..3 {
        let op = Arc::clone(&op);
        run_ranks(4, move |rank| {
            let buf = TensorBuffer::from_i32(vec![rank as i32]);
            op.apply(buf, rank).unwrap();
        });
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_outputs_routed_per_rank() {
    // The combine reverses the contributions: rank r must receive the
    // buffer contributed by rank world_size-1-r.
    let op = Arc::new(CollectiveOperation::new(
        4,
        |mut inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
            inputs.reverse();
            Ok(inputs)
        },
    ));

    run_ranks(4, |rank| {
        let buf = TensorBuffer::from_i32(vec![rank as i32 * 10]);
        let out = op.apply(buf, rank).unwrap();
        assert_eq!(out.to_i32().unwrap(), vec![(3 - rank as i32) * 10]);
    });
}

#[test]
fn test_opaque_payload() {
    // The generic collective never inspects the payload; any Send type works.
    let op = Arc::new(CollectiveOperation::new(
        2,
        |inputs: Vec<Vec<String>>| -> Result<Vec<Vec<String>>> { Ok(inputs) },
    ));

    run_ranks(2, |rank| {
        let out = op.apply(vec![format!("shard-{rank}")], rank).unwrap();
        assert_eq!(out, vec![format!("shard-{rank}")]);
    });
}

#[test]
fn test_authoritative_rank_selection() {
    // Tag every output with the value contributed by the designated
    // authoritative rank to prove the combine saw all inputs in order.
    let op = Arc::new(
        CollectiveOperation::new(3, |inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
            let tag = inputs[2].to_i32()?[0];
            Ok(inputs
                .into_iter()
                .map(|b| {
                    let mut v = b.to_i32().unwrap();
                    v.push(tag);
                    TensorBuffer::from_i32(v)
                })
                .collect())
        })
        .with_authoritative_rank(2),
    );

    run_ranks(3, |rank| {
        let buf = TensorBuffer::from_i32(vec![rank as i32]);
        let out = op.apply(buf, rank).unwrap();
        assert_eq!(out.to_i32().unwrap(), vec![rank as i32, 2]);
    });
}

#[test]
fn test_combine_failure_reaches_every_rank() {
    let failures = Arc::new(AtomicUsize::new(0));
    let op = Arc::new(CollectiveOperation::new(
        4,
        |_inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
            Err(LockstepError::combine_failed("collective", "shard corrupt"))
        },
    ));

    let counter = Arc::clone(&failures);
    run_ranks(4, move |rank| {
        let buf = TensorBuffer::from_f32(vec![1.0]);
        let err = op.apply(buf, rank).unwrap_err();
        assert!(
            matches!(err, LockstepError::CombineFailed { .. }),
            "rank {rank} got unexpected error: {err}"
        );
        assert!(err.to_string().contains("shard corrupt"));
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // No rank silently succeeds.
    assert_eq!(failures.load(Ordering::SeqCst), 4);
}

#[test]
fn test_wrong_arity_reaches_every_rank() {
    let op = Arc::new(CollectiveOperation::new(
        3,
        |inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
            Ok(inputs.into_iter().take(2).collect())
        },
    ));

    run_ranks(3, |rank| {
        let buf = TensorBuffer::from_f32(vec![0.0]);
        let err = op.apply(buf, rank).unwrap_err();
        assert!(
            matches!(
                err,
                LockstepError::ArityMismatch {
                    expected: 3,
                    actual: 2,
                    ..
                }
            ),
            "rank {rank} got unexpected error: {err}"
        );
    });
}

#[test]
fn test_rank_out_of_range() {
    let op = CollectiveOperation::new(2, |inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
        Ok(inputs)
    });
    let err = op.apply(TensorBuffer::from_f32(vec![1.0]), 2).unwrap_err();
    assert!(matches!(
        err,
        LockstepError::InvalidRank {
            rank: 2,
            world_size: 2
        }
    ));
}

#[test]
fn test_duplicate_contribution_is_rejected() {
    // Two threads both claim rank 0 in a world of 2. Whichever stages
    // second is rejected as a duplicate; the other eventually times out
    // waiting for the rank that never arrives.
    let op = Arc::new(
        CollectiveOperation::new(2, |inputs: Vec<TensorBuffer>| -> Result<Vec<TensorBuffer>> {
            Ok(inputs)
        })
        .with_config(fast_config()),
    );

    let duplicates = Arc::new(AtomicUsize::new(0));
    let timeouts = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|s| {
        for _ in 0..2 {
            let op = Arc::clone(&op);
            let duplicates = Arc::clone(&duplicates);
            let timeouts = Arc::clone(&timeouts);
            s.spawn(move || {
                match op.apply(TensorBuffer::from_f32(vec![1.0]), 0) {
                    Err(LockstepError::DuplicateContribution { rank: 0, .. }) => {
                        duplicates.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(LockstepError::RendezvousTimeout { .. }) => {
                        timeouts.fetch_add(1, Ordering::SeqCst);
                    }
                    other => panic!("unexpected outcome: {other:?}"),
                }
            });
        }
    });

    assert_eq!(duplicates.load(Ordering::SeqCst), 1);
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
}
