//! End-to-end behaviour of the bucket operations against hand-driven and
//! loopback engines.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bucket_bridge::engine::{EngineError, MemoryEngine, MutationOutcome, MutationToken, RawDocument};
use bucket_bridge::{BridgeConfig, Bucket, BucketError, Cas, FutureStatus};

mod common;
use common::{eventually, ManualEngine, Mutation};

fn outcome(cas: u64) -> MutationOutcome {
    MutationOutcome {
        cas: Cas(cas),
        token: MutationToken {
            vbucket_id: 3,
            vbucket_uuid: 99,
            seq_no: 1,
        },
    }
}

#[test]
fn test_unconditional_meta_upsert_returns_new_cas() {
    let engine = ManualEngine::new();
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(5));

    let future = bucket
        .internal()
        .async_upsert_meta("k", b"v", b"", 0, 0, Cas::ZERO, 1);
    assert_eq!(future.status(), FutureStatus::Pending);

    let (_op, mutation, callback) = engine.take_mutation().unwrap();
    match mutation {
        Mutation::SetMeta(request) => {
            assert_eq!(request.key, b"k");
            assert_eq!(request.cas, Cas::ZERO);
            assert_eq!(request.rev_seqno, 1);
        }
        other => panic!("unexpected request {other:?}"),
    }

    thread::spawn(move || callback(Ok(outcome(42))));
    assert_eq!(future.wait(None), Ok(Cas(42)));
}

#[test]
fn test_stale_cas_surfaces_mismatch() {
    let engine = ManualEngine::new();
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(5));
    let server_cas = Cas(9);

    let future = bucket
        .internal()
        .async_upsert_meta("k", b"v", b"", 0, 0, Cas(7), 2);

    let (_op, mutation, callback) = engine.take_mutation().unwrap();
    let Mutation::SetMeta(request) = mutation else {
        panic!("expected a meta upsert");
    };
    let result = if request.cas.is_zero() || request.cas == server_cas {
        Ok(outcome(42))
    } else {
        Err(EngineError::CasMismatch)
    };
    callback(result);

    let err = future.wait(None).unwrap_err();
    assert!(err.is_cas_mismatch());
    assert_eq!(err, BucketError::Engine(EngineError::CasMismatch));
}

#[test]
fn test_random_read_times_out_and_cancels_once() {
    let engine = ManualEngine::new();
    let bucket = Bucket::new("b", engine.clone(), Duration::from_millis(10));
    let mut destination = String::new();

    let started = Instant::now();
    let err = bucket.internal().get_random(&mut destination).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert_eq!(err, BucketError::Timeout(Duration::from_millis(10)));
    assert!(destination.is_empty());

    let (op, callback) = engine.take_read().unwrap();
    assert_eq!(op.cancel_count(), 1);

    // The engine answering afterwards is harmless.
    callback(Ok(RawDocument {
        key: b"late".to_vec(),
        value: b"\"v\"".to_vec(),
        flags: 0,
        cas: Cas(5),
    }));
    assert_eq!(op.cancel_count(), 1);
}

#[test]
fn test_random_read_decodes_into_destination() {
    let engine = ManualEngine::new();
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(5));

    let responder = {
        let engine = engine.clone();
        thread::spawn(move || {
            assert!(eventually(Duration::from_secs(2), || engine.pending_reads() == 1));
            let (_op, callback) = engine.take_read().unwrap();
            callback(Ok(RawDocument {
                key: b"user::7".to_vec(),
                value: br#"{"name":"kim"}"#.to_vec(),
                flags: 0x0200_0000,
                cas: Cas(77),
            }));
        })
    };

    let mut destination = serde_json::Value::Null;
    let (key, cas) = bucket.internal().get_random(&mut destination).unwrap();
    responder.join().unwrap();

    assert_eq!(key, "user::7");
    assert_eq!(cas, Cas(77));
    assert_eq!(destination["name"], "kim");
}

#[test]
fn test_submission_failure_completes_without_waiting() {
    let engine = ManualEngine::new();
    engine.reject_with(EngineError::Unavailable("no connection".into()));
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(30));

    let future = bucket.internal().async_remove_meta("k", b"", 0, 0, Cas::ZERO, 1);
    assert_eq!(future.status(), FutureStatus::Done);

    let started = Instant::now();
    let err = future.wait(None).unwrap_err();
    assert_eq!(err, BucketError::Submit(EngineError::Unavailable("no connection".into())));

    let err = bucket
        .internal()
        .upsert_meta("k", b"v", b"", 0, 0, Cas::ZERO, 1)
        .unwrap_err();
    assert!(matches!(err, BucketError::Submit(_)));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.pending_mutations(), 0);
}

#[test]
fn test_blocking_remove_meta_waits_for_callback() {
    let engine = ManualEngine::new();
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(5));

    let responder = {
        let engine = engine.clone();
        thread::spawn(move || {
            assert!(eventually(Duration::from_secs(2), || engine.pending_mutations() == 1));
            let (_op, mutation, callback) = engine.take_mutation().unwrap();
            assert!(matches!(mutation, Mutation::DeleteMeta(ref r) if r.cas == Cas(11)));
            thread::sleep(Duration::from_millis(20));
            callback(Ok(outcome(12)));
        })
    };

    let cas = bucket
        .internal()
        .remove_meta("k", b"meta", 0, 0, Cas(11), 4)
        .unwrap();
    responder.join().unwrap();
    assert_eq!(cas, Cas(12));
}

#[test]
fn test_cancelled_future_ignores_late_callback() {
    let engine = ManualEngine::new();
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(5));

    let future = bucket.internal().async_upsert("k", &vec![1, 2, 3], 0);
    let (op, mutation, callback) = engine.take_mutation().unwrap();
    assert!(matches!(mutation, Mutation::Set(ref r) if r.value == b"[1,2,3]"));

    assert!(future.cancel());
    assert_eq!(op.cancel_count(), 1);
    callback(Ok(outcome(50)));

    assert_eq!(future.status(), FutureStatus::Cancelled);
    assert_eq!(future.wait(None), Err(BucketError::Cancelled));
}

#[test]
fn test_memory_engine_cas_workflow() {
    let engine = Arc::new(MemoryEngine::new());
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(2));
    let internal = bucket.internal();

    let first = internal
        .upsert_meta("doc", b"{\"v\":1}", b"", 0, 0, Cas::ZERO, 1)
        .unwrap();
    let stale = Cas(first.0 + 1000);

    let err = internal
        .upsert_meta("doc", b"{\"v\":2}", b"", 0, 0, stale, 2)
        .unwrap_err();
    assert!(err.is_cas_mismatch());

    let second = internal
        .upsert_meta("doc", b"{\"v\":2}", b"", 0, 0, first, 2)
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.value_of("doc"), Some(b"{\"v\":2}".to_vec()));

    let err = internal.remove_meta("missing", b"", 0, 0, Cas::ZERO, 1).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_blocking_call_against_stalled_engine_times_out() {
    let engine = Arc::new(MemoryEngine::new());
    engine.set_stalled(true);
    let bucket = Bucket::new("b", engine.clone(), Duration::from_millis(20));

    let err = bucket
        .internal()
        .upsert_meta("k", b"v", b"", 0, 0, Cas::ZERO, 1)
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(engine.cancelled_count(), 1);

    // Nothing is left to deliver once the request was cancelled.
    assert_eq!(engine.release_stalled(), 0);
    assert!(engine.is_empty());
}

#[test]
fn test_timed_out_future_can_still_be_cancelled() {
    let mut config = BridgeConfig::default();
    config.futures.wait_timeout_ms = Some(5);
    config.futures.cancel_on_timeout = false;

    let engine = Arc::new(MemoryEngine::new());
    engine.set_stalled(true);
    let bucket = Bucket::from_config(&config, engine.clone());

    let future = bucket
        .internal()
        .async_upsert_meta("k", b"v", b"", 0, 0, Cas::ZERO, 1);
    let err = future.wait_with(bucket.wait_options()).unwrap_err();
    assert_eq!(err, BucketError::Timeout(Duration::from_millis(5)));
    assert_eq!(engine.in_flight(), 1);
    assert_eq!(engine.cancelled_count(), 0);

    assert!(future.cancel());
    assert_eq!(future.status(), FutureStatus::Timeout);
    assert_eq!(engine.cancelled_count(), 1);
    assert_eq!(engine.in_flight(), 0);
    assert_eq!(engine.release_stalled(), 0);
}

#[tokio::test]
async fn test_async_futures_against_loopback_engine() {
    let engine = Arc::new(MemoryEngine::new());
    engine.set_latency(Duration::from_millis(1));
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(2));
    let internal = bucket.internal();

    let futures: Vec<_> = (0..20)
        .map(|i| internal.async_upsert_meta(&format!("k{i}"), b"{}", b"", 0, 0, Cas::ZERO, 1))
        .collect();

    let results =
        futures_util::future::join_all(futures.iter().map(|f| f.wait_async(Some(Duration::from_secs(5)))))
            .await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(engine.len(), 20);

    let removal = internal.async_remove_meta("k0", b"", 0, 0, Cas::ZERO, 2);
    assert!(removal.await.is_ok());
    assert_eq!(engine.len(), 19);
}

#[tokio::test]
async fn test_async_wait_timeout_on_stalled_engine() {
    let engine = Arc::new(MemoryEngine::new());
    engine.set_stalled(true);
    let bucket = Bucket::new("b", engine.clone(), Duration::from_secs(2));

    let future = bucket.internal().async_upsert_meta("k", b"{}", b"", 0, 0, Cas::ZERO, 1);
    let err = future.wait_async(Some(Duration::from_millis(10))).await.unwrap_err();
    assert_eq!(err, BucketError::Timeout(Duration::from_millis(10)));
    assert_eq!(future.status(), FutureStatus::Timeout);
    assert_eq!(engine.cancelled_count(), 1);
    assert_eq!(engine.in_flight(), 0);
}
