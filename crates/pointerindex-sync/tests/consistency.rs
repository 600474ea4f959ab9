//! End-to-end consistency tests: scanner, listener and reconciler over the
//! in-memory ledger source and document store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pointerindex_core::event::{classify, LedgerAddresses};
use pointerindex_core::identity::identity_hash;
use pointerindex_core::pointer::IdentityPointer;
use pointerindex_core::retry::RetryConfig;
use pointerindex_core::source::LedgerEventSource;
use pointerindex_core::store::EventStore;
use pointerindex_core::types::{EventKind, RawLedgerEvent};
use pointerindex_core::CheckpointStore;
use pointerindex_storage::InMemoryStorage;
use pointerindex_sync::{IndexerBuilder, MemoryLedgerSource, MirrorIndexer, ReconcileOutcome};

const ID_LEDGER: &str = "0x1d000000000000000000000000000000000000aa";
const DATA_LEDGER: &str = "0xda000000000000000000000000000000000000bb";
const IDENTITY: &str = "x:abc";
const OWNER_A: &str = "0xaaaa";
const OWNER_B: &str = "0xbbbb";

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn raw(ledger: &str, signature: &str, block: u64, log: u32, fields: serde_json::Value) -> RawLedgerEvent {
    RawLedgerEvent {
        address: ledger.into(),
        signature: signature.into(),
        block_number: block,
        block_timestamp: 1_700_000_000 + block as i64 * 12,
        tx_hash: format!("0x{block:08x}{log:04x}"),
        log_index: log,
        fields,
    }
}

fn hash() -> String {
    identity_hash(IDENTITY)
}

fn created(block: u64, log: u32, owner: &str) -> RawLedgerEvent {
    raw(ID_LEDGER, "IdentityCreated", block, log, json!({ "identity": IDENTITY, "owner": owner }))
}

fn updated(block: u64, log: u32, document: &str) -> RawLedgerEvent {
    raw(ID_LEDGER, "IdentityUpdated", block, log, json!({ "identity_hash": hash(), "document": document }))
}

fn revoked(block: u64, log: u32) -> RawLedgerEvent {
    raw(ID_LEDGER, "IdentityRevoked", block, log, json!({ "identity_hash": hash() }))
}

fn transferred(block: u64, log: u32, owner: &str) -> RawLedgerEvent {
    raw(ID_LEDGER, "IdentityTransferred", block, log, json!({ "identity_hash": hash(), "new_owner": owner }))
}

fn controller_added(block: u64, log: u32, controller: &str) -> RawLedgerEvent {
    raw(ID_LEDGER, "ControllerAdded", block, log, json!({ "identity_hash": hash(), "controller": controller }))
}

fn data_stored(block: u64, log: u32, data_type: &str, content: &str) -> RawLedgerEvent {
    raw(
        DATA_LEDGER,
        "DataStored",
        block,
        log,
        json!({ "identityHash": hash(), "dataType": data_type, "contentHash": content }),
    )
}

fn access_granted(block: u64, log: u32, data_type: &str, accessor: &str) -> RawLedgerEvent {
    raw(
        DATA_LEDGER,
        "AccessGranted",
        block,
        log,
        json!({ "identity_hash": hash(), "data_type": data_type, "accessor": accessor }),
    )
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        multiplier: 2.0,
    }
}

fn builder() -> IndexerBuilder {
    IndexerBuilder::new()
        .id("test-mirror")
        .identity_ledger(ID_LEDGER)
        .data_ledger(DATA_LEDGER)
        .lookback_window(1_000)
        .batch_size(1_000)
        .reconcile_interval(Duration::from_secs(3_600))
        .rpc_timeout(Duration::from_secs(1))
        .retry(fast_retry())
        .live(false)
}

fn indexer(source: &Arc<MemoryLedgerSource>, store: &Arc<InMemoryStorage>) -> MirrorIndexer {
    let source: Arc<dyn LedgerEventSource> = source.clone();
    builder().build(source, store.clone()).unwrap()
}

/// Pointer obtained by folding `events` (already in ledger order) directly.
fn reference_fold(events: &[RawLedgerEvent]) -> IdentityPointer {
    let ledgers = LedgerAddresses {
        identity: Some(ID_LEDGER.into()),
        data: Some(DATA_LEDGER.into()),
    };
    let mut pointer = IdentityPointer::placeholder(hash());
    for raw in events {
        let classified = classify(raw, &ledgers).unwrap().unwrap();
        pointer.apply(&classified);
    }
    pointer
}

async fn pointer(idx: &MirrorIndexer) -> IdentityPointer {
    idx.query().pointer(IDENTITY).await.unwrap().expect("pointer exists")
}

/// Poll `$cond` (which may `.await`) until it holds, or panic after ~3s.
macro_rules! eventually {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..300 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reached, "condition not reached in time: {}", stringify!($cond));
    }};
}

// ─── Basic flows ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn created_then_updated() {
    let source = Arc::new(MemoryLedgerSource::from_events([
        created(10, 0, OWNER_A),
        updated(12, 1, "{d}"),
    ]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);

    idx.reconcile_now().await.unwrap();

    let p = pointer(&idx).await;
    assert_eq!(p.identity, IDENTITY);
    assert_eq!(p.owner, OWNER_A);
    assert_eq!(p.document, "{d}");
    assert!(p.active);
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(12));
}

#[tokio::test]
async fn replayed_created_after_revoke_stays_inactive() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(10, 0, OWNER_A), revoked(11, 0)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);
    idx.reconcile_now().await.unwrap();
    assert!(!pointer(&idx).await.active);

    // Rescan from scratch redelivers Created after Revoked was applied.
    idx.scanner().scan(10, 10).await.unwrap();

    let p = pointer(&idx).await;
    assert!(!p.active);
    assert_eq!(idx.metrics().duplicates, 1);
    assert_eq!(store.event_count(), 2);
}

#[tokio::test]
async fn up_to_date_reconcile_does_nothing() {
    let source = Arc::new(MemoryLedgerSource::new());
    source.set_head(100);
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);
    idx.checkpoint().set(100).await.unwrap();

    let outcome = idx.reconcile_now().await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::UpToDate { head: 100 });
    assert_eq!(source.range_queries(), 0);
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(100));
}

#[tokio::test]
async fn latest_data_hash_wins() {
    let source = Arc::new(MemoryLedgerSource::from_events([
        data_stored(20, 0, "profile", "H1"),
        data_stored(21, 0, "profile", "H2"),
    ]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);
    idx.reconcile_now().await.unwrap();

    let p = pointer(&idx).await;
    assert_eq!(p.data_hashes["profile"], "H2");
    assert!(p.data_types.contains("profile"));
}

// ─── Properties ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn rescanning_a_range_is_idempotent() {
    let events = vec![
        created(1, 0, OWNER_A),
        updated(2, 0, "doc"),
        controller_added(3, 0, "0xc1"),
        transferred(4, 0, OWNER_B),
        data_stored(5, 0, "kyc", "H"),
        access_granted(6, 0, "kyc", "0xd"),
        revoked(7, 0),
    ];
    let source = Arc::new(MemoryLedgerSource::from_events(events.clone()));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);

    idx.reconcile_now().await.unwrap();
    let once = pointer(&idx).await;
    idx.scanner().scan(1, 7).await.unwrap();
    let twice = pointer(&idx).await;

    assert_eq!(once, twice);
    assert_eq!(once, reference_fold(&events));
    assert_eq!(store.event_count(), events.len());
}

#[tokio::test]
async fn live_duplicates_and_stale_redelivery_match_fold() {
    let events = vec![
        created(10, 0, OWNER_A),
        updated(11, 0, "v1"),
        controller_added(12, 0, "0xc1"),
        updated(13, 0, "v2"),
        transferred(14, 0, OWNER_B),
    ];
    let source = Arc::new(MemoryLedgerSource::from_events(events.clone()));
    let store = Arc::new(InMemoryStorage::new());
    let idx = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().live(true).build(source, store.clone()).unwrap()
    };

    idx.start().await.unwrap();
    eventually!(source.subscriber_count(ID_LEDGER) == 1);

    // The listener now replays older events on top of the scanned state.
    for e in [&events[1], &events[3], &events[0], &events[1]] {
        source.deliver((*e).clone());
    }
    eventually!(idx.metrics().duplicates == 4);

    assert_eq!(pointer(&idx).await, reference_fold(&events));
    assert_eq!(pointer(&idx).await.document, "v2");
    idx.stop().await;
}

#[tokio::test]
async fn data_before_created_converges() {
    // The data ledger reports a store well before the identity's creation,
    // and the small batch size forces the data event to be applied first.
    let in_ledger_order = vec![created(50, 0, OWNER_A), data_stored(10, 0, "profile", "H1")];
    let source = Arc::new(MemoryLedgerSource::from_events(in_ledger_order.clone()));
    let store = Arc::new(InMemoryStorage::new());
    let idx = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().batch_size(20).build(source, store.clone()).unwrap()
    };

    idx.reconcile_now().await.unwrap();

    let p = pointer(&idx).await;
    assert_eq!(p, reference_fold(&in_ledger_order));
    assert_eq!(p.owner, OWNER_A);
    assert_eq!(p.data_hashes["profile"], "H1");
    assert!(p.active);
}

#[tokio::test]
async fn revoked_pointer_keeps_recording_fields() {
    let source = Arc::new(MemoryLedgerSource::from_events([
        created(1, 0, OWNER_A),
        revoked(2, 0),
        controller_added(3, 0, "0xc9"),
        updated(4, 0, "after-revoke"),
        data_stored(5, 0, "profile", "H1"),
    ]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);
    idx.reconcile_now().await.unwrap();

    let p = pointer(&idx).await;
    assert!(!p.active);
    assert!(p.controllers.contains("0xc9"));
    assert_eq!(p.document, "after-revoke");
    assert_eq!(p.data_hashes["profile"], "H1");
}

#[tokio::test]
async fn storage_failure_aborts_batch_and_resume_converges() {
    let events: Vec<_> = (0..10u64)
        .map(|i| updated(i + 2, 0, &format!("doc-{i}")))
        .chain([created(1, 0, OWNER_A), data_stored(6, 1, "kyc", "H")])
        .collect();
    let source = Arc::new(MemoryLedgerSource::from_events(events.clone()));

    // Reference run on a healthy store.
    let clean_store = Arc::new(InMemoryStorage::new());
    let clean = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().batch_size(3).build(source, clean_store.clone()).unwrap()
    };
    clean.reconcile_now().await.unwrap();
    let expected = pointer(&clean).await;

    // Crashing run: writes start failing part-way through.
    let store = Arc::new(InMemoryStorage::new());
    let first = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().batch_size(3).build(source, store.clone()).unwrap()
    };
    store.fail_writes_after(9);
    assert!(first.reconcile_now().await.unwrap_err().is_storage());

    let cp = first.checkpoint().stored().await.unwrap();
    assert!(cp.map_or(true, |h| h < 11), "checkpoint must not cover unapplied events");
    if let Some(height) = cp {
        let applied = store.events_by_identity(&hash()).await.unwrap();
        for e in events.iter().filter(|e| e.block_number <= height) {
            assert!(applied.iter().any(|a| a.tx_hash == e.tx_hash), "event at {} missing", e.block_number);
        }
    }

    // Restart with a fresh indexer over the same store.
    store.set_fail_writes(false);
    let restarted = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().batch_size(3).build(source, store.clone()).unwrap()
    };
    restarted.reconcile_now().await.unwrap();

    assert_eq!(pointer(&restarted).await, expected);
    assert_eq!(store.event_count(), clean_store.event_count());
    assert_eq!(restarted.checkpoint().stored().await.unwrap(), Some(11));
}

#[tokio::test]
async fn checkpoint_is_monotonic_across_restarts() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(5, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    indexer(&source, &store).reconcile_now().await.unwrap();
    assert_eq!(store.load("test-mirror").await.unwrap().unwrap().block_number, 5);

    source.append_silent(updated(9, 0, "later"));
    let second = indexer(&source, &store);
    match second.reconcile_now().await.unwrap() {
        ReconcileOutcome::Scanned(report) => {
            assert_eq!((report.from, report.to), (6, 9));
            assert_eq!(report.events, 1);
        }
        other => panic!("expected a scan, got {other:?}"),
    }

    // An explicit rescan of old blocks must not move the checkpoint back.
    second.scanner().scan(1, 5).await.unwrap();
    assert_eq!(second.checkpoint().stored().await.unwrap(), Some(9));
}

#[tokio::test]
async fn unrecognized_and_malformed_events_are_skipped() {
    let source = Arc::new(MemoryLedgerSource::from_events([
        created(1, 0, OWNER_A),
        raw(ID_LEDGER, "Upgraded", 2, 0, json!({ "implementation": "0x9" })),
        raw(ID_LEDGER, "IdentityTransferred", 3, 0, json!({ "identity_hash": hash() })),
        updated(4, 0, "kept"),
    ]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);

    match idx.reconcile_now().await.unwrap() {
        ReconcileOutcome::Scanned(report) => {
            assert_eq!(report.applied, 2);
            assert_eq!(report.skipped, 2);
        }
        other => panic!("expected a scan, got {other:?}"),
    }

    let metrics = idx.metrics();
    assert_eq!(metrics.skipped_unknown, 1);
    assert_eq!(metrics.skipped_malformed, 1);
    assert_eq!(pointer(&idx).await.document, "kept");
    assert_eq!(pointer(&idx).await.owner, OWNER_A);
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(4));
}

#[tokio::test]
async fn transient_rpc_failures_are_retried() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(3, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);

    source.fail_next_queries(2);
    idx.reconcile_now().await.unwrap();
    assert!(pointer(&idx).await.is_created());
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(3));
}

#[tokio::test]
async fn exhausted_retries_leave_checkpoint_alone() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(3, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);

    source.fail_next_queries(10);
    assert!(idx.reconcile_now().await.unwrap_err().is_retryable());
    assert_eq!(idx.checkpoint().stored().await.unwrap(), None);

    source.fail_next_queries(0);
    idx.reconcile_now().await.unwrap();
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(3));
}

#[tokio::test]
async fn unconfigured_data_ledger_is_never_scanned() {
    let source = Arc::new(MemoryLedgerSource::from_events([
        created(1, 0, OWNER_A),
        data_stored(2, 0, "profile", "H1"),
    ]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        let mut config = builder().build_config();
        config.data_ledger = None;
        IndexerBuilder::from_config(config).build(source, store.clone()).unwrap()
    };

    idx.reconcile_now().await.unwrap();

    assert!(pointer(&idx).await.data_types.is_empty());
    assert_eq!(source.range_queries(), 1);
    assert!(store.events_by_kind(EventKind::DataStored).await.unwrap().is_empty());
}

// ─── Control surface ─────────────────────────────────────────────────────────

#[tokio::test]
async fn start_listen_and_stop() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(1, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().live(true).build(source, store.clone()).unwrap()
    };
    assert!(!idx.is_running());

    idx.start().await.unwrap();
    assert!(idx.is_running());
    assert!(pointer(&idx).await.is_created());

    eventually!(
        source.subscriber_count(ID_LEDGER) == 1 && source.subscriber_count(DATA_LEDGER) == 1
    );

    source.append(data_stored(2, 0, "profile", "H1"));
    eventually!(idx
        .query()
        .pointer(IDENTITY)
        .await
        .unwrap()
        .is_some_and(|p| p.data_hashes.get("profile").map(String::as_str) == Some("H1")));
    // Live delivery never moves the checkpoint.
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(1));

    idx.stop().await;
    assert!(!idx.is_running());
    assert_eq!(source.subscriber_count(ID_LEDGER), 0);
    assert_eq!(source.subscriber_count(DATA_LEDGER), 0);
}

#[tokio::test]
async fn missed_notification_is_healed_by_reconciler() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(1, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().live(true).build(source, store.clone()).unwrap()
    };
    idx.start().await.unwrap();
    eventually!(source.subscriber_count(ID_LEDGER) == 1);

    source.append_silent(transferred(2, 0, OWNER_B));
    assert_eq!(pointer(&idx).await.owner, OWNER_A);

    idx.reconcile_now().await.unwrap();
    assert_eq!(pointer(&idx).await.owner, OWNER_B);
    assert_eq!(idx.query().pointers_by_owner(OWNER_B).await.unwrap().len(), 1);
    idx.stop().await;
}

#[tokio::test]
async fn listener_resubscribes_after_disconnect() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(1, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = {
        let source: Arc<dyn LedgerEventSource> = source.clone();
        builder().live(true).build(source, store.clone()).unwrap()
    };
    idx.start().await.unwrap();
    eventually!(source.subscriber_count(ID_LEDGER) == 1);

    source.disconnect_all();
    eventually!(source.subscriber_count(ID_LEDGER) == 1);

    source.append(updated(2, 0, "after-reconnect"));
    eventually!(idx
        .query()
        .pointer(IDENTITY)
        .await
        .unwrap()
        .is_some_and(|p| p.document == "after-reconnect"));
    idx.stop().await;
}

#[tokio::test]
async fn unreachable_store_is_fatal_at_start() {
    let source = Arc::new(MemoryLedgerSource::new());
    let store = Arc::new(InMemoryStorage::new());
    store.set_unreachable(true);
    let idx = indexer(&source, &store);

    assert!(idx.start().await.is_err());
    assert!(!idx.is_running());
}

#[tokio::test]
async fn failed_catch_up_is_not_fatal() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(1, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);

    source.fail_next_queries(10);
    idx.start().await.unwrap();
    assert!(idx.is_running());
    assert_eq!(idx.checkpoint().stored().await.unwrap(), None);

    source.fail_next_queries(0);
    idx.reconcile_now().await.unwrap();
    assert!(pointer(&idx).await.is_created());
    idx.stop().await;
}

#[tokio::test]
async fn stats_reflect_mirror() {
    let source = Arc::new(MemoryLedgerSource::from_events([
        created(1, 0, OWNER_A),
        updated(2, 0, "d"),
        data_stored(3, 0, "profile", "H1"),
    ]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);
    idx.reconcile_now().await.unwrap();

    let stats = idx.query().stats().await.unwrap();
    assert_eq!(stats.checkpoint, Some(3));
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.events_by_kind[&EventKind::Created], 1);
    assert_eq!(stats.pointers, 1);
    assert_eq!(stats.active_pointers, 1);

    let by_kind = idx.query().events_by_kind(EventKind::Updated).await.unwrap();
    assert_eq!(by_kind.len(), 1);
    let by_identity = idx.query().events_by_identity(IDENTITY).await.unwrap();
    assert_eq!(by_identity.len(), 3);
}

#[tokio::test]
async fn gapped_scan_leaves_checkpoint_and_reconcile_heals_gap() {
    let source = Arc::new(MemoryLedgerSource::from_events([created(10, 0, OWNER_A)]));
    let store = Arc::new(InMemoryStorage::new());
    let idx = indexer(&source, &store);
    idx.reconcile_now().await.unwrap();
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(10));

    source.append_silent(transferred(20, 0, OWNER_B));
    source.append_silent(updated(60, 0, "d"));

    // Starts past checkpoint + 1: blocks 11..=49 are not covered.
    let report = idx.scanner().scan(50, 60).await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(10));
    assert_eq!(pointer(&idx).await.document, "d");
    assert_eq!(pointer(&idx).await.owner, OWNER_A);

    match idx.reconcile_now().await.unwrap() {
        ReconcileOutcome::Scanned(report) => assert_eq!((report.from, report.to), (11, 60)),
        other => panic!("expected a scan, got {other:?}"),
    }
    let p = pointer(&idx).await;
    assert_eq!(p.owner, OWNER_B);
    assert_eq!(p.document, "d");
    assert_eq!(idx.checkpoint().stored().await.unwrap(), Some(60));
}
