use hlcsync_core::{
    Batch, CellKey, Clock, DigestNode, NewMutation, OwnerId, Timestamp, Value,
};
use hlcsync_replica::{
    ClockStore, Divergence, ManualClock, MemoryStore, OnCompleteId, QueryId, QueryNotifier,
    QueryRefresh, ReceiveError, Replica, SendError, SendStage, SqliteStore, Storage, Transaction,
};
use hlcsync_transport::{ReceivedSync, SyncInput, SyncTransport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Captures every dispatched exchange; can be switched to refuse them.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<SyncInput>>,
    refuse: AtomicBool,
}

impl RecordingTransport {
    fn take(&self) -> Vec<SyncInput> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SyncTransport for RecordingTransport {
    fn dispatch(&self, input: SyncInput) -> Result<(), TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::WorkerGone);
        }
        self.sent.lock().unwrap().push(input);
        Ok(())
    }
}

struct Harness<S> {
    replica: Replica<S>,
    transport: Arc<RecordingTransport>,
    time: Arc<ManualClock>,
    queries: QueryNotifier,
}

fn harness<S: Storage>(storage: S, node: u8, now: u64) -> Harness<S> {
    let transport = Arc::new(RecordingTransport::default());
    let time = Arc::new(ManualClock::new(now));
    let queries = QueryNotifier::new(16);
    let replica = Replica::builder(storage)
        .node_id(Uuid::from_bytes([node; 16]))
        .owner(OwnerId::new("owner-a"))
        .sync_url("http://peer/sync")
        .time_source(time.clone())
        .transport(transport.clone())
        .query_cache(Arc::new(queries.clone()))
        .open()
        .unwrap();
    Harness {
        replica,
        transport,
        time,
        queries,
    }
}

fn title(row: &str) -> CellKey {
    CellKey::new("todos", row, "title")
}

fn one(row: &str, value: &str) -> Batch {
    Batch::new(NewMutation::new("todos", row, "title", value))
}

/// What a peer holding exactly `inputs` would answer.
fn answer_from(inputs: &[SyncInput]) -> ReceivedSync {
    let last = inputs.last().unwrap();
    ReceivedSync {
        mutations: inputs.iter().flat_map(|i| i.mutations.clone()).collect(),
        digest: last.clock.digest.pruned(),
        previous_diff: None,
    }
}

async fn read(replica: &Replica<impl Storage>, key: &CellKey) -> Option<Value> {
    replica.value(key).await.unwrap().map(|r| r.value)
}

#[tokio::test]
async fn first_send_on_empty_replica() {
    let h = harness(MemoryStore::new(), 1, 0);
    let mut refreshes = h.queries.subscribe();
    let before = h.replica.clock().await.unwrap();

    h.replica
        .send(
            one("r1", "a"),
            vec![OnCompleteId("cb".to_string())],
            vec![QueryId("all-todos".to_string())],
        )
        .await
        .unwrap();

    assert_eq!(read(&h.replica, &title("r1")).await, Some(Value::from("a")));

    let after = h.replica.clock().await.unwrap();
    assert_eq!(before.timestamp, Timestamp::epoch(h.replica.node_id()));
    assert_eq!(after.timestamp, Timestamp::new(0, 1, h.replica.node_id()));
    assert_eq!(before.digest.hash(), DigestNode::new().hash());
    assert_ne!(after.digest.hash(), before.digest.hash());

    let sent = h.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mutations.len(), 1);
    assert_eq!(sent[0].clock, after);
    assert_eq!(sent[0].owner, OwnerId::new("owner-a"));
    assert!(sent[0].previous_diff.is_none());

    assert_eq!(
        refreshes.recv().await.unwrap(),
        QueryRefresh::AfterSend {
            queries: vec![QueryId("all-todos".to_string())],
            on_complete_ids: vec![OnCompleteId("cb".to_string())],
        }
    );
}

#[tokio::test]
async fn batch_timestamps_follow_previous_sends() {
    let h = harness(MemoryStore::new(), 1, 10_000);
    h.replica.send(one("r1", "a"), vec![], vec![]).await.unwrap();

    let mut batch = one("r2", "b");
    batch.push(NewMutation::new("todos", "r3", "title", "c"));
    h.replica.send(batch, vec![], vec![]).await.unwrap();

    let stamps: Vec<Timestamp> = h
        .transport
        .take()
        .iter()
        .flat_map(|i| i.mutations.iter().map(|m| m.timestamp))
        .collect();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn failed_clock_write_commits_nothing() {
    let h = harness(MemoryStore::new(), 1, 1_000);
    h.replica.send(one("r1", "a"), vec![], vec![]).await.unwrap();
    h.transport.take();
    let before = h.replica.clock().await.unwrap();

    h.replica
        .with_storage(|store| store.set_fail_clock_writes(true))
        .await;
    let err = h
        .replica
        .send(one("r1", "b"), vec![], vec![])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SendError::Unknown {
            stage: SendStage::PersistingClock,
            ..
        }
    ));
    assert!(!err.is_committed());
    assert_eq!(read(&h.replica, &title("r1")).await, Some(Value::from("a")));
    assert_eq!(h.replica.clock().await.unwrap(), before);
    assert!(h.transport.take().is_empty());
}

#[tokio::test]
async fn drift_aborts_without_writing() {
    let h = harness(MemoryStore::new(), 1, 500_000);
    h.replica.send(one("r1", "a"), vec![], vec![]).await.unwrap();
    h.transport.take();
    let before = h.replica.clock().await.unwrap();

    // Exactly at the tolerance still works.
    h.time.set(500_000 - 60_000);
    h.replica.send(one("r1", "b"), vec![], vec![]).await.unwrap();
    let at_boundary = h.replica.clock().await.unwrap();
    assert_eq!(at_boundary.timestamp.millis, 500_000);

    h.time.set(500_000 - 60_001);
    let err = h
        .replica
        .send(one("r1", "c"), vec![], vec![])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SendError::Drift {
            next_millis: 500_000,
            now: 439_999,
            max_drift_ms: 60_000
        }
    ));
    assert_eq!(read(&h.replica, &title("r1")).await, Some(Value::from("b")));
    assert_eq!(h.replica.clock().await.unwrap(), at_boundary);
    assert_ne!(at_boundary, before);
    assert_eq!(h.transport.take().len(), 1);
}

#[tokio::test]
async fn counter_overflow_aborts_without_writing() {
    let h = harness(MemoryStore::new(), 1, 7_000);
    let node_id = h.replica.node_id();
    let saturated = Clock {
        timestamp: Timestamp::new(7_000, u16::MAX - 1, node_id),
        digest: DigestNode::new(),
    };
    h.replica
        .with_storage(|store| {
            let mut tx = store.begin().unwrap();
            tx.write_clock(&saturated).unwrap();
            tx.commit().unwrap();
        })
        .await;

    // The last counter value is still available.
    h.replica.send(one("r1", "a"), vec![], vec![]).await.unwrap();
    let full = h.replica.clock().await.unwrap();
    assert_eq!(full.timestamp, Timestamp::new(7_000, u16::MAX, node_id));

    let err = h
        .replica
        .send(one("r2", "b"), vec![], vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::CounterOverflow { millis: 7_000 }));
    assert_eq!(read(&h.replica, &title("r2")).await, None);
    assert_eq!(h.replica.clock().await.unwrap(), full);

    // Once the wall clock moves on, sends resume.
    h.time.advance(1);
    h.replica.send(one("r2", "b"), vec![], vec![]).await.unwrap();
}

#[tokio::test]
async fn dispatch_failure_is_reported_after_commit() {
    let h = harness(MemoryStore::new(), 1, 1_000);
    h.transport.refuse.store(true, Ordering::SeqCst);

    let err = h
        .replica
        .send(one("r1", "a"), vec![], vec![])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SendError::Unknown {
            stage: SendStage::Syncing,
            ..
        }
    ));
    assert!(err.is_committed());
    assert_eq!(read(&h.replica, &title("r1")).await, Some(Value::from("a")));

    h.transport.refuse.store(false, Ordering::SeqCst);
    h.replica.resync().await.unwrap();
    let sent = h.transport.take();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].mutations.is_empty());
    assert_eq!(sent[0].clock, h.replica.clock().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_share_a_timestamp() {
    let h = harness(MemoryStore::new(), 1, 42_000);
    let replica = Arc::new(h.replica);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let replica = Arc::clone(&replica);
            tokio::spawn(async move {
                replica
                    .send(one(&format!("r{i}"), "x"), vec![], vec![])
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let clock = replica.clock().await.unwrap();
    assert_eq!(clock.digest.len(), 32);
    assert_eq!(clock.timestamp, Timestamp::new(42_000, 31, replica.node_id()));

    let mut stamps: Vec<Timestamp> = h
        .transport
        .take()
        .iter()
        .map(|i| i.mutations[0].timestamp)
        .collect();
    stamps.sort();
    stamps.dedup();
    assert_eq!(stamps.len(), 32);
}

#[tokio::test]
async fn concurrent_writers_converge_on_third_replica() {
    let a = harness(MemoryStore::new(), 1, 1_000);
    let b = harness(MemoryStore::new(), 2, 2_000);
    a.replica.send(one("r1", "from-a"), vec![], vec![]).await.unwrap();
    b.replica.send(one("r1", "from-b"), vec![], vec![]).await.unwrap();
    let from_a = answer_from(&a.transport.take());
    let from_b = answer_from(&b.transport.take());

    for (node, order) in [(3, [&from_a, &from_b]), (4, [&from_b, &from_a])] {
        let c = harness(MemoryStore::new(), node, 3_000);
        let mut refreshes = c.queries.subscribe();
        for received in order {
            let outcome = c.replica.receive(received.clone()).await.unwrap();
            assert_eq!(outcome.applied, 1);
        }

        assert_eq!(
            read(&c.replica, &title("r1")).await,
            Some(Value::from("from-b"))
        );
        let clock = c.replica.clock().await.unwrap();
        assert_eq!(clock.digest.len(), 2);
        assert_eq!(clock.timestamp.node_id, Uuid::from_bytes([node; 16]));
        assert!(clock.timestamp.millis >= 3_000);
        assert_eq!(refreshes.recv().await.unwrap(), QueryRefresh::AfterReceive);
    }
}

#[tokio::test]
async fn receive_pushes_back_what_the_peer_lacks() {
    let local = harness(MemoryStore::new(), 1, 120_000);
    local
        .replica
        .send(one("r1", "mine"), vec![], vec![])
        .await
        .unwrap();
    local.transport.take();

    // Peer knows nothing.
    let empty_answer = ReceivedSync {
        mutations: vec![],
        digest: DigestNode::new(),
        previous_diff: None,
    };
    let outcome = local.replica.receive(empty_answer.clone()).await.unwrap();
    assert_eq!(outcome.applied, 0);
    let range = match outcome.divergence {
        Divergence::Requested(range) => range,
        other => panic!("expected a divergence, got {other:?}"),
    };
    assert!(range.start_millis <= 120_000);

    let pushed = local.transport.take();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].mutations.len(), 1);
    assert_eq!(pushed[0].previous_diff, Some(range.clone()));

    // The peer answers with the same gap again: stop instead of looping.
    let outcome = local
        .replica
        .receive(ReceivedSync {
            previous_diff: Some(range.clone()),
            ..empty_answer
        })
        .await
        .unwrap();
    assert_eq!(outcome.divergence, Divergence::Stalled(range));
    assert!(local.transport.take().is_empty());
}

#[tokio::test]
async fn receive_is_idempotent_and_converges() {
    let a = harness(MemoryStore::new(), 1, 60_000);
    let b = harness(MemoryStore::new(), 2, 60_000);
    a.replica.send(one("r1", "a"), vec![], vec![]).await.unwrap();
    let answer = answer_from(&a.transport.take());

    let first = b.replica.receive(answer.clone()).await.unwrap();
    assert_eq!(first.applied, 1);
    assert_eq!(first.divergence, Divergence::None);

    let clock = b.replica.clock().await.unwrap();
    let again = b.replica.receive(answer).await.unwrap();
    assert_eq!(again.applied, 0);
    assert_eq!(again.divergence, Divergence::None);
    assert_eq!(b.replica.clock().await.unwrap(), clock);
}

#[tokio::test]
async fn repeated_mutation_in_one_answer_is_merged_once() {
    let a = harness(MemoryStore::new(), 1, 60_000);
    let b = harness(MemoryStore::new(), 2, 60_000);
    let c = harness(MemoryStore::new(), 2, 60_000);
    a.replica.send(one("r1", "a"), vec![], vec![]).await.unwrap();
    let answer = answer_from(&a.transport.take());

    let mut doubled = answer.clone();
    doubled.mutations.extend(answer.mutations.clone());

    let outcome = b.replica.receive(doubled).await.unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.divergence, Divergence::None);

    c.replica.receive(answer).await.unwrap();
    let clock = b.replica.clock().await.unwrap();
    assert_eq!(clock, c.replica.clock().await.unwrap());
    assert_eq!(clock.digest.len(), 1);
}

#[tokio::test]
async fn own_node_id_from_peer_is_rejected() {
    let a = harness(MemoryStore::new(), 1, 60_000);
    let twin = harness(MemoryStore::new(), 1, 60_000);
    twin.replica.send(one("r1", "twin"), vec![], vec![]).await.unwrap();
    let answer = answer_from(&twin.transport.take());

    let err = a.replica.receive(answer).await.unwrap_err();
    assert!(matches!(err, ReceiveError::Clock(_)));
    assert_eq!(read(&a.replica, &title("r1")).await, None);
}

#[tokio::test]
async fn sqlite_replica_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica.db");

    let node_id = {
        let h = harness(SqliteStore::open(&path).unwrap(), 5, 90_000);
        h.replica.send(one("r1", "kept"), vec![], vec![]).await.unwrap();
        h.replica.node_id()
    };

    let h = harness(SqliteStore::open(&path).unwrap(), 6, 90_000);
    assert_eq!(h.replica.node_id(), node_id);
    assert_eq!(read(&h.replica, &title("r1")).await, Some(Value::from("kept")));

    h.replica.send(one("r1", "next"), vec![], vec![]).await.unwrap();
    let clock = h.replica.clock().await.unwrap();
    assert_eq!(clock.timestamp, Timestamp::new(90_000, 1, node_id));
    assert_eq!(clock.digest.len(), 2);
}
