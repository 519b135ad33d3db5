//! End-to-end behavior of the sync layer over an in-process source:
//! guard semantics, close semantics, multi-table routing, failure paths,
//! and consumer independence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use ledgersync_client::{
    ChangeEvent, FetchError, FetchFn, GuardState, Operation, SyncClient, TableId,
};
use ledgersync_core::testing::MockEventSource;
use ledgersync_core::ChangeEventSource;

/// Helper: client over a fresh mock source.
fn make_client() -> (Arc<MockEventSource>, SyncClient) {
    let source = Arc::new(MockEventSource::new());
    let client = SyncClient::new(Arc::clone(&source) as Arc<dyn ChangeEventSource>);
    (source, client)
}

/// Helper: fetch fn that counts executions.
fn counting_fetch() -> (FetchFn, Arc<AtomicU64>) {
    let count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&count);
    let fetch: FetchFn = Arc::new(move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    (fetch, count)
}

/// Lets spawned fetch tasks run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

// --- First-fetch guard ---

#[tokio::test]
async fn n_events_trigger_n_minus_one_refetches() {
    let (source, client) = make_client();
    let (fetch, count) = counting_fetch();

    let query = client
        .synced_query(TableId::from("sales"), fetch)
        .await
        .unwrap();
    settle().await;
    // Mount-time load only.
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let sales = TableId::from("sales");
    for i in 0..4 {
        source.emit(&sales, Operation::Insert, json!({"id": i}));
    }
    settle().await;

    // First event absorbed, three refetches.
    assert_eq!(count.load(Ordering::SeqCst), 1 + 3);
    let metrics = query.refetch_metrics();
    assert_eq!(metrics.absorbed, 1);
    assert_eq!(metrics.launched, 3);
}

#[tokio::test]
async fn mount_then_single_insert_refetches_once() {
    let (source, client) = make_client();

    // Backend truth and the consumer's rendered copy.
    let backend: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(
        (0..5).map(|i| json!({"id": i})).collect(),
    ));
    let rendered: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let fetches = Arc::new(AtomicU64::new(0));

    let fetch: FetchFn = {
        let backend = Arc::clone(&backend);
        let rendered = Arc::clone(&rendered);
        let fetches = Arc::clone(&fetches);
        Arc::new(move || {
            let backend = Arc::clone(&backend);
            let rendered = Arc::clone(&rendered);
            let fetches = Arc::clone(&fetches);
            Box::pin(async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                *rendered.lock() = backend.lock().clone();
                Ok(())
            })
        })
    };

    let orders = TableId::from("orders");
    let query = client.synced_query(orders.clone(), fetch).await.unwrap();
    assert_eq!(query.guard_state(), GuardState::Priming);
    settle().await;

    // Initial load reflects mount-time state.
    assert_eq!(rendered.lock().len(), 5);
    assert!(query.connected());

    // A row lands; the backend grows, then the notification arrives.
    backend.lock().push(json!({"id": 5}));
    source.emit(&orders, Operation::Insert, json!({"id": 5}));
    assert_eq!(query.guard_state(), GuardState::Active);
    settle().await;

    // The first event was absorbed: still only the mount-time fetch, and
    // the rendered copy is the mount-time snapshot until the next event.
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(query.connected());

    source.emit(&orders, Operation::Insert, json!({"id": 6}));
    settle().await;
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(rendered.lock().len(), 6);
}

// --- Close semantics ---

#[tokio::test]
async fn no_refetch_after_close() {
    let (source, client) = make_client();
    let (fetch, count) = counting_fetch();

    let sales = TableId::from("sales");
    let query = client.synced_query(sales.clone(), fetch).await.unwrap();

    source.emit(&sales, Operation::Insert, json!({"id": 1})); // absorbed
    source.emit(&sales, Operation::Insert, json!({"id": 2}));
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 2); // initial + 1 refetch

    query.close();
    source.emit(&sales, Operation::Insert, json!({"id": 3}));
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn no_on_change_after_drop() {
    let (source, client) = make_client();
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));

    let sales = TableId::from("sales");
    {
        let sink = Arc::clone(&seen);
        let _sync = client
            .change_sync(vec![sales.clone()], move |_table, event| {
                sink.lock().push(event);
            })
            .await
            .unwrap();

        source.emit(&sales, Operation::Insert, json!({"id": 1}));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(client.active_channels(), 1);
    } // dropped — unmount

    assert_eq!(client.active_channels(), 0);
    source.emit(&sales, Operation::Insert, json!({"id": 2}));
    assert_eq!(seen.lock().len(), 1);
}

// --- Multi-table routing ---

#[tokio::test]
async fn multi_table_events_reach_one_handler_tagged() {
    let (source, client) = make_client();
    let seen: Arc<Mutex<Vec<(TableId, Operation)>>> = Arc::new(Mutex::new(Vec::new()));

    let sales = TableId::from("sales");
    let expenses = TableId::from("expenses");
    let sink = Arc::clone(&seen);
    let _sync = client
        .change_sync(
            vec![sales.clone(), expenses.clone()],
            move |table, event| {
                sink.lock().push((table.clone(), event.operation));
            },
        )
        .await
        .unwrap();

    // One channel, six listeners, one handler.
    assert_eq!(client.active_channels(), 1);

    source.emit(&sales, Operation::Insert, json!({"id": 1}));
    source.emit(&expenses, Operation::Delete, json!({"id": 2}));

    let seen = seen.lock();
    assert_eq!(
        seen.as_slice(),
        [
            (sales, Operation::Insert),
            (expenses, Operation::Delete),
        ]
    );
}

#[tokio::test]
async fn multi_table_query_shares_one_fetch() {
    let (source, client) = make_client();
    let (fetch, count) = counting_fetch();

    let sales = TableId::from("sales");
    let customers = TableId::from("customers");
    let _query = client
        .synced_query_multi(vec![sales.clone(), customers.clone()], fetch)
        .await
        .unwrap();

    source.emit(&sales, Operation::Insert, json!({"id": 1})); // absorbed
    source.emit(&customers, Operation::Update, json!({"id": 2}));
    source.emit(&sales, Operation::Delete, json!({"id": 1}));
    settle().await;

    // initial + 2 refetches, regardless of which table changed
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

// --- Idempotence under at-least-once delivery ---

#[tokio::test]
async fn duplicate_delivery_refetches_to_identical_state() {
    let (source, client) = make_client();

    let backend: Arc<Mutex<Vec<Value>>> =
        Arc::new(Mutex::new(vec![json!({"id": 1}), json!({"id": 2})]));
    let rendered: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let fetch: FetchFn = {
        let backend = Arc::clone(&backend);
        let rendered = Arc::clone(&rendered);
        Arc::new(move || {
            let backend = Arc::clone(&backend);
            let rendered = Arc::clone(&rendered);
            Box::pin(async move {
                *rendered.lock() = backend.lock().clone();
                Ok(())
            })
        })
    };

    let sales = TableId::from("sales");
    let query = client.synced_query(sales.clone(), fetch).await.unwrap();
    settle().await;

    source.emit(&sales, Operation::Insert, json!({"id": 2})); // absorbed

    // The source redelivers the same change twice (at-least-once).
    source.emit(&sales, Operation::Insert, json!({"id": 2}));
    settle().await;
    let after_once = rendered.lock().clone();

    source.emit(&sales, Operation::Insert, json!({"id": 2}));
    settle().await;
    let after_twice = rendered.lock().clone();

    // Refetch asks for authoritative state, so the duplicate changes nothing.
    assert_eq!(after_once, after_twice);
    assert_eq!(query.refetch_metrics().launched, 2);
}

// --- Failure paths ---

#[tokio::test]
async fn failed_subscribe_stays_offline_but_initial_fetch_runs() {
    let (source, client) = make_client();
    source.fail_subscribes(true);
    let (fetch, count) = counting_fetch();

    let sales = TableId::from("sales");
    let query = client.synced_query(sales.clone(), fetch).await.unwrap();
    settle().await;

    assert!(!query.connected());
    // Mount-time load is independent of the subscription.
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Nothing is registered at the source, so no event ever arrives and
    // the sync layer never triggers a refetch.
    assert_eq!(source.emit(&sales, Operation::Insert, json!({})), 0);
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(query.guard_state(), GuardState::Priming);
}

#[tokio::test]
async fn mid_session_fault_goes_offline_without_replay() {
    let (source, client) = make_client();
    let (fetch, count) = counting_fetch();

    let sales = TableId::from("sales");
    let query = client.synced_query(sales.clone(), fetch).await.unwrap();
    assert!(query.connected());

    let mut changes = query.connection_changes();
    source.sever_all();
    assert!(!query.connected());
    changes.changed().await.unwrap();
    assert!(!changes.borrow().is_connected());

    // No reconciliation fetch on the fault.
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1); // initial only
}

#[tokio::test]
async fn fetch_errors_reach_the_consumer_hook() {
    let (source, client) = make_client();
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let fetch: FetchFn = Arc::new(|| {
        Box::pin(async { Err::<(), FetchError>("permission denied".into()) })
    });
    let sink = Arc::clone(&errors);
    let sales = TableId::from("sales");
    let _query = client
        .synced_query_with_hooks(
            vec![sales.clone()],
            fetch,
            Arc::new(move |err| sink.lock().push(err.to_string())),
        )
        .await
        .unwrap();

    source.emit(&sales, Operation::Insert, json!({})); // absorbed
    source.emit(&sales, Operation::Insert, json!({}));
    settle().await;

    // Mount-time load and the refetch both failed into the hook.
    assert_eq!(
        errors.lock().as_slice(),
        ["permission denied", "permission denied"]
    );
}

// --- Consumer independence ---

#[tokio::test]
async fn consumers_are_independent() {
    let (source, client) = make_client();
    let count_a = Arc::new(AtomicU64::new(0));
    let count_b = Arc::new(AtomicU64::new(0));

    let customers = TableId::from("customers");
    let a_counter = Arc::clone(&count_a);
    let a = client
        .change_sync(vec![customers.clone()], move |_t, _e| {
            a_counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    let b_counter = Arc::clone(&count_b);
    let _b = client
        .change_sync(vec![customers.clone()], move |_t, _e| {
            b_counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    source.emit_update(
        &customers,
        json!({"id": 1, "name": "Asha Traders"}),
        json!({"id": 1, "name": "Asha & Co"}),
    );
    assert_eq!(count_a.load(Ordering::SeqCst), 1);
    assert_eq!(count_b.load(Ordering::SeqCst), 1);

    // Closing one channel must not suppress delivery to the other.
    a.close();
    source.emit(&customers, Operation::Update, json!({"id": 1}));
    assert_eq!(count_a.load(Ordering::SeqCst), 1);
    assert_eq!(count_b.load(Ordering::SeqCst), 2);
}

// --- Stream adapter ---

#[tokio::test]
async fn change_stream_yields_tagged_events() {
    let (source, client) = make_client();

    let reminders = TableId::from("payment_reminders");
    let mut stream = client
        .change_stream(vec![reminders.clone()])
        .await
        .unwrap();
    assert!(stream.connected());

    source.emit(&reminders, Operation::Insert, json!({"id": 1, "due": "2024-04-01"}));
    source.emit(&reminders, Operation::Delete, json!({"id": 1}));

    let (table, event) = stream.next().await.unwrap();
    assert_eq!(table, reminders);
    assert!(event.is_insert());
    assert_eq!(event.row["due"], json!("2024-04-01"));

    let (_, event) = stream.next().await.unwrap();
    assert!(event.is_delete());

    // Dropping the stream closes its channel.
    drop(stream);
    assert_eq!(client.active_channels(), 0);
}
