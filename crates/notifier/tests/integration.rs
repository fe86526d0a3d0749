//! Integration tests for the delivery queue, worker and Matrix transport.
//!
//! Worker tests run on a paused tokio clock, so backoff sleeps of several
//! seconds complete instantly and their lengths can be asserted exactly.
//! Transport tests run against a local `wiremock` homeserver.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use herald_common::types::RoomId;
use herald_notifier::{
    BackoffPolicy, Deliverer, DeliveryError, DeliveryQueue, DeliveryWorker, MatrixClient,
    MatrixConfig, WorkerState,
};

// ============================================================
// Helpers
// ============================================================

#[derive(Debug, Clone)]
struct Call {
    room: RoomId,
    body: String,
    at: Instant,
}

/// Deliverer that plays back scripted outcomes and records every call.
///
/// Once the script is exhausted it answers with `fallback` (success by default).
#[derive(Clone, Default)]
struct RecordingDeliverer {
    script: Arc<Mutex<VecDeque<Result<(), DeliveryError>>>>,
    fallback: Arc<Mutex<Option<DeliveryError>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingDeliverer {
    fn scripted(outcomes: Vec<Result<(), DeliveryError>>) -> Self {
        let deliverer = Self::default();
        deliverer.script.lock().extend(outcomes);
        deliverer
    }

    fn always_failing(error: DeliveryError) -> Self {
        let deliverer = Self::default();
        *deliverer.fallback.lock() = Some(error);
        deliverer
    }

    fn push(&self, outcome: Result<(), DeliveryError>) {
        self.script.lock().push_back(outcome);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn bodies(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.body).collect()
    }

    /// Time between consecutive calls.
    fn gaps(&self) -> Vec<Duration> {
        self.calls()
            .windows(2)
            .map(|pair| pair[1].at - pair[0].at)
            .collect()
    }
}

impl Deliverer for RecordingDeliverer {
    async fn deliver(&self, destination: &RoomId, body: &str) -> Result<(), DeliveryError> {
        self.calls.lock().push(Call {
            room: destination.clone(),
            body: body.to_string(),
            at: Instant::now(),
        });
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => match self.fallback.lock().clone() {
                Some(error) => Err(error),
                None => Ok(()),
            },
        }
    }
}

fn room() -> RoomId {
    RoomId::from("!ops:example.org")
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

struct Harness {
    queue: DeliveryQueue,
    deliverer: RecordingDeliverer,
    cancel: CancellationToken,
    stats: Arc<herald_notifier::WorkerStats>,
    handle: tokio::task::JoinHandle<()>,
}

fn start(deliverer: RecordingDeliverer, policy: BackoffPolicy) -> Harness {
    let queue = DeliveryQueue::new();
    let cancel = CancellationToken::new();
    let worker = DeliveryWorker::new(queue.clone(), deliverer.clone(), policy, cancel.clone());
    let stats = worker.stats();
    let handle = worker.spawn();
    Harness {
        queue,
        deliverer,
        cancel,
        stats,
        handle,
    }
}

impl Harness {
    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(secs(5), self.handle)
            .await
            .expect("worker did not stop")
            .expect("worker panicked");
    }
}

// ============================================================
// Ordering
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_delivers_in_enqueue_order() {
    let h = start(RecordingDeliverer::default(), BackoffPolicy::default());

    h.queue.enqueue(room(), "A");
    h.queue.enqueue(room(), "B");
    h.queue.enqueue(room(), "C");
    tokio::time::sleep(secs(1)).await;

    assert_eq!(h.deliverer.bodies(), vec!["A", "B", "C"]);
    assert!(h.deliverer.calls().iter().all(|c| c.room == room()));
    assert!(h.queue.is_empty());
    assert_eq!(h.stats.snapshot().delivered, 3);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_fifo_across_rooms_and_bursts() {
    let h = start(RecordingDeliverer::default(), BackoffPolicy::default());

    let expected: Vec<String> = (0..200).map(|i| format!("msg-{i}")).collect();
    for (i, body) in expected.iter().enumerate() {
        let destination = RoomId::new(format!("!room{}:example.org", i % 3));
        h.queue.enqueue(destination, body.clone());
    }
    tokio::time::sleep(secs(1)).await;

    assert_eq!(h.deliverer.bodies(), expected);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_retried_entry_keeps_its_place() {
    let deliverer = RecordingDeliverer::scripted(vec![Err(DeliveryError::network("down"))]);
    let h = start(deliverer, BackoffPolicy::default());

    h.queue.enqueue(room(), "A");
    h.queue.enqueue(room(), "B");
    tokio::time::sleep(secs(30)).await;

    assert_eq!(h.deliverer.bodies(), vec!["A", "A", "B"]);
    h.stop().await;
}

// ============================================================
// Retry and backoff
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_transient_twice_then_success() {
    let deliverer = RecordingDeliverer::scripted(vec![
        Err(DeliveryError::server(502, "bad gateway")),
        Err(DeliveryError::timeout(30)),
        Ok(()),
    ]);
    let h = start(deliverer, BackoffPolicy::default());

    h.queue.enqueue(room(), "D");
    tokio::time::sleep(secs(60)).await;

    assert_eq!(h.deliverer.bodies(), vec!["D", "D", "D"]);
    assert_eq!(h.deliverer.gaps(), vec![secs(5), secs(10)]);
    assert!(h.queue.is_empty());

    let stats = h.stats.snapshot();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed_attempts, 2);

    // Backoff was reset by the success: the next failure waits the initial delay again.
    h.deliverer.push(Err(DeliveryError::network("refused")));
    h.queue.enqueue(room(), "F");
    tokio::time::sleep(secs(60)).await;

    assert_eq!(h.deliverer.bodies(), vec!["D", "D", "D", "F", "F"]);
    assert_eq!(h.deliverer.gaps().last(), Some(&secs(5)));
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_linearly_and_caps() {
    let policy = BackoffPolicy::from_secs(1, 1, 3);
    let h = start(
        RecordingDeliverer::always_failing(DeliveryError::network("down")),
        policy,
    );

    h.queue.enqueue(room(), "stuck");
    // Attempts at t = 0, 1, 3, 6, 9, ..., 99, 102: the worker is mid-sleep at 100.5s.
    tokio::time::sleep(Duration::from_millis(100_500)).await;

    let gaps = h.deliverer.gaps();
    assert_eq!(&gaps[..4], &[secs(1), secs(2), secs(3), secs(3)]);
    assert!(gaps.iter().all(|g| *g <= secs(3)));
    for (k, gap) in gaps.iter().enumerate() {
        assert_eq!(*gap, policy.delay_after(k as u32 + 1));
    }
    assert_eq!(h.deliverer.calls().len(), 35);

    // Never dropped: the entry waits in the queue during backoff.
    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.stats.snapshot().state, WorkerState::Backoff);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_default_backoff_reaches_cap() {
    let h = start(
        RecordingDeliverer::always_failing(DeliveryError::server(503, "maintenance")),
        BackoffPolicy::default(),
    );

    h.queue.enqueue(room(), "stuck");
    tokio::time::sleep(secs(4 * 3600)).await;

    let gaps = h.deliverer.gaps();
    assert_eq!(gaps[0], secs(5));
    assert_eq!(gaps[59], secs(300));
    assert_eq!(*gaps.last().unwrap(), secs(300));
    h.stop().await;
}

// ============================================================
// Client rejection
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_client_error_is_dropped_after_one_attempt() {
    let deliverer = RecordingDeliverer::scripted(vec![Err(DeliveryError::client(404, "M_NOT_FOUND"))]);
    let h = start(deliverer, BackoffPolicy::default());

    h.queue.enqueue(room(), "E");
    tokio::time::sleep(secs(60)).await;

    assert_eq!(h.deliverer.bodies(), vec!["E"]);
    assert!(h.queue.is_empty());
    assert_eq!(h.stats.snapshot().rejected, 1);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_entry_does_not_reappear() {
    let deliverer = RecordingDeliverer::scripted(vec![Err(DeliveryError::client(403, "M_FORBIDDEN"))]);
    let h = start(deliverer, BackoffPolicy::default());

    h.queue.enqueue(room(), "forbidden");
    tokio::time::sleep(secs(1)).await;
    h.queue.enqueue(room(), "next");
    h.queue.enqueue(room(), "last");
    tokio::time::sleep(secs(60)).await;

    assert_eq!(h.deliverer.bodies(), vec!["forbidden", "next", "last"]);
    // No backoff was applied after the rejection.
    assert!(h.deliverer.gaps().iter().all(|g| *g < secs(5)));
    h.stop().await;
}

// ============================================================
// Producers and shutdown
// ============================================================

/// Deliverer whose first call never completes.
#[derive(Clone, Default)]
struct StallingDeliverer {
    started: Arc<Notify>,
}

impl Deliverer for StallingDeliverer {
    async fn deliver(&self, _destination: &RoomId, _body: &str) -> Result<(), DeliveryError> {
        self.started.notify_one();
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_enqueue_does_not_wait_for_slow_delivery() {
    let queue = DeliveryQueue::new();
    let deliverer = StallingDeliverer::default();
    let started = Arc::clone(&deliverer.started);
    let worker = DeliveryWorker::new(
        queue.clone(),
        deliverer,
        BackoffPolicy::default(),
        CancellationToken::new(),
    );
    let stats = worker.stats();
    let handle = worker.spawn();

    queue.enqueue(room(), "in flight");
    tokio::time::timeout(secs(5), started.notified())
        .await
        .expect("delivery never started");
    assert_eq!(stats.snapshot().state, WorkerState::Delivering);

    let begin = std::time::Instant::now();
    for i in 0..1_000 {
        queue.enqueue(room(), format!("burst {i}"));
    }
    assert!(begin.elapsed() < secs(1));
    assert_eq!(queue.len(), 1_000);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_keeps_entry() {
    let h = start(
        RecordingDeliverer::always_failing(DeliveryError::network("down")),
        BackoffPolicy::default(),
    );

    h.queue.enqueue(room(), "pending");
    tokio::time::sleep(secs(1)).await;
    assert_eq!(h.stats.snapshot().state, WorkerState::Backoff);

    let queue = h.queue.clone();
    h.stop().await;
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.try_dequeue().unwrap().attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_idle() {
    let h = start(RecordingDeliverer::default(), BackoffPolicy::default());
    tokio::time::sleep(secs(1)).await;
    assert_eq!(h.stats.snapshot().state, WorkerState::Idle);
    h.stop().await;
}

// ============================================================
// Matrix transport
// ============================================================

fn matrix_client(server: &MockServer, timeout: Duration) -> MatrixClient {
    MatrixClient::new(MatrixConfig {
        homeserver_url: server.uri(),
        access_token: "secret-token".to_string(),
        timeout,
    })
    .unwrap()
}

const SEND_PATH: &str = r"^/_matrix/client/v3/rooms/!ops:example.org/send/m.room.message/[0-9a-f]+$";

#[tokio::test]
async fn test_matrix_sends_notice() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(SEND_PATH))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_partial_json(json!({
            "msgtype": "m.notice",
            "body": "FIRING disk full on host-1",
            "format": "org.matrix.custom.html",
            "formatted_body": "<b>FIRING</b> disk full on <code>host-1</code>"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "$1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = matrix_client(&server, secs(5));
    client
        .deliver(&room(), "<b>FIRING</b> disk full on <code>host-1</code>")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_matrix_forbidden_is_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errcode": "M_FORBIDDEN",
            "error": "User not in room"
        })))
        .mount(&server)
        .await;

    let err = matrix_client(&server, secs(5))
        .deliver(&room(), "hi")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DeliveryError::client(403, "M_FORBIDDEN: User not in room")
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_matrix_rate_limit_is_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "errcode": "M_LIMIT_EXCEEDED",
            "error": "Too many requests",
            "retry_after_ms": 2000
        })))
        .mount(&server)
        .await;

    let err = matrix_client(&server, secs(5))
        .deliver(&room(), "hi")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DeliveryError::client(429, "M_LIMIT_EXCEEDED: Too many requests")
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_matrix_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = matrix_client(&server, secs(5))
        .deliver(&room(), "hi")
        .await
        .unwrap_err();
    assert_eq!(err, DeliveryError::server(502, "bad gateway"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_matrix_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(secs(2)))
        .mount(&server)
        .await;

    let err = matrix_client(&server, Duration::from_millis(200))
        .deliver(&room(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, DeliveryError::Timeout { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_matrix_unreachable_is_network_error() {
    // Reserve a free port, then release it so nothing is listening there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = MatrixClient::new(MatrixConfig {
        homeserver_url: format!("http://{addr}"),
        access_token: "secret-token".to_string(),
        timeout: secs(5),
    })
    .unwrap();
    let err = client.deliver(&room(), "hi").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Network { .. }));
}

#[tokio::test]
async fn test_worker_retries_against_homeserver() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "$1"})))
        .expect(1)
        .mount(&server)
        .await;

    let queue = DeliveryQueue::new();
    let cancel = CancellationToken::new();
    let policy = BackoffPolicy {
        initial: Duration::from_millis(20),
        step: Duration::from_millis(20),
        max: Duration::from_millis(100),
    };
    let worker = DeliveryWorker::new(
        queue.clone(),
        matrix_client(&server, secs(5)),
        policy,
        cancel.clone(),
    );
    let stats = worker.stats();
    let handle = worker.spawn();

    queue.enqueue(room(), "eventually");

    let deadline = std::time::Instant::now() + secs(5);
    while stats.snapshot().delivered == 0 {
        assert!(std::time::Instant::now() < deadline, "message never delivered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.failed_attempts, 2);
    assert_eq!(snapshot.delivered, 1);

    cancel.cancel();
    handle.await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
