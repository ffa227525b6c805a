use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use botpool_core::capture::CaptureBridge;
use botpool_core::rate_gate::{RateGate, DEFAULT_MAX_REQUESTS_5S};
use botpool_core::registry::SessionRegistry;
use botpool_core::{AppState, CAPTURE_IDENTITY};
use botpool_gateway::{GatewayError, ShardManager, VoiceBackend};
use botpool_models::DispatchCounts;
use botpool_store::{keys, MemoryStore, Store};
use tower::ServiceExt;

struct StubSession {
    latency: Duration,
    succeed: bool,
    calls: AtomicUsize,
}

impl StubSession {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::ZERO,
            succeed: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            succeed: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceBackend for StubSession {
    async fn apply_voice_state(
        &self,
        _guild_id: u64,
        _user_id: u64,
        _mute: bool,
        _deaf: bool,
    ) -> Result<(), GatewayError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(())
        } else {
            Err(GatewayError::Api {
                status: 500,
                body: String::new(),
            })
        }
    }
}

struct TestHarness {
    app: Router,
    memory: MemoryStore,
    registry: Arc<SessionRegistry>,
}

impl TestHarness {
    fn new(ack_timeout: Duration, max_workers: usize, primary: Arc<dyn VoiceBackend>) -> Self {
        let memory = MemoryStore::new();
        let store = Store::Memory(memory.clone());
        let rate_gate = RateGate::new(store.clone(), DEFAULT_MAX_REQUESTS_5S);
        let registry = SessionRegistry::new(store.clone());
        let capture = CaptureBridge::new(store.clone(), rate_gate.clone(), ack_timeout);
        let state = AppState {
            store,
            registry: registry.clone(),
            rate_gate,
            capture,
            primary: Arc::new(ShardManager::from_backends(vec![primary])),
            max_workers,
        };
        let app = botpool_api::build_router().with_state(state);
        Self {
            app,
            memory,
            registry,
        }
    }

    async fn add_secondary(&self, guild_id: u64, hash: &str, session: Arc<dyn VoiceBackend>) {
        self.registry.register(hash, session, None).await;
        self.memory.set_add(&keys::guild_tokens(guild_id), hash);
    }

    /// Pin the capture sentinel so Tier B is skipped without waiting.
    fn silence_capture(&self, guild_id: u64) {
        self.memory.set_with_ttl(
            &keys::rate_counter(guild_id, CAPTURE_IDENTITY),
            DEFAULT_MAX_REQUESTS_5S,
            Duration::from_secs(300),
        );
    }

    async fn post_modify(&self, guild: &str, code: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/modify/{guild}/{code}"))
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }
}

fn counts(body: &str) -> DispatchCounts {
    serde_json::from_str(body).expect("counts body")
}

#[tokio::test]
async fn batch_lands_on_a_secondary_session() {
    let primary = StubSession::ok();
    let harness = TestHarness::new(Duration::from_millis(100), 8, primary.clone());
    let secondaries = [StubSession::ok(), StubSession::ok(), StubSession::ok()];
    for (i, session) in secondaries.iter().enumerate() {
        harness
            .add_secondary(100, &format!("h{}", i + 1), session.clone())
            .await;
    }

    let (status, body) = harness
        .post_modify(
            "100",
            "abc",
            r#"{"premium":3,"users":[{"userID":42,"mute":true,"deaf":false}]}"#,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        counts(&body),
        DispatchCounts {
            worker: 1,
            capture: 0,
            official: 0,
            rate_limit: 0
        }
    );
    let total: usize = secondaries.iter().map(|s| s.calls()).sum();
    assert_eq!(total, 1);
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn free_tier_goes_to_the_capture_worker() {
    let harness = TestHarness::new(Duration::from_millis(1000), 8, StubSession::ok());

    // A capture worker that acks "true" shortly after the request arrives.
    let worker_store = harness.memory.clone();
    tokio::spawn(async move {
        let mut requests = worker_store.subscribe(&keys::capture_channel("abc"));
        while let Some(raw) = requests.next_message().await {
            assert!(raw.contains("\"connectCode\":\"abc\""));
            tokio::time::sleep(Duration::from_millis(50)).await;
            worker_store.publish(&keys::ack_channel("abc", 42), "true");
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let (status, body) = harness
        .post_modify(
            "100",
            "abc",
            r#"{"premium":1,"users":[{"userID":42,"mute":true,"deaf":false}]}"#,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        counts(&body),
        DispatchCounts {
            worker: 0,
            capture: 1,
            official: 0,
            rate_limit: 0
        }
    );
}

#[tokio::test]
async fn silent_capture_worker_falls_through_to_primary() {
    let primary = StubSession::ok();
    let harness = TestHarness::new(Duration::from_millis(50), 8, primary.clone());

    let (status, body) = harness
        .post_modify(
            "100",
            "abc",
            r#"{"premium":1,"users":[{"userID":42,"mute":false,"deaf":true}]}"#,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        counts(&body),
        DispatchCounts {
            worker: 0,
            capture: 0,
            official: 1,
            rate_limit: 0
        }
    );
    assert_eq!(primary.calls(), 1);
    // The unresponsive endpoint sits out the next five minutes.
    assert_eq!(
        harness
            .memory
            .get(&keys::rate_counter(100, CAPTURE_IDENTITY)),
        Some(DEFAULT_MAX_REQUESTS_5S)
    );
}

#[tokio::test]
async fn non_numeric_guild_id_is_rejected() {
    let harness = TestHarness::new(Duration::from_millis(50), 8, StubSession::ok());
    let (status, body) = harness
        .post_modify(
            "abc",
            "abc",
            r#"{"premium":3,"users":[{"userID":42,"mute":true,"deaf":false}]}"#,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("invalid guild id"));
}

#[tokio::test]
async fn malformed_body_reports_the_decoder_message() {
    let harness = TestHarness::new(Duration::from_millis(50), 8, StubSession::ok());
    let (status, body) = harness.post_modify("100", "abc", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("error"));
}

#[tokio::test]
async fn empty_batch_is_all_zeros() {
    let primary = StubSession::ok();
    let harness = TestHarness::new(Duration::from_millis(50), 8, primary.clone());
    let (status, body) = harness
        .post_modify("100", "abc", r#"{"premium":5,"users":[]}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(counts(&body), DispatchCounts::default());
    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn unknown_premium_tier_skips_secondary_sessions() {
    let primary = StubSession::ok();
    let harness = TestHarness::new(Duration::from_millis(50), 8, primary.clone());
    let secondary = StubSession::ok();
    harness.add_secondary(100, "h1", secondary.clone()).await;
    harness.silence_capture(100);

    let (status, body) = harness
        .post_modify(
            "100",
            "abc",
            r#"{"premium":9,"users":[{"userID":42,"mute":true,"deaf":false}]}"#,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(counts(&body).official, 1);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn workers_run_the_batch_in_parallel() {
    let primary = StubSession::slow(Duration::from_millis(50));
    let harness = TestHarness::new(Duration::from_millis(50), 4, primary.clone());
    harness.silence_capture(100);

    let users: Vec<String> = (0..20)
        .map(|i| format!(r#"{{"userID":{},"mute":true,"deaf":false}}"#, i + 1))
        .collect();
    let body = format!(r#"{{"premium":0,"users":[{}]}}"#, users.join(","));

    let started = Instant::now();
    let (status, response) = harness.post_modify("100", "abc", &body).await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(counts(&response).official, 20);
    assert_eq!(primary.calls(), 20);
    // 20 users / 4 workers x 50 ms each: parallel, not serialized.
    assert!(elapsed >= Duration::from_millis(250), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
}

#[tokio::test]
async fn repeated_batches_account_every_user() {
    let primary = StubSession::ok();
    let harness = TestHarness::new(Duration::from_millis(50), 8, primary.clone());
    let secondary = StubSession::ok();
    harness.add_secondary(100, "h1", secondary).await;
    harness.silence_capture(100);

    let body = format!(
        r#"{{"premium":2,"users":[{}]}}"#,
        (0..10)
            .map(|i| format!(r#"{{"userID":{},"mute":true,"deaf":false}}"#, i + 1))
            .collect::<Vec<_>>()
            .join(",")
    );

    let (_, first) = harness.post_modify("100", "abc", &body).await;
    let (_, second) = harness.post_modify("100", "abc", &body).await;

    // Tier distribution shifts as quota burns down, but every user lands.
    assert_eq!(counts(&first).accounted(), 10);
    assert_eq!(counts(&second).accounted(), 10);
}
