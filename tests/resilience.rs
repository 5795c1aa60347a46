//! Resilience tests for the pushhub delivery engine
//!
//! These tests verify behavior under failure conditions:
//! - Subscribers that never answer
//! - Subscribers that fail a few times before recovering
//! - Subscribers that never recover before their lease runs out
//! - Many subscription requests arriving at once

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use pushhub::hub::{Hub, HubConfig};
use pushhub::server::{hub_router, HubState};
use pushhub::store::{MemoryStore, NullStore, Store};
use pushhub::Subscription;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TOPIC: &str = "http://example.com/testrepo/events/push";

fn test_hub(config: HubConfig, store: Arc<dyn Store>) -> Arc<Hub> {
    Arc::new(Hub::new(config, Arc::new(|t: &str| t == TOPIC), store))
}

fn subscription(callback: &str, lease: chrono::Duration) -> Subscription {
    Subscription {
        topic: TOPIC.to_string(),
        callback: url::Url::parse(callback).unwrap(),
        secret: "s".to_string(),
        lease_expires: chrono::Utc::now() + lease,
    }
}

/// Seed a hub's registry through the store load path
async fn seed(hub: &Hub, store: &MemoryStore, subs: Vec<Subscription>) {
    store.subscribe(&subs).await.unwrap();
    hub.load().await.unwrap();
}

async fn wait_for<F: Fn() -> bool>(cond: F, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[derive(Clone)]
struct EndpointState {
    /// Deliveries observed per callback path
    hits: Arc<AtomicUsize>,
    /// How many attempts to fail with 500 before answering 200
    fail_first: usize,
    attempts: Arc<AtomicUsize>,
}

async fn counted_delivery(State(state): State<EndpointState>, Path(_id): Path<String>) -> StatusCode {
    state.hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn flaky_delivery(State(state): State<EndpointState>) -> StatusCode {
    let attempt = state.attempts.fetch_add(1, Ordering::SeqCst);
    if attempt < state.fail_first {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        state.hits.fetch_add(1, Ordering::SeqCst);
        StatusCode::OK
    }
}

/// A POST handler that never answers
async fn black_hole() -> StatusCode {
    std::future::pending::<()>().await;
    unreachable!()
}

/// Serve a delivery-target app on an ephemeral port
async fn start_endpoint(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn one_unresponsive_subscriber_does_not_block_the_rest() {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = EndpointState {
        hits: hits.clone(),
        fail_first: 0,
        attempts: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/cb/{id}", post(counted_delivery))
        .route("/hang", post(black_hole))
        .with_state(state);
    let addr = start_endpoint(app).await;

    let store = Arc::new(MemoryStore::new());
    let hub = test_hub(HubConfig::default(), store.clone());

    // 99 healthy subscribers plus one that never answers
    let mut subs: Vec<Subscription> = (0..99)
        .map(|i| subscription(&format!("http://{}/cb/{}", addr, i), chrono::Duration::hours(1)))
        .collect();
    subs.push(subscription(
        &format!("http://{}/hang", addr),
        chrono::Duration::hours(1),
    ));
    seed(&hub, &store, subs).await;
    assert_eq!(hub.subscription_count(), 100);

    // Dispatch must complete promptly regardless of the black hole
    let started = Instant::now();
    let dispatched = hub
        .notify(TOPIC, "application/json", Bytes::from_static(b"{}"))
        .await
        .unwrap();
    assert_eq!(dispatched, 100);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "notify blocked on dispatch for {:?}",
        started.elapsed()
    );

    // Everyone except the black hole receives the payload
    assert!(
        wait_for(|| hits.load(Ordering::SeqCst) == 99, Duration::from_secs(5)).await,
        "only {} of 99 deliveries arrived",
        hits.load(Ordering::SeqCst)
    );
    // The hung delivery is still in flight, pinned on its own task
    assert!(hub.in_flight_deliveries() >= 1);
}

#[tokio::test]
async fn delivery_retries_with_backoff_until_success() {
    let hits = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    let state = EndpointState {
        hits: hits.clone(),
        fail_first: 2,
        attempts: attempts.clone(),
    };
    let app = Router::new()
        .route("/cb", post(flaky_delivery))
        .with_state(state);
    let addr = start_endpoint(app).await;

    let store = Arc::new(MemoryStore::new());
    let config = HubConfig {
        retry_initial_delay: Duration::from_millis(20),
        ..Default::default()
    };
    let hub = test_hub(config, store.clone());
    seed(
        &hub,
        &store,
        vec![subscription(&format!("http://{}/cb", addr), chrono::Duration::hours(1))],
    )
    .await;

    hub.notify(TOPIC, "application/json", Bytes::from_static(b"{}"))
        .await
        .unwrap();

    assert!(
        wait_for(|| hits.load(Ordering::SeqCst) == 1, Duration::from_secs(5)).await,
        "delivery never succeeded"
    );
    // Two failures, then the success
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(wait_for(|| hub.in_flight_deliveries() == 0, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn delivery_is_abandoned_once_the_lease_expires() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let state = EndpointState {
        hits: Arc::new(AtomicUsize::new(0)),
        // Never recovers
        fail_first: usize::MAX,
        attempts: attempts.clone(),
    };
    let app = Router::new()
        .route("/cb", post(flaky_delivery))
        .with_state(state);
    let addr = start_endpoint(app).await;

    let store = Arc::new(MemoryStore::new());
    let config = HubConfig {
        retry_initial_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let hub = test_hub(config, store.clone());
    seed(
        &hub,
        &store,
        vec![subscription(
            &format!("http://{}/cb", addr),
            chrono::Duration::milliseconds(200),
        )],
    )
    .await;

    hub.notify(TOPIC, "application/json", Bytes::from_static(b"{}"))
        .await
        .unwrap();

    // The task must give up by itself once the lease passes
    assert!(
        wait_for(|| hub.in_flight_deliveries() == 0, Duration::from_secs(5)).await,
        "delivery task never gave up"
    );
    let attempts_at_abandon = attempts.load(Ordering::SeqCst);
    assert!(attempts_at_abandon >= 1);

    // No further attempts after abandonment
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), attempts_at_abandon);
}

async fn echo_challenge(
    Path(_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> String {
    params.get("hub.challenge").cloned().unwrap_or_default()
}

#[tokio::test]
async fn concurrent_subscribes_all_register() {
    let app = Router::new().route("/cb/{id}", get(echo_challenge));
    let callback_addr = start_endpoint(app).await;

    let hub = test_hub(HubConfig::default(), Arc::new(NullStore));
    let hub_app = hub_router("/hub", HubState { hub: hub.clone() });
    let hub_addr = start_endpoint(hub_app).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let hub_url = format!("http://{}/hub", hub_addr);
        let callback = format!("http://{}/cb/{}", callback_addr, i);
        handles.push(tokio::spawn(async move {
            let response = reqwest::Client::new()
                .post(hub_url)
                .form(&[
                    ("hub.mode", "subscribe"),
                    ("hub.topic", TOPIC),
                    ("hub.callback", callback.as_str()),
                    ("hub.secret", "s"),
                ])
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(
        wait_for(|| hub.subscription_count() == 50, Duration::from_secs(5)).await,
        "only {} of 50 subscriptions registered",
        hub.subscription_count()
    );
}
