use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Behaviour knobs for the `/flaky` endpoint.
#[derive(Clone, Debug)]
pub struct MockConfig {
    /// How many `/flaky` requests stall before it starts answering.
    pub flaky_failures: usize,
    /// How long a stalled `/flaky` request sleeps before answering anyway.
    pub stall: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            flaky_failures: 0,
            stall: Duration::from_millis(500),
        }
    }
}

/// Served by `/bytes`: not valid UTF-8 in any position.
pub const BINARY_BODY: [u8; 4] = [0xff, 0xfe, 0x00, 0x80];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echoed {
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stats {
    pub flaky_hits: usize,
}

#[derive(Clone)]
struct AppState {
    stall: Duration,
    flaky_remaining: Arc<AtomicUsize>,
    flaky_hits: Arc<AtomicUsize>,
}

pub fn app() -> Router {
    app_with(MockConfig::default())
}

pub fn app_with(config: MockConfig) -> Router {
    let state = AppState {
        stall: config.stall,
        flaky_remaining: Arc::new(AtomicUsize::new(config.flaky_failures)),
        flaky_hits: Arc::new(AtomicUsize::new(0)),
    };
    Router::new()
        .route("/hello", get(hello))
        .route("/echo", post(echo))
        .route("/slow/{ms}", get(slow))
        .route("/status/{code}", get(status))
        .route("/bytes", get(bytes))
        .route("/big/{len}", get(big))
        .route("/flaky", get(flaky))
        .route("/stats", get(stats))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, MockConfig::default()).await
}

pub async fn run_with(listener: TcpListener, config: MockConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

async fn hello() -> &'static str {
    "hello"
}

async fn echo(headers: HeaderMap, body: String) -> Json<Echoed> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    Json(Echoed { body, headers })
}

async fn slow(Path(ms): Path<u64>) -> String {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    format!("slept {ms}ms")
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, format!("status {code}")),
        Err(_) => (StatusCode::BAD_REQUEST, format!("invalid status {code}")),
    }
}

async fn bytes() -> ([(header::HeaderName, &'static str); 1], Vec<u8>) {
    ([(header::CONTENT_TYPE, "application/octet-stream")], BINARY_BODY.to_vec())
}

async fn big(Path(len): Path<usize>) -> Vec<u8> {
    vec![b'a'; len]
}

async fn flaky(State(state): State<AppState>) -> &'static str {
    state.flaky_hits.fetch_add(1, Ordering::SeqCst);
    let stalled = state
        .flaky_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if stalled {
        tokio::time::sleep(state.stall).await;
        return "late";
    }
    "recovered"
}

async fn stats(State(state): State<AppState>) -> Json<Stats> {
    Json(Stats {
        flaky_hits: state.flaky_hits.load(Ordering::SeqCst),
    })
}
