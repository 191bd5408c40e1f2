//! Shared fixtures for the integration suites: a generated wallet, a
//! scripted in-process gateway, and feed/observation builders.

// Each test binary uses its own subset of these fixtures.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;

use aerovault::upload::Wallet;

/// Generate a JWK document for a fresh 2048-bit wallet.
pub fn generated_jwk() -> String {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("keygen");
    let primes = key.primes();
    serde_json::json!({
        "kty": "RSA",
        "n": URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
        "e": URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        "d": URL_SAFE_NO_PAD.encode(key.d().to_bytes_be()),
        "p": URL_SAFE_NO_PAD.encode(primes[0].to_bytes_be()),
        "q": URL_SAFE_NO_PAD.encode(primes[1].to_bytes_be()),
    })
    .to_string()
}

pub fn test_wallet() -> Arc<Wallet> {
    Arc::new(Wallet::from_jwk_str(&generated_jwk()).expect("wallet"))
}

/// One upload the fake gateway accepted.
#[derive(Debug, Clone)]
pub struct CapturedUpload {
    pub tx_id: String,
    pub tags: Vec<(String, String)>,
    /// Decoded payload bytes
    pub data: Vec<u8>,
}

impl CapturedUpload {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn tags_named(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

#[derive(Clone)]
struct GatewayState {
    uploads: Arc<Mutex<Vec<CapturedUpload>>>,
    hits: Arc<AtomicUsize>,
    /// Respond 503 to this many submissions before accepting
    fail_first: usize,
}

/// An in-process archive gateway: `/tx` accepts signed envelopes (failing
/// the first `fail_first` submissions with 503), `/graphql` answers with
/// the newest upload, and `/{tx_id}` serves its raw payload back.
pub struct FakeGateway {
    pub url: String,
    uploads: Arc<Mutex<Vec<CapturedUpload>>>,
    hits: Arc<AtomicUsize>,
}

impl FakeGateway {
    pub async fn spawn(fail_first: usize) -> Self {
        let uploads: Arc<Mutex<Vec<CapturedUpload>>> = Arc::new(Mutex::new(Vec::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let state = GatewayState {
            uploads: Arc::clone(&uploads),
            hits: Arc::clone(&hits),
            fail_first,
        };

        let app = Router::new()
            .route("/tx", post(submit))
            .route("/graphql", post(graphql))
            .route("/:tx_id", get(download))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake gateway");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}"),
            uploads,
            hits,
        }
    }

    pub fn uploads(&self) -> Vec<CapturedUpload> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    /// Total `/tx` submissions seen, including rejected ones.
    pub fn submissions(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn submit(
    State(state): State<GatewayState>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    if n < state.fail_first {
        return (axum::http::StatusCode::SERVICE_UNAVAILABLE, "backpressure").into_response();
    }

    let tags = body["tags"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .filter_map(|t| {
                    Some((
                        t["name"].as_str()?.to_string(),
                        t["value"].as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();
    let data = body["data"]
        .as_str()
        .and_then(|d| STANDARD.decode(d).ok())
        .unwrap_or_default();

    let mut uploads = state.uploads.lock().expect("uploads lock");
    let tx_id = format!("tx-{}", uploads.len());
    uploads.push(CapturedUpload {
        tx_id: tx_id.clone(),
        tags,
        data,
    });
    Json(serde_json::json!({ "id": tx_id })).into_response()
}

async fn graphql(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let uploads = state.uploads.lock().expect("uploads lock");
    let edges: Vec<serde_json::Value> = uploads
        .last()
        .map(|u| vec![serde_json::json!({ "node": { "id": u.tx_id } })])
        .unwrap_or_default();
    Json(serde_json::json!({ "data": { "transactions": { "edges": edges } } }))
}

async fn download(
    State(state): State<GatewayState>,
    axum::extract::Path(tx_id): axum::extract::Path<String>,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    let uploads = state.uploads.lock().expect("uploads lock");
    match uploads.iter().find(|u| u.tx_id == tx_id) {
        Some(upload) => upload.data.clone().into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "no such tx").into_response(),
    }
}

/// A feed snapshot with the given aircraft.
pub fn feed(now: f64, aircraft: Vec<serde_json::Value>) -> aerovault::FeedSnapshot {
    serde_json::from_value(serde_json::json!({
        "now": now,
        "messages": 1,
        "aircraft": aircraft,
    }))
    .expect("feed json")
}

/// The KLM855 observation from the cold-start scenario.
pub fn klm855(alt_baro: i64) -> serde_json::Value {
    serde_json::json!({
        "hex": "48436b",
        "flight": "KLM855",
        "lat": 40.9258,
        "lon": 47.0615,
        "alt_baro": alt_baro,
        "gs": 575.3,
        "track": 77.65,
        "squawk": "6025",
        "emergency": "none"
    })
}
