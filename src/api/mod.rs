//! Operator HTTP surface using Axum
//!
//! The dashboard and its login flow live in a separate process; this crate
//! only exposes the live-stats WebSocket push and a health probe. A global
//! guard answers every request with 404 when `api.enabled` is false.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::stats::StatsBroadcaster;

/// Push cadence for WebSocket subscribers.
const PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Shared state for the API surface.
#[derive(Clone)]
pub struct ApiState {
    pub broadcaster: Arc<StatsBroadcaster>,
    pub api_enabled: bool,
}

/// Create the application router with the global enable guard.
pub fn create_app(state: ApiState) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health))
        .route("/ws/stats", get(stats_ws))
        .layer(middleware::from_fn_with_state(state.clone(), api_guard))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Global guard: a disabled API surface answers 404 to everything.
async fn api_guard(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if !state.api_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(req).await
}

/// GET /health — liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /ws/stats — upgrade to the live stats push channel.
async fn stats_ws(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| push_stats(socket, state))
}

/// Push the cached stats view until the subscriber goes away.
async fn push_stats(mut socket: WebSocket, state: ApiState) {
    let mut interval = tokio::time::interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let view = state.broadcaster.get_stats().await;
                let payload = match serde_json::to_string(&view) {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(error = %e, "Failed to serialize stats view");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
    debug!("Stats subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    use crate::crypto::{Encryptor, KeyShareClient};
    use crate::stats::{PipelineKind, StatsRegister};
    use crate::store::{ArchiveRecordStore, TrackStore};
    use crate::tracker::PackageUuidRegistry;
    use crate::upload::{
        ArchiveClient, ClearUploader, EncryptedUploader, UploadPipeline, Wallet,
    };

    async fn test_state(api_enabled: bool) -> ApiState {
        let pool = crate::store::memory_pool().await;
        let stats = Arc::new(StatsRegister::new(0));
        let tracks = Arc::new(TrackStore::new(pool.clone()));
        let records = Arc::new(ArchiveRecordStore::new(pool));
        let encryptor = Arc::new(Encryptor::new([1u8; 32]));
        let keyshare = Arc::new(KeyShareClient::new("http://127.0.0.1:1"));
        let registry = Arc::new(PackageUuidRegistry::new());

        let jwk = {
            use base64::engine::general_purpose::URL_SAFE_NO_PAD;
            use base64::Engine as _;
            use rsa::traits::{PrivateKeyParts, PublicKeyParts};
            let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
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
        };
        let wallet = Arc::new(Wallet::from_jwk_str(&jwk).unwrap());
        let archive = Arc::new(ArchiveClient::new("http://127.0.0.1:1", wallet));

        let clear = UploadPipeline::new(
            PipelineKind::Clear,
            Arc::clone(&archive),
            ClearUploader::new(
                Arc::clone(&encryptor),
                Arc::clone(&records),
                Arc::clone(&tracks),
            ),
            Arc::clone(&stats),
        );
        let encrypted = UploadPipeline::new(
            PipelineKind::Encrypted,
            archive,
            EncryptedUploader::new(encryptor, keyshare, registry, records, Arc::clone(&stats)),
            Arc::clone(&stats),
        );

        ApiState {
            broadcaster: Arc::new(StatsBroadcaster::new(stats, tracks, clear, encrypted)),
            api_enabled,
        }
    }

    #[tokio::test]
    async fn test_health_when_enabled() {
        let app = create_app(test_state(true).await);
        let resp = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_surface_answers_404_everywhere() {
        let app = create_app(test_state(false).await);
        for uri in ["/health", "/ws/stats", "/anything"] {
            let resp = app
                .clone()
                .oneshot(HttpRequest::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "uri {uri}");
        }
    }
}
