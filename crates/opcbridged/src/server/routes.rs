//! Read-only HTTP routes.
//!
//! - `GET /api/opcua_data` - full snapshot, `{ endpoint: { variable: number } }`
//! - `GET /api/status` - `{ endpoint: EndpointStatus }`
//! - `GET /health` - `{ "status": "ok", "utc_time": <RFC 3339> }`

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use opcbridge_core::{EndpointKey, Snapshot};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::BridgeState;
use crate::status::EndpointStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub utc_time: String,
}

/// Builds the application router over `state`.
///
/// `cors_origins` that are not valid header values are skipped with a
/// warning.
pub fn router(state: BridgeState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/opcua_data", get(opcua_data))
        .route("/api/status", get(status))
        .route("/health", get(health))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn opcua_data(State(state): State<BridgeState>) -> Json<Snapshot> {
    Json(state.snapshot.read_all())
}

async fn status(State(state): State<BridgeState>) -> Json<BTreeMap<EndpointKey, EndpointStatus>> {
    Json(state.status.read_all())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        utc_time: Utc::now().to_rfc3339(),
    })
}
