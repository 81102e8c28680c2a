pub mod auth;
pub mod whoami;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::response::ApiResponse;
use super::AppState;
use crate::error::{GateError, GateResult};

/// GET /health
///
/// Reports password worker occupancy. Answers 503 once the pool is shut down.
pub async fn health(State(state): State<AppState>) -> Response {
    let pool = state.gate.password_hasher().status();
    let data = json!({
        "status": if pool.is_shut_down { "shutting_down" } else { "ok" },
        "timestamp": chrono::Utc::now(),
        "accounts": state.directory.len().await,
        "passwordWorkers": {
            "total": pool.total,
            "idle": pool.idle,
            "busy": pool.busy,
            "max": state.gate.password_hasher().max_workers(),
        },
    });

    if pool.is_shut_down {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "data": data })),
        )
            .into_response()
    } else {
        ApiResponse::success(data).into_response()
    }
}

/// Deserialize a validated payload into a typed request
pub(crate) fn parse<T: DeserializeOwned>(data: Value) -> GateResult<T> {
    serde_json::from_value(data).map_err(|e| {
        GateError::validation(format!("validation error: {}", e), "invalid payload")
    })
}
