use axum::{extract::State, http::HeaderMap};
use serde_json::{json, Value};

use crate::endpoint::ProtectedEndpoint;
use crate::error::GateResult;
use crate::server::bearer::extract_bearer_token;
use crate::server::response::{ApiResponse, ApiResult};
use crate::server::{AppState, USER_GROUPS};
use crate::validation::Schema;
use crate::Gatehouse;

/// GET /whoami
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "id": "8c0d...",
///     "groups": ["user"],
///     "group": "user",
///     "sessionStart": "2025-01-01T12:00:00Z",
///     "sessions": 2
///   }
/// }
/// ```
pub async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Value> {
    let token = extract_bearer_token(&headers)?;
    let data = state.endpoints.whoami.call(Value::Null, token.as_deref()).await?;
    Ok(ApiResponse::success(data))
}

pub(crate) fn whoami_endpoint(gate: &Gatehouse) -> GateResult<ProtectedEndpoint<Value>> {
    let tokens = gate.tokens().clone();

    let endpoint = gate
        .pipeline()
        .protect(&Schema::new(), USER_GROUPS.iter().copied(), move |_data, user, group| {
            let tokens = tokens.clone();
            async move {
                let sessions = tokens.session_count(&user.id).await?;
                Ok(json!({
                    "id": user.id,
                    "groups": user.groups,
                    "group": group,
                    "sessionStart": user.session_start,
                    "sessions": sessions,
                }))
            }
        })?;

    Ok(endpoint.named("whoami"))
}
