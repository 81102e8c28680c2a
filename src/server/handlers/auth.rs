use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse;
use crate::endpoint::{Endpoint, ProtectedEndpoint};
use crate::error::{GateError, GateResult};
use crate::server::bearer::extract_bearer_token;
use crate::server::response::{ApiResponse, ApiResult};
use crate::server::{AppState, UserDirectory, SELF_REGISTER_GROUPS, USER_GROUPS};
use crate::validation::{FieldKind, Schema};
use crate::Gatehouse;

#[derive(Debug, Deserialize)]
struct Registration {
    name: String,
    password: String,
    #[serde(default)]
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Credentials {
    name: String,
    password: String,
}

/// POST /auth/register
///
/// ```json
/// { "name": "joggl", "password": "...", "groups": ["user"] }
/// ```
///
/// Groups default to `["user"]` and must come from [`SELF_REGISTER_GROUPS`].
/// Anonymous callers can never register into `admin`; such accounts are
/// created with [`AppState::seed_account`].
pub async fn register(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<Value> {
    let data = state.endpoints.register.call(body).await?;
    Ok(ApiResponse::created(data))
}

/// POST /auth/login
///
/// Verifies the password and answers with a fresh bearer token:
///
/// ```json
/// {
///   "success": true,
///   "data": { "token": "...", "user": { "id": "...", "groups": ["user"] }, "expiresInMinutes": 30 }
/// }
/// ```
pub async fn login(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<Value> {
    let data = state.endpoints.login.call(body).await?;
    Ok(ApiResponse::success(data))
}

/// POST /auth/logout
///
/// Revokes every session of the calling user, not just the presented token.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Value> {
    let token = extract_bearer_token(&headers)?;
    let data = state.endpoints.logout.call(Value::Null, token.as_deref()).await?;
    Ok(ApiResponse::success(data))
}

pub(crate) fn register_endpoint(gate: &Gatehouse, directory: &Arc<UserDirectory>) -> GateResult<Endpoint<Value>> {
    let schema = Schema::new()
        .required("name", FieldKind::String)
        .required("password", FieldKind::String)
        .field("groups", FieldKind::Array);
    let hasher = gate.password_hasher().clone();
    let directory = directory.clone();

    let endpoint = gate.pipeline().wrap(&schema, move |data| {
        let hasher = hasher.clone();
        let directory = directory.clone();
        async move {
            let mut registration: Registration = parse(data)?;
            if registration.name.trim().is_empty() || registration.password.is_empty() {
                return Err(GateError::validation(
                    "validation error: name and password must not be empty",
                    "invalid payload",
                ));
            }
            if registration.groups.is_empty() {
                registration.groups.push(SELF_REGISTER_GROUPS[0].to_string());
            }
            check_groups(&registration.groups, SELF_REGISTER_GROUPS)?;

            let record = hasher.hash_password(&registration.password).await?;
            let user = directory
                .register(&registration.name, registration.groups, record)
                .await?;

            tracing::info!("Registered account '{}' as user {}", registration.name, user.id);
            Ok(json!({
                "id": user.id,
                "name": registration.name,
                "groups": user.groups,
            }))
        }
    })?;

    Ok(endpoint.named("register"))
}

pub(crate) fn login_endpoint(gate: &Gatehouse, directory: &Arc<UserDirectory>) -> GateResult<Endpoint<Value>> {
    let schema = Schema::new()
        .required("name", FieldKind::String)
        .required("password", FieldKind::String);
    let hasher = gate.password_hasher().clone();
    let tokens = gate.tokens().clone();
    let directory = directory.clone();
    let expires_in_minutes = gate.config().user_token_expires_in_minutes;

    let endpoint = gate.pipeline().wrap(&schema, move |data| {
        let hasher = hasher.clone();
        let tokens = tokens.clone();
        let directory = directory.clone();
        async move {
            let credentials: Credentials = parse(data)?;
            let account = directory
                .find(&credentials.name)
                .await
                .ok_or_else(invalid_credentials)?;

            if !hasher
                .is_password_correct(&credentials.password, &account.password_record)
                .await?
            {
                return Err(invalid_credentials());
            }

            let user = account.user.with_session_start(chrono::Utc::now());
            let token = tokens.issue_token(&user).await?;

            Ok(json!({
                "token": token,
                "user": user,
                "expiresInMinutes": expires_in_minutes,
            }))
        }
    })?;

    Ok(endpoint.named("login"))
}

pub(crate) fn logout_endpoint(gate: &Gatehouse) -> GateResult<ProtectedEndpoint<Value>> {
    let tokens = gate.tokens().clone();

    let endpoint = gate
        .pipeline()
        .protect(&Schema::new(), USER_GROUPS.iter().copied(), move |_data, user, _group| {
            let tokens = tokens.clone();
            async move {
                tokens.revoke_all(&user).await?;
                Ok(json!({ "loggedOut": true, "userId": user.id }))
            }
        })?;

    Ok(endpoint.named("logout"))
}

/// Reject any group outside `allowed`
pub(crate) fn check_groups(groups: &[String], allowed: &[&str]) -> GateResult<()> {
    match groups.iter().find(|group| !allowed.contains(&group.as_str())) {
        Some(denied) => Err(GateError::validation(
            format!("validation error: group \"{}\" cannot be assigned here", denied),
            "user group not allowed",
        )
        .with_data(json!({ "field": "groups", "value": denied }))),
        None => Ok(()),
    }
}

fn invalid_credentials() -> GateError {
    GateError::authentication("authentication: invalid name or password", "invalid credentials")
}
