//! Reference axum embedding: account registration, login, logout and whoami
//! on top of a [`Gatehouse`].

pub mod bearer;
pub mod directory;
pub mod handlers;
pub mod response;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::endpoint::{Endpoint, ProtectedEndpoint};
use crate::error::GateResult;
use crate::models::User;
use crate::Gatehouse;

pub use directory::UserDirectory;

/// Groups an account may hold. Protected routes accept any of them.
pub const USER_GROUPS: &[&str] = &["user", "admin"];

/// Groups anonymous callers may pick on `/auth/register`
pub const SELF_REGISTER_GROUPS: &[&str] = &["user"];

pub(crate) struct Endpoints {
    pub register: Endpoint<Value>,
    pub login: Endpoint<Value>,
    pub logout: ProtectedEndpoint<Value>,
    pub whoami: ProtectedEndpoint<Value>,
}

#[derive(Clone)]
pub struct AppState {
    pub gate: Gatehouse,
    pub directory: Arc<UserDirectory>,
    pub(crate) endpoints: Arc<Endpoints>,
}

impl AppState {
    /// Compile the route endpoints against `gate`
    pub fn new(gate: Gatehouse) -> GateResult<Self> {
        let directory = Arc::new(UserDirectory::new());
        let endpoints = Endpoints {
            register: handlers::auth::register_endpoint(&gate, &directory)?,
            login: handlers::auth::login_endpoint(&gate, &directory)?,
            logout: handlers::auth::logout_endpoint(&gate)?,
            whoami: handlers::whoami::whoami_endpoint(&gate)?,
        };

        Ok(Self {
            gate,
            directory,
            endpoints: Arc::new(endpoints),
        })
    }

    /// Create an account outside the public registration route, e.g. an
    /// operator-provisioned admin. Any of [`USER_GROUPS`] may be assigned.
    pub async fn seed_account(&self, name: &str, password: &str, groups: &[&str]) -> GateResult<User> {
        let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
        handlers::auth::check_groups(&groups, USER_GROUPS)?;

        let record = self.gate.password_hasher().hash_password(password).await?;
        let user = self.directory.register(name, groups, record).await?;
        tracing::info!("Seeded account '{}' as user {}", name, user.id);
        Ok(user)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/whoami", get(handlers::whoami::whoami))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GateConfig, MIN_PASSWORD_MEMORY_LIMIT_BYTES};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    async fn app() -> (Router, Gatehouse) {
        let (app, state) = app_with_state().await;
        (app, state.gate)
    }

    async fn app_with_state() -> (Router, AppState) {
        let config = GateConfig {
            crypto_token_length: 32,
            password_check_memory_limit_bytes: MIN_PASSWORD_MEMORY_LIMIT_BYTES,
            password_check_operations_limit: 1,
            password_hash_worker_amount_minimum: 1,
            password_hash_worker_amount_maximum: 1,
            ..GateConfig::default()
        };
        let gate = Gatehouse::builder(config).setup().await.unwrap();
        let state = AppState::new(gate).unwrap();
        (router(state.clone()), state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_pool() {
        let (app, gate) = app().await;
        let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["passwordWorkers"]["max"], 1);

        gate.shutdown().await;
        let (status, _) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_whoami_with_login_token() {
        let (app, state) = app_with_state().await;
        state.seed_account("joggl", "pw", &["admin"]).await.unwrap();

        let (status, body) = send(&app, post_json("/auth/login", json!({"name": "joggl", "password": "pw"}))).await;
        assert_eq!(status, StatusCode::OK);
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let request = Request::get("/whoami")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["group"], "admin");
        assert_eq!(body["data"]["sessions"], 1);

        state.gate.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_cannot_claim_admin() {
        let (app, state) = app_with_state().await;

        let (status, body) = send(
            &app,
            post_json("/auth/register", json!({"name": "mallory", "password": "pw", "groups": ["admin"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["translationKey"], "user group not allowed");
        assert!(state.directory.find("mallory").await.is_none());

        assert!(state.seed_account("root", "pw", &["superuser"]).await.is_err());
        state.gate.shutdown().await;
    }

    #[tokio::test]
    async fn test_whoami_rejects_unknown_token() {
        let (app, gate) = app().await;
        let request = Request::get("/whoami")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
        assert_eq!(body["translationKey"], "token not found");

        gate.shutdown().await;
    }
}
