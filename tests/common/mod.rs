use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};

use gatehouse::config::{GateConfig, MIN_PASSWORD_MEMORY_LIMIT_BYTES};
use gatehouse::server::{router, AppState};
use gatehouse::Gatehouse;

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub gate: Gatehouse,
    pub state: AppState,
    pub client: reqwest::Client,
}

/// Cheapest settings that still exercise the real KDF and worker pool
pub fn test_config() -> GateConfig {
    GateConfig {
        crypto_token_length: 32,
        password_check_memory_limit_bytes: MIN_PASSWORD_MEMORY_LIMIT_BYTES,
        password_check_operations_limit: 1,
        password_hash_worker_amount_minimum: 1,
        password_hash_worker_amount_maximum: 2,
        ..GateConfig::default()
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub async fn register(&self, name: &str, password: &str, groups: &[&str]) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({ "name": name, "password": password, "groups": groups }))
            .send()
            .await?)
    }

    pub async fn login(&self, name: &str, password: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "name": name, "password": password }))
            .send()
            .await?)
    }

    /// Register, log in and return the bearer token
    pub async fn signed_in(&self, name: &str, groups: &[&str]) -> Result<String> {
        let res = self.register(name, "correct horse", groups).await?;
        anyhow::ensure!(res.status() == StatusCode::CREATED, "register failed: {}", res.status());

        let body: Value = self.login(name, "correct horse").await?.json().await?;
        body["data"]["token"]
            .as_str()
            .map(str::to_string)
            .context("login response has no token")
    }
}

/// Boot the reference server on a free port inside the current runtime
pub async fn start_server() -> Result<TestServer> {
    start_server_with(test_config()).await
}

pub async fn start_server_with(config: GateConfig) -> Result<TestServer> {
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let base_url = format!("http://127.0.0.1:{}", port);

    let gate = Gatehouse::builder(config).setup().await?;
    let state = AppState::new(gate.clone())?;
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let server = TestServer {
        port,
        base_url,
        gate,
        state,
        client: reqwest::Client::new(),
    };
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}
