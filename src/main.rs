use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use gatehouse::config::GateConfig;
use gatehouse::logging::init_tracing;
use gatehouse::server::{router, AppState};
use gatehouse::Gatehouse;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Reference server for the gatehouse endpoint toolkit")]
#[command(version)]
struct Args {
    #[arg(long, env = "GATEHOUSE_PORT", default_value_t = 3000, help = "Port to listen on")]
    port: u16,

    #[arg(long, env = "GATEHOUSE_CONFIG", help = "YAML configuration file; GATEHOUSE_* variables override it")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so GATEHOUSE_* settings apply to cargo run
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GateConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .with_env_overrides(),
        None => GateConfig::from_env(),
    };

    let gate = Gatehouse::builder(config)
        .setup()
        .await
        .context("failed to set up gatehouse")?;
    let state = AppState::new(gate.clone()).context("failed to build routes")?;
    if let Ok(password) = std::env::var("GATEHOUSE_ADMIN_PASSWORD") {
        let name = std::env::var("GATEHOUSE_ADMIN_NAME").unwrap_or_else(|_| "admin".to_string());
        state
            .seed_account(&name, &password, &["admin"])
            .await
            .context("failed to seed admin account")?;
    }
    let app = router(state);

    let bind_addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Gatehouse listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    gate.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received, draining");
}
