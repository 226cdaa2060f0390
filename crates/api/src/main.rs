use std::sync::Arc;

use anyhow::Context;

use forgerev_infra::{EngineConfig, RevenueEngine};

const BIND_ADDR_ENV: &str = "FORGEREV_BIND_ADDR";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forgerev_observability::init();

    let config = EngineConfig::from_env().context("failed to load engine configuration")?;
    tracing::info!(
        day_count = ?config.day_count,
        version_conflict_retries = config.version_conflict_retries,
        "engine configured"
    );

    let engine = Arc::new(RevenueEngine::in_memory(config));
    let app = forgerev_api::app::build_app(engine).await;

    let addr = std::env::var(BIND_ADDR_ENV).unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
