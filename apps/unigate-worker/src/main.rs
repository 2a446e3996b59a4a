use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use unigate_common::RuntimeDir;
use unigate_registry::SharedRegistry;
use unigate_worker::{build_router, heartbeat, WorkerConfig, WorkerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WorkerConfig::parse();

    let registry = Arc::new(
        SharedRegistry::load(config.config.clone())
            .with_context(|| format!("load model config from {:?}", config.config))?,
    );
    tracing::info!(
        event = "registry_loaded",
        worker_id = %config.worker_id,
        models = registry.current().len(),
    );

    let runtime_dir = RuntimeDir::new(config.runtime_dir.clone());
    tokio::spawn(heartbeat::run(runtime_dir, config.worker_id.clone()));

    let state = Arc::new(WorkerState::new(registry, config.worker_id.clone()));
    let app = build_router(state);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;

    tracing::info!(event = "worker_listening", addr = %bind_addr, worker_id = %config.worker_id);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serve")?;

    Ok(())
}
