use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use unigate_common::RuntimeDir;
use unigate_supervisor::{build_router, metrics, AppState, Pool, PoolConfig, SupervisorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SupervisorConfig::parse();
    let runtime_dir = RuntimeDir::new(config.runtime_dir.clone());
    if let Err(err) = runtime_dir.ensure_exists() {
        tracing::error!(event = "runtime_dir_create_failed", error = %err);
        return ExitCode::from(2);
    }

    let metrics_handle = metrics::install();

    let pool = Arc::new(Pool::new(PoolConfig {
        host: config.host.clone(),
        base_port: config.base_port,
        worker_count: config.workers,
        worker_command: config.worker_bin.clone(),
        model_config_path: config.config.to_string_lossy().to_string(),
        runtime_dir,
    }));

    pool.ensure_started().await;
    tokio::spawn(pool.clone().run_monitor_loop());

    let app = build_router(AppState {
        pool: pool.clone(),
        metrics_handle,
    });

    let bind_addr = format!("{}:{}", config.host, config.base_port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(event = "bind_failed", addr = %bind_addr, error = %err);
            return ExitCode::from(1);
        }
    };
    tracing::info!(event = "supervisor_listening", addr = %bind_addr, workers = config.workers);

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = serve.await {
        tracing::error!(event = "serve_failed", error = %err);
        return ExitCode::from(2);
    }

    pool.stop().await;
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
