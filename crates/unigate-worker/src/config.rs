use std::path::PathBuf;

use clap::Parser;

/// CLI/ENV configuration for one Worker process.
#[derive(Debug, Clone, Parser)]
#[command(name = "unigate-worker", version, about = "Unified AI Gateway worker process")]
pub struct WorkerConfig {
    /// Bind host.
    #[arg(long, env = "UNIGATE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bind port.
    #[arg(long, env = "UNIGATE_PORT", default_value_t = 8766)]
    pub port: u16,

    /// Path to the model configuration JSON file.
    #[arg(long, env = "UNIGATE_CONFIG")]
    pub config: PathBuf,

    /// Directory for heartbeat files and other runtime state.
    #[arg(long, env = "UNIGATE_RUNTIME_DIR", default_value = "/tmp/unigate")]
    pub runtime_dir: PathBuf,

    /// Identifier used in the heartbeat filename and structured logs.
    #[arg(long, env = "UNIGATE_WORKER_ID", default_value = "0")]
    pub worker_id: String,
}
