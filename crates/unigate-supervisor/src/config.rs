use std::path::PathBuf;

use clap::Parser;

/// CLI/ENV configuration for the Supervisor process.
#[derive(Debug, Clone, Parser)]
#[command(name = "unigate-supervisor", version, about = "Unified AI Gateway pool supervisor")]
pub struct SupervisorConfig {
    /// Bind host for both the Supervisor's own surface and the Workers it spawns.
    #[arg(long, env = "UNIGATE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Base port; the Supervisor listens on this port, Workers on base+1, base+2, …
    #[arg(long, env = "UNIGATE_BASE_PORT", default_value_t = 8765)]
    pub base_port: u16,

    /// Number of Worker processes to run.
    #[arg(long, env = "UNIGATE_WORKERS", default_value_t = 3)]
    pub workers: u16,

    /// Path to the model configuration JSON file, passed through to every Worker.
    #[arg(long, env = "UNIGATE_CONFIG")]
    pub config: PathBuf,

    /// Directory for heartbeat files and other runtime state.
    #[arg(long, env = "UNIGATE_RUNTIME_DIR", default_value = "/tmp/unigate")]
    pub runtime_dir: PathBuf,

    /// Path to the `unigate-worker` executable to spawn.
    #[arg(long, env = "UNIGATE_WORKER_BIN", default_value = "unigate-worker")]
    pub worker_bin: String,
}
