use std::path::{Path, PathBuf};

/// Path helpers for the files the gateway writes under its runtime
/// directory (heartbeats today; kept as a single seam in case future
/// ambient state — pid files, lock files — needs the same directory).
#[derive(Debug, Clone)]
pub struct RuntimeDir {
    root: PathBuf,
}

impl RuntimeDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn heartbeat_path(&self, worker_id: &str) -> PathBuf {
        self.root.join(format!("worker-{worker_id}.hb"))
    }

    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}
