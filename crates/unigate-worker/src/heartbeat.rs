use std::time::{Duration, SystemTime, UNIX_EPOCH};

use unigate_common::RuntimeDir;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Writes `<runtime_dir>/worker-<id>.hb` every 5 s, containing the current
/// Unix timestamp, via a temp-file-then-rename so the Supervisor never
/// observes a partially written file.
pub async fn run(runtime_dir: RuntimeDir, worker_id: String) {
    if let Err(err) = runtime_dir.ensure_exists() {
        tracing::error!(error = %err, "failed to create runtime dir for heartbeat");
        return;
    }
    let path = runtime_dir.heartbeat_path(&worker_id);
    let tmp_path = path.with_extension("hb.tmp");

    loop {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if let Err(err) = write_heartbeat(&tmp_path, &path, now) {
            tracing::warn!(error = %err, "heartbeat write failed");
        }
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
    }
}

fn write_heartbeat(tmp_path: &std::path::Path, path: &std::path::Path, now: u64) -> std::io::Result<()> {
    std::fs::write(tmp_path, now.to_string())?;
    std::fs::rename(tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_decimal_timestamp_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let runtime_dir = RuntimeDir::new(dir.path());
        let path = runtime_dir.heartbeat_path("1");
        let tmp_path = path.with_extension("hb.tmp");
        write_heartbeat(&tmp_path, &path, 1_700_000_000).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "1700000000");
        assert!(!tmp_path.exists());
    }
}
