use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::process::{Child, Command};

use unigate_common::RuntimeDir;

use crate::metrics;
use crate::phase::WorkerPhase;

const HEARTBEAT_STALE_AFTER: Duration = Duration::from_secs(10);

/// One supervised `unigate-worker` child process: its lifecycle phase,
/// in-flight request count, and the handle needed to kill/respawn it.
pub struct WorkerHandle {
    pub id: String,
    pub port: u16,
    child: Mutex<Option<Child>>,
    phase: Mutex<WorkerPhase>,
    in_flight: AtomicI64,
    heartbeat_path: PathBuf,
    last_http_health_check: Mutex<Option<Instant>>,
}

impl WorkerHandle {
    pub fn new(id: String, port: u16, runtime_dir: &RuntimeDir) -> Self {
        Self {
            heartbeat_path: runtime_dir.heartbeat_path(&id),
            id,
            port,
            child: Mutex::new(None),
            phase: Mutex::new(WorkerPhase::Init),
            in_flight: AtomicI64::new(0),
            last_http_health_check: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.lock().unwrap()
    }

    pub fn set_phase(&self, phase: WorkerPhase) {
        let mut guard = self.phase.lock().unwrap();
        if *guard != phase {
            tracing::info!(
                event = "worker_state_changed",
                worker_id = %self.id,
                from = ?*guard,
                to = ?phase,
            );
            *guard = phase;
        }
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Marks one request assigned to this Worker; the returned guard
    /// returns it to `Idle` (if nothing else is in flight) on drop.
    pub fn begin_request(self: &Arc<Self>, streaming: bool) -> WorkerRequestGuard {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_in_flight(&self.id, in_flight);
        self.set_phase(if streaming {
            WorkerPhase::BusyStreaming
        } else {
            WorkerPhase::BusyBlocked
        });
        WorkerRequestGuard {
            worker: self.clone(),
        }
    }

    fn end_request(&self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_in_flight(&self.id, remaining.max(0));
        if remaining <= 0 && self.phase().is_busy() {
            self.set_phase(WorkerPhase::Idle);
        }
    }

    pub fn base_url(&self, host: &str) -> String {
        format!("http://{host}:{}", self.port)
    }

    pub fn heartbeat_age(&self) -> Option<Duration> {
        let metadata = std::fs::metadata(&self.heartbeat_path).ok()?;
        let modified = metadata.modified().ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    pub fn is_heartbeat_stale(&self) -> bool {
        match self.heartbeat_age() {
            Some(age) => age > HEARTBEAT_STALE_AFTER,
            None => true,
        }
    }

    /// Optional tier-3 HTTP `/health` check runs at most once per
    /// `min_interval`, and never while a stream is in flight.
    pub fn due_for_http_health_check(&self, min_interval: Duration) -> bool {
        if self.phase() == WorkerPhase::BusyStreaming {
            return false;
        }
        match *self.last_http_health_check.lock().unwrap() {
            Some(last) => last.elapsed() >= min_interval,
            None => true,
        }
    }

    pub fn record_http_health_check(&self) {
        *self.last_http_health_check.lock().unwrap() = Some(Instant::now());
    }

    pub async fn spawn(
        &self,
        command: &str,
        extra_args: &[String],
        config_path: &str,
        runtime_dir: &str,
        host: &str,
    ) -> std::io::Result<()> {
        let mut cmd = Command::new(command);
        cmd.args(extra_args)
            .arg("--host")
            .arg(host)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--config")
            .arg(config_path)
            .arg("--runtime-dir")
            .arg(runtime_dir)
            .arg("--worker-id")
            .arg(&self.id)
            .kill_on_drop(true);
        let child = cmd.spawn()?;
        *self.child.lock().unwrap() = Some(child);
        self.set_phase(WorkerPhase::Init);
        Ok(())
    }

    /// Non-blocking check of the spawned child's exit status (health tier 1).
    pub fn try_wait_exit_status(&self) -> Option<ExitStatus> {
        let mut guard = self.child.lock().unwrap();
        guard.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    pub async fn terminate(&self) {
        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
    }
}

pub struct WorkerRequestGuard {
    worker: Arc<WorkerHandle>,
}

impl Drop for WorkerRequestGuard {
    fn drop(&mut self) {
        self.worker.end_request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_heartbeat_file_counts_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let runtime_dir = RuntimeDir::new(dir.path());
        let handle = WorkerHandle::new("1".to_string(), 9001, &runtime_dir);
        assert!(handle.is_heartbeat_stale());
    }

    #[test]
    fn fresh_heartbeat_file_is_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        let runtime_dir = RuntimeDir::new(dir.path());
        let handle = WorkerHandle::new("1".to_string(), 9001, &runtime_dir);
        std::fs::write(runtime_dir.heartbeat_path("1"), "1700000000").unwrap();
        assert!(!handle.is_heartbeat_stale());
    }

    #[test]
    fn begin_request_marks_busy_and_end_request_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let runtime_dir = RuntimeDir::new(dir.path());
        let handle = Arc::new(WorkerHandle::new("1".to_string(), 9001, &runtime_dir));
        handle.set_phase(WorkerPhase::Idle);
        let guard = handle.begin_request(false);
        assert_eq!(handle.phase(), WorkerPhase::BusyBlocked);
        assert_eq!(handle.in_flight(), 1);
        drop(guard);
        assert_eq!(handle.phase(), WorkerPhase::Idle);
        assert_eq!(handle.in_flight(), 0);
    }
}
