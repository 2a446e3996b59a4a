use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use unigate_common::RuntimeDir;
use unigate_protocol::ModelList;

use crate::events::{EventBus, WorkerEvent};
use crate::metrics;
use crate::phase::WorkerPhase;
use crate::worker::WorkerHandle;

const MODEL_CACHE_TTL: Duration = Duration::from_secs(300);
const MODEL_CACHE_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const MODEL_CACHE_GRACE: Duration = Duration::from_secs(300);
const HTTP_HEALTH_MIN_INTERVAL: Duration = Duration::from_secs(60);
const MONITOR_INTERVAL: Duration = Duration::from_secs(2);
const RESTART_COOLDOWN: Duration = Duration::from_secs(5);

pub struct PoolConfig {
    pub host: String,
    pub base_port: u16,
    pub worker_count: u16,
    pub worker_command: String,
    pub model_config_path: String,
    pub runtime_dir: RuntimeDir,
}

struct ModelCache {
    list: Option<ModelList>,
    generated_at: Option<Instant>,
    last_request_started_at: Option<Instant>,
}

#[derive(Debug, Serialize)]
pub struct WorkerStatus {
    pub id: String,
    pub port: u16,
    pub phase: WorkerPhase,
    pub in_flight: i64,
}

/// Owns the N Worker processes and implements the Supervisor's routing
/// policy, model list cache, and health monitoring.
pub struct Pool {
    config: PoolConfig,
    workers: Vec<Arc<WorkerHandle>>,
    round_robin: AtomicUsize,
    started: AtomicBool,
    start_lock: Mutex<()>,
    model_cache: RwLock<ModelCache>,
    model_refresh_lock: Mutex<()>,
    http_client: reqwest::Client,
    pub events: EventBus,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        let workers = (0..config.worker_count)
            .map(|i| {
                Arc::new(WorkerHandle::new(
                    i.to_string(),
                    config.base_port + 1 + i,
                    &config.runtime_dir,
                ))
            })
            .collect();
        Self {
            config,
            workers,
            round_robin: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            start_lock: Mutex::new(()),
            model_cache: RwLock::new(ModelCache {
                list: None,
                generated_at: None,
                last_request_started_at: None,
            }),
            model_refresh_lock: Mutex::new(()),
            http_client: reqwest::Client::new(),
            events: EventBus::new(256),
        }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Idempotent: the global pool is constructed exactly once, and repeat
    /// callers — multiple admin triggers, a retried startup — no-op once
    /// the first call has spawned every Worker.
    pub async fn ensure_started(&self) {
        if self.started.load(Ordering::SeqCst) {
            return;
        }
        let _guard = self.start_lock.lock().await;
        if self.started.load(Ordering::SeqCst) {
            return;
        }
        for worker in &self.workers {
            self.spawn_worker(worker).await;
        }
        self.started.store(true, Ordering::SeqCst);
    }

    pub async fn stop(&self) {
        for worker in &self.workers {
            worker.set_phase(WorkerPhase::Restarting);
            worker.terminate().await;
            worker.set_phase(WorkerPhase::Dead);
        }
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|w| WorkerStatus {
                id: w.id.clone(),
                port: w.port,
                phase: w.phase(),
                in_flight: w.in_flight(),
            })
            .collect()
    }

    /// Routing policy: among `{Idle, BusyStreaming, BusyBlocked}`, favor
    /// `Idle`, then least in-flight, with round-robin as the final
    /// tiebreak.
    pub fn choose_worker(&self) -> Option<Arc<WorkerHandle>> {
        let mut candidates: Vec<&Arc<WorkerHandle>> = self
            .workers
            .iter()
            .filter(|w| w.phase().is_routable())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by_key(|w| {
            let idle_rank = if w.phase() == WorkerPhase::Idle { 0 } else { 1 };
            (idle_rank, w.in_flight())
        });
        let best_idle_rank = if candidates[0].phase() == WorkerPhase::Idle {
            0
        } else {
            1
        };
        let best_in_flight = candidates[0].in_flight();
        let tied: Vec<&Arc<WorkerHandle>> = candidates
            .into_iter()
            .take_while(|w| {
                let idle_rank = if w.phase() == WorkerPhase::Idle { 0 } else { 1 };
                idle_rank == best_idle_rank && w.in_flight() == best_in_flight
            })
            .collect();
        let index = self.round_robin.fetch_add(1, Ordering::SeqCst) % tied.len();
        Some(tied[index].clone())
    }

    /// `/v1/models` is served from this cache. A call within `TTL` of the
    /// last successful fetch is served from cache with no upstream probe; a
    /// call past `TTL` but within `MIN_REFRESH_INTERVAL` of the last refresh
    /// *attempt* still gets the (now stale) cached value rather than
    /// triggering another probe; only a call past both intervals refreshes,
    /// and concurrent callers past both intervals share a single in-flight
    /// probe instead of each firing their own.
    pub async fn models(&self) -> ModelList {
        {
            let cache = self.model_cache.read().await;
            if let (Some(list), Some(generated_at)) = (&cache.list, cache.generated_at) {
                if generated_at.elapsed() < MODEL_CACHE_TTL {
                    return list.clone();
                }
            }
            if let Some(started) = cache.last_request_started_at {
                if started.elapsed() < MODEL_CACHE_MIN_REFRESH_INTERVAL {
                    return cache
                        .list
                        .clone()
                        .unwrap_or_else(|| ModelList::new(Vec::new()));
                }
            }
        }
        self.refresh_models().await
    }

    /// Single-flight: a caller that finds a refresh already underway does
    /// not wait for it or start its own, it just returns whatever is
    /// cached. The caller that does win the lock re-checks freshness before
    /// issuing the HTTP call, since another refresh may have completed
    /// between the unlocked read above and this point.
    async fn refresh_models(&self) -> ModelList {
        let Ok(_guard) = self.model_refresh_lock.try_lock() else {
            return self.cached_or_empty().await;
        };

        {
            let cache = self.model_cache.read().await;
            if let (Some(list), Some(generated_at)) = (&cache.list, cache.generated_at) {
                if generated_at.elapsed() < MODEL_CACHE_TTL {
                    return list.clone();
                }
            }
        }

        {
            let mut cache = self.model_cache.write().await;
            cache.last_request_started_at = Some(Instant::now());
        }

        let candidate = self
            .workers
            .iter()
            .find(|w| matches!(w.phase(), WorkerPhase::Ready | WorkerPhase::Idle))
            .cloned();
        let Some(worker) = candidate else {
            return self.cached_or_empty().await;
        };

        let url = format!("{}/v1/models", worker.base_url(&self.config.host));
        match self.http_client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<ModelList>().await {
                Ok(list) => {
                    let mut cache = self.model_cache.write().await;
                    cache.list = Some(list.clone());
                    cache.generated_at = Some(Instant::now());
                    list
                }
                Err(_) => self.cached_or_empty().await,
            },
            _ => self.cached_or_empty().await,
        }
    }

    /// Stale data survives until `TTL + grace` past the last successful
    /// fetch; beyond that an unreachable upstream degrades to an empty list
    /// instead of serving arbitrarily old data forever.
    async fn cached_or_empty(&self) -> ModelList {
        let cache = self.model_cache.read().await;
        match (&cache.list, cache.generated_at) {
            (Some(list), Some(generated_at))
                if generated_at.elapsed() < MODEL_CACHE_TTL + MODEL_CACHE_GRACE =>
            {
                list.clone()
            }
            _ => ModelList::new(Vec::new()),
        }
    }

    /// Background task: runs the two non-HTTP health tiers and the
    /// process-exit / restart state machine every `MONITOR_INTERVAL`.
    pub async fn run_monitor_loop(self: Arc<Self>) {
        loop {
            for worker in self.workers.clone() {
                self.check_worker(&worker).await;
            }
            tokio::time::sleep(MONITOR_INTERVAL).await;
        }
    }

    async fn check_worker(&self, worker: &Arc<WorkerHandle>) {
        if let Some(status) = worker.try_wait_exit_status() {
            if worker.phase() != WorkerPhase::Dead {
                tracing::warn!(event = "worker_exited", worker_id = %worker.id, status = ?status);
                worker.set_phase(WorkerPhase::Dead);
                metrics::record_state_change();
                self.events
                    .emit(WorkerEvent {
                        worker_id: worker.id.clone(),
                        kind: "exited".to_string(),
                        detail: format!("{status:?}"),
                    })
                    .await;
            }
            self.restart_worker(worker).await;
            return;
        }

        match worker.phase() {
            WorkerPhase::Init => {
                if !worker.is_heartbeat_stale() {
                    worker.set_phase(WorkerPhase::Ready);
                    worker.set_phase(WorkerPhase::Idle);
                    metrics::record_state_change();
                }
            }
            WorkerPhase::Dead | WorkerPhase::Restarting => {}
            WorkerPhase::Unhealthy => {
                // A Worker mid-stream is left alone until that stream
                // finishes; only a drained Unhealthy Worker is restarted.
                if worker.in_flight() == 0 {
                    self.restart_worker(worker).await;
                }
            }
            _ if worker.is_heartbeat_stale() => {
                worker.set_phase(WorkerPhase::Unhealthy);
                metrics::record_state_change();
                self.events
                    .emit(WorkerEvent {
                        worker_id: worker.id.clone(),
                        kind: "unhealthy".to_string(),
                        detail: "heartbeat stale".to_string(),
                    })
                    .await;
            }
            _ => {
                self.maybe_http_health_check(worker).await;
            }
        }
    }

    async fn maybe_http_health_check(&self, worker: &Arc<WorkerHandle>) {
        if !worker.due_for_http_health_check(HTTP_HEALTH_MIN_INTERVAL) {
            return;
        }
        worker.record_http_health_check();
        let url = format!("{}/health", worker.base_url(&self.config.host));
        let outcome = self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await;
        if !matches!(outcome, Ok(resp) if resp.status().is_success()) {
            tracing::warn!(event = "worker_http_health_failed", worker_id = %worker.id);
        }
    }

    async fn restart_worker(&self, worker: &Arc<WorkerHandle>) {
        worker.set_phase(WorkerPhase::Restarting);
        worker.terminate().await;
        tokio::time::sleep(RESTART_COOLDOWN).await;
        self.spawn_worker(worker).await;
        metrics::record_restart();
    }

    async fn spawn_worker(&self, worker: &Arc<WorkerHandle>) {
        let runtime_dir = self.config.runtime_dir.root().to_string_lossy().to_string();
        let result = worker
            .spawn(
                &self.config.worker_command,
                &[],
                &self.config.model_config_path,
                &runtime_dir,
                &self.config.host,
            )
            .await;
        match result {
            Ok(()) => {
                self.events
                    .emit(WorkerEvent {
                        worker_id: worker.id.clone(),
                        kind: "spawned".to_string(),
                        detail: format!("port {}", worker.port),
                    })
                    .await;
            }
            Err(err) => {
                tracing::error!(event = "worker_spawn_failed", worker_id = %worker.id, error = %err);
                worker.set_phase(WorkerPhase::Dead);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> PoolConfig {
        PoolConfig {
            host: "127.0.0.1".to_string(),
            base_port: 18765,
            worker_count: 3,
            worker_command: "true".to_string(),
            model_config_path: "/dev/null".to_string(),
            runtime_dir: RuntimeDir::new(dir),
        }
    }

    #[test]
    fn choose_worker_prefers_idle_then_least_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new(test_config(dir.path()));
        pool.workers[0].set_phase(WorkerPhase::BusyBlocked);
        pool.workers[1].set_phase(WorkerPhase::Idle);
        pool.workers[2].set_phase(WorkerPhase::Unhealthy);

        let chosen = pool.choose_worker().unwrap();
        assert_eq!(chosen.id, pool.workers[1].id);
    }

    #[test]
    fn choose_worker_returns_none_when_no_candidate_is_routable() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new(test_config(dir.path()));
        for worker in &pool.workers {
            worker.set_phase(WorkerPhase::Unhealthy);
        }
        assert!(pool.choose_worker().is_none());
    }

    #[tokio::test]
    async fn ensure_started_spawns_workers_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(Pool::new(test_config(dir.path())));
        pool.ensure_started().await;
        pool.ensure_started().await;
        assert!(pool.started.load(Ordering::SeqCst));
        // spawning "true" exits almost immediately, so we only assert the
        // idempotency latch here rather than steady-state phase.
    }

    #[tokio::test]
    async fn models_falls_back_to_empty_list_with_no_routable_worker() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new(test_config(dir.path()));
        // No worker has ever reached Ready/Idle, so the refresh has nothing
        // to probe and falls back to an empty list rather than hanging.
        let list = pool.models().await;
        assert!(list.data.is_empty());
    }

    #[tokio::test]
    async fn second_refresh_within_min_interval_skips_the_probe_and_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new(test_config(dir.path()));
        pool.refresh_models().await;
        let started_at = pool
            .model_cache
            .read()
            .await
            .last_request_started_at
            .unwrap();

        // A second call immediately afterward is within MIN_REFRESH_INTERVAL
        // of the first attempt, so it must not record a new attempt time.
        let _ = pool.models().await;
        let still_same = pool
            .model_cache
            .read()
            .await
            .last_request_started_at
            .unwrap();
        assert_eq!(started_at, still_same);
    }

    #[tokio::test]
    async fn concurrent_refreshes_past_both_intervals_share_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(Pool::new(test_config(dir.path())));
        {
            let mut cache = pool.model_cache.write().await;
            cache.last_request_started_at = Some(Instant::now() - MODEL_CACHE_MIN_REFRESH_INTERVAL * 2);
        }
        let (a, b) = tokio::join!(pool.refresh_models(), pool.refresh_models());
        assert!(a.data.is_empty());
        assert!(b.data.is_empty());
    }
}
