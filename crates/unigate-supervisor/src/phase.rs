use serde::Serialize;

/// Per-Worker lifecycle state.
///
/// ```text
/// Init --(bound & heartbeat seen)--> Ready --> Idle
/// Idle --(request assigned)--> BusyStreaming | BusyBlocked
/// BusyStreaming | BusyBlocked --(request done)--> Idle
/// any active state --(HB stale > 10s)--> Unhealthy
/// Unhealthy --(restart issued)--> Restarting --> Init
/// any state --(process exit observed)--> Dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Init,
    Ready,
    Idle,
    BusyStreaming,
    BusyBlocked,
    Unhealthy,
    Restarting,
    Dead,
}

impl WorkerPhase {
    /// States the routing policy may pick a Worker from.
    pub fn is_routable(self) -> bool {
        matches!(
            self,
            WorkerPhase::Idle | WorkerPhase::BusyStreaming | WorkerPhase::BusyBlocked
        )
    }

    pub fn is_busy(self) -> bool {
        matches!(self, WorkerPhase::BusyStreaming | WorkerPhase::BusyBlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_and_busy_states_are_routable() {
        assert!(WorkerPhase::Idle.is_routable());
        assert!(WorkerPhase::BusyStreaming.is_routable());
        assert!(WorkerPhase::BusyBlocked.is_routable());
        assert!(!WorkerPhase::Unhealthy.is_routable());
        assert!(!WorkerPhase::Dead.is_routable());
        assert!(!WorkerPhase::Init.is_routable());
        assert!(!WorkerPhase::Restarting.is_routable());
    }
}
