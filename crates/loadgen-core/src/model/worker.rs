use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCapacity {
    pub max_vus: u32,
    pub max_concurrent_ops: u32,
    /// `None` means no per-worker RPS ceiling is enforced.
    #[serde(default)]
    pub max_rps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub active_vus: u32,
    pub active_sessions: u32,
    pub in_flight_ops: u32,
    pub queue_depth: u32,
}

/// A registered worker, owned by the [`crate::registry::Registry`].
#[derive(Debug, Clone, Serialize)]
pub struct Worker {
    pub worker_id: String,
    #[serde(skip)]
    pub worker_token: String,
    pub host_info: HostInfo,
    pub capacity: WorkerCapacity,
    pub health: HealthSnapshot,
    pub last_heartbeat_ms: i64,
    pub saturated: bool,
    /// `run_id -> vus assigned`, used by the scheduler to compute remaining
    /// capacity without re-deriving it from the assignment queue each time.
    pub allocated_vus: std::collections::HashMap<String, u32>,
}

impl Worker {
    pub fn total_allocated_vus(&self) -> u32 {
        self.allocated_vus.values().sum()
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.capacity.max_vus.saturating_sub(self.total_allocated_vus())
    }

    pub fn recompute_saturated(&mut self) {
        self.saturated =
            self.health.cpu_pct >= 90.0 || self.health.active_vus >= self.capacity.max_vus;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_worker(max_vus: u32) -> Worker {
        Worker {
            worker_id: "wkr_00000000".to_string(),
            worker_token: "secret".to_string(),
            host_info: HostInfo {
                hostname: "host-1".to_string(),
                region: None,
            },
            capacity: WorkerCapacity {
                max_vus,
                max_concurrent_ops: 1000,
                max_rps: Some(1000.0),
            },
            health: HealthSnapshot::default(),
            last_heartbeat_ms: 0,
            saturated: false,
            allocated_vus: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn remaining_capacity_subtracts_allocations() {
        let mut w = make_worker(100);
        w.allocated_vus.insert("run_a".to_string(), 30);
        w.allocated_vus.insert("run_b".to_string(), 20);
        assert_eq!(w.remaining_capacity(), 50);
    }

    #[test]
    fn remaining_capacity_never_underflows() {
        let mut w = make_worker(10);
        w.allocated_vus.insert("run_a".to_string(), 50);
        assert_eq!(w.remaining_capacity(), 0);
    }

    #[test]
    fn saturated_by_high_cpu() {
        let mut w = make_worker(100);
        w.health.cpu_pct = 95.0;
        w.recompute_saturated();
        assert!(w.saturated);
    }

    #[test]
    fn saturated_by_active_vus_at_cap() {
        let mut w = make_worker(10);
        w.health.active_vus = 10;
        w.recompute_saturated();
        assert!(w.saturated);
    }

    #[test]
    fn not_saturated_under_thresholds() {
        let mut w = make_worker(100);
        w.health.cpu_pct = 40.0;
        w.health.active_vus = 5;
        w.recompute_saturated();
        assert!(!w.saturated);
    }

    #[test]
    fn worker_token_is_not_serialized() {
        let w = make_worker(10);
        let json = serde_json::to_string(&w).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("worker_token"));
    }
}
