//! Worker registry & scheduler — §4.F. In-memory CRUD over a
//! `HashMap<Id, Record>` guarded by a lock, with deterministic (sorted)
//! listing for stable output, mirroring the plan/thread-group/request CRUD
//! shape elsewhere in this codebase.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use crate::error::LoadgenError;
use crate::model::assignment::{Assignment, AssignmentState};
use crate::model::worker::{HealthSnapshot, HostInfo, Worker, WorkerCapacity};

const DEFAULT_MAX_PENDING_PER_WORKER: usize = 100;
const STALE_HEARTBEAT_MULTIPLIER: i64 = 3;

pub struct Registry {
    workers: RwLock<HashMap<String, Worker>>,
    pending: RwLock<HashMap<String, VecDeque<Assignment>>>,
    /// Assignments handed to a worker on poll, awaiting ack. Re-queued back
    /// onto `pending` by [`Registry::requeue_overdue_acks`] once
    /// `ack_timeout_ms` elapses without an ack for that `lease_id`.
    delivered: RwLock<HashMap<String, Vec<Assignment>>>,
    max_pending_per_worker: usize,
    heartbeat_interval_ms: i64,
    next_worker_seq: std::sync::atomic::AtomicU64,
}

impl Registry {
    pub fn new(heartbeat_interval_ms: i64) -> Self {
        Registry {
            workers: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            delivered: RwLock::new(HashMap::new()),
            max_pending_per_worker: DEFAULT_MAX_PENDING_PER_WORKER,
            heartbeat_interval_ms,
            next_worker_seq: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn new_worker_id(&self) -> String {
        let seq = self.next_worker_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("wkr_{seq:08x}")
    }

    pub async fn register(&self, host_info: HostInfo, capacity: WorkerCapacity, now_ms: i64) -> (String, String) {
        let worker_id = self.new_worker_id();
        let worker_token = format!("tok_{}", uuid::Uuid::new_v4().simple());
        let worker = Worker {
            worker_id: worker_id.clone(),
            worker_token: worker_token.clone(),
            host_info,
            capacity,
            health: HealthSnapshot::default(),
            last_heartbeat_ms: now_ms,
            saturated: false,
            allocated_vus: HashMap::new(),
        };
        self.workers.write().await.insert(worker_id.clone(), worker);
        self.pending.write().await.insert(worker_id.clone(), VecDeque::new());
        (worker_id, worker_token)
    }

    pub async fn heartbeat(&self, worker_id: &str, health: HealthSnapshot, now_ms: i64) -> Result<(), LoadgenError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| LoadgenError::WorkerNotFound(worker_id.to_string()))?;
        worker.health = health;
        worker.last_heartbeat_ms = now_ms;
        worker.recompute_saturated();
        Ok(())
    }

    pub async fn get(&self, worker_id: &str) -> Option<Worker> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// Sorted by worker_id for stable listings.
    pub async fn list(&self) -> Vec<Worker> {
        let workers = self.workers.read().await;
        let mut list: Vec<Worker> = workers.values().cloned().collect();
        list.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        list
    }

    /// Removes workers whose `last_heartbeat_ms` is older than
    /// `3 × heartbeat_interval_ms`. Returns the evicted worker ids so the
    /// caller can emit `WORKER_CAPACITY_LOST` for affected runs.
    pub async fn evict_stale(&self, now_ms: i64) -> Vec<String> {
        let threshold = self.heartbeat_interval_ms * STALE_HEARTBEAT_MULTIPLIER;
        let mut workers = self.workers.write().await;
        let stale: Vec<String> = workers
            .values()
            .filter(|w| now_ms - w.last_heartbeat_ms > threshold)
            .map(|w| w.worker_id.clone())
            .collect();
        for id in &stale {
            workers.remove(id);
        }
        drop(workers);
        if !stale.is_empty() {
            let mut pending = self.pending.write().await;
            for id in &stale {
                pending.remove(id);
            }
        }
        stale
    }

    pub async fn record_allocation(&self, worker_id: &str, run_id: &str, vus: u32) -> Result<(), LoadgenError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| LoadgenError::WorkerNotFound(worker_id.to_string()))?;
        *worker.allocated_vus.entry(run_id.to_string()).or_insert(0) += vus;
        worker.recompute_saturated();
        Ok(())
    }

    pub async fn release_allocation(&self, worker_id: &str, run_id: &str) {
        if let Some(worker) = self.workers.write().await.get_mut(worker_id) {
            worker.allocated_vus.remove(run_id);
            worker.recompute_saturated();
        }
    }

    /// Pushes an assignment onto a worker's pending queue. When the bound is
    /// hit the oldest entry is dropped to make room; re-queueing by
    /// `lease_id` is idempotent (an existing entry with the same lease is
    /// replaced in place rather than duplicated).
    pub async fn enqueue_assignment(&self, worker_id: &str, assignment: Assignment) {
        let mut pending = self.pending.write().await;
        let queue = pending.entry(worker_id.to_string()).or_default();
        if let Some(existing) = queue.iter_mut().find(|a| a.lease_id == assignment.lease_id) {
            *existing = assignment;
            return;
        }
        if queue.len() >= self.max_pending_per_worker {
            queue.pop_front();
        }
        queue.push_back(assignment);
    }

    /// Drains all pending assignments for a worker, transitions each to
    /// `pendingAck` with `delivered_at_ms = now_ms`, and moves them into the
    /// delivered set the ack/requeue tickers track.
    pub async fn take_pending_assignments(&self, worker_id: &str, now_ms: i64) -> Vec<Assignment> {
        let mut pending = self.pending.write().await;
        let drained: Vec<Assignment> = match pending.get_mut(worker_id) {
            Some(queue) => queue
                .drain(..)
                .map(|mut a| {
                    a.state = AssignmentState::PendingAck;
                    a.delivered_at_ms = Some(now_ms);
                    a
                })
                .collect(),
            None => Vec::new(),
        };
        if !drained.is_empty() {
            self.delivered
                .write()
                .await
                .entry(worker_id.to_string())
                .or_default()
                .extend(drained.iter().cloned());
        }
        drained
    }

    pub async fn pending_count(&self, worker_id: &str) -> usize {
        self.pending.read().await.get(worker_id).map(VecDeque::len).unwrap_or(0)
    }

    /// Acknowledges delivered assignments by `lease_id`, removing them from
    /// the delivered set. Returns the lease ids that were actually found.
    pub async fn ack_assignments(&self, worker_id: &str, lease_ids: &[String]) -> Vec<String> {
        let mut delivered = self.delivered.write().await;
        let Some(leases) = delivered.get_mut(worker_id) else {
            return Vec::new();
        };
        let mut acked = Vec::new();
        leases.retain(|a| {
            if lease_ids.contains(&a.lease_id) {
                acked.push(a.lease_id.clone());
                false
            } else {
                true
            }
        });
        acked
    }

    /// Re-queues delivered assignments whose ack has not arrived within
    /// `ack_timeout_ms`, idempotent by `lease_id` (the same `enqueue_assignment`
    /// in-place replacement applies on re-delivery).
    pub async fn requeue_overdue_acks(&self, now_ms: i64, ack_timeout_ms: i64) -> Vec<Assignment> {
        let mut delivered = self.delivered.write().await;
        let mut requeued = Vec::new();
        for leases in delivered.values_mut() {
            leases.retain(|a| {
                if a.is_ack_overdue(now_ms, ack_timeout_ms) {
                    let mut requeue = a.clone();
                    requeue.state = AssignmentState::Pending;
                    requeue.delivered_at_ms = None;
                    requeued.push(requeue);
                    false
                } else {
                    true
                }
            });
        }
        drop(delivered);
        for assignment in &requeued {
            self.enqueue_assignment(&assignment.worker_id, assignment.clone()).await;
        }
        requeued
    }
}

/// Computes per-worker VU allocations for a stage entry: workers sorted by
/// remaining capacity descending, assigned in that order until
/// `target_vus` is satisfied. Refuses with `InsufficientCapacity` if the
/// summed free capacity across all workers is below the target.
pub fn allocate(target_vus: u32, workers: &[Worker]) -> Result<Vec<(String, u32)>, LoadgenError> {
    let mut candidates: Vec<&Worker> = workers.iter().filter(|w| !w.saturated).collect();
    candidates.sort_by(|a, b| b.remaining_capacity().cmp(&a.remaining_capacity()));

    let total_available: u32 = candidates.iter().map(|w| w.remaining_capacity()).sum();
    if total_available < target_vus {
        return Err(LoadgenError::InsufficientCapacity {
            requested: target_vus,
            available: total_available,
        });
    }

    let mut remaining = target_vus;
    let mut allocations = Vec::new();
    for worker in candidates {
        if remaining == 0 {
            break;
        }
        let take = worker.remaining_capacity().min(remaining);
        if take > 0 {
            allocations.push((worker.worker_id.clone(), take));
            remaining -= take;
        }
    }
    Ok(allocations)
}
