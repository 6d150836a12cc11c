//! In-memory telemetry store — §4.H. Keyed by run, retains operation
//! outcomes and a denormalized structured-log stream subject to per-run and
//! global retention caps, mirroring how the single-process engine keeps a
//! bounded ring of results per plan run rather than an unbounded vec.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::event::Event;
use crate::model::OperationOutcome;

const MAX_OPERATIONS_PER_RUN: usize = 200_000;
const MAX_LOGS_PER_RUN: usize = 50_000;
const MAX_TOTAL_RUNS: usize = 500;

/// A denormalized log line. Most entries are derived automatically from an
/// ingested [`OperationOutcome`] (see [`TelemetryStore::ingest_operations`])
/// rather than shipped directly by a worker, carrying enough context to
/// support every filter the logs endpoint exposes in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp_ms: i64,
    pub level: String,
    pub stage: Option<String>,
    pub worker_id: Option<String>,
    pub vu_id: Option<String>,
    pub session_id: Option<String>,
    pub operation: Option<String>,
    pub tool_name: Option<String>,
    pub error_type: Option<crate::model::telemetry::OperationErrorType>,
    pub error_code: Option<String>,
    pub message: String,
}

impl LogEntry {
    fn from_outcome(o: &OperationOutcome) -> Self {
        let level = if o.ok { "info" } else { "error" }.to_string();
        let message = if o.ok {
            format!("{} completed in {}ms", o.operation, o.latency_ms)
        } else {
            format!(
                "{} failed: {}",
                o.operation,
                o.error_code.as_deref().unwrap_or("unknown_error")
            )
        };
        LogEntry {
            timestamp_ms: o.timestamp_ms,
            level,
            stage: Some(o.stage.clone()),
            worker_id: Some(o.worker_id.clone()),
            vu_id: Some(o.vu_id.clone()),
            session_id: o.session_id.clone(),
            operation: Some(o.operation.clone()),
            tool_name: o.tool_name.clone(),
            error_type: o.error_type,
            error_code: o.error_code.clone(),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub accepted: usize,
    pub rejected: usize,
    pub operations_truncated: bool,
    pub logs_truncated: bool,
}

struct RunTelemetry {
    operations: VecDeque<OperationOutcome>,
    logs: VecDeque<LogEntry>,
    operations_truncated: bool,
    logs_truncated: bool,
    last_touched_ms: i64,
}

impl RunTelemetry {
    fn new() -> Self {
        RunTelemetry {
            operations: VecDeque::new(),
            logs: VecDeque::new(),
            operations_truncated: false,
            logs_truncated: false,
            last_touched_ms: 0,
        }
    }
}

/// Knows nothing about run state transitions; the run manager is
/// responsible for validating that a run/stage exists before telemetry
/// referencing it is accepted (invariant (v)).
pub struct TelemetryStore {
    runs: RwLock<HashMap<String, RunTelemetry>>,
    run_order: RwLock<VecDeque<String>>,
    max_operations_per_run: usize,
    max_logs_per_run: usize,
    max_total_runs: usize,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(MAX_OPERATIONS_PER_RUN, MAX_LOGS_PER_RUN, MAX_TOTAL_RUNS)
    }
}

impl TelemetryStore {
    pub fn new(max_operations_per_run: usize, max_logs_per_run: usize, max_total_runs: usize) -> Self {
        TelemetryStore {
            runs: RwLock::new(HashMap::new()),
            run_order: RwLock::new(VecDeque::new()),
            max_operations_per_run,
            max_logs_per_run,
            max_total_runs,
        }
    }

    async fn touch_run(&self, run_id: &str, now_ms: i64) {
        let mut runs = self.runs.write().await;
        if !runs.contains_key(run_id) {
            let mut order = self.run_order.write().await;
            order.push_back(run_id.to_string());
            if order.len() > self.max_total_runs {
                if let Some(evicted) = order.pop_front() {
                    runs.remove(&evicted);
                }
            }
            runs.insert(run_id.to_string(), RunTelemetry::new());
        }
        if let Some(entry) = runs.get_mut(run_id) {
            entry.last_touched_ms = now_ms;
        }
    }

    pub async fn ingest_operations(&self, run_id: &str, outcomes: Vec<OperationOutcome>, now_ms: i64) -> IngestResult {
        self.touch_run(run_id, now_ms).await;
        let mut runs = self.runs.write().await;
        let entry = runs.get_mut(run_id).expect("touch_run inserts the entry");

        let mut accepted = 0usize;
        let rejected = 0usize;
        for outcome in outcomes {
            if entry.operations.len() >= self.max_operations_per_run {
                entry.operations.pop_front();
                entry.operations_truncated = true;
            }
            if entry.logs.len() >= self.max_logs_per_run {
                entry.logs.pop_front();
                entry.logs_truncated = true;
            }
            entry.logs.push_back(LogEntry::from_outcome(&outcome));
            entry.operations.push_back(outcome);
            accepted += 1;
        }

        IngestResult {
            accepted,
            rejected,
            operations_truncated: entry.operations_truncated,
            logs_truncated: entry.logs_truncated,
        }
    }

    pub async fn ingest_logs(&self, run_id: &str, logs: Vec<LogEntry>, now_ms: i64) -> IngestResult {
        self.touch_run(run_id, now_ms).await;
        let mut runs = self.runs.write().await;
        let entry = runs.get_mut(run_id).expect("touch_run inserts the entry");

        let mut accepted = 0usize;
        for log in logs {
            if entry.logs.len() >= self.max_logs_per_run {
                entry.logs.pop_front();
                entry.logs_truncated = true;
            }
            entry.logs.push_back(log);
            accepted += 1;
        }

        IngestResult {
            accepted,
            rejected: 0,
            operations_truncated: entry.operations_truncated,
            logs_truncated: entry.logs_truncated,
        }
    }

    pub async fn operations(&self, run_id: &str) -> Vec<OperationOutcome> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .map(|entry| entry.operations.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn logs(&self, run_id: &str, limit: Option<usize>) -> Vec<LogEntry> {
        let runs = self.runs.read().await;
        let Some(entry) = runs.get(run_id) else {
            return Vec::new();
        };
        match limit {
            Some(n) => entry.logs.iter().rev().take(n).rev().cloned().collect(),
            None => entry.logs.iter().cloned().collect(),
        }
    }

    pub async fn has_run(&self, run_id: &str) -> bool {
        self.runs.read().await.contains_key(run_id)
    }

    pub async fn clear(&self, run_id: &str) {
        let mut runs = self.runs.write().await;
        runs.remove(run_id);
        let mut order = self.run_order.write().await;
        order.retain(|id| id != run_id);
    }

    pub async fn operation_count(&self, run_id: &str) -> usize {
        self.runs.read().await.get(run_id).map(|e| e.operations.len()).unwrap_or(0)
    }
}

// Referenced by the SSE event log consumers in the run manager, kept here
// since it ships alongside the other telemetry wire types.
pub type EventLog = VecDeque<Event>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::telemetry::OperationErrorType;

    fn outcome(ts: i64) -> OperationOutcome {
        OperationOutcome {
            run_id: "run_0".to_string(),
            execution_id: "exe_0".to_string(),
            stage: "ramp".to_string(),
            stage_id: "stg_0".to_string(),
            worker_id: "wkr_0".to_string(),
            vu_id: "vu_0".to_string(),
            session_id: None,
            operation: "ping".to_string(),
            tool_name: None,
            ok: true,
            latency_ms: 5,
            error_type: None::<OperationErrorType>,
            error_code: None,
            http_status: Some(200),
            bytes_in: 1,
            bytes_out: 1,
            stream: None,
            timestamp_ms: ts,
        }
    }

    #[tokio::test]
    async fn ingest_and_read_back_operations() {
        let store = TelemetryStore::default();
        let result = store.ingest_operations("run_1", vec![outcome(0), outcome(10)], 0).await;
        assert_eq!(result.accepted, 2);
        assert!(!result.operations_truncated);
        assert_eq!(store.operations("run_1").await.len(), 2);
    }

    #[tokio::test]
    async fn ingest_operations_derives_a_log_entry_per_outcome() {
        let store = TelemetryStore::default();
        store.ingest_operations("run_1", vec![outcome(0)], 0).await;
        let logs = store.logs("run_1", None).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "info");
        assert_eq!(logs[0].operation.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn operations_truncate_at_cap() {
        let store = TelemetryStore::new(2, 10, 10);
        store.ingest_operations("run_1", vec![outcome(0), outcome(1), outcome(2)], 0).await;
        let result = store.ingest_operations("run_1", vec![outcome(3)], 0).await;
        assert!(result.operations_truncated);
        assert_eq!(store.operation_count("run_1").await, 2);
    }

    #[tokio::test]
    async fn unknown_run_returns_empty() {
        let store = TelemetryStore::default();
        assert!(store.operations("missing").await.is_empty());
        assert!(!store.has_run("missing").await);
    }

    #[tokio::test]
    async fn evicts_oldest_run_when_total_cap_exceeded() {
        let store = TelemetryStore::new(10, 10, 2);
        store.ingest_operations("run_a", vec![outcome(0)], 0).await;
        store.ingest_operations("run_b", vec![outcome(0)], 0).await;
        store.ingest_operations("run_c", vec![outcome(0)], 0).await;
        assert!(!store.has_run("run_a").await);
        assert!(store.has_run("run_b").await);
        assert!(store.has_run("run_c").await);
    }

    #[tokio::test]
    async fn logs_respect_tail_limit() {
        let store = TelemetryStore::default();
        let logs: Vec<LogEntry> = (0..5)
            .map(|i| LogEntry {
                timestamp_ms: i,
                level: "info".to_string(),
                stage: None,
                worker_id: None,
                vu_id: None,
                session_id: None,
                operation: None,
                tool_name: None,
                error_type: None,
                error_code: None,
                message: format!("msg {i}"),
            })
            .collect();
        store.ingest_logs("run_1", logs, 0).await;
        let tail = store.logs("run_1", Some(2)).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].message, "msg 3");
        assert_eq!(tail[1].message, "msg 4");
    }

    #[tokio::test]
    async fn clear_removes_run_state() {
        let store = TelemetryStore::default();
        store.ingest_operations("run_1", vec![outcome(0)], 0).await;
        store.clear("run_1").await;
        assert!(!store.has_run("run_1").await);
    }
}
