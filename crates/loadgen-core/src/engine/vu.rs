//! Per-VU loop — §4.C. Single logical thread of control per VU, with a
//! bounded in-flight semaphore of width `in_flight_per_vu` so individual
//! operations can overlap without turning into an unbounded fan-out. This
//! generalizes the plan engine's `run_virtual_user` (loop over a request
//! sequence, yield a result event after each dispatch, check cancellation
//! between iterations) to a sampled MCP operation mix against a managed
//! session instead of a fixed HTTP request list.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;

use crate::engine::ratelimit::TokenBucket;
use crate::engine::sampler::OperationSampler;
use crate::model::config::{OperationMixEntry, ThinkTimeConfig, ToolTemplate};
use crate::model::telemetry::OperationOutcome;
use crate::model::VuId;
use crate::operations;
use crate::session::{SessionHandle, SessionManager};
use crate::transport::Connection;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub failure_threshold: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            failure_threshold: 5,
            base_backoff_ms: 200,
            max_backoff_ms: 10_000,
            max_retries: 8,
        }
    }
}

impl ReconnectPolicy {
    /// `min(cap, base × 2^attempt) + jitter`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
        Duration::from_millis(capped + jitter)
    }
}

pub struct VuLoopConfig {
    pub vu_id: VuId,
    pub run_id: String,
    pub execution_id: String,
    pub worker_id: String,
    pub stage: String,
    pub stage_id: String,
    pub run_seed: u64,
    pub operation_mix: Vec<OperationMixEntry>,
    pub tool_templates: Vec<ToolTemplate>,
    pub think_time: Option<ThinkTimeConfig>,
    pub in_flight_per_vu: u32,
    pub rate_limit: Option<(f64, f64)>,
    pub reconnect: ReconnectPolicy,
    pub tools_list_every_ops: Option<u32>,
    pub tools_list_after_errors: Option<u32>,
    pub start_delay: Duration,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn think_time_duration(cfg: &Option<ThinkTimeConfig>) -> Duration {
    match cfg {
        None => Duration::ZERO,
        Some(t) => {
            let jitter = if t.jitter_ms > 0 {
                rand::thread_rng().gen_range(0..t.jitter_ms)
            } else {
                0
            };
            Duration::from_millis(t.base_ms + jitter)
        }
    }
}

struct OutcomeContext {
    run_id: String,
    execution_id: String,
    stage: String,
    stage_id: String,
    worker_id: String,
    vu_id: String,
    session_id: String,
}

async fn dispatch_operation(
    connection: Arc<Connection>,
    operation: String,
    tool_name: Option<String>,
    arguments: Option<serde_json::Value>,
    ctx: OutcomeContext,
) -> OperationOutcome {
    let params = match (&tool_name, &arguments) {
        (Some(name), Some(args)) => serde_json::json!({"name": name, "arguments": args}),
        (Some(name), None) => serde_json::json!({"name": name}),
        (None, Some(args)) => args.clone(),
        (None, None) => serde_json::Value::Null,
    };

    let result = operations::execute(&connection, &operation, &params).await;

    OperationOutcome {
        run_id: ctx.run_id,
        execution_id: ctx.execution_id,
        stage: ctx.stage,
        stage_id: ctx.stage_id,
        worker_id: ctx.worker_id,
        vu_id: ctx.vu_id,
        session_id: Some(ctx.session_id),
        operation,
        tool_name,
        ok: result.ok,
        latency_ms: result.latency_ms,
        error_type: result.error.as_ref().map(|e| e.kind.into()),
        error_code: result.error.as_ref().map(|e| e.code.clone()),
        http_status: result.http_status,
        bytes_in: result.bytes_in,
        bytes_out: result.bytes_out,
        stream: result.stream,
        timestamp_ms: now_ms(),
    }
}

/// Holds a session's connection in an `Arc` for the duration it is actively
/// dispatching operations, so up to `in_flight_per_vu` tasks can share it
/// (every `Connection` method used here takes `&self`). Reassembled back
/// into a [`SessionHandle`] before being handed back to the session manager.
struct ActiveSession {
    session_id: String,
    connection: Arc<Connection>,
    ops_since_return: u32,
    created_at_ms: i64,
}

impl ActiveSession {
    fn from_handle(handle: SessionHandle) -> Self {
        ActiveSession {
            session_id: handle.session_id,
            connection: Arc::new(handle.connection),
            ops_since_return: handle.ops_since_return,
            created_at_ms: handle.created_at_ms,
        }
    }

    /// Only valid once every spawned task holding a clone of `connection`
    /// has completed — callers must drain in-flight work first.
    fn into_handle(self) -> SessionHandle {
        let connection = Arc::try_unwrap(self.connection)
            .unwrap_or_else(|_| panic!("connection still shared by in-flight operations"));
        SessionHandle {
            session_id: self.session_id,
            connection,
            ops_since_return: self.ops_since_return,
            created_at_ms: self.created_at_ms,
        }
    }
}

async fn drain_in_flight(in_flight: &mut JoinSet<OperationOutcome>, outcome_tx: &mpsc::Sender<OperationOutcome>) {
    while let Some(joined) = in_flight.join_next().await {
        if let Ok(outcome) = joined {
            let _ = outcome_tx.send(outcome).await;
        }
    }
}

/// Drives one VU until `cancel` fires or the reconnect policy is exhausted.
/// Outcomes are pushed to `outcome_tx`; the receiver side is the worker's
/// telemetry-ship buffer.
pub async fn run_virtual_user(
    config: VuLoopConfig,
    session_manager: Arc<SessionManager>,
    outcome_tx: mpsc::Sender<OperationOutcome>,
    cancel: CancellationToken,
) {
    if !config.start_delay.is_zero() {
        let deadline = TokioInstant::now() + config.start_delay;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = cancel.cancelled() => return,
        }
    }

    let mut sampler = OperationSampler::new(
        config.operation_mix.clone(),
        config.tool_templates.clone(),
        &config.vu_id.to_string(),
        config.run_seed,
    );
    let mut rate_limiter = config.rate_limit.map(|(rps, burst)| TokenBucket::new(rps, burst));

    let mut session = match session_manager.acquire(now_ms()).await {
        Ok(handle) => ActiveSession::from_handle(handle),
        Err(_) => return,
    };

    let mut consecutive_failures: u32 = 0;
    let mut reconnect_attempt: u32 = 0;
    let mut ops_since_tools_list: u32 = 0;

    let semaphore = Arc::new(Semaphore::new(config.in_flight_per_vu.max(1) as usize));
    let mut in_flight: JoinSet<OperationOutcome> = JoinSet::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let think = think_time_duration(&config.think_time);
        if !think.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(think) => {}
                _ = cancel.cancelled() => break,
            }
        }

        if let Some(bucket) = &mut rate_limiter {
            let wait = bucket.wait_duration();
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            bucket.try_acquire();
        }

        let force_tools_list = config
            .tools_list_every_ops
            .map(|n| n > 0 && ops_since_tools_list >= n)
            .unwrap_or(false)
            || config
                .tools_list_after_errors
                .map(|m| m > 0 && consecutive_failures >= m)
                .unwrap_or(false);

        let sampled = if force_tools_list {
            ops_since_tools_list = 0;
            Some(crate::engine::sampler::SampledOperation {
                operation: "tools/list".to_string(),
                tool_name: None,
                arguments: None,
            })
        } else {
            sampler.sample()
        };

        let Some(sampled) = sampled else {
            break;
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };

        let connection = Arc::clone(&session.connection);
        let ctx = OutcomeContext {
            run_id: config.run_id.clone(),
            execution_id: config.execution_id.clone(),
            stage: config.stage.clone(),
            stage_id: config.stage_id.clone(),
            worker_id: config.worker_id.clone(),
            vu_id: config.vu_id.to_string(),
            session_id: session.session_id.clone(),
        };

        in_flight.spawn(async move {
            let outcome = dispatch_operation(connection, sampled.operation, sampled.tool_name, sampled.arguments, ctx).await;
            drop(permit);
            outcome
        });

        ops_since_tools_list += 1;
        session.ops_since_return += 1;

        // Surface at least one completion before sampling again, so the
        // failure streak and reconnect/churn decisions below stay current.
        let Some(Ok(outcome)) = in_flight.join_next().await else {
            break;
        };
        if outcome_tx.send(outcome.clone()).await.is_err() {
            break;
        }
        if outcome.ok {
            consecutive_failures = 0;
        } else {
            consecutive_failures += 1;
        }

        if consecutive_failures >= config.reconnect.failure_threshold {
            if reconnect_attempt >= config.reconnect.max_retries {
                break;
            }
            let backoff = config.reconnect.backoff(reconnect_attempt);
            reconnect_attempt += 1;
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => break,
            }
            drain_in_flight(&mut in_flight, &outcome_tx).await;
            session_manager.invalidate(session.into_handle()).await;
            session = match session_manager.acquire(now_ms()).await {
                Ok(handle) => ActiveSession::from_handle(handle),
                Err(_) => return,
            };
            consecutive_failures = 0;
        } else if session_manager.churn_due(session.ops_since_return) {
            drain_in_flight(&mut in_flight, &outcome_tx).await;
            let old = session.into_handle();
            session = match session_manager.acquire(now_ms()).await {
                Ok(handle) => ActiveSession::from_handle(handle),
                Err(_) => {
                    session_manager.release(old, now_ms()).await;
                    return;
                }
            };
            session_manager.release(old, now_ms()).await;
        }
    }

    drain_in_flight(&mut in_flight, &outcome_tx).await;
    session_manager.release(session.into_handle(), now_ms()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_backoff_grows_and_is_capped() {
        let policy = ReconnectPolicy {
            failure_threshold: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
            max_retries: 10,
        };
        let small = policy.backoff(0);
        let large = policy.backoff(10);
        assert!(small.as_millis() >= 100);
        assert!(large.as_millis() <= 1_250);
    }

    #[test]
    fn think_time_without_jitter_is_fixed() {
        let cfg = Some(ThinkTimeConfig {
            base_ms: 50,
            jitter_ms: 0,
        });
        assert_eq!(think_time_duration(&cfg), Duration::from_millis(50));
    }

    #[test]
    fn think_time_none_is_zero() {
        assert_eq!(think_time_duration(&None), Duration::ZERO);
    }
}
