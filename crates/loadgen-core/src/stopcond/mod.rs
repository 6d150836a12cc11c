//! Stop-condition evaluator — §4.I. Each stage carries an ordered list of
//! conditions over windowed metrics; a condition fires once its comparator
//! is satisfied for `sustain_windows` consecutive non-overlapping windows.

use crate::model::config::{Comparator, StopConditionConfig, StopMetric};
use crate::model::telemetry::OperationOutcome;
use crate::telemetry::Aggregator;

#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredStopCondition {
    pub metric: StopMetric,
    pub comparator: Comparator,
    pub threshold: f64,
    pub observed: f64,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub emergency: bool,
}

/// Tracks how many consecutive windows have satisfied one condition.
struct ConditionState {
    config: StopConditionConfig,
    consecutive_satisfied: u32,
    next_window_start_ms: Option<i64>,
}

pub struct StopConditionEvaluator {
    states: Vec<ConditionState>,
}

impl StopConditionEvaluator {
    pub fn new(conditions: Vec<StopConditionConfig>) -> Self {
        StopConditionEvaluator {
            states: conditions
                .into_iter()
                .map(|config| ConditionState {
                    config,
                    consecutive_satisfied: 0,
                    next_window_start_ms: None,
                })
                .collect(),
        }
    }

    /// Evaluates every condition against `outcomes` up to `now_ms`. Each
    /// condition advances independently through its own non-overlapping
    /// windows; conditions with a newer window boundary are skipped until
    /// their window closes. Returns the first condition to fire, if any —
    /// conditions are evaluated in configuration order so an emergency
    /// condition earlier in the list still wins ties.
    pub fn evaluate(&mut self, outcomes: &[OperationOutcome], now_ms: i64) -> Option<TriggeredStopCondition> {
        let mut fired = None;
        for state in &mut self.states {
            let window_start = state
                .next_window_start_ms
                .unwrap_or_else(|| now_ms - state.config.window_ms as i64);
            let window_end = window_start + state.config.window_ms as i64;
            if now_ms < window_end {
                continue;
            }

            let in_window: Vec<&OperationOutcome> = outcomes
                .iter()
                .filter(|o| o.timestamp_ms >= window_start && o.timestamp_ms < window_end)
                .collect();

            if in_window.is_empty() {
                state.consecutive_satisfied = 0;
                state.next_window_start_ms = Some(window_end);
                continue;
            }

            let observed = compute_metric(state.config.metric, &in_window, state.config.window_ms);
            let satisfied = state.config.comparator.evaluate(observed, state.config.threshold);

            if satisfied {
                state.consecutive_satisfied += 1;
            } else {
                state.consecutive_satisfied = 0;
            }

            state.next_window_start_ms = Some(window_end);

            if fired.is_none() && satisfied && state.consecutive_satisfied >= state.config.sustain_windows.max(1) {
                fired = Some(TriggeredStopCondition {
                    metric: state.config.metric,
                    comparator: state.config.comparator,
                    threshold: state.config.threshold,
                    observed,
                    window_start_ms: window_start,
                    window_end_ms: window_end,
                    emergency: state.config.emergency,
                });
            }
        }
        fired
    }
}

fn compute_metric(metric: StopMetric, outcomes: &[&OperationOutcome], window_ms: u64) -> f64 {
    if outcomes.is_empty() {
        return match metric {
            StopMetric::MinEventsPerSecond => 0.0,
            _ => 0.0,
        };
    }

    let total = outcomes.len() as f64;
    let failures = outcomes.iter().filter(|o| !o.ok).count() as f64;

    match metric {
        StopMetric::ErrorRate => failures / total,
        StopMetric::ConnectionErrorRate => {
            let connection_failures = outcomes
                .iter()
                .filter(|o| {
                    matches!(
                        o.error_type,
                        Some(crate::model::telemetry::OperationErrorType::ConnectionDropped)
                            | Some(crate::model::telemetry::OperationErrorType::Connect)
                    )
                })
                .count() as f64;
            connection_failures / total
        }
        StopMetric::LatencyP50Ms | StopMetric::LatencyP95Ms | StopMetric::LatencyP99Ms => {
            let mut latencies: Vec<u64> = outcomes.iter().map(|o| o.latency_ms).collect();
            latencies.sort_unstable();
            let p = match metric {
                StopMetric::LatencyP50Ms => 50.0,
                StopMetric::LatencyP95Ms => 95.0,
                StopMetric::LatencyP99Ms => 99.0,
                _ => unreachable!(),
            };
            Aggregator::percentile(&latencies, p) as f64
        }
        StopMetric::MinEventsPerSecond => {
            let events: u64 = outcomes
                .iter()
                .filter_map(|o| o.stream.as_ref())
                .map(|s| s.events_count as u64)
                .sum();
            events as f64 / (window_ms as f64 / 1000.0).max(0.001)
        }
        StopMetric::StreamStallCount => outcomes.iter().filter(|o| o.stream.as_ref().is_some_and(|s| s.stalled)).count() as f64,
        StopMetric::StreamStallSeconds => {
            let total_stall_ms: u64 = outcomes
                .iter()
                .filter_map(|o| o.stream.as_ref())
                .filter_map(|s| s.stall_duration_ms)
                .sum();
            total_stall_ms as f64 / 1000.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::telemetry::{OperationErrorType, StreamInfo};

    fn outcome(ts: i64, ok: bool, latency_ms: u64) -> OperationOutcome {
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
            ok,
            latency_ms,
            error_type: if ok { None } else { Some(OperationErrorType::Internal) },
            error_code: None,
            http_status: None,
            bytes_in: 0,
            bytes_out: 0,
            stream: None,
            timestamp_ms: ts,
        }
    }

    fn error_rate_condition(threshold: f64, sustain: u32, emergency: bool) -> StopConditionConfig {
        StopConditionConfig {
            metric: StopMetric::ErrorRate,
            comparator: Comparator::Gte,
            threshold,
            window_ms: 1_000,
            sustain_windows: sustain,
            scope: None,
            emergency,
        }
    }

    #[test]
    fn fires_after_single_satisfying_window() {
        let mut evaluator = StopConditionEvaluator::new(vec![error_rate_condition(0.5, 1, false)]);
        let outcomes = vec![outcome(100, false, 10), outcome(200, true, 10)];
        let fired = evaluator.evaluate(&outcomes, 1_000);
        assert!(fired.is_some());
        assert!(!fired.unwrap().emergency);
    }

    #[test]
    fn does_not_fire_before_window_closes() {
        let mut evaluator = StopConditionEvaluator::new(vec![error_rate_condition(0.5, 1, false)]);
        let outcomes = vec![outcome(100, false, 10)];
        assert!(evaluator.evaluate(&outcomes, 500).is_none());
    }

    #[test]
    fn requires_sustained_consecutive_windows() {
        let mut evaluator = StopConditionEvaluator::new(vec![error_rate_condition(0.5, 2, false)]);
        let window1 = vec![outcome(100, false, 10)];
        assert!(evaluator.evaluate(&window1, 1_000).is_none());
        let window2 = vec![outcome(1_100, false, 10)];
        let fired = evaluator.evaluate(&window2, 2_000);
        assert!(fired.is_some());
    }

    #[test]
    fn resets_streak_on_non_satisfying_window() {
        let mut evaluator = StopConditionEvaluator::new(vec![error_rate_condition(0.5, 2, false)]);
        let window1 = vec![outcome(100, false, 10)];
        assert!(evaluator.evaluate(&window1, 1_000).is_none());
        let window2 = vec![outcome(1_100, true, 10)];
        assert!(evaluator.evaluate(&window2, 2_000).is_none());
        let window3 = vec![outcome(2_100, false, 10)];
        assert!(evaluator.evaluate(&window3, 3_000).is_none());
    }

    #[test]
    fn latency_percentile_metric_uses_exact_quantile() {
        let condition = StopConditionConfig {
            metric: StopMetric::LatencyP95Ms,
            comparator: Comparator::Gt,
            threshold: 50.0,
            window_ms: 1_000,
            sustain_windows: 1,
            scope: None,
            emergency: true,
        };
        let mut evaluator = StopConditionEvaluator::new(vec![condition]);
        let outcomes: Vec<OperationOutcome> = (0..10).map(|i| outcome(i * 10, true, (i as u64 + 1) * 10)).collect();
        let fired = evaluator.evaluate(&outcomes, 1_000).unwrap();
        assert!(fired.emergency);
        assert!(fired.observed >= 90.0);
    }

    #[test]
    fn empty_window_never_satisfies_a_gte_threshold() {
        let mut evaluator = StopConditionEvaluator::new(vec![error_rate_condition(0.0, 1, false)]);
        assert!(evaluator.evaluate(&[], 1_000).is_none());
    }
}
