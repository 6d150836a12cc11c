//! Aggregation over a run's stored operations — §4.H. Exact sort-based
//! quantiles, no approximate sketches, the same approach the streaming
//! aggregator in the single-process engine uses for HTTP load tests,
//! generalized to per-tool breakdowns, bucketed time-series, and stability
//! metrics grouped by session.

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Serialize;

use crate::model::telemetry::OperationErrorType;
use crate::model::OperationOutcome;

const TIME_SERIES_BUCKET_COUNT: u64 = 25;
const MIN_BUCKET_MS: u64 = 100;
const MAX_BUCKET_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize)]
pub struct ToolBreakdown {
    pub tool_name: String,
    pub total_ops: u64,
    pub failure_ops: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeBucket {
    pub bucket_start_ms: i64,
    pub total_ops: u64,
    pub failure_ops: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamingMetrics {
    pub total_events: u64,
    pub stalled_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub total_ops: u64,
    pub failure_ops: u64,
    pub error_rate: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub mean_ms: f64,
    pub throughput_ops_per_sec: f64,
    pub per_tool: Vec<ToolBreakdown>,
    pub streaming: StreamingMetrics,
    pub time_series: Option<Vec<TimeBucket>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStability {
    pub total: u64,
    pub active: u64,
    pub dropped: u64,
    pub terminated: u64,
    pub avg_lifetime_ms: f64,
    pub drop_rate: f64,
    pub stability_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StabilityMetrics {
    pub sessions: Vec<SessionStability>,
    pub connection_churn_rate: f64,
    pub reconnect_rate: f64,
}

/// Stateless computation over a slice of outcomes. Unlike the single-run
/// in-process engine, the control plane computes metrics on demand from
/// whatever the [`crate::telemetry::TelemetryStore`] currently holds rather
/// than maintaining running sums, since runs are retained in full (subject
/// to the retention caps) and re-aggregated per request.
pub struct Aggregator;

impl Aggregator {
    pub fn percentile(latencies_sorted: &[u64], p: f64) -> u64 {
        if latencies_sorted.is_empty() {
            return 0;
        }
        let idx = ((p / 100.0) * latencies_sorted.len() as f64).ceil() as usize;
        let idx = idx.saturating_sub(1).min(latencies_sorted.len() - 1);
        latencies_sorted[idx]
    }

    pub fn compute(outcomes: &[OperationOutcome], duration_s: f64, include_time_series: bool) -> RunMetrics {
        let total_ops = outcomes.len() as u64;
        let failure_ops = outcomes.iter().filter(|o| !o.ok).count() as u64;
        let error_rate = if total_ops == 0 {
            0.0
        } else {
            failure_ops as f64 / total_ops as f64
        };

        let mut latencies: Vec<u64> = outcomes.iter().map(|o| o.latency_ms).collect();
        latencies.sort_unstable();
        let mean_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
        };

        let throughput = if duration_s > 0.0 {
            total_ops as f64 / duration_s
        } else {
            0.0
        };

        let per_tool = Self::tool_breakdown(outcomes);
        let streaming = Self::streaming_metrics(outcomes);
        let time_series = if include_time_series {
            Some(Self::time_series(outcomes, duration_s))
        } else {
            None
        };

        RunMetrics {
            total_ops,
            failure_ops,
            error_rate,
            p50_ms: Self::percentile(&latencies, 50.0),
            p95_ms: Self::percentile(&latencies, 95.0),
            p99_ms: Self::percentile(&latencies, 99.0),
            mean_ms,
            throughput_ops_per_sec: throughput,
            per_tool,
            streaming,
            time_series,
        }
    }

    fn tool_breakdown(outcomes: &[OperationOutcome]) -> Vec<ToolBreakdown> {
        let mut by_tool: HashMap<String, Vec<&OperationOutcome>> = HashMap::new();
        for o in outcomes {
            if let Some(tool) = &o.tool_name {
                by_tool.entry(tool.clone()).or_default().push(o);
            }
        }
        let mut breakdowns: Vec<ToolBreakdown> = by_tool
            .into_iter()
            .map(|(tool_name, ops)| {
                let mut latencies: Vec<u64> = ops.iter().map(|o| o.latency_ms).collect();
                latencies.sort_unstable();
                ToolBreakdown {
                    tool_name,
                    total_ops: ops.len() as u64,
                    failure_ops: ops.iter().filter(|o| !o.ok).count() as u64,
                    p50_ms: Self::percentile(&latencies, 50.0),
                    p95_ms: Self::percentile(&latencies, 95.0),
                    p99_ms: Self::percentile(&latencies, 99.0),
                }
            })
            .collect();
        breakdowns.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        breakdowns
    }

    fn streaming_metrics(outcomes: &[OperationOutcome]) -> StreamingMetrics {
        let mut total_events = 0u64;
        let mut stalled_count = 0u64;
        for o in outcomes {
            if let Some(stream) = &o.stream {
                total_events += stream.events_count as u64;
                if stream.stalled {
                    stalled_count += 1;
                }
            }
        }
        StreamingMetrics {
            total_events,
            stalled_count,
        }
    }

    /// Bucket into ~25 buckets over the run span, with bucket width clamped
    /// to `[100ms, 5s]`.
    fn time_series(outcomes: &[OperationOutcome], duration_s: f64) -> Vec<TimeBucket> {
        if outcomes.is_empty() {
            return Vec::new();
        }
        let min_ts = outcomes.iter().map(|o| o.timestamp_ms).min().unwrap();
        let max_ts = outcomes.iter().map(|o| o.timestamp_ms).max().unwrap();
        let span_ms = (max_ts - min_ts).max(1) as u64;
        let raw_bucket_ms = (span_ms / TIME_SERIES_BUCKET_COUNT.max(1)).max(1);
        let bucket_ms = raw_bucket_ms.clamp(MIN_BUCKET_MS, MAX_BUCKET_MS);
        let _ = duration_s;

        let mut buckets: BTreeMap<i64, (u64, u64, u64)> = BTreeMap::new(); // (total, failures, sum_latency)
        for o in outcomes {
            let bucket_start = min_ts + ((o.timestamp_ms - min_ts) as u64 / bucket_ms) as i64 * bucket_ms as i64;
            let entry = buckets.entry(bucket_start).or_insert((0, 0, 0));
            entry.0 += 1;
            if !o.ok {
                entry.1 += 1;
            }
            entry.2 += o.latency_ms;
        }

        buckets
            .into_iter()
            .map(|(bucket_start_ms, (total, failures, sum_latency))| TimeBucket {
                bucket_start_ms,
                total_ops: total,
                failure_ops: failures,
                avg_latency_ms: if total > 0 {
                    sum_latency as f64 / total as f64
                } else {
                    0.0
                },
            })
            .collect()
    }

    /// Groups by `session_id` and derives the stability metrics from §4.H.
    /// A drop is inferred when an op with `error_type = connection_dropped`
    /// references that session.
    pub fn stability(outcomes: &[OperationOutcome]) -> StabilityMetrics {
        struct SessionAgg {
            first_ts: i64,
            last_ts: i64,
            dropped: bool,
        }
        let mut by_session: HashMap<String, SessionAgg> = HashMap::new();
        for o in outcomes {
            let Some(sid) = &o.session_id else { continue };
            let agg = by_session.entry(sid.clone()).or_insert(SessionAgg {
                first_ts: o.timestamp_ms,
                last_ts: o.timestamp_ms,
                dropped: false,
            });
            agg.first_ts = agg.first_ts.min(o.timestamp_ms);
            agg.last_ts = agg.last_ts.max(o.timestamp_ms);
            if o.error_type == Some(OperationErrorType::ConnectionDropped) {
                agg.dropped = true;
            }
        }

        let total = by_session.len() as u64;
        let dropped = by_session.values().filter(|a| a.dropped).count() as u64;
        let terminated = total - dropped;
        let avg_lifetime_ms = if total > 0 {
            by_session
                .values()
                .map(|a| (a.last_ts - a.first_ts) as f64)
                .sum::<f64>()
                / total as f64
        } else {
            0.0
        };
        let drop_rate = if total > 0 {
            dropped as f64 / total as f64
        } else {
            0.0
        };

        let sessions = vec![SessionStability {
            total,
            active: 0,
            dropped,
            terminated,
            avg_lifetime_ms,
            drop_rate,
            stability_score: 100.0 * (1.0 - drop_rate),
        }];

        StabilityMetrics {
            sessions,
            // Open Question (b): left configurable at the call site; this
            // default divides reconnect events by total sessions observed.
            connection_churn_rate: if total > 0 { dropped as f64 / total as f64 } else { 0.0 },
            reconnect_rate: if total > 0 { dropped as f64 / total as f64 } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::telemetry::StreamInfo;

    fn outcome(latency_ms: u64, ok: bool, ts: i64) -> OperationOutcome {
        OperationOutcome {
            run_id: "run_0".to_string(),
            execution_id: "exe_0".to_string(),
            stage: "ramp".to_string(),
            stage_id: "stg_0".to_string(),
            worker_id: "wkr_0".to_string(),
            vu_id: "vu_0".to_string(),
            session_id: Some("sess_0".to_string()),
            operation: "ping".to_string(),
            tool_name: None,
            ok,
            latency_ms,
            error_type: if ok { None } else { Some(OperationErrorType::Internal) },
            error_code: None,
            http_status: Some(200),
            bytes_in: 10,
            bytes_out: 10,
            stream: None,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn percentile_empty_returns_zero() {
        assert_eq!(Aggregator::percentile(&[], 50.0), 0);
    }

    #[test]
    fn percentile_multiple_entries_are_correct() {
        let sorted: Vec<u64> = (1..=10).map(|i| i * 10).collect();
        assert_eq!(Aggregator::percentile(&sorted, 50.0), 50);
        assert_eq!(Aggregator::percentile(&sorted, 90.0), 90);
        assert_eq!(Aggregator::percentile(&sorted, 100.0), 100);
    }

    #[test]
    fn compute_with_no_outcomes_is_zeroed() {
        let metrics = Aggregator::compute(&[], 10.0, false);
        assert_eq!(metrics.total_ops, 0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.p50_ms, 0);
    }

    #[test]
    fn compute_error_rate_and_percentiles() {
        let outcomes = vec![
            outcome(10, true, 0),
            outcome(20, true, 100),
            outcome(30, false, 200),
            outcome(40, true, 300),
        ];
        let metrics = Aggregator::compute(&outcomes, 1.0, false);
        assert_eq!(metrics.total_ops, 4);
        assert_eq!(metrics.failure_ops, 1);
        assert_eq!(metrics.error_rate, 0.25);
        assert!(metrics.p99_ms >= metrics.p50_ms);
    }

    #[test]
    fn time_series_buckets_are_sorted_and_nonoverlapping() {
        let outcomes: Vec<OperationOutcome> = (0..100).map(|i| outcome(5, true, i * 50)).collect();
        let metrics = Aggregator::compute(&outcomes, 5.0, true);
        let series = metrics.time_series.unwrap();
        assert!(!series.is_empty());
        for w in series.windows(2) {
            assert!(w[0].bucket_start_ms < w[1].bucket_start_ms);
        }
    }

    #[test]
    fn stream_zero_events_outcome_contributes_zero_events() {
        let mut o = outcome(5, true, 0);
        o.stream = Some(StreamInfo::default());
        let metrics = Aggregator::compute(&[o], 1.0, false);
        assert_eq!(metrics.streaming.total_events, 0);
        assert_eq!(metrics.streaming.stalled_count, 0);
    }

    #[test]
    fn stability_marks_session_dropped_on_connection_dropped_error() {
        let mut dropped = outcome(10, false, 0);
        dropped.error_type = Some(OperationErrorType::ConnectionDropped);
        dropped.session_id = Some("sess_x".to_string());
        let stability = Aggregator::stability(&[dropped]);
        assert_eq!(stability.sessions[0].total, 1);
        assert_eq!(stability.sessions[0].dropped, 1);
        assert_eq!(stability.sessions[0].stability_score, 0.0);
    }

    #[test]
    fn stability_full_score_when_no_drops() {
        let outcomes = vec![outcome(10, true, 0), outcome(20, true, 10)];
        let stability = Aggregator::stability(&outcomes);
        assert_eq!(stability.sessions[0].dropped, 0);
        assert_eq!(stability.sessions[0].stability_score, 100.0);
    }
}
