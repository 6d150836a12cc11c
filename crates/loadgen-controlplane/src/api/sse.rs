//! Run event stream — §6. One SSE frame per [`Event`], a `:keepalive`
//! comment every 15 s, resumable by `Last-Event-ID` header, `?cursor=`, or
//! `?since=` in that precedence order — the same tail-and-poll shape the
//! donor's streaming endpoints use, generalized from a single in-process
//! channel to a per-run event log a reconnecting client can replay from.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use loadgen_core::LoadgenError;

use crate::error::AppError;
use crate::state::AppState;

const POLL_INTERVAL_MS: u64 = 500;
const KEEPALIVE_SECS: u64 = 15;

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub since: Option<i64>,
}

/// Resolves the starting index into the run's event log from
/// `Last-Event-ID` header > `?cursor=` > `?since=`, in that order.
async fn resolve_cursor(state: &AppState, run_id: &str, headers: &HeaderMap, query: &EventsQuery) -> Result<usize, AppError> {
    if let Some(last_id) = headers.get("Last-Event-ID").and_then(|v| v.to_str().ok()) {
        return match state.run_manager.find_event_index(run_id, last_id).await? {
            Some(idx) => Ok(idx + 1),
            None => Err(AppError(LoadgenError::InvalidLastEventId(last_id.to_string()))),
        };
    }
    if let Some(cursor) = &query.cursor {
        return match state.run_manager.find_event_index(run_id, cursor).await? {
            Some(idx) => Ok(idx + 1),
            None => Err(AppError(LoadgenError::InvalidCursor(cursor.clone()))),
        };
    }
    if let Some(since_ms) = query.since {
        let events = state.run_manager.tail_events(run_id, 0, usize::MAX).await?;
        let idx = events.iter().position(|e| e.timestamp_ms >= since_ms).unwrap_or(events.len());
        return Ok(idx);
    }
    Ok(0)
}

pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    state.run_manager.get(&run_id).await?;
    let cursor = resolve_cursor(&state, &run_id, &headers, &query).await?;

    let stream = stream::unfold((state, run_id, cursor), |(state, run_id, cursor)| async move {
        loop {
            match state.run_manager.tail_events(&run_id, cursor, 100).await {
                Ok(events) if !events.is_empty() => {
                    let next_cursor = cursor + events.len();
                    let frames: Vec<Result<SseEvent, Infallible>> = events
                        .iter()
                        .map(|e| {
                            let data = serde_json::to_string(e).unwrap_or_default();
                            Ok(SseEvent::default().event("run_event").id(e.event_id.clone()).data(data))
                        })
                        .collect();
                    return Some((stream::iter(frames), (state, run_id, next_cursor)));
                }
                Ok(_) => {
                    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                    continue;
                }
                Err(_) => return None,
            }
        }
    })
    .flatten();

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEPALIVE_SECS)).text("keepalive")))
}
