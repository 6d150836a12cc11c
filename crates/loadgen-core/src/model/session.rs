use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Reuse,
    PerRequest,
    Pool,
    Churn,
}

impl From<crate::model::config::SessionPolicyMode> for SessionMode {
    fn from(mode: crate::model::config::SessionPolicyMode) -> Self {
        match mode {
            crate::model::config::SessionPolicyMode::Reuse => SessionMode::Reuse,
            crate::model::config::SessionPolicyMode::PerRequest => SessionMode::PerRequest,
            crate::model::config::SessionPolicyMode::Pool => SessionMode::Pool,
            crate::model::config::SessionPolicyMode::Churn => SessionMode::Churn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Creating,
    Active,
    Idle,
    Closed,
    Expired,
}

/// A logical MCP connection with a completed `initialize` handshake.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    pub state: SessionState,
    pub last_use_ms: i64,
    pub ops_since_return: u32,
}

impl Session {
    pub fn new(session_id: String, now_ms: i64) -> Self {
        Session {
            session_id,
            state: SessionState::Creating,
            last_use_ms: now_ms,
            ops_since_return: 0,
        }
    }

    pub fn is_expired(&self, now_ms: i64, max_idle_ms: i64) -> bool {
        now_ms - self.last_use_ms > max_idle_ms
    }

    pub fn touch(&mut self, now_ms: i64) {
        self.last_use_ms = now_ms;
        self.ops_since_return += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_creating() {
        let s = Session::new("sess_1".to_string(), 1000);
        assert_eq!(s.state, SessionState::Creating);
        assert_eq!(s.ops_since_return, 0);
    }

    #[test]
    fn expiry_respects_max_idle() {
        let s = Session::new("sess_1".to_string(), 1000);
        assert!(!s.is_expired(1500, 1000));
        assert!(s.is_expired(2500, 1000));
    }

    #[test]
    fn touch_updates_last_use_and_counter() {
        let mut s = Session::new("sess_1".to_string(), 1000);
        s.touch(2000);
        assert_eq!(s.last_use_ms, 2000);
        assert_eq!(s.ops_since_return, 1);
        assert!(!s.is_expired(2000, 500));
    }
}
