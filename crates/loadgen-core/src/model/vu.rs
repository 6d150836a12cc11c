use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VuId(pub u32);

impl std::fmt::Display for VuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vu_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VuState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VuCounters {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vu_id_display() {
        assert_eq!(VuId(7).to_string(), "vu_7");
    }

    #[test]
    fn vu_state_serde_roundtrip() {
        for state in [
            VuState::Initializing,
            VuState::Running,
            VuState::Draining,
            VuState::Stopped,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            let back: VuState = serde_json::from_str(&json).unwrap();
            assert_eq!(state, back);
        }
    }

    #[test]
    fn counters_default_to_zero() {
        let counters = VuCounters::default();
        assert_eq!(counters.started, 0);
        assert_eq!(counters.completed, 0);
        assert_eq!(counters.failed, 0);
    }
}
