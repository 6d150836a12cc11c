pub mod assignment;
pub mod config;
pub mod event;
pub mod run;
pub mod session;
pub mod stage;
pub mod telemetry;
pub mod vu;
pub mod worker;

pub use assignment::{Assignment, AssignmentState};
pub use config::{
    AllowlistConfig, AuthConfig, HardCaps, RunConfig, SafetyConfig, SessionPolicyConfig,
    StopConditionConfig, TargetConfig, ThinkTimeConfig, TimeoutsConfig, ToolSelectionConfig,
    ToolsConfig, WorkloadConfig,
};
pub use event::{Event, EventPayload};
pub use run::{Run, RunState, StopMode, WorkerFailurePolicy};
pub use session::{Session, SessionMode, SessionState};
pub use stage::{RampPlan, Stage, StageKind, StageLoad};
pub use telemetry::{OperationOutcome, StreamInfo};
pub use vu::{VuId, VuState};
pub use worker::{HealthSnapshot, Worker};
