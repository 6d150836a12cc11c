pub mod engine;
pub mod error;
pub mod ids;
pub mod model;
pub mod operations;
pub mod registry;
pub mod runmanager;
pub mod session;
pub mod stopcond;
pub mod telemetry;
pub mod transport;
pub mod validate;

pub use error::{ErrorEnvelope, ErrorType, LoadgenError};
