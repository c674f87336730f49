//! Core library for the PipeWire Controller daemon.
//!
//! The crate keeps the audio server's forced clock rate and quantum in step
//! with a small persisted preference record. Each module owns one concern:
//! bounded external tool calls, hardware capability probing, clock metadata
//! access, settings persistence, single-instance handover, and the engine
//! that ties them together.

pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod instance;
pub mod settings;

pub use clock::{ClockController, ClockKey};
pub use command::{CommandRunner, SystemRunner, ToolOutput};
pub use config::{AppConfig, PathConfig, Preferences, ToolConfig};
pub use engine::{ApplyReport, LiveState, ReconciliationEngine, BUFFER_SIZES};
pub use error::{ControllerError, Result, ToolError};
pub use hardware::{CapabilityProber, CapabilitySet, COMMON_RATES};
pub use instance::{Handover, InstanceGuard};
pub use settings::{LoadOrigin, SettingsStore};
