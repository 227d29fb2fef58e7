//! Engine module: worker lifecycle and the consumer-facing handle.
//!
//! `core` holds `EngineHandle`; `state` holds the single-lock state shared
//! with the detection worker plus the status and patch types.

pub mod core;
pub mod state;

pub use core::EngineHandle;
pub use state::{CalibrationRequest, EnginePhase, EngineStatus, ParamPatch, SharedState};
