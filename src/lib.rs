// EEG Intent - threshold-based intent detection over streamed biosignals
// Polling worker, zero-phase conditioning and hysteresis detectors

// Module declarations
pub mod acquisition;
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod telemetry;

// Re-exports for convenience
pub use config::AppConfig;
pub use engine::{EngineHandle, EnginePhase, EngineStatus, ParamPatch};
pub use events::{EventKind, IntentEvent};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
