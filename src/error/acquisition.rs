// Acquisition error types and constants

use crate::error::{ConfigError, ErrorCode};
use log::error;
use std::fmt;

/// Acquisition error code constants
///
/// Error code range: 2001-2007
pub struct AcquisitionErrorCodes {}

impl AcquisitionErrorCodes {
    /// Session could not be prepared
    pub const PREPARE_FAILED: i32 = 2001;

    /// Session could not start streaming
    pub const START_FAILED: i32 = 2002;

    /// Stream broke while polling
    pub const STREAM_FAILURE: i32 = 2003;

    /// Detector is already running
    pub const ALREADY_RUNNING: i32 = 2004;

    /// Detector is not running
    pub const NOT_RUNNING: i32 = 2005;

    /// Mutex was poisoned
    pub const LOCK_POISONED: i32 = 2006;

    /// Configuration rejected for this session
    pub const CONFIG: i32 = 2007;
}

/// Log an acquisition error with structured context
pub fn log_acquisition_error(err: &AcquisitionError, context: &str) {
    error!(
        "Acquisition error in {}: code={}, component=DetectionWorker, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Acquisition and worker lifecycle errors
///
/// Error code range: 2001-2007
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    /// prepare() failed
    PrepareFailed { reason: String },

    /// start() failed
    StartFailed { reason: String },

    /// poll_chunk() failed mid-stream
    StreamFailure { reason: String },

    /// start requested while the worker is running
    AlreadyRunning,

    /// stop requested while no worker is running
    NotRunning,

    /// A shared-state lock was poisoned
    LockPoisoned { component: String },

    /// Configuration invalid for the opened session
    Config(ConfigError),
}

impl ErrorCode for AcquisitionError {
    fn code(&self) -> i32 {
        match self {
            AcquisitionError::PrepareFailed { .. } => AcquisitionErrorCodes::PREPARE_FAILED,
            AcquisitionError::StartFailed { .. } => AcquisitionErrorCodes::START_FAILED,
            AcquisitionError::StreamFailure { .. } => AcquisitionErrorCodes::STREAM_FAILURE,
            AcquisitionError::AlreadyRunning => AcquisitionErrorCodes::ALREADY_RUNNING,
            AcquisitionError::NotRunning => AcquisitionErrorCodes::NOT_RUNNING,
            AcquisitionError::LockPoisoned { .. } => AcquisitionErrorCodes::LOCK_POISONED,
            AcquisitionError::Config(_) => AcquisitionErrorCodes::CONFIG,
        }
    }

    fn message(&self) -> String {
        match self {
            AcquisitionError::PrepareFailed { reason } => {
                format!("Failed to prepare session: {}", reason)
            }
            AcquisitionError::StartFailed { reason } => {
                format!("Failed to start stream: {}", reason)
            }
            AcquisitionError::StreamFailure { reason } => format!("Stream failure: {}", reason),
            AcquisitionError::AlreadyRunning => "Detector already running".to_string(),
            AcquisitionError::NotRunning => "Detector not running".to_string(),
            AcquisitionError::LockPoisoned { component } => {
                format!("Lock poisoned in {}", component)
            }
            AcquisitionError::Config(inner) => inner.message(),
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AcquisitionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AcquisitionError {}

impl From<ConfigError> for AcquisitionError {
    fn from(err: ConfigError) -> Self {
        AcquisitionError::Config(err)
    }
}
