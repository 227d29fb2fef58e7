// Calibration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 3001-3006
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// No event-phase samples were collected
    pub const NO_EVENT_SAMPLES: i32 = 3001;

    /// A calibration run is already active
    pub const ALREADY_IN_PROGRESS: i32 = 3002;

    /// No calibration run is active
    pub const NOT_IN_PROGRESS: i32 = 3003;

    /// Calibration state lock was poisoned
    pub const STATE_POISONED: i32 = 3004;

    /// Phase duration or repetition count invalid
    pub const INVALID_PHASE: i32 = 3005;

    /// A required capture produced no measurement
    pub const MISSING_CAPTURE: i32 = 3006;
}

/// Log a calibration error with structured context
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=CalibrationController, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration failures
///
/// All variants are recoverable: the threshold configuration is left
/// untouched whenever one of these is returned.
///
/// Error code range: 3001-3006
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// The event sample set was empty when the run finished
    NoEventSamples { noise_samples: usize },

    /// A calibration run is already active
    AlreadyInProgress,

    /// No calibration run is active
    NotInProgress,

    /// Calibration state lock was poisoned
    StatePoisoned,

    /// Phase duration or repetition count not usable
    InvalidPhase { reason: String },

    /// A capture (band reference or channel ranking) held no usable data
    MissingCapture { label: &'static str },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::NoEventSamples { .. } => CalibrationErrorCodes::NO_EVENT_SAMPLES,
            CalibrationError::AlreadyInProgress => CalibrationErrorCodes::ALREADY_IN_PROGRESS,
            CalibrationError::NotInProgress => CalibrationErrorCodes::NOT_IN_PROGRESS,
            CalibrationError::StatePoisoned => CalibrationErrorCodes::STATE_POISONED,
            CalibrationError::InvalidPhase { .. } => CalibrationErrorCodes::INVALID_PHASE,
            CalibrationError::MissingCapture { .. } => CalibrationErrorCodes::MISSING_CAPTURE,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::NoEventSamples { noise_samples } => format!(
                "No event samples collected ({} noise samples); threshold unchanged",
                noise_samples
            ),
            CalibrationError::AlreadyInProgress => "Calibration already in progress".to_string(),
            CalibrationError::NotInProgress => "Calibration not in progress".to_string(),
            CalibrationError::StatePoisoned => "Calibration state lock poisoned".to_string(),
            CalibrationError::InvalidPhase { reason } => {
                format!("Invalid calibration phase: {}", reason)
            }
            CalibrationError::MissingCapture { label } => {
                format!("Nothing measured during {} capture", label)
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}
