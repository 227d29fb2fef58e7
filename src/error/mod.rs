// Error types for the intent detection engine
//
// Each concern (configuration, acquisition, calibration) has its own error
// enum with a numeric code range so failures can be surfaced through the
// engine's status field without carrying the error value across threads.

mod acquisition;
mod calibration;
mod config;

pub use acquisition::{log_acquisition_error, AcquisitionError, AcquisitionErrorCodes};
pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use config::{log_config_error, ConfigError, ConfigErrorCodes};

/// Error codes for structured error reporting
///
/// Provides a uniform way to read a numeric code and a human-readable
/// message from any engine error type.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
