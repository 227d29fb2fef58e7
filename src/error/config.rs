// Configuration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 1001-1012
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// Channel index outside the session's channel count
    pub const INVALID_CHANNEL: i32 = 1001;

    /// Both combination inputs point at the same channel
    pub const DUPLICATE_CHANNEL: i32 = 1002;

    /// A duration or window length was zero or negative
    pub const NON_POSITIVE_DURATION: i32 = 1003;

    /// Off factor outside (0, 1)
    pub const INVALID_OFF_FACTOR: i32 = 1004;

    /// Onset threshold not strictly positive
    pub const INVALID_ONSET: i32 = 1005;

    /// Frequency band empty or above Nyquist
    pub const INVALID_BAND: i32 = 1006;

    /// Band-power hysteresis factors on the wrong side of 1.0
    pub const INVALID_HYSTERESIS: i32 = 1007;

    /// Calibration blend factor outside (0, 1]
    pub const INVALID_BLEND_FACTOR: i32 = 1008;

    /// Configuration file could not be parsed
    pub const PARSE: i32 = 1009;

    /// Configuration file could not be read
    pub const IO: i32 = 1010;

    /// Pending-event queue capacity outside 1..=4
    pub const INVALID_PENDING_CAPACITY: i32 = 1011;

    /// Baseline duration holds no whole sample at the session rate
    pub const EMPTY_BASELINE_WINDOW: i32 = 1012;
}

/// Log a configuration error with structured context
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=AppConfig, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Configuration errors
///
/// All of these are fatal and are raised before the detection loop starts.
///
/// Error code range: 1001-1012
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Channel index is not below the session channel count
    InvalidChannel { index: usize, channel_count: usize },

    /// Both selected channels are identical
    DuplicateChannel { index: usize },

    /// Duration-like field must be strictly positive
    NonPositiveDuration { field: &'static str, value: f64 },

    /// Off factor must lie strictly between 0 and 1
    InvalidOffFactor { value: f64 },

    /// Onset threshold must be strictly positive
    InvalidOnset { value: f64 },

    /// Band edges must satisfy 0 < low < high < nyquist
    InvalidBand {
        field: &'static str,
        low: f64,
        high: f64,
        nyquist: f64,
    },

    /// up_factor must exceed 1 and down_factor must lie in (0, 1)
    InvalidHysteresis { up: f64, down: f64 },

    /// Blend factor k must lie in (0, 1]
    InvalidBlendFactor { value: f64 },

    /// JSON parsing failed
    Parse { reason: String },

    /// File read failed
    Io { reason: String },

    /// Pending-event capacity must lie in 1..=4
    InvalidPendingCapacity { value: usize },

    /// Baseline window rounds down to zero samples
    EmptyBaselineWindow {
        duration_seconds: f64,
        sampling_rate: f64,
    },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::InvalidChannel { .. } => ConfigErrorCodes::INVALID_CHANNEL,
            ConfigError::DuplicateChannel { .. } => ConfigErrorCodes::DUPLICATE_CHANNEL,
            ConfigError::NonPositiveDuration { .. } => ConfigErrorCodes::NON_POSITIVE_DURATION,
            ConfigError::InvalidOffFactor { .. } => ConfigErrorCodes::INVALID_OFF_FACTOR,
            ConfigError::InvalidOnset { .. } => ConfigErrorCodes::INVALID_ONSET,
            ConfigError::InvalidBand { .. } => ConfigErrorCodes::INVALID_BAND,
            ConfigError::InvalidHysteresis { .. } => ConfigErrorCodes::INVALID_HYSTERESIS,
            ConfigError::InvalidBlendFactor { .. } => ConfigErrorCodes::INVALID_BLEND_FACTOR,
            ConfigError::Parse { .. } => ConfigErrorCodes::PARSE,
            ConfigError::Io { .. } => ConfigErrorCodes::IO,
            ConfigError::InvalidPendingCapacity { .. } => {
                ConfigErrorCodes::INVALID_PENDING_CAPACITY
            }
            ConfigError::EmptyBaselineWindow { .. } => ConfigErrorCodes::EMPTY_BASELINE_WINDOW,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::InvalidChannel {
                index,
                channel_count,
            } => format!(
                "Channel index {} out of range (session has {} channels)",
                index, channel_count
            ),
            ConfigError::DuplicateChannel { index } => {
                format!("Channel {} selected twice for combination", index)
            }
            ConfigError::NonPositiveDuration { field, value } => {
                format!("{} must be positive, got {}", field, value)
            }
            ConfigError::InvalidOffFactor { value } => {
                format!("off_factor must be in (0, 1), got {}", value)
            }
            ConfigError::InvalidOnset { value } => {
                format!("onset_uv must be positive, got {}", value)
            }
            ConfigError::InvalidBand {
                field,
                low,
                high,
                nyquist,
            } => format!(
                "{} band {}..{} Hz invalid (nyquist {} Hz)",
                field, low, high, nyquist
            ),
            ConfigError::InvalidHysteresis { up, down } => format!(
                "Band hysteresis requires up_factor > 1 and 0 < down_factor < 1, got up={} down={}",
                up, down
            ),
            ConfigError::InvalidBlendFactor { value } => {
                format!("blend_factor must be in (0, 1], got {}", value)
            }
            ConfigError::Parse { reason } => format!("Failed to parse config: {}", reason),
            ConfigError::Io { reason } => format!("Failed to read config: {}", reason),
            ConfigError::InvalidPendingCapacity { value } => {
                format!("display.pending_capacity must be in 1..=4, got {}", value)
            }
            ConfigError::EmptyBaselineWindow {
                duration_seconds,
                sampling_rate,
            } => format!(
                "baseline.duration_seconds {} s holds no sample at {} Hz",
                duration_seconds, sampling_rate
            ),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_codes() {
        assert_eq!(
            ConfigError::InvalidChannel {
                index: 9,
                channel_count: 8
            }
            .code(),
            ConfigErrorCodes::INVALID_CHANNEL
        );
        assert_eq!(
            ConfigError::InvalidOffFactor { value: 1.2 }.code(),
            ConfigErrorCodes::INVALID_OFF_FACTOR
        );
        assert_eq!(
            ConfigError::Parse {
                reason: "eof".to_string()
            }
            .code(),
            ConfigErrorCodes::PARSE
        );
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::InvalidChannel {
            index: 9,
            channel_count: 8,
        };
        assert_eq!(
            err.message(),
            "Channel index 9 out of range (session has 8 channels)"
        );

        let err = ConfigError::NonPositiveDuration {
            field: "baseline.duration_seconds",
            value: 0.0,
        };
        assert!(err.message().starts_with("baseline.duration_seconds"));
    }

    #[test]
    fn test_window_and_queue_codes() {
        let err = ConfigError::InvalidPendingCapacity { value: 5 };
        assert_eq!(err.code(), 1011);
        assert_eq!(err.message(), "display.pending_capacity must be in 1..=4, got 5");

        let err = ConfigError::EmptyBaselineWindow {
            duration_seconds: 0.001,
            sampling_rate: 250.0,
        };
        assert_eq!(err.code(), ConfigErrorCodes::EMPTY_BASELINE_WINDOW);
        assert!(err.message().contains("250 Hz"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidOnset { value: -1.0 };
        let display = format!("{}", err);
        assert!(display.contains("ConfigError"));
        assert!(display.contains("1005"));
    }
}
