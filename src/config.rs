//! Configuration for the detection engine
//!
//! Every recognized option lives here: channel selection and combination,
//! filter switches, baseline window, thresholds, calibration timing and the
//! band-power variant. Configuration is loaded from JSON so thresholds can be
//! tuned without recompiling. Validation runs once before streaming starts;
//! invalid values are rejected, never clamped.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub acquisition: AcquisitionConfig,
    pub conditioning: ConditioningConfig,
    pub baseline: BaselineConfig,
    pub threshold: ThresholdConfig,
    pub calibration: CalibrationConfig,
    pub band_power: BandPowerConfig,
    pub display: DisplayConfig,
}

/// How two raw channels are folded into one derived waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMode {
    /// 0.5 * (a + b)
    Average,
    /// a - b
    Difference,
}

/// Event policy of the threshold detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Two-state Schmitt trigger with magnitude-based exit
    Hysteresis,
    /// Stateless edge trigger limited only by the cooldown
    Debounce,
}

/// Acquisition loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Seconds of samples requested per poll
    pub chunk_seconds: f64,
    /// Explicit poll size; 0 derives it from `chunk_seconds`
    pub poll_max_samples: usize,
    /// Ring buffer hint passed to the session on start
    pub buffer_hint: usize,
    /// Sleep between polls when no chunk is available
    pub idle_sleep_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: 0.05,
            poll_max_samples: 0,
            buffer_hint: 45_000,
            idle_sleep_ms: 10,
        }
    }
}

impl AcquisitionConfig {
    /// Number of samples to request per poll at the given rate
    pub fn poll_size(&self, sampling_rate: f64) -> usize {
        if self.poll_max_samples > 0 {
            self.poll_max_samples
        } else {
            ((sampling_rate * self.chunk_seconds).round() as usize).max(1)
        }
    }
}

/// Channel combination and filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    /// Two zero-based channel indices
    pub channels: [usize; 2],
    pub mode: CombinationMode,
    pub notch_enabled: bool,
    pub notch_hz: f64,
    pub notch_q: f64,
    pub bandpass_enabled: bool,
    pub bandpass_low_hz: f64,
    pub bandpass_high_hz: f64,
    /// Length of the rolling raw window that is filtered each chunk
    pub filter_window_seconds: f64,
    /// Below this many buffered samples filtering is skipped
    pub min_filter_samples: usize,
    /// Subtract the window median before filtering
    pub remove_median: bool,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            channels: [0, 1],
            mode: CombinationMode::Average,
            notch_enabled: true,
            notch_hz: 50.0,
            notch_q: 30.0,
            bandpass_enabled: true,
            bandpass_low_hz: 1.0,
            bandpass_high_hz: 15.0,
            filter_window_seconds: 2.0,
            min_filter_samples: 100,
            remove_median: false,
        }
    }
}

/// Rolling baseline window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub duration_seconds: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 2.0,
        }
    }
}

impl BaselineConfig {
    /// Window capacity in samples; zero when the duration is below one
    /// sample period
    pub fn capacity(&self, sampling_rate: f64) -> usize {
        (self.duration_seconds * sampling_rate) as usize
    }
}

/// Onset/offset thresholds shared between the worker and its consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Magnitude above baseline (µV) required to enter Active
    pub onset_uv: f64,
    /// Exit threshold as a fraction of `onset_uv`
    pub off_factor: f64,
    /// Minimum interval between successive entries
    pub cooldown_seconds: f64,
    pub mode: ThresholdMode,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            onset_uv: 150.0,
            off_factor: 0.3,
            cooldown_seconds: 0.2,
            mode: ThresholdMode::Hysteresis,
        }
    }
}

impl ThresholdConfig {
    /// Exit threshold, strictly below onset
    pub fn offset_uv(&self) -> f64 {
        self.onset_uv * self.off_factor
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.onset_uv > 0.0) {
            return Err(ConfigError::InvalidOnset {
                value: self.onset_uv,
            });
        }
        if !(self.off_factor > 0.0 && self.off_factor < 1.0) {
            return Err(ConfigError::InvalidOffFactor {
                value: self.off_factor,
            });
        }
        if !(self.cooldown_seconds >= 0.0) {
            return Err(ConfigError::NonPositiveDuration {
                field: "threshold.cooldown_seconds",
                value: self.cooldown_seconds,
            });
        }
        Ok(())
    }
}

/// Guided calibration timing and arithmetic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub repetitions: usize,
    pub quiet_seconds: f64,
    pub event_seconds: f64,
    /// Blend factor k between noise and event means
    pub blend_factor: f64,
    /// Lower bound for the suggested onset (µV)
    pub min_onset_uv: f64,
    /// Noise mean used when no noise sample was recorded
    pub fallback_noise_uv: f64,
    /// Window scanned by a manual mark (seconds)
    pub mark_window_seconds: f64,
    /// k in median + k * std for the statistical threshold
    pub std_factor: f64,
    /// Eyes-open capture for band calibration
    pub band_open_seconds: f64,
    /// Eyes-closed capture for band calibration
    pub band_closed_seconds: f64,
    /// Weight of the eyes-open power in the band reference
    pub band_open_weight: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            repetitions: 4,
            quiet_seconds: 2.0,
            event_seconds: 0.8,
            blend_factor: 0.6,
            min_onset_uv: 20.0,
            fallback_noise_uv: 30.0,
            mark_window_seconds: 1.0,
            std_factor: 5.0,
            band_open_seconds: 10.0,
            band_closed_seconds: 10.0,
            band_open_weight: 0.7,
        }
    }
}

/// Band-power detector (eyes open / closed)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandPowerConfig {
    pub enabled: bool,
    pub channels: [usize; 2],
    pub mode: CombinationMode,
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    /// Span of signal analysed for each power estimate
    pub window_seconds: f64,
    /// Entry requires power > baseline * up_factor
    pub up_factor: f64,
    /// Exit requires power < baseline * down_factor
    pub down_factor: f64,
    /// Number of past power estimates forming the running baseline
    pub baseline_windows: usize,
    /// Fixed baseline from band calibration; overrides the running one
    pub calibrated_baseline: Option<f64>,
    pub cooldown_seconds: f64,
    /// Emit an exit event when leaving Active
    pub emit_exit_events: bool,
    /// Welch segment length cap
    pub max_segment_len: usize,
}

impl Default for BandPowerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channels: [6, 7],
            mode: CombinationMode::Average,
            band_low_hz: 8.0,
            band_high_hz: 13.0,
            window_seconds: 2.0,
            up_factor: 1.10,
            down_factor: 0.90,
            baseline_windows: 30,
            calibrated_baseline: None,
            cooldown_seconds: 0.0,
            emit_exit_events: true,
            max_segment_len: 512,
        }
    }
}

/// Consumer-facing buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub signal_buffer_seconds: f64,
    pub max_signal_points: usize,
    /// Pending-event queue depth; 1 reproduces one-shot flag semantics
    pub pending_capacity: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            signal_buffer_seconds: 10.0,
            max_signal_points: 1000,
            pending_capacity: 1,
        }
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositiveDuration { field, value })
    }
}

fn check_channels(channels: [usize; 2], channel_count: usize) -> Result<(), ConfigError> {
    for &index in &channels {
        if index >= channel_count {
            return Err(ConfigError::InvalidChannel {
                index,
                channel_count,
            });
        }
    }
    if channels[0] == channels[1] {
        return Err(ConfigError::DuplicateChannel { index: channels[0] });
    }
    Ok(())
}

fn check_band(field: &'static str, low: f64, high: f64, nyquist: f64) -> Result<(), ConfigError> {
    if low > 0.0 && low < high && high < nyquist {
        Ok(())
    } else {
        Err(ConfigError::InvalidBand {
            field,
            low,
            high,
            nyquist,
        })
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    ///
    /// Missing sections fall back to their defaults. The result is not
    /// validated; call [`AppConfig::validate`] before use.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path).map_err(|err| ConfigError::Io {
            reason: format!("{:?}: {}", path.as_ref(), err),
        })?;
        let config: AppConfig =
            serde_json::from_str(&contents).map_err(|err| ConfigError::Parse {
                reason: err.to_string(),
            })?;
        log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent or invalid
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("[Config] {}. Using defaults.", err);
                Self::default()
            }
        }
    }

    /// Session-independent checks
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("acquisition.chunk_seconds", self.acquisition.chunk_seconds)?;
        positive(
            "conditioning.filter_window_seconds",
            self.conditioning.filter_window_seconds,
        )?;
        if self.conditioning.notch_enabled {
            positive("conditioning.notch_hz", self.conditioning.notch_hz)?;
            positive("conditioning.notch_q", self.conditioning.notch_q)?;
        }
        positive("baseline.duration_seconds", self.baseline.duration_seconds)?;
        self.threshold.validate()?;

        let cal = &self.calibration;
        if cal.repetitions == 0 {
            return Err(ConfigError::NonPositiveDuration {
                field: "calibration.repetitions",
                value: 0.0,
            });
        }
        positive("calibration.quiet_seconds", cal.quiet_seconds)?;
        positive("calibration.event_seconds", cal.event_seconds)?;
        positive("calibration.mark_window_seconds", cal.mark_window_seconds)?;
        if !(cal.blend_factor > 0.0 && cal.blend_factor <= 1.0) {
            return Err(ConfigError::InvalidBlendFactor {
                value: cal.blend_factor,
            });
        }
        if !(0.0..=1.0).contains(&cal.band_open_weight) {
            return Err(ConfigError::InvalidBlendFactor {
                value: cal.band_open_weight,
            });
        }

        let band = &self.band_power;
        if band.enabled {
            positive("band_power.window_seconds", band.window_seconds)?;
            if !(band.up_factor > 1.0 && band.down_factor > 0.0 && band.down_factor < 1.0) {
                return Err(ConfigError::InvalidHysteresis {
                    up: band.up_factor,
                    down: band.down_factor,
                });
            }
            if band.baseline_windows == 0 {
                return Err(ConfigError::NonPositiveDuration {
                    field: "band_power.baseline_windows",
                    value: 0.0,
                });
            }
        }

        positive(
            "display.signal_buffer_seconds",
            self.display.signal_buffer_seconds,
        )?;
        if !(1..=4).contains(&self.display.pending_capacity) {
            return Err(ConfigError::InvalidPendingCapacity {
                value: self.display.pending_capacity,
            });
        }
        Ok(())
    }

    /// Checks that need the session's sampling rate and channel count
    pub fn validate_for_session(
        &self,
        sampling_rate: f64,
        channel_count: usize,
    ) -> Result<(), ConfigError> {
        self.validate()?;
        positive("session.sampling_rate", sampling_rate)?;
        let nyquist = sampling_rate / 2.0;

        if self.baseline.capacity(sampling_rate) == 0 {
            return Err(ConfigError::EmptyBaselineWindow {
                duration_seconds: self.baseline.duration_seconds,
                sampling_rate,
            });
        }

        check_channels(self.conditioning.channels, channel_count)?;
        if self.conditioning.notch_enabled && self.conditioning.notch_hz >= nyquist {
            return Err(ConfigError::InvalidBand {
                field: "conditioning.notch",
                low: self.conditioning.notch_hz,
                high: self.conditioning.notch_hz,
                nyquist,
            });
        }
        if self.conditioning.bandpass_enabled {
            check_band(
                "conditioning.bandpass",
                self.conditioning.bandpass_low_hz,
                self.conditioning.bandpass_high_hz,
                nyquist,
            )?;
        }
        if self.band_power.enabled {
            check_channels(self.band_power.channels, channel_count)?;
            check_band(
                "band_power",
                self.band_power.band_low_hz,
                self.band_power.band_high_hz,
                nyquist,
            )?;
        }
        Ok(())
    }
}
