// CalibrationProcedure - labeled peak samples and threshold arithmetic
//
// Holds the noise and event peak magnitudes collected by a calibration run
// and turns them into a suggested onset threshold:
//
//   suggested = noise_mean + k * (event_mean - noise_mean)
//
// rounded to 0.1 µV and clamped to a floor. `finalize` consumes the
// procedure, so the sample sets are discarded whether it succeeds or fails.

use serde::{Deserialize, Serialize};

use crate::analysis::stats::{mean, median, round_tenth, std_dev};
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleLabel {
    Noise,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub label: SampleLabel,
    pub peak_magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub suggested_onset_uv: f64,
    pub noise_mean: f64,
    pub event_mean: f64,
    pub noise_count: usize,
    pub event_count: usize,
    /// median + k * std of the quiet-phase magnitudes, when any were kept
    pub statistical_onset_uv: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CalibrationProcedure {
    noise: Vec<f64>,
    events: Vec<f64>,
    blend_factor: f64,
    min_onset_uv: f64,
    fallback_noise_uv: Option<f64>,
    std_factor: f64,
    quiet_magnitudes: Vec<f64>,
}

impl CalibrationProcedure {
    /// Procedure for a guided run: both sample sets come from timed phases.
    pub fn new(blend_factor: f64, min_onset_uv: f64) -> Self {
        Self {
            noise: Vec::new(),
            events: Vec::new(),
            blend_factor,
            min_onset_uv,
            fallback_noise_uv: None,
            std_factor: 5.0,
            quiet_magnitudes: Vec::new(),
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        let mut procedure = Self::new(config.blend_factor, config.min_onset_uv);
        procedure.std_factor = config.std_factor;
        procedure
    }

    /// Procedure for manual marks, where a missing noise set falls back to a
    /// fixed level instead of failing.
    pub fn manual(config: &CalibrationConfig) -> Self {
        let mut procedure = Self::from_config(config);
        procedure.fallback_noise_uv = Some(config.fallback_noise_uv);
        procedure
    }

    /// Non-finite peaks are ignored.
    pub fn add_sample(&mut self, sample: CalibrationSample) {
        if !sample.peak_magnitude.is_finite() {
            return;
        }
        match sample.label {
            SampleLabel::Noise => self.noise.push(sample.peak_magnitude),
            SampleLabel::Event => self.events.push(sample.peak_magnitude),
        }
    }

    /// Keep raw quiet-phase magnitudes for the statistical threshold
    pub fn add_quiet_magnitudes(&mut self, magnitudes: &[f64]) {
        self.quiet_magnitudes
            .extend(magnitudes.iter().copied().filter(|m| m.is_finite()));
    }

    pub fn noise_count(&self) -> usize {
        self.noise.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn finalize(self) -> Result<CalibrationResult, CalibrationError> {
        let event_mean = mean(&self.events).ok_or(CalibrationError::NoEventSamples {
            noise_samples: self.noise.len(),
        })?;
        let noise_mean = match (mean(&self.noise), self.fallback_noise_uv) {
            (Some(m), _) => m,
            (None, Some(fallback)) => fallback,
            (None, None) => 0.0,
        };

        let raw = noise_mean + self.blend_factor * (event_mean - noise_mean);
        let suggested_onset_uv = round_tenth(raw).max(self.min_onset_uv);

        Ok(CalibrationResult {
            suggested_onset_uv,
            noise_mean,
            event_mean,
            noise_count: self.noise.len(),
            event_count: self.events.len(),
            statistical_onset_uv: statistical_onset(&self.quiet_magnitudes, self.std_factor),
        })
    }
}

/// `median + std_factor * std` of absolute magnitudes
pub fn statistical_onset(magnitudes: &[f64], std_factor: f64) -> Option<f64> {
    let sd = std_dev(magnitudes)?;
    Some(round_tenth(median(magnitudes) + std_factor * sd))
}
