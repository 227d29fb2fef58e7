// BandCalibration - eyes-open / eyes-closed reference capture
//
// Two consecutive timed captures collect band-power estimates. The reference
// installed on the band-power detector blends their means:
//
//   reference = w * mean(open) + (1 - w) * mean(closed)
//
// so it sits between the two states and nearer the resting one.

use serde::{Deserialize, Serialize};

use super::progress::BandCapture;
use crate::analysis::stats::mean;
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandCalibrationResult {
    pub reference_power: f64,
    pub open_mean: f64,
    pub closed_mean: f64,
    pub open_count: usize,
    pub closed_count: usize,
}

#[derive(Debug)]
pub struct BandCalibration {
    open_seconds: f64,
    closed_seconds: f64,
    open_weight: f64,
    capture: Option<BandCapture>,
    capture_end: Option<f64>,
    open: Vec<f64>,
    closed: Vec<f64>,
}

impl BandCalibration {
    pub fn new(config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        if !(config.band_open_seconds > 0.0 && config.band_closed_seconds > 0.0) {
            return Err(CalibrationError::InvalidPhase {
                reason: format!(
                    "band capture durations must be positive (open={}, closed={})",
                    config.band_open_seconds, config.band_closed_seconds
                ),
            });
        }
        Ok(Self {
            open_seconds: config.band_open_seconds,
            closed_seconds: config.band_closed_seconds,
            open_weight: config.band_open_weight,
            capture: Some(BandCapture::EyesOpen),
            capture_end: None,
            open: Vec::new(),
            closed: Vec::new(),
        })
    }

    pub fn capture(&self) -> Option<BandCapture> {
        self.capture
    }

    pub fn is_finished(&self) -> bool {
        self.capture.is_none()
    }

    /// Feed one power estimate (or `None` while the window fills).
    /// Returns the new capture when it changed.
    pub fn observe(&mut self, power: Option<f64>, t: f64) -> Option<Option<BandCapture>> {
        let current = self.capture?;
        let end = *self.capture_end.get_or_insert_with(|| {
            t + match current {
                BandCapture::EyesOpen => self.open_seconds,
                BandCapture::EyesClosed => self.closed_seconds,
            }
        });

        let mut changed = None;
        if t >= end {
            match current {
                BandCapture::EyesOpen => {
                    self.capture = Some(BandCapture::EyesClosed);
                    self.capture_end = Some(end + self.closed_seconds);
                    if t >= end + self.closed_seconds {
                        self.capture = None;
                        self.capture_end = None;
                    }
                }
                BandCapture::EyesClosed => {
                    self.capture = None;
                    self.capture_end = None;
                }
            }
            changed = Some(self.capture);
        }

        if let (Some(capture), Some(p)) = (self.capture, power) {
            if p.is_finite() {
                match capture {
                    BandCapture::EyesOpen => self.open.push(p),
                    BandCapture::EyesClosed => self.closed.push(p),
                }
            }
        }
        changed
    }

    pub fn finish(self) -> Result<BandCalibrationResult, CalibrationError> {
        let open_mean = mean(&self.open).ok_or(CalibrationError::MissingCapture {
            label: BandCapture::EyesOpen.label(),
        })?;
        let closed_mean = mean(&self.closed).ok_or(CalibrationError::MissingCapture {
            label: BandCapture::EyesClosed.label(),
        })?;
        Ok(BandCalibrationResult {
            reference_power: self.open_weight * open_mean + (1.0 - self.open_weight) * closed_mean,
            open_mean,
            closed_mean,
            open_count: self.open.len(),
            closed_count: self.closed.len(),
        })
    }
}
