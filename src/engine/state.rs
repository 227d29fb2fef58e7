//! State shared between the detection worker and its consumers.
//!
//! One `std::sync::Mutex` guards all of it. The worker copies settings in at
//! the start of a chunk and flushes results at the end; nothing is filtered
//! or evaluated while the lock is held.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::calibration::{
    BandCalibrationResult, BandCapture, CalibrationProcedure, CalibrationProgress,
    CalibrationResult,
};
use crate::config::{AppConfig, ThresholdConfig, ThresholdMode};
use crate::error::{AcquisitionError, CalibrationError, ConfigError, ErrorCode};
use crate::events::{IntentEvent, PendingEvents};

/// Engine lifecycle as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Idle,
    WarmingUp,
    Detecting,
    Calibrating,
    Stopped,
    Failed,
}

/// Calibration commands picked up by the worker between chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationRequest {
    Guided,
    Band,
    Cancel,
}

/// Patch describing threshold updates to apply to the running engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamPatch {
    #[serde(default)]
    pub onset_uv: Option<f64>,
    #[serde(default)]
    pub off_factor: Option<f64>,
    #[serde(default)]
    pub cooldown_seconds: Option<f64>,
    #[serde(default)]
    pub mode: Option<ThresholdMode>,
}

impl ParamPatch {
    /// Merge into `current`; the merged config is validated as a whole.
    pub fn apply(&self, current: &ThresholdConfig) -> Result<ThresholdConfig, ConfigError> {
        let mut next = current.clone();
        if let Some(onset) = self.onset_uv {
            next.onset_uv = onset;
        }
        if let Some(off) = self.off_factor {
            next.off_factor = off;
        }
        if let Some(cooldown) = self.cooldown_seconds {
            next.cooldown_seconds = cooldown;
        }
        if let Some(mode) = self.mode {
            next.mode = mode;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Read-only status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub phase: EnginePhase,
    pub sampling_rate: Option<f64>,
    pub channel_count: Option<usize>,
    pub threshold: ThresholdConfig,
    pub band_reference: Option<f64>,
    pub last_event: Option<String>,
    pub last_error: Option<String>,
    pub last_error_code: Option<i32>,
    pub events_emitted: u64,
    pub pending_events: usize,
    pub dropped_events: u64,
    pub calibration: Option<CalibrationProgress>,
    pub band_capture: Option<BandCapture>,
}

#[derive(Debug)]
pub struct SharedState {
    pub threshold: ThresholdConfig,
    pub band_reference: Option<f64>,
    /// Set when a consumer changed `band_reference`; cleared by the worker
    pub band_reference_dirty: bool,
    pub signal: VecDeque<f64>,
    pub signal_capacity: usize,
    pub max_signal_points: usize,
    pub pending: PendingEvents,
    pub last_event_text: Option<String>,
    pub events_emitted: u64,
    pub phase: EnginePhase,
    pub last_error: Option<String>,
    pub last_error_code: Option<i32>,
    pub sampling_rate: Option<f64>,
    pub channel_count: Option<usize>,
    pub requests: VecDeque<CalibrationRequest>,
    pub calibration_active: bool,
    pub band_calibration_active: bool,
    pub calibration_progress: Option<CalibrationProgress>,
    pub band_capture: Option<BandCapture>,
    pub calibration_outcome: Option<Result<CalibrationResult, CalibrationError>>,
    pub band_calibration_outcome: Option<Result<BandCalibrationResult, CalibrationError>>,
    pub manual: Option<CalibrationProcedure>,
}

impl SharedState {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            threshold: config.threshold.clone(),
            band_reference: config.band_power.calibrated_baseline,
            band_reference_dirty: false,
            signal: VecDeque::new(),
            signal_capacity: 0,
            max_signal_points: config.display.max_signal_points,
            pending: PendingEvents::new(config.display.pending_capacity),
            last_event_text: None,
            events_emitted: 0,
            phase: EnginePhase::Idle,
            last_error: None,
            last_error_code: None,
            sampling_rate: None,
            channel_count: None,
            requests: VecDeque::new(),
            calibration_active: false,
            band_calibration_active: false,
            calibration_progress: None,
            band_capture: None,
            calibration_outcome: None,
            band_calibration_outcome: None,
            manual: None,
        }
    }

    /// Reset per-session buffers once the session's rate is known.
    /// Threshold and band reference carry over between sessions; a held
    /// band reference is re-sent to the new pipeline on its first chunk.
    pub fn begin_session(&mut self, config: &AppConfig, sampling_rate: f64, channel_count: usize) {
        self.signal_capacity =
            ((config.display.signal_buffer_seconds * sampling_rate) as usize).max(1);
        self.signal = VecDeque::with_capacity(self.signal_capacity);
        self.max_signal_points = config.display.max_signal_points;
        self.pending = PendingEvents::new(config.display.pending_capacity);
        self.last_event_text = None;
        self.phase = EnginePhase::WarmingUp;
        self.last_error = None;
        self.last_error_code = None;
        self.sampling_rate = Some(sampling_rate);
        self.channel_count = Some(channel_count);
        self.band_reference_dirty = self.band_reference.is_some();
        self.requests.clear();
        self.calibration_active = false;
        self.band_calibration_active = false;
        self.calibration_progress = None;
        self.band_capture = None;
        self.manual = None;
    }

    pub fn push_signal(&mut self, samples: &[f64]) {
        for &v in samples {
            if self.signal.len() == self.signal_capacity {
                self.signal.pop_front();
            }
            self.signal.push_back(v);
        }
    }

    /// Stride-decimated copy holding at most `max_signal_points` values
    pub fn signal_snapshot(&self) -> Vec<f64> {
        let len = self.signal.len();
        let max_points = self.max_signal_points.max(1);
        let stride = len.div_ceil(max_points).max(1);
        self.signal.iter().step_by(stride).copied().collect()
    }

    /// Peak |signal| over the newest `samples` values
    pub fn recent_peak(&self, samples: usize) -> Option<f64> {
        let skip = self.signal.len().saturating_sub(samples);
        self.signal
            .iter()
            .skip(skip)
            .map(|v| v.abs())
            .reduce(f64::max)
    }

    pub fn record_event(&mut self, event: &IntentEvent) {
        self.pending.push(event.clone());
        self.last_event_text = Some(event.describe());
        self.events_emitted += 1;
    }

    pub fn record_error<E: ErrorCode>(&mut self, err: &E) {
        self.last_error = Some(err.message());
        self.last_error_code = Some(err.code());
    }

    pub fn status(&self, running: bool) -> EngineStatus {
        EngineStatus {
            running,
            phase: self.phase,
            sampling_rate: self.sampling_rate,
            channel_count: self.channel_count,
            threshold: self.threshold.clone(),
            band_reference: self.band_reference,
            last_event: self.last_event_text.clone(),
            last_error: self.last_error.clone(),
            last_error_code: self.last_error_code,
            events_emitted: self.events_emitted,
            pending_events: self.pending.len(),
            dropped_events: self.pending.dropped(),
            calibration: self.calibration_progress.clone(),
            band_capture: self.band_capture,
        }
    }
}

/// Lock for the worker and engine paths that report acquisition errors
pub fn lock_shared<'a>(
    shared: &'a Mutex<SharedState>,
    component: &str,
) -> Result<MutexGuard<'a, SharedState>, AcquisitionError> {
    shared.lock().map_err(|_| AcquisitionError::LockPoisoned {
        component: component.to_string(),
    })
}

/// Lock for calibration commands
pub fn lock_for_calibration(
    shared: &Mutex<SharedState>,
) -> Result<MutexGuard<'_, SharedState>, CalibrationError> {
    shared.lock().map_err(|_| CalibrationError::StatePoisoned)
}
