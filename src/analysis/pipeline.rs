// DetectionPipeline - synchronous per-chunk processing
//
// conditioner -> baseline -> threshold state machine, plus the optional
// band-power detector and whichever calibration run is active. The pipeline
// owns no locks and no threads: the polling worker feeds it chunks in arrival
// order and publishes what it returns.
//
// Per sample the magnitude is appended to the baseline window first and the
// baseline is read afterwards, so the window always includes the current
// sample once ready.

use serde::{Deserialize, Serialize};

use super::band_power::BandPowerDetector;
use super::baseline::BaselineWindow;
use super::conditioner::SignalConditioner;
use super::threshold::{DetectionState, ThresholdStateMachine};
use crate::acquisition::SampleChunk;
use crate::calibration::{
    BandCalibration, BandCalibrationResult, BandCapture, CalibrationController, CalibrationProgress,
    CalibrationResult,
};
use crate::config::{AppConfig, BandPowerConfig, CalibrationConfig, ThresholdConfig};
use crate::error::{AcquisitionError, CalibrationError, ConfigError};
use crate::events::{EventSink, IntentEvent};

/// What the worker should publish after a chunk
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    /// Conditioned signal, sample-aligned with the chunk
    pub filtered: Vec<f64>,
    pub degraded: bool,
    pub events_emitted: usize,
    /// The baseline became ready during this chunk
    pub warmup_completed: bool,
    pub calibration_progress: Option<CalibrationProgress>,
    pub calibration_result: Option<Result<CalibrationResult, CalibrationError>>,
    /// `Some(next)` when the band capture changed; `Some(None)` when it ended
    pub band_capture: Option<Option<BandCapture>>,
    pub band_calibration_result: Option<Result<BandCalibrationResult, CalibrationError>>,
}

/// Coarse activity of the pipeline, used for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineActivity {
    WarmingUp,
    Detecting,
    Calibrating,
}

pub struct DetectionPipeline {
    sampling_rate: f64,
    conditioner: SignalConditioner,
    baseline: BaselineWindow,
    threshold: ThresholdStateMachine,
    band: Option<BandPowerDetector>,
    band_config: BandPowerConfig,
    calibration: Option<CalibrationController>,
    band_calibration: Option<BandCalibration>,
    processed_samples: u64,
}

impl DetectionPipeline {
    /// Build every stage for a session. All configuration errors surface here.
    pub fn new(
        config: &AppConfig,
        sampling_rate: f64,
        channel_count: usize,
    ) -> Result<Self, ConfigError> {
        config.validate_for_session(sampling_rate, channel_count)?;

        let conditioner = SignalConditioner::new(&config.conditioning, sampling_rate, channel_count)?;
        let band = if config.band_power.enabled {
            Some(BandPowerDetector::new(
                config.band_power.clone(),
                sampling_rate,
                channel_count,
            )?)
        } else {
            None
        };

        Ok(Self {
            sampling_rate,
            conditioner,
            baseline: BaselineWindow::new(config.baseline.capacity(sampling_rate)),
            threshold: ThresholdStateMachine::new(config.threshold.clone()),
            band,
            band_config: config.band_power.clone(),
            calibration: None,
            band_calibration: None,
            processed_samples: 0,
        })
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn processed_samples(&self) -> u64 {
        self.processed_samples
    }

    pub fn threshold_config(&self) -> &ThresholdConfig {
        self.threshold.config()
    }

    /// Apply a new threshold config if it differs from the active one
    pub fn apply_threshold(&mut self, config: &ThresholdConfig) {
        if self.threshold.config() != config {
            self.threshold.set_config(config.clone());
        }
    }

    pub fn detection_state(&self) -> DetectionState {
        self.threshold.state()
    }

    pub fn band_state(&self) -> Option<DetectionState> {
        self.band.as_ref().map(BandPowerDetector::state)
    }

    pub fn band_reference(&self) -> Option<f64> {
        self.band.as_ref().and_then(BandPowerDetector::reference)
    }

    /// Install or clear a calibrated band reference
    pub fn apply_band_reference(&mut self, reference: Option<f64>) {
        if let Some(band) = self.band.as_mut() {
            band.set_calibrated_baseline(reference);
        }
    }

    pub fn is_warming_up(&self) -> bool {
        !self.baseline.is_ready()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some() || self.band_calibration.is_some()
    }

    pub fn activity(&self) -> PipelineActivity {
        if self.is_calibrating() {
            PipelineActivity::Calibrating
        } else if self.is_warming_up() {
            PipelineActivity::WarmingUp
        } else {
            PipelineActivity::Detecting
        }
    }

    /// Start a guided calibration run. Blink events are withheld until it ends.
    pub fn begin_calibration(
        &mut self,
        config: &CalibrationConfig,
    ) -> Result<CalibrationProgress, CalibrationError> {
        if self.calibration.is_some() {
            return Err(CalibrationError::AlreadyInProgress);
        }
        let controller = CalibrationController::new(config)?;
        let progress = controller.progress();
        self.calibration = Some(controller);
        Ok(progress)
    }

    /// Start an eyes-open / eyes-closed capture for the band reference
    pub fn begin_band_calibration(
        &mut self,
        config: &CalibrationConfig,
    ) -> Result<BandCapture, CalibrationError> {
        if self.band.is_none() {
            return Err(CalibrationError::InvalidPhase {
                reason: "band-power detection is disabled".to_string(),
            });
        }
        if self.band_calibration.is_some() {
            return Err(CalibrationError::AlreadyInProgress);
        }
        self.band_calibration = Some(BandCalibration::new(config)?);
        Ok(BandCapture::EyesOpen)
    }

    /// Abandon any running calibration; the thresholds are untouched
    pub fn cancel_calibration(&mut self) -> bool {
        let was_running = self.is_calibrating();
        self.calibration = None;
        self.band_calibration = None;
        was_running
    }

    pub fn calibration_progress(&self) -> Option<CalibrationProgress> {
        self.calibration.as_ref().map(CalibrationController::progress)
    }

    pub fn process_chunk(
        &mut self,
        chunk: &SampleChunk,
        sink: &mut dyn EventSink,
    ) -> Result<ChunkOutcome, AcquisitionError> {
        let mut outcome = ChunkOutcome::default();
        if chunk.is_empty() {
            return Ok(outcome);
        }

        let conditioned = self.conditioner.process(chunk)?;
        let was_ready = self.baseline.is_ready();
        let calibrating = self.calibration.is_some();

        for (i, &m) in conditioned.magnitude.iter().enumerate() {
            let t = chunk.sample_time(i);
            self.baseline.push(m);
            let baseline = self.baseline.current_baseline();

            if let Some(crossing) = self.threshold.evaluate(m, baseline, t) {
                if !calibrating {
                    let event = IntentEvent::from_crossing(&crossing);
                    tracing::debug!("[DetectionPipeline] {}", event.describe());
                    sink.emit(&event);
                    outcome.events_emitted += 1;
                }
            }

            if let Some(controller) = self.calibration.as_mut() {
                if let Some(progress) = controller.observe(m, t) {
                    outcome.calibration_progress = Some(progress);
                }
            }
        }
        self.processed_samples += chunk.len() as u64;
        outcome.warmup_completed = !was_ready && self.baseline.is_ready();

        if self
            .calibration
            .as_ref()
            .is_some_and(CalibrationController::is_finished)
        {
            if let Some(controller) = self.calibration.take() {
                outcome.calibration_result = Some(controller.finish());
            }
        }

        self.process_band(chunk, sink, &mut outcome)?;

        outcome.degraded = conditioned.degraded;
        outcome.filtered = conditioned.filtered;
        Ok(outcome)
    }

    fn process_band(
        &mut self,
        chunk: &SampleChunk,
        sink: &mut dyn EventSink,
        outcome: &mut ChunkOutcome,
    ) -> Result<(), AcquisitionError> {
        let Some(band) = self.band.as_mut() else {
            return Ok(());
        };
        let transition = band.process(chunk)?;

        if let Some(capture) = self.band_calibration.as_mut() {
            outcome.band_capture = capture.observe(band.last_power(), chunk.arrival_s());
            if capture.is_finished() {
                if let Some(finished) = self.band_calibration.take() {
                    let result = finished.finish();
                    if let Ok(ok) = &result {
                        band.set_calibrated_baseline(Some(ok.reference_power));
                    }
                    outcome.band_calibration_result = Some(result);
                }
            }
            return Ok(());
        }

        if let Some(transition) = transition {
            let event = IntentEvent::from_band(
                &transition,
                self.band_config.up_factor,
                self.band_config.down_factor,
                self.band_config.cooldown_seconds,
            );
            tracing::debug!("[DetectionPipeline] {}", event.describe());
            sink.emit(&event);
            outcome.events_emitted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdMode;
    use crate::events::EventKind;

    const FS: f64 = 100.0;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.conditioning.notch_enabled = false;
        config.conditioning.bandpass_enabled = false;
        config.baseline.duration_seconds = 0.4;
        config.threshold.cooldown_seconds = 0.35;
        config
    }

    fn chunk(values: &[f64], first_index: usize) -> SampleChunk {
        let last = (first_index + values.len() - 1) as f64 / FS;
        SampleChunk::new(vec![values.to_vec(), values.to_vec()], FS, last)
    }

    fn run(pipeline: &mut DetectionPipeline, signal: &[f64]) -> Vec<IntentEvent> {
        let mut events = Vec::new();
        for (n, piece) in signal.chunks(10).enumerate() {
            pipeline
                .process_chunk(&chunk(piece, n * 10), &mut events)
                .unwrap();
        }
        events
    }

    #[test]
    fn test_single_spike_single_event() {
        let mut pipeline = DetectionPipeline::new(&config(), FS, 2).unwrap();
        let mut signal = vec![10.0; 60];
        signal.extend([300.0; 5]);
        signal.extend([10.0; 35]);
        let events = run(&mut pipeline, &signal);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Blink);
        assert!((events[0].timestamp_s - 0.60).abs() < 1e-9);
        assert_eq!(pipeline.detection_state(), DetectionState::Quiescent);
    }

    #[test]
    fn test_warmup_suppresses_events() {
        let mut pipeline = DetectionPipeline::new(&config(), FS, 2).unwrap();
        // Spike inside the first 40 samples, before the baseline is ready
        let mut signal = vec![10.0; 20];
        signal.extend([300.0; 5]);
        signal.extend([10.0; 5]);
        let events = run(&mut pipeline, &signal);
        assert!(events.is_empty());
        assert!(pipeline.is_warming_up());
        assert_eq!(pipeline.activity(), PipelineActivity::WarmingUp);
    }

    #[test]
    fn test_warmup_completion_reported_once() {
        let mut pipeline = DetectionPipeline::new(&config(), FS, 2).unwrap();
        let mut sink = Vec::new();
        let mut completed = 0;
        for n in 0..8 {
            let outcome = pipeline
                .process_chunk(&chunk(&[10.0; 10], n * 10), &mut sink)
                .unwrap();
            if outcome.warmup_completed {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(pipeline.activity(), PipelineActivity::Detecting);
    }

    #[test]
    fn test_threshold_update_applies_between_chunks() {
        let mut pipeline = DetectionPipeline::new(&config(), FS, 2).unwrap();
        let mut updated = config().threshold;
        updated.onset_uv = 400.0;
        pipeline.apply_threshold(&updated);
        let mut signal = vec![10.0; 60];
        signal.extend([300.0; 5]);
        signal.extend([10.0; 35]);
        assert!(run(&mut pipeline, &signal).is_empty());
    }

    #[test]
    fn test_debounce_mode_refires_on_sustained_signal() {
        let mut cfg = config();
        cfg.threshold.mode = ThresholdMode::Debounce;
        cfg.threshold.cooldown_seconds = 0.095;
        let mut pipeline = DetectionPipeline::new(&cfg, FS, 2).unwrap();
        let mut signal = vec![10.0; 40];
        signal.extend([300.0; 30]);
        let events = run(&mut pipeline, &signal);
        // Baseline median stays at 10 until most of the window is elevated.
        assert!(events.len() >= 2, "events {}", events.len());
    }

    #[test]
    fn test_guided_calibration_withholds_events_and_finishes() {
        let mut cfg = config();
        cfg.calibration.repetitions = 1;
        cfg.calibration.quiet_seconds = 0.5;
        cfg.calibration.event_seconds = 0.5;
        let mut pipeline = DetectionPipeline::new(&cfg, FS, 2).unwrap();
        pipeline.begin_calibration(&cfg.calibration).unwrap();
        assert!(matches!(
            pipeline.begin_calibration(&cfg.calibration),
            Err(CalibrationError::AlreadyInProgress)
        ));

        let mut signal = vec![20.0; 70];
        signal.extend([260.0; 3]);
        signal.extend([20.0; 37]);
        let mut sink = Vec::new();
        let mut result = None;
        for (n, piece) in signal.chunks(10).enumerate() {
            let outcome = pipeline
                .process_chunk(&chunk(piece, n * 10), &mut sink)
                .unwrap();
            if outcome.calibration_result.is_some() {
                result = outcome.calibration_result;
            }
        }
        assert!(sink.is_empty());
        let result = result.unwrap().unwrap();
        // 20 + 0.6 * 240
        assert!((result.suggested_onset_uv - 164.0).abs() < 1e-9);
        assert!(!pipeline.is_calibrating());
    }

    #[test]
    fn test_band_calibration_requires_band_detector() {
        let cfg = config();
        let mut pipeline = DetectionPipeline::new(&cfg, FS, 2).unwrap();
        assert!(matches!(
            pipeline.begin_band_calibration(&cfg.calibration),
            Err(CalibrationError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn test_invalid_channel_rejected_before_processing() {
        let mut cfg = config();
        cfg.conditioning.channels = [0, 3];
        assert!(matches!(
            DetectionPipeline::new(&cfg, FS, 2),
            Err(ConfigError::InvalidChannel { index: 3, .. })
        ));
    }

    #[test]
    fn test_empty_baseline_window_rejected() {
        let mut cfg = config();
        cfg.baseline.duration_seconds = 0.005;
        assert!(matches!(
            DetectionPipeline::new(&cfg, FS, 2),
            Err(ConfigError::EmptyBaselineWindow { .. })
        ));
    }
}
