//! EngineHandle: lifecycle and consumer surface of the detection engine.
//!
//! The handle opens the acquisition session, validates the configuration
//! against it, and hands both to a `DetectionWorker` thread. Consumers talk
//! to the worker only through the shared state (settings in, events and
//! status out) and the broadcast channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use tokio::sync::broadcast;

use super::state::{
    lock_for_calibration, lock_shared, CalibrationRequest, EnginePhase, EngineStatus, ParamPatch,
    SharedState,
};
use crate::acquisition::{AcquisitionSession, SessionGuard};
use crate::analysis::{spawn_detection_worker, DetectionPipeline, DetectionWorker, WorkerChannels};
use crate::calibration::{
    BandCalibrationResult, CalibrationProcedure, CalibrationProgress, CalibrationResult,
    CalibrationSample, SampleLabel,
};
use crate::config::{AppConfig, ThresholdConfig};
use crate::error::{
    log_acquisition_error, log_calibration_error, log_config_error, AcquisitionError,
    CalibrationError, ConfigError,
};
use crate::events::IntentEvent;
use crate::telemetry::{self, DiagnosticError, LifecyclePhase, MetricEvent, TelemetrySnapshot};

#[path = "core_subscriptions.rs"]
mod core_subscriptions;

const COMPONENT: &str = "EngineHandle";

/// EngineHandle orchestrates the worker and the shared state.
pub struct EngineHandle {
    config: Arc<RwLock<AppConfig>>,
    shared: Arc<Mutex<SharedState>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<IntentEvent>,
    calibration_tx: broadcast::Sender<CalibrationProgress>,
}

impl EngineHandle {
    pub fn new(config: AppConfig) -> Self {
        let shared = Arc::new(Mutex::new(SharedState::new(&config)));
        let (event_tx, _) = broadcast::channel(100);
        let (calibration_tx, _) = broadcast::channel(32);
        Self {
            config: Arc::new(RwLock::new(config)),
            shared,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            event_tx,
            calibration_tx,
        }
    }

    /// Snapshot the configuration the next session will start with.
    pub fn config_snapshot(&self) -> AppConfig {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .unwrap_or_else(|err| err.into_inner().clone())
    }

    /// Replace the configuration used by the next `start`.
    pub fn set_config(&self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Open `session`, validate the configuration against it and spawn the
    /// worker. Every error here is returned before the loop starts, and the
    /// session is stopped and released on each failure path.
    pub fn start(&self, session: Box<dyn AcquisitionSession>) -> Result<(), AcquisitionError> {
        let mut worker_slot = self
            .worker
            .lock()
            .map_err(|_| AcquisitionError::LockPoisoned {
                component: COMPONENT.to_string(),
            })?;
        if self.running.load(Ordering::SeqCst) {
            return Err(AcquisitionError::AlreadyRunning);
        }
        if let Some(previous) = worker_slot.take() {
            let _ = previous.join();
        }

        let config = self.config_snapshot();
        let result = self.open_worker(session, &config);
        match result {
            Ok(worker) => {
                self.running.store(true, Ordering::SeqCst);
                match spawn_detection_worker(worker) {
                    Ok(handle) => {
                        *worker_slot = Some(handle);
                        Ok(())
                    }
                    Err(err) => {
                        self.running.store(false, Ordering::SeqCst);
                        self.fail(&err);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn open_worker(
        &self,
        session: Box<dyn AcquisitionSession>,
        config: &AppConfig,
    ) -> Result<DetectionWorker, AcquisitionError> {
        config.validate().map_err(|err| {
            log_config_error(&err, "engine start");
            err
        })?;

        let guard = SessionGuard::open(session, config.acquisition.buffer_hint)?;
        telemetry::hub().record_lifecycle(LifecyclePhase::SessionOpened);
        let sampling_rate = guard.sampling_rate();
        let channel_count = guard.channel_count();
        tracing::info!(
            "[EngineHandle] Session started: fs={} Hz, channels={}",
            sampling_rate,
            channel_count
        );

        // On error the guard drops here and releases the session.
        let pipeline = DetectionPipeline::new(config, sampling_rate, channel_count).map_err(|err| {
            log_config_error(&err, "session validation");
            err
        })?;

        lock_shared(&self.shared, COMPONENT)?.begin_session(config, sampling_rate, channel_count);

        Ok(DetectionWorker::new(
            guard,
            pipeline,
            Arc::clone(&self.shared),
            Arc::clone(&self.running),
            WorkerChannels {
                events: self.event_tx.clone(),
                calibration: self.calibration_tx.clone(),
            },
            config.clone(),
            Arc::clone(&self.config),
        ))
    }

    fn fail(&self, err: &AcquisitionError) {
        log_acquisition_error(err, "engine start");
        telemetry::hub().record_error(DiagnosticError::Acquisition, err, "engine start");
        if let Ok(mut state) = self.shared.lock() {
            state.record_error(err);
            state.phase = EnginePhase::Failed;
        }
    }

    /// Clear the run flag and wait for the worker to release the session.
    pub fn stop(&self) -> Result<(), AcquisitionError> {
        let handle = self
            .worker
            .lock()
            .map_err(|_| AcquisitionError::LockPoisoned {
                component: COMPONENT.to_string(),
            })?
            .take();
        let Some(handle) = handle else {
            return Err(AcquisitionError::NotRunning);
        };
        self.running.store(false, Ordering::SeqCst);
        if handle.join().is_err() {
            tracing::warn!("[EngineHandle] Detection worker panicked");
        }
        Ok(())
    }

    /// Block until the worker exits on its own (finite sources, errors).
    pub fn wait(&self) -> Result<(), AcquisitionError> {
        let handle = self
            .worker
            .lock()
            .map_err(|_| AcquisitionError::LockPoisoned {
                component: COMPONENT.to_string(),
            })?
            .take();
        match handle {
            Some(handle) => {
                if handle.join().is_err() {
                    tracing::warn!("[EngineHandle] Detection worker panicked");
                }
                Ok(())
            }
            None => Err(AcquisitionError::NotRunning),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Result<EngineStatus, AcquisitionError> {
        Ok(lock_shared(&self.shared, COMPONENT)?.status(self.is_running()))
    }

    // ========================================================================
    // SETTINGS
    // ========================================================================

    pub fn threshold(&self) -> Result<ThresholdConfig, AcquisitionError> {
        Ok(lock_shared(&self.shared, COMPONENT)?.threshold.clone())
    }

    /// Apply a threshold patch. The worker picks it up before its next chunk.
    pub fn update_threshold(&self, patch: &ParamPatch) -> Result<ThresholdConfig, AcquisitionError> {
        let mut state = lock_shared(&self.shared, COMPONENT)?;
        let next = patch.apply(&state.threshold)?;
        state.threshold = next.clone();
        drop(state);

        if let Ok(mut config) = self.config.write() {
            config.threshold = next.clone();
        }
        tracing::info!(
            "[EngineHandle] Threshold updated: onset={:.1} µV, off_factor={:.2}, cooldown={:.2} s",
            next.onset_uv,
            next.off_factor,
            next.cooldown_seconds
        );
        Ok(next)
    }

    /// Install (or clear) a fixed band-power reference.
    pub fn set_band_reference(&self, reference: Option<f64>) -> Result<(), AcquisitionError> {
        let mut state = lock_shared(&self.shared, COMPONENT)?;
        state.band_reference = reference;
        state.band_reference_dirty = true;
        drop(state);

        if let Ok(mut config) = self.config.write() {
            config.band_power.calibrated_baseline = reference;
        }
        Ok(())
    }

    // ========================================================================
    // EVENTS AND SIGNAL
    // ========================================================================

    /// Drain pending events. With capacity 1 at most the latest is returned.
    pub fn poll_events(&self) -> Result<Vec<IntentEvent>, AcquisitionError> {
        Ok(lock_shared(&self.shared, COMPONENT)?.pending.take())
    }

    /// One-shot flag read: true if an event arrived since the previous poll.
    pub fn poll_flag(&self) -> Result<bool, AcquisitionError> {
        Ok(lock_shared(&self.shared, COMPONENT)?.pending.take_flag())
    }

    /// Downsampled copy of the recent conditioned signal
    pub fn signal_snapshot(&self) -> Result<Vec<f64>, AcquisitionError> {
        Ok(lock_shared(&self.shared, COMPONENT)?.signal_snapshot())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<IntentEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscribe_calibration(&self) -> broadcast::Receiver<CalibrationProgress> {
        self.calibration_tx.subscribe()
    }

    // ========================================================================
    // TELEMETRY
    // ========================================================================

    /// Recent metrics recorded by the engine and its worker
    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        telemetry::hub().snapshot()
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<MetricEvent> {
        telemetry::hub().collector().subscribe()
    }

    // ========================================================================
    // CALIBRATION
    // ========================================================================

    fn ensure_running(&self) -> Result<(), CalibrationError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(CalibrationError::InvalidPhase {
                reason: "engine is not running".to_string(),
            })
        }
    }

    /// Queue a guided quiet/event calibration run.
    pub fn start_calibration(&self) -> Result<(), CalibrationError> {
        self.ensure_running()?;
        let mut state = lock_for_calibration(&self.shared)?;
        if state.calibration_active {
            return Err(CalibrationError::AlreadyInProgress);
        }
        state.calibration_active = true;
        state.calibration_outcome = None;
        state.requests.push_back(CalibrationRequest::Guided);
        tracing::info!("[EngineHandle] Guided calibration requested");
        Ok(())
    }

    /// Queue an eyes-open / eyes-closed band-reference capture.
    pub fn start_band_calibration(&self) -> Result<(), CalibrationError> {
        self.ensure_running()?;
        if !self.config_snapshot().band_power.enabled {
            return Err(CalibrationError::InvalidPhase {
                reason: "band-power detection is disabled".to_string(),
            });
        }
        let mut state = lock_for_calibration(&self.shared)?;
        if state.band_calibration_active {
            return Err(CalibrationError::AlreadyInProgress);
        }
        state.band_calibration_active = true;
        state.band_calibration_outcome = None;
        state.requests.push_back(CalibrationRequest::Band);
        tracing::info!("[EngineHandle] Band calibration requested");
        Ok(())
    }

    /// Abandon running calibrations and manual marks. Thresholds are kept.
    pub fn cancel_calibration(&self) -> Result<(), CalibrationError> {
        let mut state = lock_for_calibration(&self.shared)?;
        state.manual = None;
        state.requests.push_back(CalibrationRequest::Cancel);
        Ok(())
    }

    /// Latest guided calibration outcome, if one has finished
    pub fn calibration_outcome(
        &self,
    ) -> Result<Option<Result<CalibrationResult, CalibrationError>>, CalibrationError> {
        Ok(lock_for_calibration(&self.shared)?.calibration_outcome.clone())
    }

    pub fn band_calibration_outcome(
        &self,
    ) -> Result<Option<Result<BandCalibrationResult, CalibrationError>>, CalibrationError> {
        Ok(lock_for_calibration(&self.shared)?
            .band_calibration_outcome
            .clone())
    }

    /// Label the peak |signal| of the last `mark_window_seconds` as a
    /// calibration sample. Returns the recorded peak.
    pub fn mark_calibration(&self, label: SampleLabel) -> Result<f64, CalibrationError> {
        let calibration = self.config_snapshot().calibration;
        let mut state = lock_for_calibration(&self.shared)?;
        let sampling_rate = state
            .sampling_rate
            .ok_or_else(|| CalibrationError::InvalidPhase {
                reason: "no session has started".to_string(),
            })?;
        let window = ((calibration.mark_window_seconds * sampling_rate) as usize).max(1);
        let peak = state
            .recent_peak(window)
            .ok_or_else(|| CalibrationError::InvalidPhase {
                reason: "no conditioned signal buffered yet".to_string(),
            })?;

        state
            .manual
            .get_or_insert_with(|| CalibrationProcedure::manual(&calibration))
            .add_sample(CalibrationSample {
                label,
                peak_magnitude: peak,
            });
        tracing::info!("[EngineHandle] Marked {:?} peak {:.1} µV", label, peak);
        Ok(peak)
    }

    /// Finish manual marking and apply the suggested onset.
    ///
    /// On failure the threshold is left unchanged and the marks are discarded.
    pub fn finish_calibration(&self) -> Result<CalibrationResult, CalibrationError> {
        let mut state = lock_for_calibration(&self.shared)?;
        let procedure = state.manual.take().ok_or(CalibrationError::NotInProgress)?;
        let result = procedure.finalize();
        match &result {
            Ok(ok) => {
                state.threshold.onset_uv = ok.suggested_onset_uv;
                state.calibration_outcome = Some(Ok(ok.clone()));
                drop(state);
                if let Ok(mut config) = self.config.write() {
                    config.threshold.onset_uv = ok.suggested_onset_uv;
                }
                tracing::info!(
                    "[EngineHandle] Manual calibration applied: onset={:.1} µV",
                    ok.suggested_onset_uv
                );
                telemetry::hub().record_calibration(Some(ok.suggested_onset_uv), None);
            }
            Err(err) => {
                state.record_error(err);
                state.calibration_outcome = Some(Err(err.clone()));
                drop(state);
                log_calibration_error(err, "finish manual calibration");
                telemetry::hub().record_error(DiagnosticError::Calibration, err, "finish");
            }
        }
        result
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
#[path = "core/tests.rs"]
mod tests;
