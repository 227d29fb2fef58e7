// DetectionWorker - the polling loop
//
// One dedicated thread per session:
//   poll chunk -> copy settings in (lock) -> process (no lock) -> flush (lock)
//   -> broadcast
// An empty chunk means "nothing yet": sleep briefly and poll again. The
// running flag is checked once per iteration. The session guard is owned by
// the worker, so stop/release run however the loop ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use super::pipeline::{ChunkOutcome, DetectionPipeline, PipelineActivity};
use crate::acquisition::SessionGuard;
use crate::calibration::CalibrationProgress;
use crate::config::AppConfig;
use crate::engine::state::{lock_shared, CalibrationRequest, EnginePhase, SharedState};
use crate::error::{log_acquisition_error, log_calibration_error, AcquisitionError};
use crate::events::{BroadcastSink, EventSink, IntentEvent};
use crate::telemetry::{self, DiagnosticError, LifecyclePhase};

const COMPONENT: &str = "DetectionWorker";

/// Broadcast senders the worker publishes to
#[derive(Clone)]
pub struct WorkerChannels {
    pub events: broadcast::Sender<IntentEvent>,
    pub calibration: broadcast::Sender<CalibrationProgress>,
}

pub struct DetectionWorker {
    guard: SessionGuard,
    pipeline: DetectionPipeline,
    shared: Arc<Mutex<SharedState>>,
    running: Arc<AtomicBool>,
    channels: WorkerChannels,
    /// Session snapshot of the configuration
    config: AppConfig,
    /// Engine-wide configuration; calibration results are written back here
    settings: Arc<RwLock<AppConfig>>,
    poll_size: usize,
    idle_sleep: Duration,
}

impl DetectionWorker {
    pub fn new(
        guard: SessionGuard,
        pipeline: DetectionPipeline,
        shared: Arc<Mutex<SharedState>>,
        running: Arc<AtomicBool>,
        channels: WorkerChannels,
        config: AppConfig,
        settings: Arc<RwLock<AppConfig>>,
    ) -> Self {
        let poll_size = config.acquisition.poll_size(guard.sampling_rate());
        let idle_sleep = Duration::from_millis(config.acquisition.idle_sleep_ms);
        Self {
            guard,
            pipeline,
            shared,
            running,
            channels,
            config,
            settings,
            poll_size,
            idle_sleep,
        }
    }

    /// Run until the flag clears, the source is exhausted, or an error occurs.
    pub fn run(mut self) {
        tracing::info!(
            "[DetectionWorker] Starting loop (fs={} Hz, poll={} samples)",
            self.guard.sampling_rate(),
            self.poll_size
        );

        let result = self.run_loop();
        let processed = self.pipeline.processed_samples();
        let DetectionWorker {
            guard,
            shared,
            running,
            ..
        } = self;

        match &result {
            Ok(()) => {
                tracing::info!(
                    "[DetectionWorker] Loop finished after {} samples",
                    processed
                );
            }
            Err(err) => {
                log_acquisition_error(err, "detection loop");
                telemetry::hub().record_error(DiagnosticError::Acquisition, err, "detection loop");
            }
        }

        if let Ok(mut state) = shared.lock() {
            match &result {
                Ok(()) => state.phase = EnginePhase::Stopped,
                Err(err) => {
                    state.record_error(err);
                    state.phase = EnginePhase::Failed;
                }
            }
            state.calibration_active = false;
            state.band_calibration_active = false;
        }
        telemetry::hub().record_lifecycle(LifecyclePhase::WorkerStopped);

        // stop + release
        drop(guard);
        telemetry::hub().record_lifecycle(LifecyclePhase::SessionReleased);
        running.store(false, Ordering::SeqCst);
    }

    fn run_loop(&mut self) -> Result<(), AcquisitionError> {
        while self.running.load(Ordering::SeqCst) {
            let chunk = self.guard.session().poll_chunk(self.poll_size)?;
            if chunk.is_empty() {
                if self.guard.session().is_exhausted() {
                    tracing::info!("[DetectionWorker] Source exhausted, exiting");
                    return Ok(());
                }
                thread::sleep(self.idle_sleep);
                continue;
            }

            self.sync_in()?;

            let started = Instant::now();
            let mut events: Vec<IntentEvent> = Vec::new();
            let outcome = self.pipeline.process_chunk(&chunk, &mut events)?;
            telemetry::hub().record_chunk_latency(started.elapsed().as_secs_f32() * 1000.0);

            self.flush(&outcome, &events)?;
            self.broadcast(&outcome, &events);
        }
        tracing::info!("[DetectionWorker] Run flag cleared, exiting");
        Ok(())
    }

    /// Copy consumer-side settings and requests into the pipeline
    fn sync_in(&mut self) -> Result<(), AcquisitionError> {
        let (threshold, band_reference, requests) = {
            let mut state = lock_shared(&self.shared, COMPONENT)?;
            let band_reference = state
                .band_reference_dirty
                .then_some(state.band_reference);
            state.band_reference_dirty = false;
            let requests: Vec<CalibrationRequest> = state.requests.drain(..).collect();
            (state.threshold.clone(), band_reference, requests)
        };

        self.pipeline.apply_threshold(&threshold);
        if let Some(reference) = band_reference {
            self.pipeline.apply_band_reference(reference);
        }
        for request in requests {
            self.handle_request(request)?;
        }
        Ok(())
    }

    fn handle_request(&mut self, request: CalibrationRequest) -> Result<(), AcquisitionError> {
        match request {
            CalibrationRequest::Guided => {
                match self.pipeline.begin_calibration(&self.config.calibration) {
                    Ok(progress) => {
                        tracing::info!("[DetectionWorker] Calibration started: {}", progress.prompt());
                        lock_shared(&self.shared, COMPONENT)?.calibration_progress =
                            Some(progress.clone());
                        let _ = self.channels.calibration.send(progress);
                    }
                    Err(err) => {
                        log_calibration_error(&err, "begin guided calibration");
                        let mut state = lock_shared(&self.shared, COMPONENT)?;
                        state.calibration_active = false;
                        state.record_error(&err);
                        state.calibration_outcome = Some(Err(err));
                    }
                }
            }
            CalibrationRequest::Band => {
                match self.pipeline.begin_band_calibration(&self.config.calibration) {
                    Ok(capture) => {
                        tracing::info!("[DetectionWorker] Band calibration started ({})", capture.label());
                        lock_shared(&self.shared, COMPONENT)?.band_capture = Some(capture);
                    }
                    Err(err) => {
                        log_calibration_error(&err, "begin band calibration");
                        let mut state = lock_shared(&self.shared, COMPONENT)?;
                        state.band_calibration_active = false;
                        state.record_error(&err);
                        state.band_calibration_outcome = Some(Err(err));
                    }
                }
            }
            CalibrationRequest::Cancel => {
                if self.pipeline.cancel_calibration() {
                    tracing::info!("[DetectionWorker] Calibration cancelled");
                }
                let mut state = lock_shared(&self.shared, COMPONENT)?;
                state.calibration_active = false;
                state.band_calibration_active = false;
                state.calibration_progress = None;
                state.band_capture = None;
            }
        }
        Ok(())
    }

    /// Publish chunk results into the shared state
    fn flush(&mut self, outcome: &ChunkOutcome, events: &[IntentEvent]) -> Result<(), AcquisitionError> {
        let mut applied_onset = None;
        let mut applied_reference = None;
        let mut state = lock_shared(&self.shared, COMPONENT)?;
        state.push_signal(&outcome.filtered);
        for event in events {
            state.record_event(event);
        }

        if let Some(progress) = &outcome.calibration_progress {
            state.calibration_progress = Some(progress.clone());
        }
        if let Some(result) = &outcome.calibration_result {
            state.calibration_active = false;
            state.calibration_progress = None;
            match result {
                Ok(ok) => {
                    // Only the onset changes; the rest of the config is kept.
                    state.threshold.onset_uv = ok.suggested_onset_uv;
                    applied_onset = Some(ok.suggested_onset_uv);
                    tracing::info!(
                        "[DetectionWorker] Calibration applied: onset={:.1} µV (noise={:.1}, event={:.1})",
                        ok.suggested_onset_uv,
                        ok.noise_mean,
                        ok.event_mean
                    );
                }
                Err(err) => {
                    log_calibration_error(err, "guided calibration");
                    state.record_error(err);
                }
            }
            state.calibration_outcome = Some(result.clone());
        }

        if let Some(capture) = outcome.band_capture {
            state.band_capture = capture;
        }
        if let Some(result) = &outcome.band_calibration_result {
            state.band_calibration_active = false;
            state.band_capture = None;
            match result {
                Ok(ok) => {
                    state.band_reference = Some(ok.reference_power);
                    applied_reference = Some(ok.reference_power);
                    tracing::info!(
                        "[DetectionWorker] Band reference calibrated: {:.3} (open={:.3}, closed={:.3})",
                        ok.reference_power,
                        ok.open_mean,
                        ok.closed_mean
                    );
                }
                Err(err) => {
                    log_calibration_error(err, "band calibration");
                    state.record_error(err);
                }
            }
            state.band_calibration_outcome = Some(result.clone());
        }

        state.phase = match self.pipeline.activity() {
            PipelineActivity::WarmingUp => EnginePhase::WarmingUp,
            PipelineActivity::Detecting => EnginePhase::Detecting,
            PipelineActivity::Calibrating => EnginePhase::Calibrating,
        };

        let signal_fill = state.signal.len() as f32 / state.signal_capacity.max(1) as f32;
        drop(state);
        telemetry::hub().record_buffer_occupancy("signal_buffer", signal_fill * 100.0);

        if applied_onset.is_some() || applied_reference.is_some() {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(onset) = applied_onset {
                settings.threshold.onset_uv = onset;
            }
            if let Some(reference) = applied_reference {
                settings.band_power.calibrated_baseline = Some(reference);
            }
        }
        Ok(())
    }

    /// Lossless delivery to subscribers, outside the lock
    fn broadcast(&self, outcome: &ChunkOutcome, events: &[IntentEvent]) {
        let mut sink = BroadcastSink::new(self.channels.events.clone());
        for event in events {
            tracing::info!("[DetectionWorker] {}", event.describe());
            telemetry::hub().record_detection(event);
            sink.emit(event);
        }
        if outcome.warmup_completed {
            tracing::info!("[DetectionWorker] Baseline ready, detection active");
            telemetry::hub().record_lifecycle(LifecyclePhase::WarmupComplete);
        }
        if let Some(progress) = &outcome.calibration_progress {
            tracing::info!("[DetectionWorker] Calibration: {}", progress.prompt());
            let _ = self.channels.calibration.send(progress.clone());
        }
        if let Some(result) = &outcome.calibration_result {
            telemetry::hub().record_calibration(
                result.as_ref().ok().map(|r| r.suggested_onset_uv),
                result.as_ref().err().map(|e| e.to_string()),
            );
        }
    }
}

/// Spawn the worker on a named thread
pub fn spawn_detection_worker(worker: DetectionWorker) -> Result<JoinHandle<()>, AcquisitionError> {
    thread::Builder::new()
        .name("detection-worker".to_string())
        .spawn(move || worker.run())
        .map_err(|err| AcquisitionError::StartFailed {
            reason: format!("failed to spawn detection worker: {}", err),
        })
}
