use super::*;
use std::time::Duration;

use crate::acquisition::{chunk_queue, SampleChunk, ScriptedSession};
use crate::config::ThresholdMode;
use crate::error::ErrorCode;
use crate::events::EventKind;

const FS: f64 = 100.0;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.conditioning.notch_enabled = false;
    config.conditioning.bandpass_enabled = false;
    config.baseline.duration_seconds = 0.4;
    config.threshold.cooldown_seconds = 0.35;
    config.acquisition.idle_sleep_ms = 1;
    config
}

/// 60 samples at 10 µV, 5 at 300 µV, 35 at 10 µV
fn single_spike() -> Vec<f64> {
    let mut signal = vec![10.0; 60];
    signal.extend([300.0; 5]);
    signal.extend([10.0; 35]);
    signal
}

fn finite_session(signal: &[f64]) -> (ScriptedSession, Arc<Mutex<crate::acquisition::SessionCalls>>) {
    let (mut session, calls) = ScriptedSession::new(FS, 2);
    session.push_signal(signal, 10);
    session.finite = true;
    (session, calls)
}

fn chunk_at(values: &[f64], first_index: usize) -> SampleChunk {
    let last = (first_index + values.len() - 1) as f64 / FS;
    SampleChunk::new(vec![values.to_vec(), values.to_vec()], FS, last)
}

#[test]
fn test_start_failure_releases_session() {
    let engine = EngineHandle::new(test_config());
    let (mut session, calls) = ScriptedSession::new(FS, 2);
    session.fail_start = true;

    let err = engine.start(Box::new(session)).unwrap_err();
    assert!(matches!(err, AcquisitionError::StartFailed { .. }));
    assert!(!engine.is_running());

    let calls = calls.lock().unwrap().clone();
    assert!(calls.prepared);
    assert!(calls.released);
    assert!(!calls.stopped);

    let status = engine.status().unwrap();
    assert_eq!(status.phase, EnginePhase::Failed);
    assert_eq!(status.last_error_code, Some(err.code()));
}

#[test]
fn test_invalid_channel_fails_before_loop() {
    let mut config = test_config();
    config.conditioning.channels = [0, 4];
    let engine = EngineHandle::new(config);
    let (session, calls) = ScriptedSession::new(FS, 2);

    let err = engine.start(Box::new(session)).unwrap_err();
    assert!(matches!(
        err,
        AcquisitionError::Config(ConfigError::InvalidChannel { index: 4, .. })
    ));
    let calls = calls.lock().unwrap().clone();
    assert!(calls.stopped);
    assert!(calls.released);
    assert_eq!(calls.polls, 0);
}

#[test]
fn test_finite_session_runs_to_completion() {
    let engine = EngineHandle::new(test_config());
    let mut rx = engine.subscribe_events();
    let (session, calls) = finite_session(&single_spike());

    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();

    let events = engine.poll_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Blink);
    assert!((events[0].timestamp_s - 0.60).abs() < 1e-9);
    assert!(engine.poll_events().unwrap().is_empty());

    let broadcast = rx.try_recv().unwrap();
    assert_eq!(broadcast, events[0]);

    let status = engine.status().unwrap();
    assert_eq!(status.phase, EnginePhase::Stopped);
    assert_eq!(status.events_emitted, 1);
    assert!(status.last_event.unwrap().starts_with("BLINK"));
    assert!(!status.running);

    let calls = calls.lock().unwrap().clone();
    assert!(calls.stopped && calls.released);
}

#[test]
fn test_one_shot_flag_coalesces_events() {
    let engine = EngineHandle::new(test_config());
    let mut signal = single_spike();
    signal.extend(single_spike());
    let (session, _) = finite_session(&signal);

    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();

    let status = engine.status().unwrap();
    assert_eq!(status.events_emitted, 2);
    assert_eq!(status.dropped_events, 1);
    assert!(engine.poll_flag().unwrap());
    assert!(!engine.poll_flag().unwrap());
}

#[test]
fn test_stop_releases_live_session() {
    let engine = EngineHandle::new(test_config());
    let (session, calls) = ScriptedSession::new(FS, 2);

    engine.start(Box::new(session)).unwrap();
    assert!(engine.is_running());
    let (second, _) = ScriptedSession::new(FS, 2);
    assert!(matches!(
        engine.start(Box::new(second)),
        Err(AcquisitionError::AlreadyRunning)
    ));

    std::thread::sleep(Duration::from_millis(20));
    engine.stop().unwrap();
    assert!(!engine.is_running());
    assert!(matches!(engine.stop(), Err(AcquisitionError::NotRunning)));

    let calls = calls.lock().unwrap().clone();
    assert!(calls.polls > 0);
    assert!(calls.stopped && calls.released);
    assert_eq!(engine.status().unwrap().phase, EnginePhase::Stopped);
}

#[test]
fn test_stream_failure_is_terminal_and_cleans_up() {
    let engine = EngineHandle::new(test_config());
    let (mut session, calls) = ScriptedSession::new(FS, 2);
    session.push_signal(&[10.0; 30], 10);
    session.fail_when_drained = true;

    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();

    let status = engine.status().unwrap();
    assert_eq!(status.phase, EnginePhase::Failed);
    assert!(status.last_error.is_some());
    let calls = calls.lock().unwrap().clone();
    assert!(calls.stopped && calls.released);
}

#[test]
fn test_threshold_patch_is_validated() {
    let engine = EngineHandle::new(test_config());
    let updated = engine
        .update_threshold(&ParamPatch {
            onset_uv: Some(90.0),
            mode: Some(ThresholdMode::Debounce),
            ..ParamPatch::default()
        })
        .unwrap();
    assert_eq!(updated.onset_uv, 90.0);
    assert_eq!(engine.config_snapshot().threshold.mode, ThresholdMode::Debounce);

    let err = engine
        .update_threshold(&ParamPatch {
            onset_uv: Some(-1.0),
            ..ParamPatch::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        AcquisitionError::Config(ConfigError::InvalidOnset { .. })
    ));
    assert_eq!(engine.threshold().unwrap().onset_uv, 90.0);
}

#[test]
fn test_signal_snapshot_after_run() {
    let engine = EngineHandle::new(test_config());
    let (session, _) = finite_session(&single_spike());
    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();

    let snapshot = engine.signal_snapshot().unwrap();
    assert_eq!(snapshot.len(), 100);
    assert_eq!(snapshot[60], 300.0);
}

#[test]
fn test_manual_marks_apply_onset() {
    let engine = EngineHandle::new(test_config());
    assert!(matches!(
        engine.finish_calibration(),
        Err(CalibrationError::NotInProgress)
    ));

    let (session, _) = finite_session(&single_spike());
    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();

    // The last second of the buffer holds the 300 µV spike.
    let peak = engine.mark_calibration(SampleLabel::Event).unwrap();
    assert_eq!(peak, 300.0);
    let result = engine.finish_calibration().unwrap();
    // Fallback noise 30 + 0.6 * (300 - 30)
    assert!((result.suggested_onset_uv - 192.0).abs() < 1e-9);
    assert_eq!(engine.threshold().unwrap().onset_uv, 192.0);
}

#[test]
fn test_failed_manual_calibration_keeps_onset() {
    let engine = EngineHandle::new(test_config());
    let (session, _) = finite_session(&single_spike());
    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();

    engine.mark_calibration(SampleLabel::Noise).unwrap();
    let err = engine.finish_calibration().unwrap_err();
    assert!(matches!(err, CalibrationError::NoEventSamples { noise_samples: 1 }));
    assert_eq!(engine.threshold().unwrap().onset_uv, 150.0);
    assert_eq!(
        engine.status().unwrap().last_error_code,
        Some(err.code())
    );
}

#[test]
fn test_calibration_requires_running_engine() {
    let engine = EngineHandle::new(test_config());
    assert!(matches!(
        engine.start_calibration(),
        Err(CalibrationError::InvalidPhase { .. })
    ));
}

#[test]
fn test_guided_calibration_through_worker() {
    let mut config = test_config();
    config.calibration.repetitions = 1;
    config.calibration.quiet_seconds = 0.5;
    config.calibration.event_seconds = 0.5;
    let engine = EngineHandle::new(config);
    let mut progress_rx = engine.subscribe_calibration();

    let (mut producer, session) = chunk_queue(64, FS, 2);
    engine.start(Box::new(session)).unwrap();
    engine.start_calibration().unwrap();
    assert!(matches!(
        engine.start_calibration(),
        Err(CalibrationError::AlreadyInProgress)
    ));

    let mut signal = vec![20.0; 70];
    signal.extend([260.0; 3]);
    signal.extend([20.0; 37]);
    for (n, piece) in signal.chunks(10).enumerate() {
        assert!(producer.push(chunk_at(piece, n * 10)));
    }
    drop(producer);
    engine.wait().unwrap();

    let outcome = engine.calibration_outcome().unwrap().unwrap().unwrap();
    assert!((outcome.suggested_onset_uv - 164.0).abs() < 1e-9);
    assert_eq!(engine.threshold().unwrap().onset_uv, outcome.suggested_onset_uv);
    assert_eq!(
        engine.config_snapshot().threshold.onset_uv,
        outcome.suggested_onset_uv
    );
    assert!(engine.poll_events().unwrap().is_empty());

    let first = progress_rx.try_recv().unwrap();
    assert_eq!(first.repetition, 1);
    assert!(first.phase.is_some());
}

#[test]
fn test_failed_guided_calibration_keeps_onset() {
    let mut config = test_config();
    config.calibration.repetitions = 2;
    config.calibration.quiet_seconds = 0.5;
    config.calibration.event_seconds = 0.5;
    let engine = EngineHandle::new(config);

    let (mut producer, session) = chunk_queue(64, FS, 2);
    engine.start(Box::new(session)).unwrap();
    engine.start_calibration().unwrap();

    // Quiet phases see 20 µV away from their edges; the event phases only
    // get dropped-out samples
    let signal: Vec<f64> = (0..220)
        .map(|i| {
            let in_quiet = i < 200 && (5..45).contains(&(i % 100));
            if in_quiet || i >= 205 {
                20.0
            } else {
                f64::NAN
            }
        })
        .collect();
    for (n, piece) in signal.chunks(10).enumerate() {
        assert!(producer.push(chunk_at(piece, n * 10)));
    }
    drop(producer);
    engine.wait().unwrap();

    let outcome = engine.calibration_outcome().unwrap().unwrap();
    assert!(matches!(
        outcome,
        Err(CalibrationError::NoEventSamples { noise_samples: 2 })
    ));
    assert_eq!(engine.threshold().unwrap().onset_uv, 150.0);
    assert_eq!(engine.config_snapshot().threshold.onset_uv, 150.0);

    let status = engine.status().unwrap();
    assert_eq!(status.last_error_code, Some(3001));
    assert_eq!(status.phase, EnginePhase::Stopped);
    assert!(status.calibration.is_none());
}

fn alpha(amplitude: f64, n: usize, offset: usize) -> Vec<f64> {
    (offset..offset + n)
        .map(|i| amplitude * (2.0 * std::f64::consts::PI * 10.0 * i as f64 / FS).sin())
        .collect()
}

fn band_config() -> AppConfig {
    let mut config = test_config();
    config.band_power.enabled = true;
    config.band_power.channels = [0, 1];
    config.band_power.window_seconds = 1.0;
    config.calibration.band_open_seconds = 1.5;
    config.calibration.band_closed_seconds = 1.0;
    config
}

#[test]
fn test_band_reference_survives_restart() {
    let engine = EngineHandle::new(band_config());

    let (mut producer, session) = chunk_queue(64, FS, 2);
    engine.start(Box::new(session)).unwrap();
    engine.start_band_calibration().unwrap();
    let mut signal = alpha(5.0, 200, 0);
    signal.extend(alpha(30.0, 150, 200));
    for (n, piece) in signal.chunks(10).enumerate() {
        assert!(producer.push(chunk_at(piece, n * 10)));
    }
    drop(producer);
    engine.wait().unwrap();

    let result = engine.band_calibration_outcome().unwrap().unwrap().unwrap();
    let reference = result.reference_power;
    // Eyes-closed power of a 30 µV alpha rhythm is about 450
    assert!(reference * 1.1 < 400.0, "reference {}", reference);
    assert_eq!(engine.status().unwrap().band_reference, Some(reference));
    assert_eq!(
        engine.config_snapshot().band_power.calibrated_baseline,
        Some(reference)
    );

    // Second session: no running-median warm-up, the stored reference applies
    let mut rx = engine.subscribe_events();
    let (mut producer, session) = chunk_queue(64, FS, 2);
    engine.start(Box::new(session)).unwrap();
    for (n, piece) in alpha(30.0, 300, 0).chunks(10).enumerate() {
        assert!(producer.push(chunk_at(piece, n * 10)));
    }
    drop(producer);
    engine.wait().unwrap();

    let mut closed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.kind == EventKind::EyesClosed {
            closed.push(event);
        }
    }
    assert_eq!(closed.len(), 1);
    assert!((closed[0].timestamp_s - 0.99).abs() < 1e-9);
    assert_eq!(engine.status().unwrap().band_reference, Some(reference));
}

#[test]
fn test_worker_metrics_reach_telemetry() {
    let engine = EngineHandle::new(test_config());
    let before = engine.telemetry_snapshot().total_events;
    let mut rx = engine.subscribe_telemetry_unbounded();

    let (session, _) = finite_session(&single_spike());
    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();

    // The hub is process-wide, so other sessions may interleave here
    let detection = loop {
        match rx.blocking_recv() {
            Some(MetricEvent::Detection {
                kind: EventKind::Blink,
                value,
                ..
            }) => break value,
            Some(_) => continue,
            None => panic!("telemetry channel closed"),
        }
    };
    assert!(detection > 150.0);

    let snapshot = engine.telemetry_snapshot();
    assert!(snapshot.total_events > before);
    assert!(!snapshot.recent.is_empty());
    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"total_events\""));
}
