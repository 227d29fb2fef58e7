//! Integration tests for the calibration workflow
//!
//! These tests cover the calibration path end to end without a device:
//! - Blend arithmetic on labeled sample sets
//! - Guided timed phases replayed from a magnitude script
//! - A guided run through the engine that captures no event samples
//! - Manual marks through a running engine

use eeg_intent::acquisition::{chunk_queue, SampleChunk, ScriptedSession};
use eeg_intent::calibration::{
    CalibrationController, CalibrationPhase, CalibrationProcedure, CalibrationSample, SampleLabel,
};
use eeg_intent::config::{AppConfig, CalibrationConfig};
use eeg_intent::engine::EngineHandle;
use eeg_intent::error::{CalibrationError, ErrorCode};

const FS: f64 = 100.0;

fn labeled(noise: &[f64], events: &[f64]) -> CalibrationProcedure {
    let mut procedure = CalibrationProcedure::from_config(&CalibrationConfig::default());
    for &peak in noise {
        procedure.add_sample(CalibrationSample {
            label: SampleLabel::Noise,
            peak_magnitude: peak,
        });
    }
    for &peak in events {
        procedure.add_sample(CalibrationSample {
            label: SampleLabel::Event,
            peak_magnitude: peak,
        });
    }
    procedure
}

#[test]
fn test_blend_of_noise_and_event_means() {
    let result = labeled(&[20.0, 22.0, 18.0, 19.0], &[250.0, 260.0])
        .finalize()
        .unwrap();

    assert!((result.noise_mean - 19.75).abs() < 1e-12);
    assert!((result.event_mean - 255.0).abs() < 1e-12);
    assert!((result.suggested_onset_uv - 160.9).abs() < 1e-9);
}

#[test]
fn test_same_samples_same_threshold() {
    let first = labeled(&[12.0, 31.5], &[180.0, 240.0, 199.0]).finalize().unwrap();
    let second = labeled(&[12.0, 31.5], &[180.0, 240.0, 199.0]).finalize().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_guided_failure_through_engine_keeps_threshold() {
    let mut config = AppConfig::default();
    config.conditioning.notch_enabled = false;
    config.conditioning.bandpass_enabled = false;
    config.baseline.duration_seconds = 0.4;
    config.acquisition.idle_sleep_ms = 1;
    config.calibration.repetitions = 1;
    config.calibration.quiet_seconds = 0.5;
    config.calibration.event_seconds = 0.5;
    let engine = EngineHandle::new(config);
    let before = engine.threshold().unwrap();

    let (mut producer, session) = chunk_queue(16, FS, 2);
    engine.start(Box::new(session)).unwrap();
    engine.start_calibration().unwrap();

    // Half a second of quiet, then the stream drops out across the whole
    // event phase and resumes at t = 1.1 s
    for first in (0..50).step_by(10).chain([110]) {
        let values = vec![20.0; 10];
        let arrival = (first + 9) as f64 / FS;
        assert!(producer.push(SampleChunk::new(vec![values.clone(), values], FS, arrival)));
    }
    drop(producer);
    engine.wait().unwrap();

    let outcome = engine.calibration_outcome().unwrap().unwrap();
    let err = outcome.unwrap_err();
    assert!(matches!(err, CalibrationError::NoEventSamples { noise_samples: 1 }));
    assert_eq!(err.code(), 3001);

    assert_eq!(engine.threshold().unwrap(), before);
    assert_eq!(engine.config_snapshot().threshold, before);
    assert_eq!(engine.status().unwrap().last_error_code, Some(3001));
}

#[test]
fn test_guided_run_replayed_from_script() {
    let config = CalibrationConfig::default();
    assert_eq!(config.repetitions, 4);
    let mut controller = CalibrationController::new(&config).unwrap();
    assert!((controller.total_seconds() - 11.2).abs() < 1e-9);

    // Peaks sit well inside their phases; background is 5 µV
    let peaks = [
        (1.0, 20.0),
        (2.4, 250.0),
        (3.8, 22.0),
        (5.2, 260.0),
        (6.6, 18.0),
        (8.0, 250.0),
        (9.4, 19.0),
        (10.8, 260.0),
    ];
    let magnitude = |t: f64| {
        peaks
            .iter()
            .find(|(at, _)| (t - at).abs() < 0.005)
            .map_or(5.0, |&(_, value)| value)
    };

    let mut phases = Vec::new();
    let mut i = 0usize;
    while !controller.is_finished() {
        let t = i as f64 / FS;
        if let Some(progress) = controller.observe(magnitude(t), t) {
            phases.push(progress.phase);
        }
        i += 1;
        assert!(i < 2_000, "controller did not finish");
    }

    assert_eq!(phases.len(), 8);
    assert_eq!(phases[0], Some(CalibrationPhase::Event));
    assert_eq!(phases[1], Some(CalibrationPhase::Quiet));
    assert_eq!(phases.last(), Some(&None));

    let result = controller.finish().unwrap();
    assert_eq!(result.noise_count, 4);
    assert_eq!(result.event_count, 4);
    assert!((result.suggested_onset_uv - 160.9).abs() < 1e-9);
    // Quiet phases are almost all 5 µV, so the statistical estimate stays low
    let statistical = result.statistical_onset_uv.unwrap();
    assert!(statistical < result.suggested_onset_uv);
}

#[test]
fn test_manual_marks_through_engine() {
    let mut config = AppConfig::default();
    config.conditioning.notch_enabled = false;
    config.conditioning.bandpass_enabled = false;
    config.baseline.duration_seconds = 0.5;
    config.acquisition.idle_sleep_ms = 1;
    let engine = EngineHandle::new(config);

    // 1.5 s quiet at 25 µV, then a 280 µV blink inside the last second
    let mut signal = vec![25.0; 150];
    signal.extend([280.0; 4]);
    signal.extend([25.0; 46]);
    let (mut session, calls) = ScriptedSession::new(FS, 2);
    session.push_signal(&signal, 20);
    session.finite = true;

    engine.start(Box::new(session)).unwrap();
    engine.wait().unwrap();
    assert!(calls.lock().unwrap().released);

    assert_eq!(engine.mark_calibration(SampleLabel::Event).unwrap(), 280.0);
    assert_eq!(engine.mark_calibration(SampleLabel::Event).unwrap(), 280.0);

    let result = engine.finish_calibration().unwrap();
    // No noise marks: fallback noise of 30 µV
    assert!((result.noise_mean - 30.0).abs() < 1e-12);
    assert!((result.suggested_onset_uv - 180.0).abs() < 1e-9);
    assert_eq!(engine.threshold().unwrap().onset_uv, 180.0);

    assert!(matches!(
        engine.finish_calibration(),
        Err(CalibrationError::NotInProgress)
    ));
}
