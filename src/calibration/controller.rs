// CalibrationController - timed quiet/event phases
//
// The controller is driven by sample timestamps, not a wall-clock timer, so a
// recorded session replays the same schedule. The schedule is anchored at the
// first observed sample; each phase ends exactly `duration` after the
// previous boundary. At every boundary the peak |magnitude| seen during the
// phase becomes a labeled sample. A phase that received no finite sample
// contributes nothing.

use super::procedure::{CalibrationProcedure, CalibrationResult, CalibrationSample, SampleLabel};
use super::progress::{CalibrationPhase, CalibrationProgress};
use crate::config::CalibrationConfig;
use crate::error::CalibrationError;

#[derive(Debug)]
pub struct CalibrationController {
    repetitions: usize,
    quiet_seconds: f64,
    event_seconds: f64,
    procedure: CalibrationProcedure,
    phase: Option<CalibrationPhase>,
    repetition: usize,
    phase_end: Option<f64>,
    phase_peak: Option<f64>,
    quiet_buffer: Vec<f64>,
}

impl CalibrationController {
    pub fn new(config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        if config.repetitions == 0 {
            return Err(CalibrationError::InvalidPhase {
                reason: "repetitions must be at least 1".to_string(),
            });
        }
        if !(config.quiet_seconds > 0.0 && config.event_seconds > 0.0) {
            return Err(CalibrationError::InvalidPhase {
                reason: format!(
                    "phase durations must be positive (quiet={}, event={})",
                    config.quiet_seconds, config.event_seconds
                ),
            });
        }
        Ok(Self {
            repetitions: config.repetitions,
            quiet_seconds: config.quiet_seconds,
            event_seconds: config.event_seconds,
            procedure: CalibrationProcedure::from_config(config),
            phase: Some(CalibrationPhase::Quiet),
            repetition: 1,
            phase_end: None,
            phase_peak: None,
            quiet_buffer: Vec::new(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_none()
    }

    pub fn phase(&self) -> Option<CalibrationPhase> {
        self.phase
    }

    pub fn progress(&self) -> CalibrationProgress {
        CalibrationProgress {
            phase: self.phase,
            repetition: self.repetition.min(self.repetitions),
            repetitions: self.repetitions,
            phase_duration_s: match self.phase {
                Some(CalibrationPhase::Quiet) => self.quiet_seconds,
                Some(CalibrationPhase::Event) => self.event_seconds,
                None => 0.0,
            },
            noise_samples: self.procedure.noise_count(),
            event_samples: self.procedure.event_count(),
        }
    }

    /// Total scheduled length of the run
    pub fn total_seconds(&self) -> f64 {
        self.repetitions as f64 * (self.quiet_seconds + self.event_seconds)
    }

    fn duration_of(&self, phase: CalibrationPhase) -> f64 {
        match phase {
            CalibrationPhase::Quiet => self.quiet_seconds,
            CalibrationPhase::Event => self.event_seconds,
        }
    }

    /// Record the finished phase and move to the next one
    fn close_phase(&mut self) {
        let Some(phase) = self.phase else {
            return;
        };
        if let Some(peak) = self.phase_peak.take() {
            let label = match phase {
                CalibrationPhase::Quiet => SampleLabel::Noise,
                CalibrationPhase::Event => SampleLabel::Event,
            };
            self.procedure.add_sample(CalibrationSample {
                label,
                peak_magnitude: peak,
            });
        }
        if phase == CalibrationPhase::Quiet {
            self.procedure.add_quiet_magnitudes(&self.quiet_buffer);
            self.quiet_buffer.clear();
        }

        let boundary = self.phase_end.unwrap_or(0.0);
        self.phase = match phase {
            CalibrationPhase::Quiet => Some(CalibrationPhase::Event),
            CalibrationPhase::Event if self.repetition < self.repetitions => {
                self.repetition += 1;
                Some(CalibrationPhase::Quiet)
            }
            CalibrationPhase::Event => None,
        };
        self.phase_end = self.phase.map(|next| boundary + self.duration_of(next));
    }

    /// Feed one conditioned magnitude. Returns progress when the phase changed.
    pub fn observe(&mut self, magnitude: f64, t: f64) -> Option<CalibrationProgress> {
        let current = self.phase?;
        if self.phase_end.is_none() {
            self.phase_end = Some(t + self.duration_of(current));
        }

        let mut changed = false;
        while let (Some(_), Some(end)) = (self.phase, self.phase_end) {
            if t < end {
                break;
            }
            self.close_phase();
            changed = true;
        }

        if let Some(phase) = self.phase {
            if magnitude.is_finite() {
                let m = magnitude.abs();
                self.phase_peak = Some(self.phase_peak.map_or(m, |p| p.max(m)));
                if phase == CalibrationPhase::Quiet {
                    self.quiet_buffer.push(m);
                }
            }
        }

        changed.then(|| self.progress())
    }

    /// Feed a whole conditioned chunk; returns the last phase change, if any.
    pub fn observe_chunk(&mut self, magnitudes: &[f64], times: &[f64]) -> Option<CalibrationProgress> {
        let mut last = None;
        for (&m, &t) in magnitudes.iter().zip(times) {
            if let Some(progress) = self.observe(m, t) {
                last = Some(progress);
            }
        }
        last
    }

    /// Compute the suggested threshold. The sample sets are dropped either way.
    pub fn finish(self) -> Result<CalibrationResult, CalibrationError> {
        self.procedure.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 100.0;

    fn config() -> CalibrationConfig {
        CalibrationConfig {
            repetitions: 2,
            quiet_seconds: 1.0,
            event_seconds: 0.5,
            ..CalibrationConfig::default()
        }
    }

    /// Drive the controller with `f(t)` from t=0 until it finishes
    fn drive(controller: &mut CalibrationController, f: impl Fn(f64) -> f64) -> usize {
        let mut changes = 0;
        let mut i = 0;
        while !controller.is_finished() && i < 10_000 {
            let t = i as f64 / FS;
            if controller.observe(f(t), t).is_some() {
                changes += 1;
            }
            i += 1;
        }
        changes
    }

    #[test]
    fn test_phases_alternate_and_finish() {
        let mut controller = CalibrationController::new(&config()).unwrap();
        assert_eq!(controller.phase(), Some(CalibrationPhase::Quiet));
        let changes = drive(&mut controller, |_| 10.0);
        // quiet->event, event->quiet, quiet->event, event->done
        assert_eq!(changes, 4);
        assert!(controller.is_finished());
        let progress = controller.progress();
        assert_eq!(progress.noise_samples, 2);
        assert_eq!(progress.event_samples, 2);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_peaks_recorded_per_phase() {
        let mut controller = CalibrationController::new(&config()).unwrap();
        // Blink of 250 µV inside each event window (1.0-1.5s, 2.5-3.0s)
        drive(&mut controller, |t| {
            if (1.2..1.25).contains(&t) || (2.7..2.75).contains(&t) {
                250.0
            } else if t < 1.0 {
                20.0
            } else {
                18.0
            }
        });
        let result = controller.finish().unwrap();
        assert!((result.noise_mean - 19.0).abs() < 1e-9);
        assert!((result.event_mean - 250.0).abs() < 1e-9);
        // 19 + 0.6 * 231 = 157.6
        assert!((result.suggested_onset_uv - 157.6).abs() < 1e-9);
        assert!(result.statistical_onset_uv.is_some());
    }

    #[test]
    fn test_no_magnitudes_means_failure() {
        let mut controller = CalibrationController::new(&config()).unwrap();
        drive(&mut controller, |_| f64::NAN);
        assert!(matches!(
            controller.finish(),
            Err(CalibrationError::NoEventSamples { noise_samples: 0 })
        ));
    }

    #[test]
    fn test_schedule_anchored_at_first_sample() {
        let mut controller = CalibrationController::new(&config()).unwrap();
        assert!(controller.observe(5.0, 100.0).is_none());
        assert!(controller.observe(5.0, 100.99).is_none());
        let progress = controller.observe(5.0, 101.0).unwrap();
        assert_eq!(progress.phase, Some(CalibrationPhase::Event));
        assert_eq!(progress.noise_samples, 1);
    }

    #[test]
    fn test_gap_skips_empty_phases() {
        let mut controller = CalibrationController::new(&config()).unwrap();
        controller.observe(5.0, 0.0);
        // Jump past the first event window and into the second quiet phase.
        let progress = controller.observe(5.0, 1.6).unwrap();
        assert_eq!(progress.phase, Some(CalibrationPhase::Quiet));
        assert_eq!(progress.repetition, 2);
        assert_eq!(progress.noise_samples, 1);
        assert_eq!(progress.event_samples, 0);
    }

    #[test]
    fn test_invalid_durations_rejected() {
        let mut cfg = config();
        cfg.event_seconds = 0.0;
        assert!(matches!(
            CalibrationController::new(&cfg),
            Err(CalibrationError::InvalidPhase { .. })
        ));
    }
}
