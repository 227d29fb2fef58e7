// Progress tracking for guided calibration
//
// Phases alternate quiet -> event for each repetition. Progress snapshots are
// published whenever the phase changes so a UI can prompt the subject.

use serde::{Deserialize, Serialize};

/// Phase of a guided threshold calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    /// Subject stays relaxed; the peak is recorded as noise
    Quiet,
    /// Subject produces one target event; the peak is recorded as an event
    Event,
}

impl CalibrationPhase {
    pub fn display_name(&self) -> &'static str {
        match self {
            CalibrationPhase::Quiet => "RELAX",
            CalibrationPhase::Event => "BLINK NOW",
        }
    }
}

/// Phase of a band-power calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandCapture {
    EyesOpen,
    EyesClosed,
}

impl BandCapture {
    pub fn label(&self) -> &'static str {
        match self {
            BandCapture::EyesOpen => "eyes_open",
            BandCapture::EyesClosed => "eyes_closed",
        }
    }
}

/// Snapshot sent to progress subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    /// `None` once every repetition has completed
    pub phase: Option<CalibrationPhase>,
    /// 1-based repetition currently running
    pub repetition: usize,
    pub repetitions: usize,
    pub phase_duration_s: f64,
    pub noise_samples: usize,
    pub event_samples: usize,
}

impl CalibrationProgress {
    pub fn is_complete(&self) -> bool {
        self.phase.is_none()
    }

    /// Prompt text for the current phase
    pub fn prompt(&self) -> String {
        match self.phase {
            Some(phase) => format!(
                "{} ({}/{})",
                phase.display_name(),
                self.repetition,
                self.repetitions
            ),
            None => "Calibration complete".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_text() {
        let progress = CalibrationProgress {
            phase: Some(CalibrationPhase::Event),
            repetition: 2,
            repetitions: 4,
            phase_duration_s: 0.8,
            noise_samples: 2,
            event_samples: 1,
        };
        assert_eq!(progress.prompt(), "BLINK NOW (2/4)");
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_serializes_phase_snake_case() {
        let progress = CalibrationProgress {
            phase: Some(CalibrationPhase::Quiet),
            repetition: 1,
            repetitions: 4,
            phase_duration_s: 2.0,
            noise_samples: 0,
            event_samples: 0,
        };
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("\"phase\":\"quiet\""));
    }
}
