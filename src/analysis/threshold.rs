// Threshold module - Schmitt trigger over (magnitude - baseline)
//
// Quiescent -> Active when the sample clears the onset threshold both above
// baseline and in absolute terms, and the cooldown since the previous entry
// has elapsed. Active -> Quiescent only when the excess drops below
// onset * off_factor. There is no time-based exit.
//
// Debounce mode keeps no Active state: every qualifying sample fires once the
// cooldown has elapsed.

use crate::config::{ThresholdConfig, ThresholdMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionState {
    Quiescent,
    Active,
}

/// Values that produced an onset, kept for the event's debug payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossing {
    pub timestamp_s: f64,
    pub magnitude: f64,
    pub baseline: f64,
    pub excess: f64,
    pub onset_uv: f64,
    pub offset_uv: f64,
    pub cooldown_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct ThresholdStateMachine {
    config: ThresholdConfig,
    state: DetectionState,
    last_entry: Option<f64>,
}

impl ThresholdStateMachine {
    pub fn new(config: ThresholdConfig) -> Self {
        Self {
            config,
            state: DetectionState::Quiescent,
            last_entry: None,
        }
    }

    /// Replace thresholds between chunks. State and cooldown timer are kept.
    pub fn set_config(&mut self, config: ThresholdConfig) {
        if config.mode != self.config.mode {
            self.state = DetectionState::Quiescent;
        }
        self.config = config;
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn last_entry(&self) -> Option<f64> {
        self.last_entry
    }

    pub fn reset(&mut self) {
        self.state = DetectionState::Quiescent;
        self.last_entry = None;
    }

    fn cooldown_elapsed(&self, t: f64) -> bool {
        self.last_entry
            .map_or(true, |last| t - last >= self.config.cooldown_seconds)
    }

    /// Feed one sample. `baseline` is `None` during warm-up, in which case
    /// nothing is decided and the state does not change.
    pub fn evaluate(&mut self, magnitude: f64, baseline: Option<f64>, t: f64) -> Option<Crossing> {
        let baseline = baseline?;
        let onset = self.config.onset_uv;
        let excess = magnitude - baseline;
        let over_onset = excess > onset && magnitude > onset;

        match (self.config.mode, self.state) {
            (ThresholdMode::Hysteresis, DetectionState::Active) => {
                if excess < self.config.offset_uv() {
                    self.state = DetectionState::Quiescent;
                }
                None
            }
            (mode, _) => {
                if !over_onset || !self.cooldown_elapsed(t) {
                    return None;
                }
                if mode == ThresholdMode::Hysteresis {
                    self.state = DetectionState::Active;
                }
                self.last_entry = Some(t);
                Some(Crossing {
                    timestamp_s: t,
                    magnitude,
                    baseline,
                    excess,
                    onset_uv: onset,
                    offset_uv: self.config.offset_uv(),
                    cooldown_seconds: self.config.cooldown_seconds,
                })
            }
        }
    }
}
