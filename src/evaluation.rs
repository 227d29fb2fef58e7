//! Evaluation - cue-based detection scoring
//!
//! A session is scored against a fixed schedule of alternating windows:
//! a relax window in which no event should fire, followed by a cue window
//! in which the user is asked to produce one.
//!
//! Scoring per cycle:
//! - any event inside the relax window counts one false positive
//! - at least one event inside the cue window counts one true positive
//! - no event inside the cue window counts one false negative
//!
//! Windows are half-open `[start, end)`, so an event exactly on a boundary
//! belongs to the window that starts there.

use serde::{Deserialize, Serialize};

use crate::events::{EventKind, IntentEvent};

/// Timing of the cue schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueSchedule {
    pub relax_seconds: f64,
    pub cue_seconds: f64,
    pub total_cues: usize,
    /// Timestamp at which the first relax window opens
    pub start_s: f64,
}

impl Default for CueSchedule {
    fn default() -> Self {
        Self {
            relax_seconds: 3.5,
            cue_seconds: 1.5,
            total_cues: 12,
            start_s: 0.0,
        }
    }
}

impl CueSchedule {
    pub fn cycle_seconds(&self) -> f64 {
        self.relax_seconds + self.cue_seconds
    }

    pub fn total_seconds(&self) -> f64 {
        self.cycle_seconds() * self.total_cues as f64
    }

    pub fn end_s(&self) -> f64 {
        self.start_s + self.total_seconds()
    }

    /// Window containing `timestamp_s`, or `None` outside the schedule
    pub fn window_at(&self, timestamp_s: f64) -> Option<CueWindow> {
        let offset = timestamp_s - self.start_s;
        if !offset.is_finite() || offset < 0.0 || timestamp_s >= self.end_s() {
            return None;
        }
        let cycle = self.cycle_seconds();
        let index = ((offset / cycle).floor() as usize).min(self.total_cues.saturating_sub(1));
        let cycle_start = self.start_s + index as f64 * cycle;
        let cue_start = cycle_start + self.relax_seconds;
        if timestamp_s < cue_start {
            Some(CueWindow {
                index,
                kind: CueKind::Relax,
                start_s: cycle_start,
                end_s: cue_start,
            })
        } else {
            Some(CueWindow {
                index,
                kind: CueKind::Cue,
                start_s: cue_start,
                end_s: cue_start + self.cue_seconds,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    Relax,
    Cue,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CueWindow {
    /// Zero-based cycle index
    pub index: usize,
    pub kind: CueKind,
    pub start_s: f64,
    pub end_s: f64,
}

/// Scores accumulated so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub true_positives: u32,
    pub false_positives: u32,
    pub false_negatives: u32,
    /// Cycles whose cue window has closed
    pub cues_completed: usize,
    pub total_cues: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl EvaluationReport {
    fn from_counts(tp: u32, fp: u32, fn_: u32, cues_completed: usize, total_cues: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            cues_completed,
            total_cues,
            precision: round2(precision),
            recall: round2(recall),
            f1: round2(f1),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cues_completed >= self.total_cues
    }
}

fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Incremental scorer fed with events and the advancing stream clock.
///
/// Windows are only counted once the clock passes their end, so a live
/// session can be scored while it runs.
#[derive(Debug, Clone)]
pub struct CueEvaluator {
    schedule: CueSchedule,
    kind_filter: Option<EventKind>,
    /// Per-cycle hit flags: (relax window had an event, cue window had an event)
    hits: Vec<(bool, bool)>,
    clock_s: f64,
}

impl CueEvaluator {
    pub fn new(schedule: CueSchedule) -> Self {
        Self {
            hits: vec![(false, false); schedule.total_cues],
            schedule,
            kind_filter: None,
            clock_s: f64::NEG_INFINITY,
        }
    }

    /// Only count events of `kind`
    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind_filter = Some(kind);
        self
    }

    pub fn schedule(&self) -> &CueSchedule {
        &self.schedule
    }

    /// Window the clock currently sits in
    pub fn current_window(&self) -> Option<CueWindow> {
        self.schedule.window_at(self.clock_s)
    }

    pub fn observe_event(&mut self, event: &IntentEvent) {
        if let Some(kind) = self.kind_filter {
            if event.kind != kind {
                return;
            }
        }
        self.observe_timestamp(event.timestamp_s);
    }

    pub fn observe_timestamp(&mut self, timestamp_s: f64) {
        self.advance_to(timestamp_s);
        if let Some(window) = self.schedule.window_at(timestamp_s) {
            let hit = &mut self.hits[window.index];
            match window.kind {
                CueKind::Relax => hit.0 = true,
                CueKind::Cue => hit.1 = true,
            }
        }
    }

    /// Move the clock forward; it never moves backward
    pub fn advance_to(&mut self, now_s: f64) {
        if now_s > self.clock_s {
            self.clock_s = now_s;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.clock_s >= self.schedule.end_s()
    }

    pub fn report(&self) -> EvaluationReport {
        let cycle = self.schedule.cycle_seconds();
        let (mut tp, mut fp, mut fn_) = (0u32, 0u32, 0u32);
        let mut completed = 0usize;
        for (index, (relax_hit, cue_hit)) in self.hits.iter().enumerate() {
            let cycle_start = self.schedule.start_s + index as f64 * cycle;
            let relax_end = cycle_start + self.schedule.relax_seconds;
            if self.clock_s >= relax_end && *relax_hit {
                fp += 1;
            }
            if self.clock_s >= relax_end + self.schedule.cue_seconds {
                completed += 1;
                if *cue_hit {
                    tp += 1;
                } else {
                    fn_ += 1;
                }
            }
        }
        EvaluationReport::from_counts(tp, fp, fn_, completed, self.schedule.total_cues)
    }
}

/// Score a finished recording in one go.
pub fn score_timestamps(schedule: CueSchedule, timestamps: &[f64]) -> EvaluationReport {
    let mut evaluator = CueEvaluator::new(schedule);
    for &t in timestamps {
        evaluator.observe_timestamp(t);
    }
    evaluator.advance_to(schedule.end_s());
    evaluator.report()
}

/// Score a finished recording using only events of `kind`.
pub fn score_events(schedule: CueSchedule, events: &[IntentEvent], kind: EventKind) -> EvaluationReport {
    let mut evaluator = CueEvaluator::new(schedule).with_kind(kind);
    for event in events {
        evaluator.observe_event(event);
    }
    evaluator.advance_to(schedule.end_s());
    evaluator.report()
}
