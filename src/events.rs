//! Intent events and the sinks that deliver them.
//!
//! The engine emits every event to an [`EventSink`]; how it reaches the
//! outside world (broadcast channel, pending queue, plain vector) is up to
//! the sink.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analysis::band_power::BandTransition;
use crate::analysis::threshold::Crossing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Transient spike from the time-domain detector
    Blink,
    /// Band-power detector entered Active
    EyesClosed,
    /// Band-power detector left Active
    EyesOpen,
}

/// Values behind a decision, carried for display and tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDebug {
    /// Magnitude (µV) or band power that triggered the transition
    pub value: f64,
    /// Baseline or reference power
    pub reference: f64,
    pub enter_threshold: f64,
    pub exit_threshold: f64,
    pub cooldown_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentEvent {
    pub kind: EventKind,
    pub timestamp_s: f64,
    pub debug: EventDebug,
}

impl IntentEvent {
    pub fn from_crossing(crossing: &Crossing) -> Self {
        Self {
            kind: EventKind::Blink,
            timestamp_s: crossing.timestamp_s,
            debug: EventDebug {
                value: crossing.magnitude,
                reference: crossing.baseline,
                enter_threshold: crossing.onset_uv,
                exit_threshold: crossing.offset_uv,
                cooldown_seconds: crossing.cooldown_seconds,
            },
        }
    }

    pub fn from_band(
        transition: &BandTransition,
        up_factor: f64,
        down_factor: f64,
        cooldown_seconds: f64,
    ) -> Self {
        let (kind, timestamp_s, power, reference) = match *transition {
            BandTransition::Entered {
                timestamp_s,
                power,
                reference,
            } => (EventKind::EyesClosed, timestamp_s, power, reference),
            BandTransition::Exited {
                timestamp_s,
                power,
                reference,
            } => (EventKind::EyesOpen, timestamp_s, power, reference),
        };
        Self {
            kind,
            timestamp_s,
            debug: EventDebug {
                value: power,
                reference,
                enter_threshold: reference * up_factor,
                exit_threshold: reference * down_factor,
                cooldown_seconds,
            },
        }
    }

    /// One-line human readable summary
    pub fn describe(&self) -> String {
        match self.kind {
            EventKind::Blink => format!(
                "BLINK at {:.3}s | val={:.1} µV, base={:.1} µV, diff={:.1} µV, TH_ON={:.1} µV, TH_OFF={:.1} µV, cooldown={:.2} s",
                self.timestamp_s,
                self.debug.value,
                self.debug.reference,
                self.debug.value - self.debug.reference,
                self.debug.enter_threshold,
                self.debug.exit_threshold,
                self.debug.cooldown_seconds,
            ),
            EventKind::EyesClosed | EventKind::EyesOpen => format!(
                "{} at {:.3}s | power={:.2}, ref={:.2}, up={:.2}, down={:.2}",
                if self.kind == EventKind::EyesClosed {
                    "EYES_CLOSED"
                } else {
                    "EYES_OPEN"
                },
                self.timestamp_s,
                self.debug.value,
                self.debug.reference,
                self.debug.enter_threshold,
                self.debug.exit_threshold,
            ),
        }
    }
}

/// Destination for emitted events
pub trait EventSink: Send {
    fn emit(&mut self, event: &IntentEvent);
}

impl EventSink for Vec<IntentEvent> {
    fn emit(&mut self, event: &IntentEvent) {
        self.push(event.clone());
    }
}

/// Publishes to a tokio broadcast channel; lagging receivers lose old events.
pub struct BroadcastSink {
    tx: broadcast::Sender<IntentEvent>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<IntentEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for BroadcastSink {
    fn emit(&mut self, event: &IntentEvent) {
        // No receivers is not an error.
        let _ = self.tx.send(event.clone());
    }
}

/// Bounded queue of undelivered events read by pollers.
///
/// When full the oldest event is dropped. With capacity 1 this behaves as a
/// one-shot flag: a poll sees at most the latest event and clears it.
#[derive(Debug, Clone)]
pub struct PendingEvents {
    queue: VecDeque<IntentEvent>,
    capacity: usize,
    dropped: u64,
}

impl PendingEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: IntentEvent) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(event);
    }

    /// Remove and return everything pending
    pub fn take(&mut self) -> Vec<IntentEvent> {
        self.queue.drain(..).collect()
    }

    /// One-shot read: true if anything was pending; clears the queue
    pub fn take_flag(&mut self) -> bool {
        let pending = !self.queue.is_empty();
        self.queue.clear();
        pending
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events overwritten before anyone polled them
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for PendingEvents {
    fn emit(&mut self, event: &IntentEvent) {
        self.push(event.clone());
    }
}
