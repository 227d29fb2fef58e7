//! Metric event types published by the detection worker and engine.

use serde::{Deserialize, Serialize};

use crate::events::EventKind;

/// Lifecycle stages of one detection session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    SessionOpened,
    WarmupComplete,
    WorkerStopped,
    SessionReleased,
}

/// Diagnostic categories surfaced via telemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticError {
    Configuration,
    Acquisition,
    Calibration,
    StreamBackpressure,
}

/// Metric events covering detections, chunk timing, buffers and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    Detection {
        kind: EventKind,
        timestamp_s: f64,
        value: f64,
    },
    ChunkLatency {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    BufferOccupancy {
        channel: String,
        percent: f32,
    },
    Lifecycle {
        phase: LifecyclePhase,
        timestamp_ms: u64,
    },
    Calibration {
        success: bool,
        suggested_onset_uv: Option<f64>,
        detail: Option<String>,
    },
    Error {
        code: DiagnosticError,
        error_code: i32,
        context: String,
    },
}
