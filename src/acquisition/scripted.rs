//! Session that replays a predetermined list of chunks.
//!
//! Used by tests and the replay harness to drive the worker without any
//! device. Lifecycle calls are recorded in a shared [`SessionCalls`] so the
//! caller can assert that cleanup happened after the session was moved away.

use super::{AcquisitionSession, SampleChunk};
use crate::error::AcquisitionError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lifecycle calls observed on a [`ScriptedSession`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionCalls {
    pub prepared: bool,
    pub started: bool,
    pub stopped: bool,
    pub released: bool,
    pub polls: usize,
}

pub struct ScriptedSession {
    chunks: VecDeque<SampleChunk>,
    sampling_rate: f64,
    channel_count: usize,
    last_arrival: f64,
    /// Make `start` fail to exercise the error path
    pub fail_start: bool,
    /// Make the poll after the script runs out fail
    pub fail_when_drained: bool,
    /// Report exhaustion once the script runs out, like a finite recording
    pub finite: bool,
    calls: Arc<Mutex<SessionCalls>>,
}

impl ScriptedSession {
    pub fn new(sampling_rate: f64, channel_count: usize) -> (Self, Arc<Mutex<SessionCalls>>) {
        let calls = Arc::new(Mutex::new(SessionCalls::default()));
        (
            Self {
                chunks: VecDeque::new(),
                sampling_rate,
                channel_count,
                last_arrival: 0.0,
                fail_start: false,
                fail_when_drained: false,
                finite: false,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    pub fn push_chunk(&mut self, chunk: SampleChunk) {
        self.chunks.push_back(chunk);
    }

    /// Queue `values` on every channel, split into chunks of `chunk_len`,
    /// with timestamps continuing from the previously queued chunk.
    pub fn push_signal(&mut self, values: &[f64], chunk_len: usize) {
        let mut t_end = self.chunks.back().map_or(-1.0 / self.sampling_rate, |c| {
            c.arrival_s()
        });
        for piece in values.chunks(chunk_len.max(1)) {
            t_end += piece.len() as f64 / self.sampling_rate;
            self.chunks.push_back(SampleChunk::new(
                vec![piece.to_vec(); self.channel_count],
                self.sampling_rate,
                t_end,
            ));
        }
    }

    fn record(&self, update: impl FnOnce(&mut SessionCalls)) {
        if let Ok(mut calls) = self.calls.lock() {
            update(&mut calls);
        }
    }
}

impl AcquisitionSession for ScriptedSession {
    fn prepare(&mut self) -> Result<(), AcquisitionError> {
        self.record(|c| c.prepared = true);
        Ok(())
    }

    fn start(&mut self, _buffer_hint: usize) -> Result<(), AcquisitionError> {
        if self.fail_start {
            return Err(AcquisitionError::StartFailed {
                reason: "scripted start failure".to_string(),
            });
        }
        self.record(|c| c.started = true);
        Ok(())
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn poll_chunk(&mut self, _max_samples: usize) -> Result<SampleChunk, AcquisitionError> {
        self.record(|c| c.polls += 1);
        match self.chunks.pop_front() {
            Some(chunk) => {
                self.last_arrival = chunk.arrival_s();
                Ok(chunk)
            }
            None if self.fail_when_drained => Err(AcquisitionError::StreamFailure {
                reason: "scripted stream ended".to_string(),
            }),
            None => Ok(SampleChunk::empty(
                self.channel_count,
                self.sampling_rate,
                self.last_arrival,
            )),
        }
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        self.record(|c| c.stopped = true);
        Ok(())
    }

    fn release(&mut self) {
        self.record(|c| c.released = true);
    }

    fn is_exhausted(&self) -> bool {
        self.finite && self.chunks.is_empty()
    }
}
