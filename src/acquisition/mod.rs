//! Acquisition sessions feeding the detection worker.
//!
//! The engine only needs "give me the next chunk of samples at rate fs", so
//! hardware and file sources hide behind [`AcquisitionSession`]. Sessions hand
//! chunks over by value; the engine keeps no reference to session memory.

mod queue;
mod scripted;
mod synthetic;
mod wav;

pub use queue::{chunk_queue, spawn_feeder, ChunkProducer, FeederHandle, QueueSession};
pub use scripted::{ScriptedSession, SessionCalls};
pub use synthetic::{SyntheticSession, SyntheticSpec};
pub use wav::WavSession;

use crate::error::{log_acquisition_error, AcquisitionError};

/// One block of multi-channel samples.
///
/// All channels hold the same number of samples. `arrival_s` is the session
/// clock at the moment the newest sample was read.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleChunk {
    channels: Vec<Vec<f64>>,
    sampling_rate: f64,
    arrival_s: f64,
}

impl SampleChunk {
    pub fn new(channels: Vec<Vec<f64>>, sampling_rate: f64, arrival_s: f64) -> Self {
        Self {
            channels,
            sampling_rate,
            arrival_s,
        }
    }

    /// Chunk carrying no samples; the normal "nothing yet" poll result.
    pub fn empty(channel_count: usize, sampling_rate: f64, arrival_s: f64) -> Self {
        Self::new(vec![Vec::new(); channel_count], sampling_rate, arrival_s)
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn arrival_s(&self) -> f64 {
        self.arrival_s
    }

    /// Timestamp of sample `index`, counted back from the arrival time.
    pub fn sample_time(&self, index: usize) -> f64 {
        let newest = self.len().saturating_sub(1);
        self.arrival_s - newest.saturating_sub(index) as f64 / self.sampling_rate
    }

    /// Append another chunk's samples; arrival moves to the newer chunk.
    pub fn extend(&mut self, other: SampleChunk) {
        if self.channels.is_empty() {
            *self = other;
            return;
        }
        for (dst, src) in self.channels.iter_mut().zip(other.channels) {
            dst.extend(src);
        }
        self.arrival_s = other.arrival_s;
    }

    /// Split at sample `at`: `self` keeps the older samples and the newer
    /// ones are returned with the original arrival time.
    pub fn split_off(&mut self, at: usize) -> SampleChunk {
        let at = at.min(self.len());
        let moved = self.len() - at;
        let newer = self
            .channels
            .iter_mut()
            .map(|channel| channel.split_off(at.min(channel.len())))
            .collect();
        let arrival_s = self.arrival_s;
        self.arrival_s -= moved as f64 / self.sampling_rate;
        SampleChunk::new(newer, self.sampling_rate, arrival_s)
    }
}

/// Source of sample chunks.
///
/// Sampling rate and channel count are read once after `start` and treated
/// as fixed for the session.
pub trait AcquisitionSession: Send {
    fn prepare(&mut self) -> Result<(), AcquisitionError>;

    fn start(&mut self, buffer_hint: usize) -> Result<(), AcquisitionError>;

    fn sampling_rate(&self) -> f64;

    fn channel_count(&self) -> usize;

    /// Return up to `max_samples` per channel. An empty chunk is not an error.
    fn poll_chunk(&mut self, max_samples: usize) -> Result<SampleChunk, AcquisitionError>;

    fn stop(&mut self) -> Result<(), AcquisitionError>;

    fn release(&mut self);

    /// Finite sources report true once every sample has been delivered.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Owns a session and guarantees `stop` + `release` on drop.
///
/// The worker holds one of these for the whole loop so cleanup runs on the
/// normal exit path, on error returns, and on unwinding.
pub struct SessionGuard {
    session: Box<dyn AcquisitionSession>,
    started: bool,
}

impl SessionGuard {
    /// Prepare and start the session. On failure the session is still released.
    pub fn open(
        session: Box<dyn AcquisitionSession>,
        buffer_hint: usize,
    ) -> Result<Self, AcquisitionError> {
        let mut guard = Self {
            session,
            started: false,
        };
        guard.session.prepare()?;
        guard.session.start(buffer_hint)?;
        guard.started = true;
        tracing::info!(
            "[SessionGuard] Session started: fs={} Hz, channels={}",
            guard.session.sampling_rate(),
            guard.session.channel_count()
        );
        Ok(guard)
    }

    pub fn session(&mut self) -> &mut dyn AcquisitionSession {
        self.session.as_mut()
    }

    pub fn sampling_rate(&self) -> f64 {
        self.session.sampling_rate()
    }

    pub fn channel_count(&self) -> usize {
        self.session.channel_count()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.started {
            if let Err(err) = self.session.stop() {
                log_acquisition_error(&err, "SessionGuard::drop");
            }
        }
        self.session.release();
        tracing::info!("[SessionGuard] Session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_time_counts_back_from_arrival() {
        let chunk = SampleChunk::new(vec![vec![0.0; 5], vec![0.0; 5]], 100.0, 2.0);
        assert_eq!(chunk.len(), 5);
        assert!((chunk.sample_time(4) - 2.0).abs() < 1e-12);
        assert!((chunk.sample_time(0) - 1.96).abs() < 1e-12);
    }

    #[test]
    fn test_extend_keeps_newest_arrival() {
        let mut a = SampleChunk::new(vec![vec![1.0], vec![2.0]], 10.0, 0.1);
        a.extend(SampleChunk::new(vec![vec![3.0], vec![4.0]], 10.0, 0.2));
        assert_eq!(a.channel(0), Some(&[1.0, 3.0][..]));
        assert_eq!(a.arrival_s(), 0.2);
    }

    #[test]
    fn test_split_off_moves_arrival_back() {
        let mut older = SampleChunk::new(vec![vec![1.0, 2.0, 3.0, 4.0]; 2], 10.0, 1.0);
        let newer = older.split_off(1);
        assert_eq!(older.channel(1), Some(&[1.0][..]));
        assert_eq!(newer.channel(0), Some(&[2.0, 3.0, 4.0][..]));
        assert_eq!(newer.arrival_s(), 1.0);
        assert!((older.arrival_s() - 0.7).abs() < 1e-12);
        assert!((older.sample_time(0) - newer.sample_time(0) + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (session, log) = ScriptedSession::new(250.0, 2);
        {
            let guard = SessionGuard::open(Box::new(session), 1024).unwrap();
            assert_eq!(guard.channel_count(), 2);
        }
        let log = log.lock().unwrap();
        assert!(log.started && log.stopped && log.released);
    }

    #[test]
    fn test_guard_releases_when_start_fails() {
        let (mut session, log) = ScriptedSession::new(250.0, 2);
        session.fail_start = true;
        let result = SessionGuard::open(Box::new(session), 1024);
        assert!(matches!(result, Err(AcquisitionError::StartFailed { .. })));
        let log = log.lock().unwrap();
        assert!(log.prepared);
        assert!(!log.stopped);
        assert!(log.released);
    }
}
