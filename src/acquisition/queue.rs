//! Lock-free chunk hand-off from a producer thread to the detection worker.
//!
//! Device drivers usually deliver samples on their own callback thread. The
//! producer side pushes chunks into an `rtrb` ring; [`QueueSession`] exposes
//! the consumer side as an ordinary [`AcquisitionSession`] so the worker can
//! poll it like any other source.

use super::{AcquisitionSession, SampleChunk, SessionGuard};
use crate::error::{log_acquisition_error, AcquisitionError};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Create a bounded queue of `capacity` chunks for a session of known shape.
pub fn chunk_queue(
    capacity: usize,
    sampling_rate: f64,
    channel_count: usize,
) -> (ChunkProducer, QueueSession) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ChunkProducer {
            producer,
            dropped: Arc::clone(&dropped),
        },
        QueueSession {
            consumer,
            sampling_rate,
            channel_count,
            dropped,
            last_arrival: 0.0,
        },
    )
}

/// Producer half; owned by the thread that reads the device.
pub struct ChunkProducer {
    producer: Producer<SampleChunk>,
    dropped: Arc<AtomicU64>,
}

impl ChunkProducer {
    /// Push a chunk. When the ring is full the chunk is dropped and counted.
    pub fn push(&mut self, chunk: SampleChunk) -> bool {
        match self.producer.push(chunk) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// True once the consumer side has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }

    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half presented as a session.
pub struct QueueSession {
    consumer: Consumer<SampleChunk>,
    sampling_rate: f64,
    channel_count: usize,
    dropped: Arc<AtomicU64>,
    last_arrival: f64,
}

impl QueueSession {
    /// Chunks discarded because the ring was full
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Chunks waiting to be polled
    pub fn pending(&self) -> usize {
        self.consumer.slots()
    }
}

impl AcquisitionSession for QueueSession {
    fn prepare(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }

    fn start(&mut self, _buffer_hint: usize) -> Result<(), AcquisitionError> {
        Ok(())
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Concatenates queued chunks until `max_samples` is reached.
    fn poll_chunk(&mut self, max_samples: usize) -> Result<SampleChunk, AcquisitionError> {
        let mut merged = SampleChunk::empty(self.channel_count, self.sampling_rate, self.last_arrival);
        while merged.len() < max_samples.max(1) {
            match self.consumer.pop() {
                Ok(chunk) => {
                    if chunk.channel_count() != self.channel_count {
                        return Err(AcquisitionError::StreamFailure {
                            reason: format!(
                                "queued chunk has {} channels, session has {}",
                                chunk.channel_count(),
                                self.channel_count
                            ),
                        });
                    }
                    merged.extend(chunk);
                }
                Err(_) => break,
            }
        }
        self.last_arrival = merged.arrival_s();
        Ok(merged)
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }

    fn release(&mut self) {
        let dropped = self.dropped_chunks();
        if dropped > 0 {
            tracing::warn!("[QueueSession] {} chunks dropped on full queue", dropped);
        }
    }

    fn is_exhausted(&self) -> bool {
        self.consumer.is_abandoned() && self.consumer.is_empty()
    }
}

/// Handle to a feeder thread pumping a source into a [`ChunkProducer`].
pub struct FeederHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FeederHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for FeederHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pump `source` into `producer`, one chunk of `chunk_samples` every `pace`.
///
/// The thread ends when the source is exhausted, the consumer goes away or
/// [`FeederHandle::stop`] is called. Dropping the producer at the end marks
/// the queue session as exhausted.
pub fn spawn_feeder(
    source: Box<dyn AcquisitionSession>,
    mut producer: ChunkProducer,
    chunk_samples: usize,
    pace: Duration,
) -> FeederHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let thread = std::thread::spawn(move || {
        let mut guard = match SessionGuard::open(source, chunk_samples) {
            Ok(guard) => guard,
            Err(err) => {
                log_acquisition_error(&err, "spawn_feeder");
                flag.store(false, Ordering::SeqCst);
                return;
            }
        };
        while flag.load(Ordering::SeqCst) && !producer.is_abandoned() {
            if guard.session().is_exhausted() {
                break;
            }
            match guard.session().poll_chunk(chunk_samples) {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    producer.push(chunk);
                }
                Err(err) => {
                    log_acquisition_error(&err, "spawn_feeder");
                    break;
                }
            }
            std::thread::sleep(pace);
        }
        flag.store(false, Ordering::SeqCst);
        tracing::debug!("[Feeder] Source drained, closing queue");
    });
    FeederHandle {
        running,
        thread: Some(thread),
    }
}
