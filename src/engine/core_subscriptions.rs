use futures::Stream;
use tokio::runtime::Builder;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::EngineHandle;
use crate::calibration::CalibrationProgress;
use crate::events::IntentEvent;
use crate::telemetry::MetricEvent;

/// Forward a broadcast receiver into an unbounded channel on a helper thread
/// with its own runtime, so callers need no Tokio context.
fn forward<T: Clone + Send + 'static>(
    mut broadcast_rx: broadcast::Receiver<T>,
) -> mpsc::UnboundedReceiver<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let rt = match Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                tracing::error!("[EngineHandle] Failed to create Tokio runtime: {}", err);
                return;
            }
        };
        rt.block_on(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(item) => {
                        if tx.send(item).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("[EngineHandle] Subscriber lagged, {} items skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    });
    rx
}

impl EngineHandle {
    // ========================================================================
    // STREAM SUBSCRIPTIONS
    // ========================================================================

    pub fn subscribe_events_unbounded(&self) -> mpsc::UnboundedReceiver<IntentEvent> {
        forward(self.subscribe_events())
    }

    pub fn subscribe_calibration_unbounded(&self) -> mpsc::UnboundedReceiver<CalibrationProgress> {
        forward(self.subscribe_calibration())
    }

    pub fn subscribe_telemetry_unbounded(&self) -> mpsc::UnboundedReceiver<MetricEvent> {
        forward(self.subscribe_telemetry())
    }

    // ========================================================================
    // ASYNC STREAM ADAPTERS
    // ========================================================================

    pub fn event_stream(&self) -> impl Stream<Item = IntentEvent> + Unpin {
        UnboundedReceiverStream::new(self.subscribe_events_unbounded())
    }

    pub fn calibration_stream(&self) -> impl Stream<Item = CalibrationProgress> + Unpin {
        UnboundedReceiverStream::new(self.subscribe_calibration_unbounded())
    }

    pub fn telemetry_stream(&self) -> impl Stream<Item = MetricEvent> + Unpin {
        UnboundedReceiverStream::new(self.subscribe_telemetry_unbounded())
    }
}
