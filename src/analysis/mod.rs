// Analysis module - DSP pipeline for intent detection
//
// Architecture:
// - DetectionWorker: polling loop that pulls chunks from the acquisition
//   session and publishes results into the engine's shared state
// - DetectionPipeline: SignalConditioner -> BaselineWindow ->
//   ThresholdStateMachine, with the optional BandPowerDetector alongside
// - Output: IntentEvent to the pending queue and the broadcast channel

pub mod band_power;
pub mod baseline;
pub mod conditioner;
pub mod filters;
pub mod pipeline;
pub mod stats;
pub mod threshold;
pub mod worker;

pub use band_power::{BandPowerDetector, BandPowerEstimator, BandTransition};
pub use baseline::BaselineWindow;
pub use conditioner::{combine_channels, ConditionedChunk, SignalConditioner};
pub use filters::{Biquad, ZeroPhaseFilter};
pub use pipeline::{ChunkOutcome, DetectionPipeline, PipelineActivity};
pub use threshold::{Crossing, DetectionState, ThresholdStateMachine};
pub use worker::{spawn_detection_worker, DetectionWorker, WorkerChannels};
