// Calibration module - deriving detection thresholds from the subject
//
// Three workflows share the same arithmetic in `procedure`:
// 1. CalibrationController: timed quiet/event phases driven by sample time
// 2. Manual marks: the caller labels recent peaks as noise or event
// 3. BandCalibration: eyes-open / eyes-closed reference for band power
//
// ChannelRanker is an optional step before these: it proposes the blink and
// alpha channel pairs from raw captures.
//
// A failed calibration never touches the active threshold.

pub mod band;
pub mod channels;
pub mod controller;
pub mod procedure;
pub mod progress;

pub use band::{BandCalibration, BandCalibrationResult};
pub use channels::{ChannelProposal, ChannelRanker, ChannelScore};
pub use controller::CalibrationController;
pub use procedure::{
    statistical_onset, CalibrationProcedure, CalibrationResult, CalibrationSample, SampleLabel,
};
pub use progress::{BandCapture, CalibrationPhase, CalibrationProgress};
