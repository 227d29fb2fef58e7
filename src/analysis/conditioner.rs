// Conditioner module - channel combination and filtering
//
// Each chunk's two selected channels are folded into one derived waveform,
// appended to a rolling raw window, and the whole window is filtered with
// zero phase. Only the samples that belong to the newest chunk are returned,
// so output stays aligned sample-for-sample with the input chunk.

use std::collections::VecDeque;

use super::filters::ZeroPhaseFilter;
use super::stats::median;
use crate::acquisition::SampleChunk;
use crate::config::{CombinationMode, ConditioningConfig};
use crate::error::{AcquisitionError, ConfigError};

/// Conditioned output for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedChunk {
    pub filtered: Vec<f64>,
    /// |filtered|, sample-aligned
    pub magnitude: Vec<f64>,
    /// Window too short to filter; `filtered` is the raw combined signal
    pub degraded: bool,
}

impl ConditionedChunk {
    fn from_signal(filtered: Vec<f64>, degraded: bool) -> Self {
        let magnitude = filtered.iter().map(|v| v.abs()).collect();
        Self {
            filtered,
            magnitude,
            degraded,
        }
    }

    pub fn len(&self) -> usize {
        self.filtered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filtered.is_empty()
    }
}

/// Fold two channels into one according to `mode`
pub fn combine_channels(a: &[f64], b: &[f64], mode: CombinationMode) -> Vec<f64> {
    match mode {
        CombinationMode::Average => a.iter().zip(b).map(|(x, y)| 0.5 * (x + y)).collect(),
        CombinationMode::Difference => a.iter().zip(b).map(|(x, y)| x - y).collect(),
    }
}

pub struct SignalConditioner {
    channels: [usize; 2],
    mode: CombinationMode,
    notch: Option<ZeroPhaseFilter>,
    bandpass: Option<ZeroPhaseFilter>,
    window: VecDeque<f64>,
    window_capacity: usize,
    min_filter_samples: usize,
    remove_median: bool,
}

impl SignalConditioner {
    /// Design filters for the session. Channel indices are checked here,
    /// before any chunk is processed.
    pub fn new(
        config: &ConditioningConfig,
        sampling_rate: f64,
        channel_count: usize,
    ) -> Result<Self, ConfigError> {
        for &index in &config.channels {
            if index >= channel_count {
                return Err(ConfigError::InvalidChannel {
                    index,
                    channel_count,
                });
            }
        }

        let notch = config
            .notch_enabled
            .then(|| ZeroPhaseFilter::notch(sampling_rate, config.notch_hz, config.notch_q));
        let bandpass = config.bandpass_enabled.then(|| {
            ZeroPhaseFilter::bandpass(
                sampling_rate,
                config.bandpass_low_hz,
                config.bandpass_high_hz,
            )
        });

        let filter_floor = notch
            .iter()
            .chain(bandpass.iter())
            .map(ZeroPhaseFilter::min_len)
            .max()
            .unwrap_or(0);
        let window_capacity = ((config.filter_window_seconds * sampling_rate) as usize).max(1);

        Ok(Self {
            channels: config.channels,
            mode: config.mode,
            notch,
            bandpass,
            window: VecDeque::with_capacity(window_capacity),
            window_capacity,
            min_filter_samples: config.min_filter_samples.max(filter_floor),
            remove_median: config.remove_median,
        })
    }

    pub fn filters_enabled(&self) -> bool {
        self.notch.is_some() || self.bandpass.is_some()
    }

    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Derived waveform for a chunk, without filtering
    pub fn combine(&self, chunk: &SampleChunk) -> Result<Vec<f64>, AcquisitionError> {
        let lookup = |index: usize| {
            chunk
                .channel(index)
                .ok_or_else(|| AcquisitionError::StreamFailure {
                    reason: format!(
                        "chunk has {} channels, channel {} selected",
                        chunk.channel_count(),
                        index
                    ),
                })
        };
        let a = lookup(self.channels[0])?;
        let b = lookup(self.channels[1])?;
        Ok(combine_channels(a, b, self.mode))
    }

    /// Filter `combined` (the newest samples) against the buffered window.
    pub fn condition(&mut self, combined: &[f64]) -> ConditionedChunk {
        let n = combined.len();
        if n == 0 {
            return ConditionedChunk::from_signal(Vec::new(), false);
        }

        for &v in combined {
            if self.window.len() == self.window_capacity {
                self.window.pop_front();
            }
            self.window.push_back(v);
        }

        if !self.filters_enabled() {
            return ConditionedChunk::from_signal(combined.to_vec(), false);
        }
        let window: Vec<f64> = self.window.iter().copied().collect();
        let Some(signal) = self.filter_signal(&window) else {
            return ConditionedChunk::from_signal(combined.to_vec(), true);
        };

        // A chunk larger than the window only gets its newest samples filtered.
        let tail = signal.len().min(n);
        let mut filtered = combined[..n - tail].to_vec();
        filtered.extend_from_slice(&signal[signal.len() - tail..]);
        ConditionedChunk::from_signal(filtered, tail < n)
    }

    /// Zero-phase filter a whole signal (median removal first when enabled).
    /// `None` when the signal is too short to filter.
    pub fn filter_signal(&self, signal: &[f64]) -> Option<Vec<f64>> {
        if self.filters_enabled() && signal.len() < self.min_filter_samples {
            return None;
        }
        let mut out = signal.to_vec();
        if self.remove_median {
            let center = median(&out);
            out.iter_mut().for_each(|v| *v -= center);
        }
        for filter in self.notch.iter().chain(self.bandpass.iter()) {
            out = filter.filtfilt(&out)?;
        }
        Some(out)
    }

    /// Combine and condition in one step
    pub fn process(&mut self, chunk: &SampleChunk) -> Result<ConditionedChunk, AcquisitionError> {
        let combined = self.combine(chunk)?;
        Ok(self.condition(&combined))
    }
}
