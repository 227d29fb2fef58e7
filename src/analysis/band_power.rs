// Band-power module - slow binary states from spectral power
//
// Power in a fixed band is estimated with Welch's method (Hann segments, 50%
// overlap, per-segment mean removal, one-sided density) and integrated with
// the trapezoid rule. The detector runs the same two-state pattern as the
// time-domain threshold, but onset and exit are multiplicative factors on a
// reference power:
//
//   enter when power > reference * up_factor
//   leave when power < reference * down_factor
//
// The reference is either a calibrated value or the median of recent power
// estimates. The running reference is frozen while Active so a long state
// does not pull it upward.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::conditioner::combine_channels;
use super::stats::median;
use super::threshold::DetectionState;
use crate::acquisition::SampleChunk;
use crate::config::BandPowerConfig;
use crate::error::{AcquisitionError, ConfigError};

/// Welch band-power estimator with cached FFT plans
pub struct BandPowerEstimator {
    sampling_rate: f64,
    max_segment_len: usize,
    planner: FftPlanner<f64>,
    plan: Option<(usize, Arc<dyn Fft<f64>>, Vec<f64>)>,
}

impl BandPowerEstimator {
    pub fn new(sampling_rate: f64, max_segment_len: usize) -> Self {
        Self {
            sampling_rate,
            max_segment_len: max_segment_len.max(8),
            planner: FftPlanner::new(),
            plan: None,
        }
    }

    fn plan_for(&mut self, len: usize) -> (Arc<dyn Fft<f64>>, Vec<f64>) {
        if let Some((cached, fft, window)) = &self.plan {
            if *cached == len {
                return (Arc::clone(fft), window.clone());
            }
        }
        let fft = self.planner.plan_fft_forward(len);
        // Periodic Hann
        let window: Vec<f64> = (0..len)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / len as f64).cos()))
            .collect();
        self.plan = Some((len, Arc::clone(&fft), window.clone()));
        (fft, window)
    }

    /// One-sided power spectral density; returns (frequencies, psd)
    pub fn welch(&mut self, signal: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let nperseg = signal.len().min(self.max_segment_len);
        if nperseg < 2 {
            return (Vec::new(), Vec::new());
        }
        let (fft, window) = self.plan_for(nperseg);
        let step = (nperseg / 2).max(1);
        let bins = nperseg / 2 + 1;
        let win_energy: f64 = window.iter().map(|w| w * w).sum();
        let scale = 1.0 / (self.sampling_rate * win_energy);

        let mut psd = vec![0.0; bins];
        let mut segments = 0usize;
        let mut buffer = vec![Complex::new(0.0, 0.0); nperseg];
        let mut start = 0;
        while start + nperseg <= signal.len() {
            let segment = &signal[start..start + nperseg];
            let mean = segment.iter().sum::<f64>() / nperseg as f64;
            for ((slot, &x), &w) in buffer.iter_mut().zip(segment).zip(&window) {
                *slot = Complex::new((x - mean) * w, 0.0);
            }
            fft.process(&mut buffer);
            for (k, acc) in psd.iter_mut().enumerate() {
                let mut p = buffer[k].norm_sqr() * scale;
                let nyquist_bin = nperseg % 2 == 0 && k == bins - 1;
                if k != 0 && !nyquist_bin {
                    p *= 2.0;
                }
                *acc += p;
            }
            segments += 1;
            start += step;
        }
        psd.iter_mut().for_each(|p| *p /= segments as f64);

        let df = self.sampling_rate / nperseg as f64;
        let freqs = (0..bins).map(|k| k as f64 * df).collect();
        (freqs, psd)
    }

    /// Integrated power between `low` and `high` Hz (inclusive bins)
    pub fn band_power(&mut self, signal: &[f64], low: f64, high: f64) -> f64 {
        let (freqs, psd) = self.welch(signal);
        let points: Vec<(f64, f64)> = freqs
            .into_iter()
            .zip(psd)
            .filter(|(f, _)| *f >= low && *f <= high)
            .collect();
        points
            .windows(2)
            .map(|pair| 0.5 * (pair[0].1 + pair[1].1) * (pair[1].0 - pair[0].0))
            .sum()
    }
}

/// Transition reported by [`BandPowerDetector`]
#[derive(Debug, Clone, PartialEq)]
pub enum BandTransition {
    Entered {
        timestamp_s: f64,
        power: f64,
        reference: f64,
    },
    Exited {
        timestamp_s: f64,
        power: f64,
        reference: f64,
    },
}

pub struct BandPowerDetector {
    config: BandPowerConfig,
    estimator: BandPowerEstimator,
    window: VecDeque<f64>,
    window_capacity: usize,
    history: VecDeque<f64>,
    state: DetectionState,
    last_entry: Option<f64>,
    last_power: Option<f64>,
}

impl BandPowerDetector {
    pub fn new(
        config: BandPowerConfig,
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
        let window_capacity = ((config.window_seconds * sampling_rate) as usize).max(2);
        Ok(Self {
            estimator: BandPowerEstimator::new(sampling_rate, config.max_segment_len),
            window: VecDeque::with_capacity(window_capacity),
            window_capacity,
            history: VecDeque::with_capacity(config.baseline_windows),
            state: DetectionState::Quiescent,
            last_entry: None,
            last_power: None,
            config,
        })
    }

    pub fn state(&self) -> DetectionState {
        self.state
    }

    pub fn last_power(&self) -> Option<f64> {
        self.last_power
    }

    /// Install a calibrated reference, replacing the running median
    pub fn set_calibrated_baseline(&mut self, reference: Option<f64>) {
        self.config.calibrated_baseline = reference;
    }

    /// Reference power, or `None` while the running history is filling
    pub fn reference(&self) -> Option<f64> {
        if let Some(fixed) = self.config.calibrated_baseline {
            return Some(fixed);
        }
        if self.history.len() < self.config.baseline_windows {
            return None;
        }
        let values: Vec<f64> = self.history.iter().copied().collect();
        Some(median(&values))
    }

    /// Power over the current signal window, if it is full
    pub fn current_power(&mut self) -> Option<f64> {
        if self.window.len() < self.window_capacity {
            return None;
        }
        let signal: Vec<f64> = self.window.iter().copied().collect();
        Some(
            self.estimator
                .band_power(&signal, self.config.band_low_hz, self.config.band_high_hz),
        )
    }

    /// Append combined samples without evaluating
    pub fn push_samples(&mut self, samples: &[f64]) {
        for &v in samples {
            if self.window.len() == self.window_capacity {
                self.window.pop_front();
            }
            self.window.push_back(v);
        }
    }

    /// Append a chunk and evaluate once at the chunk's arrival time
    pub fn process(
        &mut self,
        chunk: &SampleChunk,
    ) -> Result<Option<BandTransition>, AcquisitionError> {
        let pick = |index: usize| {
            chunk
                .channel(index)
                .ok_or_else(|| AcquisitionError::StreamFailure {
                    reason: format!("band channel {} missing from chunk", index),
                })
        };
        let a = pick(self.config.channels[0])?;
        let b = pick(self.config.channels[1])?;
        if a.is_empty() {
            return Ok(None);
        }
        self.push_samples(&combine_channels(a, b, self.config.mode));
        Ok(self.evaluate(chunk.arrival_s()))
    }

    /// Estimate power over the buffered window and step the state machine
    pub fn evaluate(&mut self, t: f64) -> Option<BandTransition> {
        let power = self.current_power()?;
        self.last_power = Some(power);

        let transition = match self.reference() {
            None => None,
            Some(reference) => self.step(power, reference, t),
        };

        if self.state == DetectionState::Quiescent && self.config.calibrated_baseline.is_none() {
            if self.history.len() == self.config.baseline_windows {
                self.history.pop_front();
            }
            self.history.push_back(power);
        }
        transition
    }

    fn step(&mut self, power: f64, reference: f64, t: f64) -> Option<BandTransition> {
        match self.state {
            DetectionState::Quiescent => {
                let cooled = self
                    .last_entry
                    .map_or(true, |last| t - last >= self.config.cooldown_seconds);
                if power > reference * self.config.up_factor && cooled {
                    self.state = DetectionState::Active;
                    self.last_entry = Some(t);
                    return Some(BandTransition::Entered {
                        timestamp_s: t,
                        power,
                        reference,
                    });
                }
                None
            }
            DetectionState::Active => {
                if power < reference * self.config.down_factor {
                    self.state = DetectionState::Quiescent;
                    if self.config.emit_exit_events {
                        return Some(BandTransition::Exited {
                            timestamp_s: t,
                            power,
                            reference,
                        });
                    }
                }
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.history.clear();
        self.state = DetectionState::Quiescent;
        self.last_entry = None;
        self.last_power = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: f64 = 250.0;

    fn sine(freq: f64, amplitude: f64, n: usize, offset: usize) -> Vec<f64> {
        (offset..offset + n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / FS).sin())
            .collect()
    }

    #[test]
    fn test_band_power_of_sine_matches_variance() {
        let mut estimator = BandPowerEstimator::new(FS, 512);
        let signal = sine(10.0, 20.0, 1000, 0);
        let power = estimator.band_power(&signal, 8.0, 13.0);
        // A sine of amplitude A carries A^2 / 2 of power.
        assert!((power - 200.0).abs() / 200.0 < 0.1, "power {}", power);
    }

    #[test]
    fn test_out_of_band_power_is_small() {
        let mut estimator = BandPowerEstimator::new(FS, 512);
        let signal = sine(30.0, 20.0, 1000, 0);
        let power = estimator.band_power(&signal, 8.0, 13.0);
        assert!(power < 2.0, "power {}", power);
    }

    #[test]
    fn test_psd_bins_and_resolution() {
        let mut estimator = BandPowerEstimator::new(FS, 256);
        let (freqs, psd) = estimator.welch(&vec![0.0; 1000]);
        assert_eq!(freqs.len(), 129);
        assert!((freqs[1] - FS / 256.0).abs() < 1e-12);
        assert!(psd.iter().all(|p| *p == 0.0));
    }

    fn config() -> BandPowerConfig {
        BandPowerConfig {
            enabled: true,
            channels: [0, 1],
            window_seconds: 1.0,
            baseline_windows: 5,
            max_segment_len: 250,
            ..BandPowerConfig::default()
        }
    }

    fn feed(
        detector: &mut BandPowerDetector,
        amplitude: f64,
        seconds: usize,
        start: usize,
    ) -> Vec<BandTransition> {
        let mut out = Vec::new();
        for s in 0..seconds {
            let offset = start + s * FS as usize;
            detector.push_samples(&sine(10.0, amplitude, FS as usize, offset));
            if let Some(t) = detector.evaluate((offset as f64 + FS) / FS) {
                out.push(t);
            }
        }
        out
    }

    #[test]
    fn test_enter_and_exit_with_running_reference() {
        let mut detector = BandPowerDetector::new(config(), FS, 2).unwrap();
        assert!(feed(&mut detector, 5.0, 6, 0).is_empty());
        assert!(detector.reference().is_some());

        let entered = feed(&mut detector, 20.0, 3, 1500);
        assert_eq!(entered.len(), 1);
        assert!(matches!(entered[0], BandTransition::Entered { .. }));
        assert_eq!(detector.state(), DetectionState::Active);

        let exited = feed(&mut detector, 3.0, 2, 2250);
        assert_eq!(exited.len(), 1);
        assert!(matches!(exited[0], BandTransition::Exited { .. }));
        assert_eq!(detector.state(), DetectionState::Quiescent);
    }

    #[test]
    fn test_reference_frozen_while_active() {
        let mut detector = BandPowerDetector::new(config(), FS, 2).unwrap();
        feed(&mut detector, 5.0, 6, 0);
        let before = detector.reference().unwrap();
        feed(&mut detector, 20.0, 10, 1500);
        assert_eq!(detector.state(), DetectionState::Active);
        assert_eq!(detector.reference().unwrap(), before);
    }

    #[test]
    fn test_calibrated_reference_skips_warmup() {
        let mut cfg = config();
        cfg.calibrated_baseline = Some(50.0);
        cfg.emit_exit_events = false;
        let mut detector = BandPowerDetector::new(cfg, FS, 2).unwrap();
        let events = feed(&mut detector, 20.0, 1, 0);
        assert_eq!(events.len(), 1);
        let quiet = feed(&mut detector, 1.0, 2, 250);
        assert!(quiet.is_empty());
        assert_eq!(detector.state(), DetectionState::Quiescent);
    }

    #[test]
    fn test_invalid_band_channel() {
        let mut cfg = config();
        cfg.channels = [0, 5];
        assert!(matches!(
            BandPowerDetector::new(cfg, FS, 2),
            Err(ConfigError::InvalidChannel { index: 5, .. })
        ));
    }
}
