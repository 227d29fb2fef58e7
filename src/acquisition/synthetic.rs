//! Deterministic synthetic EEG-like source.
//!
//! Produces seeded Gaussian-ish background noise on every channel, optional
//! mains hum, blink-shaped bumps on the blink channels and an alpha rhythm
//! whose amplitude toggles between "eyes open" and "eyes closed" halves of a
//! cycle. All timing is derived from the sample counter, so two sessions with
//! the same spec produce identical chunks.

use super::{AcquisitionSession, SampleChunk};
use crate::error::AcquisitionError;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Instant;

/// Declarative description of a synthetic subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSpec {
    pub sampling_rate: f64,
    pub channel_count: usize,
    pub seed: u64,
    /// Peak amplitude of uniform background noise (µV)
    pub noise_uv: f64,
    /// Amplitude of mains interference (µV); 0 disables it
    pub mains_uv: f64,
    pub mains_hz: f64,
    pub blink_channels: [usize; 2],
    pub blink_amplitude_uv: f64,
    pub blink_duration_seconds: f64,
    /// Period between blinks; 0 disables blinks
    pub blink_interval_seconds: f64,
    /// Time of the first blink
    pub blink_offset_seconds: f64,
    pub alpha_channels: [usize; 2],
    pub alpha_hz: f64,
    pub alpha_open_uv: f64,
    pub alpha_closed_uv: f64,
    /// Full open+closed cycle; the second half is "eyes closed"; 0 disables
    pub alpha_cycle_seconds: f64,
    /// Stop after this many seconds; None streams forever
    pub duration_seconds: Option<f64>,
    /// Pace output against the wall clock instead of returning full chunks
    pub realtime: bool,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            sampling_rate: 250.0,
            channel_count: 8,
            seed: 0x5EED_B11C,
            noise_uv: 10.0,
            mains_uv: 0.0,
            mains_hz: 50.0,
            blink_channels: [0, 1],
            blink_amplitude_uv: 400.0,
            blink_duration_seconds: 0.2,
            blink_interval_seconds: 3.0,
            blink_offset_seconds: 4.5,
            alpha_channels: [6, 7],
            alpha_hz: 10.0,
            alpha_open_uv: 5.0,
            alpha_closed_uv: 30.0,
            alpha_cycle_seconds: 0.0,
            duration_seconds: None,
            realtime: false,
        }
    }
}

impl SyntheticSpec {
    /// Whether `t` falls inside the eyes-closed half of the alpha cycle
    pub fn eyes_closed_at(&self, t: f64) -> bool {
        if self.alpha_cycle_seconds <= 0.0 {
            return false;
        }
        (t % self.alpha_cycle_seconds) >= self.alpha_cycle_seconds / 2.0
    }

    /// Start times of every blink before `until`
    pub fn blink_times(&self, until: f64) -> Vec<f64> {
        let mut times = Vec::new();
        if self.blink_interval_seconds <= 0.0 {
            return times;
        }
        let mut t = self.blink_offset_seconds;
        while t < until {
            times.push(t);
            t += self.blink_interval_seconds;
        }
        times
    }

    fn blink_value(&self, t: f64) -> f64 {
        if self.blink_interval_seconds <= 0.0 || t < self.blink_offset_seconds {
            return 0.0;
        }
        let phase = (t - self.blink_offset_seconds) % self.blink_interval_seconds;
        if phase < self.blink_duration_seconds {
            self.blink_amplitude_uv * (PI * phase / self.blink_duration_seconds).sin()
        } else {
            0.0
        }
    }
}

pub struct SyntheticSession {
    spec: SyntheticSpec,
    rng: StdRng,
    emitted: u64,
    started_at: Option<Instant>,
}

impl SyntheticSession {
    pub fn new(spec: SyntheticSpec) -> Self {
        let rng = StdRng::seed_from_u64(spec.seed);
        Self {
            spec,
            rng,
            emitted: 0,
            started_at: None,
        }
    }

    pub fn spec(&self) -> &SyntheticSpec {
        &self.spec
    }

    fn total_samples(&self) -> Option<u64> {
        self.spec
            .duration_seconds
            .map(|d| (d * self.spec.sampling_rate).round() as u64)
    }

    fn samples_due(&self, max_samples: usize) -> usize {
        let mut due = max_samples as u64;
        if self.spec.realtime {
            if let Some(started) = self.started_at {
                let target = (started.elapsed().as_secs_f64() * self.spec.sampling_rate) as u64;
                due = due.min(target.saturating_sub(self.emitted));
            }
        }
        if let Some(total) = self.total_samples() {
            due = due.min(total.saturating_sub(self.emitted));
        }
        due as usize
    }

    fn next_value(&mut self, channel: usize, t: f64) -> f64 {
        let spec = &self.spec;
        let mut value = if spec.noise_uv > 0.0 {
            // Sum of uniforms approximates a bell-shaped background.
            let mut acc = 0.0;
            for _ in 0..3 {
                acc += self.rng.gen_range(-spec.noise_uv..spec.noise_uv);
            }
            acc / 3.0
        } else {
            0.0
        };
        if spec.mains_uv > 0.0 {
            value += spec.mains_uv * (2.0 * PI * spec.mains_hz * t).sin();
        }
        if spec.blink_channels.contains(&channel) {
            value += spec.blink_value(t);
        }
        if spec.alpha_cycle_seconds > 0.0 && spec.alpha_channels.contains(&channel) {
            let amplitude = if spec.eyes_closed_at(t) {
                spec.alpha_closed_uv
            } else {
                spec.alpha_open_uv
            };
            value += amplitude * (2.0 * PI * spec.alpha_hz * t).sin();
        }
        value
    }
}

impl AcquisitionSession for SyntheticSession {
    fn prepare(&mut self) -> Result<(), AcquisitionError> {
        if self.spec.sampling_rate <= 0.0 || self.spec.channel_count == 0 {
            return Err(AcquisitionError::PrepareFailed {
                reason: format!(
                    "synthetic spec needs fs > 0 and channels > 0 (fs={}, channels={})",
                    self.spec.sampling_rate, self.spec.channel_count
                ),
            });
        }
        Ok(())
    }

    fn start(&mut self, _buffer_hint: usize) -> Result<(), AcquisitionError> {
        self.started_at = Some(Instant::now());
        self.emitted = 0;
        self.rng = StdRng::seed_from_u64(self.spec.seed);
        Ok(())
    }

    fn sampling_rate(&self) -> f64 {
        self.spec.sampling_rate
    }

    fn channel_count(&self) -> usize {
        self.spec.channel_count
    }

    fn poll_chunk(&mut self, max_samples: usize) -> Result<SampleChunk, AcquisitionError> {
        let fs = self.spec.sampling_rate;
        let n = self.samples_due(max_samples);
        let mut channels = vec![Vec::with_capacity(n); self.spec.channel_count];
        for i in 0..n {
            let t = (self.emitted + i as u64) as f64 / fs;
            for (ch, data) in channels.iter_mut().enumerate() {
                data.push(self.next_value(ch, t));
            }
        }
        self.emitted += n as u64;
        let arrival = (self.emitted as f64 - 1.0) / fs;
        Ok(SampleChunk::new(channels, fs, arrival))
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        self.started_at = None;
        Ok(())
    }

    fn release(&mut self) {}

    fn is_exhausted(&self) -> bool {
        self.total_samples()
            .is_some_and(|total| self.emitted >= total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_spec() -> SyntheticSpec {
        SyntheticSpec {
            noise_uv: 0.0,
            duration_seconds: Some(10.0),
            ..SyntheticSpec::default()
        }
    }

    #[test]
    fn test_same_seed_same_chunks() {
        let mut a = SyntheticSession::new(SyntheticSpec::default());
        let mut b = SyntheticSession::new(SyntheticSpec::default());
        a.start(0).unwrap();
        b.start(0).unwrap();
        assert_eq!(a.poll_chunk(64).unwrap(), b.poll_chunk(64).unwrap());
    }

    #[test]
    fn test_blink_appears_only_on_blink_channels() {
        let spec = quiet_spec();
        let mut session = SyntheticSession::new(spec.clone());
        session.start(0).unwrap();
        let chunk = session.poll_chunk(2500).unwrap();
        let blink_idx = ((spec.blink_offset_seconds + 0.1) * spec.sampling_rate) as usize;
        assert!(chunk.channel(0).unwrap()[blink_idx] > 300.0);
        assert!(chunk.channel(1).unwrap()[blink_idx] > 300.0);
        assert_eq!(chunk.channel(2).unwrap()[blink_idx], 0.0);
    }

    #[test]
    fn test_finite_session_exhausts() {
        let mut session = SyntheticSession::new(quiet_spec());
        session.start(0).unwrap();
        let mut total = 0;
        while !session.is_exhausted() {
            total += session.poll_chunk(300).unwrap().len();
        }
        assert_eq!(total, 2500);
        assert!(session.poll_chunk(300).unwrap().is_empty());
    }

    #[test]
    fn test_arrival_is_time_of_newest_sample() {
        let mut session = SyntheticSession::new(quiet_spec());
        session.start(0).unwrap();
        let chunk = session.poll_chunk(250).unwrap();
        assert!((chunk.arrival_s() - 249.0 / 250.0).abs() < 1e-12);
        assert!(chunk.sample_time(0).abs() < 1e-12);
    }

    #[test]
    fn test_eyes_closed_half_cycle() {
        let spec = SyntheticSpec {
            alpha_cycle_seconds: 10.0,
            ..SyntheticSpec::default()
        };
        assert!(!spec.eyes_closed_at(2.0));
        assert!(spec.eyes_closed_at(7.0));
        assert!(!spec.eyes_closed_at(12.0));
    }
}
