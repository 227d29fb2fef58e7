// Filters module - zero-phase IIR filtering
//
// Coefficients are designed once from the sampling rate and cutoffs and stay
// fixed for the session. Filtering runs the cascade forward and then backward
// over an odd-extended window, which cancels the phase response so transient
// shapes keep their timing.

use std::f64::consts::PI;

/// Butterworth Q values for the two sections of a 4th-order stage
const BUTTERWORTH_Q4: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_6];

/// Normalized second-order section (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Biquad {
    fn normalized(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            b: [b[0] / a0, b[1] / a0, b[2] / a0],
            a: [1.0, a[1] / a0, a[2] / a0],
        }
    }

    /// RBJ low-pass section
    pub fn lowpass(sampling_rate: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sampling_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalized(
            [(1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    /// RBJ high-pass section
    pub fn highpass(sampling_rate: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sampling_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalized(
            [(1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    /// RBJ notch section; higher `q` gives a narrower stop band
    pub fn notch(sampling_rate: f64, center: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * center / sampling_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalized([1.0, -2.0 * cos, 1.0], [1.0 + alpha, -2.0 * cos, 1.0 - alpha])
    }

    /// Gain at DC
    pub fn dc_gain(&self) -> f64 {
        let den = self.a.iter().sum::<f64>();
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            self.b.iter().sum::<f64>() / den
        }
    }

    /// Transposed direct-form II state that a unit step would settle to
    fn steady_state(&self) -> [f64; 2] {
        let g = self.dc_gain();
        let z2 = self.b[2] - self.a[2] * g;
        let z1 = self.b[1] - self.a[1] * g + z2;
        [z1, z2]
    }

    #[inline]
    fn step(&self, x: f64, z: &mut [f64; 2]) -> f64 {
        let y = self.b[0] * x + z[0];
        z[0] = self.b[1] * x - self.a[1] * y + z[1];
        z[1] = self.b[2] * x - self.a[2] * y;
        y
    }
}

/// Cascade of second-order sections applied with zero phase
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroPhaseFilter {
    sections: Vec<Biquad>,
}

impl ZeroPhaseFilter {
    pub fn new(sections: Vec<Biquad>) -> Self {
        Self { sections }
    }

    /// Mains rejection at `center` Hz
    pub fn notch(sampling_rate: f64, center: f64, q: f64) -> Self {
        Self::new(vec![Biquad::notch(sampling_rate, center, q)])
    }

    /// 4th-order Butterworth high-pass followed by 4th-order Butterworth low-pass
    pub fn bandpass(sampling_rate: f64, low: f64, high: f64) -> Self {
        let mut sections = Vec::with_capacity(4);
        for q in BUTTERWORTH_Q4 {
            sections.push(Biquad::highpass(sampling_rate, low, q));
        }
        for q in BUTTERWORTH_Q4 {
            sections.push(Biquad::lowpass(sampling_rate, high, q));
        }
        Self::new(sections)
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Samples of odd extension added at each end
    pub fn padlen(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Shortest window that can be filtered
    pub fn min_len(&self) -> usize {
        self.padlen() + 1
    }

    /// One causal pass, initial state scaled to the first sample
    fn pass(&self, signal: &mut [f64]) {
        let Some(&first) = signal.first() else {
            return;
        };
        let mut level = first;
        for section in &self.sections {
            let zi = section.steady_state();
            let mut z = [zi[0] * level, zi[1] * level];
            for x in signal.iter_mut() {
                *x = section.step(*x, &mut z);
            }
            level *= section.dc_gain();
        }
    }

    /// Forward-backward filtering. Returns `None` when the window is too short.
    pub fn filtfilt(&self, signal: &[f64]) -> Option<Vec<f64>> {
        let n = signal.len();
        if self.sections.is_empty() {
            return Some(signal.to_vec());
        }
        if n < self.min_len() {
            return None;
        }
        let pad = self.padlen().min(n - 1);
        let first = signal[0];
        let last = signal[n - 1];

        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

        self.pass(&mut ext);
        ext.reverse();
        self.pass(&mut ext);
        ext.reverse();

        Some(ext[pad..pad + n].to_vec())
    }
}
