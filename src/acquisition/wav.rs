//! Replay of recorded multi-channel captures stored as WAV.
//!
//! Each WAV channel maps to one electrode channel. Integer samples are
//! interpreted as raw counts and multiplied by `scale_uv`; float samples are
//! taken as microvolts times `scale_uv`.

use super::{AcquisitionSession, SampleChunk};
use crate::error::AcquisitionError;
use std::path::{Path, PathBuf};

pub struct WavSession {
    path: PathBuf,
    scale_uv: f64,
    channels: Vec<Vec<f64>>,
    sampling_rate: f64,
    cursor: usize,
}

impl WavSession {
    pub fn new<P: AsRef<Path>>(path: P, scale_uv: f64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            scale_uv,
            channels: Vec::new(),
            sampling_rate: 0.0,
            cursor: 0,
        }
    }

    fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

fn stream_err(path: &Path, err: impl std::fmt::Display) -> AcquisitionError {
    AcquisitionError::PrepareFailed {
        reason: format!("error reading {}: {err}", path.display()),
    }
}

fn read_wav(path: &Path, scale_uv: f64) -> Result<(Vec<Vec<f64>>, f64), AcquisitionError> {
    let mut reader = hound::WavReader::open(path).map_err(|err| stream_err(path, err))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(AcquisitionError::PrepareFailed {
            reason: format!("{} has zero channels", path.display()),
        });
    }

    let interleaved: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v as f64 * scale_uv).map_err(|e| stream_err(path, e)))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f64 * scale_uv).map_err(|e| stream_err(path, e)))
            .collect::<Result<_, _>>()?,
    };

    let count = spec.channels as usize;
    let mut channels = vec![Vec::with_capacity(interleaved.len() / count); count];
    for frame in interleaved.chunks_exact(count) {
        for (dst, &value) in channels.iter_mut().zip(frame) {
            dst.push(value);
        }
    }
    Ok((channels, spec.sample_rate as f64))
}

impl AcquisitionSession for WavSession {
    fn prepare(&mut self) -> Result<(), AcquisitionError> {
        let (channels, sampling_rate) = read_wav(&self.path, self.scale_uv)?;
        tracing::info!(
            "[WavSession] Loaded {} frames x {} channels at {} Hz from {}",
            channels.first().map_or(0, Vec::len),
            channels.len(),
            sampling_rate,
            self.path.display()
        );
        self.channels = channels;
        self.sampling_rate = sampling_rate;
        Ok(())
    }

    fn start(&mut self, _buffer_hint: usize) -> Result<(), AcquisitionError> {
        if self.channels.is_empty() {
            return Err(AcquisitionError::StartFailed {
                reason: "WAV session started before prepare".to_string(),
            });
        }
        self.cursor = 0;
        Ok(())
    }

    fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn poll_chunk(&mut self, max_samples: usize) -> Result<SampleChunk, AcquisitionError> {
        let end = (self.cursor + max_samples).min(self.frames());
        let data = self
            .channels
            .iter()
            .map(|ch| ch[self.cursor..end].to_vec())
            .collect();
        self.cursor = end;
        let arrival = (end as f64 - 1.0) / self.sampling_rate;
        Ok(SampleChunk::new(data, self.sampling_rate, arrival))
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }

    fn release(&mut self) {
        self.channels.clear();
        self.cursor = 0;
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.frames()
    }
}
