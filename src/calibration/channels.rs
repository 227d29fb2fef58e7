// ChannelRanker - proposing the blink and alpha channel pairs
//
// When the montage is not known in advance, calibration captures rank every
// channel and the two best form the proposed pair:
//
//   blink score = median|x| + 3 * std|x|        (x = filtered blink capture)
//   alpha score = P_band(closed) - P_band(open)
//
// Filtering reuses the conditioner's zero-phase filters and band power the
// Welch estimator of the band-power detector, so a proposal is scored the
// same way the detectors will later see the signal.

use serde::{Deserialize, Serialize};

use super::progress::BandCapture;
use crate::acquisition::SampleChunk;
use crate::analysis::stats::{median, std_dev};
use crate::analysis::{BandPowerEstimator, SignalConditioner};
use crate::config::AppConfig;
use crate::error::{CalibrationError, ConfigError};

const BLINK_STD_WEIGHT: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelScore {
    pub index: usize,
    pub score: f64,
}

/// Ranked channels and the pairs they propose, best channel first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProposal {
    pub blink: Option<[usize; 2]>,
    pub alpha: Option<[usize; 2]>,
    pub blink_scores: Vec<ChannelScore>,
    pub alpha_scores: Vec<ChannelScore>,
}

impl ChannelProposal {
    /// Install the proposed pairs in `config`. The result is validated
    /// against the session first; on error `config` is left as it was.
    pub fn apply_to(
        &self,
        config: &mut AppConfig,
        sampling_rate: f64,
        channel_count: usize,
    ) -> Result<(), ConfigError> {
        let mut next = config.clone();
        if let Some(pair) = self.blink {
            next.conditioning.channels = pair;
        }
        if let Some(pair) = self.alpha {
            next.band_power.channels = pair;
        }
        next.validate_for_session(sampling_rate, channel_count)?;
        *config = next;
        Ok(())
    }
}

pub struct ChannelRanker {
    conditioner: SignalConditioner,
    estimator: BandPowerEstimator,
    band_low_hz: f64,
    band_high_hz: f64,
    channel_count: usize,
}

impl ChannelRanker {
    pub fn new(
        config: &AppConfig,
        sampling_rate: f64,
        channel_count: usize,
    ) -> Result<Self, ConfigError> {
        if channel_count < 2 {
            return Err(ConfigError::InvalidChannel {
                index: 1,
                channel_count,
            });
        }
        // Only the filters are used; the pair selection is irrelevant here.
        let mut conditioning = config.conditioning.clone();
        conditioning.channels = [0, 1];

        Ok(Self {
            conditioner: SignalConditioner::new(&conditioning, sampling_rate, channel_count)?,
            estimator: BandPowerEstimator::new(sampling_rate, config.band_power.max_segment_len),
            band_low_hz: config.band_power.band_low_hz,
            band_high_hz: config.band_power.band_high_hz,
            channel_count,
        })
    }

    fn channels<'a>(
        &self,
        capture: &'a SampleChunk,
        label: &'static str,
    ) -> Result<Vec<&'a [f64]>, CalibrationError> {
        if capture.is_empty() {
            return Err(CalibrationError::MissingCapture { label });
        }
        if capture.channel_count() != self.channel_count {
            return Err(CalibrationError::InvalidPhase {
                reason: format!(
                    "{} capture has {} channels, session has {}",
                    label,
                    capture.channel_count(),
                    self.channel_count
                ),
            });
        }
        Ok((0..self.channel_count)
            .filter_map(|index| capture.channel(index))
            .collect())
    }

    /// Captures too short to filter are scored raw
    fn filtered(&self, signal: &[f64]) -> Vec<f64> {
        self.conditioner
            .filter_signal(signal)
            .unwrap_or_else(|| signal.to_vec())
    }

    /// Rank channels by how strongly they carry blink transients
    pub fn rank_blink(&self, capture: &SampleChunk) -> Result<Vec<ChannelScore>, CalibrationError> {
        let scores = self
            .channels(capture, "blink")?
            .into_iter()
            .enumerate()
            .map(|(index, signal)| {
                let magnitude: Vec<f64> = self.filtered(signal).iter().map(|v| v.abs()).collect();
                let spread = std_dev(&magnitude).unwrap_or(0.0);
                ChannelScore {
                    index,
                    score: median(&magnitude) + BLINK_STD_WEIGHT * spread,
                }
            })
            .collect();
        Ok(ranked(scores))
    }

    /// Rank channels by the band-power rise from eyes open to eyes closed
    pub fn rank_alpha(
        &mut self,
        open: &SampleChunk,
        closed: &SampleChunk,
    ) -> Result<Vec<ChannelScore>, CalibrationError> {
        let open = self.channels(open, BandCapture::EyesOpen.label())?;
        let closed = self.channels(closed, BandCapture::EyesClosed.label())?;

        let mut scores = Vec::with_capacity(self.channel_count);
        for (index, (open, closed)) in open.into_iter().zip(closed).enumerate() {
            let open = self.filtered(open);
            let closed = self.filtered(closed);
            let (low, high) = (self.band_low_hz, self.band_high_hz);
            let delta = self.estimator.band_power(&closed, low, high)
                - self.estimator.band_power(&open, low, high);
            scores.push(ChannelScore {
                index,
                score: delta,
            });
        }
        Ok(ranked(scores))
    }

    /// Rank whichever captures were recorded and propose the top pairs.
    pub fn propose(
        &mut self,
        blink: Option<&SampleChunk>,
        alpha: Option<(&SampleChunk, &SampleChunk)>,
    ) -> Result<ChannelProposal, CalibrationError> {
        let blink_scores = match blink {
            Some(capture) => self.rank_blink(capture)?,
            None => Vec::new(),
        };
        let alpha_scores = match alpha {
            Some((open, closed)) => self.rank_alpha(open, closed)?,
            None => Vec::new(),
        };
        let proposal = ChannelProposal {
            blink: top_pair(&blink_scores),
            alpha: top_pair(&alpha_scores),
            blink_scores,
            alpha_scores,
        };
        tracing::info!(
            "[ChannelRanker] Proposed blink={:?} alpha={:?}",
            proposal.blink,
            proposal.alpha
        );
        Ok(proposal)
    }
}

/// Highest score first; channels with non-finite data rank last.
fn ranked(mut scores: Vec<ChannelScore>) -> Vec<ChannelScore> {
    for entry in scores.iter_mut() {
        if !entry.score.is_finite() {
            entry.score = f64::NEG_INFINITY;
        }
    }
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));
    scores
}

fn top_pair(scores: &[ChannelScore]) -> Option<[usize; 2]> {
    match scores {
        [first, second, ..] => Some([first.index, second.index]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{SessionGuard, SyntheticSession, SyntheticSpec};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    const FS: f64 = 250.0;

    /// Drain a finite synthetic session into one capture
    fn record(spec: SyntheticSpec) -> SampleChunk {
        let mut guard = SessionGuard::open(Box::new(SyntheticSession::new(spec)), 0).unwrap();
        let mut capture = SampleChunk::empty(0, FS, 0.0);
        loop {
            let chunk = guard.session().poll_chunk(250).unwrap();
            if chunk.is_empty() {
                break;
            }
            capture.extend(chunk);
        }
        capture
    }

    /// Noise on every channel plus `extra(channel, t)`
    fn capture(seconds: f64, extra: impl Fn(usize, f64) -> f64) -> SampleChunk {
        let mut rng = StdRng::seed_from_u64(11);
        let n = (seconds * FS) as usize;
        let channels = (0..8)
            .map(|channel| {
                (0..n)
                    .map(|i| {
                        let t = i as f64 / FS;
                        rng.gen_range(-8.0..8.0) + extra(channel, t)
                    })
                    .collect()
            })
            .collect();
        SampleChunk::new(channels, FS, (n - 1) as f64 / FS)
    }

    fn sorted(pair: Option<[usize; 2]>) -> [usize; 2] {
        let mut pair = pair.unwrap();
        pair.sort_unstable();
        pair
    }

    #[test]
    fn test_blink_channels_rank_first() {
        let blinks = capture(6.0, |channel, t| {
            let phase = t % 2.0;
            if (channel == 2 || channel == 5) && (0.5..0.7).contains(&phase) {
                350.0 * (PI * (phase - 0.5) / 0.2).sin()
            } else {
                0.0
            }
        });
        let mut ranker = ChannelRanker::new(&AppConfig::default(), FS, 8).unwrap();
        let proposal = ranker.propose(Some(&blinks), None).unwrap();

        assert_eq!(sorted(proposal.blink), [2, 5]);
        assert_eq!(proposal.blink_scores.len(), 8);
        assert!(proposal.blink_scores[1].score > 3.0 * proposal.blink_scores[2].score);
        assert_eq!(proposal.alpha, None);
    }

    #[test]
    fn test_alpha_channels_rank_by_closed_minus_open() {
        let alpha = |amplitude: f64| {
            move |channel: usize, t: f64| {
                if channel == 3 || channel == 4 {
                    amplitude * (2.0 * PI * 10.0 * t).sin()
                } else {
                    0.0
                }
            }
        };
        let open = capture(4.0, alpha(5.0));
        let closed = capture(4.0, alpha(30.0));
        let mut ranker = ChannelRanker::new(&AppConfig::default(), FS, 8).unwrap();
        let scores = ranker.rank_alpha(&open, &closed).unwrap();

        let mut top = [scores[0].index, scores[1].index];
        top.sort_unstable();
        assert_eq!(top, [3, 4]);
        assert!(scores[1].score > 100.0, "score {}", scores[1].score);
        assert!(scores[2].score.abs() < 5.0, "score {}", scores[2].score);
    }

    #[test]
    fn test_synthetic_subject_montage_is_recovered() {
        let spec = SyntheticSpec::default();
        let blinks = record(SyntheticSpec {
            blink_offset_seconds: 0.5,
            duration_seconds: Some(9.0),
            ..spec.clone()
        });
        let mut open = record(SyntheticSpec {
            blink_interval_seconds: 0.0,
            alpha_cycle_seconds: 8.0,
            duration_seconds: Some(8.0),
            ..spec.clone()
        });
        let closed = open.split_off((4.0 * FS) as usize);

        let mut ranker = ChannelRanker::new(&AppConfig::default(), FS, 8).unwrap();
        let proposal = ranker.propose(Some(&blinks), Some((&open, &closed))).unwrap();
        assert_eq!(sorted(proposal.blink), spec.blink_channels);
        assert_eq!(sorted(proposal.alpha), spec.alpha_channels);

        let mut config = AppConfig::default();
        config.conditioning.channels = [4, 5];
        config.band_power.channels = [0, 1];
        proposal.apply_to(&mut config, FS, 8).unwrap();
        assert_eq!(sorted(Some(config.conditioning.channels)), [0, 1]);
        assert_eq!(sorted(Some(config.band_power.channels)), [6, 7]);
    }

    #[test]
    fn test_out_of_range_proposal_leaves_config_untouched() {
        let proposal = ChannelProposal {
            blink: Some([0, 9]),
            alpha: None,
            blink_scores: Vec::new(),
            alpha_scores: Vec::new(),
        };
        let mut config = AppConfig::default();
        let err = proposal.apply_to(&mut config, FS, 8).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidChannel {
                index: 9,
                channel_count: 8
            }
        );
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_capture_errors() {
        assert!(matches!(
            ChannelRanker::new(&AppConfig::default(), FS, 1),
            Err(ConfigError::InvalidChannel {
                index: 1,
                channel_count: 1
            })
        ));

        let mut ranker = ChannelRanker::new(&AppConfig::default(), FS, 8).unwrap();
        assert_eq!(
            ranker.rank_blink(&SampleChunk::empty(8, FS, 0.0)),
            Err(CalibrationError::MissingCapture { label: "blink" })
        );

        let two_channels = SampleChunk::new(vec![vec![0.0; 300]; 2], FS, 1.2);
        let open = capture(1.0, |_, _| 0.0);
        assert!(matches!(
            ranker.rank_alpha(&open, &two_channels),
            Err(CalibrationError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn test_non_finite_channel_ranks_last() {
        let scores = ranked(vec![
            ChannelScore { index: 0, score: f64::NAN },
            ChannelScore { index: 1, score: 4.0 },
            ChannelScore { index: 2, score: 9.0 },
        ]);
        let order: Vec<usize> = scores.iter().map(|s| s.index).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert_eq!(top_pair(&scores), Some([2, 1]));
    }
}
