//! Event-locked epoching and grand averaging.

use crate::{
    error::{HepError, Result},
    signal::{Detrend, Events, MultiChannel},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Amplitude-based epoch rejection. Both limits absent means no rejection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectCriteria {
    /// Reject when any channel's peak-to-peak amplitude exceeds this value.
    pub max_peak_to_peak: Option<f64>,
    /// Reject when any channel's peak-to-peak amplitude falls below this value.
    pub min_peak_to_peak: Option<f64>,
}

impl RejectCriteria {
    pub fn is_disabled(&self) -> bool {
        self.max_peak_to_peak.is_none() && self.min_peak_to_peak.is_none()
    }

    fn check(&self, data: &[Vec<f64>], names: &[String]) -> Option<DropReason> {
        if self.is_disabled() {
            return None;
        }
        for (channel, samples) in names.iter().zip(data) {
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let ptp = max - min;
            if self.max_peak_to_peak.is_some_and(|limit| ptp > limit) {
                return Some(DropReason::PeakToPeakTooLarge {
                    channel: channel.clone(),
                });
            }
            if self.min_peak_to_peak.is_some_and(|limit| ptp < limit) {
                return Some(DropReason::Flat {
                    channel: channel.clone(),
                });
            }
        }
        None
    }
}

/// Window and correction settings for peri-event segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochConfig {
    /// Window start relative to the event (seconds, usually negative).
    pub tmin: f64,
    /// Window end relative to the event (seconds).
    pub tmax: f64,
    /// Baseline sub-window `(b0, b1)` in seconds relative to the event.
    pub baseline: Option<(f64, f64)>,
    pub detrend: Detrend,
    pub reject: RejectCriteria,
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            tmin: -0.2,
            tmax: 0.6,
            baseline: Some((-0.2, 0.0)),
            detrend: Detrend::Linear,
            reject: RejectCriteria::default(),
        }
    }
}

impl EpochConfig {
    /// Sample offset of the first window sample relative to the event.
    pub fn start_offset(&self, fs: f64) -> i64 {
        (self.tmin * fs).round() as i64
    }

    /// Samples per epoch: `round((tmax - tmin) * fs) + 1`.
    pub fn n_samples(&self, fs: f64) -> usize {
        ((self.tmax - self.tmin) * fs).round() as usize + 1
    }

    fn validate(&self, fs: f64) -> Result<()> {
        if !(fs > 0.0 && fs.is_finite()) {
            return Err(HepError::InvalidWindow(format!(
                "sampling rate must be positive, got {fs}"
            )));
        }
        if !(self.tmin.is_finite() && self.tmax.is_finite()) || self.tmin >= self.tmax {
            return Err(HepError::InvalidWindow(format!(
                "tmin ({}) must be below tmax ({})",
                self.tmin, self.tmax
            )));
        }
        if let Some((b0, b1)) = self.baseline {
            if b0 > b1 || b0 < self.tmin || b1 > self.tmax {
                return Err(HepError::InvalidWindow(format!(
                    "baseline ({b0}, {b1}) must be ordered and inside ({}, {})",
                    self.tmin, self.tmax
                )));
            }
        }
        Ok(())
    }

    /// Inclusive sample range of the baseline inside an epoch.
    fn baseline_range(&self, fs: f64, n: usize) -> Option<(usize, usize)> {
        self.baseline.map(|(b0, b1)| {
            let first = (((b0 - self.tmin) * fs).round().max(0.0) as usize).min(n - 1);
            let last = (((b1 - self.tmin) * fs).round().max(0.0) as usize).min(n - 1);
            (first, last.max(first))
        })
    }
}

/// One baseline-corrected peri-event segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    /// Position of the source event in the timeline.
    pub event_index: usize,
    /// Sample index of the source event in the signal.
    pub event_sample: usize,
    /// `[channel][sample]`
    pub data: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DropReason {
    /// The window starts before the first or ends after the last sample.
    OutOfBounds,
    PeakToPeakTooLarge { channel: String },
    Flat { channel: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedEpoch {
    pub event_index: usize,
    pub event_sample: usize,
    pub reason: DropReason,
}

/// The valid epochs of one signal plus a log of every excluded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epochs {
    pub fs: f64,
    pub tmin: f64,
    pub names: Vec<String>,
    pub epochs: Vec<Epoch>,
    pub drop_log: Vec<DroppedEpoch>,
}

impl Epochs {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

/// Cut a window around every event, keeping only windows that fit the data.
pub fn extract_epochs(signal: &MultiChannel, events: &Events, cfg: &EpochConfig) -> Result<Epochs> {
    cfg.validate(signal.fs)?;
    let n_total = signal.len() as i64;
    let offset = cfg.start_offset(signal.fs);
    let n = cfg.n_samples(signal.fs);
    let baseline = cfg.baseline_range(signal.fs, n);

    let mut epochs = Vec::with_capacity(events.len());
    let mut drop_log = Vec::new();
    for (event_index, &event_sample) in events.indices.iter().enumerate() {
        let first = event_sample as i64 + offset;
        let last = first + n as i64 - 1;
        if first < 0 || last >= n_total {
            drop_log.push(DroppedEpoch {
                event_index,
                event_sample,
                reason: DropReason::OutOfBounds,
            });
            continue;
        }
        let first = first as usize;
        let data: Vec<Vec<f64>> = signal
            .data
            .iter()
            .map(|channel| {
                let mut segment = channel[first..first + n].to_vec();
                cfg.detrend.apply(&mut segment);
                if let Some((b0, b1)) = baseline {
                    subtract_mean(&mut segment, b0, b1);
                }
                segment
            })
            .collect();
        if let Some(reason) = cfg.reject.check(&data, &signal.names) {
            drop_log.push(DroppedEpoch {
                event_index,
                event_sample,
                reason,
            });
            continue;
        }
        epochs.push(Epoch {
            event_index,
            event_sample,
            data,
        });
    }
    debug!(
        "extracted {} epochs of {} samples, dropped {}",
        epochs.len(),
        n,
        drop_log.len()
    );
    Ok(Epochs {
        fs: signal.fs,
        tmin: cfg.tmin,
        names: signal.names.clone(),
        epochs,
        drop_log,
    })
}

fn subtract_mean(segment: &mut [f64], first: usize, last: usize) {
    let window = &segment[first..=last];
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    segment.iter_mut().for_each(|x| *x -= mean);
}

/// Per-channel grand average of a set of epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evoked {
    pub fs: f64,
    pub tmin: f64,
    pub names: Vec<String>,
    /// `[channel][sample]`
    pub data: Vec<Vec<f64>>,
    pub n_averaged: usize,
}

impl Evoked {
    /// Latency of every sample in seconds relative to the event.
    pub fn times(&self) -> Vec<f64> {
        let n = self.data.first().map(Vec::len).unwrap_or(0);
        (0..n).map(|i| self.tmin + i as f64 / self.fs).collect()
    }

    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.data[idx].as_slice())
    }
}

/// Average equally shaped epochs sample by sample.
pub fn average(epochs: &Epochs) -> Result<Evoked> {
    let first = epochs.epochs.first().ok_or(HepError::NoEpochs)?;
    let n_channels = first.data.len();
    let n_samples = first.data.first().map(Vec::len).unwrap_or(0);
    let mut sum = vec![vec![0.0; n_samples]; n_channels];
    for epoch in &epochs.epochs {
        if epoch.data.len() != n_channels || epoch.data.iter().any(|ch| ch.len() != n_samples) {
            return Err(HepError::ShapeMismatch(format!(
                "epoch for event {} does not match {} x {}",
                epoch.event_index, n_channels, n_samples
            )));
        }
        for (acc, channel) in sum.iter_mut().zip(&epoch.data) {
            for (a, x) in acc.iter_mut().zip(channel) {
                *a += x;
            }
        }
    }
    let count = epochs.epochs.len() as f64;
    for channel in sum.iter_mut() {
        channel.iter_mut().for_each(|x| *x /= count);
    }
    Ok(Evoked {
        fs: epochs.fs,
        tmin: epochs.tmin,
        names: epochs.names.clone(),
        data: sum,
        n_averaged: epochs.epochs.len(),
    })
}
