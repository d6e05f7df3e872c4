use crate::error::{HepError, Result};
use serde::{Deserialize, Serialize};

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-sample heartbeat indicator: 1 marks a detected R-peak, 0 everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorTrain {
    pub fs: f64,
    pub values: Vec<u8>,
}

impl IndicatorTrain {
    /// Build a train, rejecting anything other than 0/1.
    pub fn new(fs: f64, values: Vec<u8>) -> Result<Self> {
        if let Some((index, &value)) = values.iter().enumerate().find(|(_, v)| **v > 1) {
            return Err(HepError::InvalidIndicator { index, value });
        }
        Ok(Self { fs, values })
    }

    /// Mark the given sample positions; indices past `len` are ignored.
    pub fn from_peaks(fs: f64, len: usize, peaks: &[usize]) -> Self {
        let mut values = vec![0u8; len];
        for &p in peaks {
            if let Some(slot) = values.get_mut(p) {
                *slot = 1;
            }
        }
        Self { fs, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Point events on a timeline (e.g., R-peaks indices)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<usize>,
}

impl Events {
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Event positions in seconds.
    pub fn times(&self, fs: f64) -> Vec<f64> {
        self.indices.iter().map(|&i| i as f64 / fs).collect()
    }
}

/// RR intervals (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr: Vec<f64>,
}

impl RRSeries {
    pub fn from_events(events: &Events, fs: f64) -> Self {
        Self::from_times(&events.times(fs))
    }

    /// Consecutive differences of beat times given in seconds.
    pub fn from_times(times: &[f64]) -> Self {
        let rr = times.windows(2).map(|w| w[1] - w[0]).collect();
        Self { rr }
    }
}

/// Several named channels sharing one sampling rate and sample count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiChannel {
    pub fs: f64,
    pub names: Vec<String>,
    pub data: Vec<Vec<f64>>,
}

impl MultiChannel {
    pub fn new(fs: f64) -> Self {
        Self {
            fs,
            names: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Append a channel; its rate and length must match the channels already present.
    pub fn push_channel(&mut self, name: impl Into<String>, ts: TimeSeries) -> Result<()> {
        let name = name.into();
        if (ts.fs - self.fs).abs() > f64::EPSILON * self.fs.abs().max(1.0) {
            return Err(HepError::ShapeMismatch(format!(
                "channel '{}' sampled at {} Hz, expected {} Hz",
                name, ts.fs, self.fs
            )));
        }
        if !self.data.is_empty() && ts.len() != self.len() {
            return Err(HepError::ShapeMismatch(format!(
                "channel '{}' has {} samples, expected {}",
                name,
                ts.len(),
                self.len()
            )));
        }
        self.names.push(name);
        self.data.push(ts.data);
        Ok(())
    }

    /// Samples per channel (0 when there are no channels).
    pub fn len(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_channels(&self) -> usize {
        self.names.len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn channel(&self, name: &str) -> Option<TimeSeries> {
        self.index_of(name).map(|idx| TimeSeries {
            fs: self.fs,
            data: self.data[idx].clone(),
        })
    }

    /// Copy of samples `start..=end` from every channel.
    pub fn slice(&self, start: usize, end: usize) -> Result<MultiChannel> {
        if start > end || end >= self.len() {
            return Err(HepError::ShapeMismatch(format!(
                "slice {}..={} outside 0..{}",
                start,
                end,
                self.len()
            )));
        }
        Ok(MultiChannel {
            fs: self.fs,
            names: self.names.clone(),
            data: self
                .data
                .iter()
                .map(|ch| ch[start..=end].to_vec())
                .collect(),
        })
    }
}

/// Trend removal applied to a segment before further processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detrend {
    None,
    /// Remove the mean.
    Constant,
    /// Remove the least-squares line.
    #[default]
    Linear,
}

impl Detrend {
    pub fn apply(self, data: &mut [f64]) {
        match self {
            Detrend::None => {}
            Detrend::Constant => {
                if data.is_empty() {
                    return;
                }
                let mean = data.iter().sum::<f64>() / data.len() as f64;
                data.iter_mut().for_each(|x| *x -= mean);
            }
            Detrend::Linear => {
                let (slope, intercept) = linear_fit(data);
                for (i, x) in data.iter_mut().enumerate() {
                    *x -= slope * i as f64 + intercept;
                }
            }
        }
    }
}

/// Least-squares line through `(i, segment[i])`, as `(slope, intercept)`.
pub(crate) fn linear_fit(segment: &[f64]) -> (f64, f64) {
    let n = segment.len();
    if n < 2 {
        let mean = segment.first().copied().unwrap_or(0.0);
        return (0.0, mean);
    }
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    for (i, &y) in segment.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xx += x * x;
        sum_xy += x * y;
    }
    let n_f = n as f64;
    let denom = n_f * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return (0.0, sum_y / n_f);
    }
    let slope = (n_f * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n_f;
    (slope, intercept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_train_rejects_non_binary_values() {
        let err = IndicatorTrain::new(100.0, vec![0, 1, 2]).unwrap_err();
        assert!(matches!(
            err,
            HepError::InvalidIndicator { index: 2, value: 2 }
        ));
    }

    #[test]
    fn multichannel_enforces_shared_shape() {
        let mut mc = MultiChannel::new(100.0);
        mc.push_channel(
            "Fz",
            TimeSeries {
                fs: 100.0,
                data: vec![0.0; 10],
            },
        )
        .unwrap();
        let short = TimeSeries {
            fs: 100.0,
            data: vec![0.0; 9],
        };
        assert!(mc.push_channel("Cz", short).is_err());
        let other_rate = TimeSeries {
            fs: 250.0,
            data: vec![0.0; 10],
        };
        assert!(mc.push_channel("Pz", other_rate).is_err());
        assert_eq!(mc.n_channels(), 1);
    }

    #[test]
    fn linear_detrend_flattens_a_ramp() {
        let mut data: Vec<f64> = (0..50).map(|i| 3.0 + 0.5 * i as f64).collect();
        Detrend::Linear.apply(&mut data);
        assert!(data.iter().all(|x| x.abs() < 1e-9));
    }

    #[test]
    fn rr_from_events_uses_sampling_rate() {
        let events = Events::from_indices(vec![0, 80, 162]);
        let rr = RRSeries::from_events(&events, 100.0);
        assert_eq!(rr.rr.len(), 2);
        assert!((rr.rr[0] - 0.8).abs() < 1e-12);
        assert!((rr.rr[1] - 0.82).abs() < 1e-12);
    }
}
