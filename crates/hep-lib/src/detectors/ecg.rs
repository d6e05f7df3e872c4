use crate::{
    error::Result,
    signal::{IndicatorTrain, TimeSeries},
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Configurable parameters for ECG cleaning and R-peak detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// High-pass cutoff of the cleaned output trace (Hz).
    pub clean_lowcut_hz: f64,
    /// Low-pass cutoff of the cleaned output trace (Hz).
    pub clean_highcut_hz: f64,
    /// Lower cutoff for the detection band (Hz).
    pub lowcut_hz: f64,
    /// Upper cutoff for the detection band (Hz).
    pub highcut_hz: f64,
    /// Moving window integration length (seconds).
    pub integration_window_s: f64,
    /// Minimum physiological RR distance / refractory period (seconds).
    pub min_rr_s: f64,
    /// Scale between noise and signal envelopes for the adaptive threshold.
    pub threshold_scale: f64,
    /// How far back to search (seconds) for the precise R-peak after a detection.
    pub search_back_s: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            clean_lowcut_hz: 0.5,
            clean_highcut_hz: 40.0,
            lowcut_hz: 5.0,
            highcut_hz: 15.0,
            integration_window_s: 0.150,
            min_rr_s: 0.250,
            threshold_scale: 0.6,
            search_back_s: 0.150,
        }
    }
}

/// Cleaned cardiac trace plus the per-sample heartbeat indicator derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanEcg {
    pub cleaned: TimeSeries,
    pub peaks: IndicatorTrain,
}

/// Produces a cleaned trace and a same-length heartbeat indicator train from raw ECG.
pub trait HeartbeatDetector {
    fn process(&self, ecg: &TimeSeries) -> Result<CleanEcg>;
}

/// Pan–Tompkins-inspired detector: band-pass, derivative, squaring, moving-window
/// integration and an adaptive signal/noise threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanTompkinsDetector {
    pub config: DetectorConfig,
}

impl PanTompkinsDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }
}

impl HeartbeatDetector for PanTompkinsDetector {
    fn process(&self, ecg: &TimeSeries) -> Result<CleanEcg> {
        let cfg = &self.config;
        let fs = ecg.fs.max(1.0);
        let cleaned = TimeSeries {
            fs: ecg.fs,
            data: bandpass(&ecg.data, fs, cfg.clean_lowcut_hz, cfg.clean_highcut_hz),
        };
        let peaks = detect_r_peaks(ecg, cfg);
        Ok(CleanEcg {
            peaks: IndicatorTrain::from_peaks(ecg.fs, ecg.len(), &peaks),
            cleaned,
        })
    }
}

/// R-peak sample positions, sorted and unique.
pub fn detect_r_peaks(ts: &TimeSeries, cfg: &DetectorConfig) -> Vec<usize> {
    if ts.is_empty() {
        return Vec::new();
    }
    let fs = ts.fs.max(1.0);
    let detection_band = bandpass(&ts.data, fs, cfg.lowcut_hz, cfg.highcut_hz);
    let envelope = integrate(&detection_band, fs, cfg.integration_window_s);
    let peaks = adaptive_peaks(&detection_band, &envelope, fs, cfg);
    if peaks.len() < 2 {
        // The adaptive threshold never settled; use local maxima above a moving mean.
        return local_maxima(&ts.data, fs, cfg.min_rr_s);
    }
    peaks
}

fn bandpass(data: &[f64], fs: f64, low: f64, high: f64) -> Vec<f64> {
    let hp = if low > 0.0 {
        highpass(data, fs, low)
    } else {
        data.to_vec()
    };
    if high <= 0.0 || high >= fs * 0.5 {
        hp
    } else {
        lowpass(&hp, fs, high)
    }
}

fn rc_constant(cutoff: f64) -> f64 {
    1.0 / (2.0 * PI * cutoff.max(0.01))
}

fn highpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let Some(&first) = data.first() else {
        return Vec::new();
    };
    let rc = rc_constant(cutoff);
    let alpha = rc / (rc + 1.0 / fs);
    let mut prev_x = first;
    let mut prev_y = 0.0;
    data.iter()
        .map(|&x| {
            prev_y = alpha * (prev_y + x - prev_x);
            prev_x = x;
            prev_y
        })
        .collect()
}

fn lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let Some(&first) = data.first() else {
        return Vec::new();
    };
    let dt = 1.0 / fs;
    let alpha = dt / (rc_constant(cutoff) + dt);
    let mut state = first;
    data.iter()
        .map(|&x| {
            state += alpha * (x - state);
            state
        })
        .collect()
}

/// Squared first difference smoothed by a trailing moving average.
fn integrate(data: &[f64], fs: f64, window_s: f64) -> Vec<f64> {
    let squared: Vec<f64> = std::iter::once(0.0)
        .chain(data.windows(2).map(|w| (w[1] - w[0]).powi(2)))
        .collect();
    moving_average(&squared, ((window_s * fs).round() as usize).max(1))
}

fn moving_average(data: &[f64], win: usize) -> Vec<f64> {
    if win <= 1 {
        return data.to_vec();
    }
    let mut acc = 0.0;
    data.iter()
        .enumerate()
        .map(|(i, &sample)| {
            acc += sample;
            if i >= win {
                acc -= data[i - win];
            }
            acc / win as f64
        })
        .collect()
}

fn adaptive_peaks(band: &[f64], envelope: &[f64], fs: f64, cfg: &DetectorConfig) -> Vec<usize> {
    let refractory = ((cfg.min_rr_s * fs).round() as usize).max(1);
    let search = ((cfg.search_back_s * fs).round() as usize).max(1);

    let init = envelope.len().min((fs as usize).max(1));
    let seed = envelope[..init].iter().sum::<f64>() / init as f64;
    let mut signal_level = seed;
    let mut noise_level = seed * 0.5;
    let mut threshold = noise_level + cfg.threshold_scale * (signal_level - noise_level).max(0.0);
    let mut last_detection: Option<usize> = None;
    let mut peaks = Vec::new();

    for (i, &sample) in envelope.iter().enumerate() {
        let refractory_ok = last_detection.map_or(true, |last| i - last >= refractory);
        if sample >= threshold && refractory_ok {
            let start = i.saturating_sub(search);
            let end = i.min(band.len() - 1);
            let best = (start..=end)
                .max_by(|&a, &b| band[a].total_cmp(&band[b]))
                .unwrap_or(i);
            peaks.push(best);
            last_detection = Some(i);
            signal_level = 0.125 * sample + 0.875 * signal_level;
        } else {
            noise_level = 0.125 * sample + 0.875 * noise_level;
        }
        threshold = noise_level + cfg.threshold_scale * (signal_level - noise_level).max(0.0);
    }

    peaks.sort_unstable();
    peaks.dedup();
    peaks
}

fn local_maxima(data: &[f64], fs: f64, min_rr_s: f64) -> Vec<usize> {
    if data.len() < 3 {
        return Vec::new();
    }
    let min_gap = ((min_rr_s * fs) as usize).max(1);
    let trend = moving_average(data, ((0.150 * fs) as usize).max(1));
    let detrended: Vec<f64> = data.iter().zip(&trend).map(|(x, m)| x - m).collect();
    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..data.len() - 1 {
        let y = detrended[i];
        let is_peak = y > 0.0 && y > detrended[i - 1] && y > detrended[i + 1];
        let spaced = peaks.last().map_or(true, |&last| i - last >= min_gap);
        if is_peak && spaced {
            peaks.push(i);
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_ecg;

    #[test]
    fn detects_regular_beats() {
        let fs = 250.0;
        let rr = [0.82, 0.78, 0.8, 0.79, 0.81, 0.77, 0.84, 0.88];
        let (ts, _) = synthetic_ecg(fs, &rr);
        let peaks = detect_r_peaks(&ts, &DetectorConfig::default());
        assert_eq!(peaks.len(), rr.len() + 1);
    }

    #[test]
    fn peaks_sit_close_to_true_beats() {
        let fs = 250.0;
        let rr = [0.9, 0.85, 0.88, 0.86, 0.82, 0.81, 0.8];
        let (ts, beats) = synthetic_ecg(fs, &rr);
        let peaks = detect_r_peaks(&ts, &DetectorConfig::default());
        assert_eq!(peaks.len(), beats.len());
        for (&peak, &beat) in peaks.iter().zip(&beats) {
            let lag = (peak as f64 / fs - beat).abs();
            assert!(lag < 0.05, "peak {peak} is {lag}s from beat at {beat}s");
        }
    }

    #[test]
    fn process_returns_same_length_outputs() {
        let fs = 250.0;
        let (ts, beats) = synthetic_ecg(fs, &[0.8; 10]);
        let out = PanTompkinsDetector::default().process(&ts).unwrap();
        assert_eq!(out.cleaned.len(), ts.len());
        assert_eq!(out.peaks.len(), ts.len());
        let ones = out.peaks.values.iter().filter(|v| **v == 1).count();
        assert_eq!(ones, beats.len());
    }

    #[test]
    fn empty_input_yields_no_peaks() {
        let ts = TimeSeries {
            fs: 250.0,
            data: Vec::new(),
        };
        assert!(detect_r_peaks(&ts, &DetectorConfig::default()).is_empty());
        let out = PanTompkinsDetector::default().process(&ts).unwrap();
        assert!(out.peaks.is_empty());
    }
}
