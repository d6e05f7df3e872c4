use crate::{
    error::{HepError, Result},
    signal::{linear_fit, Events, RRSeries},
};
use log::debug;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

const VLF_BAND: (f64, f64) = (0.0033, 0.04);
const LF_BAND: (f64, f64) = (0.04, 0.15);
const HF_BAND: (f64, f64) = (0.15, 0.4);
const VHF_BAND: (f64, f64) = (0.4, 0.5);

/// Frequency-domain settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrvConfig {
    /// Rate (Hz) of the evenly resampled interval series.
    pub interp_fs: f64,
    /// Welch segment length in seconds.
    pub welch_window_s: f64,
    /// Fewer intervals than this leave the frequency domain missing.
    pub min_frequency_intervals: usize,
}

impl Default for HrvConfig {
    fn default() -> Self {
        Self {
            interp_fs: 4.0,
            welch_window_s: 30.0,
            min_frequency_intervals: 8,
        }
    }
}

/// Time-domain statistics, all in milliseconds except the pNNx percentages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HRVTime {
    pub n: usize,
    pub mean_nn: f64,
    pub median_nn: f64,
    pub min_nn: f64,
    pub max_nn: f64,
    pub sdnn: Option<f64>,
    pub rmssd: Option<f64>,
    pub sdsd: Option<f64>,
    pub cvnn: Option<f64>,
    pub cvsd: Option<f64>,
    pub mad_nn: f64,
    pub mcv_nn: Option<f64>,
    pub iqr_nn: f64,
    pub pnn50: Option<f64>,
    pub pnn20: Option<f64>,
}

/// Band powers (ms²) of the Welch spectrum of the resampled interval series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HRVPsd {
    pub vlf: Option<f64>,
    pub lf: Option<f64>,
    pub hf: Option<f64>,
    pub vhf: Option<f64>,
    pub total_power: f64,
    pub lf_hf: Option<f64>,
    pub lfn: Option<f64>,
    pub hfn: Option<f64>,
    pub ln_hf: Option<f64>,
    pub points: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HRVNonlinear {
    pub sd1: Option<f64>,
    pub sd2: Option<f64>,
    pub sd1_sd2: Option<f64>,
    pub samp_entropy: Option<f64>,
    pub dfa_alpha1: Option<f64>,
}

/// Why the frequency domain of a block could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyGap {
    /// Non-positive or non-finite intervals were present.
    InvalidIntervals(usize),
    TooFewIntervals(usize),
    /// The resampled series cannot hold a single Welch segment.
    TooShort,
}

impl std::fmt::Display for FrequencyGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrequencyGap::InvalidIntervals(n) => write!(f, "{n} invalid intervals"),
            FrequencyGap::TooFewIntervals(n) => write!(f, "only {n} intervals"),
            FrequencyGap::TooShort => write!(f, "interval series too short"),
        }
    }
}

/// Everything extracted from one block's beat timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvMetrics {
    pub time: HRVTime,
    pub frequency: std::result::Result<HRVPsd, FrequencyGap>,
    pub nonlinear: HRVNonlinear,
}

impl HrvMetrics {
    /// Flatten into named columns; missing values stay `None`.
    pub fn to_map(&self) -> BTreeMap<String, Option<f64>> {
        let t = &self.time;
        let mut map = BTreeMap::new();
        let mut put = |name: &str, value: Option<f64>| {
            map.insert(format!("HRV_{name}"), value.filter(|v| v.is_finite()));
        };
        put("MeanNN", Some(t.mean_nn));
        put("SDNN", t.sdnn);
        put("RMSSD", t.rmssd);
        put("SDSD", t.sdsd);
        put("CVNN", t.cvnn);
        put("CVSD", t.cvsd);
        put("MedianNN", Some(t.median_nn));
        put("MadNN", Some(t.mad_nn));
        put("MCVNN", t.mcv_nn);
        put("IQRNN", Some(t.iqr_nn));
        put("MinNN", Some(t.min_nn));
        put("MaxNN", Some(t.max_nn));
        put("pNN50", t.pnn50);
        put("pNN20", t.pnn20);

        let psd = self.frequency.as_ref().ok();
        put("VLF", psd.and_then(|p| p.vlf));
        put("LF", psd.and_then(|p| p.lf));
        put("HF", psd.and_then(|p| p.hf));
        put("VHF", psd.and_then(|p| p.vhf));
        put("TP", psd.map(|p| p.total_power));
        put("LFHF", psd.and_then(|p| p.lf_hf));
        put("LFn", psd.and_then(|p| p.lfn));
        put("HFn", psd.and_then(|p| p.hfn));
        put("LnHF", psd.and_then(|p| p.ln_hf));

        let nl = &self.nonlinear;
        put("SD1", nl.sd1);
        put("SD2", nl.sd2);
        put("SD1SD2", nl.sd1_sd2);
        put("SampEn", nl.samp_entropy);
        put("DFA_alpha1", nl.dfa_alpha1);
        map
    }
}

/// Metrics for a beat timeline given as sample indices.
pub fn hrv_from_events(events: &Events, fs: f64, cfg: &HrvConfig) -> Result<HrvMetrics> {
    extract_hrv(&RRSeries::from_events(events, fs), cfg)
}

/// Time-domain and nonlinear metrics use the valid intervals only; a single invalid
/// interval leaves the whole frequency domain missing.
pub fn extract_hrv(rr: &RRSeries, cfg: &HrvConfig) -> Result<HrvMetrics> {
    let valid = valid_intervals(rr);
    let invalid = rr.rr.len() - valid.rr.len();
    if valid.rr.is_empty() {
        return Err(HepError::InsufficientIntervals { valid: 0 });
    }
    let frequency = if invalid > 0 {
        Err(FrequencyGap::InvalidIntervals(invalid))
    } else {
        hrv_psd(&valid, cfg)
    };
    if let Err(gap) = &frequency {
        debug!("frequency-domain HRV unavailable: {gap}");
    }
    Ok(HrvMetrics {
        time: hrv_time(&valid),
        frequency,
        nonlinear: hrv_nonlinear(&valid),
    })
}

/// Intervals that are finite and strictly positive.
pub fn valid_intervals(rr: &RRSeries) -> RRSeries {
    RRSeries {
        rr: rr
            .rr
            .iter()
            .copied()
            .filter(|x| x.is_finite() && *x > 0.0)
            .collect(),
    }
}

/// Time-domain statistics of a non-empty interval series (seconds in, milliseconds out).
pub fn hrv_time(rr: &RRSeries) -> HRVTime {
    let ms: Vec<f64> = rr.rr.iter().map(|x| x * 1000.0).collect();
    let n = ms.len();
    let mean_nn = mean(&ms);
    let diffs: Vec<f64> = ms.windows(2).map(|w| w[1] - w[0]).collect();

    let sdnn = sample_std(&ms);
    let rmssd = (!diffs.is_empty())
        .then(|| (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt());
    let sdsd = sample_std(&diffs);
    let ratio = |num: Option<f64>| num.filter(|_| mean_nn > 0.0).map(|v| v / mean_nn);
    let percent_over = |limit: f64| {
        (!diffs.is_empty()).then(|| {
            100.0 * diffs.iter().filter(|d| d.abs() > limit).count() as f64 / diffs.len() as f64
        })
    };

    let median_nn = percentile(&ms, 50.0);
    let deviations: Vec<f64> = ms.iter().map(|x| (x - median_nn).abs()).collect();
    let mad_nn = 1.4826 * percentile(&deviations, 50.0);

    HRVTime {
        n,
        mean_nn,
        median_nn,
        min_nn: ms.iter().copied().fold(f64::INFINITY, f64::min),
        max_nn: ms.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        sdnn,
        rmssd,
        sdsd,
        cvnn: ratio(sdnn),
        cvsd: ratio(rmssd),
        mad_nn,
        mcv_nn: (median_nn > 0.0).then(|| mad_nn / median_nn),
        iqr_nn: percentile(&ms, 75.0) - percentile(&ms, 25.0),
        pnn50: percent_over(50.0),
        pnn20: percent_over(20.0),
    }
}

/// Welch band powers of the interval series resampled at `cfg.interp_fs`.
pub fn hrv_psd(rr: &RRSeries, cfg: &HrvConfig) -> std::result::Result<HRVPsd, FrequencyGap> {
    if rr.rr.len() < cfg.min_frequency_intervals.max(2) {
        return Err(FrequencyGap::TooFewIntervals(rr.rr.len()));
    }
    let signal = resample_intervals(rr, cfg.interp_fs);
    let segment = ((cfg.welch_window_s * cfg.interp_fs).round() as usize).min(signal.len());
    if segment < 4 {
        return Err(FrequencyGap::TooShort);
    }
    let (freqs, density) = welch_psd(&signal, cfg.interp_fs, segment);
    let df = cfg.interp_fs / segment as f64;
    let segment_s = segment as f64 / cfg.interp_fs;
    let band = |range: (f64, f64)| {
        (range.0 * segment_s >= 1.0).then(|| integrate_band(&freqs, &density, df, range))
    };

    let vlf = band(VLF_BAND);
    let lf = band(LF_BAND);
    let hf = band(HF_BAND);
    let vhf = band(VHF_BAND);
    let total_power: f64 = [vlf, lf, hf, vhf].iter().flatten().sum();
    let share = |p: Option<f64>| p.filter(|_| total_power > 0.0).map(|p| p / total_power);
    Ok(HRVPsd {
        vlf,
        lf,
        hf,
        vhf,
        total_power,
        lf_hf: lf.zip(hf.filter(|h| *h > 0.0)).map(|(l, h)| l / h),
        lfn: share(lf),
        hfn: share(hf),
        ln_hf: hf.filter(|h| *h > 0.0).map(f64::ln),
        points: freqs.into_iter().zip(density).map(|(f, p)| [f, p]).collect(),
    })
}

/// Poincaré descriptors, sample entropy and short-term DFA exponent.
pub fn hrv_nonlinear(rr: &RRSeries) -> HRVNonlinear {
    let ms: Vec<f64> = rr.rr.iter().map(|x| x * 1000.0).collect();
    let diffs: Vec<f64> = ms.windows(2).map(|w| w[1] - w[0]).collect();
    let sd1 = sample_std(&diffs).map(|sd| sd / 2f64.sqrt());
    let sdnn = sample_std(&ms);
    let sd2 = sd1
        .zip(sdnn)
        .map(|(sd1, sdnn)| (2.0 * sdnn * sdnn - sd1 * sd1).max(0.0).sqrt());
    let samp_entropy = sdnn
        .filter(|sd| *sd > 0.0)
        .and_then(|sd| sample_entropy(&ms, 2, 0.2 * sd));
    HRVNonlinear {
        sd1,
        sd2,
        sd1_sd2: sd1.zip(sd2.filter(|v| *v > 0.0)).map(|(a, b)| a / b),
        samp_entropy,
        dfa_alpha1: dfa_alpha1(&ms),
    }
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn sample_std(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let m = mean(data);
    let ss = data.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    Some((ss / (data.len() as f64 - 1.0)).sqrt())
}

/// Linear-interpolated percentile (`q` in 0..=100) of a non-empty slice.
fn percentile(data: &[f64], q: f64) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn sample_entropy(data: &[f64], m: usize, r: f64) -> Option<f64> {
    let n = data.len();
    if n <= m + 1 {
        return None;
    }
    let within = |i: usize, j: usize, len: usize| {
        (0..len).all(|k| (data[i + k] - data[j + k]).abs() < r)
    };
    let templates = n - m;
    let mut matches_m = 0u64;
    let mut matches_m1 = 0u64;
    for i in 0..templates {
        for j in (i + 1)..templates {
            if within(i, j, m) {
                matches_m += 1;
                if j + m < n && within(i, j, m + 1) {
                    matches_m1 += 1;
                }
            }
        }
    }
    (matches_m > 0 && matches_m1 > 0).then(|| -(matches_m1 as f64 / matches_m as f64).ln())
}

fn dfa_alpha1(ms: &[f64]) -> Option<f64> {
    const MIN_SCALE: usize = 4;
    const MAX_SCALE: usize = 16;
    if ms.len() < MIN_SCALE * 2 {
        return None;
    }
    let m = mean(ms);
    let profile: Vec<f64> = ms
        .iter()
        .scan(0.0, |acc, x| {
            *acc += x - m;
            Some(*acc)
        })
        .collect();
    let mut log_points = Vec::new();
    for scale in MIN_SCALE..=ms.len().min(MAX_SCALE) {
        let residuals: Vec<f64> = profile
            .chunks_exact(scale)
            .map(|segment| {
                let (slope, intercept) = linear_fit(segment);
                segment
                    .iter()
                    .enumerate()
                    .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
                    .sum::<f64>()
                    / scale as f64
            })
            .collect();
        if residuals.is_empty() {
            continue;
        }
        let fluctuation = mean(&residuals).sqrt();
        if fluctuation.is_finite() && fluctuation > 0.0 {
            log_points.push(((scale as f64).ln(), fluctuation.ln()));
        }
    }
    if log_points.len() < 2 {
        return None;
    }
    let xs: Vec<f64> = log_points.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = log_points.iter().map(|p| p.1).collect();
    let (mx, my) = (mean(&xs), mean(&ys));
    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    (sxx > f64::EPSILON).then(|| sxy / sxx)
}

/// Intervals in milliseconds placed at the beat that closes them, linearly interpolated
/// onto an even grid between the second and the last beat.
fn resample_intervals(rr: &RRSeries, fs: f64) -> Vec<f64> {
    let mut times = Vec::with_capacity(rr.rr.len());
    let mut acc = 0.0;
    for interval in &rr.rr {
        acc += interval;
        times.push(acc);
    }
    let values: Vec<f64> = rr.rr.iter().map(|x| x * 1000.0).collect();
    let (Some(&start), Some(&end)) = (times.first(), times.last()) else {
        return Vec::new();
    };
    let n = ((end - start) * fs).floor() as usize + 1;
    let mut out = Vec::with_capacity(n);
    let mut k = 0;
    for i in 0..n {
        let t = start + i as f64 / fs;
        while k + 2 < times.len() && times[k + 1] < t {
            k += 1;
        }
        if k + 1 >= times.len() {
            out.push(values[k]);
            continue;
        }
        let span = times[k + 1] - times[k];
        let frac = if span > 0.0 {
            ((t - times[k]) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(values[k] + (values[k + 1] - values[k]) * frac);
    }
    out
}

/// One-sided Welch power spectral density with Hann windows and 50% overlap.
fn welch_psd(signal: &[f64], fs: f64, segment: usize) -> (Vec<f64>, Vec<f64>) {
    let step = (segment / 2).max(1);
    let window = hann(segment);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(segment);
    let mut spectrum = r2c.make_output_vec();
    let bins = spectrum.len();
    let freqs: Vec<f64> = (0..bins).map(|k| k as f64 * fs / segment as f64).collect();
    let mut density = vec![0.0; bins];
    let mut segments = 0;
    let mut pos = 0;
    while pos + segment <= signal.len() {
        let slice = &signal[pos..pos + segment];
        let m = mean(slice);
        let mut frame: Vec<f64> = slice
            .iter()
            .zip(&window)
            .map(|(x, w)| (x - m) * w)
            .collect();
        // Buffer lengths come from the plan, so the transform cannot fail.
        if r2c.process(&mut frame, &mut spectrum).is_err() {
            break;
        }
        for (k, value) in spectrum.iter().enumerate() {
            let edge = k == 0 || (segment % 2 == 0 && k == segment / 2);
            let factor = if edge { 1.0 } else { 2.0 };
            density[k] += factor * value.norm_sqr() * scale;
        }
        segments += 1;
        pos += step;
    }
    if segments > 0 {
        density.iter_mut().for_each(|p| *p /= segments as f64);
    }
    (freqs, density)
}

fn integrate_band(freqs: &[f64], density: &[f64], df: f64, band: (f64, f64)) -> f64 {
    freqs
        .iter()
        .zip(density)
        .filter(|(f, _)| **f >= band.0 && **f < band.1)
        .map(|(_, p)| p * df)
        .sum()
}

fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}
