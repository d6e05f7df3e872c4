//! Synthetic recordings shared by the unit tests.

use crate::signal::TimeSeries;
use std::f64::consts::PI;

/// Gaussian R-waves (first beat at 0.5 s) on a slow sinusoidal baseline.
/// Returns the trace and the true beat times in seconds.
pub fn synthetic_ecg(fs: f64, rr: &[f64]) -> (TimeSeries, Vec<f64>) {
    let mut beats = Vec::with_capacity(rr.len() + 1);
    let mut t = 0.5;
    beats.push(t);
    for &interval in rr {
        t += interval;
        beats.push(t);
    }
    let duration = beats.last().copied().unwrap_or(1.0) + 1.0;
    let samples = (duration * fs) as usize;
    let ts = TimeSeries {
        fs,
        data: ecg_samples(fs, samples, &beats),
    };
    (ts, beats)
}

/// `samples` points of the synthetic trace with R-waves at `beats` (seconds).
pub fn ecg_samples(fs: f64, samples: usize, beats: &[f64]) -> Vec<f64> {
    (0..samples)
        .map(|i| {
            let time = i as f64 / fs;
            let baseline = 0.05 * (2.0 * PI * time).sin();
            let waves: f64 = beats
                .iter()
                .filter(|&&bt| (time - bt).abs() < 0.2)
                .map(|&bt| 1.2 * (-0.5 * ((time - bt) / 0.02).powi(2)).exp())
                .sum();
            baseline + waves
        })
        .collect()
}
