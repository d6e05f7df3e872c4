use crate::{
    detectors::CleanEcg,
    epochs::Evoked,
    metrics::HrvMetrics,
    signal::{RRSeries, TimeSeries},
};
use serde::{Deserialize, Serialize};

/// Line colours cycled across channels.
const PALETTE: [u32; 6] = [0x1F77B4, 0xFF7F0E, 0x2CA02C, 0xD62728, 0x9467BD, 0x8C564B];

const MAX_POINTS: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

/// Unconnected markers, drawn as filled circles of `radius` pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScatterSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub radius: u32,
    pub color: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Scatter(ScatterSeries),
}

impl Series {
    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Series::Line(line) => &line.points,
            Series::Scatter(scatter) => &scatter.points,
        }
    }
}

/// Backend-neutral description of a chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// `(x_min, x_max, y_min, y_max)` over every point, `None` for an empty figure.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut points = self
            .series
            .iter()
            .flat_map(|series| series.points().iter())
            .filter(|p| p[0].is_finite() && p[1].is_finite())
            .peekable();
        points.peek()?;
        Some(points.fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |(x0, x1, y0, y1), p| (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1])),
        ))
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;

    /// Draw several figures stacked top to bottom on one canvas.
    fn draw_panels(&mut self, figs: &[Figure]) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

/// One line per channel of a heartbeat-evoked average, latency on the x axis.
pub fn figure_from_evoked(evoked: &Evoked, title: &str) -> Figure {
    let times = evoked.times();
    let mut fig = Figure::new(Some(format!("{title} (n={})", evoked.n_averaged)));
    fig.x.label = Some("Time (s)".into());
    fig.y.label = Some("Amplitude".into());
    for (idx, (name, channel)) in evoked.names.iter().zip(&evoked.data).enumerate() {
        let points: Vec<[f64; 2]> = times
            .iter()
            .zip(channel)
            .map(|(t, value)| [*t, *value])
            .collect();
        fig.add_series(Series::Line(LineSeries {
            name: name.clone(),
            points: decimate_points(&points, MAX_POINTS),
            style: Style {
                width: 1.4,
                color: Color(PALETTE[idx % PALETTE.len()]),
            },
        }));
    }
    fig
}

fn trace_points(series: &TimeSeries) -> Vec<[f64; 2]> {
    let dt = 1.0 / series.fs;
    let points: Vec<[f64; 2]> = series
        .data
        .iter()
        .enumerate()
        .map(|(i, value)| [i as f64 * dt, *value])
        .collect();
    decimate_points(&points, MAX_POINTS)
}

/// HRV overview of one block: RR tachogram, Welch spectrum and Poincaré plot, in that order.
///
/// The spectrum panel has no series when the frequency domain is missing.
pub fn figure_from_hrv(rr: &RRSeries, metrics: &HrvMetrics, title: &str) -> Vec<Figure> {
    let ms: Vec<f64> = rr.rr.iter().map(|x| x * 1000.0).collect();

    let mut tachogram = Figure::new(Some(format!("{title} RR intervals")));
    tachogram.x.label = Some("Time (s)".into());
    tachogram.y.label = Some("RR (ms)".into());
    let mut elapsed = 0.0;
    let points: Vec<[f64; 2]> = rr
        .rr
        .iter()
        .zip(&ms)
        .map(|(rr, ms)| {
            elapsed += rr;
            [elapsed, *ms]
        })
        .collect();
    tachogram.add_series(Series::Line(LineSeries {
        name: "RR".into(),
        points: decimate_points(&points, MAX_POINTS),
        style: Style {
            width: 1.4,
            color: Color(PALETTE[3]),
        },
    }));

    let mut psd = Figure::new(Some(format!("{title} power spectral density")));
    psd.x.label = Some("Frequency (Hz)".into());
    psd.y.label = Some("Power (ms²/Hz)".into());
    match &metrics.frequency {
        Ok(bands) => psd.add_series(Series::Line(LineSeries {
            name: "Welch PSD".into(),
            points: bands
                .points
                .iter()
                .copied()
                .filter(|p| p[0] <= 0.5)
                .collect(),
            style: Style {
                width: 1.4,
                color: Color(PALETTE[0]),
            },
        })),
        Err(gap) => psd.title = Some(format!("{title} power spectral density ({gap})")),
    }

    let mut poincare = Figure::new(Some(format!("{title} Poincaré")));
    poincare.x.label = Some("RR_n (ms)".into());
    poincare.y.label = Some("RR_n+1 (ms)".into());
    poincare.add_series(Series::Scatter(ScatterSeries {
        name: "RR_n vs RR_n+1".into(),
        points: ms.windows(2).map(|w| [w[0], w[1]]).collect(),
        radius: 3,
        color: Color(PALETTE[0]),
    }));

    vec![tachogram, psd, poincare]
}

/// Quality check of one block: raw and cleaned cardiac trace with the detected beats marked.
pub fn figure_from_clean_ecg(raw: &TimeSeries, clean: &CleanEcg, title: &str) -> Figure {
    let mut fig = Figure::new(Some(format!("{title} quality check")));
    fig.x.label = Some("Time (s)".into());
    fig.y.label = Some("Amplitude".into());
    fig.add_series(Series::Line(LineSeries {
        name: "raw".into(),
        points: trace_points(raw),
        style: Style {
            width: 1.0,
            color: Color(0xB0B0B0),
        },
    }));
    fig.add_series(Series::Line(LineSeries {
        name: "cleaned".into(),
        points: trace_points(&clean.cleaned),
        style: Style {
            width: 1.4,
            color: Color(PALETTE[0]),
        },
    }));
    let dt = 1.0 / clean.cleaned.fs;
    let peaks: Vec<[f64; 2]> = clean
        .peaks
        .values
        .iter()
        .zip(&clean.cleaned.data)
        .enumerate()
        .filter(|(_, (flag, _))| **flag == 1)
        .map(|(i, (_, value))| [i as f64 * dt, *value])
        .collect();
    fig.add_series(Series::Scatter(ScatterSeries {
        name: format!("R peaks ({})", peaks.len()),
        points: peaks,
        radius: 3,
        color: Color(PALETTE[3]),
    }));
    fig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{extract_hrv, HrvConfig};
    use crate::signal::IndicatorTrain;

    fn evoked() -> Evoked {
        Evoked {
            fs: 10.0,
            tmin: -0.2,
            names: (0..7).map(|i| format!("ch{i}")).collect(),
            data: (0..7).map(|i| vec![i as f64; 9]).collect(),
            n_averaged: 12,
        }
    }

    #[test]
    fn one_series_per_channel_with_latency_axis() {
        let fig = figure_from_evoked(&evoked(), "S1_EC_1");
        assert_eq!(fig.title.as_deref(), Some("S1_EC_1 (n=12)"));
        assert_eq!(fig.series.len(), 7);
        let Series::Line(first) = &fig.series[0] else {
            panic!("expected a line series");
        };
        assert_eq!(first.name, "ch0");
        assert_eq!(first.points.len(), 9);
        assert!((first.points[0][0] + 0.2).abs() < 1e-12);
        assert!((first.points[8][0] - 0.6).abs() < 1e-12);
        let Series::Line(last) = &fig.series[6] else {
            panic!("expected a line series");
        };
        assert_eq!(last.style.color, Color(PALETTE[0]));
    }

    #[test]
    fn bounds_cover_all_series() {
        let fig = figure_from_evoked(&evoked(), "x");
        let (x0, x1, y0, y1) = fig.bounds().unwrap();
        assert!((x0 + 0.2).abs() < 1e-12 && (x1 - 0.6).abs() < 1e-12);
        assert_eq!((y0, y1), (0.0, 6.0));
        assert!(Figure::new(None).bounds().is_none());
    }

    #[test]
    fn hrv_panels_are_tachogram_spectrum_poincare() {
        let rr = RRSeries {
            rr: (0..80).map(|i| 0.8 + 0.05 * (i as f64 * 0.7).sin()).collect(),
        };
        let metrics = extract_hrv(&rr, &HrvConfig::default()).unwrap();
        let panels = figure_from_hrv(&rr, &metrics, "S1_EC_1");
        assert_eq!(panels.len(), 3);

        let Series::Line(tachogram) = &panels[0].series[0] else {
            panic!("expected a line series");
        };
        assert_eq!(tachogram.points.len(), 80);
        assert!((tachogram.points[0][0] - rr.rr[0]).abs() < 1e-12);
        assert!((tachogram.points[0][1] - rr.rr[0] * 1000.0).abs() < 1e-9);
        let elapsed: f64 = rr.rr.iter().sum();
        assert!((tachogram.points[79][0] - elapsed).abs() < 1e-9);

        let Series::Line(spectrum) = &panels[1].series[0] else {
            panic!("expected a line series");
        };
        assert!(!spectrum.points.is_empty());
        assert!(spectrum.points.iter().all(|p| p[0] <= 0.5));

        let Series::Scatter(poincare) = &panels[2].series[0] else {
            panic!("expected a scatter series");
        };
        assert_eq!(poincare.points.len(), 79);
        assert_eq!(poincare.points[0][1], poincare.points[1][0]);
    }

    #[test]
    fn hrv_spectrum_panel_is_empty_without_frequency_domain() {
        let rr = RRSeries {
            rr: vec![0.8, 0.82, 0.79],
        };
        let metrics = extract_hrv(&rr, &HrvConfig::default()).unwrap();
        let panels = figure_from_hrv(&rr, &metrics, "S1_EO_2");
        assert!(panels[1].series.is_empty());
        assert!(panels[1].title.as_deref().unwrap().contains("only 3 intervals"));
        assert!(panels[1].bounds().is_none());
        assert_eq!(panels[2].series[0].points().len(), 2);
    }

    #[test]
    fn quality_check_marks_detected_beats() {
        let fs = 100.0;
        let raw = TimeSeries {
            fs,
            data: (0..500).map(|i| (i as f64 * 0.1).sin() + 0.5).collect(),
        };
        let clean = CleanEcg {
            cleaned: TimeSeries {
                fs,
                data: (0..500).map(|i| (i as f64 * 0.1).sin()).collect(),
            },
            peaks: IndicatorTrain::from_peaks(fs, 500, &[16, 79, 142]),
        };
        let fig = figure_from_clean_ecg(&raw, &clean, "S1_EC_1");
        assert_eq!(fig.title.as_deref(), Some("S1_EC_1 quality check"));
        assert_eq!(fig.series.len(), 3);
        assert_eq!(fig.series[0].points().len(), 500);
        assert!((fig.series[1].points()[499][0] - 4.99).abs() < 1e-12);
        let Series::Scatter(beats) = &fig.series[2] else {
            panic!("expected a scatter series");
        };
        assert_eq!(beats.name, "R peaks (3)");
        assert!((beats.points[1][0] - 0.79).abs() < 1e-12);
        assert_eq!(beats.points[1][1], clean.cleaned.data[79]);
    }

    #[test]
    fn decimation_caps_point_count() {
        let points: Vec<[f64; 2]> = (0..10_000).map(|i| [i as f64, 0.0]).collect();
        assert_eq!(decimate_points(&points, 100).len(), 100);
        assert_eq!(decimate_points(&points[..50], 100).len(), 50);
    }

    #[test]
    fn color_splits_into_channels() {
        assert_eq!(Color(0x1F77B4).rgb(), (0x1F, 0x77, 0xB4));
    }
}
