use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hep_lib::{
    config::{read_config, PipelineConfig},
    detectors::PanTompkinsDetector,
    epochs::{average, extract_epochs, EpochConfig},
    events::synthesize_events,
    io::{recording::DirectorySource, text as text_io},
    metrics::hrv::{extract_hrv, HrvConfig},
    plot::{
        figure_from_clean_ecg, figure_from_evoked, figure_from_hrv, Figure, PlotBackend, Series,
    },
    session::{run_session, BlockOutcome, MetricTable},
    signal::{Events, IndicatorTrain, MultiChannel, RRSeries, TimeSeries},
};
use log::{debug, info};
use plotters::{coord::Shift, prelude::*};
use serde::Serialize;
use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

const MASTERSHEET: &str = "hrv_parameters_mastersheet.csv";

#[derive(Parser)]
#[command(
    name = "hep",
    version,
    about = "Heartbeat-evoked potentials and HRV from resting-state EEG/ECG"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every matching recording under --data and write the HRV table and HEPs to --out
    Session {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Substring recording file names must contain
        #[arg(long)]
        pattern: Option<String>,
        /// Recording file extension (edf or csv)
        #[arg(long)]
        extension: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        tmin: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        tmax: Option<f64>,
        /// Also render HRV, quality-check and HEP figures to PNG
        #[arg(long)]
        plots: bool,
    },
    /// HRV metrics from newline-delimited RR intervals (seconds)
    Hrv {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 4.0)]
        interp_fs: f64,
        #[arg(long, default_value_t = 30.0)]
        welch_window_s: f64,
    },
    /// Event timeline from a newline-delimited 0/1 heartbeat indicator train
    Events {
        #[arg(long)]
        fs: f64,
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Heartbeat-evoked average of one channel around the given event sample indices
    Epochs {
        #[arg(long)]
        fs: f64,
        #[arg(long)]
        events: PathBuf,
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = -0.2, allow_hyphen_values = true)]
        tmin: f64,
        #[arg(long, default_value_t = 0.6, allow_hyphen_values = true)]
        tmax: f64,
    },
}

#[derive(Serialize)]
struct EventsOutput {
    fs: f64,
    n_events: usize,
    indices: Vec<usize>,
    times: Vec<f64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Session {
            data,
            out,
            config,
            pattern,
            extension,
            tmin,
            tmax,
            plots,
        } => {
            let mut cfg = match config {
                Some(path) => read_config(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(pattern) = pattern {
                cfg.discovery.name_contains = pattern;
            }
            if let Some(extension) = extension {
                cfg.discovery.extension = extension;
            }
            apply_window(&mut cfg.epochs, tmin, tmax);
            cmd_session(&data, &out, &cfg, plots)?
        }
        Commands::Hrv {
            input,
            interp_fs,
            welch_window_s,
        } => cmd_hrv(
            input.as_deref(),
            HrvConfig {
                interp_fs,
                welch_window_s,
                ..HrvConfig::default()
            },
        )?,
        Commands::Events { fs, input } => cmd_events(fs, input.as_deref())?,
        Commands::Epochs {
            fs,
            events,
            input,
            tmin,
            tmax,
        } => cmd_epochs(fs, &events, input.as_deref(), tmin, tmax)?,
    }
    Ok(())
}

fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Override the epoch window, keeping the baseline inside it.
fn apply_window(epochs: &mut EpochConfig, tmin: Option<f64>, tmax: Option<f64>) {
    if let Some(tmin) = tmin {
        epochs.tmin = tmin;
    }
    if let Some(tmax) = tmax {
        epochs.tmax = tmax;
    }
    if let Some((b0, b1)) = epochs.baseline {
        let clipped = (b0.max(epochs.tmin), b1.min(epochs.tmax));
        epochs.baseline = (clipped.0 <= clipped.1).then_some(clipped);
        debug!("baseline {:?} -> {:?}", (b0, b1), epochs.baseline);
    }
}

fn cmd_session(data: &Path, out: &Path, cfg: &PipelineConfig, plots: bool) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let source = DirectorySource::new(data, cfg.discovery.clone());
    let detector = PanTompkinsDetector::new(cfg.detector);
    let mut table = MetricTable::new();
    let mut first_err: Option<anyhow::Error> = None;
    let summary = run_session(&source, cfg, &detector, &mut table, |outcome| {
        if first_err.is_some() {
            return;
        }
        if let Err(err) = write_block_outputs(out, outcome, plots) {
            first_err = Some(err);
        }
    })?;
    if let Some(err) = first_err {
        return Err(err);
    }

    let table_path = out.join(MASTERSHEET);
    table.write_csv(&table_path)?;
    info!("wrote {} rows to {}", table.len(), table_path.display());
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

/// `<tag>_hep.json`, plus `<tag>.png`, `<tag>_qual_check.png` and `<tag>_hep.png` with `plots`.
fn write_block_outputs(out: &Path, outcome: &BlockOutcome, plots: bool) -> Result<()> {
    let tag = outcome.record.tag();
    if let Some(evoked) = &outcome.evoked {
        let json_path = out.join(format!("{tag}_hep.json"));
        fs::write(&json_path, serde_json::to_string_pretty(evoked)?)
            .with_context(|| format!("writing {}", json_path.display()))?;
    }
    if !plots {
        return Ok(());
    }
    let hrv_path = out.join(format!("{tag}.png"));
    PngBackend::new(&hrv_path)
        .with_size(900, 1200)
        .draw_panels(&figure_from_hrv(&outcome.rr, &outcome.metrics, &tag))?;
    let qual_path = out.join(format!("{tag}_qual_check.png"));
    PngBackend::new(&qual_path)
        .with_size(1200, 480)
        .draw(&figure_from_clean_ecg(&outcome.ecg, &outcome.clean, &tag))?;
    if let Some(evoked) = &outcome.evoked {
        let hep_path = out.join(format!("{tag}_hep.png"));
        PngBackend::new(&hep_path).draw(&figure_from_evoked(evoked, &tag))?;
    }
    debug!("{tag}: figures written to {}", out.display());
    Ok(())
}

fn cmd_hrv(input: Option<&Path>, cfg: HrvConfig) -> Result<()> {
    let rr = RRSeries {
        rr: text_io::parse_f64_series(&read_input(input)?)?,
    };
    let metrics = extract_hrv(&rr, &cfg)?;
    println!("{}", serde_json::to_string(&metrics.to_map())?);
    Ok(())
}

fn cmd_events(fs: f64, input: Option<&Path>) -> Result<()> {
    let values = text_io::parse_indicator_train(&read_input(input)?)?;
    let train = IndicatorTrain::new(fs, values)?;
    let events = synthesize_events(&train)?;
    let out = EventsOutput {
        fs,
        n_events: events.len(),
        times: events.times(fs),
        indices: events.indices,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn cmd_epochs(fs: f64, events: &Path, input: Option<&Path>, tmin: f64, tmax: f64) -> Result<()> {
    let data = text_io::parse_f64_series(&read_input(input)?)?;
    let events = Events::from_indices(text_io::read_event_indices(events)?);
    let mut signal = MultiChannel::new(fs);
    signal.push_channel("signal", TimeSeries { fs, data })?;
    let mut cfg = EpochConfig::default();
    apply_window(&mut cfg, Some(tmin), Some(tmax));
    let epochs = extract_epochs(&signal, &events, &cfg)?;
    for dropped in &epochs.drop_log {
        info!(
            "event {} at sample {} dropped: {:?}",
            dropped.event_index, dropped.event_sample, dropped.reason
        );
    }
    let evoked = average(&epochs)?;
    println!("{}", serde_json::to_string(&evoked)?);
    Ok(())
}

/// Renders figures to PNG files with plotters.
struct PngBackend {
    path: PathBuf,
    size: (u32, u32),
}

impl PngBackend {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            size: (800, 480),
        }
    }

    fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }
}

impl PlotBackend for PngBackend {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        self.draw_panels(std::slice::from_ref(fig))
    }

    fn draw_panels(&mut self, figs: &[Figure]) -> Result<()> {
        let backend = BitMapBackend::new(&self.path, self.size);
        let root = backend.into_drawing_area();
        root.fill(&WHITE)?;
        let areas = root.split_evenly((figs.len().max(1), 1));
        for (area, fig) in areas.iter().zip(figs) {
            draw_figure(area, fig)?;
        }
        root.present().with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

fn draw_figure(area: &DrawingArea<BitMapBackend<'_>, Shift>, fig: &Figure) -> Result<()> {
    let (x_min, x_max, y_min, y_max) = fig.bounds().unwrap_or((0.0, 1.0, 0.0, 1.0));
    let pad = ((y_max - y_min) * 0.05).max(1e-9);
    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max.max(x_min + 1e-9), (y_min - pad)..(y_max + pad))?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let (r, g, b) = line.style.color.rgb();
                let color = RGBColor(r, g, b);
                chart
                    .draw_series(LineSeries::new(
                        line.points.iter().map(|p| (p[0], p[1])),
                        color.stroke_width(line.style.width.round().max(1.0) as u32),
                    ))?
                    .label(line.name.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
            Series::Scatter(scatter) => {
                let (r, g, b) = scatter.color.rgb();
                let color = RGBColor(r, g, b);
                let radius = scatter.radius;
                chart
                    .draw_series(
                        scatter
                            .points
                            .iter()
                            .map(|p| Circle::new((p[0], p[1]), radius, color.filled())),
                    )?
                    .label(scatter.name.clone())
                    .legend(move |(x, y)| Circle::new((x + 10, y), radius, color.filled()));
            }
        }
    }
    if !fig.series.is_empty() {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }
    Ok(())
}
