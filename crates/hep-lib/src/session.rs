//! Session orchestration: files, then blocks, then HRV and HEP per block.

use crate::{
    blocks::{segment_blocks, select_cardiac_channel, Block},
    config::PipelineConfig,
    detectors::{CleanEcg, HeartbeatDetector},
    epochs::{average, extract_epochs, Evoked},
    error::{HepError, Result},
    events::synthesize_events,
    io::recording::RecordingSource,
    metrics::{block_tag, extract_hrv, Condition, HrvMetrics, HrvRecord},
    signal::{RRSeries, TimeSeries},
};
use csv::WriterBuilder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::mpsc::Sender;

/// Name of the cleaned cardiac trace appended to the HEP signal.
pub const CLEANED_ECG: &str = "cleaned_ECG";

/// Append-only destination for per-block metric records.
pub trait ResultSink {
    fn append(&mut self, record: HrvRecord);
}

/// In-memory table of metric records, one row per block.
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    records: Vec<HrvRecord>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[HrvRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Move every row of `other` into this table.
    pub fn merge(&mut self, other: MetricTable) {
        self.records.extend(other.records);
    }

    /// Sorted union of metric names over all rows.
    pub fn metric_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .records
            .iter()
            .flat_map(|record| record.metrics.keys())
            .collect();
        names.into_iter().cloned().collect()
    }

    /// Write the table as CSV: the three tag columns, then one column per metric.
    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let file = fs::File::create(path)?;
        let mut writer = WriterBuilder::new().from_writer(file);
        let names = self.metric_names();
        let mut header = vec![
            "Subject_name".to_string(),
            "Condition".to_string(),
            "Sequence".to_string(),
        ];
        header.extend(names.iter().cloned());
        writer.write_record(&header)?;
        for record in &self.records {
            let mut row = vec![
                record.subject.clone(),
                record.condition.to_string(),
                record.sequence.to_string(),
            ];
            row.extend(
                names
                    .iter()
                    .map(|name| record.get(name).map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl ResultSink for MetricTable {
    fn append(&mut self, record: HrvRecord) {
        self.records.push(record);
    }
}

impl ResultSink for Sender<HrvRecord> {
    fn append(&mut self, record: HrvRecord) {
        if let Err(err) = self.send(record) {
            warn!("metric receiver hung up, dropping row {}", err.0.tag());
        }
    }
}

/// Everything produced for one block.
#[derive(Debug, Clone)]
pub struct BlockOutcome {
    pub record: HrvRecord,
    /// Heartbeat-evoked average; `None` when no epoch fit the block.
    pub evoked: Option<Evoked>,
    pub n_events: usize,
    pub epochs_dropped: usize,
    /// Selected cardiac channel before cleaning.
    pub ecg: TimeSeries,
    pub clean: CleanEcg,
    pub rr: RRSeries,
    pub metrics: HrvMetrics,
}

/// Warning logged when block `index` (0-based) of a recording fails.
fn block_failure_message(subject: &str, index: usize, err: &HepError) -> String {
    let tag = block_tag(subject, Condition::from_sequence(index), index + 1);
    format!("block {tag} failed: {err}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub files: usize,
    pub files_skipped: usize,
    pub blocks_ok: usize,
    pub blocks_failed: usize,
    pub heps: usize,
}

/// Clean, detect, synthesize events, then compute HRV and the heartbeat-evoked average.
pub fn process_block<D: HeartbeatDetector + ?Sized>(
    subject: &str,
    block: &Block,
    config: &PipelineConfig,
    detector: &D,
) -> Result<BlockOutcome> {
    let ecg = select_cardiac_channel(&block.signal, &config.channels)?;
    let clean = detector.process(&ecg)?;
    if clean.peaks.len() != ecg.len() || clean.cleaned.len() != ecg.len() {
        return Err(HepError::ShapeMismatch(format!(
            "detector returned {} indicator and {} cleaned samples for {} input samples",
            clean.peaks.len(),
            clean.cleaned.len(),
            ecg.len()
        )));
    }
    let events = synthesize_events(&clean.peaks)?;

    let rr = RRSeries::from_events(&events, ecg.fs);
    let metrics = extract_hrv(&rr, &config.hrv)?;
    let record = HrvRecord::new(subject, block.condition, block.sequence, metrics.to_map());
    if let Err(gap) = &metrics.frequency {
        warn!("{}: frequency-domain HRV missing ({gap})", record.tag());
    }

    let mut hep_signal = block.signal.clone();
    hep_signal.push_channel(CLEANED_ECG, clean.cleaned.clone())?;
    let epochs = extract_epochs(&hep_signal, &events, &config.epochs)?;
    for dropped in &epochs.drop_log {
        debug!(
            "{}: epoch for event {} at sample {} dropped: {:?}",
            record.tag(),
            dropped.event_index,
            dropped.event_sample,
            dropped.reason
        );
    }
    let evoked = match average(&epochs) {
        Ok(evoked) => Some(evoked),
        Err(HepError::NoEpochs) => {
            warn!("no HEP computed for block {}", record.tag());
            None
        }
        Err(err) => return Err(err),
    };

    Ok(BlockOutcome {
        record,
        evoked,
        n_events: events.len(),
        epochs_dropped: epochs.drop_log.len(),
        ecg,
        clean,
        rr,
        metrics,
    })
}

/// Run every discovered recording through the block pipeline.
///
/// Only discovery failure is fatal. A file that fails to load, or a block that fails at any
/// stage, is logged and skipped. Each successful block's record goes to `sink` and the
/// whole outcome to `observer`.
pub fn run_session<S, D, K, F>(
    source: &S,
    config: &PipelineConfig,
    detector: &D,
    sink: &mut K,
    mut observer: F,
) -> anyhow::Result<SessionSummary>
where
    S: RecordingSource + ?Sized,
    D: HeartbeatDetector + ?Sized,
    K: ResultSink + ?Sized,
    F: FnMut(&BlockOutcome),
{
    let files = source.discover()?;
    let mut summary = SessionSummary {
        files: files.len(),
        ..SessionSummary::default()
    };

    for path in &files {
        let recording = match source.load(path) {
            Ok(recording) => recording,
            Err(err) => {
                warn!("skipping {}: {err:#}", path.display());
                summary.files_skipped += 1;
                continue;
            }
        };
        info!(
            "{}: subject {}, {} channels, {} samples at {} Hz",
            path.display(),
            recording.subject,
            recording.signal.n_channels(),
            recording.signal.len(),
            recording.signal.fs
        );

        let blocks = segment_blocks(&recording.signal, &recording.markers, &config.blocks);
        if blocks.is_empty() {
            warn!("{}: no block markers among {:?}", path.display(), config.blocks.labels);
        }
        for (idx, block) in blocks.into_iter().enumerate() {
            let outcome = block.and_then(|block| {
                debug!(
                    "block {} ({}, '{}') starts at sample {}",
                    block.sequence, block.condition, block.label, block.start_sample
                );
                process_block(&recording.subject, &block, config, detector)
            });
            match outcome {
                Ok(outcome) => {
                    info!(
                        "{}: {} beats, {} epochs dropped",
                        outcome.record.tag(),
                        outcome.n_events,
                        outcome.epochs_dropped
                    );
                    summary.blocks_ok += 1;
                    if outcome.evoked.is_some() {
                        summary.heps += 1;
                    }
                    observer(&outcome);
                    sink.append(outcome.record);
                }
                Err(err) => {
                    warn!("{}", block_failure_message(&recording.subject, idx, &err));
                    summary.blocks_failed += 1;
                }
            }
        }
    }
    Ok(summary)
}
