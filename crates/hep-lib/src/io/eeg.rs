use crate::signal::{MultiChannel, TimeSeries};
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use edf_reader::file_reader::SyncFileReader;
use edf_reader::sync_reader::SyncEDFReader;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Label EDF+ uses for its embedded annotation signal.
const EDF_ANNOTATIONS: &str = "EDF Annotations";

/// Helper implementing the EDF reader trait for on-disk files.
struct DiskFileReader {
    path: PathBuf,
}

impl DiskFileReader {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl SyncFileReader for DiskFileReader {
    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>, std::io::Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Load every signal channel of an EDF/EDF+ file.
///
/// All channels must share the sampling rate of the first one; the annotation channel is skipped.
pub fn load_edf_recording(path: &Path) -> Result<MultiChannel> {
    let reader = SyncEDFReader::init_with_file_reader(DiskFileReader::new(path))
        .with_context(|| format!("opening EDF {}", path.display()))?;
    let header = &reader.edf_header;
    let total_duration = header.block_duration * header.number_of_blocks;
    let data_matrix = reader.read_data_window(0, total_duration)?;

    let mut recording: Option<MultiChannel> = None;
    for (idx, channel) in header.channels.iter().enumerate() {
        let name = channel.label.trim().to_string();
        if name == EDF_ANNOTATIONS {
            continue;
        }
        let fs = channel.number_of_samples_in_data_record as f64 * 1000.0
            / header.block_duration as f64;
        let samples = data_matrix
            .get(idx)
            .ok_or_else(|| anyhow!("missing data for EDF channel {}", name))?;
        let ts = TimeSeries {
            fs,
            data: samples.iter().map(|value| *value as f64).collect(),
        };
        recording
            .get_or_insert_with(|| MultiChannel::new(fs))
            .push_channel(name, ts)
            .with_context(|| format!("combining channels of {}", path.display()))?;
    }
    recording.ok_or_else(|| anyhow!("EDF file {} has no signal channels", path.display()))
}

/// Simple BIDS event descriptor extracted from an `events.tsv` file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BidsEvent {
    pub onset: f64,
    pub duration: Option<f64>,
    pub trial_type: Option<String>,
}

impl BidsEvent {
    fn from_record(
        record: &StringRecord,
        onset_idx: usize,
        duration_idx: Option<usize>,
        trial_idx: Option<usize>,
    ) -> Result<Self> {
        let onset = record
            .get(onset_idx)
            .ok_or_else(|| anyhow!("missing onset column"))?
            .trim()
            .parse::<f64>()
            .context("parsing onset")?;
        let duration = duration_idx
            .and_then(|idx| record.get(idx))
            .and_then(|value| value.trim().parse::<f64>().ok());
        let trial_type = trial_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty() && *value != "n/a")
            .map(|value| value.to_string());
        Ok(Self {
            onset,
            duration,
            trial_type,
        })
    }
}

/// Load BIDS `events.tsv` into structured `BidsEvent` rows.
pub fn load_bids_events(path: &Path) -> Result<Vec<BidsEvent>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let onset_idx = headers
        .iter()
        .position(|header| header.eq_ignore_ascii_case("onset"))
        .ok_or_else(|| anyhow!("events.tsv must include an onset column"))?;
    let duration_idx = headers
        .iter()
        .position(|header| header.eq_ignore_ascii_case("duration"));
    let trial_idx = headers
        .iter()
        .position(|header| header.eq_ignore_ascii_case("trial_type"));
    let mut out = Vec::new();
    for result in reader.records() {
        let record = result.context("reading events record")?;
        out.push(BidsEvent::from_record(
            &record,
            onset_idx,
            duration_idx,
            trial_idx,
        )?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_bids_events_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub-01_events.tsv");
        std::fs::write(
            &path,
            "onset\tduration\ttrial_type\n2.0\t60\teyes_closed\n64.5\tn/a\teyes_open\n130\t0\tn/a\n",
        )
        .unwrap();
        let events = load_bids_events(&path).expect("read sample events");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].onset, 2.0);
        assert_eq!(events[0].duration, Some(60.0));
        assert_eq!(events[1].duration, None);
        assert_eq!(events[1].trial_type.as_deref(), Some("eyes_open"));
        assert_eq!(events[2].trial_type, None);
    }

    #[test]
    fn events_without_onset_column_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad_events.tsv");
        std::fs::write(&path, "time\ttrial_type\n1.0\teyes_open\n").unwrap();
        assert!(load_bids_events(&path).is_err());
    }

    #[test]
    fn missing_edf_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_edf_recording(&dir.path().join("absent.edf")).is_err());
    }
}
