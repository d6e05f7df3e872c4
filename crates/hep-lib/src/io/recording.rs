//! Discovery and loading of recordings with their block markers.

use crate::error::HepError;
use crate::signal::{MultiChannel, TimeSeries};
use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use super::eeg::{load_bids_events, load_edf_recording, BidsEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// File extension of recordings (`edf` or `csv`), compared case-insensitively.
    pub extension: String,
    /// Substring a file name must contain to be processed.
    pub name_contains: String,
    /// Sampling rate assumed for CSV recordings (Hz).
    pub csv_fs: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            extension: "edf".into(),
            name_contains: "prewm".into(),
            csv_fs: 250.0,
        }
    }
}

/// A loaded recording: subject id, all channels and the block markers.
#[derive(Debug, Clone)]
pub struct Recording {
    pub subject: String,
    pub signal: MultiChannel,
    pub markers: Vec<BidsEvent>,
}

/// Anything that can enumerate recordings and load them one at a time.
pub trait RecordingSource {
    /// Recordings to process, in processing order. Finding none is an error.
    fn discover(&self) -> Result<Vec<PathBuf>>;
    fn load(&self, path: &Path) -> Result<Recording>;
}

/// Recordings found by walking a directory tree.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    pub root: PathBuf,
    pub config: DiscoveryConfig,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, config: DiscoveryConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    fn matches(&self, path: &Path) -> bool {
        let ext_ok = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.extension));
        let name_ok = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.contains(&self.config.name_contains));
        ext_ok && name_ok
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
        for entry in entries {
            let path = entry
                .with_context(|| format!("listing {}", dir.display()))?
                .path();
            if path.is_dir() {
                self.walk(&path, out)?;
            } else if self.matches(&path) {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl RecordingSource for DirectorySource {
    fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        self.walk(&self.root, &mut files)?;
        files.sort();
        if files.is_empty() {
            return Err(HepError::NoInputFiles {
                dir: self.root.clone(),
                pattern: format!("*{}*.{}", self.config.name_contains, self.config.extension),
            }
            .into());
        }
        debug!("discovered {} recordings under {}", files.len(), self.root.display());
        Ok(files)
    }

    fn load(&self, path: &Path) -> Result<Recording> {
        let signal = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("edf") => load_edf_recording(path)?,
            Some(ext) if ext.eq_ignore_ascii_case("csv") => {
                load_csv_recording(path, self.config.csv_fs)?
            }
            _ => bail!("unsupported recording format: {}", path.display()),
        };
        let sidecar = find_events_sidecar(path)
            .with_context(|| format!("no events.tsv next to {}", path.display()))?;
        let markers = load_bids_events(&sidecar)?;
        Ok(Recording {
            subject: subject_id(path),
            signal,
            markers,
        })
    }
}

/// File name up to the first `.`, then up to the first `_`.
pub fn subject_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = name.split('.').next().unwrap_or_default();
    base.split('_').next().unwrap_or_default().to_string()
}

/// Locate the BIDS events file belonging to a recording.
pub fn find_events_sidecar(path: &Path) -> Option<PathBuf> {
    let dir = path.parent()?;
    let stem = path.file_stem()?.to_str()?;
    let mut candidates = vec![
        dir.join(format!("{stem}_events.tsv")),
        dir.join(format!("{stem}.tsv")),
    ];
    if let Some(prefix) = stem.strip_suffix("_eeg") {
        candidates.push(dir.join(format!("{prefix}_events.tsv")));
    }
    candidates.into_iter().find(|candidate| candidate.is_file())
}

/// Load a CSV recording: a header row of channel names, then one row per sample.
pub fn load_csv_recording(path: &Path, fs: f64) -> Result<MultiChannel> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.context("reading record")?;
        for (column, value) in columns.iter_mut().zip(record.iter()) {
            let value = value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("row {} of {}: '{}'", row + 1, path.display(), value))?;
            column.push(value);
        }
    }
    let mut signal = MultiChannel::new(fs);
    for (name, data) in headers.iter().zip(columns) {
        signal.push_channel(name.trim(), TimeSeries { fs, data })?;
    }
    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const EVENTS: &str = "onset\tduration\ttrial_type\n0.5\t60\teyes_closed\n";

    #[test]
    fn subject_is_prefix_before_underscore() {
        assert_eq!(subject_id(Path::new("/data/S012_prewm.edf")), "S012");
        assert_eq!(subject_id(Path::new("S3.prewm_eeg.edf")), "S3");
        assert_eq!(subject_id(Path::new("plain.edf")), "plain");
    }

    #[test]
    fn sidecar_lookup_order() {
        let dir = tempdir().unwrap();
        let rec = dir.path().join("sub-01_task-rest_eeg.edf");
        assert!(find_events_sidecar(&rec).is_none());

        let bids = dir.path().join("sub-01_task-rest_events.tsv");
        std::fs::write(&bids, EVENTS).unwrap();
        assert_eq!(find_events_sidecar(&rec), Some(bids));

        let direct = dir.path().join("sub-01_task-rest_eeg_events.tsv");
        std::fs::write(&direct, EVENTS).unwrap();
        assert_eq!(find_events_sidecar(&rec), Some(direct));
    }

    #[test]
    fn discovery_is_recursive_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("b");
        std::fs::create_dir(&nested).unwrap();
        for path in [
            nested.join("S2_prewm.csv"),
            dir.path().join("S1_prewm.CSV"),
            dir.path().join("S1_postwm.csv"),
            dir.path().join("S1_prewm.txt"),
        ] {
            std::fs::write(path, "ECG1\n0\n").unwrap();
        }
        let config = DiscoveryConfig {
            extension: "csv".into(),
            ..DiscoveryConfig::default()
        };
        let files = DirectorySource::new(dir.path(), config).discover().unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["S1_prewm.CSV", "S2_prewm.csv"]);
    }

    #[test]
    fn empty_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let err = DirectorySource::new(dir.path(), DiscoveryConfig::default())
            .discover()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HepError>(),
            Some(HepError::NoInputFiles { .. })
        ));
    }

    #[test]
    fn loads_csv_recording_with_markers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("S7_prewm.csv");
        std::fs::write(&path, "Fz, ECG1\n1.0,2.0\n3.0,4.0\n5.0,6.0\n").unwrap();
        std::fs::write(dir.path().join("S7_prewm_events.tsv"), EVENTS).unwrap();
        let config = DiscoveryConfig {
            extension: "csv".into(),
            csv_fs: 100.0,
            ..DiscoveryConfig::default()
        };
        let recording = DirectorySource::new(dir.path(), config).load(&path).unwrap();
        assert_eq!(recording.subject, "S7");
        assert_eq!(recording.signal.names, vec!["Fz", "ECG1"]);
        assert_eq!(recording.signal.fs, 100.0);
        assert_eq!(recording.signal.channel("ECG1").unwrap().data, vec![2.0, 4.0, 6.0]);
        assert_eq!(recording.markers.len(), 1);
    }

    #[test]
    fn malformed_csv_value_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "ECG1\n1.0\noops\n").unwrap();
        let err = load_csv_recording(&path, 250.0).unwrap_err();
        assert!(format!("{err:#}").contains("row 2"));
    }
}
