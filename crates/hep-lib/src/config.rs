//! Pipeline settings loaded from TOML. Every section and field is optional.

use crate::{
    blocks::{BlockConfig, ChannelConfig},
    detectors::DetectorConfig,
    epochs::EpochConfig,
    io::recording::DiscoveryConfig,
    metrics::HrvConfig,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub discovery: DiscoveryConfig,
    pub blocks: BlockConfig,
    pub channels: ChannelConfig,
    pub detector: DetectorConfig,
    pub epochs: EpochConfig,
    pub hrv: HrvConfig,
}

pub fn parse_config(text: &str) -> Result<PipelineConfig> {
    toml::from_str(text).context("parsing pipeline config")
}

pub fn read_config(path: &Path) -> Result<PipelineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Detrend;

    #[test]
    fn empty_document_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.discovery.name_contains, "prewm");
        assert_eq!(config.channels.primary, "ECG1");
        assert_eq!(config.epochs.baseline, Some((-0.2, 0.0)));
        assert!(config.epochs.reject.is_disabled());
    }

    #[test]
    fn partial_sections_override_fields() {
        let config = parse_config(
            r#"
[discovery]
extension = "csv"
csv_fs = 500.0

[blocks]
duration_s = 30.0
detrend = "constant"

[epochs]
tmin = -0.1
baseline = [-0.1, 0.0]

[epochs.reject]
max_peak_to_peak = 150.0

[hrv]
welch_window_s = 60.0
"#,
        )
        .unwrap();
        assert_eq!(config.discovery.extension, "csv");
        assert_eq!(config.discovery.name_contains, "prewm");
        assert_eq!(config.discovery.csv_fs, 500.0);
        assert_eq!(config.blocks.duration_s, 30.0);
        assert_eq!(config.blocks.detrend, Detrend::Constant);
        assert_eq!(config.epochs.tmin, -0.1);
        assert_eq!(config.epochs.tmax, 0.6);
        assert_eq!(config.epochs.baseline, Some((-0.1, 0.0)));
        assert_eq!(config.epochs.reject.max_peak_to_peak, Some(150.0));
        assert_eq!(config.hrv.welch_window_s, 60.0);
        assert_eq!(config.hrv.interp_fs, 4.0);
    }

    #[test]
    fn unknown_detrend_is_rejected() {
        assert!(parse_config("[blocks]\ndetrend = \"quadratic\"\n").is_err());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(&path, "[channels]\nprimary = \"EKG\"\n").unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.channels.primary, "EKG");
        assert_eq!(config.channels.fallback, "ECG2");
    }
}
