//! Splitting a continuous recording into labelled resting blocks and picking the cardiac lead.

use crate::{
    error::{HepError, Result},
    io::eeg::BidsEvent,
    metrics::record::Condition,
    signal::{Detrend, MultiChannel, TimeSeries},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Marker labels (`trial_type`) that open a block.
    pub labels: Vec<String>,
    /// Block length in seconds, measured from the marker onset.
    pub duration_s: f64,
    pub detrend: Detrend,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            labels: vec!["eyes_closed".into(), "eyes_open".into()],
            duration_s: 60.0,
            detrend: Detrend::Linear,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub primary: String,
    pub fallback: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            primary: "ECG1".into(),
            fallback: "ECG2".into(),
        }
    }
}

/// One resting segment cut out of a recording.
#[derive(Debug, Clone)]
pub struct Block {
    /// 1-based position among the recording's blocks.
    pub sequence: usize,
    pub condition: Condition,
    /// Label of the marker that opened the block.
    pub label: String,
    pub start_sample: usize,
    pub signal: MultiChannel,
}

/// Cut one block per matching marker, in onset order.
///
/// The condition follows the block's position (even 0-based index: eyes closed). A block
/// running past the end of the data is an error for that block only.
pub fn segment_blocks(
    signal: &MultiChannel,
    markers: &[BidsEvent],
    cfg: &BlockConfig,
) -> Vec<Result<Block>> {
    let mut openers: Vec<&BidsEvent> = markers
        .iter()
        .filter(|m| {
            m.trial_type
                .as_deref()
                .is_some_and(|label| cfg.labels.iter().any(|l| l == label))
        })
        .collect();
    openers.sort_by(|a, b| a.onset.total_cmp(&b.onset));

    let span = (cfg.duration_s * signal.fs).round() as usize;
    openers
        .into_iter()
        .enumerate()
        .map(|(idx, marker)| {
            let sequence = idx + 1;
            let start = (marker.onset.max(0.0) * signal.fs).round() as usize;
            let end = match start.checked_add(span) {
                Some(end) if end < signal.len() => end,
                end => {
                    return Err(HepError::BlockOutOfRange {
                        sequence,
                        end: end.unwrap_or(usize::MAX),
                        len: signal.len(),
                    })
                }
            };
            let mut segment = signal.slice(start, end)?;
            for channel in segment.data.iter_mut() {
                cfg.detrend.apply(channel);
            }
            Ok(Block {
                sequence,
                condition: Condition::from_sequence(idx),
                label: marker.trial_type.clone().unwrap_or_default(),
                start_sample: start,
                signal: segment,
            })
        })
        .collect()
}

/// The primary cardiac channel, or the fallback when the primary is absent.
pub fn select_cardiac_channel(signal: &MultiChannel, cfg: &ChannelConfig) -> Result<TimeSeries> {
    signal
        .channel(&cfg.primary)
        .or_else(|| signal.channel(&cfg.fallback))
        .ok_or_else(|| HepError::MissingChannel {
            wanted: vec![cfg.primary.clone(), cfg.fallback.clone()],
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(fs: f64, seconds: f64, names: &[&str]) -> MultiChannel {
        let n = (seconds * fs) as usize;
        let mut mc = MultiChannel::new(fs);
        for (k, name) in names.iter().enumerate() {
            let data = (0..n).map(|i| k as f64 + i as f64 * 0.001).collect();
            mc.push_channel(*name, TimeSeries { fs, data }).unwrap();
        }
        mc
    }

    fn marker(onset: f64, label: &str) -> BidsEvent {
        BidsEvent {
            onset,
            duration: None,
            trial_type: Some(label.into()),
        }
    }

    #[test]
    fn blocks_alternate_and_follow_onset_order() {
        let signal = recording(100.0, 300.0, &["Fz", "ECG1"]);
        let markers = vec![
            marker(130.0, "eyes_closed"),
            marker(5.0, "eyes_closed"),
            marker(50.0, "boundary"),
            marker(66.0, "eyes_open"),
        ];
        let blocks: Vec<Block> = segment_blocks(&signal, &markers, &BlockConfig::default())
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(blocks.len(), 3);
        let starts: Vec<usize> = blocks.iter().map(|b| b.start_sample).collect();
        assert_eq!(starts, vec![500, 6600, 13000]);
        let conditions: Vec<Condition> = blocks.iter().map(|b| b.condition).collect();
        assert_eq!(
            conditions,
            vec![
                Condition::EyesClosed,
                Condition::EyesOpen,
                Condition::EyesClosed
            ]
        );
        assert!(blocks.iter().all(|b| b.signal.len() == 6001));
        assert_eq!(blocks[1].sequence, 2);
    }

    #[test]
    fn overrunning_block_fails_alone() {
        let signal = recording(100.0, 100.0, &["ECG1"]);
        let markers = vec![marker(1.0, "eyes_closed"), marker(61.0, "eyes_open")];
        let results = segment_blocks(&signal, &markers, &BlockConfig::default());
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(HepError::BlockOutOfRange { sequence: 2, .. })
        ));
    }

    #[test]
    fn far_future_onset_is_out_of_range() {
        let signal = recording(100.0, 100.0, &["ECG1"]);
        let markers = vec![marker(1.0, "eyes_closed"), marker(1e300, "eyes_open")];
        let results = segment_blocks(&signal, &markers, &BlockConfig::default());
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(HepError::BlockOutOfRange {
                sequence: 2,
                end: usize::MAX,
                ..
            })
        ));
    }

    #[test]
    fn linear_detrend_removes_drift() {
        let signal = recording(100.0, 80.0, &["ECG1"]);
        let markers = [marker(0.0, "eyes_closed")];
        let blocks = segment_blocks(&signal, &markers, &BlockConfig::default());
        let block = blocks.into_iter().next().unwrap().unwrap();
        assert!(block.signal.data[0].iter().all(|x| x.abs() < 1e-6));
    }

    #[test]
    fn cardiac_channel_falls_back() {
        let cfg = ChannelConfig::default();
        let both = recording(100.0, 1.0, &["ECG1", "ECG2"]);
        assert_eq!(select_cardiac_channel(&both, &cfg).unwrap().data[0], 0.0);
        let fallback = recording(100.0, 1.0, &["Fz", "ECG2"]);
        assert_eq!(select_cardiac_channel(&fallback, &cfg).unwrap().data[0], 1.0);
        let none = recording(100.0, 1.0, &["Fz"]);
        assert!(matches!(
            select_cardiac_channel(&none, &cfg),
            Err(HepError::MissingChannel { .. })
        ));
    }
}
