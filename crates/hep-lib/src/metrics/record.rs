use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resting-state condition of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "EC")]
    EyesClosed,
    #[serde(rename = "EO")]
    EyesOpen,
}

impl Condition {
    /// Blocks alternate starting with eyes closed: even 0-based positions are EC.
    pub fn from_sequence(index: usize) -> Self {
        if index % 2 == 0 {
            Condition::EyesClosed
        } else {
            Condition::EyesOpen
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Condition::EyesClosed => "EC",
            Condition::EyesOpen => "EO",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `subject_condition_sequence`, used for output file names and log lines.
pub fn block_tag(subject: &str, condition: Condition, sequence: usize) -> String {
    format!("{subject}_{condition}_{sequence}")
}

/// One block's HRV metrics tagged with where they came from. `None` marks a missing metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvRecord {
    pub subject: String,
    pub condition: Condition,
    /// 1-based position of the block in its recording.
    pub sequence: usize,
    pub metrics: BTreeMap<String, Option<f64>>,
}

impl HrvRecord {
    pub fn new(
        subject: impl Into<String>,
        condition: Condition,
        sequence: usize,
        metrics: BTreeMap<String, Option<f64>>,
    ) -> Self {
        Self {
            subject: subject.into(),
            condition,
            sequence,
            metrics,
        }
    }

    pub fn tag(&self) -> String {
        block_tag(&self.subject, self.condition, self.sequence)
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.metrics.get(metric).copied().flatten()
    }
}
