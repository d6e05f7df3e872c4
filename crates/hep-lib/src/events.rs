//! Turns a heartbeat indicator train into a discrete event timeline.

use crate::{
    error::{HepError, Result},
    signal::{Events, IndicatorTrain},
};

/// Minimum number of beats needed for averaging and interval metrics.
pub const MIN_EVENTS: usize = 2;

/// Collect the sample positions where the train switches on.
///
/// A run of consecutive ones counts as a single beat located at the run's first sample, so the
/// timeline is strictly increasing with no zero-width gaps.
pub fn synthesize_events(train: &IndicatorTrain) -> Result<Events> {
    let mut indices = Vec::new();
    let mut prev = 0u8;
    for (i, &value) in train.values.iter().enumerate() {
        if value > 1 {
            return Err(HepError::InvalidIndicator { index: i, value });
        }
        if value == 1 && prev == 0 {
            indices.push(i);
        }
        prev = value;
    }
    if indices.len() < MIN_EVENTS {
        return Err(HepError::InsufficientEvents {
            found: indices.len(),
        });
    }
    Ok(Events::from_indices(indices))
}
