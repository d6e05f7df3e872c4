pub mod blocks;
pub mod config;
pub mod detectors;
pub mod epochs;
pub mod error;
pub mod events;
pub mod io;
pub mod metrics;
pub mod plot;
pub mod session;
pub mod signal;

#[cfg(test)]
mod testing;

pub use detectors::*;
pub use error::{HepError, Result};
pub use metrics::*;
pub use signal::*;
