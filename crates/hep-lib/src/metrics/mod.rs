pub mod hrv;
pub mod record;

pub use hrv::*;
pub use record::*;
