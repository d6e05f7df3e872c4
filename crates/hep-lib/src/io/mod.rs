pub mod eeg;
pub mod recording;
pub mod text;
