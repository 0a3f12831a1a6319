//! Text rendering for the console view.

pub mod panels;
pub mod waveform;
