//! Render module - the oscilloscope widget and its coordinate mapping

mod oscilloscope;

pub use oscilloscope::{plot_point, Oscilloscope, OscilloscopeSettings};
