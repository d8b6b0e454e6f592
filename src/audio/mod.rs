//! Audio ingestion pipeline
//!
//! Raw blocks come in from a loopback endpoint or a file decoder, get
//! normalized into XY points, and land in a bounded history (live) or a
//! fully decoded array with a playback cursor (file). The renderer only
//! ever talks to the `AudioSource` trait.

mod capture;
mod decode;
mod file;
mod format;
mod history;
mod loopback;
mod source;

pub use capture::{CaptureOptions, CaptureState, LiveCapture};
pub use decode::ChannelOptions;
pub use file::{FilePhase, FileSession};
pub use format::XyPoint;
pub use history::HistoryBuffer;
pub use loopback::LoopbackEndpoint;
pub use source::{AudioSource, SourceStatus};
