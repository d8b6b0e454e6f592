//! Mode-agnostic view of an ingestion session
//!
//! Both ingestion paths (live loopback capture and file decode) expose the
//! same two things to the renderer: the current point view and a coarse
//! status that selects the idle / active / fatal presentation. The
//! renderer never learns which mode produced the points.

use super::capture::{CaptureState, LiveCapture};
use super::file::{FilePhase, FileSession};
use super::format::XyPoint;

/// Renderer-facing session status.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceStatus {
    /// No points yet (starting up, decoding, or silence before first block).
    Waiting,
    /// Points are flowing.
    Active,
    /// Playback ran to the end (file mode only).
    Finished,
    /// The session died; the message is shown once in the fatal state.
    Failed(String),
}

/// A source of normalized points consumed on the render tick.
pub trait AudioSource {
    /// Current view: a history snapshot (live) or cursor window (file).
    fn points(&mut self) -> Vec<XyPoint>;
    fn status(&self) -> SourceStatus;
}

impl AudioSource for LiveCapture {
    fn points(&mut self) -> Vec<XyPoint> {
        self.history().snapshot()
    }

    fn status(&self) -> SourceStatus {
        match self.state() {
            CaptureState::Stopped => match self.error() {
                Some(message) => SourceStatus::Failed(message),
                None => SourceStatus::Waiting,
            },
            _ if self.history().is_empty() => SourceStatus::Waiting,
            _ => SourceStatus::Active,
        }
    }
}

impl AudioSource for FileSession {
    fn points(&mut self) -> Vec<XyPoint> {
        self.update();
        self.window()
    }

    fn status(&self) -> SourceStatus {
        match self.phase() {
            FilePhase::Decoding => SourceStatus::Waiting,
            FilePhase::Playing | FilePhase::Paused => SourceStatus::Active,
            FilePhase::Finished => SourceStatus::Finished,
            FilePhase::Failed => {
                SourceStatus::Failed(self.error().unwrap_or("decode failed").to_string())
            }
        }
    }
}
