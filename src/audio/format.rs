//! Sample formats and raw capture blocks
//!
//! The format of a source is negotiated once at session start and stays
//! fixed for the lifetime of that session. Blocks carry raw bytes in the
//! device's native encoding; the decoder turns them into [`XyPoint`]s.

/// Binary sample encoding of a source.
///
/// Closed set: anything a device reports outside of these maps to
/// `Unknown`, which the decoder rejects as a fatal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Signed 16-bit integer PCM.
    Int16,
    /// Signed 32-bit integer PCM.
    Int32,
    /// IEEE 32-bit float PCM. May carry values outside [-1, 1] (headroom).
    Float32,
    /// Anything else. Decoding fails.
    Unknown,
}

/// Negotiated source format. Immutable for the life of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub encoding: SampleEncoding,
    pub channels: u32,
    pub sample_rate: u32,
}

impl FormatDescriptor {
    /// Map a cpal stream config onto our closed encoding set.
    pub fn from_cpal(config: &cpal::SupportedStreamConfig) -> Self {
        let encoding = match config.sample_format() {
            cpal::SampleFormat::I16 => SampleEncoding::Int16,
            cpal::SampleFormat::I32 => SampleEncoding::Int32,
            cpal::SampleFormat::F32 => SampleEncoding::Float32,
            _ => SampleEncoding::Unknown,
        };
        Self {
            encoding,
            channels: config.channels() as u32,
            sample_rate: config.sample_rate().0,
        }
    }
}

/// One capture block, borrowed by the decoder for a single call.
#[derive(Clone, Copy, Debug)]
pub struct RawBlock<'a> {
    pub bytes: &'a [u8],
    /// Frame count as reported by the endpoint.
    pub frames: usize,
    /// Endpoint marked the block as silence; bytes may be garbage.
    pub silent: bool,
}

/// Owned block, used to carry data from the audio callback to the poll loop.
#[derive(Clone, Debug)]
pub struct OwnedBlock {
    pub bytes: Vec<u8>,
    pub frames: usize,
    pub silent: bool,
}

impl OwnedBlock {
    pub fn as_raw(&self) -> RawBlock<'_> {
        RawBlock {
            bytes: &self.bytes,
            frames: self.frames,
            silent: self.silent,
        }
    }
}

/// A normalized stereo sample: left channel on X, right channel on Y,
/// both in [-1.0, 1.0].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct XyPoint {
    pub x: f32,
    pub y: f32,
}

impl XyPoint {
    pub const ZERO: XyPoint = XyPoint { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}
