//! Sample normalization
//!
//! Pure conversion of raw capture blocks (and symphonia decode buffers)
//! into [`XyPoint`] sequences. No state, no I/O: the capture loop and the
//! file session both funnel their data through here so that channel
//! mapping, axis inversion and clamping behave identically in both modes.

use symphonia::core::audio::{AudioBufferRef, Signal};
use thiserror::Error;

use super::format::{FormatDescriptor, RawBlock, SampleEncoding, XyPoint};

const I16_SCALE: f32 = 32768.0;
const I32_SCALE: f32 = 2147483648.0;

/// Errors produced by sample normalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported sample encoding")]
    UnsupportedFormat,
}

/// Axis configuration applied after normalization.
#[derive(Clone, Copy, Debug)]
pub struct ChannelOptions {
    pub invert_x: bool,
    pub invert_y: bool,
}

impl Default for ChannelOptions {
    // The reference scope renders with both axes inverted.
    fn default() -> Self {
        Self {
            invert_x: true,
            invert_y: true,
        }
    }
}

impl ChannelOptions {
    pub const IDENTITY: ChannelOptions = ChannelOptions {
        invert_x: false,
        invert_y: false,
    };

    /// Build a point from normalized left/right amplitudes: invert first,
    /// then re-clamp (integer minimums flip to exactly +1.0).
    #[inline]
    fn point(&self, left: f32, right: f32) -> XyPoint {
        let x = if self.invert_x { -left } else { left };
        let y = if self.invert_y { -right } else { right };
        XyPoint::new(x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0))
    }
}

/// Decode one raw block into normalized points.
///
/// Silent blocks yield `frames` zero points so the visual timeline keeps
/// advancing during silence. A trailing incomplete frame of a multichannel
/// block is dropped, never read past the end. Channels beyond the first
/// two are ignored.
pub fn decode_block(
    block: &RawBlock<'_>,
    format: &FormatDescriptor,
    opts: &ChannelOptions,
) -> Result<Vec<XyPoint>, DecodeError> {
    if block.silent {
        return Ok(vec![XyPoint::ZERO; block.frames]);
    }

    let channels = format.channels.max(1) as usize;
    match format.encoding {
        SampleEncoding::Int16 => Ok(decode_frames(block.bytes, 2, channels, opts, |b| {
            i16::from_le_bytes([b[0], b[1]]) as f32 / I16_SCALE
        })),
        SampleEncoding::Int32 => Ok(decode_frames(block.bytes, 4, channels, opts, |b| {
            i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / I32_SCALE
        })),
        SampleEncoding::Float32 => Ok(decode_frames(block.bytes, 4, channels, opts, |b| {
            f32::from_le_bytes([b[0], b[1], b[2], b[3]]).clamp(-1.0, 1.0)
        })),
        SampleEncoding::Unknown => Err(DecodeError::UnsupportedFormat),
    }
}

/// Walk interleaved frames, normalizing the first one or two channels.
/// `chunks_exact` drops the trailing partial frame for free.
fn decode_frames(
    bytes: &[u8],
    sample_bytes: usize,
    channels: usize,
    opts: &ChannelOptions,
    normalize: impl Fn(&[u8]) -> f32,
) -> Vec<XyPoint> {
    let frame_bytes = sample_bytes * channels;
    bytes
        .chunks_exact(frame_bytes)
        .map(|frame| {
            let left = normalize(&frame[..sample_bytes]);
            let right = if channels > 1 {
                normalize(&frame[sample_bytes..2 * sample_bytes])
            } else {
                left
            };
            opts.point(left, right)
        })
        .collect()
}

/// Normalize one symphonia decode buffer with the same rules as
/// [`decode_block`]. Symphonia hands us planar channel data, so frames are
/// assembled from the first two channel planes directly.
pub fn points_from_audio_buffer(
    buffer: &AudioBufferRef<'_>,
    opts: &ChannelOptions,
) -> Result<Vec<XyPoint>, DecodeError> {
    match buffer {
        AudioBufferRef::F32(buf) => {
            let channels = buf.spec().channels.count();
            Ok((0..buf.frames())
                .map(|i| {
                    let left = buf.chan(0)[i].clamp(-1.0, 1.0);
                    let right = if channels > 1 {
                        buf.chan(1)[i].clamp(-1.0, 1.0)
                    } else {
                        left
                    };
                    opts.point(left, right)
                })
                .collect())
        }
        AudioBufferRef::S16(buf) => {
            let channels = buf.spec().channels.count();
            Ok((0..buf.frames())
                .map(|i| {
                    let left = buf.chan(0)[i] as f32 / I16_SCALE;
                    let right = if channels > 1 {
                        buf.chan(1)[i] as f32 / I16_SCALE
                    } else {
                        left
                    };
                    opts.point(left, right)
                })
                .collect())
        }
        AudioBufferRef::S32(buf) => {
            let channels = buf.spec().channels.count();
            Ok((0..buf.frames())
                .map(|i| {
                    let left = buf.chan(0)[i] as f32 / I32_SCALE;
                    let right = if channels > 1 {
                        buf.chan(1)[i] as f32 / I32_SCALE
                    } else {
                        left
                    };
                    opts.point(left, right)
                })
                .collect())
        }
        _ => Err(DecodeError::UnsupportedFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(encoding: SampleEncoding, channels: u32) -> FormatDescriptor {
        FormatDescriptor {
            encoding,
            channels,
            sample_rate: 44100,
        }
    }

    fn i16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn i32_bytes(samples: &[i32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn block(bytes: &[u8], frames: usize) -> RawBlock<'_> {
        RawBlock {
            bytes,
            frames,
            silent: false,
        }
    }

    #[test]
    fn pcm16_stereo_end_to_end() {
        let bytes = i16_bytes(&[16384, -16384, 0, 0, 32767, 32767, -32768, -32768]);
        let points = decode_block(
            &block(&bytes, 4),
            &fmt(SampleEncoding::Int16, 2),
            &ChannelOptions::IDENTITY,
        )
        .unwrap();

        assert_eq!(points.len(), 4);
        assert_eq!(points[0], XyPoint::new(0.5, -0.5));
        assert_eq!(points[1], XyPoint::new(0.0, 0.0));
        assert!((points[2].x - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((points[2].y - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(points[3], XyPoint::new(-1.0, -1.0));
    }

    #[test]
    fn silent_block_emits_zero_points_regardless_of_encoding() {
        for encoding in [
            SampleEncoding::Int16,
            SampleEncoding::Int32,
            SampleEncoding::Float32,
            SampleEncoding::Unknown,
        ] {
            let raw = RawBlock {
                bytes: &[],
                frames: 7,
                silent: true,
            };
            let points =
                decode_block(&raw, &fmt(encoding, 2), &ChannelOptions::default()).unwrap();
            assert_eq!(points.len(), 7);
            assert!(points.iter().all(|p| *p == XyPoint::ZERO));
        }
    }

    #[test]
    fn mono_duplicates_into_both_axes() {
        let bytes = i16_bytes(&[100, -2000, 30000]);
        let points = decode_block(
            &block(&bytes, 3),
            &fmt(SampleEncoding::Int16, 1),
            &ChannelOptions::IDENTITY,
        )
        .unwrap();
        assert_eq!(points.len(), 3);
        for p in points {
            assert_eq!(p.x, p.y);
        }
    }

    #[test]
    fn extra_channels_ignored_and_partial_frame_dropped() {
        // 5.1 layout, two complete frames plus three stray samples.
        let mut samples = vec![16384i16, -16384, 1, 2, 3, 4];
        samples.extend([8192, 8192, 5, 6, 7, 8]);
        samples.extend([999, 999, 999]);
        let bytes = i16_bytes(&samples);
        let points = decode_block(
            &block(&bytes, 2),
            &fmt(SampleEncoding::Int16, 6),
            &ChannelOptions::IDENTITY,
        )
        .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], XyPoint::new(0.5, -0.5));
        assert_eq!(points[1], XyPoint::new(0.25, 0.25));
    }

    #[test]
    fn float_values_with_headroom_are_clamped() {
        let bytes = f32_bytes(&[1.7, -3.0, 0.25, -0.25]);
        let points = decode_block(
            &block(&bytes, 2),
            &fmt(SampleEncoding::Float32, 2),
            &ChannelOptions::IDENTITY,
        )
        .unwrap();
        assert_eq!(points[0], XyPoint::new(1.0, -1.0));
        assert_eq!(points[1], XyPoint::new(0.25, -0.25));
    }

    #[test]
    fn int32_minimum_inverts_to_exactly_one() {
        let bytes = i32_bytes(&[i32::MIN, i32::MIN]);
        let points = decode_block(
            &block(&bytes, 1),
            &fmt(SampleEncoding::Int32, 2),
            &ChannelOptions {
                invert_x: true,
                invert_y: true,
            },
        )
        .unwrap();
        assert_eq!(points[0], XyPoint::new(1.0, 1.0));
    }

    #[test]
    fn inversion_flags_act_independently() {
        let bytes = i16_bytes(&[16384, 16384]);
        let points = decode_block(
            &block(&bytes, 1),
            &fmt(SampleEncoding::Int16, 2),
            &ChannelOptions {
                invert_x: true,
                invert_y: false,
            },
        )
        .unwrap();
        assert_eq!(points[0], XyPoint::new(-0.5, 0.5));
    }

    #[test]
    fn unknown_encoding_fails() {
        let bytes = [0u8; 16];
        let err = decode_block(
            &block(&bytes, 4),
            &fmt(SampleEncoding::Unknown, 2),
            &ChannelOptions::IDENTITY,
        )
        .unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedFormat);
    }

    #[test]
    fn normalization_stays_in_bounds() {
        let i16s: Vec<i16> = vec![i16::MIN, -1, 0, 1, i16::MAX, 12345, -12345, 32000];
        let i32s: Vec<i32> = i16s.iter().map(|&s| s as i32 * 65536).collect();
        let floats: Vec<f32> = vec![-10.0, -1.0, -0.5, 0.0, 0.5, 1.0, 10.0, f32::MAX];

        let cases: Vec<(Vec<u8>, SampleEncoding)> = vec![
            (i16_bytes(&i16s), SampleEncoding::Int16),
            (i32_bytes(&i32s), SampleEncoding::Int32),
            (f32_bytes(&floats), SampleEncoding::Float32),
        ];
        for (bytes, encoding) in cases {
            for opts in [ChannelOptions::IDENTITY, ChannelOptions::default()] {
                let points =
                    decode_block(&block(&bytes, 4), &fmt(encoding, 2), &opts).unwrap();
                for p in points {
                    assert!((-1.0..=1.0).contains(&p.x));
                    assert!((-1.0..=1.0).contains(&p.y));
                }
            }
        }
    }

    #[test]
    fn encodings_round_trip_to_the_same_points() {
        // 1 kHz sine on the left, constant near full scale on the right.
        let frames = 64;
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for i in 0..frames {
            let t = i as f32 / 44100.0;
            left.push((2.0 * std::f32::consts::PI * 1000.0 * t).sin() * 0.9);
            right.push(0.75);
        }

        let mut i16s = Vec::new();
        let mut i32s = Vec::new();
        let mut floats = Vec::new();
        for i in 0..frames {
            for v in [left[i], right[i]] {
                i16s.push((v * I16_SCALE) as i16);
                i32s.push((v as f64 * I32_SCALE as f64) as i32);
                floats.push(v);
            }
        }

        let opts = ChannelOptions::IDENTITY;
        let from_i16 = decode_block(
            &block(&i16_bytes(&i16s), frames),
            &fmt(SampleEncoding::Int16, 2),
            &opts,
        )
        .unwrap();
        let from_i32 = decode_block(
            &block(&i32_bytes(&i32s), frames),
            &fmt(SampleEncoding::Int32, 2),
            &opts,
        )
        .unwrap();
        let from_f32 = decode_block(
            &block(&f32_bytes(&floats), frames),
            &fmt(SampleEncoding::Float32, 2),
            &opts,
        )
        .unwrap();

        for i in 0..frames {
            for decoded in [&from_i16, &from_i32] {
                assert!((decoded[i].x - from_f32[i].x).abs() < 1e-4);
                assert!((decoded[i].y - from_f32[i].y).abs() < 1e-4);
            }
        }
    }
}
