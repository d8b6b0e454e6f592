//! Audio file sessions
//!
//! A session decodes the entire file up front on a worker thread, then
//! drives a wall-clock playback cursor over the decoded point array. The
//! renderer sees a symmetric window around the cursor, re-centered every
//! tick, so the scope trace follows real playback time rather than decode
//! progress. The decoded audio is also fed to the default output device so
//! the file is audible while it plays; output failures only degrade to a
//! silent visualization.

use std::fs::File;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use thiserror::Error;

use super::decode::{points_from_audio_buffer, ChannelOptions, DecodeError};
use super::format::XyPoint;

/// Errors that prevent a file session from starting or finishing decode.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to probe audio format: {0}")]
    Probe(String),

    #[error("no audio tracks found")]
    NoTracks,

    #[error("failed to create decoder: {0}")]
    Decoder(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("file decoded to zero samples")]
    EmptyAudio,

    #[error("decode thread panicked")]
    Panicked,
}

/// Metadata gathered by the initial probe.
#[derive(Debug, Clone)]
pub struct AudioFileInfo {
    pub path: PathBuf,
    pub filename: String,
    pub duration_ms: i64,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Where the session currently is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilePhase {
    Decoding,
    Playing,
    Paused,
    /// Cursor ran past the decoded array. Terminal.
    Finished,
    /// Decode failed. Terminal.
    Failed,
}

enum DecodeOutcome {
    Working,
    Done(Vec<XyPoint>),
    Failed(String),
}

struct Clock {
    base_ms: i64,
    started: Instant,
    paused: bool,
}

impl Clock {
    fn elapsed_ms(&self) -> i64 {
        if self.paused {
            self.base_ms
        } else {
            self.base_ms + self.started.elapsed().as_millis() as i64
        }
    }
}

struct OutputFeed {
    stream: cpal::Stream,
    /// Frame index the output callback reads next.
    head: Arc<AtomicUsize>,
}

/// One file's decode-then-play session.
pub struct FileSession {
    pub info: AudioFileInfo,
    half_window: usize,
    outcome: Arc<Mutex<DecodeOutcome>>,
    cancel: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    points: Option<Arc<Vec<XyPoint>>>,
    clock: Option<Clock>,
    output: Option<OutputFeed>,
    finished: bool,
    error: Option<String>,
}

impl std::fmt::Debug for FileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSession")
            .field("info", &self.info)
            .field("half_window", &self.half_window)
            .field("finished", &self.finished)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl FileSession {
    /// Open a file and start decoding it in the background. The path is
    /// validated before any work starts; playback begins automatically
    /// once decoding completes.
    pub fn open(
        path: impl AsRef<Path>,
        opts: ChannelOptions,
        half_window: usize,
    ) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(FileError::NotFound(path));
        }

        let info = probe_info(&path)?;
        log::info!(
            "loaded {} ({} Hz, {} ch, {} ms)",
            info.filename,
            info.sample_rate,
            info.channels,
            info.duration_ms
        );

        let outcome = Arc::new(Mutex::new(DecodeOutcome::Working));
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = {
            let outcome = Arc::clone(&outcome);
            let cancel = Arc::clone(&cancel);
            let path = path.clone();
            thread::Builder::new()
                .name("file-decode".into())
                .spawn(move || {
                    let result =
                        catch_unwind(AssertUnwindSafe(|| decode_all(&path, &opts, &cancel)));
                    let mut slot = outcome.lock().unwrap();
                    *slot = match result {
                        Ok(Ok(points)) => DecodeOutcome::Done(points),
                        Ok(Err(e)) => {
                            log::error!("decode failed: {e}");
                            DecodeOutcome::Failed(e.to_string())
                        }
                        Err(_) => {
                            log::error!("decode thread panicked");
                            DecodeOutcome::Failed(FileError::Panicked.to_string())
                        }
                    };
                })
                .expect("failed to spawn decode thread")
        };

        Ok(Self {
            info,
            half_window: half_window.max(1),
            outcome,
            cancel,
            worker: Some(worker),
            points: None,
            clock: None,
            output: None,
            finished: false,
            error: None,
        })
    }

    /// Poll decode progress and the playback cursor. Call once per render
    /// tick.
    pub fn update(&mut self) {
        if self.points.is_none() && self.error.is_none() {
            let done = {
                let mut slot = self.outcome.lock().unwrap();
                match std::mem::replace(&mut *slot, DecodeOutcome::Working) {
                    DecodeOutcome::Working => None,
                    other => Some(other),
                }
            };
            match done {
                Some(DecodeOutcome::Done(points)) => {
                    let points = Arc::new(points);
                    self.points = Some(Arc::clone(&points));
                    self.start_playback(points);
                }
                Some(DecodeOutcome::Failed(message)) => {
                    self.error = Some(message);
                }
                _ => {}
            }
        }

        if self.points.is_some() && !self.finished && self.cursor_index() >= self.decoded_len() {
            // Cursor ran off the end: pause for good.
            self.finished = true;
            self.pause_clock();
            log::info!("playback finished: {}", self.info.filename);
        }
    }

    fn start_playback(&mut self, points: Arc<Vec<XyPoint>>) {
        self.clock = Some(Clock {
            base_ms: 0,
            started: Instant::now(),
            paused: false,
        });
        self.output = start_output(points, self.info.sample_rate);
    }

    /// The sliding window around the current cursor position.
    pub fn window(&self) -> Vec<XyPoint> {
        match &self.points {
            Some(points) => {
                let (start, end) =
                    window_bounds(self.cursor_index(), points.len(), self.half_window);
                points[start..end].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub fn phase(&self) -> FilePhase {
        if self.error.is_some() {
            FilePhase::Failed
        } else if self.points.is_none() {
            FilePhase::Decoding
        } else if self.finished {
            FilePhase::Finished
        } else if self.clock.as_ref().is_some_and(|c| c.paused) {
            FilePhase::Paused
        } else {
            FilePhase::Playing
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.clock.as_ref().map_or(0, Clock::elapsed_ms)
    }

    /// Total playable duration, preferring the decoded array over the
    /// container's (possibly absent) header value.
    pub fn total_ms(&self) -> i64 {
        match &self.points {
            Some(points) if self.info.sample_rate > 0 => {
                points.len() as i64 * 1000 / self.info.sample_rate as i64
            }
            _ => self.info.duration_ms,
        }
    }

    pub fn progress(&self) -> f32 {
        let total = self.total_ms();
        if total <= 0 {
            return 0.0;
        }
        (self.elapsed_ms() as f32 / total as f32).clamp(0.0, 1.0)
    }

    pub fn pause(&mut self) {
        if self.finished {
            return;
        }
        self.pause_clock();
    }

    pub fn play(&mut self) {
        if self.finished {
            return;
        }
        if let Some(clock) = &mut self.clock {
            if clock.paused {
                clock.started = Instant::now();
                clock.paused = false;
                self.sync_output_head();
                if let Some(output) = &self.output {
                    let _ = output.stream.play();
                }
            }
        }
    }

    pub fn toggle(&mut self) {
        match self.phase() {
            FilePhase::Playing => self.pause(),
            FilePhase::Paused => self.play(),
            _ => {}
        }
    }

    /// Move the cursor. Only the elapsed-time base changes; the session
    /// keeps no other transport state.
    pub fn seek_ms(&mut self, ms: i64) {
        if self.finished {
            return;
        }
        let total = self.total_ms();
        if let Some(clock) = &mut self.clock {
            clock.base_ms = ms.clamp(0, total);
            clock.started = Instant::now();
        }
        self.sync_output_head();
    }

    pub fn seek_fraction(&mut self, fraction: f32) {
        let total = self.total_ms();
        self.seek_ms((total as f32 * fraction.clamp(0.0, 1.0)) as i64);
    }

    fn cursor_index(&self) -> usize {
        cursor_index(self.elapsed_ms(), self.info.sample_rate)
    }

    fn decoded_len(&self) -> usize {
        self.points.as_ref().map_or(0, |p| p.len())
    }

    fn pause_clock(&mut self) {
        if let Some(clock) = &mut self.clock {
            if !clock.paused {
                clock.base_ms = clock.elapsed_ms();
                clock.paused = true;
            }
        }
        if let Some(output) = &self.output {
            let _ = output.stream.pause();
        }
    }

    fn sync_output_head(&self) {
        if let Some(output) = &self.output {
            output.head.store(self.cursor_index(), Ordering::Relaxed);
        }
    }
}

impl Drop for FileSession {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Sample index for an elapsed wall-clock time.
fn cursor_index(elapsed_ms: i64, sample_rate: u32) -> usize {
    if elapsed_ms <= 0 {
        return 0;
    }
    (elapsed_ms as u64 * sample_rate as u64 / 1000) as usize
}

/// Symmetric half-open window `[index - half, index + half)` clamped to
/// the array.
fn window_bounds(index: usize, len: usize, half: usize) -> (usize, usize) {
    let start = index.saturating_sub(half).min(len);
    let end = index.saturating_add(half).min(len);
    (start, end)
}

/// Probe the container for track metadata without decoding.
fn probe_info(path: &Path) -> Result<AudioFileInfo, FileError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FileError::Probe(e.to_string()))?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(FileError::NoTracks)?;

    let params = &track.codec_params;
    let sample_rate = params.sample_rate.unwrap_or(44100);
    let channels = params.channels.map(|c| c.count() as u32).unwrap_or(2);

    let duration_ms = match params.n_frames {
        Some(n_frames) => {
            let time_base = params.time_base.unwrap_or(TimeBase::new(1, sample_rate));
            let time = time_base.calc_time(n_frames);
            (time.seconds as f64 * 1000.0 + time.frac * 1000.0) as i64
        }
        None => 0,
    };

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(AudioFileInfo {
        path: path.to_path_buf(),
        filename,
        duration_ms,
        sample_rate,
        channels,
    })
}

/// Decode the whole file into an ordered point sequence.
fn decode_all(
    path: &Path,
    opts: &ChannelOptions,
    cancel: &AtomicBool,
) -> Result<Vec<XyPoint>, FileError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| FileError::Probe(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(FileError::NoTracks)?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| FileError::Decoder(e.to_string()))?;

    let mut points = Vec::new();

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(points);
        }

        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(_) => break,
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => points.extend(points_from_audio_buffer(&decoded, opts)?),
            // Corrupt packets are skipped, like any resilient player.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(_) => break,
        }
    }

    if points.is_empty() {
        return Err(FileError::EmptyAudio);
    }
    Ok(points)
}

/// Feed the decoded array to the default output device from an atomic
/// play head. Best effort: any failure just means silent visualization.
fn start_output(points: Arc<Vec<XyPoint>>, sample_rate: u32) -> Option<OutputFeed> {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            log::warn!("no output device, playback will be silent");
            return None;
        }
    };

    let config = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            log::warn!("failed to get output config: {e}");
            return None;
        }
    };

    if config.sample_format() != cpal::SampleFormat::F32 {
        log::warn!(
            "output device wants {:?}, skipping audible playback",
            config.sample_format()
        );
        return None;
    }
    if config.sample_rate().0 != sample_rate {
        // Played as-is; the cursor follows wall time either way.
        log::warn!(
            "file is {} Hz but device runs {} Hz",
            sample_rate,
            config.sample_rate().0
        );
    }

    let channels = config.channels() as usize;
    let head = Arc::new(AtomicUsize::new(0));
    let callback_head = Arc::clone(&head);

    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let i = callback_head.fetch_add(1, Ordering::Relaxed);
                let (left, right) = points
                    .get(i)
                    .map(|p| (p.x, p.y))
                    .unwrap_or((0.0, 0.0));
                if channels >= 2 {
                    frame[0] = left;
                    frame[1] = right;
                    for ch in frame.iter_mut().skip(2) {
                        *ch = 0.0;
                    }
                } else {
                    frame[0] = (left + right) / 2.0;
                }
            }
        },
        |err| log::warn!("audio output error: {err}"),
        None,
    );

    match stream {
        Ok(s) => {
            if let Err(e) = s.play() {
                log::warn!("failed to start output stream: {e}");
                return None;
            }
            Some(OutputFeed { stream: s, head })
        }
        Err(e) => {
            log::warn!("failed to build output stream: {e}");
            None
        }
    }
}
