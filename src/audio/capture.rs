//! Live capture loop
//!
//! A dedicated producer thread polls a [`CaptureEndpoint`] for raw blocks,
//! decodes them and appends the points to the shared [`HistoryBuffer`].
//! The loop owns the endpoint for its whole life: cpal streams are not
//! `Send`, so the endpoint is constructed by a factory *inside* the
//! producer thread rather than handed across.
//!
//! Fault policy: empty polls and endpoint buffer errors are retried or
//! recovered internally and never surfaced; an unsupported sample encoding
//! (or any panic escaping the loop body) moves the session to the terminal
//! `Stopped` state exactly once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use super::decode::{decode_block, ChannelOptions, DecodeError};
use super::format::{FormatDescriptor, OwnedBlock};
use super::history::HistoryBuffer;

/// Errors that end a capture session.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no capture device available")]
    NoDevice,

    #[error("failed to query the device format: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build the capture stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("failed to start the capture stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("capture thread panicked")]
    Panicked,
}

/// Result of one endpoint poll.
pub enum BlockPoll {
    /// A block is ready. Ownership passes to the caller; dropping it
    /// releases it.
    Block(OwnedBlock),
    /// Nothing buffered yet. Sleep briefly and retry.
    Empty,
    /// The endpoint's buffer is in a bad state; stop/reset/restart it.
    BufferError,
}

/// Polled view of an audio endpoint delivering the system output mix.
///
/// The production implementation is [`super::loopback::LoopbackEndpoint`];
/// tests drive the loop with scripted endpoints.
pub trait CaptureEndpoint {
    /// Report the source's native format. Fixed for the session.
    fn negotiate_format(&mut self) -> Result<FormatDescriptor, CaptureError>;
    fn start(&mut self) -> Result<(), CaptureError>;
    fn stop(&mut self);
    fn reset(&mut self) -> Result<(), CaptureError>;
    fn next_block(&mut self, timeout: Duration) -> BlockPoll;
}

/// Capture session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Running,
    Recovering,
    /// Terminal. A new session needs a fresh `LiveCapture`.
    Stopped,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SharedInner>,
}

#[derive(Default)]
struct SharedInner {
    state: CaptureState,
    format: Option<FormatDescriptor>,
    error: Option<String>,
}

impl Shared {
    fn set_state(&self, state: CaptureState) {
        self.state.lock().unwrap().state = state;
    }

    fn fail(&self, error: &CaptureError) {
        let mut inner = self.state.lock().unwrap();
        inner.state = CaptureState::Stopped;
        if inner.error.is_none() {
            inner.error = Some(error.to_string());
        }
    }
}

/// Tuning knobs for the poll loop.
#[derive(Clone, Copy, Debug)]
pub struct CaptureOptions {
    pub channel: ChannelOptions,
    /// Sleep between empty polls. Kept at or below 5 ms so a stop
    /// request is observed promptly.
    pub poll_interval: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            channel: ChannelOptions::default(),
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Handle to a running live capture session.
///
/// Dropping the handle signals the producer thread and joins it before the
/// endpoint is released.
pub struct LiveCapture {
    history: Arc<HistoryBuffer>,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LiveCapture {
    /// Spawn the producer thread. `make_endpoint` runs on that thread and
    /// builds the endpoint there; failures show up as the `Stopped` state.
    pub fn spawn<E, F>(make_endpoint: F, history: Arc<HistoryBuffer>, opts: CaptureOptions) -> Self
    where
        E: CaptureEndpoint + 'static,
        F: FnOnce() -> Result<E, CaptureError> + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            let history = Arc::clone(&history);
            thread::Builder::new()
                .name("capture".into())
                .spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        run_session(make_endpoint, &history, &shared, &stop, &opts)
                    }));
                    match outcome {
                        Ok(Ok(())) => shared.set_state(CaptureState::Stopped),
                        Ok(Err(e)) => {
                            log::error!("capture session failed: {e}");
                            shared.fail(&e);
                        }
                        Err(_) => {
                            log::error!("capture thread panicked");
                            shared.fail(&CaptureError::Panicked);
                        }
                    }
                })
                .expect("failed to spawn capture thread")
        };

        Self {
            history,
            shared,
            stop,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state.lock().unwrap().state
    }

    /// Negotiated source format, once the endpoint is up.
    pub fn format(&self) -> Option<FormatDescriptor> {
        self.shared.state.lock().unwrap().format
    }

    /// Fatal error message, set once when the session reaches `Stopped`
    /// abnormally.
    pub fn error(&self) -> Option<String> {
        self.shared.state.lock().unwrap().error.clone()
    }

    pub fn history(&self) -> &Arc<HistoryBuffer> {
        &self.history
    }

    /// Request shutdown and wait for the producer to exit.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_session<E, F>(
    make_endpoint: F,
    history: &HistoryBuffer,
    shared: &Shared,
    stop: &AtomicBool,
    opts: &CaptureOptions,
) -> Result<(), CaptureError>
where
    E: CaptureEndpoint,
    F: FnOnce() -> Result<E, CaptureError>,
{
    let mut endpoint = make_endpoint()?;
    let format = endpoint.negotiate_format()?;
    log::info!(
        "capture format: {:?}, {} ch, {} Hz",
        format.encoding,
        format.channels,
        format.sample_rate
    );
    endpoint.start()?;

    {
        let mut inner = shared.state.lock().unwrap();
        inner.format = Some(format);
        inner.state = CaptureState::Running;
    }

    let result = run_loop(&mut endpoint, format, history, shared, stop, opts);
    endpoint.stop();
    result
}

fn run_loop<E: CaptureEndpoint>(
    endpoint: &mut E,
    format: FormatDescriptor,
    history: &HistoryBuffer,
    shared: &Shared,
    stop: &AtomicBool,
    opts: &CaptureOptions,
) -> Result<(), CaptureError> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }

        match endpoint.next_block(opts.poll_interval) {
            BlockPoll::Empty => {
                thread::sleep(opts.poll_interval);
            }
            BlockPoll::BufferError => {
                // Recoverable: restart the stream and keep going.
                shared.set_state(CaptureState::Recovering);
                log::warn!("endpoint buffer fault, restarting stream");
                endpoint.stop();
                endpoint.reset()?;
                endpoint.start()?;
                shared.set_state(CaptureState::Running);
            }
            BlockPoll::Block(block) => {
                if block.frames == 0 {
                    continue;
                }
                let points = decode_block(&block.as_raw(), &format, &opts.channel)?;
                history.append(&points);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleEncoding;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Scripted endpoint: yields a fixed sequence of polls, then Empty.
    struct MockEndpoint {
        format: FormatDescriptor,
        script: VecDeque<BlockPoll>,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    impl CaptureEndpoint for MockEndpoint {
        fn negotiate_format(&mut self) -> Result<FormatDescriptor, CaptureError> {
            Ok(self.format)
        }

        fn start(&mut self) -> Result<(), CaptureError> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::Relaxed);
        }

        fn reset(&mut self) -> Result<(), CaptureError> {
            self.resets.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn next_block(&mut self, _timeout: Duration) -> BlockPoll {
            self.script.pop_front().unwrap_or(BlockPoll::Empty)
        }
    }

    fn i16_block(samples: &[i16], frames: usize) -> BlockPoll {
        BlockPoll::Block(OwnedBlock {
            bytes: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            frames,
            silent: false,
        })
    }

    fn stereo_i16() -> FormatDescriptor {
        FormatDescriptor {
            encoding: SampleEncoding::Int16,
            channels: 2,
            sample_rate: 48000,
        }
    }

    fn test_opts() -> CaptureOptions {
        CaptureOptions {
            channel: ChannelOptions::IDENTITY,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn decodes_blocks_into_history() {
        let history = Arc::new(HistoryBuffer::new(100));
        let counters = (
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        );
        let (starts, stops, resets) = (
            Arc::clone(&counters.0),
            Arc::clone(&counters.1),
            Arc::clone(&counters.2),
        );

        let capture = LiveCapture::spawn(
            move || {
                Ok(MockEndpoint {
                    format: stereo_i16(),
                    script: VecDeque::from([
                        i16_block(&[16384, -16384, 8192, 8192], 2),
                        i16_block(&[], 0),
                        i16_block(&[-8192, 0], 1),
                    ]),
                    starts,
                    stops,
                    resets,
                })
            },
            Arc::clone(&history),
            test_opts(),
        );

        assert!(wait_until(1000, || history.len() == 3));
        let snap = history.snapshot();
        assert_eq!(snap[0].x, 0.5);
        assert_eq!(snap[0].y, -0.5);
        assert_eq!(snap[2].x, -0.25);
        assert_eq!(capture.state(), CaptureState::Running);
        assert_eq!(capture.format(), Some(stereo_i16()));
        drop(capture);
        assert_eq!(counters.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn buffer_error_recovers_and_ingestion_continues() {
        let history = Arc::new(HistoryBuffer::new(100));
        let resets = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(AtomicUsize::new(0));
        let (r, s, st) = (Arc::clone(&resets), Arc::clone(&stops), Arc::clone(&starts));

        let capture = LiveCapture::spawn(
            move || {
                Ok(MockEndpoint {
                    format: stereo_i16(),
                    script: VecDeque::from([
                        i16_block(&[16384, 16384], 1),
                        BlockPoll::BufferError,
                        i16_block(&[-16384, -16384], 1),
                    ]),
                    starts: st,
                    stops: s,
                    resets: r,
                })
            },
            Arc::clone(&history),
            test_opts(),
        );

        assert!(wait_until(1000, || history.len() == 2));
        assert_eq!(capture.state(), CaptureState::Running);
        assert!(capture.error().is_none());
        assert_eq!(resets.load(Ordering::Relaxed), 1);
        // stop + restart around the reset
        assert_eq!(starts.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unsupported_format_stops_the_session() {
        let history = Arc::new(HistoryBuffer::new(100));
        let dummy = Arc::new(AtomicUsize::new(0));
        let (a, b, c) = (Arc::clone(&dummy), Arc::clone(&dummy), Arc::clone(&dummy));

        let capture = LiveCapture::spawn(
            move || {
                Ok(MockEndpoint {
                    format: FormatDescriptor {
                        encoding: SampleEncoding::Unknown,
                        channels: 2,
                        sample_rate: 48000,
                    },
                    script: VecDeque::from([
                        i16_block(&[1, 2], 1),
                        i16_block(&[3, 4], 1),
                    ]),
                    starts: a,
                    stops: b,
                    resets: c,
                })
            },
            Arc::clone(&history),
            test_opts(),
        );

        assert!(wait_until(1000, || capture.state() == CaptureState::Stopped));
        assert!(capture.error().is_some());
        assert!(history.is_empty());
    }

    #[test]
    fn endpoint_construction_failure_is_terminal() {
        let history = Arc::new(HistoryBuffer::new(10));
        let capture = LiveCapture::spawn(
            || Err::<MockEndpoint, _>(CaptureError::NoDevice),
            Arc::clone(&history),
            test_opts(),
        );
        assert!(wait_until(1000, || capture.state() == CaptureState::Stopped));
        assert_eq!(capture.error().as_deref(), Some("no capture device available"));
    }

    #[test]
    fn shutdown_joins_promptly() {
        let history = Arc::new(HistoryBuffer::new(10));
        let dummy = Arc::new(AtomicUsize::new(0));
        let (a, b, c) = (Arc::clone(&dummy), Arc::clone(&dummy), Arc::clone(&dummy));
        let mut capture = LiveCapture::spawn(
            move || {
                Ok(MockEndpoint {
                    format: stereo_i16(),
                    script: VecDeque::new(),
                    starts: a,
                    stops: b,
                    resets: c,
                })
            },
            history,
            test_opts(),
        );

        assert!(wait_until(1000, || capture.state() == CaptureState::Running));
        let begin = Instant::now();
        capture.shutdown();
        assert!(begin.elapsed() < Duration::from_millis(500));
        assert_eq!(capture.state(), CaptureState::Stopped);
    }
}
