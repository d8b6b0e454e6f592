//! cpal-backed capture endpoint
//!
//! Adapts cpal's push-style callback delivery into the polled
//! [`CaptureEndpoint`] contract. The stream callback runs on cpal's own
//! real-time audio thread and must never block, so it hands raw byte
//! blocks to the poll loop through a SPSC ring; a full ring drops the
//! block (acceptable for visualization).
//!
//! On Windows the default *output* device is opened as a WASAPI loopback
//! input, capturing the system mix. Other platforms fall back to the
//! default input device, since cpal exposes no loopback there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapRb,
};

use super::capture::{BlockPoll, CaptureEndpoint, CaptureError};
use super::format::{FormatDescriptor, OwnedBlock};

/// Blocks buffered between the audio callback and the poll loop. At
/// typical WASAPI period sizes this is well over a second of audio.
const BLOCK_QUEUE_LEN: usize = 128;

pub struct LoopbackEndpoint {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    stream: Option<cpal::Stream>,
    blocks: Option<HeapCons<OwnedBlock>>,
    fault: Arc<AtomicBool>,
}

impl LoopbackEndpoint {
    /// Open the default loopback-capable device.
    pub fn open() -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        #[cfg(target_os = "windows")]
        let (device, config) = {
            let device = host
                .default_output_device()
                .ok_or(CaptureError::NoDevice)?;
            let config = device.default_output_config()?;
            (device, config)
        };

        #[cfg(not(target_os = "windows"))]
        let (device, config) = {
            let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;
            let config = device.default_input_config()?;
            (device, config)
        };

        if let Ok(name) = device.name() {
            log::info!("capture device: {name}");
        }

        Ok(Self {
            device,
            config,
            stream: None,
            blocks: None,
            fault: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl CaptureEndpoint for LoopbackEndpoint {
    fn negotiate_format(&mut self) -> Result<FormatDescriptor, CaptureError> {
        Ok(FormatDescriptor::from_cpal(&self.config))
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_none() {
            let rb = HeapRb::<OwnedBlock>::new(BLOCK_QUEUE_LEN);
            let (mut producer, consumer) = rb.split();
            self.blocks = Some(consumer);

            let channels = self.config.channels() as usize;
            let sample_format = self.config.sample_format();
            let stream_config: cpal::StreamConfig = self.config.config();
            let fault = Arc::clone(&self.fault);

            let stream = self.device.build_input_stream_raw(
                &stream_config,
                sample_format,
                move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                    let bytes = data.bytes();
                    // cpal reports no silence flag; an all-zero block is
                    // equivalent for our purposes.
                    let silent = bytes.iter().all(|&b| b == 0);
                    let block = OwnedBlock {
                        bytes: bytes.to_vec(),
                        frames: data.len() / channels.max(1),
                        silent,
                    };
                    let _ = producer.try_push(block);
                },
                {
                    let fault = Arc::clone(&fault);
                    move |err| {
                        log::warn!("capture stream error: {err}");
                        fault.store(true, Ordering::Relaxed);
                    }
                },
                None,
            )?;
            self.stream = Some(stream);
        }

        if let Some(stream) = &self.stream {
            stream.play()?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stream = None;
    }

    fn reset(&mut self) -> Result<(), CaptureError> {
        if let Some(blocks) = &mut self.blocks {
            while blocks.try_pop().is_some() {}
        }
        self.fault.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn next_block(&mut self, _timeout: Duration) -> BlockPoll {
        if self.fault.swap(false, Ordering::Relaxed) {
            return BlockPoll::BufferError;
        }
        match self.blocks.as_mut().and_then(|c| c.try_pop()) {
            Some(block) => BlockPoll::Block(block),
            None => BlockPoll::Empty,
        }
    }
}
