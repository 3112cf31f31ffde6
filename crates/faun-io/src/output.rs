//! cpal-backed output sink.
//!
//! The engine wants a blocking `write`, while cpal pulls samples from a
//! callback. [`CpalSink`] bridges the two with a bounded ring of interleaved
//! samples: `write` pushes and blocks while the ring is full, the device
//! callback drains, and the resulting backpressure paces the mix loop.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use faun_core::{DEF_UPDATE_HZ, MIX_RATE, Sink, SinkError, VoiceLayout};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Ring bursts held between the mixer and the device callback.
const RING_BURSTS: usize = 4;

#[derive(Debug, Default)]
struct Ring {
    queue: Mutex<VecDeque<f32>>,
    space: Condvar,
}

/// Audio output through the platform's default cpal device.
pub struct CpalSink {
    device: cpal::Device,
    ring: Arc<Ring>,
    capacity: usize,
    stream: Option<cpal::Stream>,
}

impl CpalSink {
    /// Open the default output device.
    ///
    /// `app_name` identifies the client where the platform exposes one; it
    /// is recorded for diagnostics here.
    pub fn open(app_name: &str) -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(SinkError::NoDevice)?;
        tracing::info!(
            app = app_name,
            host = host.id().name(),
            device = device.name().as_deref().unwrap_or("unknown"),
            "audio output opened"
        );
        Ok(Self {
            device,
            ring: Arc::new(Ring::default()),
            capacity: 0,
            stream: None,
        })
    }
}

impl Sink for CpalSink {
    fn alloc_voice(&mut self, update_hz: u32) -> Result<VoiceLayout, SinkError> {
        let update_hz = if update_hz == 0 { DEF_UPDATE_HZ } else { update_hz };
        let frames_per_burst = MIX_RATE / update_hz;
        self.capacity = frames_per_burst as usize * 2 * RING_BURSTS;

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: MIX_RATE,
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = Arc::clone(&self.ring);
        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = ring
                        .queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    for slot in data.iter_mut() {
                        // Underruns play silence.
                        *slot = queue.pop_front().unwrap_or(0.0);
                    }
                    drop(queue);
                    ring.space.notify_one();
                },
                |err| tracing::error!(error = %err, "output stream error"),
                None,
            )
            .map_err(|e| SinkError::Voice(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SinkError::Voice(e.to_string()))?;
        self.stream = Some(stream);

        Ok(VoiceLayout {
            update_hz,
            frames_per_burst,
        })
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        if self.stream.is_none() {
            return Err(SinkError::Write("voice not allocated".into()));
        }
        let mut remaining = samples;
        let mut queue = self
            .ring
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !remaining.is_empty() {
            while queue.len() >= self.capacity {
                queue = self
                    .ring
                    .space
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            let room = (self.capacity - queue.len()).min(remaining.len());
            queue.extend(&remaining[..room]);
            remaining = &remaining[room..];
        }
        Ok(())
    }

    fn start_voice(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.play() {
                tracing::warn!(error = %err, "cannot start voice");
            }
        }
    }

    fn stop_voice(&mut self) {
        if let Some(stream) = &self.stream {
            if let Err(err) = stream.pause() {
                // Not every backend supports pause; suspend still stops the
                // mixer from producing data.
                tracing::debug!(error = %err, "cannot pause voice");
            }
        }
    }
}
