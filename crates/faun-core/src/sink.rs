//! The pluggable output sink seam.
//!
//! A [`Sink`] accepts the voice's interleaved stereo `f32` mix and delivers
//! it to the OS audio output. `write` blocks while the device drains, which
//! is the engine's primary pacing mechanism. [`MemorySink`] captures writes
//! for tests and offline rendering.

use std::sync::{Arc, Mutex, PoisonError};

/// Sink failure.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// No usable output device.
    #[error("no audio output device available")]
    NoDevice,
    /// The backend rejected the voice configuration.
    #[error("voice setup failed: {0}")]
    Voice(String),
    /// A write was rejected by the backend.
    #[error("audio write failed: {0}")]
    Write(String),
}

/// Burst geometry negotiated by [`Sink::alloc_voice`].
#[derive(Debug, Clone, Copy)]
pub struct VoiceLayout {
    /// Mix ticks per second the sink expects.
    pub update_hz: u32,
    /// Frames consumed per `write` call.
    pub frames_per_burst: u32,
}

/// Blocking stereo-float audio output.
///
/// Deliberately not `Send`: OS stream handles often are not, so the engine
/// constructs its sink on the worker thread and keeps it there.
pub trait Sink {
    /// Configure the output voice for `update_hz` ticks per second.
    ///
    /// The returned layout tells the engine how many frames to mix per tick;
    /// the sink may adjust the rate it was asked for.
    fn alloc_voice(&mut self, update_hz: u32) -> Result<VoiceLayout, SinkError>;

    /// Deliver one burst of interleaved stereo samples, blocking for pacing.
    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError>;

    /// Begin output (also called after a suspend).
    fn start_voice(&mut self);

    /// Halt output without discarding the voice.
    fn stop_voice(&mut self);
}

/// A sink that appends every write to shared memory.
///
/// Pacing is the caller's problem, which is exactly what the engine tests
/// want: ticks run as fast as the test drives them and the captured mix can
/// be inspected afterwards through [`MemorySink::captured`].
#[derive(Debug, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<f32>>>,
    started: bool,
}

impl MemorySink {
    /// A sink capturing into a fresh buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the captured interleaved samples.
    pub fn captured(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.data)
    }

    /// True once `start_voice` has been called more recently than
    /// `stop_voice`.
    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Sink for MemorySink {
    fn alloc_voice(&mut self, update_hz: u32) -> Result<VoiceLayout, SinkError> {
        Ok(VoiceLayout {
            update_hz,
            frames_per_burst: crate::MIX_RATE / update_hz,
        })
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(samples);
        Ok(())
    }

    fn start_voice(&mut self) {
        self.started = true;
    }

    fn stop_voice(&mut self) {
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_accumulates_writes() {
        let mut sink = MemorySink::new();
        let captured = sink.captured();
        sink.write(&[0.1, 0.2]).unwrap();
        sink.write(&[0.3, 0.4]).unwrap();
        assert_eq!(*captured.lock().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn memory_sink_layout_matches_update_rate() {
        let mut sink = MemorySink::new();
        let layout = sink.alloc_voice(48).unwrap();
        assert_eq!(layout.frames_per_burst, 918);
    }
}
