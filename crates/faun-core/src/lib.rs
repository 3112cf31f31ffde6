//! Mixing and scheduling core for the Faun audio engine.
//!
//! This crate contains everything that runs on (or feeds) the realtime
//! worker thread, with no I/O backends:
//!
//! - [`MsgPort`] - bounded message ports connecting caller threads to the worker
//! - [`AudioBuffer`] - owned PCM storage in the voice mix format
//! - [`Source`] / [`Stream`] - the fixed pool of playing voices
//! - [`mixer`] - the per-tick fragment mixer with gain and fade envelopes
//! - [`Program`] - the bytecode sequencer evaluated each mix tick
//! - [`Engine`] - the single-threaded state machine driven by commands and ticks
//! - [`Decoder`] / [`Sink`] - the pluggable collaborator traits
//!
//! The worker thread itself, command encoding, and the public API live in the
//! `faun` crate; format decoders and the cpal output sink live in `faun-io`.
//!
//! The engine mixes interleaved stereo `f32` at a fixed 44,100 Hz rate.
//! Program wait units and fade windows are keyed to that rate by design, so
//! [`MIX_RATE`] is a constant rather than a configuration value.

mod buffer;
mod command;
mod convert;
mod decoder;
mod engine;
pub mod mixer;
mod msgport;
mod playback;
mod program;
mod signal;
mod sink;
mod source;
mod stream;

pub use buffer::{AudioBuffer, ChannelLayout, SampleFormat};
pub use command::{Command, ControlOp, Param, ProgramFrame};
pub use convert::{interleave_f32, interleave_planar, interleave_s16, output_frames};
pub use decoder::{DecodeError, Decoder, DecoderFactory, FileChunk, ReadStatus};
pub use engine::{
    BUFFER_MAX, Engine, EngineError, Limits, PROGRAM_UNITS_MAX, SOURCE_MAX, STREAM_MAX,
};
pub use msgport::{MsgPort, PopResult};
pub use playback::{NO_PLAY_ID, PlaybackTable, pid_source};
pub use program::{Opcode, PROGRAM_MAX, Program};
pub use signal::{Signal, SignalKind};
pub use sink::{MemorySink, Sink, SinkError, VoiceLayout};
pub use source::{
    BufferRef, PlayMode, QACTIVE_NONE, SOURCE_NO_POS, SOURCE_QUEUE_SIZE, Source, SourceState,
};
pub use stream::{STREAM_BUFFERS, Stream};

/// The voice mix rate in Hz. All buffers handed to the engine are at this rate.
pub const MIX_RATE: u32 = 44_100;

/// Default worker update rate (mix ticks per second).
pub const DEF_UPDATE_HZ: u32 = 48;
