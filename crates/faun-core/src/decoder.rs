//! The pluggable decoder seam.
//!
//! The engine never parses audio containers itself. Buffer loads and stream
//! refills go through [`Decoder`], which yields interleaved stereo `f32`
//! frames at the mix rate (the conversion helpers live alongside
//! [`interleave_f32`](crate::interleave_f32)). The worker opens stream
//! decoders through a [`DecoderFactory`] injected at startup, so tests can
//! substitute synthetic decoders for real files.

use crate::AudioBuffer;
use std::fs::File;

/// A byte range of an open file holding one piece of audio.
///
/// `size == 0` means "through the end of the file". Ownership of the handle
/// transfers to the decoder that opens it.
#[derive(Debug)]
pub struct FileChunk {
    /// The open file.
    pub file: File,
    /// Byte offset of the audio data.
    pub offset: u32,
    /// Byte length of the audio data, or zero.
    pub size: u32,
}

/// Outcome of one [`Decoder::read_frames`] call.
///
/// `frames` and `eof` are independent: a read that drains the final packet
/// reports the produced frames *and* end of stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStatus {
    /// Frames written to the output buffer.
    pub frames: u32,
    /// No further data follows.
    pub eof: bool,
}

/// Decoder failure.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The container or codec was not recognized.
    #[error("unrecognized audio format")]
    UnknownFormat,
    /// The input is recognized but cannot be used.
    #[error("unsupported audio: {0}")]
    Unsupported(String),
    /// The backend codec reported an error.
    #[error("decode failed: {0}")]
    Codec(String),
    /// Seeking is not possible on this input.
    #[error("seek failed: {0}")]
    Seek(String),
    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Streaming audio decoder producing mix-format frames.
pub trait Decoder: Send {
    /// Decode up to `out.avail()` frames into `out`, setting `out.used`.
    fn read_frames(&mut self, out: &mut AudioBuffer) -> Result<ReadStatus, DecodeError>;

    /// Reposition so the next read yields the frame at `seconds`.
    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError>;

    /// Total mix-rate frames in the input, or zero if unknown.
    fn total_frames(&self) -> u64;
}

/// Opens stream decoders for the worker thread.
pub trait DecoderFactory: Send {
    /// Probe `chunk` and open a decoder for it.
    fn open(&self, chunk: FileChunk) -> Result<Box<dyn Decoder>, DecodeError>;
}
