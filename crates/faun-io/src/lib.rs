//! Default decoders and output sink for the Faun audio engine.
//!
//! This crate provides the collaborators the engine core treats as
//! pluggable:
//!
//! - [`load_file`] / [`load_chunk`] - decode WAV, Ogg Vorbis, FLAC, or
//!   `rFX ` data into a mix-format buffer on the caller thread
//! - [`buffer_from_pcm_s16`] / [`buffer_from_pcm_f32`] - wrap raw PCM from
//!   memory
//! - [`SymphoniaDecoder`] and [`ProbeFactory`] - streaming decode for the
//!   worker thread
//! - [`CpalSink`] - blocking audio output over cpal
//! - [`sfx`] - procedural sound-effect synthesis from `rFX ` parameters
//!
//! All decoded audio is interleaved stereo `f32` at the 44,100 Hz mix rate;
//! mono input is duplicated to both channels and 22,050 Hz input is
//! duplicated in time.

mod chunk;
mod compressed;
mod output;
pub mod sfx;
mod wav;

pub use chunk::ChunkReader;
pub use compressed::SymphoniaDecoder;
pub use output::CpalSink;
pub use sfx::{SfxParams, SfxWave};
pub use wav::load_wav;

use faun_core::{
    AudioBuffer, ChannelLayout, DecodeError, Decoder, DecoderFactory, FileChunk, MIX_RATE,
    interleave_f32, interleave_s16, output_frames,
};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Error type for audio loading and output.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV parse error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Compressed-audio decode error.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The leading bytes match no supported container.
    #[error("unrecognized audio format")]
    UnknownFormat,

    /// Recognized but unusable input.
    #[error("unsupported audio: {0}")]
    Unsupported(String),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Containers recognized by the default loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Wav,
    Compressed,
    Sfx,
}

/// Identify the container from its magic bytes.
fn probe(magic: &[u8; 4]) -> Option<Container> {
    match magic {
        b"RIFF" => Some(Container::Wav),
        b"OggS" | b"fLaC" => Some(Container::Compressed),
        b"rFX " => Some(Container::Sfx),
        _ => None,
    }
}

/// Decode an audio file into a mix-format buffer on the calling thread.
///
/// `offset`/`size` window the file; a zero `size` reads through the end.
pub fn load_file<P: AsRef<Path>>(path: P, offset: u32, size: u32) -> Result<AudioBuffer> {
    load_chunk(FileChunk {
        file: File::open(path)?,
        offset,
        size,
    })
}

/// Decode an already-open file chunk into a mix-format buffer.
pub fn load_chunk(mut chunk: FileChunk) -> Result<AudioBuffer> {
    chunk.file.seek(SeekFrom::Start(u64::from(chunk.offset)))?;
    let mut magic = [0u8; 4];
    chunk.file.read_exact(&mut magic)?;

    match probe(&magic).ok_or(Error::UnknownFormat)? {
        Container::Wav => load_wav(ChunkReader::new(chunk.file, chunk.offset, chunk.size)?),
        Container::Sfx => {
            chunk.file.seek(SeekFrom::Start(u64::from(chunk.offset)))?;
            sfx::load_rfx(chunk.file)
        }
        Container::Compressed => {
            chunk.file.seek(SeekFrom::Start(0))?;
            let decoder = SymphoniaDecoder::open(chunk)?;
            Ok(decode_all(decoder)?)
        }
    }
}

/// Drain a decoder to end of stream into one buffer.
fn decode_all(mut decoder: SymphoniaDecoder) -> std::result::Result<AudioBuffer, DecodeError> {
    let total = decoder.total_frames().min(u64::from(u32::MAX)) as u32;
    let mut out = AudioBuffer::voice_format(MIX_RATE, if total > 0 { total } else { MIX_RATE });
    let mut tmp = AudioBuffer::voice_format(MIX_RATE, MIX_RATE / 4);
    let mut used = 0u32;

    loop {
        let status = decoder.read_frames(&mut tmp)?;
        if status.frames > 0 {
            out.reserve(used + status.frames);
            let dst = used as usize * 2;
            let src = status.frames as usize * 2;
            out.samples_mut()[dst..dst + src].copy_from_slice(&tmp.samples()[..src]);
            used += status.frames;
        }
        if status.eof {
            break;
        }
    }
    out.used = used;
    Ok(out)
}

/// Wrap raw S16 PCM from memory into a mix-format buffer.
///
/// `rate` must be 44,100 or 22,050 Hz.
pub fn buffer_from_pcm_s16(samples: &[i16], channels: ChannelLayout, rate: u32) -> AudioBuffer {
    let frames = (samples.len() / channels.count()) as u32;
    let out_frames = output_frames(frames, rate);
    let mut buf = AudioBuffer::voice_format(MIX_RATE, out_frames);
    interleave_s16(buf.samples_mut(), samples, channels.count(), rate);
    buf.used = out_frames;
    buf
}

/// Wrap raw f32 PCM from memory into a mix-format buffer.
///
/// `rate` must be 44,100 or 22,050 Hz.
pub fn buffer_from_pcm_f32(samples: &[f32], channels: ChannelLayout, rate: u32) -> AudioBuffer {
    let frames = (samples.len() / channels.count()) as u32;
    let out_frames = output_frames(frames, rate);
    let mut buf = AudioBuffer::voice_format(MIX_RATE, out_frames);
    interleave_f32(buf.samples_mut(), samples, channels.count(), rate);
    buf.used = out_frames;
    buf
}

/// The default stream-decoder factory: probes the chunk and opens a
/// [`SymphoniaDecoder`] for Ogg Vorbis or FLAC data.
///
/// Streams decode compressed audio only; WAV and `rFX ` data belong in
/// preloaded buffers.
#[derive(Debug, Default)]
pub struct ProbeFactory;

impl DecoderFactory for ProbeFactory {
    fn open(&self, mut chunk: FileChunk) -> std::result::Result<Box<dyn Decoder>, DecodeError> {
        chunk.file.seek(SeekFrom::Start(u64::from(chunk.offset)))?;
        let mut magic = [0u8; 4];
        chunk.file.read_exact(&mut magic)?;
        chunk.file.seek(SeekFrom::Start(0))?;

        match probe(&magic) {
            Some(Container::Compressed) => Ok(Box::new(SymphoniaDecoder::open(chunk)?)),
            Some(_) => Err(DecodeError::Unsupported(
                "streaming requires Ogg Vorbis or FLAC".into(),
            )),
            None => Err(DecodeError::UnknownFormat),
        }
    }
}
