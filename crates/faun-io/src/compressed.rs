//! Ogg Vorbis and FLAC decoding via symphonia.
//!
//! One decoder type serves both the streaming path (quarter-second refills
//! with seeking) and whole-file buffer loads. Output is always interleaved
//! stereo `f32` at the mix rate, with mono duplication and half-rate time
//! doubling applied as the packets are drained.

use crate::chunk::ChunkReader;
use faun_core::{
    AudioBuffer, DecodeError, Decoder, FileChunk, MIX_RATE, ReadStatus, interleave_f32,
    output_frames,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::Decoder as _;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

impl MediaSource for ChunkReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.window_len()
    }
}

/// Streaming decoder for Ogg Vorbis and FLAC chunks.
pub struct SymphoniaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    rate: u32,
    total: u64,
    /// Mix-format samples decoded but not yet handed out.
    pending: Vec<f32>,
    sample_buf: Option<SampleBuffer<f32>>,
    eof: bool,
}

impl SymphoniaDecoder {
    /// Probe and open the audio in `chunk`.
    pub fn open(chunk: FileChunk) -> Result<Self, DecodeError> {
        let reader = ChunkReader::new(chunk.file, chunk.offset, chunk.size)?;
        let mss = MediaSourceStream::new(Box::new(reader), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Codec(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::UnknownFormat)?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let rate = params.sample_rate.unwrap_or(MIX_RATE);
        if rate != MIX_RATE && rate != MIX_RATE / 2 {
            return Err(DecodeError::Unsupported(format!(
                "sample rate {rate} Hz"
            )));
        }
        let total = params
            .n_frames
            .map_or(0, |n| u64::from(output_frames(1, rate)) * n);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            rate,
            total,
            pending: Vec::new(),
            sample_buf: None,
            eof: false,
        })
    }
}

/// Interleave one decoded packet into `pending` at the mix format.
///
/// A free function over disjoint decoder fields: the packet data borrows
/// the codec while it is converted.
fn buffer_packet(
    decoded: symphonia::core::audio::AudioBufferRef<'_>,
    rate: u32,
    pending: &mut Vec<f32>,
    sample_buf: &mut Option<SampleBuffer<f32>>,
) {
    let spec = *decoded.spec();
    let duration = decoded.capacity() as u64;
    let needed = decoded.capacity() * spec.channels.count();
    if sample_buf.as_ref().is_none_or(|b| b.capacity() < needed) {
        *sample_buf = Some(SampleBuffer::new(duration, spec));
    }
    let Some(sample_buf) = sample_buf.as_mut() else {
        return;
    };
    sample_buf.copy_interleaved_ref(decoded);

    let samples = sample_buf.samples();
    let channels = spec.channels.count();
    let frames = samples.len() / channels;
    let out_frames = output_frames(frames as u32, rate) as usize;

    let start = pending.len();
    pending.resize(start + out_frames * 2, 0.0);
    interleave_f32(&mut pending[start..], samples, channels, rate);
}

impl Decoder for SymphoniaDecoder {
    fn read_frames(&mut self, out: &mut AudioBuffer) -> Result<ReadStatus, DecodeError> {
        let cap = out.avail() as usize * 2;
        let mut filled = 0usize;

        while filled < cap {
            if !self.pending.is_empty() {
                let take = (cap - filled).min(self.pending.len());
                out.samples_mut()[filled..filled + take].copy_from_slice(&self.pending[..take]);
                self.pending.drain(..take);
                filled += take;
                continue;
            }
            if self.eof {
                break;
            }

            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    continue;
                }
                Err(SymError::ResetRequired) => {
                    self.eof = true;
                    continue;
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    buffer_packet(decoded, self.rate, &mut self.pending, &mut self.sample_buf);
                }
                // A corrupt packet is skipped, not fatal.
                Err(SymError::DecodeError(err)) => {
                    tracing::warn!(error = err, "skipping undecodable packet");
                }
                Err(e) => return Err(DecodeError::Codec(e.to_string())),
            }
        }

        out.used = (filled / 2) as u32;
        Ok(ReadStatus {
            frames: out.used,
            eof: self.eof && self.pending.is_empty(),
        })
    }

    fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::from(seconds.max(0.0)),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| DecodeError::Seek(e.to_string()))?;
        self.decoder.reset();
        self.pending.clear();
        self.eof = false;
        Ok(())
    }

    fn total_frames(&self) -> u64 {
        self.total
    }
}
