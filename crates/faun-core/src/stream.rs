//! Streaming sources: a voice fed by a decoder instead of pool buffers.
//!
//! Each stream owns four decode buffers of a quarter second each. Starting a
//! stream primes the source queue with all four slots marked consumed, so
//! [`fill_buffers`] immediately sees four free slots to decode into. During
//! playback the worker refills at most one stream per tick unless a stream
//! has nothing queued at all.

use crate::decoder::Decoder;
use crate::source::{BufferRef, Source, SourceState};
use crate::{AudioBuffer, PlayMode};

/// Decode buffers owned by each stream.
pub const STREAM_BUFFERS: usize = 4;

/// Streaming front end attached to one tail slot of the source pool.
pub struct Stream {
    /// The open decoder, if any.
    pub decoder: Option<Box<dyn Decoder>>,
    /// May more data be decoded?
    pub feed: bool,
    /// Index of the backing source in the engine pool.
    pub sindex: usize,
    /// Segment start time in seconds, for looping a part.
    pub segment_start: f64,
    /// Frames produced in the current segment.
    pub sample_count: u32,
    /// Frames to deliver before an artificial end of stream, or zero.
    pub sample_limit: u32,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("open", &self.decoder.is_some())
            .field("feed", &self.feed)
            .field("sindex", &self.sindex)
            .field("sample_count", &self.sample_count)
            .field("sample_limit", &self.sample_limit)
            .finish()
    }
}

impl Stream {
    /// A closed stream backed by source `sindex`.
    pub fn new(sindex: usize) -> Self {
        Self {
            decoder: None,
            feed: false,
            sindex,
            segment_start: 0.0,
            sample_count: 0,
            sample_limit: 0,
        }
    }

    /// Drop the decoder, closing the underlying file.
    pub fn close(&mut self) {
        self.decoder = None;
    }
}

/// Prime the source queue and begin decoding.
///
/// Allocates the decode buffers on first use (a quarter second each, rounded
/// up to a multiple of 8 frames), fills what it can, and marks the source
/// playing if any frames were produced.
pub(crate) fn start(
    stream: &mut Stream,
    source: &mut Source,
    bufs: &mut [AudioBuffer; STREAM_BUFFERS],
    mix_rate: u32,
) {
    if bufs[0].is_detached() {
        let frame_count = ((mix_rate / 4) + 7) & !7;
        for buf in bufs.iter_mut() {
            *buf = AudioBuffer::voice_format(mix_rate, frame_count);
        }
    }

    source.reset_queue();
    for (i, buf) in bufs.iter_mut().enumerate() {
        buf.used = 0;
        source.queue[i] = BufferRef::Stream(i as u8);
    }
    source.buf_used = STREAM_BUFFERS as u16; // Prime processed_buffer().
    stream.feed = true;

    fill_buffers(stream, source, bufs);

    if stream.sample_count > 0 {
        source.state = SourceState::Playing;
        source.play_pos = 0;
        source.frames_out = 0;
    }
}

/// Halt playback and close the decoder.
pub(crate) fn stop(stream: &mut Stream, source: &mut Source) {
    source.state = SourceState::Stopped;
    stream.feed = false;
    stream.close();
}

/// Decode audio until every free queue slot is filled.
///
/// Must only be called while `feed` is set and a decoder is open. Returns
/// the number of buffers filled with data.
pub(crate) fn fill_buffers(
    stream: &mut Stream,
    source: &mut Source,
    bufs: &mut [AudioBuffer; STREAM_BUFFERS],
) -> usize {
    let mut fill_count = 0;

    'slots: while let Some(slot) = source.processed_buffer() {
        let BufferRef::Stream(slot) = slot else {
            // A stream source queue holds only the stream's own buffers.
            break;
        };
        fill_count += 1;

        loop {
            let Some(decoder) = stream.decoder.as_mut() else {
                break 'slots;
            };
            let buf = &mut bufs[slot as usize];
            let status = match decoder.read_frames(buf) {
                Ok(status) => status,
                Err(err) => {
                    tracing::error!(stream = stream.sindex, error = %err, "stream read failed");
                    stream.close();
                    break 'slots;
                }
            };

            let mut eof = status.eof;
            let mut has_data = status.frames > 0;
            if has_data {
                stream.sample_count += status.frames;
                if stream.sample_limit != 0 && stream.sample_count >= stream.sample_limit {
                    eof = true;
                    let excess = stream.sample_count - stream.sample_limit;
                    if excess >= buf.used {
                        buf.used = 0;
                        has_data = false;
                    } else {
                        buf.used -= excess;
                    }
                }
                if has_data {
                    source.queue_buffer(BufferRef::Stream(slot));
                }
            }

            if !eof {
                continue 'slots;
            }

            if source.mode.contains(PlayMode::LOOP) {
                let target = if stream.sample_limit != 0 {
                    stream.sample_count = 0;
                    stream.segment_start
                } else {
                    0.0
                };
                if let Err(err) = decoder.seek(target) {
                    tracing::error!(stream = stream.sindex, error = %err, "loop seek failed");
                    stream.close();
                    break 'slots;
                }
                if !has_data {
                    // Stream ended exactly on a buffer boundary; the
                    // unqueued slot is still free to decode into.
                    continue;
                }
                continue 'slots;
            } else if stream.sample_limit != 0 {
                // Let the queued buffers finish playing, but stop feeding.
                stream.feed = false;
                break 'slots;
            }

            stream.close();
            break 'slots;
        }
    }

    fill_count
}
