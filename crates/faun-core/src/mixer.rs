//! Fragment planning and multi-input mixing.
//!
//! Each mix tick is cut into fragments bounded by the shortest remaining
//! span (`buf.used - play_pos`) of any active source, so heterogeneous
//! buffer boundaries align without per-frame bookkeeping. Within a fragment,
//! sources with no running fade are mixed by uniform-gain kernels (4-, 2-,
//! and 1-source wide); fading sources are overlaid one at a time with an
//! envelope-stepping kernel that advances the gain every frame.

use crate::buffer::AudioBuffer;
use crate::source::{BufferRef, PlayMode, QACTIVE_NONE, SOURCE_QUEUE_SIZE, Source, SourceState};
use crate::stream::STREAM_BUFFERS;

/// One input to the uniform-gain mixer.
#[derive(Debug, Clone, Copy)]
pub struct MixInput<'a> {
    /// Interleaved stereo samples, one fragment long.
    pub samples: &'a [f32],
    /// Left channel gain.
    pub gain_l: f32,
    /// Right channel gain.
    pub gain_r: f32,
}

/// A source that reached end of play during a tick.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Finished {
    /// Pool index of the source.
    pub si: usize,
    /// Playback id the source carried.
    pub serial: u32,
    /// The play requested a done-signal.
    pub signal_done: bool,
}

/// Reusable per-tick index lists.
#[derive(Debug, Default)]
pub(crate) struct MixScratch {
    flat: Vec<usize>,
    fade: Vec<usize>,
}

/// Mix `inputs` into `output`.
///
/// The first input initializes the output and the rest accumulate; with no
/// inputs the output is zeroed. `output.len()` is the fragment length in
/// samples (frames * 2) and every input must be at least that long.
pub fn mix_buffers(output: &mut [f32], inputs: &[MixInput]) {
    let mut rest = inputs;
    let mut init = true;

    while rest.len() > 3 {
        mix4(output, &rest[..4], init);
        init = false;
        rest = &rest[4..];
    }

    match rest.len() {
        3 => {
            mix2(output, &rest[..2], init);
            mix1(output, &rest[2], false);
        }
        2 => mix2(output, rest, init),
        1 => mix1(output, &rest[0], init),
        _ => {
            if init {
                output.fill(0.0);
            }
        }
    }
}

fn mix1(output: &mut [f32], input: &MixInput, init: bool) {
    let frames = output.len() / 2;
    let src = input.samples;
    if init {
        for f in 0..frames {
            output[f * 2] = src[f * 2] * input.gain_l;
            output[f * 2 + 1] = src[f * 2 + 1] * input.gain_r;
        }
    } else {
        for f in 0..frames {
            output[f * 2] += src[f * 2] * input.gain_l;
            output[f * 2 + 1] += src[f * 2 + 1] * input.gain_r;
        }
    }
}

fn mix2(output: &mut [f32], inputs: &[MixInput], init: bool) {
    let frames = output.len() / 2;
    let (a, b) = (&inputs[0], &inputs[1]);
    if init {
        for f in 0..frames {
            output[f * 2] = a.samples[f * 2] * a.gain_l + b.samples[f * 2] * b.gain_l;
            output[f * 2 + 1] = a.samples[f * 2 + 1] * a.gain_r + b.samples[f * 2 + 1] * b.gain_r;
        }
    } else {
        for f in 0..frames {
            output[f * 2] += a.samples[f * 2] * a.gain_l + b.samples[f * 2] * b.gain_l;
            output[f * 2 + 1] += a.samples[f * 2 + 1] * a.gain_r + b.samples[f * 2 + 1] * b.gain_r;
        }
    }
}

fn mix4(output: &mut [f32], inputs: &[MixInput], init: bool) {
    let frames = output.len() / 2;
    let (a, b, c, d) = (&inputs[0], &inputs[1], &inputs[2], &inputs[3]);
    if init {
        for f in 0..frames {
            output[f * 2] = a.samples[f * 2] * a.gain_l
                + b.samples[f * 2] * b.gain_l
                + c.samples[f * 2] * c.gain_l
                + d.samples[f * 2] * d.gain_l;
            output[f * 2 + 1] = a.samples[f * 2 + 1] * a.gain_r
                + b.samples[f * 2 + 1] * b.gain_r
                + c.samples[f * 2 + 1] * c.gain_r
                + d.samples[f * 2 + 1] * d.gain_r;
        }
    } else {
        for f in 0..frames {
            output[f * 2] += a.samples[f * 2] * a.gain_l
                + b.samples[f * 2] * b.gain_l
                + c.samples[f * 2] * c.gain_l
                + d.samples[f * 2] * d.gain_l;
            output[f * 2 + 1] += a.samples[f * 2 + 1] * a.gain_r
                + b.samples[f * 2 + 1] * b.gain_r
                + c.samples[f * 2 + 1] * c.gain_r
                + d.samples[f * 2 + 1] * d.gain_r;
        }
    }
}

const FADE_L: u8 = 1;
const FADE_R: u8 = 2;

/// Overlay one fading source onto `output`, stepping its envelope per frame.
///
/// A channel whose gain crosses its target is clamped there and its delta
/// cleared. Once both deltas clear: a terminal fade forces end of play by
/// pinning `end_pos` to the current `frames_out`; otherwise the remainder of
/// the fragment continues at constant gain.
fn mix_fade(output: &mut [f32], input: &[f32], src: &mut Source) {
    let frames = output.len() / 2;
    let mut fading = 0u8;
    if src.fade_l != 0.0 {
        fading |= FADE_L;
    }
    if src.fade_r != 0.0 {
        fading |= FADE_R;
    }
    debug_assert!(fading != 0);

    for f in 0..frames {
        output[f * 2] += input[f * 2] * src.gain_l;
        output[f * 2 + 1] += input[f * 2 + 1] * src.gain_r;

        if fading & FADE_L != 0 && fade_channel(&mut src.gain_l, &mut src.fade_l, src.target_l) {
            fading &= !FADE_L;
        }
        if fading & FADE_R != 0 && fade_channel(&mut src.gain_r, &mut src.fade_r, src.target_r) {
            fading &= !FADE_R;
        }
        if fading == 0 {
            if src.mode.contains(PlayMode::END_AFTER_FADE) {
                src.end_pos = src.frames_out; // Force end of play.
            } else {
                for g in f + 1..frames {
                    output[g * 2] += input[g * 2] * src.gain_l;
                    output[g * 2 + 1] += input[g * 2 + 1] * src.gain_r;
                }
            }
            break;
        }
    }
}

/// Step one channel's gain. Returns true when the target was reached.
fn fade_channel(gain: &mut f32, fade: &mut f32, target: f32) -> bool {
    let next = *gain + *fade;
    let done = if *fade < 0.0 {
        next <= target
    } else {
        next >= target
    };
    if done {
        *gain = target;
        *fade = 0.0;
    } else {
        *gain = next;
    }
    done
}

fn resolve<'a>(
    bref: BufferRef,
    si: usize,
    source_limit: usize,
    pool: &'a [AudioBuffer],
    stream_bufs: &'a [[AudioBuffer; STREAM_BUFFERS]],
) -> Option<&'a AudioBuffer> {
    let buf = match bref {
        BufferRef::Pool(i) => pool.get(i as usize)?,
        BufferRef::Stream(slot) => stream_bufs
            .get(si.checked_sub(source_limit)?)?
            .get(slot as usize)?,
        BufferRef::Empty => return None,
    };
    if buf.is_detached() { None } else { Some(buf) }
}

/// Mix one tick of `active` sources into `out`.
///
/// `out` is the voice mix buffer span for this tick (`frames * 2` samples).
/// Sources that reach end of play are deactivated in place and reported in
/// `finished`; the caller clears playback ids and emits done-signals.
#[allow(clippy::too_many_arguments)]
pub(crate) fn mix_tick(
    out: &mut [f32],
    sources: &mut [Source],
    pool: &[AudioBuffer],
    stream_bufs: &[[AudioBuffer; STREAM_BUFFERS]],
    active: &[usize],
    source_limit: usize,
    total_mixed: &mut u32,
    scratch: &mut MixScratch,
    finished: &mut Vec<Finished>,
) {
    let mix_frames = out.len() / 2;
    let mut mixed = 0usize;

    while mixed < mix_frames {
        // Determine the fragment for this pass.
        let mut fragment = mix_frames - mixed;
        scratch.flat.clear();
        scratch.fade.clear();
        for &si in active {
            let src = &sources[si];
            if src.qactive == QACTIVE_NONE {
                continue;
            }
            let avail = match resolve(
                src.queue[src.qactive as usize],
                si,
                source_limit,
                pool,
                stream_bufs,
            ) {
                Some(buf) => (buf.used - src.play_pos) as usize,
                None => 0,
            };
            if avail < fragment {
                fragment = avail;
            }
            if src.fade_l != 0.0 || src.fade_r != 0.0 {
                scratch.fade.push(si);
            } else {
                scratch.flat.push(si);
            }
        }

        // Mix the fragment.
        let span = &mut out[mixed * 2..(mixed + fragment) * 2];
        let inputs: Vec<MixInput> = scratch
            .flat
            .iter()
            .filter_map(|&si| {
                let src = &sources[si];
                let buf = resolve(
                    src.queue[src.qactive as usize],
                    si,
                    source_limit,
                    pool,
                    stream_bufs,
                )?;
                let start = src.play_pos as usize * 2;
                Some(MixInput {
                    samples: &buf.samples()[start..start + fragment * 2],
                    gain_l: src.gain_l,
                    gain_r: src.gain_r,
                })
            })
            .collect();
        mix_buffers(span, &inputs);
        drop(inputs);

        for &si in &scratch.fade {
            let src = &mut sources[si];
            let Some(buf) = resolve(
                src.queue[src.qactive as usize],
                si,
                source_limit,
                pool,
                stream_bufs,
            ) else {
                continue;
            };
            let start = src.play_pos as usize * 2;
            let input = &buf.samples()[start..start + fragment * 2];
            mix_fade(&mut out[mixed * 2..(mixed + fragment) * 2], input, src);
        }

        // Advance play positions.
        for &si in active {
            if sources[si].qactive != QACTIVE_NONE {
                advance(
                    sources,
                    si,
                    fragment as u32,
                    source_limit,
                    pool,
                    stream_bufs,
                    finished,
                );
            }
        }

        mixed += fragment;
        *total_mixed = total_mixed.wrapping_add(fragment as u32);
    }
}

/// Advance one source past a mixed fragment, handling end of play, the
/// automatic fade-out trigger, queue rotation, looping, and freed buffers.
fn advance(
    sources: &mut [Source],
    si: usize,
    fragment: u32,
    source_limit: usize,
    pool: &[AudioBuffer],
    stream_bufs: &[[AudioBuffer; STREAM_BUFFERS]],
    finished: &mut Vec<Finished>,
) {
    let src = &mut sources[si];
    let pos = src.frames_out.wrapping_add(fragment);
    src.frames_out = pos;

    let mut end_play = |src: &mut Source| {
        src.qactive = QACTIVE_NONE;
        src.state = SourceState::Unused;
        finished.push(Finished {
            si,
            serial: src.serial_no,
            signal_done: src.mode.contains(PlayMode::SIGNAL_DONE),
        });
    };

    if pos >= src.end_pos {
        end_play(src);
        return;
    }
    if pos >= src.fade_pos {
        src.fade_out();
    }

    let pos = src.play_pos + fragment;
    let used = resolve(
        src.queue[src.qactive as usize],
        si,
        source_limit,
        pool,
        stream_bufs,
    )
    .map_or(0, |buf| buf.used);

    if pos >= used {
        // Load the next queued buffer.
        src.play_pos = 0;
        let mut n = src.qactive + 1;
        if n as usize == SOURCE_QUEUE_SIZE {
            n = 0;
        }
        if n == src.qtail {
            if src.mode.contains(PlayMode::LOOP) && src.index() < source_limit {
                if used == 0 {
                    // A looping source on an empty buffer would spin forever.
                    tracing::warn!(id = src.serial_no, "looping source has no sample data");
                    end_play(src);
                }
                return;
            }
            end_play(src);
        } else {
            // Abort if a buffer was freed behind our back.
            match resolve(src.queue[n as usize], si, source_limit, pool, stream_bufs) {
                Some(_) => src.qactive = n,
                None => end_play(src),
            }
        }
    } else {
        src.play_pos = pos;
    }
}
