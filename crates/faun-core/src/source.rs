//! Per-voice playback state.
//!
//! A [`Source`] is one slot in the engine's fixed pool of logical voices. It
//! carries a four-entry circular queue of buffer references, per-channel gain
//! and fade state, the playback mode bits, and the play/end/fade positions
//! the mixer advances each fragment.

use crate::MIX_RATE;

/// Capacity of a source's buffer queue.
pub const SOURCE_QUEUE_SIZE: usize = 4;

/// Sentinel queue index meaning "no active buffer".
pub const QACTIVE_NONE: u16 = 0xffff;

/// Sentinel frame position meaning "never".
pub const SOURCE_NO_POS: u32 = 0x7fff_ffff;

/// Playback mode bits for play calls and programs.
///
/// The public bits match the wire values used by program bytecode; the
/// `TARGET_VOL` and `END_AFTER_FADE` bits are engine-internal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayMode(pub u16);

impl PlayMode {
    /// Play the queued buffers a single time.
    pub const ONCE: PlayMode = PlayMode(0x0001);
    /// Repeat playback until stopped.
    pub const LOOP: PlayMode = PlayMode(0x0002);
    /// Ramp gain up from silence when playing begins.
    pub const FADE_IN: PlayMode = PlayMode(0x0010);
    /// Ramp gain down to silence just before the end of play.
    pub const FADE_OUT: PlayMode = PlayMode(0x0020);
    /// Emit a [`SignalKind::Done`](crate::SignalKind::Done) at end of play.
    pub const SIGNAL_DONE: PlayMode = PlayMode(0x0040);
    /// Signal kind bit used by the program `Signal` opcode.
    pub const SIGNAL_PROG: PlayMode = PlayMode(0x0080);

    /// Caller supplied explicit channel targets (internal).
    pub(crate) const TARGET_VOL: PlayMode = PlayMode(0x4000);
    /// The running fade is terminal; force end of play when it completes
    /// (internal).
    pub(crate) const END_AFTER_FADE: PlayMode = PlayMode(0x8000);

    /// Construct from raw wire bits.
    pub fn from_bits(bits: u16) -> Self {
        PlayMode(bits)
    }

    /// True if every bit of `other` is set.
    pub fn contains(self, other: PlayMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    pub fn intersects(self, other: PlayMode) -> bool {
        self.0 & other.0 != 0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: PlayMode) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: PlayMode) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for PlayMode {
    type Output = PlayMode;
    fn bitor(self, rhs: PlayMode) -> PlayMode {
        PlayMode(self.0 | rhs.0)
    }
}

/// State of a source slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceState {
    /// Not playing and holding no playback id.
    #[default]
    Unused,
    /// Actively mixed each tick.
    Playing,
    /// Loaded but halted; resumable.
    Stopped,
}

/// A queue entry: which buffer a source plays from.
///
/// Sources play from the engine's buffer pool; stream sources play from the
/// owning stream's private decode buffers. Indices rather than pointers keep
/// the freed-buffer check an explicit table lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferRef {
    /// Index into the engine buffer pool.
    Pool(u16),
    /// Slot in the owning stream's decode buffers.
    Stream(u8),
    /// Unpopulated queue entry.
    #[default]
    Empty,
}

/// One voice of the engine's fixed source pool.
#[derive(Debug, Clone)]
pub struct Source {
    /// Playback state.
    pub state: SourceState,
    /// Number of populated queue entries.
    pub buf_used: u16,
    /// Queue index of the append position.
    pub qtail: u16,
    /// Queue index of the oldest entry.
    pub qhead: u16,
    /// Queue index of the playing buffer, or [`QACTIVE_NONE`].
    pub qactive: u16,
    /// Playback mode bits.
    pub mode: PlayMode,

    /// Current left gain.
    pub gain_l: f32,
    /// Current right gain.
    pub gain_r: f32,
    /// Left gain delta per frame.
    pub fade_l: f32,
    /// Right gain delta per frame.
    pub fade_r: f32,
    /// Left fade target.
    pub target_l: f32,
    /// Right fade target.
    pub target_r: f32,

    /// Volume applied when play begins.
    pub play_volume: f32,
    /// Fade in/out duration in seconds.
    pub fade_period: f32,
    /// Playback identifier of the current play (serial << 8 | index).
    pub serial_no: u32,
    /// Frame position inside the active buffer.
    pub play_pos: u32,
    /// Total frames emitted since play start.
    pub frames_out: u32,
    /// Frame count at which to stop, or [`SOURCE_NO_POS`].
    pub end_pos: u32,
    /// Frame count at which to begin the automatic fade out, or
    /// [`SOURCE_NO_POS`].
    pub fade_pos: u32,

    /// Circular buffer queue.
    pub queue: [BufferRef; SOURCE_QUEUE_SIZE],
}

impl Source {
    /// A fresh source for pool slot `index`.
    pub fn new(index: usize) -> Self {
        Self {
            state: SourceState::Unused,
            buf_used: 0,
            qtail: 0,
            qhead: 0,
            qactive: QACTIVE_NONE,
            mode: PlayMode::default(),
            gain_l: 1.0,
            gain_r: 1.0,
            fade_l: 0.0,
            fade_r: 0.0,
            target_l: 1.0,
            target_r: 1.0,
            play_volume: 1.0,
            fade_period: 1.5,
            serial_no: index as u32,
            play_pos: 0,
            frames_out: 0,
            end_pos: SOURCE_NO_POS,
            fade_pos: SOURCE_NO_POS,
            queue: [BufferRef::Empty; SOURCE_QUEUE_SIZE],
        }
    }

    /// Source index baked into the playback identifier.
    pub fn index(&self) -> usize {
        (self.serial_no & 0xff) as usize
    }

    /// Reset the queue to a single entry holding `buf`, active.
    pub fn set_buffer(&mut self, buf: BufferRef) {
        self.buf_used = 1;
        self.qtail = 1;
        self.qhead = 0;
        self.qactive = 0;
        self.queue[0] = buf;
    }

    /// Empty the queue.
    pub fn reset_queue(&mut self) {
        self.buf_used = 0;
        self.qtail = 0;
        self.qhead = 0;
        self.qactive = QACTIVE_NONE;
    }

    /// Append `buf` to the queue tail.
    ///
    /// If the queue was fully consumed the new entry becomes active. A push
    /// into a full queue is dropped with an error log.
    pub fn queue_buffer(&mut self, buf: BufferRef) {
        if (self.buf_used as usize) < SOURCE_QUEUE_SIZE {
            self.buf_used += 1;
            let mut i = self.qtail;
            self.queue[i as usize] = buf;
            if self.qactive == QACTIVE_NONE {
                self.qactive = i;
            }
            i += 1;
            if i as usize == SOURCE_QUEUE_SIZE {
                i = 0;
            }
            self.qtail = i;
        } else {
            tracing::error!(id = self.serial_no, "source queue full");
        }
    }

    /// Dequeue the oldest finished buffer.
    ///
    /// The entry at `qhead` is finished iff it is not the active entry.
    /// Returns `None` if nothing in the queue has finished playing.
    pub fn processed_buffer(&mut self) -> Option<BufferRef> {
        if self.buf_used != 0 && self.qactive != self.qhead {
            let mut i = self.qhead;
            let buf = self.queue[i as usize];
            i += 1;
            if i as usize == SOURCE_QUEUE_SIZE {
                i = 0;
            }
            self.qhead = i;
            self.buf_used -= 1;
            Some(buf)
        } else {
            None
        }
    }

    /// Immediately set current gains and halt any fade.
    pub fn set_gain(&mut self, vol_l: f32, vol_r: f32) {
        self.gain_l = vol_l;
        self.gain_r = vol_r;
        self.fade_l = 0.0;
        self.fade_r = 0.0;
    }

    /// Set the per-frame fade deltas so the current gains reach the targets
    /// over `fade_period` seconds. A zero period snaps to the targets.
    pub fn set_fade_deltas(&mut self) {
        if self.fade_period > 0.0 {
            let inc = fade_delta(1.0, self.fade_period);
            self.fade_l = inc * (self.target_l - self.gain_l);
            self.fade_r = inc * (self.target_r - self.gain_r);
        } else {
            self.set_gain(self.target_l, self.target_r);
        }
    }

    /// Begin a terminal fade to silence from the current gains.
    pub fn fade_out(&mut self) {
        let inc = -fade_delta(1.0, self.fade_period);
        self.fade_l = inc * self.gain_l;
        self.fade_r = inc * self.gain_r;
        self.target_l = 0.0;
        self.target_r = 0.0;
        self.mode.insert(PlayMode::END_AFTER_FADE);
    }

    /// Schedule the automatic fade out near the end of a `total_frames` play.
    ///
    /// Left at the sentinel when the play is too short for the fade in and
    /// fade out to avoid overlapping.
    pub fn init_fade_out(&mut self, total_frames: u32) {
        let fade_frames = (self.fade_period * MIX_RATE as f32) as u32;
        if total_frames > 2 * fade_frames {
            self.fade_pos = total_frames - fade_frames;
        }
    }

    /// Apply the mode bits of a play call and prime the gain state.
    pub fn set_mode(&mut self, mode: PlayMode) {
        self.mode = mode;

        if mode.contains(PlayMode::FADE_IN) {
            self.gain_l = 0.0;
            self.gain_r = 0.0;
            self.target_l = self.play_volume;
            self.target_r = self.play_volume;
            self.set_fade_deltas();
        } else if mode.contains(PlayMode::TARGET_VOL) {
            // Reset after any previous fade out.
            self.set_gain(self.target_l, self.target_r);
        } else {
            self.set_gain(self.play_volume, self.play_volume);
        }
        self.end_pos = SOURCE_NO_POS;
        self.fade_pos = SOURCE_NO_POS;
    }
}

/// Per-frame gain change that crosses `vol` in `period` seconds.
fn fade_delta(vol: f32, period: f32) -> f32 {
    (vol / period) / MIX_RATE as f32
}
