//! The playback identifier service.
//!
//! Every play call mints a 24-bit serial packed with the 8-bit source index
//! into a 32-bit playback id. The table is the only engine structure with
//! true cross-thread access: callers write the id synchronously before
//! posting the play command (so `is_playing` observes it immediately) and
//! the worker clears a slot at end of play only if it still holds the id
//! that just ended.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// The null playback identifier; never minted.
pub const NO_PLAY_ID: u32 = 0;

/// Source index carried in the low byte of a playback identifier.
pub fn pid_source(pid: u32) -> usize {
    (pid & 0xff) as usize
}

/// Fixed table of current playback ids, one slot per source and stream.
#[derive(Debug)]
pub struct PlaybackTable {
    slots: Vec<AtomicU32>,
    serial: AtomicU32,
    lock: AtomicBool,
}

impl PlaybackTable {
    /// A table with `count` slots, all empty.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| AtomicU32::new(NO_PLAY_ID)).collect(),
            serial: AtomicU32::new(NO_PLAY_ID),
            lock: AtomicBool::new(false),
        }
    }

    fn acquire(&self) {
        while self.lock.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    fn release(&self) {
        self.lock.store(false, Ordering::Release);
    }

    /// Mint the next playback id for source `si` and publish it.
    ///
    /// Serials are monotonic in 1..=0xFFFFFF and wrap back to 1, so the
    /// upper 24 bits of a minted id are never zero.
    pub fn mint(&self, si: usize) -> u32 {
        let prev = self
            .serial
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
                Some(if s >= 0xff_ffff { 1 } else { s + 1 })
            })
            .unwrap_or(0);
        let serial = if prev >= 0xff_ffff { 1 } else { prev + 1 };
        let pid = (serial << 8) | si as u32;

        self.acquire();
        self.slots[si].store(pid, Ordering::Relaxed);
        self.release();
        pid
    }

    /// Clear the slot for `si` if it still holds `pid`.
    ///
    /// A newer play may have taken the slot between end-of-play and this
    /// call; that id must survive.
    pub fn clear_if(&self, si: usize, pid: u32) {
        self.acquire();
        if self.slots[si].load(Ordering::Relaxed) == pid {
            self.slots[si].store(NO_PLAY_ID, Ordering::Relaxed);
        }
        self.release();
    }

    /// Lock-free check whether `pid` is the current play on its source.
    pub fn is_playing(&self, pid: u32) -> bool {
        if pid == NO_PLAY_ID {
            return false;
        }
        let si = pid_source(pid);
        match self.slots.get(si) {
            Some(slot) => slot.load(Ordering::Relaxed) == pid,
            None => false,
        }
    }
}
