//! Faun is an embeddable realtime audio engine for games and similar
//! interactive applications.
//!
//! All API calls run on the caller's thread and post commands to a single
//! dedicated worker, which decodes, mixes, and delivers a continuous stereo
//! float stream to the platform audio output. Playback is organized around
//! a fixed pool of *sources* fed by in-memory buffers, a few *streams* fed
//! by decoders, and a tiny bytecode *program* VM for sequencing events.
//!
//! ```no_run
//! use faun::{Faun, Limits, PlayMode};
//!
//! let engine = Faun::startup(
//!     Limits { buffers: 16, sources: 8, streams: 2, programs: 1 },
//!     "my game",
//! )?;
//!
//! engine.load_buffer(0, "explosion.wav", 0, 0);
//! let id = engine.play_source(0, 0, PlayMode::ONCE | PlayMode::SIGNAL_DONE);
//!
//! let done = engine.wait_signal();
//! assert_eq!(done.id, id);
//! # Ok::<(), faun::StartupError>(())
//! ```

mod api;
mod worker;

pub use api::{Faun, SinkFactory, StartupError};
pub use faun_core::{
    BUFFER_MAX, Limits, PROGRAM_MAX, PROGRAM_UNITS_MAX, PlayMode, SOURCE_MAX, STREAM_MAX, Signal,
    SignalKind, pid_source,
};
pub use faun_core::{ControlOp, Opcode, Param};

/// Pack two buffer indices for [`Faun::play_source`].
///
/// The second field stores `index + 1` so that zero terminates the list.
pub fn pair(a: u32, b: u32) -> u32 {
    ((b + 1) << 10) | a
}

/// Pack three buffer indices for [`Faun::play_source`].
pub fn trio(a: u32, b: u32, c: u32) -> u32 {
    ((c + 1) << 20) | ((b + 1) << 10) | a
}
