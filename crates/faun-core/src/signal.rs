//! Signals emitted by the worker back to caller threads.

/// Event kinds carried on the signal port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// A source or stream finished playing.
    Done,
    /// A program executed its `Signal` opcode.
    Program,
}

/// One signal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    /// The playback identifier of the source generating the signal.
    ///
    /// For program signals this is the program's selected source index.
    pub id: u32,
    /// Which event occurred.
    pub kind: SignalKind,
}
