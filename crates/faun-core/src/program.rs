//! Bytecode programs for sequencing playback.
//!
//! A program is a short opcode sequence bound to one execution unit and
//! evaluated each mix tick. The byte values are wire-compatible with the
//! command-port framing, so bytecode built by callers is stored verbatim
//! and decoded on the worker.

/// Maximum program length in bytes.
pub const PROGRAM_MAX: usize = 64;

/// Program opcodes and their wire values.
///
/// Operand bytes follow each opcode; time operands count 1/10-second units
/// and volume operands map `0..=255` onto `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Terminate the program.
    End = 0,
    /// Suspend for the operand's duration.
    Wait = 1,
    /// Select the source for subsequent operations.
    Source = 2,
    /// Queue a buffer on the selected source.
    Queue = 3,
    /// Play a buffer on the selected source: operands buffer, mode.
    PlayBuf = 4,
    /// Start the selected stream: operand mode.
    StartStream = 5,
    /// Unassigned; reserved in the wire encoding.
    Reserved0 = 6,
    /// Set the play volume parameter.
    SetVol = 7,
    /// Set the fade period parameter.
    SetFade = 8,
    /// Set the end position, or clear it with operand zero.
    SetEnd = 9,
    /// Set the loop bit of the selected source's mode.
    LoopOn = 10,
    /// Clear the loop bit of the selected source's mode.
    LoopOff = 11,
    /// Ramp gains from silence up to the play volume.
    FadeIn = 12,
    /// Begin a terminal fade to silence.
    FadeOut = 13,
    /// Set channel gains immediately: operands left, right.
    VolLr = 14,
    /// Fade channel gains to targets: operands left, right.
    Pan = 15,
    /// Emit a program signal for the selected source.
    Signal = 16,
    /// Debug capture hook; no engine semantics.
    Capture = 17,
}

impl Opcode {
    /// Decode a wire byte.
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        Some(match byte {
            0 => Opcode::End,
            1 => Opcode::Wait,
            2 => Opcode::Source,
            3 => Opcode::Queue,
            4 => Opcode::PlayBuf,
            5 => Opcode::StartStream,
            6 => Opcode::Reserved0,
            7 => Opcode::SetVol,
            8 => Opcode::SetFade,
            9 => Opcode::SetEnd,
            10 => Opcode::LoopOn,
            11 => Opcode::LoopOff,
            12 => Opcode::FadeIn,
            13 => Opcode::FadeOut,
            14 => Opcode::VolLr,
            15 => Opcode::Pan,
            16 => Opcode::Signal,
            17 => Opcode::Capture,
            _ => return None,
        })
    }

    /// Number of operand bytes following the opcode.
    pub fn operand_len(self) -> usize {
        match self {
            Opcode::Wait
            | Opcode::Source
            | Opcode::Queue
            | Opcode::StartStream
            | Opcode::SetVol
            | Opcode::SetFade
            | Opcode::SetEnd => 1,
            Opcode::PlayBuf | Opcode::VolLr | Opcode::Pan => 2,
            _ => 0,
        }
    }
}

/// One execution unit: a code buffer plus interpreter state.
#[derive(Debug, Clone)]
pub struct Program {
    /// Bytecode storage.
    pub code: [u8; PROGRAM_MAX],
    /// Next byte to interpret.
    pub pc: usize,
    /// Bytes of `code` in use.
    pub used: usize,
    /// Eligible for evaluation.
    pub running: bool,
    /// Currently selected source index.
    pub si: usize,
    /// Mix-clock frame at which execution may resume; zero when not waiting.
    pub wait_pos: u32,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            code: [0; PROGRAM_MAX],
            pc: 0,
            used: 0,
            running: false,
            si: 0,
            wait_pos: 0,
        }
    }
}

impl Program {
    /// Append a bytecode chunk during framed assembly.
    ///
    /// On overflow the program is halted and the chunk dropped.
    pub fn append(&mut self, chunk: &[u8]) {
        if self.used + chunk.len() > PROGRAM_MAX {
            self.running = false;
            tracing::error!("program buffer overflow");
            return;
        }
        self.code[self.used..self.used + chunk.len()].copy_from_slice(chunk);
        self.used += chunk.len();
    }

    /// Clear the code buffer and interpreter position.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.used = 0;
        self.wait_pos = 0;
    }

    /// Finish execution: clear the code and the running flag.
    pub fn halt(&mut self) {
        self.pc = 0;
        self.used = 0;
        self.running = false;
    }
}
