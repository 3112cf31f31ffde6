//! The engine state machine.
//!
//! [`Engine`] owns every buffer, source, stream, and program, plus the voice
//! mix buffer and the output sink. It is strictly single-threaded: the
//! worker thread alternates between [`Engine::dispatch`] for each inbound
//! command and [`Engine::tick`] when the command port times out. Keeping the
//! state machine synchronous also makes the whole mixing core testable
//! without spawning a worker.

use std::sync::Arc;

use crate::buffer::AudioBuffer;
use crate::command::{Command, ControlOp, Param, ProgramFrame};
use crate::decoder::DecoderFactory;
use crate::mixer::{self, Finished, MixScratch};
use crate::msgport::MsgPort;
use crate::playback::PlaybackTable;
use crate::program::{Opcode, Program};
use crate::signal::{Signal, SignalKind};
use crate::sink::{Sink, SinkError};
use crate::source::{BufferRef, PlayMode, QACTIVE_NONE, SOURCE_NO_POS, Source, SourceState};
use crate::stream::{self, STREAM_BUFFERS, Stream};
use crate::{DEF_UPDATE_HZ, MIX_RATE};

/// Maximum number of buffers.
pub const BUFFER_MAX: usize = 256;
/// Maximum number of simultaneously playing sources.
pub const SOURCE_MAX: usize = 32;
/// Maximum number of simultaneously playing streams.
pub const STREAM_MAX: usize = 6;
/// Maximum number of program execution units.
pub const PROGRAM_UNITS_MAX: usize = 16;

/// Program `Wait` operand unit in mix-rate frames (1/10 second).
const WAIT_UNIT_FRAMES: u32 = 4410;

/// Pool sizes configured at startup.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Number of buffer slots (max [`BUFFER_MAX`]).
    pub buffers: usize,
    /// Number of sources (max [`SOURCE_MAX`]).
    pub sources: usize,
    /// Number of streams (max [`STREAM_MAX`]).
    pub streams: usize,
    /// Number of program execution units (max [`PROGRAM_UNITS_MAX`]).
    pub programs: usize,
}

impl Limits {
    /// Clamp every limit to its maximum.
    pub fn clamped(self) -> Self {
        Self {
            buffers: self.buffers.min(BUFFER_MAX),
            sources: self.sources.min(SOURCE_MAX),
            streams: self.streams.min(STREAM_MAX),
            programs: self.programs.min(PROGRAM_UNITS_MAX),
        }
    }

    /// Total source slots including the stream tail.
    pub fn total_sources(self) -> usize {
        self.sources + self.streams
    }
}

/// Engine construction failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The sink could not configure an output voice.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// The process-wide realtime state, driven by commands and mix ticks.
pub struct Engine {
    limits: Limits,
    buffers: Vec<AudioBuffer>,
    sources: Vec<Source>,
    streams: Vec<Stream>,
    stream_bufs: Vec<[AudioBuffer; STREAM_BUFFERS]>,
    programs: Vec<Program>,

    mix: AudioBuffer,
    total_mixed: u32,
    update_hz: u32,
    suspended: bool,

    sink: Box<dyn Sink>,
    decoders: Box<dyn DecoderFactory>,
    signals: Arc<MsgPort<Signal>>,
    playback: Arc<PlaybackTable>,

    scratch: MixScratch,
    active: Vec<usize>,
    finished: Vec<Finished>,
}

impl Engine {
    /// Build the engine state and negotiate the output voice.
    ///
    /// `playback` must have [`Limits::total_sources`] slots.
    pub fn new(
        limits: Limits,
        mut sink: Box<dyn Sink>,
        decoders: Box<dyn DecoderFactory>,
        signals: Arc<MsgPort<Signal>>,
        playback: Arc<PlaybackTable>,
    ) -> Result<Self, EngineError> {
        let limits = limits.clamped();
        let layout = sink.alloc_voice(DEF_UPDATE_HZ)?;

        let mut mix = AudioBuffer::voice_format(MIX_RATE, layout.frames_per_burst);
        mix.used = layout.frames_per_burst;

        let total = limits.total_sources();
        Ok(Self {
            limits,
            buffers: vec![AudioBuffer::default(); limits.buffers],
            sources: (0..total).map(Source::new).collect(),
            streams: (0..limits.streams)
                .map(|i| Stream::new(limits.sources + i))
                .collect(),
            stream_bufs: (0..limits.streams).map(|_| Default::default()).collect(),
            programs: vec![Program::default(); limits.programs],
            mix,
            total_mixed: 0,
            update_hz: layout.update_hz,
            suspended: false,
            sink,
            decoders,
            signals,
            playback,
            scratch: MixScratch::default(),
            active: Vec::with_capacity(total),
            finished: Vec::with_capacity(total),
        })
    }

    /// Mix ticks per second negotiated with the sink.
    pub fn update_hz(&self) -> u32 {
        self.update_hz
    }

    /// Frames mixed per tick.
    pub fn mix_frames(&self) -> u32 {
        self.mix.used
    }

    /// True while mixing is suspended; commands are still dispatched.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Apply one command. Returns `false` when the worker should exit.
    pub fn dispatch(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Quit => return false,

            Command::Suspend => {
                self.suspended = true;
                self.sink.stop_voice();
            }

            Command::Resume => {
                self.suspended = false;
                self.sink.start_voice();
            }

            Command::Program { exec, frame, code } => {
                let Some(prog) = self.programs.get_mut(exec as usize) else {
                    return true;
                };
                match frame {
                    ProgramFrame::Whole => {
                        prog.reset();
                        prog.running = true;
                    }
                    ProgramFrame::Begin => {
                        prog.reset();
                        prog.running = false;
                    }
                    ProgramFrame::Mid => {}
                    ProgramFrame::End => prog.running = true,
                }
                prog.append(&code);
            }

            Command::SetBuffer { index, buffer } => {
                let Some(slot) = self.buffers.get_mut(index as usize) else {
                    tracing::warn!(index, "set-buffer index out of range");
                    return true;
                };
                slot.release();
                self.detach_buffers();
                self.buffers[index as usize] = buffer;
            }

            Command::FreeBuffers { first, count } => {
                let first = first as usize;
                let end = (first + count as usize).min(self.buffers.len());
                let start = first.min(self.buffers.len());
                for buf in &mut self.buffers[start..end] {
                    buf.release();
                }
                self.detach_buffers();
            }

            Command::PlaySource {
                si,
                buffers,
                mode,
                pid,
                volume,
            } => {
                let si = si as usize;
                let mut mode = mode;
                if let Some((l, r)) = volume {
                    if let Some(src) = self.sources.get_mut(si) {
                        src.target_l = l;
                        src.target_r = r;
                    }
                    mode.insert(PlayMode::TARGET_VOL);
                }
                self.play_source(si, buffers, mode, pid);
            }

            Command::OpenStream {
                si,
                chunk,
                mode,
                pid,
            } => self.open_stream(si as usize, chunk, mode, pid),

            Command::PlayStreamPart {
                si,
                start,
                duration,
                mode,
            } => self.play_stream_part(si as usize, start, duration, mode),

            Command::Pan {
                si,
                target_l,
                target_r,
                period,
            } => {
                if let Some(src) = self.sources.get_mut(si as usize) {
                    src.target_l = target_l;
                    src.target_r = target_r;
                    src.fade_period = period;
                    src.set_fade_deltas();
                }
            }

            Command::Control { op, si, count } => self.control(op, si as usize, count as usize),

            Command::SetParam {
                param,
                si,
                count,
                value,
            } => self.set_param(param, si as usize, count as usize, value),
        }
        true
    }

    /// Run one mix tick: evaluate programs, refill streams, mix all active
    /// sources into the voice buffer, and write it to the sink.
    pub fn tick(&mut self) {
        for pi in 0..self.programs.len() {
            if self.programs[pi].running {
                self.eval_program(pi);
            }
        }

        // Collect active sources.
        self.active.clear();
        for si in 0..self.limits.sources {
            let src = &self.sources[si];
            if src.state == SourceState::Playing && src.qactive != QACTIVE_NONE {
                self.active.push(si);
            }
        }

        // Read streams and collect their sources. Only one stream is decoded
        // per tick unless a stream has nothing queued to play.
        let mut filled = 0;
        for i in 0..self.streams.len() {
            let si = self.limits.sources + i;
            if self.sources[si].state != SourceState::Playing {
                continue;
            }
            let st = &mut self.streams[i];
            if st.feed
                && st.decoder.is_some()
                && (filled == 0 || self.sources[si].qactive == QACTIVE_NONE)
            {
                filled += stream::fill_buffers(st, &mut self.sources[si], &mut self.stream_bufs[i]);
            }
            if self.sources[si].qactive != QACTIVE_NONE {
                self.active.push(si);
            }
        }

        // Mix active sources into the voice buffer.
        let frames = self.mix.used as usize;
        self.finished.clear();
        mixer::mix_tick(
            &mut self.mix.samples_mut()[..frames * 2],
            &mut self.sources,
            &self.buffers,
            &self.stream_bufs,
            &self.active,
            self.limits.sources,
            &mut self.total_mixed,
            &mut self.scratch,
            &mut self.finished,
        );

        for fin in &self.finished {
            self.playback.clear_if(fin.si, fin.serial);
            if fin.signal_done {
                self.signals.push(Signal {
                    id: fin.serial,
                    kind: SignalKind::Done,
                });
            }
        }

        // Send the final mix to the audio system.
        if let Err(err) = self.sink.write(&self.mix.samples()[..frames * 2]) {
            tracing::error!(error = %err, "sink write failed");
        }
    }

    /// The cumulative mix clock in frames (wraps at 2^32).
    pub fn mix_clock(&self) -> u32 {
        self.total_mixed
    }

    fn deactivate(&mut self, si: usize) {
        let src = &mut self.sources[si];
        src.qactive = QACTIVE_NONE;
        src.state = SourceState::Unused;
        self.playback.clear_if(si, src.serial_no);
    }

    /// Abort all sources playing a freed buffer.
    ///
    /// Only the current queue entry is checked; freed buffers deeper in a
    /// queue are caught when the play cursor reaches them.
    fn detach_buffers(&mut self) {
        for si in 0..self.limits.sources {
            let src = &self.sources[si];
            if src.qactive == QACTIVE_NONE {
                continue;
            }
            if let BufferRef::Pool(bi) = src.queue[src.qactive as usize] {
                if self
                    .buffers
                    .get(bi as usize)
                    .is_none_or(AudioBuffer::is_detached)
                {
                    self.deactivate(si);
                }
            }
        }
    }

    /// Begin playback of pool buffers on a source (`cmd_playSource`).
    fn play_source(&mut self, si: usize, buf_ids: u32, mode: PlayMode, pid: u32) {
        if si >= self.sources.len() {
            tracing::warn!(source = si, "play on invalid source index");
            return;
        }
        let head = (buf_ids & 0x3ff) as usize;
        if head >= self.buffers.len() {
            tracing::warn!(buffer = head, "play with invalid buffer index");
            return;
        }

        let src = &mut self.sources[si];
        src.serial_no = pid;
        src.set_buffer(BufferRef::Pool(head as u16));
        let mut ftotal = self.buffers[head].used;

        // Trailing packed fields store index + 1, so zero terminates.
        let mut ids = buf_ids >> 10;
        while ids != 0 {
            let bi = ((ids - 1) & 0x3ff) as usize;
            if bi < self.buffers.len() {
                self.sources[si].queue_buffer(BufferRef::Pool(bi as u16));
                ftotal += self.buffers[bi].used;
            }
            ids >>= 10;
        }

        let src = &mut self.sources[si];
        src.play_pos = 0;
        src.frames_out = 0;
        src.set_mode(mode);

        if mode.contains(PlayMode::FADE_OUT) {
            src.init_fade_out(ftotal);
        }

        src.state = if mode.intersects(PlayMode::ONCE | PlayMode::LOOP) {
            SourceState::Playing
        } else {
            SourceState::Stopped
        };
    }

    fn open_stream(&mut self, si: usize, chunk: crate::FileChunk, mode: PlayMode, pid: u32) {
        let Some(sti) = self.stream_index(si) else {
            return;
        };
        stream::stop(&mut self.streams[sti], &mut self.sources[si]);

        let decoder = match self.decoders.open(chunk) {
            Ok(decoder) => decoder,
            Err(err) => {
                tracing::error!(stream = si, error = %err, "cannot open stream");
                return;
            }
        };
        let total = decoder.total_frames();

        let st = &mut self.streams[sti];
        st.feed = false;
        st.sample_count = 0;
        st.sample_limit = 0;
        st.segment_start = 0.0;
        st.decoder = Some(decoder);

        let src = &mut self.sources[si];
        src.serial_no = pid;
        src.set_mode(mode);
        if mode.contains(PlayMode::FADE_OUT) {
            src.init_fade_out(total.min(u64::from(SOURCE_NO_POS)) as u32);
        }

        if mode.intersects(PlayMode::ONCE | PlayMode::LOOP) {
            stream::start(st, src, &mut self.stream_bufs[sti], MIX_RATE);
        }
    }

    fn play_stream_part(&mut self, si: usize, start: f64, duration: f64, mode: PlayMode) {
        let Some(sti) = self.stream_index(si) else {
            return;
        };
        if self.streams[sti].decoder.is_none() {
            tracing::warn!(stream = si, "play-stream-part on a closed stream");
            return;
        }

        let st = &mut self.streams[sti];
        st.feed = false;
        st.segment_start = start;
        st.sample_count = 0;
        st.sample_limit = (duration * f64::from(MIX_RATE)) as u32;

        let src = &mut self.sources[si];
        src.set_mode(mode);
        src.state = SourceState::Stopped;

        if let Some(decoder) = st.decoder.as_mut() {
            if let Err(err) = decoder.seek(start) {
                tracing::error!(stream = si, error = %err, "stream seek failed");
                st.close();
                return;
            }
        }
        stream::start(st, src, &mut self.stream_bufs[sti], MIX_RATE);
    }

    fn control(&mut self, op: ControlOp, si: usize, count: usize) {
        let end = (si + count).min(self.sources.len());
        for i in si..end {
            let src = &mut self.sources[i];
            match op {
                ControlOp::Start | ControlOp::Resume => {
                    if src.qactive != QACTIVE_NONE {
                        src.state = SourceState::Playing;
                    }
                }
                ControlOp::Stop => {
                    if src.qactive != QACTIVE_NONE {
                        src.state = SourceState::Stopped;
                    }
                }
                ControlOp::FadeOut => src.fade_out(),
            }
        }
    }

    fn set_param(&mut self, param: Param, si: usize, count: usize, value: f32) {
        let end = (si + count).min(self.sources.len());
        let start = si.min(self.sources.len());
        match param {
            Param::Volume => {
                for src in &mut self.sources[start..end] {
                    src.play_volume = value;
                }
            }
            Param::FadePeriod => {
                for src in &mut self.sources[start..end] {
                    src.fade_period = value;
                }
            }
            Param::EndTime => {
                if let Some(src) = self.sources.get_mut(si) {
                    src.end_pos = if value <= 0.01 {
                        SOURCE_NO_POS
                    } else {
                        (MIX_RATE as f32 * value) as u32
                    };
                }
            }
        }
    }

    fn stream_index(&self, si: usize) -> Option<usize> {
        let sti = si.checked_sub(self.limits.sources)?;
        if sti < self.streams.len() {
            Some(sti)
        } else {
            tracing::warn!(source = si, "invalid stream index");
            None
        }
    }

    /// Interpret one program until it waits, ends, or hits a bad opcode.
    fn eval_program(&mut self, pi: usize) {
        let mut prog = std::mem::take(&mut self.programs[pi]);

        if prog.wait_pos != 0 {
            if self.total_mixed < prog.wait_pos {
                self.programs[pi] = prog;
                return;
            }
            prog.wait_pos = 0;
        }

        loop {
            if prog.pc >= prog.used {
                prog.pc = 0;
                prog.used = 0;
                prog.running = false;
                break;
            }
            let byte = prog.code[prog.pc];
            prog.pc += 1;

            let op = match Opcode::from_byte(byte) {
                Some(Opcode::Reserved0) | None => {
                    tracing::error!(opcode = byte, "invalid program opcode");
                    prog.halt();
                    break;
                }
                Some(op) => op,
            };
            let operands = op.operand_len();
            if prog.pc + operands > prog.used {
                tracing::error!(opcode = byte, "truncated program operands");
                prog.halt();
                break;
            }
            let arg0 = if operands > 0 { prog.code[prog.pc] } else { 0 };
            let arg1 = if operands > 1 {
                prog.code[prog.pc + 1]
            } else {
                0
            };
            prog.pc += operands;

            match op {
                Opcode::End => {
                    prog.halt();
                    break;
                }

                Opcode::Wait => {
                    let t = u32::from(arg0);
                    prog.wait_pos = self.total_mixed.wrapping_add(t * WAIT_UNIT_FRAMES);
                    break;
                }

                Opcode::Source => prog.si = usize::from(arg0),

                Opcode::Queue => {
                    let bi = usize::from(arg0);
                    if prog.si < self.limits.sources && bi < self.buffers.len() {
                        self.sources[prog.si].queue_buffer(BufferRef::Pool(bi as u16));
                    }
                }

                Opcode::PlayBuf => {
                    let bi = u32::from(arg0);
                    let mode = PlayMode::from_bits(u16::from(arg1));
                    if prog.si < self.limits.sources {
                        // Program plays carry no minted id; the source index
                        // stands in as a serial-zero pid.
                        self.play_source(prog.si, bi, mode, prog.si as u32);
                    }
                }

                Opcode::StartStream => {
                    let mode = PlayMode::from_bits(u16::from(arg0));
                    if let Some(sti) = prog.si.checked_sub(self.limits.sources) {
                        if sti < self.streams.len() {
                            self.sources[prog.si].set_mode(mode);
                            stream::start(
                                &mut self.streams[sti],
                                &mut self.sources[prog.si],
                                &mut self.stream_bufs[sti],
                                MIX_RATE,
                            );
                        }
                    }
                }

                Opcode::SetVol => {
                    let v = f32::from(arg0) / 255.0;
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        // Sets the play-volume parameter; the current volume
                        // is not changed.
                        src.play_volume = v;
                    }
                }

                Opcode::SetFade => {
                    let v = f32::from(arg0) / 10.0;
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        src.fade_period = v;
                    }
                }

                Opcode::SetEnd => {
                    let t = u32::from(arg0);
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        src.end_pos = if t == 0 {
                            SOURCE_NO_POS
                        } else {
                            t * WAIT_UNIT_FRAMES
                        };
                    }
                }

                Opcode::LoopOn | Opcode::LoopOff => {
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        src.mode.remove(PlayMode::ONCE | PlayMode::LOOP);
                        if op == Opcode::LoopOn {
                            src.mode.insert(PlayMode::LOOP);
                        }
                    }
                }

                Opcode::FadeIn => {
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        src.gain_l = 0.0;
                        src.gain_r = 0.0;
                        src.target_l = src.play_volume;
                        src.target_r = src.play_volume;
                        src.set_fade_deltas();
                    }
                }

                Opcode::FadeOut => {
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        src.fade_out();
                    }
                }

                Opcode::VolLr => {
                    let l = f32::from(arg0) / 255.0;
                    let r = f32::from(arg1) / 255.0;
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        src.set_gain(l, r);
                    }
                }

                Opcode::Pan => {
                    let l = f32::from(arg0) / 255.0;
                    let r = f32::from(arg1) / 255.0;
                    if let Some(src) = self.sources.get_mut(prog.si) {
                        src.target_l = l;
                        src.target_r = r;
                        src.set_fade_deltas();
                    }
                }

                Opcode::Signal => self.signals.push(Signal {
                    id: prog.si as u32,
                    kind: SignalKind::Program,
                }),

                // Debug capture hook; filtered with invalid opcodes above.
                Opcode::Capture | Opcode::Reserved0 => {}
            }
        }

        self.programs[pi] = prog;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeError, Decoder, DecoderFactory, FileChunk, ReadStatus};
    use crate::sink::MemorySink;
    use std::sync::Mutex;

    /// Decoder yielding `total` constant-valued frames.
    struct ConstDecoder {
        total: u32,
        pos: u32,
        value: f32,
    }

    impl Decoder for ConstDecoder {
        fn read_frames(&mut self, out: &mut AudioBuffer) -> Result<ReadStatus, DecodeError> {
            let frames = out.avail().min(self.total - self.pos);
            for s in &mut out.samples_mut()[..frames as usize * 2] {
                *s = self.value;
            }
            out.used = frames;
            self.pos += frames;
            Ok(ReadStatus {
                frames,
                eof: self.pos >= self.total,
            })
        }

        fn seek(&mut self, seconds: f64) -> Result<(), DecodeError> {
            self.pos = ((seconds * f64::from(MIX_RATE)) as u32).min(self.total);
            Ok(())
        }

        fn total_frames(&self) -> u64 {
            u64::from(self.total)
        }
    }

    struct ConstFactory {
        total: u32,
        value: f32,
    }

    impl DecoderFactory for ConstFactory {
        fn open(&self, _chunk: FileChunk) -> Result<Box<dyn Decoder>, DecodeError> {
            Ok(Box::new(ConstDecoder {
                total: self.total,
                pos: 0,
                value: self.value,
            }))
        }
    }

    struct Fixture {
        engine: Engine,
        signals: Arc<MsgPort<Signal>>,
        playback: Arc<PlaybackTable>,
        captured: Arc<Mutex<Vec<f32>>>,
    }

    fn fixture_with_factory(limits: Limits, factory: ConstFactory) -> Fixture {
        let sink = MemorySink::new();
        let captured = sink.captured();
        let signals = Arc::new(MsgPort::new(32));
        let playback = Arc::new(PlaybackTable::new(limits.clamped().total_sources()));
        let engine = Engine::new(
            limits,
            Box::new(sink),
            Box::new(factory),
            Arc::clone(&signals),
            Arc::clone(&playback),
        )
        .unwrap();
        Fixture {
            engine,
            signals,
            playback,
            captured,
        }
    }

    fn fixture(limits: Limits) -> Fixture {
        fixture_with_factory(
            limits,
            ConstFactory {
                total: MIX_RATE,
                value: 1.0,
            },
        )
    }

    fn const_buffer(frames: u32, value: f32) -> AudioBuffer {
        let mut buf = AudioBuffer::voice_format(MIX_RATE, frames);
        buf.samples_mut().fill(value);
        buf.used = frames;
        buf
    }

    fn chunk() -> FileChunk {
        FileChunk {
            file: tempfile::tempfile().unwrap(),
            offset: 0,
            size: 0,
        }
    }

    const ONE_SOURCE: Limits = Limits {
        buffers: 4,
        sources: 2,
        streams: 1,
        programs: 2,
    };

    #[test]
    fn limits_are_clamped() {
        let limits = Limits {
            buffers: 1000,
            sources: 1000,
            streams: 1000,
            programs: 1000,
        }
        .clamped();
        assert_eq!(limits.buffers, BUFFER_MAX);
        assert_eq!(limits.sources, SOURCE_MAX);
        assert_eq!(limits.streams, STREAM_MAX);
        assert_eq!(limits.programs, PROGRAM_UNITS_MAX);
    }

    #[test]
    fn play_once_emits_buffer_then_done_signal() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();

        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames * 2, 0.5),
        });

        let pid = fx.playback.mint(0);
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: 0,
            mode: PlayMode::ONCE | PlayMode::SIGNAL_DONE,
            pid,
            volume: None,
        });
        assert!(fx.playback.is_playing(pid));

        fx.engine.tick();
        fx.engine.tick();
        fx.engine.tick();

        let captured = fx.captured.lock().unwrap();
        assert_eq!(captured.len(), frames as usize * 2 * 3);
        let two_ticks = frames as usize * 2 * 2;
        assert!(captured[..two_ticks].iter().all(|&s| s == 0.5));
        assert!(captured[two_ticks..].iter().all(|&s| s == 0.0));
        drop(captured);

        let sig = fx.signals.try_pop().unwrap();
        assert_eq!(sig.id, pid);
        assert_eq!(sig.kind, SignalKind::Done);
        assert!(fx.signals.try_pop().is_none());
        assert!(!fx.playback.is_playing(pid));
    }

    #[test]
    fn paired_buffers_play_in_sequence() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();

        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames, 1.0),
        });
        fx.engine.dispatch(Command::SetBuffer {
            index: 1,
            buffer: const_buffer(frames, 0.25),
        });

        let pid = fx.playback.mint(0);
        // FAUN_PAIR encoding: second field stores index + 1.
        let pair = ((1u32 + 1) << 10) | 0;
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: pair,
            mode: PlayMode::ONCE,
            pid,
            volume: None,
        });

        fx.engine.tick();
        fx.engine.tick();

        let captured = fx.captured.lock().unwrap();
        let tick = frames as usize * 2;
        assert!(captured[..tick].iter().all(|&s| s == 1.0));
        assert!(captured[tick..tick * 2].iter().all(|&s| s == 0.25));
        drop(captured);
        assert!(!fx.playback.is_playing(pid));
    }

    #[test]
    fn explicit_channel_volumes_override_play_volume() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();
        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames * 4, 1.0),
        });
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: 0,
            mode: PlayMode::ONCE,
            pid: fx.playback.mint(0),
            volume: Some((0.75, 0.5)),
        });
        fx.engine.tick();

        let captured = fx.captured.lock().unwrap();
        assert_eq!(captured[0], 0.75);
        assert_eq!(captured[1], 0.5);
    }

    #[test]
    fn free_current_buffer_detaches_eagerly() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();
        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames * 10, 1.0),
        });
        let pid = fx.playback.mint(0);
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: 0,
            mode: PlayMode::ONCE,
            pid,
            volume: None,
        });
        fx.engine.tick();
        assert!(fx.playback.is_playing(pid));

        fx.engine.dispatch(Command::FreeBuffers { first: 0, count: 1 });
        assert!(!fx.playback.is_playing(pid));
    }

    #[test]
    fn freed_queued_buffer_detaches_lazily() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();
        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames * 2, 1.0),
        });
        fx.engine.dispatch(Command::SetBuffer {
            index: 1,
            buffer: const_buffer(frames * 2, 0.5),
        });

        let pid = fx.playback.mint(0);
        let pair = ((1u32 + 1) << 10) | 0;
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: pair,
            mode: PlayMode::ONCE,
            pid,
            volume: None,
        });
        fx.engine.tick();

        // Freeing the queued-but-not-current buffer leaves the play alive.
        fx.engine.dispatch(Command::FreeBuffers { first: 1, count: 1 });
        assert!(fx.playback.is_playing(pid));

        // The cursor reaches the freed entry at the end of buffer 0.
        fx.engine.tick();
        assert!(!fx.playback.is_playing(pid));
    }

    #[test]
    fn control_stop_and_resume() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();
        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames * 8, 1.0),
        });
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: 0,
            mode: PlayMode::ONCE,
            pid: fx.playback.mint(0),
            volume: None,
        });
        fx.engine.tick();

        fx.engine.dispatch(Command::Control {
            op: ControlOp::Stop,
            si: 0,
            count: 1,
        });
        fx.engine.tick(); // Produces silence.

        fx.engine.dispatch(Command::Control {
            op: ControlOp::Resume,
            si: 0,
            count: 1,
        });
        fx.engine.tick();

        let captured = fx.captured.lock().unwrap();
        let tick = frames as usize * 2;
        assert!(captured[..tick].iter().all(|&s| s == 1.0));
        assert!(captured[tick..tick * 2].iter().all(|&s| s == 0.0));
        assert!(captured[tick * 2..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn end_time_parameter_stops_playback() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();
        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames * 8, 1.0),
        });
        let pid = fx.playback.mint(0);
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: 0,
            mode: PlayMode::ONCE,
            pid,
            volume: None,
        });
        // End after one tick's worth of seconds.
        fx.engine.dispatch(Command::SetParam {
            param: Param::EndTime,
            si: 0,
            count: 1,
            value: frames as f32 / MIX_RATE as f32,
        });
        fx.engine.tick();
        assert!(!fx.playback.is_playing(pid));
    }

    #[test]
    fn pan_command_fades_toward_targets() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();
        fx.engine.dispatch(Command::SetBuffer {
            index: 0,
            buffer: const_buffer(frames * 4, 1.0),
        });
        fx.engine.dispatch(Command::PlaySource {
            si: 0,
            buffers: 0,
            mode: PlayMode::ONCE,
            pid: fx.playback.mint(0),
            volume: None,
        });
        fx.engine.dispatch(Command::Pan {
            si: 0,
            target_l: 0.0,
            target_r: 1.0,
            period: 0.1,
        });
        fx.engine.tick();

        let captured = fx.captured.lock().unwrap();
        // Left ramps down from 1.0, right holds at its 1.0 target.
        assert!(captured[0] <= 1.0);
        let last = (frames as usize - 1) * 2;
        assert!(captured[last] < captured[0]);
        assert_eq!(captured[last + 1], 1.0);
    }

    #[test]
    fn suspend_halts_mixing_flag() {
        let mut fx = fixture(ONE_SOURCE);
        assert!(!fx.engine.is_suspended());
        fx.engine.dispatch(Command::Suspend);
        assert!(fx.engine.is_suspended());
        fx.engine.dispatch(Command::Resume);
        assert!(!fx.engine.is_suspended());
    }

    #[test]
    fn quit_command_exits() {
        let mut fx = fixture(ONE_SOURCE);
        assert!(fx.engine.dispatch(Command::Resume));
        assert!(!fx.engine.dispatch(Command::Quit));
    }

    #[test]
    fn program_signal_after_wait() {
        let mut fx = fixture(ONE_SOURCE);
        // Signal immediately, then again after one 1/10s wait unit.
        let code = vec![
            Opcode::Source as u8,
            0,
            Opcode::Signal as u8,
            Opcode::Wait as u8,
            1,
            Opcode::Signal as u8,
            Opcode::End as u8,
        ];
        fx.engine.dispatch(Command::Program {
            exec: 0,
            frame: ProgramFrame::Whole,
            code,
        });

        fx.engine.tick();
        let first = fx.signals.try_pop().unwrap();
        assert_eq!(first.kind, SignalKind::Program);
        assert_eq!(first.id, 0);
        assert!(fx.signals.try_pop().is_none());

        // 4410 frames at 918 frames per tick: the wait expires on tick 6.
        let mut ticks = 1;
        while fx.signals.try_pop().is_none() {
            fx.engine.tick();
            ticks += 1;
            assert!(ticks < 10, "wait never expired");
        }
        assert_eq!(ticks, 6);
    }

    #[test]
    fn program_plays_buffer() {
        let mut fx = fixture(ONE_SOURCE);
        let frames = fx.engine.mix_frames();
        fx.engine.dispatch(Command::SetBuffer {
            index: 2,
            buffer: const_buffer(frames * 2, 0.5),
        });
        let code = vec![
            Opcode::Source as u8,
            0,
            Opcode::PlayBuf as u8,
            2,
            PlayMode::ONCE.0 as u8,
            Opcode::End as u8,
        ];
        fx.engine.dispatch(Command::Program {
            exec: 0,
            frame: ProgramFrame::Whole,
            code,
        });
        fx.engine.tick();

        let captured = fx.captured.lock().unwrap();
        assert!(captured[..frames as usize * 2].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn program_invalid_opcode_halts() {
        let mut fx = fixture(ONE_SOURCE);
        let code = vec![0xee, Opcode::Signal as u8, Opcode::End as u8];
        fx.engine.dispatch(Command::Program {
            exec: 0,
            frame: ProgramFrame::Whole,
            code,
        });
        fx.engine.tick();
        // Halted on the bad opcode; the signal never ran.
        assert!(fx.signals.try_pop().is_none());
    }

    #[test]
    fn chunked_program_runs_only_after_end_frame() {
        let mut fx = fixture(ONE_SOURCE);
        fx.engine.dispatch(Command::Program {
            exec: 0,
            frame: ProgramFrame::Begin,
            code: vec![Opcode::Source as u8, 0],
        });
        fx.engine.tick();
        assert!(fx.signals.try_pop().is_none());

        fx.engine.dispatch(Command::Program {
            exec: 0,
            frame: ProgramFrame::End,
            code: vec![Opcode::Signal as u8, Opcode::End as u8],
        });
        fx.engine.tick();
        assert!(fx.signals.try_pop().is_some());
    }

    #[test]
    fn stream_plays_and_signals_done() {
        let mut fx = fixture_with_factory(
            ONE_SOURCE,
            ConstFactory {
                total: 2000,
                value: 0.5,
            },
        );
        let si = ONE_SOURCE.sources as u8; // First stream slot.
        let pid = fx.playback.mint(si as usize);
        fx.engine.dispatch(Command::OpenStream {
            si,
            chunk: chunk(),
            mode: PlayMode::ONCE | PlayMode::SIGNAL_DONE,
            pid,
        });
        assert!(fx.playback.is_playing(pid));

        // 2000 frames at 918 per tick plus queue drain.
        for _ in 0..8 {
            fx.engine.tick();
        }

        let sig = fx.signals.try_pop().unwrap();
        assert_eq!(sig.id, pid);
        assert_eq!(sig.kind, SignalKind::Done);
        assert!(!fx.playback.is_playing(pid));

        let captured = fx.captured.lock().unwrap();
        let total = 2000 * 2;
        assert!(captured[..total].iter().all(|&s| s == 0.5));
        assert!(captured[total..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stream_part_plays_exact_duration() {
        let mut fx = fixture_with_factory(
            ONE_SOURCE,
            ConstFactory {
                total: MIX_RATE * 2,
                value: 1.0,
            },
        );
        let si = ONE_SOURCE.sources as u8;
        let pid = fx.playback.mint(si as usize);
        // Open without a play bit: the stream waits for a part command.
        fx.engine.dispatch(Command::OpenStream {
            si,
            chunk: chunk(),
            mode: PlayMode(0),
            pid,
        });
        fx.engine.dispatch(Command::PlayStreamPart {
            si,
            start: 0.5,
            duration: 0.05,
            mode: PlayMode::ONCE,
        });

        let want = (0.05 * f64::from(MIX_RATE)) as usize; // 2205 frames
        for _ in 0..5 {
            fx.engine.tick();
        }

        let captured = fx.captured.lock().unwrap();
        let playing: usize = captured.chunks_exact(2).filter(|f| f[0] != 0.0).count();
        assert_eq!(playing, want);
    }
}
