//! The public engine handle and command encoding.

use crate::worker;
use faun_core::{
    Command, ControlOp, DecoderFactory, Engine, EngineError, FileChunk, Limits, MsgPort,
    NO_PLAY_ID, Opcode, PROGRAM_MAX, Param, PlayMode, PlaybackTable, Signal, Sink, SinkError,
};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Capacity of the command and signal ports.
const PORT_CAPACITY: usize = 32;

/// Program bytecode bytes carried per command message.
const PROGRAM_PAYLOAD: usize = 17;

/// Builds the output sink on the worker thread.
///
/// OS stream handles are frequently not `Send`, so startup hands the worker
/// a factory instead of a sink and reports the outcome back synchronously.
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn Sink>, SinkError> + Send>;

/// The output sink is a process-global singleton; only one engine at a time.
static ENGINE_UP: AtomicBool = AtomicBool::new(false);

/// Engine startup failure. Partial state is torn down before returning.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Another engine instance is running in this process.
    #[error("an engine is already running")]
    AlreadyRunning,

    /// The sink or engine state could not be created.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The worker thread could not be spawned.
    #[error("worker thread start failed: {0}")]
    Thread(String),
}

/// A running audio engine.
///
/// Dropping the handle shuts the engine down: the worker is told to quit
/// and joined, and the sink is closed.
pub struct Faun {
    cmd: Arc<MsgPort<Command>>,
    sig: Arc<MsgPort<Signal>>,
    playback: Arc<PlaybackTable>,
    limits: Limits,
    worker: Option<JoinHandle<()>>,
}

impl Faun {
    /// Start the engine with the default cpal output and file decoders.
    ///
    /// `app_name` identifies the client on networked audio systems.
    pub fn startup(limits: Limits, app_name: &str) -> Result<Self, StartupError> {
        let app_name = app_name.to_string();
        Self::startup_with(
            limits,
            Box::new(move || {
                Ok(Box::new(faun_io::CpalSink::open(&app_name)?) as Box<dyn Sink>)
            }),
            Box::new(faun_io::ProbeFactory),
        )
    }

    /// Start the engine with explicit sink and stream-decoder collaborators.
    ///
    /// This is the entry point for tests and offline rendering, where a
    /// memory sink and synthetic decoders stand in for the platform.
    pub fn startup_with(
        limits: Limits,
        sink_factory: SinkFactory,
        decoders: Box<dyn DecoderFactory>,
    ) -> Result<Self, StartupError> {
        if ENGINE_UP
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(StartupError::AlreadyRunning);
        }

        let limits = limits.clamped();
        let cmd = Arc::new(MsgPort::new(PORT_CAPACITY));
        let sig = Arc::new(MsgPort::new(PORT_CAPACITY));
        let playback = Arc::new(PlaybackTable::new(limits.total_sources()));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), EngineError>>();
        let worker_cmd = Arc::clone(&cmd);
        let worker_sig = Arc::clone(&sig);
        let worker_playback = Arc::clone(&playback);

        let spawned = std::thread::Builder::new()
            .name("faun-audio".into())
            .spawn(move || {
                // The sink (and with it the OS voice) must live on this
                // thread; report construction success before looping.
                let engine = sink_factory()
                    .map_err(EngineError::from)
                    .and_then(|sink| {
                        Engine::new(limits, sink, decoders, worker_sig, worker_playback)
                    });
                match engine {
                    Ok(engine) => {
                        let _ = ready_tx.send(Ok(()));
                        worker::run(engine, worker_cmd);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                ENGINE_UP.store(false, Ordering::Release);
                return Err(StartupError::Thread(err.to_string()));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                cmd,
                sig,
                playback,
                limits,
                worker: Some(handle),
            }),
            Ok(Err(err)) => {
                let _ = handle.join();
                ENGINE_UP.store(false, Ordering::Release);
                Err(err.into())
            }
            Err(_) => {
                let _ = handle.join();
                ENGINE_UP.store(false, Ordering::Release);
                Err(StartupError::Thread("worker exited during startup".into()))
            }
        }
    }

    /// The limits the engine was started with, after clamping.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Stop the worker and release the engine.
    ///
    /// Equivalent to dropping the handle; provided for explicit call sites.
    pub fn shutdown(self) {}

    /// Pause or resume mixing.
    ///
    /// While suspended the worker stops producing audio but still accepts
    /// commands.
    pub fn suspend(&self, halt: bool) {
        self.cmd.push(if halt {
            Command::Suspend
        } else {
            Command::Resume
        });
    }

    /// Drain pending signals without blocking, up to `max`.
    pub fn poll_signals(&self, max: usize) -> Vec<Signal> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.sig.try_pop() {
                Some(sig) => out.push(sig),
                None => break,
            }
        }
        out
    }

    /// Block until a source, stream, or program emits a signal.
    pub fn wait_signal(&self) -> Signal {
        self.sig.pop()
    }

    /// Apply a state transition to `count` sources starting at `si`.
    pub fn control(&self, si: usize, count: usize, op: ControlOp) {
        self.cmd.push(Command::Control {
            op,
            si: si as u8,
            count: count as u16,
        });
    }

    /// Set a playback parameter on `count` sources starting at `si`.
    pub fn set_parameter(&self, si: usize, count: usize, param: Param, value: f32) {
        if count == 0 {
            return;
        }
        self.cmd.push(Command::SetParam {
            param,
            si: si as u8,
            count: count as u16,
            value,
        });
    }

    /// Fade the channel volumes of a source to targets over `period`
    /// seconds.
    pub fn pan(&self, si: usize, final_l: f32, final_r: f32, period: f32) {
        self.cmd.push(Command::Pan {
            si: si as u8,
            target_l: final_l,
            target_r: final_r,
            period,
        });
    }

    /// Replace and start the program on execution unit `exec`.
    ///
    /// `bytecode` must end with [`Opcode::End`] and fit [`PROGRAM_MAX`]
    /// bytes; invalid programs are dropped with an error log.
    pub fn program(&self, exec: usize, bytecode: &[u8]) {
        if exec >= self.limits.programs {
            return;
        }
        if bytecode.is_empty()
            || bytecode.len() > PROGRAM_MAX
            || *bytecode.last().unwrap_or(&0xff) != Opcode::End as u8
        {
            tracing::error!(exec, "program rejected: must end with End opcode");
            return;
        }

        let chunks: Vec<&[u8]> = bytecode.chunks(PROGRAM_PAYLOAD).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frame = match (i, last) {
                (0, 0) => faun_core::ProgramFrame::Whole,
                (0, _) => faun_core::ProgramFrame::Begin,
                (i, last) if i == last => faun_core::ProgramFrame::End,
                _ => faun_core::ProgramFrame::Mid,
            };
            self.cmd.push(Command::Program {
                exec: exec as u8,
                frame,
                code: chunk.to_vec(),
            });
        }
    }

    /// Decode an audio file into buffer `bi` on the calling thread.
    ///
    /// Returns the duration in seconds, or zero on failure (logged).
    pub fn load_buffer<P: AsRef<Path>>(&self, bi: usize, path: P, offset: u32, size: u32) -> f32 {
        if bi >= self.limits.buffers {
            return 0.0;
        }
        match faun_io::load_file(path.as_ref(), offset, size) {
            Ok(buffer) => self.install_buffer(bi, buffer),
            Err(err) => {
                tracing::error!(path = %path.as_ref().display(), error = %err, "load failed");
                0.0
            }
        }
    }

    /// Load raw S16 PCM from memory into buffer `bi`.
    ///
    /// Returns the duration in seconds, or zero on failure.
    pub fn load_buffer_pcm_s16(
        &self,
        bi: usize,
        samples: &[i16],
        channels: faun_core::ChannelLayout,
        rate: u32,
    ) -> f32 {
        if bi >= self.limits.buffers {
            return 0.0;
        }
        self.install_buffer(bi, faun_io::buffer_from_pcm_s16(samples, channels, rate))
    }

    /// Load raw f32 PCM from memory into buffer `bi`.
    ///
    /// Returns the duration in seconds, or zero on failure.
    pub fn load_buffer_pcm_f32(
        &self,
        bi: usize,
        samples: &[f32],
        channels: faun_core::ChannelLayout,
        rate: u32,
    ) -> f32 {
        if bi >= self.limits.buffers {
            return 0.0;
        }
        self.install_buffer(bi, faun_io::buffer_from_pcm_f32(samples, channels, rate))
    }

    /// Synthesize an effect from `params` into buffer `bi`.
    ///
    /// Returns the duration in seconds, or zero on failure.
    pub fn load_buffer_sfx(&self, bi: usize, params: &faun_io::SfxParams) -> f32 {
        if bi >= self.limits.buffers {
            return 0.0;
        }
        self.install_buffer(bi, faun_io::sfx::generate(params))
    }

    fn install_buffer(&self, bi: usize, buffer: faun_core::AudioBuffer) -> f32 {
        let duration = buffer.duration();
        self.cmd.push(Command::SetBuffer {
            index: bi as u16,
            buffer,
        });
        duration
    }

    /// Release the storage of `count` buffers starting at `bi`.
    pub fn free_buffers(&self, bi: usize, count: usize) {
        let count = count.min(self.limits.buffers.saturating_sub(bi));
        if count == 0 {
            return;
        }
        self.cmd.push(Command::FreeBuffers {
            first: bi as u16,
            count: count as u16,
        });
    }

    /// Begin playback of buffers on source `si`.
    ///
    /// `buffers` holds packed 10-bit buffer indices; use [`crate::pair`] and
    /// [`crate::trio`] to queue two or three buffers. Returns the playback
    /// identifier.
    pub fn play_source(&self, si: usize, buffers: u32, mode: PlayMode) -> u32 {
        if si >= self.limits.total_sources() {
            return NO_PLAY_ID;
        }
        let pid = self.playback.mint(si);
        self.cmd.push(Command::PlaySource {
            si: si as u8,
            buffers,
            mode,
            pid,
            volume: None,
        });
        pid
    }

    /// [`Faun::play_source`] with explicit channel volumes overriding the
    /// volume parameter.
    pub fn play_source_vol(
        &self,
        si: usize,
        buffers: u32,
        mode: PlayMode,
        vol_l: f32,
        vol_r: f32,
    ) -> u32 {
        if si >= self.limits.total_sources() {
            return NO_PLAY_ID;
        }
        let pid = self.playback.mint(si);
        self.cmd.push(Command::PlaySource {
            si: si as u8,
            buffers,
            mode,
            pid,
            volume: Some((vol_l, vol_r)),
        });
        pid
    }

    /// Open a file for streaming on stream source `si` and, if `mode` has a
    /// play bit, start it.
    ///
    /// Returns the playback identifier, or [`NO_PLAY_ID`] if the file could
    /// not be opened.
    pub fn play_stream<P: AsRef<Path>>(
        &self,
        si: usize,
        path: P,
        offset: u32,
        size: u32,
        mode: PlayMode,
    ) -> u32 {
        if si < self.limits.sources || si >= self.limits.total_sources() {
            return NO_PLAY_ID;
        }
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(path = %path.as_ref().display(), error = %err, "cannot open stream");
                return NO_PLAY_ID;
            }
        };
        let pid = self.playback.mint(si);
        self.cmd.push(Command::OpenStream {
            si: si as u8,
            chunk: FileChunk { file, offset, size },
            mode,
            pid,
        });
        pid
    }

    /// Play a time segment of the stream opened on `si`.
    pub fn play_stream_part(&self, si: usize, start: f64, duration: f64, mode: PlayMode) {
        self.cmd.push(Command::PlayStreamPart {
            si: si as u8,
            start,
            duration,
            mode,
        });
    }

    /// Check whether a playback identifier is still playing.
    ///
    /// Lock-free; usable immediately after the play call that minted `pid`.
    pub fn is_playing(&self, pid: u32) -> bool {
        self.playback.is_playing(pid)
    }
}

impl Drop for Faun {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.cmd.push(Command::Quit);
            if handle.join().is_err() {
                tracing::error!("audio worker panicked during shutdown");
            }
            ENGINE_UP.store(false, Ordering::Release);
        }
    }
}
