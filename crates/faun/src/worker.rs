//! The audio worker thread.
//!
//! A single loop drives the whole engine: block on the command port with a
//! deadline one update period out; dispatch any command that arrives; on
//! timeout run one mix tick. The sink's blocking write provides the dominant
//! pacing, so the deadline sits slightly under the update period to keep
//! command latency bounded without overrunning the device buffer.

use faun_core::{Command, Engine, MsgPort, PopResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) fn run(mut engine: Engine, cmd: Arc<MsgPort<Command>>) {
    let update_ms = u64::from(1000 / engine.update_hz().max(1)).saturating_sub(2);
    let period = Duration::from_millis(update_ms.max(1));
    let mut deadline = Instant::now() + period;

    loop {
        // While suspended there is nothing to pace; block for a command.
        let popped = if engine.is_suspended() {
            PopResult::Message(cmd.pop())
        } else {
            cmd.pop_deadline(deadline)
        };

        match popped {
            PopResult::Message(command) => {
                if !engine.dispatch(command) {
                    return;
                }
            }
            PopResult::TimedOut => {
                engine.tick();
                deadline = Instant::now() + period;
            }
        }
    }
}
