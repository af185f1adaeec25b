//! The engine thread.
//!
//! The engine owns non-`Send` collaborators, so it is built and driven on a
//! dedicated thread. The thread moves serial bytes between the bridge and
//! the engine, polls links, and rebuilds the engine from the persisted
//! settings whenever a restart was requested.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use atmod_engine::Engine;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};

use crate::error::{RunnerError, RunnerResult};
use crate::host::host_platform;
use crate::profile::RunnerProfile;
use crate::serial_bridge::SerialPort;

/// How long the loop waits for a command when nothing happened.
const IDLE_WAIT: Duration = Duration::from_millis(2);

// ============================================================================
// Commands
// ============================================================================

/// Commands sent to the engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Restart the engine as if `AT+RST` had been received.
    Restart,
    /// Stop the thread.
    Shutdown,
}

// ============================================================================
// Engine construction
// ============================================================================

/// Everything needed to build a fresh engine.
#[derive(Debug, Clone)]
pub struct EngineFactory {
    pub profile: RunnerProfile,
    pub settings_path: PathBuf,
}

impl EngineFactory {
    pub fn build(&self) -> RunnerResult<Engine> {
        let platform = host_platform(&self.profile, self.settings_path.clone())?;
        Ok(Engine::new(platform, self.profile.engine.clone()))
    }
}

// ============================================================================
// Thread
// ============================================================================

/// Handle to the running engine thread.
pub struct SessionHandle {
    cmd_tx: Sender<SessionCommand>,
    thread: JoinHandle<RunnerResult<u32>>,
}

impl SessionHandle {
    /// A sender usable from other threads, e.g. a signal handler.
    pub fn commands(&self) -> Sender<SessionCommand> {
        self.cmd_tx.clone()
    }

    /// Ask the thread to stop.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }

    /// Wait for the thread; returns how many times the engine restarted.
    pub fn join(self) -> RunnerResult<u32> {
        self.thread.join().map_err(|_| RunnerError::EngineThread)?
    }
}

/// Spawn the engine thread serving `port`.
pub fn spawn_session(factory: EngineFactory, port: SerialPort) -> RunnerResult<SessionHandle> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let thread = thread::Builder::new()
        .name("atmod-engine".to_string())
        .spawn(move || session_main(factory, port, cmd_rx))?;
    Ok(SessionHandle { cmd_tx, thread })
}

/// Main loop of the engine thread.
fn session_main(
    factory: EngineFactory,
    mut port: SerialPort,
    cmd_rx: Receiver<SessionCommand>,
) -> RunnerResult<u32> {
    let mut engine = factory.build()?;
    let mut restarts = 0u32;
    info!("engine ready");

    loop {
        let busy = pump(&mut engine, &mut port);

        if engine.restart_requested() {
            restarts += 1;
            info!(restarts, "restarting engine");
            engine = rebuild(&factory, engine)?;
            continue;
        }

        let wait = if busy { Duration::ZERO } else { IDLE_WAIT };
        match cmd_rx.recv_timeout(wait) {
            Ok(SessionCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(SessionCommand::Restart) => {
                restarts += 1;
                info!(restarts, "restart on request");
                engine = rebuild(&factory, engine)?;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    info!(restarts, "engine stopped");
    Ok(restarts)
}

/// Move one round of bytes through the engine; true when anything moved.
fn pump(engine: &mut Engine, port: &mut SerialPort) -> bool {
    let mut busy = false;
    while let Some(chunk) = port.try_recv() {
        debug!(len = chunk.len(), "serial rx");
        engine.feed(&chunk);
        busy = true;
    }

    engine.poll();

    let output = engine.take_output();
    if !output.is_empty() {
        port.send(&output);
        busy = true;
    }
    busy
}

/// Drop the old engine (closing its links) and build a new one.
fn rebuild(factory: &EngineFactory, old: Engine) -> RunnerResult<Engine> {
    drop(old);
    factory.build().inspect_err(|e| error!(error = %e, "engine rebuild failed"))
}
