//! Runner error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Binding the serial socket or spawning a thread failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The profile file could not be read.
    #[error("cannot read profile {path}: {source}")]
    ProfileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The profile file is not valid YAML for a profile.
    #[error("invalid profile {path}: {source}")]
    ProfileParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A hardware address in the profile is malformed.
    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),

    /// The Ctrl-C handler could not be installed.
    #[error("signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),

    /// The engine thread panicked.
    #[error("engine thread panicked")]
    EngineThread,
}

/// Result type for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;
