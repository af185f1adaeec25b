//! # atmod-engine
//!
//! The command engine of an ESP8266-style serial network modem.
//!
//! An [`Engine`] consumes bytes from the serial host, answers AT commands and
//! multiplexes up to five TCP/TLS links plus listening sockets. Everything
//! outside the protocol (radio, sockets, clock, flash, the device itself) is
//! reached through the collaborator traits in [`platform`], so the same
//! engine runs on a host bridge or against in-memory mocks.
//!
//! ## Loop
//!
//! ```rust,ignore
//! use atmod_engine::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(platform, EngineConfig::default());
//! loop {
//!     engine.feed(&serial_bytes);
//!     engine.poll();
//!     serial.write_all(&engine.take_output())?;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the byte router and dispatcher
//! - [`connections`]: link slots, listening sockets, `+IPD` delivery
//! - [`settings`]: the CRC-protected persistent record
//! - [`state`]: construction options and runtime globals
//! - [`platform`]: collaborator traits
//! - [`mock`]: in-memory collaborators for tests
//! - [`telemetry`]: metric declarations

pub mod connections;
pub mod engine;
pub mod error;
mod handlers;
pub mod mock;
pub mod platform;
pub mod settings;
pub mod state;
pub mod telemetry;

pub use engine::{Engine, PendingOperation, SerialMode};
pub use error::*;
pub use handlers::{Invocation, Reply};
pub use platform::Platform;
pub use settings::{PersistentSettings, Settings};
pub use state::{EngineConfig, RuntimeState};
