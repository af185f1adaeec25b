//! # atmod-runner
//!
//! Runs one AT modem engine on a host and exposes its serial line as a TCP
//! port. Connect a terminal or an MCU test harness to the port and talk AT
//! commands to it; links opened with `AT+CIPSTART` become real TCP sockets.
//!
//! ## Architecture
//!
//! - [`serial_bridge`]: tokio listener that turns a TCP client into the UART
//! - [`session`]: the engine thread (feed, poll, drain, restart)
//! - [`host`]: `std::net` sockets, file settings and a simulated radio
//! - [`profile`]: YAML profile describing the simulated radio
//!
//! ```rust,ignore
//! let runtime = tokio::runtime::Runtime::new()?;
//! let port = runtime.block_on(SerialPort::bind(addr))?;
//! let session = spawn_session(factory, port)?;
//! session.join()?;
//! ```

pub mod error;
pub mod host;
pub mod profile;
pub mod serial_bridge;
pub mod session;

pub use error::{RunnerError, RunnerResult};
pub use profile::RunnerProfile;
pub use serial_bridge::SerialPort;
pub use session::{spawn_session, EngineFactory, SessionCommand, SessionHandle};
