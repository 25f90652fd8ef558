//! Device Session
//!
//! Request/response exchange with a sky-quality photometer, with
//! reconnect-and-retry, address discovery and a background continuous read.
//!
//! ```text
//! command ──► normalize (append 'x') ──► write ──► settle ──► read line
//!                                                               │
//!            ◄── response (echo ok) ◄───────────────────────────┤
//!            ◄── reset + retry (echo bad, timeout, i/o) ◄───────┘
//! ```

mod connector;
mod discovery;
mod error;
#[cfg(feature = "serial")]
mod serial;
mod session;
#[cfg(test)]
pub(crate) mod testing;

pub use connector::{Connector, TcpConnector, connector_for};
pub use discovery::{Discovery, discover, probe};
pub use error::*;
#[cfg(feature = "serial")]
pub use serial::{SerialConnector, platform_candidates};
pub use session::{DeviceSession, DeviceState, normalize_command};
