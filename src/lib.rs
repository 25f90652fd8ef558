//! # sqm-relay
//!
//! Command and telemetry relay for remote sky-quality photometers (SQM-LU
//! over USB serial, SQM-LE over TCP), reachable directly or across a
//! half-duplex radio bridge between relay nodes.
//!
//! It provides:
//!
//! - **Framing**: delimiter-framed text messages over any async byte stream,
//!   with byte stuffing so arbitrary file content survives the wire
//! - **Device sessions**: echo-checked request/response with reset-and-retry
//!   and automatic port discovery
//! - **Relaying**: one upstream peer multiplexed onto a photometer or a radio
//!   child node, with responses batched back upstream
//! - **Reconciliation**: store-and-forward pull of `.dat` files across the
//!   radio hop, by modification time
//!
//! ## Feature Flags
//!
//! - `transport` (default): Framed channel and outgoing buffer
//! - `device` (default): Photometer session, connectors, discovery
//! - `serial` (default): Serial connector backed by `tokio-serial`
//! - `sync` (default): File inventory and reconciler
//! - `relay` (default): Relay node and inbound listener
//! - `serde`: `Serialize`/`Deserialize` for the config types
//!
//! ## Modules
//!
//! - [`core`]: Constants, configuration, config errors (always included)
//! - [`transport`]: Framed Channel (requires `transport` feature)
//! - [`device`]: Device Session (requires `device` feature)
//! - [`sync`]: Sync Reconciler (requires `sync` feature)
//! - [`relay`]: Relay Core and Inbound Listener (requires `relay` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sqm_relay::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), RelayError> {
//! let config = NodeConfigBuilder::new()
//!     .device_address("/dev/ttyUSB0")
//!     .storage_root("/var/tmp/sqm")
//!     .build()?;
//!
//! sqm_relay::relay::launch(config, CancellationToken::new()).await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Framed channel (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Device session (feature-gated)
#[cfg(feature = "device")]
#[cfg_attr(docsrs, doc(cfg(feature = "device")))]
pub mod device;

// Sync reconciler (feature-gated)
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;

// Relay core (feature-gated)
#[cfg(feature = "relay")]
#[cfg_attr(docsrs, doc(cfg(feature = "relay")))]
pub mod relay;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        BoxedStream, DuplexStream, Frame, FrameError, FrameReader, FrameResult, FrameWriter,
        FramedChannel, OutgoingBuffer,
    };

    #[cfg(feature = "device")]
    pub use crate::device::{
        Connector, DeviceError, DeviceResult, DeviceSession, DeviceState, Discovery,
        TcpConnector,
    };

    #[cfg(feature = "serial")]
    pub use crate::device::SerialConnector;

    #[cfg(feature = "sync")]
    pub use crate::sync::{Inventory, Reconciler, SyncError, SyncReport, SyncRequest};

    #[cfg(feature = "relay")]
    pub use crate::relay::{Downstream, InboundListener, RelayError, RelayNode, RelayResult};
}

// Re-export commonly used items at crate root
pub use core::{ConfigError, NodeConfig, NodeConfigBuilder};

#[cfg(feature = "transport")]
pub use transport::{Frame, FramedChannel, OutgoingBuffer};

#[cfg(feature = "relay")]
pub use relay::{RelayError, RelayNode};
