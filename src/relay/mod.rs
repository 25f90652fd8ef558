//! Relay Core
//!
//! One relay node sits between an upstream peer (the host over TCP, or a
//! parent node over radio) and one downstream target (a photometer, or a
//! child node over radio).
//!
//! ```text
//!             ┌──────────── RelayNode ─────────────┐
//! upstream ──►│ inbound loop ──► rsync? ──► Reconciler
//!             │      │                             │
//!             │      └──► Downstream::{Device, Radio}
//!             │                   │                │
//! upstream ◄──│ drain loop ◄── OutgoingBuffer ◄────┘
//!             └────────────────────────────────────┘
//! ```

mod listener;
mod node;
mod radio;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::{NodeConfig, RadioConfig};
use crate::device::{Connector, connector_for};

pub use listener::InboundListener;
pub use node::{Downstream, RelayError, RelayNode, RelayResult};
pub use radio::RadioLink;

/// Run a relay node with connectors built from `config`.
///
/// Opens the downstream target and serves its upstream until `cancel`
/// fires: host connections on the inbound listener, or the configured
/// upstream radio port for a child node.
pub async fn launch(config: NodeConfig, cancel: CancellationToken) -> RelayResult<()> {
    config.validate()?;
    let device = connector_for(&config.device);
    let radio = serial_connector(config.radio.as_ref(), "radio");
    let upstream = serial_connector(config.upstream.as_ref(), "upstream");
    launch_with(config, device, radio, upstream, cancel).await
}

/// Run a relay node over the given connectors.
///
/// With `config.upstream` set the node relays from `upstream_connector`
/// and binds no listener; a missing connector is then fatal.
pub async fn launch_with(
    config: NodeConfig,
    device_connector: Arc<dyn Connector>,
    radio_connector: Option<Arc<dyn Connector>>,
    upstream_connector: Option<Arc<dyn Connector>>,
    cancel: CancellationToken,
) -> RelayResult<()> {
    config.validate()?;

    if let Some(upstream) = config.upstream.clone() {
        let connector = upstream_connector.ok_or(RelayError::NoUpstream)?;
        let mut node = RelayNode::start(config, device_connector, radio_connector, &cancel).await?;
        info!(
            downstream = node.downstream().kind(),
            upstream = %upstream.port,
            "child relay node running"
        );
        return node.serve_connector(connector, &upstream.port, &cancel).await;
    }

    let listener = InboundListener::bind(config.relay.bind_addr, config.framing)
        .await
        .map_err(RelayError::Bind)?;
    let mut node = RelayNode::start(config, device_connector, radio_connector, &cancel).await?;
    info!(downstream = node.downstream().kind(), "relay node running");
    node.serve(&listener, &cancel).await
}

#[cfg(feature = "serial")]
fn serial_connector(port: Option<&RadioConfig>, _role: &str) -> Option<Arc<dyn Connector>> {
    port.map(|radio| {
        Arc::new(crate::device::SerialConnector::new(radio.baud_rate)) as Arc<dyn Connector>
    })
}

#[cfg(not(feature = "serial"))]
fn serial_connector(port: Option<&RadioConfig>, role: &str) -> Option<Arc<dyn Connector>> {
    if port.is_some() {
        tracing::warn!(role, "radio port configured but the `serial` feature is disabled");
    }
    None
}
