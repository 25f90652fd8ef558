//! Photometer address discovery.
//!
//! A bounded linear scan over the connector's candidate addresses. Each
//! candidate is opened, sent the probe command, and accepted if the first
//! response character echoes it. The scan stops at the first match.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connector::Connector;
use super::error::{DeviceError, DeviceResult};
use crate::core::{DeviceConfig, PROBE_COMMAND, PROBE_ECHO, RESPONSE_LINE_END};

/// Outcome of a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// A photometer answered at this address.
    Found(String),
    /// No candidate answered, or the scan was cancelled.
    NotFound,
}

impl Discovery {
    /// The discovered address, if any.
    pub fn address(&self) -> Option<&str> {
        match self {
            Discovery::Found(address) => Some(address),
            Discovery::NotFound => None,
        }
    }
}

/// Probe one address: open it, send the probe command, check the echo.
pub async fn probe(
    connector: &dyn Connector,
    address: &str,
    config: &DeviceConfig,
) -> DeviceResult<bool> {
    let exchange = async {
        let stream = connector.connect(address).await?;
        let mut stream = BufReader::new(stream);
        stream.write_all(PROBE_COMMAND.as_bytes()).await?;
        stream.flush().await?;

        let mut line = Vec::new();
        stream.read_until(RESPONSE_LINE_END, &mut line).await?;
        Ok::<_, DeviceError>(line.first() == Some(&(PROBE_ECHO as u8)))
    };

    tokio::time::timeout(config.probe_timeout, exchange)
        .await
        .map_err(|_| DeviceError::Timeout(config.probe_timeout))?
}

/// Scan the connector's candidates until one answers the probe.
///
/// At most `config.max_scan_candidates` addresses are tried. Cancelling
/// `cancel` ends the scan with [`Discovery::NotFound`].
pub async fn discover(
    connector: &dyn Connector,
    config: &DeviceConfig,
    cancel: &CancellationToken,
) -> Discovery {
    let candidates = connector.candidates().await;
    info!(
        kind = connector.kind(),
        candidates = candidates.len().min(config.max_scan_candidates),
        "searching for photometer"
    );

    for address in candidates.into_iter().take(config.max_scan_candidates) {
        let result = tokio::select! {
            () = cancel.cancelled() => {
                info!("discovery cancelled");
                return Discovery::NotFound;
            }
            result = probe(connector, &address, config) => result,
        };

        match result {
            Ok(true) => {
                info!(%address, "photometer found");
                return Discovery::Found(address);
            }
            Ok(false) => debug!(%address, "candidate answered without echo"),
            Err(e) => debug!(%address, error = %e, "candidate did not answer"),
        }
    }

    warn!("no photometer found on any candidate address");
    Discovery::NotFound
}
