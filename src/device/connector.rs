//! Connectors open byte streams to photometers and radio modems.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{
    DEFAULT_DISCOVERY_WINDOW, DeviceConfig, DeviceModel, MAX_SCAN_CANDIDATES,
    SQM_LE_DISCOVERY_PORT, SQM_LE_DISCOVERY_QUERY, SQM_LE_DISCOVERY_REPLY,
};
use crate::transport::BoxedStream;

/// Opens connections to an address of one transport kind.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a stream to `address`.
    async fn connect(&self, address: &str) -> io::Result<BoxedStream>;

    /// Candidate addresses scanned during discovery, in probe order.
    async fn candidates(&self) -> Vec<String> {
        Vec::new()
    }

    /// Short transport name for logs.
    fn kind(&self) -> &'static str;
}

/// TCP connector for network-attached photometers (SQM-LE).
///
/// Discovery broadcasts the network module's UDP query and offers every
/// host that answers as a candidate.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    port: u16,
    connect_timeout: Duration,
    discovery_target: SocketAddr,
    discovery_window: Duration,
    max_candidates: usize,
}

impl TcpConnector {
    /// Create a connector for the given TCP port.
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self {
            port,
            connect_timeout,
            discovery_target: SocketAddr::from((Ipv4Addr::BROADCAST, SQM_LE_DISCOVERY_PORT)),
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            max_candidates: MAX_SCAN_CANDIDATES,
        }
    }

    /// Create a connector from the device parameters.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            discovery_window: config.discovery_window,
            max_candidates: config.max_scan_candidates,
            ..Self::new(config.network_port, config.connect_timeout)
        }
    }

    /// Send discovery queries to `target` instead of the broadcast address.
    pub fn with_discovery_target(mut self, target: SocketAddr) -> Self {
        self.discovery_target = target;
        self
    }

    /// Collect discovery replies for `window`.
    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    /// TCP port connections are made to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Maximum wait for a connection.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Broadcast the discovery query and collect the hosts that answer.
    pub async fn search(&self) -> io::Result<Vec<String>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        socket
            .send_to(&SQM_LE_DISCOVERY_QUERY, self.discovery_target)
            .await?;
        debug!(target = %self.discovery_target, "sent discovery query");

        let deadline = Instant::now() + self.discovery_window;
        let mut found: Vec<String> = Vec::new();
        let mut buf = [0u8; 64];
        while found.len() < self.max_candidates {
            let (n, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await
            {
                Err(_) => break,
                Ok(Err(e)) => {
                    debug!(error = %e, "discovery receive failed");
                    break;
                }
                Ok(Ok(received)) => received,
            };

            if n < 4 || buf[3] != SQM_LE_DISCOVERY_REPLY {
                debug!(%from, bytes = n, "ignoring discovery datagram");
                continue;
            }
            let host = from.ip().to_string();
            if !found.contains(&host) {
                info!(%host, mac = %mac_address(&buf[..n]), "network photometer answered");
                found.push(host);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str) -> io::Result<BoxedStream> {
        debug!(address, port = self.port, "opening tcp connection");
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((address, self.port)),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn candidates(&self) -> Vec<String> {
        match self.search().await {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(error = %e, "network photometer discovery failed");
                Vec::new()
            }
        }
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }
}

/// MAC address carried at bytes 24..30 of a discovery reply.
fn mac_address(reply: &[u8]) -> String {
    reply.get(24..30).map_or_else(
        || "unknown".to_string(),
        |mac| {
            mac.iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":")
        },
    )
}

/// Build the connector matching the configured device model.
pub fn connector_for(config: &DeviceConfig) -> Arc<dyn Connector> {
    match config.model {
        #[cfg(feature = "serial")]
        DeviceModel::SqmLu => Arc::new(super::serial::SerialConnector::new(config.baud_rate)),
        #[cfg(not(feature = "serial"))]
        DeviceModel::SqmLu => Arc::new(TcpConnector::from_config(config)),
        DeviceModel::SqmLe => Arc::new(TcpConnector::from_config(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSession;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    /// Answers discovery queries on a loopback UDP port: first with an
    /// unrelated datagram, then with a module reply.
    async fn discovery_responder() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let (n, from) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &SQM_LE_DISCOVERY_QUERY);

            socket.send_to(&[0, 0, 0, 0x01], from).await.unwrap();
            let mut reply = [0u8; 30];
            reply[3] = SQM_LE_DISCOVERY_REPLY;
            reply[24..30].copy_from_slice(&[0x00, 0x20, 0x4a, 0x01, 0x02, 0x03]);
            socket.send_to(&reply, from).await.unwrap();
        });
        addr
    }

    /// Network photometer on loopback echoing each command's first character.
    async fn network_photometer() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut command = Vec::new();
                    let mut byte = [0u8; 1];
                    while socket.read_exact(&mut byte).await.is_ok() {
                        command.push(byte[0]);
                        if byte[0] == b'x' {
                            let reply = format!("{}, 19.50m,0000005915Hz\r\n", command[0] as char);
                            if socket.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                            command.clear();
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_tcp_connector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(b"i,00000002\r\n").await.unwrap();
            buf
        });

        let connector = TcpConnector::new(port, Duration::from_secs(1));
        let mut stream = connector.connect("127.0.0.1").await.unwrap();
        stream.write_all(b"ix").await.unwrap();

        let mut reply = [0u8; 1];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"i");
        assert_eq!(&server.await.unwrap(), b"ix");
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TcpConnector::new(port, Duration::from_secs(1));
        assert!(connector.connect("127.0.0.1").await.is_err());
    }

    #[test]
    fn test_from_config_uses_connect_timeout() {
        let config = DeviceConfig {
            model: DeviceModel::SqmLe,
            ..DeviceConfig::default()
        };
        let connector = TcpConnector::from_config(&config);
        assert_eq!(connector.port(), 10001);
        assert_eq!(connector.connect_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_mac_address() {
        let mut reply = [0u8; 30];
        reply[24..30].copy_from_slice(&[0x00, 0x20, 0x4a, 0xab, 0xcd, 0xef]);
        assert_eq!(mac_address(&reply), "00:20:4a:ab:cd:ef");
        assert_eq!(mac_address(&reply[..10]), "unknown");
    }

    #[tokio::test]
    async fn test_broadcast_discovery_collects_modules() {
        let responder = discovery_responder().await;
        let connector = TcpConnector::new(10001, Duration::from_secs(1))
            .with_discovery_target(responder)
            .with_discovery_window(Duration::from_millis(300));

        assert_eq!(connector.candidates().await, vec!["127.0.0.1"]);
    }

    #[tokio::test]
    async fn test_open_falls_back_to_broadcast_discovery() {
        let port = network_photometer().await;
        let responder = discovery_responder().await;
        let connector = TcpConnector::new(port, Duration::from_secs(1))
            .with_discovery_target(responder)
            .with_discovery_window(Duration::from_millis(300));
        let config = DeviceConfig {
            model: DeviceModel::SqmLe,
            address: "127.0.0.2".to_string(),
            settle_delay: Duration::from_millis(1),
            read_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(500),
            ..DeviceConfig::default()
        };

        let session = DeviceSession::open(Arc::new(connector), config, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.address().await, "127.0.0.1");
        assert!(session.send_and_receive("rx", 0).await.unwrap().starts_with('r'));
    }
}
