//! Inbound listener for the upstream host connection.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use crate::core::FramingConfig;
use crate::transport::FramedChannel;

/// TCP listener handing out one framed upstream channel per host connection.
#[derive(Debug)]
pub struct InboundListener {
    listener: TcpListener,
    framing: FramingConfig,
}

impl InboundListener {
    /// Bind to `addr`.
    pub async fn bind(addr: SocketAddr, framing: FramingConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening for host");
        Ok(Self { listener, framing })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Wait for the next host connection.
    pub async fn accept(&self) -> io::Result<(FramedChannel<TcpStream>, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(%peer, "host connected");
        Ok((FramedChannel::new(stream, self.framing), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_framed_connection() {
        let framing = FramingConfig::default();
        let listener = InboundListener::bind("127.0.0.1:0".parse().unwrap(), framing)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut channel = FramedChannel::new(stream, framing);
            channel.send_text("rx").await.unwrap();
            channel.receive_frame().await.unwrap()
        });

        let (mut upstream, _) = listener.accept().await.unwrap();
        assert_eq!(upstream.receive_frame().await.unwrap(), vec!["rx"]);
        upstream.send_text("r, 19.50m").await.unwrap();
        assert_eq!(client.await.unwrap(), vec!["r, 19.50m"]);
    }
}
