//! Serial connector for USB photometers (SQM-LU) and radio modems.

use std::io;

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use super::connector::Connector;
use crate::core::MAX_SCAN_CANDIDATES;
use crate::transport::BoxedStream;

/// Opens serial ports at a fixed baud rate, 8N1, no flow control.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    /// Create a connector for the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    /// Baud rate ports are opened with.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, address: &str) -> io::Result<BoxedStream> {
        debug!(address, baud = self.baud_rate, "opening serial port");

        #[allow(unused_mut)]
        let mut port = tokio_serial::new(address, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;

        #[cfg(unix)]
        port.set_exclusive(false).map_err(io::Error::from)?;

        Ok(Box::new(port))
    }

    async fn candidates(&self) -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) if !ports.is_empty() => {
                info!(count = ports.len(), "enumerated serial ports");
                ports.into_iter().map(|p| p.port_name).collect()
            }
            _ => platform_candidates(),
        }
    }

    fn kind(&self) -> &'static str {
        "serial"
    }
}

/// Conventional port names when the OS cannot enumerate ports.
pub fn platform_candidates() -> Vec<String> {
    if cfg!(windows) {
        (0..MAX_SCAN_CANDIDATES).map(|n| format!("COM{n}")).collect()
    } else {
        (0..MAX_SCAN_CANDIDATES)
            .map(|n| format!("/dev/ttyUSB{n}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_candidates() {
        let candidates = platform_candidates();
        assert_eq!(candidates.len(), MAX_SCAN_CANDIDATES);
        if cfg!(windows) {
            assert_eq!(candidates[0], "COM0");
        } else {
            assert_eq!(candidates[0], "/dev/ttyUSB0");
            assert_eq!(candidates[99], "/dev/ttyUSB99");
        }
    }

    #[tokio::test]
    async fn test_missing_port_fails() {
        let connector = SerialConnector::new(115_200);
        assert!(
            connector
                .connect("/dev/this-port-does-not-exist")
                .await
                .is_err()
        );
    }
}
