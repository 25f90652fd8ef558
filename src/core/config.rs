//! Node configuration.
//!
//! Every tunable the relay uses is an explicit value on one of these structs;
//! nothing is read from globals or the environment. Loading them from a file
//! is left to the caller (enable the `serde` feature to derive the traits).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::constants::*;
use super::error::{ConfigError, ConfigResult};

/// Text encoding for message payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TextEncoding {
    /// UTF-8 (strict decoding).
    #[default]
    Utf8,
    /// ISO-8859-1; every byte decodes, characters above U+00FF do not encode.
    Latin1,
}

/// Wire framing parameters shared by both ends of a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FramingConfig {
    /// Frame terminator byte.
    pub frame_end: u8,
    /// Message separator byte.
    pub separator: u8,
    /// Escape byte for delimiters embedded in a message.
    pub escape: u8,
    /// Text encoding of messages.
    pub encoding: TextEncoding,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            frame_end: DEFAULT_FRAME_END,
            separator: DEFAULT_MSG_SEP,
            escape: DEFAULT_ESCAPE,
            encoding: TextEncoding::Utf8,
        }
    }
}

impl FramingConfig {
    /// Check that the delimiter bytes cannot be confused with each other or
    /// with the escape codes.
    pub fn validate(&self) -> ConfigResult<()> {
        let specials = [self.frame_end, self.separator, self.escape];
        for (i, a) in specials.iter().enumerate() {
            if specials[i + 1..].contains(a) {
                return Err(ConfigError::FramingCollision(format!(
                    "0x{a:02x} used twice"
                )));
            }
        }
        let codes = [ESCAPED_FRAME_END, ESCAPED_MSG_SEP, ESCAPED_ESCAPE];
        if let Some(b) = specials.iter().find(|b| codes.contains(b)) {
            return Err(ConfigError::FramingCollision(format!(
                "0x{b:02x} is reserved as an escape code"
            )));
        }
        Ok(())
    }
}

/// Photometer model, which decides how the device is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceModel {
    /// USB serial photometer.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "SQM-LU"))]
    SqmLu,
    /// Ethernet photometer.
    #[cfg_attr(feature = "serde", serde(rename = "SQM-LE"))]
    SqmLe,
}

/// Photometer session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    /// Device model.
    pub model: DeviceModel,
    /// Address tried first (serial port path or host name).
    pub address: String,
    /// Serial baud rate (SQM-LU).
    pub baud_rate: u32,
    /// TCP port (SQM-LE).
    pub network_port: u16,
    /// Retry budget per command.
    pub max_tries: u32,
    /// Delay between command and response read.
    pub settle_delay: Duration,
    /// Maximum wait for one response line.
    pub read_timeout: Duration,
    /// Pause before resetting after a failed attempt.
    pub retry_backoff: Duration,
    /// Pause between close and reopen.
    pub reset_pause: Duration,
    /// Continuous-read interval.
    pub poll_interval: Duration,
    /// Per-candidate probe timeout during discovery.
    pub probe_timeout: Duration,
    /// TCP connect timeout (SQM-LE).
    pub connect_timeout: Duration,
    /// How long SQM-LE discovery replies are collected.
    pub discovery_window: Duration,
    /// Upper bound on candidates scanned during discovery.
    pub max_scan_candidates: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: DeviceModel::SqmLu,
            address: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            network_port: SQM_LE_PORT,
            max_tries: DEFAULT_MAX_TRIES,
            settle_delay: DEFAULT_SETTLE_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            reset_pause: DEFAULT_RESET_PAUSE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_window: DEFAULT_DISCOVERY_WINDOW,
            max_scan_candidates: MAX_SCAN_CANDIDATES,
        }
    }
}

impl DeviceConfig {
    /// Validate the session parameters.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.address.is_empty() {
            return Err(ConfigError::Empty("device address"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::OutOfRange {
                field: "baud_rate",
                value: 0,
            });
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("read_timeout"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("poll_interval"));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("probe_timeout"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("connect_timeout"));
        }
        Ok(())
    }
}

/// Radio modem parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RadioConfig {
    /// Serial port of the radio modem.
    pub port: String,
    /// Baud rate of the radio modem.
    pub baud_rate: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB_LORA".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl RadioConfig {
    /// Validate the radio parameters.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.port.is_empty() {
            return Err(ConfigError::Empty("radio port"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::OutOfRange {
                field: "radio baud_rate",
                value: 0,
            });
        }
        Ok(())
    }
}

/// When a remote file replaces the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ReplacePolicy {
    /// Pull when the remote timestamp is newer than or equal to the local one.
    #[default]
    NewerOrEqual,
    /// Pull only when the remote timestamp is strictly newer.
    StrictlyNewer,
}

impl ReplacePolicy {
    /// Whether a remote file with `remote` mtime should replace a local one
    /// with `local` mtime.
    pub fn should_replace(self, remote: i64, local: i64) -> bool {
        match self {
            Self::NewerOrEqual => remote >= local,
            Self::StrictlyNewer => remote > local,
        }
    }
}

/// File reconciliation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SyncConfig {
    /// Directory whose data files take part in reconciliation.
    pub storage_root: PathBuf,
    /// File name suffix filter.
    pub suffix: String,
    /// Replacement rule for files present on both sides.
    pub replace_policy: ReplacePolicy,
    /// Maximum wait for the peer's inventory.
    pub inventory_timeout: Duration,
    /// Maximum wait for each requested file.
    pub file_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("/var/tmp/sqm"),
            suffix: DATA_FILE_SUFFIX.to_string(),
            replace_policy: ReplacePolicy::default(),
            inventory_timeout: DEFAULT_INVENTORY_TIMEOUT,
            file_timeout: DEFAULT_FILE_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Validate the reconciliation parameters.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.storage_root.as_os_str().is_empty() {
            return Err(ConfigError::Empty("storage root"));
        }
        if self.inventory_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("inventory_timeout"));
        }
        if self.file_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("file_timeout"));
        }
        Ok(())
    }
}

/// Relay loop parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RelayConfig {
    /// Address the inbound listener binds to.
    pub bind_addr: SocketAddr,
    /// Maximum wait of the drain loop before checking the buffer again.
    pub flush_interval: Duration,
    /// Backoff after a downstream connectivity failure.
    pub downstream_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_RELAY_PORT)),
            flush_interval: DEFAULT_POLL_INTERVAL,
            downstream_backoff: DEFAULT_DOWNSTREAM_BACKOFF,
        }
    }
}

impl RelayConfig {
    /// Validate the relay parameters.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("flush_interval"));
        }
        Ok(())
    }
}

/// Complete configuration of one relay node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NodeConfig {
    /// Wire framing.
    pub framing: FramingConfig,
    /// Relay loops.
    pub relay: RelayConfig,
    /// Locally attached photometer.
    pub device: DeviceConfig,
    /// Radio bridge toward a child node, if this node has one.
    pub radio: Option<RadioConfig>,
    /// Radio port toward the parent node. When set, the node is a child and
    /// takes its upstream from this port instead of the TCP listener.
    pub upstream: Option<RadioConfig>,
    /// File reconciliation.
    pub sync: SyncConfig,
}

impl NodeConfig {
    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.framing.validate()?;
        self.relay.validate()?;
        self.device.validate()?;
        if let Some(radio) = &self.radio {
            radio.validate()?;
        }
        if let Some(upstream) = &self.upstream {
            upstream.validate()?;
            if self.radio.as_ref().is_some_and(|r| r.port == upstream.port) {
                return Err(ConfigError::PortConflict(upstream.port.clone()));
            }
        }
        self.sync.validate()
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upstream bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.relay.bind_addr = addr;
        self
    }

    /// Set the framing parameters.
    pub fn framing(mut self, framing: FramingConfig) -> Self {
        self.config.framing = framing;
        self
    }

    /// Set the device model.
    pub fn device_model(mut self, model: DeviceModel) -> Self {
        self.config.device.model = model;
        self
    }

    /// Set the device address tried first.
    pub fn device_address(mut self, address: impl Into<String>) -> Self {
        self.config.device.address = address.into();
        self
    }

    /// Set the retry budget per command.
    pub fn max_tries(mut self, tries: u32) -> Self {
        self.config.device.max_tries = tries;
        self
    }

    /// Set the continuous-read interval and the drain loop's maximum wait.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.device.poll_interval = interval;
        self.config.relay.flush_interval = interval;
        self
    }

    /// Set the command settle delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.device.settle_delay = delay;
        self
    }

    /// Attach a radio bridge.
    pub fn radio(mut self, port: impl Into<String>, baud_rate: u32) -> Self {
        self.config.radio = Some(RadioConfig {
            port: port.into(),
            baud_rate,
        });
        self
    }

    /// Take the upstream from a radio port (child node).
    pub fn upstream_radio(mut self, port: impl Into<String>, baud_rate: u32) -> Self {
        self.config.upstream = Some(RadioConfig {
            port: port.into(),
            baud_rate,
        });
        self
    }

    /// Set the storage root used for reconciliation.
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.sync.storage_root = root.into();
        self
    }

    /// Set the replacement policy.
    pub fn replace_policy(mut self, policy: ReplacePolicy) -> Self {
        self.config.sync.replace_policy = policy;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> ConfigResult<NodeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
