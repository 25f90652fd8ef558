//! Error types shared by every layer.

use thiserror::Error;

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two framing bytes collide.
    #[error("framing bytes must be distinct: {0}")]
    FramingCollision(String),

    /// A required address or path is empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A numeric value is out of range.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: u64,
    },

    /// Upstream and downstream radio share one port.
    #[error("port {0} is used for both upstream and downstream")]
    PortConflict(String),

    /// A duration that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::OutOfRange {
            field: "baud_rate",
            value: 0,
        };
        assert_eq!(err.to_string(), "baud_rate out of range: 0");
        assert_eq!(
            ConfigError::Empty("device address").to_string(),
            "device address must not be empty"
        );
    }
}
