//! Error types for SetuIO
//!
//! Variants follow the fault taxonomy used across the crate:
//!
//! | Fault | Variant | Handling |
//! |-------|---------|----------|
//! | Transport | [`Error::Transport`], [`Error::Serial`], [`Error::Io`] | reset with bounded retries |
//! | Framing | none, absorbed as a `FrameFault` | resync, then reset |
//! | Protocol order | [`Error::ProtocolOrder`] | message dropped, connection continues |
//! | Capacity | [`Error::Capacity`] | operation refused, nothing sent |
//! | Device | [`Error::DeviceFailed`] | device marked failed by the aggregator |

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is structurally valid but unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Port unavailable or lost
    #[error("Transport fault on {port}: {reason}")]
    Transport {
        /// Port the fault occurred on
        port: String,
        /// What went wrong
        reason: String,
    },

    /// Message arrived out of order or disagrees with the current description
    #[error("Protocol order fault: {0}")]
    ProtocolOrder(String),

    /// A fixed maximum would be exceeded
    #[error("Capacity exceeded for {what}: requested {requested}, limit {limit}")]
    Capacity {
        /// The bounded quantity
        what: &'static str,
        /// Amount requested by the caller
        requested: usize,
        /// Fixed maximum
        limit: usize,
    },

    /// Device reached its terminal failure state
    #[error("Device failed: {0}")]
    DeviceFailed(String),

    /// Wire envelope could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unknown device type in configuration
    #[error("Unknown device type: {0}")]
    UnknownDevice(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a transport fault on a named port
    pub fn transport(port: &str, reason: impl Into<String>) -> Self {
        Error::Transport {
            port: port.to_string(),
            reason: reason.into(),
        }
    }

    /// True for faults that originate in the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::Serial(_) | Error::Io(_)
        )
    }
}
