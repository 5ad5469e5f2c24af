//! Error taxonomy for the bridge agent
//!
//! Only `Discovery` and `Connectivity` (at connect time) stop the process;
//! everything else is logged where it happens and the loop moves on.

use thiserror::Error;

/// Device discovery failures (fatal at startup)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no devices found under the control-server root")]
    NoDevices,

    #[error("missing {missing} hub connection string(s) for discovered devices")]
    MissingCredentials { missing: usize },
}

/// Device-side hub failures
#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub connection failed: {0}")]
    Connection(String),

    #[error("hub transport error: {0}")]
    Transport(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("hub rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("invalid credential: {0}")]
    Credential(String),
}

/// Top-level agent error
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("control server unreachable: {0}")]
    Connectivity(String),

    #[error("telemetry send failed for {device}: {reason}")]
    Send { device: String, reason: String },

    #[error("command rejected: {0}")]
    Command(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Hub(#[from] HubError),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall_is_reported_exactly() {
        let err = DiscoveryError::MissingCredentials { missing: 3 };
        assert_eq!(err.to_string(), "missing 3 hub connection string(s) for discovered devices");
    }

    #[test]
    fn test_discovery_error_converts() {
        let err: BridgeError = DiscoveryError::NoDevices.into();
        assert!(matches!(err, BridgeError::Discovery(DiscoveryError::NoDevices)));
    }
}
