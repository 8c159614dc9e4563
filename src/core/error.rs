//! Error types for the provisioning client

use thiserror::Error;

use crate::protocol::Status;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for security operations
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for provisioning operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors raised by a transport while moving bytes to and from the device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Device returned HTTP status {0}")]
    ServerError(u16),

    #[error("Device disconnected")]
    Disconnected,

    #[error("No mapping for endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("BLE error: {0}")]
    Ble(String),
}

impl From<bluer::Error> for TransportError {
    fn from(e: bluer::Error) -> Self {
        TransportError::Ble(e.to_string())
    }
}

/// Errors raised while establishing or using the secure channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Authentication failed")]
    AuthFailed,

    #[error("Malformed handshake message: {0}")]
    HandshakeMalformed(String),

    #[error("Proof of possession required for sec1")]
    MissingProofOfPossession,

    #[error("Transport error during handshake: {0}")]
    Transport(#[from] TransportError),
}

/// Errors raised by the session layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not established")]
    NotEstablished,

    #[error("Session closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Security error: {0}")]
    Security(SecurityError),
}

impl From<SecurityError> for SessionError {
    fn from(e: SecurityError) -> Self {
        // Keep transport failures tagged as transport failures
        match e {
            SecurityError::Transport(t) => SessionError::Transport(t),
            other => SessionError::Security(other),
        }
    }
}

/// Errors raised by provisioning operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Bad response from device: {0}")]
    BadResponse(String),

    #[error("Device rejected request: {0:?}")]
    DeviceRejected(Status),

    #[error("Gave up waiting for WiFi state after {polls} polls")]
    PollTimeout { polls: u32 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl ProvisionError {
    /// Human readable reason suitable for showing to the person provisioning
    pub fn user_message(&self) -> String {
        match self {
            ProvisionError::Transport(_)
            | ProvisionError::Session(SessionError::Transport(_)) => {
                "Connection to device failed. Please make sure you are connected to the \
                 WiFi network or in BLE range of the device."
                    .to_string()
            }
            ProvisionError::Session(SessionError::Security(_)) => {
                "Error establishing session. Check if Proof of Possession (PoP) is correct!"
                    .to_string()
            }
            ProvisionError::Session(SessionError::NotEstablished | SessionError::Closed) => {
                "Session with the device is not established. Please reconnect and try again."
                    .to_string()
            }
            ProvisionError::DeviceRejected(status) => {
                format!("Device provisioning failed. Reason: {status:?}. Please try again")
            }
            ProvisionError::PollTimeout { .. } => {
                "Please check the device indicators for provisioning status.".to_string()
            }
            ProvisionError::BadResponse(_) => {
                "Device sent an unexpected response. Please try again".to_string()
            }
        }
    }
}

impl From<bincode::Error> for ProvisionError {
    fn from(e: bincode::Error) -> Self {
        ProvisionError::BadResponse(e.to_string())
    }
}

/// Errors raised while scanning for access points through the device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Device reported scan error: {0:?}")]
    DeviceError(Status),

    #[error("Device does not advertise WiFi scan capability")]
    Unsupported,

    #[error("A scan is already in progress")]
    InProgress,

    #[error("Scan did not finish after {polls} status polls")]
    Timeout { polls: u32 },

    #[error("Bad scan response: {0}")]
    BadResponse(String),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl From<bincode::Error> for ScanError {
    fn from(e: bincode::Error) -> Self {
        ScanError::BadResponse(e.to_string())
    }
}

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint map: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid custom config entry '{0}', expected key=value")]
    InvalidCustomEntry(String),

    #[error("Unsupported security scheme {0}")]
    InvalidSecurityScheme(u8),

    #[error("Security scheme 1 requires --pop (pass an empty value for devices without one)")]
    MissingProofOfPossession,
}
