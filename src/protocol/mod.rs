//! Wire messages exchanged with the device
//!
//! Every endpoint except the version query speaks bincode-encoded serde
//! messages. Each response carries a [`Status`] code.

pub mod config;
pub mod scan;
pub mod session;
pub mod version;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub use {
    config::{ConfigRequest, ConfigResponse, CustomConfigRequest, CustomConfigResponse},
    scan::{ScanRequest, ScanResponse, WifiScanEntry},
    session::{SessionRequest, SessionResponse},
    version::{VERSION_PROBE, parse_version_info},
};

/// Stable endpoint identifiers, mapped per transport by [`crate::config::EndpointMap`]
pub mod endpoints {
    pub const PROTO_VER: &str = "proto-ver";
    pub const PROV_SESSION: &str = "prov-session";
    pub const PROV_CONFIG: &str = "prov-config";
    pub const PROV_SCAN: &str = "prov-scan";
    pub const CUSTOM_CONFIG: &str = "custom-config";

    pub const ALL: [&str; 5] = [PROTO_VER, PROV_SESSION, PROV_CONFIG, PROV_SCAN, CUSTOM_CONFIG];
}

/// Application level status code present in every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    InvalidSecScheme,
    InvalidProto,
    TooManySessions,
    InvalidArgument,
    InternalError,
    CryptoError,
    InvalidSession,
}

impl Status {
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

/// Encode a message for the wire
pub fn encode<T: Serialize>(message: &T) -> bincode::Result<Vec<u8>> {
    bincode::serialize(message)
}

/// Decode a message received from the wire
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> bincode::Result<T> {
    bincode::deserialize(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_names_unique() {
        for (i, a) in endpoints::ALL.iter().enumerate() {
            for (j, b) in endpoints::ALL.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b);
                }
            }
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: bincode::Result<ConfigResponse> = decode(&[0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(result.is_err());
    }
}
