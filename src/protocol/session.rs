//! Session establishment messages (`prov-session` endpoint)

use serde::{Deserialize, Serialize};

use super::Status;

/// Handshake requests sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRequest {
    /// Unsecured session hello
    Sec0,
    /// First round: client ephemeral public key
    Command0 { client_pubkey: [u8; 32] },
    /// Second round: device public key sealed with the derived session key
    Command1 { client_verify: Vec<u8> },
}

/// Handshake responses sent by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResponse {
    Sec0 {
        status: Status,
    },
    Response0 {
        status: Status,
        device_pubkey: [u8; 32],
        device_random: [u8; 16],
    },
    Response1 {
        status: Status,
        device_verify: Vec<u8>,
    },
}
