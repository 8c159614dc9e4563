//! WiFi configuration messages (`prov-config` and `custom-config` endpoints)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Status;
use crate::core::types::WifiStationState;

/// Requests to the WiFi configuration endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigRequest {
    /// Query the station state
    GetStatus,
    /// Store credentials without joining yet
    SetConfig {
        ssid: Vec<u8>,
        passphrase: Vec<u8>,
        bssid: Option<Vec<u8>>,
        channel: Option<u8>,
    },
    /// Join the stored network
    ApplyConfig,
}

/// Responses from the WiFi configuration endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigResponse {
    GetStatus {
        status: Status,
        state: WifiStationState,
    },
    SetConfig {
        status: Status,
    },
    ApplyConfig {
        status: Status,
    },
}

impl ConfigResponse {
    pub fn status(&self) -> Status {
        match self {
            ConfigResponse::GetStatus { status, .. }
            | ConfigResponse::SetConfig { status }
            | ConfigResponse::ApplyConfig { status } => *status,
        }
    }
}

/// Application specific key/value configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomConfigRequest {
    pub entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomConfigResponse {
    pub status: Status,
}
