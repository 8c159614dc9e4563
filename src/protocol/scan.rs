//! Access point scan messages (`prov-scan` endpoint)

use serde::{Deserialize, Serialize};

use super::Status;
use crate::core::types::{WifiAuthMode, WifiScanResult};

/// Requests to the scan endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanRequest {
    Start {
        blocking: bool,
        passive: bool,
        group_channels: u8,
        period_ms: u32,
    },
    Status,
    Result {
        start_index: u8,
        count: u8,
    },
}

/// Responses from the scan endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanResponse {
    Start {
        status: Status,
    },
    Status {
        status: Status,
        finished: bool,
        result_count: u8,
    },
    Result {
        status: Status,
        entries: Vec<WifiScanEntry>,
    },
}

/// Scan entry as encoded by the device firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiScanEntry {
    pub ssid: Vec<u8>,
    pub bssid: Vec<u8>,
    pub rssi: i32,
    pub channel: u32,
    pub auth: u8,
}

impl TryFrom<WifiScanEntry> for WifiScanResult {
    type Error = String;

    fn try_from(entry: WifiScanEntry) -> Result<Self, Self::Error> {
        let auth = WifiAuthMode::try_from(entry.auth)
            .map_err(|_| format!("unknown auth mode {}", entry.auth))?;
        let channel =
            u8::try_from(entry.channel).map_err(|_| format!("invalid channel {}", entry.channel))?;

        Ok(WifiScanResult {
            ssid: String::from_utf8_lossy(&entry.ssid).into_owned(),
            bssid: entry.bssid,
            // Firmware reports dBm as a signed 32-bit value
            rssi: entry.rssi.clamp(-128, 0) as i8,
            channel,
            auth,
        })
    }
}
