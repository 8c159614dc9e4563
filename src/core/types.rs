//! Domain types for WiFi provisioning

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::error::ScanError;

/// Authentication mode advertised by an access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WifiAuthMode {
    Open = 0,
    Wep = 1,
    WpaPsk = 2,
    Wpa2Psk = 3,
    WpaWpa2Psk = 4,
    Wpa2Enterprise = 5,
    Wpa3Psk = 6,
    Wpa2Wpa3Psk = 7,
}

impl TryFrom<u8> for WifiAuthMode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(WifiAuthMode::Open),
            1 => Ok(WifiAuthMode::Wep),
            2 => Ok(WifiAuthMode::WpaPsk),
            3 => Ok(WifiAuthMode::Wpa2Psk),
            4 => Ok(WifiAuthMode::WpaWpa2Psk),
            5 => Ok(WifiAuthMode::Wpa2Enterprise),
            6 => Ok(WifiAuthMode::Wpa3Psk),
            7 => Ok(WifiAuthMode::Wpa2Wpa3Psk),
            _ => Err(()),
        }
    }
}

impl From<WifiAuthMode> for u8 {
    fn from(mode: WifiAuthMode) -> Self {
        mode as u8
    }
}

/// Coarse signal quality bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStrength {
    Strong,
    Good,
    Fair,
    Weak,
}

impl SignalStrength {
    pub fn from_rssi(rssi: i8) -> Self {
        match rssi {
            r if r > -50 => SignalStrength::Strong,
            r if r > -60 => SignalStrength::Good,
            r if r > -67 => SignalStrength::Fair,
            _ => SignalStrength::Weak,
        }
    }
}

/// Access point reported by the device's scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiScanResult {
    pub ssid: String,
    pub bssid: Vec<u8>,
    /// Signal strength in dBm, always within -128..=0
    pub rssi: i8,
    pub channel: u8,
    pub auth: WifiAuthMode,
}

impl WifiScanResult {
    /// BSSID formatted as colon separated hex
    pub fn bssid_string(&self) -> String {
        self.bssid
            .iter()
            .map(|b| hex::encode([*b]))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn signal_strength(&self) -> SignalStrength {
        SignalStrength::from_rssi(self.rssi)
    }

    pub fn is_open(&self) -> bool {
        self.auth == WifiAuthMode::Open
    }
}

/// Credentials pushed to the device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WifiConfig {
    pub ssid: String,
    pub passphrase: String,
    /// Optional application specific key/value configuration
    pub extra: Option<BTreeMap<String, String>>,
}

/// Why the device failed to join the target network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectFailReason {
    AuthError,
    NetworkNotFound,
    Other(u8),
}

/// Station state of the device's WiFi interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiStationState {
    Connecting,
    Connected,
    Disconnected,
    ConnectionFailed(ConnectFailReason),
}

impl WifiStationState {
    /// `Disconnected` is not terminal: some firmware reports it while retrying
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WifiStationState::Connected | WifiStationState::ConnectionFailed(_)
        )
    }
}

/// Capability tokens advertised by the device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceCapabilities(BTreeSet<String>);

impl DeviceCapabilities {
    pub const WIFI_SCAN: &'static str = "wifi_scan";
    pub const NO_POP: &'static str = "no_pop";
    pub const NO_SEC: &'static str = "no_sec";

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for DeviceCapabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Raw payload returned by the version endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum VersionPayload {
    /// JSON document with version and capability information
    Structured(serde_json::Value),
    /// Legacy firmware answering with a bare "success"
    Legacy(String),
    /// Anything else
    Unparseable(String),
}

/// Parsed result of the version query
#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub payload: VersionPayload,
    pub version: Option<String>,
    pub capabilities: DeviceCapabilities,
    /// Always ask for a passphrase, even for open networks
    pub force_authentication: bool,
}

impl VersionInfo {
    /// Whether a WiFi scan should be attempted against this device
    pub fn should_scan(&self) -> bool {
        match self.payload {
            VersionPayload::Structured(_) => {
                self.capabilities.contains(DeviceCapabilities::WIFI_SCAN)
            }
            VersionPayload::Legacy(_) | VersionPayload::Unparseable(_) => true,
        }
    }

    /// Whether a passphrase must be requested before joining `network`
    pub fn requires_passphrase(&self, network: &WifiScanResult) -> bool {
        !network.is_open() || self.force_authentication
    }

    /// Whether the device expects a non-empty proof of possession
    ///
    /// Only structured version info can waive it, through `no_pop` or `no_sec`.
    pub fn requires_pop(&self) -> bool {
        match self.payload {
            VersionPayload::Structured(_) => {
                !self.capabilities.contains(DeviceCapabilities::NO_POP)
                    && !self.capabilities.contains(DeviceCapabilities::NO_SEC)
            }
            VersionPayload::Legacy(_) | VersionPayload::Unparseable(_) => true,
        }
    }

    /// Whether the device accepts unsecured (`sec0`) sessions
    ///
    /// Devices without structured version info are given the benefit of the
    /// doubt.
    pub fn allows_unsecured(&self) -> bool {
        match self.payload {
            VersionPayload::Structured(_) => self.capabilities.contains(DeviceCapabilities::NO_SEC),
            VersionPayload::Legacy(_) | VersionPayload::Unparseable(_) => true,
        }
    }
}

/// Accumulated scan results, keyed by SSID
///
/// A failed scan and a scan without results look the same to the caller: empty
/// results, with the failure attached as a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanOutcome {
    pub results: BTreeMap<String, WifiScanResult>,
    pub error: Option<ScanError>,
}

impl ScanOutcome {
    pub fn failed(error: ScanError) -> Self {
        Self {
            results: BTreeMap::new(),
            error: Some(error),
        }
    }

    /// Caller should fall back to manual SSID entry
    pub fn needs_manual_entry(&self) -> bool {
        self.results.is_empty()
    }
}

/// Acknowledgement of a configuration or apply request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyAck {
    pub status: crate::protocol::Status,
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Established,
    Closed,
}

/// Session identifier used for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(auth: WifiAuthMode, rssi: i8) -> WifiScanResult {
        WifiScanResult {
            ssid: "Net".into(),
            bssid: vec![0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03],
            rssi,
            channel: 6,
            auth,
        }
    }

    #[test]
    fn test_auth_mode_conversion() {
        assert_eq!(WifiAuthMode::try_from(3), Ok(WifiAuthMode::Wpa2Psk));
        assert_eq!(u8::from(WifiAuthMode::Wpa2Wpa3Psk), 7);
        assert!(WifiAuthMode::try_from(8).is_err());
    }

    #[test]
    fn test_signal_strength_thresholds() {
        assert_eq!(SignalStrength::from_rssi(-40), SignalStrength::Strong);
        assert_eq!(SignalStrength::from_rssi(-50), SignalStrength::Good);
        assert_eq!(SignalStrength::from_rssi(-66), SignalStrength::Fair);
        assert_eq!(SignalStrength::from_rssi(-67), SignalStrength::Weak);
    }

    #[test]
    fn test_bssid_string() {
        assert_eq!(
            network(WifiAuthMode::Open, -40).bssid_string(),
            "aa:bb:cc:01:02:03"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(WifiStationState::Connected.is_terminal());
        assert!(WifiStationState::ConnectionFailed(ConnectFailReason::AuthError).is_terminal());
        assert!(!WifiStationState::Connecting.is_terminal());
        assert!(!WifiStationState::Disconnected.is_terminal());
    }

    #[test]
    fn test_requires_passphrase() {
        let mut info = VersionInfo {
            payload: VersionPayload::Legacy("success".into()),
            version: None,
            capabilities: DeviceCapabilities::default(),
            force_authentication: false,
        };

        assert!(!info.requires_passphrase(&network(WifiAuthMode::Open, -40)));
        assert!(info.requires_passphrase(&network(WifiAuthMode::Wpa2Psk, -40)));

        info.force_authentication = true;
        assert!(info.requires_passphrase(&network(WifiAuthMode::Open, -40)));
    }

    #[test]
    fn test_should_scan_gating() {
        let structured = VersionInfo {
            payload: VersionPayload::Structured(serde_json::json!({})),
            version: None,
            capabilities: DeviceCapabilities::default(),
            force_authentication: false,
        };
        assert!(!structured.should_scan());

        let with_scan = VersionInfo {
            capabilities: ["wifi_scan"].into_iter().collect(),
            ..structured
        };
        assert!(with_scan.should_scan());
    }

    #[test]
    fn test_security_capabilities() {
        let structured = |caps: &[&str]| VersionInfo {
            payload: VersionPayload::Structured(serde_json::json!({})),
            version: Some("v1.1".into()),
            capabilities: caps.iter().copied().collect(),
            force_authentication: false,
        };

        let plain = structured(&["wifi_scan"]);
        assert!(plain.requires_pop());
        assert!(!plain.allows_unsecured());

        let no_pop = structured(&["wifi_scan", "no_pop"]);
        assert!(!no_pop.requires_pop());
        assert!(!no_pop.allows_unsecured());

        let no_sec = structured(&["no_sec"]);
        assert!(!no_sec.requires_pop());
        assert!(no_sec.allows_unsecured());

        let legacy = VersionInfo {
            payload: VersionPayload::Legacy("success".into()),
            version: None,
            capabilities: DeviceCapabilities::default(),
            force_authentication: false,
        };
        assert!(legacy.requires_pop());
        assert!(legacy.allows_unsecured());
    }
}
