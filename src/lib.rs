//! WiFi provisioning client
//!
//! Establishes a secured session with an unprovisioned device over one of
//! several transports, then scans for access points and pushes credentials:
//! - SoftAP (HTTP to the device's own access point)
//! - Bluetooth Low Energy (GATT)

pub mod config;
pub mod core;
pub mod protocol;
pub mod security;
pub mod transport;

pub use core::{
    error::{ProvisionError, ScanError, SecurityError, SessionError, TransportError},
    service::{ClientOptions, ProvisioningClient},
    types::{
        DeviceCapabilities, ScanOutcome, VersionInfo, WifiAuthMode, WifiConfig, WifiScanResult,
        WifiStationState,
    },
};
