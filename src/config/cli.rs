//! Command-line argument parsing

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::transport::ble::DEFAULT_DEVICE_NAME_PREFIX;

/// How the device is reached
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// HTTP to the device's own access point
    Softap,
    /// Bluetooth Low Energy GATT
    Ble,
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "wifi-provisioning", version, author)]
#[clap(about = "Provision WiFi credentials onto a device over SoftAP or BLE")]
pub struct CliArgs {
    /// Transport used to reach the device
    #[clap(short, long, value_enum, default_value = "softap")]
    pub transport: TransportKind,

    /// Device address in SoftAP mode
    #[clap(long, default_value = "192.168.4.1:80")]
    pub base_url: String,

    /// Advertised name prefix of BLE devices (empty to match by service only)
    #[clap(long, default_value = DEFAULT_DEVICE_NAME_PREFIX)]
    pub device_prefix: String,

    /// BLE discovery window in seconds
    #[clap(long, default_value = "2.0")]
    pub discovery_timeout: f64,

    /// Security scheme: 0 (unsecured) or 1 (proof of possession)
    #[clap(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub security: u8,

    /// Proof of possession printed on the device
    #[clap(short, long)]
    pub pop: Option<String>,

    /// Network to join
    #[clap(long)]
    pub ssid: String,

    /// Network passphrase
    #[clap(long, default_value = "")]
    pub passphrase: String,

    /// Custom configuration entry sent before the WiFi credentials (key=value, repeatable)
    #[clap(long = "custom")]
    pub custom: Vec<String>,

    /// Per-request timeout in seconds
    #[clap(long, default_value = "5.0")]
    pub request_timeout: f64,

    /// Pause between WiFi state polls in seconds
    #[clap(long, default_value = "2.0")]
    pub poll_interval: f64,

    /// WiFi state polls before giving up
    #[clap(long, default_value = "15")]
    pub max_polls: u32,

    /// Scan results fetched per request
    #[clap(long, default_value = "4")]
    pub scan_page_size: u8,

    /// JSON file overriding the endpoint map
    #[clap(long)]
    pub endpoints: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["wifi-provisioning", "--ssid", "HomeNet"]).unwrap();

        assert_eq!(args.transport, TransportKind::Softap);
        assert_eq!(args.base_url, "192.168.4.1:80");
        assert_eq!(args.security, 1);
        assert_eq!(args.pop, None);
        assert!(args.custom.is_empty());
    }

    #[test]
    fn test_repeated_custom_entries() {
        let args = CliArgs::try_parse_from([
            "wifi-provisioning",
            "--transport",
            "ble",
            "--ssid",
            "HomeNet",
            "--custom",
            "a=1",
            "--custom",
            "b=2",
        ])
        .unwrap();

        assert_eq!(args.transport, TransportKind::Ble);
        assert_eq!(args.custom, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_security_out_of_range() {
        let args =
            CliArgs::try_parse_from(["wifi-provisioning", "--ssid", "x", "--security", "2"]);
        assert!(args.is_err());
    }
}
