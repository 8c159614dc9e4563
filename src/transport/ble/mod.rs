//! Bluetooth Low Energy transport layer

pub mod adapter;
pub mod characteristics;
pub mod chunking;
pub mod gatt;
pub mod transport;
pub mod uuids;

pub use {
    adapter::{BleAdapter, DEFAULT_SCAN_TIMEOUT, DiscoveredPeripheral, DiscoveryFilter},
    transport::BleTransport,
    uuids::*,
};
