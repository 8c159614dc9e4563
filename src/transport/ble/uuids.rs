//! Default BLE GATT UUIDs of the provisioning service

use uuid::Uuid;

/// Provisioning service UUID advertised by unprovisioned devices
pub const PROVISIONING_SERVICE_UUID: Uuid = Uuid::from_bytes([
    0x02, 0x1a, 0x90, 0x04, 0x03, 0x82, 0x4a, 0xea, 0xbf, 0xf4, 0x6b, 0x3f, 0x1c, 0x5a, 0xdf, 0xb4,
]);

/// Scan endpoint characteristic (`prov-scan`)
pub const PROV_SCAN_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ff50_0000_1000_8000_00805f9b34fb);

/// Session endpoint characteristic (`prov-session`)
pub const PROV_SESSION_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ff51_0000_1000_8000_00805f9b34fb);

/// WiFi configuration endpoint characteristic (`prov-config`)
pub const PROV_CONFIG_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ff52_0000_1000_8000_00805f9b34fb);

/// Version endpoint characteristic (`proto-ver`)
pub const PROTO_VER_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ff53_0000_1000_8000_00805f9b34fb);

/// Custom configuration endpoint characteristic (`custom-config`)
pub const CUSTOM_CONFIG_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ff54_0000_1000_8000_00805f9b34fb);

/// Default name prefix of unprovisioned devices
pub const DEFAULT_DEVICE_NAME_PREFIX: &str = "PROV_";

/// Fallback chunk size when the link does not report an MTU
pub const DEFAULT_CHUNK_SIZE: usize = 100;
