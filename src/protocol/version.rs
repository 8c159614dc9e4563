//! Version and capability query (`proto-ver` endpoint)
//!
//! The query is sent before any session exists and is never encrypted. Current
//! firmware answers with JSON such as
//! `{"prov": {"ver": "v1.1", "cap": ["wifi_scan", "no_pop"]}}`; old firmware
//! answers with the bare text `success`.

use serde_json::Value;

use crate::core::types::{DeviceCapabilities, VersionInfo, VersionPayload};

/// Payload sent to the version endpoint
pub const VERSION_PROBE: &[u8] = b"V0.2";

const PROV_KEY: &str = "prov";
const VERSION_KEY: &str = "ver";
const CAPABILITIES_KEY: &str = "cap";
const LEGACY_SUCCESS: &str = "success";

/// Interpret the raw version response
///
/// Never fails: anything that is neither a JSON object nor the legacy success
/// text yields `force_authentication = true`.
pub fn parse_version_info(raw: &[u8]) -> VersionInfo {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(raw) {
        let prov = map.get(PROV_KEY);
        let version = prov
            .and_then(|p| p.get(VERSION_KEY))
            .and_then(Value::as_str)
            .map(str::to_string);
        let capabilities = prov
            .and_then(|p| p.get(CAPABILITIES_KEY))
            .and_then(Value::as_array)
            .map(|caps| {
                caps.iter()
                    .filter_map(Value::as_str)
                    .collect::<DeviceCapabilities>()
            })
            .unwrap_or_default();

        return VersionInfo {
            payload: VersionPayload::Structured(Value::Object(map)),
            version,
            capabilities,
            force_authentication: false,
        };
    }

    let text = String::from_utf8_lossy(raw).trim().to_string();
    if text.eq_ignore_ascii_case(LEGACY_SUCCESS) {
        VersionInfo {
            payload: VersionPayload::Legacy(text),
            version: None,
            capabilities: DeviceCapabilities::default(),
            force_authentication: false,
        }
    } else {
        VersionInfo {
            payload: VersionPayload::Unparseable(text),
            version: None,
            capabilities: DeviceCapabilities::default(),
            force_authentication: true,
        }
    }
}
