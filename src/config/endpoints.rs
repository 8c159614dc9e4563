//! Per-transport mapping of endpoint identifiers

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    core::error::ConfigError,
    protocol::endpoints,
    transport::ble::{
        CUSTOM_CONFIG_CHAR_UUID, PROTO_VER_CHAR_UUID, PROV_CONFIG_CHAR_UUID, PROV_SCAN_CHAR_UUID,
        PROV_SESSION_CHAR_UUID, PROVISIONING_SERVICE_UUID,
    },
};

/// BLE side of the endpoint map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleEndpoints {
    pub service_uuid: Uuid,
    pub characteristics: BTreeMap<String, Uuid>,
}

impl Default for BleEndpoints {
    fn default() -> Self {
        let characteristics = [
            (endpoints::PROTO_VER, PROTO_VER_CHAR_UUID),
            (endpoints::PROV_SESSION, PROV_SESSION_CHAR_UUID),
            (endpoints::PROV_CONFIG, PROV_CONFIG_CHAR_UUID),
            (endpoints::PROV_SCAN, PROV_SCAN_CHAR_UUID),
            (endpoints::CUSTOM_CONFIG, CUSTOM_CONFIG_CHAR_UUID),
        ]
        .into_iter()
        .map(|(path, uuid)| (path.to_string(), uuid))
        .collect();

        Self {
            service_uuid: PROVISIONING_SERVICE_UUID,
            characteristics,
        }
    }
}

/// Maps stable endpoint identifiers to HTTP sub-paths and GATT characteristics
///
/// Missing sections in a loaded file fall back to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointMap {
    pub softap: BTreeMap<String, String>,
    pub ble: BleEndpoints,
}

impl Default for EndpointMap {
    fn default() -> Self {
        let softap = endpoints::ALL
            .iter()
            .map(|path| (path.to_string(), path.to_string()))
            .collect();

        Self {
            softap,
            ble: BleEndpoints::default(),
        }
    }
}

impl EndpointMap {
    /// Load an endpoint map from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading endpoint map from {}", path.display());

        let raw = tokio::fs::read_to_string(path).await?;
        let map: EndpointMap = serde_json::from_str(&raw)?;

        info!(
            "Loaded endpoint map: {} HTTP paths, {} characteristics",
            map.softap.len(),
            map.ble.characteristics.len()
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_cover_every_endpoint() {
        let map = EndpointMap::default();
        for path in endpoints::ALL {
            assert_eq!(map.softap.get(path).map(String::as_str), Some(path));
            assert!(map.ble.characteristics.contains_key(path), "missing {}", path);
        }
        assert!(!map.ble.characteristics.contains_key("unknown"));
    }

    #[tokio::test]
    async fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"softap": {{"proto-ver": "api/version", "prov-config": "api/config"}}}}"#
        )
        .unwrap();

        let map = EndpointMap::load(file.path()).await.unwrap();

        assert_eq!(map.softap.get("proto-ver").map(String::as_str), Some("api/version"));
        assert_eq!(map.softap.get("prov-scan"), None);
        assert_eq!(map.ble, BleEndpoints::default());
    }

    #[tokio::test]
    async fn test_load_custom_ble_uuids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.json");

        let mut map = EndpointMap::default();
        let custom = Uuid::from_u128(0x1234);
        map.ble
            .characteristics
            .insert(endpoints::PROV_SESSION.to_string(), custom);
        std::fs::write(&path, serde_json::to_string_pretty(&map).unwrap()).unwrap();

        let loaded = EndpointMap::load(&path).await.unwrap();
        assert_eq!(
            loaded.ble.characteristics.get(endpoints::PROV_SESSION),
            Some(&custom)
        );
        assert_eq!(loaded, map);
    }

    #[tokio::test]
    async fn test_load_errors() {
        let err = EndpointMap::load("/nonexistent/endpoints.json").await;
        assert!(matches!(err, Err(ConfigError::Io(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = EndpointMap::load(file.path()).await;
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }
}
