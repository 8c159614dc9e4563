//! GATT service resolution on a connected peripheral

use bluer::{Device, gatt::remote::Characteristic};
use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    config::BleEndpoints,
    core::error::{TransportError, TransportResult},
};

const RESOLVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait until BlueZ has resolved the peripheral's GATT services
pub async fn wait_services_resolved(device: &Device, timeout: Duration) -> TransportResult<()> {
    let wait = async {
        loop {
            if device.is_services_resolved().await? {
                return Ok::<(), TransportError>(());
            }
            tokio::time::sleep(RESOLVE_POLL_INTERVAL).await;
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Map every configured endpoint path to its characteristic
///
/// Fails if the provisioning service is missing. Endpoints the peripheral does
/// not expose are skipped and later surface as `UnknownEndpoint`.
pub async fn resolve_endpoints(
    device: &Device,
    endpoints: &BleEndpoints,
) -> TransportResult<BTreeMap<String, Characteristic>> {
    let mut service = None;
    for candidate in device.services().await? {
        if candidate.uuid().await? == endpoints.service_uuid {
            service = Some(candidate);
            break;
        }
    }

    let service = service.ok_or_else(|| {
        TransportError::Ble(format!(
            "provisioning service {} not found",
            endpoints.service_uuid
        ))
    })?;

    let mut by_uuid = BTreeMap::new();
    for characteristic in service.characteristics().await? {
        by_uuid.insert(characteristic.uuid().await?, characteristic);
    }

    let mut resolved = BTreeMap::new();
    for (path, uuid) in &endpoints.characteristics {
        match by_uuid.get(uuid) {
            Some(characteristic) => {
                debug!("Endpoint '{}' -> {}", path, uuid);
                resolved.insert(path.clone(), characteristic.clone());
            }
            None => warn!("Endpoint '{}' ({}) not exposed by peripheral", path, uuid),
        }
    }

    info!("Resolved {} provisioning endpoints", resolved.len());
    Ok(resolved)
}
