//! BLE adapter management and peripheral discovery

use bluer::{Adapter, AdapterEvent, Address};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::TransportResult;

/// Default discovery window
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(2);

/// Peripheral found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub address: Address,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Which advertisements count as provisioning peripherals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    pub service_uuid: Uuid,
    pub name_prefix: Option<String>,
}

impl DiscoveryFilter {
    /// A peripheral matches if it advertises the service or carries the name prefix
    pub fn matches(&self, name: Option<&str>, uuids: Option<&std::collections::HashSet<Uuid>>) -> bool {
        let by_service = uuids.is_some_and(|u| u.contains(&self.service_uuid));
        let by_name = match (&self.name_prefix, name) {
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            _ => false,
        };
        by_service || by_name
    }
}

/// BLE central adapter
pub struct BleAdapter {
    _session: bluer::Session,
    adapter: Adapter,
}

impl BleAdapter {
    /// Open the default adapter and power it on
    pub async fn new() -> TransportResult<Self> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;

        info!("Using BLE adapter: {}", adapter.name());
        adapter.set_powered(true).await?;

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Discover provisioning peripherals for `timeout`
    ///
    /// Finding nothing is not an error; the caller may simply scan again.
    pub async fn scan(
        &self,
        filter: &DiscoveryFilter,
        timeout: Duration,
    ) -> TransportResult<Vec<DiscoveredPeripheral>> {
        info!(?timeout, service = %filter.service_uuid, "Scanning for peripherals");

        let events = self.adapter.discover_devices().await?;
        let mut events = Box::pin(events);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut found: Vec<DiscoveredPeripheral> = Vec::new();

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        if found.iter().any(|p| p.address == address) {
                            continue;
                        }
                        match self.inspect(address, filter).await {
                            Ok(Some(peripheral)) => {
                                debug!("Found peripheral {:?} ({})", peripheral.name, address);
                                found.push(peripheral);
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Failed to inspect {}: {}", address, e),
                        }
                    }
                    Some(AdapterEvent::DeviceRemoved(address)) => {
                        debug!("Device removed: {}", address);
                    }
                    Some(AdapterEvent::PropertyChanged(_)) => {}
                    None => {
                        warn!("BLE discovery stream ended");
                        break;
                    }
                }
            }
        }

        if found.is_empty() {
            info!("No provisioning peripherals found");
        } else {
            info!("Found {} provisioning peripheral(s)", found.len());
        }

        Ok(found)
    }

    async fn inspect(
        &self,
        address: Address,
        filter: &DiscoveryFilter,
    ) -> TransportResult<Option<DiscoveredPeripheral>> {
        let device = self.adapter.device(address)?;
        let name = device.name().await?;
        let uuids = device.uuids().await?;

        if !filter.matches(name.as_deref(), uuids.as_ref()) {
            return Ok(None);
        }

        Ok(Some(DiscoveredPeripheral {
            address,
            name,
            rssi: device.rssi().await?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ble::uuids::PROVISIONING_SERVICE_UUID;
    use std::collections::HashSet;

    fn filter() -> DiscoveryFilter {
        DiscoveryFilter {
            service_uuid: PROVISIONING_SERVICE_UUID,
            name_prefix: Some("PROV_".to_string()),
        }
    }

    #[test]
    fn test_filter_matches_service_uuid() {
        let uuids: HashSet<Uuid> = [PROVISIONING_SERVICE_UUID].into_iter().collect();
        assert!(filter().matches(None, Some(&uuids)));
    }

    #[test]
    fn test_filter_matches_name_prefix() {
        assert!(filter().matches(Some("PROV_12ab"), None));
        assert!(!filter().matches(Some("Headphones"), None));
    }

    #[test]
    fn test_filter_without_prefix() {
        let filter = DiscoveryFilter {
            name_prefix: None,
            ..filter()
        };
        assert!(!filter.matches(Some("PROV_12ab"), None));
    }
}
