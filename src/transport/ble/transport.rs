//! BLE GATT transport

use bluer::{Device, DeviceEvent, DeviceProperty, gatt::remote::Characteristic};
use futures::StreamExt;
use std::{collections::BTreeMap, time::Duration};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    config::BleEndpoints,
    core::error::{TransportError, TransportResult},
    transport::{Transport, TransportEvent},
};

use super::{adapter::DiscoveredPeripheral, characteristics, gatt};

/// Transport writing requests to GATT characteristics of a connected peripheral
pub struct BleTransport {
    device: Device,
    characteristics: BTreeMap<String, Characteristic>,
    link: watch::Sender<bool>,
    events: broadcast::Sender<TransportEvent>,
    watcher: JoinHandle<()>,
}

impl BleTransport {
    /// Connect to a discovered peripheral and resolve its provisioning endpoints
    pub async fn connect(
        adapter: &bluer::Adapter,
        peripheral: &DiscoveredPeripheral,
        endpoints: &BleEndpoints,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let device = adapter.device(peripheral.address)?;

        if !device.is_connected().await? {
            info!("Connecting to {}", peripheral.address);
            tokio::time::timeout(timeout, device.connect())
                .await
                .map_err(|_| TransportError::Timeout)??;
        }

        gatt::wait_services_resolved(&device, timeout).await?;
        let characteristics = gatt::resolve_endpoints(&device, endpoints).await?;

        let (link, _) = watch::channel(true);
        let (events, _) = broadcast::channel(16);
        let watcher = Self::watch_connection(&device, link.clone(), events.clone()).await?;

        let _ = events.send(TransportEvent::Connected);
        info!("Connected to {}", peripheral.address);

        Ok(Self {
            device,
            characteristics,
            link,
            events,
            watcher,
        })
    }

    /// Track BlueZ connection property changes in the background
    async fn watch_connection(
        device: &Device,
        link: watch::Sender<bool>,
        events: broadcast::Sender<TransportEvent>,
    ) -> TransportResult<JoinHandle<()>> {
        let mut device_events = Box::pin(device.events().await?);
        let address = device.address();

        Ok(tokio::spawn(async move {
            while let Some(event) = device_events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) = event {
                    link.send_replace(connected);
                    if connected {
                        let _ = events.send(TransportEvent::Connected);
                    } else {
                        warn!("Peripheral {} disconnected", address);
                        let _ = events.send(TransportEvent::Disconnected);
                    }
                }
            }
        }))
    }
}

impl Transport for BleTransport {
    async fn send_receive(
        &self,
        path: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> TransportResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let characteristic = self
            .characteristics
            .get(path)
            .ok_or_else(|| TransportError::UnknownEndpoint(path.to_string()))?;

        let link = self.link.subscribe();

        tokio::select! {
            result = tokio::time::timeout(timeout, characteristics::exchange(characteristic, payload)) => {
                result.map_err(|_| TransportError::Timeout)?
            }
            _ = wait_disconnected(link) => Err(TransportError::Disconnected),
        }
    }

    fn is_connected(&self) -> bool {
        *self.link.borrow()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> TransportResult<()> {
        info!("Disconnecting from {}", self.device.address());
        let was_connected = self.link.send_replace(false);
        if was_connected {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
        self.device.disconnect().await?;
        Ok(())
    }
}

/// Resolves once the link goes down
async fn wait_disconnected(mut link: watch::Receiver<bool>) {
    loop {
        let connected = *link.borrow_and_update();
        if !connected || link.changed().await.is_err() {
            return;
        }
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
