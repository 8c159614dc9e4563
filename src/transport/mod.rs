//! Transports carrying provisioning messages to the device
//!
//! A transport moves opaque byte payloads to a named endpoint and returns the
//! device's answer. It knows nothing about sessions or encryption.

pub mod ble;
pub mod mock_transport;
pub mod softap;

use std::time::Duration;

use tokio::sync::broadcast;
use trait_variant::make;

use crate::core::error::TransportResult;

pub use {ble::BleTransport, softap::SoftApTransport};

#[cfg(test)]
pub use mock_transport::MockDevice;

/// Default round trip timeout for a single request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection events broadcast to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
}

/// Abstraction over the physical link to the device
#[make(Send)]
pub trait Transport: Sync + 'static {
    /// Send `payload` to the endpoint identified by `path` and wait for the reply
    ///
    /// Fails with `TransportError::Timeout` if no reply arrives within `timeout`.
    async fn send_receive(
        &self,
        path: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> TransportResult<Vec<u8>>;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;

    /// Subscribe to connect/disconnect events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Tear down the link; in-flight requests fail with `Disconnected`
    async fn disconnect(&self) -> TransportResult<()>;
}
