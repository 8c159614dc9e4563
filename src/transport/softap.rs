//! SoftAP transport: HTTP POST to the device's access point

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

use crate::{
    core::error::{TransportError, TransportResult},
    transport::{Transport, TransportEvent},
};

/// Default address of a device in SoftAP mode
pub const DEFAULT_BASE_URL: &str = "http://192.168.4.1:80";

/// Transport posting payloads to `base_url + endpoint path`
pub struct SoftApTransport {
    base_url: String,
    paths: BTreeMap<String, String>,
    client: reqwest::Client,
    connected: AtomicBool,
    teardown: Notify,
    events: broadcast::Sender<TransportEvent>,
}

impl SoftApTransport {
    /// Create a transport for the device at `base_url`
    ///
    /// `paths` maps endpoint identifiers to HTTP sub-paths.
    pub fn new(base_url: &str, paths: BTreeMap<String, String>) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .http1_only()
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let base_url = normalize_base_url(base_url);
        info!("SoftAP transport for {}", base_url);

        let (events, _) = broadcast::channel(16);

        Ok(Self {
            base_url,
            paths,
            client,
            connected: AtomicBool::new(true),
            teardown: Notify::new(),
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> TransportResult<String> {
        let sub_path = self
            .paths
            .get(path)
            .ok_or_else(|| TransportError::UnknownEndpoint(path.to_string()))?;
        Ok(format!(
            "{}/{}",
            self.base_url,
            sub_path.trim_start_matches('/')
        ))
    }

    async fn post(&self, url: &str, payload: &[u8], timeout: Duration) -> TransportResult<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Content-type", "application/x-www-form-urlencoded")
            .header("Accept", "text/plain")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!("Device answered {} for {}", status, url);
            return Err(TransportError::ServerError(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(body.to_vec())
    }
}

fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if let Some(status) = e.status() {
        TransportError::ServerError(status.as_u16())
    } else {
        TransportError::Unreachable(e.to_string())
    }
}

impl Transport for SoftApTransport {
    async fn send_receive(
        &self,
        path: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> TransportResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let url = self.url_for(path)?;
        debug!("POST {} ({} bytes)", url, payload.len());

        tokio::select! {
            result = self.post(&url, payload, timeout) => result,
            _ = self.teardown.notified() => Err(TransportError::Disconnected),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("SoftAP transport torn down");
            self.teardown.notify_waiters();
            let _ = self.events.send(TransportEvent::Disconnected);
        }
        Ok(())
    }
}
