//! Provisioning client facade

use std::{sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    core::{
        error::{ProvisionError, ProvisionResult, ScanError},
        provision::{PollOptions, Provisioner},
        scanner::{ScanOptions, WifiScanner},
        session::Session,
        types::{
            ApplyAck, ScanOutcome, SessionState, VersionInfo, WifiConfig, WifiScanResult,
            WifiStationState,
        },
    },
    security::Security,
    transport::{DEFAULT_REQUEST_TIMEOUT, Transport},
};

/// Timeouts and polling behaviour of a client
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub scan: ScanOptions,
    pub poll: PollOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            scan: ScanOptions::default(),
            poll: PollOptions::default(),
        }
    }
}

/// Provisioning client facade
///
/// Orchestrates the session, scanner and provisioner for one device.
pub struct ProvisioningClient<T: Transport> {
    pub session: Arc<Session<T>>,
    pub scanner: Arc<WifiScanner<T>>,
    pub provisioner: Arc<Provisioner<T>>,
    version: RwLock<Option<VersionInfo>>,
}

impl<T: Transport> ProvisioningClient<T> {
    /// Create a client for the device behind `transport`
    pub fn new(transport: Arc<T>, security: Security, options: ClientOptions) -> Self {
        let session = Arc::new(Session::new(transport, security, options.request_timeout));
        let scanner = Arc::new(WifiScanner::new(session.clone(), options.scan));
        let provisioner = Arc::new(Provisioner::new(session.clone(), options.poll));

        Self {
            session,
            scanner,
            provisioner,
            version: RwLock::new(None),
        }
    }

    /// Run the security handshake
    pub async fn establish_session(&self) -> ProvisionResult<()> {
        debug!(session_id = %self.session.id(), "Establishing session");
        Ok(self.session.establish().await?)
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.state().await
    }

    /// Query version and capabilities; the answer is kept for later decisions
    pub async fn get_version(&self) -> ProvisionResult<VersionInfo> {
        let info = self.provisioner.get_version().await?;
        *self.version.write().await = Some(info.clone());
        Ok(info)
    }

    /// Version info from the last successful query
    pub async fn version_info(&self) -> Option<VersionInfo> {
        self.version.read().await.clone()
    }

    /// Scan for access points through the device
    ///
    /// Devices whose structured version info lacks the scan capability are
    /// not asked; the outcome then carries `ScanError::Unsupported`.
    pub async fn scan_wifi(&self) -> ScanOutcome {
        if let Some(info) = self.version.read().await.as_ref() {
            if !info.should_scan() {
                info!("Device does not support WiFi scan, manual entry required");
                return ScanOutcome::failed(ScanError::Unsupported);
            }
        }
        self.scanner.start_scan().await
    }

    /// Whether the user must be asked for a passphrase before joining `network`
    pub async fn requires_passphrase(&self, network: &WifiScanResult) -> bool {
        match self.version.read().await.as_ref() {
            Some(info) => info.requires_passphrase(network),
            None => !network.is_open(),
        }
    }

    pub async fn configure_wifi(&self, config: &WifiConfig) -> ProvisionResult<ApplyAck> {
        self.provisioner.configure_wifi(config).await
    }

    /// See [`Provisioner::apply_configurations`]
    pub async fn apply_configurations<S, W>(&self, on_status: S, on_wifi_state: W)
    where
        S: FnOnce(ProvisionResult<ApplyAck>) + Send,
        W: FnMut(ProvisionResult<WifiStationState>) + Send,
    {
        self.provisioner
            .apply_configurations(on_status, on_wifi_state)
            .await
    }

    /// Configure, then apply only if the device accepted the configuration
    ///
    /// Returns the outcome of the apply request; WiFi states go to
    /// `on_wifi_state` as in [`Self::apply_configurations`]. A rejected
    /// configuration is returned without invoking `on_wifi_state`.
    pub async fn provision<W>(&self, config: &WifiConfig, on_wifi_state: W) -> ProvisionResult<ApplyAck>
    where
        W: FnMut(ProvisionResult<WifiStationState>) + Send,
    {
        if let Err(e) = self.configure_wifi(config).await {
            warn!("Configuration rejected: {}", e);
            return Err(e);
        }

        let mut applied = None;
        self.apply_configurations(|result| applied = Some(result), on_wifi_state)
            .await;

        applied.unwrap_or_else(|| {
            Err(ProvisionError::BadResponse(
                "apply status not delivered".into(),
            ))
        })
    }

    /// Close the session; the transport stays up
    pub async fn close(&self) {
        self.session.close().await;
    }
}
