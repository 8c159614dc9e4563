//! Version query, WiFi configuration and connection monitoring

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    core::{
        error::{ProvisionError, ProvisionResult},
        session::Session,
        types::{ApplyAck, VersionInfo, WifiConfig, WifiStationState},
    },
    protocol::{
        self, ConfigRequest, ConfigResponse, CustomConfigRequest, CustomConfigResponse,
        VERSION_PROBE, endpoints, parse_version_info,
    },
    transport::Transport,
};

/// Default pause between station state polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of station state polls before giving up
pub const DEFAULT_MAX_POLLS: u32 = 15;

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

/// Issues provisioning requests over an established session
pub struct Provisioner<T: Transport> {
    session: Arc<Session<T>>,
    poll: PollOptions,
}

impl<T: Transport> Provisioner<T> {
    pub fn new(session: Arc<Session<T>>, poll: PollOptions) -> Self {
        Self { session, poll }
    }

    /// Query version and capabilities
    ///
    /// Goes straight to the transport unencrypted, so it works before the
    /// session is established.
    pub async fn get_version(&self) -> ProvisionResult<VersionInfo> {
        let reply = self
            .session
            .transport()
            .send_receive(
                endpoints::PROTO_VER,
                VERSION_PROBE,
                self.session.request_timeout(),
            )
            .await?;

        let info = parse_version_info(&reply);
        info!(
            version = ?info.version,
            force_authentication = info.force_authentication,
            "Device version info"
        );
        Ok(info)
    }

    /// Send WiFi credentials, preceded by any custom configuration
    pub async fn configure_wifi(&self, config: &WifiConfig) -> ProvisionResult<ApplyAck> {
        if let Some(extra) = config.extra.as_ref().filter(|extra| !extra.is_empty()) {
            self.send_custom_config(extra.clone()).await?;
        }

        info!("Sending WiFi config for '{}'", config.ssid);
        let request = ConfigRequest::SetConfig {
            ssid: config.ssid.as_bytes().to_vec(),
            passphrase: config.passphrase.as_bytes().to_vec(),
            bssid: None,
            channel: None,
        };
        match self.config_round_trip(&request).await? {
            ConfigResponse::SetConfig { status } => ack(status),
            other => Err(unexpected("SetConfig", &other)),
        }
    }

    async fn send_custom_config(
        &self,
        entries: std::collections::BTreeMap<String, String>,
    ) -> ProvisionResult<()> {
        debug!("Sending {} custom config entries", entries.len());
        let payload = protocol::encode(&CustomConfigRequest { entries })?;
        let reply = self
            .session
            .request(endpoints::CUSTOM_CONFIG, &payload)
            .await?;
        let response: CustomConfigResponse = protocol::decode(&reply)?;
        ack(response.status).map(|_| ())
    }

    /// Apply the stored configuration and follow the connection attempt
    ///
    /// `on_status` receives the outcome of the apply request exactly once.
    /// `on_wifi_state` receives every non-terminal state as it is polled, then
    /// exactly one terminal value: `Connected`, `ConnectionFailed` or an
    /// error. If the apply request itself fails, both callbacks get that error.
    pub async fn apply_configurations<S, W>(&self, on_status: S, mut on_wifi_state: W)
    where
        S: FnOnce(ProvisionResult<ApplyAck>) + Send,
        W: FnMut(ProvisionResult<WifiStationState>) + Send,
    {
        let applied = match self.config_round_trip(&ConfigRequest::ApplyConfig).await {
            Ok(ConfigResponse::ApplyConfig { status }) => ack(status),
            Ok(other) => Err(unexpected("ApplyConfig", &other)),
            Err(e) => Err(e),
        };

        match applied {
            Ok(applied) => on_status(Ok(applied)),
            Err(e) => {
                warn!("Apply failed: {}", e);
                on_status(Err(e.clone()));
                on_wifi_state(Err(e));
                return;
            }
        }

        for poll in 1..=self.poll.max_polls {
            tokio::time::sleep(self.poll.interval).await;

            match self.get_wifi_state().await {
                Ok(state) if state.is_terminal() => {
                    info!("WiFi state after {} polls: {:?}", poll, state);
                    on_wifi_state(Ok(state));
                    return;
                }
                Ok(state) => {
                    debug!("WiFi state poll {}: {:?}", poll, state);
                    on_wifi_state(Ok(state));
                }
                Err(e) => {
                    warn!("WiFi state poll failed: {}", e);
                    on_wifi_state(Err(e));
                    return;
                }
            }
        }

        warn!("No terminal WiFi state after {} polls", self.poll.max_polls);
        on_wifi_state(Err(ProvisionError::PollTimeout {
            polls: self.poll.max_polls,
        }));
    }

    /// Query the device's current station state
    pub async fn get_wifi_state(&self) -> ProvisionResult<WifiStationState> {
        match self.config_round_trip(&ConfigRequest::GetStatus).await? {
            ConfigResponse::GetStatus { status, state } => {
                ack(status)?;
                Ok(state)
            }
            other => Err(unexpected("GetStatus", &other)),
        }
    }

    async fn config_round_trip(&self, request: &ConfigRequest) -> ProvisionResult<ConfigResponse> {
        let payload = protocol::encode(request)?;
        let reply = self
            .session
            .request(endpoints::PROV_CONFIG, &payload)
            .await?;
        Ok(protocol::decode(&reply)?)
    }
}

fn ack(status: protocol::Status) -> ProvisionResult<ApplyAck> {
    if status.is_success() {
        Ok(ApplyAck { status })
    } else {
        Err(ProvisionError::DeviceRejected(status))
    }
}

fn unexpected(expected: &str, got: &ConfigResponse) -> ProvisionError {
    ProvisionError::BadResponse(format!("expected {} response, got {:?}", expected, got))
}
