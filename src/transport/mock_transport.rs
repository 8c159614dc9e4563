//! Simulated device firmware for testing
//!
//! `MockDevice` is a [`Transport`] whose far end behaves like a provisioning
//! device: it answers the version probe, runs the sec0/sec1 handshakes, pages
//! scan results and reports a scripted sequence of station states.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{Mutex, Notify, broadcast};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::{
    core::{
        error::{TransportError, TransportResult},
        types::WifiStationState,
    },
    protocol::{
        self, ConfigRequest, ConfigResponse, CustomConfigRequest, CustomConfigResponse,
        ScanRequest, ScanResponse, SessionRequest, SessionResponse, Status, WifiScanEntry,
        endpoints,
    },
    security::{Role, SecurityScheme, SessionCipher, derive_session_key},
    transport::{Transport, TransportEvent},
};

/// Handshake progress on the device side
enum DeviceSession {
    None,
    Plain,
    Pending {
        device_pubkey: [u8; 32],
        client_pubkey: [u8; 32],
        cipher: SessionCipher,
    },
    Secure(SessionCipher),
}

/// Internal state for the mock device
struct MockState {
    scheme: SecurityScheme,
    pop: Vec<u8>,
    session: DeviceSession,
    version_response: Vec<u8>,
    scan_entries: Vec<WifiScanEntry>,
    scan_status: Status,
    scan_polls_until_finished: u32,
    scan_polls: u32,
    config_status: Status,
    apply_status: Status,
    custom_status: Status,
    station_states: VecDeque<WifiStationState>,
    status_polls: u32,
    disconnect_after_status_polls: Option<u32>,
    reply_delay: Option<Duration>,
    stored_config: Option<(String, String)>,
    custom_entries: Option<BTreeMap<String, String>>,
    request_log: Vec<String>,
}

struct Shared {
    state: Mutex<MockState>,
    connected: AtomicBool,
    requests: AtomicUsize,
    teardown: Notify,
    events: broadcast::Sender<TransportEvent>,
}

/// Mock provisioning device
///
/// Clones share the same simulated device, so a test can keep a handle for
/// configuration and inspection after handing one to a session.
#[derive(Clone)]
pub struct MockDevice {
    shared: Arc<Shared>,
}

impl MockDevice {
    fn new(scheme: SecurityScheme, pop: &[u8]) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    scheme,
                    pop: pop.to_vec(),
                    session: DeviceSession::None,
                    version_response: br#"{"prov":{"ver":"v1.1","cap":["wifi_scan"]}}"#.to_vec(),
                    scan_entries: vec![],
                    scan_status: Status::Success,
                    scan_polls_until_finished: 1,
                    scan_polls: 0,
                    config_status: Status::Success,
                    apply_status: Status::Success,
                    custom_status: Status::Success,
                    station_states: VecDeque::from([WifiStationState::Connected]),
                    status_polls: 0,
                    disconnect_after_status_polls: None,
                    reply_delay: None,
                    stored_config: None,
                    custom_entries: None,
                    request_log: vec![],
                }),
                connected: AtomicBool::new(true),
                requests: AtomicUsize::new(0),
                teardown: Notify::new(),
                events,
            }),
        }
    }

    /// Device accepting unsecured sessions
    pub fn sec0() -> Self {
        Self::new(SecurityScheme::Sec0, b"")
    }

    /// Device requiring a sec1 handshake with the given proof of possession
    pub fn sec1(pop: &str) -> Self {
        Self::new(SecurityScheme::Sec1, pop.as_bytes())
    }

    /// Raw bytes returned by the version endpoint
    pub async fn set_version_response(&self, response: &[u8]) {
        self.shared.state.lock().await.version_response = response.to_vec();
    }

    pub async fn set_scan_entries(&self, entries: Vec<WifiScanEntry>) {
        self.shared.state.lock().await.scan_entries = entries;
    }

    /// Status returned by every scan request
    pub async fn set_scan_status(&self, status: Status) {
        self.shared.state.lock().await.scan_status = status;
    }

    /// Number of status polls before the scan reports finished
    pub async fn set_scan_duration(&self, polls: u32) {
        self.shared.state.lock().await.scan_polls_until_finished = polls;
    }

    pub async fn set_config_status(&self, status: Status) {
        self.shared.state.lock().await.config_status = status;
    }

    pub async fn set_apply_status(&self, status: Status) {
        self.shared.state.lock().await.apply_status = status;
    }

    pub async fn set_custom_status(&self, status: Status) {
        self.shared.state.lock().await.custom_status = status;
    }

    /// States reported by successive status polls; the last one repeats
    pub async fn set_station_states(&self, states: Vec<WifiStationState>) {
        self.shared.state.lock().await.station_states = states.into();
    }

    /// Drop the link on the status poll following the first `polls` answered ones
    pub async fn disconnect_after_status_polls(&self, polls: u32) {
        self.shared.state.lock().await.disconnect_after_status_polls = Some(polls);
    }

    pub async fn set_reply_delay(&self, delay: Duration) {
        self.shared.state.lock().await.reply_delay = Some(delay);
    }

    /// Simulate the device going out of range
    pub async fn disconnect_now(&self) {
        self.drop_link();
    }

    /// Number of requests that reached the transport while connected
    pub fn request_count(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Endpoint paths in the order they were requested
    pub async fn request_log(&self) -> Vec<String> {
        self.shared.state.lock().await.request_log.clone()
    }

    /// Credentials stored by the last `SetConfig`
    pub async fn stored_config(&self) -> Option<(String, String)> {
        self.shared.state.lock().await.stored_config.clone()
    }

    pub async fn custom_entries(&self) -> Option<BTreeMap<String, String>> {
        self.shared.state.lock().await.custom_entries.clone()
    }

    pub async fn status_polls(&self) -> u32 {
        self.shared.state.lock().await.status_polls
    }

    fn drop_link(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.teardown.notify_waiters();
            let _ = self.shared.events.send(TransportEvent::Disconnected);
        }
    }

    async fn handle(&self, path: &str, payload: &[u8]) -> TransportResult<Vec<u8>> {
        let mut state = self.shared.state.lock().await;
        state.request_log.push(path.to_string());

        match path {
            endpoints::PROTO_VER => Ok(state.version_response.clone()),
            endpoints::PROV_SESSION => {
                let request = decode(payload)?;
                encode(&state.handle_session(request))
            }
            endpoints::PROV_CONFIG => {
                let request = state.open(payload)?;
                let response = match state.handle_config(request) {
                    Some(response) => response,
                    None => {
                        drop(state);
                        self.drop_link();
                        return Err(TransportError::Disconnected);
                    }
                };
                state.seal(&response)
            }
            endpoints::PROV_SCAN => {
                let request = state.open(payload)?;
                let response = state.handle_scan(request);
                state.seal(&response)
            }
            endpoints::CUSTOM_CONFIG => {
                let request: CustomConfigRequest = state.open(payload)?;
                state.custom_entries = Some(request.entries);
                let response = CustomConfigResponse {
                    status: state.custom_status,
                };
                state.seal(&response)
            }
            other => Err(TransportError::UnknownEndpoint(other.to_string())),
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> TransportResult<T> {
    protocol::decode(payload).map_err(|_| TransportError::ServerError(400))
}

fn encode<T: Serialize>(message: &T) -> TransportResult<Vec<u8>> {
    protocol::encode(message).map_err(|_| TransportError::ServerError(500))
}

impl MockState {
    fn handle_session(&mut self, request: SessionRequest) -> SessionResponse {
        match (request, self.scheme) {
            (SessionRequest::Sec0, SecurityScheme::Sec0) => {
                self.session = DeviceSession::Plain;
                SessionResponse::Sec0 {
                    status: Status::Success,
                }
            }
            (SessionRequest::Sec0, SecurityScheme::Sec1) => SessionResponse::Sec0 {
                status: Status::InvalidSecScheme,
            },
            (SessionRequest::Command0 { client_pubkey }, SecurityScheme::Sec1) => {
                let secret = EphemeralSecret::random_from_rng(OsRng);
                let device_pubkey = PublicKey::from(&secret).to_bytes();
                let mut device_random = [0u8; 16];
                OsRng.fill_bytes(&mut device_random);

                let shared = secret.diffie_hellman(&PublicKey::from(client_pubkey));
                let key = derive_session_key(shared.as_bytes(), &self.pop, &device_random);
                self.session = DeviceSession::Pending {
                    device_pubkey,
                    client_pubkey,
                    cipher: SessionCipher::new(&key, Role::Device),
                };

                SessionResponse::Response0 {
                    status: Status::Success,
                    device_pubkey,
                    device_random,
                }
            }
            (SessionRequest::Command0 { .. }, SecurityScheme::Sec0) => SessionResponse::Response0 {
                status: Status::InvalidSecScheme,
                device_pubkey: [0; 32],
                device_random: [0; 16],
            },
            (SessionRequest::Command1 { client_verify }, _) => {
                let rejected = SessionResponse::Response1 {
                    status: Status::CryptoError,
                    device_verify: vec![],
                };
                let DeviceSession::Pending {
                    device_pubkey,
                    client_pubkey,
                    mut cipher,
                } = std::mem::replace(&mut self.session, DeviceSession::None)
                else {
                    return SessionResponse::Response1 {
                        status: Status::InvalidSession,
                        device_verify: vec![],
                    };
                };

                match cipher.open(&client_verify) {
                    Ok(token) if token == device_pubkey => {}
                    _ => return rejected,
                }
                let Ok(device_verify) = cipher.seal(&client_pubkey) else {
                    return rejected;
                };

                self.session = DeviceSession::Secure(cipher);
                SessionResponse::Response1 {
                    status: Status::Success,
                    device_verify,
                }
            }
        }
    }

    /// `None` means the device drops the link instead of answering
    fn handle_config(&mut self, request: ConfigRequest) -> Option<ConfigResponse> {
        let response = match request {
            ConfigRequest::GetStatus => {
                if let Some(limit) = self.disconnect_after_status_polls {
                    if self.status_polls >= limit {
                        return None;
                    }
                }
                self.status_polls += 1;

                let state = if self.station_states.len() > 1 {
                    self.station_states.pop_front()
                } else {
                    self.station_states.front().copied()
                };
                ConfigResponse::GetStatus {
                    status: Status::Success,
                    state: state.unwrap_or(WifiStationState::Connecting),
                }
            }
            ConfigRequest::SetConfig {
                ssid, passphrase, ..
            } => {
                if self.config_status.is_success() {
                    self.stored_config = Some((
                        String::from_utf8_lossy(&ssid).into_owned(),
                        String::from_utf8_lossy(&passphrase).into_owned(),
                    ));
                }
                ConfigResponse::SetConfig {
                    status: self.config_status,
                }
            }
            ConfigRequest::ApplyConfig => ConfigResponse::ApplyConfig {
                status: self.apply_status,
            },
        };
        Some(response)
    }

    fn handle_scan(&mut self, request: ScanRequest) -> ScanResponse {
        match request {
            ScanRequest::Start { .. } => {
                self.scan_polls = 0;
                ScanResponse::Start {
                    status: self.scan_status,
                }
            }
            ScanRequest::Status => {
                self.scan_polls += 1;
                ScanResponse::Status {
                    status: self.scan_status,
                    finished: self.scan_polls >= self.scan_polls_until_finished,
                    result_count: self.scan_entries.len().min(u8::MAX as usize) as u8,
                }
            }
            ScanRequest::Result { start_index, count } => {
                let entries = self
                    .scan_entries
                    .iter()
                    .skip(start_index as usize)
                    .take(count as usize)
                    .cloned()
                    .collect();
                ScanResponse::Result {
                    status: self.scan_status,
                    entries,
                }
            }
        }
    }

    /// Decrypt and decode a request on an established session
    fn open<T: DeserializeOwned>(&mut self, payload: &[u8]) -> TransportResult<T> {
        let plaintext = match &mut self.session {
            DeviceSession::Plain => payload.to_vec(),
            DeviceSession::Secure(cipher) => cipher
                .open(payload)
                .map_err(|_| TransportError::ServerError(401))?,
            DeviceSession::None | DeviceSession::Pending { .. } => {
                return Err(TransportError::ServerError(401));
            }
        };
        decode(&plaintext)
    }

    fn seal<T: Serialize>(&mut self, response: &T) -> TransportResult<Vec<u8>> {
        let plaintext = encode(response)?;
        match &mut self.session {
            DeviceSession::Secure(cipher) => cipher
                .seal(&plaintext)
                .map_err(|_| TransportError::ServerError(500)),
            _ => Ok(plaintext),
        }
    }
}

impl Transport for MockDevice {
    async fn send_receive(
        &self,
        path: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> TransportResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.shared.requests.fetch_add(1, Ordering::SeqCst);

        let exchange = async {
            let delay = self.shared.state.lock().await.reply_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.handle(path, payload).await
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, exchange) => {
                result.map_err(|_| TransportError::Timeout)?
            }
            _ = self.shared.teardown.notified() => Err(TransportError::Disconnected),
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.drop_link();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_version_probe_needs_no_session() {
        let device = MockDevice::sec1("pop");
        device.set_version_response(b"success").await;

        let reply = device
            .send_receive(endpoints::PROTO_VER, b"V0.2", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(reply, b"success");
    }

    #[tokio::test]
    async fn test_config_refused_without_session() {
        let device = MockDevice::sec0();
        let payload = protocol::encode(&ConfigRequest::GetStatus).unwrap();

        let err = device
            .send_receive(endpoints::PROV_CONFIG, &payload, TIMEOUT)
            .await;
        assert_eq!(err, Err(TransportError::ServerError(401)));
    }

    #[tokio::test]
    async fn test_station_states_in_order_last_repeats() {
        let device = MockDevice::sec0();
        device
            .set_station_states(vec![
                WifiStationState::Connecting,
                WifiStationState::Connected,
            ])
            .await;

        let hello = protocol::encode(&SessionRequest::Sec0).unwrap();
        device
            .send_receive(endpoints::PROV_SESSION, &hello, TIMEOUT)
            .await
            .unwrap();

        let poll = protocol::encode(&ConfigRequest::GetStatus).unwrap();
        let mut seen = vec![];
        for _ in 0..3 {
            let reply = device
                .send_receive(endpoints::PROV_CONFIG, &poll, TIMEOUT)
                .await
                .unwrap();
            match protocol::decode::<ConfigResponse>(&reply).unwrap() {
                ConfigResponse::GetStatus { state, .. } => seen.push(state),
                other => panic!("unexpected response {:?}", other),
            }
        }

        assert_eq!(
            seen,
            vec![
                WifiStationState::Connecting,
                WifiStationState::Connected,
                WifiStationState::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_and_fails_requests() {
        let device = MockDevice::sec0();
        let mut events = device.subscribe();

        device.disconnect_now().await;

        assert_eq!(events.recv().await.unwrap(), TransportEvent::Disconnected);
        assert_eq!(
            device.send_receive(endpoints::PROTO_VER, b"V0.2", TIMEOUT).await,
            Err(TransportError::Disconnected)
        );
        assert_eq!(device.request_count(), 0);
    }

    #[tokio::test]
    async fn test_reply_delay_times_out() {
        let device = MockDevice::sec0();
        device.set_reply_delay(Duration::from_millis(200)).await;

        let err = device
            .send_receive(endpoints::PROTO_VER, b"V0.2", Duration::from_millis(20))
            .await;
        assert_eq!(err, Err(TransportError::Timeout));
    }
}
