//! Provisioning session: secure channel lifecycle over a transport

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, RwLock, broadcast::error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    core::{
        error::{SessionError, SessionResult, TransportError},
        types::{SessionId, SessionState},
    },
    security::{SecureChannel, Security, SecurityScheme},
    transport::{Transport, TransportEvent},
};

/// Session state machine
///
/// `Uninitialized -> Handshaking -> Established -> Closed`. A failed handshake
/// also ends in `Closed`, which is terminal.
#[derive(Debug)]
struct SessionStateMachine {
    state: SessionState,
}

impl SessionStateMachine {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    fn begin_handshake(&mut self) -> SessionResult<bool> {
        match self.state {
            SessionState::Uninitialized => {
                self.state = SessionState::Handshaking;
                Ok(true)
            }
            SessionState::Established => Ok(false),
            SessionState::Closed => Err(SessionError::Closed),
            // Left behind by a cancelled handshake
            SessionState::Handshaking => Ok(true),
        }
    }

    fn complete_handshake(&mut self) {
        if self.state == SessionState::Handshaking {
            self.state = SessionState::Established;
        }
    }

    fn close(&mut self) -> bool {
        let was_open = self.state != SessionState::Closed;
        self.state = SessionState::Closed;
        was_open
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

/// Secure channel plus the bookkeeping of its nonce sequence
#[derive(Debug)]
struct Channel {
    security: Security,
    /// A sealed request went out and its reply has not been opened yet
    in_flight: bool,
}

impl Channel {
    /// Whether each sealed payload advances a nonce counter shared with the device
    fn is_sequenced(&self) -> bool {
        self.security.scheme() == SecurityScheme::Sec1
    }
}

/// Secured request/response session with one device
///
/// Requests are serialized: the secure channel lock is held across each round
/// trip. The session never tears down the transport itself.
///
/// With `sec1` a sealed request that gets no decryptable reply (transport
/// error, timeout, or a cancelled request future) leaves the nonce counters
/// of both ends out of step, so the session is closed.
pub struct Session<T: Transport> {
    id: SessionId,
    transport: Arc<T>,
    channel: Mutex<Channel>,
    state_machine: Arc<RwLock<SessionStateMachine>>,
    request_timeout: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: Arc<T>, security: Security, request_timeout: Duration) -> Self {
        let id = SessionId::new();
        debug!(session_id = %id, scheme = ?security.scheme(), "Session created");

        Self {
            id,
            transport,
            channel: Mutex::new(Channel {
                security,
                in_flight: false,
            }),
            state_machine: Arc::new(RwLock::new(SessionStateMachine::new())),
            request_timeout,
            watcher: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn state(&self) -> SessionState {
        self.state_machine.read().await.state()
    }

    pub async fn is_established(&self) -> bool {
        self.state().await == SessionState::Established
    }

    /// Run the security handshake
    ///
    /// Establishing an already established session is a no-op. A failed
    /// handshake closes the session for good.
    pub async fn establish(&self) -> SessionResult<()> {
        let mut channel = self.channel.lock().await;

        if !self.state_machine.write().await.begin_handshake()? {
            return Ok(());
        }
        info!(session_id = %self.id, "Starting handshake");

        let events = self.transport.subscribe();
        if let Err(e) = channel
            .security
            .handshake(self.transport.as_ref(), self.request_timeout)
            .await
        {
            warn!(session_id = %self.id, "Handshake failed: {}", e);
            self.state_machine.write().await.close();
            return Err(e.into());
        }

        if !self.transport.is_connected() {
            self.state_machine.write().await.close();
            return Err(SessionError::Transport(TransportError::Disconnected));
        }

        self.state_machine.write().await.complete_handshake();
        *self.watcher.lock().await = Some(self.watch_transport(events));
        info!(session_id = %self.id, "Session established");
        Ok(())
    }

    /// Close the session once the transport reports a disconnect
    fn watch_transport(
        &self,
        mut events: tokio::sync::broadcast::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let state_machine = self.state_machine.clone();
        let id = self.id;

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Disconnected) | Err(RecvError::Closed) => break,
                    Ok(TransportEvent::Connected) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(session_id = %id, "Skipped {} transport events", skipped);
                    }
                }
            }
            if state_machine.write().await.close() {
                warn!(session_id = %id, "Transport disconnected, session closed");
            }
        })
    }

    /// Send an encrypted request to `path` and return the decrypted reply
    ///
    /// Fails with `NotEstablished` without touching the transport unless the
    /// session is established.
    pub async fn request(&self, path: &str, payload: &[u8]) -> SessionResult<Vec<u8>> {
        if !self.is_established().await {
            return Err(SessionError::NotEstablished);
        }

        let mut channel = self.channel.lock().await;
        if !self.is_established().await {
            return Err(SessionError::NotEstablished);
        }
        if channel.in_flight {
            warn!(session_id = %self.id, "Previous request was abandoned mid-flight");
            self.close_state().await;
            return Err(SessionError::NotEstablished);
        }

        debug!(session_id = %self.id, path, "Request: {} bytes", payload.len());
        let sequenced = channel.is_sequenced();
        let sealed = channel.security.encrypt(payload)?;
        channel.in_flight = sequenced;

        let reply = match self
            .transport
            .send_receive(path, &sealed, self.request_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                if sequenced || e == TransportError::Disconnected {
                    warn!(session_id = %self.id, path, "Request failed: {}", e);
                    self.close_state().await;
                }
                return Err(e.into());
            }
        };

        match channel.security.decrypt(&reply) {
            Ok(plaintext) => {
                channel.in_flight = false;
                debug!(session_id = %self.id, path, "Reply: {} bytes", plaintext.len());
                Ok(plaintext)
            }
            Err(e) => {
                warn!(session_id = %self.id, path, "Reply failed to decrypt");
                self.close_state().await;
                Err(e.into())
            }
        }
    }

    /// Close the session; the transport stays up
    pub async fn close(&self) {
        self.close_state().await;
        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
    }

    async fn close_state(&self) {
        if self.state_machine.write().await.close() {
            info!(session_id = %self.id, "Session closed");
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::error::SecurityError,
        protocol::{self, ConfigRequest, ConfigResponse, endpoints},
        transport::MockDevice,
    };
    use pretty_assertions::assert_eq;

    const POP: &str = "abcd1234";
    const TIMEOUT: Duration = Duration::from_secs(1);

    fn session(device: &MockDevice, security: Security) -> Session<MockDevice> {
        Session::new(Arc::new(device.clone()), security, TIMEOUT)
    }

    async fn get_status(session: &Session<MockDevice>) -> SessionResult<ConfigResponse> {
        let payload = protocol::encode(&ConfigRequest::GetStatus).unwrap();
        let reply = session.request(endpoints::PROV_CONFIG, &payload).await?;
        Ok(protocol::decode(&reply).unwrap())
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.state(), SessionState::Uninitialized);

        assert_eq!(sm.begin_handshake(), Ok(true));
        assert_eq!(sm.state(), SessionState::Handshaking);

        sm.complete_handshake();
        assert_eq!(sm.state(), SessionState::Established);
        assert_eq!(sm.begin_handshake(), Ok(false));

        assert!(sm.close());
        assert!(!sm.close());
        assert_eq!(sm.begin_handshake(), Err(SessionError::Closed));

        // A close during the handshake wins
        let mut sm = SessionStateMachine::new();
        sm.begin_handshake().unwrap();
        sm.close();
        sm.complete_handshake();
        assert_eq!(sm.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_request_before_establish_does_no_io() {
        let device = MockDevice::sec1(POP);
        let session = session(&device, Security::proof_of_possession(POP));

        let err = session.request(endpoints::PROV_CONFIG, b"anything").await;

        assert_eq!(err, Err(SessionError::NotEstablished));
        assert_eq!(device.request_count(), 0);
    }

    #[tokio::test]
    async fn test_establish_sec0() {
        let device = MockDevice::sec0();
        let session = session(&device, Security::unsecured());

        session.establish().await.unwrap();
        assert!(session.is_established().await);

        let response = get_status(&session).await.unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_establish_sec1_and_request() {
        let device = MockDevice::sec1(POP);
        let session = session(&device, Security::proof_of_possession(POP));

        session.establish().await.unwrap();
        assert_eq!(session.state().await, SessionState::Established);

        for _ in 0..3 {
            let response = get_status(&session).await.unwrap();
            assert!(response.status().is_success());
        }

        // Re-establishing is a no-op
        let before = device.request_count();
        session.establish().await.unwrap();
        assert_eq!(device.request_count(), before);
    }

    #[tokio::test]
    async fn test_wrong_pop_never_establishes() {
        let device = MockDevice::sec1(POP);
        let session = session(&device, Security::proof_of_possession("00000000"));

        let err = session.establish().await;
        assert_eq!(
            err,
            Err(SessionError::Security(SecurityError::AuthFailed))
        );
        assert_eq!(session.state().await, SessionState::Closed);

        let requests = device.request_count();
        assert_eq!(
            session.request(endpoints::PROV_CONFIG, b"x").await,
            Err(SessionError::NotEstablished)
        );
        assert_eq!(device.request_count(), requests);

        // Not retried
        assert_eq!(session.establish().await, Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn test_transport_disconnect_closes_session() {
        let device = MockDevice::sec0();
        let session = session(&device, Security::unsecured());
        session.establish().await.unwrap();

        device.disconnect_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(session.state().await, SessionState::Closed);
        assert_eq!(
            session.request(endpoints::PROV_CONFIG, b"x").await,
            Err(SessionError::NotEstablished)
        );
    }

    #[tokio::test]
    async fn test_disconnect_fails_in_flight_request_once() {
        let device = MockDevice::sec1(POP);
        let session = Arc::new(session(&device, Security::proof_of_possession(POP)));
        session.establish().await.unwrap();
        device.set_reply_delay(Duration::from_millis(500)).await;

        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { get_status(&session).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.disconnect_now().await;

        assert_eq!(
            in_flight.await.unwrap(),
            Err(SessionError::Transport(TransportError::Disconnected))
        );
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_serialized() {
        let device = MockDevice::sec1(POP);
        let session = Arc::new(session(&device, Security::proof_of_possession(POP)));
        session.establish().await.unwrap();
        device.set_reply_delay(Duration::from_millis(10)).await;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { get_status(&session).await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert!(session.is_established().await);
    }

    #[tokio::test]
    async fn test_sec0_timeout_keeps_session_open() {
        let device = MockDevice::sec0();
        let session = session(&device, Security::unsecured());
        session.establish().await.unwrap();
        device.set_reply_delay(Duration::from_secs(5)).await;

        let err = tokio::time::timeout(Duration::from_secs(3), get_status(&session))
            .await
            .unwrap();

        assert_eq!(err, Err(SessionError::Transport(TransportError::Timeout)));
        assert!(session.is_established().await);
    }

    #[tokio::test]
    async fn test_sec1_timeout_closes_session() {
        let device = MockDevice::sec1(POP);
        let session = Session::new(
            Arc::new(device.clone()),
            Security::proof_of_possession(POP),
            Duration::from_millis(100),
        );
        session.establish().await.unwrap();
        device.set_reply_delay(Duration::from_millis(300)).await;

        assert_eq!(
            get_status(&session).await,
            Err(SessionError::Transport(TransportError::Timeout))
        );
        assert_eq!(session.state().await, SessionState::Closed);

        device.set_reply_delay(Duration::ZERO).await;
        let requests = device.request_count();
        assert_eq!(
            get_status(&session).await,
            Err(SessionError::NotEstablished)
        );
        assert_eq!(device.request_count(), requests);
    }

    #[tokio::test]
    async fn test_sec1_transport_error_closes_session() {
        let device = MockDevice::sec1(POP);
        let session = session(&device, Security::proof_of_possession(POP));
        session.establish().await.unwrap();

        // Unknown to the device
        let err = session.request("no-such-endpoint", b"x").await;

        assert!(matches!(err, Err(SessionError::Transport(_))));
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_sec1_request_closes_session() {
        let device = MockDevice::sec1(POP);
        let session = session(&device, Security::proof_of_possession(POP));
        session.establish().await.unwrap();
        device.set_reply_delay(Duration::from_millis(300)).await;

        let cancelled = tokio::time::timeout(Duration::from_millis(50), get_status(&session)).await;
        assert!(cancelled.is_err());
        device.set_reply_delay(Duration::ZERO).await;

        assert_eq!(
            get_status(&session).await,
            Err(SessionError::NotEstablished)
        );
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_explicit_close() {
        let device = MockDevice::sec0();
        let session = session(&device, Security::unsecured());
        session.establish().await.unwrap();

        session.close().await;

        assert_eq!(session.state().await, SessionState::Closed);
        assert!(device.is_connected());
    }
}
