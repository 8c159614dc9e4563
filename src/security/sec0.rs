//! Unsecured session: one hello round trip, payloads pass through unchanged

use std::time::Duration;

use tracing::info;

use crate::{
    core::error::{SecurityError, SecurityResult},
    protocol::{SessionRequest, SessionResponse},
    security::{SecureChannel, session_round_trip},
    transport::Transport,
};

#[derive(Debug, Default)]
pub struct Sec0;

impl Sec0 {
    pub fn new() -> Self {
        Sec0
    }
}

impl SecureChannel for Sec0 {
    async fn handshake<T: Transport>(&mut self, transport: &T, timeout: Duration) -> SecurityResult<()> {
        match session_round_trip(transport, &SessionRequest::Sec0, timeout).await? {
            SessionResponse::Sec0 { status } if status.is_success() => {
                info!("Unsecured session established");
                Ok(())
            }
            SessionResponse::Sec0 { status } => Err(SecurityError::HandshakeMalformed(format!(
                "device refused sec0 session: {:?}",
                status
            ))),
            other => Err(SecurityError::HandshakeMalformed(format!(
                "unexpected reply to sec0 hello: {:?}",
                other
            ))),
        }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> SecurityResult<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> SecurityResult<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockDevice;

    #[tokio::test]
    async fn test_handshake_and_identity() {
        let device = MockDevice::sec0();
        let mut sec = Sec0::new();

        sec.handshake(&device, Duration::from_secs(1)).await.unwrap();

        assert_eq!(sec.encrypt(b"abc").unwrap(), b"abc");
        assert_eq!(sec.decrypt(b"abc").unwrap(), b"abc");
        assert_eq!(device.request_count(), 1);
    }

    #[tokio::test]
    async fn test_sec1_device_refuses_sec0() {
        let device = MockDevice::sec1("abcd1234");
        let mut sec = Sec0::new();

        let err = sec.handshake(&device, Duration::from_secs(1)).await;
        assert!(matches!(err, Err(SecurityError::HandshakeMalformed(_))));
    }
}
