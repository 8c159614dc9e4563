//! Secure channel establishment and payload protection
//!
//! Two schemes are supported: `sec0` exchanges a single hello and leaves
//! payloads in the clear, `sec1` runs an X25519 key exchange bound to a proof
//! of possession and seals every payload with ChaCha20-Poly1305.

pub mod cipher;
pub mod sec0;
pub mod sec1;

use std::time::Duration;

use tracing::debug;
use trait_variant::make;

use crate::{
    core::error::{SecurityError, SecurityResult},
    protocol::{self, SessionRequest, SessionResponse, endpoints},
    transport::Transport,
};

pub use {
    cipher::{Role, SessionCipher},
    sec0::Sec0,
    sec1::{Sec1, derive_session_key},
};

/// Handshake and per-payload protection over a transport
#[make(Send)]
pub trait SecureChannel: Send + Sync {
    /// Run the handshake against the device's session endpoint
    async fn handshake<T: Transport>(&mut self, transport: &T, timeout: Duration) -> SecurityResult<()>;

    fn encrypt(&mut self, plaintext: &[u8]) -> SecurityResult<Vec<u8>>;

    fn decrypt(&mut self, ciphertext: &[u8]) -> SecurityResult<Vec<u8>>;
}

/// Security scheme identifiers as exchanged with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityScheme {
    Sec0,
    Sec1,
}

impl TryFrom<u8> for SecurityScheme {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SecurityScheme::Sec0),
            1 => Ok(SecurityScheme::Sec1),
            other => Err(other),
        }
    }
}

/// Security selected for a session
#[derive(Debug)]
pub enum Security {
    Unsecured(Sec0),
    ProofOfPossession(Sec1),
}

impl Security {
    pub fn unsecured() -> Self {
        Security::Unsecured(Sec0::new())
    }

    pub fn proof_of_possession(pop: impl AsRef<[u8]>) -> Self {
        Security::ProofOfPossession(Sec1::new(pop))
    }

    /// Build the security for `scheme`; the PoP is ignored for `sec0`
    ///
    /// `sec1` needs a PoP, which may be empty for devices that advertise
    /// `no_pop`.
    pub fn for_scheme(scheme: SecurityScheme, pop: Option<&str>) -> SecurityResult<Self> {
        match (scheme, pop) {
            (SecurityScheme::Sec0, _) => Ok(Self::unsecured()),
            (SecurityScheme::Sec1, Some(pop)) => Ok(Self::proof_of_possession(pop)),
            (SecurityScheme::Sec1, None) => Err(SecurityError::MissingProofOfPossession),
        }
    }

    pub fn scheme(&self) -> SecurityScheme {
        match self {
            Security::Unsecured(_) => SecurityScheme::Sec0,
            Security::ProofOfPossession(_) => SecurityScheme::Sec1,
        }
    }
}

impl SecureChannel for Security {
    async fn handshake<T: Transport>(&mut self, transport: &T, timeout: Duration) -> SecurityResult<()> {
        match self {
            Security::Unsecured(sec) => sec.handshake(transport, timeout).await,
            Security::ProofOfPossession(sec) => sec.handshake(transport, timeout).await,
        }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> SecurityResult<Vec<u8>> {
        match self {
            Security::Unsecured(sec) => sec.encrypt(plaintext),
            Security::ProofOfPossession(sec) => sec.encrypt(plaintext),
        }
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> SecurityResult<Vec<u8>> {
        match self {
            Security::Unsecured(sec) => sec.decrypt(ciphertext),
            Security::ProofOfPossession(sec) => sec.decrypt(ciphertext),
        }
    }
}

/// One handshake round trip on the session endpoint
async fn session_round_trip<T: Transport>(
    transport: &T,
    request: &SessionRequest,
    timeout: Duration,
) -> SecurityResult<SessionResponse> {
    let payload =
        protocol::encode(request).map_err(|e| SecurityError::HandshakeMalformed(e.to_string()))?;

    let reply = transport
        .send_receive(endpoints::PROV_SESSION, &payload, timeout)
        .await?;
    debug!("Handshake reply: {} bytes", reply.len());

    protocol::decode(&reply).map_err(|e| SecurityError::HandshakeMalformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::error::TransportError, transport::MockDevice};

    #[test]
    fn test_scheme_from_u8() {
        assert_eq!(SecurityScheme::try_from(0), Ok(SecurityScheme::Sec0));
        assert_eq!(SecurityScheme::try_from(1), Ok(SecurityScheme::Sec1));
        assert_eq!(SecurityScheme::try_from(2), Err(2));
    }

    #[test]
    fn test_for_scheme() {
        let sec0 = Security::for_scheme(SecurityScheme::Sec0, None).unwrap();
        assert_eq!(sec0.scheme(), SecurityScheme::Sec0);

        let sec1 = Security::for_scheme(SecurityScheme::Sec1, Some("")).unwrap();
        assert_eq!(sec1.scheme(), SecurityScheme::Sec1);

        assert!(matches!(
            Security::for_scheme(SecurityScheme::Sec1, None),
            Err(SecurityError::MissingProofOfPossession)
        ));
    }

    #[tokio::test]
    async fn test_handshake_surfaces_transport_errors() {
        let device = MockDevice::sec1("abcd1234");
        device.disconnect_now().await;

        let mut security = Security::proof_of_possession("abcd1234");
        let err = security
            .handshake(&device, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err, SecurityError::Transport(TransportError::Disconnected));
    }
}
