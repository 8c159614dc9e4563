//! Proof-of-possession session (sec1)
//!
//! 1. `Command0` carries the client's ephemeral X25519 public key.
//! 2. `Response0` returns the device public key and a 16 byte random.
//! 3. Both ends derive the session key from the shared secret, the PoP hash
//!    and the device random.
//! 4. `Command1` proves the client knows the key by sealing the device public
//!    key; `Response1` does the same the other way round.

use std::time::Duration;

use rand::rngs::OsRng;
use sha3::{Digest, Sha3_256};
use tracing::{debug, info, warn};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::{
    core::error::{SecurityError, SecurityResult},
    protocol::{SessionRequest, SessionResponse},
    security::{Role, SecureChannel, SessionCipher, session_round_trip},
    transport::Transport,
};

const KEY_DOMAIN: &[u8] = b"wifi-provisioning/sec1/session-key";

/// Session key = SHA3-256(domain || shared || SHA3-256(pop) || device_random)
pub fn derive_session_key(shared: &[u8; 32], pop: &[u8], device_random: &[u8; 16]) -> [u8; 32] {
    let pop_hash = Sha3_256::digest(pop);

    let mut hasher = Sha3_256::new();
    hasher.update(KEY_DOMAIN);
    hasher.update(shared);
    hasher.update(pop_hash);
    hasher.update(device_random);
    hasher.finalize().into()
}

pub struct Sec1 {
    pop: Vec<u8>,
    cipher: Option<SessionCipher>,
}

impl Sec1 {
    pub fn new(pop: impl AsRef<[u8]>) -> Self {
        Self {
            pop: pop.as_ref().to_vec(),
            cipher: None,
        }
    }

    fn cipher(&mut self) -> SecurityResult<&mut SessionCipher> {
        self.cipher
            .as_mut()
            .ok_or_else(|| SecurityError::HandshakeMalformed("handshake not completed".into()))
    }
}

impl std::fmt::Debug for Sec1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sec1")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl SecureChannel for Sec1 {
    async fn handshake<T: Transport>(&mut self, transport: &T, timeout: Duration) -> SecurityResult<()> {
        self.cipher = None;

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let client_public = PublicKey::from(&secret);

        let request = SessionRequest::Command0 {
            client_pubkey: client_public.to_bytes(),
        };
        let (device_pubkey, device_random) =
            match session_round_trip(transport, &request, timeout).await? {
                SessionResponse::Response0 {
                    status,
                    device_pubkey,
                    device_random,
                } if status.is_success() => (device_pubkey, device_random),
                SessionResponse::Response0 { status, .. } => {
                    return Err(SecurityError::HandshakeMalformed(format!(
                        "device refused key exchange: {:?}",
                        status
                    )));
                }
                other => {
                    return Err(SecurityError::HandshakeMalformed(format!(
                        "expected Response0, got {:?}",
                        other
                    )));
                }
            };
        debug!("Received device public key");

        let shared = secret.diffie_hellman(&PublicKey::from(device_pubkey));
        let key = derive_session_key(shared.as_bytes(), &self.pop, &device_random);
        let mut cipher = SessionCipher::new(&key, Role::Client);

        let request = SessionRequest::Command1 {
            client_verify: cipher.seal(&device_pubkey)?,
        };
        let device_verify = match session_round_trip(transport, &request, timeout).await? {
            SessionResponse::Response1 {
                status,
                device_verify,
            } if status.is_success() => device_verify,
            SessionResponse::Response1 { status, .. } => {
                warn!("Device rejected session verification: {:?}", status);
                return Err(SecurityError::AuthFailed);
            }
            other => {
                return Err(SecurityError::HandshakeMalformed(format!(
                    "expected Response1, got {:?}",
                    other
                )));
            }
        };

        if cipher.open(&device_verify)? != client_public.as_bytes() {
            warn!("Device verification token does not match");
            return Err(SecurityError::AuthFailed);
        }

        info!("Secure session established");
        self.cipher = Some(cipher);
        Ok(())
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> SecurityResult<Vec<u8>> {
        self.cipher()?.seal(plaintext)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> SecurityResult<Vec<u8>> {
        self.cipher()?.open(ciphertext)
    }
}
