//! Session cipher: ChaCha20-Poly1305 with per-direction counter nonces

use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, aead::Aead};

use crate::core::error::{SecurityError, SecurityResult};

/// Which end of the session this cipher belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Device,
}

const CLIENT_TO_DEVICE: u8 = 0x01;
const DEVICE_TO_CLIENT: u8 = 0x02;

impl Role {
    fn tx_direction(self) -> u8 {
        match self {
            Role::Client => CLIENT_TO_DEVICE,
            Role::Device => DEVICE_TO_CLIENT,
        }
    }

    fn rx_direction(self) -> u8 {
        match self {
            Role::Client => DEVICE_TO_CLIENT,
            Role::Device => CLIENT_TO_DEVICE,
        }
    }
}

/// Nonce layout: `[direction, 0, 0, 0, counter (u64 BE)]`
fn nonce(direction: u8, counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = direction;
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Symmetric cipher derived from a completed handshake
///
/// Each direction keeps its own counter. A counter only advances after a
/// successful seal/open, so a rejected message does not desynchronise the
/// two ends.
pub struct SessionCipher {
    aead: ChaCha20Poly1305,
    role: Role,
    tx_counter: u64,
    rx_counter: u64,
}

impl SessionCipher {
    pub fn new(key: &[u8; 32], role: Role) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(key)),
            role,
            tx_counter: 0,
            rx_counter: 0,
        }
    }

    /// Seal an outgoing payload
    pub fn seal(&mut self, plaintext: &[u8]) -> SecurityResult<Vec<u8>> {
        let nonce = nonce(self.role.tx_direction(), self.tx_counter);
        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SecurityError::AuthFailed)?;
        self.tx_counter += 1;
        Ok(sealed)
    }

    /// Open an incoming payload; tampered or replayed data fails with `AuthFailed`
    pub fn open(&mut self, ciphertext: &[u8]) -> SecurityResult<Vec<u8>> {
        let nonce = nonce(self.role.rx_direction(), self.rx_counter);
        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| SecurityError::AuthFailed)?;
        self.rx_counter += 1;
        Ok(plaintext)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("role", &self.role)
            .field("tx_counter", &self.tx_counter)
            .field("rx_counter", &self.rx_counter)
            .finish_non_exhaustive()
    }
}
