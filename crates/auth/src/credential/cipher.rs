// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AES-256-GCM sealing of the credential file.
//!
//! The key is derived from the configured secret with SHA-256 under a fixed
//! context label. Each save draws a fresh 96-bit nonce, and the envelope
//! records the algorithm so a future format can be told apart.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

const KEY_CONTEXT: &[u8] = b"mailcal credential store v1\0";
const AAD: &[u8] = b"mailcal-credentials";
const ENVELOPE_VERSION: u32 = 1;
const ALGORITHM: &str = "A256GCM";

/// On-disk wrapper around the sealed credential JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub alg: String,
    pub nonce: String,
    pub ciphertext: String,
}

pub struct StoreCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl fmt::Debug for StoreCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCipher").field("key", &"[REDACTED]").finish()
    }
}

impl StoreCipher {
    pub fn from_secret(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Config("encryption key must not be empty".into()));
        }
        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(secret.as_bytes());
        let digest = hasher.finalize();
        let unbound = UnboundKey::new(&AES_256_GCM, &digest)
            .map_err(|_| AuthError::Config("could not initialise credential cipher".into()))?;
        Ok(Self { key: LessSafeKey::new(unbound), rng: SystemRandom::new() })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, AuthError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AuthError::Storage("system RNG unavailable".into()))?;
        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(AAD),
                &mut in_out,
            )
            .map_err(|_| AuthError::Storage("encryption failed".into()))?;
        Ok(Envelope {
            version: ENVELOPE_VERSION,
            alg: ALGORITHM.to_owned(),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(in_out),
        })
    }

    /// Decrypt an envelope. Any malformed field, wrong key or tampered byte
    /// yields [`AuthError::DecryptFailure`].
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, AuthError> {
        if envelope.version != ENVELOPE_VERSION || envelope.alg != ALGORITHM {
            return Err(AuthError::DecryptFailure);
        }
        let nonce: [u8; NONCE_LEN] = BASE64
            .decode(&envelope.nonce)
            .ok()
            .and_then(|n| n.try_into().ok())
            .ok_or(AuthError::DecryptFailure)?;
        let mut in_out = BASE64.decode(&envelope.ciphertext).map_err(|_| AuthError::DecryptFailure)?;
        let plaintext = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::from(AAD), &mut in_out)
            .map_err(|_| AuthError::DecryptFailure)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
#[path = "cipher_tests.rs"]
mod tests;
