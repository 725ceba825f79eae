//! Symmetric sealing: AES-256-GCM keyed by a PBKDF2-stretched pairwise
//! secret.

use crate::crypto::kem::SharedSecret;
use crate::error::{SessionError, SessionResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::Hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

/// Fixed salt for the password-based key stretch. Public knowledge is fine:
/// the secret being stretched is the KEM-derived shared secret itself, not a
/// low-entropy password, so a per-session random salt would add nothing
/// except the need to transmit it.
const KDF_SALT: &[u8] = b"melq-pairwise-key-v1";
const KDF_ITERATIONS: u32 = 100_000;

pub const SYMMETRIC_KEY_LEN: usize = 32;

/// A derived 32-byte AES-256 key. Zeroized on drop.
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Derive a symmetric key from a shared secret via PBKDF2-HMAC-SHA256,
/// 100,000 iterations, fixed salt.
pub fn derive(shared_secret: &SharedSecret) -> SymmetricKey {
    let mut out = [0u8; SYMMETRIC_KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(shared_secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut out)
        .expect("output length matches PBKDF2 HMAC-SHA256 block size constraints");
    SymmetricKey(out)
}

/// A sealed record: nonce and ciphertext-with-tag, ready for the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedRecord {
    /// 96-bit nonce, hex-encoded.
    pub nonce: String,
    /// AES-GCM output (ciphertext || 16-byte tag), hex-encoded.
    pub ciphertext: String,
}

/// Seal `plaintext` under `key` with a fresh random 96-bit nonce and the
/// crate's fixed associated data.
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> SealedRecord {
    let cipher = Aes256Gcm::new(&Key::<Aes256Gcm>::from(key.0));
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: crate::AEAD_ASSOCIATED_DATA,
            },
        )
        .expect("AES-256-GCM encryption over a bounded plaintext cannot fail");
    SealedRecord {
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    }
}

/// Open a sealed record. Tag failure and AAD mismatch are both reported as
/// the same `AuthError`-flavored `SessionError::Crypto`, indistinguishably,
/// indistinguishably.
pub fn open(record: &SealedRecord, key: &SymmetricKey) -> SessionResult<Vec<u8>> {
    let nonce_bytes: [u8; 12] = hex::decode(&record.nonce)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| SessionError::Crypto("bad nonce encoding".into()))?;
    let ciphertext = hex::decode(&record.ciphertext)
        .map_err(|_| SessionError::Crypto("bad ciphertext encoding".into()))?;
    let cipher = Aes256Gcm::new(&Key::<Aes256Gcm>::from(key.0));
    let nonce = Nonce::from(nonce_bytes);
    cipher
        .decrypt(
            &nonce,
            Payload {
                msg: &ciphertext,
                aad: crate::AEAD_ASSOCIATED_DATA,
            },
        )
        .map_err(|_| SessionError::Crypto("authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kem;

    fn secret(byte: u8) -> SharedSecret {
        SharedSecret([byte; kem::SHARED_SECRET_LEN])
    }

    #[test]
    fn round_trips() {
        let key = derive(&secret(7));
        let sealed = seal(b"hello room", &key);
        let opened = open(&sealed, &key).unwrap();
        assert_eq!(opened, b"hello room");
    }

    #[test]
    fn wrong_key_fails() {
        let key_a = derive(&secret(1));
        let key_b = derive(&secret(2));
        let sealed = seal(b"secret", &key_a);
        assert!(open(&sealed, &key_b).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = derive(&secret(3));
        let mut sealed = seal(b"secret", &key);
        let mut bytes = hex::decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        sealed.ciphertext = hex::encode(bytes);
        assert!(open(&sealed, &key).is_err());
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let key = derive(&secret(9));
        let a = seal(b"x", &key);
        let b = seal(b"x", &key);
        assert_ne!(a.nonce, b.nonce);
    }
}
