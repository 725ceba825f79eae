//! Post-quantum key encapsulation: ML-KEM-768 (192-bit security tier).
//!
//! Wraps `pqcrypto-mlkem` behind opaque byte-string types so the rest of the
//! crate never names the concrete parameter set directly — swapping to
//! another NIST-standardized ML-KEM level is a change confined to this file.

use crate::error::{SessionError, SessionResult};
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use zeroize::Zeroize;

pub const PUBLIC_KEY_LEN: usize = mlkem768::public_key_bytes();
pub const SECRET_KEY_LEN: usize = mlkem768::secret_key_bytes();
pub const CIPHERTEXT_LEN: usize = mlkem768::ciphertext_bytes();
pub const SHARED_SECRET_LEN: usize = mlkem768::shared_secret_bytes();

#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_LEN]);

pub struct PrivateKey(pub [u8; SECRET_KEY_LEN]);

#[derive(Clone)]
pub struct Ciphertext(pub [u8; CIPHERTEXT_LEN]);

/// A 32-byte pairwise shared secret. Redacts its bytes in `Debug` so stray
/// `log::debug!("{:?}", ...)` calls never leak key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(pub [u8; SHARED_SECRET_LEN]);

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}…)", hex::encode(&self.0[..4]))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(<redacted>)")
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret(<redacted>)")
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> SessionResult<Self> {
        let inner = mlkem768::PublicKey::from_bytes(bytes)
            .map_err(|e| SessionError::Crypto(format!("bad public key: {e}")))?;
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out.copy_from_slice(inner.as_bytes());
        Ok(Self(out))
    }
}

impl Ciphertext {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> SessionResult<Self> {
        let inner = mlkem768::Ciphertext::from_bytes(bytes)
            .map_err(|e| SessionError::Crypto(format!("bad ciphertext: {e}")))?;
        let mut out = [0u8; CIPHERTEXT_LEN];
        out.copy_from_slice(inner.as_bytes());
        Ok(Self(out))
    }
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Keypair generated once per node lifetime at startup.
pub struct Keypair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

/// Generate a fresh node keypair.
pub fn generate() -> Keypair {
    let (pk, sk) = mlkem768::keypair();
    let mut public = [0u8; PUBLIC_KEY_LEN];
    public.copy_from_slice(pk.as_bytes());
    let mut private = [0u8; SECRET_KEY_LEN];
    private.copy_from_slice(sk.as_bytes());
    Keypair {
        public: PublicKey(public),
        private: PrivateKey(private),
    }
}

/// Encapsulate against a recipient's public key, yielding a ciphertext to
/// send them and the shared secret this side now holds.
pub fn encapsulate(public: &PublicKey) -> SessionResult<(Ciphertext, SharedSecret)> {
    let pk = mlkem768::PublicKey::from_bytes(&public.0)
        .map_err(|e| SessionError::Crypto(format!("bad public key: {e}")))?;
    let (ss, ct) = mlkem768::encapsulate(&pk);
    let mut ct_out = [0u8; CIPHERTEXT_LEN];
    ct_out.copy_from_slice(ct.as_bytes());
    let mut ss_out = [0u8; SHARED_SECRET_LEN];
    ss_out.copy_from_slice(ss.as_bytes());
    Ok((Ciphertext(ct_out), SharedSecret(ss_out)))
}

/// Decapsulate a ciphertext with this node's private key.
///
/// A malformed ciphertext and a mismatched private key are not
/// distinguished in the returned error or in timing: both simply fail to
/// reproduce the sender's shared secret, which the AEAD `open` on the first
/// sealed frame will reject as an `AuthError` rather than a distinct crypto
/// failure here.
pub fn decapsulate(ciphertext: &Ciphertext, private: &PrivateKey) -> SessionResult<SharedSecret> {
    let ct = mlkem768::Ciphertext::from_bytes(&ciphertext.0)
        .map_err(|e| SessionError::Crypto(format!("bad ciphertext: {e}")))?;
    let sk = mlkem768::SecretKey::from_bytes(&private.0)
        .map_err(|e| SessionError::Crypto(format!("bad private key: {e}")))?;
    let ss = mlkem768::decapsulate(&ct, &sk);
    let mut out = [0u8; SHARED_SECRET_LEN];
    out.copy_from_slice(ss.as_bytes());
    Ok(SharedSecret(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let kp = generate();
        let (ct, ss1) = encapsulate(&kp.public).unwrap();
        let ss2 = decapsulate(&ct, &kp.private).unwrap();
        assert_eq!(ss1.as_bytes(), ss2.as_bytes());
    }

    #[test]
    fn malformed_ciphertext_is_crypto_error() {
        let kp = generate();
        let bad = Ciphertext::from_bytes(&[0u8; CIPHERTEXT_LEN]).unwrap();
        // A zeroed ciphertext is well-formed-length but not one produced by
        // encapsulate; decapsulation still succeeds (KEMs are total
        // functions) but yields a secret no peer holds.
        let ss = decapsulate(&bad, &kp.private).unwrap();
        let (_, genuine) = encapsulate(&kp.public).unwrap();
        assert_ne!(ss.as_bytes(), genuine.as_bytes());
    }

    #[test]
    fn rejects_wrong_length_public_key() {
        assert!(PublicKey::from_bytes(&[0u8; 3]).is_err());
    }
}
