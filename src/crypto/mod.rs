pub mod hsm;

pub use hsm::HardwareSecurityModule;

use crate::error::{PkiError, PkiResult};
use async_trait::async_trait;
use ed25519_dalek::{Signature, VerifyingKey};
use std::fmt;
use std::sync::Arc;

pub const PUBLIC_KEY_LENGTH: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;

/// Custodian of CA private keys. Keys never leave the provider; callers only
/// get signatures and public halves.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn generate(&self, key_id: &str) -> PkiResult<Vec<u8>>;
    async fn public_key(&self, key_id: &str) -> PkiResult<Vec<u8>>;
    async fn sign(&self, key_id: &str, data: &[u8]) -> PkiResult<Vec<u8>>;
    async fn destroy(&self, key_id: &str) -> PkiResult<()>;
}

/// A CA's reference to its own key inside a provider.
#[derive(Clone)]
pub struct KeyHandle {
    provider: Arc<dyn KeyProvider>,
    key_id: String,
}

impl KeyHandle {
    pub fn new(provider: Arc<dyn KeyProvider>, key_id: impl Into<String>) -> Self {
        Self {
            provider,
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub async fn public_key(&self) -> PkiResult<Vec<u8>> {
        self.provider.public_key(&self.key_id).await
    }

    pub(crate) async fn sign(&self, data: &[u8]) -> PkiResult<Vec<u8>> {
        self.provider.sign(&self.key_id, data).await
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Accepts only well-formed, non-weak Ed25519 public keys.
pub fn check_public_key(bytes: &[u8]) -> PkiResult<VerifyingKey> {
    let array: &[u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
        PkiError::BadCsr(format!(
            "public key is {} bytes, expected a {}-byte Ed25519 key",
            bytes.len(),
            PUBLIC_KEY_LENGTH
        ))
    })?;
    let key = VerifyingKey::from_bytes(array)
        .map_err(|_| PkiError::BadPublicKey("not a valid Ed25519 point".into()))?;
    if key.is_weak() {
        return Err(PkiError::BadPublicKey("small-order Ed25519 key".into()));
    }
    Ok(key)
}

pub fn verify_signature(public_key: &[u8], data: &[u8], signature: &[u8]) -> PkiResult<()> {
    let key = check_public_key(public_key)?;
    let signature = Signature::from_slice(signature)
        .map_err(|_| PkiError::Malformed("signature has the wrong length".into()))?;
    key.verify_strict(data, &signature)
        .map_err(|_| PkiError::Malformed("signature does not verify".into()))
}
