use super::KeyProvider;
use crate::error::{PkiError, PkiResult};
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process stand-in for a hardware security module holding CA keys.
pub struct HardwareSecurityModule {
    ca_keys: Arc<RwLock<HashMap<String, SigningKey>>>,
    operations_log: Arc<RwLock<Vec<String>>>,
}

impl HardwareSecurityModule {
    pub fn new() -> Self {
        Self {
            ca_keys: Arc::new(RwLock::new(HashMap::new())),
            operations_log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    async fn log_operation(&self, operation: String) {
        log::debug!("hsm: {}", operation);
        self.operations_log.write().await.push(operation);
    }

    pub async fn get_operation_count(&self) -> usize {
        self.operations_log.read().await.len()
    }

    pub async fn holds_key(&self, key_id: &str) -> bool {
        self.ca_keys.read().await.contains_key(key_id)
    }
}

impl Default for HardwareSecurityModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyProvider for HardwareSecurityModule {
    async fn generate(&self, key_id: &str) -> PkiResult<Vec<u8>> {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let public_key = signing_key.verifying_key().to_bytes().to_vec();

        {
            let mut keys = self.ca_keys.write().await;
            if keys.contains_key(key_id) {
                return Err(PkiError::Signing(format!("key {} already exists", key_id)));
            }
            keys.insert(key_id.to_string(), signing_key);
        }
        self.log_operation(format!("CA keypair generated: {}", key_id))
            .await;

        Ok(public_key)
    }

    async fn public_key(&self, key_id: &str) -> PkiResult<Vec<u8>> {
        self.ca_keys
            .read()
            .await
            .get(key_id)
            .map(|key| key.verifying_key().to_bytes().to_vec())
            .ok_or_else(|| PkiError::Signing(format!("key {} not found in HSM", key_id)))
    }

    async fn sign(&self, key_id: &str, data: &[u8]) -> PkiResult<Vec<u8>> {
        let keys = self.ca_keys.read().await;
        if let Some(keypair) = keys.get(key_id) {
            let signature = keypair.sign(data).to_bytes().to_vec();
            drop(keys);
            self.log_operation(format!("data signed by CA key: {}", key_id))
                .await;
            return Ok(signature);
        }
        Err(PkiError::Signing(format!("key {} not found in HSM", key_id)))
    }

    async fn destroy(&self, key_id: &str) -> PkiResult<()> {
        let removed = self.ca_keys.write().await.remove(key_id).is_some();
        if removed {
            self.log_operation(format!("CA key destroyed: {}", key_id))
                .await;
        }
        Ok(())
    }
}
