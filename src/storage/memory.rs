use super::store::{CaState, StateStore};
use crate::error::{PkiError, PkiResult};
use crate::pki::CertificateRecord;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Process-local store. Writes can be made to fail for fault-injection tests.
pub struct MemoryStore {
    cas: Arc<RwLock<HashMap<String, CaState>>>,
    documents: Arc<RwLock<HashMap<String, BTreeMap<String, serde_json::Value>>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cas: Arc::new(RwLock::new(HashMap::new())),
            documents: Arc::new(RwLock::new(HashMap::new())),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> PkiResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PkiError::Storage("memory store is refusing writes".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_serial(&self, ca: &str) -> PkiResult<Option<u64>> {
        Ok(self.cas.read().await.get(ca).and_then(|s| s.serial))
    }

    async fn persist_serial(&self, ca: &str, serial: u64) -> PkiResult<()> {
        self.check_writable()?;
        self.cas
            .write()
            .await
            .entry(ca.to_string())
            .or_default()
            .serial = Some(serial);
        Ok(())
    }

    async fn load_records(&self, ca: &str) -> PkiResult<Vec<CertificateRecord>> {
        Ok(self
            .cas
            .read()
            .await
            .get(ca)
            .map(|s| s.records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn persist_record(&self, ca: &str, record: &CertificateRecord) -> PkiResult<()> {
        self.check_writable()?;
        self.cas
            .write()
            .await
            .entry(ca.to_string())
            .or_default()
            .records
            .insert(record.serial.value(), record.clone());
        Ok(())
    }

    async fn load_crl_version(&self, ca: &str) -> PkiResult<Option<u64>> {
        Ok(self.cas.read().await.get(ca).and_then(|s| s.crl_version))
    }

    async fn persist_crl_version(&self, ca: &str, version: u64) -> PkiResult<()> {
        self.check_writable()?;
        self.cas
            .write()
            .await
            .entry(ca.to_string())
            .or_default()
            .crl_version = Some(version);
        Ok(())
    }

    async fn purge(&self, ca: &str) -> PkiResult<()> {
        self.cas.write().await.remove(ca);
        Ok(())
    }

    async fn has_state(&self, ca: &str) -> PkiResult<bool> {
        Ok(self.cas.read().await.contains_key(ca))
    }

    async fn put_document(
        &self,
        collection: &str,
        id: &str,
        document: serde_json::Value,
    ) -> PkiResult<()> {
        self.check_writable()?;
        self.documents
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> PkiResult<()> {
        self.check_writable()?;
        if let Some(docs) = self.documents.write().await.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn load_documents(&self, collection: &str) -> PkiResult<Vec<serde_json::Value>> {
        Ok(self
            .documents
            .read()
            .await
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}
