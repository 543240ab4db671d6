use crate::error::PkiResult;
use crate::pki::CertificateRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable state for the CA engine and the ACME entities.
///
/// Every `persist_*` call must be durable when it returns: the CA hands out a
/// serial, publishes a CRL version or exposes a ledger change only after the
/// matching write has completed.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_serial(&self, ca: &str) -> PkiResult<Option<u64>>;
    async fn persist_serial(&self, ca: &str, serial: u64) -> PkiResult<()>;

    async fn load_records(&self, ca: &str) -> PkiResult<Vec<CertificateRecord>>;
    /// Inserts or replaces the record with the same serial.
    async fn persist_record(&self, ca: &str, record: &CertificateRecord) -> PkiResult<()>;

    async fn load_crl_version(&self, ca: &str) -> PkiResult<Option<u64>>;
    async fn persist_crl_version(&self, ca: &str, version: u64) -> PkiResult<()>;

    /// Drops everything stored for one CA.
    async fn purge(&self, ca: &str) -> PkiResult<()>;
    async fn has_state(&self, ca: &str) -> PkiResult<bool>;

    async fn put_document(
        &self,
        collection: &str,
        id: &str,
        document: serde_json::Value,
    ) -> PkiResult<()>;
    /// Removing a missing document is not an error.
    async fn delete_document(&self, collection: &str, id: &str) -> PkiResult<()>;
    async fn load_documents(&self, collection: &str) -> PkiResult<Vec<serde_json::Value>>;
}

/// Everything one CA persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaState {
    pub serial: Option<u64>,
    pub crl_version: Option<u64>,
    pub records: BTreeMap<u64, CertificateRecord>,
}
