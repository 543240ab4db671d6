use super::certificate::{CertificateRecord, CertificateStatus, Revocation, RevocationReason, Serial};
use crate::error::{PkiError, PkiResult};
use crate::storage::StateStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Record of every certificate one CA has issued.
///
/// `append` and `mark_revoked` are the only mutators. Both persist the change
/// while holding the write lock and only then make it visible, so readers never
/// see a record the store does not have.
pub struct CertificateLedger {
    ca_id: String,
    records: Arc<RwLock<BTreeMap<Serial, CertificateRecord>>>,
    store: Arc<dyn StateStore>,
}

impl CertificateLedger {
    pub async fn restore(ca_id: impl Into<String>, store: Arc<dyn StateStore>) -> PkiResult<Self> {
        let ca_id = ca_id.into();
        let records: BTreeMap<Serial, CertificateRecord> = store
            .load_records(&ca_id)
            .await?
            .into_iter()
            .map(|record| (record.serial, record))
            .collect();
        Ok(Self {
            ca_id,
            records: Arc::new(RwLock::new(records)),
            store,
        })
    }

    pub async fn append(&self, record: CertificateRecord) -> PkiResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.serial) {
            return Err(PkiError::DuplicateSerial(record.serial));
        }
        self.store.persist_record(&self.ca_id, &record).await?;
        records.insert(record.serial, record);
        Ok(())
    }

    pub async fn find(&self, serial: Serial) -> PkiResult<CertificateRecord> {
        self.records
            .read()
            .await
            .get(&serial)
            .cloned()
            .ok_or_else(|| PkiError::not_found("certificate", serial))
    }

    pub async fn mark_revoked(
        &self,
        serial: Serial,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> PkiResult<CertificateRecord> {
        let mut records = self.records.write().await;
        let current = records
            .get(&serial)
            .ok_or_else(|| PkiError::not_found("certificate", serial))?;
        if current.is_revoked() {
            return Err(PkiError::AlreadyRevoked(serial));
        }

        let mut updated = current.clone();
        updated.revocation = Some(Revocation {
            reason,
            revoked_at: at,
        });
        self.store.persist_record(&self.ca_id, &updated).await?;
        records.insert(serial, updated.clone());
        Ok(updated)
    }

    /// Revoked records with a revocation time at or before `as_of`, ascending by serial.
    pub async fn snapshot(&self, as_of: DateTime<Utc>) -> Vec<CertificateRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.revocation.is_some_and(|rev| rev.revoked_at <= as_of))
            .cloned()
            .collect()
    }

    pub async fn records(&self) -> Vec<CertificateRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Writes the ledger in the tab-separated layout of OpenSSL's `index.txt`.
    pub async fn export_index<W: io::Write>(&self, writer: W, now: DateTime<Utc>) -> PkiResult<()> {
        let mut out = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);

        for record in self.records.read().await.values() {
            let flag = match record.status_at(now) {
                CertificateStatus::Valid => "V",
                CertificateStatus::Revoked => "R",
                CertificateStatus::Expired => "E",
            };
            let revoked = record
                .revocation
                .map(|rev| format!("{},{}", asn1_time(rev.revoked_at), rev.reason))
                .unwrap_or_default();
            out.write_record([
                flag.to_string(),
                asn1_time(record.not_after),
                revoked,
                record.serial.to_hex(),
                "unknown".to_string(),
                record.subject.to_openssl(),
            ])?;
        }
        out.flush()?;
        Ok(())
    }
}

fn asn1_time(at: DateTime<Utc>) -> String {
    at.format("%y%m%d%H%M%SZ").to_string()
}
