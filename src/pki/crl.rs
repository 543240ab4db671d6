use super::certificate::{
    DistinguishedName, RevocationReason, SIGNATURE_ALGORITHM, Serial, armour, unarmour,
};
use super::ledger::CertificateLedger;
use super::policy::CaClass;
use crate::config::deadline;
use crate::crypto::{KeyHandle, verify_signature};
use crate::error::{PkiError, PkiResult};
use crate::storage::StateStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub const CRL_PEM_LABEL: &str = "PKIMAN CRL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlEntry {
    pub serial: Serial,
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TbsCrl {
    pub issuer: DistinguishedName,
    pub issuer_class: CaClass,
    pub version: u64,
    pub signature_algorithm: String,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub entries: Vec<CrlEntry>,
}

/// A published, signed revocation list. Never modified after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crl {
    pub tbs: TbsCrl,
    pub signature: Vec<u8>,
}

impl Crl {
    pub fn version(&self) -> u64 {
        self.tbs.version
    }

    pub fn entries(&self) -> &[CrlEntry] {
        &self.tbs.entries
    }

    pub fn revoked_serials(&self) -> Vec<Serial> {
        self.tbs.entries.iter().map(|e| e.serial).collect()
    }

    pub fn contains(&self, serial: Serial) -> bool {
        self.tbs
            .entries
            .binary_search_by_key(&serial, |e| e.serial)
            .is_ok()
    }

    pub fn encode(&self) -> PkiResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> PkiResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn to_pem(&self) -> PkiResult<String> {
        Ok(armour(CRL_PEM_LABEL, &self.encode()?))
    }

    pub fn from_pem(text: &str) -> PkiResult<Self> {
        Self::decode(&unarmour(CRL_PEM_LABEL, text)?)
    }

    pub fn verify(&self, issuer_public_key: &[u8]) -> PkiResult<()> {
        let tbs = bincode::serialize(&self.tbs)?;
        verify_signature(issuer_public_key, &tbs, &self.signature)
    }
}

/// Produces successive CRLs for one CA.
pub struct CrlBuilder {
    ca_id: String,
    version: Mutex<u64>,
    validity: Duration,
    latest: RwLock<Option<Arc<Crl>>>,
    store: Arc<dyn StateStore>,
}

impl CrlBuilder {
    pub async fn restore(
        ca_id: impl Into<String>,
        validity: Duration,
        store: Arc<dyn StateStore>,
    ) -> PkiResult<Self> {
        let ca_id = ca_id.into();
        let version = store.load_crl_version(&ca_id).await?.unwrap_or(0);
        Ok(Self {
            ca_id,
            version: Mutex::new(version),
            validity,
            latest: RwLock::new(None),
            store,
        })
    }

    /// Builds are serialized per CA; the version moves only when a CRL is
    /// actually signed and its version persisted.
    pub async fn build(
        &self,
        issuer: &DistinguishedName,
        issuer_class: CaClass,
        ledger: &CertificateLedger,
        key: &KeyHandle,
        now: DateTime<Utc>,
    ) -> PkiResult<Arc<Crl>> {
        let mut version = self.version.lock().await;
        let next = version.checked_add(1).ok_or(PkiError::ExhaustedKeyspace)?;

        let entries = ledger
            .snapshot(now)
            .await
            .into_iter()
            .filter_map(|record| {
                record.revocation.map(|rev| CrlEntry {
                    serial: record.serial,
                    reason: rev.reason,
                    revoked_at: rev.revoked_at,
                })
            })
            .collect();

        let tbs = TbsCrl {
            issuer: issuer.clone(),
            issuer_class,
            version: next,
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            this_update: now,
            next_update: deadline(now, self.validity)?,
            entries,
        };
        let signature = key.sign(&bincode::serialize(&tbs)?).await?;
        self.store.persist_crl_version(&self.ca_id, next).await?;
        *version = next;

        let crl = Arc::new(Crl { tbs, signature });
        *self.latest.write().await = Some(crl.clone());
        log::info!(
            "{}: published CRL version {} with {} entries",
            self.ca_id,
            next,
            crl.entries().len()
        );
        Ok(crl)
    }

    pub async fn latest(&self) -> Option<Arc<Crl>> {
        self.latest.read().await.clone()
    }

    pub async fn current_version(&self) -> u64 {
        *self.version.lock().await
    }
}
