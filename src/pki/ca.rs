use super::certificate::{CertificateRecord, DistinguishedName, Serial};
use super::crl::{Crl, CrlBuilder};
use super::ledger::CertificateLedger;
use super::policy::{CaClass, ClassPolicy};
use super::serial::SerialAllocator;
use crate::clock::Clock;
use crate::config::CaConfig;
use crate::crypto::KeyHandle;
use crate::error::{PkiError, PkiResult};
use crate::storage::StateStore;
use chrono::Duration;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

/// One certificate authority: its key reference, serial counter, ledger and
/// CRL state. Issuance lives in `issuance.rs`, revocation in `revocation.rs`.
pub struct CertificateAuthority {
    pub(super) class: CaClass,
    pub(super) name: DistinguishedName,
    pub(super) policy: ClassPolicy,
    pub(super) key: KeyHandle,
    pub(super) public_key: Vec<u8>,
    pub(super) certificate: OnceLock<CertificateRecord>,
    pub(super) serials: SerialAllocator,
    pub(super) ledger: CertificateLedger,
    pub(super) crl: CrlBuilder,
    /// Held across serial allocation, signing and append.
    pub(super) issuance_lock: Mutex<()>,
    pub(super) clock: Arc<dyn Clock>,
}

impl CertificateAuthority {
    pub async fn open(
        config: &CaConfig,
        key: KeyHandle,
        crl_validity: Duration,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> PkiResult<Self> {
        let ca_id = config.class.ca_id();
        let public_key = key.public_key().await?;
        let serials = SerialAllocator::restore(ca_id, store.clone()).await?;
        let ledger = CertificateLedger::restore(ca_id, store.clone()).await?;
        let crl = CrlBuilder::restore(ca_id, crl_validity, store).await?;
        log::debug!(
            "{}: opened with {} ledger entries",
            ca_id,
            ledger.len().await
        );

        Ok(Self {
            class: config.class,
            name: config.name(),
            policy: config.policy.clone(),
            key,
            public_key,
            certificate: OnceLock::new(),
            serials,
            ledger,
            crl,
            issuance_lock: Mutex::new(()),
            clock,
        })
    }

    /// Attaches the CA's own certificate. Happens exactly once per process.
    pub fn install_certificate(&self, record: CertificateRecord) -> PkiResult<()> {
        if record.public_key != self.public_key {
            return Err(PkiError::Config(format!(
                "certificate {} does not carry the {} key",
                record.serial, self.class
            )));
        }
        self.certificate.set(record).map_err(|_| {
            PkiError::Config(format!("{} already has a certificate installed", self.class))
        })
    }

    pub fn class(&self) -> CaClass {
        self.class
    }

    pub fn ca_id(&self) -> &'static str {
        self.class.ca_id()
    }

    pub fn name(&self) -> &DistinguishedName {
        &self.name
    }

    pub fn policy(&self) -> &ClassPolicy {
        &self.policy
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }

    pub fn certificate(&self) -> Option<&CertificateRecord> {
        self.certificate.get()
    }

    pub fn ledger(&self) -> &CertificateLedger {
        &self.ledger
    }

    pub async fn find(&self, serial: Serial) -> PkiResult<CertificateRecord> {
        self.ledger.find(serial).await
    }

    pub async fn total_issued(&self) -> usize {
        self.ledger.len().await
    }

    pub async fn last_serial(&self) -> u64 {
        self.serials.last_allocated().await
    }

    pub async fn build_crl(&self) -> PkiResult<Arc<Crl>> {
        self.crl
            .build(
                &self.name,
                self.class,
                &self.ledger,
                &self.key,
                self.clock.now(),
            )
            .await
    }

    pub async fn latest_crl(&self) -> Option<Arc<Crl>> {
        self.crl.latest().await
    }

    pub async fn crl_version(&self) -> u64 {
        self.crl.current_version().await
    }
}
