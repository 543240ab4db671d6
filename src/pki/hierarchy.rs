use super::ca::CertificateAuthority;
use super::certificate::{CertificateRecord, RevocationReason, Serial};
use super::crl::Crl;
use super::issuance::IssuanceRequest;
use super::policy::{CaClass, CertificateProfile};
use crate::clock::Clock;
use crate::config::{CaConfig, PkiConfig};
use crate::crypto::{KeyHandle, KeyProvider};
use crate::error::{PkiError, PkiResult};
use crate::storage::StateStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The root CA and its subordinates, keyed by class. Owns the CAs but never
/// the keys, which stay inside the `KeyProvider`.
pub struct CaHierarchy {
    cas: BTreeMap<CaClass, Arc<CertificateAuthority>>,
}

impl CaHierarchy {
    /// Creates every CA from scratch: keys, the self-signed root certificate
    /// and one root-signed certificate per subordinate. On any failure the
    /// generated keys are destroyed and persisted state is purged.
    pub async fn bootstrap(
        config: &PkiConfig,
        keys: Arc<dyn KeyProvider>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> PkiResult<Self> {
        config.validate()?;
        // rollback purges every configured CA, so none of them may hold state yet
        for ca in std::iter::once(&config.root).chain(&config.subordinates) {
            if store.has_state(ca.class.ca_id()).await? {
                return Err(PkiError::Config(format!(
                    "{} already has persisted state; open the hierarchy instead",
                    ca.class
                )));
            }
        }

        let mut generated = Vec::new();
        match Self::provision(config, &keys, &store, &clock, &mut generated).await {
            Ok(hierarchy) => {
                log::info!(
                    "bootstrapped hierarchy under {} with {} subordinates",
                    config.root.name(),
                    config.subordinates.len()
                );
                Ok(hierarchy)
            }
            Err(err) => {
                log::error!("bootstrap failed, rolling back: {}", err);
                for key_id in &generated {
                    if let Err(destroy_err) = keys.destroy(key_id).await {
                        log::warn!("could not destroy key {}: {}", key_id, destroy_err);
                    }
                }
                for ca in std::iter::once(&config.root).chain(&config.subordinates) {
                    if let Err(purge_err) = store.purge(ca.class.ca_id()).await {
                        log::warn!("could not purge {}: {}", ca.class, purge_err);
                    }
                }
                Err(err)
            }
        }
    }

    async fn provision(
        config: &PkiConfig,
        keys: &Arc<dyn KeyProvider>,
        store: &Arc<dyn StateStore>,
        clock: &Arc<dyn Clock>,
        generated: &mut Vec<String>,
    ) -> PkiResult<Self> {
        let root = Self::create_ca(&config.root, config, keys, store, clock, generated).await?;
        let self_signed = root
            .issue(
                IssuanceRequest::new(
                    config.root.name(),
                    root.public_key().to_vec(),
                    config.root.validity(),
                )
                .with_profile(CertificateProfile::RootCa),
            )
            .await?;
        root.install_certificate(self_signed)?;

        let root = Arc::new(root);
        let mut cas = BTreeMap::new();
        cas.insert(CaClass::Root, root.clone());

        for sub in &config.subordinates {
            let ca = Self::create_ca(sub, config, keys, store, clock, generated).await?;
            let certificate = root
                .issue(
                    IssuanceRequest::new(sub.name(), ca.public_key().to_vec(), sub.validity())
                        .with_profile(CertificateProfile::SubordinateCa),
                )
                .await?;
            ca.install_certificate(certificate)?;
            cas.insert(sub.class, Arc::new(ca));
        }
        Ok(Self { cas })
    }

    async fn create_ca(
        ca: &CaConfig,
        config: &PkiConfig,
        keys: &Arc<dyn KeyProvider>,
        store: &Arc<dyn StateStore>,
        clock: &Arc<dyn Clock>,
        generated: &mut Vec<String>,
    ) -> PkiResult<CertificateAuthority> {
        let key_id = ca.class.ca_id();
        keys.generate(key_id).await?;
        generated.push(key_id.to_string());
        CertificateAuthority::open(
            ca,
            KeyHandle::new(keys.clone(), key_id),
            config.crl_validity(),
            store.clone(),
            clock.clone(),
        )
        .await
    }

    /// Reattaches to a previously bootstrapped hierarchy. CA certificates are
    /// recovered from the root ledger by matching each CA's public key.
    pub async fn open(
        config: &PkiConfig,
        keys: Arc<dyn KeyProvider>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> PkiResult<Self> {
        config.validate()?;
        let mut cas = BTreeMap::new();
        for ca_config in std::iter::once(&config.root).chain(&config.subordinates) {
            let ca = CertificateAuthority::open(
                ca_config,
                KeyHandle::new(keys.clone(), ca_config.class.ca_id()),
                config.crl_validity(),
                store.clone(),
                clock.clone(),
            )
            .await?;
            cas.insert(ca_config.class, Arc::new(ca));
        }

        let root = cas
            .get(&CaClass::Root)
            .cloned()
            .ok_or_else(|| PkiError::not_found("certificate authority", CaClass::Root))?;
        let issued = root.ledger().records().await;
        for (class, ca) in &cas {
            let wanted = if class.is_root() {
                CertificateProfile::RootCa
            } else {
                CertificateProfile::SubordinateCa
            };
            let certificate = issued
                .iter()
                .rev()
                .find(|r| r.profile == wanted && r.public_key == ca.public_key() && !r.is_revoked())
                .cloned()
                .ok_or_else(|| PkiError::not_found("CA certificate", class))?;
            ca.install_certificate(certificate)?;
        }
        log::info!("opened hierarchy with {} CAs", cas.len());
        Ok(Self { cas })
    }

    pub fn ca_by_class(&self, class: CaClass) -> PkiResult<Arc<CertificateAuthority>> {
        self.cas
            .get(&class)
            .cloned()
            .ok_or_else(|| PkiError::not_found("certificate authority", class))
    }

    pub fn root(&self) -> PkiResult<Arc<CertificateAuthority>> {
        self.ca_by_class(CaClass::Root)
    }

    pub fn classes(&self) -> Vec<CaClass> {
        self.cas.keys().copied().collect()
    }

    pub(crate) fn authorities(&self) -> impl Iterator<Item = &Arc<CertificateAuthority>> {
        self.cas.values()
    }

    pub async fn issue(
        &self,
        class: CaClass,
        request: IssuanceRequest,
    ) -> PkiResult<CertificateRecord> {
        self.ca_by_class(class)?.issue(request).await
    }

    pub async fn revoke(
        &self,
        class: CaClass,
        serial: Serial,
        reason: RevocationReason,
    ) -> PkiResult<CertificateRecord> {
        self.ca_by_class(class)?.revoke(serial, reason).await
    }

    pub async fn renew(&self, class: CaClass, serial: Serial) -> PkiResult<CertificateRecord> {
        self.ca_by_class(class)?.renew(serial).await
    }

    pub async fn find(&self, class: CaClass, serial: Serial) -> PkiResult<CertificateRecord> {
        self.ca_by_class(class)?.find(serial).await
    }

    pub async fn build_crl(&self, class: CaClass) -> PkiResult<Arc<Crl>> {
        self.ca_by_class(class)?.build_crl().await
    }

    /// CA certificates from `class` up to and including the root.
    pub fn chain(&self, class: CaClass) -> PkiResult<Vec<CertificateRecord>> {
        let mut chain = Vec::with_capacity(2);
        for class in [class, CaClass::Root] {
            let ca = self.ca_by_class(class)?;
            let certificate = ca
                .certificate()
                .cloned()
                .ok_or_else(|| PkiError::not_found("CA certificate", class))?;
            chain.push(certificate);
            if class.is_root() {
                break;
            }
        }
        Ok(chain)
    }

    /// `leaf` followed by its issuing chain, PEM armoured.
    pub fn chain_pem(&self, leaf: &CertificateRecord) -> PkiResult<String> {
        let mut pem = leaf.to_pem();
        for ca in self.chain(leaf.issuer)? {
            if ca.serial == leaf.serial && ca.public_key == leaf.public_key {
                continue;
            }
            pem.push_str(&ca.to_pem());
        }
        Ok(pem)
    }
}
