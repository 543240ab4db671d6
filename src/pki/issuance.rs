use super::ca::CertificateAuthority;
use super::certificate::{
    CertificateRecord, DistinguishedName, Extensions, Identifier, SIGNATURE_ALGORITHM,
    SignedCertificate, TbsCertificate, fingerprint, key_identifier,
};
use super::policy::CertificateProfile;
use crate::crypto::check_public_key;
use crate::error::{PkiError, PkiResult};
use chrono::{DateTime, Duration, Utc};

/// What a caller asks a CA to certify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    pub subject: DistinguishedName,
    pub identifiers: Vec<Identifier>,
    pub public_key: Vec<u8>,
    pub ttl: Duration,
    /// Falls back to the first profile the CA's policy allows.
    pub profile: Option<CertificateProfile>,
    pub not_before: Option<DateTime<Utc>>,
}

impl IssuanceRequest {
    pub fn new(subject: DistinguishedName, public_key: Vec<u8>, ttl: Duration) -> Self {
        Self {
            subject,
            identifiers: Vec::new(),
            public_key,
            ttl,
            profile: None,
            not_before: None,
        }
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifiers.push(identifier);
        self
    }

    pub fn with_identifiers(mut self, identifiers: impl IntoIterator<Item = Identifier>) -> Self {
        self.identifiers.extend(identifiers);
        self
    }

    pub fn with_profile(mut self, profile: CertificateProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn starting_at(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }
}

fn dedup_normalized(identifiers: &[Identifier]) -> Vec<Identifier> {
    let mut out: Vec<Identifier> = Vec::with_capacity(identifiers.len());
    for identifier in identifiers.iter().map(Identifier::normalized) {
        if !out.contains(&identifier) {
            out.push(identifier);
        }
    }
    out
}

impl CertificateAuthority {
    /// The only path that creates ledger records. Everything that can be
    /// checked up front is checked before a serial is taken.
    pub async fn issue(&self, request: IssuanceRequest) -> PkiResult<CertificateRecord> {
        let profile = match request.profile {
            Some(profile) => profile,
            None => self.policy.default_profile().ok_or_else(|| {
                PkiError::Config(format!("{} has no issuance profiles", self.class))
            })?,
        };
        self.policy.check_profile(self.class, profile)?;

        let identifiers = dedup_normalized(&request.identifiers);
        self.policy.check_identifiers(profile, &identifiers)?;
        let wildcard = identifiers.iter().any(Identifier::is_wildcard);
        self.policy.check_ttl(request.ttl, wildcard)?;
        check_public_key(&request.public_key)?;

        let not_before = request.not_before.unwrap_or_else(|| self.clock.now());
        let not_after = not_before
            .checked_add_signed(request.ttl)
            .ok_or_else(|| PkiError::Malformed("certificate lifetime out of range".into()))?;
        if let Some(own) = self.certificate.get() {
            if not_after > own.not_after {
                return Err(PkiError::Malformed(format!(
                    "certificate would outlive its issuer ({} > {})",
                    not_after, own.not_after
                )));
            }
        }

        let _guard = self.issuance_lock.lock().await;
        let serial = self.serials.next().await?;

        let tbs = TbsCertificate {
            version: 3,
            serial,
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            issuer: self.name.clone(),
            subject: request.subject.clone(),
            not_before,
            not_after,
            public_key: request.public_key.clone(),
            profile,
            extensions: Extensions {
                basic_constraints: profile.basic_constraints(),
                key_usage: profile.key_usage(),
                extended_key_usage: profile.extended_key_usage(),
                subject_alt_names: identifiers.clone(),
                subject_key_id: key_identifier(&request.public_key),
                authority_key_id: key_identifier(&self.public_key),
            },
        };
        let signature = self.key.sign(&tbs.to_bytes()?).await?;
        let raw = SignedCertificate { tbs, signature }.encode()?;

        let record = CertificateRecord {
            serial,
            issuer: self.class,
            subject: request.subject,
            identifiers,
            profile,
            public_key: request.public_key,
            not_before,
            not_after,
            revocation: None,
            fingerprint: fingerprint(&raw),
            raw,
        };
        self.ledger.append(record.clone()).await?;

        log::info!(
            "{}: issued {:?} certificate {} for {}",
            self.class,
            profile,
            serial,
            record.subject
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CaConfig;
    use crate::crypto::{HardwareSecurityModule, KeyHandle, KeyProvider, verify_signature};
    use crate::pki::{CaClass, CertificateStatus, ExtendedKeyUsage};
    use crate::storage::MemoryStore;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use std::sync::Arc;

    async fn tls_ca(clock: Arc<ManualClock>) -> (CertificateAuthority, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let hsm = Arc::new(HardwareSecurityModule::new());
        hsm.generate("tls-ca").await.unwrap();
        let ca = CertificateAuthority::open(
            &CaConfig::for_class(CaClass::Tls),
            KeyHandle::new(hsm, "tls-ca"),
            Duration::days(7),
            store.clone(),
            clock,
        )
        .await
        .unwrap();
        (ca, store)
    }

    fn subject_key() -> Vec<u8> {
        SigningKey::generate(&mut OsRng).verifying_key().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn issues_tls_server_certificate() {
        let now = Utc::now();
        let clock = Arc::new(ManualClock::new(now));
        let (ca, _) = tls_ca(clock).await;

        let request = IssuanceRequest::new(
            DistinguishedName::new("example.org"),
            subject_key(),
            Duration::days(90),
        )
        .with_identifier(Identifier::dns("Example.org"));
        let record = ca.issue(request).await.unwrap();

        assert_eq!(record.serial.value(), 1);
        assert_eq!(record.not_before, now);
        assert_eq!(record.not_after - record.not_before, Duration::days(90));
        assert_eq!(record.identifiers, vec![Identifier::dns("example.org")]);
        assert_eq!(record.status_at(now), CertificateStatus::Valid);

        let cert = record.certificate().unwrap();
        assert!(!cert.tbs.extensions.basic_constraints.ca);
        assert_eq!(
            cert.tbs.extensions.extended_key_usage,
            vec![ExtendedKeyUsage::ServerAuth, ExtendedKeyUsage::ClientAuth]
        );
        verify_signature(ca.public_key(), &cert.tbs.to_bytes().unwrap(), &cert.signature).unwrap();
    }

    #[tokio::test]
    async fn rejected_requests_consume_no_serial() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (ca, _) = tls_ca(clock).await;

        let too_long = IssuanceRequest::new(
            DistinguishedName::new("example.org"),
            subject_key(),
            Duration::days(400),
        )
        .with_identifier(Identifier::dns("example.org"));
        assert!(matches!(ca.issue(too_long).await, Err(PkiError::Malformed(_))));

        let email = IssuanceRequest::new(
            DistinguishedName::new("fred"),
            subject_key(),
            Duration::days(30),
        )
        .with_identifier(Identifier::email("fred@green.no"));
        assert!(matches!(
            ca.issue(email).await,
            Err(PkiError::UnsupportedIdentifier(_))
        ));

        let short_key = IssuanceRequest::new(
            DistinguishedName::new("example.org"),
            vec![7; 16],
            Duration::days(30),
        )
        .with_identifier(Identifier::dns("example.org"));
        assert!(matches!(ca.issue(short_key).await, Err(PkiError::BadCsr(_))));

        assert_eq!(ca.last_serial().await, 0);
        assert_eq!(ca.total_issued().await, 0);
    }

    #[tokio::test]
    async fn persistence_failure_leaves_no_record() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (ca, store) = tls_ca(clock).await;
        store.set_fail_writes(true);
        let request = IssuanceRequest::new(
            DistinguishedName::new("example.org"),
            subject_key(),
            Duration::days(30),
        )
        .with_identifier(Identifier::dns("example.org"));
        let err = ca.issue(request).await.unwrap_err();
        assert!(err.is_internal());
        assert_eq!(ca.total_issued().await, 0);
    }

    #[tokio::test]
    async fn concurrent_issuance_yields_distinct_serials() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (ca, _) = tls_ca(clock).await;
        let ca = Arc::new(ca);

        let mut handles = Vec::new();
        for i in 0..32 {
            let ca = ca.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("host{}.green.no", i);
                let request = IssuanceRequest::new(
                    DistinguishedName::new(&name),
                    subject_key(),
                    Duration::days(30),
                )
                .with_identifier(Identifier::dns(name));
                ca.issue(request).await.unwrap().serial.value()
            }));
        }
        let mut serials = Vec::new();
        for handle in handles {
            serials.push(handle.await.unwrap());
        }
        serials.sort_unstable();
        assert_eq!(serials, (1..=32).collect::<Vec<u64>>());
    }
}
