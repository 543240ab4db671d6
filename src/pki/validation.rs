use super::ca::CertificateAuthority;
use super::certificate::{
    CERTIFICATE_PEM_LABEL, DistinguishedName, Revocation, Serial, SignedCertificate,
    key_identifier, unarmour,
};
use super::hierarchy::CaHierarchy;
use super::policy::CaClass;
use crate::crypto::verify_signature;
use crate::error::PkiResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of checking a presented certificate against this hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub serial: Serial,
    pub subject: DistinguishedName,
    pub issuer: Option<CaClass>,
    pub valid: bool,
    pub expired: bool,
    pub revoked: Option<Revocation>,
    pub chain_error: Option<String>,
}

impl ValidationReport {
    fn broken(certificate: &SignedCertificate, issuer: Option<CaClass>, error: String) -> Self {
        Self {
            serial: certificate.tbs.serial,
            subject: certificate.tbs.subject.clone(),
            issuer,
            valid: false,
            expired: false,
            revoked: None,
            chain_error: Some(error),
        }
    }
}

impl CaHierarchy {
    fn issuer_of(&self, certificate: &SignedCertificate) -> Option<Arc<CertificateAuthority>> {
        let aki = &certificate.tbs.extensions.authority_key_id;
        self.authorities()
            .find(|ca| &key_identifier(ca.public_key()) == aki)
            .cloned()
    }

    /// Walks issuer links up to the root, checking every signature.
    fn verify_chain(&self, certificate: &SignedCertificate) -> Result<Arc<CertificateAuthority>, String> {
        let issuer = self
            .issuer_of(certificate)
            .ok_or_else(|| "issuer is not part of this hierarchy".to_string())?;
        let tbs = certificate.tbs.to_bytes().map_err(|e| e.to_string())?;
        verify_signature(issuer.public_key(), &tbs, &certificate.signature)
            .map_err(|_| format!("signature does not verify under {}", issuer.class()))?;

        let mut current = issuer.clone();
        while !current.class().is_root() {
            let own = current
                .certificate()
                .ok_or_else(|| format!("{} has no certificate installed", current.class()))?
                .certificate()
                .map_err(|e| e.to_string())?;
            let parent = self
                .issuer_of(&own)
                .ok_or_else(|| format!("{} chains to an unknown issuer", current.class()))?;
            let own_tbs = own.tbs.to_bytes().map_err(|e| e.to_string())?;
            verify_signature(parent.public_key(), &own_tbs, &own.signature)
                .map_err(|_| format!("{} certificate signature is invalid", current.class()))?;
            if Arc::ptr_eq(&parent, &current) {
                break;
            }
            current = parent;
        }
        Ok(issuer)
    }

    /// Checks a PEM certificate: signature chain, ledger membership,
    /// revocation and validity window at `now`.
    pub async fn validate(&self, text: &str, now: DateTime<Utc>) -> PkiResult<ValidationReport> {
        let raw = unarmour(CERTIFICATE_PEM_LABEL, text)?;
        let certificate = SignedCertificate::decode(&raw)?;
        let issuer = match self.verify_chain(&certificate) {
            Ok(issuer) => issuer,
            Err(error) => {
                log::debug!("chain check failed for {}: {}", certificate.tbs.serial, error);
                return Ok(ValidationReport::broken(&certificate, None, error));
            }
        };

        let serial = certificate.tbs.serial;
        let record = match issuer.find(serial).await {
            Ok(record) if record.raw == raw => record,
            _ => {
                return Ok(ValidationReport::broken(
                    &certificate,
                    Some(issuer.class()),
                    format!("{} has no ledger entry for {}", issuer.class(), serial),
                ));
            }
        };

        let expired = now >= record.not_after;
        let revoked = record.revocation;
        Ok(ValidationReport {
            serial,
            subject: record.subject.clone(),
            issuer: Some(issuer.class()),
            valid: record.is_valid_at(now),
            expired,
            revoked,
            chain_error: None,
        })
    }
}
