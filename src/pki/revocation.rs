use super::ca::CertificateAuthority;
use super::certificate::{CertificateRecord, CertificateStatus, RevocationReason, Serial};
use super::issuance::IssuanceRequest;
use crate::error::{PkiError, PkiResult};

impl CertificateAuthority {
    /// Marks `serial` revoked as of now. A second revocation fails and keeps
    /// the original reason and timestamp.
    pub async fn revoke(
        &self,
        serial: Serial,
        reason: RevocationReason,
    ) -> PkiResult<CertificateRecord> {
        let record = self
            .ledger
            .mark_revoked(serial, reason, self.clock.now())
            .await?;
        log::info!("{}: revoked {} ({})", self.class, serial, reason);
        Ok(record)
    }

    /// Revocation by numeric CRL reason code, as carried in ACME revokeCert.
    pub async fn revoke_with_code(&self, serial: Serial, code: u8) -> PkiResult<CertificateRecord> {
        let reason = RevocationReason::try_from(code)?;
        self.revoke(serial, reason).await
    }

    /// Reissues a still-valid certificate under a fresh serial with the same
    /// subject, names, key, profile and lifetime. The old record is untouched.
    pub async fn renew(&self, serial: Serial) -> PkiResult<CertificateRecord> {
        let current = self.ledger.find(serial).await?;
        if current.profile.is_ca() {
            return Err(PkiError::Malformed(format!(
                "{} is a CA certificate and is not renewed here",
                serial
            )));
        }
        match current.status_at(self.clock.now()) {
            CertificateStatus::Valid => {}
            CertificateStatus::Revoked => return Err(PkiError::AlreadyRevoked(serial)),
            CertificateStatus::Expired => {
                return Err(PkiError::Malformed(format!(
                    "certificate {} has expired and cannot be renewed",
                    serial
                )));
            }
        }

        let ttl = current.ttl();
        let request = IssuanceRequest::new(current.subject, current.public_key, ttl)
            .with_identifiers(current.identifiers)
            .with_profile(current.profile);
        let renewed = self.issue(request).await?;
        log::info!("{}: renewed {} as {}", self.class, serial, renewed.serial);
        Ok(renewed)
    }
}
