use super::policy::{CaClass, CertificateProfile};
use crate::error::{PkiError, PkiResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// PEM tag for the signed JSON certificate format. Deliberately not the X.509
/// `CERTIFICATE` tag: these blocks are not DER and X.509 tooling must not try them.
pub const CERTIFICATE_PEM_LABEL: &str = "PKIMAN CERTIFICATE";
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Certificate serial number, unique within one CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(u64);

impl Serial {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode_upper(self.0.to_be_bytes())
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Serial {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s.trim(), 16)
            .map(Self)
            .map_err(|_| PkiError::Malformed(format!("invalid serial number {:?}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Dns,
    Ip,
    Email,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dns => "dns",
            Self::Ip => "ip",
            Self::Email => "email",
        })
    }
}

/// A typed subject alternative name, also used as the ACME identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    pub fn new(kind: IdentifierKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn dns(value: impl Into<String>) -> Self {
        Self::new(IdentifierKind::Dns, value)
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Self::new(IdentifierKind::Ip, value)
    }

    pub fn email(value: impl Into<String>) -> Self {
        Self::new(IdentifierKind::Email, value)
    }

    pub fn is_wildcard(&self) -> bool {
        self.kind == IdentifierKind::Dns && self.value.starts_with("*.")
    }

    /// Case-folded form; DNS names and mailboxes compare case-insensitively here.
    pub fn normalized(&self) -> Self {
        match self.kind {
            IdentifierKind::Dns | IdentifierKind::Email => {
                Self::new(self.kind, self.value.trim().trim_end_matches('.').to_ascii_lowercase())
            }
            IdentifierKind::Ip => Self::new(self.kind, self.value.trim()),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistinguishedName {
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl DistinguishedName {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organization: None,
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// OpenSSL one-line form, as written into `index.txt`.
    pub fn to_openssl(&self) -> String {
        match &self.organization {
            Some(org) => format!("/O={}/CN={}", org, self.common_name),
            None => format!("/CN={}", self.common_name),
        }
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CN={}", self.common_name)?;
        if let Some(org) = &self.organization {
            write!(f, ", O={}", org)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Valid,
    Revoked,
    Expired,
}

/// CRL reason codes accepted by this CA (RFC 5280 §5.3.1 numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    #[serde(rename = "removeFromCRL")]
    RemoveFromCrl,
    PrivilegeWithdrawn,
    #[serde(rename = "aACompromise")]
    AaCompromise,
}

impl RevocationReason {
    pub const ALL: [RevocationReason; 9] = [
        Self::Unspecified,
        Self::KeyCompromise,
        Self::AffiliationChanged,
        Self::Superseded,
        Self::CessationOfOperation,
        Self::CertificateHold,
        Self::RemoveFromCrl,
        Self::PrivilegeWithdrawn,
        Self::AaCompromise,
    ];

    pub const fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCrl => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AaCompromise => "aACompromise",
        }
    }
}

impl TryFrom<u8> for RevocationReason {
    type Error = PkiError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.code() == code)
            .ok_or_else(|| PkiError::BadRevocationReason(code.to_string()))
    }
}

impl FromStr for RevocationReason {
    type Err = PkiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PkiError::BadRevocationReason(s.to_string()))
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyUsage {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    KeyCertSign,
    CrlSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtendedKeyUsage {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicConstraints {
    pub ca: bool,
    pub path_len: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions {
    pub basic_constraints: BasicConstraints,
    pub key_usage: Vec<KeyUsage>,
    pub extended_key_usage: Vec<ExtendedKeyUsage>,
    pub subject_alt_names: Vec<Identifier>,
    pub subject_key_id: String,
    pub authority_key_id: String,
}

/// The signed portion of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TbsCertificate {
    pub version: u8,
    pub serial: Serial,
    pub signature_algorithm: String,
    pub issuer: DistinguishedName,
    pub subject: DistinguishedName,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key: Vec<u8>,
    pub profile: CertificateProfile,
    pub extensions: Extensions,
}

impl TbsCertificate {
    pub fn to_bytes(&self) -> PkiResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCertificate {
    pub tbs: TbsCertificate,
    pub signature: Vec<u8>,
}

impl SignedCertificate {
    pub fn encode(&self) -> PkiResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> PkiResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| PkiError::Malformed(format!("certificate does not decode: {}", err)))
    }

    pub fn from_pem(text: &str) -> PkiResult<Self> {
        Self::decode(&unarmour(CERTIFICATE_PEM_LABEL, text)?)
    }

    /// Every certificate in a PEM chain, leaf first.
    pub fn chain_from_pem(text: &str) -> PkiResult<Vec<Self>> {
        unarmour_all(CERTIFICATE_PEM_LABEL, text)?
            .iter()
            .map(|raw| Self::decode(raw))
            .collect()
    }
}

const PEM_CONFIG: pem::EncodeConfig =
    pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF);

pub(crate) fn armour(tag: &str, bytes: &[u8]) -> String {
    pem::encode_config(&pem::Pem::new(tag, bytes.to_vec()), PEM_CONFIG)
}

/// Contents of every block tagged `tag`, in order. Blocks with other tags are skipped.
pub(crate) fn unarmour_all(tag: &str, text: &str) -> PkiResult<Vec<Vec<u8>>> {
    Ok(pem::parse_many(text)?
        .into_iter()
        .filter(|block| block.tag() == tag)
        .map(pem::Pem::into_contents)
        .collect())
}

pub(crate) fn unarmour(tag: &str, text: &str) -> PkiResult<Vec<u8>> {
    unarmour_all(tag, text)?
        .into_iter()
        .next()
        .ok_or_else(|| PkiError::Malformed(format!("no {} block found", tag)))
}

/// Key identifier as carried in SKI/AKI extensions: leading 20 bytes of SHA-256.
pub fn key_identifier(public_key: &[u8]) -> String {
    hex::encode(&Sha256::digest(public_key)[..20])
}

pub fn fingerprint(raw: &[u8]) -> String {
    format!("{:x}", Sha256::digest(raw))
}

/// Ledger entry for one issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub serial: Serial,
    pub issuer: CaClass,
    pub subject: DistinguishedName,
    pub identifiers: Vec<Identifier>,
    pub profile: CertificateProfile,
    pub public_key: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub revocation: Option<Revocation>,
    pub raw: Vec<u8>,
    pub fingerprint: String,
}

impl CertificateRecord {
    /// Expiry is derived at read time; only revocation is ever stored.
    pub fn status_at(&self, now: DateTime<Utc>) -> CertificateStatus {
        if self.revocation.is_some() {
            CertificateStatus::Revoked
        } else if now >= self.not_after {
            CertificateStatus::Expired
        } else {
            CertificateStatus::Valid
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == CertificateStatus::Valid && now >= self.not_before
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.not_after - self.not_before
    }

    pub fn certificate(&self) -> PkiResult<SignedCertificate> {
        SignedCertificate::decode(&self.raw)
    }

    pub fn to_pem(&self) -> String {
        armour(CERTIFICATE_PEM_LABEL, &self.raw)
    }
}
