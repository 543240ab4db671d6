//! Per-class issuance policy: which profiles a CA signs, which identifier
//! types each profile carries, and how long certificates may live.

use super::certificate::{BasicConstraints, ExtendedKeyUsage, Identifier, IdentifierKind, KeyUsage};
use crate::config::seconds;
use crate::error::{PkiError, PkiResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaClass {
    Root,
    Email,
    Tls,
    CodeSign,
}

impl CaClass {
    /// Stable identifier used for key material and persisted state.
    pub const fn ca_id(self) -> &'static str {
        match self {
            Self::Root => "root-ca",
            Self::Email => "email-ca",
            Self::Tls => "tls-ca",
            Self::CodeSign => "software-ca",
        }
    }

    pub const fn is_root(self) -> bool {
        matches!(self, Self::Root)
    }
}

impl fmt::Display for CaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ca_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateProfile {
    RootCa,
    SubordinateCa,
    TlsServer,
    TlsClient,
    CodeSigning,
    Email,
}

impl CertificateProfile {
    pub const fn is_ca(self) -> bool {
        matches!(self, Self::RootCa | Self::SubordinateCa)
    }

    pub const fn accepts(self, kind: IdentifierKind) -> bool {
        matches!(
            (self, kind),
            (Self::TlsServer, IdentifierKind::Dns | IdentifierKind::Ip)
                | (Self::TlsClient, IdentifierKind::Dns | IdentifierKind::Email)
                | (Self::Email, IdentifierKind::Email)
        )
    }

    pub const fn requires_identifiers(self) -> bool {
        matches!(self, Self::TlsServer | Self::Email)
    }

    pub fn basic_constraints(self) -> BasicConstraints {
        match self {
            Self::RootCa => BasicConstraints {
                ca: true,
                path_len: None,
            },
            Self::SubordinateCa => BasicConstraints {
                ca: true,
                path_len: Some(0),
            },
            _ => BasicConstraints {
                ca: false,
                path_len: None,
            },
        }
    }

    pub fn key_usage(self) -> Vec<KeyUsage> {
        match self {
            Self::RootCa | Self::SubordinateCa => vec![KeyUsage::KeyCertSign, KeyUsage::CrlSign],
            Self::TlsServer | Self::Email => {
                vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment]
            }
            Self::TlsClient | Self::CodeSigning => vec![KeyUsage::DigitalSignature],
        }
    }

    pub fn extended_key_usage(self) -> Vec<ExtendedKeyUsage> {
        match self {
            Self::RootCa | Self::SubordinateCa => Vec::new(),
            Self::TlsServer => vec![ExtendedKeyUsage::ServerAuth, ExtendedKeyUsage::ClientAuth],
            Self::TlsClient => vec![ExtendedKeyUsage::ClientAuth],
            Self::CodeSigning => vec![ExtendedKeyUsage::CodeSigning],
            Self::Email => vec![ExtendedKeyUsage::EmailProtection],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPolicy {
    pub max_ttl_secs: u64,
    pub profiles: Vec<CertificateProfile>,
    #[serde(default)]
    pub allow_wildcard: bool,
    /// Tighter ceiling for certificates naming a wildcard.
    #[serde(default)]
    pub wildcard_max_ttl_secs: Option<u64>,
}

impl ClassPolicy {
    pub fn for_class(class: CaClass) -> Self {
        match class {
            CaClass::Root => Self {
                max_ttl_secs: 7305 * DAY,
                profiles: vec![CertificateProfile::RootCa, CertificateProfile::SubordinateCa],
                allow_wildcard: false,
                wildcard_max_ttl_secs: None,
            },
            CaClass::Email => Self {
                max_ttl_secs: 730 * DAY,
                profiles: vec![CertificateProfile::Email],
                allow_wildcard: false,
                wildcard_max_ttl_secs: None,
            },
            CaClass::Tls => Self {
                max_ttl_secs: 398 * DAY,
                profiles: vec![CertificateProfile::TlsServer, CertificateProfile::TlsClient],
                allow_wildcard: true,
                wildcard_max_ttl_secs: Some(90 * DAY),
            },
            CaClass::CodeSign => Self {
                max_ttl_secs: 1826 * DAY,
                profiles: vec![CertificateProfile::CodeSigning],
                allow_wildcard: false,
                wildcard_max_ttl_secs: None,
            },
        }
    }

    pub fn max_ttl(&self) -> Duration {
        seconds(self.max_ttl_secs)
    }

    pub fn default_profile(&self) -> Option<CertificateProfile> {
        self.profiles.first().copied()
    }

    pub fn check_profile(&self, class: CaClass, profile: CertificateProfile) -> PkiResult<()> {
        if !self.profiles.contains(&profile) || (profile.is_ca() && !class.is_root()) {
            return Err(PkiError::Malformed(format!(
                "{} does not issue {:?} certificates",
                class, profile
            )));
        }
        Ok(())
    }

    pub fn check_identifiers(
        &self,
        profile: CertificateProfile,
        identifiers: &[Identifier],
    ) -> PkiResult<()> {
        if identifiers.is_empty() && profile.requires_identifiers() {
            return Err(PkiError::Malformed(format!(
                "{:?} certificates need at least one identifier",
                profile
            )));
        }
        for identifier in identifiers {
            if !profile.accepts(identifier.kind) {
                return Err(PkiError::UnsupportedIdentifier(format!(
                    "{} identifiers are not issued under the {:?} profile",
                    identifier.kind, profile
                )));
            }
            validate_identifier(identifier)?;
            if identifier.is_wildcard() && !self.allow_wildcard {
                return Err(PkiError::RejectedIdentifier(format!(
                    "wildcard names are not issued: {}",
                    identifier.value
                )));
            }
        }
        Ok(())
    }

    pub fn check_ttl(&self, ttl: Duration, wildcard: bool) -> PkiResult<()> {
        if ttl <= Duration::zero() {
            return Err(PkiError::Malformed("certificate lifetime must be positive".into()));
        }
        let ceiling = match self.wildcard_max_ttl_secs {
            Some(secs) if wildcard => seconds(secs).min(self.max_ttl()),
            _ => self.max_ttl(),
        };
        if ttl > ceiling {
            return Err(PkiError::Malformed(format!(
                "requested lifetime of {} days exceeds the {} day maximum",
                ttl.num_days(),
                ceiling.num_days()
            )));
        }
        Ok(())
    }
}

/// Syntax check shared by issuance and ACME order creation.
pub fn validate_identifier(identifier: &Identifier) -> PkiResult<()> {
    match identifier.kind {
        IdentifierKind::Dns => validate_dns_name(&identifier.value, true),
        IdentifierKind::Ip => identifier
            .value
            .parse::<IpAddr>()
            .map(|_| ())
            .map_err(|_| PkiError::Malformed(format!("invalid IP address {:?}", identifier.value))),
        IdentifierKind::Email => {
            let (local, domain) = identifier.value.split_once('@').ok_or_else(|| {
                PkiError::Malformed(format!("invalid mailbox {:?}", identifier.value))
            })?;
            if local.is_empty() || local.chars().any(char::is_whitespace) {
                return Err(PkiError::Malformed(format!(
                    "invalid mailbox {:?}",
                    identifier.value
                )));
            }
            validate_dns_name(domain, false)
        }
    }
}

fn validate_dns_name(name: &str, wildcard_ok: bool) -> PkiResult<()> {
    let host = match name.strip_prefix("*.") {
        Some(rest) if wildcard_ok => rest,
        Some(_) => {
            return Err(PkiError::Malformed(format!("wildcard not permitted in {:?}", name)));
        }
        None => name,
    };
    if host.is_empty() || host.len() > 253 {
        return Err(PkiError::Malformed(format!("invalid DNS name length in {:?}", name)));
    }

    let labels: Vec<&str> = host.split('.').collect();
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err(PkiError::Malformed(format!("empty or overlong label in {:?}", name)));
        }
        if label.contains('_') {
            return Err(PkiError::Malformed(format!("Invalid underscore in DNS name {:?}", name)));
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            || label.starts_with('-')
            || label.ends_with('-')
        {
            return Err(PkiError::Malformed(format!("invalid character in DNS name {:?}", name)));
        }
    }
    if labels.len() < 2 {
        return Err(PkiError::RejectedIdentifier(format!(
            "this CA will not issue for single-label name {:?}",
            name
        )));
    }
    if labels.iter().all(|l| l.bytes().all(|b| b.is_ascii_digit())) {
        return Err(PkiError::Malformed(format!(
            "{:?} is an IP address, not a DNS name",
            name
        )));
    }
    Ok(())
}
