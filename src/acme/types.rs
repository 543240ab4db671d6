//! Status enums, their transition tables, and the request payloads the
//! order machine accepts once the transport layer has verified a JWS.

use crate::error::{PkiError, PkiResult};
use crate::pki::{CaClass, DistinguishedName, Identifier, Serial};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A status with a fixed table of legal successors.
pub trait Lifecycle: Copy + PartialEq + fmt::Display {
    const ENTITY: &'static str;

    fn allows(self, next: Self) -> bool;

    fn is_terminal(self) -> bool;

    /// Applies `next` if the table allows it; otherwise leaves `self` as is.
    fn advance(&mut self, next: Self) -> PkiResult<()> {
        if !self.allows(next) {
            return Err(PkiError::InvalidTransition {
                entity: Self::ENTITY,
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Valid,
    Deactivated,
    Revoked,
}

impl Lifecycle for AccountStatus {
    const ENTITY: &'static str = "account";

    fn allows(self, next: Self) -> bool {
        use AccountStatus::*;
        matches!(
            (self, next),
            (Pending, Valid) | (Pending | Valid, Deactivated) | (Pending | Valid, Revoked)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Deactivated | Self::Revoked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl Lifecycle for OrderStatus {
    const ENTITY: &'static str = "order";

    fn allows(self, next: Self) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, Processing)
                | (Processing, Valid)
                | (Pending | Ready | Processing, Invalid)
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl Lifecycle for AuthorizationStatus {
    const ENTITY: &'static str = "authorization";

    fn allows(self, next: Self) -> bool {
        use AuthorizationStatus::*;
        matches!(
            (self, next),
            (Pending, Valid | Invalid) | (Valid, Deactivated | Revoked | Expired)
        )
    }

    fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl Lifecycle for ChallengeStatus {
    const ENTITY: &'static str = "challenge";

    fn allows(self, next: Self) -> bool {
        use ChallengeStatus::*;
        matches!((self, next), (Pending, Processing) | (Processing, Valid | Invalid))
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

macro_rules! display_as_serde_name {
    ($($ty:ty { $($variant:ident => $name:literal),+ $(,)? })+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $name),+
                })
            }
        })+
    };
}

display_as_serde_name! {
    AccountStatus {
        Pending => "pending",
        Valid => "valid",
        Deactivated => "deactivated",
        Revoked => "revoked",
    }
    OrderStatus {
        Pending => "pending",
        Ready => "ready",
        Processing => "processing",
        Valid => "valid",
        Invalid => "invalid",
    }
    AuthorizationStatus {
        Pending => "pending",
        Valid => "valid",
        Invalid => "invalid",
        Deactivated => "deactivated",
        Expired => "expired",
        Revoked => "revoked",
    }
    ChallengeStatus {
        Pending => "pending",
        Processing => "processing",
        Valid => "valid",
        Invalid => "invalid",
    }
    ChallengeType {
        Http01 => "http-01",
        Dns01 => "dns-01",
        TlsAlpn01 => "tls-alpn-01",
        EmailReply00 => "email-reply-00",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    /// RFC 8823 S/MIME mailbox challenge.
    #[serde(rename = "email-reply-00")]
    EmailReply00,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcmeAccount {
    /// Base64url SHA-256 thumbprint of the account key.
    pub id: String,
    pub public_key: Vec<u8>,
    pub contact: Vec<String>,
    pub status: AccountStatus,
    pub terms_of_service_agreed: bool,
    pub created_at: DateTime<Utc>,
}

impl AcmeAccount {
    pub fn ensure_valid(&self) -> PkiResult<()> {
        if self.status != AccountStatus::Valid {
            return Err(PkiError::Unauthorized(format!(
                "account {} is {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

/// Where a finalized order's certificate lives. The ledger owns the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateRef {
    pub ca: CaClass,
    pub serial: Serial,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub terms_of_service_agreed: bool,
    #[serde(default)]
    pub only_return_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub not_after: Option<DateTime<Utc>>,
}

impl NewOrder {
    pub fn new(identifiers: impl IntoIterator<Item = Identifier>) -> Self {
        Self {
            identifiers: identifiers.into_iter().collect(),
            not_before: None,
            not_after: None,
        }
    }
}

/// The parts of a PKCS#10 request the machine acts on, already parsed and
/// signature-checked by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSigningRequest {
    pub subject: Option<DistinguishedName>,
    pub identifiers: Vec<Identifier>,
    pub public_key: Vec<u8>,
}
