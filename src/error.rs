//! Error taxonomy shared by the CA engine and the ACME front-end.
//!
//! Every [`PkiError`] classifies onto one [`AcmeErrorKind`], the canonical
//! RFC 8555 §6.7 vocabulary surfaced to clients. Internal failures keep their
//! cause in the error value but are reported as `serverInternal`.

use crate::pki::{Identifier, Serial};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type PkiResult<T> = Result<T, PkiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AcmeErrorKind {
    AccountDoesNotExist,
    AlreadyRevoked,
    #[serde(rename = "badCSR")]
    BadCsr,
    BadNonce,
    BadPublicKey,
    BadRevocationReason,
    BadSignatureAlgorithm,
    Caa,
    Compound,
    Dns,
    IncorrectResponse,
    InvalidContact,
    Malformed,
    OrderNotReady,
    RateLimited,
    RejectedIdentifier,
    ServerInternal,
    Tls,
    Unauthorized,
    UnsupportedIdentifier,
    UserActionRequired,
}

impl AcmeErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::AccountDoesNotExist => "accountDoesNotExist",
            Self::AlreadyRevoked => "alreadyRevoked",
            Self::BadCsr => "badCSR",
            Self::BadNonce => "badNonce",
            Self::BadPublicKey => "badPublicKey",
            Self::BadRevocationReason => "badRevocationReason",
            Self::BadSignatureAlgorithm => "badSignatureAlgorithm",
            Self::Caa => "caa",
            Self::Compound => "compound",
            Self::Dns => "dns",
            Self::IncorrectResponse => "incorrectResponse",
            Self::InvalidContact => "invalidContact",
            Self::Malformed => "malformed",
            Self::OrderNotReady => "orderNotReady",
            Self::RateLimited => "rateLimited",
            Self::RejectedIdentifier => "rejectedIdentifier",
            Self::ServerInternal => "serverInternal",
            Self::Tls => "tls",
            Self::Unauthorized => "unauthorized",
            Self::UnsupportedIdentifier => "unsupportedIdentifier",
            Self::UserActionRequired => "userActionRequired",
        }
    }

    pub fn urn(self) -> String {
        format!("urn:ietf:params:acme:error:{}", self.code())
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::AccountDoesNotExist => "The request specified an account that does not exist",
            Self::AlreadyRevoked => {
                "The request specified a certificate to revoke that has already been revoked"
            }
            Self::BadCsr => "The CSR is unacceptable (e.g., due to a short key)",
            Self::BadNonce => "The client sent an unacceptable anti-replay nonce",
            Self::BadPublicKey => "The JWS was signed by a public key the server does not support",
            Self::BadRevocationReason => {
                "The revocation reason provided is not allowed by the server"
            }
            Self::BadSignatureAlgorithm => {
                "The JWS was signed with an algorithm the server does not support"
            }
            Self::Caa => {
                "Certification Authority Authorization (CAA) records forbid the CA from issuing a certificate for the identifier"
            }
            Self::Compound => "The server detected multiple problems with the request",
            Self::Dns => "The identifier is invalid",
            Self::IncorrectResponse => "The server could not parse a response from the client",
            Self::InvalidContact => {
                "One or more of the contact URIs provided by the client were invalid"
            }
            Self::Malformed => "The request message was malformed",
            Self::OrderNotReady => {
                "The request specified an order that is not ready to be finalized"
            }
            Self::RateLimited => "The request exceeds a rate limit",
            Self::RejectedIdentifier => "The server will not issue certificates for the identifier",
            Self::ServerInternal => "The server experienced an internal error",
            Self::Tls => "The server received a TLS error during validation",
            Self::Unauthorized => "The client lacks sufficient authorization",
            Self::UnsupportedIdentifier => "An identifier is of an unsupported type",
            Self::UserActionRequired => {
                "Visit the 'instance' URL and take actions specified there"
            }
        }
    }

    pub const fn http_status(self) -> u16 {
        match self {
            Self::Unauthorized | Self::OrderNotReady | Self::UserActionRequired | Self::Caa => 403,
            Self::RateLimited => 429,
            Self::ServerInternal => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for AcmeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Client-facing problem document (RFC 7807 shape used by RFC 8555).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcmeProblem {
    pub kind: AcmeErrorKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<AcmeProblem>,
}

impl AcmeProblem {
    pub fn new(kind: AcmeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            identifier: None,
            subproblems: Vec::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn type_urn(&self) -> String {
        self.kind.urn()
    }

    pub fn status(&self) -> u16 {
        self.kind.http_status()
    }
}

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("serial {0} already present in ledger")]
    DuplicateSerial(Serial),

    #[error("certificate {0} has already been revoked")]
    AlreadyRevoked(Serial),

    #[error("revocation reason {0} is not allowed")]
    BadRevocationReason(String),

    #[error("serial number keyspace exhausted")]
    ExhaustedKeyspace,

    #[error("unsupported identifier: {0}")]
    UnsupportedIdentifier(String),

    #[error("rejected identifier: {0}")]
    RejectedIdentifier(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unacceptable CSR: {0}")]
    BadCsr(String),

    #[error("unacceptable public key: {0}")]
    BadPublicKey(String),

    #[error("invalid contact: {0}")]
    InvalidContact(String),

    #[error("nonce is unknown, expired, or already used")]
    BadNonce,

    #[error("order {order} is not ready for finalization (status {status})")]
    OrderNotReady { order: String, status: String },

    #[error("illegal {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("account does not exist")]
    AccountDoesNotExist,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{} problems found in request", .0.len())]
    Compound(Vec<AcmeProblem>),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("issuance did not complete within {0:?}")]
    IssuanceTimeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Encoding(#[from] bincode::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("bad PEM armour: {0}")]
    Pem(#[from] pem::PemError),
}

impl PkiError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> AcmeErrorKind {
        match self {
            Self::NotFound { .. }
            | Self::Malformed(_)
            | Self::InvalidTransition { .. }
            | Self::Pem(_) => AcmeErrorKind::Malformed,
            Self::AlreadyRevoked(_) => AcmeErrorKind::AlreadyRevoked,
            Self::BadRevocationReason(_) => AcmeErrorKind::BadRevocationReason,
            Self::UnsupportedIdentifier(_) => AcmeErrorKind::UnsupportedIdentifier,
            Self::RejectedIdentifier(_) => AcmeErrorKind::RejectedIdentifier,
            Self::BadCsr(_) => AcmeErrorKind::BadCsr,
            Self::BadPublicKey(_) => AcmeErrorKind::BadPublicKey,
            Self::InvalidContact(_) => AcmeErrorKind::InvalidContact,
            Self::BadNonce => AcmeErrorKind::BadNonce,
            Self::OrderNotReady { .. } => AcmeErrorKind::OrderNotReady,
            Self::AccountDoesNotExist => AcmeErrorKind::AccountDoesNotExist,
            Self::Unauthorized(_) => AcmeErrorKind::Unauthorized,
            Self::Compound(_) => AcmeErrorKind::Compound,
            Self::DuplicateSerial(_)
            | Self::ExhaustedKeyspace
            | Self::Signing(_)
            | Self::Storage(_)
            | Self::IssuanceTimeout(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Encoding(_)
            | Self::Csv(_) => AcmeErrorKind::ServerInternal,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == AcmeErrorKind::ServerInternal
    }

    /// Builds the problem document reported to the client. Internal causes are
    /// logged here and replaced by the generic description.
    pub fn problem(&self) -> AcmeProblem {
        let kind = self.kind();
        match self {
            Self::Compound(subproblems) => AcmeProblem {
                kind,
                detail: self.to_string(),
                identifier: None,
                subproblems: subproblems.clone(),
            },
            _ if self.is_internal() => {
                log::error!("internal failure reported as serverInternal: {}", self);
                AcmeProblem::new(kind, kind.description())
            }
            _ => AcmeProblem::new(kind, self.to_string()),
        }
    }
}
