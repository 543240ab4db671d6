use super::types::ChallengeType;
use crate::error::AcmeProblem;
use crate::pki::Identifier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything a validator needs to check one challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTask {
    pub order_id: String,
    pub authorization_id: String,
    pub challenge_id: String,
    pub kind: ChallengeType,
    pub identifier: Identifier,
    pub token: String,
    /// `token || '.' || account thumbprint`, RFC 8555 §8.1.
    pub key_authorization: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Valid,
    Invalid(AcmeProblem),
}

/// Performs the network check for a challenge. Implementations report
/// failures as `Invalid` with a problem (`dns`, `tls`, `incorrectResponse`, ...)
/// rather than erroring.
#[async_trait]
pub trait ChallengeValidator: Send + Sync {
    async fn validate(&self, task: ValidationTask) -> ValidationOutcome;
}

/// Accepts every challenge. For demos and local testing only.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllValidator;

#[async_trait]
impl ChallengeValidator for AcceptAllValidator {
    async fn validate(&self, task: ValidationTask) -> ValidationOutcome {
        log::debug!("accepting {} challenge for {}", task.kind, task.identifier);
        ValidationOutcome::Valid
    }
}
