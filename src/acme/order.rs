use super::types::{
    AuthorizationStatus, CertificateRef, ChallengeStatus, ChallengeType, Lifecycle, OrderStatus,
};
use super::validator::ValidationOutcome;
use crate::error::{AcmeErrorKind, AcmeProblem, PkiError, PkiResult};
use crate::pki::{CaClass, Identifier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcmeChallenge {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub status: ChallengeStatus,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AcmeProblem>,
}

impl AcmeChallenge {
    pub fn new(id: String, kind: ChallengeType, token: String) -> Self {
        Self {
            id,
            kind,
            status: ChallengeStatus::Pending,
            token,
            validated: None,
            error: None,
        }
    }

    fn is_outstanding(&self) -> bool {
        matches!(
            self.status,
            ChallengeStatus::Pending | ChallengeStatus::Processing
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcmeAuthorization {
    pub id: String,
    pub order_id: String,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub wildcard: bool,
    pub expires: DateTime<Utc>,
    pub challenges: Vec<AcmeChallenge>,
}

impl AcmeAuthorization {
    pub fn challenge(&self, id: &str) -> Option<&AcmeChallenge> {
        self.challenges.iter().find(|c| c.id == id)
    }

    fn challenge_mut(&mut self, id: &str) -> PkiResult<&mut AcmeChallenge> {
        self.challenges
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| PkiError::not_found("challenge", id))
    }

    /// Moves the challenge to processing. Only a pending authorization can
    /// have challenges attempted.
    pub fn start_challenge(&mut self, challenge_id: &str) -> PkiResult<AcmeChallenge> {
        if self.status != AuthorizationStatus::Pending {
            return Err(PkiError::Malformed(format!(
                "authorization {} is {}",
                self.id, self.status
            )));
        }
        let challenge = self.challenge_mut(challenge_id)?;
        challenge.status.advance(ChallengeStatus::Processing)?;
        Ok(challenge.clone())
    }

    /// Applies a validator result. A failed challenge sinks the authorization
    /// only once no sibling challenge is still outstanding.
    pub fn record_outcome(
        &mut self,
        challenge_id: &str,
        outcome: ValidationOutcome,
        now: DateTime<Utc>,
    ) -> PkiResult<AcmeChallenge> {
        let challenge = self.challenge_mut(challenge_id)?;
        match outcome {
            ValidationOutcome::Valid => {
                challenge.status.advance(ChallengeStatus::Valid)?;
                challenge.validated = Some(now);
            }
            ValidationOutcome::Invalid(problem) => {
                challenge.status.advance(ChallengeStatus::Invalid)?;
                challenge.error = Some(problem);
            }
        }
        let challenge = challenge.clone();

        if self.status == AuthorizationStatus::Pending {
            match challenge.status {
                ChallengeStatus::Valid => self.status.advance(AuthorizationStatus::Valid)?,
                ChallengeStatus::Invalid
                    if !self.challenges.iter().any(AcmeChallenge::is_outstanding) =>
                {
                    self.status.advance(AuthorizationStatus::Invalid)?
                }
                _ => {}
            }
        }
        Ok(challenge)
    }

    /// Pending past expiry becomes invalid, valid past expiry becomes expired.
    fn expire(&mut self, now: DateTime<Utc>) -> PkiResult<bool> {
        if now < self.expires {
            return Ok(false);
        }
        let next = match self.status {
            AuthorizationStatus::Pending => AuthorizationStatus::Invalid,
            AuthorizationStatus::Valid => AuthorizationStatus::Expired,
            _ => return Ok(false),
        };
        self.status.advance(next)?;
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcmeOrder {
    pub id: String,
    pub account_id: String,
    pub status: OrderStatus,
    pub identifiers: Vec<Identifier>,
    pub ca: CaClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    pub expires: DateTime<Utc>,
    pub authorizations: Vec<AcmeAuthorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AcmeProblem>,
}

impl AcmeOrder {
    pub fn can_finalize(&self) -> bool {
        self.status == OrderStatus::Ready
    }

    pub fn authorization(&self, id: &str) -> Option<&AcmeAuthorization> {
        self.authorizations.iter().find(|a| a.id == id)
    }

    pub(crate) fn authorization_mut(&mut self, id: &str) -> PkiResult<&mut AcmeAuthorization> {
        self.authorizations
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| PkiError::not_found("authorization", id))
    }

    /// Applies every time-driven transition due at `now`. Returns whether
    /// anything changed.
    pub fn refresh(&mut self, now: DateTime<Utc>, processing_bound: Duration) -> PkiResult<bool> {
        let mut changed = false;
        for authorization in &mut self.authorizations {
            changed |= authorization.expire(now)?;
        }

        match self.status {
            OrderStatus::Pending | OrderStatus::Ready if now >= self.expires => {
                self.status.advance(OrderStatus::Invalid)?;
                return Ok(true);
            }
            OrderStatus::Processing => {
                let stuck = self
                    .processing_since
                    .is_none_or(|since| {
                        since
                            .checked_add_signed(processing_bound)
                            .is_some_and(|limit| now >= limit)
                    });
                if stuck {
                    self.fail(AcmeProblem::new(
                        AcmeErrorKind::ServerInternal,
                        "finalization did not complete in time",
                    ))?;
                    return Ok(true);
                }
            }
            _ => {}
        }
        Ok(self.recompute()? || changed)
    }

    /// Derives the order status from its authorizations.
    pub fn recompute(&mut self) -> PkiResult<bool> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Ready) {
            return Ok(false);
        }
        let failed = self.authorizations.iter().any(|a| {
            !matches!(
                a.status,
                AuthorizationStatus::Pending | AuthorizationStatus::Valid
            )
        });
        if failed {
            self.status.advance(OrderStatus::Invalid)?;
            return Ok(true);
        }
        let all_valid = self
            .authorizations
            .iter()
            .all(|a| a.status == AuthorizationStatus::Valid);
        if all_valid && self.status == OrderStatus::Pending {
            self.status.advance(OrderStatus::Ready)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn begin_processing(&mut self, now: DateTime<Utc>) -> PkiResult<()> {
        if self.status != OrderStatus::Ready {
            return Err(PkiError::OrderNotReady {
                order: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.status.advance(OrderStatus::Processing)?;
        self.processing_since = Some(now);
        Ok(())
    }

    pub(crate) fn complete(&mut self, certificate: CertificateRef) -> PkiResult<()> {
        self.status.advance(OrderStatus::Valid)?;
        self.certificate = Some(certificate);
        self.processing_since = None;
        Ok(())
    }

    pub(crate) fn fail(&mut self, problem: AcmeProblem) -> PkiResult<()> {
        self.status.advance(OrderStatus::Invalid)?;
        self.error = Some(problem);
        self.processing_since = None;
        Ok(())
    }
}
