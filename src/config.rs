//! Runtime configuration.
//!
//! Durations are expressed in whole seconds (milliseconds for the finalize
//! bound) so that a JSON file can be written by hand.

use crate::acme::ChallengeType;
use crate::error::{PkiError, PkiResult};
use crate::pki::{CaClass, ClassPolicy, DistinguishedName};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const DAY: u64 = 24 * 60 * 60;

/// Longest duration any setting may carry; keeps `now + duration` representable.
pub const MAX_DURATION_SECS: u64 = 100 * 366 * DAY;

/// Converts a configured duration to `chrono`, refusing values whose sum with `now`
/// would leave the representable range.
pub fn deadline(
    now: chrono::DateTime<chrono::Utc>,
    after: Duration,
) -> PkiResult<chrono::DateTime<chrono::Utc>> {
    now.checked_add_signed(after)
        .ok_or_else(|| PkiError::Config(format!("duration {} overflows the calendar", after)))
}

fn check_duration(name: &str, secs: u64) -> PkiResult<()> {
    if secs == 0 {
        return Err(PkiError::Config(format!("{} must be positive", name)));
    }
    if secs > MAX_DURATION_SECS {
        return Err(PkiError::Config(format!(
            "{} exceeds the {} second ceiling",
            name, MAX_DURATION_SECS
        )));
    }
    Ok(())
}

/// Converts configured seconds into a `chrono::Duration`, saturating.
pub fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pki: PkiConfig,
    pub acme: AcmeConfig,
}

impl Config {
    pub fn from_json(text: &str) -> PkiResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PkiResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        log::info!("loaded configuration from {}", path.display());
        Self::from_json(&text)
    }

    pub fn validate(&self) -> PkiResult<()> {
        self.pki.validate()?;
        self.acme.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaConfig {
    pub class: CaClass,
    pub common_name: String,
    #[serde(default)]
    pub organization: Option<String>,
    /// Lifetime of the CA's own certificate.
    pub validity_days: u32,
    pub policy: ClassPolicy,
}

impl CaConfig {
    pub fn for_class(class: CaClass) -> Self {
        let (common_name, validity_days) = match class {
            CaClass::Root => ("Green Root CA", 7305),
            CaClass::Email => ("Green Email CA", 3652),
            CaClass::Tls => ("Green TLS CA", 3652),
            CaClass::CodeSign => ("Green Software CA", 3652),
        };
        Self {
            class,
            common_name: common_name.to_string(),
            organization: Some("Green AS".to_string()),
            validity_days,
            policy: ClassPolicy::for_class(class),
        }
    }

    pub fn name(&self) -> DistinguishedName {
        let name = DistinguishedName::new(&self.common_name);
        match &self.organization {
            Some(org) => name.with_organization(org),
            None => name,
        }
    }

    pub fn validity(&self) -> Duration {
        Duration::days(i64::from(self.validity_days))
    }

    pub fn validate(&self) -> PkiResult<()> {
        let name = format!("{} validity_days", self.class);
        check_duration(&name, u64::from(self.validity_days) * DAY)?;
        check_duration(&format!("{} max_ttl_secs", self.class), self.policy.max_ttl_secs)?;
        if let Some(secs) = self.policy.wildcard_max_ttl_secs {
            check_duration(&format!("{} wildcard_max_ttl_secs", self.class), secs)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    pub root: CaConfig,
    pub subordinates: Vec<CaConfig>,
    pub crl_validity_secs: u64,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            root: CaConfig::for_class(CaClass::Root),
            subordinates: vec![
                CaConfig::for_class(CaClass::Email),
                CaConfig::for_class(CaClass::Tls),
                CaConfig::for_class(CaClass::CodeSign),
            ],
            crl_validity_secs: 7 * DAY,
        }
    }
}

impl PkiConfig {
    pub fn crl_validity(&self) -> Duration {
        seconds(self.crl_validity_secs)
    }

    pub fn validate(&self) -> PkiResult<()> {
        if self.root.class != CaClass::Root {
            return Err(PkiError::Config("root CA must have class root".into()));
        }
        self.root.validate()?;
        let mut seen = HashSet::new();
        for sub in &self.subordinates {
            sub.validate()?;
            if sub.class.is_root() {
                return Err(PkiError::Config("a subordinate cannot have class root".into()));
            }
            if !seen.insert(sub.class) {
                return Err(PkiError::Config(format!("{} configured twice", sub.class)));
            }
        }
        check_duration("crl_validity_secs", self.crl_validity_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeConfig {
    pub nonce_validity_secs: u64,
    pub max_outstanding_nonces: usize,
    pub order_lifetime_secs: u64,
    pub authorization_lifetime_secs: u64,
    /// Certificate lifetime when the order carries no notBefore/notAfter.
    pub default_ttl_secs: u64,
    pub finalize_timeout_ms: u64,
    /// How long an invalid order stays readable after it expires before the sweep drops it.
    pub order_retention_secs: u64,
    pub challenge_types: Vec<ChallengeType>,
    pub terms_of_service: Option<String>,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            nonce_validity_secs: 60 * 60,
            max_outstanding_nonces: 10_000,
            order_lifetime_secs: 7 * DAY,
            authorization_lifetime_secs: 7 * DAY,
            default_ttl_secs: 90 * DAY,
            finalize_timeout_ms: 30_000,
            order_retention_secs: 30 * DAY,
            challenge_types: vec![
                ChallengeType::Http01,
                ChallengeType::Dns01,
                ChallengeType::TlsAlpn01,
                ChallengeType::EmailReply00,
            ],
            terms_of_service: None,
        }
    }
}

impl AcmeConfig {
    pub fn nonce_validity(&self) -> Duration {
        seconds(self.nonce_validity_secs)
    }

    pub fn order_lifetime(&self) -> Duration {
        seconds(self.order_lifetime_secs)
    }

    pub fn authorization_lifetime(&self) -> Duration {
        seconds(self.authorization_lifetime_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        seconds(self.default_ttl_secs)
    }

    pub fn order_retention(&self) -> Duration {
        seconds(self.order_retention_secs)
    }

    pub fn finalize_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.finalize_timeout_ms)
    }

    pub fn validate(&self) -> PkiResult<()> {
        if self.max_outstanding_nonces == 0 {
            return Err(PkiError::Config("max_outstanding_nonces must be positive".into()));
        }
        check_duration("nonce_validity_secs", self.nonce_validity_secs)?;
        check_duration("order_lifetime_secs", self.order_lifetime_secs)?;
        check_duration("authorization_lifetime_secs", self.authorization_lifetime_secs)?;
        check_duration("default_ttl_secs", self.default_ttl_secs)?;
        check_duration("order_retention_secs", self.order_retention_secs)?;
        // reclaim waits twice the bound, so that must stay in range too
        check_duration("finalize_timeout_ms", self.finalize_timeout_ms.div_ceil(1000) * 2)?;
        if self.challenge_types.is_empty() {
            return Err(PkiError::Config("at least one challenge type is required".into()));
        }
        Ok(())
    }
}
