use crate::clock::Clock;
use crate::error::{PkiError, PkiResult};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use rand::RngCore;
use rand::rngs::OsRng;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

const NONCE_BYTES: usize = 16;

/// Outstanding replay nonces. Bounded: beyond capacity the oldest are
/// dropped and simply become unknown.
pub struct NonceAuthority {
    outstanding: Mutex<LruCache<String, DateTime<Utc>>>,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl NonceAuthority {
    pub fn new(capacity: usize, validity: Duration, clock: Arc<dyn Clock>) -> PkiResult<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| PkiError::Config("nonce table capacity must be positive".into()))?;
        Ok(Self {
            outstanding: Mutex::new(LruCache::new(capacity)),
            validity,
            clock,
        })
    }

    pub async fn issue(&self) -> String {
        let mut outstanding = self.outstanding.lock().await;
        loop {
            let nonce = random_token(NONCE_BYTES);
            if outstanding.contains(&nonce) {
                continue;
            }
            if let Some((evicted, _)) = outstanding.push(nonce.clone(), self.clock.now()) {
                log::debug!("nonce table full, evicted {}", evicted);
            }
            return nonce;
        }
    }

    /// Removes the nonce in the same critical section that checks it, so
    /// two racing requests cannot both succeed.
    pub async fn consume(&self, nonce: &str) -> PkiResult<()> {
        let issued_at = self.outstanding.lock().await.pop(nonce);
        match issued_at {
            Some(at) if self.clock.now() - at < self.validity => Ok(()),
            Some(_) => {
                log::debug!("rejected expired nonce");
                Err(PkiError::BadNonce)
            }
            None => {
                log::debug!("rejected unknown or reused nonce");
                Err(PkiError::BadNonce)
            }
        }
    }

    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut outstanding = self.outstanding.lock().await;
        let stale: Vec<String> = outstanding
            .iter()
            .filter(|(_, at)| now - **at >= self.validity)
            .map(|(nonce, _)| nonce.clone())
            .collect();
        for nonce in &stale {
            outstanding.pop(nonce);
        }
        stale.len()
    }

    pub async fn outstanding(&self) -> usize {
        self.outstanding.lock().await.len()
    }
}

/// URL-safe random string, also used for ACME object ids and challenge tokens.
pub(crate) fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
