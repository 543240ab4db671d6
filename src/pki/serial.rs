use super::certificate::Serial;
use crate::error::{PkiError, PkiResult};
use crate::storage::StateStore;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hands out serials for one CA. The new high-water mark is persisted before
/// the serial is returned, so a crash can skip a serial but never reuse one.
pub struct SerialAllocator {
    ca_id: String,
    last: Mutex<u64>,
    store: Arc<dyn StateStore>,
}

impl SerialAllocator {
    pub async fn restore(ca_id: impl Into<String>, store: Arc<dyn StateStore>) -> PkiResult<Self> {
        let ca_id = ca_id.into();
        let last = store.load_serial(&ca_id).await?.unwrap_or(0);
        if last > 0 {
            log::debug!("{}: resuming serial allocation after {}", ca_id, last);
        }
        Ok(Self {
            ca_id,
            last: Mutex::new(last),
            store,
        })
    }

    pub async fn next(&self) -> PkiResult<Serial> {
        let mut last = self.last.lock().await;
        let next = last.checked_add(1).ok_or(PkiError::ExhaustedKeyspace)?;
        self.store.persist_serial(&self.ca_id, next).await?;
        *last = next;
        Ok(Serial::new(next))
    }

    pub async fn last_allocated(&self) -> u64 {
        *self.last.lock().await
    }
}
