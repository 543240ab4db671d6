use super::store::{CaState, StateStore};
use crate::error::{PkiError, PkiResult};
use crate::pki::CertificateRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

/// Cached state of one CA; `None` until first read from disk.
type CaSlot = Arc<Mutex<Option<CaState>>>;

/// Directory-backed store: `<dir>/<ca>.json` per CA and
/// `<dir>/<collection>/<id>.json` per document. Files are replaced by
/// write-to-temp-then-rename, so a crash leaves either the old or the new file.
///
/// Each CA has its own lock, held across its file write; the map lock is only
/// held long enough to find the slot, so CAs never wait on each other's I/O.
pub struct FileStore {
    root: PathBuf,
    cas: Mutex<HashMap<String, CaSlot>>,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> PkiResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        log::info!("file store opened at {}", root.display());
        Ok(Self {
            root,
            cas: Mutex::new(HashMap::new()),
        })
    }

    fn ca_path(&self, ca: &str) -> PkiResult<PathBuf> {
        Ok(self.root.join(format!("{}.json", checked_name(ca)?)))
    }

    async fn read_state(&self, ca: &str) -> PkiResult<CaState> {
        let path = self.ca_path(ca)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CaState::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn slot(&self, ca: &str) -> PkiResult<CaSlot> {
        checked_name(ca)?;
        Ok(self.cas.lock().await.entry(ca.to_string()).or_default().clone())
    }

    /// Applies `change` to a copy of the CA state, writes it out, and only
    /// then updates the cache.
    async fn update(&self, ca: &str, change: impl FnOnce(&mut CaState)) -> PkiResult<()> {
        let slot = self.slot(ca).await?;
        let mut cached = slot.lock().await;
        let mut state = match cached.as_ref() {
            Some(state) => state.clone(),
            None => self.read_state(ca).await?,
        };
        change(&mut state);
        write_atomically(&self.ca_path(ca)?, &serde_json::to_vec_pretty(&state)?).await?;
        *cached = Some(state);
        Ok(())
    }

    async fn state(&self, ca: &str) -> PkiResult<CaState> {
        let slot = self.slot(ca).await?;
        let mut cached = slot.lock().await;
        if let Some(state) = cached.as_ref() {
            return Ok(state.clone());
        }
        let state = self.read_state(ca).await?;
        *cached = Some(state.clone());
        Ok(state)
    }
}

fn checked_name(name: &str) -> PkiResult<&str> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(name)
    } else {
        Err(PkiError::Storage(format!("unsafe store key {:?}", name)))
    }
}

async fn remove_if_present(path: &Path) -> PkiResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> PkiResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    let file = fs::File::open(&tmp).await?;
    file.sync_all().await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStore {
    async fn load_serial(&self, ca: &str) -> PkiResult<Option<u64>> {
        Ok(self.state(ca).await?.serial)
    }

    async fn persist_serial(&self, ca: &str, serial: u64) -> PkiResult<()> {
        self.update(ca, |state| state.serial = Some(serial)).await
    }

    async fn load_records(&self, ca: &str) -> PkiResult<Vec<CertificateRecord>> {
        Ok(self.state(ca).await?.records.into_values().collect())
    }

    async fn persist_record(&self, ca: &str, record: &CertificateRecord) -> PkiResult<()> {
        self.update(ca, |state| {
            state.records.insert(record.serial.value(), record.clone());
        })
        .await
    }

    async fn load_crl_version(&self, ca: &str) -> PkiResult<Option<u64>> {
        Ok(self.state(ca).await?.crl_version)
    }

    async fn persist_crl_version(&self, ca: &str, version: u64) -> PkiResult<()> {
        self.update(ca, |state| state.crl_version = Some(version))
            .await
    }

    async fn purge(&self, ca: &str) -> PkiResult<()> {
        let slot = self.slot(ca).await?;
        let mut cached = slot.lock().await;
        remove_if_present(&self.ca_path(ca)?).await?;
        *cached = Some(CaState::default());
        Ok(())
    }

    async fn has_state(&self, ca: &str) -> PkiResult<bool> {
        Ok(fs::try_exists(self.ca_path(ca)?).await?)
    }

    async fn put_document(
        &self,
        collection: &str,
        id: &str,
        document: serde_json::Value,
    ) -> PkiResult<()> {
        let dir = self.root.join(checked_name(collection)?);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", checked_name(id)?));
        write_atomically(&path, &serde_json::to_vec_pretty(&document)?).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> PkiResult<()> {
        let dir = self.root.join(checked_name(collection)?);
        remove_if_present(&dir.join(format!("{}.json", checked_name(id)?))).await
    }

    async fn load_documents(&self, collection: &str) -> PkiResult<Vec<serde_json::Value>> {
        let dir = self.root.join(checked_name(collection)?);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            documents.push(serde_json::from_slice(&fs::read(&path).await?)?);
        }
        Ok(documents)
    }
}
