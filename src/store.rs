//! Key/value persistence for scheduler state that must survive restarts.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::lock::{read_locked, update_locked, DEFAULT_LOCK_TIMEOUT};

#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Values saved under `key`; empty if nothing was saved.
    async fn load(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Replace everything under `key`.
    async fn save(&self, key: &str, values: HashMap<String, String>) -> Result<()>;
}

/// Process-local store for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<HashMap<String, String>> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &str, values: HashMap<String, String>) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), values);
        Ok(())
    }
}

type Document = BTreeMap<String, BTreeMap<String, String>>;

/// One JSON document on disk, `key → {name → value}`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    timeout: Duration,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_document(bytes: Option<Vec<u8>>) -> Result<Document> {
    match bytes {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
            Ok(serde_json::from_slice(&bytes)?)
        }
        _ => Ok(Document::new()),
    }
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| Error::OperationFailed(format!("state file task failed: {err}")))?
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<HashMap<String, String>> {
        let path = self.path.clone();
        let timeout = self.timeout;
        let key = key.to_string();
        blocking(move || {
            let mut document = parse_document(read_locked(&path, timeout)?)?;
            Ok(document.remove(&key).unwrap_or_default().into_iter().collect())
        })
        .await
    }

    async fn save(&self, key: &str, values: HashMap<String, String>) -> Result<()> {
        let path = self.path.clone();
        let timeout = self.timeout;
        let key = key.to_string();
        blocking(move || {
            update_locked(&path, timeout, |current| {
                let mut document = parse_document(current)?;
                document.insert(key, values.into_iter().collect());
                Ok(serde_json::to_vec_pretty(&document)?)
            })
        })
        .await
    }
}
