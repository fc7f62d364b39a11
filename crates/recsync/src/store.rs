//! Content-addressed-ish object storage for raw messages, snapshots, and
//! thumbnails. Keys are opaque to callers; only the store that issued a key
//! can resolve it.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Storage seam for immutable binary objects.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persists the bytes and returns the key to retrieve them later.
    async fn save(&self, bytes: &[u8], mime: &str) -> Result<String, StoreError>;

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Stores objects under a root directory, fanned out by the first two
/// characters of the object id to keep directory listings shallow.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileStore for FilesystemStore {
    async fn save(&self, bytes: &[u8], mime: &str) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let key = format!("{}/{}.{}", &id[..2], id, extension_for(mime));

        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::WriteObject {
                key: key.clone(),
                source: e,
            })?;

        debug!("Stored {} bytes as {}", bytes.len(), key);
        Ok(key)
    }

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;

        match tokio::fs::read(self.root.join(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(StoreError::ReadObject {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn save(&self, bytes: &[u8], mime: &str) -> Result<String, StoreError> {
        let key = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(mime));
        self.objects
            .lock()
            .await
            .insert(key.clone(), bytes.to_vec());
        Ok(key)
    }

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

/// Keys come back from our own `save`, but retrieval still refuses anything
/// that could escape the root.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let traversal = key.split('/').any(|segment| segment == "..");
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || traversal {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn extension_for(mime: &str) -> &'static str {
    mime_guess::get_mime_extensions_str(mime)
        .and_then(|extensions| extensions.first())
        .copied()
        .unwrap_or("bin")
}
