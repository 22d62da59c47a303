//! Object storage collaborator.
//!
//! The pipeline never talks to a storage service directly; it is handed an
//! [`ObjectStore`] at construction time. Two implementations ship with the
//! crate:
//!
//! * [`LocalObjectStore`]: containers are directories under a root, keys are
//!   `/`-separated relative paths. Listings come back in lexicographic order,
//!   matching what object stores guarantee for `list(prefix)`.
//! * [`MemoryObjectStore`]: an ordered in-memory map for tests and embedders.

use crate::error::Doc2JsonError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Minimal object-storage interface used by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys in `container` starting with `prefix`, in stable lexicographic order.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, Doc2JsonError>;

    /// Full contents of one object.
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, Doc2JsonError>;

    /// Create or replace an object.
    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), Doc2JsonError>;
}

// ── Filesystem-backed store ──────────────────────────────────────────────

/// Object store over a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, Doc2JsonError> {
        if container.is_empty() || !is_plain_relative(Path::new(container)) {
            return Err(Doc2JsonError::storage(format!(
                "invalid container name '{container}'"
            )));
        }
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, Doc2JsonError> {
        let rel = Path::new(key);
        if key.is_empty() || !is_plain_relative(rel) {
            return Err(Doc2JsonError::storage(format!("invalid object key '{key}'")));
        }
        Ok(self.container_dir(container)?.join(rel))
    }
}

/// Only `Normal` components: no root, no `..`, no `.`.
fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn key_for(container_dir: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(container_dir).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, Doc2JsonError> {
        let dir = self.container_dir(container)?;
        let exists = tokio::fs::try_exists(&dir)
            .await
            .map_err(|e| Doc2JsonError::storage(format!("{}: {e}", dir.display())))?;
        if !exists {
            debug!("Container '{}' does not exist under {}", container, self.root.display());
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![dir.clone()];
        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current)
                .await
                .map_err(|e| Doc2JsonError::storage(format!("{}: {e}", current.display())))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Doc2JsonError::storage(format!("{}: {e}", current.display())))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Doc2JsonError::storage(e.to_string()))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(key) = key_for(&dir, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        debug!("Listed {} objects in '{}' with prefix '{}'", keys.len(), container, prefix);
        Ok(keys)
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, Doc2JsonError> {
        let path = self.object_path(container, key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Doc2JsonError::storage(format!("{}/{}: {e}", container, key)))
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), Doc2JsonError> {
        let path = self.object_path(container, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Doc2JsonError::storage(format!("{}: {e}", parent.display())))?;
        }
        debug!("Writing {}/{} ({} bytes, {})", container, key, bytes.len(), content_type);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Doc2JsonError::storage(format!("{}/{}: {e}", container, key)))
    }
}

// ── In-memory store ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Ordered in-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded by the last `put` of this object.
    pub fn content_type(&self, container: &str, key: &str) -> Option<String> {
        let objects = self.objects.read().ok()?;
        objects
            .get(&(container.to_string(), key.to_string()))
            .map(|o| o.content_type.clone())
    }
}

fn poisoned() -> Doc2JsonError {
    Doc2JsonError::Internal("memory object store lock poisoned".to_string())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, Doc2JsonError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .keys()
            .filter(|(c, k)| c == container && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, Doc2JsonError> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(&(container.to_string(), key.to_string()))
            .map(|o| o.bytes.clone())
            .ok_or_else(|| Doc2JsonError::storage(format!("{container}/{key}: no such object")))
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), Doc2JsonError> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert(
            (container.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
