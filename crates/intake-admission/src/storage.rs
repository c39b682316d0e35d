//! Blob Storage
//!
//! The gate only needs a handful of blob operations. [`BlobStore`] captures
//! them so the core does not depend on any cloud SDK; [`FsBlobStore`] backs
//! them with a local directory tree and [`InMemoryBlobStore`] keeps
//! everything in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Key/value tags attached to a blob.
pub type BlobMetadata = BTreeMap<String, String>;

/// Blob storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob not found: {container}/{path}")]
    NotFound { container: String, path: String },

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StorageError {
    fn not_found(container: &str, path: &str) -> Self {
        Self::NotFound {
            container: container.to_string(),
            path: path.to_string(),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A blob read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: BlobMetadata,
}

/// Blob storage operations used by the gate and its host.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write (or overwrite) a blob.
    async fn put(
        &self,
        container: &str,
        path: &str,
        content: &[u8],
        content_type: Option<&str>,
        metadata: &BlobMetadata,
    ) -> StorageResult<()>;

    async fn get(&self, container: &str, path: &str) -> StorageResult<StoredBlob>;

    async fn delete(&self, container: &str, path: &str) -> StorageResult<()>;

    /// Blob paths in a container, sorted.
    async fn list(&self, container: &str) -> StorageResult<Vec<String>>;

    fn name(&self) -> &'static str;
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, container: &str, path: &str) -> bool {
        self.blobs
            .read()
            .await
            .contains_key(&(container.to_string(), path.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        container: &str,
        path: &str,
        content: &[u8],
        content_type: Option<&str>,
        metadata: &BlobMetadata,
    ) -> StorageResult<()> {
        let blob = StoredBlob {
            content: content.to_vec(),
            content_type: content_type.map(str::to_string),
            metadata: metadata.clone(),
        };
        self.blobs
            .write()
            .await
            .insert((container.to_string(), path.to_string()), blob);
        Ok(())
    }

    async fn get(&self, container: &str, path: &str) -> StorageResult<StoredBlob> {
        self.blobs
            .read()
            .await
            .get(&(container.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::not_found(container, path))
    }

    async fn delete(&self, container: &str, path: &str) -> StorageResult<()> {
        self.blobs
            .write()
            .await
            .remove(&(container.to_string(), path.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(container, path))
    }

    async fn list(&self, container: &str) -> StorageResult<Vec<String>> {
        let mut paths: Vec<String> = self
            .blobs
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Directory name holding metadata sidecars under the store root.
const METADATA_DIR: &str = ".metadata";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    metadata: BlobMetadata,
}

/// Filesystem blob store.
///
/// Blobs live at `<root>/<container>/<path>`; content type and tags live in
/// a JSON sidecar at `<root>/.metadata/<container>/<path>.json`. Blobs
/// without a sidecar report a content type guessed from their name.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, container: &str, path: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(checked(container)?).join(checked(path)?))
    }

    fn sidecar_path(&self, container: &str, path: &str) -> StorageResult<PathBuf> {
        let mut sidecar = self
            .root
            .join(METADATA_DIR)
            .join(checked(container)?)
            .join(checked(path)?)
            .into_os_string();
        sidecar.push(".json");
        Ok(PathBuf::from(sidecar))
    }
}

/// Reject absolute paths and any `..` or empty segment.
fn checked(relative: &str) -> StorageResult<&Path> {
    let path = Path::new(relative);
    let valid = !relative.is_empty()
        && !relative.split('/').any(str::is_empty)
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        && path.components().next().is_some();
    if !valid || relative.starts_with(METADATA_DIR) {
        return Err(StorageError::InvalidPath(relative.to_string()));
    }
    Ok(path)
}

async fn write_file(path: &Path, content: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        container: &str,
        path: &str,
        content: &[u8],
        content_type: Option<&str>,
        metadata: &BlobMetadata,
    ) -> StorageResult<()> {
        let target = self.blob_path(container, path)?;
        write_file(&target, content).await?;

        let sidecar = Sidecar {
            content_type: content_type.map(str::to_string),
            metadata: metadata.clone(),
        };
        write_file(
            &self.sidecar_path(container, path)?,
            &serde_json::to_vec_pretty(&sidecar)?,
        )
        .await?;

        debug!(
            container = %container,
            path = %path,
            size = content.len(),
            "Blob written"
        );

        Ok(())
    }

    async fn get(&self, container: &str, path: &str) -> StorageResult<StoredBlob> {
        let target = self.blob_path(container, path)?;
        let content = match tokio::fs::read(&target).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(container, path));
            }
            Err(e) => return Err(e.into()),
        };

        let sidecar = match tokio::fs::read(self.sidecar_path(container, path)?).await {
            Ok(raw) => serde_json::from_slice::<Sidecar>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Sidecar {
                content_type: mime_guess::from_path(&target)
                    .first_raw()
                    .map(str::to_string),
                metadata: BlobMetadata::new(),
            },
            Err(e) => return Err(e.into()),
        };

        Ok(StoredBlob {
            content,
            content_type: sidecar.content_type,
            metadata: sidecar.metadata,
        })
    }

    async fn delete(&self, container: &str, path: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.blob_path(container, path)?).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(container, path));
            }
            Err(e) => return Err(e.into()),
        }

        match tokio::fs::remove_file(self.sidecar_path(container, path)?).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list(&self, container: &str) -> StorageResult<Vec<String>> {
        let base = self.root.join(checked(container)?);
        let mut paths = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Ok(relative) = path.strip_prefix(&base) {
                        let segments: Vec<String> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        paths.push(segments.join("/"));
                    }
                }
            }
        }

        paths.sort();
        Ok(paths)
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tags() -> BlobMetadata {
        BlobMetadata::from([("reason".to_string(), "invalid_filename".to_string())])
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryBlobStore::new();
        store
            .put("quarantine", "acme/2024-05-01/a.pdf", b"%PDF-", Some("application/pdf"), &tags())
            .await
            .unwrap();

        let blob = store.get("quarantine", "acme/2024-05-01/a.pdf").await.unwrap();
        assert_eq!(blob.content, b"%PDF-");
        assert_eq!(blob.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(blob.metadata, tags());
        assert_eq!(store.list("quarantine").await.unwrap(), vec!["acme/2024-05-01/a.pdf"]);
        assert!(store.list("attachments").await.unwrap().is_empty());

        store.delete("quarantine", "acme/2024-05-01/a.pdf").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_in_memory_missing_blob() {
        let store = InMemoryBlobStore::new();
        let err = store.delete("attachments", "missing.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fs_round_trip_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put(
                "quarantine",
                "acme/2024-05-01/a.pdf",
                b"%PDF-1.7",
                Some("application/pdf"),
                &tags(),
            )
            .await
            .unwrap();

        assert!(dir.path().join("quarantine/acme/2024-05-01/a.pdf").exists());
        let blob = store.get("quarantine", "acme/2024-05-01/a.pdf").await.unwrap();
        assert_eq!(blob.content, b"%PDF-1.7");
        assert_eq!(blob.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(blob.metadata, tags());

        assert_eq!(
            store.list("quarantine").await.unwrap(),
            vec!["acme/2024-05-01/a.pdf".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fs_guesses_content_type_without_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("attachments")).unwrap();
        std::fs::write(dir.path().join("attachments/scan.png"), b"\x89PNG").unwrap();

        let store = FsBlobStore::new(dir.path());
        let blob = store.get("attachments", "scan.png").await.unwrap();

        assert_eq!(blob.content_type.as_deref(), Some("image/png"));
        assert!(blob.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_fs_delete_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store
            .put("attachments", "a.pdf", b"x", None, &BlobMetadata::new())
            .await
            .unwrap();

        store.delete("attachments", "a.pdf").await.unwrap();
        assert!(store.list("attachments").await.unwrap().is_empty());

        let err = store.delete("attachments", "a.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        let err = store.get("attachments", "a.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fs_list_missing_container_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.list("nothing-here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        for path in ["../escape.pdf", "/etc/passwd", "a//b.pdf", ""] {
            let err = store
                .put("quarantine", path, b"x", None, &BlobMetadata::new())
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidPath(_)), "{}", path);
        }
    }
}
