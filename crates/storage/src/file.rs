//! File backed blob store
//!
//! One file per key inside a root directory. Writes go to a temporary file
//! that is synced and then renamed over the target, so a crash leaves
//! either the previous or the new value on disk.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::backend::BlobStore;
use crate::error::{StorageError, StorageResult};

const BLOB_EXTENSION: &str = "blob";

/// Blob store writing each key to its own file
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("Opened file blob store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys may only contain ASCII alphanumerics, `-`, `_` and `/`
    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'));
        if !valid {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "only ASCII alphanumerics, '-', '_' and '/' are allowed".to_string(),
            });
        }

        Ok(self
            .root
            .join(format!("{}.{}", key.replace('/', "."), BLOB_EXTENSION)))
    }

    fn key_for(file_name: &str) -> Option<String> {
        file_name
            .strip_suffix(&format!(".{}", BLOB_EXTENSION))
            .map(|stem| stem.replace('.', "/"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("tmp");
        trace!("Writing {} bytes to {}", value.len(), path.display());

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if let Some(key) = file_name.to_str().and_then(Self::key_for) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::check_basic_ops;

    #[tokio::test]
    async fn test_file_store_basic_ops() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        check_basic_ops(&store).await;
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileBlobStore::open(dir.path()).await.unwrap();
            store.set("results/abc-123", b"final").await.unwrap();
        }

        let reopened = FileBlobStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("results/abc-123").await.unwrap(),
            Some(b"final".to_vec())
        );
        assert_eq!(reopened.list_keys("results/").await.unwrap(), vec!["results/abc-123"]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();

        let err = store.set("../escape", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
        assert!(store.get("a.b").await.is_err());
    }
}
