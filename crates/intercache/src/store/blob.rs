//! # File Blob Store
//!
//! Response bodies as individual files, named by the digest of their cache
//! key plus a per-write suffix and sharded by the first two characters.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;

use super::{BlobStore, BodyLocator};

const BLOB_EXTENSION: &str = "blob";
const TMP_EXTENSION: &str = "tmp";
const MAX_NAME_LEN: usize = 128;

/// Map every character outside `[A-Za-z0-9_-]` to `_`. Names that are empty
/// or too long are rejected.
pub fn sanitize_name(name: &str) -> CacheResult<String> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(CacheError::SanitizationRejected(format!(
            "name length {} outside 1..={MAX_NAME_LEN}",
            name.len()
        )));
    }
    Ok(name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Open (creating if needed) a blob directory and drop any temporary files
    /// left behind by an interrupted write.
    pub async fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let store = Self { root };
        let removed = store.remove_stray_temporaries().await?;
        if removed > 0 {
            debug!(count = removed, root = ?store.root, "Removed interrupted blob writes");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path for a stored blob
    fn blob_path(&self, name: &str) -> CacheResult<PathBuf> {
        let name = sanitize_name(name)?;
        let shard = &name[..name.len().min(2)];
        Ok(self
            .root
            .join(shard)
            .join(format!("{name}.{BLOB_EXTENSION}")))
    }

    async fn remove_stray_temporaries(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
                    match fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) => warn!(path = ?path, error = %e, "Failed to remove stale temporary blob"),
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn write(&self, key: &CacheKey, bytes: Bytes) -> CacheResult<BodyLocator> {
        // Every write gets its own name, so two fills of one key never touch
        // each other's file
        let name = format!("{}-{}", key.storage_name(), Uuid::new_v4().simple());
        let path = self.blob_path(&name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension(TMP_EXTENSION);

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            warn!(path = ?path, error = %e, "Failed to write blob");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, name = %name, size = bytes.len(), "Stored blob");
        Ok(BodyLocator::Blob { name })
    }

    async fn read(&self, locator: &BodyLocator) -> CacheResult<Bytes> {
        match locator {
            BodyLocator::Inline { text } => Ok(Bytes::from(text.clone())),
            BodyLocator::Blob { name } => {
                let path = self.blob_path(name)?;
                Ok(Bytes::from(fs::read(&path).await?))
            }
        }
    }

    async fn exists(&self, locator: &BodyLocator) -> bool {
        let BodyLocator::Blob { name } = locator else {
            return true;
        };
        let Ok(path) = self.blob_path(name) else {
            return false;
        };
        match fs::try_exists(&path).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to check blob existence");
                false
            }
        }
    }

    async fn remove(&self, locator: &BodyLocator) -> CacheResult<()> {
        let BodyLocator::Blob { name } = locator else {
            return Ok(());
        };
        let path = self.blob_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to remove blob");
                Err(e.into())
            }
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut entry_count = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => entry_count += 1,
                Err(e) => warn!(path = ?path, error = %e, "Failed to remove blob entry"),
            }
        }

        debug!(count = entry_count, "Cleared blob store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::from(name.to_string())
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("abc-DEF_123").unwrap(), "abc-DEF_123");
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "______etc_passwd");
        assert_eq!(sanitize_name("a b\\c:d").unwrap(), "a_b_c_d");
        assert!(matches!(
            sanitize_name(""),
            Err(CacheError::SanitizationRejected(_))
        ));
        assert!(matches!(
            sanitize_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(CacheError::SanitizationRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_write_read_exists_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let k = key("/images/a.png");

        let locator = store
            .write(&k, Bytes::from_static(b"\x89PNG\r\n"))
            .await
            .unwrap();
        assert!(store.exists(&locator).await);
        assert_eq!(
            store.read(&locator).await.unwrap(),
            Bytes::from_static(b"\x89PNG\r\n")
        );

        store.remove(&locator).await.unwrap();
        assert!(!store.exists(&locator).await);
        // removing twice is fine
        store.remove(&locator).await.unwrap();
        assert!(store.read(&locator).await.is_err());
    }

    #[tokio::test]
    async fn test_inline_locator_needs_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let inline = BodyLocator::Inline {
            text: "hello".to_string(),
        };

        assert!(store.exists(&inline).await);
        assert_eq!(store.read(&inline).await.unwrap(), Bytes::from_static(b"hello"));
        store.remove(&inline).await.unwrap();
    }

    #[tokio::test]
    async fn test_blob_stays_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let k = key("/../../../../tmp/escape?x=../..");
        let locator = store.write(&k, Bytes::from_static(b"x")).await.unwrap();

        let BodyLocator::Blob { name } = &locator else {
            panic!("expected a blob locator");
        };
        let path = store.blob_path(name).unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_open_removes_stray_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("ab");
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join("abcdef.tmp"), b"partial").unwrap();
        std::fs::write(shard.join("abcdef.blob"), b"complete").unwrap();

        FileBlobStore::open(dir.path()).await.unwrap();

        assert!(!shard.join("abcdef.tmp").exists());
        assert!(shard.join("abcdef.blob").exists());
    }

    #[tokio::test]
    async fn test_writes_for_one_key_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let k = key("/data");

        let first = store
            .write(&k, Bytes::from_static(b"a much longer first body"))
            .await
            .unwrap();
        let second = store.write(&k, Bytes::from_static(b"short")).await.unwrap();
        assert_ne!(first, second);

        store.remove(&second).await.unwrap();
        assert_eq!(
            store.read(&first).await.unwrap(),
            Bytes::from_static(b"a much longer first body")
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).await.unwrap();
        let one = store.write(&key("/one"), Bytes::from_static(b"1")).await.unwrap();
        let two = store.write(&key("/two"), Bytes::from_static(b"2")).await.unwrap();

        store.clear().await.unwrap();

        assert!(!store.exists(&one).await);
        assert!(!store.exists(&two).await);
        // still usable after clearing
        let again = store.write(&key("/one"), Bytes::from_static(b"1")).await.unwrap();
        assert!(store.exists(&again).await);
    }
}
