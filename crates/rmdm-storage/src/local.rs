use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::{validate_key, ContentStore, ObjectMeta, StoreError};

/// Bucket directory on the local filesystem. Writes land via temp file + rename.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    root: PathBuf,
    bucket: String,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.bucket_dir().join(key))
    }

    async fn write_atomic(&self, key: &str, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = path.parent().ok_or_else(|| StoreError::InvalidKey {
            key: key.to_string(),
            reason: "key has no parent directory",
        })?;
        fs::create_dir_all(parent)
            .await
            .map_err(|err| StoreError::io(key, err))?;

        let temp_path = parent.join(format!(".tmp-{}.{}", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|err| StoreError::io(key, err))?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::io(key, err));
        }

        match fs::rename(&temp_path, path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(StoreError::io(key, err))
            }
        }
    }
}

#[async_trait]
impl ContentStore for LocalFsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.bucket_dir().join(key).display())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|err| StoreError::io(key, err))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|err| StoreError::io(key, err))
    }

    async fn write(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        self.write_atomic(key, &path, bytes).await?;
        debug!(bucket = %self.bucket, key, bytes = bytes.len(), "wrote object");
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        let source = self.path_for(from)?;
        let target = self.path_for(to)?;
        let bytes = fs::read(&source)
            .await
            .map_err(|err| StoreError::io(from, err))?;
        self.write_atomic(to, &target, &bytes).await?;
        debug!(bucket = %self.bucket, from, to, "copied object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|err| StoreError::io(key, err))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let base = self.bucket_dir();
        let start = match prefix.rfind('/') {
            Some(idx) => base.join(&prefix[..idx]),
            None => base.clone(),
        };
        if !fs::try_exists(&start)
            .await
            .map_err(|err| StoreError::io(prefix, err))?
        {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|err| StoreError::io(prefix, err))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| StoreError::io(prefix, err))?
            {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(".tmp-") {
                    continue;
                }
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|err| StoreError::io(prefix, err))?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(prefix) {
                    continue;
                }
                let created = metadata
                    .created()
                    .or_else(|_| metadata.modified())
                    .map(DateTime::<Utc>::from)
                    .map_err(|err| StoreError::io(&key, err))?;
                out.push(ObjectMeta {
                    key,
                    size: metadata.len(),
                    created,
                    generation: 0,
                });
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_read_copy_delete_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = LocalFsStore::new(dir.path(), "landing");

        store
            .write("customers/customers_2026-02-24.csv", b"customer_id\nC1\n", "text/csv")
            .await
            .expect("write");
        assert!(store.exists("customers/customers_2026-02-24.csv").await.unwrap());

        store
            .copy(
                "customers/customers_2026-02-24.csv",
                "master/customers/customers_master.csv",
            )
            .await
            .expect("copy");
        assert_eq!(
            store.read("master/customers/customers_master.csv").await.unwrap(),
            b"customer_id\nC1\n"
        );

        store
            .delete("customers/customers_2026-02-24.csv")
            .await
            .expect("delete");
        assert!(!store.exists("customers/customers_2026-02-24.csv").await.unwrap());
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = LocalFsStore::new(dir.path(), "landing");

        assert!(store.read("nope.csv").await.unwrap_err().is_not_found());
        assert!(store.copy("nope.csv", "other.csv").await.unwrap_err().is_not_found());
        assert!(store.delete("nope.csv").await.unwrap_err().is_not_found());
        assert!(!store.exists("nope.csv").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_skips_temp_files() {
        let dir = tempdir().expect("tempdir");
        let store = LocalFsStore::new(dir.path(), "landing");
        for key in [
            "master/customers/history/customers_master_20260101_000000.csv",
            "master/customers/history/customers_master_20260102_000000.csv",
            "master/customers/customers_master.csv",
            "master/products/history/products_master_20260101_000000.csv",
        ] {
            store.write(key, b"x", "text/csv").await.unwrap();
        }
        std::fs::write(
            store.bucket_dir().join("master/customers/history/.tmp-stale.1"),
            b"x",
        )
        .unwrap();

        let listed = store.list("master/customers/history/").await.unwrap();
        let keys = listed.iter().map(|m| m.key.as_str()).collect::<Vec<_>>();
        assert_eq!(
            keys,
            [
                "master/customers/history/customers_master_20260101_000000.csv",
                "master/customers/history/customers_master_20260102_000000.csv",
            ]
        );
        assert!(store.list("master/orders/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_keys_outside_the_bucket() {
        let dir = tempdir().expect("tempdir");
        let store = LocalFsStore::new(dir.path(), "landing");
        let err = store.write("../escape.csv", b"x", "text/csv").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }
}
