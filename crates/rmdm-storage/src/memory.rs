use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{validate_key, ContentStore, ObjectMeta, StoreError};

/// Operations that can be made to fail on a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Read,
    Write,
    Copy,
    Delete,
    List,
}

impl FaultOp {
    fn as_str(&self) -> &'static str {
        match self {
            FaultOp::Read => "read",
            FaultOp::Write => "write",
            FaultOp::Copy => "copy",
            FaultOp::Delete => "delete",
            FaultOp::List => "list",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    created: DateTime<Utc>,
    generation: u64,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: BTreeMap<String, StoredObject>,
    next_generation: u64,
    faults: Vec<(FaultOp, String)>,
}

impl MemoryInner {
    fn check(&self, op: FaultOp, key: &str) -> Result<(), StoreError> {
        if self
            .faults
            .iter()
            .any(|(fault_op, prefix)| *fault_op == op && key.starts_with(prefix.as_str()))
        {
            return Err(StoreError::Rejected {
                op: op.as_str(),
                key: key.to_string(),
                reason: "injected fault".to_string(),
            });
        }
        Ok(())
    }

    fn put(&mut self, key: &str, bytes: Vec<u8>) {
        self.next_generation += 1;
        self.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                created: Utc::now(),
                generation: self.next_generation,
            },
        );
    }
}

/// Process-local store; every write bumps a generation counter so listings
/// have a strict creation order even within one clock tick.
#[derive(Debug)]
pub struct MemoryStore {
    bucket: String,
    inner: Mutex<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes `op` fail for every key starting with `key_prefix`.
    pub fn fail_on(&self, op: FaultOp, key_prefix: impl Into<String>) {
        self.lock().faults.push((op, key_prefix.into()));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|o| o.bytes.clone())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn uri(&self, key: &str) -> String {
        format!("mem://{}/{}", self.bucket, key)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self.lock().objects.contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;
        let inner = self.lock();
        inner.check(FaultOp::Read, key)?;
        inner
            .objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn write(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut inner = self.lock();
        inner.check(FaultOp::Write, key)?;
        inner.put(key, bytes.to_vec());
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), StoreError> {
        validate_key(from)?;
        validate_key(to)?;
        let mut inner = self.lock();
        inner.check(FaultOp::Copy, to)?;
        let bytes = inner
            .objects
            .get(from)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: from.to_string(),
            })?;
        inner.put(to, bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut inner = self.lock();
        inner.check(FaultOp::Delete, key)?;
        inner
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let inner = self.lock();
        inner.check(FaultOp::List, prefix)?;
        Ok(inner
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectMeta {
                key: key.clone(),
                size: object.bytes.len() as u64,
                created: object.created,
                generation: object.generation,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generations_increase_per_write() {
        let store = MemoryStore::new("landing");
        store.write("a/1.csv", b"1", "text/csv").await.unwrap();
        store.write("a/2.csv", b"2", "text/csv").await.unwrap();
        store.copy("a/1.csv", "a/3.csv").await.unwrap();

        let listed = store.list("a/").await.unwrap();
        let generations = listed.iter().map(|m| m.generation).collect::<Vec<_>>();
        assert_eq!(generations, [1, 2, 3]);
        assert!(store.list("b/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_faults_reject_matching_keys_only() {
        let store = MemoryStore::new("landing");
        store.write("master/x.csv", b"x", "text/csv").await.unwrap();
        store.fail_on(FaultOp::Copy, "master/history/");

        let err = store
            .copy("master/x.csv", "master/history/x_1.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { op: "copy", .. }));
        store.copy("master/x.csv", "master/y.csv").await.unwrap();

        store.clear_faults();
        store
            .copy("master/x.csv", "master/history/x_1.csv")
            .await
            .unwrap();
        assert_eq!(store.keys().len(), 3);
    }
}
