//! Archived masters: copy-before-overwrite and bounded retention.

use chrono::{DateTime, Utc};
use rmdm_core::EntityLayout;
use rmdm_storage::{ContentStore, ObjectMeta, StoreError};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub retained: Vec<String>,
    pub deleted: Vec<String>,
}

pub struct HistoryManager<'a> {
    store: &'a dyn ContentStore,
}

impl<'a> HistoryManager<'a> {
    pub fn new(store: &'a dyn ContentStore) -> Self {
        Self { store }
    }

    /// Copies the current master under a timestamped history key.
    ///
    /// Returns `Ok(None)` when there is no master yet; first mastering has
    /// nothing to archive.
    pub async fn archive(
        &self,
        entity: &str,
        master_path: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        if !self.store.exists(master_path).await? {
            warn!(entity, master_path, "no current master to archive");
            return Ok(None);
        }
        let archived = EntityLayout::new(entity).history_key(at);
        self.store.copy(master_path, &archived).await?;
        info!(entity, %archived, "archived current master");
        Ok(Some(archived))
    }

    /// Archives for `entity`, oldest first.
    pub async fn archives(&self, entity: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let prefix = EntityLayout::new(entity).history_prefix();
        let name_prefix = format!("{prefix}{entity}_master_");
        let mut archives = self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .filter(|meta| meta.key.starts_with(&name_prefix) && meta.key.ends_with(".csv"))
            .collect::<Vec<_>>();
        archives.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then(a.generation.cmp(&b.generation))
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(archives)
    }

    /// Deletes the oldest archives so that at most `max_versions` remain.
    /// Re-running on an already pruned set is a no-op.
    pub async fn prune(&self, entity: &str, max_versions: usize) -> Result<PruneOutcome, StoreError> {
        let archives = self.archives(entity).await?;
        let excess = archives.len().saturating_sub(max_versions);

        let mut outcome = PruneOutcome::default();
        for (idx, meta) in archives.into_iter().enumerate() {
            if idx >= excess {
                outcome.retained.push(meta.key);
                continue;
            }
            match self.store.delete(&meta.key).await {
                Ok(()) => {}
                // Already gone is what we wanted.
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
            outcome.deleted.push(meta.key);
        }
        if !outcome.deleted.is_empty() {
            info!(entity, deleted = outcome.deleted.len(), max_versions, "pruned history");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rmdm_storage::MemoryStore;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, second).single().unwrap()
    }

    #[tokio::test]
    async fn archive_without_master_is_a_noop() {
        let store = MemoryStore::new("landing");
        let history = HistoryManager::new(&store);
        let archived = history
            .archive("customers", "master/customers/customers_master.csv", at(0))
            .await
            .unwrap();
        assert_eq!(archived, None);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn archive_copies_master_under_history_prefix() {
        let store = MemoryStore::new("landing");
        let master = "master/customers/customers_master.csv";
        store.write(master, b"customer_id\nC1\n", "text/csv").await.unwrap();

        let archived = HistoryManager::new(&store)
            .archive("customers", master, at(7))
            .await
            .unwrap()
            .expect("archived");
        assert_eq!(
            archived,
            "master/customers/history/customers_master_20260301_120007.csv"
        );
        assert_eq!(store.get(&archived).unwrap(), b"customer_id\nC1\n");
        assert!(store.get(master).is_some());
    }

    #[tokio::test]
    async fn prune_keeps_newest_and_is_idempotent() {
        let store = MemoryStore::new("landing");
        let layout = EntityLayout::new("products");
        for second in 0..8 {
            store
                .write(&layout.history_key(at(second)), b"x", "text/csv")
                .await
                .unwrap();
        }
        // Unrelated blobs under the prefix are never touched.
        store
            .write("master/products/history/README.txt", b"x", "text/plain")
            .await
            .unwrap();

        let history = HistoryManager::new(&store);
        let first = history.prune("products", 5).await.unwrap();
        assert_eq!(first.deleted.len(), 3);
        assert_eq!(
            first.retained,
            (3..8).map(|s| layout.history_key(at(s))).collect::<Vec<_>>()
        );

        let second = history.prune("products", 5).await.unwrap();
        assert!(second.deleted.is_empty());
        assert_eq!(second.retained, first.retained);
        assert!(store.get("master/products/history/README.txt").is_some());
    }

    #[tokio::test]
    async fn prune_below_limit_leaves_set_untouched() {
        let store = MemoryStore::new("landing");
        let layout = EntityLayout::new("suppliers");
        store.write(&layout.history_key(at(1)), b"x", "text/csv").await.unwrap();

        let outcome = HistoryManager::new(&store).prune("suppliers", 5).await.unwrap();
        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.retained.len(), 1);
    }
}
