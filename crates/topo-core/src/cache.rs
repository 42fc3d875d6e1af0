//! Cached snapshot of this agent's tablet record.
//!
//! Every component reads the tablet through [`TabletCache::current`]; one
//! [`TabletCache::refresh`] updates what all of them see. Snapshots are
//! immutable and replaced wholesale, so a reader never observes a half
//! updated record.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{Result, TopoError};
use crate::store::TopoStore;
use crate::tablet::{Tablet, TabletInfo};

pub struct TabletCache {
    store: Arc<dyn TopoStore>,
    tablet_path: String,
    snapshot: RwLock<Option<Arc<TabletInfo>>>,
}

impl TabletCache {
    pub fn new(store: Arc<dyn TopoStore>, tablet_path: impl Into<String>) -> Self {
        Self {
            store,
            tablet_path: tablet_path.into(),
            snapshot: RwLock::new(None),
        }
    }

    pub fn tablet_path(&self) -> &str {
        &self.tablet_path
    }

    /// Re-read the record and swap it in. On failure the previous snapshot
    /// stays in place.
    pub async fn refresh(&self) -> Result<Arc<TabletInfo>> {
        let (data, stat) = self.store.get(&self.tablet_path).await?;
        let tablet = Tablet::from_json(&self.tablet_path, &data)?;
        let info = Arc::new(TabletInfo {
            tablet,
            version: stat.version,
        });

        // The lock only guards the pointer swap, never the store read above.
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&info));
        debug!(path = %self.tablet_path, version = stat.version, "tablet record refreshed");
        Ok(info)
    }

    /// The last successfully loaded snapshot.
    pub fn current(&self) -> Result<Arc<TabletInfo>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TopoError::Uninitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{TabletAlias, TabletType};

    const PATH: &str = "/zk/c1/vt/tablets/0000000007";

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let tablet = Tablet::new(TabletAlias::new("c1", 7), "ks", "0", TabletType::Spare);
        store.put_unchecked(PATH, &tablet.to_json().unwrap());
        store
    }

    #[test]
    fn current_before_refresh_is_uninitialized() {
        let cache = TabletCache::new(seeded(), PATH);
        assert!(matches!(cache.current(), Err(TopoError::Uninitialized)));
    }

    #[tokio::test]
    async fn refresh_replaces_snapshot() {
        let store = seeded();
        let cache = TabletCache::new(store.clone(), PATH);
        let first = cache.refresh().await.unwrap();
        assert_eq!(first.tablet_type, TabletType::Spare);

        let mut changed = first.tablet.clone();
        changed.tablet_type = TabletType::Replica;
        store.put_unchecked(PATH, &changed.to_json().unwrap());

        // A reader holding the old snapshot keeps seeing it.
        cache.refresh().await.unwrap();
        assert_eq!(first.tablet_type, TabletType::Spare);
        let now = cache.current().unwrap();
        assert_eq!(now.tablet_type, TabletType::Replica);
        assert!(now.version > first.version);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let store = seeded();
        let cache = TabletCache::new(store.clone(), PATH);
        cache.refresh().await.unwrap();

        store.put_unchecked(PATH, b"{garbage");
        assert!(matches!(
            cache.refresh().await,
            Err(TopoError::Decode { .. })
        ));
        store.delete(PATH);
        assert!(cache.refresh().await.unwrap_err().is_no_node());

        assert_eq!(cache.current().unwrap().uid, 7);
    }

    #[tokio::test]
    async fn concurrent_readers_see_whole_snapshots() {
        let store = seeded();
        let cache = Arc::new(TabletCache::new(store.clone(), PATH));
        cache.refresh().await.unwrap();

        let mut readers = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            readers.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let t = cache.current().unwrap();
                    assert_eq!(t.keyspace, "ks");
                    tokio::task::yield_now().await;
                }
            }));
        }
        for _ in 0..20 {
            cache.refresh().await.unwrap();
        }
        for r in readers {
            r.await.unwrap();
        }
    }
}
