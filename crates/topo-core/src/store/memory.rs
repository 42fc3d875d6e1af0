//! In-process [`TopoStore`].
//!
//! Nodes live in a sorted map keyed by absolute path. Parents are not
//! required to exist before their children. Child watches are one-shot and
//! fire on the first create or delete of a direct child.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{CreateMode, Stat, TopoStore, Watch, WatchEvent};
use crate::error::{Result, TopoError};
use crate::paths;

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    version: i64,
    ephemeral: bool,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    child_watches: HashMap<String, Vec<oneshot::Sender<WatchEvent>>>,
    reads: u64,
    writes: HashMap<String, u64>,
}

impl Inner {
    fn record_write(&mut self, path: &str) {
        *self.writes.entry(path.to_string()).or_default() += 1;
    }

    fn fire_child_watches(&mut self, child: &str, event: WatchEvent) {
        if let Some(parent) = paths::parent(child) {
            for tx in self.child_watches.remove(parent).unwrap_or_default() {
                let _ = tx.send(event);
            }
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Overwrite or create a node without a version check.
    pub fn put_unchecked(&self, path: &str, data: &[u8]) {
        let mut inner = self.lock();
        inner.record_write(path);
        if let Some(node) = inner.nodes.get_mut(path) {
            node.data = data.to_vec();
            node.version += 1;
            return;
        }
        inner.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                version: 0,
                ephemeral: false,
            },
        );
        inner.fire_child_watches(path, WatchEvent::ChildrenChanged);
    }

    /// Remove a node. Returns false if it did not exist.
    pub fn delete(&self, path: &str) -> bool {
        let mut inner = self.lock();
        if inner.nodes.remove(path).is_none() {
            return false;
        }
        inner.record_write(path);
        inner.fire_child_watches(path, WatchEvent::ChildrenChanged);
        true
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    /// End the current session: ephemeral nodes disappear and every pending
    /// watch reports the lost session.
    pub fn expire_session(&self) {
        let mut inner = self.lock();
        inner.nodes.retain(|_, n| !n.ephemeral);
        for (_, senders) in inner.child_watches.drain() {
            for tx in senders {
                let _ = tx.send(WatchEvent::SessionLost);
            }
        }
    }

    /// Number of successful `get` calls served so far.
    pub fn reads(&self) -> u64 {
        self.lock().reads
    }

    /// Number of creates, writes and deletes applied to `path`.
    pub fn writes_to(&self, path: &str) -> u64 {
        self.lock().writes.get(path).copied().unwrap_or(0)
    }

    pub fn pending_watches(&self, path: &str) -> usize {
        self.lock().child_watches.get(path).map_or(0, Vec::len)
    }
}

#[async_trait]
impl TopoStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| TopoError::NoNode(path.to_string()))?;
        inner.reads += 1;
        Ok((
            node.data,
            Stat {
                version: node.version,
            },
        ))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(path) {
            return Err(TopoError::AlreadyExists(path.to_string()));
        }
        inner.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                version: 0,
                ephemeral: mode == CreateMode::Ephemeral,
            },
        );
        inner.record_write(path);
        inner.fire_child_watches(path, WatchEvent::ChildrenChanged);
        Ok(path.to_string())
    }

    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, Stat, Watch)> {
        let mut inner = self.lock();
        let version = inner
            .nodes
            .get(path)
            .map(|n| n.version)
            .ok_or_else(|| TopoError::NoNode(path.to_string()))?;
        let children = inner.children(path);
        let (tx, watch) = Watch::pair();
        inner
            .child_watches
            .entry(path.to_string())
            .or_default()
            .push(tx);
        Ok((children, Stat { version }, watch))
    }

    async fn set_versioned(
        &self,
        path: &str,
        data: &[u8],
        expected: Option<i64>,
    ) -> Result<Stat> {
        let Some(expected) = expected else {
            self.create(path, data, CreateMode::Persistent).await?;
            return Ok(Stat { version: 0 });
        };

        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(path)
            .ok_or_else(|| TopoError::NoNode(path.to_string()))?;
        if node.version != expected {
            return Err(TopoError::BadVersion(path.to_string()));
        }
        node.data = data.to_vec();
        node.version += 1;
        let stat = Stat {
            version: node.version,
        };
        inner.record_write(path);
        Ok(stat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryStore::new();
        store
            .create("/a", b"hello", CreateMode::Persistent)
            .await
            .unwrap();
        let (data, stat) = store.get("/a").await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(stat.version, 0);
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn create_existing_is_already_exists() {
        let store = MemoryStore::new();
        store.create("/a", b"", CreateMode::Persistent).await.unwrap();
        let err = store
            .create("/a", b"", CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn get_missing_is_no_node() {
        let store = MemoryStore::new();
        assert!(store.get("/nope").await.unwrap_err().is_no_node());
    }

    #[tokio::test]
    async fn children_are_direct_descendants_only() {
        let store = MemoryStore::new();
        store.put_unchecked("/q", b"");
        store.put_unchecked("/q/b", b"");
        store.put_unchecked("/q/a", b"");
        store.put_unchecked("/q/a/deep", b"");
        store.put_unchecked("/qq", b"");
        let (children, _, _) = store.children_watch("/q").await.unwrap();
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn children_watch_fires_on_new_child() {
        let store = MemoryStore::new();
        store.put_unchecked("/q", b"");
        let (_, _, watch) = store.children_watch("/q").await.unwrap();
        assert_eq!(store.pending_watches("/q"), 1);
        store
            .create("/q/0000000001", b"{}", CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(watch.wait().await, WatchEvent::ChildrenChanged);
        assert_eq!(store.pending_watches("/q"), 0);
    }

    #[tokio::test]
    async fn children_watch_on_missing_node_fails() {
        let store = MemoryStore::new();
        assert!(store.children_watch("/q").await.unwrap_err().is_no_node());
    }

    #[tokio::test]
    async fn set_versioned_checks_version() {
        let store = MemoryStore::new();
        store.put_unchecked("/a", b"1");
        let stat = store.set_versioned("/a", b"2", Some(0)).await.unwrap();
        assert_eq!(stat.version, 1);
        let err = store.set_versioned("/a", b"3", Some(0)).await.unwrap_err();
        assert!(matches!(err, TopoError::BadVersion(_)));
        let err = store.set_versioned("/a", b"3", None).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn expire_session_drops_ephemerals_and_fires_watches() {
        let store = MemoryStore::new();
        store.put_unchecked("/t", b"");
        store
            .create("/t/pid", b"123", CreateMode::Ephemeral)
            .await
            .unwrap();
        let (_, _, watch) = store.children_watch("/t").await.unwrap();
        store.expire_session();
        assert!(!store.exists("/t/pid"));
        assert!(store.exists("/t"));
        assert_eq!(watch.wait().await, WatchEvent::SessionLost);
    }

    #[tokio::test]
    async fn delete_fires_parent_watch() {
        let store = MemoryStore::new();
        store.put_unchecked("/q", b"");
        store.put_unchecked("/q/1", b"");
        let (_, _, watch) = store.children_watch("/q").await.unwrap();
        assert!(store.delete("/q/1"));
        assert!(!store.delete("/q/1"));
        assert_eq!(watch.wait().await, WatchEvent::ChildrenChanged);
    }
}
