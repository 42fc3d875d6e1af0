//! Coordination store contract.
//!
//! The agent talks to a hierarchical, versioned namespace through
//! [`TopoStore`]. Two backends ship with the crate: [`MemoryStore`] for tests
//! and single-host clusters, and [`EtcdStore`] for real deployments.
//!
//! Shared records are only ever written through [`retry_change`], an
//! optimistic read-compute-write cycle that retries on version conflicts.

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, TopoError};

/// Upper bound on read-compute-write cycles before [`retry_change`] gives up.
pub const MAX_CHANGE_ATTEMPTS: usize = 10;

// ---------------------------------------------------------------------------
// Stat / CreateMode
// ---------------------------------------------------------------------------

/// Metadata returned alongside a node's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Bumped on every write to the node's value.
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed by the store when the creating session ends.
    Ephemeral,
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    ChildrenChanged,
    DataChanged,
    Deleted,
    /// The store connection is unhealthy; the event says nothing about the node.
    SessionLost,
}

impl WatchEvent {
    pub fn is_healthy(self) -> bool {
        !matches!(self, WatchEvent::SessionLost)
    }
}

/// One-shot notification handle returned by [`TopoStore::children_watch`].
#[derive(Debug)]
pub struct Watch {
    rx: oneshot::Receiver<WatchEvent>,
}

impl Watch {
    /// Create a watch and the sender the store uses to fire it.
    pub fn pair() -> (oneshot::Sender<WatchEvent>, Watch) {
        let (tx, rx) = oneshot::channel();
        (tx, Watch { rx })
    }

    /// Wait for the watch to fire. A store that drops the watch without
    /// firing it has lost its session.
    pub async fn wait(self) -> WatchEvent {
        self.rx.await.unwrap_or(WatchEvent::SessionLost)
    }
}

// ---------------------------------------------------------------------------
// TopoStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TopoStore: Send + Sync {
    /// Read a node. A missing node is [`TopoError::NoNode`].
    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)>;

    /// Create a node. An existing node is [`TopoError::AlreadyExists`].
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String>;

    /// List the direct children of `path` and arm a watch that fires on the
    /// next change to that child set.
    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, Stat, Watch)>;

    /// Conditional write. `Some(v)` writes only if the node is at version `v`
    /// ([`TopoError::BadVersion`] otherwise); `None` creates the node and fails
    /// with [`TopoError::AlreadyExists`] if it is already there.
    async fn set_versioned(&self, path: &str, data: &[u8], expected: Option<i64>)
        -> Result<Stat>;
}

// ---------------------------------------------------------------------------
// Optimistic update helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Written(Stat),
    /// The callback returned the current value; nothing was written.
    Unchanged,
}

/// Read `path`, compute a new value with `f`, and write it back with a
/// version check, retrying the whole cycle on conflict.
///
/// `f` receives the current value and stat, or an empty value and `None`
/// when the node does not exist. It may run more than once and must not have
/// side effects beyond computing the new value. An error from `f` aborts the
/// change without writing.
pub async fn retry_change<F>(store: &dyn TopoStore, path: &str, mut f: F) -> Result<ChangeOutcome>
where
    F: FnMut(&[u8], Option<Stat>) -> Result<Vec<u8>> + Send,
{
    for attempt in 1..=MAX_CHANGE_ATTEMPTS {
        let (old, stat) = match store.get(path).await {
            Ok((data, stat)) => (data, Some(stat)),
            Err(TopoError::NoNode(_)) => (Vec::new(), None),
            Err(e) => return Err(e),
        };

        let new = f(&old, stat)?;
        if stat.is_some() && new == old {
            return Ok(ChangeOutcome::Unchanged);
        }

        match store
            .set_versioned(path, &new, stat.map(|s| s.version))
            .await
        {
            Ok(stat) => return Ok(ChangeOutcome::Written(stat)),
            Err(TopoError::BadVersion(_)) | Err(TopoError::AlreadyExists(_))
            | Err(TopoError::NoNode(_)) => {
                debug!(path, attempt, "version conflict, retrying change");
            }
            Err(e) => return Err(e),
        }
    }
    Err(TopoError::TooManyRetries(path.to_string()))
}

/// Create an empty persistent node unless it already exists. Returns true if
/// this call created it.
pub async fn ensure_node(store: &dyn TopoStore, path: &str) -> Result<bool> {
    match store.create(path, b"", CreateMode::Persistent).await {
        Ok(_) => Ok(true),
        Err(TopoError::AlreadyExists(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn retry_change_creates_missing_node() {
        let store = MemoryStore::new();
        let outcome = retry_change(&store, "/a", |old, stat| {
            assert!(old.is_empty());
            assert!(stat.is_none());
            Ok(b"v1".to_vec())
        })
        .await
        .unwrap();
        assert_eq!(outcome, ChangeOutcome::Written(Stat { version: 0 }));
        assert_eq!(store.get("/a").await.unwrap().0, b"v1");
    }

    #[tokio::test]
    async fn retry_change_skips_identical_value() {
        let store = MemoryStore::new();
        store.create("/a", b"same", CreateMode::Persistent).await.unwrap();
        let outcome = retry_change(&store, "/a", |old, _| Ok(old.to_vec()))
            .await
            .unwrap();
        assert_eq!(outcome, ChangeOutcome::Unchanged);
        assert_eq!(store.writes_to("/a"), 1);
    }

    #[tokio::test]
    async fn retry_change_callback_error_aborts_without_write() {
        let store = MemoryStore::new();
        store.create("/a", b"x", CreateMode::Persistent).await.unwrap();
        let err = retry_change(&store, "/a", |_, _| Err(TopoError::Uninitialized))
            .await
            .unwrap_err();
        assert!(matches!(err, TopoError::Uninitialized));
        assert_eq!(store.get("/a").await.unwrap().0, b"x");
        assert_eq!(store.writes_to("/a"), 1);
    }

    #[tokio::test]
    async fn retry_change_recomputes_after_conflict() {
        let store = Arc::new(MemoryStore::new());
        store.create("/n", b"0", CreateMode::Persistent).await.unwrap();

        let mut calls = 0;
        let racer = Arc::clone(&store);
        let outcome = retry_change(store.as_ref(), "/n", |old, _| {
            calls += 1;
            if calls == 1 {
                // A concurrent writer lands between our read and our write.
                racer.put_unchecked("/n", b"5");
            }
            let n: i64 = std::str::from_utf8(old).unwrap().parse().unwrap();
            Ok((n + 1).to_string().into_bytes())
        })
        .await
        .unwrap();

        assert_eq!(calls, 2);
        assert!(matches!(outcome, ChangeOutcome::Written(_)));
        assert_eq!(store.get("/n").await.unwrap().0, b"6");
    }

    #[tokio::test]
    async fn ensure_node_is_idempotent() {
        let store = MemoryStore::new();
        assert!(ensure_node(&store, "/q").await.unwrap());
        assert!(!ensure_node(&store, "/q").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_watch_reads_as_session_lost() {
        let (tx, watch) = Watch::pair();
        drop(tx);
        assert_eq!(watch.wait().await, WatchEvent::SessionLost);
    }
}
