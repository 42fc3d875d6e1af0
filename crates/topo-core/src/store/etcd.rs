//! etcd-backed [`TopoStore`].
//!
//! Paths map one-to-one onto etcd keys. A node's children are the keys one
//! level below `<path>/`. Ephemeral nodes are attached to a lease that a
//! background task keeps alive for the lifetime of the store.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{
    Client, Compare, CompareOp, Event, EventType, GetOptions, LeaseKeepAliveStream, LeaseKeeper,
    PutOptions, Txn, TxnOp, WatchOptions, WatchStream, Watcher,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::{CreateMode, Stat, TopoStore, Watch, WatchEvent};
use crate::error::{Result, TopoError};

pub struct EtcdStore {
    client: Client,
    lease_id: i64,
    keepalive: JoinHandle<()>,
}

impl EtcdStore {
    /// Connect with exponential backoff and open a session lease of
    /// `session_ttl`.
    pub async fn connect(endpoints: &[String], session_ttl: Duration) -> Result<Self> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let mut client = retry(backoff, || async {
            match Client::connect(endpoints, None).await {
                Ok(client) => {
                    debug!("connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| TopoError::Connection(format!("etcd unreachable: {e}")))?;

        let ttl = session_ttl.as_secs().max(1) as i64;
        let lease_id = client
            .lease_grant(ttl, None)
            .await
            .map_err(|e| TopoError::Connection(format!("lease grant failed: {e}")))?
            .id();
        let (keeper, stream) = client
            .lease_keep_alive(lease_id)
            .await
            .map_err(|e| TopoError::Connection(format!("lease keep-alive failed: {e}")))?;
        let interval = Duration::from_secs((ttl as u64 / 3).max(1));
        let keepalive = spawn_keepalive_task(keeper, stream, lease_id, interval);

        Ok(Self {
            client,
            lease_id,
            keepalive,
        })
    }

    /// Revoke the session lease, removing every ephemeral node this store
    /// created.
    pub async fn close(&self) -> Result<()> {
        self.keepalive.abort();
        let mut client = self.client.clone();
        client
            .lease_revoke(self.lease_id)
            .await
            .map_err(|e| TopoError::Connection(format!("lease revoke failed: {e}")))?;
        Ok(())
    }
}

impl Drop for EtcdStore {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

#[async_trait]
impl TopoStore for EtcdStore {
    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let mut client = self.client.clone();
        let resp = client
            .get(path, None)
            .await
            .map_err(|e| read_err(path, e))?;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| TopoError::NoNode(path.to_string()))?;
        Ok((
            kv.value().to_vec(),
            Stat {
                version: kv.version(),
            },
        ))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String> {
        let options = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(PutOptions::new().with_lease(self.lease_id)),
        };
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, data, options)]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await.map_err(|e| write_err(path, e))?;
        if !resp.succeeded() {
            return Err(TopoError::AlreadyExists(path.to_string()));
        }
        Ok(path.to_string())
    }

    async fn children_watch(&self, path: &str) -> Result<(Vec<String>, Stat, Watch)> {
        let (_, stat) = self.get(path).await?;

        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut client = self.client.clone();
        let resp = client
            .get(
                prefix.as_str(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await
            .map_err(|e| read_err(path, e))?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);

        let children: BTreeSet<String> = resp
            .kvs()
            .iter()
            .filter_map(|kv| kv.key_str().ok())
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        // Start right after the listing so no change between the two is lost.
        let (watcher, stream) = client
            .watch(
                prefix.as_str(),
                Some(
                    WatchOptions::new()
                        .with_prefix()
                        .with_start_revision(revision + 1),
                ),
            )
            .await
            .map_err(|e| read_err(path, e))?;

        let (tx, watch) = Watch::pair();
        tokio::spawn(forward_child_event(watcher, stream, prefix, tx));

        Ok((children.into_iter().collect(), stat, watch))
    }

    async fn set_versioned(
        &self,
        path: &str,
        data: &[u8],
        expected: Option<i64>,
    ) -> Result<Stat> {
        let Some(version) = expected else {
            self.create(path, data, CreateMode::Persistent).await?;
            return Ok(Stat { version: 1 });
        };

        let txn = Txn::new()
            .when(vec![
                Compare::create_revision(path, CompareOp::Greater, 0),
                Compare::version(path, CompareOp::Equal, version),
            ])
            .and_then(vec![TxnOp::put(path, data, None)]);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await.map_err(|e| write_err(path, e))?;
        if !resp.succeeded() {
            return Err(TopoError::BadVersion(path.to_string()));
        }
        Ok(Stat {
            version: version + 1,
        })
    }
}

fn read_err(path: &str, e: etcd_client::Error) -> TopoError {
    TopoError::StoreRead {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

fn write_err(path: &str, e: etcd_client::Error) -> TopoError {
    TopoError::StoreWrite {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Watch forwarding
// ---------------------------------------------------------------------------

async fn forward_child_event(
    mut watcher: Watcher,
    mut stream: WatchStream,
    prefix: String,
    mut tx: oneshot::Sender<WatchEvent>,
) {
    let event = tokio::select! {
        event = next_child_event(&mut stream, &prefix) => event,
        _ = tx.closed() => {
            let _ = watcher.cancel().await;
            return;
        }
    };
    let _ = watcher.cancel().await;
    let _ = tx.send(event);
}

async fn next_child_event(stream: &mut WatchStream, prefix: &str) -> WatchEvent {
    loop {
        match stream.message().await {
            Ok(Some(resp)) => {
                if resp.canceled() {
                    return WatchEvent::SessionLost;
                }
                if resp.events().iter().any(|ev| is_child_change(prefix, ev)) {
                    return WatchEvent::ChildrenChanged;
                }
            }
            Ok(None) => return WatchEvent::SessionLost,
            Err(e) => {
                warn!(error = %e, prefix, "etcd watch failed");
                return WatchEvent::SessionLost;
            }
        }
    }
}

/// A direct child appearing (first put) or disappearing.
fn is_child_change(prefix: &str, ev: &Event) -> bool {
    let Some(kv) = ev.kv() else {
        return false;
    };
    let Ok(key) = kv.key_str() else {
        return false;
    };
    match key.strip_prefix(prefix) {
        Some(rest) if !rest.is_empty() && !rest.contains('/') => {}
        _ => return false,
    }
    matches!(ev.event_type(), EventType::Delete)
        || (matches!(ev.event_type(), EventType::Put) && kv.version() == 1)
}

// ---------------------------------------------------------------------------
// Session lease
// ---------------------------------------------------------------------------

/// Keep the session lease alive. If keep-alive fails the lease expires after
/// its TTL and the ephemeral nodes go with it.
fn spawn_keepalive_task(
    mut keeper: LeaseKeeper,
    mut stream: LeaseKeepAliveStream,
    lease_id: i64,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;

        loop {
            interval.tick().await;

            if let Err(e) = keeper.keep_alive().await {
                error!(lease_id, error = %e, "keep-alive send failed");
                break;
            }

            match stream.message().await {
                Ok(Some(resp)) => {
                    trace!(lease_id, ttl = resp.ttl(), "keep-alive ok");
                }
                Ok(None) => {
                    error!(lease_id, "keep-alive stream closed");
                    break;
                }
                Err(e) => {
                    error!(lease_id, error = %e, "keep-alive failed");
                    break;
                }
            }
        }
    })
}
