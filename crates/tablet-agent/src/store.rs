//! Opening the coordination store selected on the command line.

use anyhow::{anyhow, Context as _, Result};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use topo_core::{EtcdStore, MemoryStore, TopoStore};

use crate::cmd::Context;

pub struct OpenStore {
    pub store: Arc<dyn TopoStore>,
    etcd: Option<Arc<EtcdStore>>,
}

impl OpenStore {
    /// Release the store session. Ephemeral nodes go away immediately rather
    /// than when the session times out.
    pub async fn close(self) {
        if let Some(etcd) = self.etcd {
            if let Err(e) = etcd.close().await {
                tracing::warn!(error = %e, "failed to close store session");
            }
        }
    }
}

/// Open the store, run `f` against it, and close the session whether or not
/// `f` succeeded.
pub async fn with_store<T, F, Fut>(
    ctx: &Context,
    session_ttl: std::time::Duration,
    f: F,
) -> Result<T>
where
    F: FnOnce(Arc<dyn TopoStore>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let opened = open(ctx, session_ttl).await?;
    let result = f(opened.store.clone()).await;
    opened.close().await;
    result
}

pub async fn open(ctx: &Context, session_ttl: std::time::Duration) -> Result<OpenStore> {
    if let Some(path) = &ctx.snapshot {
        let store = Arc::new(load_snapshot(path)?);
        return Ok(OpenStore { store, etcd: None });
    }
    if ctx.etcd.is_empty() {
        return Err(anyhow!(
            "no coordination store: pass --etcd (or set VT_ETCD_ENDPOINTS) or --snapshot"
        ));
    }
    let etcd = Arc::new(
        EtcdStore::connect(&ctx.etcd, session_ttl)
            .await
            .with_context(|| format!("failed to connect to etcd at {}", ctx.etcd.join(",")))?,
    );
    let store: Arc<dyn TopoStore> = etcd.clone();
    Ok(OpenStore {
        store,
        etcd: Some(etcd),
    })
}

/// Seed a [`MemoryStore`] from `{ "<path>": <value>, ... }`. String values
/// are stored verbatim, anything else as compact JSON.
fn load_snapshot(path: &Path) -> Result<MemoryStore> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let nodes: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid snapshot {}", path.display()))?;

    let store = MemoryStore::new();
    for (node, value) in nodes {
        let data = match value {
            serde_json::Value::String(s) => s.into_bytes(),
            other => serde_json::to_vec(&other)?,
        };
        store.put_unchecked(&node, &data);
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot_ctx(dir: &tempfile::TempDir) -> Context {
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, r#"{"/zk/c1/vt/tablets/0000000007": ""}"#).unwrap();
        Context {
            config_path: None,
            log_file: None,
            etcd: Vec::new(),
            snapshot: Some(path),
            json: false,
        }
    }

    #[tokio::test]
    async fn with_store_returns_the_inner_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = snapshot_ctx(&dir);
        let err = with_store(&ctx, Duration::from_secs(1), |store| async move {
            store.get("/zk/c1/vt/tablets/0000000099").await?;
            anyhow::Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("0000000099"));
    }

    #[tokio::test]
    async fn with_store_hands_back_the_value() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = snapshot_ctx(&dir);
        let exists = with_store(&ctx, Duration::from_secs(1), |store| async move {
            Ok(store.get("/zk/c1/vt/tablets/0000000007").await.is_ok())
        })
        .await
        .unwrap();
        assert!(exists);
    }
}
