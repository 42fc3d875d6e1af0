use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use topo_core::action::{kind, queue_action, ActionNode};
use topo_core::executor::{ActionExecutor, ActionInvocation, ExecOutcome};
use topo_core::naming::{VtnsAddrs, VTOCC_PORT};
use topo_core::resolve::PathResolver;
use topo_core::serving::{self, PublishOutcome};
use topo_core::shard::Shard;
use topo_core::tablet::Tablet;
use topo_core::types::{TabletAlias, TabletType};
use topo_core::{ActionAgent, AgentConfig, AgentHandle, MemoryStore, Result, TopoStore};

const TABLET: &str = "/zk/c1/vt/tablets/0000000007";
const QUEUE: &str = "/zk/c1/vt/tablets/0000000007/action";
const SHARD: &str = "/zk/global/vt/keyspaces/ks/shards/0";
const SERVING: &str = "/zk/c1/vt/ns/ks/0/replica";

/// Stands in for the executor binary: records what it was asked to do,
/// applies `ChangeType` to the tablet record, and removes the action node
/// when done.
struct FakeVtaction {
    store: Arc<MemoryStore>,
    seen: Mutex<Vec<ActionInvocation>>,
}

impl FakeVtaction {
    fn new(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn actions(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.action.clone())
            .collect()
    }
}

#[async_trait]
impl ActionExecutor for FakeVtaction {
    async fn execute(&self, inv: &ActionInvocation) -> Result<ExecOutcome> {
        self.seen.lock().unwrap().push(inv.clone());
        if inv.action == kind::CHANGE_TYPE {
            let (data, _) = self.store.get(TABLET).await?;
            let mut tablet = Tablet::from_json(TABLET, &data)?;
            tablet.tablet_type = TabletType::Replica;
            self.store.put_unchecked(TABLET, &tablet.to_json()?);
        }
        self.store.delete(&inv.action_path);
        Ok(ExecOutcome {
            exit_code: Some(0),
            output: format!("{} done\n", inv.action),
        })
    }
}

struct Cluster {
    _dir: TempDir,
    store: Arc<MemoryStore>,
    vtaction: Arc<FakeVtaction>,
    resolver: PathResolver,
}

impl Cluster {
    fn new(tablet_type: TabletType) -> Self {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("vtaction");
        let cnf = dir.path().join("my.cnf");
        std::fs::write(&exe, "").unwrap();
        std::fs::write(&cnf, "").unwrap();
        let resolver = PathResolver::new(
            vec![exe.display().to_string()],
            None,
            vec![cnf.display().to_string()],
        );

        let store = Arc::new(MemoryStore::new());
        let tablet = Tablet::new(TabletAlias::new("c1", 7), "ks", "0", tablet_type);
        store.put_unchecked(TABLET, &tablet.to_json().unwrap());
        let shard = Shard {
            replica_aliases: vec![TabletAlias::new("c1", 7)],
            ..Default::default()
        };
        store.put_unchecked(SHARD, &shard.to_json().unwrap());

        let vtaction = FakeVtaction::new(store.clone());
        Self {
            _dir: dir,
            store,
            vtaction,
            resolver,
        }
    }

    async fn start(&self) -> AgentHandle {
        let config = AgentConfig {
            backoff_secs: 0,
            hostname: Some("db7".into()),
            ..AgentConfig::default()
        };
        ActionAgent::new(self.store.clone(), TABLET, config)
            .with_resolver(self.resolver.clone())
            .with_executor(self.vtaction.clone())
            .start(":6509", ":3306")
            .await
            .unwrap()
    }

    async fn enqueue(&self, action: &str) -> String {
        let node = ActionNode::new(action, serde_json::Map::new());
        queue_action(self.store.as_ref(), QUEUE, &node).await.unwrap()
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn queued_actions_run_in_order() {
    let cluster = Cluster::new(TabletType::Spare);
    let handle = cluster.start().await;

    cluster.enqueue(kind::PING).await;
    cluster.enqueue(kind::SET_RDONLY).await;
    cluster.enqueue(kind::SLEEP).await;

    eventually("three actions", || cluster.vtaction.actions().len() == 3).await;
    assert_eq!(
        cluster.vtaction.actions(),
        vec![kind::PING, kind::SET_RDONLY, kind::SLEEP]
    );

    let first = cluster.vtaction.seen.lock().unwrap()[0].clone();
    assert_eq!(first.action_path, format!("{QUEUE}/0000000001"));
    assert!(first.mycnf_path.ends_with("my.cnf"));
    handle.shutdown().await;
}

#[tokio::test]
async fn actions_present_at_startup_are_drained() {
    let cluster = Cluster::new(TabletType::Spare);
    cluster.store.put_unchecked(QUEUE, b"");
    cluster.enqueue(kind::PING).await;

    let handle = cluster.start().await;
    eventually("startup drain", || cluster.vtaction.actions() == vec![kind::PING]).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn cache_follows_tablet_changes_made_by_actions() {
    let cluster = Cluster::new(TabletType::Spare);
    let handle = cluster.start().await;
    let cache = handle.cache();
    let before = cache.current().unwrap();

    cluster.enqueue(kind::CHANGE_TYPE).await;
    eventually("type change", || {
        cache.current().unwrap().tablet_type == TabletType::Replica
    })
    .await;
    let after = cache.current().unwrap();
    assert!(after.version > before.version);
    assert_eq!(after.addr, "db7:6509");
    handle.shutdown().await;
}

#[tokio::test]
async fn recovers_after_session_loss() {
    let cluster = Cluster::new(TabletType::Spare);
    let handle = cluster.start().await;
    eventually("queue watch", || cluster.store.pending_watches(QUEUE) == 1).await;

    cluster.store.expire_session();
    assert!(!cluster.store.exists(&format!("{TABLET}/pid")));

    eventually("rearmed watch", || cluster.store.pending_watches(QUEUE) == 1).await;
    cluster.enqueue(kind::PING).await;
    eventually("action after reconnect", || cluster.vtaction.actions().len() == 1).await;
    assert!(handle.is_running());
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_dispatching() {
    let cluster = Cluster::new(TabletType::Spare);
    let handle = cluster.start().await;
    handle.shutdown().await;

    cluster.enqueue(kind::PING).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cluster.vtaction.actions().is_empty());
}

#[tokio::test]
async fn replica_is_published_once_the_entry_exists() {
    let cluster = Cluster::new(TabletType::Replica);
    let handle = cluster.start().await;

    // No entry yet: the agent must not create one.
    assert!(!cluster.store.exists(SERVING));

    cluster.store.put_unchecked(SERVING, b"");
    let cache = handle.cache();
    let outcome = serving::publish(cluster.store.as_ref(), &cache).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Added);

    let (data, _) = cluster.store.get(SERVING).await.unwrap();
    let addrs = VtnsAddrs::from_json(SERVING, &data).unwrap();
    assert_eq!(addrs.entries.len(), 1);
    assert_eq!(addrs.entries[0].uid, 7);
    assert_eq!(addrs.entries[0].host, "db7");

    let eps = serving::endpoints(
        cluster.store.as_ref(),
        "c1",
        "ks",
        "0",
        TabletType::Replica,
        VTOCC_PORT,
    )
    .await
    .unwrap();
    assert_eq!(eps, vec![("db7".to_string(), 6509)]);
    handle.shutdown().await;
}

#[tokio::test]
async fn unreadable_queue_is_retried_until_it_returns() {
    let cluster = Cluster::new(TabletType::Spare);
    let handle = cluster.start().await;
    eventually("queue watch", || cluster.store.pending_watches(QUEUE) == 1).await;

    // Wake the loop with the queue node gone: every drain now fails.
    assert!(cluster.store.delete(QUEUE));
    cluster.store.expire_session();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_running());
    assert_eq!(cluster.store.pending_watches(QUEUE), 0);

    cluster.store.put_unchecked(QUEUE, b"");
    cluster.enqueue(kind::PING).await;
    eventually("action after queue returns", || {
        cluster.vtaction.actions() == vec![kind::PING]
    })
    .await;
    assert!(handle.is_running());
    handle.shutdown().await;
}
