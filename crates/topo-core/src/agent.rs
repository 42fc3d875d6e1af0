//! The per-tablet action agent.
//!
//! [`ActionAgent::start`] registers the tablet in the coordination store and
//! then hands off to a background task that alternates between draining the
//! action queue and waiting for it to change:
//!
//! ```text
//! Draining --ok--> Waiting --children changed--> Draining
//!    |                |
//!    +--error--+      +--session lost--+
//!              v                       v
//!           sleep(backoff) -------> Draining
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::TabletCache;
use crate::config::AgentConfig;
use crate::error::{Result, TopoError};
use crate::executor::{ActionExecutor, ProcessExecutor};
use crate::queue::ActionQueue;
use crate::resolve::{PathResolver, ResolvedPaths};
use crate::serving::{self, PublishOutcome};
use crate::store::{ensure_node, retry_change, CreateMode, TopoStore, WatchEvent};
use crate::tablet::{local_hostname, resolve_addr, Tablet};

pub struct ActionAgent {
    store: Arc<dyn TopoStore>,
    cache: Arc<TabletCache>,
    config: AgentConfig,
    resolver: PathResolver,
    executor: Option<Arc<dyn ActionExecutor>>,
}

impl ActionAgent {
    pub fn new(store: Arc<dyn TopoStore>, tablet_path: impl Into<String>, config: AgentConfig) -> Self {
        let cache = Arc::new(TabletCache::new(Arc::clone(&store), tablet_path));
        let resolver = PathResolver::from_config(&config);
        Self {
            store,
            cache,
            config,
            resolver,
            executor: None,
        }
    }

    /// Run actions through `executor` instead of spawning the resolved binary.
    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn cache(&self) -> Arc<TabletCache> {
        Arc::clone(&self.cache)
    }

    /// Register the tablet and start the event loop.
    ///
    /// `bind_addr` and `mysql_addr` are `host:port`; a blank host is replaced
    /// by the configured or local hostname. Any error here means the tablet
    /// could not be registered and the caller should give up.
    pub async fn start(self, bind_addr: &str, mysql_addr: &str) -> Result<AgentHandle> {
        let tablet_path = self.cache.tablet_path().to_string();
        let tablet = self.cache.refresh().await?;
        info!(path = %tablet_path, alias = %tablet.alias(), tablet_type = %tablet.tablet_type, "tablet record loaded");

        let resolved = self.resolver.resolve(tablet.uid)?;
        info!(
            executor = %resolved.executor.display(),
            mycnf = %resolved.mycnf.display(),
            "resolved local paths"
        );

        self.register_addrs(&tablet_path, bind_addr, mysql_addr).await?;
        let tablet = self.cache.refresh().await?;

        self.create_pid_node(&tablet).await?;

        for path in [tablet.replication_path(), tablet.action_path()] {
            if ensure_node(self.store.as_ref(), &path).await? {
                info!(path = %path, "created node");
            }
        }

        match serving::publish(self.store.as_ref(), &self.cache).await {
            Ok(PublishOutcome::Skipped) => {
                warn!(path = %tablet.serving_path(), "serving graph entry missing, not published")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "serving address publish failed"),
        }

        let queue = self.build_queue(resolved);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backoff = self.config.backoff();
        let task = tokio::spawn(run_loop(queue, backoff, shutdown_rx));
        info!(path = %tablet_path, "action agent running");

        Ok(AgentHandle {
            cache: self.cache,
            shutdown_tx,
            task,
        })
    }

    async fn register_addrs(&self, tablet_path: &str, bind_addr: &str, mysql_addr: &str) -> Result<()> {
        let hostname = match &self.config.hostname {
            Some(h) => h.clone(),
            None => local_hostname()?,
        };
        let addr = resolve_addr(bind_addr, &hostname)?;
        let mysql_addr = resolve_addr(mysql_addr, &hostname)?;

        retry_change(self.store.as_ref(), tablet_path, |old, _| {
            if old.is_empty() {
                return Err(TopoError::DataCorruption {
                    path: tablet_path.to_string(),
                    reason: "empty tablet record".to_string(),
                });
            }
            let mut tablet = Tablet::from_json(tablet_path, old)?;
            if tablet.addr == addr && tablet.mysql_addr == mysql_addr {
                return Ok(old.to_vec());
            }
            tablet.addr = addr.clone();
            tablet.mysql_addr = mysql_addr.clone();
            tablet.to_json()
        })
        .await?;
        info!(addr = %addr, mysql_addr = %mysql_addr, "tablet addresses registered");
        Ok(())
    }

    async fn create_pid_node(&self, tablet: &Tablet) -> Result<()> {
        let pid_path = tablet.pid_path();
        let pid = std::process::id().to_string();
        match self
            .store
            .create(&pid_path, pid.as_bytes(), CreateMode::Ephemeral)
            .await
        {
            Ok(_) => Ok(()),
            Err(TopoError::AlreadyExists(_)) => {
                warn!(path = %pid_path, "liveness node still held by a previous session");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn build_queue(&self, resolved: ResolvedPaths) -> ActionQueue {
        let executor: Arc<dyn ActionExecutor> = match &self.executor {
            Some(executor) => Arc::clone(executor),
            None => Arc::new(ProcessExecutor::new(resolved.executor)),
        };
        ActionQueue::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            executor,
            resolved.mycnf,
            self.config.log_destination.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// AgentHandle
// ---------------------------------------------------------------------------

/// A running agent. Dropping the handle also stops the loop at its next wait.
pub struct AgentHandle {
    cache: Arc<TabletCache>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    pub fn cache(&self) -> Arc<TabletCache> {
        Arc::clone(&self.cache)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop at its next wait and return once it has exited. An
    /// action in flight is allowed to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "agent loop panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn run_loop(queue: ActionQueue, backoff: Duration, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let pending = match queue.drain().await {
            Ok((pending, report)) => {
                if report.dispatched() > 0 {
                    info!(
                        succeeded = report.succeeded,
                        failed = report.failed,
                        skipped = report.skipped,
                        "action queue drained"
                    );
                }
                pending
            }
            Err(e) => {
                error!(path = %queue.action_path(), error = %e, "action queue read failed");
                if !pause(backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        let event = tokio::select! {
            event = pending.wait() => event,
            _ = shutdown.changed() => break,
        };
        if !event.is_healthy() {
            warn!(path = %queue.action_path(), "store session lost, backing off");
            if !pause(backoff, &mut shutdown).await {
                break;
            }
        } else if event != WatchEvent::ChildrenChanged {
            info!(path = %queue.action_path(), ?event, "unexpected watch event");
        }
    }
    info!(path = %queue.action_path(), "action agent stopped");
}

/// Sleep for `backoff`. Returns false if shutdown was requested meanwhile.
async fn pause(backoff: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => true,
        _ = shutdown.changed() => false,
    }
}
