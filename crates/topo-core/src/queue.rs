//! Draining the tablet's action queue.
//!
//! Pending actions are dispatched strictly one at a time, in name order.
//! The queue is re-listed on every drain so the agent converges even when an
//! action failed or the queue was edited by hand.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::action::ActionNode;
use crate::cache::TabletCache;
use crate::error::Result;
use crate::executor::{ActionExecutor, ActionInvocation};
use crate::paths;
use crate::store::{TopoStore, Watch};

/// What happened to one queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Succeeded,
    /// The executor ran and reported failure.
    Failed,
    /// The node could not be read or decoded, or the executor could not be
    /// started.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DrainReport {
    pub fn dispatched(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    fn record(&mut self, d: Dispatch) {
        match d {
            Dispatch::Succeeded => self.succeeded += 1,
            Dispatch::Failed => self.failed += 1,
            Dispatch::Skipped => self.skipped += 1,
        }
    }
}

pub struct ActionQueue {
    store: Arc<dyn TopoStore>,
    cache: Arc<TabletCache>,
    executor: Arc<dyn ActionExecutor>,
    action_path: String,
    mycnf_path: PathBuf,
    log_destination: PathBuf,
}

impl ActionQueue {
    pub fn new(
        store: Arc<dyn TopoStore>,
        cache: Arc<TabletCache>,
        executor: Arc<dyn ActionExecutor>,
        mycnf_path: PathBuf,
        log_destination: PathBuf,
    ) -> Self {
        let action_path = paths::action_path(cache.tablet_path());
        Self {
            store,
            cache,
            executor,
            action_path,
            mycnf_path,
            log_destination,
        }
    }

    pub fn action_path(&self) -> &str {
        &self.action_path
    }

    /// Dispatch every queued action and return a watch on the queue.
    ///
    /// Only a failure to list the queue is an error; problems with individual
    /// actions are logged and the drain moves on.
    pub async fn drain(&self) -> Result<(Watch, DrainReport)> {
        let (mut children, _, watch) = self.store.children_watch(&self.action_path).await?;
        let mut report = DrainReport::default();
        if children.is_empty() {
            return Ok((watch, report));
        }

        // Sequence suffixes are fixed width, so name order is creation order.
        children.sort();
        for child in &children {
            let path = paths::join(&self.action_path, child);
            report.record(self.dispatch(&path).await);
        }
        Ok((watch, report))
    }

    async fn dispatch(&self, action_path: &str) -> Dispatch {
        info!(action_path, "action dispatch");
        let data = match self.store.get(action_path).await {
            Ok((data, _)) => data,
            Err(e) => {
                error!(action_path, error = %e, "action dispatch failed");
                return Dispatch::Skipped;
            }
        };

        let node = match ActionNode::from_json(action_path, &data) {
            Ok(node) => node,
            Err(e) => {
                error!(action_path, error = %e, "action decode failed");
                return Dispatch::Skipped;
            }
        };

        let invocation = ActionInvocation {
            action: node.action,
            action_path: node.path,
            action_guid: node.action_guid,
            mycnf_path: self.mycnf_path.clone(),
            log_destination: self.log_destination.clone(),
        };
        info!(
            action_path,
            action = %invocation.action,
            guid = %invocation.action_guid,
            "action launch"
        );

        let dispatch = match self.executor.execute(&invocation).await {
            Ok(outcome) if outcome.success() => {
                info!(action_path, output = %outcome.output, "action completed");
                Dispatch::Succeeded
            }
            Ok(outcome) => {
                error!(
                    action_path,
                    exit_code = ?outcome.exit_code,
                    output = %outcome.output,
                    "action failed"
                );
                Dispatch::Failed
            }
            Err(e) => {
                error!(action_path, error = %e, "action launch failed");
                return Dispatch::Skipped;
            }
        };

        // Actions are expected to change the tablet record.
        if let Err(e) = self.cache.refresh().await {
            warn!(action_path, error = %e, "failed rereading tablet after action");
        }
        dispatch
    }
}
