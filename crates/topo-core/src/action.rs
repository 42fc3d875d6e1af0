//! Queued administrative commands for one tablet.
//!
//! An action node is a child of the tablet's action queue whose name is a
//! zero-padded sequence number, so name order equals creation order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TopoError};
use crate::paths;
use crate::store::{CreateMode, TopoStore, MAX_CHANGE_ATTEMPTS};

/// Action kinds understood by the executor.
pub mod kind {
    pub const PING: &str = "Ping";
    pub const SLEEP: &str = "Sleep";
    pub const SET_RDONLY: &str = "SetReadOnly";
    pub const SET_RDWR: &str = "SetReadWrite";
    pub const CHANGE_TYPE: &str = "ChangeType";
    pub const DEMOTE_MASTER: &str = "DemoteMaster";
    pub const PROMOTE_SLAVE: &str = "PromoteSlave";
    pub const RESTART_SLAVE: &str = "RestartSlave";
    pub const SCRAP: &str = "Scrap";
    pub const APPLY_SCHEMA: &str = "ApplySchema";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionNode {
    pub action: String,
    pub action_guid: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub args: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    /// Location in the queue. Attached on decode, never persisted.
    #[serde(skip)]
    pub path: String,
}

impl ActionNode {
    pub fn new(action: impl Into<String>, args: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            action: action.into(),
            action_guid: Uuid::new_v4().to_string(),
            args,
            queued_at: Some(Utc::now()),
            path: String::new(),
        }
    }

    pub fn from_json(path: &str, data: &[u8]) -> Result<Self> {
        let mut node: ActionNode =
            serde_json::from_slice(data).map_err(|source| TopoError::Decode {
                path: path.to_string(),
                source,
            })?;
        node.path = path.to_string();
        Ok(node)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Append `node` to the queue at `action_path` under the next free sequence
/// number. Returns the created node's path.
pub async fn queue_action(
    store: &dyn TopoStore,
    action_path: &str,
    node: &ActionNode,
) -> Result<String> {
    let data = node.to_json()?;
    for attempt in 1..=MAX_CHANGE_ATTEMPTS {
        let (children, _, _) = store.children_watch(action_path).await?;
        let next = children
            .iter()
            .filter_map(|c| c.parse::<u64>().ok())
            .max()
            .map_or(1, |n| n + 1);
        let path = paths::join(action_path, &format!("{next:010}"));

        match store.create(&path, &data, CreateMode::Persistent).await {
            Ok(created) => return Ok(created),
            Err(TopoError::AlreadyExists(_)) => {
                debug!(path, attempt, "sequence taken, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(TopoError::TooManyRetries(action_path.to_string()))
}
