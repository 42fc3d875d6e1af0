use crate::error::{Result, TopoError};
use crate::paths;
use crate::types::{TabletAlias, TabletType};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

// ---------------------------------------------------------------------------
// Tablet
// ---------------------------------------------------------------------------

/// Persisted metadata of one tablet, as stored at its tablet path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tablet {
    pub cell: String,
    pub uid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TabletAlias>,
    /// `host:port` of the query service.
    #[serde(default)]
    pub addr: String,
    /// `host:port` of the database engine.
    #[serde(default)]
    pub mysql_addr: String,
    pub keyspace: String,
    pub shard: String,
    #[serde(rename = "Type")]
    pub tablet_type: TabletType,
    /// Fields written by other tools; carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Tablet {
    pub fn new(
        alias: TabletAlias,
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        tablet_type: TabletType,
    ) -> Self {
        Self {
            cell: alias.cell,
            uid: alias.uid,
            parent: None,
            addr: String::new(),
            mysql_addr: String::new(),
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type,
            extra: serde_json::Map::new(),
        }
    }

    pub fn from_json(path: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|source| TopoError::Decode {
            path: path.to_string(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn alias(&self) -> TabletAlias {
        TabletAlias::new(self.cell.clone(), self.uid)
    }

    pub fn path(&self) -> String {
        paths::tablet_path(&self.alias())
    }

    pub fn action_path(&self) -> String {
        paths::action_path(&self.path())
    }

    pub fn pid_path(&self) -> String {
        paths::pid_path(&self.path())
    }

    pub fn shard_path(&self) -> String {
        paths::shard_path(&self.keyspace, &self.shard)
    }

    pub fn replication_path(&self) -> String {
        paths::replication_path(
            &self.keyspace,
            &self.shard,
            self.parent.as_ref(),
            &self.alias(),
        )
    }

    pub fn serving_path(&self) -> String {
        paths::serving_path(&self.cell, &self.keyspace, &self.shard, self.tablet_type)
    }

    pub fn is_serving_type(&self) -> bool {
        self.tablet_type.is_serving()
    }
}

// ---------------------------------------------------------------------------
// TabletInfo
// ---------------------------------------------------------------------------

/// A tablet record together with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct TabletInfo {
    pub tablet: Tablet,
    pub version: i64,
}

impl Deref for TabletInfo {
    type Target = Tablet;

    fn deref(&self) -> &Tablet {
        &self.tablet
    }
}

// ---------------------------------------------------------------------------
// Address helpers
// ---------------------------------------------------------------------------

/// Split `host:port`. The host may be empty (`:3306`) or a bracketed IPv6
/// literal (`[::1]:3306`).
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TopoError::InvalidAddress(addr.to_string()))?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| TopoError::InvalidAddress(addr.to_string()))?,
        None if host.contains(':') => return Err(TopoError::InvalidAddress(addr.to_string())),
        None => host,
    };
    let port = port
        .parse::<u16>()
        .map_err(|_| TopoError::InvalidAddress(addr.to_string()))?;
    Ok((host.to_string(), port))
}

pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Fill in a blank host (`:6509`) with `hostname`.
pub fn resolve_addr(addr: &str, hostname: &str) -> Result<String> {
    let (host, port) = split_host_port(addr)?;
    if host.is_empty() {
        Ok(join_host_port(hostname, port))
    } else {
        Ok(join_host_port(&host, port))
    }
}

pub fn local_hostname() -> Result<String> {
    let name = hostname::get()?;
    Ok(name.to_string_lossy().into_owned())
}
