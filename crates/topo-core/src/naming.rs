//! Serving graph records: the per-(cell, keyspace, shard, type) address list
//! that clients read to find live endpoints.

use crate::error::{Result, TopoError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named port of the query service.
pub const VTOCC_PORT: &str = "_vtocc";
/// Named port of the database engine.
pub const MYSQL_PORT: &str = "_mysql";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VtnsAddr {
    pub uid: u32,
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub named_port_map: BTreeMap<String, u16>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl VtnsAddr {
    pub fn new(uid: u32, host: impl Into<String>, port: u16) -> Self {
        Self {
            uid,
            host: host.into(),
            port,
            named_port_map: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn named_port(&self, name: &str) -> Option<u16> {
        self.named_port_map.get(name).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VtnsAddrs {
    #[serde(default)]
    pub entries: Vec<VtnsAddr>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl VtnsAddrs {
    /// Decode a directory entry. An empty value is an empty address list.
    pub fn from_json(path: &str, data: &[u8]) -> Result<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(data).map_err(|e| TopoError::DataCorruption {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn find_mut(&mut self, uid: u32) -> Option<&mut VtnsAddr> {
        self.entries.iter_mut().find(|e| e.uid == uid)
    }
}
