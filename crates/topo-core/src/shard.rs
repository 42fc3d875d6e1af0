use crate::error::{Result, TopoError};
use crate::types::TabletAlias;
use serde::{Deserialize, Serialize};

/// Serving decision for a shard, written by cluster tooling. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Shard {
    #[serde(default)]
    pub master_alias: Option<TabletAlias>,
    #[serde(default)]
    pub replica_aliases: Vec<TabletAlias>,
    #[serde(default)]
    pub rdonly_aliases: Vec<TabletAlias>,
}

impl Shard {
    pub fn from_json(path: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|source| TopoError::Decode {
            path: path.to_string(),
            source,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Whether the shard currently authorizes `alias` to serve.
    pub fn contains(&self, alias: &TabletAlias) -> bool {
        self.master_alias.as_ref() == Some(alias)
            || self.replica_aliases.contains(alias)
            || self.rdonly_aliases.contains(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_checks_every_role() {
        let shard = Shard {
            master_alias: Some(TabletAlias::new("c1", 1)),
            replica_aliases: vec![TabletAlias::new("c1", 7)],
            rdonly_aliases: vec![TabletAlias::new("c2", 9)],
        };
        assert!(shard.contains(&TabletAlias::new("c1", 1)));
        assert!(shard.contains(&TabletAlias::new("c1", 7)));
        assert!(shard.contains(&TabletAlias::new("c2", 9)));
        assert!(!shard.contains(&TabletAlias::new("c2", 7)));
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let shard = Shard::from_json("/s", br#"{"MasterAlias":null}"#).unwrap();
        assert_eq!(shard, Shard::default());
    }
}
