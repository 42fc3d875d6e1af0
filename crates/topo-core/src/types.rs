use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TabletType
// ---------------------------------------------------------------------------

/// Role of a tablet in its shard. Only serving types receive client traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabletType {
    Idle,
    Master,
    Replica,
    Rdonly,
    Batch,
    Spare,
    Experimental,
    SchemaUpgrade,
    Backup,
    Restore,
    Lag,
    LagOrphan,
    Scrap,
}

impl TabletType {
    pub fn all() -> &'static [TabletType] {
        &[
            TabletType::Idle,
            TabletType::Master,
            TabletType::Replica,
            TabletType::Rdonly,
            TabletType::Batch,
            TabletType::Spare,
            TabletType::Experimental,
            TabletType::SchemaUpgrade,
            TabletType::Backup,
            TabletType::Restore,
            TabletType::Lag,
            TabletType::LagOrphan,
            TabletType::Scrap,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TabletType::Idle => "idle",
            TabletType::Master => "master",
            TabletType::Replica => "replica",
            TabletType::Rdonly => "rdonly",
            TabletType::Batch => "batch",
            TabletType::Spare => "spare",
            TabletType::Experimental => "experimental",
            TabletType::SchemaUpgrade => "schema_upgrade",
            TabletType::Backup => "backup",
            TabletType::Restore => "restore",
            TabletType::Lag => "lag",
            TabletType::LagOrphan => "lag_orphan",
            TabletType::Scrap => "scrap",
        }
    }

    /// Types that appear in the serving graph.
    pub fn is_serving(self) -> bool {
        matches!(
            self,
            TabletType::Master | TabletType::Replica | TabletType::Rdonly | TabletType::Batch
        )
    }
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TabletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TabletType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown tablet type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// TabletAlias
// ---------------------------------------------------------------------------

/// Cluster-wide identity of a tablet: the cell it lives in plus its uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TabletAlias {
    pub cell: String,
    pub uid: u32,
}

impl TabletAlias {
    pub fn new(cell: impl Into<String>, uid: u32) -> Self {
        Self {
            cell: cell.into(),
            uid,
        }
    }
}

impl fmt::Display for TabletAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:010}", self.cell, self.uid)
    }
}
