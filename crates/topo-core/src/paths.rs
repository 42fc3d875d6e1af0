use crate::types::{TabletAlias, TabletType};

// ---------------------------------------------------------------------------
// Namespace constants
// ---------------------------------------------------------------------------

pub const ROOT: &str = "/zk";
pub const GLOBAL_CELL: &str = "global";

pub const ACTION_NODE: &str = "action";
pub const PID_NODE: &str = "pid";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn tablets_root(cell: &str) -> String {
    format!("{ROOT}/{cell}/vt/tablets")
}

pub fn tablet_path(alias: &TabletAlias) -> String {
    format!("{}/{:010}", tablets_root(&alias.cell), alias.uid)
}

pub fn action_path(tablet_path: &str) -> String {
    format!("{tablet_path}/{ACTION_NODE}")
}

pub fn pid_path(tablet_path: &str) -> String {
    format!("{tablet_path}/{PID_NODE}")
}

pub fn shard_path(keyspace: &str, shard: &str) -> String {
    format!("{ROOT}/{GLOBAL_CELL}/vt/keyspaces/{keyspace}/shards/{shard}")
}

/// Node tracking a tablet's position in the replication graph of its shard.
pub fn replication_path(
    keyspace: &str,
    shard: &str,
    parent: Option<&TabletAlias>,
    alias: &TabletAlias,
) -> String {
    match parent {
        Some(p) => format!("{}/{p}/{alias}", shard_path(keyspace, shard)),
        None => format!("{}/{alias}", shard_path(keyspace, shard)),
    }
}

/// Serving address directory entry for one (cell, keyspace, shard, type).
pub fn serving_path(cell: &str, keyspace: &str, shard: &str, tablet_type: TabletType) -> String {
    format!("{ROOT}/{cell}/vt/ns/{keyspace}/{shard}/{tablet_type}")
}

pub fn join(parent: &str, child: &str) -> String {
    format!("{}/{child}", parent.trim_end_matches('/'))
}

/// Parent of `path`, or `None` for the namespace root.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(i) => Some(&trimmed[..i]),
    }
}

/// Parses `/zk/<cell>/vt/tablets/<uid>` back into an alias.
pub fn alias_from_tablet_path(path: &str) -> Option<TabletAlias> {
    let rest = path.strip_prefix(ROOT)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    let cell = parts.next()?;
    if parts.next()? != "vt" || parts.next()? != "tablets" {
        return None;
    }
    let uid = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(TabletAlias::new(cell, uid))
}
