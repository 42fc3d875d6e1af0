//! Publishing this tablet into the serving graph.
//!
//! The serving graph entry for (cell, keyspace, shard, type) is shared by
//! every tablet of that type, so it is only ever modified through
//! [`retry_change`]. The entry itself is created by cluster tooling; the
//! agent never brings one into existence.

use tracing::{debug, info};

use crate::cache::TabletCache;
use crate::error::{Result, TopoError};
use crate::naming::{VtnsAddr, VtnsAddrs, MYSQL_PORT, VTOCC_PORT};
use crate::paths;
use crate::shard::Shard;
use crate::store::{retry_change, ChangeOutcome, TopoStore};
use crate::tablet::{split_host_port, Tablet};
use crate::types::TabletType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The tablet's current type does not take traffic.
    NotServingType,
    /// The shard record does not list the tablet.
    NotAuthorized,
    /// No serving graph entry exists for the tablet's type yet.
    Skipped,
    /// Our entry was already current.
    Unchanged,
    /// Our entry existed and its addresses were rewritten.
    Updated,
    /// Our entry was appended.
    Added,
}

/// Build this tablet's serving graph entry from its record. The host comes
/// from the query service address.
pub fn vtns_addr_for_tablet(tablet: &Tablet) -> Result<VtnsAddr> {
    let (host, vtocc_port) = split_host_port(&tablet.addr)?;
    let (_, mysql_port) = split_host_port(&tablet.mysql_addr)?;
    let mut entry = VtnsAddr::new(tablet.uid, host, 0);
    entry.named_port_map.insert(VTOCC_PORT.to_string(), vtocc_port);
    entry.named_port_map.insert(MYSQL_PORT.to_string(), mysql_port);
    Ok(entry)
}

/// Make sure the serving graph entry for the tablet's current type lists it
/// with its current addresses.
pub async fn publish(store: &dyn TopoStore, cache: &TabletCache) -> Result<PublishOutcome> {
    let info = cache.current()?;
    if !info.is_serving_type() {
        debug!(tablet_type = %info.tablet_type, "not a serving type, skipping publish");
        return Ok(PublishOutcome::NotServingType);
    }

    let shard_path = info.shard_path();
    let (data, _) = store.get(&shard_path).await?;
    let shard = Shard::from_json(&shard_path, &data)?;
    if !shard.contains(&info.alias()) {
        info!(alias = %info.alias(), shard = %shard_path, "tablet not in shard record, skipping publish");
        return Ok(PublishOutcome::NotAuthorized);
    }

    let ours = vtns_addr_for_tablet(&info)?;
    let path = info.serving_path();

    // Set by the callback on every attempt; the last attempt wins.
    let mut missing = false;
    let mut appended = false;
    let result = retry_change(store, &path, |old, stat| {
        missing = stat.is_none();
        if missing {
            return Err(TopoError::NoNode(path.clone()));
        }
        let mut addrs = VtnsAddrs::from_json(&path, old)?;
        appended = merge_entry(&mut addrs, &ours);
        if !appended && addrs_unchanged(old, &addrs, &ours) {
            return Ok(old.to_vec());
        }
        addrs.to_json()
    })
    .await;

    let outcome = match result {
        Err(TopoError::NoNode(_)) if missing => PublishOutcome::Skipped,
        Err(e) => return Err(e),
        Ok(ChangeOutcome::Unchanged) => PublishOutcome::Unchanged,
        Ok(ChangeOutcome::Written(_)) if appended => PublishOutcome::Added,
        Ok(ChangeOutcome::Written(_)) => PublishOutcome::Updated,
    };
    info!(path = %path, uid = info.uid, ?outcome, "serving address publish");
    Ok(outcome)
}

/// Apply `ours` to `addrs`. Returns true if it was appended rather than
/// updated in place.
fn merge_entry(addrs: &mut VtnsAddrs, ours: &VtnsAddr) -> bool {
    match addrs.find_mut(ours.uid) {
        Some(existing) => {
            existing.host = ours.host.clone();
            for name in [VTOCC_PORT, MYSQL_PORT] {
                if let Some(port) = ours.named_port(name) {
                    existing.named_port_map.insert(name.to_string(), port);
                }
            }
            false
        }
        None => {
            addrs.entries.push(ours.clone());
            true
        }
    }
}

/// True if the stored entry already carried our host and ports, in which
/// case the stored bytes are written back untouched.
fn addrs_unchanged(old: &[u8], merged: &VtnsAddrs, ours: &VtnsAddr) -> bool {
    let Ok(before) = VtnsAddrs::from_json("", old) else {
        return false;
    };
    let find = |a: &VtnsAddrs| a.entries.iter().find(|e| e.uid == ours.uid).cloned();
    find(&before) == find(merged)
}

/// Addresses exposing `service` in the serving graph entry for
/// (cell, keyspace, shard, type).
pub async fn endpoints(
    store: &dyn TopoStore,
    cell: &str,
    keyspace: &str,
    shard: &str,
    tablet_type: TabletType,
    service: &str,
) -> Result<Vec<(String, u16)>> {
    let path = paths::serving_path(cell, keyspace, shard, tablet_type);
    let (data, _) = store.get(&path).await?;
    let addrs = VtnsAddrs::from_json(&path, &data)?;
    Ok(addrs
        .entries
        .into_iter()
        .filter_map(|e| e.named_port(service).map(|port| (e.host, port)))
        .collect())
}
