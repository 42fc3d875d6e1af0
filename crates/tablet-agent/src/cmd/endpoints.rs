use crate::output::{print_json, print_table};
use crate::store;
use anyhow::Result;
use topo_core::serving;
use topo_core::types::TabletType;

use super::{runtime, Context};

pub fn run(
    ctx: &Context,
    cell: &str,
    keyspace: &str,
    shard: &str,
    tablet_type: TabletType,
    service: &str,
) -> Result<()> {
    let config = ctx.config()?;
    let rt = runtime()?;

    let addrs = rt.block_on(store::with_store(ctx, config.session_ttl(), |store| async move {
        serving::endpoints(store.as_ref(), cell, keyspace, shard, tablet_type, service)
            .await
            .map_err(anyhow::Error::from)
    }))?;

    if ctx.json {
        let list: Vec<_> = addrs
            .iter()
            .map(|(host, port)| serde_json::json!({ "host": host, "port": port }))
            .collect();
        print_json(&list)?;
        return Ok(());
    }

    if addrs.is_empty() {
        println!("No {service} endpoints for {cell}/{keyspace}/{shard}/{tablet_type}.");
        return Ok(());
    }
    let rows = addrs
        .into_iter()
        .map(|(host, port)| vec![host, port.to_string()])
        .collect();
    print_table(&["HOST", "PORT"], rows);
    Ok(())
}
