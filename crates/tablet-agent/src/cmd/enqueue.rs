use crate::output::print_json;
use crate::store;
use anyhow::{anyhow, Context as _, Result};
use topo_core::action::{queue_action, ActionNode};
use topo_core::paths;

use super::{runtime, tablet_alias, Context};

pub fn run(ctx: &Context, tablet_path: &str, action: &str, args: Option<&str>) -> Result<()> {
    tablet_alias(tablet_path)?;
    let args = match args {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw).context("invalid --args")? {
            serde_json::Value::Object(map) => map,
            _ => return Err(anyhow!("--args must be a JSON object")),
        },
        None => serde_json::Map::new(),
    };
    let node = ActionNode::new(action, args);
    let action_path = paths::action_path(tablet_path);

    let config = ctx.config()?;
    let rt = runtime()?;
    let queued = &node;
    let created = rt.block_on(store::with_store(ctx, config.session_ttl(), |store| async move {
        queue_action(store.as_ref(), &action_path, queued)
            .await
            .with_context(|| format!("failed to queue {action} on {action_path}"))
    }))?;

    if ctx.json {
        print_json(&serde_json::json!({
            "path": created,
            "action": node.action,
            "guid": node.action_guid,
        }))?;
    } else {
        println!("{created} ({} {})", node.action, node.action_guid);
    }
    Ok(())
}
