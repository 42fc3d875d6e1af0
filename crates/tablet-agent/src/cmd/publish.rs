use crate::output::print_json;
use crate::store;
use anyhow::{Context as _, Result};
use topo_core::cache::TabletCache;
use topo_core::serving::{self, PublishOutcome};

use super::{runtime, tablet_alias, Context};

pub fn run(ctx: &Context, tablet_path: &str) -> Result<()> {
    tablet_alias(tablet_path)?;
    let config = ctx.config()?;
    let rt = runtime()?;

    let (outcome, serving_path) =
        rt.block_on(store::with_store(ctx, config.session_ttl(), |store| async move {
            let cache = TabletCache::new(store.clone(), tablet_path);
            let tablet = cache
                .refresh()
                .await
                .with_context(|| format!("failed to read tablet {tablet_path}"))?;
            let outcome = serving::publish(store.as_ref(), &cache).await?;
            anyhow::Ok((outcome, tablet.serving_path()))
        }))?;

    if ctx.json {
        print_json(&serde_json::json!({
            "tablet_path": tablet_path,
            "serving_path": serving_path,
            "outcome": describe(outcome),
        }))?;
    } else {
        println!("{}: {}", serving_path, describe(outcome));
    }
    Ok(())
}

fn describe(outcome: PublishOutcome) -> &'static str {
    match outcome {
        PublishOutcome::NotServingType => "not a serving type",
        PublishOutcome::NotAuthorized => "not authorized by shard",
        PublishOutcome::Skipped => "no serving entry",
        PublishOutcome::Unchanged => "unchanged",
        PublishOutcome::Updated => "updated",
        PublishOutcome::Added => "added",
    }
}
