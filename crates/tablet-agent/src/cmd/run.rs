use anyhow::{Context as _, Result};
use topo_core::ActionAgent;

use super::{runtime, tablet_alias, Context};
use crate::store;

pub fn run(ctx: &Context, tablet_path: &str, bind_addr: &str, mysql_addr: &str) -> Result<()> {
    let alias = tablet_alias(tablet_path)?;
    let config = ctx.config()?;
    let rt = runtime()?;

    rt.block_on(store::with_store(ctx, config.session_ttl(), |store| async move {
        let handle = ActionAgent::new(store, tablet_path, config)
            .start(bind_addr, mysql_addr)
            .await
            .with_context(|| format!("failed to start agent for {tablet_path}"))?;

        let interrupted = tokio::signal::ctrl_c()
            .await
            .context("failed to listen for interrupt");
        tracing::info!(%alias, "shutting down");
        handle.shutdown().await;
        interrupted
    }))
}
