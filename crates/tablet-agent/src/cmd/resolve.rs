use crate::output::print_json;
use anyhow::Result;
use topo_core::resolve::PathResolver;

use super::Context;

pub fn run(ctx: &Context, uid: u32) -> Result<()> {
    let config = ctx.config()?;
    let paths = PathResolver::from_config(&config).resolve(uid)?;

    if ctx.json {
        print_json(&serde_json::json!({
            "uid": uid,
            "executor": paths.executor,
            "mycnf": paths.mycnf,
        }))?;
    } else {
        println!("executor: {}", paths.executor.display());
        println!("mycnf:    {}", paths.mycnf.display());
    }
    Ok(())
}
