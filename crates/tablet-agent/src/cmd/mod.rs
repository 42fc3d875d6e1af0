pub mod endpoints;
pub mod enqueue;
pub mod publish;
pub mod resolve;
pub mod run;

use anyhow::{anyhow, Context as _, Result};
use std::path::PathBuf;
use topo_core::paths;
use topo_core::types::TabletAlias;
use topo_core::AgentConfig;

/// Global options shared by every subcommand.
pub struct Context {
    pub config_path: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub etcd: Vec<String>,
    pub snapshot: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    /// Load the agent config. `--log-file` wins over the file's
    /// `log_destination`.
    pub fn config(&self) -> Result<AgentConfig> {
        let mut config = AgentConfig::load_or_default(self.config_path.as_deref())
            .with_context(|| match &self.config_path {
                Some(p) => format!("failed to load config {}", p.display()),
                None => "failed to load default config".to_string(),
            })?;
        if let Some(log_file) = &self.log_file {
            config.log_destination = log_file.clone();
        }
        Ok(config)
    }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}

/// Reject anything that is not `/zk/<cell>/vt/tablets/<uid>`.
pub fn tablet_alias(tablet_path: &str) -> Result<TabletAlias> {
    paths::alias_from_tablet_path(tablet_path).ok_or_else(|| {
        anyhow!("not a tablet path: {tablet_path} (expected /zk/<cell>/vt/tablets/<uid>)")
    })
}
