//! Startup discovery of the local action executor and database config file.
//!
//! Each target has an ordered candidate list; the first candidate that
//! exists on disk wins. Candidates may reference environment variables
//! (`$VTROOT`, `${VTROOT}`) and the tablet uid (`{uid}`, zero padded to ten
//! digits). A candidate naming an unset variable is skipped.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::config::AgentConfig;
use crate::error::{Result, TopoError};

pub const EXECUTOR_TARGET: &str = "vtaction binary";
pub const MYCNF_TARGET: &str = "my.cnf";

/// Locations chosen at startup. Never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub executor: PathBuf,
    pub mycnf: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    executor_candidates: Vec<String>,
    executor_name: Option<String>,
    mycnf_candidates: Vec<String>,
}

impl PathResolver {
    pub fn new(
        executor_candidates: Vec<String>,
        executor_name: Option<String>,
        mycnf_candidates: Vec<String>,
    ) -> Self {
        Self {
            executor_candidates,
            executor_name,
            mycnf_candidates,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.executor_candidates.clone(),
            Some(config.executor_name.clone()),
            config.mycnf_candidates.clone(),
        )
    }

    pub fn resolve(&self, uid: u32) -> Result<ResolvedPaths> {
        let executor = first_existing(&self.executor_candidates, uid)
            .or_else(|| {
                self.executor_name
                    .as_deref()
                    .and_then(|name| which::which(name).ok())
            })
            .ok_or_else(|| TopoError::Configuration {
                target: EXECUTOR_TARGET.to_string(),
            })?;

        let mycnf =
            first_existing(&self.mycnf_candidates, uid).ok_or_else(|| TopoError::Configuration {
                target: MYCNF_TARGET.to_string(),
            })?;

        debug!(executor = %executor.display(), mycnf = %mycnf.display(), "resolved paths");
        Ok(ResolvedPaths { executor, mycnf })
    }
}

fn first_existing(candidates: &[String], uid: u32) -> Option<PathBuf> {
    candidates
        .iter()
        .filter_map(|c| expand(c, uid))
        .find(|p| p.exists())
}

static ENV_VAR_RE: OnceLock<Regex> = OnceLock::new();

fn env_var_re() -> &'static Regex {
    ENV_VAR_RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap()
    })
}

/// Expand `{uid}` and environment references in one candidate.
fn expand(candidate: &str, uid: u32) -> Option<PathBuf> {
    let with_uid = candidate.replace("{uid}", &format!("{uid:010}"));

    let mut out = String::with_capacity(with_uid.len());
    let mut last = 0;
    for caps in env_var_re().captures_iter(&with_uid) {
        let whole = caps.get(0)?;
        let name = caps.get(1).or_else(|| caps.get(2))?.as_str();
        let value = std::env::var(name).ok()?;
        out.push_str(&with_uid[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&with_uid[last..]);
    Some(PathBuf::from(out))
}
