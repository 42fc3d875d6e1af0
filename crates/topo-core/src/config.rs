use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Tunables for one tablet agent, loaded from an optional YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Pause before retrying after a failed drain or an unhealthy watch.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    /// Candidate locations of the action executor, in priority order.
    #[serde(default = "default_executor_candidates")]
    pub executor_candidates: Vec<String>,
    /// Name looked up on `$PATH` when no executor candidate exists.
    #[serde(default = "default_executor_name")]
    pub executor_name: String,
    /// Candidate locations of the database config file. `{uid}` expands to
    /// the zero-padded tablet uid.
    #[serde(default = "default_mycnf_candidates")]
    pub mycnf_candidates: Vec<String>,
    /// Log destination handed to the executor.
    #[serde(default = "default_log_destination")]
    pub log_destination: PathBuf,
    /// Host used for addresses given without one (`:6509`). Defaults to the
    /// machine hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Lifetime of the store session that owns the liveness node.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_executor_candidates() -> Vec<String> {
    vec![
        "$VTROOT/bin/vtaction".to_string(),
        "/usr/local/bin/vtaction".to_string(),
    ]
}

fn default_executor_name() -> String {
    "vtaction".to_string()
}

fn default_mycnf_candidates() -> Vec<String> {
    vec![
        "/vt/vt_{uid}/my.cnf".to_string(),
        "/var/lib/mysql/my.cnf".to_string(),
        "/etc/my.cnf".to_string(),
    ]
}

fn default_log_destination() -> PathBuf {
    PathBuf::from("/dev/stderr")
}

fn default_session_ttl_secs() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff_secs(),
            executor_candidates: default_executor_candidates(),
            executor_name: default_executor_name(),
            mycnf_candidates: default_mycnf_candidates(),
            log_destination: default_log_destination(),
            hostname: None,
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}
