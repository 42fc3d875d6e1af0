use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopoError {
    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict on {0}")]
    BadVersion(String),

    #[error("read failed for {path}: {reason}")]
    StoreRead { path: String, reason: String },

    #[error("write failed for {path}: {reason}")]
    StoreWrite { path: String, reason: String },

    #[error("coordination store connection: {0}")]
    Connection(String),

    #[error("cannot decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt data at {path}: {reason}")]
    DataCorruption { path: String, reason: String },

    #[error("no {target} found")]
    Configuration { target: String },

    #[error("invalid address '{0}': expected host:port")]
    InvalidAddress(String),

    #[error("failed to spawn {binary}: {source}")]
    ExecutorSpawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tablet record not loaded yet")]
    Uninitialized,

    #[error("gave up on {0} after repeated version conflicts")]
    TooManyRetries(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl TopoError {
    /// True for the errors a store surfaces when a node is missing.
    pub fn is_no_node(&self) -> bool {
        matches!(self, TopoError::NoNode(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, TopoError::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, TopoError>;
