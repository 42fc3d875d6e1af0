pub mod action;
pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod naming;
pub mod paths;
pub mod queue;
pub mod resolve;
pub mod serving;
pub mod shard;
pub mod store;
pub mod tablet;
pub mod types;

pub use agent::{ActionAgent, AgentHandle};
pub use config::AgentConfig;
pub use error::{Result, TopoError};
pub use store::{EtcdStore, MemoryStore, TopoStore};
