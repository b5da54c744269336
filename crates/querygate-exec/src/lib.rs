//! Querygate executor: runs planned shell queries against named document-store
//! targets through a per-target connection cache.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod repl;
pub mod store;
pub mod types;

pub use cache::ConnectionCache;
pub use config::{resolve_targets_path, ExecutorConfig};
pub use dispatcher::QueryExecutor;
pub use registry::{FileTargetRegistry, TargetRegistry};
pub use store::{MongoConnector, MongoHandle, StoreConnector, StoreHandle};
pub use types::*;
