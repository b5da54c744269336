//! Store seam: how the executor connects to and talks to a document store.
//!
//! [`mongo`] binds these traits to the MongoDB driver; tests supply in-memory
//! fakes.

pub mod mongo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::Bson;

use querygate::Operation;

use crate::types::{StoreError, TargetDescriptor};

pub use mongo::{MongoConnector, MongoHandle};

/// Opens store handles for targets.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Establish a ready handle. `timeout` bounds server selection.
    async fn connect(
        &self,
        target: &TargetDescriptor,
        timeout: Duration,
    ) -> Result<Arc<dyn StoreHandle>, StoreError>;
}

/// An established connection to one target.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Liveness probe used before a cached handle is reused.
    async fn is_alive(&self) -> bool;
    /// Run one operation and return the raw response.
    async fn run(&self, operation: &Operation) -> Result<Bson, StoreError>;
    /// Collection names in the default namespace.
    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;
    /// Release the underlying connections.
    async fn close(&self);
}
