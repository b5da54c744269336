//! Target registry: maps a target id to its connection parameters.

pub mod file;

use async_trait::async_trait;

use crate::types::{RegistryResult, TargetDescriptor};

pub use file::FileTargetRegistry;

/// Looks up connection parameters for a target id.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// Resolve `target_id`, or fail with [`crate::types::RegistryError::NotFound`].
    async fn resolve_target(&self, target_id: &str) -> RegistryResult<TargetDescriptor>;
}
