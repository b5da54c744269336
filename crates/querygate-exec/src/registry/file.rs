//! Target registry backed by a JSON file.
//!
//! ```json
//! {
//!   "targets": {
//!     "orders-prod": {
//!       "address": "mongodb://db1.internal:27017",
//!       "default_namespace": "orders",
//!       "credentials": { "username": "reader", "password": "...", "auth_source": "admin" },
//!       "active": true
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::TargetRegistry;
use crate::types::{RegistryError, RegistryResult, TargetDescriptor};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TargetFile {
    #[serde(default)]
    targets: BTreeMap<String, TargetDescriptor>,
}

/// In-memory target table, usually loaded from disk.
#[derive(Debug, Default, Clone)]
pub struct FileTargetRegistry {
    targets: BTreeMap<String, TargetDescriptor>,
}

impl FileTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load targets from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_json(&text)?;
        tracing::info!(
            "Loaded {} target(s) from {}",
            registry.targets.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Load targets if the file exists, else start empty.
    pub fn load_or_empty(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("Target file not found: {}", path.display());
            Ok(Self::new())
        }
    }

    pub fn from_json(text: &str) -> RegistryResult<Self> {
        let file: TargetFile = serde_json::from_str(text)?;
        Ok(Self {
            targets: file.targets,
        })
    }

    pub fn insert(&mut self, target_id: impl Into<String>, target: TargetDescriptor) {
        self.targets.insert(target_id.into(), target);
    }

    pub fn with_target(mut self, target_id: impl Into<String>, target: TargetDescriptor) -> Self {
        self.insert(target_id, target);
        self
    }

    /// Targets sorted by id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TargetDescriptor)> {
        self.targets.iter().map(|(id, t)| (id.as_str(), t))
    }

    pub fn ids(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl TargetRegistry for FileTargetRegistry {
    async fn resolve_target(&self, target_id: &str) -> RegistryResult<TargetDescriptor> {
        self.targets
            .get(target_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(target_id.to_string()))
    }
}
