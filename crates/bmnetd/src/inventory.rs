//! Node inventory persisted as a JSON file.

use bmnet_common::{Inventory, MemoryStore, NetError, NetResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// In-memory store loaded from, and saved back to, a JSON file.
#[derive(Debug)]
pub struct InventoryFile {
    path: PathBuf,
    store: Arc<MemoryStore>,
}

impl InventoryFile {
    /// Load `path`; the file must exist.
    pub async fn load(path: impl Into<PathBuf>) -> NetResult<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            NetError::store(
                "load_inventory",
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        let inventory: Inventory = serde_json::from_str(&content).map_err(|e| {
            NetError::store(
                "load_inventory",
                format!("cannot parse {}: {}", path.display(), e),
            )
        })?;
        debug!(
            path = %path.display(),
            nodes = inventory.nodes.len(),
            ports = inventory.ports.len(),
            "Loaded inventory"
        );
        Ok(Self {
            path,
            store: Arc::new(MemoryStore::from_inventory(inventory)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Write the current contents back, replacing the file atomically.
    pub async fn save(&self) -> NetResult<()> {
        let content = serde_json::to_string_pretty(&self.store.snapshot())
            .map_err(|e| NetError::store("save_inventory", e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content).await.map_err(|e| {
            NetError::store(
                "save_inventory",
                format!("cannot write {}: {}", tmp.display(), e),
            )
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            NetError::store(
                "save_inventory",
                format!("cannot replace {}: {}", self.path.display(), e),
            )
        })?;
        debug!(path = %self.path.display(), "Saved inventory");
        Ok(())
    }
}
