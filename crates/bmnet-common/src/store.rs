//! Object store and lock seams.
//!
//! Persistence of node and port records and per-node mutual exclusion belong
//! to the surrounding provisioning service. The agent consumes them through
//! [`NodeStore`] and [`LockManager`]. [`MemoryStore`] and
//! [`LocalLockManager`] are the in-process implementations used by the CLI
//! and by tests.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{NetError, NetResult};
use crate::model::{Node, PhysicalPort, PortGroup};

/// Persistence of node, port and portgroup records.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a node by id.
    async fn get_node(&self, node_id: &str) -> NetResult<Node>;

    /// List a node's ports in enrollment order.
    async fn list_ports_by_node(&self, node_id: &str) -> NetResult<Vec<PhysicalPort>>;

    /// List a node's portgroups.
    async fn list_portgroups_by_node(&self, node_id: &str) -> NetResult<Vec<PortGroup>>;

    /// Fetch a port by id.
    async fn get_port(&self, port_id: &str) -> NetResult<PhysicalPort>;

    /// Persist an existing port.
    async fn save_port(&self, port: &PhysicalPort) -> NetResult<()>;

    /// Create a new port record.
    async fn create_port(&self, port: &PhysicalPort) -> NetResult<()>;

    /// Destroy a port record.
    async fn destroy_port(&self, port_id: &str) -> NetResult<()>;
}

/// Scoped exclusive hold on one node. Released on drop.
pub struct NodeLock {
    node_id: String,
    _guard: Box<dyn Any + Send + Sync>,
}

impl NodeLock {
    /// Wrap an implementation-specific guard.
    pub fn new(node_id: impl Into<String>, guard: impl Any + Send + Sync) -> Self {
        Self {
            node_id: node_id.into(),
            _guard: Box::new(guard),
        }
    }

    /// The locked node.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl std::fmt::Debug for NodeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLock")
            .field("node_id", &self.node_id)
            .finish()
    }
}

/// Per-node exclusive locking.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Wait for, then take, the exclusive lock on `node_id`.
    async fn acquire_exclusive(&self, node_id: &str) -> NetResult<NodeLock>;
}

/// In-process lock manager: one async mutex per node id.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalLockManager {
    /// Create an empty lock manager
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn acquire_exclusive(&self, node_id: &str) -> NetResult<NodeLock> {
        let lock = self
            .locks
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        tracing::trace!(node = %node_id, "Acquired exclusive node lock");
        Ok(NodeLock::new(node_id, guard))
    }
}

/// Serializable snapshot of every record held by a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    /// Nodes
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Physical ports, in enrollment order
    #[serde(default)]
    pub ports: Vec<PhysicalPort>,
    /// Portgroups
    #[serde(default)]
    pub portgroups: Vec<PortGroup>,
}

/// In-memory [`NodeStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inventory: RwLock<Inventory>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `inventory`
    pub fn from_inventory(inventory: Inventory) -> Self {
        Self {
            inventory: RwLock::new(inventory),
        }
    }

    /// Copy of the current records
    pub fn snapshot(&self) -> Inventory {
        self.inventory.read().clone()
    }

    /// Insert or replace a node
    pub fn put_node(&self, node: Node) {
        let mut inv = self.inventory.write();
        inv.nodes.retain(|n| n.id != node.id);
        inv.nodes.push(node);
    }

    /// Insert or replace a port
    pub fn put_port(&self, port: PhysicalPort) {
        let mut inv = self.inventory.write();
        match inv.ports.iter_mut().find(|p| p.id == port.id) {
            Some(existing) => *existing = port,
            None => inv.ports.push(port),
        }
    }

    /// Insert or replace a portgroup
    pub fn put_portgroup(&self, portgroup: PortGroup) {
        let mut inv = self.inventory.write();
        inv.portgroups.retain(|g| g.id != portgroup.id);
        inv.portgroups.push(portgroup);
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get_node(&self, node_id: &str) -> NetResult<Node> {
        self.inventory
            .read()
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .cloned()
            .ok_or_else(|| NetError::not_found("node", node_id))
    }

    async fn list_ports_by_node(&self, node_id: &str) -> NetResult<Vec<PhysicalPort>> {
        Ok(self
            .inventory
            .read()
            .ports
            .iter()
            .filter(|p| p.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn list_portgroups_by_node(&self, node_id: &str) -> NetResult<Vec<PortGroup>> {
        Ok(self
            .inventory
            .read()
            .portgroups
            .iter()
            .filter(|g| g.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn get_port(&self, port_id: &str) -> NetResult<PhysicalPort> {
        self.inventory
            .read()
            .ports
            .iter()
            .find(|p| p.id == port_id)
            .cloned()
            .ok_or_else(|| NetError::not_found("port", port_id))
    }

    async fn save_port(&self, port: &PhysicalPort) -> NetResult<()> {
        let mut inv = self.inventory.write();
        let existing = inv
            .ports
            .iter_mut()
            .find(|p| p.id == port.id)
            .ok_or_else(|| NetError::not_found("port", &port.id))?;
        *existing = port.clone();
        Ok(())
    }

    async fn create_port(&self, port: &PhysicalPort) -> NetResult<()> {
        let mut inv = self.inventory.write();
        if inv.ports.iter().any(|p| p.id == port.id || p.address == port.address) {
            return Err(NetError::store(
                "create_port",
                format!("port {} ({}) already exists", port.id, port.address),
            ));
        }
        inv.ports.push(port.clone());
        Ok(())
    }

    async fn destroy_port(&self, port_id: &str) -> NetResult<()> {
        let mut inv = self.inventory.write();
        let before = inv.ports.len();
        inv.ports.retain(|p| p.id != port_id);
        if inv.ports.len() == before {
            return Err(NetError::not_found("port", port_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_node(Node::new("n1"));
        store.put_port(PhysicalPort::new("p1", "n1", "aa:bb:cc:dd:ee:01"));
        store.put_port(PhysicalPort::new("p2", "n1", "aa:bb:cc:dd:ee:02"));
        store.put_port(PhysicalPort::new("p3", "n2", "aa:bb:cc:dd:ee:03"));
        store
    }

    #[tokio::test]
    async fn test_list_ports_keeps_enrollment_order() {
        let store = store();
        let ids: Vec<String> = store
            .list_ports_by_node("n1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_save_unknown_port_fails() {
        let store = store();
        let ghost = PhysicalPort::new("ghost", "n1", "aa:bb:cc:dd:ee:99");
        assert!(matches!(
            store.save_port(&ghost).await,
            Err(NetError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_duplicate_address_fails() {
        let store = store();
        let dup = PhysicalPort::new("p9", "n1", "aa:bb:cc:dd:ee:01");
        assert!(store.create_port(&dup).await.is_err());
    }

    #[tokio::test]
    async fn test_destroy_port() {
        let store = store();
        store.destroy_port("p2").await.unwrap();
        assert_eq!(store.list_ports_by_node("n1").await.unwrap().len(), 1);
        assert!(store.destroy_port("p2").await.is_err());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_per_node() {
        let locks = Arc::new(LocalLockManager::new());
        let held = locks.acquire_exclusive("n1").await.unwrap();
        assert_eq!(held.node_id(), "n1");

        // A different node is not blocked.
        let other = locks.acquire_exclusive("n2").await.unwrap();
        drop(other);

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire_exclusive("n1").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.unwrap().unwrap();
    }
}
