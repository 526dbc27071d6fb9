//! Locked view of one node.
//!
//! A [`Task`] is built by taking the node's exclusive lock and then loading
//! its node, port and portgroup records. Every network operation receives a
//! task; the lock is released when the task is dropped.

use std::sync::Arc;

use crate::error::NetResult;
use crate::model::{Node, PhysicalPort, PortGroup};
use crate::store::{LockManager, NodeLock, NodeStore};

/// One node's records, held under its exclusive lock.
pub struct Task {
    /// The node
    pub node: Node,
    /// The node's ports, in enrollment order
    pub ports: Vec<PhysicalPort>,
    /// The node's portgroups
    pub portgroups: Vec<PortGroup>,
    /// Caller's controller token; overrides the agent session when set
    pub auth_token: Option<String>,
    store: Arc<dyn NodeStore>,
    lock: NodeLock,
}

impl Task {
    /// Lock `node_id` and load its records.
    pub async fn acquire(
        store: Arc<dyn NodeStore>,
        locks: &dyn LockManager,
        node_id: &str,
    ) -> NetResult<Self> {
        let lock = locks.acquire_exclusive(node_id).await?;
        let node = store.get_node(node_id).await?;
        let ports = store.list_ports_by_node(node_id).await?;
        let portgroups = store.list_portgroups_by_node(node_id).await?;

        tracing::debug!(
            node = %node_id,
            ports = ports.len(),
            portgroups = portgroups.len(),
            "Task acquired"
        );

        Ok(Self {
            node,
            ports,
            portgroups,
            auth_token: None,
            store,
            lock,
        })
    }

    /// Builder: attach the caller's controller token
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// The node id this task holds the lock for
    pub fn node_id(&self) -> &str {
        self.lock.node_id()
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Ports allowed to network boot
    pub fn pxe_enabled_ports(&self) -> impl Iterator<Item = &PhysicalPort> {
        self.ports.iter().filter(|p| p.pxe_enabled)
    }

    /// Look up a port of this node by id
    pub fn port(&self, port_id: &str) -> Option<&PhysicalPort> {
        self.ports.iter().find(|p| p.id == port_id)
    }

    /// Look up a portgroup of this node by id
    pub fn portgroup(&self, portgroup_id: &str) -> Option<&PortGroup> {
        self.portgroups.iter().find(|g| g.id == portgroup_id)
    }

    /// Persist the port at `index` in [`Task::ports`].
    pub async fn save_port_at(&self, index: usize) -> NetResult<()> {
        match self.ports.get(index) {
            Some(port) => self.store.save_port(port).await,
            None => Err(crate::error::NetError::internal(format!(
                "port index {} out of range for node {}",
                index,
                self.node_id()
            ))),
        }
    }

    /// Replace the in-memory copy of `port` and persist it.
    ///
    /// Used for ports handed in by callers, such as the updated record passed
    /// to `port_changed`.
    pub async fn save_port(&mut self, port: PhysicalPort) -> NetResult<()> {
        self.store.save_port(&port).await?;
        match self.ports.iter_mut().find(|p| p.id == port.id) {
            Some(existing) => *existing = port,
            None => self.ports.push(port),
        }
        Ok(())
    }

    /// Reload ports and portgroups after records were created or destroyed.
    pub async fn reload(&mut self) -> NetResult<()> {
        self.ports = self.store.list_ports_by_node(&self.node.id).await?;
        self.portgroups = self.store.list_portgroups_by_node(&self.node.id).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("node", &self.node.id)
            .field("ports", &self.ports.len())
            .field("portgroups", &self.portgroups.len())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkPhase;
    use crate::store::{LocalLockManager, MemoryStore};
    use crate::NetError;

    fn seeded() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.put_node(Node::new("n1"));
        let mut p1 = PhysicalPort::new("p1", "n1", "aa:bb:cc:dd:ee:01");
        p1.pxe_enabled = false;
        store.put_port(p1);
        store.put_port(PhysicalPort::new("p2", "n1", "aa:bb:cc:dd:ee:02"));
        store.put_portgroup(PortGroup::new("g1", "n1", true));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_acquire_loads_records() {
        let store = seeded();
        let locks = LocalLockManager::new();
        let task = Task::acquire(store, &locks, "n1").await.unwrap();

        assert_eq!(task.node_id(), "n1");
        assert_eq!(task.ports.len(), 2);
        assert!(task.portgroup("g1").is_some());
        let pxe: Vec<&str> = task.pxe_enabled_ports().map(|p| p.id.as_str()).collect();
        assert_eq!(pxe, vec!["p2"]);
    }

    #[tokio::test]
    async fn test_acquire_unknown_node() {
        let locks = LocalLockManager::new();
        let err = Task::acquire(seeded(), &locks, "nope").await.unwrap_err();
        assert!(matches!(err, NetError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_save_port_at_persists() {
        let store = seeded();
        let locks = LocalLockManager::new();
        let mut task = Task::acquire(store.clone(), &locks, "n1").await.unwrap();

        task.ports[1].set_vif(NetworkPhase::Tenant, "v1");
        task.save_port_at(1).await.unwrap();

        let stored = store.get_port("p2").await.unwrap();
        assert_eq!(stored.tenant_vif(), Some("v1"));
        assert!(task.save_port_at(7).await.is_err());
    }

    #[tokio::test]
    async fn test_auth_token_is_redacted() {
        let locks = LocalLockManager::new();
        let task = Task::acquire(seeded(), &locks, "n1")
            .await
            .unwrap()
            .with_auth_token("secret");
        let shown = format!("{:?}", task);
        assert!(!shown.contains("secret"));
    }
}
