//! Test fixtures for nodes, ports and a wired-up test environment

use bmnet_common::{
    keys, LocalLinkConnection, LocalLockManager, MemoryStore, NetResult, Node, NodeStore,
    PhysicalPort, PortGroup, Task,
};
use std::sync::Arc;

use crate::fakes::{FakeController, RecordingPlumber};

/// Node used by most scenarios
pub const NODE_ID: &str = "1be26c0b-03f2-4d2e-ae87-c02d7f33c123";

/// Instance deployed on [`NODE_ID`] when one is needed
pub const INSTANCE_ID: &str = "5f2f7c4a-9d3e-4b8f-8a11-2c3d4e5f6a7b";

/// Provisioning network id known to [`TestEnv`]'s controller
pub const PROVISIONING_NET: &str = "8f0e6c1a-2b3d-4e5f-9a0b-1c2d3e4f5a6b";

/// Cleaning network id known to [`TestEnv`]'s controller
pub const CLEANING_NET: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";

/// Switch chassis id used in local link connections
pub const SWITCH_ID: &str = "0a:1b:2c:3d:4e:5f";

/// MAC of the n-th fixture port (1-based)
pub fn mac(n: u8) -> String {
    format!("52:54:00:cf:2d:{:02x}", n)
}

/// Port fixtures
pub mod port_fixtures {
    use super::*;

    /// PXE-enabled port cabled to switch port `Ethernet<n>`
    pub fn pxe_port(id: &str, node_id: &str, n: u8) -> PhysicalPort {
        let mut port = PhysicalPort::new(id, node_id, mac(n));
        port.local_link_connection = LocalLinkConnection::new(SWITCH_ID, format!("Ethernet{}", n));
        port
    }

    /// Port that may not network boot
    pub fn non_pxe_port(id: &str, node_id: &str, n: u8) -> PhysicalPort {
        let mut port = pxe_port(id, node_id, n);
        port.pxe_enabled = false;
        port
    }

    /// PXE port carrying the host device and VLAN the OVS interface plumbs
    pub fn ovs_port(id: &str, node_id: &str, n: u8, interface: &str, vlan: u16) -> PhysicalPort {
        let mut port = pxe_port(id, node_id, n);
        port.extra
            .insert(keys::INTERFACE.to_string(), interface.to_string());
        port.extra
            .insert(keys::PRIVATE_VLAN.to_string(), vlan.to_string());
        port
    }

    /// Builder-style: set the DHCP client-id
    pub fn with_client_id(mut port: PhysicalPort, client_id: &str) -> PhysicalPort {
        port.extra
            .insert(keys::CLIENT_ID.to_string(), client_id.to_string());
        port
    }

    /// Builder-style: put the port in a portgroup
    pub fn in_portgroup(mut port: PhysicalPort, portgroup_id: &str) -> PhysicalPort {
        port.portgroup_id = Some(portgroup_id.to_string());
        port
    }
}

/// Node fixtures
pub mod node_fixtures {
    use super::*;

    /// Node with no instance
    pub fn node(id: &str) -> Node {
        Node::new(id)
    }

    /// Node with [`INSTANCE_ID`] deployed
    pub fn deployed_node(id: &str) -> Node {
        let mut node = Node::new(id);
        node.instance_id = Some(INSTANCE_ID.to_string());
        node
    }
}

/// Store, locks, fake controller and recording plumber wired together.
pub struct TestEnv {
    /// Backing store
    pub store: Arc<MemoryStore>,
    /// Lock manager
    pub locks: LocalLockManager,
    /// Fake controller (clones share state)
    pub controller: FakeController,
    /// Recording plumber
    pub plumber: Arc<RecordingPlumber>,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// Empty store; the controller knows the provisioning and cleaning
    /// networks and security groups `sg-1`/`sg-2`.
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            locks: LocalLockManager::new(),
            controller: FakeController::new()
                .with_network(PROVISIONING_NET, "provisioning")
                .with_network(CLEANING_NET, "cleaning")
                .with_security_groups(&["sg-1", "sg-2"]),
            plumber: Arc::new(RecordingPlumber::new()),
        }
    }

    /// Builder: add a node
    pub fn with_node(self, node: Node) -> Self {
        self.store.put_node(node);
        self
    }

    /// Builder: add ports
    pub fn with_ports(self, ports: impl IntoIterator<Item = PhysicalPort>) -> Self {
        for port in ports {
            self.store.put_port(port);
        }
        self
    }

    /// Builder: add a portgroup
    pub fn with_portgroup(self, portgroup: PortGroup) -> Self {
        self.store.put_portgroup(portgroup);
        self
    }

    /// Lock `node_id` and load its records
    pub async fn task(&self, node_id: &str) -> NetResult<Task> {
        let store: Arc<dyn NodeStore> = self.store.clone();
        Task::acquire(store, &self.locks, node_id).await
    }

    /// Stored copy of a port
    pub async fn stored_port(&self, port_id: &str) -> NetResult<PhysicalPort> {
        self.store.get_port(port_id).await
    }
}

/// Node [`NODE_ID`] with two PXE-enabled ports `p1`, `p2`.
pub fn two_pxe_ports() -> TestEnv {
    TestEnv::new()
        .with_node(node_fixtures::node(NODE_ID))
        .with_ports([
            port_fixtures::pxe_port("p1", NODE_ID, 1),
            port_fixtures::pxe_port("p2", NODE_ID, 2),
        ])
}

/// Node [`NODE_ID`] with two OVS-plumbable ports on `eth2`/`eth3`, VLANs 101/102.
pub fn two_ovs_ports() -> TestEnv {
    TestEnv::new()
        .with_node(node_fixtures::node(NODE_ID))
        .with_ports([
            port_fixtures::ovs_port("p1", NODE_ID, 1, "eth2", 101),
            port_fixtures::ovs_port("p2", NODE_ID, 2, "eth3", 102),
        ])
}
