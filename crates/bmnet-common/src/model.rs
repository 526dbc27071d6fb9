//! Data model for nodes, physical ports and portgroups.
//!
//! VIF associations live in each port's `internal_info` map under one key per
//! lifecycle phase. Older deployments stored the tenant VIF in
//! `extra["vif_port_id"]`; that legacy location is still honored on read and
//! cleared on detach.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::NetError;

/// Well-known keys in `PhysicalPort::internal_info` and `PhysicalPort::extra`.
pub mod keys {
    /// Tenant VIF association (internal_info).
    pub const TENANT_VIF: &str = "tenant_vif_port_id";

    /// Provisioning network VIF association (internal_info).
    pub const PROVISIONING_VIF: &str = "provisioning_vif_port_id";

    /// Cleaning network VIF association (internal_info).
    pub const CLEANING_VIF: &str = "cleaning_vif_port_id";

    /// Legacy tenant VIF location (extra).
    pub const LEGACY_VIF: &str = "vif_port_id";

    /// DHCP client identifier (extra).
    pub const CLIENT_ID: &str = "client-id";

    /// Host-side physical device the port is cabled to (extra).
    pub const INTERFACE: &str = "interface";

    /// VLAN tag of the port's private segment on that device (extra).
    pub const PRIVATE_VLAN: &str = "private_vlan";
}

/// Lifecycle phase a VIF association belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPhase {
    /// Deploy ramdisk is booting.
    Provisioning,
    /// Node is being cleaned between tenants.
    Cleaning,
    /// Node is in active tenant use.
    Tenant,
}

impl NetworkPhase {
    /// Returns the `internal_info` key holding this phase's VIF.
    pub fn vif_key(&self) -> &'static str {
        match self {
            NetworkPhase::Provisioning => keys::PROVISIONING_VIF,
            NetworkPhase::Cleaning => keys::CLEANING_VIF,
            NetworkPhase::Tenant => keys::TENANT_VIF,
        }
    }

    /// Returns the phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkPhase::Provisioning => "provisioning",
            NetworkPhase::Cleaning => "cleaning",
            NetworkPhase::Tenant => "tenant",
        }
    }
}

impl fmt::Display for NetworkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkPhase {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(NetworkPhase::Provisioning),
            "cleaning" => Ok(NetworkPhase::Cleaning),
            "tenant" => Ok(NetworkPhase::Tenant),
            other => Err(NetError::invalid(format!("unknown network phase '{}'", other))),
        }
    }
}

/// A bare-metal server managed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node UUID
    pub id: String,
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Instance currently deployed on the node, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Network interface variant ("ovs", "controller", "noop"); the agent
    /// default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,
    /// Management controller address and credentials
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub driver_info: BTreeMap<String, String>,
}

impl Node {
    /// Create a node with no instance and no driver info
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            instance_id: None,
            network_interface: None,
            driver_info: BTreeMap::new(),
        }
    }

    /// Device identifier for controller ports created on behalf of this node.
    ///
    /// Cleaning runs before an instance is associated, so the node id stands
    /// in until then.
    pub fn device_id(&self) -> &str {
        self.instance_id.as_deref().unwrap_or(&self.id)
    }

    /// Returns true if a tenant workload is deployed.
    pub fn has_instance(&self) -> bool {
        self.instance_id.is_some()
    }
}

/// Switch/port topology descriptor used for controller binding profiles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalLinkConnection {
    /// Switch chassis identifier (usually a MAC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_id: Option<String>,
    /// Switch port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    /// Free-form switch hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_info: Option<String>,
}

impl LocalLinkConnection {
    /// Create a connection descriptor for `switch_id`/`port_id`
    pub fn new(switch_id: impl Into<String>, port_id: impl Into<String>) -> Self {
        Self {
            switch_id: Some(switch_id.into()),
            port_id: Some(port_id.into()),
            switch_info: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A physical network attachment point on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPort {
    /// Port UUID
    pub id: String,
    /// Owning node UUID
    pub node_id: String,
    /// MAC address
    pub address: String,
    /// Whether the port may network boot
    #[serde(default = "default_true")]
    pub pxe_enabled: bool,
    /// Topology descriptor for binding profiles
    #[serde(default)]
    pub local_link_connection: LocalLinkConnection,
    /// Operator-supplied metadata
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    /// Agent-managed VIF associations
    #[serde(default)]
    pub internal_info: BTreeMap<String, String>,
    /// Portgroup membership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portgroup_id: Option<String>,
}

impl PhysicalPort {
    /// Create a PXE-enabled port with no metadata
    pub fn new(id: impl Into<String>, node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            address: address.into(),
            pxe_enabled: true,
            local_link_connection: LocalLinkConnection::default(),
            extra: BTreeMap::new(),
            internal_info: BTreeMap::new(),
            portgroup_id: None,
        }
    }

    /// VIF stored under `phase`'s key.
    ///
    /// For the tenant phase this falls back to the legacy `extra` location.
    pub fn vif_for(&self, phase: NetworkPhase) -> Option<&str> {
        match phase {
            NetworkPhase::Tenant => self.tenant_vif(),
            other => self.internal_info.get(other.vif_key()).map(String::as_str),
        }
    }

    /// Tenant VIF, preferring the current location over the legacy one.
    pub fn tenant_vif(&self) -> Option<&str> {
        self.internal_info
            .get(keys::TENANT_VIF)
            .or_else(|| self.extra.get(keys::LEGACY_VIF))
            .map(String::as_str)
    }

    /// Returns true if `vif` is stored in either tenant location.
    pub fn carries_vif(&self, vif: &str) -> bool {
        self.internal_info.get(keys::TENANT_VIF).map(String::as_str) == Some(vif)
            || self.extra.get(keys::LEGACY_VIF).map(String::as_str) == Some(vif)
    }

    /// The VIF the node is currently booting through on this port.
    ///
    /// Only one network is active at a time: a cleaning VIF means cleaning,
    /// a provisioning VIF means provisioning, otherwise the tenant network.
    pub fn current_vif(&self) -> Option<&str> {
        self.internal_info
            .get(keys::CLEANING_VIF)
            .or_else(|| self.internal_info.get(keys::PROVISIONING_VIF))
            .map(String::as_str)
            .or_else(|| self.tenant_vif())
    }

    /// Store `vif` under `phase`'s key.
    pub fn set_vif(&mut self, phase: NetworkPhase, vif: impl Into<String>) {
        self.internal_info
            .insert(phase.vif_key().to_string(), vif.into());
    }

    /// Remove and return the VIF stored under `phase`'s key.
    ///
    /// Clearing the tenant phase also clears the legacy location.
    pub fn clear_vif(&mut self, phase: NetworkPhase) -> Option<String> {
        let current = self.internal_info.remove(phase.vif_key());
        if phase == NetworkPhase::Tenant {
            let legacy = self.extra.remove(keys::LEGACY_VIF);
            return current.or(legacy);
        }
        current
    }

    /// DHCP client identifier, if the operator set one.
    pub fn client_id(&self) -> Option<&str> {
        self.extra.get(keys::CLIENT_ID).map(String::as_str)
    }
}

/// A logical bond of physical ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGroup {
    /// Portgroup UUID
    pub id: String,
    /// Owning node UUID
    pub node_id: String,
    /// Whether members may also be used individually
    #[serde(default = "default_true")]
    pub standalone_ports_supported: bool,
}

impl PortGroup {
    /// Create a portgroup
    pub fn new(
        id: impl Into<String>,
        node_id: impl Into<String>,
        standalone_ports_supported: bool,
    ) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            standalone_ports_supported,
        }
    }
}

/// One attached VIF, as reported by `vif_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VifInfo {
    /// VIF identifier
    pub id: String,
}

impl VifInfo {
    /// Create a VifInfo
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port() -> PhysicalPort {
        PhysicalPort::new("p1", "n1", "52:54:00:cf:2d:32")
    }

    #[test]
    fn test_phase_keys() {
        assert_eq!(NetworkPhase::Tenant.vif_key(), "tenant_vif_port_id");
        assert_eq!(NetworkPhase::Provisioning.vif_key(), "provisioning_vif_port_id");
        assert_eq!(NetworkPhase::Cleaning.vif_key(), "cleaning_vif_port_id");
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!("cleaning".parse::<NetworkPhase>().unwrap(), NetworkPhase::Cleaning);
        assert!("rescue".parse::<NetworkPhase>().is_err());
    }

    #[test]
    fn test_device_id_prefers_instance() {
        let mut node = Node::new("n1");
        assert_eq!(node.device_id(), "n1");
        node.instance_id = Some("i1".to_string());
        assert_eq!(node.device_id(), "i1");
    }

    #[test]
    fn test_tenant_vif_prefers_internal_info() {
        let mut p = port();
        p.extra.insert(keys::LEGACY_VIF.to_string(), "old".to_string());
        assert_eq!(p.tenant_vif(), Some("old"));

        p.set_vif(NetworkPhase::Tenant, "new");
        assert_eq!(p.tenant_vif(), Some("new"));
        assert!(p.carries_vif("old"));
        assert!(p.carries_vif("new"));
    }

    #[test]
    fn test_clear_tenant_vif_clears_both_locations() {
        let mut p = port();
        p.extra.insert(keys::LEGACY_VIF.to_string(), "old".to_string());
        p.set_vif(NetworkPhase::Tenant, "new");

        assert_eq!(p.clear_vif(NetworkPhase::Tenant), Some("new".to_string()));
        assert_eq!(p.tenant_vif(), None);
        assert!(!p.extra.contains_key(keys::LEGACY_VIF));
    }

    #[test]
    fn test_current_vif_order() {
        let mut p = port();
        assert_eq!(p.current_vif(), None);

        p.set_vif(NetworkPhase::Tenant, "t");
        assert_eq!(p.current_vif(), Some("t"));

        p.set_vif(NetworkPhase::Provisioning, "p");
        assert_eq!(p.current_vif(), Some("p"));

        p.set_vif(NetworkPhase::Cleaning, "c");
        assert_eq!(p.current_vif(), Some("c"));
    }

    #[test]
    fn test_port_deserialize_defaults() {
        let p: PhysicalPort =
            serde_json::from_str(r#"{"id":"p1","node_id":"n1","address":"aa:bb:cc:dd:ee:ff"}"#)
                .unwrap();
        assert!(p.pxe_enabled);
        assert!(p.internal_info.is_empty());
        assert_eq!(p.portgroup_id, None);
    }
}
