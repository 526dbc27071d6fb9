//! Command dispatch
//!
//! An [`Agent`] owns the inventory, the node locks and one instance of every
//! enabled network interface. Each command locks its node, runs against the
//! interface selected for that node and writes the inventory back.

use async_trait::async_trait;
use bmnet_common::{
    LocalLockManager, NetError, NetResult, Node, NodeStore, PhysicalPort, PortGroup, Task, VifInfo,
};
use bmnet_controller::{ControllerClient, ControllerSession, HttpControllerClient};
use bmnet_netif::{
    InterfaceDeps, InterfaceRegistry, PowerControl, PowerState, VnicPassthru, VnicProvisioner,
};
use bmnet_plumber::{LinkPlumber, ShellLinkPlumber};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::cli::Command;
use crate::config::AgentConfig;
use crate::inventory::InventoryFile;

/// Hardware backend for hosts without a vNIC-capable management interface.
///
/// Every call fails, so `add_vnic` and `delete_vnic` are rejected while
/// `is_vnic_created` still answers from the inventory.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnmanagedHardware;

fn unmanaged(node: &Node) -> NetError {
    NetError::invalid(format!(
        "node {} has no vNIC-capable management interface",
        node.id
    ))
}

#[async_trait]
impl PowerControl for UnmanagedHardware {
    async fn power_state(&self, node: &Node) -> NetResult<PowerState> {
        Err(unmanaged(node))
    }

    async fn reboot(&self, node: &Node) -> NetResult<()> {
        Err(unmanaged(node))
    }
}

#[async_trait]
impl VnicProvisioner for UnmanagedHardware {
    async fn add_vnic(
        &self,
        node: &Node,
        _name: &str,
        _mac: &str,
        _vlan: u16,
        _pxe: bool,
    ) -> NetResult<()> {
        Err(unmanaged(node))
    }

    async fn delete_vnic(&self, node: &Node, _name: &str) -> NetResult<()> {
        Err(unmanaged(node))
    }
}

/// Runs commands against a loaded inventory
#[derive(Debug)]
pub struct Agent {
    inventory: InventoryFile,
    locks: LocalLockManager,
    registry: InterfaceRegistry,
    passthru: VnicPassthru,
}

impl Agent {
    pub fn new(inventory: InventoryFile, registry: InterfaceRegistry, passthru: VnicPassthru) -> Self {
        Self {
            inventory,
            locks: LocalLockManager::new(),
            registry,
            passthru,
        }
    }

    /// Build the agent described by `config`.
    pub async fn from_config(config: &AgentConfig) -> NetResult<Self> {
        let inventory = InventoryFile::load(&config.agent.inventory).await?;

        let client = match config.controller.session_config()? {
            Some(session) => {
                let session = ControllerSession::new(session)?;
                info!(endpoint = %session.endpoint(), "Controller session ready");
                Some(Arc::new(HttpControllerClient::new(session)) as Arc<dyn ControllerClient>)
            }
            None => None,
        };
        let plumber: Arc<dyn LinkPlumber> =
            Arc::new(ShellLinkPlumber::new(config.agent.sysfs_net_root.clone()));
        let deps = InterfaceDeps {
            client,
            plumber: Some(plumber),
        };
        let registry = InterfaceRegistry::new(&config.network, &deps)?;

        let hardware = Arc::new(UnmanagedHardware);
        let passthru = VnicPassthru::new(hardware.clone(), hardware);

        Ok(Self::new(inventory, registry, passthru))
    }

    pub fn inventory(&self) -> &InventoryFile {
        &self.inventory
    }

    /// Run `command` and write back the inventory if it may have changed.
    ///
    /// The inventory is written even when the command fails, since
    /// transitions can fail after recording part of their work.
    #[instrument(skip(self, auth_token), fields(command = command.name(), node = %command.node_id()))]
    pub async fn execute(&self, command: &Command, auth_token: Option<&str>) -> NetResult<Value> {
        let result = self.dispatch(command, auth_token).await;
        if command.mutates() {
            if let Err(e) = self.inventory.save().await {
                return Err(match result {
                    Ok(_) => e,
                    Err(original) => {
                        warn!(error = %e, "Inventory not saved after failed command");
                        original
                    }
                });
            }
        }
        result
    }

    async fn dispatch(&self, command: &Command, auth_token: Option<&str>) -> NetResult<Value> {
        let store: Arc<dyn NodeStore> = self.inventory.store().clone();
        let mut task = Task::acquire(store, &self.locks, command.node_id()).await?;
        if let Some(token) = auth_token {
            task = task.with_auth_token(token);
        }
        let iface = self.registry.for_node(&task.node)?;

        match command {
            Command::Validate { .. } => {
                iface.validate(&task).await?;
                Ok(json!({"valid": true, "interface": iface.kind()}))
            }
            Command::VifAttach { vif, .. } => {
                iface.vif_attach(&mut task, &VifInfo::new(vif.as_str())).await?;
                Ok(Value::Null)
            }
            Command::VifDetach { vif, .. } => {
                iface.vif_detach(&mut task, vif).await?;
                Ok(Value::Null)
            }
            Command::VifList { .. } => to_json(&iface.vif_list(&task)),
            Command::CurrentVif { port, .. } => {
                let port = task
                    .port(port)
                    .ok_or_else(|| NetError::not_found("port", port.as_str()))?;
                Ok(json!({"port": port.id, "vif": iface.get_current_vif(port)}))
            }
            Command::PortChanged { file, .. } => {
                let port: PhysicalPort = read_record(file).await?;
                check_owner(&task, "port", &port.id, &port.node_id)?;
                if task.port(&port.id).is_none() {
                    return Err(NetError::not_found("port", port.id));
                }
                iface.port_changed(&task, &port).await?;
                task.save_port(port).await?;
                Ok(Value::Null)
            }
            Command::PortgroupChanged { file, .. } => {
                let portgroup: PortGroup = read_record(file).await?;
                check_owner(&task, "portgroup", &portgroup.id, &portgroup.node_id)?;
                iface.portgroup_changed(&task, &portgroup).await?;
                self.inventory.store().put_portgroup(portgroup);
                Ok(Value::Null)
            }
            Command::AddProvisioningNetwork { .. } => {
                iface.add_provisioning_network(&mut task).await?;
                Ok(Value::Null)
            }
            Command::RemoveProvisioningNetwork { .. } => {
                iface.remove_provisioning_network(&mut task).await?;
                Ok(Value::Null)
            }
            Command::AddCleaningNetwork { .. } => {
                iface.add_cleaning_network(&mut task).await?;
                Ok(Value::Null)
            }
            Command::RemoveCleaningNetwork { .. } => {
                iface.remove_cleaning_network(&mut task).await?;
                Ok(Value::Null)
            }
            Command::ConfigureTenantNetworks { .. } => {
                iface.configure_tenant_networks(&mut task).await?;
                Ok(Value::Null)
            }
            Command::UnconfigureTenantNetworks { .. } => {
                iface.unconfigure_tenant_networks(&mut task).await?;
                Ok(Value::Null)
            }
            Command::Passthru { method, args, .. } => {
                let args: Value = serde_json::from_str(args)
                    .map_err(|e| NetError::invalid(format!("passthru arguments: {}", e)))?;
                self.passthru.call(&mut task, method, &args).await
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> NetResult<Value> {
    serde_json::to_value(value).map_err(|e| NetError::internal(e.to_string()))
}

async fn read_record<T: DeserializeOwned>(path: &Path) -> NetResult<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| NetError::invalid(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| NetError::invalid(format!("cannot parse {}: {}", path.display(), e)))
}

fn check_owner(task: &Task, kind: &str, id: &str, owner: &str) -> NetResult<()> {
    if owner != task.node_id() {
        return Err(NetError::invalid(format!(
            "{} {} belongs to node {}, not {}",
            kind,
            id,
            owner,
            task.node_id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmnet_netif::{InterfaceKind, NetworkConfig};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const INVENTORY: &str = r#"{
        "nodes": [{"id": "n1"}, {"id": "n2", "network_interface": "ovs"}],
        "ports": [
            {"id": "p1", "node_id": "n1", "address": "52:54:00:cf:2d:01"},
            {"id": "p2", "node_id": "n1", "address": "52:54:00:cf:2d:02"}
        ],
        "portgroups": [
            {"id": "pg1", "node_id": "n1", "standalone_ports_supported": false}
        ]
    }"#;

    async fn noop_agent(dir: &Path) -> Agent {
        let path = dir.join("inventory.json");
        tokio::fs::write(&path, INVENTORY).await.unwrap();
        let config = AgentConfig {
            network: NetworkConfig {
                interface: InterfaceKind::Noop,
                ..Default::default()
            },
            agent: crate::config::AgentSection {
                inventory: path,
                sysfs_net_root: dir.to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        Agent::from_config(&config).await.unwrap()
    }

    fn node(id: &str) -> String {
        id.to_string()
    }

    #[tokio::test]
    async fn test_attach_list_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let agent = noop_agent(dir.path()).await;

        for vif in ["v1", "v2"] {
            agent
                .execute(
                    &Command::VifAttach {
                        node: node("n1"),
                        vif: vif.to_string(),
                    },
                    None,
                )
                .await
                .unwrap();
        }
        let err = agent
            .execute(
                &Command::VifAttach {
                    node: node("n1"),
                    vif: "v3".to_string(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::InsufficientPorts { .. }));

        let listed = agent
            .execute(&Command::VifList { node: node("n1") }, None)
            .await
            .unwrap();
        assert_eq!(listed, json!([{"id": "v1"}, {"id": "v2"}]));

        let reloaded = InventoryFile::load(agent.inventory().path()).await.unwrap();
        let p1 = reloaded.store().get_port("p1").await.unwrap();
        assert_eq!(p1.tenant_vif(), Some("v1"));
    }

    #[tokio::test]
    async fn test_current_vif() {
        let dir = tempfile::tempdir().unwrap();
        let agent = noop_agent(dir.path()).await;
        agent
            .execute(
                &Command::VifAttach {
                    node: node("n1"),
                    vif: "v1".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        let current = agent
            .execute(
                &Command::CurrentVif {
                    node: node("n1"),
                    port: "p1".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(current, json!({"port": "p1", "vif": "v1"}));

        let err = agent
            .execute(
                &Command::CurrentVif {
                    node: node("n1"),
                    port: "p9".to_string(),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_port_changed_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let agent = noop_agent(dir.path()).await;
        let file = dir.path().join("p2.json");

        // Joining a non-standalone portgroup while PXE-enabled is refused.
        tokio::fs::write(
            &file,
            r#"{"id": "p2", "node_id": "n1", "address": "52:54:00:cf:2d:02", "portgroup_id": "pg1"}"#,
        )
        .await
        .unwrap();
        let command = Command::PortChanged {
            node: node("n1"),
            file: file.clone(),
        };
        assert!(matches!(
            agent.execute(&command, None).await,
            Err(NetError::Conflict { .. })
        ));

        tokio::fs::write(
            &file,
            r#"{"id": "p2", "node_id": "n1", "address": "52:54:00:cf:2d:09"}"#,
        )
        .await
        .unwrap();
        agent.execute(&command, None).await.unwrap();
        let p2 = agent.inventory().store().get_port("p2").await.unwrap();
        assert_eq!(p2.address, "52:54:00:cf:2d:09");
    }

    #[tokio::test]
    async fn test_port_of_other_node_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let agent = noop_agent(dir.path()).await;
        let file = dir.path().join("p1.json");
        tokio::fs::write(
            &file,
            r#"{"id": "p1", "node_id": "n2", "address": "52:54:00:cf:2d:01"}"#,
        )
        .await
        .unwrap();

        let result = agent
            .execute(
                &Command::PortChanged {
                    node: node("n1"),
                    file,
                },
                None,
            )
            .await;
        assert!(matches!(result, Err(NetError::InvalidParameter { .. })));
    }

    #[tokio::test]
    async fn test_noop_transitions_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let agent = noop_agent(dir.path()).await;

        let validated = agent
            .execute(&Command::Validate { node: node("n1") }, None)
            .await
            .unwrap();
        assert_eq!(validated, json!({"valid": true, "interface": "noop"}));

        for command in [
            Command::AddProvisioningNetwork { node: node("n1") },
            Command::RemoveProvisioningNetwork { node: node("n1") },
            Command::AddCleaningNetwork { node: node("n1") },
            Command::RemoveCleaningNetwork { node: node("n1") },
            Command::ConfigureTenantNetworks { node: node("n1") },
            Command::UnconfigureTenantNetworks { node: node("n1") },
        ] {
            assert_eq!(agent.execute(&command, None).await.unwrap(), Value::Null);
        }
    }

    #[tokio::test]
    async fn test_interface_not_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let agent = noop_agent(dir.path()).await;
        // n2 asks for ovs, which needs a controller that is not configured.
        let result = agent
            .execute(&Command::VifList { node: node("n2") }, None)
            .await;
        assert!(matches!(result, Err(NetError::InvalidParameter { .. })));
    }

    #[tokio::test]
    async fn test_passthru_without_vnic_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let agent = noop_agent(dir.path()).await;

        let created = agent
            .execute(
                &Command::Passthru {
                    node: node("n1"),
                    method: "is_vnic_created".to_string(),
                    args: r#"{"uuid": "vnic-0"}"#.to_string(),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(created, json!({"created": false}));

        let add = Command::Passthru {
            node: node("n1"),
            method: "add_vnic".to_string(),
            args: r#"{"uuid": "vnic-1", "mac": "52:54:00:cf:2d:10", "vlan": 100}"#.to_string(),
        };
        assert!(matches!(
            agent.execute(&add, None).await,
            Err(NetError::InvalidParameter { .. })
        ));

        let unknown = Command::Passthru {
            node: node("n1"),
            method: "reset".to_string(),
            args: "{}".to_string(),
        };
        assert!(agent.execute(&unknown, None).await.is_err());

        let bad_args = Command::Passthru {
            node: node("n1"),
            method: "is_vnic_created".to_string(),
            args: "not json".to_string(),
        };
        assert!(matches!(
            agent.execute(&bad_args, None).await,
            Err(NetError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_inventory() {
        let config = AgentConfig {
            agent: crate::config::AgentSection {
                inventory: PathBuf::from("/nonexistent/bmnet/inventory.json"),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            Agent::from_config(&config).await,
            Err(NetError::Store { .. })
        ));
    }
}
