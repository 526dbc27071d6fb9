//! Tenant VIF bookkeeping shared by every network interface.
//!
//! [`VifManager`] implements attach, detach, list and change validation
//! once; each interface variant owns one and delegates to it.

use bmnet_common::{
    keys, NetError, NetResult, NetworkPhase, PhysicalPort, PortGroup, Task, VifInfo,
};
use bmnet_controller::{ControllerClient, DhcpOption};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::binding;

/// Attach/detach/list of tenant VIFs on a node's ports.
#[derive(Clone)]
pub struct VifManager {
    client: Option<Arc<dyn ControllerClient>>,
}

impl std::fmt::Debug for VifManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VifManager")
            .field("controller", &self.client.is_some())
            .finish()
    }
}

impl VifManager {
    /// Manager synchronizing MAC and DHCP options through `client`
    pub fn new(client: Arc<dyn ControllerClient>) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Manager doing local bookkeeping only
    pub fn standalone() -> Self {
        Self { client: None }
    }

    /// Controller client scoped to the task's token
    fn client_for(&self, task: &Task) -> Option<Arc<dyn ControllerClient>> {
        self.client
            .as_ref()
            .map(|c| c.scoped(task.auth_token.as_deref()))
    }

    /// One entry per port carrying a tenant VIF.
    pub fn vif_list(&self, task: &Task) -> Vec<VifInfo> {
        task.ports
            .iter()
            .filter_map(|p| p.tenant_vif())
            .map(VifInfo::new)
            .collect()
    }

    /// The VIF the port currently boots through.
    pub fn get_current_vif(&self, port: &PhysicalPort) -> Option<String> {
        port.current_vif().map(str::to_string)
    }

    /// Associate `vif` with the first free port, PXE-enabled ports first.
    #[instrument(skip(self, task), fields(node = %task.node.id, vif = %vif.id))]
    pub async fn vif_attach(&self, task: &mut Task, vif: &VifInfo) -> NetResult<()> {
        let vif_id = vif.id.as_str();

        let mut order: Vec<usize> = (0..task.ports.len()).collect();
        order.sort_by_key(|&i| !task.ports[i].pxe_enabled);

        let mut free = Vec::new();
        for &i in &order {
            let port = &task.ports[i];
            if port.carries_vif(vif_id) {
                return Err(NetError::AlreadyAttached {
                    vif: vif_id.to_string(),
                    port: port.id.clone(),
                });
            }
            if port.tenant_vif().is_none() {
                free.push(i);
            }
        }

        let index = *free.first().ok_or_else(|| NetError::InsufficientPorts {
            vif: vif_id.to_string(),
        })?;
        let address = task.ports[index].address.clone();

        if let Some(client) = self.client_for(task) {
            self.sync_mac(client.as_ref(), vif_id, &address).await?;
        }

        task.ports[index].set_vif(NetworkPhase::Tenant, vif_id);
        task.save_port_at(index).await?;

        info!(port = %task.ports[index].id, "Attached VIF");
        Ok(())
    }

    /// Point an existing controller port at the physical MAC.
    ///
    /// A VIF unknown to the controller is a non-controller VIF and is left
    /// alone.
    async fn sync_mac(&self, client: &dyn ControllerClient, vif_id: &str, mac: &str) -> NetResult<()> {
        let found = match client.show_port(vif_id).await {
            Ok(found) => found,
            Err(e @ NetError::ControllerUnavailable { .. }) => {
                return Err(NetError::network_from(
                    format!("Unable to attach VIF {}: controller unavailable", vif_id),
                    e,
                ))
            }
            Err(e) => {
                debug!(vif = %vif_id, error = %e, "VIF is not a controller port, skipping MAC sync");
                None
            }
        };

        if found.is_none() {
            debug!(vif = %vif_id, "No controller port for VIF");
            return Ok(());
        }

        binding::update_port_address(client, vif_id, mac)
            .await
            .map_err(|e| {
                NetError::network_from(
                    format!(
                        "Unable to attach VIF {} because its controller port MAC \
                         cannot be updated to match physical MAC address {}",
                        vif_id, mac
                    ),
                    e,
                )
            })
    }

    /// Remove `vif_id` from the first port carrying it.
    #[instrument(skip(self, task), fields(node = %task.node.id))]
    pub async fn vif_detach(&self, task: &mut Task, vif_id: &str) -> NetResult<()> {
        let index = task
            .ports
            .iter()
            .position(|p| p.carries_vif(vif_id))
            .ok_or_else(|| NetError::NotAttached {
                vif: vif_id.to_string(),
                node: task.node.id.clone(),
            })?;

        task.ports[index].clear_vif(NetworkPhase::Tenant);
        task.save_port_at(index).await?;

        info!(port = %task.ports[index].id, vif = %vif_id, "Detached VIF");
        Ok(())
    }

    /// React to an update of `port`, compared with its stored version.
    ///
    /// Portgroup policy is checked before any controller call.
    #[instrument(skip(self, task, port), fields(node = %task.node.id, port = %port.id))]
    pub async fn port_changed(&self, task: &Task, port: &PhysicalPort) -> NetResult<()> {
        let previous = match task.store().get_port(&port.id).await {
            Ok(previous) => Some(previous),
            Err(NetError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        self.port_changed_from(task, port, previous.as_ref()).await
    }

    /// [`VifManager::port_changed`] with an explicit previous version.
    ///
    /// `None` means the port is new and every field counts as changed.
    pub async fn port_changed_from(
        &self,
        task: &Task,
        port: &PhysicalPort,
        previous: Option<&PhysicalPort>,
    ) -> NetResult<()> {
        let vif = port.tenant_vif();
        self.check_portgroup_policy(task, port, previous, vif)?;

        let address_changed = previous.map_or(true, |p| p.address != port.address);
        let client_id_changed = previous.map_or(true, |p| p.client_id() != port.client_id());
        let client = self.client_for(task);

        if address_changed {
            match (vif, client.as_deref()) {
                (Some(vif), Some(client)) => {
                    binding::update_port_address(client, vif, &port.address).await?;
                }
                (None, _) if task.node.has_instance() => warn!(
                    instance = ?task.node.instance_id,
                    "No VIF found for instance when attempting to update port MAC address"
                ),
                _ => {}
            }
        }

        if client_id_changed && previous.is_some() {
            match (vif, client.as_deref()) {
                (Some(vif), Some(client)) => {
                    let opt = DhcpOption::client_id(port.client_id());
                    binding::update_port_dhcp_opts(client, vif, vec![opt]).await?;
                }
                (None, _) if task.node.has_instance() => warn!(
                    instance = ?task.node.instance_id,
                    "No VIF found for instance when attempting to update port client-id"
                ),
                _ => {}
            }
        }

        Ok(())
    }

    fn check_portgroup_policy(
        &self,
        task: &Task,
        port: &PhysicalPort,
        previous: Option<&PhysicalPort>,
        vif: Option<&str>,
    ) -> NetResult<()> {
        let Some(portgroup_id) = port.portgroup_id.as_deref() else {
            return Ok(());
        };
        let portgroup = task
            .portgroup(portgroup_id)
            .ok_or_else(|| NetError::not_found("portgroup", portgroup_id))?;

        let pxe_changed = previous.map_or(true, |p| p.pxe_enabled != port.pxe_enabled);
        let membership_changed = previous.map_or(true, |p| p.portgroup_id != port.portgroup_id);

        if (pxe_changed || membership_changed || vif.is_some())
            && (port.pxe_enabled || vif.is_some())
            && !portgroup.standalone_ports_supported
        {
            return Err(NetError::conflict(format!(
                "Port group {} doesn't support standalone ports. Port {} cannot be a \
                 member of that port group because either '{}' was specified or \
                 'pxe_enabled' was set to true",
                portgroup.id,
                port.id,
                keys::LEGACY_VIF
            )));
        }
        Ok(())
    }

    /// React to an update of `portgroup`.
    #[instrument(skip(self, task, portgroup), fields(node = %task.node.id, portgroup = %portgroup.id))]
    pub async fn portgroup_changed(&self, task: &Task, portgroup: &PortGroup) -> NetResult<()> {
        if portgroup.standalone_ports_supported {
            return Ok(());
        }
        let offending = task.ports.iter().find(|p| {
            p.portgroup_id.as_deref() == Some(portgroup.id.as_str())
                && (p.pxe_enabled || p.tenant_vif().is_some())
        });
        match offending {
            Some(port) => Err(NetError::conflict(format!(
                "Port group {} cannot disable standalone ports: member port {} is \
                 PXE-enabled or has a VIF attached",
                portgroup.id, port.id
            ))),
            None => Ok(()),
        }
    }
}
