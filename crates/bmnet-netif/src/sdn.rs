//! Network interface binding controller ports to the node through the
//! switch fabric.

use async_trait::async_trait;
use bmnet_common::{NetResult, NetworkPhase, Task};
use bmnet_controller::ControllerClient;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::binding;
use crate::config::{InterfaceKind, NetworkConfig};
use crate::interface::{clear_phase_vifs, persist_phase_vifs, NetworkIds, NetworkInterface};
use crate::ports::{create_ports_for_pxe_enabled, remove_ports_for_network, rollback_ports};
use crate::vif::VifManager;

/// Controller-managed network interface.
///
/// Provisioning and cleaning ports are created on the configured networks
/// and bound to the node; the switch fabric does the rest.
pub struct ControllerNetwork {
    client: Arc<dyn ControllerClient>,
    vifs: VifManager,
    networks: NetworkIds,
    provisioning_security_groups: Vec<String>,
    cleaning_security_groups: Vec<String>,
}

impl std::fmt::Debug for ControllerNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerNetwork")
            .field("networks", &self.networks)
            .finish_non_exhaustive()
    }
}

impl ControllerNetwork {
    pub fn new(client: Arc<dyn ControllerClient>, config: &NetworkConfig) -> Self {
        Self {
            vifs: VifManager::new(client.clone()),
            client,
            networks: NetworkIds::new(
                config.provisioning_network.clone(),
                config.cleaning_network.clone(),
            ),
            provisioning_security_groups: config.provisioning_security_groups.clone(),
            cleaning_security_groups: config.cleaning_security_groups.clone(),
        }
    }

    fn client_for(&self, task: &Task) -> Arc<dyn ControllerClient> {
        self.client.scoped(task.auth_token.as_deref())
    }

    fn security_groups(&self, phase: NetworkPhase) -> &[String] {
        match phase {
            NetworkPhase::Cleaning => &self.cleaning_security_groups,
            _ => &self.provisioning_security_groups,
        }
    }

    async fn add_phase_network(&self, task: &mut Task, phase: NetworkPhase) -> NetResult<()> {
        let client = self.client_for(task);
        let network = self.networks.for_phase(client.as_ref(), phase).await?;

        // Ports left behind by an interrupted run would clash on MAC.
        rollback_ports(client.as_ref(), task, &network).await;

        info!(node = %task.node.id, network = %network, phase = %phase, "Adding network");
        let created = create_ports_for_pxe_enabled(
            client.as_ref(),
            task,
            &network,
            false,
            self.security_groups(phase),
        )
        .await?;
        persist_phase_vifs(task, phase, &created).await
    }

    async fn remove_phase_network(&self, task: &mut Task, phase: NetworkPhase) -> NetResult<()> {
        let client = self.client_for(task);
        let network = self.networks.for_phase(client.as_ref(), phase).await?;

        info!(node = %task.node.id, network = %network, phase = %phase, "Removing network");
        remove_ports_for_network(client.as_ref(), task, &network).await?;
        clear_phase_vifs(task, phase).await
    }
}

#[async_trait]
impl NetworkInterface for ControllerNetwork {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Controller
    }

    fn vifs(&self) -> &VifManager {
        &self.vifs
    }

    async fn validate(&self, task: &Task) -> NetResult<()> {
        let client = self.client_for(task);
        self.networks.provisioning(client.as_ref()).await?;
        self.networks.cleaning(client.as_ref()).await?;
        Ok(())
    }

    #[instrument(skip(self, task), fields(node = %task.node.id))]
    async fn add_provisioning_network(&self, task: &mut Task) -> NetResult<()> {
        self.add_phase_network(task, NetworkPhase::Provisioning).await
    }

    #[instrument(skip(self, task), fields(node = %task.node.id))]
    async fn remove_provisioning_network(&self, task: &mut Task) -> NetResult<()> {
        self.remove_phase_network(task, NetworkPhase::Provisioning)
            .await
    }

    #[instrument(skip(self, task), fields(node = %task.node.id))]
    async fn add_cleaning_network(&self, task: &mut Task) -> NetResult<()> {
        self.remove_phase_network(task, NetworkPhase::Provisioning)
            .await?;
        self.add_phase_network(task, NetworkPhase::Cleaning).await
    }

    #[instrument(skip(self, task), fields(node = %task.node.id))]
    async fn remove_cleaning_network(&self, task: &mut Task) -> NetResult<()> {
        self.remove_phase_network(task, NetworkPhase::Cleaning).await
    }

    #[instrument(skip(self, task), fields(node = %task.node.id))]
    async fn configure_tenant_networks(&self, task: &mut Task) -> NetResult<()> {
        let client = self.client_for(task);
        let tenant: Vec<_> = task
            .ports
            .iter()
            .filter_map(|p| p.tenant_vif().map(|vif| (vif.to_string(), p)))
            .collect();

        if tenant.is_empty() {
            info!("No tenant VIFs attached, nothing to configure");
            return Ok(());
        }

        for (vif, port) in tenant {
            debug!(port = %port.id, vif = %vif, "Binding tenant port");
            binding::bind_port_baremetal(
                client.as_ref(),
                &vif,
                &task.node.id,
                &port.local_link_connection,
            )
            .await?;
        }
        info!("Configured tenant networks");
        Ok(())
    }

    #[instrument(skip(self, task), fields(node = %task.node.id))]
    async fn unconfigure_tenant_networks(&self, task: &mut Task) -> NetResult<()> {
        let client = self.client_for(task);
        for port in &task.ports {
            if let Some(vif) = port.tenant_vif() {
                binding::unbind_port(client.as_ref(), vif).await?;
            }
        }
        info!("Unconfigured tenant networks");
        Ok(())
    }
}
