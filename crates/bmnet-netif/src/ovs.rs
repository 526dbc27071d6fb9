//! Network interface realizing each VIF on the agent host through OVS.
//!
//! For every PXE-enabled port a controller port is created on the phase
//! network, a local dataplane is plumbed from the node's VLAN to the
//! integration bridge, and the controller port is bound to this host.

use async_trait::async_trait;
use bmnet_common::{NetError, NetResult, NetworkPhase, PhysicalPort, Task};
use bmnet_controller::{ControllerClient, PortSpec, DEVICE_OWNER_BAREMETAL};
use bmnet_plumber::LinkPlumber;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::binding;
use crate::config::{InterfaceKind, NetworkConfig};
use crate::dataplane::{host_link, Dataplane, PortPlumbing};
use crate::interface::{NetworkIds, NetworkInterface};
use crate::vif::VifManager;

/// OVS-backed network interface.
pub struct OvsNetwork {
    client: Arc<dyn ControllerClient>,
    vifs: VifManager,
    networks: NetworkIds,
    dataplane: Dataplane,
    host_name: String,
}

impl std::fmt::Debug for OvsNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OvsNetwork")
            .field("networks", &self.networks)
            .field("dataplane", &self.dataplane)
            .field("host_name", &self.host_name)
            .finish_non_exhaustive()
    }
}

impl OvsNetwork {
    /// Fails only when no host name is configured and the system one
    /// cannot be read.
    pub fn new(
        client: Arc<dyn ControllerClient>,
        plumber: Arc<dyn LinkPlumber>,
        config: &NetworkConfig,
    ) -> NetResult<Self> {
        Ok(Self {
            vifs: VifManager::new(client.clone()),
            client,
            networks: NetworkIds::new(
                config.provisioning_network.clone(),
                config.cleaning_network.clone(),
            ),
            dataplane: Dataplane::new(plumber, config.integration_bridge.clone()),
            host_name: config.resolved_host_name()?,
        })
    }

    /// Host controller ports are bound to
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    fn client_for(&self, task: &Task) -> Arc<dyn ControllerClient> {
        self.client.scoped(task.auth_token.as_deref())
    }

    /// Plumb `plumbing` and bind its VIF to this host.
    async fn realize(&self, client: &dyn ControllerClient, plumbing: &PortPlumbing) -> NetResult<()> {
        self.dataplane.plumb(plumbing).await?;
        binding::bind_port_host(client, &plumbing.vif, &self.host_name).await
    }

    /// Create, plumb and bind one controller port for `port`.
    ///
    /// On failure the local devices and the controller port are removed
    /// again before the error is returned.
    async fn provision_port(
        &self,
        client: &dyn ControllerClient,
        port: &PhysicalPort,
        network: &str,
    ) -> NetResult<String> {
        let mut spec = PortSpec::new(network, &port.address);
        spec.device_owner = Some(DEVICE_OWNER_BAREMETAL.to_string());

        let vport = client.create_port(&spec).await.map_err(|e| {
            NetError::network_from(
                format!("Could not create port for {} on network {}", port.id, network),
                e,
            )
        })?;
        debug!(port = %port.id, vif = %vport.id, "Created controller port");

        let plumbing = match PortPlumbing::from_port(port, &vport.id) {
            Ok(plumbing) => plumbing,
            Err(e) => {
                self.discard_port(client, &vport.id).await;
                return Err(e);
            }
        };
        if let Err(e) = self.realize(client, &plumbing).await {
            let leftovers = self.dataplane.unplumb(&plumbing).await;
            if !leftovers.is_empty() {
                warn!(vif = %vport.id, failures = ?leftovers, "Partial dataplane not fully removed");
            }
            self.discard_port(client, &vport.id).await;
            return Err(e);
        }
        Ok(vport.id)
    }

    async fn discard_port(&self, client: &dyn ControllerClient, vif: &str) {
        if let Err(e) = client.delete_port(vif).await {
            warn!(vif = %vif, error = %e, "Could not delete port after plumbing failure");
        }
    }

    /// Tear down VIFs a previous run left under `phase`.
    ///
    /// Leftover local devices are logged; controller failures abort.
    async fn release_phase_network(&self, task: &mut Task, phase: NetworkPhase) -> NetResult<()> {
        match self.remove_phase_network(task, phase).await {
            Ok(()) => Ok(()),
            Err(NetError::DataplaneTeardown { failures, .. }) => {
                warn!(phase = %phase, failures = ?failures, "Dataplane not fully removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn add_phase_network(&self, task: &mut Task, phase: NetworkPhase) -> NetResult<()> {
        let client = self.client_for(task);
        let network = self.networks.for_phase(client.as_ref(), phase).await?;

        // A re-run would otherwise orphan the VIFs recorded by the last one.
        self.release_phase_network(task, phase).await?;

        info!(node = %task.node.id, network = %network, phase = %phase, "Adding network");

        let pxe: Vec<usize> = (0..task.ports.len())
            .filter(|&i| task.ports[i].pxe_enabled)
            .collect();
        let mut failures = Vec::new();
        let mut first_error = None;

        for &index in &pxe {
            let outcome = self
                .provision_port(client.as_ref(), &task.ports[index], &network)
                .await;
            match outcome {
                Ok(vif) => {
                    task.ports[index].set_vif(phase, vif);
                    task.save_port_at(index).await?;
                }
                Err(e) => {
                    let port = &task.ports[index];
                    warn!(port = %port.id, network = %network, error = %e, "Could not realize VIF");
                    failures.push(port.id.clone());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            if failures.len() == pxe.len() {
                return Err(NetError::network_from(
                    format!(
                        "Failed to create controller ports for any PXE enabled port on node {}",
                        task.node.id
                    ),
                    e,
                ));
            }
            warn!(
                node = %task.node.id,
                phase = %phase,
                ports = ?failures,
                "Some VIFs could not be realized"
            );
        }

        info!(node = %task.node.id, phase = %phase, "Network added");
        Ok(())
    }

    async fn remove_phase_network(&self, task: &mut Task, phase: NetworkPhase) -> NetResult<()> {
        let client = self.client_for(task);
        let mut failures = Vec::new();

        for index in 0..task.ports.len() {
            let port = &task.ports[index];
            let Some(vif) = port.vif_for(phase).map(str::to_string) else {
                continue;
            };

            match client.delete_port(&vif).await {
                Ok(()) => debug!(port = %port.id, vif = %vif, "Deleted controller port"),
                Err(NetError::ControllerRejected { status: 404, .. }) => {
                    debug!(port = %port.id, vif = %vif, "Controller port already gone")
                }
                Err(e) => {
                    return Err(NetError::network_from(
                        format!("Could not remove VIF {} of node {}", vif, task.node.id),
                        e,
                    ))
                }
            }

            match PortPlumbing::from_port(port, &vif) {
                Ok(plumbing) => failures.extend(self.dataplane.unplumb(&plumbing).await),
                Err(e) => failures.push(format!("port {}: {}", port.id, e)),
            }

            task.ports[index].clear_vif(phase);
            task.save_port_at(index).await?;
        }

        finish_teardown(&task.node.id, failures)?;
        info!(node = %task.node.id, phase = %phase, "Network removed");
        Ok(())
    }
}

fn finish_teardown(node: &str, failures: Vec<String>) -> NetResult<()> {
    if failures.is_empty() {
        return Ok(());
    }
    Err(NetError::DataplaneTeardown {
        node: node.to_string(),
        failures,
    })
}

#[async_trait]
impl NetworkInterface for OvsNetwork {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Ovs
    }

    fn vifs(&self) -> &VifManager {
        &self.vifs
    }

    async fn validate(&self, task: &Task) -> NetResult<()> {
        for port in task.pxe_enabled_ports() {
            host_link(port)?;
        }
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
        // Leftover local devices do not block cleaning; they are logged.
        self.release_phase_network(task, NetworkPhase::Provisioning)
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
        let mut configured = 0usize;
        for port in &task.ports {
            let Some(vif) = port.tenant_vif() else {
                continue;
            };
            let plumbing = PortPlumbing::from_port(port, vif)?;
            self.realize(client.as_ref(), &plumbing).await?;
            configured += 1;
        }
        if configured == 0 {
            info!("No tenant VIFs attached, nothing to configure");
        } else {
            info!(count = configured, "Configured tenant networks");
        }
        Ok(())
    }

    #[instrument(skip(self, task), fields(node = %task.node.id))]
    async fn unconfigure_tenant_networks(&self, task: &mut Task) -> NetResult<()> {
        let client = self.client_for(task);
        let mut failures = Vec::new();
        for port in &task.ports {
            let Some(vif) = port.tenant_vif() else {
                continue;
            };
            binding::unbind_port(client.as_ref(), vif).await?;
            match PortPlumbing::from_port(port, vif) {
                Ok(plumbing) => failures.extend(self.dataplane.unplumb(&plumbing).await),
                Err(e) => failures.push(format!("port {}: {}", port.id, e)),
            }
        }
        finish_teardown(&task.node.id, failures)?;
        info!("Unconfigured tenant networks");
        Ok(())
    }
}
