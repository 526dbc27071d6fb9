//! The network interface contract and helpers shared by its variants.

use async_trait::async_trait;
use bmnet_common::{NetError, NetResult, NetworkPhase, PhysicalPort, PortGroup, Task, VifInfo};
use bmnet_controller::ControllerClient;
use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::InterfaceKind;
use crate::ports::validate_network;
use crate::vif::VifManager;

/// Network management for a bare-metal node across its lifecycle.
///
/// VIF bookkeeping is provided by [`VifManager`]; variants implement the
/// phase transitions.
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> InterfaceKind;

    /// Shared VIF bookkeeping
    fn vifs(&self) -> &VifManager;

    /// Check configuration and node ports before any transition.
    async fn validate(&self, task: &Task) -> NetResult<()>;

    async fn port_changed(&self, task: &Task, port: &PhysicalPort) -> NetResult<()> {
        self.vifs().port_changed(task, port).await
    }

    async fn portgroup_changed(&self, task: &Task, portgroup: &PortGroup) -> NetResult<()> {
        self.vifs().portgroup_changed(task, portgroup).await
    }

    async fn vif_attach(&self, task: &mut Task, vif: &VifInfo) -> NetResult<()> {
        self.vifs().vif_attach(task, vif).await
    }

    async fn vif_detach(&self, task: &mut Task, vif_id: &str) -> NetResult<()> {
        self.vifs().vif_detach(task, vif_id).await
    }

    fn vif_list(&self, task: &Task) -> Vec<VifInfo> {
        self.vifs().vif_list(task)
    }

    fn get_current_vif(&self, port: &PhysicalPort) -> Option<String> {
        self.vifs().get_current_vif(port)
    }

    async fn add_provisioning_network(&self, task: &mut Task) -> NetResult<()>;

    async fn remove_provisioning_network(&self, task: &mut Task) -> NetResult<()>;

    async fn add_cleaning_network(&self, task: &mut Task) -> NetResult<()>;

    async fn remove_cleaning_network(&self, task: &mut Task) -> NetResult<()>;

    async fn configure_tenant_networks(&self, task: &mut Task) -> NetResult<()>;

    async fn unconfigure_tenant_networks(&self, task: &mut Task) -> NetResult<()>;
}

/// Provisioning and cleaning network ids, resolved once per interface.
#[derive(Debug, Default)]
pub struct NetworkIds {
    provisioning_ref: Option<String>,
    cleaning_ref: Option<String>,
    provisioning: OnceCell<String>,
    cleaning: OnceCell<String>,
}

impl NetworkIds {
    /// Networks referenced by UUID or name
    pub fn new(provisioning: Option<String>, cleaning: Option<String>) -> Self {
        Self {
            provisioning_ref: provisioning,
            cleaning_ref: cleaning,
            ..Default::default()
        }
    }

    pub async fn provisioning(&self, client: &dyn ControllerClient) -> NetResult<String> {
        self.provisioning
            .get_or_try_init(|| {
                validate_network(client, self.provisioning_ref.as_deref(), "provisioning network")
            })
            .await
            .cloned()
    }

    pub async fn cleaning(&self, client: &dyn ControllerClient) -> NetResult<String> {
        self.cleaning
            .get_or_try_init(|| {
                validate_network(client, self.cleaning_ref.as_deref(), "cleaning network")
            })
            .await
            .cloned()
    }

    pub async fn for_phase(
        &self,
        client: &dyn ControllerClient,
        phase: NetworkPhase,
    ) -> NetResult<String> {
        match phase {
            NetworkPhase::Provisioning => self.provisioning(client).await,
            NetworkPhase::Cleaning => self.cleaning(client).await,
            NetworkPhase::Tenant => Err(NetError::internal(
                "tenant networks are chosen by the tenant, not configured",
            )),
        }
    }
}

/// Record `vifs` (port id → VIF id) under the phase key and persist them.
pub(crate) async fn persist_phase_vifs(
    task: &mut Task,
    phase: NetworkPhase,
    vifs: &BTreeMap<String, String>,
) -> NetResult<()> {
    for index in 0..task.ports.len() {
        if let Some(vif) = vifs.get(&task.ports[index].id) {
            task.ports[index].set_vif(phase, vif.clone());
            task.save_port_at(index).await?;
        }
    }
    Ok(())
}

/// Clear the phase key on every port carrying it.
pub(crate) async fn clear_phase_vifs(task: &mut Task, phase: NetworkPhase) -> NetResult<()> {
    for index in 0..task.ports.len() {
        if task.ports[index].clear_vif(phase).is_some() {
            task.save_port_at(index).await?;
            debug!(port = %task.ports[index].id, phase = %phase, "Cleared VIF key");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmnet_test::{two_pxe_ports, ControllerOp, FailureKind, FakeController, NODE_ID, PROVISIONING_NET};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_network_ids_resolved_once() {
        let fake = FakeController::new().with_network(PROVISIONING_NET, "provisioning");
        let ids = NetworkIds::new(Some("provisioning".to_string()), None);

        assert_eq!(ids.provisioning(&fake).await.unwrap(), PROVISIONING_NET);
        fake.fail(ControllerOp::ListNetworks, FailureKind::Unavailable);
        assert_eq!(ids.provisioning(&fake).await.unwrap(), PROVISIONING_NET);
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unset_network_is_missing_parameter() {
        let fake = FakeController::new();
        let ids = NetworkIds::new(None, None);
        assert!(matches!(
            ids.cleaning(&fake).await,
            Err(NetError::MissingParameter { .. })
        ));
        // Failures are not cached.
        assert!(ids.cleaning(&fake).await.is_err());
    }

    #[tokio::test]
    async fn test_phase_vif_keys() {
        let env = two_pxe_ports();
        let mut task = env.task(NODE_ID).await.unwrap();
        let vifs = BTreeMap::from([("p2".to_string(), "v9".to_string())]);

        persist_phase_vifs(&mut task, NetworkPhase::Cleaning, &vifs)
            .await
            .unwrap();
        let stored = env.stored_port("p2").await.unwrap();
        assert_eq!(stored.vif_for(NetworkPhase::Cleaning), Some("v9"));

        clear_phase_vifs(&mut task, NetworkPhase::Cleaning)
            .await
            .unwrap();
        let stored = env.stored_port("p2").await.unwrap();
        assert_eq!(stored.vif_for(NetworkPhase::Cleaning), None);
    }
}
