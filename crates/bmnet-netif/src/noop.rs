//! Network interface for nodes whose networking is managed elsewhere.

use async_trait::async_trait;
use bmnet_common::{NetResult, Task};
use tracing::debug;

use crate::config::InterfaceKind;
use crate::interface::NetworkInterface;
use crate::vif::VifManager;

/// Keeps VIF bookkeeping; every transition is a no-op.
#[derive(Debug, Clone)]
pub struct NoopNetwork {
    vifs: VifManager,
}

impl Default for NoopNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopNetwork {
    pub fn new() -> Self {
        Self {
            vifs: VifManager::standalone(),
        }
    }
}

#[async_trait]
impl NetworkInterface for NoopNetwork {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Noop
    }

    fn vifs(&self) -> &VifManager {
        &self.vifs
    }

    async fn validate(&self, _task: &Task) -> NetResult<()> {
        Ok(())
    }

    async fn add_provisioning_network(&self, task: &mut Task) -> NetResult<()> {
        debug!(node = %task.node.id, "noop: add provisioning network");
        Ok(())
    }

    async fn remove_provisioning_network(&self, task: &mut Task) -> NetResult<()> {
        debug!(node = %task.node.id, "noop: remove provisioning network");
        Ok(())
    }

    async fn add_cleaning_network(&self, task: &mut Task) -> NetResult<()> {
        debug!(node = %task.node.id, "noop: add cleaning network");
        Ok(())
    }

    async fn remove_cleaning_network(&self, task: &mut Task) -> NetResult<()> {
        debug!(node = %task.node.id, "noop: remove cleaning network");
        Ok(())
    }

    async fn configure_tenant_networks(&self, task: &mut Task) -> NetResult<()> {
        debug!(node = %task.node.id, "noop: configure tenant networks");
        Ok(())
    }

    async fn unconfigure_tenant_networks(&self, task: &mut Task) -> NetResult<()> {
        debug!(node = %task.node.id, "noop: unconfigure tenant networks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmnet_common::VifInfo;
    use bmnet_test::{two_pxe_ports, NODE_ID};

    #[tokio::test]
    async fn test_transitions_leave_ports_untouched() {
        let env = two_pxe_ports();
        let net = NoopNetwork::new();
        let mut task = env.task(NODE_ID).await.unwrap();
        let before = env.store.snapshot();

        net.validate(&task).await.unwrap();
        net.add_provisioning_network(&mut task).await.unwrap();
        net.add_cleaning_network(&mut task).await.unwrap();
        net.configure_tenant_networks(&mut task).await.unwrap();

        assert_eq!(env.store.snapshot().ports, before.ports);
        assert!(env.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_vif_bookkeeping_without_controller() {
        let env = two_pxe_ports();
        let net = NoopNetwork::new();
        let mut task = env.task(NODE_ID).await.unwrap();

        net.vif_attach(&mut task, &VifInfo::new("v1")).await.unwrap();
        assert_eq!(net.vif_list(&task), vec![VifInfo::new("v1")]);
        net.vif_detach(&mut task, "v1").await.unwrap();
        assert!(net.vif_list(&task).is_empty());
    }
}
