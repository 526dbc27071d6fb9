//! The [`LinkPlumber`] seam and its shell implementation.

use async_trait::async_trait;
use bmnet_common::{shell, NetResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::commands::{self, LINK_ABSENT_EXIT_CODES};

/// Default sysfs directory listing network devices
pub const DEFAULT_SYSFS_NET_ROOT: &str = "/sys/class/net";

/// Host-side link primitives used to realize a VIF's dataplane.
///
/// Destructive primitives succeed when the device is already absent.
#[async_trait]
pub trait LinkPlumber: Send + Sync {
    /// Returns true if the network device exists.
    async fn device_exists(&self, dev: &str) -> bool;

    /// Create and bring up a Linux bridge unless it already exists.
    async fn ensure_bridge(&self, bridge: &str) -> NetResult<()>;

    /// Bring down and delete a Linux bridge if it exists.
    async fn delete_bridge(&self, bridge: &str) -> NetResult<()>;

    /// Recreate a veth pair: both ends are deleted first, then the pair is
    /// added and each end set up and promiscuous.
    async fn ensure_veth_pair(&self, dev1: &str, dev2: &str) -> NetResult<()>;

    /// Create and bring up `<dev>.<vlan>`; returns its name.
    async fn ensure_vlan_subinterface(&self, dev: &str, vlan: u16) -> NetResult<String>;

    /// Enslave `iface` to `bridge` unless it is already a member.
    async fn add_to_bridge(&self, bridge: &str, iface: &str) -> NetResult<()>;

    /// Add `dev` to the OVS `bridge` tagged with the controller port id and MAC.
    async fn ensure_switch_port(
        &self,
        bridge: &str,
        dev: &str,
        iface_id: &str,
        mac: &str,
    ) -> NetResult<()>;

    /// Remove `dev` from the OVS `bridge`.
    async fn remove_switch_port(&self, bridge: &str, dev: &str) -> NetResult<()>;

    /// Delete a network device if it exists.
    async fn remove_device(&self, dev: &str) -> NetResult<()>;
}

/// [`LinkPlumber`] driving `ip`, `brctl` and `ovs-vsctl`.
#[derive(Debug)]
pub struct ShellLinkPlumber {
    sysfs_net_root: PathBuf,

    /// Mock mode for testing
    #[cfg(test)]
    mock_mode: bool,

    /// Captured commands in mock mode
    #[cfg(test)]
    captured_commands: parking_lot::Mutex<Vec<String>>,
}

impl Default for ShellLinkPlumber {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_NET_ROOT)
    }
}

impl ShellLinkPlumber {
    /// Plumber checking device existence under `sysfs_net_root`
    pub fn new(sysfs_net_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_net_root: sysfs_net_root.into(),
            #[cfg(test)]
            mock_mode: false,
            #[cfg(test)]
            captured_commands: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// The sysfs directory consulted by [`LinkPlumber::device_exists`]
    pub fn sysfs_net_root(&self) -> &Path {
        &self.sysfs_net_root
    }

    /// Enables mock mode for testing
    #[cfg(test)]
    pub fn with_mock_mode(mut self) -> Self {
        self.mock_mode = true;
        self
    }

    /// Gets captured commands (for testing)
    #[cfg(test)]
    pub fn captured_commands(&self) -> Vec<String> {
        self.captured_commands.lock().clone()
    }

    /// Execute a shell command (with mock mode support)
    async fn exec(&self, cmd: &str) -> NetResult<()> {
        self.exec_accepting(cmd, &[0]).await
    }

    async fn exec_accepting(&self, cmd: &str, accepted: &[i32]) -> NetResult<()> {
        #[cfg(test)]
        if self.mock_mode {
            self.captured_commands.lock().push(cmd.to_string());
            debug!("Mock exec: {}", cmd);
            return Ok(());
        }

        shell::exec_accepting(cmd, accepted).await?;
        Ok(())
    }

    /// Whether `iface` is listed under the bridge's `brif` directory.
    async fn is_bridge_member(&self, bridge: &str, iface: &str) -> bool {
        tokio::fs::try_exists(self.sysfs_net_root.join(bridge).join("brif").join(iface))
            .await
            .unwrap_or(false)
    }

    async fn delete_link(&self, dev: &str) -> NetResult<()> {
        if !self.device_exists(dev).await {
            return Ok(());
        }
        self.exec_accepting(&commands::build_link_delete_cmd(dev), LINK_ABSENT_EXIT_CODES)
            .await
    }
}

#[async_trait]
impl LinkPlumber for ShellLinkPlumber {
    async fn device_exists(&self, dev: &str) -> bool {
        tokio::fs::try_exists(self.sysfs_net_root.join(dev))
            .await
            .unwrap_or(false)
    }

    async fn ensure_bridge(&self, bridge: &str) -> NetResult<()> {
        if self.device_exists(bridge).await {
            debug!(bridge = %bridge, "Bridge already exists");
            return Ok(());
        }
        self.exec(&commands::build_add_bridge_cmd(bridge)).await?;
        self.exec(&commands::build_link_up_cmd(bridge)).await?;
        info!(bridge = %bridge, "Created bridge");
        Ok(())
    }

    async fn delete_bridge(&self, bridge: &str) -> NetResult<()> {
        if !self.device_exists(bridge).await {
            return Ok(());
        }
        self.exec(&commands::build_link_down_cmd(bridge)).await?;
        self.exec(&commands::build_del_bridge_cmd(bridge)).await?;
        info!(bridge = %bridge, "Deleted bridge");
        Ok(())
    }

    async fn ensure_veth_pair(&self, dev1: &str, dev2: &str) -> NetResult<()> {
        for dev in [dev1, dev2] {
            self.delete_link(dev).await?;
        }
        self.exec(&commands::build_add_veth_cmd(dev1, dev2)).await?;
        for dev in [dev1, dev2] {
            self.exec(&commands::build_link_up_cmd(dev)).await?;
            self.exec(&commands::build_promisc_on_cmd(dev)).await?;
        }
        debug!(dev1 = %dev1, dev2 = %dev2, "Created veth pair");
        Ok(())
    }

    async fn ensure_vlan_subinterface(&self, dev: &str, vlan: u16) -> NetResult<String> {
        let name = commands::vlan_subinterface_name(dev, vlan);
        if !self.device_exists(&name).await {
            self.exec(&commands::build_add_vlan_cmd(dev, &name, vlan))
                .await?;
        }
        self.exec(&commands::build_link_up_cmd(&name)).await?;
        debug!(dev = %dev, vlan = vlan, name = %name, "VLAN sub-interface ready");
        Ok(name)
    }

    async fn add_to_bridge(&self, bridge: &str, iface: &str) -> NetResult<()> {
        // brctl addif fails on an interface that is already enslaved.
        if self.is_bridge_member(bridge, iface).await {
            debug!(bridge = %bridge, iface = %iface, "Already a bridge member");
            return Ok(());
        }
        self.exec(&commands::build_bridge_addif_cmd(bridge, iface))
            .await
    }

    async fn ensure_switch_port(
        &self,
        bridge: &str,
        dev: &str,
        iface_id: &str,
        mac: &str,
    ) -> NetResult<()> {
        self.exec(&commands::build_ovs_add_port_cmd(bridge, dev, iface_id, mac))
            .await?;
        info!(bridge = %bridge, dev = %dev, vif = %iface_id, "Bound switch port");
        Ok(())
    }

    async fn remove_switch_port(&self, bridge: &str, dev: &str) -> NetResult<()> {
        self.exec(&commands::build_ovs_del_port_cmd(bridge, dev))
            .await
    }

    async fn remove_device(&self, dev: &str) -> NetResult<()> {
        self.delete_link(dev).await
    }
}
