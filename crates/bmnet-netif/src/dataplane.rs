//! Local dataplane for VIFs served by the OVS network interface.

use bmnet_common::{keys, NetError, NetResult, PhysicalPort};
use bmnet_plumber::{bridge_name, veth_names, vlan_subinterface_name, LinkPlumber};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What must be plumbed to serve one VIF on one physical port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPlumbing {
    /// Controller port id
    pub vif: String,
    /// Host device the node's port is cabled to
    pub interface: String,
    /// VLAN isolating the node on that device
    pub vlan: u16,
    /// MAC announced on the switch port
    pub mac: String,
}

impl PortPlumbing {
    /// Read device and VLAN from the port's `extra` attributes.
    pub fn from_port(port: &PhysicalPort, vif: &str) -> NetResult<Self> {
        let (interface, vlan) = host_link(port)?;
        Ok(Self {
            vif: vif.to_string(),
            interface,
            vlan,
            mac: port.address.clone(),
        })
    }

    /// Per-VIF Linux bridge
    pub fn bridge(&self) -> String {
        bridge_name(&self.vif)
    }

    /// (bridge side, switch side) veth ends
    pub fn veth(&self) -> (String, String) {
        veth_names(&self.vif)
    }

    /// VLAN sub-interface on the host device
    pub fn subinterface(&self) -> String {
        vlan_subinterface_name(&self.interface, self.vlan)
    }
}

/// Host device and private VLAN of `port`.
pub fn host_link(port: &PhysicalPort) -> NetResult<(String, u16)> {
    let interface = port
        .extra
        .get(keys::INTERFACE)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            NetError::missing(format!(
                "Port {} has no '{}' in its extra attributes",
                port.id,
                keys::INTERFACE
            ))
        })?;
    let raw_vlan = port.extra.get(keys::PRIVATE_VLAN).ok_or_else(|| {
        NetError::missing(format!(
            "Port {} has no '{}' in its extra attributes",
            port.id,
            keys::PRIVATE_VLAN
        ))
    })?;
    let vlan = raw_vlan.trim().parse::<u16>().map_err(|_| {
        NetError::invalid(format!(
            "Port {} has non-numeric '{}' value '{}'",
            port.id,
            keys::PRIVATE_VLAN,
            raw_vlan
        ))
    })?;
    Ok((interface.clone(), vlan))
}

/// Creates and removes the per-VIF bridge, veth pair and switch port.
#[derive(Clone)]
pub struct Dataplane {
    plumber: Arc<dyn LinkPlumber>,
    integration_bridge: String,
}

impl std::fmt::Debug for Dataplane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataplane")
            .field("integration_bridge", &self.integration_bridge)
            .finish()
    }
}

impl Dataplane {
    pub fn new(plumber: Arc<dyn LinkPlumber>, integration_bridge: impl Into<String>) -> Self {
        Self {
            plumber,
            integration_bridge: integration_bridge.into(),
        }
    }

    pub fn integration_bridge(&self) -> &str {
        &self.integration_bridge
    }

    /// Realize the dataplane for one VIF. Stops at the first failure.
    #[instrument(skip(self, p), fields(vif = %p.vif, dev = %p.interface, vlan = p.vlan))]
    pub async fn plumb(&self, p: &PortPlumbing) -> NetResult<()> {
        let bridge = p.bridge();
        let (bridge_end, switch_end) = p.veth();

        self.plumber.ensure_bridge(&bridge).await?;
        self.plumber.ensure_veth_pair(&bridge_end, &switch_end).await?;
        let subif = self
            .plumber
            .ensure_vlan_subinterface(&p.interface, p.vlan)
            .await?;
        self.plumber.add_to_bridge(&bridge, &subif).await?;
        self.plumber.add_to_bridge(&bridge, &bridge_end).await?;
        self.plumber
            .ensure_switch_port(&self.integration_bridge, &switch_end, &p.vif, &p.mac)
            .await?;

        debug!(bridge = %bridge, "Plumbed VIF");
        Ok(())
    }

    /// Tear down the dataplane for one VIF.
    ///
    /// Every step is attempted; the failed ones are returned.
    #[instrument(skip(self, p), fields(vif = %p.vif))]
    pub async fn unplumb(&self, p: &PortPlumbing) -> Vec<String> {
        let bridge = p.bridge();
        let (bridge_end, switch_end) = p.veth();
        let subif = p.subinterface();
        let mut failures = Vec::new();

        let steps = [
            (
                format!("remove switch port {}", switch_end),
                self.plumber
                    .remove_switch_port(&self.integration_bridge, &switch_end)
                    .await,
            ),
            (
                format!("delete {}", bridge_end),
                self.plumber.remove_device(&bridge_end).await,
            ),
            (
                format!("delete {}", subif),
                self.plumber.remove_device(&subif).await,
            ),
            (
                format!("delete bridge {}", bridge),
                self.plumber.delete_bridge(&bridge).await,
            ),
        ];

        for (step, result) in steps {
            if let Err(e) = result {
                warn!(step = %step, error = %e, "Dataplane teardown step failed");
                failures.push(format!("{}: {}", step, e));
            }
        }
        failures
    }
}
