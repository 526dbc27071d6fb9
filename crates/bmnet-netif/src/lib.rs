//! Network attachment for bare-metal nodes.
//!
//! A [`NetworkInterface`] moves a node between its provisioning, cleaning
//! and tenant networks and keeps track of which VIF each physical port
//! carries. Three variants exist:
//!
//! - [`OvsNetwork`]: controller ports realized locally through OVS
//! - [`ControllerNetwork`]: controller ports bound through the switch fabric
//! - [`NoopNetwork`]: VIF bookkeeping only
//!
//! [`InterfaceRegistry`] picks the variant for each node.

pub mod binding;
pub mod config;
pub mod dataplane;
pub mod interface;
pub mod noop;
pub mod ovs;
pub mod passthru;
pub mod ports;
pub mod sdn;
pub mod vif;

pub use config::{InterfaceKind, NetworkConfig};
pub use dataplane::{Dataplane, PortPlumbing};
pub use interface::{NetworkIds, NetworkInterface};
pub use noop::NoopNetwork;
pub use ovs::OvsNetwork;
pub use passthru::{PassthruMethod, PowerControl, PowerState, VnicPassthru, VnicProvisioner};
pub use sdn::ControllerNetwork;
pub use vif::VifManager;

use bmnet_common::{NetError, NetResult, Node};
use bmnet_controller::ControllerClient;
use bmnet_plumber::LinkPlumber;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Collaborators the interface variants are built from.
#[derive(Clone, Default)]
pub struct InterfaceDeps {
    /// Controller API; required by `ovs` and `controller`
    pub client: Option<Arc<dyn ControllerClient>>,
    /// Local link plumbing; required by `ovs`
    pub plumber: Option<Arc<dyn LinkPlumber>>,
}

/// Build the `kind` variant.
pub fn build_network_interface(
    kind: InterfaceKind,
    config: &NetworkConfig,
    deps: &InterfaceDeps,
) -> NetResult<Arc<dyn NetworkInterface>> {
    let client = || {
        deps.client.clone().ok_or_else(|| {
            NetError::invalid(format!("network interface '{}' needs a controller", kind))
        })
    };

    Ok(match kind {
        InterfaceKind::Noop => Arc::new(NoopNetwork::new()),
        InterfaceKind::Controller => Arc::new(ControllerNetwork::new(client()?, config)),
        InterfaceKind::Ovs => {
            let plumber = deps.plumber.clone().ok_or_else(|| {
                NetError::invalid("network interface 'ovs' needs a link plumber")
            })?;
            Arc::new(OvsNetwork::new(client()?, plumber, config)?)
        }
    })
}

/// One interface instance per enabled variant.
pub struct InterfaceRegistry {
    default: InterfaceKind,
    interfaces: HashMap<InterfaceKind, Arc<dyn NetworkInterface>>,
}

impl std::fmt::Debug for InterfaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut enabled: Vec<_> = self.interfaces.keys().map(InterfaceKind::as_str).collect();
        enabled.sort_unstable();
        f.debug_struct("InterfaceRegistry")
            .field("default", &self.default)
            .field("enabled", &enabled)
            .finish()
    }
}

impl InterfaceRegistry {
    /// Enable every variant `deps` can support; the configured default
    /// must be among them.
    pub fn new(config: &NetworkConfig, deps: &InterfaceDeps) -> NetResult<Self> {
        let mut interfaces = HashMap::new();
        for kind in [InterfaceKind::Noop, InterfaceKind::Controller, InterfaceKind::Ovs] {
            match build_network_interface(kind, config, deps) {
                Ok(iface) => {
                    interfaces.insert(kind, iface);
                }
                Err(e) if kind == config.interface => return Err(e),
                Err(e) => debug!(interface = %kind, reason = %e, "Network interface not enabled"),
            }
        }
        Ok(Self {
            default: config.interface,
            interfaces,
        })
    }

    /// Interface named on the node, or the default.
    pub fn for_node(&self, node: &Node) -> NetResult<Arc<dyn NetworkInterface>> {
        let kind = match node.network_interface.as_deref() {
            Some(name) => name.parse()?,
            None => self.default,
        };
        self.interfaces.get(&kind).cloned().ok_or_else(|| {
            NetError::invalid(format!(
                "network interface '{}' of node {} is not enabled",
                kind, node.id
            ))
        })
    }
}
