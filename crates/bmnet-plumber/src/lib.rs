//! Local link plumbing for bare-metal VIFs.
//!
//! Each VIF served by the OVS network interface gets its own Linux bridge
//! joining the node's VLAN sub-interface to one end of a veth pair; the other
//! end is added to the OVS integration bridge tagged with the controller port
//! id:
//!
//! ```text
//!   eth2.101 ──┐
//!              irbr-<vif> ── irp1-<vif> ══ irp2-<vif> ── br-int
//! ```

pub mod commands;
pub mod plumber;

pub use commands::{bridge_name, veth_names, vlan_subinterface_name, DEFAULT_INTEGRATION_BRIDGE};
pub use plumber::{LinkPlumber, ShellLinkPlumber, DEFAULT_SYSFS_NET_ROOT};
