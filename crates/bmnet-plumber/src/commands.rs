//! Shell command builders and device naming for VIF plumbing

use bmnet_common::shell::{self, shellquote};

/// Linux bridge prefix
pub const BRIDGE_PREFIX: &str = "irbr-";

/// Bridge-side veth prefix
pub const VETH_BRIDGE_PREFIX: &str = "irp1-";

/// Switch-side veth prefix
pub const VETH_SWITCH_PREFIX: &str = "irp2-";

/// Default OVS integration bridge
pub const DEFAULT_INTEGRATION_BRIDGE: &str = "br-int";

/// `ip link delete` exit codes meaning the device was already gone
pub const LINK_ABSENT_EXIT_CODES: &[i32] = &[0, 2, 254];

/// VIF id up to its first `-`
fn vif_prefix(vif: &str) -> &str {
    vif.split('-').next().unwrap_or(vif)
}

/// Linux bridge name for `vif`
pub fn bridge_name(vif: &str) -> String {
    format!("{}{}", BRIDGE_PREFIX, vif_prefix(vif))
}

/// veth pair names for `vif`: (bridge side, switch side)
pub fn veth_names(vif: &str) -> (String, String) {
    let prefix = vif_prefix(vif);
    (
        format!("{}{}", VETH_BRIDGE_PREFIX, prefix),
        format!("{}{}", VETH_SWITCH_PREFIX, prefix),
    )
}

/// VLAN sub-interface name
pub fn vlan_subinterface_name(dev: &str, vlan: u16) -> String {
    format!("{}.{}", dev, vlan)
}

/// Build bridge creation command
pub fn build_add_bridge_cmd(bridge: &str) -> String {
    format!("{} addbr {}", shell::BRCTL_CMD, shellquote(bridge))
}

/// Build bridge deletion command
pub fn build_del_bridge_cmd(bridge: &str) -> String {
    format!("{} delbr {}", shell::BRCTL_CMD, shellquote(bridge))
}

/// Build bridge member add command
pub fn build_bridge_addif_cmd(bridge: &str, iface: &str) -> String {
    format!(
        "{} addif {} {}",
        shell::BRCTL_CMD,
        shellquote(bridge),
        shellquote(iface)
    )
}

/// Build link admin-up command
pub fn build_link_up_cmd(dev: &str) -> String {
    format!("{} link set {} up", shell::IP_CMD, shellquote(dev))
}

/// Build link admin-down command
pub fn build_link_down_cmd(dev: &str) -> String {
    format!("{} link set {} down", shell::IP_CMD, shellquote(dev))
}

/// Build promiscuous mode command
pub fn build_promisc_on_cmd(dev: &str) -> String {
    format!("{} link set {} promisc on", shell::IP_CMD, shellquote(dev))
}

/// Build link deletion command
pub fn build_link_delete_cmd(dev: &str) -> String {
    format!("{} link delete {}", shell::IP_CMD, shellquote(dev))
}

/// Build veth pair creation command
pub fn build_add_veth_cmd(dev1: &str, dev2: &str) -> String {
    format!(
        "{} link add {} type veth peer name {}",
        shell::IP_CMD,
        shellquote(dev1),
        shellquote(dev2)
    )
}

/// Build VLAN sub-interface creation command
pub fn build_add_vlan_cmd(dev: &str, name: &str, vlan: u16) -> String {
    format!(
        "{} link add link {} name {} type vlan id {}",
        shell::IP_CMD,
        shellquote(dev),
        shellquote(name),
        vlan
    )
}

/// Build OVS port creation command.
///
/// A stale port of the same name is removed in the same transaction.
pub fn build_ovs_add_port_cmd(bridge: &str, dev: &str, iface_id: &str, mac: &str) -> String {
    format!(
        "{} -- --if-exists del-port {} -- add-port {} {} -- set Interface {} \
         external-ids:iface-id={} external-ids:iface-status=active \
         external-ids:attached-mac={}",
        shell::OVS_VSCTL_CMD,
        shellquote(dev),
        shellquote(bridge),
        shellquote(dev),
        shellquote(dev),
        shellquote(iface_id),
        shellquote(mac)
    )
}

/// Build OVS port removal command
pub fn build_ovs_del_port_cmd(bridge: &str, dev: &str) -> String {
    format!(
        "{} --if-exists del-port {} {}",
        shell::OVS_VSCTL_CMD,
        shellquote(bridge),
        shellquote(dev)
    )
}
