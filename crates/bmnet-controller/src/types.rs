//! Wire types for the controller's port, security group and network APIs.
//!
//! Field names follow the controller's JSON exactly, including the
//! `binding:` prefixed extension attributes.

use bmnet_common::LocalLinkConnection;
use serde::{Deserialize, Serialize};

/// `binding:vnic_type` for bare-metal ports.
pub const VNIC_TYPE_BAREMETAL: &str = "baremetal";

/// `device_owner` for ports created on behalf of a bare-metal node.
pub const DEVICE_OWNER_BAREMETAL: &str = "baremetal:none";

/// DHCP option name carrying the client identifier.
pub const DHCP_OPT_CLIENT_ID: &str = "client-id";

/// `binding:profile` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingProfile {
    /// Switch ports the bare-metal NIC is cabled to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_link_information: Vec<LocalLinkConnection>,
}

impl BindingProfile {
    /// Profile describing a single link
    pub fn for_link(link: &LocalLinkConnection) -> Self {
        Self {
            local_link_information: vec![link.clone()],
        }
    }
}

/// One entry of `extra_dhcp_opts`. A `null` value removes the option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpOption {
    /// Option name
    pub opt_name: String,
    /// Option value; `None` deletes the option on update
    pub opt_value: Option<String>,
}

impl DhcpOption {
    /// `client-id` option, or its removal when `value` is `None`
    pub fn client_id(value: Option<&str>) -> Self {
        Self {
            opt_name: DHCP_OPT_CLIENT_ID.to_string(),
            opt_value: value.map(str::to_string),
        }
    }
}

/// Body of a port creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Network the port is created on
    pub network_id: String,
    /// Administrative state
    pub admin_state_up: bool,
    /// MAC address of the physical NIC
    pub mac_address: String,
    /// Owner tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_owner: Option<String>,
    /// Instance or node the port belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// vNIC type
    #[serde(
        rename = "binding:vnic_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vnic_type: Option<String>,
    /// Host the port is bound to
    #[serde(
        rename = "binding:host_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub host_id: Option<String>,
    /// Binding profile
    #[serde(
        rename = "binding:profile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile: Option<BindingProfile>,
    /// DHCP options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_dhcp_opts: Vec<DhcpOption>,
    /// Security groups; omitted to take the network default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,
}

impl PortSpec {
    /// Minimal admin-up port for `mac_address` on `network_id`
    pub fn new(network_id: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            admin_state_up: true,
            mac_address: mac_address.into(),
            device_owner: None,
            device_id: None,
            vnic_type: None,
            host_id: None,
            profile: None,
            extra_dhcp_opts: Vec::new(),
            security_groups: None,
        }
    }

    /// Builder: set the device owner and id
    pub fn with_device(mut self, owner: impl Into<String>, id: impl Into<String>) -> Self {
        self.device_owner = Some(owner.into());
        self.device_id = Some(id.into());
        self
    }

    /// Builder: bare-metal vNIC type with `link` as binding profile
    pub fn with_baremetal_binding(mut self, link: &LocalLinkConnection) -> Self {
        self.vnic_type = Some(VNIC_TYPE_BAREMETAL.to_string());
        self.profile = Some(BindingProfile::for_link(link));
        self
    }

    /// Builder: bind to `host`
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host_id = Some(host.into());
        self
    }

    /// Builder: add a DHCP option
    pub fn with_dhcp_opt(mut self, opt: DhcpOption) -> Self {
        self.extra_dhcp_opts.push(opt);
        self
    }

    /// Builder: request security groups; an empty list is omitted
    pub fn with_security_groups(mut self, groups: &[String]) -> Self {
        if !groups.is_empty() {
            self.security_groups = Some(groups.to_vec());
        }
        self
    }
}

/// A port as reported by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualPort {
    /// Port id
    pub id: String,
    /// Network id
    #[serde(default)]
    pub network_id: String,
    /// MAC address
    #[serde(default)]
    pub mac_address: String,
    /// Administrative state
    #[serde(default)]
    pub admin_state_up: bool,
    /// Owner tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_owner: Option<String>,
    /// Device id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// vNIC type
    #[serde(
        rename = "binding:vnic_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vnic_type: Option<String>,
    /// Bound host; empty or absent when unbound
    #[serde(
        rename = "binding:host_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub host_id: Option<String>,
    /// Binding profile
    #[serde(
        rename = "binding:profile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile: Option<BindingProfile>,
    /// Security groups
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// DHCP options
    #[serde(default)]
    pub extra_dhcp_opts: Vec<DhcpOption>,
}

impl VirtualPort {
    /// The bound host, if the port is bound
    pub fn bound_host(&self) -> Option<&str> {
        self.host_id.as_deref().filter(|h| !h.is_empty())
    }
}

/// Partial update of a port. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortUpdate {
    /// New MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// New device id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// New vNIC type
    #[serde(
        rename = "binding:vnic_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub vnic_type: Option<String>,
    /// New bound host; `Some("")` unbinds
    #[serde(
        rename = "binding:host_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub host_id: Option<String>,
    /// New binding profile; `Some(default)` clears it
    #[serde(
        rename = "binding:profile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile: Option<BindingProfile>,
    /// DHCP option changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_dhcp_opts: Option<Vec<DhcpOption>>,
}

impl PortUpdate {
    /// Clear the binding host and profile
    pub fn unbind() -> Self {
        Self {
            host_id: Some(String::new()),
            profile: Some(BindingProfile::default()),
            ..Default::default()
        }
    }

    /// Change the MAC address
    pub fn mac(address: impl Into<String>) -> Self {
        Self {
            mac_address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Replace DHCP options
    pub fn dhcp_opts(opts: Vec<DhcpOption>) -> Self {
        Self {
            extra_dhcp_opts: Some(opts),
            ..Default::default()
        }
    }
}

/// Query filter for listing ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortFilter {
    /// Restrict to one network
    pub network_id: Option<String>,
    /// Restrict to any of these MACs
    pub mac_addresses: Vec<String>,
    /// Restrict to one device
    pub device_id: Option<String>,
}

impl PortFilter {
    /// Ports on `network_id`
    pub fn on_network(network_id: impl Into<String>) -> Self {
        Self {
            network_id: Some(network_id.into()),
            ..Default::default()
        }
    }

    /// Builder: restrict to `macs`
    pub fn with_macs<I, S>(mut self, macs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mac_addresses.extend(macs.into_iter().map(Into::into));
        self
    }

    /// Query string pairs; `mac_address` repeats once per MAC
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(net) = &self.network_id {
            query.push(("network_id", net.clone()));
        }
        for mac in &self.mac_addresses {
            query.push(("mac_address", mac.clone()));
        }
        if let Some(dev) = &self.device_id {
            query.push(("device_id", dev.clone()));
        }
        query
    }
}

/// Query filter for listing networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkFilter {
    /// Match by id
    Id(String),
    /// Match by name
    Name(String),
}

impl NetworkFilter {
    /// Query string pairs
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        match self {
            NetworkFilter::Id(id) => vec![("id", id.clone())],
            NetworkFilter::Name(name) => vec![("name", name.clone())],
        }
    }
}

/// `{"port": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PortEnvelope<T> {
    pub port: T,
}

/// `{"ports": [...]}`
#[derive(Debug, Deserialize)]
pub(crate) struct PortsEnvelope {
    #[serde(default)]
    pub ports: Vec<VirtualPort>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IdOnly {
    pub id: String,
}

/// `{"security_groups": [...]}`
#[derive(Debug, Deserialize)]
pub(crate) struct SecurityGroupsEnvelope {
    #[serde(default)]
    pub security_groups: Vec<IdOnly>,
}

/// `{"networks": [...]}`
#[derive(Debug, Deserialize)]
pub(crate) struct NetworksEnvelope {
    #[serde(default)]
    pub networks: Vec<IdOnly>,
}

/// `{"NeutronError": {"message": ...}}`
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(rename = "NeutronError")]
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_port_spec_wire_names() {
        let link = LocalLinkConnection::new("0a:1b:2c:3d:4e:5f", "Ethernet3/1");
        let spec = PortSpec::new("net-1", "52:54:00:cf:2d:32")
            .with_device(DEVICE_OWNER_BAREMETAL, "inst-1")
            .with_baremetal_binding(&link)
            .with_host("node-1");

        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({
                "network_id": "net-1",
                "admin_state_up": true,
                "mac_address": "52:54:00:cf:2d:32",
                "device_owner": "baremetal:none",
                "device_id": "inst-1",
                "binding:vnic_type": "baremetal",
                "binding:host_id": "node-1",
                "binding:profile": {
                    "local_link_information": [
                        {"switch_id": "0a:1b:2c:3d:4e:5f", "port_id": "Ethernet3/1"}
                    ]
                }
            })
        );
    }

    #[test]
    fn test_empty_security_groups_are_omitted() {
        let spec = PortSpec::new("net-1", "aa:bb:cc:dd:ee:ff").with_security_groups(&[]);
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("security_groups").is_none());
    }

    #[test]
    fn test_unbind_body() {
        assert_eq!(
            serde_json::to_value(PortUpdate::unbind()).unwrap(),
            json!({"binding:host_id": "", "binding:profile": {}})
        );
    }

    #[test]
    fn test_dhcp_option_removal_serializes_null() {
        let update = PortUpdate::dhcp_opts(vec![DhcpOption::client_id(None)]);
        assert_eq!(
            serde_json::to_value(update).unwrap(),
            json!({"extra_dhcp_opts": [{"opt_name": "client-id", "opt_value": null}]})
        );
    }

    #[test]
    fn test_port_filter_repeats_mac() {
        let filter = PortFilter::on_network("net-1").with_macs(["m1", "m2"]);
        assert_eq!(
            filter.to_query(),
            vec![
                ("network_id", "net-1".to_string()),
                ("mac_address", "m1".to_string()),
                ("mac_address", "m2".to_string()),
            ]
        );
    }

    #[test]
    fn test_virtual_port_bound_host() {
        let mut port: VirtualPort =
            serde_json::from_value(json!({"id": "v1", "binding:host_id": ""})).unwrap();
        assert_eq!(port.bound_host(), None);
        port.host_id = Some("agent-1".to_string());
        assert_eq!(port.bound_host(), Some("agent-1"));
    }
}
