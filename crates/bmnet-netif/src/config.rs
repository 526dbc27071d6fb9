//! Network interface settings.

use bmnet_common::{NetError, NetResult};
use bmnet_plumber::DEFAULT_INTEGRATION_BRIDGE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which network interface variant manages a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Controller ports plus local OVS plumbing
    Ovs,
    /// Controller ports bound to the node through the switch fabric
    Controller,
    /// No network management
    Noop,
}

impl InterfaceKind {
    /// Variant name as used in configuration and on nodes
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Ovs => "ovs",
            InterfaceKind::Controller => "controller",
            InterfaceKind::Noop => "noop",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceKind {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ovs" => Ok(InterfaceKind::Ovs),
            "controller" | "neutron" => Ok(InterfaceKind::Controller),
            "noop" => Ok(InterfaceKind::Noop),
            other => Err(NetError::invalid(format!(
                "unknown network interface '{}'",
                other
            ))),
        }
    }
}

fn default_interface() -> InterfaceKind {
    InterfaceKind::Ovs
}

fn default_integration_bridge() -> String {
    DEFAULT_INTEGRATION_BRIDGE.to_string()
}

/// `[network]` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Default interface for nodes that do not name one
    #[serde(default = "default_interface")]
    pub interface: InterfaceKind,

    /// Provisioning network, by UUID or name
    #[serde(default)]
    pub provisioning_network: Option<String>,

    /// Cleaning network, by UUID or name
    #[serde(default)]
    pub cleaning_network: Option<String>,

    /// Security groups applied to provisioning ports
    #[serde(default)]
    pub provisioning_security_groups: Vec<String>,

    /// Security groups applied to cleaning ports
    #[serde(default)]
    pub cleaning_security_groups: Vec<String>,

    /// OVS integration bridge
    #[serde(default = "default_integration_bridge")]
    pub integration_bridge: String,

    /// Host name ports are bound to by the OVS interface; the system host
    /// name when unset
    #[serde(default)]
    pub host_name: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            provisioning_network: None,
            cleaning_network: None,
            provisioning_security_groups: Vec::new(),
            cleaning_security_groups: Vec::new(),
            integration_bridge: default_integration_bridge(),
            host_name: None,
        }
    }
}

impl NetworkConfig {
    /// Configured host name, falling back to the system host name.
    pub fn resolved_host_name(&self) -> NetResult<String> {
        if let Some(name) = self.host_name.as_ref().filter(|n| !n.is_empty()) {
            return Ok(name.clone());
        }
        nix::unistd::gethostname()
            .map_err(|e| NetError::internal(format!("cannot read system host name: {}", e)))?
            .into_string()
            .map_err(|_| NetError::internal("system host name is not valid UTF-8"))
    }

    /// Static checks; network existence is checked by the interfaces.
    pub fn validate(&self) -> NetResult<()> {
        if self.integration_bridge.is_empty() {
            return Err(NetError::invalid("integration_bridge must not be empty"));
        }
        for group in self
            .provisioning_security_groups
            .iter()
            .chain(&self.cleaning_security_groups)
        {
            if group.trim().is_empty() {
                return Err(NetError::invalid("security group ids must not be empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_kind_parse() {
        assert_eq!("ovs".parse::<InterfaceKind>().unwrap(), InterfaceKind::Ovs);
        assert_eq!(
            "neutron".parse::<InterfaceKind>().unwrap(),
            InterfaceKind::Controller
        );
        assert!("flat".parse::<InterfaceKind>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.interface, InterfaceKind::Ovs);
        assert_eq!(config.integration_bridge, "br-int");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configured_host_name_wins() {
        let config = NetworkConfig {
            host_name: Some("agent-7".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolved_host_name().unwrap(), "agent-7");
    }

    #[test]
    fn test_system_host_name_fallback() {
        let name = NetworkConfig::default().resolved_host_name().unwrap();
        assert!(!name.is_empty());
    }

    #[test]
    fn test_blank_security_group_rejected() {
        let config = NetworkConfig {
            cleaning_security_groups: vec![" ".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
