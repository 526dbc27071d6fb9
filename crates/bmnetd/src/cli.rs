//! Subcommands accepted by bmnetd

use clap::Subcommand;
use std::path::PathBuf;

/// One network operation against a single node.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check that the node's ports and the configured networks are usable
    Validate {
        /// Node id
        node: String,
    },

    /// Attach a VIF to a free port of the node
    VifAttach { node: String, vif: String },

    /// Detach a VIF from the node
    VifDetach { node: String, vif: String },

    /// List VIFs attached to the node
    VifList { node: String },

    /// Show the VIF currently bound to a port
    CurrentVif { node: String, port: String },

    /// Check and apply an updated port record read from a JSON file
    PortChanged {
        node: String,
        /// Updated port, as JSON
        file: PathBuf,
    },

    /// Check and apply an updated portgroup record read from a JSON file
    PortgroupChanged {
        node: String,
        /// Updated portgroup, as JSON
        file: PathBuf,
    },

    /// Put the node's PXE ports on the provisioning network
    AddProvisioningNetwork { node: String },

    /// Take the node off the provisioning network
    RemoveProvisioningNetwork { node: String },

    /// Put the node's PXE ports on the cleaning network
    AddCleaningNetwork { node: String },

    /// Take the node off the cleaning network
    RemoveCleaningNetwork { node: String },

    /// Bind the node's tenant VIFs
    ConfigureTenantNetworks { node: String },

    /// Unbind the node's tenant VIFs
    UnconfigureTenantNetworks { node: String },

    /// Call a vendor passthru method
    Passthru {
        node: String,
        /// add_vnic, is_vnic_created or delete_vnic
        method: String,
        /// Method arguments, as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
}

impl Command {
    /// Node the command operates on
    pub fn node_id(&self) -> &str {
        match self {
            Command::Validate { node }
            | Command::VifAttach { node, .. }
            | Command::VifDetach { node, .. }
            | Command::VifList { node }
            | Command::CurrentVif { node, .. }
            | Command::PortChanged { node, .. }
            | Command::PortgroupChanged { node, .. }
            | Command::AddProvisioningNetwork { node }
            | Command::RemoveProvisioningNetwork { node }
            | Command::AddCleaningNetwork { node }
            | Command::RemoveCleaningNetwork { node }
            | Command::ConfigureTenantNetworks { node }
            | Command::UnconfigureTenantNetworks { node }
            | Command::Passthru { node, .. } => node,
        }
    }

    /// Whether the command can change the inventory
    pub fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Validate { .. } | Command::VifList { .. } | Command::CurrentVif { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Validate { .. } => "validate",
            Command::VifAttach { .. } => "vif-attach",
            Command::VifDetach { .. } => "vif-detach",
            Command::VifList { .. } => "vif-list",
            Command::CurrentVif { .. } => "current-vif",
            Command::PortChanged { .. } => "port-changed",
            Command::PortgroupChanged { .. } => "portgroup-changed",
            Command::AddProvisioningNetwork { .. } => "add-provisioning-network",
            Command::RemoveProvisioningNetwork { .. } => "remove-provisioning-network",
            Command::AddCleaningNetwork { .. } => "add-cleaning-network",
            Command::RemoveCleaningNetwork { .. } => "remove-cleaning-network",
            Command::ConfigureTenantNetworks { .. } => "configure-tenant-networks",
            Command::UnconfigureTenantNetworks { .. } => "unconfigure-tenant-networks",
            Command::Passthru { .. } => "passthru",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("bmnetd").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_parse_subcommands() {
        assert_eq!(
            parse(&["vif-attach", "n1", "v1"]),
            Command::VifAttach {
                node: "n1".to_string(),
                vif: "v1".to_string()
            }
        );
        assert_eq!(
            parse(&["add-provisioning-network", "n1"]),
            Command::AddProvisioningNetwork {
                node: "n1".to_string()
            }
        );

        let passthru = parse(&["passthru", "n1", "is_vnic_created"]);
        assert_eq!(
            passthru,
            Command::Passthru {
                node: "n1".to_string(),
                method: "is_vnic_created".to_string(),
                args: "{}".to_string()
            }
        );
        assert_eq!(passthru.node_id(), "n1");
        assert_eq!(passthru.name(), "passthru");
    }

    #[test]
    fn test_read_only_commands() {
        assert!(!parse(&["vif-list", "n1"]).mutates());
        assert!(!parse(&["current-vif", "n1", "p1"]).mutates());
        assert!(parse(&["vif-detach", "n1", "v1"]).mutates());
    }

    #[test]
    fn test_missing_argument_is_rejected() {
        assert!(Cli::try_parse_from(["bmnetd", "vif-attach", "n1"]).is_err());
    }
}
