//! bmnetd - network attachment agent for bare-metal nodes
//!
//! Loads a node inventory, picks the network interface configured for each
//! node and runs one operation per invocation:
//! - VIF attach, detach and listing
//! - port and portgroup update checks
//! - provisioning, cleaning and tenant network transitions
//! - vNIC passthru methods

pub mod agent;
pub mod cli;
pub mod config;
pub mod inventory;
pub mod logging;

pub use agent::{Agent, UnmanagedHardware};
pub use cli::Command;
pub use config::{AgentConfig, LogFormat, DEFAULT_CONFIG_PATH};
pub use inventory::InventoryFile;
pub use logging::init_logging;
