//! Error types for network attachment operations.
//!
//! Every layer of the agent (controller facade, reconciliation engine,
//! orchestrator, link plumber) reports failures through [`NetError`].
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for network attachment operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors that can occur while reconciling ports with the SDN controller.
#[derive(Debug, Error)]
pub enum NetError {
    /// The controller could not be reached, or refused our credentials.
    #[error("Controller unavailable: {message}")]
    ControllerUnavailable {
        /// Transport or authentication failure detail.
        message: String,
    },

    /// The controller understood the request and rejected it.
    #[error("Controller rejected request (HTTP {status}): {message}")]
    ControllerRejected {
        /// HTTP status returned by the controller.
        status: u16,
        /// Message propagated from the controller.
        message: String,
    },

    /// Domain-level network failure, optionally wrapping the cause.
    #[error("Network error: {message}")]
    Network {
        /// Context for the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<Box<NetError>>,
    },

    /// A policy violation, such as a bootable member of a portgroup that
    /// does not support standalone ports.
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message.
        message: String,
    },

    /// The VIF is already associated with a port of the node.
    #[error("Unable to attach VIF {vif}: already attached to port {port}")]
    AlreadyAttached {
        /// The VIF identifier.
        vif: String,
        /// The port currently carrying it.
        port: String,
    },

    /// The VIF is not associated with any port of the node.
    #[error("Unable to detach VIF {vif}: not attached to node {node}")]
    NotAttached {
        /// The VIF identifier.
        vif: String,
        /// The node identifier.
        node: String,
    },

    /// Every port of the node already carries a VIF.
    #[error("Unable to attach VIF {vif}: not enough free physical ports")]
    InsufficientPorts {
        /// The VIF identifier.
        vif: String,
    },

    /// A required configuration value or argument is missing.
    #[error("Missing parameter: {message}")]
    MissingParameter {
        /// Error message.
        message: String,
    },

    /// A configuration value or argument is invalid.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Error message.
        message: String,
    },

    /// Updating the MAC address of a controller port failed.
    #[error("Failed to update MAC address on controller port {port_id}")]
    MacUpdateFailed {
        /// The controller port identifier.
        port_id: String,
        /// The underlying controller error.
        #[source]
        source: Box<NetError>,
    },

    /// Updating the DHCP options of a controller port failed.
    #[error("Failed to update DHCP options on controller port {port_id}")]
    DhcpUpdateFailed {
        /// The controller port identifier.
        port_id: String,
        /// The underlying controller error.
        #[source]
        source: Box<NetError>,
    },

    /// Local dataplane teardown left devices behind.
    #[error("Dataplane teardown for node {node} incomplete: {}", .failures.join("; "))]
    DataplaneTeardown {
        /// The node identifier.
        node: String,
        /// One entry per failed teardown step.
        failures: Vec<String>,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Object store operation failed.
    #[error("Store operation failed: {operation}: {message}")]
    Store {
        /// The operation that failed (e.g., "save_port", "get_node").
        operation: String,
        /// Error message.
        message: String,
    },

    /// A stored record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// The record kind ("node", "port", ...).
        kind: String,
        /// The identifier looked up.
        id: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl NetError {
    /// Creates a controller unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ControllerUnavailable {
            message: message.into(),
        }
    }

    /// Creates a controller rejected error.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::ControllerRejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error without an underlying cause.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a network error wrapping `source`.
    pub fn network_from(message: impl Into<String>, source: NetError) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a missing parameter error.
    pub fn missing(message: impl Into<String>) -> Self {
        Self::MissingParameter {
            message: message.into(),
        }
    }

    /// Creates an invalid parameter error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Creates a store error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error comes from the controller, whatever its kind.
    pub fn is_controller_error(&self) -> bool {
        matches!(
            self,
            NetError::ControllerUnavailable { .. } | NetError::ControllerRejected { .. }
        )
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    ///
    /// Nothing in the agent retries on its own; callers decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetError::ControllerUnavailable { .. }
                | NetError::Store { .. }
                | NetError::ShellCommandFailed { .. }
        )
    }
}
