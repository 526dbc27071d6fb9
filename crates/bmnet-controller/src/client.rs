//! The controller client seam.

use async_trait::async_trait;
use bmnet_common::NetResult;
use std::sync::Arc;

use crate::types::{NetworkFilter, PortFilter, PortSpec, PortUpdate, VirtualPort};

/// Operations the agent needs from the SDN controller.
///
/// Implementations map transport and authentication failures to
/// `NetError::ControllerUnavailable` and validation failures to
/// `NetError::ControllerRejected`. Nothing is retried.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Create a virtual port.
    async fn create_port(&self, spec: &PortSpec) -> NetResult<VirtualPort>;

    /// Delete a virtual port.
    async fn delete_port(&self, port_id: &str) -> NetResult<()>;

    /// Apply a partial update to a virtual port.
    async fn update_port(&self, port_id: &str, update: &PortUpdate) -> NetResult<VirtualPort>;

    /// Fetch a virtual port. `Ok(None)` when the controller has no such port.
    async fn show_port(&self, port_id: &str) -> NetResult<Option<VirtualPort>>;

    /// List virtual ports matching `filter`.
    async fn list_ports(&self, filter: &PortFilter) -> NetResult<Vec<VirtualPort>>;

    /// Ids of every security group visible to the caller.
    async fn list_security_groups(&self) -> NetResult<Vec<String>>;

    /// Ids of networks matching `filter`.
    async fn list_networks(&self, filter: &NetworkFilter) -> NetResult<Vec<String>>;

    /// A client issuing requests with `token` instead of the session token.
    ///
    /// `None` returns an equivalent client.
    fn scoped(&self, token: Option<&str>) -> Arc<dyn ControllerClient>;
}
