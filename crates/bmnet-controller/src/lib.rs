//! SDN controller client facade.
//!
//! - [`client`]: the [`ControllerClient`] trait consumed by the reconciliation engine
//! - [`session`]: [`ControllerSession`], the owned, lazily authenticated session
//! - [`http`]: [`HttpControllerClient`], the reqwest implementation
//! - [`types`]: wire types (port specs, updates, filters)
//!
//! # Example
//!
//! ```ignore
//! use bmnet_controller::{ControllerSession, HttpControllerClient, SessionConfig, PortFilter};
//!
//! let session = ControllerSession::new(SessionConfig::new("http://10.0.0.5:9696"))?;
//! let client = HttpControllerClient::new(session);
//! let ports = client.list_ports(&PortFilter::on_network("prov-net")).await?;
//! ```

pub mod client;
pub mod http;
pub mod session;
pub mod types;

pub use client::ControllerClient;
pub use http::HttpControllerClient;
pub use session::{
    default_endpoint, AuthStrategy, ControllerSession, KeystoneCredentials, SessionConfig,
};
pub use types::{
    BindingProfile, DhcpOption, NetworkFilter, PortFilter, PortSpec, PortUpdate, VirtualPort,
    DEVICE_OWNER_BAREMETAL, VNIC_TYPE_BAREMETAL,
};
