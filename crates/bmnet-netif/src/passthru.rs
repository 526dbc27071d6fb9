//! Vendor passthru for creating vNICs on converged-adapter servers.
//!
//! Method names are checked against a fixed allow-list and dispatched
//! through a handler table.

use async_trait::async_trait;
use bmnet_common::{keys, NetError, NetResult, Node, PhysicalPort, Task};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Longest vNIC name the adapter accepts
pub const MAX_VNIC_NAME_LEN: usize = 31;

/// Power state reported by the server's management controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

/// Power management of the node's server
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn power_state(&self, node: &Node) -> NetResult<PowerState>;

    async fn reboot(&self, node: &Node) -> NetResult<()>;
}

/// vNIC management on the node's converged adapter
#[async_trait]
pub trait VnicProvisioner: Send + Sync {
    async fn add_vnic(
        &self,
        node: &Node,
        name: &str,
        mac: &str,
        vlan: u16,
        pxe: bool,
    ) -> NetResult<()>;

    async fn delete_vnic(&self, node: &Node, name: &str) -> NetResult<()>;
}

/// Passthru methods accepted from callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassthruMethod {
    AddVnic,
    IsVnicCreated,
    DeleteVnic,
}

const ALLOWED_METHODS: [(&str, PassthruMethod); 3] = [
    ("add_vnic", PassthruMethod::AddVnic),
    ("is_vnic_created", PassthruMethod::IsVnicCreated),
    ("delete_vnic", PassthruMethod::DeleteVnic),
];

impl PassthruMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassthruMethod::AddVnic => "add_vnic",
            PassthruMethod::IsVnicCreated => "is_vnic_created",
            PassthruMethod::DeleteVnic => "delete_vnic",
        }
    }
}

impl fmt::Display for PassthruMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PassthruMethod {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALLOWED_METHODS
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, method)| *method)
            .ok_or_else(|| {
                NetError::invalid(format!(
                    "Unsupported passthru method '{}'; supported: {}",
                    s,
                    ALLOWED_METHODS
                        .iter()
                        .map(|(name, _)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

type HandlerFuture<'a> = Pin<Box<dyn Future<Output = NetResult<Value>> + Send + 'a>>;
type Handler = for<'a> fn(&'a VnicPassthru, &'a mut Task, &'a Value) -> HandlerFuture<'a>;

fn add_vnic_handler<'a>(p: &'a VnicPassthru, task: &'a mut Task, args: &'a Value) -> HandlerFuture<'a> {
    Box::pin(p.add_vnic(task, args))
}

fn is_vnic_created_handler<'a>(
    p: &'a VnicPassthru,
    task: &'a mut Task,
    args: &'a Value,
) -> HandlerFuture<'a> {
    Box::pin(p.is_vnic_created(task, args))
}

fn delete_vnic_handler<'a>(
    p: &'a VnicPassthru,
    task: &'a mut Task,
    args: &'a Value,
) -> HandlerFuture<'a> {
    Box::pin(p.delete_vnic(task, args))
}

const HANDLERS: [(PassthruMethod, Handler); 3] = [
    (PassthruMethod::AddVnic, add_vnic_handler),
    (PassthruMethod::IsVnicCreated, is_vnic_created_handler),
    (PassthruMethod::DeleteVnic, delete_vnic_handler),
];

/// vNIC passthru bound to a server's power and adapter management.
#[derive(Clone)]
pub struct VnicPassthru {
    power: Arc<dyn PowerControl>,
    vnics: Arc<dyn VnicProvisioner>,
}

impl fmt::Debug for VnicPassthru {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VnicPassthru").finish_non_exhaustive()
    }
}

impl VnicPassthru {
    pub fn new(power: Arc<dyn PowerControl>, vnics: Arc<dyn VnicProvisioner>) -> Self {
        Self { power, vnics }
    }

    /// Dispatch `method` with JSON `args`.
    #[instrument(skip(self, task, args), fields(node = %task.node.id))]
    pub async fn call(&self, task: &mut Task, method: &str, args: &Value) -> NetResult<Value> {
        let method: PassthruMethod = method.parse()?;
        let handler = HANDLERS
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, h)| *h)
            .ok_or_else(|| NetError::internal(format!("no handler for {}", method)))?;
        handler(self, task, args).await
    }

    async fn ensure_power_on(&self, node: &Node) -> NetResult<()> {
        if self.power.power_state(node).await? != PowerState::On {
            info!(node = %node.id, "Node is not powered on, rebooting");
            self.power.reboot(node).await?;
        }
        Ok(())
    }

    async fn add_vnic(&self, task: &mut Task, args: &Value) -> NetResult<Value> {
        let uuid = required_str(args, "uuid")?;
        let mac = required_str(args, "mac")?;
        let vlan = required_vlan(args)?;
        let pxe = args.get("pxe").and_then(Value::as_bool).unwrap_or(false);

        self.ensure_power_on(&task.node).await?;
        let name = vnic_name(uuid);
        self.vnics
            .add_vnic(&task.node, &name, mac, vlan, pxe)
            .await?;

        let mut port = PhysicalPort::new(uuid::Uuid::new_v4().to_string(), &task.node.id, mac);
        port.pxe_enabled = pxe;
        port.extra
            .insert(keys::LEGACY_VIF.to_string(), uuid.to_string());
        task.store().create_port(&port).await?;
        task.reload().await?;

        info!(vnic = %name, port = %port.id, "Created vNIC");
        Ok(json!({ "vnic": name, "port": port.id }))
    }

    async fn is_vnic_created(&self, task: &mut Task, args: &Value) -> NetResult<Value> {
        let uuid = required_str(args, "uuid")?;
        Ok(json!({ "created": vnic_port(task, uuid).is_some() }))
    }

    async fn delete_vnic(&self, task: &mut Task, args: &Value) -> NetResult<Value> {
        let uuid = required_str(args, "uuid")?;
        self.ensure_power_on(&task.node).await?;

        let port_id = vnic_port(task, uuid)
            .map(|p| p.id.clone())
            .ok_or_else(|| NetError::invalid(format!("No vNIC with uuid {} on node", uuid)))?;

        let name = vnic_name(uuid);
        self.vnics.delete_vnic(&task.node, &name).await?;
        if let Err(e) = task.store().destroy_port(&port_id).await {
            warn!(port = %port_id, error = %e, "vNIC deleted but port record remains");
            return Err(e);
        }
        task.reload().await?;

        info!(vnic = %name, port = %port_id, "Deleted vNIC");
        Ok(Value::Null)
    }
}

fn vnic_name(uuid: &str) -> String {
    uuid.chars().take(MAX_VNIC_NAME_LEN).collect()
}

fn vnic_port<'a>(task: &'a Task, uuid: &str) -> Option<&'a PhysicalPort> {
    task.ports
        .iter()
        .find(|p| p.extra.get(keys::LEGACY_VIF).map(String::as_str) == Some(uuid))
}

fn required_str<'a>(args: &'a Value, key: &str) -> NetResult<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(NetError::missing(format!("Missing argument '{}'", key)))
        }
        Some(other) => Err(NetError::invalid(format!(
            "Argument '{}' must be a string, got {}",
            key, other
        ))),
    }
}

fn required_vlan(args: &Value) -> NetResult<u16> {
    let value = match args.get("vlan") {
        Some(Value::Null) | None => return Err(NetError::missing("Missing argument 'vlan'")),
        Some(value) => value,
    };
    let vlan = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    vlan.ok_or_else(|| NetError::invalid(format!("Argument 'vlan' is not a VLAN id: {}", value)))
}
