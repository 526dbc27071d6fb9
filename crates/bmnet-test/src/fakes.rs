//! In-memory stand-ins for the controller and the link plumber
//!
//! Both fakes keep a call log and can be told to fail specific operations.

use async_trait::async_trait;
use bmnet_common::{NetError, NetResult};
use bmnet_controller::{
    ControllerClient, NetworkFilter, PortFilter, PortSpec, PortUpdate, VirtualPort,
};
use bmnet_plumber::LinkPlumber;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How a programmed failure surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport/auth failure
    Unavailable,
    /// Validation failure with this HTTP status
    Rejected(u16),
}

impl FailureKind {
    fn to_error(self, what: &str) -> NetError {
        match self {
            FailureKind::Unavailable => NetError::unavailable(format!("{}: injected", what)),
            FailureKind::Rejected(status) => {
                NetError::rejected(status, format!("{}: injected", what))
            }
        }
    }
}

/// Controller operation kinds, for failure programming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerOp {
    /// create_port
    Create,
    /// delete_port
    Delete,
    /// update_port
    Update,
    /// show_port
    Show,
    /// list_ports
    ListPorts,
    /// list_security_groups
    ListSecurityGroups,
    /// list_networks
    ListNetworks,
}

/// One recorded controller call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    /// create_port(spec)
    CreatePort(PortSpec),
    /// delete_port(id)
    DeletePort(String),
    /// update_port(id, update)
    UpdatePort(String, PortUpdate),
    /// show_port(id)
    ShowPort(String),
    /// list_ports(filter)
    ListPorts(PortFilter),
    /// list_security_groups()
    ListSecurityGroups,
    /// list_networks(filter)
    ListNetworks(NetworkFilter),
}

#[derive(Debug, Clone)]
struct Failure {
    op: ControllerOp,
    /// MAC for creates, port id otherwise; `None` matches everything
    target: Option<String>,
    kind: FailureKind,
}

#[derive(Debug, Default)]
struct ControllerState {
    ports: Vec<VirtualPort>,
    next_id: u64,
    security_groups: Vec<String>,
    networks: Vec<(String, String)>,
    failures: Vec<Failure>,
    calls: Vec<ControllerCall>,
    tokens: Vec<Option<String>>,
}

/// Fake [`ControllerClient`] holding ports in memory.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeController {
    state: Arc<Mutex<ControllerState>>,
    token: Option<String>,
}

impl FakeController {
    /// Create an empty controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle usable as `Arc<dyn ControllerClient>`
    pub fn client(&self) -> Arc<dyn ControllerClient> {
        Arc::new(self.clone())
    }

    /// Builder: security groups visible to the caller
    pub fn with_security_groups(self, groups: &[&str]) -> Self {
        self.state.lock().security_groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    /// Builder: a network resolvable by id or name
    pub fn with_network(self, id: &str, name: &str) -> Self {
        self.state
            .lock()
            .networks
            .push((id.to_string(), name.to_string()));
        self
    }

    /// Seed an existing port
    pub fn insert_port(&self, port: VirtualPort) {
        self.state.lock().ports.push(port);
    }

    /// Fail every `op` call
    pub fn fail(&self, op: ControllerOp, kind: FailureKind) {
        self.state.lock().failures.push(Failure {
            op,
            target: None,
            kind,
        });
    }

    /// Fail `op` calls for one target (MAC for creates, port id otherwise)
    pub fn fail_for(&self, op: ControllerOp, target: &str, kind: FailureKind) {
        self.state.lock().failures.push(Failure {
            op,
            target: Some(target.to_string()),
            kind,
        });
    }

    /// Remove all programmed failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Current copy of a port
    pub fn port(&self, id: &str) -> Option<VirtualPort> {
        self.state.lock().ports.iter().find(|p| p.id == id).cloned()
    }

    /// Every port currently held
    pub fn ports(&self) -> Vec<VirtualPort> {
        self.state.lock().ports.clone()
    }

    /// Every call so far
    pub fn calls(&self) -> Vec<ControllerCall> {
        self.state.lock().calls.clone()
    }

    /// Specs of every creation request
    pub fn create_requests(&self) -> Vec<PortSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ControllerCall::CreatePort(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Ids of every delete request
    pub fn delete_requests(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ControllerCall::DeletePort(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Updates sent for `port_id`, in order
    pub fn updates_for(&self, port_id: &str) -> Vec<PortUpdate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ControllerCall::UpdatePort(id, update) if id == port_id => Some(update),
                _ => None,
            })
            .collect()
    }

    /// Token used by each call, in order
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.state.lock().tokens.clone()
    }

    fn begin(&self, call: ControllerCall) -> parking_lot::MutexGuard<'_, ControllerState> {
        let mut state = self.state.lock();
        state.calls.push(call);
        state.tokens.push(self.token.clone());
        state
    }

    fn injected(state: &ControllerState, op: ControllerOp, target: Option<&str>) -> Option<FailureKind> {
        state
            .failures
            .iter()
            .find(|f| {
                f.op == op
                    && match (&f.target, target) {
                        (None, _) => true,
                        (Some(want), Some(got)) => want == got,
                        (Some(_), None) => false,
                    }
            })
            .map(|f| f.kind)
    }

    fn not_found(port_id: &str) -> NetError {
        NetError::rejected(404, format!("Port {} could not be found.", port_id))
    }
}

#[async_trait]
impl ControllerClient for FakeController {
    async fn create_port(&self, spec: &PortSpec) -> NetResult<VirtualPort> {
        let mut state = self.begin(ControllerCall::CreatePort(spec.clone()));
        if let Some(kind) = Self::injected(&state, ControllerOp::Create, Some(&spec.mac_address)) {
            return Err(kind.to_error("create port"));
        }

        state.next_id += 1;
        let n = state.next_id;
        let port = VirtualPort {
            id: format!("{:08x}-0000-4000-8000-{:012x}", n, n),
            network_id: spec.network_id.clone(),
            mac_address: spec.mac_address.clone(),
            admin_state_up: spec.admin_state_up,
            device_owner: spec.device_owner.clone(),
            device_id: spec.device_id.clone(),
            vnic_type: spec.vnic_type.clone(),
            host_id: spec.host_id.clone(),
            profile: spec.profile.clone(),
            security_groups: spec.security_groups.clone().unwrap_or_default(),
            extra_dhcp_opts: spec.extra_dhcp_opts.clone(),
        };
        state.ports.push(port.clone());
        Ok(port)
    }

    async fn delete_port(&self, port_id: &str) -> NetResult<()> {
        let mut state = self.begin(ControllerCall::DeletePort(port_id.to_string()));
        if let Some(kind) = Self::injected(&state, ControllerOp::Delete, Some(port_id)) {
            return Err(kind.to_error("delete port"));
        }
        let before = state.ports.len();
        state.ports.retain(|p| p.id != port_id);
        if state.ports.len() == before {
            return Err(Self::not_found(port_id));
        }
        Ok(())
    }

    async fn update_port(&self, port_id: &str, update: &PortUpdate) -> NetResult<VirtualPort> {
        let mut state = self.begin(ControllerCall::UpdatePort(
            port_id.to_string(),
            update.clone(),
        ));
        if let Some(kind) = Self::injected(&state, ControllerOp::Update, Some(port_id)) {
            return Err(kind.to_error("update port"));
        }
        let port = state
            .ports
            .iter_mut()
            .find(|p| p.id == port_id)
            .ok_or_else(|| Self::not_found(port_id))?;

        if let Some(mac) = &update.mac_address {
            port.mac_address = mac.clone();
        }
        if let Some(device_id) = &update.device_id {
            port.device_id = Some(device_id.clone());
        }
        if let Some(vnic_type) = &update.vnic_type {
            port.vnic_type = Some(vnic_type.clone());
        }
        if let Some(host) = &update.host_id {
            port.host_id = Some(host.clone());
        }
        if let Some(profile) = &update.profile {
            port.profile = Some(profile.clone());
        }
        if let Some(opts) = &update.extra_dhcp_opts {
            for opt in opts {
                port.extra_dhcp_opts.retain(|o| o.opt_name != opt.opt_name);
                if opt.opt_value.is_some() {
                    port.extra_dhcp_opts.push(opt.clone());
                }
            }
        }
        Ok(port.clone())
    }

    async fn show_port(&self, port_id: &str) -> NetResult<Option<VirtualPort>> {
        let state = self.begin(ControllerCall::ShowPort(port_id.to_string()));
        if let Some(kind) = Self::injected(&state, ControllerOp::Show, Some(port_id)) {
            return Err(kind.to_error("show port"));
        }
        Ok(state.ports.iter().find(|p| p.id == port_id).cloned())
    }

    async fn list_ports(&self, filter: &PortFilter) -> NetResult<Vec<VirtualPort>> {
        let state = self.begin(ControllerCall::ListPorts(filter.clone()));
        if let Some(kind) = Self::injected(&state, ControllerOp::ListPorts, None) {
            return Err(kind.to_error("list ports"));
        }
        Ok(state
            .ports
            .iter()
            .filter(|p| {
                filter
                    .network_id
                    .as_ref()
                    .map_or(true, |net| &p.network_id == net)
                    && (filter.mac_addresses.is_empty()
                        || filter.mac_addresses.contains(&p.mac_address))
                    && filter
                        .device_id
                        .as_ref()
                        .map_or(true, |dev| p.device_id.as_ref() == Some(dev))
            })
            .cloned()
            .collect())
    }

    async fn list_security_groups(&self) -> NetResult<Vec<String>> {
        let state = self.begin(ControllerCall::ListSecurityGroups);
        if let Some(kind) = Self::injected(&state, ControllerOp::ListSecurityGroups, None) {
            return Err(kind.to_error("list security groups"));
        }
        Ok(state.security_groups.clone())
    }

    async fn list_networks(&self, filter: &NetworkFilter) -> NetResult<Vec<String>> {
        let state = self.begin(ControllerCall::ListNetworks(filter.clone()));
        if let Some(kind) = Self::injected(&state, ControllerOp::ListNetworks, None) {
            return Err(kind.to_error("list networks"));
        }
        Ok(state
            .networks
            .iter()
            .filter(|(id, name)| match filter {
                NetworkFilter::Id(want) => id == want,
                NetworkFilter::Name(want) => name == want,
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn scoped(&self, token: Option<&str>) -> Arc<dyn ControllerClient> {
        let mut scoped = self.clone();
        if let Some(token) = token {
            scoped.token = Some(token.to_string());
        }
        Arc::new(scoped)
    }
}

/// One recorded plumbing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlumbOp {
    /// ensure_bridge(bridge)
    EnsureBridge(String),
    /// delete_bridge(bridge)
    DeleteBridge(String),
    /// ensure_veth_pair(dev1, dev2)
    EnsureVethPair(String, String),
    /// ensure_vlan_subinterface(dev, vlan)
    EnsureVlan(String, u16),
    /// add_to_bridge(bridge, iface)
    AddToBridge(String, String),
    /// ensure_switch_port(bridge, dev, iface_id, mac)
    EnsureSwitchPort {
        /// Integration bridge
        bridge: String,
        /// Switch-side device
        dev: String,
        /// Controller port id
        iface_id: String,
        /// Attached MAC
        mac: String,
    },
    /// remove_switch_port(bridge, dev)
    RemoveSwitchPort(String, String),
    /// remove_device(dev)
    RemoveDevice(String),
}

type FailPredicate = Box<dyn Fn(&PlumbOp) -> bool + Send + Sync>;

/// [`LinkPlumber`] that records every step and tracks which devices exist
/// and which bridge each interface is enslaved to.
#[derive(Default)]
pub struct RecordingPlumber {
    ops: Mutex<Vec<PlumbOp>>,
    devices: Mutex<HashSet<String>>,
    /// iface → bridge
    members: Mutex<HashMap<String, String>>,
    fail_when: Mutex<Vec<FailPredicate>>,
}

impl RecordingPlumber {
    /// Create a plumber with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: devices present from the start
    pub fn with_devices(self, devices: &[&str]) -> Self {
        self.devices
            .lock()
            .extend(devices.iter().map(|d| d.to_string()));
        self
    }

    /// Fail every step matching `predicate` (the step is still recorded)
    pub fn fail_when(&self, predicate: impl Fn(&PlumbOp) -> bool + Send + Sync + 'static) {
        self.fail_when.lock().push(Box::new(predicate));
    }

    /// Every step so far
    pub fn ops(&self) -> Vec<PlumbOp> {
        self.ops.lock().clone()
    }

    /// Forget recorded steps
    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    /// Devices currently present
    pub fn devices(&self) -> HashSet<String> {
        self.devices.lock().clone()
    }

    /// Bridge `iface` is enslaved to, if any
    pub fn bridge_of(&self, iface: &str) -> Option<String> {
        self.members.lock().get(iface).cloned()
    }

    fn forget_device(&self, dev: &str) {
        self.devices.lock().remove(dev);
        self.members
            .lock()
            .retain(|iface, bridge| iface != dev && bridge != dev);
    }

    fn record(&self, op: PlumbOp) -> NetResult<()> {
        let failed = self.fail_when.lock().iter().any(|p| p(&op));
        let description = format!("{:?}", op);
        self.ops.lock().push(op);
        if failed {
            return Err(NetError::ShellCommandFailed {
                command: description,
                exit_code: 1,
                output: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordingPlumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingPlumber")
            .field("ops", &self.ops.lock().len())
            .field("devices", &self.devices.lock().len())
            .finish()
    }
}

#[async_trait]
impl LinkPlumber for RecordingPlumber {
    async fn device_exists(&self, dev: &str) -> bool {
        self.devices.lock().contains(dev)
    }

    async fn ensure_bridge(&self, bridge: &str) -> NetResult<()> {
        self.record(PlumbOp::EnsureBridge(bridge.to_string()))?;
        self.devices.lock().insert(bridge.to_string());
        Ok(())
    }

    async fn delete_bridge(&self, bridge: &str) -> NetResult<()> {
        self.record(PlumbOp::DeleteBridge(bridge.to_string()))?;
        self.forget_device(bridge);
        Ok(())
    }

    async fn ensure_veth_pair(&self, dev1: &str, dev2: &str) -> NetResult<()> {
        self.record(PlumbOp::EnsureVethPair(dev1.to_string(), dev2.to_string()))?;
        for dev in [dev1, dev2] {
            self.forget_device(dev);
            self.devices.lock().insert(dev.to_string());
        }
        Ok(())
    }

    async fn ensure_vlan_subinterface(&self, dev: &str, vlan: u16) -> NetResult<String> {
        self.record(PlumbOp::EnsureVlan(dev.to_string(), vlan))?;
        let name = bmnet_plumber::vlan_subinterface_name(dev, vlan);
        self.devices.lock().insert(name.clone());
        Ok(name)
    }

    async fn add_to_bridge(&self, bridge: &str, iface: &str) -> NetResult<()> {
        self.record(PlumbOp::AddToBridge(bridge.to_string(), iface.to_string()))?;
        let mut members = self.members.lock();
        match members.get(iface) {
            Some(current) if current == bridge => Ok(()),
            Some(current) => Err(NetError::ShellCommandFailed {
                command: format!("addif {} {}", bridge, iface),
                exit_code: 1,
                output: format!("device {} is already a member of bridge {}", iface, current),
            }),
            None => {
                members.insert(iface.to_string(), bridge.to_string());
                Ok(())
            }
        }
    }

    async fn ensure_switch_port(
        &self,
        bridge: &str,
        dev: &str,
        iface_id: &str,
        mac: &str,
    ) -> NetResult<()> {
        self.record(PlumbOp::EnsureSwitchPort {
            bridge: bridge.to_string(),
            dev: dev.to_string(),
            iface_id: iface_id.to_string(),
            mac: mac.to_string(),
        })
    }

    async fn remove_switch_port(&self, bridge: &str, dev: &str) -> NetResult<()> {
        self.record(PlumbOp::RemoveSwitchPort(bridge.to_string(), dev.to_string()))
    }

    async fn remove_device(&self, dev: &str) -> NetResult<()> {
        self.record(PlumbOp::RemoveDevice(dev.to_string()))?;
        self.forget_device(dev);
        // Deleting one veth end removes its peer.
        if let Some(peer) = dev.strip_prefix("irp1-") {
            self.forget_device(&format!("irp2-{}", peer));
        }
        Ok(())
    }
}
