//! Per-port binding, MAC and DHCP option updates on the controller.

use bmnet_common::{LocalLinkConnection, NetError, NetResult};
use bmnet_controller::{
    BindingProfile, ControllerClient, DhcpOption, PortUpdate, VNIC_TYPE_BAREMETAL,
};
use tracing::debug;

/// Change the MAC address of controller port `vif`.
///
/// A bound port cannot change its MAC, so the binding is cleared first and
/// restored in the same update that sets the new address.
pub async fn update_port_address(
    client: &dyn ControllerClient,
    vif: &str,
    mac: &str,
) -> NetResult<()> {
    let mac_failed = |source: NetError| NetError::MacUpdateFailed {
        port_id: vif.to_string(),
        source: Box::new(source),
    };

    let current = client
        .show_port(vif)
        .await
        .map_err(mac_failed)?
        .ok_or_else(|| mac_failed(NetError::not_found("controller port", vif)))?;

    let mut update = PortUpdate::mac(mac);
    if let Some(host) = current.bound_host() {
        debug!(vif = %vif, host = %host, "Unbinding port before MAC update");
        client
            .update_port(vif, &PortUpdate::unbind())
            .await
            .map_err(mac_failed)?;
        update.host_id = Some(host.to_string());
        update.profile = current.profile.clone();
    }

    client.update_port(vif, &update).await.map_err(mac_failed)?;
    debug!(vif = %vif, mac = %mac, "Updated controller port MAC address");
    Ok(())
}

/// Clear the binding host and profile of controller port `vif`.
pub async fn unbind_port(client: &dyn ControllerClient, vif: &str) -> NetResult<()> {
    client
        .update_port(vif, &PortUpdate::unbind())
        .await
        .map_err(|e| {
            NetError::network_from(format!("Unable to clear binding profile for port {}", vif), e)
        })?;
    debug!(vif = %vif, "Unbound controller port");
    Ok(())
}

/// Apply DHCP option changes to controller port `vif`.
pub async fn update_port_dhcp_opts(
    client: &dyn ControllerClient,
    vif: &str,
    opts: Vec<DhcpOption>,
) -> NetResult<()> {
    client
        .update_port(vif, &PortUpdate::dhcp_opts(opts))
        .await
        .map_err(|e| NetError::DhcpUpdateFailed {
            port_id: vif.to_string(),
            source: Box::new(e),
        })?;
    Ok(())
}

/// Bind controller port `vif` to `host`.
pub async fn bind_port_host(client: &dyn ControllerClient, vif: &str, host: &str) -> NetResult<()> {
    let update = PortUpdate {
        host_id: Some(host.to_string()),
        ..Default::default()
    };
    client.update_port(vif, &update).await.map_err(|e| {
        NetError::network_from(format!("Unable to bind port {} to host {}", vif, host), e)
    })?;
    Ok(())
}

/// Bind controller port `vif` to bare-metal node `node_id` through `link`.
pub async fn bind_port_baremetal(
    client: &dyn ControllerClient,
    vif: &str,
    node_id: &str,
    link: &LocalLinkConnection,
) -> NetResult<()> {
    let update = PortUpdate {
        host_id: Some(node_id.to_string()),
        vnic_type: Some(VNIC_TYPE_BAREMETAL.to_string()),
        profile: Some(BindingProfile::for_link(link)),
        ..Default::default()
    };
    client.update_port(vif, &update).await.map_err(|e| {
        NetError::network_from(
            format!("Unable to bind port {} to node {}", vif, node_id),
            e,
        )
    })?;
    Ok(())
}
