//! Bulk controller port management for a node's PXE-enabled ports.

use bmnet_common::{NetError, NetResult, Task};
use bmnet_controller::{
    ControllerClient, DhcpOption, NetworkFilter, PortFilter, PortSpec, DEVICE_OWNER_BAREMETAL,
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Fail if any `requested` security group is missing from `available`.
pub fn verify_security_groups(requested: &[String], available: &[String]) -> NetResult<()> {
    if requested.is_empty() {
        return Ok(());
    }
    let available: HashSet<&str> = available.iter().map(String::as_str).collect();
    let mut missing: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|g| !available.contains(g))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort_unstable();
    missing.dedup();
    Err(NetError::network(format!(
        "Could not find these security groups on the controller: {}",
        missing.join(", ")
    )))
}

/// Fetch the controller's security groups and verify `requested` exist.
///
/// Nothing is fetched when `requested` is empty.
pub async fn ensure_security_groups(
    client: &dyn ControllerClient,
    requested: &[String],
) -> NetResult<()> {
    if requested.is_empty() {
        return Ok(());
    }
    let available = client.list_security_groups().await.map_err(|e| {
        NetError::network_from("Could not retrieve security groups from the controller", e)
    })?;
    verify_security_groups(requested, &available)
}

/// Resolve a network by UUID or name to its id.
pub async fn validate_network(
    client: &dyn ControllerClient,
    uuid_or_name: Option<&str>,
    net_type: &str,
) -> NetResult<String> {
    let uuid_or_name = match uuid_or_name.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => {
            return Err(NetError::missing(format!(
                "UUID or name of {} is not set in configuration",
                net_type
            )))
        }
    };

    let filter = if uuid::Uuid::parse_str(uuid_or_name).is_ok() {
        NetworkFilter::Id(uuid_or_name.to_string())
    } else {
        NetworkFilter::Name(uuid_or_name.to_string())
    };

    let networks = client
        .list_networks(&filter)
        .await
        .map_err(|e| NetError::network_from("Could not retrieve network list", e))?;

    debug!(filter = ?filter, result = ?networks, "Networks matching filter");

    match networks.as_slice() {
        [] => Err(NetError::invalid(format!(
            "{} with name or UUID {} was not found",
            net_type, uuid_or_name
        ))),
        [id] => Ok(id.clone()),
        many => Err(NetError::invalid(format!(
            "More than one {} was found for name {}: {}",
            net_type,
            uuid_or_name,
            many.join(", ")
        ))),
    }
}

/// Create one controller port on `network_id` per PXE-enabled port.
///
/// Returns physical port id → controller port id for the ports that were
/// created. Individual failures are logged and skipped; if every port fails,
/// ports on the network are rolled back and an error is returned.
pub async fn create_ports_for_pxe_enabled(
    client: &dyn ControllerClient,
    task: &Task,
    network_id: &str,
    is_flat: bool,
    security_groups: &[String],
) -> NetResult<BTreeMap<String, String>> {
    ensure_security_groups(client, security_groups).await?;

    let node = &task.node;
    debug!(
        node = %node.id,
        network = %network_id,
        "Creating controller ports for PXE-enabled ports"
    );

    let pxe_ports: Vec<_> = task.pxe_enabled_ports().collect();
    let mut created = BTreeMap::new();
    let mut failures = Vec::new();

    for port in &pxe_ports {
        let mut spec = PortSpec::new(network_id, &port.address)
            .with_device(DEVICE_OWNER_BAREMETAL, node.device_id())
            .with_baremetal_binding(&port.local_link_connection)
            .with_security_groups(security_groups);
        if !is_flat {
            spec = spec.with_host(&node.id);
        }
        if let Some(client_id) = port.client_id() {
            spec = spec.with_dhcp_opt(DhcpOption::client_id(Some(client_id)));
        }

        match client.create_port(&spec).await {
            Ok(vport) => {
                created.insert(port.id.clone(), vport.id);
            }
            Err(e) => {
                warn!(
                    node = %node.id,
                    port = %port.id,
                    network = %network_id,
                    error = %e,
                    "Could not create controller port"
                );
                failures.push(port.id.clone());
            }
        }
    }

    if failures.is_empty() {
        if !pxe_ports.is_empty() {
            info!(node = %node.id, network = %network_id, "Created controller ports");
        }
    } else if failures.len() == pxe_ports.len() {
        rollback_ports(client, task, network_id).await;
        return Err(NetError::network(format!(
            "Failed to create controller ports for any PXE enabled port on node {}",
            node.id
        )));
    } else {
        warn!(
            node = %node.id,
            network = %network_id,
            ports = ?failures,
            "Some controller ports could not be created"
        );
    }

    Ok(created)
}

/// Delete controller ports on `network_id` whose MAC matches a PXE-enabled
/// port of the node.
pub async fn remove_ports_for_network(
    client: &dyn ControllerClient,
    task: &Task,
    network_id: &str,
) -> NetResult<()> {
    let macs: Vec<&str> = task.pxe_enabled_ports().map(|p| p.address.as_str()).collect();
    if macs.is_empty() {
        return Ok(());
    }
    debug!(node = %task.node.id, network = %network_id, "Removing ports on network");
    let filter = PortFilter::on_network(network_id).with_macs(macs);
    remove_controller_ports(client, &task.node.id, &filter).await
}

/// Delete every controller port matching `filter`.
pub async fn remove_controller_ports(
    client: &dyn ControllerClient,
    node_id: &str,
    filter: &PortFilter,
) -> NetResult<()> {
    let ports = client.list_ports(filter).await.map_err(|e| {
        NetError::network_from(
            format!(
                "Could not get network VIFs for node {} from the controller",
                node_id
            ),
            e,
        )
    })?;

    if ports.is_empty() {
        debug!(node = %node_id, "No ports to remove");
        return Ok(());
    }

    for port in &ports {
        debug!(node = %node_id, vif = %port.id, "Deleting controller port");
        client.delete_port(&port.id).await.map_err(|e| {
            NetError::network_from(
                format!("Could not remove VIF {} of node {}", port.id, node_id),
                e,
            )
        })?;
    }

    info!(node = %node_id, count = ports.len(), "Removed controller ports");
    Ok(())
}

/// Best-effort removal of ports created on `network_id`. Never fails.
pub async fn rollback_ports(client: &dyn ControllerClient, task: &Task, network_id: &str) {
    if let Err(e) = remove_ports_for_network(client, task, network_id).await {
        warn!(
            node = %task.node.id,
            network = %network_id,
            error = %e,
            "Failed to roll back controller ports"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmnet_test::{
        mac, node_fixtures, port_fixtures, two_pxe_ports, ControllerOp, FailureKind, TestEnv,
        NODE_ID, PROVISIONING_NET,
    };
    use pretty_assertions::assert_eq;

    fn groups(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_verify_security_groups_empty_request() {
        assert!(verify_security_groups(&[], &[]).is_ok());
        assert!(verify_security_groups(&[], &groups(&["sg-1"])).is_ok());
    }

    #[test]
    fn test_verify_security_groups_missing() {
        let err = verify_security_groups(&groups(&["g1"]), &[]).unwrap_err();
        assert!(matches!(err, NetError::Network { .. }));
        assert!(err.to_string().contains("security groups"));
    }

    #[test]
    fn test_verify_security_groups_subset() {
        assert!(verify_security_groups(&groups(&["b"]), &groups(&["a", "b"])).is_ok());
    }

    #[tokio::test]
    async fn test_ensure_security_groups_skips_fetch_when_empty() {
        let env = TestEnv::new();
        env.controller
            .fail(ControllerOp::ListSecurityGroups, FailureKind::Unavailable);
        ensure_security_groups(&env.controller, &[]).await.unwrap();
        assert!(env.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_security_groups_fetch_failure() {
        let env = TestEnv::new();
        env.controller
            .fail(ControllerOp::ListSecurityGroups, FailureKind::Unavailable);
        let err = ensure_security_groups(&env.controller, &groups(&["sg-1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Network { .. }));
    }

    #[tokio::test]
    async fn test_validate_network() {
        let env = TestEnv::new();
        let by_name = validate_network(&env.controller, Some("provisioning"), "provisioning network")
            .await
            .unwrap();
        assert_eq!(by_name, PROVISIONING_NET);

        let by_id = validate_network(&env.controller, Some(PROVISIONING_NET), "network")
            .await
            .unwrap();
        assert_eq!(by_id, PROVISIONING_NET);
    }

    #[tokio::test]
    async fn test_validate_network_errors() {
        let env = TestEnv::new();
        assert!(matches!(
            validate_network(&env.controller, None, "cleaning network").await,
            Err(NetError::MissingParameter { .. })
        ));
        assert!(matches!(
            validate_network(&env.controller, Some("nope"), "cleaning network").await,
            Err(NetError::InvalidParameter { .. })
        ));

        let dup = TestEnv::new();
        let controller = dup
            .controller
            .clone()
            .with_network("n-a", "shared")
            .with_network("n-b", "shared");
        assert!(matches!(
            validate_network(&controller, Some("shared"), "network").await,
            Err(NetError::InvalidParameter { .. })
        ));

        controller.fail(ControllerOp::ListNetworks, FailureKind::Unavailable);
        assert!(matches!(
            validate_network(&controller, Some("shared"), "network").await,
            Err(NetError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_ports_request_shape() {
        let env = TestEnv::new()
            .with_node(node_fixtures::deployed_node(NODE_ID))
            .with_ports([
                port_fixtures::with_client_id(port_fixtures::pxe_port("p1", NODE_ID, 1), "cid-1"),
                port_fixtures::pxe_port("p2", NODE_ID, 2),
                port_fixtures::non_pxe_port("p3", NODE_ID, 3),
            ]);
        let task = env.task(NODE_ID).await.unwrap();

        let created = create_ports_for_pxe_enabled(
            &env.controller,
            &task,
            PROVISIONING_NET,
            false,
            &groups(&["sg-1"]),
        )
        .await
        .unwrap();
        assert_eq!(created.len(), 2);

        let requests = env.controller.create_requests();
        assert_eq!(requests.len(), 2);
        let first = &requests[0];
        assert_eq!(first.mac_address, mac(1));
        assert_eq!(first.device_owner.as_deref(), Some("baremetal:none"));
        assert_eq!(first.device_id.as_deref(), Some(bmnet_test::INSTANCE_ID));
        assert_eq!(first.vnic_type.as_deref(), Some("baremetal"));
        assert_eq!(first.host_id.as_deref(), Some(NODE_ID));
        assert_eq!(first.security_groups, Some(groups(&["sg-1"])));
        assert_eq!(first.extra_dhcp_opts, vec![DhcpOption::client_id(Some("cid-1"))]);
        // The client-id of one port does not leak into the next request.
        assert!(requests[1].extra_dhcp_opts.is_empty());
    }

    #[tokio::test]
    async fn test_create_ports_flat_network_is_unbound() {
        let env = two_pxe_ports();
        let task = env.task(NODE_ID).await.unwrap();
        create_ports_for_pxe_enabled(&env.controller, &task, PROVISIONING_NET, true, &[])
            .await
            .unwrap();
        let requests = env.controller.create_requests();
        assert!(requests.iter().all(|r| r.host_id.is_none()));
        assert!(requests.iter().all(|r| r.device_id.as_deref() == Some(NODE_ID)));
    }

    #[tokio::test]
    async fn test_create_ports_partial_failure() {
        let env = two_pxe_ports();
        env.controller
            .fail_for(ControllerOp::Create, &mac(1), FailureKind::Rejected(409));
        let task = env.task(NODE_ID).await.unwrap();

        let created =
            create_ports_for_pxe_enabled(&env.controller, &task, PROVISIONING_NET, false, &[])
                .await
                .unwrap();
        assert_eq!(created.keys().collect::<Vec<_>>(), vec!["p2"]);
        assert!(env.controller.delete_requests().is_empty());
    }

    #[tokio::test]
    async fn test_create_ports_total_failure_rolls_back() {
        let env = two_pxe_ports();
        env.controller
            .fail(ControllerOp::Create, FailureKind::Unavailable);
        let task = env.task(NODE_ID).await.unwrap();

        let err =
            create_ports_for_pxe_enabled(&env.controller, &task, PROVISIONING_NET, false, &[])
                .await
                .unwrap_err();
        assert!(matches!(err, NetError::Network { .. }));

        let rollback_list = env.controller.calls().into_iter().any(|c| {
            matches!(c, bmnet_test::ControllerCall::ListPorts(f)
                if f.network_id.as_deref() == Some(PROVISIONING_NET))
        });
        assert!(rollback_list);
    }

    #[tokio::test]
    async fn test_create_ports_bad_security_group_fails_first() {
        let env = two_pxe_ports();
        let task = env.task(NODE_ID).await.unwrap();
        let err = create_ports_for_pxe_enabled(
            &env.controller,
            &task,
            PROVISIONING_NET,
            false,
            &groups(&["sg-missing"]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NetError::Network { .. }));
        assert!(env.controller.create_requests().is_empty());
    }

    #[tokio::test]
    async fn test_create_ports_without_pxe_ports() {
        let env = TestEnv::new()
            .with_node(node_fixtures::node(NODE_ID))
            .with_ports([port_fixtures::non_pxe_port("p1", NODE_ID, 1)]);
        let task = env.task(NODE_ID).await.unwrap();
        let created =
            create_ports_for_pxe_enabled(&env.controller, &task, PROVISIONING_NET, false, &[])
                .await
                .unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_remove_ports_for_network_matches_macs() {
        let env = two_pxe_ports();
        let task = env.task(NODE_ID).await.unwrap();
        create_ports_for_pxe_enabled(&env.controller, &task, PROVISIONING_NET, false, &[])
            .await
            .unwrap();
        // A port with an unrelated MAC on the same network survives.
        env.controller
            .create_port(&PortSpec::new(PROVISIONING_NET, "de:ad:be:ef:00:01"))
            .await
            .unwrap();

        remove_ports_for_network(&env.controller, &task, PROVISIONING_NET)
            .await
            .unwrap();
        let left = env.controller.ports();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].mac_address, "de:ad:be:ef:00:01");
    }

    #[tokio::test]
    async fn test_remove_ports_delete_failure() {
        let env = two_pxe_ports();
        let task = env.task(NODE_ID).await.unwrap();
        create_ports_for_pxe_enabled(&env.controller, &task, PROVISIONING_NET, false, &[])
            .await
            .unwrap();
        env.controller
            .fail(ControllerOp::Delete, FailureKind::Unavailable);

        let err = remove_ports_for_network(&env.controller, &task, PROVISIONING_NET)
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Network { .. }));

        // Rollback swallows the same failure.
        rollback_ports(&env.controller, &task, PROVISIONING_NET).await;
    }
}
