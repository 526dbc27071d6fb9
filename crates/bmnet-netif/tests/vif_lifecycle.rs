//! VIF attach/detach integration tests
//!
//! Exercises the attach selection rules through every interface variant.

use bmnet_common::{NetError, NetworkPhase, VifInfo};
use bmnet_netif::{
    build_network_interface, InterfaceDeps, InterfaceKind, NetworkConfig, NetworkInterface,
};
use bmnet_test::{
    node_fixtures, port_fixtures, two_pxe_ports, PortVerifier, TestEnv, NODE_ID,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const KINDS: [InterfaceKind; 3] = [InterfaceKind::Noop, InterfaceKind::Controller, InterfaceKind::Ovs];

fn interface(env: &TestEnv, kind: InterfaceKind) -> Arc<dyn NetworkInterface> {
    let deps = InterfaceDeps {
        client: Some(env.controller.client()),
        plumber: Some(env.plumber.clone()),
    };
    let config = NetworkConfig {
        host_name: Some("agent-1".to_string()),
        ..Default::default()
    };
    build_network_interface(kind, &config, &deps).expect("interface")
}

/// Scenario:
/// 1. Node with two PXE-enabled ports
/// 2. Attach v1 and v2: one port each
/// 3. Attach v3: no free port
/// 4. Detach v1, list shows only v2
#[tokio::test]
async fn test_two_port_scenario() {
    for kind in KINDS {
        let env = two_pxe_ports();
        let iface = interface(&env, kind);
        let mut task = env.task(NODE_ID).await.expect("task");

        iface.vif_attach(&mut task, &VifInfo::new("v1")).await.expect("attach v1");
        iface.vif_attach(&mut task, &VifInfo::new("v2")).await.expect("attach v2");

        let verifier = PortVerifier::new(env.store.as_ref());
        verifier
            .assert_vif("p1", NetworkPhase::Tenant, Some("v1"))
            .await
            .expect("v1 on p1");
        verifier
            .assert_vif("p2", NetworkPhase::Tenant, Some("v2"))
            .await
            .expect("v2 on p2");

        let err = iface
            .vif_attach(&mut task, &VifInfo::new("v3"))
            .await
            .expect_err("no free port for v3");
        assert!(matches!(err, NetError::InsufficientPorts { .. }));

        iface.vif_detach(&mut task, "v1").await.expect("detach v1");
        verifier
            .assert_vif("p1", NetworkPhase::Tenant, None)
            .await
            .expect("p1 cleared");
        assert_eq!(iface.vif_list(&task), vec![VifInfo::new("v2")]);
    }
}

#[tokio::test]
async fn test_detach_then_reattach() {
    let env = two_pxe_ports();
    let iface = interface(&env, InterfaceKind::Noop);
    let mut task = env.task(NODE_ID).await.expect("task");

    iface.vif_attach(&mut task, &VifInfo::new("v1")).await.expect("attach");
    let err = iface
        .vif_attach(&mut task, &VifInfo::new("v1"))
        .await
        .expect_err("second attach");
    assert!(matches!(err, NetError::AlreadyAttached { .. }));

    iface.vif_detach(&mut task, "v1").await.expect("detach");
    iface.vif_attach(&mut task, &VifInfo::new("v1")).await.expect("reattach");
    assert_eq!(iface.vif_list(&task), vec![VifInfo::new("v1")]);
}

/// Attach picks the first free PXE port, else the first free port, for
/// every mix of PXE flags and occupied ports on a three-port node.
#[tokio::test]
async fn test_attach_selection_over_port_sets() {
    for mask in 0u8..64 {
        let mut ports = Vec::new();
        for i in 0..3u8 {
            let mut port = if mask & (1 << i) != 0 {
                port_fixtures::pxe_port(&format!("p{}", i), NODE_ID, i + 1)
            } else {
                port_fixtures::non_pxe_port(&format!("p{}", i), NODE_ID, i + 1)
            };
            if mask & (1 << (i + 3)) != 0 {
                port.set_vif(NetworkPhase::Tenant, format!("busy-{}", i));
            }
            ports.push(port);
        }

        let expected = ports
            .iter()
            .filter(|p| p.tenant_vif().is_none())
            .min_by_key(|p| !p.pxe_enabled)
            .map(|p| p.id.clone());

        let env = TestEnv::new()
            .with_node(node_fixtures::node(NODE_ID))
            .with_ports(ports);
        let iface = interface(&env, InterfaceKind::Noop);
        let mut task = env.task(NODE_ID).await.expect("task");

        let result = iface.vif_attach(&mut task, &VifInfo::new("new")).await;
        match expected {
            Some(port_id) => {
                result.expect("attach should succeed");
                let carriers: Vec<_> = task
                    .ports
                    .iter()
                    .filter(|p| p.carries_vif("new"))
                    .map(|p| p.id.clone())
                    .collect();
                assert_eq!(carriers, vec![port_id], "mask {:06b}", mask);
            }
            None => assert!(
                matches!(result, Err(NetError::InsufficientPorts { .. })),
                "mask {:06b}",
                mask
            ),
        }
    }
}
