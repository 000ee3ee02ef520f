//! Contract Test: Service Queries and Commands
//!
//! Verifies the remaining `NetworkService` operations:
//! - Clone name allocation against both kernel and store
//! - Interface and route queries
//! - Bringing interfaces up and down
//! - Default interface waits and DNS convergence

mod common;

use common::*;
use networkd_core::memory::{MemoryKernel, StoreSeed};
use networkd_core::model::{
    DnsSettings, GatewaySettings, InterfaceConfig, InterfaceType, KernelInterface, LinkState,
    NetworkSettings, Route,
};
use networkd_core::traits::{KernelNetwork, Resolver, ResolverConfig};
use networkd_core::{Error, NetworkEvent};
use std::net::IpAddr;
use std::time::Duration;

#[tokio::test]
async fn next_name_skips_kernel_and_store_names() {
    let kernel = MemoryKernel::with_interfaces(&["em0"]);
    kernel.insert_interface(KernelInterface::new("vlan0", InterfaceType::Vlan));
    let h = Harness::new(
        kernel,
        seed(vec![InterfaceConfig::new("vlan1", InterfaceType::Vlan)]),
    );

    assert_eq!(h.service.get_next_name("VLAN").await.unwrap(), "vlan2");
    assert_eq!(h.service.get_next_name("LAGG").await.unwrap(), "lagg0");
}

#[tokio::test]
async fn next_bridge_name_starts_at_two_and_skips_brg_units() {
    let kernel = MemoryKernel::new();
    kernel.insert_interface(KernelInterface::new("brg2", InterfaceType::Bridge));
    let h = Harness::new(kernel, StoreSeed::default());

    assert_eq!(h.service.get_next_name("BRIDGE").await.unwrap(), "bridge3");
}

#[tokio::test]
async fn next_name_rejects_non_clone_types() {
    let h = Harness::new(MemoryKernel::new(), StoreSeed::default());

    for kind in ["ETHER", "TUN", "vlan"] {
        let err = h.service.get_next_name(kind).await.unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL, "{}", kind);
        assert!(err.to_string().ends_with(&format!("Invalid type: {}", kind)));
    }
}

#[tokio::test]
async fn next_name_is_busy_when_every_unit_is_taken() {
    let records = (0..=999)
        .map(|unit| InterfaceConfig::new(format!("lagg{}", unit), InterfaceType::Lagg))
        .collect();
    let h = Harness::new(MemoryKernel::new(), seed(records));

    let err = h.service.get_next_name("LAGG").await.unwrap_err();
    assert!(matches!(err, Error::Busy(_)));
    assert_eq!(err.to_string(), "No free interfaces left");
}

#[tokio::test(start_paused = true)]
async fn query_interfaces_reports_bridges_up_and_dhcp_status() {
    let kernel = MemoryKernel::with_interfaces(&["em0"]);
    kernel.insert_interface(
        KernelInterface::new("bridge0", InterfaceType::Bridge).with_link_state(LinkState::Down),
    );
    let h = Harness::new(kernel, seed(vec![ether("em0").with_dhcp(true)]));
    h.service
        .leases()
        .start("em0", true, Duration::from_secs(30))
        .await
        .unwrap();

    let statuses = h.service.query_interfaces().await.unwrap();

    let bridge = statuses.iter().find(|s| s.interface.name == "bridge0").unwrap();
    assert_eq!(bridge.interface.link_state, LinkState::Up);
    assert!(bridge.dhcp.is_none());

    let em0 = statuses.iter().find(|s| s.interface.name == "em0").unwrap();
    let dhcp = em0.dhcp.as_ref().unwrap();
    assert_eq!(dhcp.server_address, Some("192.168.1.1".parse().unwrap()));
    assert!(dhcp.lease_end_time.is_some());

    // The kernel keeps its own view
    assert_eq!(h.kernel.interface("bridge0").unwrap().link_state, LinkState::Down);
}

#[tokio::test]
async fn down_interface_strips_addresses_and_clears_up() {
    let kernel = MemoryKernel::with_interfaces(&["em0"]);
    let h = Harness::new(kernel, seed(vec![ether("em0")]));
    h.kernel.set_up("em0", true).await.unwrap();
    h.kernel.add_address("em0", &alias("10.0.0.5/24")).await.unwrap();
    h.kernel.add_address("em0", &alias("fd00::5/64")).await.unwrap();

    h.service.down_interface("em0").await.unwrap();

    assert!(h.kernel.addresses("em0").is_empty());
    assert!(!h.kernel.interface("em0").unwrap().is_up());

    let err = h.service.down_interface("em9").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert_eq!(err.to_string(), "Interface em9 not found");
}

#[tokio::test]
async fn up_interface_configures_then_routes() {
    let h = Harness::new(
        MemoryKernel::with_interfaces(&["em0"]),
        StoreSeed {
            interfaces: vec![ether("em0").with_alias(alias_config("10.0.0.5/24"))],
            settings: NetworkSettings {
                gateway: GatewaySettings {
                    ipv4: Some("10.0.0.1".parse().unwrap()),
                    ipv6: None,
                },
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let diagnostics = h.service.up_interface("em0").await.unwrap();

    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert!(h.kernel.interface("em0").unwrap().is_up());
    assert_eq!(h.kernel.addresses("em0"), vec![alias("10.0.0.5/24")]);
    assert_eq!(h.service.get_default_interface().await.unwrap().as_deref(), Some("em0"));

    let route = h
        .service
        .get_route("10.0.0.77".parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(route.interface.as_deref(), Some("em0"));

    let via_gateway = h
        .service
        .get_route("8.8.8.8".parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(via_gateway.is_default());
}

#[tokio::test(start_paused = true)]
async fn default_interface_waits_for_the_monitor() {
    let kernel = MemoryKernel::with_interfaces(&["em0"]);
    let h = Harness::new(kernel, seed(vec![ether("em0")]));
    h.kernel.add_address("em0", &alias("10.0.0.5/24")).await.unwrap();
    h.service.start_monitor().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!h.service.wait_for_default_interface(Some(Duration::from_secs(2))).await);

    h.kernel
        .add_route(&Route::default_via("10.0.0.1".parse().unwrap()))
        .await
        .unwrap();

    assert!(h.service.wait_for_default_interface(Some(Duration::from_secs(5))).await);
    assert!(h.dispatcher.count("network.route.added") >= 1);

    h.service.shutdown().await;
}

#[tokio::test]
async fn dns_purges_dhcp_sources_when_no_interface_uses_dhcp() {
    let nameserver: IpAddr = "10.0.0.53".parse().unwrap();
    let h = Harness::new(
        MemoryKernel::with_interfaces(&["em0"]),
        StoreSeed {
            interfaces: vec![ether("em0")],
            settings: NetworkSettings {
                dns: DnsSettings {
                    addresses: vec![nameserver],
                    search: vec!["example.org".into()],
                },
                ..Default::default()
            },
            ..Default::default()
        },
    );
    h.resolver
        .add(
            "em0",
            &ResolverConfig::new(vec!["192.168.1.1".parse().unwrap()], Vec::new()),
        )
        .await
        .unwrap();

    let diagnostics = h.service.configure_dns().await.unwrap();

    assert!(diagnostics.is_empty());
    assert!(h.resolver.get("em0").await.is_none());
    assert_eq!(
        h.dispatcher.events(),
        vec![NetworkEvent::DnsConfigured {
            addresses: vec![nameserver]
        }]
    );

    let merged = h.service.get_dns_config().await.unwrap();
    assert_eq!(merged.nameservers, vec![nameserver]);
    assert_eq!(merged.search, vec!["example.org"]);
}

#[tokio::test]
async fn dns_keeps_dhcp_sources_while_a_dhcp_interface_exists() {
    let h = Harness::new(
        MemoryKernel::with_interfaces(&["em0"]),
        seed(vec![ether("em0").with_dhcp(true)]),
    );
    let lease_dns = ResolverConfig::new(vec!["192.168.1.1".parse().unwrap()], Vec::new());
    h.resolver.add("em0", &lease_dns).await.unwrap();

    h.service.configure_dns().await.unwrap();

    assert_eq!(h.resolver.get("em0").await, Some(lease_dns));
}
