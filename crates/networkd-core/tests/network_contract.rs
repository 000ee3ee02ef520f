//! Contract Test: Full Network Convergence
//!
//! Verifies `configure_network` and `scan_interfaces`:
//! - Physical interfaces converge before LAGG, VLAN and BRIDGE owners
//! - A failure on one interface never stops the others
//! - Orphaned cloned interfaces are destroyed
//! - The pass ends with one `network.changed` and one rtsold restart
//! - Autoconfiguration stops at the first lease, or keeps the mode set

mod common;

use common::*;
use networkd_core::config::DaemonConfig;
use networkd_core::memory::{MemoryKernel, StoreSeed};
use networkd_core::model::{
    BridgeConfig, InterfaceConfig, InterfaceFilter, InterfaceType, KernelInterface,
    LaggConfig, LaggProtocol, NetworkSettings, VlanConfig,
};
use networkd_core::traits::DesiredStateStore;

fn cloned_records() -> Vec<InterfaceConfig> {
    let mut lagg = InterfaceConfig::new("lagg0", InterfaceType::Lagg).with_enabled(true);
    lagg.lagg = Some(LaggConfig {
        protocol: LaggProtocol::Failover,
        ports: vec!["em0".into()],
    });

    let mut vlan = InterfaceConfig::new("vlan0", InterfaceType::Vlan).with_enabled(true);
    vlan.vlan = Some(VlanConfig {
        parent: Some("em1".into()),
        tag: Some(100),
    });

    let mut bridge = InterfaceConfig::new("bridge0", InterfaceType::Bridge).with_enabled(true);
    bridge.bridge = Some(BridgeConfig {
        members: vec!["em2".into()],
    });

    vec![bridge, lagg, vlan]
}

#[tokio::test]
async fn physical_interfaces_converge_before_their_owners() {
    let mut records = cloned_records();
    records.extend(["em0", "em1", "em2"].map(ether));
    let h = Harness::new(MemoryKernel::with_interfaces(&["em0", "em1", "em2"]), seed(records));

    h.service.configure_network().await.unwrap();

    let physical = h.position("set_up em2").unwrap();
    let lagg = h.position("create_interface lagg0").unwrap();
    let vlan = h.position("create_interface vlan0").unwrap();
    let bridge = h.position("create_interface bridge0").unwrap();
    assert!(physical < lagg, "{:?}", h.mutation_log());
    assert!(lagg < vlan);
    assert!(vlan < bridge);

    assert_eq!(h.kernel.interface("lagg0").unwrap().lagg_ports, vec!["em0"]);
    assert_eq!(h.kernel.interface("vlan0").unwrap().vlan_tag, Some(100));
    assert_eq!(h.kernel.interface("bridge0").unwrap().bridge_members, vec!["em2"]);
}

#[tokio::test]
async fn failure_on_one_interface_does_not_stop_the_next() {
    let h = Harness::new(
        MemoryKernel::with_interfaces(&["em0", "em1"]),
        seed(vec![
            ether("em0").with_alias(alias_config("10.0.0.5/24")),
            ether("em1").with_alias(alias_config("10.0.1.5/24")),
            // Desired but absent from the kernel
            ether("em00"),
        ]),
    );
    h.kernel.fail_on("add_address", "em0", libc::EPERM);

    let diagnostics = h.service.configure_network().await.unwrap();

    assert_eq!(h.kernel.addresses("em1"), vec![alias("10.0.1.5/24")]);
    assert!(h.kernel.addresses("em0").is_empty());
    assert!(diagnostics.iter().any(|d| d.code == libc::EPERM));
    assert_eq!(h.dispatcher.count("network.changed"), 1);
}

#[tokio::test]
async fn orphaned_clones_are_destroyed() {
    let kernel = MemoryKernel::with_interfaces(&["em0"]);
    kernel.insert_interface(KernelInterface::new("vlan5", InterfaceType::Vlan));
    kernel.insert_interface(KernelInterface::new("bridge3", InterfaceType::Bridge));
    let h = Harness::new(kernel, seed(vec![ether("em0")]));

    h.service.configure_network().await.unwrap();

    assert!(h.kernel.interface("vlan5").is_none());
    assert!(h.kernel.interface("bridge3").is_none());
    assert!(h.kernel.interface("em0").is_some());
}

#[tokio::test]
async fn pass_ends_with_rtsold_restart_and_one_network_changed() {
    let h = Harness::new(
        MemoryKernel::with_interfaces(&["em0", "em1"]),
        seed(vec![ether("em0"), ether("em1")]),
    );

    let diagnostics = h.service.configure_network().await.unwrap();

    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert_eq!(
        h.dispatcher.calls(),
        vec![("service.restart".to_string(), serde_json::json!(["rtsold"]))]
    );
    assert_eq!(h.dispatcher.count("network.changed"), 1);
    assert_eq!(h.dispatcher.count("network.interface.configured"), 2);
    assert_eq!(h.dispatcher.names().last(), Some(&"network.changed"));
}

#[tokio::test]
async fn failed_rtsold_restart_is_a_diagnostic() {
    let h = Harness::new(MemoryKernel::with_interfaces(&["em0"]), seed(vec![ether("em0")]));
    h.dispatcher.fail_calls();

    let diagnostics = h.service.configure_network().await.unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("service.restart failed"));
    assert_eq!(h.dispatcher.count("network.changed"), 1);
}

#[tokio::test]
async fn autoconfigure_stops_at_first_lease() {
    let store_seed = StoreSeed {
        settings: NetworkSettings {
            autoconfigure: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = Harness::new(MemoryKernel::with_interfaces(&["em0", "em1"]), store_seed);

    let diagnostics = h.service.configure_network().await.unwrap();

    assert!(diagnostics.is_empty());
    let record = h.store_record("em0").await;
    assert!(record.enabled);
    assert!(record.dhcp);
    assert!(!h.store.settings().await.unwrap().autoconfigure);
    assert_eq!(h.kernel.addresses("em0"), vec![alias("192.168.1.10/24")]);
    assert!(!h.kernel.mutations().iter().any(|m| m.target == "em1"));
    assert_eq!(h.dispatcher.count("network.changed"), 0);
}

#[tokio::test(start_paused = true)]
async fn autoconfigure_exhaustion_keeps_the_mode() {
    let mut config = DaemonConfig::default();
    config.engine.initial_dhcp_timeout_secs = 5;
    let store_seed = StoreSeed {
        settings: NetworkSettings {
            autoconfigure: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = Harness::with_config(
        MemoryKernel::with_interfaces(&["em0", "em1", "tap0"]),
        store_seed,
        config,
    );
    h.server.set_silent(true);

    let diagnostics = h.service.configure_network().await.unwrap();

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code, libc::ENOENT);
    assert_eq!(diagnostics[0].message, "Failed to configure any network interface");
    assert!(h.store.settings().await.unwrap().autoconfigure);
    assert!(!h.kernel.interface("em0").unwrap().is_up());
    assert!(!h.kernel.interface("em1").unwrap().is_up());
    assert!(h.position("set_up tap0").is_none());
    assert_eq!(h.factory.created(), 2);
}

#[tokio::test]
async fn scan_records_new_interfaces_and_forgets_gone_ones() {
    let h = Harness::new(
        MemoryKernel::with_interfaces(&["em0", "em1", "mgmt0"]),
        seed(vec![ether("em0"), ether("em7")]),
    );

    h.service.scan_interfaces().await.unwrap();

    let ids: Vec<String> = h
        .store
        .query_interfaces(&InterfaceFilter::All)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["em0", "em1", "lo0"]);

    let em1 = h.store_record("em1").await;
    assert!(!em1.enabled);
    assert!(!em1.dhcp);
    assert_eq!(em1.mtu, Some(1500));
    assert!(em1.aliases.is_empty());

    // Existing records are left untouched
    assert!(h.store_record("em0").await.enabled);
}
