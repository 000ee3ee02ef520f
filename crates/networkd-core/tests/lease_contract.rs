//! Contract Test: DHCP Lease Lifecycle
//!
//! Verifies the lease manager as wired by the service:
//! - A bound lease installs the address, default route and nameservers
//! - Each rejection schedules exactly one retry, with a fresh client
//! - Losing the link releases the lease and schedules nothing

mod common;

use common::*;
use networkd_core::memory::MemoryKernel;
use networkd_core::model::LinkState;
use networkd_core::NetworkEvent;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const BIND_TIMEOUT: Duration = Duration::from_secs(30);

fn dhcp_harness() -> Harness {
    Harness::new(
        MemoryKernel::with_interfaces(&["em0"]),
        seed(vec![ether("em0").with_dhcp(true)]),
    )
}

#[tokio::test(start_paused = true)]
async fn bound_lease_configures_address_route_and_dns() {
    let h = dhcp_harness();

    h.service.leases().start("em0", true, BIND_TIMEOUT).await.unwrap();

    assert_eq!(h.kernel.addresses("em0"), vec![alias("192.168.1.10/24")]);
    assert_eq!(
        h.kernel.default_route_v4().unwrap().gateway,
        Some(IpAddr::from([192, 168, 1, 1]))
    );
    assert!(h.dispatcher.events().contains(&NetworkEvent::DnsConfigured {
        addresses: vec![IpAddr::from([192, 168, 1, 1])],
    }));

    let status = h.service.leases().status("em0").await.unwrap();
    assert_eq!(status.server_address, Some(Ipv4Addr::new(192, 168, 1, 1)));
    assert!(status.lease_end_time > status.lease_start_time);
}

#[tokio::test(start_paused = true)]
async fn each_rejection_schedules_exactly_one_retry() {
    let h = dhcp_harness();
    h.server.set_reject(true);

    h.service
        .leases()
        .start("em0", false, Duration::ZERO)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.factory.created(), 1);
    assert!(!h.service.leases().is_running("em0").await);
    assert!(h.service.leases().retry_pending("em0").await);

    h.server.set_reject(false);
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(h.factory.created(), 2);
    assert!(h.service.leases().is_running("em0").await);
    assert!(!h.service.leases().retry_pending("em0").await);
    assert_eq!(h.kernel.addresses("em0"), vec![alias("192.168.1.10/24")]);

    // A bound client schedules nothing further
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.factory.created(), 2);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_cancels_a_pending_retry() {
    let h = dhcp_harness();
    h.server.set_reject(true);

    h.service
        .leases()
        .start("em0", false, Duration::ZERO)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.service.leases().retry_pending("em0").await);

    // Nothing is registered, but the retry still goes away
    assert!(h.service.leases().stop("em0").await.is_err());
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(!h.service.leases().retry_pending("em0").await);
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn link_loss_releases_the_lease_without_retry() {
    let h = dhcp_harness();
    h.service.start_monitor().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.service.leases().start("em0", true, BIND_TIMEOUT).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.dispatcher.clear();

    h.kernel.set_link_state("em0", LinkState::Down);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!h.service.leases().is_running("em0").await);
    assert!(!h.service.leases().retry_pending("em0").await);
    assert_eq!(h.server.released(), vec![Ipv4Addr::new(192, 168, 1, 10)]);
    assert!(h.kernel.addresses("em0").is_empty());
    assert!(h.dispatcher.count("network.interface.link_down") >= 1);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.factory.created(), 1);

    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn link_up_starts_dhcp_on_dhcp_records() {
    let h = dhcp_harness();
    h.kernel.set_link_state("em0", LinkState::Down);
    h.service.start_monitor().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.kernel.set_link_state("em0", LinkState::Up);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(h.service.leases().is_running("em0").await);
    assert_eq!(h.kernel.addresses("em0"), vec![alias("192.168.1.10/24")]);

    h.service.shutdown().await;
}
