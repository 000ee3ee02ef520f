//! Kernel event monitor
//!
//! Reads the kernel notification stream and republishes it as semantic
//! [`NetworkEvent`]s. A shadow cache of per-interface MTU, flags and link
//! state is kept so that interface info messages can be turned into deltas.
//!
//! ## Event Flow
//!
//! 1. Announce: attached/detached notification, settle delay, full cache rebuild
//! 2. Interface info: MTU, link state and flag deltas against the cache, each
//!    with its own notification; link transitions drive the lease manager
//! 3. Address: informational, republished as an interface change
//! 4. Route: republished; an IPv4 default route records the default interface
//!
//! The monitor runs on its own task and is the only reader of its stream.

use crate::config::MonitorConfig;
use crate::context::Context;
use crate::default_iface::DefaultInterfaceSignal;
use crate::error::{Error, Result};
use crate::events::NetworkEvent;
use crate::lease::LeaseManager;
use crate::model::{
    AddressAction, AnnounceKind, InterfaceFlag, LinkState, Route, RouteAction, RoutingMessage,
};
use crate::traits::RoutingStream;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Last observed state of one interface
#[derive(Debug, Clone, PartialEq, Eq)]
struct Shadow {
    mtu: u32,
    flags: BTreeSet<InterfaceFlag>,
    link_state: LinkState,
}

/// Kernel event monitor
pub struct EventMonitor {
    ctx: Context,
    leases: Arc<LeaseManager>,
    default_interface: Arc<DefaultInterfaceSignal>,
    settle: Duration,
    /// Taken by the run loop; the lock keeps the monitor `Sync`
    stream: Mutex<Option<RoutingStream>>,
    cache: HashMap<String, Shadow>,
}

impl EventMonitor {
    /// Create a monitor
    ///
    /// The notification stream is opened here, so every message published
    /// after construction is seen even if the monitor task starts later.
    pub fn new(
        ctx: Context,
        leases: Arc<LeaseManager>,
        default_interface: Arc<DefaultInterfaceSignal>,
        config: &MonitorConfig,
    ) -> Self {
        let stream = ctx.kernel.watch();
        Self {
            ctx,
            leases,
            default_interface,
            settle: config.announce_settle(),
            stream: Mutex::new(Some(stream)),
            cache: HashMap::new(),
        }
    }

    /// Run until the notification stream ends
    pub async fn run(self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run until `shutdown_rx` fires or the stream ends
    pub async fn run_until(self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_internal(Some(shutdown_rx)).await
    }

    async fn run_internal(mut self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let taken = self
            .stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let mut stream =
            taken.ok_or_else(|| Error::Other("Event monitor already ran".to_string()))?;

        self.build_cache().await;
        self.prime_default_interface().await;
        info!("Event monitor started, {} interfaces cached", self.cache.len());

        if let Some(mut rx) = shutdown_rx {
            loop {
                tokio::select! {
                    message = stream.next() => match message {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    },

                    _ = &mut rx => {
                        info!("Event monitor shutting down");
                        break;
                    }
                }
            }
        } else {
            while let Some(message) = stream.next().await {
                self.handle_message(message).await;
            }
        }

        info!("Event monitor stopped");
        Ok(())
    }

    async fn build_cache(&mut self) {
        match self.ctx.kernel.list_interfaces().await {
            Ok(interfaces) => {
                self.cache = interfaces
                    .into_iter()
                    .map(|i| {
                        (
                            i.name,
                            Shadow {
                                mtu: i.mtu,
                                flags: i.flags,
                                link_state: i.link_state,
                            },
                        )
                    })
                    .collect();
            }
            Err(e) => warn!("Building interface cache failed: {}", e),
        }
    }

    async fn prime_default_interface(&self) {
        if let Ok(routes) = self.ctx.kernel.routes().await {
            let interface = routes
                .into_iter()
                .find(|r| r.is_default() && r.is_ipv4())
                .and_then(|r| r.interface);
            if interface.is_some() {
                self.default_interface.set(interface);
            }
        }
    }

    /// Handle one kernel message
    pub(crate) async fn handle_message(&mut self, message: RoutingMessage) {
        match message {
            RoutingMessage::Announce { interface, kind } => {
                self.handle_announce(interface, kind).await
            }
            RoutingMessage::InterfaceInfo {
                interface,
                mtu,
                flags,
                link_state,
            } => {
                self.handle_info(
                    interface,
                    Shadow {
                        mtu,
                        flags,
                        link_state,
                    },
                )
                .await
            }
            RoutingMessage::Address {
                interface,
                action,
                address,
                prefix_len,
                ..
            } => self.handle_address(interface, action, address, prefix_len).await,
            RoutingMessage::Route {
                action,
                route,
                errno,
            } => {
                if errno != 0 {
                    debug!("Ignoring failed route message for {}", route);
                    return;
                }
                self.handle_route(action, route).await
            }
        }
    }

    async fn handle_announce(&mut self, interface: String, kind: AnnounceKind) {
        match kind {
            AnnounceKind::Arrival => {
                warn!("Interface {} attached to the system", interface);
                self.ctx
                    .emit(NetworkEvent::InterfaceAttached { name: interface })
                    .await;
            }
            AnnounceKind::Departure => {
                warn!("Interface {} detached from the system", interface);
                self.deconfigure_lease(&interface).await;
                self.ctx
                    .emit(NetworkEvent::InterfaceDetached { name: interface })
                    .await;
            }
        }

        // Arrival may be announced before the device is fully set up
        tokio::time::sleep(self.settle).await;
        self.build_cache().await;
    }

    async fn handle_info(&mut self, interface: String, current: Shadow) {
        let Some(previous) = self.cache.get(&interface).cloned() else {
            debug!("Interface info for {} before its announce, ignoring", interface);
            return;
        };

        if previous.mtu != current.mtu {
            self.ctx
                .emit(NetworkEvent::MtuChanged {
                    interface: interface.clone(),
                    old_mtu: previous.mtu,
                    new_mtu: current.mtu,
                })
                .await;
        }

        if previous.link_state != current.link_state {
            match current.link_state {
                LinkState::Down => {
                    warn!("Link down on interface {}", interface);
                    self.deconfigure_lease(&interface).await;
                    self.ctx
                        .emit(NetworkEvent::LinkDown {
                            interface: interface.clone(),
                        })
                        .await;
                }
                LinkState::Up => {
                    warn!("Link up on interface {}", interface);
                    self.link_up(&interface).await;
                    self.ctx
                        .emit(NetworkEvent::LinkUp {
                            interface: interface.clone(),
                        })
                        .await;
                }
                LinkState::Unknown => {}
            }
        }

        if previous.flags != current.flags {
            let was_up = previous.flags.contains(&InterfaceFlag::Up);
            let is_up = current.flags.contains(&InterfaceFlag::Up);
            if was_up && !is_up {
                self.ctx
                    .emit(NetworkEvent::InterfaceDown {
                        interface: interface.clone(),
                    })
                    .await;
            }
            if !was_up && is_up {
                self.ctx
                    .emit(NetworkEvent::InterfaceUp {
                        interface: interface.clone(),
                    })
                    .await;
            }

            self.ctx
                .emit(NetworkEvent::FlagsChanged {
                    interface: interface.clone(),
                    old_flags: previous.flags.clone(),
                    new_flags: current.flags.clone(),
                })
                .await;
        }

        self.ctx
            .emit(NetworkEvent::interface_changed(interface.clone()))
            .await;
        self.cache.insert(interface, current);
    }

    async fn handle_address(
        &self,
        interface: String,
        action: AddressAction,
        address: Option<IpAddr>,
        prefix_len: u8,
    ) {
        let record = match self.ctx.store.get_interface(&interface).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!("Cannot look up interface {}: {}", interface, e);
                return;
            }
        };

        let Some(address) = address.filter(|a| !a.is_unspecified()) else {
            return;
        };

        match action {
            AddressAction::NewAddr => warn!(
                "New alias added to interface {} externally: {}/{}",
                interface, address, prefix_len
            ),
            AddressAction::DelAddr => warn!(
                "Alias removed from interface {} externally: {}/{}",
                interface, address, prefix_len
            ),
        }

        self.ctx
            .emit(NetworkEvent::interface_changed(record.id))
            .await;
    }

    async fn handle_route(&self, action: RouteAction, route: Route) {
        match action {
            RouteAction::Add | RouteAction::Change => {
                info!("Route to {} added", route);
                if route.is_default() && route.is_ipv4() && route.interface.is_some() {
                    self.default_interface.set(route.interface.clone());
                }
                self.ctx.emit(NetworkEvent::RouteAdded { route }).await;
            }
            RouteAction::Delete => {
                info!("Route to {} deleted", route);
                self.ctx.emit(NetworkEvent::RouteDeleted { route }).await;
            }
        }
    }

    async fn deconfigure_lease(&self, interface: &str) {
        match self.leases.stop(interface).await {
            Ok(()) | Err(Error::NotConfigured(_)) => {}
            Err(e) => error!("Cannot stop DHCP on {}: {}", interface, e),
        }
    }

    async fn link_up(&self, interface: &str) {
        match self.ctx.store.get_interface(interface).await {
            Ok(Some(record)) if record.dhcp => {
                if let Err(e) = self.leases.start(interface, false, Duration::ZERO).await {
                    error!("Cannot start DHCP on {}: {}", interface, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot look up interface {}: {}", interface, e),
        }
    }
}
