//! RFC 2131 client state machine
//!
//! One [`ProtocolClient`] per interface. `start` spawns a task that walks
//! INIT → SELECTING → REQUESTING → BOUND and then keeps the lease alive
//! through RENEWING and REBINDING. The task reports every transition to the
//! [`LeaseObserver`] it was created with.
//!
//! Stopping is cooperative: the task checks the stop signal at every network
//! wait and after every callback, never in the middle of a callback.

use super::lease::{ClientState, Lease, UnbindReason};
use super::message::{DhcpMessage, MessageKind};
use crate::config::DhcpClientConfig;
use crate::traits::{
    DhcpClient, DhcpClientFactory, DhcpTransport, DhcpTransportFactory, KernelNetwork,
    LeaseObserver,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Last lease seen per interface, used to start in INIT-REBOOT
type LeaseMemory = Arc<Mutex<HashMap<String, Lease>>>;

/// The client task was told to stop
struct Stopped;

type Step<T> = std::result::Result<T, Stopped>;

enum Command {
    Renew {
        timeout: Duration,
        reply: oneshot::Sender<Result<Lease>>,
    },
}

/// Creates [`ProtocolClient`]s sharing one transport factory
pub struct ProtocolClientFactory {
    kernel: Arc<dyn KernelNetwork>,
    transports: Arc<dyn DhcpTransportFactory>,
    config: DhcpClientConfig,
    memory: LeaseMemory,
}

impl ProtocolClientFactory {
    pub fn new(
        kernel: Arc<dyn KernelNetwork>,
        transports: Arc<dyn DhcpTransportFactory>,
        config: DhcpClientConfig,
    ) -> Self {
        Self {
            kernel,
            transports,
            config,
            memory: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl DhcpClientFactory for ProtocolClientFactory {
    fn create(
        &self,
        interface: &str,
        hostname: &str,
        observer: Arc<dyn LeaseObserver>,
    ) -> Result<Arc<dyn DhcpClient>> {
        Ok(Arc::new(ProtocolClient::new(
            interface,
            hostname,
            self.kernel.clone(),
            self.transports.clone(),
            self.config.clone(),
            observer,
            self.memory.clone(),
        )))
    }
}

/// Handle to one DHCP client task
pub struct ProtocolClient {
    interface: String,
    hostname: String,
    kernel: Arc<dyn KernelNetwork>,
    transports: Arc<dyn DhcpTransportFactory>,
    config: DhcpClientConfig,
    observer: Arc<dyn LeaseObserver>,
    memory: LeaseMemory,
    lease: Arc<watch::Sender<Option<Lease>>>,
    state: Arc<watch::Sender<ClientState>>,
    stop: watch::Sender<bool>,
    commands: mpsc::Sender<Command>,
    pending: Mutex<Option<mpsc::Receiver<Command>>>,
    link: Mutex<Option<(Arc<dyn DhcpTransport>, [u8; 6])>>,
}

impl ProtocolClient {
    pub fn new(
        interface: &str,
        hostname: &str,
        kernel: Arc<dyn KernelNetwork>,
        transports: Arc<dyn DhcpTransportFactory>,
        config: DhcpClientConfig,
        observer: Arc<dyn LeaseObserver>,
        memory: LeaseMemory,
    ) -> Self {
        let (commands, pending) = mpsc::channel(4);
        Self {
            interface: interface.to_string(),
            hostname: hostname.to_string(),
            kernel,
            transports,
            config,
            observer,
            memory,
            lease: Arc::new(watch::Sender::new(None)),
            state: Arc::new(watch::Sender::new(ClientState::Init)),
            stop: watch::Sender::new(false),
            commands,
            pending: Mutex::new(Some(pending)),
            link: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DhcpClient for ProtocolClient {
    fn interface(&self) -> &str {
        &self.interface
    }

    async fn start(&self) -> Result<()> {
        let commands = self
            .pending
            .lock()
            .map_err(|_| Error::Other("DHCP client lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| Error::Other(format!("DHCP client on {} already started", self.interface)))?;

        let iface = self
            .kernel
            .get_interface(&self.interface)
            .await?
            .ok_or_else(|| Error::not_found(format!("Interface {} not found", self.interface)))?;
        let hw_addr = iface.link_address.ok_or_else(|| {
            Error::invalid_argument(format!("Interface {} has no link address", self.interface))
        })?;

        let transport = self.transports.open(&self.interface, hw_addr)?;
        if let Ok(mut link) = self.link.lock() {
            *link = Some((transport.clone(), hw_addr));
        }

        let previous = self
            .memory
            .lock()
            .ok()
            .and_then(|m| m.get(&self.interface).cloned());

        let runner = Runner {
            interface: self.interface.clone(),
            hostname: self.hostname.clone(),
            hw_addr,
            transport,
            config: self.config.clone(),
            observer: self.observer.clone(),
            memory: self.memory.clone(),
            lease: self.lease.clone(),
            state: self.state.clone(),
            stop: self.stop.subscribe(),
            commands,
            previous,
            xid: 0,
        };

        debug!("Starting DHCP client on {}", self.interface);
        tokio::spawn(runner.run());
        Ok(())
    }

    fn stop(&self) {
        debug!("Stopping DHCP client on {}", self.interface);
        self.stop.send_replace(true);
    }

    async fn release(&self) -> Result<()> {
        let Some(lease) = self.lease.send_replace(None) else {
            return Ok(());
        };

        let link = self.link.lock().ok().and_then(|l| l.clone());
        let Some((transport, hw_addr)) = link else {
            return Ok(());
        };

        if let Ok(mut memory) = self.memory.lock() {
            memory.remove(&self.interface);
        }

        info!(
            "Releasing DHCP lease {} on {}",
            lease.client_ip, self.interface
        );
        let release = DhcpMessage::release(
            rand::random(),
            hw_addr,
            lease.client_ip,
            lease.server_address,
        );
        transport.send(&release, Some(lease.server_address)).await
    }

    async fn renew(&self, timeout: Duration) -> Result<Lease> {
        if self.lease.borrow().is_none() {
            return Err(Error::NoLease(format!(
                "No lease to renew on {}",
                self.interface
            )));
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Renew { timeout, reply })
            .await
            .map_err(|_| Error::not_configured(format!("DHCP client on {} is stopped", self.interface)))?;

        match tokio::time::timeout(timeout + Duration::from_secs(1), response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::not_configured(format!(
                "DHCP client on {} is stopped",
                self.interface
            ))),
            Err(_) => Err(Error::Timeout(format!("renewing lease on {}", self.interface))),
        }
    }

    async fn wait_for_bind(&self, timeout: Duration) -> Option<Lease> {
        let mut lease = self.lease.subscribe();
        let mut stop = self.stop.subscribe();

        let wait = async {
            loop {
                if let Some(bound) = lease.borrow_and_update().clone() {
                    return Some(bound);
                }
                if *stop.borrow_and_update() {
                    return None;
                }
                tokio::select! {
                    changed = lease.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    fn lease(&self) -> Option<Lease> {
        self.lease.borrow().clone()
    }

    fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    fn server_address(&self) -> Option<Ipv4Addr> {
        self.lease.borrow().as_ref().map(|l| l.server_address)
    }
}

/// Outcome of a renewal attempt
enum Renewal {
    Renewed(Lease),
    Revoked(String),
    NoAnswer,
}

/// The client task
struct Runner {
    interface: String,
    hostname: String,
    hw_addr: [u8; 6],
    transport: Arc<dyn DhcpTransport>,
    config: DhcpClientConfig,
    observer: Arc<dyn LeaseObserver>,
    memory: LeaseMemory,
    lease: Arc<watch::Sender<Option<Lease>>>,
    state: Arc<watch::Sender<ClientState>>,
    stop: watch::Receiver<bool>,
    commands: mpsc::Receiver<Command>,
    previous: Option<Lease>,
    xid: u32,
}

impl Runner {
    async fn run(mut self) {
        let _ = self.machine().await;
        self.lease.send_replace(None);
        debug!("DHCP client on {} exited", self.interface);
    }

    async fn machine(&mut self) -> Step<()> {
        loop {
            let previous = self.previous.take().filter(|l| !l.is_expired());
            let acquired = match previous {
                Some(previous) => match self.reboot(&previous).await? {
                    Some(lease) => Some(lease),
                    None => self.acquire().await?,
                },
                None => self.acquire().await?,
            };

            if let Some(lease) = acquired {
                self.bound(lease).await?;
            }
        }
    }

    fn check_stop(&self) -> Step<()> {
        if *self.stop.borrow() {
            Err(Stopped)
        } else {
            Ok(())
        }
    }

    async fn set_state(&mut self, state: ClientState) -> Step<()> {
        self.check_stop()?;
        if *self.state.borrow() != state {
            debug!("DHCP client on {} entering {}", self.interface, state);
            self.state.send_replace(state);
            self.observer.on_state_change(state).await;
        }
        self.check_stop()
    }

    async fn sleep_until(&mut self, deadline: Instant) -> Step<()> {
        tokio::select! {
            _ = sleep_until(deadline) => Ok(()),
            _ = self.stop.wait_for(|stopped| *stopped) => Err(Stopped),
        }
    }

    /// Send `message` and wait for a reply of one of the `wanted` kinds
    ///
    /// Retransmits with exponential backoff until `deadline`.
    async fn exchange(
        &mut self,
        message: &DhcpMessage,
        destination: Option<Ipv4Addr>,
        wanted: &[MessageKind],
        deadline: Instant,
    ) -> Step<Option<DhcpMessage>> {
        let mut attempt = 0;
        while Instant::now() < deadline {
            if let Err(e) = self.transport.send(message, destination).await {
                warn!("Cannot send DHCP message on {}: {}", self.interface, e);
            }

            let retransmit = (Instant::now() + self.config.retransmit_delay(attempt)).min(deadline);
            attempt += 1;

            loop {
                let received = tokio::select! {
                    received = self.transport.recv() => received,
                    _ = sleep_until(retransmit) => break,
                    _ = self.stop.wait_for(|stopped| *stopped) => return Err(Stopped),
                };

                match received {
                    Ok(reply) if reply.answers(self.xid, &self.hw_addr) && wanted.contains(&reply.kind) => {
                        return Ok(Some(reply));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("DHCP receive error on {}: {}", self.interface, e);
                        self.sleep_until(retransmit).await?;
                        break;
                    }
                }
            }
        }

        Ok(None)
    }

    /// INIT → SELECTING → REQUESTING
    ///
    /// Returns the acknowledged lease, or `None` when the exchange must start
    /// over from INIT.
    async fn acquire(&mut self) -> Step<Option<Lease>> {
        self.set_state(ClientState::Init).await?;
        self.xid = rand::random();

        self.set_state(ClientState::Selecting).await?;
        let discover = DhcpMessage::discover(self.xid, self.hw_addr, &self.hostname);
        let offer = loop {
            let deadline = Instant::now() + self.config.retransmit_delay(u32::MAX) * 4;
            if let Some(offer) = self
                .exchange(&discover, None, &[MessageKind::Offer], deadline)
                .await?
            {
                break offer;
            }
            debug!("No DHCP offer on {} yet", self.interface);
        };

        info!(
            "DHCP offer of {} on {} from {}",
            offer.yiaddr,
            self.interface,
            offer.server_id.map(|s| s.to_string()).unwrap_or_default()
        );

        self.set_state(ClientState::Requesting).await?;
        let request = DhcpMessage::request_offer(self.xid, self.hw_addr, &self.hostname, &offer);
        let deadline = Instant::now() + self.request_window();
        let reply = self
            .exchange(&request, None, &[MessageKind::Ack, MessageKind::Nak], deadline)
            .await?;

        match reply {
            Some(ack) if ack.kind == MessageKind::Ack => match Lease::from_ack(&ack) {
                Ok(lease) => Ok(Some(lease)),
                Err(e) => {
                    warn!("Unusable DHCP ACK on {}: {}", self.interface, e);
                    Ok(None)
                }
            },
            Some(nak) => {
                let reason = nak.message.unwrap_or_else(|| "DHCPNAK".to_string());
                self.observer.on_reject(reason).await;
                self.check_stop()?;
                let resume = Instant::now() + self.config.nak_backoff();
                self.sleep_until(resume).await?;
                Ok(None)
            }
            None => {
                debug!("No DHCP ACK on {}, restarting discovery", self.interface);
                Ok(None)
            }
        }
    }

    /// INIT-REBOOT → REBOOTING with a remembered address
    async fn reboot(&mut self, previous: &Lease) -> Step<Option<Lease>> {
        self.set_state(ClientState::InitReboot).await?;
        self.xid = rand::random();

        self.set_state(ClientState::Rebooting).await?;
        let request =
            DhcpMessage::request_reboot(self.xid, self.hw_addr, &self.hostname, previous.client_ip);
        let deadline = Instant::now() + self.request_window();
        let reply = self
            .exchange(&request, None, &[MessageKind::Ack, MessageKind::Nak], deadline)
            .await?;

        match reply {
            Some(ack) if ack.kind == MessageKind::Ack => Ok(Lease::from_ack(&ack).ok()),
            _ => {
                debug!(
                    "Previous address {} on {} not confirmed",
                    previous.client_ip, self.interface
                );
                Ok(None)
            }
        }
    }

    /// BOUND, RENEWING and REBINDING until the lease is lost
    async fn bound(&mut self, mut lease: Lease) -> Step<()> {
        let mut old: Option<Lease> = None;

        loop {
            self.set_state(ClientState::Bound).await?;
            self.observer.on_bind(old.take(), lease.clone()).await;
            self.check_stop()?;
            self.lease.send_replace(Some(lease.clone()));
            if let Ok(mut memory) = self.memory.lock() {
                memory.insert(self.interface.clone(), lease.clone());
            }

            let bound_at = Instant::now();
            let t1 = bound_at + lease.renewal_time();
            let t2 = bound_at + lease.rebinding_time();
            let expiry = bound_at + lease.lifetime();

            let renewal = loop {
                let command = tokio::select! {
                    _ = sleep_until(t1) => None,
                    command = self.commands.recv() => command,
                    _ = self.stop.wait_for(|stopped| *stopped) => return Err(Stopped),
                };

                let Some(Command::Renew { timeout, reply }) = command else {
                    self.set_state(ClientState::Renewing).await?;
                    break match self.renew(&lease, Some(lease.server_address), t2).await? {
                        Renewal::NoAnswer => {
                            self.set_state(ClientState::Rebinding).await?;
                            self.renew(&lease, None, expiry).await?
                        }
                        other => other,
                    };
                };

                self.set_state(ClientState::Renewing).await?;
                let deadline = (Instant::now() + timeout).min(expiry);
                match self
                    .renew(&lease, Some(lease.server_address), deadline)
                    .await?
                {
                    Renewal::Renewed(renewed) => {
                        let _ = reply.send(Ok(renewed.clone()));
                        break Renewal::Renewed(renewed);
                    }
                    Renewal::Revoked(reason) => {
                        let _ = reply.send(Err(Error::ProtocolRejected(reason.clone())));
                        break Renewal::Revoked(reason);
                    }
                    Renewal::NoAnswer => {
                        let _ = reply.send(Err(Error::Timeout(format!(
                            "renewing lease on {}",
                            self.interface
                        ))));
                        // The lease stays valid until its own timers run out
                        self.set_state(ClientState::Bound).await?;
                    }
                }
            };

            match renewal {
                Renewal::Renewed(renewed) => {
                    old = Some(std::mem::replace(&mut lease, renewed));
                }
                Renewal::Revoked(reason) => {
                    info!("DHCP lease on {} revoked: {}", self.interface, reason);
                    self.unbind(lease, UnbindReason::Revoke).await;
                    return self.check_stop();
                }
                Renewal::NoAnswer => {
                    self.unbind(lease, UnbindReason::Expire).await;
                    return self.check_stop();
                }
            }
        }
    }

    async fn renew(
        &mut self,
        lease: &Lease,
        server: Option<Ipv4Addr>,
        deadline: Instant,
    ) -> Step<Renewal> {
        self.xid = rand::random();
        let request =
            DhcpMessage::request_renew(self.xid, self.hw_addr, &self.hostname, lease.client_ip);
        let reply = self
            .exchange(&request, server, &[MessageKind::Ack, MessageKind::Nak], deadline)
            .await?;

        Ok(match reply {
            Some(ack) if ack.kind == MessageKind::Ack => match Lease::from_ack(&ack) {
                Ok(renewed) => Renewal::Renewed(renewed),
                Err(e) => Renewal::Revoked(e.to_string()),
            },
            Some(nak) => Renewal::Revoked(nak.message.unwrap_or_else(|| "DHCPNAK".to_string())),
            None => Renewal::NoAnswer,
        })
    }

    async fn unbind(&mut self, lease: Lease, reason: UnbindReason) {
        self.lease.send_replace(None);
        if let Ok(mut memory) = self.memory.lock() {
            memory.remove(&self.interface);
        }
        self.observer.on_unbind(lease, reason).await;
    }

    fn request_window(&self) -> Duration {
        (0..self.config.request_attempts)
            .map(|attempt| self.config.retransmit_delay(attempt))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDhcpServer, MemoryKernel};

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LeaseObserver for RecordingObserver {
        async fn on_bind(&self, old: Option<Lease>, lease: Lease) {
            let kind = if old.is_some() { "renew" } else { "bind" };
            self.events
                .lock()
                .unwrap()
                .push(format!("{} {}", kind, lease.client_ip));
        }

        async fn on_unbind(&self, _lease: Lease, reason: UnbindReason) {
            self.events.lock().unwrap().push(format!("unbind {}", reason));
        }

        async fn on_reject(&self, reason: String) {
            self.events.lock().unwrap().push(format!("reject {}", reason));
        }

        async fn on_state_change(&self, state: ClientState) {
            self.events.lock().unwrap().push(format!("state {}", state));
        }
    }

    fn setup(server: &MemoryDhcpServer) -> (ProtocolClientFactory, Arc<RecordingObserver>) {
        let kernel = Arc::new(MemoryKernel::with_interfaces(&["em0"]));
        let factory =
            ProtocolClientFactory::new(kernel, Arc::new(server.clone()), DhcpClientConfig::default());
        (factory, Arc::new(RecordingObserver::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_binds_through_selecting_and_requesting() {
        let server = MemoryDhcpServer::new("192.168.1.0/24".parse().unwrap());
        let (factory, observer) = setup(&server);
        let client = factory.create("em0", "nas", observer.clone()).unwrap();

        client.start().await.unwrap();
        let lease = client
            .wait_for_bind(Duration::from_secs(30))
            .await
            .expect("lease bound");

        assert_eq!(lease.router, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(client.state(), ClientState::Bound);
        assert_eq!(client.server_address(), Some(server.server_id()));
        assert_eq!(
            observer.events(),
            vec![
                "state SELECTING".to_string(),
                "state REQUESTING".to_string(),
                "state BOUND".to_string(),
                format!("bind {}", lease.client_ip),
            ]
        );
        client.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_renews_at_t1() {
        let server = MemoryDhcpServer::new("192.168.1.0/24".parse().unwrap()).with_lease_time(120);
        let (factory, observer) = setup(&server);
        let client = factory.create("em0", "nas", observer.clone()).unwrap();

        client.start().await.unwrap();
        let lease = client.wait_for_bind(Duration::from_secs(30)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(observer
            .events()
            .contains(&format!("renew {}", lease.client_ip)));
        assert_eq!(client.state(), ClientState::Bound);
        client.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_nak_while_requesting_rejects() {
        let server = MemoryDhcpServer::new("192.168.1.0/24".parse().unwrap());
        server.set_reject(true);
        let (factory, observer) = setup(&server);
        let client = factory.create("em0", "nas", observer.clone()).unwrap();

        client.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.stop();

        assert!(observer
            .events()
            .contains(&"reject request rejected".to_string()));
        assert!(client.lease().is_none());
        assert!(client.wait_for_bind(Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expires_without_server() {
        let server = MemoryDhcpServer::new("192.168.1.0/24".parse().unwrap()).with_lease_time(100);
        let (factory, observer) = setup(&server);
        let client = factory.create("em0", "nas", observer.clone()).unwrap();

        client.start().await.unwrap();
        client.wait_for_bind(Duration::from_secs(30)).await.unwrap();
        server.set_silent(true);

        tokio::time::sleep(Duration::from_secs(101)).await;
        let events = observer.events();
        assert!(events.contains(&"state RENEWING".to_string()));
        assert!(events.contains(&"state REBINDING".to_string()));
        assert!(events.contains(&"unbind expired".to_string()));
        assert!(client.lease().is_none());
        client.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_renew_and_release() {
        let server = MemoryDhcpServer::new("192.168.1.0/24".parse().unwrap());
        let (factory, observer) = setup(&server);
        let client = factory.create("em0", "nas", observer).unwrap();

        assert!(matches!(
            client.renew(Duration::from_secs(5)).await,
            Err(Error::NoLease(_))
        ));

        client.start().await.unwrap();
        let lease = client.wait_for_bind(Duration::from_secs(30)).await.unwrap();
        let renewed = client.renew(Duration::from_secs(5)).await.unwrap();
        assert_eq!(renewed.client_ip, lease.client_ip);

        client.release().await.unwrap();
        client.stop();
        assert_eq!(server.released(), vec![lease.client_ip]);
        assert!(client.lease().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_uses_init_reboot() {
        let server = MemoryDhcpServer::new("192.168.1.0/24".parse().unwrap());
        let (factory, observer) = setup(&server);

        let first = factory.create("em0", "nas", observer.clone()).unwrap();
        first.start().await.unwrap();
        let lease = first.wait_for_bind(Duration::from_secs(30)).await.unwrap();
        first.stop();

        let second = factory.create("em0", "nas", observer.clone()).unwrap();
        second.start().await.unwrap();
        let again = second.wait_for_bind(Duration::from_secs(30)).await.unwrap();
        second.stop();

        assert_eq!(again.client_ip, lease.client_ip);
        assert!(observer.events().contains(&"state REBOOTING".to_string()));
        assert_eq!(server.received(MessageKind::Discover), 1);
    }
}
