//! Test doubles and common utilities for contract tests
//!
//! The kernel, store, resolver and DHCP server are the in-memory
//! implementations from `networkd_core::memory`; only the event bus and the
//! client factory are doubles, so that tests can count what went through
//! them.

#![allow(dead_code)]

use async_trait::async_trait;
use networkd_core::config::DhcpClientConfig;
use networkd_core::dhcp::ProtocolClientFactory;
use networkd_core::error::{Error, Result};
use networkd_core::memory::{MemoryDhcpServer, MemoryKernel, MemoryResolver, MemoryStore, StoreSeed};
use networkd_core::model::{Alias, AliasConfig, InterfaceConfig, InterfaceType};
use networkd_core::traits::{
    DesiredStateStore, DhcpClient, DhcpClientFactory, Dispatcher, LeaseObserver,
};
use networkd_core::{Context, DaemonConfig, NetworkEvent, NetworkService};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Event bus double recording every notification and outbound call
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<NetworkEvent>>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    fail_calls: AtomicBool,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<NetworkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    /// Number of emitted events called `name`
    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| **n == name).count()
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every `call_sync` fail from now on
    pub fn fail_calls(&self) {
        self.fail_calls.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn emit_event(&self, event: NetworkEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn call_sync(
        &self,
        method: &str,
        args: serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.calls.lock().unwrap().push((method.to_string(), args));
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(Error::dispatch(format!("{} failed", method)));
        }
        Ok(serde_json::Value::Null)
    }
}

/// Client factory counting how many clients were created
pub struct CountingFactory {
    inner: ProtocolClientFactory,
    created: AtomicUsize,
}

impl CountingFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DhcpClientFactory for CountingFactory {
    fn create(
        &self,
        interface: &str,
        hostname: &str,
        observer: Arc<dyn LeaseObserver>,
    ) -> Result<Arc<dyn DhcpClient>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.inner.create(interface, hostname, observer)
    }
}

/// A fully wired service over in-memory collaborators
pub struct Harness {
    pub kernel: Arc<MemoryKernel>,
    pub store: Arc<MemoryStore>,
    pub resolver: Arc<MemoryResolver>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub server: MemoryDhcpServer,
    pub factory: Arc<CountingFactory>,
    pub service: NetworkService,
}

impl Harness {
    /// DHCP served from 192.168.1.0/24 (router and DNS 192.168.1.1)
    pub fn new(kernel: MemoryKernel, seed: StoreSeed) -> Self {
        Self::with_config(kernel, seed, DaemonConfig::default())
    }

    pub fn with_config(kernel: MemoryKernel, seed: StoreSeed, config: DaemonConfig) -> Self {
        let kernel = Arc::new(kernel);
        let store = Arc::new(MemoryStore::from_seed(seed));
        let resolver = Arc::new(MemoryResolver::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let server = MemoryDhcpServer::new("192.168.1.0/24".parse().unwrap());

        let factory = Arc::new(CountingFactory {
            inner: ProtocolClientFactory::new(
                kernel.clone(),
                Arc::new(server.clone()),
                DhcpClientConfig::default(),
            ),
            created: AtomicUsize::new(0),
        });

        let ctx = Context::new(
            kernel.clone(),
            store.clone(),
            resolver.clone(),
            dispatcher.clone(),
        );
        let service = NetworkService::new(ctx, factory.clone(), &config);

        Self {
            kernel,
            store,
            resolver,
            dispatcher,
            server,
            factory,
            service,
        }
    }

    /// Desired record of `id`
    pub async fn store_record(&self, id: &str) -> InterfaceConfig {
        self.store.get_interface(id).await.unwrap().unwrap()
    }

    pub async fn update_record(&self, record: InterfaceConfig) {
        self.store.update_interface(record).await.unwrap();
    }

    /// Kernel mutation ops in order, as `op target detail`
    pub fn mutation_log(&self) -> Vec<String> {
        self.kernel
            .mutations()
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    /// Position of the first mutation log entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.mutation_log().iter().position(|m| m.starts_with(prefix))
    }
}

/// `"10.0.0.5/24"` as a kernel alias
pub fn alias(text: &str) -> Alias {
    let (address, prefix) = text.split_once('/').unwrap();
    Alias::new(address.parse::<IpAddr>().unwrap(), prefix.parse().unwrap())
}

/// `"10.0.0.5/24"` as a desired alias
pub fn alias_config(text: &str) -> AliasConfig {
    let (address, prefix) = text.split_once('/').unwrap();
    AliasConfig::new(address.parse::<IpAddr>().unwrap(), prefix.parse::<u8>().unwrap())
}

/// An enabled physical interface record
pub fn ether(name: &str) -> InterfaceConfig {
    InterfaceConfig::new(name, InterfaceType::Ether).with_enabled(true)
}

pub fn seed(interfaces: Vec<InterfaceConfig>) -> StoreSeed {
    StoreSeed {
        interfaces,
        ..Default::default()
    }
}
