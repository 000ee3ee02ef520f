// # networkd - Network Configuration Daemon
//
// Thin integration layer: configuration, logging, runtime and signal
// handling. Every convergence, monitoring and DHCP decision lives in
// `networkd-core`.
//
// Startup sequence:
// 1. Read configuration from environment variables
// 2. Initialize tracing
// 3. Load the desired state (fatal on failure)
// 4. Build the collaborators and the network service
// 5. Scan interfaces, start the event monitor, converge the network
// 6. Wait for SIGTERM / SIGINT, then stop the monitor and every DHCP client
//
// ## Configuration
//
// - `NETWORKD_STATE_FILE`: JSON document with `interfaces`, `routes` and
//   `settings` (required)
// - `NETWORKD_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
// - `NETWORKD_INITIAL_DHCP_TIMEOUT_SECS`: Wait for the first lease (default: 180)
// - `NETWORKD_DHCP_RETRY_SECS`: Delay of the retry after a rejection (default: 60)
// - `NETWORKD_HOSTNAME`: Hostname sent in DHCP requests (default: system hostname)
// - `NETWORKD_RESOLVCONF`: Path of resolvconf(8), or `memory` (default: /sbin/resolvconf)
// - `NETWORKD_DHCP_TRANSPORT`: `udp` or `simulation` (default: simulation)
//
// ## Example
//
// ```bash
// export NETWORKD_STATE_FILE=/var/db/networkd/state.json
// export NETWORKD_DHCP_TRANSPORT=udp
//
// networkd
// ```

mod dispatch;

use anyhow::{Context as _, Result};
use dispatch::LocalDispatcher;
use ipnet::Ipv4Net;
use networkd_core::config::DaemonConfig;
use networkd_core::dhcp::ProtocolClientFactory;
use networkd_core::memory::{MemoryDhcpServer, MemoryKernel, MemoryResolver, MemoryStore};
use networkd_core::model::{InterfaceFilter, InterfaceType};
use networkd_core::traits::{DesiredStateStore, DhcpTransportFactory, Resolver};
use networkd_core::{Context, NetworkService};
use std::env;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound on stopping the monitor and the DHCP clients
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Network served by the simulated DHCP server
const SIMULATED_DHCP_NETWORK: (Ipv4Addr, u8) = (Ipv4Addr::new(192, 168, 100, 0), 24);

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy)]
enum NetworkdExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<NetworkdExitCode> for ExitCode {
    fn from(code: NetworkdExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportKind {
    Udp,
    Simulation,
}

/// Application configuration
#[derive(Debug)]
struct Config {
    state_file: Option<String>,
    log_level: String,
    initial_dhcp_timeout_secs: Option<u64>,
    dhcp_retry_secs: Option<u64>,
    hostname: Option<String>,
    resolvconf: String,
    dhcp_transport: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .with_context(|| format!("{} must be a number of seconds, got '{}'", key, value))
                })
                .transpose()
        };

        Ok(Self {
            state_file: lookup("NETWORKD_STATE_FILE"),
            log_level: lookup("NETWORKD_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            initial_dhcp_timeout_secs: number("NETWORKD_INITIAL_DHCP_TIMEOUT_SECS")?,
            dhcp_retry_secs: number("NETWORKD_DHCP_RETRY_SECS")?,
            hostname: lookup("NETWORKD_HOSTNAME").filter(|h| !h.is_empty()),
            resolvconf: lookup("NETWORKD_RESOLVCONF")
                .unwrap_or_else(|| "/sbin/resolvconf".to_string()),
            dhcp_transport: lookup("NETWORKD_DHCP_TRANSPORT")
                .unwrap_or_else(|| "simulation".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.state_file.as_deref() {
            None | Some("") => anyhow::bail!(
                "NETWORKD_STATE_FILE is required. \
                Set it via: export NETWORKD_STATE_FILE=/var/db/networkd/state.json"
            ),
            Some(path) if !std::path::Path::new(path).is_file() => {
                anyhow::bail!("NETWORKD_STATE_FILE does not exist: {}", path)
            }
            Some(_) => {}
        }

        if let Some(timeout) = self.initial_dhcp_timeout_secs
            && !(1..=3600).contains(&timeout)
        {
            anyhow::bail!(
                "NETWORKD_INITIAL_DHCP_TIMEOUT_SECS must be between 1 and 3600 seconds. Got: {}",
                timeout
            );
        }

        if let Some(delay) = self.dhcp_retry_secs
            && !(1..=3600).contains(&delay)
        {
            anyhow::bail!(
                "NETWORKD_DHCP_RETRY_SECS must be between 1 and 3600 seconds. Got: {}",
                delay
            );
        }

        self.transport()?;
        self.level()?;

        if self.resolvconf.is_empty() {
            anyhow::bail!("NETWORKD_RESOLVCONF cannot be empty");
        }

        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "NETWORKD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    fn transport(&self) -> Result<TransportKind> {
        match self.dhcp_transport.as_str() {
            "udp" => Ok(TransportKind::Udp),
            "simulation" => Ok(TransportKind::Simulation),
            other => anyhow::bail!(
                "NETWORKD_DHCP_TRANSPORT '{}' is not supported. \
                Supported transports: udp, simulation",
                other
            ),
        }
    }

    /// Core tunables with the environment overrides applied
    fn daemon_config(&self) -> Result<DaemonConfig> {
        let mut config = DaemonConfig::default();
        if let Some(timeout) = self.initial_dhcp_timeout_secs {
            config.engine.initial_dhcp_timeout_secs = timeout;
        }
        if let Some(delay) = self.dhcp_retry_secs {
            config.leases.retry_delay_secs = delay;
        }
        config.leases.hostname = self.hostname.clone().or_else(system_hostname);
        config.validate()?;
        Ok(config)
    }
}

/// Short system hostname
fn system_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .and_then(|name| short_hostname(&name))
}

/// First label of `name`, if any
fn short_hostname(name: &str) -> Option<String> {
    let short = name.split('.').next().unwrap_or_default().trim();
    (!short.is_empty()).then(|| short.to_string())
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return NetworkdExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return NetworkdExitCode::ConfigError.into();
    }

    let daemon_config = match config.daemon_config() {
        Ok(daemon_config) => daemon_config,
        Err(e) => {
            eprintln!("Configuration validation error: {:#}", e);
            return NetworkdExitCode::ConfigError.into();
        }
    };

    let log_level = config.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NetworkdExitCode::ConfigError.into();
    }

    info!("Starting networkd");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NetworkdExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let service = match start_daemon(&config, &daemon_config).await {
            Ok(service) => service,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return NetworkdExitCode::ConfigError;
            }
        };

        let code = match wait_for_shutdown().await {
            Ok(signal) => {
                info!("Received shutdown signal: {}", signal);
                NetworkdExitCode::CleanShutdown
            }
            Err(e) => {
                error!("Daemon error: {:#}", e);
                NetworkdExitCode::RuntimeError
            }
        };

        info!("Shutting down networkd");
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, service.shutdown())
            .await
            .is_err()
        {
            error!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT);
            return NetworkdExitCode::RuntimeError;
        }
        code
    })
    .into()
}

/// Build the service and run the initial convergence
async fn start_daemon(config: &Config, daemon_config: &DaemonConfig) -> Result<NetworkService> {
    let state_file = config.state_file.as_deref().unwrap_or_default();
    let store = Arc::new(
        MemoryStore::from_json_file(state_file)
            .await
            .context("Cannot load desired state")?,
    );

    let kernel = Arc::new(simulated_kernel(store.as_ref()).await?);
    let resolver = resolver(config);
    let transports = transports(config.transport()?)?;

    let ctx = Context::new(kernel.clone(), store, resolver, Arc::new(LocalDispatcher));
    let factory = Arc::new(ProtocolClientFactory::new(
        kernel,
        transports,
        daemon_config.dhcp_client.clone(),
    ));
    let service = NetworkService::new(ctx, factory, daemon_config);

    if let Err(e) = service.scan_interfaces().await {
        warn!("Interface scan failed: {}", e);
    }
    service.start_monitor().await;

    info!("Configuring network");
    match service.configure_network().await {
        Ok(diagnostics) => {
            for diagnostic in &diagnostics {
                info!("{}", diagnostic);
            }
            info!("Network configured, {} diagnostic(s)", diagnostics.len());
        }
        Err(e) => error!("Network configuration failed: {}", e),
    }

    Ok(service)
}

/// Kernel with one physical interface per desired physical record
async fn simulated_kernel(store: &MemoryStore) -> Result<MemoryKernel> {
    let records = store
        .query_interfaces(&InterfaceFilter::Cloned(false))
        .await
        .context("Cannot query desired interfaces")?;
    let names: Vec<&str> = records
        .iter()
        .filter(|r| r.kind != InterfaceType::Loopback)
        .map(|r| r.id.as_str())
        .collect();

    info!("Simulated kernel with interfaces {:?}", names);
    Ok(MemoryKernel::with_interfaces(&names))
}

fn resolver(config: &Config) -> Arc<dyn Resolver> {
    if config.resolvconf == "memory" {
        info!("Keeping resolver entries in memory");
        return Arc::new(MemoryResolver::new());
    }

    #[cfg(feature = "resolvconf")]
    {
        info!("Managing resolver entries with {}", config.resolvconf);
        Arc::new(networkd_resolvconf::ResolvconfResolver::new(&config.resolvconf))
    }

    #[cfg(not(feature = "resolvconf"))]
    {
        warn!("resolvconf support not built in, keeping resolver entries in memory");
        Arc::new(MemoryResolver::new())
    }
}

fn transports(kind: TransportKind) -> Result<Arc<dyn DhcpTransportFactory>> {
    match kind {
        TransportKind::Simulation => {
            let (network, prefix) = SIMULATED_DHCP_NETWORK;
            let network = Ipv4Net::new(network, prefix).context("Invalid simulated DHCP network")?;
            info!("Using simulated DHCP server on {}", network);
            Ok(Arc::new(MemoryDhcpServer::new(network)))
        }

        #[cfg(feature = "udp")]
        TransportKind::Udp => {
            info!("Using UDP DHCP transport");
            Ok(Arc::new(networkd_dhcp::UdpTransportFactory::new()))
        }

        #[cfg(not(feature = "udp"))]
        TransportKind::Udp => anyhow::bail!("UDP DHCP transport not built in"),
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
