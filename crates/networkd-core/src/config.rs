//! Configuration types for the network daemon
//!
//! These are the daemon's own tunables. The desired network state itself
//! (interfaces, routes, gateways, DNS) lives in the desired-state source, see
//! [`crate::model::NetworkSettings`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Reconciliation engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Lease manager settings
    #[serde(default)]
    pub leases: LeaseConfig,

    /// Kernel event monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Interface scan / autoconfiguration filters
    #[serde(default)]
    pub scan: ScanConfig,

    /// DHCP protocol timers
    #[serde(default)]
    pub dhcp_client: DhcpClientConfig,
}

impl DaemonConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.engine.validate()?;
        self.leases.validate()?;
        self.dhcp_client.validate()?;
        Ok(())
    }
}

/// Reconciliation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a blocking DHCP start waits for the first lease (in seconds)
    #[serde(default = "default_initial_dhcp_timeout_secs")]
    pub initial_dhcp_timeout_secs: u64,

    /// Timeout for the router-solicitation service restart call (in seconds)
    #[serde(default = "default_service_restart_timeout_secs")]
    pub service_restart_timeout_secs: u64,

    /// Name of the router-solicitation helper service
    #[serde(default = "default_router_solicitation_service")]
    pub router_solicitation_service: String,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.initial_dhcp_timeout_secs == 0 {
            return Err(crate::Error::config("Initial DHCP timeout must be > 0"));
        }
        if self.router_solicitation_service.is_empty() {
            return Err(crate::Error::config(
                "Router solicitation service name cannot be empty",
            ));
        }
        Ok(())
    }

    pub fn initial_dhcp_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_dhcp_timeout_secs)
    }

    pub fn service_restart_timeout(&self) -> Duration {
        Duration::from_secs(self.service_restart_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_dhcp_timeout_secs: default_initial_dhcp_timeout_secs(),
            service_restart_timeout_secs: default_service_restart_timeout_secs(),
            router_solicitation_service: default_router_solicitation_service(),
        }
    }
}

/// Lease manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Delay before the single retry that follows a rejection (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Timeout of an explicit renew request (in seconds)
    #[serde(default = "default_renew_timeout_secs")]
    pub renew_timeout_secs: u64,

    /// Hostname sent in DHCP requests
    ///
    /// The daemon fills this from the system hostname when unset.
    #[serde(default)]
    pub hostname: Option<String>,
}

impl LeaseConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.renew_timeout_secs == 0 {
            return Err(crate::Error::config("Renew timeout must be > 0"));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn renew_timeout(&self) -> Duration {
        Duration::from_secs(self.renew_timeout_secs)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            renew_timeout_secs: default_renew_timeout_secs(),
            hostname: None,
        }
    }
}

/// Kernel event monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between an interface announce and the shadow cache rebuild
    ///
    /// Arrival messages may race with device initialization.
    #[serde(default = "default_announce_settle_ms")]
    pub announce_settle_ms: u64,
}

impl MonitorConfig {
    pub fn announce_settle(&self) -> Duration {
        Duration::from_millis(self.announce_settle_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            announce_settle_ms: default_announce_settle_ms(),
        }
    }
}

/// Interfaces the daemon never scans or autoconfigures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Exact interface names to skip
    #[serde(default = "default_ignored_interfaces")]
    pub ignored_interfaces: Vec<String>,

    /// Interface name prefixes to skip
    #[serde(default = "default_ignored_prefixes")]
    pub ignored_prefixes: Vec<String>,
}

impl ScanConfig {
    /// Whether the interface is excluded from scanning
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored_interfaces.iter().any(|n| n == name)
            || self.ignored_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ignored_interfaces: default_ignored_interfaces(),
            ignored_prefixes: default_ignored_prefixes(),
        }
    }
}

/// DHCP client protocol timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhcpClientConfig {
    /// First retransmission interval for DISCOVER/REQUEST (in seconds)
    #[serde(default = "default_retransmit_base_secs")]
    pub retransmit_base_secs: u64,

    /// Retransmission interval cap (in seconds)
    #[serde(default = "default_retransmit_max_secs")]
    pub retransmit_max_secs: u64,

    /// REQUEST attempts before falling back to INIT
    #[serde(default = "default_request_attempts")]
    pub request_attempts: u32,

    /// Pause after a NAK before discovering again (in seconds)
    #[serde(default = "default_nak_backoff_secs")]
    pub nak_backoff_secs: u64,
}

impl DhcpClientConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.retransmit_base_secs == 0 {
            return Err(crate::Error::config("DHCP retransmit interval must be > 0"));
        }
        if self.retransmit_max_secs < self.retransmit_base_secs {
            return Err(crate::Error::config(
                "DHCP retransmit cap must not be below the base interval",
            ));
        }
        if self.request_attempts == 0 {
            return Err(crate::Error::config("DHCP request attempts must be > 0"));
        }
        Ok(())
    }

    /// Retransmission delay for the given attempt (0-based), doubling up to the cap
    pub fn retransmit_delay(&self, attempt: u32) -> Duration {
        let secs = self
            .retransmit_base_secs
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.retransmit_max_secs);
        Duration::from_secs(secs)
    }

    pub fn nak_backoff(&self) -> Duration {
        Duration::from_secs(self.nak_backoff_secs)
    }
}

impl Default for DhcpClientConfig {
    fn default() -> Self {
        Self {
            retransmit_base_secs: default_retransmit_base_secs(),
            retransmit_max_secs: default_retransmit_max_secs(),
            request_attempts: default_request_attempts(),
            nak_backoff_secs: default_nak_backoff_secs(),
        }
    }
}

fn default_initial_dhcp_timeout_secs() -> u64 {
    180
}

fn default_service_restart_timeout_secs() -> u64 {
    300
}

fn default_router_solicitation_service() -> String {
    "rtsold".to_string()
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_renew_timeout_secs() -> u64 {
    30
}

fn default_announce_settle_ms() -> u64 {
    100
}

fn default_ignored_interfaces() -> Vec<String> {
    vec!["mgmt0".to_string(), "nat0".to_string()]
}

fn default_ignored_prefixes() -> Vec<String> {
    vec!["tap".to_string(), "brg".to_string()]
}

fn default_retransmit_base_secs() -> u64 {
    4
}

fn default_retransmit_max_secs() -> u64 {
    64
}

fn default_request_attempts() -> u32 {
    4
}

fn default_nak_backoff_secs() -> u64 {
    10
}
