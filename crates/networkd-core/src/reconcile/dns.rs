//! Resolver list convergence

use crate::context::Context;
use crate::error::{Diagnostic, Result};
use crate::events::NetworkEvent;
use crate::model::InterfaceFilter;
use crate::traits::{ResolverConfig, LOOPBACK_SOURCE};
use tracing::{info, warn};

/// Regenerate the loopback resolver entry from the configured servers
///
/// Contributions of every other source are purged when DNS from DHCP is
/// disabled or no interface uses DHCP.
pub async fn reconcile_dns(ctx: &Context) -> Result<Vec<Diagnostic>> {
    info!("Starting DNS configuration");
    let settings = ctx.store.settings().await?;
    let dhcp_used = ctx.store.exists(&InterfaceFilter::Dhcp(true)).await?;
    let mut diagnostics = Vec::new();

    let config = ResolverConfig::new(settings.dns.addresses.clone(), settings.dns.search.clone());
    if let Err(e) = ctx.resolver.add(LOOPBACK_SOURCE, &config).await {
        warn!("Cannot configure DNS servers: {}", e);
        diagnostics.push(Diagnostic::new(libc::EFAULT, "Cannot configure DNS servers"));
        return Ok(diagnostics);
    }

    if !settings.dhcp.assign_dns || !dhcp_used {
        match ctx.resolver.sources().await {
            Ok(sources) => {
                for source in sources {
                    if source == LOOPBACK_SOURCE {
                        continue;
                    }
                    info!("Purging DNS configuration of {}", source);
                    if let Err(e) = ctx.resolver.delete(&source).await {
                        diagnostics.push(Diagnostic::from_error(
                            format!("Cannot delete DNS configuration of {}", source),
                            &e,
                        ));
                    }
                }
            }
            Err(e) => {
                warn!("Cannot list DNS sources: {}", e);
                diagnostics.push(Diagnostic::new(libc::EFAULT, "Cannot configure DNS servers"));
            }
        }
    }

    ctx.emit(NetworkEvent::DnsConfigured {
        addresses: settings.dns.addresses,
    })
    .await;

    Ok(diagnostics)
}
