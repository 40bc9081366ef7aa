//! Container address discovery.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Phase, Result, within};
use crate::instance::InstanceId;
use crate::runtime::ContainerRuntime;

static DOTTED_QUAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}$").expect("valid IPv4 pattern")
});

/// Validate a raw address string as an IPv4 dotted quad.
pub fn parse_address(raw: &str) -> std::result::Result<Ipv4Addr, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("container has no address on this network".to_string());
    }
    if !DOTTED_QUAD.is_match(trimmed) {
        return Err(format!("invalid ip address: {trimmed}"));
    }
    trimmed
        .parse()
        .map_err(|e| format!("invalid ip address {trimmed}: {e}"))
}

/// Look up the address of `id` on the configured network.
pub async fn discover_address(
    runtime: &dyn ContainerRuntime,
    config: &HarnessConfig,
    id: &InstanceId,
) -> Result<Ipv4Addr> {
    log_command!(
        config.verbose,
        "+docker inspect {} -f {{{{ .NetworkSettings.Networks.{}.IPAddress }}}}",
        id.as_str(),
        config.network
    );

    let raw = within(Phase::Discover, config.timeouts.discover, async {
        runtime
            .network_address(id.as_str(), &config.network)
            .await
            .map_err(|e| HarnessError::NetworkDiscovery {
                instance: id.short().to_string(),
                reason: e.to_string(),
                output: String::new(),
            })
    })
    .await?;

    parse_address(&raw).map_err(|reason| HarnessError::NetworkDiscovery {
        instance: id.short().to_string(),
        reason,
        output: raw.clone(),
    })
}
