use std::net::Ipv4Addr;
use std::time::Duration;

use nitros_transport::MulticastConfig;
use tracing::warn;

/// Default discovery multicast group.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 73, 83);

/// Default discovery UDP port.
pub const DEFAULT_PORT: u16 = 47473;

/// Environment override for the multicast group.
pub const ENV_GROUP: &str = "NITROS_DISCOVERY_GROUP";
/// Environment override for the discovery port.
pub const ENV_PORT: &str = "NITROS_DISCOVERY_PORT";
/// Set to `1`/`true` to run every registry in local-only mode.
pub const ENV_DISABLED: &str = "NITROS_DISCOVERY_DISABLED";

/// Discovery registry settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Join the multicast group. `false` keeps the registry process-local.
    pub multicast: bool,
    /// Multicast group address.
    pub group: Ipv4Addr,
    /// UDP port shared by all participants.
    pub port: u16,
    /// Interface to join on (`UNSPECIFIED` lets the OS choose).
    pub interface: Ipv4Addr,
    /// Multicast TTL.
    pub ttl: u32,
    /// Receive our own datagrams (needed for several processes on one host).
    pub loopback: bool,
    /// How often local advertisements are re-broadcast.
    pub refresh_interval: Duration,
    /// Remote registrations not refreshed within this window are evicted.
    pub registration_ttl: Duration,
    /// How often the cache is swept for expired entries.
    pub sweep_interval: Duration,
    /// How often `resolve` repeats its query while waiting.
    pub query_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast: true,
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
            loopback: true,
            refresh_interval: Duration::from_secs(2),
            registration_ttl: Duration::from_secs(6),
            sweep_interval: Duration::from_secs(1),
            query_interval: Duration::from_secs(1),
        }
    }
}

impl DiscoveryConfig {
    /// Defaults with environment overrides applied.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// A registry that never touches the network. Useful for tests and
    /// single-process setups.
    pub fn local_only() -> Self {
        Self {
            multicast: false,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_group(mut self, group: Ipv4Addr) -> Self {
        self.group = group;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_registration_ttl(mut self, ttl: Duration) -> Self {
        self.registration_ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Socket settings for the transport layer.
    pub fn multicast_config(&self) -> MulticastConfig {
        MulticastConfig {
            group: self.group,
            port: self.port,
            interface: self.interface,
            ttl: self.ttl,
            loopback: self.loopback,
        }
    }

    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_GROUP) {
            match raw.trim().parse::<Ipv4Addr>() {
                Ok(group) if group.is_multicast() => self.group = group,
                _ => warn!(var = ENV_GROUP, value = %raw, "ignoring invalid multicast group"),
            }
        }
        if let Some(raw) = lookup(ENV_PORT) {
            match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => self.port = port,
                _ => warn!(var = ENV_PORT, value = %raw, "ignoring invalid discovery port"),
            }
        }
        if let Some(raw) = lookup(ENV_DISABLED) {
            if matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                self.multicast = false;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn apply(vars: &[(&str, &str)]) -> DiscoveryConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DiscoveryConfig::default().with_env_overrides(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = DiscoveryConfig::default();
        assert!(config.multicast);
        assert_eq!(config.multicast_config().group_addr().to_string(), "239.255.73.83:47473");
        assert!(config.registration_ttl > config.refresh_interval);
    }

    #[test]
    fn env_overrides_apply() {
        let config = apply(&[
            (ENV_GROUP, "239.1.2.3"),
            (ENV_PORT, "50000"),
            (ENV_DISABLED, "true"),
        ]);
        assert_eq!(config.group, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(config.port, 50000);
        assert!(!config.multicast);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let config = apply(&[
            (ENV_GROUP, "10.0.0.1"),
            (ENV_PORT, "not-a-port"),
            (ENV_DISABLED, "0"),
        ]);
        assert_eq!(config.group, DEFAULT_GROUP);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.multicast);
    }
}
