//! Access policy: peer certificate Common Name → [`ClientHost`].
//!
//! Loaded once at startup from [`crate::config::Config`] and shared
//! read-only across every connection task behind an `Arc` (cheap clone per
//! connection, no lock contention — the map never mutates after startup).

use std::{collections::HashMap, sync::Arc};

use bitflags::bitflags;

use crate::config::Config;

/// The synthetic host name used for `tlsopt` debug-mode connections.
pub const DEBUG_HOST: &str = "DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Cgi,
    Service,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const PROXY_ALLOWED = 0b01;
        const TICKET_ALLOWED = 0b10;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBinding {
    pub service_cookie_prefix: String,
    pub service_hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHost {
    pub hostname: String,
    pub role: Role,
    pub flags: Flags,
    pub proxies: Vec<ProxyBinding>,
}

impl ClientHost {
    pub fn can_proxy(&self) -> bool {
        self.flags.contains(Flags::PROXY_ALLOWED)
    }

    pub fn can_retrieve_tickets(&self) -> bool {
        self.flags.contains(Flags::TICKET_ALLOWED)
    }
}

/// Peer Common Name → [`ClientHost`], built once from configuration.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    hosts: Arc<HashMap<String, ClientHost>>,
    debug_enabled: bool,
}

impl AccessPolicy {
    pub fn from_config(config: &Config) -> Self {
        let mut hosts = HashMap::with_capacity(config.client_hosts.len());
        let mut debug_enabled = false;

        for entry in &config.client_hosts {
            if entry.hostname == DEBUG_HOST {
                debug_enabled = true;
            }
            let host = ClientHost {
                hostname: entry.hostname.clone(),
                role: entry.role.into(),
                flags: config.client_host_flags(entry),
                proxies: entry
                    .proxies
                    .iter()
                    .map(|p| ProxyBinding {
                        service_cookie_prefix: p.service_cookie_prefix.clone(),
                        service_hostname: p.service_hostname.clone(),
                    })
                    .collect(),
            };
            hosts.insert(entry.hostname.clone(), host);
        }

        Self {
            hosts: Arc::new(hosts),
            debug_enabled,
        }
    }

    /// Looks up the host registered for a peer certificate's Common Name.
    pub fn lookup(&self, common_name: &str) -> Option<&ClientHost> {
        self.hosts.get(common_name)
    }

    /// Whether a `DEBUG` synthetic host is configured, required for `tlsopt`
    /// debug-mode startup (§4.3 of the spec).
    pub fn debug_host(&self) -> Option<&ClientHost> {
        if self.debug_enabled {
            self.hosts.get(DEBUG_HOST)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientHostConfig, ProxyConfig, RoleConfig};

    fn base_config() -> Config {
        let toml = r#"
            [server]
            cookie_dir = "/c"
            ticket_dir = "/t"
            hostname = "sso1.example.edu"
            [tls]
            cert = "/c.pem"
            key = "/k.pem"
            ca_bundle = "/ca.pem"
        "#;
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn resolves_role_and_flags() {
        let mut config = base_config();
        config.client_hosts.push(ClientHostConfig {
            hostname: "svc1".into(),
            role: RoleConfig::Service,
            proxy_allowed: true,
            ticket_allowed: false,
            proxies: vec![ProxyConfig {
                service_cookie_prefix: "cosign-weblogin".into(),
                service_hostname: "weblogin.example.edu".into(),
            }],
        });
        let policy = AccessPolicy::from_config(&config);
        let host = policy.lookup("svc1").expect("host present");
        assert_eq!(host.role, Role::Service);
        assert!(host.can_proxy());
        assert!(!host.can_retrieve_tickets());
        assert_eq!(host.proxies.len(), 1);
        assert!(policy.lookup("nope").is_none());
    }

    #[test]
    fn debug_host_requires_configured_entry() {
        let config = base_config();
        let policy = AccessPolicy::from_config(&config);
        assert!(policy.debug_host().is_none());

        let mut config = base_config();
        config.client_hosts.push(ClientHostConfig {
            hostname: DEBUG_HOST.into(),
            role: RoleConfig::Cgi,
            proxy_allowed: false,
            ticket_allowed: false,
            proxies: vec![],
        });
        let policy = AccessPolicy::from_config(&config);
        assert!(policy.debug_host().is_some());
    }
}
