//! TOML configuration for the daemon.
//!
//! The site configuration parser itself (how an operator's inventory of
//! hosts becomes this struct) is an external collaborator (see the spec's
//! §1 scope note) — this module only owns the shape that collaborator
//! produces and how it's loaded from disk.

use std::{net::SocketAddr, path::Path, str::FromStr};

use serde::Deserialize;

use crate::access::{Flags, Role};
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub client_hosts: Vec<ClientHostConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    pub cookie_dir: std::path::PathBuf,
    pub ticket_dir: std::path::PathBuf,
    pub hostname: String,
    #[serde(default)]
    pub debug: bool,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from_str("0.0.0.0:6663").expect("valid default bind address")
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert: std::path::PathBuf,
    pub key: std::path::PathBuf,
    pub ca_bundle: std::path::PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ReplicationConfig {
    pub peer: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientHostConfig {
    pub hostname: String,
    pub role: RoleConfig,
    #[serde(default)]
    pub proxy_allowed: bool,
    #[serde(default)]
    pub ticket_allowed: bool,
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoleConfig {
    Cgi,
    Service,
}

impl From<RoleConfig> for Role {
    fn from(value: RoleConfig) -> Self {
        match value {
            RoleConfig::Cgi => Role::Cgi,
            RoleConfig::Service => Role::Service,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    pub service_cookie_prefix: String,
    pub service_hostname: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub module_levels: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Reads and parses the configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the `hostname -> ClientHost` access-policy map that
    /// [`crate::access::AccessPolicy`] consumes.
    pub fn client_host_flags(&self, host: &ClientHostConfig) -> Flags {
        let mut flags = Flags::empty();
        if host.proxy_allowed {
            flags |= Flags::PROXY_ALLOWED;
        }
        if host.ticket_allowed {
            flags |= Flags::TICKET_ALLOWED;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [server]
            cookie_dir = "/var/cosign/cookies"
            ticket_dir = "/var/cosign/tickets"
            hostname = "sso1.example.edu"

            [tls]
            cert = "/etc/cosign/cert.pem"
            key = "/etc/cosign/key.pem"
            ca_bundle = "/etc/cosign/ca.pem"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.hostname, "sso1.example.edu");
        assert_eq!(config.server.bind, default_bind());
        assert!(!config.server.debug);
        assert!(config.client_hosts.is_empty());
        assert!(config.replication.peer.is_none());
    }

    #[test]
    fn parses_client_hosts_with_proxies() {
        let toml = r#"
            [server]
            cookie_dir = "/c"
            ticket_dir = "/t"
            hostname = "sso1.example.edu"
            [tls]
            cert = "/c.pem"
            key = "/k.pem"
            ca_bundle = "/ca.pem"

            [[client_hosts]]
            hostname = "svc1.example.edu"
            role = "service"
            proxy_allowed = true
            ticket_allowed = true
            [[client_hosts.proxies]]
            service_cookie_prefix = "cosign-weblogin"
            service_hostname = "weblogin.example.edu"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.client_hosts.len(), 1);
        let host = &config.client_hosts[0];
        assert_eq!(host.role, RoleConfig::Service);
        assert_eq!(host.proxies.len(), 1);
        assert_eq!(host.proxies[0].service_cookie_prefix, "cosign-weblogin");
    }
}
