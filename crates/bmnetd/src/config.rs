//! Agent configuration file
//!
//! Loads and validates bmnetd configuration from TOML.
//! Default location: /etc/bmnet/bmnetd.toml

use bmnet_common::{NetError, NetResult};
use bmnet_controller::{default_endpoint, AuthStrategy, KeystoneCredentials, SessionConfig};
use bmnet_netif::{InterfaceKind, NetworkConfig};
use bmnet_plumber::DEFAULT_SYSFS_NET_ROOT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bmnet/bmnetd.toml";

/// How requests to the controller authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    Noauth,
    Token,
    Keystone,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `[controller]` section
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller API URL; derived from `my_ip` when unset
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub auth_strategy: AuthKind,

    /// Static token for the `token` strategy
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub auth_url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(default = "default_domain_name")]
    pub domain_name: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure: bool,

    /// CA bundle for TLS verification
    #[serde(default)]
    pub cafile: Option<PathBuf>,

    /// Address of this host, used when `url` is unset
    #[serde(default)]
    pub my_ip: Option<String>,
}

/// `[agent]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSection {
    /// JSON inventory of nodes, ports and portgroups
    #[serde(default = "default_inventory")]
    pub inventory: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default = "default_sysfs_net_root")]
    pub sysfs_net_root: PathBuf,
}

/// Complete bmnetd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub agent: AgentSection,
}

fn default_domain_name() -> String {
    "Default".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_inventory() -> PathBuf {
    PathBuf::from("/var/lib/bmnet/inventory.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sysfs_net_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_NET_ROOT)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_strategy: AuthKind::default(),
            token: None,
            auth_url: None,
            username: None,
            password: None,
            project_name: None,
            domain_name: default_domain_name(),
            timeout_secs: default_timeout_secs(),
            insecure: false,
            cafile: None,
            my_ip: None,
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            inventory: default_inventory(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            sysfs_net_root: default_sysfs_net_root(),
        }
    }
}

impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ControllerConfig")
            .field("url", &self.url)
            .field("auth_strategy", &self.auth_strategy)
            .field("token", &redact(&self.token))
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("project_name", &self.project_name)
            .field("domain_name", &self.domain_name)
            .field("timeout_secs", &self.timeout_secs)
            .field("insecure", &self.insecure)
            .field("cafile", &self.cafile)
            .field("my_ip", &self.my_ip)
            .finish()
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> NetResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NetError::missing(format!("[controller] {} is required", name)))
}

impl ControllerConfig {
    /// Controller URL, if one is configured or derivable
    pub fn endpoint(&self) -> Option<String> {
        self.url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| self.my_ip.as_deref().map(default_endpoint))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn auth(&self) -> NetResult<AuthStrategy> {
        Ok(match self.auth_strategy {
            AuthKind::Noauth => AuthStrategy::NoAuth,
            AuthKind::Token => AuthStrategy::Token(required(&self.token, "token")?.to_string()),
            AuthKind::Keystone => AuthStrategy::Keystone(KeystoneCredentials {
                auth_url: required(&self.auth_url, "auth_url")?.to_string(),
                username: required(&self.username, "username")?.to_string(),
                password: required(&self.password, "password")?.to_string(),
                project_name: required(&self.project_name, "project_name")?.to_string(),
                domain_name: self.domain_name.clone(),
            }),
        })
    }

    /// Session settings, or `None` when no controller is configured
    pub fn session_config(&self) -> NetResult<Option<SessionConfig>> {
        let Some(endpoint) = self.endpoint() else {
            return Ok(None);
        };
        let mut config = SessionConfig::new(endpoint).with_auth(self.auth()?);
        config.timeout = self.timeout();
        config.insecure = self.insecure;
        config.cafile = self.cafile.clone();
        Ok(Some(config))
    }
}

impl AgentConfig {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load_or_default(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                NetError::invalid(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "bmnetd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(NetError::invalid(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> NetResult<()> {
        self.network.validate()?;

        if self.controller.timeout_secs == 0 {
            return Err(NetError::invalid("[controller] timeout_secs must be > 0"));
        }
        self.controller.auth()?;

        let needs_controller = matches!(
            self.network.interface,
            InterfaceKind::Ovs | InterfaceKind::Controller
        );
        if needs_controller && self.controller.endpoint().is_none() {
            return Err(NetError::missing(format!(
                "network interface '{}' needs [controller] url or my_ip",
                self.network.interface
            )));
        }

        if self.agent.log_level.trim().is_empty() {
            return Err(NetError::invalid("[agent] log_level must not be empty"));
        }
        Ok(())
    }
}
