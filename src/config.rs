/* src/config.rs */

use crate::error::ConfigError;
use crate::records::{is_domain_name, validate_domain_name};
use crate::rfc2317::rfc2317_stub;
use fancy_log::{LogLevel, log};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A nameserver group needs at least this many hosts.
pub const MIN_NAMESERVERS: usize = 2;
/// Fewer hosts than this in a group is allowed but logged.
pub const RECOMMENDED_NAMESERVERS: usize = 3;

const DEFAULT_CONFIG_TEMPLATE: &str = r#"
# Directory the generated <zone>.zone files are published to.
zone_dir = "/etc/bind/zones"

# Generated zone-inclusion config, included from named.conf.local.
bind_gen_conf = "/etc/bind/named.conf.generated"

# Zones and records to serve, loaded at start-up.
store_path = "/etc/zoneforge/store.toml"

# Only the primary promotes pending changes and advances serials.
primary = true

# Tick intervals in seconds.
generator_tick = 300
committer_tick = 60

# Deadline in seconds for each rndc / checker invocation.
command_timeout = 60

[cmd]
rndc = "/usr/sbin/rndc"
checkzone = "/usr/bin/named-checkzone"
checkconf = "/usr/bin/named-checkconf"

[nameservers]
# Group used by zones that do not name one.
default = "main"

[nameservers.groups]
main = ["ns1.example.com", "ns2.example.com", "ns3.example.com"]

# --- RFC 2317 classless reverse delegation ---
#
# [[reverse_stubs]]
# prefix = "192.0.2.128/26"
# admin = "hostmaster.example.com"
# delegate_to = ["ns1.customer.example.net", "ns2.customer.example.net"]
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub zone_dir: PathBuf,
    pub bind_gen_conf: PathBuf,
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default = "default_generator_tick")]
    pub generator_tick: u64,
    #[serde(default = "default_committer_tick")]
    pub committer_tick: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default)]
    pub cmd: CmdConfig,
    pub nameservers: NameserverConfig,
    #[serde(default)]
    pub reverse_stubs: Vec<ReverseStub>,
}

fn default_generator_tick() -> u64 {
    300
}

fn default_committer_tick() -> u64 {
    60
}

fn default_command_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CmdConfig {
    pub rndc: String,
    pub checkzone: String,
    pub checkconf: String,
}

impl Default for CmdConfig {
    fn default() -> Self {
        Self {
            rndc: "/usr/sbin/rndc".to_string(),
            checkzone: "/usr/bin/named-checkzone".to_string(),
            checkconf: "/usr/bin/named-checkconf".to_string(),
        }
    }
}

/// Authoritative nameserver hostnames by group key. NS records are always
/// synthesized from here, never stored.
#[derive(Debug, Clone, Deserialize)]
pub struct NameserverConfig {
    pub default: String,
    pub groups: BTreeMap<String, Vec<String>>,
}

impl NameserverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.groups.contains_key(&self.default) {
            return Err(ConfigError::Invalid(format!(
                "default nameserver group {:?} is not defined",
                self.default
            )));
        }
        for (key, hosts) in &self.groups {
            if hosts.len() < MIN_NAMESERVERS {
                return Err(ConfigError::Invalid(format!(
                    "nameserver group {:?} needs at least {} hosts",
                    key, MIN_NAMESERVERS
                )));
            }
            if let Some(bad) = hosts.iter().find(|h| !validate_domain_name(h)) {
                return Err(ConfigError::Invalid(format!(
                    "nameserver group {:?} has invalid host {:?}",
                    key, bad
                )));
            }
            if hosts.len() < RECOMMENDED_NAMESERVERS {
                log(
                    LogLevel::Warn,
                    &format!(
                        "Nameserver group {:?} has only {} hosts; {} or more are recommended.",
                        key,
                        hosts.len(),
                        RECOMMENDED_NAMESERVERS
                    ),
                );
            }
        }
        Ok(())
    }

    /// Hosts for a zone's group, or the default group when it names none.
    pub fn group(&self, key: Option<&str>) -> Option<&[String]> {
        self.groups
            .get(key.unwrap_or(&self.default))
            .map(Vec::as_slice)
    }
}

/// A classless prefix whose parent reverse zone this fleet serves.
#[derive(Debug, Clone, Deserialize)]
pub struct ReverseStub {
    pub prefix: IpNetwork,
    pub admin: String,
    #[serde(default = "default_stub_serial")]
    pub serial: u32,
    #[serde(default = "default_refresh")]
    pub refresh: u32,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_expire")]
    pub expire: u32,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub nameserver_group: Option<String>,
    /// Nameservers of the classless child zone.
    #[serde(default)]
    pub delegate_to: Vec<String>,
}

fn default_stub_serial() -> u32 {
    1
}

fn default_refresh() -> u32 {
    21600
}

fn default_retry() -> u32 {
    3600
}

fn default_expire() -> u32 {
    604800
}

fn default_ttl() -> u32 {
    86400
}

impl AppConfig {
    /// Loads config from `CONFIG_PATH` or defaults to `~/zoneforge/config.toml`.
    pub fn load_or_create_default() -> Result<Self, ConfigError> {
        let config_path = match env::var("CONFIG_PATH").ok().filter(|s| !s.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDir)?
                .join("zoneforge")
                .join("config.toml"),
        };

        if !config_path.exists() {
            log(
                LogLevel::Warn,
                &format!(
                    "Config file not found. Creating default at {:?}",
                    config_path
                ),
            );
            if let Some(parent_dir) = config_path.parent() {
                fs::create_dir_all(parent_dir).map_err(|source| ConfigError::Io {
                    path: parent_dir.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE).map_err(|source| ConfigError::Io {
                path: config_path.clone(),
                source,
            })?;
        }

        Self::load(&config_path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log(LogLevel::Info, &format!("Loading config from {:?}", path));
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.generator_tick == 0 || self.committer_tick == 0 {
            return Err(ConfigError::Invalid(
                "tick intervals must be at least one second".to_string(),
            ));
        }
        if self.command_timeout == 0 {
            return Err(ConfigError::Invalid(
                "command_timeout must be at least one second".to_string(),
            ));
        }
        self.nameservers.validate()?;

        for stub in &self.reverse_stubs {
            if rfc2317_stub(stub.prefix, None).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "reverse stub {} is unit-aligned and needs no RFC 2317 delegation",
                    stub.prefix
                )));
            }
            if !is_domain_name(&stub.admin) {
                return Err(ConfigError::Invalid(format!(
                    "reverse stub {} has invalid admin {:?}",
                    stub.prefix, stub.admin
                )));
            }
            if let Some(bad) = stub.delegate_to.iter().find(|h| !validate_domain_name(h)) {
                return Err(ConfigError::Invalid(format!(
                    "reverse stub {} delegates to invalid host {:?}",
                    stub.prefix, bad
                )));
            }
            if self.nameservers.group(stub.nameserver_group.as_deref()).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "reverse stub {} uses undefined nameserver group",
                    stub.prefix
                )));
            }
        }

        if self.reverse_stubs.is_empty() && !self.primary {
            log(
                LogLevel::Debug,
                "Secondary node without reverse stubs; only the builder will run.",
            );
        }
        Ok(())
    }

    pub fn generator_interval(&self) -> Duration {
        Duration::from_secs(self.generator_tick)
    }

    pub fn committer_interval(&self) -> Duration {
        Duration::from_secs(self.committer_tick)
    }

    pub fn command_deadline(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}
