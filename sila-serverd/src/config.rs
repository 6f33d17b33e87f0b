use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_BASE_PORT;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Definition-only features registered at startup
    #[serde(default)]
    pub features: Vec<FeatureConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_server_type")]
    pub server_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub vendor_url: String,
    /// Falls back to the identity store when unset
    pub uuid: Option<String>,
    #[serde(default = "default_true")]
    pub simulation_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_address")]
    pub address: IpAddr,
    /// Unset or 0 negotiates a port automatically
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u32,
    /// Restrict mDNS to a single interface
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureConfig {
    pub id: String,
    pub definition: Option<PathBuf>,
}

fn default_name() -> String {
    "SiLA Server".to_string()
}

fn default_server_type() -> String {
    "UnknownServerType".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_true() -> bool {
    true
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_max_port_attempts() -> u32 {
    1000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/sila-server/identity.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            server_type: default_server_type(),
            description: String::new(),
            version: default_version(),
            vendor_url: String::new(),
            uuid: None,
            simulation_mode: default_true(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: None,
            hostname: None,
            key_file: None,
            cert_file: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            base_port: default_base_port(),
            max_port_attempts: default_max_port_attempts(),
            interface: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.server.name, "SiLA Server");
        assert!(config.server.simulation_mode);
        assert!(config.server.uuid.is_none());
        assert!(config.network.address.is_unspecified());
        assert!(config.network.port.is_none());
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.base_port, 55001);
        assert_eq!(config.discovery.max_port_attempts, 1000);
        assert!(config.features.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            [server]
            name = "Pump Station"
            server_type = "PumpServer"
            uuid = "abc-123"
            simulation_mode = false

            [network]
            address = "127.0.0.1"
            port = 50052
            key_file = "/etc/sila-server/server.key"
            cert_file = "/etc/sila-server/server.crt"

            [discovery]
            enabled = false
            interface = "eth0"

            [store]
            db_path = "/tmp/identity.db"

            [[features]]
            id = "PumpControl"
            definition = "/etc/sila-server/features/PumpControl.sila.xml"

            [[features]]
            id = "Thermostat"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.name, "Pump Station");
        assert_eq!(config.server.uuid.as_deref(), Some("abc-123"));
        assert!(!config.server.simulation_mode);
        assert_eq!(config.network.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.network.port, Some(50052));
        assert!(config.network.key_file.is_some());
        assert!(!config.discovery.enabled);
        assert_eq!(config.discovery.interface.as_deref(), Some("eth0"));
        assert_eq!(config.store.db_path, PathBuf::from("/tmp/identity.db"));
        assert_eq!(config.features.len(), 2);
        assert!(config.features[1].definition.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/server.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
