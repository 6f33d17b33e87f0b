use std::collections::HashMap;
use std::net::IpAddr;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// A SiLA2 server found on the local network.
/// Produced by the discovery browser and consumed by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredServer {
    /// Full DNS-SD instance name, e.g. "abc-123._sila._tcp.local."
    pub instance_name: String,

    /// Server UUID, the first label of the instance name
    pub uuid: String,

    /// Human-readable name from the TXT record, if published
    pub server_name: Option<String>,

    /// Hostname, e.g. "lab-pc.local."
    pub hostname: String,

    /// Addresses the server resolved to
    pub addresses: Vec<IpAddr>,

    /// RPC port
    pub port: u16,

    /// TXT record key-value pairs
    pub txt: HashMap<String, String>,

    /// When the browser resolved this server
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredServer {
    /// Whether `name` identifies this server by display name, UUID or instance name
    pub fn matches(&self, name: &str) -> bool {
        self.server_name.as_deref() == Some(name)
            || self.uuid == name
            || self.instance_name == name
            || self.instance_name.trim_end_matches('.') == name
    }
}
