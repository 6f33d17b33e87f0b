use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, TcpListener};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::{
    SILA_PROTOCOL_VERSION, SILA_SERVICE_TYPE, TXT_DESCRIPTION, TXT_SERVER_NAME, TXT_VERSION,
};
use crate::config::DiscoveryConfig;
use crate::error::PortError;

/// Descriptive fields published next to the protocol version
#[derive(Debug, Clone, Default)]
pub struct AdvertisementMetadata {
    pub server_name: String,
    pub description: String,
}

/// What the server announces on the local network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementRecord {
    pub service_type: String,
    /// "{uuid}.{service_type}"
    pub instance_name: String,
    pub uuid: String,
    pub address: IpAddr,
    pub port: u16,
    pub properties: HashMap<String, String>,
    pub hostname: String,
}

impl AdvertisementRecord {
    pub fn new(
        uuid: &str,
        address: IpAddr,
        port: u16,
        metadata: &AdvertisementMetadata,
        hostname: Option<&str>,
    ) -> Self {
        let properties = HashMap::from([
            (TXT_VERSION.to_string(), SILA_PROTOCOL_VERSION.to_string()),
            (TXT_SERVER_NAME.to_string(), metadata.server_name.clone()),
            (TXT_DESCRIPTION.to_string(), metadata.description.clone()),
        ]);

        let hostname = match hostname {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => default_hostname(),
        };

        Self {
            service_type: SILA_SERVICE_TYPE.to_string(),
            instance_name: format!("{}.{}", uuid, SILA_SERVICE_TYPE),
            uuid: uuid.to_string(),
            address,
            port,
            properties,
            hostname,
        }
    }

    fn to_service_info(&self) -> Result<ServiceInfo> {
        let host_name = mdns_hostname(&self.hostname);

        // An unspecified bind address says nothing to clients, let the daemon
        // publish every interface address instead.
        let service_info = if self.address.is_unspecified() {
            ServiceInfo::new(
                &self.service_type,
                &self.uuid,
                &host_name,
                "",
                self.port,
                self.properties.clone(),
            )
            .map(ServiceInfo::enable_addr_auto)
        } else {
            ServiceInfo::new(
                &self.service_type,
                &self.uuid,
                &host_name,
                self.address.to_string().as_str(),
                self.port,
                self.properties.clone(),
            )
        };

        service_info.context("Failed to create ServiceInfo")
    }
}

/// Settles the server port and publishes its DNS-SD record.
///
/// With discovery disabled no daemon is started: records are still built
/// and tracked, but nothing goes on the wire.
pub struct ServiceAdvertiser {
    daemon: Option<ServiceDaemon>,
    base_port: u16,
    max_port_attempts: u32,
    active: Option<AdvertisementRecord>,
}

impl ServiceAdvertiser {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let daemon = if config.enabled {
            let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
            if let Some(interface) = &config.interface {
                daemon
                    .disable_interface(mdns_sd::IfKind::All)
                    .context("Failed to disable default interfaces")?;
                daemon
                    .enable_interface(interface.as_str())
                    .with_context(|| format!("Failed to enable interface {}", interface))?;
            }
            Some(daemon)
        } else {
            tracing::info!("Service discovery disabled, server will not be advertised");
            None
        };

        Ok(Self {
            daemon,
            base_port: config.base_port,
            max_port_attempts: config.max_port_attempts,
            active: None,
        })
    }

    /// Handle to the mDNS daemon, shared with the browser
    pub fn daemon(&self) -> Option<&ServiceDaemon> {
        self.daemon.as_ref()
    }

    pub fn active(&self) -> Option<&AdvertisementRecord> {
        self.active.as_ref()
    }

    /// Pick a port that can be bound on `ip`.
    ///
    /// The probe listener is released before returning, so another process
    /// may still grab the port before the caller binds it.
    pub fn negotiate_port(&self, ip: IpAddr, requested: Option<u16>) -> Result<u16, PortError> {
        let start = match requested.filter(|p| *p != 0) {
            Some(port) => match probe_port(ip, port) {
                Ok(()) => return Ok(port),
                Err(e) if port_taken(&e) => {
                    tracing::warn!("Port {} unavailable ({}), searching for a free port", port, e);
                    self.base_port.max(port.saturating_add(1))
                }
                Err(e) => return Err(PortError::Probe { port, source: e }),
            },
            None => self.base_port,
        };

        for offset in 0..self.max_port_attempts {
            let Some(port) = u16::try_from(offset).ok().and_then(|o| start.checked_add(o)) else {
                break;
            };
            match probe_port(ip, port) {
                Ok(()) => {
                    tracing::debug!("Negotiated port {}", port);
                    return Ok(port);
                }
                Err(e) if port_taken(&e) => continue,
                Err(e) => return Err(PortError::Probe { port, source: e }),
            }
        }

        Err(PortError::Exhausted {
            start,
            attempts: self.max_port_attempts,
        })
    }

    /// Negotiate a port and publish the server under it
    pub fn register_service(
        &mut self,
        address: IpAddr,
        port: Option<u16>,
        metadata: &AdvertisementMetadata,
        uuid: &str,
        hostname: Option<&str>,
    ) -> Result<AdvertisementRecord> {
        let port = self.negotiate_port(address, port)?;
        let record = AdvertisementRecord::new(uuid, address, port, metadata, hostname);
        self.publish(record.clone())?;
        Ok(record)
    }

    /// Publish a record whose port is already settled, replacing any active one
    pub fn publish(&mut self, record: AdvertisementRecord) -> Result<()> {
        self.unregister_service();

        if let Some(daemon) = &self.daemon {
            let service_info = record.to_service_info().map_err(|e| {
                tracing::error!("Failed to build advertisement for {}: {:#}", record.instance_name, e);
                e
            })?;

            daemon
                .register(service_info)
                .context("Failed to register mDNS service")
                .map_err(|e| {
                    tracing::error!("Failed to advertise {}: {:#}", record.instance_name, e);
                    e
                })?;

            tracing::info!(
                "Registered {} as {} on port {}",
                SILA_SERVICE_TYPE,
                record.instance_name,
                record.port
            );
        } else {
            tracing::debug!("Discovery disabled, not publishing {}", record.instance_name);
        }

        self.active = Some(record);
        Ok(())
    }

    /// Retract the active record. Failures are logged, never returned.
    pub fn unregister_service(&mut self) {
        let Some(record) = self.active.take() else {
            return;
        };

        if let Some(daemon) = &self.daemon {
            match daemon.unregister(&record.instance_name) {
                Ok(_) => tracing::info!("Unregistered {}", record.instance_name),
                Err(e) => tracing::error!(
                    "Failed to unregister mDNS service {}: {}",
                    record.instance_name,
                    e
                ),
            }
        }
    }
}

impl Drop for ServiceAdvertiser {
    fn drop(&mut self) {
        self.unregister_service();
        if let Some(daemon) = self.daemon.take() {
            if let Err(e) = daemon.shutdown() {
                tracing::error!("Failed to shutdown mDNS daemon: {}", e);
            }
        }
    }
}

fn probe_port(ip: IpAddr, port: u16) -> io::Result<()> {
    let listener = TcpListener::bind((ip, port))?;
    drop(listener);
    Ok(())
}

fn port_taken(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
    )
}

/// The machine's host name as the OS reports it. mDNS publishes only its
/// first label, so resolving the domain part is not needed.
fn default_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(e) => {
            tracing::warn!("Failed to get system hostname: {}", e);
            "localhost".to_string()
        }
    }
}

/// mDNS host names are a single label in the `.local.` domain
fn mdns_hostname(hostname: &str) -> String {
    let label = hostname.split('.').next().unwrap_or_default();
    let label = if label.is_empty() { "localhost" } else { label };
    format!("{}.local.", label)
}
