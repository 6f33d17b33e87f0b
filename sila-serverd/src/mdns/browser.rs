use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use anyhow::{Context, Result};
use chrono::Utc;
use shared::protocol::{SILA_SERVICE_TYPE, TXT_SERVER_NAME};
use shared::types::DiscoveredServer;

/// Client-side discovery of other SiLA2 servers on the local network
#[derive(Clone)]
pub struct ServiceBrowser {
    daemon: ServiceDaemon,
}

impl ServiceBrowser {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self { daemon }
    }

    /// Start a browser with its own mDNS daemon
    pub fn spawn() -> Result<Self> {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
        Ok(Self::new(daemon))
    }

    /// Wait up to `timeout` for a server matching `name` by display name,
    /// UUID or instance name.
    ///
    /// Each lookup browses on a short-lived daemon of its own. mdns-sd keeps
    /// one listener per service type, so browsing on the shared daemon would
    /// end a running `watch_for_new_services`.
    pub async fn find_service_by_name(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<DiscoveredServer>> {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
        let receiver = daemon
            .browse(SILA_SERVICE_TYPE)
            .context("Failed to browse for SiLA servers")?;

        let search = async {
            while let Ok(event) = receiver.recv_async().await {
                if let ServiceEvent::ServiceResolved(info) = event {
                    if let Some(server) = convert_service_info(&info) {
                        if server.matches(name) {
                            return Some(server);
                        }
                    }
                }
            }
            None
        };

        let found = tokio::time::timeout(timeout, search).await.unwrap_or(None);

        if let Err(e) = daemon.shutdown() {
            tracing::warn!("Failed to shut down lookup daemon: {}", e);
        }

        match &found {
            Some(server) => tracing::info!("Found {} at port {}", server.instance_name, server.port),
            None => tracing::debug!("No SiLA server named {} found within {:?}", name, timeout),
        }

        Ok(found)
    }

    /// Forward every newly resolved server to `tx` until cancelled.
    /// A server is sent again only after it was removed and came back.
    pub async fn watch_for_new_services(
        &self,
        tx: mpsc::Sender<DiscoveredServer>,
        cancel: CancellationToken,
    ) -> Result<()> {
        tracing::info!("Watching for SiLA servers");

        let receiver: flume::Receiver<ServiceEvent> = self
            .daemon
            .browse(SILA_SERVICE_TYPE)
            .context("Failed to browse for SiLA servers")?;

        let mut seen = HashSet::new();

        loop {
            tokio::select! {
                event = receiver.recv_async() => {
                    match event {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            let Some(server) = convert_service_info(&info) else {
                                continue;
                            };
                            if !seen.insert(server.instance_name.clone()) {
                                continue;
                            }
                            tracing::debug!("Resolved SiLA server: {}", server.instance_name);
                            if tx.send(server).await.is_err() {
                                tracing::debug!("Discovery receiver dropped, stopping watch");
                                break;
                            }
                        }
                        Ok(ServiceEvent::ServiceRemoved(_typ, fullname)) => {
                            tracing::debug!("SiLA server removed: {}", fullname);
                            seen.remove(&fullname);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Browse channel closed: {}", e);
                            break;
                        }
                    }
                }

                _ = cancel.cancelled() => {
                    tracing::info!("SiLA server watch shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.daemon.stop_browse(SILA_SERVICE_TYPE) {
            tracing::warn!("Failed to stop browsing {}: {}", SILA_SERVICE_TYPE, e);
        }

        Ok(())
    }
}

/// Convert an mdns-sd ServiceInfo to a DiscoveredServer
fn convert_service_info(info: &ServiceInfo) -> Option<DiscoveredServer> {
    let fullname = info.get_fullname();
    let uuid = fullname
        .strip_suffix(SILA_SERVICE_TYPE)
        .map(|prefix| prefix.trim_end_matches('.'))
        .filter(|uuid| !uuid.is_empty());

    let Some(uuid) = uuid else {
        tracing::debug!("Skipping service {} - not a SiLA instance name", fullname);
        return None;
    };

    let txt: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    let mut addresses: Vec<_> = info.get_addresses().iter().copied().collect();
    addresses.sort();

    Some(DiscoveredServer {
        instance_name: fullname.to_string(),
        uuid: uuid.to_string(),
        server_name: txt.get(TXT_SERVER_NAME).cloned(),
        hostname: info.get_hostname().to_string(),
        addresses,
        port: info.get_port(),
        txt,
        discovered_at: Utc::now(),
    })
}
