use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use axum::Router;
use indexmap::IndexMap;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use shared::protocol::{SILA_SERVICE_FEATURE, SIMULATION_CONTROLLER_FEATURE};
use crate::api::routes::{self, AppState};
use crate::config::{Config, DiscoveryConfig};
use crate::error::ServerError;
use crate::features::{FeatureRegistry, SILA_SERVICE_DEFINITION, SIMULATION_CONTROLLER_DEFINITION};
use crate::identity::{IdentityService, ServerIdentity};
use crate::mdns::advertise::{AdvertisementMetadata, AdvertisementRecord, ServiceAdvertiser};
use crate::mdns::browser::ServiceBrowser;
use crate::simulation::{ModeSwitch, SimulationCoordinator, SimulationMode, TransitionReport};
use crate::transport::{self, Transport};

/// Everything needed to construct a server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub identity: ServerIdentity,
    pub address: IpAddr,
    /// `None` or `Some(0)` negotiates a port
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub simulation_mode: bool,
    pub discovery: DiscoveryConfig,
}

impl ServerOptions {
    pub fn from_config(config: &Config, uuid: String) -> Self {
        Self {
            identity: ServerIdentity {
                name: config.server.name.clone(),
                description: config.server.description.clone(),
                version: config.server.version.clone(),
                server_type: config.server.server_type.clone(),
                uuid,
                vendor_url: config.server.vendor_url.clone(),
            },
            address: config.network.address,
            port: config.network.port,
            hostname: config.network.hostname.clone(),
            key_file: config.network.key_file.clone(),
            cert_file: config.network.cert_file.clone(),
            simulation_mode: config.server.simulation_mode,
            discovery: config.discovery.clone(),
        }
    }
}

/// The live parts of a third-party feature
#[derive(Default)]
pub struct FeatureHandler {
    routes: Option<Router>,
    mode_switch: Option<Arc<dyn ModeSwitch>>,
}

impl FeatureHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// RPC routes, served under `/{feature_id}`
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn with_mode_switch(mut self, mode_switch: Arc<dyn ModeSwitch>) -> Self {
        self.mode_switch = Some(mode_switch);
        self
    }
}

/// A SiLA2 server: built-in features, third-party features, the RPC
/// transport and the network advertisement.
pub struct SilaServer {
    address: IpAddr,
    port: Option<u16>,
    hostname: Option<String>,
    registry: Arc<FeatureRegistry>,
    identity: Arc<IdentityService>,
    simulation: Arc<SimulationCoordinator>,
    handlers: IndexMap<String, Router>,
    tls: Option<TlsAcceptor>,
    advertiser: ServiceAdvertiser,
    transport: Option<Transport>,
}

impl SilaServer {
    pub fn new(options: ServerOptions) -> Result<Self, ServerError> {
        if options.identity.uuid.trim().is_empty() {
            return Err(ServerError::EmptyUuid);
        }

        let registry = Arc::new(FeatureRegistry::new());
        let identity = Arc::new(IdentityService::new(options.identity, registry.clone()));
        let simulation = Arc::new(SimulationCoordinator::new(SimulationMode::from_simulating(
            options.simulation_mode,
        )));

        let tls = transport::load_tls(options.key_file.as_deref(), options.cert_file.as_deref());
        let advertiser = ServiceAdvertiser::new(&options.discovery).map_err(ServerError::Advertise)?;

        registry.register_document(SILA_SERVICE_FEATURE, SILA_SERVICE_DEFINITION);
        registry.register_document(SIMULATION_CONTROLLER_FEATURE, SIMULATION_CONTROLLER_DEFINITION);

        tracing::info!(
            "Created server {:?} ({}) in {} mode",
            identity.name(),
            identity.uuid(),
            simulation.mode()
        );

        Ok(Self {
            address: options.address,
            port: options.port,
            hostname: options.hostname,
            registry,
            identity,
            simulation,
            handlers: IndexMap::new(),
            tls,
            advertiser,
            transport: None,
        })
    }

    /// Register a third-party feature.
    ///
    /// `handler` may be `None` for features that only publish a definition.
    /// Routes added while the server runs are served from the next `run`.
    pub fn add_feature(
        &mut self,
        feature_id: &str,
        handler: Option<FeatureHandler>,
        definition_source: Option<&Path>,
    ) {
        self.registry.register(feature_id, definition_source);

        let FeatureHandler { routes, mode_switch } = handler.unwrap_or_default();

        if let Some(routes) = routes {
            if is_builtin(feature_id) || !is_identifier(feature_id) {
                tracing::error!("Cannot serve routes for feature id {:?}, ignoring them", feature_id);
            } else {
                if self.transport.is_some() {
                    tracing::warn!("Routes of feature {} are served after the next restart", feature_id);
                }
                self.handlers.insert(feature_id.to_string(), routes);
            }
        }

        self.simulation.register_module(feature_id, mode_switch);
    }

    /// Start serving and advertising.
    ///
    /// With `block` this waits for SIGINT/SIGTERM and then stops gracefully;
    /// otherwise it returns once started and `stop` is up to the caller.
    pub async fn run(&mut self, block: bool) -> Result<(), ServerError> {
        if let Some(transport) = &self.transport {
            return Err(ServerError::AlreadyRunning(transport.local_addr()));
        }

        let port = self.advertiser.negotiate_port(self.address, self.port)?;
        let listener = TcpListener::bind((self.address, port))
            .await
            .map_err(ServerError::Bind)?;
        let transport = Transport::start(listener, self.build_router(), self.tls.clone())
            .map_err(ServerError::Bind)?;

        let metadata = AdvertisementMetadata {
            server_name: self.identity.name(),
            description: self.identity.description().to_string(),
        };
        let record = AdvertisementRecord::new(
            self.identity.uuid(),
            self.address,
            transport.local_addr().port(),
            &metadata,
            self.hostname.as_deref(),
        );

        if let Err(e) = self.advertiser.publish(record) {
            transport.shutdown(true).await;
            return Err(ServerError::Advertise(e));
        }

        self.transport = Some(transport);

        if block {
            shutdown_signal().await;
            self.stop(false).await;
        }

        Ok(())
    }

    /// Stop accepting requests, retract the advertisement and release the transport.
    ///
    /// Without `force` in-flight requests finish first. Does nothing when stopped.
    pub async fn stop(&mut self, force: bool) {
        let Some(transport) = self.transport.take() else {
            return;
        };

        tracing::info!("Stopping server{}", if force { " (forced)" } else { "" });
        transport.begin_shutdown();
        self.advertiser.unregister_service();
        transport.shutdown(force).await;
        tracing::info!("Shutdown complete");
    }

    pub fn simulation_mode(&self) -> bool {
        self.simulation.is_simulating()
    }

    pub fn set_simulation_mode(&self, is_simulating: bool) -> TransitionReport {
        self.simulation.set_simulating(is_simulating)
    }

    pub fn rename_server(&self, new_name: &str) {
        self.identity.set_name(new_name);
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    pub fn identity(&self) -> &Arc<IdentityService> {
        &self.identity
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref().map(Transport::local_addr)
    }

    pub fn is_encrypted(&self) -> bool {
        self.tls.is_some()
    }

    pub fn advertisement(&self) -> Option<&AdvertisementRecord> {
        self.advertiser.active()
    }

    /// Browser sharing this server's mDNS daemon, when discovery is enabled
    pub fn browser(&self) -> Option<ServiceBrowser> {
        self.advertiser.daemon().cloned().map(ServiceBrowser::new)
    }

    fn build_router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            identity: self.identity.clone(),
            simulation: self.simulation.clone(),
        };

        self.handlers
            .iter()
            .fold(routes::router(state), |router, (feature_id, routes)| {
                router.nest(&format!("/{}", feature_id), routes.clone())
            })
    }
}

impl Drop for SilaServer {
    fn drop(&mut self) {
        if let Some(transport) = &self.transport {
            transport.begin_shutdown();
        }
    }
}

fn is_builtin(feature_id: &str) -> bool {
    feature_id == SILA_SERVICE_FEATURE || feature_id == SIMULATION_CONTROLLER_FEATURE
}

/// SiLA identifier: an uppercase ASCII letter followed by ASCII letters and digits
fn is_identifier(feature_id: &str) -> bool {
    let mut chars = feature_id.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutdown signal received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}
