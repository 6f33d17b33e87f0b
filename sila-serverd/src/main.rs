use anyhow::{Context, Result};
use sila_serverd::config::Config;
use sila_serverd::server::{ServerOptions, SilaServer};
use sila_serverd::store::IdentityStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sila_serverd=info"))
        )
        .init();

    tracing::info!("Starting sila-serverd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/sila-server/server.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Resolve a stable UUID, from config or the identity store
    let uuid = match &config.server.uuid {
        Some(uuid) => uuid.clone(),
        None => {
            let store = IdentityStore::open(&config.store.db_path)?;
            tracing::info!("Opened identity store at {:?}", config.store.db_path);
            store.get_or_create_uuid(&config.server.name)?
        }
    };

    let mut server = SilaServer::new(ServerOptions::from_config(&config, uuid))
        .context("Failed to create server")?;

    for feature in &config.features {
        server.add_feature(&feature.id, None, feature.definition.as_deref());
    }

    // Serve until ctrl-c / SIGTERM, then shut down gracefully
    server.run(true).await.context("Server failed")?;

    Ok(())
}
