use std::io;
use thiserror::Error;

/// Lookup of a feature identifier that was never registered
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feature '{feature_id}' is not implemented by this server")]
pub struct NotFoundError {
    pub feature_id: String,
}

/// Failures while settling the port the server listens and advertises on
#[derive(Debug, Error)]
pub enum PortError {
    #[error("no free port found in {attempts} attempts starting at {start}")]
    Exhausted { start: u16, attempts: u32 },

    #[error("failed to probe port {port}: {source}")]
    Probe {
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced by the server lifecycle
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server UUID must not be empty")]
    EmptyUuid,

    #[error("server is already running on {0}")]
    AlreadyRunning(std::net::SocketAddr),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("failed to bind transport: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to advertise server: {0}")]
    Advertise(#[source] anyhow::Error),
}
