use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use anyhow::{Context, Result};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Build a TLS acceptor when both key and certificate are usable.
///
/// Anything short of that downgrades to plaintext with a warning; this never fails.
pub fn load_tls(key_file: Option<&Path>, cert_file: Option<&Path>) -> Option<TlsAcceptor> {
    let (Some(key_file), Some(cert_file)) = (key_file, cert_file) else {
        tracing::warn!("TLS key or certificate not configured, serving unencrypted");
        return None;
    };

    match build_tls_config(key_file, cert_file) {
        Ok(config) => {
            tracing::info!("TLS enabled with certificate {}", cert_file.display());
            Some(TlsAcceptor::from(Arc::new(config)))
        }
        Err(e) => {
            tracing::warn!("Failed to load TLS material, serving unencrypted: {:#}", e);
            None
        }
    }
}

fn build_tls_config(key_file: &Path, cert_file: &Path) -> Result<ServerConfig> {
    let mut cert_reader = BufReader::new(
        File::open(cert_file)
            .with_context(|| format!("Failed to open certificate {}", cert_file.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {}", cert_file.display()))?;
    if certs.is_empty() {
        anyhow::bail!("No certificate found in {}", cert_file.display());
    }

    let mut key_reader = BufReader::new(
        File::open(key_file)
            .with_context(|| format!("Failed to open private key {}", key_file.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Failed to parse private key {}", key_file.display()))?
        .with_context(|| format!("No private key found in {}", key_file.display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid certificate/key pair")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// A running RPC listener
pub struct Transport {
    local_addr: SocketAddr,
    encrypted: bool,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Transport {
    /// Serve `router` on an already bound listener
    pub fn start(
        listener: TcpListener,
        router: Router,
        tls: Option<TlsAcceptor>,
    ) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let encrypted = tls.is_some();

        let handle = match tls {
            Some(acceptor) => tokio::spawn(serve_tls(listener, router, acceptor, cancel.clone())),
            None => {
                let shutdown = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, router)
                        .with_graceful_shutdown(async move { shutdown.cancelled().await })
                        .await
                    {
                        tracing::error!("Server error: {}", e);
                    }
                })
            }
        };

        tracing::info!(
            "RPC listening on {} ({})",
            local_addr,
            if encrypted { "TLS" } else { "plaintext" }
        );

        Ok(Self {
            local_addr,
            encrypted,
            cancel,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Stop accepting new connections. In-flight requests keep running.
    pub fn begin_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Close the listener and release it.
    ///
    /// Without `force` in-flight requests drain first, with no deadline.
    pub async fn shutdown(self, force: bool) {
        self.cancel.cancel();

        if force {
            self.handle.abort();
        }

        match self.handle.await {
            Ok(()) => tracing::info!("Transport on {} stopped", self.local_addr),
            Err(e) if e.is_cancelled() => {
                tracing::info!("Transport on {} aborted", self.local_addr)
            }
            Err(e) => tracing::error!("Transport task failed: {}", e),
        }
    }
}

/// Accept loop for TLS connections. Connections live in a JoinSet so that
/// aborting this task drops them all.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    acceptor: TlsAcceptor,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, remote_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let service = TowerToHyperService::new(router.clone());
                let cancel = cancel.clone();

                connections.spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::debug!("TLS handshake with {} failed: {}", remote_addr, e);
                            return;
                        }
                    };

                    let builder = auto::Builder::new(TokioExecutor::new());
                    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        result = conn.as_mut() => result,
                        _ = cancel.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };

                    if let Err(e) = result {
                        tracing::debug!("Connection error from {}: {}", remote_addr, e);
                    }
                });
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            _ = cancel.cancelled() => {
                tracing::debug!("TLS listener stopped accepting");
                break;
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}
