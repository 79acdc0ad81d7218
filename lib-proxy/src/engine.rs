//! Proxy engine
//!
//! Owns the listener, performs both transport handshakes per accepted peer
//! and spawns one [`Session`] per connection. Metrics are engine-owned and
//! shared with sessions through an atomic-counter handle.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use lib_codec::adapters::CometBftAdapter;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::session::Session;
use crate::transport::SecretConnection;

/// Runs the proxy.
pub struct Engine {
    cfg: Arc<ProxyConfig>,
    adapter: Arc<CometBftAdapter>,
    metrics: Arc<Metrics>,
}

impl Engine {
    /// Construct an engine from a validated configuration.
    pub fn new(cfg: ProxyConfig) -> Self {
        let adapter = Arc::new(CometBftAdapter::new(cfg.chain_id.clone()));
        Self {
            cfg: Arc::new(cfg),
            adapter,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Counter handle, shared with all sessions.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Accept peers until `shutdown` fires.
    ///
    /// Shutdown stops the listener and waits for outstanding sessions.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ProxyError> {
        if self.cfg.listen_network != "tcp" {
            return Err(ProxyError::Transport(format!(
                "unsupported listen network {:?}",
                self.cfg.listen_network
            )));
        }
        if self.cfg.upstream_network != "tcp" {
            return Err(ProxyError::Transport(format!(
                "unsupported upstream network {:?}",
                self.cfg.upstream_network
            )));
        }

        let listener = TcpListener::bind(&self.cfg.listen_address).await?;
        info!(
            network = %self.cfg.listen_network,
            address = %self.cfg.listen_address,
            upstream = %self.cfg.upstream_address,
            "proxy listening"
        );

        let mut sessions: JoinSet<()> = JoinSet::new();
        let result = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, remote)) => {
                        info!(remote = %remote, "accepted peer");
                        let cfg = self.cfg.clone();
                        let adapter = self.adapter.clone();
                        let metrics = self.metrics.clone();
                        let session_shutdown = shutdown.clone();
                        sessions.spawn(async move {
                            if let Err(err) =
                                handle_connection(cfg, adapter, metrics, socket, session_shutdown).await
                            {
                                error!(remote = %remote, code = err.code(), error = %err, "connection handler exited");
                            }
                        });
                    }
                    Err(e) if is_transient_accept_error(&e) => {
                        warn!(error = %e, "transient accept error");
                        continue;
                    }
                    Err(e) => break Err(ProxyError::Io(e)),
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
                _ = shutdown.changed() => break Ok(()),
            }
        };

        drop(listener);
        while sessions.join_next().await.is_some() {}
        result
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.cfg
    }
}

async fn handle_connection(
    cfg: Arc<ProxyConfig>,
    adapter: Arc<CometBftAdapter>,
    metrics: Arc<Metrics>,
    downstream_socket: TcpStream,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ProxyError> {
    let _ = downstream_socket.set_nodelay(true);
    let downstream = SecretConnection::handshake(downstream_socket, &cfg.node_key)
        .await
        .map_err(|e| ProxyError::Handshake(format!("downstream peer: {e}")))?;

    let upstream_socket = dial_upstream(&cfg).await?;
    let _ = upstream_socket.set_nodelay(true);
    let upstream = SecretConnection::handshake(upstream_socket, &cfg.node_key)
        .await
        .map_err(|e| ProxyError::Handshake(format!("upstream validator: {e}")))?;

    info!(
        downstream = %downstream.remote_id(),
        upstream = %upstream.remote_id(),
        "session established"
    );

    let session = Session::new(cfg, adapter, metrics);
    session.run(downstream, upstream, shutdown).await
}

async fn dial_upstream(cfg: &ProxyConfig) -> Result<TcpStream, ProxyError> {
    match tokio::time::timeout(cfg.dial_timeout, TcpStream::connect(&cfg.upstream_address)).await {
        Ok(Ok(socket)) => Ok(socket),
        Ok(Err(e)) => Err(ProxyError::Io(e)),
        Err(_) => Err(ProxyError::DialTimeout(cfg.dial_timeout)),
    }
}

fn is_transient_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}
