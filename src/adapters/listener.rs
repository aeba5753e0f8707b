//! TCP listeners and the accept loop.
//!
//! The HTTP port is always bound; the gRPC port gets its own listener only
//! when it differs. Both feed the same [`ConnectionDispatcher`], which sniffs
//! the protocol, so either port accepts either kind of traffic.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use eyre::{Result, WrapErr};
use tokio::{net::TcpListener, task::JoinSet};
use tracing::Instrument;

use crate::{
    adapters::dispatcher::ConnectionDispatcher,
    config::ServerConfig,
    tracing_setup::create_connection_span,
    utils::{ConnectionTracker, graceful_shutdown::ShutdownToken},
};

/// Pause after a failed accept so fd exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct ProxyServer {
    listeners: Vec<TcpListener>,
    dispatcher: Arc<ConnectionDispatcher>,
    tracker: Arc<ConnectionTracker>,
}

impl ProxyServer {
    /// Bind every configured port. Nothing is accepted until [`run`](Self::run).
    pub async fn bind(
        config: &ServerConfig,
        dispatcher: Arc<ConnectionDispatcher>,
        tracker: Arc<ConnectionTracker>,
    ) -> Result<Self> {
        let mut ports = vec![("http", config.http.port)];
        if !config.shares_port() {
            ports.push(("grpc", config.grpc.port));
        }

        let mut listeners = Vec::with_capacity(ports.len());
        for (kind, port) in ports {
            let addr = format!("{}:{}", config.listen_host, port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {kind} listener on {addr}"))?;
            tracing::info!(
                listener = kind,
                address = %listener.local_addr().context("Failed to get local addr")?,
                "Listener bound"
            );
            listeners.push(listener);
        }

        Ok(Self {
            listeners,
            dispatcher,
            tracker,
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Accept on all listeners until `shutdown` fires.
    pub async fn run(self, shutdown: ShutdownToken) {
        let mut loops = JoinSet::new();
        for listener in self.listeners {
            loops.spawn(accept_loop(
                listener,
                self.dispatcher.clone(),
                self.tracker.clone(),
                shutdown.clone(),
            ));
        }
        while loops.join_next().await.is_some() {}
        tracing::info!("All listeners stopped accepting");
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<ConnectionDispatcher>,
    tracker: Arc<ConnectionTracker>,
    mut shutdown: ShutdownToken,
) {
    let local_port = listener.local_addr().map(|a| a.port()).unwrap_or_default();

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::debug!(error = %e, port = local_port, "Accept error");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
            reason = shutdown.wait_for_shutdown() => {
                tracing::info!(?reason, port = local_port, "Stop accepting connections");
                return;
            }
        };

        let connection = tracker.register_connection(peer, local_port);
        let span = create_connection_span(connection.id(), peer, local_port);
        let dispatcher = dispatcher.clone();
        tokio::spawn(
            async move {
                dispatcher.handle(stream, peer).await;
                drop(connection);
            }
            .instrument(span),
        );
    }
}
