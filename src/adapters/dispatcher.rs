//! Per-connection protocol dispatch.
//!
//! One read of up to [`SNIFF_CHUNK_SIZE`] bytes decides the connection's
//! fate: health check, HTTP/1.x relay, gRPC relay, or a silent close.
use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{
    adapters::{
        grpc_relay::proxy_grpc,
        http_relay::{HEALTH_OK_RESPONSE, proxy_http},
    },
    core::{
        GatewayService,
        protocol::{SNIFF_CHUNK_SIZE, Sniffed, header_first_value, sniff},
    },
};

pub struct ConnectionDispatcher {
    gateway: Arc<GatewayService>,
}

impl ConnectionDispatcher {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }

    /// Serve one accepted connection to completion. Errors are logged here
    /// and never escape the connection.
    pub async fn handle(&self, mut stream: TcpStream, peer: SocketAddr) {
        let mut buf = vec![0u8; SNIFF_CHUNK_SIZE];
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("connection closed before sending data");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "initial read failed");
                return;
            }
        };
        buf.truncate(n);
        let initial = Bytes::from(buf);
        let settings = self.gateway.settings();
        let peer_ip = peer.ip().to_string();

        let outcome = match sniff(&initial, &settings.health_uri) {
            Sniffed::HealthCheck => {
                if let Err(e) = stream.write_all(HEALTH_OK_RESPONSE).await {
                    tracing::debug!(error = %e, "failed to write health response");
                }
                return;
            }
            Sniffed::Http1(line) => {
                let path = line.path.to_string();
                let client_ip = header_first_value(&initial, &settings.ip_forwarded_header)
                    .unwrap_or(peer_ip);
                proxy_http(&self.gateway, stream, initial.clone(), &path, &client_ip)
                    .await
                    .map_err(|e| (e, path))
            }
            Sniffed::Http2(_) => proxy_grpc(&self.gateway, stream, initial.clone(), &peer_ip)
                .await
                .map_err(|e| (e, String::new())),
            Sniffed::Unknown => {
                tracing::warn!(bytes = n, "unsupported protocol, closing connection");
                return;
            }
        };

        match outcome {
            Ok(stats) => tracing::info!(
                bytes_to_upstream = stats.to_upstream,
                bytes_to_client = stats.to_client,
                timed_out = stats.timed_out,
                "connection relayed"
            ),
            Err((e, path)) => tracing::error!(
                error = %e,
                kind = e.kind(),
                path = %path,
                "connection failed"
            ),
        }
    }
}
