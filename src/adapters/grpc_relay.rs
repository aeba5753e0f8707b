//! gRPC relay over prior-knowledge HTTP/2.
//!
//! The client gets a SETTINGS ack so it keeps talking, frames are read until
//! the first request `:path` is known, and then every byte the client sent
//! (first chunk, sniffed frames, live stream) is replayed to the upstream
//! untouched. Failures close the connection without any gRPC-level answer.
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{
    adapters::relay::{RelayStats, relay},
    core::{
        GatewayService,
        error::{ProxyError, ProxyResult},
        h2::{self, PathExtractor},
    },
};

/// Upper bound on bytes read while looking for the request path.
const MAX_SNIFF_BYTES: usize = 256 * 1024;

/// Read frames until a `:path` is decoded.
///
/// Returns the path and every byte read from `client` after the first chunk,
/// in arrival order.
async fn read_request_path(client: &mut TcpStream, initial: &[u8]) -> ProxyResult<(String, Bytes)> {
    let mut parse_buf = BytesMut::from(initial);
    let mut captured = BytesMut::new();
    let mut extractor = PathExtractor::new();
    let mut preface_seen = false;
    let mut chunk = vec![0u8; h2::MAX_FRAME_LEN];

    loop {
        if !preface_seen {
            preface_seen = h2::take_preface(&mut parse_buf)?;
        }
        if preface_seen {
            while let Some((header, payload)) = h2::next_frame(&mut parse_buf)? {
                if let Some(path) = extractor.on_frame(&header, &payload)? {
                    return Ok((path, captured.freeze()));
                }
            }
        }

        if captured.len() >= MAX_SNIFF_BYTES {
            return Err(ProxyError::protocol("no request path within sniff limit"));
        }

        let n = client
            .read(&mut chunk)
            .await
            .map_err(|e| ProxyError::protocol(format!("read failed before request path: {e}")))?;
        if n == 0 {
            return Err(ProxyError::protocol("connection closed before request path"));
        }
        captured.extend_from_slice(&chunk[..n]);
        parse_buf.extend_from_slice(&chunk[..n]);
    }
}

pub async fn proxy_grpc(
    gateway: &GatewayService,
    mut client: TcpStream,
    initial: Bytes,
    client_ip: &str,
) -> ProxyResult<RelayStats> {
    client
        .write_all(&h2::SETTINGS_ACK)
        .await
        .map_err(|e| ProxyError::protocol(format!("settings ack failed: {e}")))?;

    let (path, captured) = read_request_path(&mut client, &initial).await?;
    tracing::info!(path = %path, "proxy grpc request");

    let (service, method) = h2::split_grpc_path(&path).ok_or_else(|| ProxyError::not_found(&path))?;

    let route = gateway
        .routes()
        .grpc_route(service)
        .ok_or_else(|| ProxyError::not_found(service))?;

    if !route.ip_filter.allow(client_ip) {
        return Err(ProxyError::denied(
            path.clone(),
            format!("ip {client_ip} not allowed"),
        ));
    }
    if !route.methods.allow(method) {
        return Err(ProxyError::denied(path.clone(), "method not allowed"));
    }

    let upstream = TcpStream::connect(route.host.as_str())
        .await
        .map_err(|source| ProxyError::UpstreamUnavailable {
            host: route.host.clone(),
            source,
        })?;

    tracing::debug!(
        service = %route.proto_service,
        upstream = %route.host,
        replay_bytes = initial.len() + captured.len(),
        "grpc route resolved"
    );

    relay(
        client,
        upstream,
        vec![initial, captured],
        gateway.settings().grpc_timeout,
    )
    .await
}
