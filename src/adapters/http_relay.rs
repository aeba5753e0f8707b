//! HTTP/1.x relay: longest-prefix routing with an in-place path splice.
use bytes::Bytes;
use tokio::{io::AsyncWriteExt, net::TcpStream};

use crate::{
    adapters::relay::{RelayStats, relay},
    core::{
        GatewayService,
        error::{ProxyError, ProxyResult},
        protocol::splice_path,
    },
};

pub const HEALTH_OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
pub const INTERNAL_ERROR_RESPONSE: &[u8] =
    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n";

/// Route, authorize, rewrite and dial; everything that can still be answered
/// with a 500 because no byte has reached an upstream yet.
async fn prepare(
    gateway: &GatewayService,
    initial: &[u8],
    path: &str,
    client_ip: &str,
) -> ProxyResult<(TcpStream, Vec<u8>)> {
    let route = gateway
        .routes()
        .match_http(path)
        .ok_or_else(|| ProxyError::not_found(path))?;

    tracing::info!(
        override_path = %route.override_path,
        route = %route.name,
        upstream = %route.host,
        "handle http request"
    );

    if !route.ip_filter.allow(client_ip) {
        return Err(ProxyError::denied(
            route.override_path.clone(),
            format!("ip {client_ip} not allowed"),
        ));
    }

    let rewritten = splice_path(initial, &route.rewrite_path(path))?;

    let upstream = TcpStream::connect(route.host.as_str())
        .await
        .map_err(|source| ProxyError::UpstreamUnavailable {
            host: route.host.clone(),
            source,
        })?;

    Ok((upstream, rewritten))
}

/// Proxy one HTTP/1.x connection whose first chunk is `initial`.
///
/// Failures before the relay starts are answered with a bare 500; relay
/// failures just close the connection.
pub async fn proxy_http(
    gateway: &GatewayService,
    mut client: TcpStream,
    initial: Bytes,
    path: &str,
    client_ip: &str,
) -> ProxyResult<RelayStats> {
    let (upstream, rewritten) = match prepare(gateway, &initial, path, client_ip).await {
        Ok(prepared) => prepared,
        Err(e) => {
            if let Err(write_err) = client.write_all(INTERNAL_ERROR_RESPONSE).await {
                tracing::debug!(error = %write_err, "failed to write error response");
            }
            return Err(e);
        }
    };

    relay(
        client,
        upstream,
        vec![Bytes::from(rewritten)],
        gateway.settings().http_timeout,
    )
    .await
}
