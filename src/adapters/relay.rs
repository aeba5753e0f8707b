//! Bidirectional byte relay shared by the HTTP and gRPC paths.
//!
//! The calling task copies client → upstream (after replaying the bytes
//! consumed while routing); one spawned task copies upstream → client under
//! an absolute read deadline. When the upstream side finishes, the client's
//! write half is shut down so it sees EOF while its own sends still drain;
//! a client EOF is likewise passed on as a half-close of the upstream.
use std::{io, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::Instant,
};

use crate::core::error::{ProxyError, ProxyResult};

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Byte counts for a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub to_upstream: u64,
    pub to_client: u64,
    /// The upstream read deadline ended the relay.
    pub timed_out: bool,
}

impl RelayStats {
    pub fn total(&self) -> u64 {
        self.to_upstream + self.to_client
    }
}

/// Copy `reader` into `writer` until EOF, counting bytes as they are written.
///
/// With a deadline, a read still pending at that instant fails with
/// `ErrorKind::TimedOut`.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    deadline: Option<Instant>,
    copied: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, reader.read(&mut buf))
                .await
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "upstream read deadline exceeded")
                })??,
            None => reader.read(&mut buf).await?,
        };
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
}

/// Relay between `client` and a freshly dialed `upstream`.
///
/// `replay` is written to the upstream, in order, before anything else read
/// from the client. A deadline hit on the upstream side counts as success
/// as long as the connection moved at least one byte; every other I/O error
/// is a [`ProxyError::RelayFailure`]. Both sockets are closed on return.
pub async fn relay(
    client: TcpStream,
    upstream: TcpStream,
    replay: Vec<Bytes>,
    timeout: Duration,
) -> ProxyResult<RelayStats> {
    let deadline = Instant::now() + timeout;
    let (mut client_rd, mut client_wr) = client.into_split();
    let (mut upstream_rd, mut upstream_wr) = upstream.into_split();

    let reverse = tokio::spawn(async move {
        let mut copied = 0u64;
        let result = pump(&mut upstream_rd, &mut client_wr, Some(deadline), &mut copied).await;
        if let Err(e) = client_wr.shutdown().await {
            tracing::debug!(error = %e, "client write shutdown failed");
        }
        (copied, result)
    });

    let mut to_upstream = 0u64;
    let mut forward_result = Ok(());
    for chunk in &replay {
        if let Err(e) = upstream_wr.write_all(chunk).await {
            forward_result = Err(e);
            break;
        }
        to_upstream += chunk.len() as u64;
    }
    if forward_result.is_ok() {
        forward_result = pump(&mut client_rd, &mut upstream_wr, None, &mut to_upstream).await;
    }
    if forward_result.is_ok() {
        // Client sent FIN; pass the half-close on.
        if let Err(e) = upstream_wr.shutdown().await {
            tracing::debug!(error = %e, "upstream write shutdown failed");
        }
    }

    let (to_client, reverse_result) = reverse.await.map_err(|e| ProxyError::RelayFailure {
        source: io::Error::other(e),
    })?;

    let mut stats = RelayStats {
        to_upstream,
        to_client,
        timed_out: false,
    };

    match reverse_result {
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {
            stats.timed_out = true;
            if stats.total() > 0 {
                tracing::debug!(
                    bytes_to_upstream = stats.to_upstream,
                    bytes_to_client = stats.to_client,
                    "relay ended by upstream deadline"
                );
                return Ok(stats);
            }
            Err(ProxyError::RelayFailure { source: e })
        }
        Err(e) => Err(ProxyError::RelayFailure { source: e }),
        Ok(()) => forward_result
            .map(|()| stats)
            .map_err(|source| ProxyError::RelayFailure { source }),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Connected (accepted, dialed) pair on loopback.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (accepted.unwrap().0, dialed.unwrap())
    }

    #[tokio::test]
    async fn replays_prefix_then_echoes_response() {
        let (proxy_client_side, mut client) = socket_pair().await;
        let (mut upstream_peer, proxy_upstream_side) = socket_pair().await;

        let relay = tokio::spawn(relay(
            proxy_client_side,
            proxy_upstream_side,
            vec![Bytes::from_static(b"first-"), Bytes::from_static(b"second-")],
            Duration::from_secs(5),
        ));

        client.write_all(b"live").await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        upstream_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"first-second-live");

        upstream_peer.write_all(b"pong").await.unwrap();
        drop(upstream_peer);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"pong");

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats.to_upstream, 17);
        assert_eq!(stats.to_client, 4);
        assert!(!stats.timed_out);
    }

    #[tokio::test]
    async fn productive_timeout_is_success() {
        let (proxy_client_side, mut client) = socket_pair().await;
        let (mut upstream_peer, proxy_upstream_side) = socket_pair().await;

        let relay = tokio::spawn(relay(
            proxy_client_side,
            proxy_upstream_side,
            Vec::new(),
            Duration::from_millis(200),
        ));

        client.write_all(b"hello").await.unwrap();
        let mut seen = [0u8; 5];
        upstream_peer.read_exact(&mut seen).await.unwrap();

        // Upstream never answers; the deadline shuts the client side.
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
        drop(client);

        let stats = relay.await.unwrap().unwrap();
        assert!(stats.timed_out);
        assert_eq!(stats.to_upstream, 5);
        drop(upstream_peer);
    }

    #[tokio::test]
    async fn idle_timeout_is_failure() {
        let (proxy_client_side, mut client) = socket_pair().await;
        let (_upstream_peer, proxy_upstream_side) = socket_pair().await;

        let relay = tokio::spawn(relay(
            proxy_client_side,
            proxy_upstream_side,
            Vec::new(),
            Duration::from_millis(100),
        ));

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        drop(client);

        let err = relay.await.unwrap().unwrap_err();
        assert!(matches!(err, ProxyError::RelayFailure { .. }));
    }
}
