// End-to-end HTTP/1.x relaying through real loopback sockets.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use switchyard::{
    ConnectionDispatcher, ConnectionTracker, GatewayService, GracefulShutdown, ProxyServer,
    config::{HttpRouteConfig, ServerConfig},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};

const UPSTREAM_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
const INTERNAL_ERROR: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n";

fn base_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listen_host = "127.0.0.1".to_string();
    config.http.port = 0;
    config.grpc.port = 0;
    config.http.timeout = 2;
    config
}

fn route(override_path: &str, upstream_path: &str, host: SocketAddr) -> HttpRouteConfig {
    HttpRouteConfig {
        name: override_path.trim_matches('/').to_string(),
        host: host.to_string(),
        override_path: override_path.to_string(),
        upstream_path: upstream_path.to_string(),
        ..Default::default()
    }
}

/// Start the proxy; the returned shutdown handle must stay alive for the test.
async fn start_proxy(config: ServerConfig) -> (SocketAddr, GracefulShutdown) {
    let gateway = Arc::new(GatewayService::new(&config).unwrap());
    let dispatcher = Arc::new(ConnectionDispatcher::new(gateway));
    let tracker = Arc::new(ConnectionTracker::new());
    let server = ProxyServer::bind(&config, dispatcher, tracker).await.unwrap();
    let addr = server.local_addrs()[0];

    let shutdown = GracefulShutdown::new();
    tokio::spawn(server.run(shutdown.shutdown_token()));
    (addr, shutdown)
}

/// One-shot upstream: captures the request head and answers with a fixed response.
async fn fake_upstream() -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        let _ = tx.send(received);
        stream.write_all(UPSTREAM_RESPONSE).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    (addr, rx)
}

/// Address nothing listens on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn roundtrip(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request).await.unwrap();
    let mut response = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

#[tokio::test]
async fn rewrites_request_line_and_relays_response() {
    let (upstream, received) = fake_upstream().await;
    let mut config = base_config();
    config.http.route_maps = vec![route("/users", "/v1/users", upstream)];
    let (proxy, _shutdown) = start_proxy(config).await;

    let response = roundtrip(
        proxy,
        b"GET /users/42?expand=true HTTP/1.1\r\nHost: example.com\r\nX-Trace: 1\r\n\r\n",
    )
    .await;

    assert_eq!(response, UPSTREAM_RESPONSE);
    assert_eq!(
        received.await.unwrap(),
        b"GET /v1/users/42?expand=true HTTP/1.1\r\nHost: example.com\r\nX-Trace: 1\r\n\r\n"
    );
}

#[tokio::test]
async fn exact_match_with_empty_upstream_path_targets_root() {
    let (upstream, received) = fake_upstream().await;
    let mut config = base_config();
    config.http.route_maps = vec![route("/svc", "", upstream)];
    let (proxy, _shutdown) = start_proxy(config).await;

    let response = roundtrip(proxy, b"GET /svc HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert_eq!(response, UPSTREAM_RESPONSE);
    assert_eq!(received.await.unwrap(), b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
}

#[tokio::test]
async fn longest_override_path_wins() {
    let (short_upstream, _short_received) = fake_upstream().await;
    let (long_upstream, long_received) = fake_upstream().await;
    let mut config = base_config();
    config.http.route_maps = vec![
        route("/api", "/legacy", short_upstream),
        route("/api/v2", "/v2", long_upstream),
    ];
    let (proxy, _shutdown) = start_proxy(config).await;

    let response = roundtrip(proxy, b"POST /api/v2/orders HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert_eq!(response, UPSTREAM_RESPONSE);
    assert_eq!(
        long_received.await.unwrap(),
        b"POST /v2/orders HTTP/1.1\r\nHost: x\r\n\r\n"
    );
}

#[tokio::test]
async fn unmatched_path_gets_internal_error() {
    let (upstream, _received) = fake_upstream().await;
    let mut config = base_config();
    config.http.route_maps = vec![route("/users", "/v1/users", upstream)];
    let (proxy, _shutdown) = start_proxy(config).await;

    let response = roundtrip(proxy, b"GET /orders HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(response, INTERNAL_ERROR);
}

#[tokio::test]
async fn unreachable_upstream_gets_internal_error() {
    let mut config = base_config();
    config.http.route_maps = vec![route("/users", "/", closed_port().await)];
    let (proxy, _shutdown) = start_proxy(config).await;

    let response = roundtrip(proxy, b"GET /users HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(response, INTERNAL_ERROR);
}

#[tokio::test]
async fn ip_restriction_rejects_peer_address() {
    let (upstream, _received) = fake_upstream().await;
    let mut config = base_config();
    let mut restricted = route("/admin", "/", upstream);
    restricted.ip_restriction = vec!["10.1.2.3".to_string()];
    config.http.route_maps = vec![restricted];
    let (proxy, _shutdown) = start_proxy(config).await;

    let response = roundtrip(proxy, b"GET /admin HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(response, INTERNAL_ERROR);
}

#[tokio::test]
async fn forwarded_header_overrides_peer_address() {
    let (upstream, received) = fake_upstream().await;
    let mut config = base_config();
    config.ip_forwarded_header = "X-Forwarded-For".to_string();
    let mut restricted = route("/admin", "/", upstream);
    restricted.ip_restriction = vec!["10.1.0.0/16".to_string()];
    config.http.route_maps = vec![restricted];
    let (proxy, _shutdown) = start_proxy(config).await;

    let request = b"GET /admin HTTP/1.1\r\nx-forwarded-for: 10.1.2.3, 172.16.0.1\r\n\r\n";
    let response = roundtrip(proxy, request).await;

    assert_eq!(response, UPSTREAM_RESPONSE);
    assert_eq!(
        received.await.unwrap(),
        b"GET / HTTP/1.1\r\nx-forwarded-for: 10.1.2.3, 172.16.0.1\r\n\r\n"
    );
}

#[tokio::test]
async fn health_check_answers_without_routes() {
    let (proxy, _shutdown) = start_proxy(base_config()).await;

    let response = roundtrip(proxy, b"GET /healthz HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

#[tokio::test]
async fn unknown_protocol_is_closed_silently() {
    let (proxy, _shutdown) = start_proxy(base_config()).await;

    let response = roundtrip(proxy, b"\x16\x03\x01\x00\xa5\x01\n").await;
    assert!(response.is_empty());
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let (proxy, shutdown) = start_proxy(base_config()).await;
    assert_eq!(
        roundtrip(proxy, b"GET /healthz HTTP/1.1\r\n\r\n").await,
        b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"
    );

    shutdown.trigger_shutdown(switchyard::utils::ShutdownReason::Graceful);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(TcpStream::connect(proxy).await.is_err());
}
