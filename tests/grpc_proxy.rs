// gRPC (prior-knowledge HTTP/2) relaying with hand-built frames.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use fluke_hpack::Encoder;
use switchyard::{
    ConnectionDispatcher, ConnectionTracker, GatewayService, GracefulShutdown, ProxyServer,
    config::{GrpcMethodConfig, ServerConfig},
    core::h2::{PREFACE, SETTINGS_ACK, encode_frame, flags, frame_type},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};

const UPSTREAM_REPLY: &[u8] = b"\x00\x00\x00\x04\x00\x00\x00\x00\x00pong";

fn grpc_config(service: &str, host: SocketAddr) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listen_host = "127.0.0.1".to_string();
    config.http.port = 0;
    config.grpc.port = 0;
    config.grpc.timeout = 2;
    config.grpc.method_maps = vec![GrpcMethodConfig {
        name: "greeter".to_string(),
        host: host.to_string(),
        proto_service: service.to_string(),
        disallow: vec!["Delete".to_string()],
        ..Default::default()
    }];
    config
}

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

/// Upstream that reads exactly `expect_len` bytes, reports them and replies.
async fn fake_upstream(expect_len: usize) -> (SocketAddr, oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; expect_len];
        stream.read_exact(&mut received).await.unwrap();
        let _ = tx.send(received);
        stream.write_all(UPSTREAM_REPLY).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    (addr, rx)
}

/// Preface, empty SETTINGS, HEADERS for `path` and one DATA frame.
fn grpc_request(path: &str) -> Vec<u8> {
    let mut encoder = Encoder::new();
    let block = encoder.encode(vec![
        (&b":method"[..], &b"POST"[..]),
        (&b":scheme"[..], &b"http"[..]),
        (&b":path"[..], path.as_bytes()),
        (&b":authority"[..], &b"localhost"[..]),
        (&b"content-type"[..], &b"application/grpc"[..]),
        (&b"te"[..], &b"trailers"[..]),
    ]);

    let mut request = PREFACE.to_vec();
    request.extend(encode_frame(frame_type::SETTINGS, 0, 0, &[]));
    request.extend(encode_frame(frame_type::HEADERS, flags::END_HEADERS, 1, &block));
    request.extend(encode_frame(
        frame_type::DATA,
        flags::END_STREAM,
        1,
        b"\x00\x00\x00\x00\x05hello",
    ));
    request
}

async fn exchange(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
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
async fn registered_service_is_replayed_byte_for_byte() {
    let request = grpc_request("/pkg.Greeter/SayHello");
    let (upstream, received) = fake_upstream(request.len()).await;
    let (proxy, _shutdown) = start_proxy(grpc_config("pkg.Greeter", upstream)).await;

    let response = exchange(proxy, &request).await;

    assert_eq!(received.await.unwrap(), request);
    assert_eq!(&response[..SETTINGS_ACK.len()], &SETTINGS_ACK[..]);
    assert_eq!(&response[SETTINGS_ACK.len()..], UPSTREAM_REPLY);
}

#[tokio::test]
async fn headers_sent_after_preface_are_captured_and_replayed() {
    let request = grpc_request("/pkg.Greeter/SayHello");
    let (upstream, received) = fake_upstream(request.len()).await;
    let (proxy, _shutdown) = start_proxy(grpc_config("pkg.Greeter", upstream)).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    // Preface alone first; the rest only after the SETTINGS ack arrives.
    client.write_all(&request[..PREFACE.len()]).await.unwrap();
    let mut ack = [0u8; 9];
    client.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, SETTINGS_ACK);
    client.write_all(&request[PREFACE.len()..]).await.unwrap();

    let mut reply = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.await.unwrap(), request);
    assert_eq!(reply, UPSTREAM_REPLY);
}

#[tokio::test]
async fn unregistered_service_closes_without_dialing() {
    let request = grpc_request("/pkg.Unknown/SayHello");
    let (upstream, received) = fake_upstream(request.len()).await;
    let (proxy, _shutdown) = start_proxy(grpc_config("pkg.Greeter", upstream)).await;

    let response = exchange(proxy, &request).await;

    assert_eq!(response, SETTINGS_ACK);
    let dialed = timeout(Duration::from_millis(200), received).await;
    assert!(dialed.is_err(), "upstream must not be contacted");
}

#[tokio::test]
async fn disallowed_method_closes_without_dialing() {
    let request = grpc_request("/pkg.Greeter/Delete");
    let (upstream, received) = fake_upstream(request.len()).await;
    let (proxy, _shutdown) = start_proxy(grpc_config("pkg.Greeter", upstream)).await;

    let response = exchange(proxy, &request).await;

    assert_eq!(response, SETTINGS_ACK);
    assert!(timeout(Duration::from_millis(200), received).await.is_err());
}

#[tokio::test]
async fn malformed_grpc_path_closes_connection() {
    let request = grpc_request("/pkg.Greeter/SayHello/extra");
    let (upstream, received) = fake_upstream(request.len()).await;
    let (proxy, _shutdown) = start_proxy(grpc_config("pkg.Greeter", upstream)).await;

    let response = exchange(proxy, &request).await;

    assert_eq!(response, SETTINGS_ACK);
    assert!(timeout(Duration::from_millis(200), received).await.is_err());
}

#[tokio::test]
async fn ip_restricted_service_closes_without_dialing() {
    let request = grpc_request("/pkg.Greeter/SayHello");
    let (upstream, received) = fake_upstream(request.len()).await;
    let mut config = grpc_config("pkg.Greeter", upstream);
    config.grpc.method_maps[0].ip_restriction = vec!["10.9.9.9".to_string()];
    let (proxy, _shutdown) = start_proxy(config).await;

    let response = exchange(proxy, &request).await;

    assert_eq!(response, SETTINGS_ACK);
    assert!(timeout(Duration::from_millis(200), received).await.is_err());
}

/// Two distinct ports that were free a moment ago.
async fn free_ports() -> (u16, u16) {
    let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
    (
        first.local_addr().unwrap().port(),
        second.local_addr().unwrap().port(),
    )
}

#[tokio::test]
async fn separate_grpc_port_gets_its_own_listener() {
    let request = grpc_request("/pkg.Greeter/SayHello");
    let (upstream, received) = fake_upstream(request.len()).await;
    let mut config = grpc_config("pkg.Greeter", upstream);
    let (http_port, grpc_port) = free_ports().await;
    config.http.port = http_port;
    config.grpc.port = grpc_port;

    let gateway = Arc::new(GatewayService::new(&config).unwrap());
    let dispatcher = Arc::new(ConnectionDispatcher::new(gateway));
    let server = ProxyServer::bind(&config, dispatcher, Arc::new(ConnectionTracker::new()))
        .await
        .unwrap();
    let addrs = server.local_addrs();
    assert_eq!(addrs.len(), 2);
    assert_eq!(addrs[0].port(), http_port);
    assert_eq!(addrs[1].port(), grpc_port);

    let shutdown = GracefulShutdown::new();
    tokio::spawn(server.run(shutdown.shutdown_token()));

    let response = exchange(addrs[1], &request).await;

    assert_eq!(received.await.unwrap(), request);
    assert_eq!(&response[..SETTINGS_ACK.len()], &SETTINGS_ACK[..]);
    assert_eq!(&response[SETTINGS_ACK.len()..], UPSTREAM_REPLY);
}
