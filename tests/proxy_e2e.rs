//! End-to-end tests: raw client sockets through the proxy to mock backends.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use filter_proxy::config::loader::load_config;
use filter_proxy::filtering::{reject, HttpFilterChain};
use filter_proxy::lifecycle::Shutdown;
use filter_proxy::net::ConnectionId;
use filter_proxy::proxy::{CloseReason, ConnectionSettings, ProxyConnection, ProxyServer};

mod common;
use common::*;

#[tokio::test]
async fn host_is_rewritten_to_configured_target() {
    let backend = MockBackend::start().await;
    let client_side = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = connect(client_side.local_addr().unwrap()).await;
    let (proxied_client, _) = client_side.accept().await.unwrap();
    let backend_stream = connect(backend.addr()).await;
    let mut backend_conn = backend.accept().await;

    let settings = ConnectionSettings {
        downstream_host: "10.0.0.1:80".into(),
        ..ConnectionSettings::default()
    };
    let connection = ProxyConnection::new(
        ConnectionId::new(),
        proxied_client,
        backend_stream,
        HttpFilterChain::new(),
        settings,
    );
    let task = tokio::spawn(connection.run(Shutdown::new()));

    send(&mut client, b"GET /x HTTP/1.1\r\nHost: client\r\n\r\n").await;
    let expected = "GET /x HTTP/1.1\r\nHost: 10.0.0.1:80\r\n\r\n";
    assert_eq!(read_len(&mut backend_conn, expected.len()).await, expected);

    drop(backend_conn);
    assert_eq!(task.await.unwrap().unwrap(), CloseReason::BackendClosed);
    assert_eq!(read_to_close(&mut client).await, "");
}

#[tokio::test]
async fn host_rewrite_through_server_uses_backend_address() {
    let backend = MockBackend::start().await;
    let proxy = spawn_proxy(config_for(backend.addr())).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET /a HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n").await;

    let mut backend_conn = backend.accept().await;
    let expected = format!(
        "GET /a HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\n\r\n",
        backend.addr()
    );
    assert_eq!(read_len(&mut backend_conn, expected.len()).await, expected);

    send(
        &mut backend_conn,
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Multi: a\r\nX-Multi: b\r\n\r\nhello",
    )
    .await;
    let expected = "HTTP/1.1 200 -\r\nContent-Length: 5\r\nX-Multi: a, b\r\n\r\nhello";
    assert_eq!(read_len(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn rejecting_filter_answers_client_and_backend_sees_nothing() {
    let backend = MockBackend::start().await;
    let settings = ConnectionSettings {
        downstream_host: backend.addr().to_string(),
        ..ConnectionSettings::default()
    };
    let server = ProxyServer::from_parts(
        settings,
        Arc::new(|| {
            let mut chain = HttpFilterChain::new();
            chain.add_filter(reject(None));
            chain
        }),
    );
    let proxy = spawn_server(server).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET /anything HTTP/1.1\r\nHost: client\r\n\r\n").await;

    let expected = "HTTP/1.1 400 -\r\nContent-Length: 0\r\n\r\n";
    assert_eq!(read_len(&mut client, expected.len()).await, expected);

    let mut backend_conn = backend.accept().await;
    client.shutdown().await.unwrap();
    // the proxy half-closes the backend once the client is done
    assert_eq!(read_to_close(&mut backend_conn).await, "");
}

#[tokio::test]
async fn configured_filter_rejection_drops_request_body() {
    let backend = MockBackend::start().await;
    let mut config = config_for(backend.addr());
    config.pipeline = toml::from_str(
        r#"
        upstream = ["no_post"]

        [filters.no_post]
        kind = "deny_methods"
        methods = ["POST"]
        "#,
    )
    .unwrap();
    let proxy = spawn_proxy(config).await;

    let mut client = connect(proxy.addr).await;
    send(
        &mut client,
        b"POST /upload HTTP/1.1\r\nContent-Length: 6\r\n\r\nsecretGET /ok HTTP/1.1\r\n\r\n",
    )
    .await;

    let rejection = "HTTP/1.1 405 -\r\nContent-Length: 0\r\n\r\n";
    assert_eq!(read_len(&mut client, rejection.len()).await, rejection);

    let mut backend_conn = backend.accept().await;
    let forwarded = String::from_utf8(read_for(&mut backend_conn, Duration::from_millis(300)).await).unwrap();
    assert_eq!(forwarded, "GET /ok HTTP/1.1\r\n\r\n");
}

#[tokio::test]
async fn chunked_bodies_are_reframed_both_ways() {
    let backend = MockBackend::start().await;
    let proxy = spawn_proxy(config_for(backend.addr())).await;

    let mut client = connect(proxy.addr).await;
    send(
        &mut client,
        b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3;x=y\r\nabc\r\n2\r\nde\r\n0\r\nTrailer: t\r\n\r\n",
    )
    .await;

    let mut backend_conn = backend.accept().await;
    let expected = "POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n";
    assert_eq!(read_len(&mut backend_conn, expected.len()).await, expected);

    send(
        &mut backend_conn,
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nA\r\n0123456789\r\n0\r\n\r\n",
    )
    .await;
    let expected = "HTTP/1.1 200 -\r\nTransfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n0\r\n\r\n";
    assert_eq!(read_len(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn unreachable_backend_yields_error_template() {
    let mut config = config_for(closed_port().await);
    config.templates.error_status = 502;
    let proxy = spawn_proxy(config).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(
        read_to_close(&mut client).await,
        "HTTP/1.1 502 -\r\nContent-Length: 0\r\n\r\n"
    );
}

#[tokio::test]
async fn backend_close_closes_client() {
    let backend = MockBackend::start().await;
    let proxy = spawn_proxy(config_for(backend.addr())).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET / HTTP/1.0\r\n\r\n").await;

    let mut backend_conn = backend.accept().await;
    read_len(&mut backend_conn, "GET / HTTP/1.0\r\n\r\n".len()).await;
    // close-delimited body
    send(&mut backend_conn, b"HTTP/1.0 200 OK\r\n\r\nstreamed until close").await;
    drop(backend_conn);

    assert_eq!(
        read_to_close(&mut client).await,
        "HTTP/1.0 200 -\r\n\r\nstreamed until close"
    );
}

#[tokio::test]
async fn response_filters_see_backend_responses() {
    let backend = MockBackend::start().await;
    let mut config = config_for(backend.addr());
    config.pipeline = toml::from_str(
        r#"
        use_singletons = true
        upstream = ["id"]
        downstream = ["id", "strip"]

        [filters.id]
        kind = "request_id"

        [filters.strip]
        kind = "remove_header"
        names = ["Server"]
        "#,
    )
    .unwrap();
    let proxy = spawn_proxy(config).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET / HTTP/1.1\r\n\r\n").await;

    let mut backend_conn = backend.accept().await;
    let head = String::from_utf8(read_for(&mut backend_conn, Duration::from_millis(300)).await).unwrap();
    let id = head
        .lines()
        .find_map(|line| line.strip_prefix("X-Request-ID: "))
        .expect("request id forwarded")
        .to_string();

    send(
        &mut backend_conn,
        b"HTTP/1.1 204 No Content\r\nServer: backend/1.0\r\n\r\n",
    )
    .await;
    let expected = format!("HTTP/1.1 204 -\r\nX-Request-ID: {id}\r\n\r\n");
    assert_eq!(read_len(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn config_update_retargets_new_connections() {
    let first = MockBackend::start().await;
    let second = MockBackend::start().await;
    let proxy = spawn_proxy(config_for(first.addr())).await;

    proxy.config_updates.send(config_for(second.addr())).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET /new HTTP/1.1\r\n\r\n").await;
    let mut backend_conn = second.accept().await;
    assert_eq!(
        read_len(&mut backend_conn, "GET /new HTTP/1.1\r\n\r\n".len()).await,
        "GET /new HTTP/1.1\r\n\r\n"
    );
}

#[tokio::test]
async fn proxy_runs_from_config_file() {
    let backend = MockBackend::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.toml");
    std::fs::write(
        &path,
        format!(
            r#"
            [routing]
            upstream_hosts = ["{}"]

            [pipeline]
            upstream = ["auth"]

            [pipeline.filters.auth]
            kind = "require_header"
            name = "Authorization"
            "#,
            backend.addr()
        ),
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    let proxy = spawn_proxy(config).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET / HTTP/1.1\r\n\r\n").await;
    let expected = "HTTP/1.1 401 -\r\nContent-Length: 0\r\n\r\n";
    assert_eq!(read_len(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn pipelined_rejection_keeps_response_order() {
    let backend = MockBackend::start().await;
    let mut config = config_for(backend.addr());
    config.pipeline = toml::from_str(
        r#"
        upstream = ["private"]

        [filters.private]
        kind = "deny_path_prefix"
        prefixes = ["/secret"]
        "#,
    )
    .unwrap();
    let proxy = spawn_proxy(config).await;

    let mut client = connect(proxy.addr).await;
    send(&mut client, b"GET /a HTTP/1.1\r\n\r\nGET /secret HTTP/1.1\r\n\r\n").await;

    let mut backend_conn = backend.accept().await;
    let forwarded = "GET /a HTTP/1.1\r\n\r\n";
    assert_eq!(read_len(&mut backend_conn, forwarded.len()).await, forwarded);
    send(&mut backend_conn, b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nA").await;

    let expected = "HTTP/1.1 200 -\r\nContent-Length: 1\r\n\r\nAHTTP/1.1 403 -\r\nContent-Length: 0\r\n\r\n";
    assert_eq!(read_len(&mut client, expected.len()).await, expected);
}
