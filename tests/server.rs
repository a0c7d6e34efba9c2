//! Full server tests: real listener, real upstream, reqwest client.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use request_shield::config::{RouteGuardConfig, ShieldConfig};

mod common;

fn config_for(upstream: SocketAddr) -> ShieldConfig {
    let mut config = ShieldConfig::default();
    config.upstream.address = upstream.to_string();
    config.route_guards.push(RouteGuardConfig {
        path: "/login".into(),
        min_interval_ms: 60_000,
        max_per_minute: 0,
    });
    config
}

/// Open a connection and send a JSON POST that declares 100 body bytes but
/// delivers only 4.
async fn stalled_json_post(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST /api HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{{\"a\"",
        addr,
        common::TEST_USER_AGENT
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream
}

/// The status line of the response, if one arrives `within`.
async fn status_line(stream: &mut TcpStream, within: Duration) -> Option<String> {
    let mut buf = [0u8; 1024];
    let n = tokio::time::timeout(within, stream.read(&mut buf))
        .await
        .ok()?
        .ok()?;
    String::from_utf8_lossy(&buf[..n])
        .lines()
        .next()
        .map(str::to_string)
}

#[tokio::test]
async fn test_forwards_clean_request_with_hardened_headers() {
    let backend = common::start_mock_backend("backend-ok").await;
    let (addr, shutdown) = common::start_shield(config_for(backend)).await;

    let res = common::client()
        .get(format!("http://{}/products?page=2", addr))
        .send()
        .await
        .expect("shield unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "backend-ok");

    shutdown.trigger();
}

#[tokio::test]
async fn test_attack_never_reaches_upstream() {
    // Nothing listens upstream: an attack that got through would be a 502.
    let upstream = common::unused_addr().await;
    let (addr, shutdown) = common::start_shield(config_for(upstream)).await;
    let client = common::client();

    let res = client
        .get(format!("http://{}/search?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
    assert_eq!(res.headers()["x-frame-options"], "DENY");

    let res = client
        .post(format!("http://{}/api/users", addr))
        .header("content-type", "application/json")
        .body(r#"{"id":"1; DROP TABLE users"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);

    shutdown.trigger();
}

#[tokio::test]
async fn test_upstream_down_is_bad_gateway() {
    let upstream = common::unused_addr().await;
    let (addr, shutdown) = common::start_shield(config_for(upstream)).await;

    let res = common::client()
        .get(format!("http://{}/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(res.headers()["x-frame-options"], "DENY");

    shutdown.trigger();
}

#[tokio::test]
async fn test_configured_route_guard_throttles() {
    let backend = common::start_mock_backend("welcome").await;
    let (addr, shutdown) = common::start_shield(config_for(backend)).await;
    let client = common::client();

    let res = client
        .post(format!("http://{}/login", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .post(format!("http://{}/login", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
    assert!(res.headers().contains_key("retry-after"));

    // Other routes are unaffected.
    let res = client
        .get(format!("http://{}/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    shutdown.trigger();
}

#[tokio::test]
async fn test_stalled_body_is_bounded_and_skipped_once_banned() {
    let upstream = common::unused_addr().await;
    let mut config = config_for(upstream);
    config.timeouts.request_secs = 1;
    config.waf.rate_limit.requests = 1;
    let (addr, shutdown) = common::start_shield(config).await;

    // Admitted, then held by the deadline rather than forever.
    let mut stream = stalled_json_post(addr).await;
    let status = status_line(&mut stream, Duration::from_secs(3)).await;
    assert!(
        status.as_deref().is_some_and(|line| line.starts_with("HTTP/1.1 408")),
        "{:?}",
        status
    );

    let res = common::client()
        .get(format!("http://{}/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);

    // Banned: rejected from the headers alone, well inside the deadline.
    let mut stream = stalled_json_post(addr).await;
    let status = status_line(&mut stream, Duration::from_millis(500)).await;
    assert!(
        status.as_deref().is_some_and(|line| line.starts_with("HTTP/1.1 429")),
        "{:?}",
        status
    );

    shutdown.trigger();
}
