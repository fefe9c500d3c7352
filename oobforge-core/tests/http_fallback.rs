//! Integration tests for the direct-then-proxy HTTP client.
//!
//! These run real reqwest transports against local listeners: a wiremock
//! server for the direct route and a minimal forward proxy that records what
//! it was sent.

use std::net::SocketAddr;

use oobforge_core::{
    HttpOptions, HttpRequest, RequestOutcome, ResilientHttpClient, Route,
    http::TransportErrorKind,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// An address nothing is listening on.
fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// A one-shot forward proxy that answers `ok` and returns the raw request.
async fn fake_proxy() -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            if request_complete(&raw) {
                break;
            }
        }

        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
            .await
            .unwrap();
        socket.shutdown().await.ok();

        String::from_utf8_lossy(&raw).into_owned()
    });

    (addr, handle)
}

/// A server that promises a 100-byte body, sends a few bytes, and hangs up.
async fn cut_off_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        while !request_complete(&raw) {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }

        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
            .await
            .unwrap();
        socket.shutdown().await.ok();
    });

    addr
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= header_end + 4 + content_length
}

fn send_code_request(base: &str) -> HttpRequest {
    HttpRequest::post(
        format!("{}/v1/accounts:sendOobCode?key=k1", base)
            .parse()
            .unwrap(),
    )
    .json(&json!({"requestType": "EMAIL_SIGNIN", "email": "a@b.com"}))
    .unwrap()
}

#[tokio::test]
async fn test_error_status_is_returned_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:sendOobCode"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"message": "INVALID_EMAIL"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // The proxy address is dead; touching it would fail the test.
    let options = HttpOptions::default().with_proxy(format!("http://{}", closed_addr()));
    let client = ResilientHttpClient::new(&options).unwrap();

    let outcome = client.send(&send_code_request(&server.uri())).await;

    match outcome {
        RequestOutcome::Success(response) => {
            assert_eq!(response.status, 400);
            assert_eq!(response.route, Route::Direct);
            assert!(response.body.contains("INVALID_EMAIL"));
        }
        other => panic!("expected a response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refused_direct_falls_back_to_proxy_once() {
    let (proxy_addr, proxy) = fake_proxy().await;
    let target = format!("http://{}", closed_addr());

    let options = HttpOptions::default().with_proxy(format!("http://{}", proxy_addr));
    let client = ResilientHttpClient::new(&options).unwrap();
    assert!(client.has_proxy());

    let outcome = client.send(&send_code_request(&target)).await;

    match outcome {
        RequestOutcome::Success(response) => {
            assert_eq!(response.status, 200);
            assert_eq!(response.route, Route::Proxy);
            assert_eq!(response.body, "ok");
        }
        other => panic!("expected proxied response, got {:?}", other),
    }

    let seen = proxy.await.unwrap();
    let request_line = seen.lines().next().unwrap();
    assert_eq!(
        request_line,
        format!("POST {}/v1/accounts:sendOobCode?key=k1 HTTP/1.1", target)
    );
    assert!(seen.contains("\"email\":\"a@b.com\""));
    assert!(seen.to_ascii_lowercase().contains("content-type: application/json"));
}

#[tokio::test]
async fn test_refused_direct_without_proxy() {
    let client = ResilientHttpClient::new(&HttpOptions::default()).unwrap();
    assert!(!client.has_proxy());

    let target = format!("http://{}", closed_addr());
    let outcome = client.send(&send_code_request(&target)).await;

    match outcome {
        RequestOutcome::TransientFailure(err) => {
            assert_eq!(err.kind, TransportErrorKind::Connect);
        }
        other => panic!("expected transient failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_both_routes_refused() {
    let options = HttpOptions::default().with_proxy(format!("http://{}", closed_addr()));
    let client = ResilientHttpClient::new(&options).unwrap();

    let target = format!("http://{}", closed_addr());
    let outcome = client.send(&send_code_request(&target)).await;

    assert!(matches!(outcome, RequestOutcome::TransientFailure(_)));
}

#[tokio::test]
async fn test_truncated_direct_response_falls_back_to_proxy() {
    let target = format!("http://{}", cut_off_server().await);
    let (proxy_addr, proxy) = fake_proxy().await;

    let options = HttpOptions::default().with_proxy(format!("http://{}", proxy_addr));
    let client = ResilientHttpClient::new(&options).unwrap();

    let outcome = client.send(&send_code_request(&target)).await;

    match outcome {
        RequestOutcome::Success(response) => {
            assert_eq!(response.route, Route::Proxy);
            assert_eq!(response.body, "ok");
        }
        other => panic!("expected proxied response, got {:?}", other),
    }

    let seen = proxy.await.unwrap();
    assert!(seen.starts_with(&format!("POST {}/v1/accounts:sendOobCode", target)));
}

#[tokio::test]
async fn test_truncated_response_without_proxy_is_transient() {
    let target = format!("http://{}", cut_off_server().await);
    let client = ResilientHttpClient::new(&HttpOptions::default()).unwrap();

    let outcome = client.send(&send_code_request(&target)).await;

    match outcome {
        RequestOutcome::TransientFailure(err) => {
            assert_eq!(err.kind, TransportErrorKind::Body);
        }
        other => panic!("expected transient failure, got {:?}", other),
    }
}
