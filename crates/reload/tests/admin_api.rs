#![forbid(unsafe_code)]

use std::time::Duration;

use frpo_core::model::{Common, Config};
use frpo_reload::{HttpReloader, ReloadError, Reloader};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// One parsed request as seen by the fake admin API.
#[derive(Debug)]
struct Seen {
    request_line: String,
    authorization: Option<String>,
    body: String,
}

/// Serve `statuses.len()` connections, answering each with the next status code.
async fn fake_admin(statuses: Vec<u16>) -> (u16, tokio::task::JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for status in statuses {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            reader.read_line(&mut request_line).await.expect("request line");
            let mut len = 0usize;
            let mut authorization = None;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.expect("header");
                let line = line.trim_end().to_string();
                if line.is_empty() { break; }
                if let Some((k, v)) = line.split_once(':') {
                    match k.to_ascii_lowercase().as_str() {
                        "content-length" => len = v.trim().parse().expect("length"),
                        "authorization" => authorization = Some(v.trim().to_string()),
                        _ => {}
                    }
                }
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await.expect("body");
            let reply = format!("HTTP/1.1 {status} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            reader.get_mut().write_all(reply.as_bytes()).await.expect("reply");
            seen.push(Seen {
                request_line: request_line.trim_end().to_string(),
                authorization,
                body: String::from_utf8(body).expect("utf8"),
            });
        }
        seen
    });
    (port, handle)
}

fn config(port: u16, user: Option<&str>) -> Config {
    Config {
        common: Common {
            server_address: "frps.example.com".into(),
            server_port: 7000,
            token: None,
            admin_address: Some("127.0.0.1".into()),
            admin_port: port,
            admin_username: user.map(str::to_string),
            admin_password: user.map(|_| "pw".to_string()),
        },
        upstreams: vec![],
    }
}

#[tokio::test]
async fn pushes_config_then_reloads() {
    let (port, server) = fake_admin(vec![200, 200]).await;
    let reloader = HttpReloader::new(Duration::from_secs(5)).expect("client");
    reloader.reload(&config(port, Some("admin"))).await.expect("reload");

    let seen = server.await.expect("server");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].request_line, "PUT /api/config HTTP/1.1");
    assert!(seen[0].body.starts_with("[common]\nserver_addr = frps.example.com\n"), "{}", seen[0].body);
    assert_eq!(seen[1].request_line, "GET /api/reload HTTP/1.1");
    // base64("admin:pw")
    assert_eq!(seen[1].authorization.as_deref(), Some("Basic YWRtaW46cHc="));
}

#[tokio::test]
async fn non_success_status_fails_the_reload() {
    let (port, server) = fake_admin(vec![500]).await;
    let reloader = HttpReloader::new(Duration::from_secs(5)).expect("client");
    let err = reloader.reload(&config(port, None)).await.unwrap_err();
    assert!(matches!(err, ReloadError::Status { status: 500, step: "PUT /api/config" }), "{err}");
    let seen = server.await.expect("server");
    assert!(seen[0].authorization.is_none());
}

#[tokio::test]
async fn missing_address_is_rejected_before_any_call() {
    let reloader = HttpReloader::new(Duration::from_secs(5)).expect("client");
    let mut cfg = config(7400, None);
    cfg.common.admin_address = None;
    assert!(matches!(reloader.reload(&cfg).await, Err(ReloadError::NoAddress)));
}
