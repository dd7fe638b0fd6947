//! Shared utilities for the end-to-end tests.
#![allow(dead_code)]

use http_dispatch::{
    compose, CompleteRequest, DispatchOptions, HandlerResult, HttpServer, Outcome, Responder,
    RouteTable, ServerConfig, Status,
};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A parsed HTTP response as seen by a client.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Bind a server on an ephemeral port, compose `routes` onto it and serve in
/// the background.
pub async fn start_server(routes: RouteTable, options: DispatchOptions) -> SocketAddr {
    let config = ServerConfig::new()
        .with_address("127.0.0.1", 0)
        .with_connection_timeout(Duration::from_secs(5));
    let mut server = HttpServer::bind(&config).unwrap();
    assert!(compose(&mut server, routes, options));
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = server.serve().await;
    });
    addr
}

/// Write `request` verbatim and read until the server closes.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// Send a request with a `Host` header and an optional `Content-Length` body.
pub async fn request(addr: SocketAddr, method: &str, target: &str, body: Option<&str>) -> Reply {
    let mut text = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n", method, target);
    if let Some(body) = body {
        text.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    text.push_str("\r\n");
    if let Some(body) = body {
        text.push_str(body);
    }
    parse_reply(&send_raw(addr, text.as_bytes()).await)
}

pub fn parse_reply(text: &str) -> Reply {
    let (head, body) = text.split_once("\r\n\r\n").expect("no complete response head");
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();

    let mut parts = status_line.splitn(3, ' ');
    assert_eq!(parts.next(), Some("HTTP/1.1"));
    let status = parts.next().unwrap().parse().unwrap();
    let reason = parts.next().unwrap_or_default().to_string();

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Reply {
        status,
        reason,
        headers,
        body: body.to_string(),
    }
}

/// Echoes the query string and, for POST, the body
pub fn do_something(req: &CompleteRequest, resp: &Responder) -> HandlerResult {
    let query = req.url().split_once('?').map_or("", |(_, query)| query);
    let mut answer = json!({
        "say": format!("do: {}", query),
        "method": req.method(),
    });
    if req.method() == "POST" {
        answer["postbody"] = json!(req.body());
    }
    resp.send_json(Status::Ok.code(), &answer, &[], None);
    Ok(Outcome::Done)
}
