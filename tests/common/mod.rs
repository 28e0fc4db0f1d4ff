// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use rsmuggle::{ScanConfig, Target, TransportSettings};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const REQUEST_QUIET_PERIOD: Duration = Duration::from_millis(50);

/// What the fake backend does with one request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub raw: String,
    pub delay: Duration,
    pub keep_open: bool,
}

impl Reply {
    pub fn closing(status: u16, reason: &str, body: &str) -> Self {
        Self {
            raw: create_raw_response(status, reason, body),
            delay: Duration::ZERO,
            keep_open: false,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn kept_open(mut self) -> Self {
        self.keep_open = true;
        self
    }
}

pub struct FakeBackend {
    pub port: u16,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub fn target(&self) -> Target {
        Target::new("127.0.0.1", self.port, false).unwrap()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn create_raw_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nServer: fake-backend\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}

/// Spawns a raw TCP backend on localhost. Every connection carries one
/// request; `handler` decides the reply from the bytes received.
pub async fn spawn_backend<F>(handler: F) -> FakeBackend
where
    F: Fn(&str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                serve_connection(stream, handler.as_ref(), &recorded).await;
            });
        }
    });

    FakeBackend { port, requests }
}

async fn serve_connection<F>(mut stream: TcpStream, handler: &F, recorded: &Mutex<Vec<String>>)
where
    F: Fn(&str) -> Reply,
{
    let request = read_request(&mut stream).await;
    recorded.lock().unwrap().push(request.clone());

    let reply = handler(&request);
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    let _ = stream.write_all(reply.raw.as_bytes()).await;
    let _ = stream.flush().await;

    if reply.keep_open {
        // Hold the socket until the client gives up on it.
        let mut sink = [0u8; 256];
        while let Ok(n) = stream.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tokio::time::timeout(REQUEST_QUIET_PERIOD, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) => break,
            Ok(Ok(n)) => data.extend_from_slice(&chunk[..n]),
            Err(_) if !data.is_empty() => break,
            Err(_) => {}
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

/// Port that nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn fast_config() -> ScanConfig {
    ScanConfig {
        connect_timeout: Duration::from_secs(2),
        write_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_millis(300),
        probe_delay: Duration::ZERO,
        ..ScanConfig::default()
    }
}

pub fn settings(config: &ScanConfig) -> TransportSettings {
    TransportSettings::from(config)
}
