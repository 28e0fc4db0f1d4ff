// File: transport.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::config::ScanConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::response::DecodedResponse;
use crate::target::Target;
use futures::future::BoxFuture;
use log::{debug, trace};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::{self, OwnedTrustAnchor, RootCertStore};
use tokio_rustls::TlsConnector;

const READ_CHUNK: usize = 4096;

/// Single-attempt request/response exchange. Implementations never retry.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        target: &'a Target,
        payload: &'a [u8],
    ) -> BoxFuture<'a, ProbeResult<DecodedResponse>>;
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub insecure_tls: bool,
    pub max_response_bytes: usize,
}

impl From<&ScanConfig> for TransportSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            read_timeout: config.read_timeout,
            insecure_tls: config.insecure_tls,
            max_response_bytes: config.max_response_bytes,
        }
    }
}

/// Raw TCP/TLS sender. Each call dials a fresh connection.
pub struct RawTransport {
    settings: TransportSettings,
    tls: TlsConnector,
}

impl RawTransport {
    pub fn new(settings: TransportSettings) -> ProbeResult<Self> {
        let tls_config = build_tls_config(settings.insecure_tls)?;
        Ok(Self {
            settings,
            tls: TlsConnector::from(Arc::new(tls_config)),
        })
    }

    async fn send_raw(&self, target: &Target, payload: &[u8]) -> ProbeResult<DecodedResponse> {
        let authority = target.authority();
        debug!(
            "Connecting to {} (tls={}, insecure={})",
            authority, target.tls, self.settings.insecure_tls
        );

        let tcp = match timeout(self.settings.connect_timeout, TcpStream::connect(&authority)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProbeError::connect_io(&authority, e)),
            Err(_) => {
                return Err(ProbeError::connect(
                    &authority,
                    format!(
                        "connect timed out after {}ms",
                        self.settings.connect_timeout.as_millis()
                    ),
                ))
            }
        };
        let _ = tcp.set_nodelay(true);

        if !target.tls {
            let mut stream = tcp;
            return self.exchange(&mut stream, &authority, payload).await;
        }

        let server_name = rustls::ServerName::try_from(target.host.as_str()).map_err(|e| {
            ProbeError::connect(&authority, format!("invalid TLS server name: {}", e))
        })?;

        let mut stream = match timeout(
            self.settings.connect_timeout,
            self.tls.connect(server_name, tcp),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ProbeError::connect(
                    &authority,
                    format!("TLS handshake failed: {}", e),
                ))
            }
            Err(_) => {
                return Err(ProbeError::connect(
                    &authority,
                    "TLS handshake timed out".to_string(),
                ))
            }
        };
        trace!("TLS handshake with {} complete", authority);

        self.exchange(&mut stream, &authority, payload).await
    }

    /// Writes the payload, then reads until EOF, an idle read timeout, or the size cap.
    async fn exchange<S>(
        &self,
        stream: &mut S,
        authority: &str,
        payload: &[u8],
    ) -> ProbeResult<DecodedResponse>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();

        let write = async {
            stream.write_all(payload).await?;
            stream.flush().await
        };
        match timeout(self.settings.write_timeout, write).await {
            Ok(Ok(())) => trace!("Wrote {} bytes to {}", payload.len(), authority),
            Ok(Err(e)) => return Err(ProbeError::transmission_io(authority, e)),
            Err(_) => {
                return Err(ProbeError::transmission(
                    authority,
                    format!(
                        "write timed out after {}ms",
                        self.settings.write_timeout.as_millis()
                    ),
                ))
            }
        }

        let mut buffer = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut last_read: Option<Instant> = None;
        let connection_closed;

        loop {
            if buffer.len() >= self.settings.max_response_bytes {
                debug!("Response from {} hit the size cap", authority);
                connection_closed = false;
                break;
            }

            match timeout(self.settings.read_timeout, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    last_read = Some(Instant::now());
                    connection_closed = true;
                    break;
                }
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    last_read = Some(Instant::now());
                }
                Ok(Err(e)) => {
                    // Resets and TLS truncation both mean the peer went away.
                    debug!("Read from {} ended with error: {}", authority, e);
                    last_read = Some(Instant::now());
                    connection_closed = true;
                    break;
                }
                Err(_) => {
                    trace!("Read timeout on {}, connection kept open", authority);
                    connection_closed = false;
                    break;
                }
            }
        }

        buffer.truncate(self.settings.max_response_bytes);
        let timing = match last_read {
            Some(at) => at.duration_since(started),
            None => started.elapsed(),
        };

        debug!(
            "Received {} bytes from {} in {}ms (closed={})",
            buffer.len(),
            authority,
            timing.as_millis(),
            connection_closed
        );

        Ok(DecodedResponse::decode(&buffer, timing, connection_closed))
    }
}

impl Transport for RawTransport {
    fn send<'a>(
        &'a self,
        target: &'a Target,
        payload: &'a [u8],
    ) -> BoxFuture<'a, ProbeResult<DecodedResponse>> {
        Box::pin(self.send_raw(target, payload))
    }
}

fn build_tls_config(insecure: bool) -> ProbeResult<rustls::ClientConfig> {
    let builder = rustls::ClientConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| ProbeError::Configuration(format!("TLS setup failed: {}", e)))?;

    if insecure {
        return Ok(builder
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth());
    }

    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    Ok(builder
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Lab targets only: accepts any server certificate.
struct AcceptAnyCertificate;

impl rustls::client::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn settings(read_timeout_ms: u64) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(read_timeout_ms),
            insecure_tls: false,
            max_response_bytes: 65536,
        }
    }

    async fn local_target(listener: &TcpListener) -> Target {
        let port = listener.local_addr().unwrap().port();
        Target::new("127.0.0.1", port, false).unwrap()
    }

    #[tokio::test]
    async fn test_reads_until_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = local_target(&listener).await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nServer: test\r\n\r\nbody")
                .await
                .unwrap();
            buf.truncate(n);
            buf
        });

        let transport = RawTransport::new(settings(2000)).unwrap();
        let payload = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let response = transport.send(&target, payload).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.header("server"), Some("test"));
        assert_eq!(response.body, b"body".to_vec());
        assert!(response.connection_closed);
        assert_eq!(server.await.unwrap(), payload.to_vec());
    }

    #[tokio::test]
    async fn test_read_timeout_is_not_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = local_target(&listener).await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(800)).await;
        });

        let transport = RawTransport::new(settings(200)).unwrap();
        let response = transport.send(&target, b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"ok".to_vec());
        assert!(!response.connection_closed);
        assert!(response.timing < Duration::from_millis(200));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_yields_empty_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = local_target(&listener).await;

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let transport = RawTransport::new(settings(150)).unwrap();
        let response = transport.send(&target, b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        assert_eq!(response.status_code, 0);
        assert!(response.raw.is_empty());
        assert!(!response.connection_closed);
        assert!(response.timing >= Duration::from_millis(150));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_response_size_cap() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = local_target(&listener).await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let mut response = b"HTTP/1.1 200 OK\r\n\r\n".to_vec();
            response.extend(std::iter::repeat(b'a').take(10_000));
            let _ = socket.write_all(&response).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let mut capped = settings(1000);
        capped.max_response_bytes = 2048;
        let transport = RawTransport::new(capped).unwrap();
        let response = transport.send(&target, b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        assert_eq!(response.raw.len(), 2048);
        assert!(!response.connection_closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = local_target(&listener).await;
        drop(listener);

        let transport = RawTransport::new(settings(200)).unwrap();
        let err = transport
            .send(&target, b"GET / HTTP/1.1\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connect { .. }));
    }

    #[test]
    fn test_tls_configs_build() {
        assert!(build_tls_config(false).is_ok());
        assert!(build_tls_config(true).is_ok());
    }
}
