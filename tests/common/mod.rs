//! In-process fake X Protocol server for integration tests

#![allow(dead_code)]

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

/// How the server answers the `tls` capability request
#[derive(Debug, Clone, Copy, Default)]
pub enum TlsReply {
    /// Decline with code 5001 / HY000 (no TLS support)
    #[default]
    Decline,
    /// Reply with another error code
    Error(u32),
    /// Acknowledge, then hang up instead of running the handshake
    AcceptThenHangUp,
    /// Acknowledge and run the handshake with the fixture certificate
    Accept,
}

/// Server behaviour
#[derive(Debug, Clone, Copy, Default)]
pub struct Script {
    pub tls: TlsReply,
    pub reject_auth: bool,
}

/// What the server saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected,
    CapabilitiesSet,
    TlsEstablished,
    AuthStart(String),
    AuthContinue,
    Stmt(String),
    SessionClose,
    ConnectionClose,
    Disconnected,
}

/// Path of a file under `tests/fixtures`
pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

/// Server side TLS config presenting `server.pem` (signed by `ca.pem`)
fn tls_acceptor() -> TlsAcceptor {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(fixture("server.pem")).unwrap()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(fixture("server.key")).unwrap()))
        .unwrap()
        .unwrap();

    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// How a frame loop ended
enum Served {
    Closed,
    Upgrade,
}

#[derive(Clone)]
pub struct FakeServer {
    connections: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<Event>>>,
    script: Script,
}

impl FakeServer {
    fn new(script: Script) -> Self {
        Self {
            connections: Arc::new(AtomicUsize::new(0)),
            events: Arc::new(Mutex::new(Vec::new())),
            script,
        }
    }

    /// Listen on an ephemeral loopback port
    pub async fn tcp(script: Script) -> (Self, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = Self::new(script);

        let accept = server.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(accept.clone().serve(socket));
            }
        });
        (server, port)
    }

    /// Listen on a Unix socket at `path`
    pub fn unix(script: Script, path: &Path) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let server = Self::new(script);

        let accept = server.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(accept.clone().serve(socket));
            }
        });
        server
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Stmt(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Poll until `pred` holds for the recorded events
    pub async fn wait_for(&self, pred: impl Fn(&[Event]) -> bool) {
        for _ in 0..500 {
            if pred(&self.events()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached, events: {:?}", self.events());
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    async fn serve<S>(self, mut socket: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.connections.fetch_add(1, Ordering::SeqCst);
        self.record(Event::Connected);

        if let Served::Upgrade = self.serve_frames(&mut socket, true).await {
            if socket.write_all(&frame(0, &[])).await.is_ok() {
                if let Ok(mut tls) = tls_acceptor().accept(socket).await {
                    self.record(Event::TlsEstablished);
                    self.serve_frames(&mut tls, false).await;
                }
            }
        }

        self.record(Event::Disconnected);
    }

    async fn serve_frames<S>(&self, socket: &mut S, allow_upgrade: bool) -> Served
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some((msg_type, payload)) = read_frame(socket).await {
            let reply = match msg_type {
                2 => {
                    self.record(Event::CapabilitiesSet);
                    match self.script.tls {
                        TlsReply::Decline => error_frame(5001, "HY000", "Capability prepare failed for 'tls'"),
                        TlsReply::Error(code) => error_frame(code, "HY000", "capability rejected"),
                        TlsReply::AcceptThenHangUp => {
                            let _ = socket.write_all(&frame(0, &[])).await;
                            return Served::Closed;
                        }
                        TlsReply::Accept if allow_upgrade => return Served::Upgrade,
                        TlsReply::Accept => error_frame(5001, "HY000", "TLS already active"),
                    }
                }
                3 => {
                    self.record(Event::ConnectionClose);
                    let _ = socket.write_all(&frame(0, &[])).await;
                    let _ = socket.shutdown().await;
                    return Served::Closed;
                }
                4 => {
                    let mechanism = string_field(&payload, 1);
                    self.record(Event::AuthStart(mechanism.clone()));
                    if self.script.reject_auth {
                        error_frame(1045, "HY000", "Access denied for user")
                    } else if mechanism == "SHA256_MEMORY" {
                        let mut payload = vec![0x0A, 20];
                        payload.extend_from_slice(b"abcdefghijklmnopqrst");
                        frame(3, &payload)
                    } else {
                        frame(4, &[])
                    }
                }
                5 => {
                    self.record(Event::AuthContinue);
                    frame(4, &[])
                }
                12 => {
                    self.record(Event::Stmt(string_field(&payload, 1)));
                    frame(17, &[])
                }
                7 => {
                    self.record(Event::SessionClose);
                    frame(0, &[])
                }
                _ => frame(0, &[]),
            };

            if socket.write_all(&reply).await.is_err() {
                break;
            }
        }
        Served::Closed
    }
}

/// A loopback port nothing listens on
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn read_frame<S: AsyncRead + Unpin>(socket: &mut S) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    socket.read_exact(&mut header).await.ok()?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let mut payload = vec![0u8; len.saturating_sub(1)];
    socket.read_exact(&mut payload).await.ok()?;
    Some((header[4], payload))
}

fn frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 1) as u32).to_le_bytes().to_vec();
    out.push(msg_type);
    out.extend_from_slice(payload);
    out
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn error_frame(code: u32, sql_state: &str, msg: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.push(0x08); // severity = ERROR
    put_varint(&mut payload, 0);
    payload.push(0x10);
    put_varint(&mut payload, code as u64);
    payload.push(0x1A);
    put_varint(&mut payload, msg.len() as u64);
    payload.extend_from_slice(msg.as_bytes());
    payload.push(0x22);
    put_varint(&mut payload, sql_state.len() as u64);
    payload.extend_from_slice(sql_state.as_bytes());
    frame(1, &payload)
}

fn read_varint(data: &[u8], pos: &mut usize) -> u64 {
    let mut value = 0u64;
    let mut shift = 0;
    while let Some(&byte) = data.get(*pos) {
        *pos += 1;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    value
}

/// First length-delimited field `field` of a payload, as a string
fn string_field(payload: &[u8], field: u64) -> String {
    let mut pos = 0;
    while pos < payload.len() {
        let key = read_varint(payload, &mut pos);
        match key & 7 {
            0 => {
                read_varint(payload, &mut pos);
            }
            2 => {
                let len = read_varint(payload, &mut pos) as usize;
                let value = &payload[pos..pos + len];
                pos += len;
                if key >> 3 == field {
                    return String::from_utf8_lossy(value).into_owned();
                }
            }
            _ => break,
        }
    }
    String::new()
}
