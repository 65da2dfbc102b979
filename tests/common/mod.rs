//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use exec_hijack::hijack::{HijackError, HijackResult};
use exec_hijack::http::{Body, RequestBody};
use exec_hijack::net::{ClientConnection, ConnectionId, ConnectionState};

/// Something a `FakeConnection` was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SendHeader(String),
    /// Bounded request body.
    Body(Vec<u8>),
    /// One write of a streamed (relayed) entity.
    Write(Vec<u8>),
    Flush,
    RawMode,
    Close,
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Scripted server behaviour for a `FakeConnection`.
#[derive(Debug, Clone)]
pub struct Script {
    pub status: u16,
    pub body: Bytes,
    /// Whether a response shows up within the handshake wait.
    pub available: bool,
    /// Interim `100 Continue` heads sent before the real one.
    pub interim: usize,
}

impl Script {
    pub fn respond(status: u16, body: &'static [u8]) -> Self {
        Self {
            status,
            body: Bytes::from_static(body),
            available: true,
            interim: 0,
        }
    }

    pub fn silent() -> Self {
        Self {
            available: false,
            ..Self::respond(200, b"")
        }
    }
}

/// In-memory `ClientConnection` that records every step and replays a script.
pub struct FakeConnection {
    id: ConnectionId,
    state: AtomicU8,
    script: Script,
    interim_left: AtomicUsize,
    events: EventLog,
    closed: watch::Sender<bool>,
}

impl FakeConnection {
    pub fn new(script: Script) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: ConnectionId::new(),
            state: AtomicU8::new(ConnectionState::Active as u8),
            interim_left: AtomicUsize::new(script.interim),
            script,
            events: Arc::new(Mutex::new(Vec::new())),
            closed,
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.events().iter().filter(|e| **e == Event::Close).count()
    }

    /// Bytes written by the relay, concatenated.
    pub fn relayed(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(bytes) => Some(bytes),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn ensure_open(&self) -> HijackResult<()> {
        if self.state() == ConnectionState::Closed {
            return Err(HijackError::ConnectionClosed(self.id));
        }
        Ok(())
    }
}

#[async_trait]
impl ClientConnection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    async fn send_request_header(&self, request: &Request<RequestBody>) -> HijackResult<()> {
        self.ensure_open()?;
        self.push(Event::SendHeader(format!("{} {}", request.method(), request.uri())));
        Ok(())
    }

    async fn send_request_entity(&self, request: &mut Request<RequestBody>) -> HijackResult<()> {
        self.ensure_open()?;
        match std::mem::take(request.body_mut()) {
            RequestBody::Empty => Ok(()),
            RequestBody::Full(bytes) => {
                self.push(Event::Body(bytes.to_vec()));
                Ok(())
            }
            RequestBody::Streaming(entity) => {
                let mut writer = RecordingWriter {
                    events: Arc::clone(&self.events),
                };
                let mut closed = self.closed.subscribe();
                tokio::select! {
                    biased;
                    _ = async { let _ = closed.wait_for(|c| *c).await; } => {
                        Err(HijackError::ConnectionClosed(self.id))
                    }
                    written = entity.write_to(&mut writer) => written.map(|_| ()).map_err(Into::into),
                }
            }
        }
    }

    async fn is_response_available(&self, wait: Duration) -> HijackResult<bool> {
        self.ensure_open()?;
        if self.script.available {
            return Ok(true);
        }
        tokio::time::sleep(wait).await;
        Ok(false)
    }

    async fn receive_response_header(&self) -> HijackResult<Response<Body>> {
        self.ensure_open()?;
        let interim = self
            .interim_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let status = if interim {
            StatusCode::CONTINUE
        } else {
            StatusCode::from_u16(self.script.status).unwrap()
        };
        Ok(Response::builder().status(status).body(Body::Empty).unwrap())
    }

    async fn receive_response_entity(&self, response: &mut Response<Body>) -> HijackResult<()> {
        self.ensure_open()?;
        *response.body_mut() = Body::Full(self.script.body.clone());
        Ok(())
    }

    async fn flush(&self) -> HijackResult<()> {
        self.ensure_open()?;
        self.push(Event::Flush);
        Ok(())
    }

    fn enter_raw_mode(&self) -> HijackResult<()> {
        self.state
            .compare_exchange(
                ConnectionState::Active as u8,
                ConnectionState::Hijacked as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| HijackError::AlreadyHijacked(self.id))?;
        self.push(Event::RawMode);
        Ok(())
    }

    async fn close(&self) -> HijackResult<()> {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        self.closed.send_replace(true);
        self.push(Event::Close);
        Ok(())
    }
}

/// Writer that logs each write and flush into an event log.
struct RecordingWriter {
    events: EventLog,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.events.lock().unwrap().push(Event::Write(buf.to_vec()));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.events.lock().unwrap().push(Event::Flush);
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Input that yields `data` once, then fails every read with `BrokenPipe`.
pub struct FailingInput {
    data: Option<&'static [u8]>,
}

impl FailingInput {
    pub fn after(data: &'static [u8]) -> Self {
        Self { data: Some(data) }
    }
}

impl AsyncRead for FailingInput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.data.take() {
            Some(data) => {
                buf.put_slice(data);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "input went away",
            ))),
        }
    }
}

/// Read one request head (through the blank line) without consuming the body.
pub async fn read_request_head<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if reader.read_exact(&mut byte).await.is_err() {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).into_owned()
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Response head accepting an upgrade, as the daemon sends it.
pub const UPGRADE_HEAD: &[u8] = b"HTTP/1.1 101 UPGRADED\r\nContent-Type: application/vnd.docker.raw-stream\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n";

/// How the mock daemon answers every request.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Upgrade, echo input back, and close after seeing `exit\n` (answering `bye\n`).
    Echo,
    /// Upgrade, write these bytes and close.
    Greet(&'static [u8]),
    /// Answer with this status and JSON body.
    Reply(u16, &'static str),
    /// Read the request and never answer.
    Silent,
}

/// A request as the mock daemon received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub head: String,
    pub body: Vec<u8>,
}

pub struct MockDaemon {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockDaemon {
    pub fn address(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock container daemon on an ephemeral port.
pub async fn start_mock_daemon(behavior: Behavior) -> MockDaemon {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let recorded = Arc::clone(&recorded);
            tokio::spawn(serve(socket, behavior, recorded));
        }
    });

    MockDaemon { addr, requests }
}

async fn serve(mut socket: TcpStream, behavior: Behavior, recorded: Arc<Mutex<Vec<Recorded>>>) {
    let head = read_request_head(&mut socket).await;
    let mut body = vec![0u8; content_length(&head)];
    if socket.read_exact(&mut body).await.is_err() {
        return;
    }
    recorded.lock().unwrap().push(Recorded { head, body });

    match behavior {
        Behavior::Echo => {
            let _ = socket.write_all(UPGRADE_HEAD).await;
            let mut seen = Vec::new();
            let mut buf = [0u8; 256];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                seen.extend_from_slice(&buf[..n]);
                let _ = socket.write_all(&buf[..n]).await;
                if seen.windows(5).any(|w| w == b"exit\n") {
                    let _ = socket.write_all(b"bye\n").await;
                    break;
                }
            }
            let _ = socket.shutdown().await;
        }
        Behavior::Greet(bytes) => {
            let _ = socket.write_all(UPGRADE_HEAD).await;
            let _ = socket.write_all(bytes).await;
            let _ = socket.shutdown().await;
        }
        Behavior::Reply(status, json) => {
            let response = format!(
                "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                status,
                json.len(),
                json
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        Behavior::Silent => {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}
