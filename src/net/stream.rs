//! HTTP/1.1 client connection over any async byte stream.
//!
//! # Responsibilities
//! - Split the stream into independently locked read and write halves
//! - Drive one HTTP exchange step by step (head, entity, response)
//! - Switch to raw streaming once an upgrade is accepted
//! - Wake every pending read and write when the connection is closed
//!
//! # Design Decisions
//! - Bounded (`Content-Length`) response bodies are read eagerly; chunked and
//!   read-until-close bodies move the read half into the returned `Body`
//! - The two halves never share a lock, so a relay task can write while the
//!   caller reads the output stream

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use http::{Method, Request, Response};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::{watch, Mutex};

use crate::hijack::types::{HijackError, HijackResult};
use crate::http::body::{Body, RequestBody};
use crate::http::codec::{self, BodyFraming, MAX_HEAD_BYTES};
use crate::net::connection::{ClientConnection, ConnectionId, ConnectionState};

/// Read size for streamed response bodies.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// HTTP/1.1 connection over `S`.
pub struct HttpConnection<S> {
    id: ConnectionId,
    /// Host header used when the request URI has no authority.
    host: String,
    state: AtomicU8,
    /// `None` once a streamed body has taken ownership of the read half.
    reader: Mutex<Option<BufReader<ReadHalf<S>>>>,
    writer: Mutex<BufWriter<WriteHalf<S>>>,
    closed: watch::Sender<bool>,
    /// Method of the last request sent, needed to decide if a response has a body.
    last_method: StdMutex<Method>,
}

impl<S> HttpConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an established stream.
    pub fn new(stream: S, host: impl Into<String>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        let id = ConnectionId::new();
        tracing::trace!(connection_id = %id, "Connection opened");
        Self {
            id,
            host: host.into(),
            state: AtomicU8::new(ConnectionState::Active as u8),
            reader: Mutex::new(Some(BufReader::new(read_half))),
            writer: Mutex::new(BufWriter::new(write_half)),
            closed,
            last_method: StdMutex::new(Method::GET),
        }
    }

    fn ensure_open(&self) -> HijackResult<()> {
        if self.state() == ConnectionState::Closed {
            return Err(HijackError::ConnectionClosed(self.id));
        }
        Ok(())
    }

    /// Run `fut` unless the connection is, or becomes, closed.
    async fn guarded<T, F>(&self, fut: F) -> HijackResult<T>
    where
        F: Future<Output = HijackResult<T>>,
    {
        self.ensure_open()?;
        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = closed_signal(&mut closed) => Err(HijackError::ConnectionClosed(self.id)),
            result = fut => result,
        }
    }

    /// Write one body frame and flush it.
    async fn write_frame(&self, data: &[u8], chunked: bool) -> HijackResult<()> {
        self.guarded(async {
            let mut writer = self.writer.lock().await;
            if chunked {
                writer
                    .write_all(format!("{:x}\r\n", data.len()).as_bytes())
                    .await?;
            }
            writer.write_all(data).await?;
            if chunked {
                writer.write_all(b"\r\n").await?;
            }
            writer.flush().await?;
            Ok(())
        })
        .await
    }

    fn last_method(&self) -> Method {
        match self.last_method.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_last_method(&self, method: &Method) {
        let mut guard = match self.last_method.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = method.clone();
    }
}

#[async_trait]
impl<S> ClientConnection for HttpConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    async fn send_request_header(&self, request: &Request<RequestBody>) -> HijackResult<()> {
        if self.state() == ConnectionState::Hijacked {
            return Err(HijackError::AlreadyHijacked(self.id));
        }
        let head = codec::encode_request_head(request, &self.host, false)?;
        self.set_last_method(request.method());

        tracing::debug!(
            connection_id = %self.id,
            method = %request.method(),
            uri = %request.uri(),
            "Sending request head"
        );

        self.guarded(async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&head).await?;
            Ok(())
        })
        .await
    }

    async fn send_request_entity(&self, request: &mut Request<RequestBody>) -> HijackResult<()> {
        let body = std::mem::take(request.body_mut());
        let chunked = self.state() != ConnectionState::Hijacked;

        match body {
            RequestBody::Empty => self.flush().await,
            RequestBody::Full(bytes) => self.write_frame(&bytes, false).await,
            RequestBody::Streaming(mut entity) => {
                // The writer lock is only held per chunk, never while waiting on input.
                while let Some(chunk) = self
                    .guarded(async { Ok(entity.read_chunk().await?) })
                    .await?
                {
                    self.write_frame(&chunk, chunked).await?;
                }
                if chunked {
                    // Zero-length chunk terminates the body.
                    self.write_frame(&[], true).await?;
                }
                Ok(())
            }
        }
    }

    async fn is_response_available(&self, wait: Duration) -> HijackResult<bool> {
        self.guarded(async {
            let mut guard = self.reader.lock().await;
            let reader = guard.as_mut().ok_or_else(|| body_taken(self.id))?;
            match tokio::time::timeout(wait, reader.fill_buf()).await {
                // Data or EOF; either way the next header read will not block.
                Ok(Ok(_)) => Ok(true),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Ok(false),
            }
        })
        .await
    }

    async fn receive_response_header(&self) -> HijackResult<Response<Body>> {
        let response = self
            .guarded(async {
                let mut guard = self.reader.lock().await;
                let reader = guard.as_mut().ok_or_else(|| body_taken(self.id))?;
                let head = read_head(reader).await?;
                codec::parse_response_head(&head)
            })
            .await?;

        tracing::debug!(
            connection_id = %self.id,
            status = response.status().as_u16(),
            "Received response head"
        );
        Ok(response)
    }

    async fn receive_response_entity(&self, response: &mut Response<Body>) -> HijackResult<()> {
        let framing = codec::response_framing(&self.last_method(), response)?;
        let body = match framing {
            BodyFraming::None => Body::Empty,
            BodyFraming::Length(len) => {
                self.guarded(async {
                    let mut guard = self.reader.lock().await;
                    let reader = guard.as_mut().ok_or_else(|| body_taken(self.id))?;
                    let mut buf = Vec::new();
                    let read = reader.take(len).read_to_end(&mut buf).await?;
                    if (read as u64) < len {
                        return Err(HijackError::Transport(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("response body ended after {} of {} bytes", read, len),
                        )));
                    }
                    Ok(Body::Full(Bytes::from(buf)))
                })
                .await?
            }
            BodyFraming::Chunked | BodyFraming::UntilClose => {
                let reader = self
                    .guarded(async {
                        let mut guard = self.reader.lock().await;
                        guard.take().ok_or_else(|| body_taken(self.id))
                    })
                    .await?;
                let decoder = match framing {
                    BodyFraming::Chunked => Decoder::Chunked { remaining: 0 },
                    _ => Decoder::UntilClose,
                };
                BodyReader {
                    id: self.id,
                    reader,
                    decoder,
                    closed: self.closed.subscribe(),
                    done: false,
                }
                .into_body()
            }
        };

        tracing::trace!(connection_id = %self.id, framing = ?framing, "Response entity attached");
        *response.body_mut() = body;
        Ok(())
    }

    async fn flush(&self) -> HijackResult<()> {
        self.guarded(async {
            let mut writer = self.writer.lock().await;
            writer.flush().await?;
            Ok(())
        })
        .await
    }

    fn enter_raw_mode(&self) -> HijackResult<()> {
        match self.state.compare_exchange(
            ConnectionState::Active as u8,
            ConnectionState::Hijacked as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                tracing::debug!(connection_id = %self.id, "Connection hijacked");
                Ok(())
            }
            Err(prev) if ConnectionState::from(prev) == ConnectionState::Hijacked => {
                Err(HijackError::AlreadyHijacked(self.id))
            }
            Err(_) => Err(HijackError::ConnectionClosed(self.id)),
        }
    }

    async fn close(&self) -> HijackResult<()> {
        let prev = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::SeqCst);
        if ConnectionState::from(prev) == ConnectionState::Closed {
            return Ok(());
        }
        self.closed.send_replace(true);
        tracing::debug!(connection_id = %self.id, "Closing connection");

        // Guarded operations release their locks as soon as they observe the signal.
        if let Ok(mut guard) = self.reader.try_lock() {
            guard.take();
        }
        let mut writer = self.writer.lock().await;
        writer.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Resolves once `closed` flips to true. Pends forever if the sender is gone.
async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn body_taken(id: ConnectionId) -> HijackError {
    HijackError::Transport(io::Error::new(
        io::ErrorKind::Other,
        format!("read half of {} is owned by a streamed response body", id),
    ))
}

/// Read bytes up to and including the blank line ending a response head.
async fn read_head<R>(reader: &mut R) -> HijackResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    loop {
        let start = head.len();
        // At most one byte past the limit, so an unterminated line cannot grow unbounded.
        let limit = (MAX_HEAD_BYTES + 1 - start) as u64;
        let read = (&mut *reader)
            .take(limit)
            .read_until(b'\n', &mut head)
            .await?;
        if read == 0 {
            return Err(HijackError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response head completed",
            )));
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(HijackError::MalformedResponse(
                "response head exceeds size limit".to_string(),
            ));
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            // Tolerate stray blank lines before the status line.
            if start == 0 {
                head.clear();
                continue;
            }
            return Ok(head);
        }
    }
}

enum Decoder {
    UntilClose,
    Chunked { remaining: u64 },
}

/// Owns the read half for a streamed response body.
struct BodyReader<S> {
    id: ConnectionId,
    reader: BufReader<ReadHalf<S>>,
    decoder: Decoder,
    closed: watch::Receiver<bool>,
    done: bool,
}

impl<S> BodyReader<S>
where
    S: AsyncRead + Send + 'static,
{
    fn into_body(self) -> Body {
        Body::streaming(stream::unfold(self, |mut state| async move {
            match state.next_frame().await {
                Ok(Some(bytes)) => Some((Ok(bytes), state)),
                Ok(None) => None,
                Err(e) => {
                    state.done = true;
                    Some((Err(e), state))
                }
            }
        }))
    }

    async fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let frame = tokio::select! {
            biased;
            _ = closed_signal(&mut self.closed) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                format!("{} closed", self.id),
            )),
            frame = read_frame(&mut self.reader, &mut self.decoder) => frame,
        };
        if let Ok(None) = frame {
            tracing::trace!(connection_id = %self.id, "Response body complete");
            self.done = true;
        }
        frame
    }
}

async fn read_frame<R>(reader: &mut R, decoder: &mut Decoder) -> io::Result<Option<Bytes>>
where
    R: AsyncBufRead + Unpin,
{
    match decoder {
        Decoder::UntilClose => {
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let read = reader.read_buf(&mut buf).await?;
            if read == 0 {
                return Ok(None);
            }
            Ok(Some(buf.freeze()))
        }
        Decoder::Chunked { remaining } => {
            if *remaining == 0 {
                let size = read_chunk_size(reader).await?;
                if size == 0 {
                    skip_trailers(reader).await?;
                    return Ok(None);
                }
                *remaining = size;
            }

            let want = (*remaining).min(READ_CHUNK_SIZE as u64) as usize;
            let mut buf = vec![0u8; want];
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside a chunk",
                ));
            }
            buf.truncate(read);
            *remaining -= read as u64;
            if *remaining == 0 {
                let mut crlf = [0u8; 2];
                reader.read_exact(&mut crlf).await?;
                if &crlf != b"\r\n" {
                    return Err(invalid_chunk("missing CRLF after chunk data"));
                }
            }
            Ok(Some(Bytes::from(buf)))
        }
    }
}

async fn read_chunk_size<R>(reader: &mut R) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before chunk size",
        ));
    }
    let digits = line.trim().split(';').next().unwrap_or("").trim();
    u64::from_str_radix(digits, 16).map_err(|_| invalid_chunk("invalid chunk size"))
}

async fn skip_trailers<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 || line.trim().is_empty() {
            return Ok(());
        }
    }
}

fn invalid_chunk(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
