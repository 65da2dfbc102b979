//! Duplex relay: forwards caller input into a hijacked connection.
//!
//! # Responsibilities
//! - Drain the input source chunk by chunk into the connection
//! - Run as its own task, concurrent with the caller reading output
//! - Report bytes forwarded, or the failure that stopped it, via `RelayHandle`
//!
//! # Design Decisions
//! - Input is framed as a synthetic `POST /` request whose entity has unknown
//!   length; in raw mode the connection writes it unframed, so nothing but the
//!   input bytes reaches the wire
//! - Flush after every chunk (interactive sessions)

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Method, Request};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::task::JoinHandle;

use crate::hijack::types::{HijackError, HijackResult, InputSource};
use crate::http::body::RequestBody;
use crate::http::entity::StreamingEntity;
use crate::net::connection::{ClientConnection, ConnectionId};
use crate::observability::metrics;

/// Handle to a running relay task.
#[derive(Debug)]
pub struct RelayHandle {
    connection_id: ConnectionId,
    task: JoinHandle<HijackResult<u64>>,
}

impl RelayHandle {
    /// Connection the relay writes to.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the relay without waiting for it.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the relay to end.
    ///
    /// Returns the number of input bytes forwarded once the input is exhausted.
    /// A relay stopped by closing the connection yields `ConnectionClosed`.
    pub async fn join(self) -> HijackResult<u64> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(HijackError::Relay(format!(
                "relay for {} was aborted",
                self.connection_id
            ))),
            Err(e) => Err(HijackError::Relay(e.to_string())),
        }
    }
}

/// Start relaying `input` into `connection`, which must already be in raw mode.
pub fn spawn(
    connection: Arc<dyn ClientConnection>,
    input: InputSource,
    chunk_size: usize,
) -> RelayHandle {
    let connection_id = connection.id();
    let task = tokio::spawn(run(connection, input, chunk_size));
    RelayHandle {
        connection_id,
        task,
    }
}

async fn run(
    connection: Arc<dyn ClientConnection>,
    input: InputSource,
    chunk_size: usize,
) -> HijackResult<u64> {
    let connection_id = connection.id();
    let (input, forwarded) = CountingReader::new(input);
    let entity = StreamingEntity::new(Box::new(input), chunk_size);
    let mut request = forwarding_request(entity)?;

    tracing::debug!(connection_id = %connection_id, chunk_size, "Relay started");
    let result = connection.send_request_entity(&mut request).await;
    let bytes = forwarded.load(Ordering::Relaxed);
    metrics::record_relay_bytes(bytes);

    match result {
        Ok(()) => {
            tracing::debug!(connection_id = %connection_id, bytes, "Relay input exhausted");
            Ok(bytes)
        }
        Err(e) if e.is_closed() => {
            tracing::debug!(connection_id = %connection_id, bytes, "Relay stopped by close");
            Err(e)
        }
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, bytes, error = %e, "Relay failed");
            metrics::record_relay_failure();
            Err(e)
        }
    }
}

/// Placeholder request carrying the input entity. Only its body is ever written.
fn forwarding_request(entity: StreamingEntity) -> HijackResult<Request<RequestBody>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(RequestBody::Streaming(entity))?)
}

/// Counts bytes read through it.
struct CountingReader {
    inner: InputSource,
    count: Arc<AtomicU64>,
}

impl CountingReader {
    fn new(inner: InputSource) -> (Self, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        (
            Self {
                inner,
                count: Arc::clone(&count),
            },
            count,
        )
    }
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let read = buf.filled().len() - before;
            self.count.fetch_add(read as u64, Ordering::Relaxed);
        }
        poll
    }
}
