//! Client connection abstraction and lifecycle state.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track connection state (Active → Hijacked → Closed)
//! - Define the step-level operations the dispatcher drives
//!
//! # Design Decisions
//! - Every operation takes `&self`: the caller's body reader and the relay
//!   task share one `Arc<dyn ClientConnection>` and must not block each other
//! - Closing is the only cancellation primitive; it wakes both halves

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::{Request, Response};

use crate::hijack::types::HijackResult;
use crate::http::body::{Body, RequestBody};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection speaks request/response HTTP.
    Active = 0,
    /// Upgrade accepted; all further bytes are uninterpreted.
    Hijacked = 1,
    /// Connection is closed.
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Active,
            1 => ConnectionState::Hijacked,
            _ => ConnectionState::Closed,
        }
    }
}

/// A full-duplex client transport driven one HTTP step at a time.
///
/// Implementations must allow one task to read while another writes.
#[async_trait]
pub trait ClientConnection: Send + Sync {
    /// This connection's ID.
    fn id(&self) -> ConnectionId;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Write the request line and headers.
    async fn send_request_header(&self, request: &Request<RequestBody>) -> HijackResult<()>;

    /// Write the request body, consuming it. Streaming entities are written
    /// until their source is exhausted.
    async fn send_request_entity(&self, request: &mut Request<RequestBody>) -> HijackResult<()>;

    /// Wait up to `wait` for response bytes. `false` means the wait elapsed.
    async fn is_response_available(&self, wait: Duration) -> HijackResult<bool>;

    /// Read a status line and headers. The returned body is empty.
    async fn receive_response_header(&self) -> HijackResult<Response<Body>>;

    /// Attach the body the response's framing implies.
    async fn receive_response_entity(&self, response: &mut Response<Body>) -> HijackResult<()>;

    /// Flush buffered outbound bytes.
    async fn flush(&self) -> HijackResult<()>;

    /// Switch to raw streaming. Fails if the connection was already hijacked.
    fn enter_raw_mode(&self) -> HijackResult<()>;

    /// Close both halves. Pending and later operations fail.
    async fn close(&self) -> HijackResult<()>;
}
