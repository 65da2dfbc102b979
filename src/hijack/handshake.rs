//! Upgrade handshake: switches a connection from HTTP to a raw duplex stream.
//!
//! # Sequence
//! ```text
//! send head → send options body → wait (bounded) for a response
//!     → receive head (+ body if the status allows one)
//!     → 101? no  → close, Protocol error (bounded body only)
//!            yes → raw mode → spawn relay → flush → 101 becomes 200
//!                → attach the live output stream as the response body
//! ```
//!
//! Any failure after the connection is acquired closes it exactly once and
//! re-raises the error that caused it. Nothing here retries.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};

use crate::config::ClientConfig;
use crate::hijack::relay::{self, RelayHandle};
use crate::hijack::types::{HijackError, HijackResult, InputSource};
use crate::http::body::{Body, RequestBody};
use crate::http::codec::can_have_body;
use crate::http::entity::DEFAULT_CHUNK_SIZE;
use crate::net::connection::ClientConnection;
use crate::observability::metrics;

/// Default bounded wait for the server's reply.
pub const DEFAULT_WAIT_FOR_CONTINUE: Duration = Duration::from_millis(3000);

/// Tunables for the handshake and the relay it starts.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long to wait for the response to become available.
    pub wait_for_response: Duration,
    /// Relay read size.
    pub chunk_size: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            wait_for_response: DEFAULT_WAIT_FOR_CONTINUE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&ClientConfig> for HandshakeConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            wait_for_response: config.timeouts.handshake_wait(),
            chunk_size: config.relay.chunk_size,
        }
    }
}

/// A connection whose upgrade was accepted.
pub struct HijackedExchange {
    /// The normalized (200) response; its body is the live server output.
    pub response: Response<Body>,
    /// The task forwarding caller input into the connection.
    pub relay: RelayHandle,
    /// The hijacked connection, shared with the relay.
    pub connection: Arc<dyn ClientConnection>,
}

impl std::fmt::Debug for HijackedExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HijackedExchange")
            .field("response", &self.response)
            .field("relay", &self.relay)
            .field("connection_id", &self.connection.id())
            .finish()
    }
}

/// Result of an upgrade attempt that did not fail.
pub enum UpgradeOutcome {
    Upgraded(HijackedExchange),
    /// Nothing arrived within the wait; the input source was never read.
    NoResponse(InputSource),
}

/// Per-exchange bookkeeping.
#[derive(Debug, Default)]
struct ExchangeState {
    request_sent: bool,
}

/// Rewrite an accepted upgrade's `101 Switching Protocols` into `200 OK`.
///
/// Downstream consumers expect an ordinary "OK with streamed body" response.
/// Returns whether the status was rewritten.
pub fn normalize_upgrade_response(response: &mut Response<Body>) -> bool {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return false;
    }
    *response.status_mut() = StatusCode::OK;
    true
}

/// Perform the upgrade handshake on `connection` and, on success, start relaying `input`.
pub async fn upgrade(
    request: Request<RequestBody>,
    connection: Arc<dyn ClientConnection>,
    input: InputSource,
    config: &HandshakeConfig,
) -> HijackResult<UpgradeOutcome> {
    let mut state = ExchangeState::default();
    match perform(request, &connection, input, config, &mut state).await {
        Ok(outcome) => {
            let label = match outcome {
                UpgradeOutcome::Upgraded(_) => "upgraded",
                UpgradeOutcome::NoResponse(_) => "no_response",
            };
            metrics::record_handshake(label);
            Ok(outcome)
        }
        Err(e) => {
            tracing::warn!(
                connection_id = %connection.id(),
                request_sent = state.request_sent,
                error = %e,
                "Upgrade handshake failed"
            );
            metrics::record_handshake(if matches!(e, HijackError::Protocol { .. }) {
                "rejected"
            } else {
                "failed"
            });
            close_quietly(connection.as_ref()).await;
            Err(e)
        }
    }
}

async fn perform(
    mut request: Request<RequestBody>,
    connection: &Arc<dyn ClientConnection>,
    input: InputSource,
    config: &HandshakeConfig,
    state: &mut ExchangeState,
) -> HijackResult<UpgradeOutcome> {
    state.request_sent = false;
    connection.send_request_header(&request).await?;
    if request.body().is_present() {
        connection.send_request_entity(&mut request).await?;
    } else {
        connection.flush().await?;
    }
    state.request_sent = true;

    if !connection
        .is_response_available(config.wait_for_response)
        .await?
    {
        connection.flush().await?;
        tracing::warn!(
            connection_id = %connection.id(),
            wait_ms = config.wait_for_response.as_millis() as u64,
            "No response to upgrade request, connection not hijacked"
        );
        return Ok(UpgradeOutcome::NoResponse(input));
    }

    let mut response = receive_final_header(connection.as_ref()).await?;
    let status = response.status();
    if can_have_body(request.method(), status) {
        connection.receive_response_entity(&mut response).await?;
    }

    if status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(HijackError::Protocol {
            status: status.as_u16(),
            body: rejection_body(connection.as_ref(), std::mem::take(response.body_mut())),
        });
    }

    connection.enter_raw_mode()?;
    let relay = relay::spawn(Arc::clone(connection), input, config.chunk_size);
    connection.flush().await?;

    normalize_upgrade_response(&mut response);
    connection.receive_response_entity(&mut response).await?;

    tracing::info!(connection_id = %connection.id(), "Connection upgraded to raw stream");
    Ok(UpgradeOutcome::Upgraded(HijackedExchange {
        response,
        relay,
        connection: Arc::clone(connection),
    }))
}

/// The server's message for a rejected upgrade.
///
/// Only a body that already arrived in full is kept. A chunked or
/// read-until-close body may never end, so it is dropped unread and the
/// caller closes the connection.
fn rejection_body(connection: &dyn ClientConnection, body: Body) -> Bytes {
    match body {
        Body::Empty => Bytes::new(),
        Body::Full(bytes) => bytes,
        Body::Streaming(_) => {
            tracing::debug!(
                connection_id = %connection.id(),
                "Discarding unbounded body of rejected upgrade"
            );
            Bytes::new()
        }
    }
}

/// Receive the first non-`100 Continue` response head.
pub(crate) async fn receive_final_header(
    connection: &dyn ClientConnection,
) -> HijackResult<Response<Body>> {
    loop {
        let response = connection.receive_response_header().await?;
        if response.status() != StatusCode::CONTINUE {
            return Ok(response);
        }
        tracing::trace!(connection_id = %connection.id(), "Skipping 100 Continue");
    }
}

/// Close `connection`, ignoring close-time errors.
pub(crate) async fn close_quietly(connection: &dyn ClientConnection) {
    if let Err(e) = connection.close().await {
        tracing::trace!(connection_id = %connection.id(), error = %e, "Error while closing connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_switching_protocols() {
        let mut response = Response::builder().status(101).body(Body::Empty).unwrap();
        assert!(normalize_upgrade_response(&mut response));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_normalize_leaves_other_statuses() {
        for code in [200u16, 204, 404, 500] {
            let mut response = Response::builder().status(code).body(Body::Empty).unwrap();
            assert!(!normalize_upgrade_response(&mut response));
            assert_eq!(response.status().as_u16(), code);
        }
    }

    #[test]
    fn test_rejection_body_keeps_only_complete_payloads() {
        let connection = crate::net::HttpConnection::new(tokio::io::duplex(64).0, "localhost");
        assert_eq!(
            rejection_body(&connection, Body::Full(Bytes::from_static(b"{\"message\":\"gone\"}"))),
            Bytes::from_static(b"{\"message\":\"gone\"}")
        );
        assert!(rejection_body(&connection, Body::Empty).is_empty());
        let endless = Body::streaming(futures_util::stream::pending());
        assert!(rejection_body(&connection, endless).is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = HandshakeConfig::default();
        assert_eq!(config.wait_for_response, Duration::from_millis(3000));
        assert_eq!(config.chunk_size, 1024);
    }
}
