//! A running exec session: live output plus the input relay.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::hijack::handshake::{close_quietly, HijackedExchange};
use crate::hijack::relay::RelayHandle;
use crate::hijack::types::HijackResult;
use crate::http::body::Body;
use crate::net::connection::{ClientConnection, ConnectionId};

/// Output of a started exec, streamed from the hijacked connection.
///
/// Input keeps flowing in the background until the input source ends or the
/// session is finished. Dropping the session aborts the relay.
pub struct ExecSession {
    status: StatusCode,
    headers: HeaderMap,
    output: Body,
    /// `None` once `finish` has taken it.
    relay: Option<RelayHandle>,
    connection: Arc<dyn ClientConnection>,
}

impl ExecSession {
    pub(crate) fn new(exchange: HijackedExchange) -> Self {
        let HijackedExchange {
            response,
            relay,
            connection,
        } = exchange;
        let (parts, output) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            output,
            relay: Some(relay),
            connection,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Whether the relay has stopped, either because the input ended or it failed.
    pub fn input_finished(&self) -> bool {
        self.relay.as_ref().map_or(true, RelayHandle::is_finished)
    }

    /// The live output stream.
    pub fn output(&mut self) -> &mut Body {
        &mut self.output
    }

    /// Read output until the server closes the stream.
    pub async fn read_output_to_end(&mut self) -> HijackResult<Bytes> {
        Ok(std::mem::take(&mut self.output).collect().await?)
    }

    /// Close the connection and wait for the relay.
    ///
    /// Returns the number of input bytes forwarded if the input was exhausted,
    /// or `None` if the relay was still running and stopped by the close.
    pub async fn finish(mut self) -> HijackResult<Option<u64>> {
        close_quietly(self.connection.as_ref()).await;
        let Some(relay) = self.relay.take() else {
            return Ok(None);
        };
        match relay.join().await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_closed() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("status", &self.status)
            .field("connection_id", &self.connection.id())
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}
