//! Request dispatcher: plain exchange or upgrade, chosen per request.

use std::fmt;
use std::sync::Arc;

use http::{Request, Response};

use crate::config::ClientConfig;
use crate::hijack::handshake::{
    self, close_quietly, receive_final_header, HandshakeConfig, HijackedExchange, UpgradeOutcome,
};
use crate::hijack::types::{HijackError, HijackResult, InputSource};
use crate::http::body::{Body, RequestBody};
use crate::http::codec::can_have_body;
use crate::net::connection::{ClientConnection, ConnectionState};

/// Associates one outgoing request with the input to forward once it is upgraded.
///
/// Without an input the request is executed as an ordinary exchange.
#[derive(Default)]
pub struct HijackContext {
    input: Option<InputSource>,
}

impl HijackContext {
    /// Context for an ordinary request.
    pub fn none() -> Self {
        Self { input: None }
    }

    /// Context that hijacks the connection and forwards `input`.
    pub fn with_input(input: InputSource) -> Self {
        Self { input: Some(input) }
    }

    pub fn is_hijack(&self) -> bool {
        self.input.is_some()
    }
}

impl fmt::Debug for HijackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackContext")
            .field("has_input", &self.input.is_some())
            .finish()
    }
}

/// What a dispatched request produced.
pub enum Exchange {
    /// Ordinary request/response exchange.
    Completed(Response<Body>),
    /// Upgrade accepted; the response body is the live output stream.
    Hijacked(HijackedExchange),
    /// No response within the handshake wait. No relay was started and the
    /// input source is handed back unread.
    NoResponse { input: InputSource },
}

impl Exchange {
    pub fn is_hijacked(&self) -> bool {
        matches!(self, Exchange::Hijacked(_))
    }

    /// The response, if one was received.
    pub fn into_response(self) -> Option<Response<Body>> {
        match self {
            Exchange::Completed(response) => Some(response),
            Exchange::Hijacked(exchange) => Some(exchange.response),
            Exchange::NoResponse { .. } => None,
        }
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Completed(response) => f.debug_tuple("Completed").field(response).finish(),
            Exchange::Hijacked(exchange) => f.debug_tuple("Hijacked").field(exchange).finish(),
            Exchange::NoResponse { .. } => f.write_str("NoResponse"),
        }
    }
}

/// Execution strategy for one request.
enum Strategy {
    Plain,
    Upgrade(InputSource),
}

impl Strategy {
    fn select(context: HijackContext) -> Self {
        match context.input {
            Some(input) => Strategy::Upgrade(input),
            None => Strategy::Plain,
        }
    }
}

/// Executes requests on caller-supplied connections.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    handshake: HandshakeConfig,
}

impl Dispatcher {
    pub fn new(handshake: HandshakeConfig) -> Self {
        Self { handshake }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(HandshakeConfig::from(config))
    }

    pub fn handshake_config(&self) -> &HandshakeConfig {
        &self.handshake
    }

    /// Execute `request` on `connection`.
    ///
    /// Hijacks the connection when `context` carries an input source;
    /// otherwise performs an ordinary exchange. Errors propagate unchanged.
    pub async fn execute(
        &self,
        request: Request<RequestBody>,
        connection: Arc<dyn ClientConnection>,
        context: HijackContext,
    ) -> HijackResult<Exchange> {
        validate(&request, connection.as_ref())?;

        match Strategy::select(context) {
            Strategy::Plain => execute_plain(request, connection.as_ref())
                .await
                .map(Exchange::Completed),
            Strategy::Upgrade(input) => {
                match handshake::upgrade(request, connection, input, &self.handshake).await? {
                    UpgradeOutcome::Upgraded(exchange) => Ok(Exchange::Hijacked(exchange)),
                    UpgradeOutcome::NoResponse(input) => Ok(Exchange::NoResponse { input }),
                }
            }
        }
    }
}

/// Reject inputs that cannot be dispatched, before any I/O.
fn validate(request: &Request<RequestBody>, connection: &dyn ClientConnection) -> HijackResult<()> {
    let state = connection.state();
    if state != ConnectionState::Active {
        return Err(HijackError::InvalidArgument(format!(
            "connection {} is {:?}",
            connection.id(),
            state
        )));
    }
    if request.uri().path().is_empty() {
        return Err(HijackError::InvalidArgument(format!(
            "request target '{}' has no path",
            request.uri()
        )));
    }
    Ok(())
}

/// Ordinary exchange. Closes the connection on failure.
async fn execute_plain(
    mut request: Request<RequestBody>,
    connection: &dyn ClientConnection,
) -> HijackResult<Response<Body>> {
    let result = async {
        connection.send_request_header(&request).await?;
        if request.body().is_present() {
            connection.send_request_entity(&mut request).await?;
        } else {
            connection.flush().await?;
        }

        let mut response = receive_final_header(connection).await?;
        if can_have_body(request.method(), response.status()) {
            connection.receive_response_entity(&mut response).await?;
        }
        Ok::<_, HijackError>(response)
    }
    .await;

    if let Err(e) = &result {
        tracing::debug!(connection_id = %connection.id(), error = %e, "Request failed");
        close_quietly(connection).await;
    }
    result
}
