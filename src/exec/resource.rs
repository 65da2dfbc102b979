//! Exec instance resource: inspect and start.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use http::{Method, Request, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::exec::session::ExecSession;
use crate::hijack::dispatcher::{Dispatcher, Exchange, HijackContext};
use crate::hijack::handshake::close_quietly;
use crate::hijack::types::{HijackError, HijackResult, InputSource};
use crate::http::body::RequestBody;
use crate::net::connector::Connector;
use crate::observability::metrics;

/// Body of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecStartOptions {
    pub detach: bool,
    pub tty: bool,
}

/// A batch of commands running inside a container, addressed by exec ID.
pub struct Exec {
    id: String,
    base_path: String,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
}

impl Exec {
    pub fn new(id: impl Into<String>, connector: Arc<dyn Connector>, config: &ClientConfig) -> Self {
        Self::with_dispatcher(
            id,
            config.endpoint.api_version.as_deref(),
            connector,
            Dispatcher::from_config(config),
        )
    }

    pub fn with_dispatcher(
        id: impl Into<String>,
        api_version: Option<&str>,
        connector: Arc<dyn Connector>,
        dispatcher: Dispatcher,
    ) -> Self {
        let id = id.into();
        let base_path = match api_version {
            Some(version) => format!("/{}/exec/{}", version, id),
            None => format!("/exec/{}", id),
        };
        Self {
            id,
            base_path,
            connector,
            dispatcher,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path prefix of this exec's endpoints.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Low-level information about this exec (`GET {base}/json`).
    pub async fn inspect(&self) -> HijackResult<serde_json::Value> {
        let uri = format!("{}/json", self.base_path);
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_str())
            .body(RequestBody::Empty)?;

        let connection = self.connector.connect().await?;
        let exchange = self
            .dispatcher
            .execute(request, Arc::clone(&connection), HijackContext::none())
            .await;
        let result = match exchange {
            Ok(exchange) => read_json(&uri, exchange).await,
            Err(e) => Err(e),
        };
        close_quietly(connection.as_ref()).await;
        result
    }

    /// Start this exec, relaying `input` into it and streaming its output.
    ///
    /// Without an input the connection is still upgraded; the daemon sees an
    /// input stream that ends immediately.
    pub async fn start(
        &self,
        detach: bool,
        tty: bool,
        input: Option<InputSource>,
    ) -> HijackResult<ExecSession> {
        let uri = format!("{}/start", self.base_path);
        let options = serde_json::to_vec(&ExecStartOptions { detach, tty })?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri.as_str())
            .header(UPGRADE, "tcp")
            .header(CONNECTION, "Upgrade")
            .header(CONTENT_TYPE, "application/json")
            .body(RequestBody::Full(Bytes::from(options)))?;
        let input: InputSource = match input {
            Some(input) => input,
            None => Box::new(tokio::io::empty()),
        };

        let connection = self.connector.connect().await?;
        let exchange = match self
            .dispatcher
            .execute(request, Arc::clone(&connection), HijackContext::with_input(input))
            .await
        {
            Ok(exchange) => exchange,
            Err(e) => {
                close_quietly(connection.as_ref()).await;
                return Err(e);
            }
        };

        match exchange {
            // Upgraded exchanges always carry the normalized 200.
            Exchange::Hijacked(exchange) => {
                metrics::record_session_started(tty);
                tracing::info!(exec_id = %self.id, connection_id = %connection.id(), "Exec started");
                Ok(ExecSession::new(exchange))
            }
            Exchange::Completed(response) => {
                close_quietly(connection.as_ref()).await;
                let status = response.status();
                let body = response.into_body().collect().await.unwrap_or_default();
                Err(unexpected_status(&uri, status, body))
            }
            Exchange::NoResponse { .. } => {
                close_quietly(connection.as_ref()).await;
                let wait = self.dispatcher.handshake_config().wait_for_response;
                Err(HijackError::NoUpgrade(wait.as_millis() as u64))
            }
        }
    }
}

impl std::fmt::Debug for Exec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exec")
            .field("id", &self.id)
            .field("base_path", &self.base_path)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

async fn read_json(uri: &str, exchange: Exchange) -> HijackResult<serde_json::Value> {
    let Some(response) = exchange.into_response() else {
        return Err(HijackError::MalformedResponse(format!("no response from {}", uri)));
    };
    let status = response.status();
    let body = response.into_body().collect().await?;
    if status != StatusCode::OK {
        return Err(unexpected_status(uri, status, body));
    }
    Ok(serde_json::from_slice(&body)?)
}

fn unexpected_status(uri: &str, actual: StatusCode, body: Bytes) -> HijackError {
    HijackError::UnexpectedStatus {
        uri: uri.to_string(),
        expected: StatusCode::OK.as_u16(),
        actual: actual.as_u16(),
        body,
    }
}
