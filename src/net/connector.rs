//! Connecting to the container daemon.
//!
//! # Responsibilities
//! - Parse the configured endpoint address (`unix://`, `tcp://`, `http://`)
//! - Open a fresh connection per request, bounded by the connect timeout
//! - Wrap the socket in an `HttpConnection`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use url::Url;

use crate::config::ClientConfig;
use crate::hijack::types::{HijackError, HijackResult};
use crate::net::connection::ClientConnection;
use crate::net::stream::HttpConnection;

/// Host header sent over a Unix socket, which has no authority of its own.
const UNIX_HOST: &str = "localhost";

/// Endpoint address parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme '{0}' (expected unix, tcp or http)")]
    UnsupportedScheme(String),

    #[error("missing {0}")]
    Missing(&'static str),
}

/// A daemon address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    pub fn parse(address: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(address).map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;
        match url.scheme() {
            "unix" => {
                if url.path().is_empty() || url.path() == "/" {
                    return Err(EndpointError::Missing("socket path"));
                }
                Ok(Endpoint::Unix(PathBuf::from(url.path())))
            }
            "tcp" | "http" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or(EndpointError::Missing("host"))?;
                let port = url
                    .port_or_known_default()
                    .ok_or(EndpointError::Missing("port"))?;
                Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Value for the `Host` header.
    pub fn host_header(&self) -> String {
        match self {
            Endpoint::Unix(_) => UNIX_HOST.to_string(),
            Endpoint::Tcp { host, port } => format!("{}:{}", host, port),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}

/// Source of fresh connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> HijackResult<Arc<dyn ClientConnection>>;
}

/// Connects to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConnector {
    endpoint: Endpoint,
    connect_timeout: Duration,
}

impl EndpointConnector {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, EndpointError> {
        Ok(Self::new(
            Endpoint::parse(&config.endpoint.address)?,
            config.timeouts.connect_timeout(),
        ))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn open(&self) -> std::io::Result<Arc<dyn ClientConnection>> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Arc::new(HttpConnection::new(stream, self.endpoint.host_header())))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Arc::new(HttpConnection::new(stream, UNIX_HOST)))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }
}

#[async_trait]
impl Connector for EndpointConnector {
    async fn connect(&self) -> HijackResult<Arc<dyn ClientConnection>> {
        let connection = tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| {
                HijackError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.endpoint),
                ))
            })??;

        tracing::debug!(
            endpoint = %self.endpoint,
            connection_id = %connection.id(),
            "Connected to daemon"
        );
        Ok(connection)
    }
}
