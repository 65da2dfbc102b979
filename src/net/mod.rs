//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! endpoint address
//!     → connector.rs (parse endpoint, connect with timeout)
//!     → stream.rs (HTTP/1.1 over the socket, split read/write halves)
//!     → connection.rs (step-level trait the dispatcher drives)
//!
//! Connection States:
//!     Active → Hijacked → Closed
//! ```
//!
//! # Design Decisions
//! - One connection per request; no pooling
//! - Close is the only cancellation primitive and wakes both halves

pub mod connection;
pub mod connector;
pub mod stream;

pub use connection::{ClientConnection, ConnectionId, ConnectionState};
pub use connector::{Connector, Endpoint, EndpointConnector, EndpointError};
pub use stream::HttpConnection;
