//! HTTP upgrade ("hijack") client for container exec sessions.
//!
//! Starts an exec over HTTP/1.1, upgrades the connection to a raw duplex
//! stream, relays caller input into it in the background and hands back the
//! live output.

pub mod config;
pub mod exec;
pub mod hijack;
pub mod http;
pub mod net;
pub mod observability;

pub use config::schema::ClientConfig;
pub use exec::{Exec, ExecSession, ExecStartOptions};
pub use hijack::{Dispatcher, Exchange, HijackContext, HijackError, HijackResult, InputSource};
pub use net::{Connector, EndpointConnector};
