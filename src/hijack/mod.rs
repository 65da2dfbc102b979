//! Connection hijacking subsystem.
//!
//! # Data Flow
//! ```text
//! Request + HijackContext
//!     → dispatcher.rs (plain exchange, or upgrade when an input is attached)
//!     → handshake.rs (send, bounded wait, require 101, raw mode)
//!     → relay.rs (background task: input → connection, flush per chunk)
//!     → response 200 whose body is the live output stream
//!
//! Connection States:
//!     Active → Hijacked → Closed
//!        └──────────────────↑ (on any handshake failure)
//! ```
//!
//! # Design Decisions
//! - The caller owns the connection; closing it is the only way to stop a relay
//! - A response that never arrives is reported, not treated as an error
//! - Relay failures surface through `RelayHandle::join`

pub mod dispatcher;
pub mod handshake;
pub mod relay;
pub mod types;

pub use dispatcher::{Dispatcher, Exchange, HijackContext};
pub use handshake::{normalize_upgrade_response, HandshakeConfig, HijackedExchange};
pub use relay::RelayHandle;
pub use types::{HijackError, HijackResult, InputSource};
