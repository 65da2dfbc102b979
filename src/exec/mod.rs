//! Exec instance API.
//!
//! # Data Flow
//! ```text
//! Exec::start(detach, tty, input)
//!     → connector (fresh connection)
//!     → POST {base}/start, Upgrade: tcp, {"Detach":..,"Tty":..}
//!     → dispatcher (upgrade, relay input)
//!     → ExecSession (live output; finish closes and joins the relay)
//! ```
//!
//! Base path is `/{api_version}/exec/{id}`, or `/exec/{id}` without a version.

pub mod resource;
pub mod session;

pub use resource::{Exec, ExecStartOptions};
pub use session::ExecSession;
