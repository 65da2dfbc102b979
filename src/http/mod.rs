//! HTTP/1.1 message handling.
//!
//! # Data Flow
//! ```text
//! Request<RequestBody>
//!     → codec.rs (encode head, decide body framing)
//!     → entity.rs (streaming entity of unknown length)
//!     → [connection writes]
//!
//! [connection reads]
//!     → codec.rs (parse head with httparse)
//!     → body.rs (eager, chunked or read-until-close body)
//!     → Response<Body>
//! ```

pub mod body;
pub mod codec;
pub mod entity;

pub use body::{Body, RequestBody};
pub use entity::{EntityLength, StreamingEntity, DEFAULT_CHUNK_SIZE};
