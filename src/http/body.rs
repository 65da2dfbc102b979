//! Request and response bodies.
//!
//! # Design Decisions
//! - Response bodies are `Stream`s of `Bytes`, so a live hijacked output
//!   stream and a buffered JSON reply look the same to callers
//! - Streaming request bodies are moved out when sent (never repeatable)

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::http::entity::StreamingEntity;

/// Outgoing request body.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Bounded payload (e.g. JSON options).
    Full(Bytes),
    /// Unbounded payload drained from an input source.
    Streaming(StreamingEntity),
}

impl RequestBody {
    /// Whether there is anything to send after the head.
    pub fn is_present(&self) -> bool {
        match self {
            RequestBody::Empty => false,
            RequestBody::Full(bytes) => !bytes.is_empty(),
            RequestBody::Streaming(_) => true,
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Full(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Full(Bytes::from(bytes))
    }
}

/// Incoming response body.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    /// Fully received payload.
    Full(Bytes),
    /// Payload still arriving from the connection.
    Streaming(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// Wrap a stream of body chunks.
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body::Streaming(stream.boxed())
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Body::Streaming(_))
    }

    /// Next chunk, or `None` once the body is exhausted.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.next().await
    }

    /// Read the whole body into memory.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            mut body => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = body.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Body::Streaming(stream) = this {
            return stream.as_mut().poll_next(cx);
        }
        match std::mem::take(this) {
            Body::Full(bytes) if !bytes.is_empty() => Poll::Ready(Some(Ok(bytes))),
            _ => Poll::Ready(None),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Body::Streaming(_) => f.write_str("Body::Streaming"),
        }
    }
}
