//! Streaming request entity wrapping a raw input source.
//!
//! An entity of unknown length that can be consumed exactly once. A hijacked
//! connection writes it unframed; one that still speaks HTTP chunk-frames it.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::hijack::types::InputSource;

/// Default read size for one chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Declared length of an outbound entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLength {
    /// Exactly this many bytes.
    Known(u64),
    /// Length not known up front; the entity ends when its source does.
    Unknown,
}

/// A non-repeatable, streaming request body.
pub struct StreamingEntity {
    source: InputSource,
    chunk_size: usize,
}

impl StreamingEntity {
    /// Wrap `source`, reading at most `chunk_size` bytes per chunk.
    pub fn new(source: InputSource, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn content_length(&self) -> EntityLength {
        EntityLength::Unknown
    }

    pub fn is_streaming(&self) -> bool {
        true
    }

    pub fn is_repeatable(&self) -> bool {
        false
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read the next chunk. `None` at end of data.
    pub async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        let read = (&mut self.source)
            .take(self.chunk_size as u64)
            .read_buf(&mut buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }

    /// Drain the source into `out` unframed, flushing after every chunk.
    /// Returns the number of bytes written.
    pub async fn write_to<W>(mut self, out: &mut W) -> std::io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0u64;
        while let Some(chunk) = self.read_chunk().await? {
            out.write_all(&chunk).await?;
            out.flush().await?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }
}

impl fmt::Debug for StreamingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingEntity")
            .field("chunk_size", &self.chunk_size)
            .field("length", &self.content_length())
            .finish_non_exhaustive()
    }
}
