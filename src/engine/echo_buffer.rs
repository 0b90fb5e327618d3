use bytes::{Bytes, BytesMut};

/// Byte queue that re-chunks echoed data into fixed-size pieces
///
/// Bytes are pushed as they are read and popped in chunks of exactly
/// `chunk_size`; a trailing partial chunk stays queued until more data
/// completes it. A `chunk_size` of zero pops everything queued at once.
#[derive(Debug)]
pub struct EchoBuffer {
    buffer: BytesMut,
    chunk_size: usize,
}

impl EchoBuffer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(chunk_size.max(1024)),
            chunk_size,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Removes the next complete chunk, if one is available
    pub fn pop_chunk(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            return None;
        }
        if self.chunk_size == 0 {
            return Some(self.buffer.split().freeze());
        }
        if self.buffer.len() < self.chunk_size {
            return None;
        }
        Some(self.buffer.split_to(self.chunk_size).freeze())
    }

    /// Bytes waiting for a chunk to complete
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
