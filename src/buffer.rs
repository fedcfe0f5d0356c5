//! A buffer for bytes received from the transport.
//!
//! The `ReceiveBuffer` is a buffer of bytes similar to a first-in, first-out queue.
//! The transport appends to it and the channel consumes frames from the front.

use std::io::Cursor;

use bytes::Buf;

use crate::error::CapacityError;

/// A FIFO buffer holding received but not yet processed bytes.
#[derive(Debug)]
pub struct ReceiveBuffer {
    storage: Cursor<Vec<u8>>,
    limit: usize,
}

impl ReceiveBuffer {
    /// Initializes an empty buffer that refuses to hold more than `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self { storage: Cursor::new(Vec::new()), limit }
    }

    /// Appends received bytes.
    ///
    /// Nothing is appended if the result would exceed the limit.
    pub fn append(&mut self, data: &[u8]) -> Result<(), CapacityError> {
        self.clean();

        let size = self.storage.get_ref().len().saturating_add(data.len());
        if size > self.limit {
            return Err(CapacityError::ReceiveBufferFull { size, max: self.limit });
        }

        self.storage.get_mut().extend_from_slice(data);
        Ok(())
    }

    /// Drops everything, consumed or not, and releases the memory.
    pub fn clear(&mut self) {
        *self.storage.get_mut() = Vec::new();
        self.storage.set_position(0);
    }

    /// Whether there is nothing left to process.
    pub fn is_empty(&self) -> bool {
        !self.has_remaining()
    }

    /// Cleans up the parts of the vector that has already been read by the cursor
    fn clean(&mut self) {
        let pos = self.storage.position() as usize;
        self.storage.get_mut().drain(..pos);
        self.storage.set_position(0);
    }
}

impl Buf for ReceiveBuffer {
    fn remaining(&self) -> usize {
        self.storage.get_ref().len() - self.storage.position() as usize
    }

    fn chunk(&self) -> &[u8] {
        let pos = self.storage.position() as usize;
        &self.storage.get_ref()[pos..]
    }

    fn advance(&mut self, cnt: usize) {
        let new_position =
            (self.storage.position() + cnt as u64).min(self.storage.get_ref().len() as u64);
        self.storage.set_position(new_position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_consume() {
        let mut buf = ReceiveBuffer::new(16);
        buf.append(b"Hello").unwrap();
        buf.append(b", world").unwrap();
        assert_eq!(buf.chunk(), b"Hello, world");

        buf.advance(7);
        assert_eq!(buf.chunk(), b"world");
        assert_eq!(buf.remaining(), 5);

        buf.advance(100);
        assert!(buf.is_empty());
    }

    #[test]
    fn consumed_bytes_do_not_count_against_the_limit() {
        let mut buf = ReceiveBuffer::new(8);
        buf.append(b"12345678").unwrap();
        buf.advance(6);
        buf.append(b"abcdef").unwrap();
        assert_eq!(buf.chunk(), b"78abcdef");
    }

    #[test]
    fn refuses_to_overflow() {
        let mut buf = ReceiveBuffer::new(4);
        buf.append(b"abc").unwrap();
        assert_eq!(buf.append(b"de"), Err(CapacityError::ReceiveBufferFull { size: 5, max: 4 }));
        assert_eq!(buf.chunk(), b"abc");

        buf.clear();
        assert!(buf.is_empty());
        buf.append(b"wxyz").unwrap();
    }
}
