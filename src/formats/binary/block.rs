use std::io::{self, ErrorKind, Read};

/// Fixed-size read-ahead buffer over a byte stream.
///
/// Holds at most one block, or one oversized record when a caller asks for
/// more than a block. Tracks the absolute stream offset of the first
/// unconsumed byte.
pub struct BlockBuffer<R> {
    reader: R,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    block_size: usize,
    offset: u64,
    eof: bool,
}

impl<R: Read> BlockBuffer<R> {
    /// `offset` is the absolute position of `reader` in the underlying stream
    pub fn new(reader: R, block_size: usize, offset: u64) -> Self {
        let block_size = block_size.max(16);
        Self {
            reader,
            buf: vec![0u8; block_size],
            start: 0,
            end: 0,
            block_size,
            offset,
            eof: false,
        }
    }

    /// Absolute offset of the next unconsumed byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Unconsumed bytes currently buffered
    pub fn available(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Make at least `len` bytes available, unless the stream ends first.
    ///
    /// Returns the number of bytes available afterwards, which is less than
    /// `len` only at end of stream.
    pub fn fill_to(&mut self, len: usize) -> io::Result<usize> {
        if self.end - self.start >= len || self.eof {
            return Ok(self.end - self.start);
        }

        self.compact(len);

        while self.end - self.start < len {
            match self.reader.read(&mut self.buf[self.end..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => self.end += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(self.end - self.start)
    }

    /// Mark `len` buffered bytes as consumed
    pub fn consume(&mut self, len: usize) {
        debug_assert!(len <= self.end - self.start);
        self.start += len;
        self.offset += len as u64;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Move pending bytes to the front and size the buffer for `len` bytes.
    /// Grows past one block only for an oversized record and shrinks back after.
    fn compact(&mut self, len: usize) {
        let pending = self.end - self.start;
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.start = 0;
            self.end = pending;
        }

        let wanted = len.div_ceil(self.block_size).max(1) * self.block_size;
        if wanted != self.buf.len() && wanted >= pending {
            self.buf.resize(wanted, 0);
            self.buf.shrink_to(wanted);
        }
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.buf.len()
    }
}
