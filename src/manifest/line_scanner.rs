//! Fixed-buffer byte reader for record-oriented text.
//!
//! `LineScanner` wraps a raw byte source with one internal buffer allocated at
//! construction. It supports single-byte reads, bulk reads, bounded line
//! reads, and one-byte lookahead (`peek`) without consuming.
//!
//! # Invariants
//! - `pos <= filled <= buf.len()`; bytes in `buf[pos..filled]` are buffered
//!   and unconsumed.
//! - The source is only read when the buffer is empty, so data already
//!   buffered never costs a second blocking read.
//! - Read errors from the source propagate unchanged and are not retried
//!   (`Interrupted` excepted).

use std::io::{self, Read};

/// Default internal buffer size.
pub const DEFAULT_SCAN_BUFFER_LEN: usize = 8192;

pub struct LineScanner<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
}

impl<R: Read> LineScanner<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_SCAN_BUFFER_LEN, inner)
    }

    /// # Panics
    /// If `cap` is zero.
    pub fn with_capacity(cap: usize, inner: R) -> Self {
        assert!(cap > 0, "scan buffer must be non-empty");
        Self {
            inner,
            buf: vec![0u8; cap].into_boxed_slice(),
            pos: 0,
            filled: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes buffered and not yet consumed.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Refill when empty. Returns the number of buffered bytes afterwards;
    /// zero means end of source.
    fn fill(&mut self) -> io::Result<usize> {
        if self.pos < self.filled {
            return Ok(self.buffered());
        }
        self.pos = 0;
        self.filled = 0;
        loop {
            match self.inner.read(&mut self.buf) {
                Ok(n) => {
                    self.filled = n;
                    return Ok(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Read one byte; `None` at end of source.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.fill()? == 0 {
            return Ok(None);
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    /// Look at the next byte without consuming it; `None` at end of source.
    pub fn peek(&mut self) -> io::Result<Option<u8>> {
        if self.fill()? == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[self.pos]))
    }

    /// Copy bytes up to and including the next `\n` into `dst`.
    ///
    /// Returns `None` at end of source with nothing read. Otherwise returns
    /// the byte count; if `dst[n - 1] != b'\n'` the line was cut short, either
    /// because `dst` filled up or because the source ended mid-line.
    pub fn read_line(&mut self, dst: &mut [u8]) -> io::Result<Option<usize>> {
        let mut total = 0;
        while total < dst.len() {
            if self.fill()? == 0 {
                break;
            }
            let want = (dst.len() - total).min(self.buffered());
            let window = &self.buf[self.pos..self.pos + want];
            let (n, done) = match memchr::memchr(b'\n', window) {
                Some(i) => (i + 1, true),
                None => (want, false),
            };
            dst[total..total + n].copy_from_slice(&window[..n]);
            self.pos += n;
            total += n;
            if done {
                return Ok(Some(total));
            }
        }
        if total == 0 && !dst.is_empty() {
            return Ok(None);
        }
        Ok(Some(total))
    }

    /// Discard up to `n` bytes. Returns how many were skipped; fewer than `n`
    /// means the source ended.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut remaining = n;
        while remaining > 0 {
            if self.fill()? == 0 {
                break;
            }
            let step = (self.buffered() as u64).min(remaining) as usize;
            self.pos += step;
            remaining -= step as u64;
        }
        Ok(n - remaining)
    }
}

impl<R: Read> Read for LineScanner<R> {
    /// Bulk read. Requests at least as large as the internal buffer bypass it
    /// once buffered bytes are drained.
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.pos == self.filled && dst.len() >= self.buf.len() {
            return self.inner.read(dst);
        }
        if self.fill()? == 0 {
            return Ok(0);
        }
        let n = dst.len().min(self.buffered());
        dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
