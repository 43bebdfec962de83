//! Byte accounting adapters around the raw backup file.

use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom, Write};

/// Counts bytes pulled from the underlying source.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    consumed: u64,
}

impl<R> CountingReader<R> {
    /// Wrap a source; the count starts at zero.
    pub fn new(inner: R) -> Self {
        Self { inner, consumed: 0 }
    }

    /// Raw bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let position = self.inner.seek(pos)?;
        self.consumed = position;
        Ok(position)
    }
}

/// Counts and hashes every byte written to the sink.
pub struct DigestWriter<W> {
    inner: W,
    written: u64,
    digest: Sha256,
}

impl<W: Write> DigestWriter<W> {
    /// Wrap a sink
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            digest: Sha256::new(),
        }
    }

    /// Unwrap, returning the sink, total length and SHA-256 of the output.
    pub fn finish(self) -> (W, u64, [u8; 32]) {
        (self.inner, self.written, self.digest.finalize().into())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.digest.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
