//! Hashing and cancellable copying of entry streams.

use crate::error::Result;
use appsnap_common::CancelToken;
use sha3::{Digest, Sha3_384};
use std::io::{self, Read, Write};

/// Bytes moved per copy step; cancellation is polled between steps.
pub(crate) const COPY_CHUNK: usize = 64 * 1024;

/// Compute the lowercase hex SHA3-384 of a byte slice.
pub fn sha3_384_hex(data: &[u8]) -> String {
    let mut hasher = Sha3_384::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Running SHA3-384 plus byte count of everything written into it.
#[derive(Default)]
pub struct EntryDigest {
    hasher: Sha3_384,
    len: u64,
}

impl EntryDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Write for EntryDigest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copy `reader` into `writer` in chunks, checking `ctx` before each one.
pub(crate) fn copy_with_cancel<R, W>(ctx: &CancelToken, reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        ctx.check()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

/// Reader that yields exactly `remaining` bytes or fails.
///
/// A source that runs dry early produces `UnexpectedEof` instead of a short
/// stream, so a tar header never promises more bytes than follow it.
pub(crate) struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    pub(crate) fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended {} bytes early", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
