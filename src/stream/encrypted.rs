//! # Encrypted Stream Layer
//!
//! Authenticated encryption wrapped around the whole unit sequence.
//!
//! ## File Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ENCRYPTED BACKUP FILE                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Prelude:  "UMBK" │ format (1) │ segment size (u32 BE) │ salt (32)     │
//! │                                                                         │
//! │  Segment:  len|flag (u32 BE) │ AES-256-GCM(plaintext) ‖ tag (16)       │
//! │            ...                                                          │
//! │  Final:    len|FINAL_BIT     │ AES-256-GCM(SHA-256 of all segments)    │
//! │                                                                         │
//! │  nonce(i) = prefix ‖ i ‖ final flag        AAD = prelude               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The final segment exists only if [`EncryptingWriter::finish`] ran, so an
//! unfinished file never validates. Readers take the segment size from the
//! authenticated prelude, bounded by their own unit limit. A reader validates every segment and
//! the trailing digest before any plaintext is released
//! ([`validate_encrypted_stream`]), then decrypts in a second pass.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use thiserror::Error;

use crate::crypto::{
    derive_stream_keys, open_segment, seal_segment, BackupKey, SegmentNonce, StreamKeys,
    SALT_SIZE, TAG_SIZE,
};
use crate::error::{Error, Result};

/// Magic bytes at the start of an encrypted backup
pub const MAGIC: &[u8; 4] = b"UMBK";

/// Encrypted container format
pub const ENCRYPTED_FORMAT: u8 = 1;

/// Prelude length: magic, format byte, segment size, salt
pub const PRELUDE_SIZE: usize = SALT_OFFSET + SALT_SIZE;

const SEGMENT_SIZE_OFFSET: usize = MAGIC.len() + 1;
const SALT_OFFSET: usize = SEGMENT_SIZE_OFFSET + 4;

/// High bit of a segment length marks the final segment
const FINAL_BIT: u32 = 0x8000_0000;

/// Plaintext of the final segment is a SHA-256 digest
const DIGEST_SIZE: usize = 32;

/// Smallest plaintext segment a writer accepts
pub const MIN_SEGMENT_SIZE: usize = DIGEST_SIZE;

/// Authentication failure surfaced through `std::io::Read`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StreamAuthError(pub String);

fn auth_io_error(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, StreamAuthError(msg.into()))
}

fn build_prelude(segment_size: u32, salt: &[u8; SALT_SIZE]) -> Vec<u8> {
    let mut prelude = Vec::with_capacity(PRELUDE_SIZE);
    prelude.extend_from_slice(MAGIC);
    prelude.push(ENCRYPTED_FORMAT);
    prelude.extend_from_slice(&segment_size.to_be_bytes());
    prelude.extend_from_slice(salt);
    prelude
}

/// Read and check the prelude. Returns it with the writer's segment size.
fn read_prelude<R: Read>(source: &mut R, max_segment_size: usize) -> Result<(Vec<u8>, usize)> {
    let mut prelude = vec![0u8; PRELUDE_SIZE];
    source.read_exact(&mut prelude).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::InvalidEncryptedPrelude("file shorter than prelude".into())
        } else {
            Error::from(e)
        }
    })?;
    if &prelude[..MAGIC.len()] != MAGIC {
        return Err(Error::InvalidEncryptedPrelude("bad magic".into()));
    }
    if prelude[MAGIC.len()] != ENCRYPTED_FORMAT {
        return Err(Error::InvalidEncryptedPrelude(format!(
            "unknown container format {}",
            prelude[MAGIC.len()]
        )));
    }
    let mut size_bytes = [0u8; 4];
    size_bytes.copy_from_slice(&prelude[SEGMENT_SIZE_OFFSET..SALT_OFFSET]);
    let segment_size = u32::from_be_bytes(size_bytes) as usize;
    if !(MIN_SEGMENT_SIZE..=max_segment_size).contains(&segment_size) {
        return Err(Error::InvalidEncryptedPrelude(format!(
            "segment size {} out of range",
            segment_size
        )));
    }
    Ok((prelude, segment_size))
}

fn derive_from_prelude(key: &BackupKey, prelude: &[u8]) -> Result<StreamKeys> {
    derive_stream_keys(key, &prelude[SALT_OFFSET..])
}

// ============================================================================
// WRITER
// ============================================================================

/// Buffers plaintext into fixed-size segments and encrypts each one.
pub struct EncryptingWriter<W: Write> {
    inner: W,
    keys: StreamKeys,
    prelude: Vec<u8>,
    buffer: Vec<u8>,
    segment_size: usize,
    counter: u32,
    digest: Sha256,
}

impl<W: Write> EncryptingWriter<W> {
    /// Write the prelude with a fresh random salt and start segmenting.
    pub fn new(mut inner: W, key: &BackupKey, segment_size: usize) -> Result<Self> {
        if segment_size < MIN_SEGMENT_SIZE || segment_size + TAG_SIZE >= FINAL_BIT as usize {
            return Err(Error::EncryptionFailed(format!(
                "Segment size out of range: {}",
                segment_size
            )));
        }
        let mut salt = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let prelude = build_prelude(segment_size as u32, &salt);
        let keys = derive_from_prelude(key, &prelude)?;
        inner.write_all(&prelude)?;

        Ok(Self {
            inner,
            keys,
            prelude,
            buffer: Vec::with_capacity(segment_size),
            segment_size,
            counter: 0,
            digest: Sha256::new(),
        })
    }

    fn emit_segment(&mut self, plaintext: &[u8], is_final: bool) -> Result<()> {
        let nonce = SegmentNonce::new(&self.keys.nonce_prefix, self.counter, is_final);
        let ciphertext = seal_segment(&self.keys.cipher_key, &nonce, plaintext, &self.prelude)?;

        let mut len_field = ciphertext.len() as u32;
        if is_final {
            len_field |= FINAL_BIT;
        }
        let len_bytes = len_field.to_be_bytes();
        self.inner.write_all(&len_bytes)?;
        self.inner.write_all(&ciphertext)?;

        if !is_final {
            self.digest.update(len_bytes);
            self.digest.update(&ciphertext);
        }
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| Error::EncryptionFailed("Segment counter exhausted".into()))?;
        Ok(())
    }

    fn flush_full_segments(&mut self) -> Result<()> {
        while self.buffer.len() >= self.segment_size {
            let rest = self.buffer.split_off(self.segment_size);
            let segment = std::mem::replace(&mut self.buffer, rest);
            self.emit_segment(&segment, false)?;
        }
        Ok(())
    }

    /// Seal the stream: flush buffered plaintext, then write the final
    /// segment carrying the digest of everything before it.
    pub fn finish(mut self) -> Result<W> {
        if !self.buffer.is_empty() {
            let segment = std::mem::take(&mut self.buffer);
            self.emit_segment(&segment, false)?;
        }
        let digest: [u8; DIGEST_SIZE] = std::mem::take(&mut self.digest).finalize().into();
        self.emit_segment(&digest, true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.flush_full_segments()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    /// Flushes the sink only; partial segments stay buffered until `finish`.
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

// ============================================================================
// SEGMENT PARSING
// ============================================================================

enum Segment {
    Data(Vec<u8>),
    Final,
}

/// Walks segments, authenticating each and tracking the running digest.
struct SegmentCursor {
    keys: StreamKeys,
    prelude: Vec<u8>,
    max_data_ciphertext: usize,
    counter: u32,
    digest: Sha256,
}

impl SegmentCursor {
    fn new(key: &BackupKey, prelude: Vec<u8>, segment_size: usize) -> Result<Self> {
        Ok(Self {
            keys: derive_from_prelude(key, &prelude)?,
            prelude,
            max_data_ciphertext: segment_size + TAG_SIZE,
            counter: 0,
            digest: Sha256::new(),
        })
    }

    /// Read and authenticate the next segment. Every failure is a
    /// [`StreamAuthError`].
    fn next_segment<R: Read>(&mut self, source: &mut R) -> std::io::Result<Segment> {
        let mut len_bytes = [0u8; 4];
        read_exact_or(source, &mut len_bytes, "stream ended before final segment")?;

        let len_field = u32::from_be_bytes(len_bytes);
        let is_final = len_field & FINAL_BIT != 0;
        let ct_len = (len_field & !FINAL_BIT) as usize;
        let in_range = if is_final {
            ct_len == DIGEST_SIZE + TAG_SIZE
        } else {
            (TAG_SIZE..=self.max_data_ciphertext).contains(&ct_len)
        };
        if !in_range {
            return Err(auth_io_error(format!(
                "segment {} length {} out of range",
                self.counter, ct_len
            )));
        }

        let mut ciphertext = vec![0u8; ct_len];
        read_exact_or(source, &mut ciphertext, "truncated segment")?;

        let nonce = SegmentNonce::new(&self.keys.nonce_prefix, self.counter, is_final);
        let plaintext = open_segment(&self.keys.cipher_key, &nonce, &ciphertext, &self.prelude)
            .map_err(|_| {
                auth_io_error(format!("segment {} failed authentication", self.counter))
            })?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| auth_io_error("segment counter exhausted"))?;

        if !is_final {
            self.digest.update(len_bytes);
            self.digest.update(&ciphertext);
            return Ok(Segment::Data(plaintext));
        }

        let expected: [u8; DIGEST_SIZE] = std::mem::take(&mut self.digest).finalize().into();
        if plaintext.as_slice() != expected.as_slice() {
            return Err(auth_io_error("stream digest mismatch"));
        }
        let mut trailing = [0u8; 1];
        loop {
            match source.read(&mut trailing) {
                Ok(0) => break,
                Ok(_) => return Err(auth_io_error("data after final segment")),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Segment::Final)
    }
}

fn read_exact_or<R: Read>(source: &mut R, buf: &mut [u8], msg: &str) -> std::io::Result<()> {
    source.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            auth_io_error(msg)
        } else {
            e
        }
    })
}

/// Summary of a validated encrypted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedStream {
    /// Data segments, excluding the final segment
    pub data_segments: u32,
    /// Total plaintext bytes
    pub plaintext_len: u64,
}

/// Authenticate an entire encrypted stream without releasing plaintext.
///
/// Memory use is one segment regardless of file size. A prelude declaring
/// segments above `max_segment_size` is rejected.
pub fn validate_encrypted_stream<R: Read>(
    source: &mut R,
    key: &BackupKey,
    max_segment_size: usize,
) -> Result<ValidatedStream> {
    let (prelude, segment_size) = read_prelude(source, max_segment_size)?;
    let mut cursor = SegmentCursor::new(key, prelude, segment_size)?;
    let mut plaintext_len = 0u64;
    let mut data_segments = 0u32;

    loop {
        match cursor.next_segment(source).map_err(super::codec::map_read_error)? {
            Segment::Data(plaintext) => {
                plaintext_len += plaintext.len() as u64;
                data_segments += 1;
            }
            Segment::Final => {
                return Ok(ValidatedStream {
                    data_segments,
                    plaintext_len,
                })
            }
        }
    }
}

// ============================================================================
// READER
// ============================================================================

/// Decrypts segments on demand. Use only on a source that already passed
/// [`validate_encrypted_stream`]; it re-checks every tag regardless.
pub struct DecryptingReader<R: Read> {
    inner: R,
    cursor: SegmentCursor,
    plaintext: Vec<u8>,
    position: usize,
    finished: bool,
}

impl<R: Read> DecryptingReader<R> {
    /// Consume the prelude and prepare to decrypt.
    pub fn new(mut inner: R, key: &BackupKey, max_segment_size: usize) -> Result<Self> {
        let (prelude, segment_size) = read_prelude(&mut inner, max_segment_size)?;
        Ok(Self {
            inner,
            cursor: SegmentCursor::new(key, prelude, segment_size)?,
            plaintext: Vec::new(),
            position: 0,
            finished: false,
        })
    }

    /// The wrapped source
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.position == self.plaintext.len() {
            if self.finished {
                return Ok(0);
            }
            match self.cursor.next_segment(&mut self.inner)? {
                Segment::Data(plaintext) => {
                    self.plaintext = plaintext;
                    self.position = 0;
                }
                Segment::Final => {
                    self.finished = true;
                    self.plaintext.clear();
                    self.position = 0;
                }
            }
        }

        let available = &self.plaintext[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

// ============================================================================
// TESTS
// ============================================================================
