//! Backup stream writer.

use std::io::{BufWriter, Write};

use super::codec::{encode_frame, encode_header, write_unit};
use super::counting::DigestWriter;
use super::encrypted::EncryptingWriter;
use super::StreamMode;
use crate::error::{Error, Result};
use crate::proto::{BackupHeader, Frame};

/// Anything archivers can write frames into.
pub trait FrameSink {
    /// Append one frame
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
}

/// Collects frames in memory.
impl FrameSink for Vec<Frame> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.push(frame.clone());
        Ok(())
    }
}

enum Sink<W: Write> {
    Plain(BufWriter<DigestWriter<W>>),
    Encrypted(EncryptingWriter<BufWriter<DigestWriter<W>>>),
}

impl<W: Write> Sink<W> {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w,
            Sink::Encrypted(w) => w,
        }
    }
}

/// What a closed stream produced.
#[derive(Debug)]
pub struct StreamSummary<W> {
    /// The underlying sink, flushed
    pub inner: W,
    /// Bytes written to the sink
    pub byte_length: u64,
    /// SHA-256 of the bytes written to the sink
    pub sha256: [u8; 32],
    /// Frames written, excluding the header
    pub frame_count: u64,
}

/// Writes a header unit then frame units, plaintext or encrypted.
pub struct BackupOutputStream<W: Write> {
    sink: Option<Sink<W>>,
    max_unit_size: usize,
    header_written: bool,
    frame_count: u64,
}

impl<W: Write> BackupOutputStream<W> {
    /// Open a writer. Encrypted mode writes the prelude immediately.
    pub fn open(
        sink: W,
        mode: StreamMode<'_>,
        max_unit_size: usize,
        segment_size: usize,
    ) -> Result<Self> {
        let buffered = BufWriter::new(DigestWriter::new(sink));
        let sink = match mode {
            StreamMode::Plaintext => Sink::Plain(buffered),
            StreamMode::Encrypted(key) => {
                Sink::Encrypted(EncryptingWriter::new(buffered, key, segment_size)?)
            }
        };
        Ok(Self {
            sink: Some(sink),
            max_unit_size,
            header_written: false,
            frame_count: 0,
        })
    }

    fn sink(&mut self) -> Result<&mut dyn Write> {
        self.sink
            .as_mut()
            .map(Sink::writer)
            .ok_or(Error::StreamClosed)
    }

    /// Write the header unit. Must be the first call.
    pub fn write_header(&mut self, header: &BackupHeader) -> Result<()> {
        if self.header_written {
            return Err(Error::Internal("Backup header written twice".into()));
        }
        let payload = encode_header(header)?;
        let max = self.max_unit_size;
        write_unit(self.sink()?, &payload, max)?;
        self.header_written = true;
        Ok(())
    }

    /// Frames written so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Finish the stream. In encrypted mode this is the only place the
    /// final authenticated segment is written.
    pub fn close(mut self) -> Result<StreamSummary<W>> {
        let sink = self.sink.take().ok_or(Error::StreamClosed)?;
        let buffered = match sink {
            Sink::Plain(w) => w,
            Sink::Encrypted(w) => w.finish()?,
        };
        let digest_writer = buffered
            .into_inner()
            .map_err(|e| Error::Io(e.error().to_string()))?;
        let (inner, byte_length, sha256) = digest_writer.finish();

        Ok(StreamSummary {
            inner,
            byte_length,
            sha256,
            frame_count: self.frame_count,
        })
    }
}

impl<W: Write> FrameSink for BackupOutputStream<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if !self.header_written {
            return Err(Error::MissingHeader);
        }
        let payload = encode_frame(frame)?;
        let max = self.max_unit_size;
        write_unit(self.sink()?, &payload, max)?;
        self.frame_count += 1;
        Ok(())
    }
}
