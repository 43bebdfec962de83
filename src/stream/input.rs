//! Backup stream reader.

use std::io::{BufReader, Read, Seek, SeekFrom};

use super::codec::{decode_frame, decode_header, has_more, map_read_error, read_unit, Unit};
use super::counting::CountingReader;
use super::encrypted::{validate_encrypted_stream, DecryptingReader};
use super::StreamMode;
use crate::error::{Error, Result};
use crate::proto::{BackupHeader, Frame};

/// Outcome of [`BackupInputStream::read_header`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReadHeader {
    /// The decoded header
    pub header: BackupHeader,
    /// More units follow
    pub more_data_available: bool,
    /// Raw source bytes consumed by this call
    pub bytes_consumed: u64,
}

/// Outcome of [`BackupInputStream::read_frame`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFrame {
    /// `None` at end of stream; `Some(Frame { item: None })` is a frame
    /// from a newer writer
    pub frame: Option<Frame>,
    /// More units follow
    pub more_data_available: bool,
    /// Raw source bytes consumed by this call, including any unit whose
    /// decoding failed on the previous call
    pub bytes_consumed: u64,
}

enum Source<R: Read> {
    Plain(CountingReader<R>),
    Encrypted(DecryptingReader<CountingReader<R>>),
}

impl<R: Read> Source<R> {
    fn raw_consumed(&self) -> u64 {
        match self {
            Source::Plain(r) => r.consumed(),
            Source::Encrypted(r) => r.get_ref().consumed(),
        }
    }
}

impl<R: Read> Read for Source<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Source::Plain(r) => r.read(buf),
            Source::Encrypted(r) => r.read(buf),
        }
    }
}

/// Reads the header unit then frame units.
pub struct BackupInputStream<R: Read> {
    source: BufReader<Source<R>>,
    max_unit_size: usize,
    reported: u64,
    header_read: bool,
    finished: bool,
}

impl<R: Read + Seek> BackupInputStream<R> {
    /// Open a reader.
    ///
    /// In encrypted mode the whole source is authenticated first; a
    /// truncated, tampered or unfinished file fails here with
    /// [`Error::MacValidationFailed`] before any frame is produced. The
    /// segment size comes from the file, capped at `max_unit_size`.
    pub fn open(
        mut source: R,
        mode: StreamMode<'_>,
        max_unit_size: usize,
    ) -> Result<Self> {
        let start = source.stream_position()?;
        let source = match mode {
            StreamMode::Plaintext => Source::Plain(CountingReader::new(source)),
            StreamMode::Encrypted(key) => {
                validate_encrypted_stream(&mut source, key, max_unit_size)?;
                source.seek(SeekFrom::Start(start))?;
                let reader =
                    DecryptingReader::new(CountingReader::new(source), key, max_unit_size)?;
                Source::Encrypted(reader)
            }
        };

        Ok(Self {
            source: BufReader::new(source),
            max_unit_size,
            reported: 0,
            header_read: false,
            finished: false,
        })
    }
}

impl<R: Read> BackupInputStream<R> {
    fn take_consumed(&mut self) -> u64 {
        let total = self.source.get_ref().raw_consumed();
        let delta = total - self.reported;
        self.reported = total;
        delta
    }

    /// Raw source bytes consumed so far
    pub fn bytes_consumed_total(&self) -> u64 {
        self.source.get_ref().raw_consumed()
    }

    /// Read the header unit. Must be the first call.
    pub fn read_header(&mut self) -> Result<ReadHeader> {
        if self.header_read {
            return Err(Error::Internal("Backup header read twice".into()));
        }
        let payload = match read_unit(&mut self.source, self.max_unit_size)? {
            Unit::Payload(payload) => payload,
            Unit::EmptyFinal | Unit::EndOfStream => return Err(Error::MissingHeader),
        };
        let header = decode_header(&payload)?;
        self.header_read = true;
        let more_data_available = has_more(&mut self.source)?;
        self.finished = !more_data_available;

        Ok(ReadHeader {
            header,
            more_data_available,
            bytes_consumed: self.take_consumed(),
        })
    }

    /// Read the next frame unit.
    ///
    /// A zero-length unit is a clean end of stream only when nothing
    /// follows it; otherwise it is [`Error::InvalidByteLengthDelimiter`].
    /// A body that fails to decode is [`Error::FrameDeserialization`] and
    /// leaves the stream positioned at the next unit.
    pub fn read_frame(&mut self) -> Result<ReadFrame> {
        if !self.header_read {
            return Err(Error::MissingHeader);
        }
        if self.finished {
            return Ok(ReadFrame {
                frame: None,
                more_data_available: false,
                bytes_consumed: self.take_consumed(),
            });
        }

        let frame = match read_unit(&mut self.source, self.max_unit_size)? {
            Unit::Payload(payload) => Some(decode_frame(&payload)?),
            Unit::EmptyFinal => {
                if has_more(&mut self.source)? {
                    return Err(Error::InvalidByteLengthDelimiter);
                }
                None
            }
            Unit::EndOfStream => None,
        };

        let more_data_available = frame.is_some() && has_more(&mut self.source)?;
        self.finished = !more_data_available;

        Ok(ReadFrame {
            frame,
            more_data_available,
            bytes_consumed: self.take_consumed(),
        })
    }

    /// Drain anything left so the source is fully consumed and, in
    /// encrypted mode, the trailing segment re-authenticated.
    pub fn drain(&mut self) -> Result<u64> {
        let mut sink = Vec::new();
        let extra = self.source.read_to_end(&mut sink).map_err(map_read_error)?;
        if extra > 0 {
            return Err(Error::InvalidByteLengthDelimiter);
        }
        Ok(self.take_consumed())
    }
}
