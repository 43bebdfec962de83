//! # Unit Codec
//!
//! Length-delimited units and the header/frame payload encodings.
//!
//! Units are length-prefixed with a 4-byte big-endian u32. A zero length
//! marks an empty final unit.

use std::io::{BufRead, Read, Write};

use crate::error::{Error, Result};
use crate::proto::{tag, BackupHeader, Frame, FrameItem};

/// Size of the length delimiter in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Result of pulling one unit off a source
#[derive(Debug, PartialEq, Eq)]
pub enum Unit {
    /// A non-empty payload
    Payload(Vec<u8>),
    /// A zero-length unit
    EmptyFinal,
    /// The source ended exactly on a unit boundary
    EndOfStream,
}

// ============================================================================
// LENGTH-DELIMITED UNITS
// ============================================================================

/// Write one length-prefixed unit; returns the bytes written.
pub fn write_unit<W: Write + ?Sized>(
    io: &mut W,
    payload: &[u8],
    max_unit_size: usize,
) -> Result<u64> {
    if payload.len() > max_unit_size {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            max: max_unit_size,
        });
    }

    let len = (payload.len() as u32).to_be_bytes();
    io.write_all(&len)?;
    io.write_all(payload)?;

    Ok((LENGTH_PREFIX_SIZE + payload.len()) as u64)
}

/// Read one unit. Never reads past the declared length.
pub fn read_unit<R: BufRead>(io: &mut R, max_unit_size: usize) -> Result<Unit> {
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        match io.read(&mut len_buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_read_error(e)),
        }
    }
    match filled {
        0 => return Ok(Unit::EndOfStream),
        LENGTH_PREFIX_SIZE => {}
        _ => return Err(Error::InvalidByteLengthDelimiter),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(Unit::EmptyFinal);
    }
    if len > max_unit_size {
        return Err(Error::FrameTooLarge {
            size: len,
            max: max_unit_size,
        });
    }

    // take() bounds the read; a short result means the delimiter lied.
    let mut payload = Vec::with_capacity(len.min(64 * 1024));
    (&mut *io)
        .take(len as u64)
        .read_to_end(&mut payload)
        .map_err(map_read_error)?;
    if payload.len() != len {
        return Err(Error::InvalidByteLengthDelimiter);
    }

    Ok(Unit::Payload(payload))
}

/// Whether the source has at least one more byte.
pub fn has_more<R: BufRead>(io: &mut R) -> Result<bool> {
    Ok(!io.fill_buf().map_err(map_read_error)?.is_empty())
}

/// Translate a read failure, surfacing stream authentication failures.
pub(crate) fn map_read_error(err: std::io::Error) -> Error {
    if let Some(auth) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<super::encrypted::StreamAuthError>())
    {
        return Error::MacValidationFailed(auth.to_string());
    }
    Error::from(err)
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Encode the header payload
pub fn encode_header(header: &BackupHeader) -> Result<Vec<u8>> {
    bincode::serialize(header).map_err(|e| Error::FrameSerialization(e.to_string()))
}

/// Decode the header payload
pub fn decode_header(payload: &[u8]) -> Result<BackupHeader> {
    bincode::deserialize(payload).map_err(|e| Error::FrameDeserialization(e.to_string()))
}

/// Encode a frame payload: tag byte, then the bincode record
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let item = frame
        .item
        .as_ref()
        .ok_or_else(|| Error::FrameSerialization("Cannot encode an unrecognized frame".into()))?;

    let body = match item {
        FrameItem::Account(p) => bincode::serialize(p),
        FrameItem::Recipient(p) => bincode::serialize(p),
        FrameItem::Chat(p) => bincode::serialize(p),
        FrameItem::ChatItem(p) => bincode::serialize(p),
        FrameItem::StickerPack(p) => bincode::serialize(p),
        FrameItem::AdHocCall(p) => bincode::serialize(p),
    }
    .map_err(|e| Error::FrameSerialization(e.to_string()))?;

    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(item.tag());
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Decode a frame payload. Unknown tags give an unrecognized frame.
pub fn decode_frame(payload: &[u8]) -> Result<Frame> {
    let (&frame_tag, body) = payload
        .split_first()
        .ok_or_else(|| Error::FrameDeserialization("Empty frame payload".into()))?;

    let item = match frame_tag {
        tag::ACCOUNT => FrameItem::Account(bincode::deserialize(body)?),
        tag::RECIPIENT => FrameItem::Recipient(bincode::deserialize(body)?),
        tag::CHAT => FrameItem::Chat(bincode::deserialize(body)?),
        tag::CHAT_ITEM => FrameItem::ChatItem(bincode::deserialize(body)?),
        tag::STICKER_PACK => FrameItem::StickerPack(bincode::deserialize(body)?),
        tag::AD_HOC_CALL => FrameItem::AdHocCall(bincode::deserialize(body)?),
        _ => return Ok(Frame::unrecognized()),
    };

    Ok(Frame::new(item))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{ChatProto, StickerPackProto};
    use std::io::Cursor;

    #[test]
    fn test_unit_layout() {
        let mut buf = Vec::new();
        let written = write_unit(&mut buf, b"abc", 16).unwrap();
        assert_eq!(written, 7);
        assert_eq!(buf, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_read_sequence_of_units() {
        let mut buf = Vec::new();
        write_unit(&mut buf, b"one", 16).unwrap();
        write_unit(&mut buf, b"", 16).unwrap();
        let mut cursor = Cursor::new(buf);

        assert_eq!(read_unit(&mut cursor, 16).unwrap(), Unit::Payload(b"one".to_vec()));
        assert_eq!(read_unit(&mut cursor, 16).unwrap(), Unit::EmptyFinal);
        assert_eq!(read_unit(&mut cursor, 16).unwrap(), Unit::EndOfStream);
    }

    #[test]
    fn test_truncated_delimiter() {
        let mut cursor = Cursor::new(vec![0u8, 0]);
        assert_eq!(
            read_unit(&mut cursor, 16).unwrap_err(),
            Error::InvalidByteLengthDelimiter
        );
    }

    #[test]
    fn test_delimiter_exceeding_remaining_bytes() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 10, 1, 2, 3]);
        assert_eq!(
            read_unit(&mut cursor, 16).unwrap_err(),
            Error::InvalidByteLengthDelimiter
        );
    }

    #[test]
    fn test_read_stops_at_declared_length() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 2, 1, 2, 3, 4]);
        assert_eq!(read_unit(&mut cursor, 16).unwrap(), Unit::Payload(vec![1, 2]));
        assert_eq!(cursor.position(), 6);
    }

    #[test]
    fn test_oversized_units_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_unit(&mut buf, &[0u8; 17], 16),
            Err(Error::FrameTooLarge { size: 17, max: 16 })
        ));
        let mut cursor = Cursor::new(vec![0u8, 0, 1, 0]);
        assert!(matches!(
            read_unit(&mut cursor, 16),
            Err(Error::FrameTooLarge { size: 256, .. })
        ));
    }

    #[test]
    fn test_frame_payload() {
        let frame = Frame::new(FrameItem::Chat(ChatProto {
            id: 4,
            recipient_id: 2,
            pinned_order: 1,
            ..Default::default()
        }));
        let payload = encode_frame(&frame).unwrap();
        assert_eq!(payload[0], tag::CHAT);
        assert_eq!(decode_frame(&payload).unwrap(), frame);
    }

    #[test]
    fn test_unknown_tag_is_unrecognized() {
        let mut payload = encode_frame(&Frame::new(FrameItem::StickerPack(
            StickerPackProto::default(),
        )))
        .unwrap();
        payload[0] = 200;
        assert_eq!(decode_frame(&payload).unwrap(), Frame::unrecognized());
    }

    #[test]
    fn test_garbled_body_is_a_deserialization_error() {
        let payload = vec![tag::CHAT, 1, 2];
        assert!(matches!(
            decode_frame(&payload),
            Err(Error::FrameDeserialization(_))
        ));
    }

    #[test]
    fn test_unrecognized_frame_cannot_be_encoded() {
        assert!(matches!(
            encode_frame(&Frame::unrecognized()),
            Err(Error::FrameSerialization(_))
        ));
    }
}
