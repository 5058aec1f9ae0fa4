//! Length-prefixed, CRC-terminated frame codec.
//!
//! ```text
//!  offset  size  field     encoding
//!    0      4   length    big-endian u32, value = len(body)+2, 3..=1024
//!    4      L   body      opaque bytes, L = length - 2
//!   4+L     2   crc       big-endian u16, CRC-16/CCITT-FALSE over bytes [0, 4+L)
//! ```

use std::io::{self, Read};

use thiserror::Error;

use crate::crc16::crc16;

pub const HEADER_SIZE: usize = 4;
pub const MIN_BODY_LEN: usize = 1;
pub const MAX_BODY_LEN: usize = 1022;
pub const MAX_FRAME_LEN: usize = HEADER_SIZE + MAX_BODY_LEN + 2;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload must not be empty")]
    EmptyPayload,
    #[error("payload of {0} bytes exceeds the {MAX_BODY_LEN} byte limit")]
    OversizePayload(usize),
    #[error("stream closed cleanly before a frame started")]
    EndOfStream,
    #[error("stream closed mid-frame")]
    Truncated,
    #[error("length field {0} outside the valid 3..=1024 range")]
    InvalidLength(u32),
    #[error("crc mismatch: received {got:#06x}, expected {expected:#06x}")]
    CrcMismatch { expected: u16, got: u16 },
    #[error("i/o error while decoding a frame: {0}")]
    Io(#[from] io::Error),
}

/// Encodes `body` as a complete wire frame. Fails if `body` is empty or
/// longer than [`MAX_BODY_LEN`].
pub fn encode(body: &[u8]) -> Result<Vec<u8>, FrameError> {
    if body.is_empty() {
        return Err(FrameError::EmptyPayload);
    }
    if body.len() > MAX_BODY_LEN {
        return Err(FrameError::OversizePayload(body.len()));
    }
    let length = u32::try_from(body.len() + 2).expect("body.len() bounded above by MAX_BODY_LEN");
    let header = length.to_be_bytes();
    let crc = crc16(body, Some(crc16(&header, None)));

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + 2);
    out.extend_from_slice(&header);
    out.extend_from_slice(body);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Reads and decodes one frame from `reader`, returning its body.
///
/// A clean close before any bytes arrive is [`FrameError::EndOfStream`]; a
/// close partway through a frame is [`FrameError::Truncated`].
pub fn decode<R: Read>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    let got = fill(reader, &mut header)?;
    if got == 0 {
        return Err(FrameError::EndOfStream);
    }
    if got < HEADER_SIZE {
        return Err(FrameError::Truncated);
    }

    let length = u32::from_be_bytes(header);
    if !(3..=1024).contains(&length) {
        return Err(FrameError::InvalidLength(length));
    }
    let length = length as usize;

    let mut tail = vec![0u8; length];
    let got = fill(reader, &mut tail)?;
    if got < length {
        return Err(FrameError::Truncated);
    }

    let body_len = length - 2;
    let (body, crc_bytes) = tail.split_at(body_len);
    let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
    let got_crc = crc16(body, Some(crc16(&header, None)));
    if got_crc != expected {
        return Err(FrameError::CrcMismatch {
            expected,
            got: got_crc,
        });
    }

    Ok(body.to_vec())
}

/// Reads into `buf` until it is full or the stream yields `Ok(0)`, returning
/// the number of bytes actually filled.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut have = 0;
    while have < buf.len() {
        match reader.read(&mut buf[have..]) {
            Ok(0) => break,
            Ok(n) => have += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(have)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn round_trip() {
        let body = b"hello delay proxy";
        let wire = encode(body).unwrap();
        let mut cursor = Cursor::new(wire);
        let decoded = decode(&mut cursor).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn minimum_frame_is_one_byte_body() {
        let wire = encode(&[0x00]).unwrap();
        assert_eq!(wire.len(), 7);
    }

    #[test]
    fn maximum_frame_is_1022_byte_body() {
        let body = vec![0xAB; MAX_BODY_LEN];
        let wire = encode(&body).unwrap();
        assert_eq!(wire.len(), MAX_FRAME_LEN);
    }

    #[test]
    fn oversize_body_rejected() {
        let body = vec![0u8; MAX_BODY_LEN + 1];
        assert!(matches!(encode(&body), Err(FrameError::OversizePayload(_))));
    }

    #[test]
    fn empty_body_rejected() {
        assert!(matches!(encode(&[]), Err(FrameError::EmptyPayload)));
    }

    #[test]
    fn clean_close_before_any_bytes_is_end_of_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(matches!(decode(&mut cursor), Err(FrameError::EndOfStream)));
    }

    #[test]
    fn close_mid_header_is_truncated() {
        let mut cursor = Cursor::new(vec![0u8; 2]);
        assert!(matches!(decode(&mut cursor), Err(FrameError::Truncated)));
    }

    #[test]
    fn close_mid_body_is_truncated() {
        let mut wire = encode(b"0123456789").unwrap();
        wire.truncate(wire.len() - 3);
        let mut cursor = Cursor::new(wire);
        assert!(matches!(decode(&mut cursor), Err(FrameError::Truncated)));
    }

    #[test]
    fn length_too_small_is_invalid() {
        let mut cursor = Cursor::new(2u32.to_be_bytes().to_vec());
        assert!(matches!(
            decode(&mut cursor),
            Err(FrameError::InvalidLength(2))
        ));
    }

    #[test]
    fn length_too_large_is_invalid() {
        let mut cursor = Cursor::new(1025u32.to_be_bytes().to_vec());
        assert!(matches!(
            decode(&mut cursor),
            Err(FrameError::InvalidLength(1025))
        ));
    }

    #[test]
    fn corrupted_body_fails_crc() {
        let mut wire = encode(b"intact payload").unwrap();
        let body_start = HEADER_SIZE;
        wire[body_start] ^= 0xFF;
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            decode(&mut cursor),
            Err(FrameError::CrcMismatch { .. })
        ));
    }
}
