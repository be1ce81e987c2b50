/*!
 * Length-framed binary codec.
 *
 * ```text
 * [0xC1 0xC0][payload length: u32 LE][payload][CRC-32/ISO-HDLC: u32 LE]
 * ```
 *
 * The checksum covers the preamble, the length field and the payload.
 */
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};

use super::{DecodeError, EncodeError};

/// Frame preamble
pub const PREAMBLE: [u8; 2] = [0xC1, 0xC0];

/// Preamble plus length field
pub const HEADER_LEN: usize = 6;

/// Trailing checksum
pub const CHECKSUM_LEN: usize = 4;

/// Largest payload a frame carries
pub const MAX_PAYLOAD: usize = 64 * 1024;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum of the covered region of a frame
pub fn checksum(covered: &[u8]) -> u32 {
    CRC32.checksum(covered)
}

/// Wrap a payload in a frame
///
/// Payloads above [`MAX_PAYLOAD`] are refused, so every encoded frame
/// decodes.
pub fn encode(payload: &[u8]) -> Result<Bytes, EncodeError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    buf.put_slice(&PREAMBLE);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    let crc = checksum(&buf);
    buf.put_u32_le(crc);
    Ok(buf.freeze())
}

/// Total frame length announced by a header
///
/// Only the first [`HEADER_LEN`] bytes are inspected.
pub fn expected_len(header: &[u8]) -> Result<usize, DecodeError> {
    if header.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            need: HEADER_LEN,
            have: header.len(),
        });
    }
    if header[..2] != PREAMBLE {
        return Err(DecodeError::BadPreamble {
            found: [header[0], header[1]],
        });
    }
    let declared = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if declared > MAX_PAYLOAD {
        return Err(DecodeError::PayloadTooLarge {
            declared,
            max: MAX_PAYLOAD,
        });
    }
    Ok(HEADER_LEN + declared + CHECKSUM_LEN)
}

/// Validate a complete frame and borrow its payload
///
/// The checksum is verified before the header is interpreted, so corruption
/// anywhere in the covered region reports [`DecodeError::ChecksumMismatch`].
pub fn decode(frame: &[u8]) -> Result<&[u8], DecodeError> {
    let min = HEADER_LEN + CHECKSUM_LEN;
    if frame.len() < min {
        return Err(DecodeError::Truncated {
            need: min,
            have: frame.len(),
        });
    }

    let (covered, trailer) = frame.split_at(frame.len() - CHECKSUM_LEN);
    let received = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = checksum(covered);
    if received != computed {
        return Err(DecodeError::ChecksumMismatch { received, computed });
    }

    let declared = expected_len(covered)?;
    if declared != frame.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }
    Ok(&covered[HEADER_LEN..])
}
