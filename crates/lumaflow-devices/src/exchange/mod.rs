/*!
 * Protocol exchanges.
 *
 * An [`Exchange`] is one typed request/response unit bound to a transport
 * hint. [`execute`] writes the serialized request, collects the reply the
 * way its [`ReplyShape`] describes and hands the bytes to the exchange's
 * parser.
 */
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::transport::{self, Hint, Transport, TransportError};

pub mod binary;
pub mod frame;
pub mod legacy;

pub use binary::{BinaryExchange, BinaryMessage};
pub use legacy::LegacyExchange;

/// Largest single read issued while assembling a frame
const READ_CHUNK: usize = 512;

/// Error raised while building a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The payload does not fit in one frame
    #[error("Payload of {len} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Payload length
        len: usize,
        /// Largest payload a frame carries
        max: usize,
    },
}

/// Error raised while decoding a reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the format requires
    #[error("Truncated input: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required
        need: usize,
        /// Bytes supplied
        have: usize,
    },

    /// The frame does not start with the preamble
    #[error("Bad preamble {found:02x?}")]
    BadPreamble {
        /// The two leading bytes found
        found: [u8; 2],
    },

    /// The header announces a payload above the limit
    #[error("Declared payload of {declared} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Declared payload length
        declared: usize,
        /// Largest accepted payload
        max: usize,
    },

    /// The header length disagrees with the bytes supplied
    #[error("Frame declares {declared} bytes but {actual} were supplied")]
    LengthMismatch {
        /// Frame length implied by the header
        declared: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// The trailing checksum does not match
    #[error("Checksum mismatch: received {received:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        received: u32,
        /// Checksum computed over the frame
        computed: u32,
    },

    /// The reply is well formed but not the one expected
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The device answered with a non-zero status
    #[error("Device reported status {0:#06x}")]
    DeviceStatus(u16),
}

/// Error raised by [`execute`]
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// The request could not be built
    #[error("Exchange {exchange} failed to encode its request")]
    Encode {
        /// Exchange name
        exchange: &'static str,
        /// Underlying encode failure
        #[source]
        source: EncodeError,
    },

    /// Moving bytes failed
    #[error("Exchange {exchange} failed in transfer")]
    Transfer {
        /// Exchange name
        exchange: &'static str,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// The reply could not be decoded
    #[error("Exchange {exchange} failed to decode its reply")]
    Decode {
        /// Exchange name
        exchange: &'static str,
        /// Underlying decode failure
        #[source]
        source: DecodeError,
    },
}

impl ExchangeError {
    /// Whether the failure came from the reply rather than the transport
    pub fn is_decode(&self) -> bool {
        matches!(self, ExchangeError::Decode { .. })
    }
}

/// How the reply of an exchange is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// No reply is sent
    None,
    /// A reply of exactly this many bytes
    Fixed(usize),
    /// A length-framed binary frame
    Framed,
}

/// A typed request/response unit
pub trait Exchange {
    /// Decoded reply
    type Reply;

    /// Short name used in errors and logs
    fn name(&self) -> &'static str;

    /// Channel the request is written to
    fn hint(&self) -> Hint;

    /// Channel the reply is read from
    fn reply_hint(&self) -> Hint {
        self.hint()
    }

    /// Request bytes
    fn serialize(&self) -> Result<Bytes, EncodeError>;

    /// Shape of the reply
    fn reply_shape(&self) -> ReplyShape;

    /// Decode reply bytes; an exchange without reply receives an empty slice
    fn parse(&self, reply: &[u8]) -> Result<Self::Reply, DecodeError>;
}

/// Run one exchange over a transport
pub fn execute<E>(exchange: &E, transport: &mut dyn Transport) -> Result<E::Reply, ExchangeError>
where
    E: Exchange + ?Sized,
{
    let name = exchange.name();
    let transfer = |source| ExchangeError::Transfer {
        exchange: name,
        source,
    };

    let request = exchange
        .serialize()
        .map_err(|source| ExchangeError::Encode { exchange: name, source })?;
    debug!(exchange = name, len = request.len(), "Sending request");
    transport::write_all(transport, exchange.hint(), &request).map_err(transfer)?;

    let reply = match exchange.reply_shape() {
        ReplyShape::None => Vec::new(),
        ReplyShape::Fixed(len) => {
            let mut reply = vec![0u8; len];
            transport::read_exact(transport, exchange.reply_hint(), &mut reply).map_err(transfer)?;
            reply
        }
        ReplyShape::Framed => receive_frame(transport, exchange.reply_hint(), name)?,
    };
    debug!(exchange = name, len = reply.len(), "Received reply");

    exchange.parse(&reply).map_err(|source| ExchangeError::Decode {
        exchange: name,
        source,
    })
}

/// Read one complete binary frame
///
/// The header is read first; the rest of the frame is then read in chunks
/// until the declared length has arrived.
pub fn receive_frame(
    transport: &mut dyn Transport,
    hint: Hint,
    exchange: &'static str,
) -> Result<Vec<u8>, ExchangeError> {
    let mut frame = vec![0u8; frame::HEADER_LEN];
    fill(transport, hint, &mut frame, 0).map_err(|source| ExchangeError::Transfer { exchange, source })?;

    let total = frame::expected_len(&frame).map_err(|source| ExchangeError::Decode { exchange, source })?;
    frame.resize(total, 0);
    fill(transport, hint, &mut frame, frame::HEADER_LEN)
        .map_err(|source| ExchangeError::Transfer { exchange, source })?;
    Ok(frame)
}

fn fill(transport: &mut dyn Transport, hint: Hint, buf: &mut [u8], mut filled: usize) -> transport::Result<()> {
    while filled < buf.len() {
        let end = buf.len().min(filled + READ_CHUNK);
        let n = transport.read(hint, &mut buf[filled..end])?;
        if n == 0 {
            return Err(TransportError::ShortTransfer {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Take exactly `N` bytes of reply data
pub(crate) fn exact<const N: usize>(data: &[u8]) -> Result<[u8; N], DecodeError> {
    if data.len() < N {
        return Err(DecodeError::Truncated {
            need: N,
            have: data.len(),
        });
    }
    if data.len() > N {
        return Err(DecodeError::UnexpectedReply(format!(
            "{} trailing bytes",
            data.len() - N
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(data);
    Ok(out)
}

/// Decode a packed array of little-endian `u16`
pub(crate) fn u16_array(data: &[u8]) -> Result<Vec<u16>, DecodeError> {
    if data.len() % 2 != 0 {
        return Err(DecodeError::UnexpectedReply(format!(
            "odd sample buffer length {}",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode a NUL-padded ASCII field
pub(crate) fn ascii_field(field: &[u8]) -> Result<String, DecodeError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let text = &field[..end];
    if !text.is_ascii() {
        return Err(DecodeError::UnexpectedReply(
            "text field is not ASCII".to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(text).into_owned())
}
