/*!
 * Binary protocol messages.
 *
 * Each frame payload carries one message:
 *
 * ```text
 * [message type: u32 LE][status: u16 LE][data...]
 * ```
 *
 * Requests carry status zero. Every request is answered by a message of the
 * same type; a non-zero status reports that the device refused it.
 */
use bytes::{BufMut, Bytes, BytesMut};

use crate::transport::Hint;

use super::{frame, DecodeError, EncodeError, Exchange, ReplyShape};

/// Message type codes
pub mod message_type {
    /// Read the serial number (ASCII data)
    pub const GET_SERIAL_NUMBER: u32 = 0x0000_0100;
    /// Set the integration time (u32 microseconds)
    pub const SET_INTEGRATION_TIME: u32 = 0x0011_0010;
    /// Acquire a spectrum (packed u16 samples)
    pub const GET_SPECTRUM: u32 = 0x0010_1100;
    /// Enable or disable the cooler (u8)
    pub const SET_TEC_ENABLE: u32 = 0x0042_0010;
    /// Set the cooler set-point (f32 degrees Celsius)
    pub const SET_TEC_SETPOINT: u32 = 0x0042_0030;
    /// Read the cooler temperature (f32 degrees Celsius)
    pub const GET_TEC_TEMPERATURE: u32 = 0x0042_0004;
}

/// Message header length inside the frame payload
pub const MESSAGE_HEADER_LEN: usize = 6;

/// One binary protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMessage {
    message_type: u32,
    status: u16,
    data: Bytes,
}

impl BinaryMessage {
    /// A request message
    pub fn request(message_type: u32, data: impl Into<Bytes>) -> Self {
        Self::reply(message_type, 0, data)
    }

    /// A reply message
    pub fn reply(message_type: u32, status: u16, data: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            status,
            data: data.into(),
        }
    }

    /// Message type code
    pub fn message_type(&self) -> u32 {
        self.message_type
    }

    /// Status, zero on success
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Message data
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Frame payload for this message
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN + self.data.len());
        buf.put_u32_le(self.message_type);
        buf.put_u16_le(self.status);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Parse a frame payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < MESSAGE_HEADER_LEN {
            return Err(DecodeError::Truncated {
                need: MESSAGE_HEADER_LEN,
                have: payload.len(),
            });
        }
        Ok(Self {
            message_type: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            status: u16::from_le_bytes([payload[4], payload[5]]),
            data: Bytes::copy_from_slice(&payload[MESSAGE_HEADER_LEN..]),
        })
    }

    /// Complete frame for this message
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        frame::encode(&self.to_payload())
    }

    /// Parse a complete frame
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_payload(frame::decode(bytes)?)
    }
}

/// A binary protocol exchange
#[derive(Debug, Clone)]
pub struct BinaryExchange<T> {
    name: &'static str,
    request: BinaryMessage,
    decode: fn(&[u8]) -> Result<T, DecodeError>,
}

impl<T> BinaryExchange<T> {
    /// Exchange sending `data` and decoding the reply data with `decode`
    pub fn new(
        name: &'static str,
        message_type: u32,
        data: impl Into<Bytes>,
        decode: fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Self {
        Self {
            name,
            request: BinaryMessage::request(message_type, data),
            decode,
        }
    }

    /// The request message
    pub fn request(&self) -> &BinaryMessage {
        &self.request
    }
}

impl BinaryExchange<()> {
    /// Exchange for a set command acknowledged with empty data
    pub fn set(name: &'static str, message_type: u32, data: impl Into<Bytes>) -> Self {
        Self::new(name, message_type, data, |_| Ok(()))
    }
}

impl<T> Exchange for BinaryExchange<T> {
    type Reply = T;

    fn name(&self) -> &'static str {
        self.name
    }

    fn hint(&self) -> Hint {
        Hint::Binary
    }

    fn serialize(&self) -> Result<Bytes, EncodeError> {
        self.request.encode()
    }

    fn reply_shape(&self) -> ReplyShape {
        ReplyShape::Framed
    }

    fn parse(&self, reply: &[u8]) -> Result<T, DecodeError> {
        let message = BinaryMessage::decode(reply)?;
        if message.message_type != self.request.message_type {
            return Err(DecodeError::UnexpectedReply(format!(
                "expected message type {:#010x}, got {:#010x}",
                self.request.message_type, message.message_type
            )));
        }
        if message.status != 0 {
            return Err(DecodeError::DeviceStatus(message.status));
        }
        (self.decode)(&message.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial_exchange() -> BinaryExchange<String> {
        BinaryExchange::new(
            "serial number",
            message_type::GET_SERIAL_NUMBER,
            Bytes::new(),
            |data| Ok(String::from_utf8_lossy(data).into_owned()),
        )
    }

    #[test]
    fn test_request_layout() {
        let exchange = BinaryExchange::set(
            "integration time",
            message_type::SET_INTEGRATION_TIME,
            10_000u32.to_le_bytes().to_vec(),
        );
        let bytes = exchange.serialize().unwrap();
        let payload = frame::decode(&bytes).unwrap();
        assert_eq!(
            payload,
            &[0x10, 0x00, 0x11, 0x00, 0x00, 0x00, 0x10, 0x27, 0x00, 0x00]
        );
        assert_eq!(exchange.hint(), Hint::Binary);
        assert_eq!(exchange.reply_shape(), ReplyShape::Framed);
    }

    #[test]
    fn test_parse_matching_reply() {
        let reply = BinaryMessage::reply(message_type::GET_SERIAL_NUMBER, 0, &b"NB0042"[..]).encode().unwrap();
        assert_eq!(serial_exchange().parse(&reply).unwrap(), "NB0042");
    }

    #[test]
    fn test_parse_rejects_other_message_type() {
        let reply = BinaryMessage::reply(message_type::GET_SPECTRUM, 0, &b"x"[..]).encode().unwrap();
        assert!(matches!(
            serial_exchange().parse(&reply),
            Err(DecodeError::UnexpectedReply(_))
        ));
    }

    #[test]
    fn test_parse_reports_device_status() {
        let reply = BinaryMessage::reply(message_type::GET_SERIAL_NUMBER, 0x0101, Bytes::new()).encode().unwrap();
        assert_eq!(
            serial_exchange().parse(&reply),
            Err(DecodeError::DeviceStatus(0x0101))
        );
    }

    #[test]
    fn test_message_shorter_than_header() {
        let frame = frame::encode(&[0x00, 0x01, 0x00]).unwrap();
        assert!(matches!(
            BinaryMessage::decode(&frame),
            Err(DecodeError::Truncated { need: 6, have: 3 })
        ));
    }
}
