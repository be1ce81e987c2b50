/*!
 * Legacy command codec.
 *
 * Legacy commands are opcode-led byte sequences with no common framing.
 * Each command knows the exact length of its reply, if it has one, and the
 * channel the reply arrives on.
 */
use bytes::Bytes;

use crate::transport::Hint;

use super::{DecodeError, EncodeError, Exchange, ReplyShape};

/// Legacy opcodes
pub mod opcode {
    /// `[0x02, micros: u32 LE]`, no reply
    pub const SET_INTEGRATION_TIME: u8 = 0x02;
    /// `[0x05, slot]`, reply `[0x05, slot, 15 ASCII bytes]`
    pub const QUERY_INFO: u8 = 0x05;
    /// `[0x09]`, samples arrive on the spectrum channel followed by a sync byte
    pub const REQUEST_SPECTRUM: u8 = 0x09;
    /// `[0x71, 0|1]`, no reply
    pub const TEC_ENABLE: u8 = 0x71;
    /// `[0x72]`, reply `[0x72, tenths of a degree: i16 LE]`
    pub const TEC_READ_TEMPERATURE: u8 = 0x72;
    /// `[0x73, tenths of a degree: i16 LE]`, no reply
    pub const TEC_SET_SETPOINT: u8 = 0x73;
}

/// Info slot holding the serial number
pub const INFO_SLOT_SERIAL: u8 = 0;

/// Length of an info slot value
pub const INFO_VALUE_LEN: usize = 15;

/// Byte terminating a spectrum transfer
pub const SPECTRUM_SYNC: u8 = 0x69;

/// A legacy protocol exchange
#[derive(Debug, Clone)]
pub struct LegacyExchange<T> {
    name: &'static str,
    hint: Hint,
    reply_hint: Hint,
    command: Bytes,
    reply: ReplyShape,
    decode: fn(&[u8]) -> Result<T, DecodeError>,
}

impl<T> LegacyExchange<T> {
    /// Exchange writing `command` on `hint` and decoding a reply of the given shape
    pub fn new(
        name: &'static str,
        hint: Hint,
        command: impl Into<Bytes>,
        reply: ReplyShape,
        decode: fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Self {
        Self {
            name,
            hint,
            reply_hint: hint,
            command: command.into(),
            reply,
            decode,
        }
    }

    /// Read the reply from another channel
    pub fn with_reply_hint(mut self, hint: Hint) -> Self {
        self.reply_hint = hint;
        self
    }
}

impl LegacyExchange<()> {
    /// Exchange for a command without reply
    pub fn command(name: &'static str, hint: Hint, command: impl Into<Bytes>) -> Self {
        Self::new(name, hint, command, ReplyShape::None, |_| Ok(()))
    }
}

impl<T> Exchange for LegacyExchange<T> {
    type Reply = T;

    fn name(&self) -> &'static str {
        self.name
    }

    fn hint(&self) -> Hint {
        self.hint
    }

    fn reply_hint(&self) -> Hint {
        self.reply_hint
    }

    fn serialize(&self) -> Result<Bytes, EncodeError> {
        Ok(self.command.clone())
    }

    fn reply_shape(&self) -> ReplyShape {
        self.reply
    }

    fn parse(&self, reply: &[u8]) -> Result<T, DecodeError> {
        if let ReplyShape::Fixed(len) = self.reply {
            if reply.len() != len {
                return Err(DecodeError::Truncated {
                    need: len,
                    have: reply.len(),
                });
            }
        }
        (self.decode)(reply)
    }
}

/// Check that a reply echoes the expected leading bytes
pub(crate) fn expect_echo(reply: &[u8], echo: &[u8]) -> Result<(), DecodeError> {
    if !reply.starts_with(echo) {
        let found = &reply[..reply.len().min(echo.len())];
        return Err(DecodeError::UnexpectedReply(format!(
            "expected echo {:02x?}, found {:02x?}",
            echo, found
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ascii_field;

    #[test]
    fn test_command_without_reply() {
        let exchange = LegacyExchange::command(
            "tec enable",
            Hint::Control,
            vec![opcode::TEC_ENABLE, 1],
        );
        assert_eq!(exchange.serialize().unwrap().as_ref(), &[0x71, 0x01]);
        assert_eq!(exchange.reply_shape(), ReplyShape::None);
        assert!(exchange.parse(&[]).is_ok());
    }

    #[test]
    fn test_fixed_reply_length_is_enforced() {
        let exchange = LegacyExchange::new(
            "tec temperature",
            Hint::Control,
            vec![opcode::TEC_READ_TEMPERATURE],
            ReplyShape::Fixed(3),
            |reply| Ok(i16::from_le_bytes([reply[1], reply[2]])),
        );
        assert_eq!(exchange.parse(&[0x72, 0xFB, 0x00]).unwrap(), 251);
        assert!(matches!(
            exchange.parse(&[0x72, 0xFB]),
            Err(DecodeError::Truncated { need: 3, have: 2 })
        ));
    }

    #[test]
    fn test_reply_hint_defaults_to_request_hint() {
        let exchange = LegacyExchange::command("noop", Hint::Control, vec![0x00]);
        assert_eq!(exchange.reply_hint(), Hint::Control);
        let exchange = exchange.with_reply_hint(Hint::Spectrum);
        assert_eq!(exchange.hint(), Hint::Control);
        assert_eq!(exchange.reply_hint(), Hint::Spectrum);
    }

    #[test]
    fn test_helpers() {
        assert!(expect_echo(&[0x05, 0x00, 0x41], &[0x05, 0x00]).is_ok());
        assert!(expect_echo(&[0x06], &[0x05, 0x00]).is_err());
        assert_eq!(ascii_field(b"LX0001\0\0\0").unwrap(), "LX0001");
        assert_eq!(ascii_field(b"FULLWIDTH").unwrap(), "FULLWIDTH");
        assert!(ascii_field(&[0xC3, 0xA9]).is_err());
    }
}
