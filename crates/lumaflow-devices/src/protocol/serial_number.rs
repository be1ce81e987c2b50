/*!
 * Serial number protocols.
 */
use bytes::Bytes;

use crate::exchange::binary::message_type;
use crate::exchange::legacy::{self, opcode, INFO_SLOT_SERIAL, INFO_VALUE_LEN};
use crate::exchange::{ascii_field, execute, BinaryExchange, LegacyExchange, ReplyShape};
use crate::transport::{Hint, Transport};

use super::{ProtocolImpl, Result, WireFormat};

/// Reads the instrument serial number
pub trait SerialNumberProtocol: ProtocolImpl {
    /// Read the serial number
    fn read_serial_number(&self, transport: &mut dyn Transport) -> Result<String>;
}

/// Serial number from legacy info slot zero
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacySerialNumber;

impl ProtocolImpl for LegacySerialNumber {
    fn name(&self) -> &'static str {
        "legacy serial number"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Legacy
    }
}

impl SerialNumberProtocol for LegacySerialNumber {
    fn read_serial_number(&self, transport: &mut dyn Transport) -> Result<String> {
        let exchange = LegacyExchange::new(
            "serial number",
            Hint::Control,
            vec![opcode::QUERY_INFO, INFO_SLOT_SERIAL],
            ReplyShape::Fixed(2 + INFO_VALUE_LEN),
            |reply| {
                legacy::expect_echo(reply, &[opcode::QUERY_INFO, INFO_SLOT_SERIAL])?;
                ascii_field(&reply[2..])
            },
        );
        Ok(execute(&exchange, transport)?)
    }
}

/// Serial number from the binary protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerialNumber;

impl ProtocolImpl for BinarySerialNumber {
    fn name(&self) -> &'static str {
        "binary serial number"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Binary
    }
}

impl SerialNumberProtocol for BinarySerialNumber {
    fn read_serial_number(&self, transport: &mut dyn Transport) -> Result<String> {
        let exchange = BinaryExchange::new(
            "serial number",
            message_type::GET_SERIAL_NUMBER,
            Bytes::new(),
            ascii_field,
        );
        Ok(execute(&exchange, transport)?)
    }
}
