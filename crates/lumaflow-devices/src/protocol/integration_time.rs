/*!
 * Integration time protocols.
 */
use bytes::{BufMut, BytesMut};

use crate::exchange::binary::message_type;
use crate::exchange::legacy::opcode;
use crate::exchange::{execute, BinaryExchange, LegacyExchange};
use crate::transport::{Hint, Transport};

use super::{ProtocolImpl, Result, WireFormat};

/// Sets the detector integration time
pub trait IntegrationTimeProtocol: ProtocolImpl {
    /// Set the integration time in microseconds
    fn set_integration_time_micros(&self, transport: &mut dyn Transport, micros: u32) -> Result<()>;
}

/// Integration time over legacy opcode 0x02
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyIntegrationTime;

impl ProtocolImpl for LegacyIntegrationTime {
    fn name(&self) -> &'static str {
        "legacy integration time"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Legacy
    }
}

impl IntegrationTimeProtocol for LegacyIntegrationTime {
    fn set_integration_time_micros(&self, transport: &mut dyn Transport, micros: u32) -> Result<()> {
        let mut command = BytesMut::with_capacity(5);
        command.put_u8(opcode::SET_INTEGRATION_TIME);
        command.put_u32_le(micros);
        let exchange = LegacyExchange::command("integration time", Hint::Control, command.freeze());
        Ok(execute(&exchange, transport)?)
    }
}

/// Integration time over the binary protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryIntegrationTime;

impl ProtocolImpl for BinaryIntegrationTime {
    fn name(&self) -> &'static str {
        "binary integration time"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Binary
    }
}

impl IntegrationTimeProtocol for BinaryIntegrationTime {
    fn set_integration_time_micros(&self, transport: &mut dyn Transport, micros: u32) -> Result<()> {
        let exchange = BinaryExchange::set(
            "integration time",
            message_type::SET_INTEGRATION_TIME,
            micros.to_le_bytes().to_vec(),
        );
        Ok(execute(&exchange, transport)?)
    }
}
