/*!
 * Thermoelectric cooler protocols.
 *
 * The legacy protocol carries temperatures as signed tenths of a degree;
 * the binary protocol carries IEEE-754 `f32` degrees.
 */
use bytes::{BufMut, Bytes, BytesMut};

use crate::exchange::binary::message_type;
use crate::exchange::legacy::{self, opcode};
use crate::exchange::{exact, execute, BinaryExchange, LegacyExchange, ReplyShape};
use crate::transport::{Hint, Transport};

use super::{ProtocolError, ProtocolImpl, Result, WireFormat};

/// Controls a thermoelectric cooler
pub trait ThermoElectricProtocol: ProtocolImpl {
    /// Read the detector temperature in degrees Celsius
    fn read_temperature_celsius(&self, transport: &mut dyn Transport) -> Result<f64>;

    /// Set the cooler set-point in degrees Celsius
    fn set_setpoint_celsius(&self, transport: &mut dyn Transport, celsius: f64) -> Result<()>;

    /// Enable or disable the cooler
    fn set_enable(&self, transport: &mut dyn Transport, enable: bool) -> Result<()>;
}

/// Cooler control over legacy opcodes 0x71-0x73
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyThermoElectric;

impl LegacyThermoElectric {
    fn tenths(celsius: f64) -> Result<i16> {
        let tenths = (celsius * 10.0).round();
        if !tenths.is_finite() || tenths < f64::from(i16::MIN) || tenths > f64::from(i16::MAX) {
            return Err(ProtocolError::InvalidArgument(format!(
                "set-point {} C is out of range",
                celsius
            )));
        }
        Ok(tenths as i16)
    }
}

impl ProtocolImpl for LegacyThermoElectric {
    fn name(&self) -> &'static str {
        "legacy thermoelectric"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Legacy
    }
}

impl ThermoElectricProtocol for LegacyThermoElectric {
    fn read_temperature_celsius(&self, transport: &mut dyn Transport) -> Result<f64> {
        let exchange = LegacyExchange::new(
            "tec temperature",
            Hint::Control,
            vec![opcode::TEC_READ_TEMPERATURE],
            ReplyShape::Fixed(3),
            |reply| {
                legacy::expect_echo(reply, &[opcode::TEC_READ_TEMPERATURE])?;
                Ok(i16::from_le_bytes(exact::<2>(&reply[1..])?))
            },
        );
        let tenths = execute(&exchange, transport)?;
        Ok(f64::from(tenths) / 10.0)
    }

    fn set_setpoint_celsius(&self, transport: &mut dyn Transport, celsius: f64) -> Result<()> {
        let mut command = BytesMut::with_capacity(3);
        command.put_u8(opcode::TEC_SET_SETPOINT);
        command.put_i16_le(Self::tenths(celsius)?);
        let exchange = LegacyExchange::command("tec setpoint", Hint::Control, command.freeze());
        Ok(execute(&exchange, transport)?)
    }

    fn set_enable(&self, transport: &mut dyn Transport, enable: bool) -> Result<()> {
        let exchange = LegacyExchange::command(
            "tec enable",
            Hint::Control,
            vec![opcode::TEC_ENABLE, u8::from(enable)],
        );
        Ok(execute(&exchange, transport)?)
    }
}

/// Cooler control over the binary protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryThermoElectric;

impl ProtocolImpl for BinaryThermoElectric {
    fn name(&self) -> &'static str {
        "binary thermoelectric"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Binary
    }
}

impl ThermoElectricProtocol for BinaryThermoElectric {
    fn read_temperature_celsius(&self, transport: &mut dyn Transport) -> Result<f64> {
        let exchange = BinaryExchange::new(
            "tec temperature",
            message_type::GET_TEC_TEMPERATURE,
            Bytes::new(),
            |data| Ok(f32::from_le_bytes(exact::<4>(data)?)),
        );
        Ok(f64::from(execute(&exchange, transport)?))
    }

    fn set_setpoint_celsius(&self, transport: &mut dyn Transport, celsius: f64) -> Result<()> {
        if !celsius.is_finite() {
            return Err(ProtocolError::InvalidArgument(format!(
                "set-point {} C is not finite",
                celsius
            )));
        }
        let exchange = BinaryExchange::set(
            "tec setpoint",
            message_type::SET_TEC_SETPOINT,
            (celsius as f32).to_le_bytes().to_vec(),
        );
        Ok(execute(&exchange, transport)?)
    }

    fn set_enable(&self, transport: &mut dyn Transport, enable: bool) -> Result<()> {
        let exchange = BinaryExchange::set("tec enable", message_type::SET_TEC_ENABLE, vec![u8::from(enable)]);
        Ok(execute(&exchange, transport)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{DecodeError, ExchangeError};
    use crate::sim::testing::{binary_stream, legacy_usb};
    use crate::sim::InstrumentProfile;

    #[test]
    fn test_legacy_setpoint_in_tenths() -> Result<()> {
        let (instrument, mut transport) =
            legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy).with_tec());
        LegacyThermoElectric.set_setpoint_celsius(&mut transport, -10.2)?;
        LegacyThermoElectric.set_enable(&mut transport, true)?;
        assert_eq!(
            instrument.writes(),
            vec![vec![0x73, 0x9A, 0xFF], vec![0x71, 0x01]]
        );
        assert!(instrument.tec_enabled());
        assert_eq!(LegacyThermoElectric.read_temperature_celsius(&mut transport)?, -10.2);
        Ok(())
    }

    #[test]
    fn test_legacy_setpoint_out_of_range() {
        let (instrument, mut transport) =
            legacy_usb(InstrumentProfile::new("LX0001", WireFormat::Legacy).with_tec());
        let err = LegacyThermoElectric
            .set_setpoint_celsius(&mut transport, 5000.0)
            .expect_err("out of range");
        assert!(matches!(err, ProtocolError::InvalidArgument(_)));
        assert!(instrument.writes().is_empty());
    }

    #[test]
    fn test_binary_round_trip_with_device() -> Result<()> {
        let (instrument, mut transport) =
            binary_stream(InstrumentProfile::new("NB0001", WireFormat::Binary).with_tec());
        BinaryThermoElectric.set_setpoint_celsius(&mut transport, -5.5)?;
        BinaryThermoElectric.set_enable(&mut transport, true)?;
        assert_eq!(instrument.setpoint_celsius(), -5.5);
        assert_eq!(BinaryThermoElectric.read_temperature_celsius(&mut transport)?, -5.5);
        Ok(())
    }

    #[test]
    fn test_binary_without_cooler_reports_device_status() {
        let (_instrument, mut transport) = binary_stream(InstrumentProfile::new("NB0001", WireFormat::Binary));
        let err = BinaryThermoElectric
            .read_temperature_celsius(&mut transport)
            .expect_err("no cooler");
        assert!(err.is_protocol_level());
        assert!(matches!(
            err,
            ProtocolError::Exchange(ExchangeError::Decode {
                source: DecodeError::DeviceStatus(_),
                ..
            })
        ));
    }
}
