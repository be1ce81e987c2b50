/*!
 * Spectrum acquisition protocols.
 *
 * A legacy acquisition is requested on the control channel and the samples
 * arrive on the spectrum channel, terminated by a sync byte.
 */
use bytes::Bytes;

use crate::exchange::binary::message_type;
use crate::exchange::legacy::{opcode, SPECTRUM_SYNC};
use crate::exchange::{execute, u16_array, BinaryExchange, DecodeError, ExchangeError, LegacyExchange, ReplyShape};
use crate::transport::{Hint, Transport};

use super::{ProtocolImpl, Result, WireFormat};

/// Acquires spectra
pub trait SpectrumProtocol: ProtocolImpl {
    /// Number of detector pixels
    fn pixel_count(&self) -> usize;

    /// Acquire one spectrum
    fn read_spectrum(&self, transport: &mut dyn Transport) -> Result<Vec<u16>>;
}

/// Legacy acquisition over opcode 0x09
#[derive(Debug, Clone, Copy)]
pub struct LegacySpectrum {
    pixels: usize,
}

impl LegacySpectrum {
    /// Protocol for a detector with `pixels` pixels
    pub fn new(pixels: usize) -> Self {
        Self { pixels }
    }
}

impl ProtocolImpl for LegacySpectrum {
    fn name(&self) -> &'static str {
        "legacy spectrum"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Legacy
    }

    fn required_hints(&self) -> &'static [Hint] {
        &[Hint::Control, Hint::Spectrum]
    }
}

impl SpectrumProtocol for LegacySpectrum {
    fn pixel_count(&self) -> usize {
        self.pixels
    }

    fn read_spectrum(&self, transport: &mut dyn Transport) -> Result<Vec<u16>> {
        let exchange = LegacyExchange::new(
            "spectrum",
            Hint::Control,
            vec![opcode::REQUEST_SPECTRUM],
            ReplyShape::Fixed(self.pixels * 2 + 1),
            |reply| match reply.split_last() {
                Some((&SPECTRUM_SYNC, samples)) => u16_array(samples),
                Some((&other, _)) => Err(DecodeError::UnexpectedReply(format!(
                    "spectrum sync byte {:#04x}",
                    other
                ))),
                None => Err(DecodeError::Truncated { need: 1, have: 0 }),
            },
        )
        .with_reply_hint(Hint::Spectrum);
        Ok(execute(&exchange, transport)?)
    }
}

/// Binary protocol acquisition
#[derive(Debug, Clone, Copy)]
pub struct BinarySpectrum {
    pixels: usize,
}

impl BinarySpectrum {
    /// Protocol for a detector with `pixels` pixels
    pub fn new(pixels: usize) -> Self {
        Self { pixels }
    }
}

impl ProtocolImpl for BinarySpectrum {
    fn name(&self) -> &'static str {
        "binary spectrum"
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat::Binary
    }
}

impl SpectrumProtocol for BinarySpectrum {
    fn pixel_count(&self) -> usize {
        self.pixels
    }

    fn read_spectrum(&self, transport: &mut dyn Transport) -> Result<Vec<u16>> {
        let exchange = BinaryExchange::new("spectrum", message_type::GET_SPECTRUM, Bytes::new(), u16_array);
        let samples = execute(&exchange, transport)?;
        if samples.len() != self.pixels {
            return Err(ExchangeError::Decode {
                exchange: "spectrum",
                source: DecodeError::UnexpectedReply(format!(
                    "{} samples for {} pixels",
                    samples.len(),
                    self.pixels
                )),
            }
            .into());
        }
        Ok(samples)
    }
}
