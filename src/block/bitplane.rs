
//! A simple, uncompressed bit-plane coder.
//! Produces one sign pass, followed by one pass per magnitude bit-plane,
//! most significant plane first. Every pass stores one bit per coefficient.
//! Dropping trailing passes discards the least significant bit-planes.

use bit_field::{BitArray, BitField};

use crate::block::{BlockCoder, CodeBlock, EncodedBlock};
use crate::error::{Error, Result, UnitResult};
use crate::math::RoundingMode;


/// Largest number of magnitude bit-planes that fit a signed 32-bit coefficient.
pub const MAX_BIT_PLANES: u8 = 31;

/// The reference entropy coder. Stateless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitPlaneCoder;


impl BlockCoder for BitPlaneCoder {
    fn encode(&self, block: &CodeBlock) -> Result<EncodedBlock> {
        let area = block.size.area();
        if block.coefficients.len() != area {
            return Err(Error::invalid("code-block coefficient count does not match its size"));
        }

        let bit_planes = block.bit_planes();
        let mut encoded = EncodedBlock { bit_planes, .. EncodedBlock::default() };
        if bit_planes == 0 || area == 0 { return Ok(encoded); }

        if bit_planes > MAX_BIT_PLANES {
            return Err(Error::invalid("code-block coefficient magnitude exceeds 31 bits"));
        }

        let pass_length = RoundingMode::Up.divide(area, 8);
        let mut pass = vec![0_u8; pass_length];

        for (index, &coefficient) in block.coefficients.iter().enumerate() {
            pass.set_bit(index, coefficient < 0);
        }

        encoded.bytes.extend_from_slice(&pass);
        encoded.pass_lengths.push(pass_length);

        for plane in (0 .. usize::from(bit_planes)).rev() {
            for (index, &coefficient) in block.coefficients.iter().enumerate() {
                pass.set_bit(index, coefficient.unsigned_abs().get_bit(plane));
            }

            encoded.bytes.extend_from_slice(&pass);
            encoded.pass_lengths.push(pass_length);
        }

        Ok(encoded)
    }

    fn decode(&self, encoded: &EncodedBlock, block: &mut CodeBlock) -> UnitResult {
        let area = block.size.area();
        let pass_length = RoundingMode::Up.divide(area, 8);
        let fault = |message: &'static str| Error::decode(block.id.clone(), message);

        if encoded.bit_planes > MAX_BIT_PLANES {
            return Err(fault("more than 31 bit-planes"));
        }

        if encoded.pass_count() > 1 + usize::from(encoded.bit_planes) {
            return Err(fault("more coding passes than bit-planes"));
        }

        if encoded.pass_lengths.iter().any(|&length| length != pass_length) {
            return Err(fault("pass length table does not match the block size"));
        }

        if encoded.bytes.len() != pass_length * encoded.pass_count() {
            return Err(fault("coded data does not match the pass length table"));
        }

        block.coefficients.clear();
        block.coefficients.resize(area, 0);
        if area == 0 { return Ok(()); }

        let mut passes = encoded.bytes.chunks_exact(pass_length);

        if let Some(signs) = passes.next() {
            let planes = (0 .. usize::from(encoded.bit_planes)).rev();

            for (pass, plane) in passes.zip(planes) {
                for (index, coefficient) in block.coefficients.iter_mut().enumerate() {
                    if pass.get_bit(index) { *coefficient |= 1 << plane; }
                }
            }

            for (index, coefficient) in block.coefficients.iter_mut().enumerate() {
                if signs.get_bit(index) { *coefficient = -*coefficient; }
            }
        }

        Ok(())
    }
}
