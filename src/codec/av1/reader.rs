// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::bitstream_utils::BitReader;
use crate::bitstream_utils::ReadBitsError;
use crate::codec::av1::helpers;

/// Reads the AV1 descriptors of section 4.10 on top of a [`BitReader`].
#[derive(Clone)]
pub struct Reader<'a>(pub BitReader<'a>);

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self(BitReader::new(data))
    }

    pub fn read_bit(&mut self) -> Result<bool, ReadBitsError> {
        self.0.read_bit()
    }

    /// Implements f(n).
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> Result<U, ReadBitsError> {
        self.0.read_bits(num_bits)
    }

    /// Implements leb128(): Unsigned integer represented by a variable number
    /// of little-endian bytes. See 4.10.5
    pub fn read_leb128(&mut self) -> Result<u32, ReadBitsError> {
        let mut value = 0u64;

        for i in 0..8 {
            let byte = u64::from(self.0.read_bits_aligned::<u32>(8)?);
            value |= (byte & 0x7f) << (i * 7);

            if byte & 0x80 == 0 {
                break;
            }
        }

        u32::try_from(value).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Implements su(n): Signed integer converted from an n bits unsigned
    /// integer in the bitstream. (The unsigned integer corresponds to the
    /// bottom n bits of the signed integer.). See 4.10.6
    pub fn read_su(&mut self, num_bits: usize) -> Result<i32, ReadBitsError> {
        let mut value: i32 = self.0.read_bits(num_bits)?;
        let sign_mask = 1 << (num_bits - 1);

        if (value & sign_mask) != 0 {
            value -= 2 * sign_mask;
        }

        Ok(value)
    }

    /// Implements ns(n): Unsigned encoded integer with maximum number of values
    /// n (i.e. output in range 0..n-1). See 4.10.7
    pub fn read_ns(&mut self, n: u32) -> Result<u32, ReadBitsError> {
        let w = helpers::floor_log2(n) + 1;
        let m = (1 << w) - n;
        let v: u32 = self.0.read_bits(w as usize - 1)?;

        if v < m {
            return Ok(v);
        }

        let extra_bit = self.0.read_bit()?;
        Ok((v << 1) - m + u32::from(extra_bit))
    }

    /// Implements 5.9.28: reads a subexponential code in the range `0..num_syms`.
    pub fn decode_subexp(&mut self, num_syms: i32) -> Result<i32, ReadBitsError> {
        let mut i = 0;
        let mut mk = 0;
        let k = 3;

        loop {
            let b2 = if i != 0 { k + i - 1 } else { k };
            let a = 1 << b2;

            if num_syms <= mk + 3 * a {
                let subexp_final_bits = self.read_ns((num_syms - mk) as u32)?;
                return Ok(subexp_final_bits as i32 + mk);
            }

            let subexp_more_bits = self.0.read_bit()?;
            if subexp_more_bits {
                i += 1;
                mk += a;
            } else {
                let subexp_bits: i32 = self.0.read_bits(b2 as usize)?;
                return Ok(subexp_bits + mk);
            }
        }
    }

    /// Implements 5.9.26.
    pub fn decode_signed_subexp_with_ref(
        &mut self,
        low: i32,
        high: i32,
        r: i32,
    ) -> Result<i32, ReadBitsError> {
        let sub_exp = self.decode_subexp(high - low)?;
        Ok(helpers::decode_signed_subexp_with_ref(
            sub_exp, low, high, r,
        ))
    }

    /// Implements 5.3.5 Byte alignment syntax
    pub fn byte_alignment(&mut self) -> Result<(), ReadBitsError> {
        while (self.0.position() & 7) != 0 {
            self.0.read_bit()?;
        }

        Ok(())
    }

    /// Position in bits.
    pub fn position(&self) -> usize {
        self.0.position()
    }
}
