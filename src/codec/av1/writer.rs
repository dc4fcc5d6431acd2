// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;

use thiserror::Error;

use crate::bitstream_utils::BitWriter;
use crate::bitstream_utils::BitWriterError;
use crate::codec::av1::helpers;

#[derive(Error, Debug)]
pub enum ObuWriterError {
    #[error(transparent)]
    BitWriterError(#[from] BitWriterError),

    #[error("attemped to write leb128 on unaligned position")]
    UnalignedLeb128,

    #[error("value {value} does not fit in a ns({n}) descriptor")]
    NsOutOfRange { n: u32, value: u32 },
}

pub type ObuWriterResult<T> = std::result::Result<T, ObuWriterError>;

pub struct ObuWriter<W: Write>(BitWriter<W>);

impl<W: Write> ObuWriter<W> {
    pub fn new(writer: W) -> Self {
        Self(BitWriter::new(writer))
    }

    /// Writes fixed bit size integer. Corresponds to `f(n)` in AV1 spec defined in 4.10.2.
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> ObuWriterResult<usize> {
        self.0
            .write_f(bits, value)
            .map_err(ObuWriterError::BitWriterError)
    }

    /// Writes unsigned little-endian n-byte integer. Corresponds to `le(n)` in AV1 spec
    /// defined in 4.10.4.
    pub fn write_le<T: Into<u32>>(&mut self, n: usize, value: T) -> ObuWriterResult<usize> {
        let mut value: u32 = value.into();

        for _ in 0..n {
            self.write_f(8, value & 0xff)?;
            value >>= 8;
        }

        Ok(n * 8)
    }

    /// Writes unsigned integer represented by a variable number of little-endian bytes.
    /// Corresponds to `leb128()` in AV1 spec defined in 4.10.5.
    ///
    /// `min_bytes` pads the value with continuation bytes, which allows a size field to be
    /// reserved before the size is known.
    pub fn write_leb128<T: Into<u32>>(
        &mut self,
        value: T,
        min_bytes: usize,
    ) -> ObuWriterResult<usize> {
        if !self.aligned() {
            return Err(ObuWriterError::UnalignedLeb128);
        }

        let mut value: u32 = value.into();
        let mut bytes = 0;

        for _ in 0..8 {
            bytes += 1;

            if value > 0x7f || bytes < min_bytes {
                self.write_f(8, 0x80 | (value & 0x7f))?;
                value >>= 7;
            } else {
                self.write_f(8, value & 0x7f)?;
                break;
            }
        }

        Ok(bytes)
    }

    /// Writes signed integer converted to unsigned n-bit integer. Corresponds to `su(n)` in
    /// AV1 spec defined in 4.10.6.
    pub fn write_su<T: Into<i32>>(&mut self, bits: usize, value: T) -> ObuWriterResult<usize> {
        let mut value: i32 = value.into();
        if value < 0 {
            value += 1 << bits;
        }

        self.write_f(bits, value.unsigned_abs())
    }

    /// Writes `value` in `0..n`. Corresponds to `ns(n)` in AV1 spec defined in 4.10.7.
    pub fn write_ns(&mut self, n: u32, value: u32) -> ObuWriterResult<usize> {
        if value >= n {
            return Err(ObuWriterError::NsOutOfRange { n, value });
        }

        let w = (helpers::floor_log2(n) + 1) as usize;
        let m = (1 << w) - n;

        if value < m {
            return self.write_f(w - 1, value);
        }

        let extra_bit = (value - m) & 1;
        Ok(self.write_f(w - 1, m + ((value - m) >> 1))? + self.write_f(1, extra_bit)?)
    }

    /// Writes a subexponential code in `0..num_syms`, the inverse of decode_subexp() defined
    /// in 5.9.28.
    pub fn write_subexp(&mut self, num_syms: u32, value: u32) -> ObuWriterResult<usize> {
        let mut written = 0;
        let mut i = 0;
        let mut mk = 0;
        let k = 3;

        loop {
            let b2 = if i != 0 { k + i - 1 } else { k };
            let a = 1 << b2;

            if num_syms <= mk + 3 * a {
                return Ok(written + self.write_ns(num_syms - mk, value - mk)?);
            }

            let more_bits = value >= mk + a;
            written += self.write_f(1, more_bits)?;

            if more_bits {
                i += 1;
                mk += a;
            } else {
                return Ok(written + self.write_f(b2 as usize, value - mk)?);
            }
        }
    }

    /// Writes whole bytes. The writer has to be byte aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> ObuWriterResult<usize> {
        self.0.write_bytes(bytes)?;
        Ok(bytes.len() * 8)
    }

    pub fn aligned(&self) -> bool {
        !self.0.has_data_pending()
    }
}
