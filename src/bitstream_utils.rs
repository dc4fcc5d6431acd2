// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadBitsError {
    #[error("more than 31 ({0}) bits were requested")]
    TooManyBitsRequested(usize),
    #[error("reader ran out of bits")]
    OutOfBits,
    #[error("attempted an unaligned read of {0} bits")]
    Unaligned(usize),
    #[error("failed to convert read input to target type")]
    ConversionFailed,
}

/// A MSB-first bit reader over a byte slice. AV1 has no emulation prevention, so bytes are
/// consumed as they are.
#[derive(Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// How many bits have been read so far.
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool, ReadBitsError> {
        let byte = *self
            .data
            .get(self.position / 8)
            .ok_or(ReadBitsError::OutOfBits)?;
        let bit = (byte >> (7 - (self.position % 8))) & 1;
        self.position += 1;

        Ok(bit == 1)
    }

    /// Read up to 31 bits from the stream.
    pub fn read_bits<U: TryFrom<u32>>(&mut self, num_bits: usize) -> Result<U, ReadBitsError> {
        if num_bits > 31 {
            return Err(ReadBitsError::TooManyBitsRequested(num_bits));
        }

        if self.num_bits_left() < num_bits {
            return Err(ReadBitsError::OutOfBits);
        }

        let mut out = 0u32;
        for _ in 0..num_bits {
            out = (out << 1) | u32::from(self.read_bit()?);
        }

        U::try_from(out).map_err(|_| ReadBitsError::ConversionFailed)
    }

    /// Reads an unsigned integer from the stream and checks if the stream is byte aligned.
    pub fn read_bits_aligned<U: TryFrom<u32>>(
        &mut self,
        num_bits: usize,
    ) -> Result<U, ReadBitsError> {
        if self.position % 8 != 0 {
            return Err(ReadBitsError::Unaligned(num_bits));
        }

        self.read_bits(num_bits)
    }

    /// Returns the amount of bits left in the stream
    pub fn num_bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }

    /// Return the position of this bitstream in bits.
    pub fn position(&self) -> usize {
        self.position
    }
}

#[derive(Error, Debug)]
pub enum BitWriterError {
    #[error("invalid bit count")]
    InvalidBitCount,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BitWriterResult<T> = std::result::Result<T, BitWriterError>;

pub struct BitWriter<W: Write> {
    out: W,
    nth_bit: u8,
    curr_byte: u8,
}

impl<W: Write> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: writer,
            curr_byte: 0,
            nth_bit: 0,
        }
    }

    /// Writes fixed bit size integer (up to 32 bit)
    pub fn write_f<T: Into<u32>>(&mut self, bits: usize, value: T) -> BitWriterResult<usize> {
        let value = value.into();

        if bits > 32 {
            return Err(BitWriterError::InvalidBitCount);
        }

        for bit in (0..bits).rev() {
            self.write_bit((value >> bit) & 1 == 1)?;
        }

        Ok(bits)
    }

    /// Takes a single bit that will be outputed to [`std::io::Write`]
    pub fn write_bit(&mut self, bit: bool) -> BitWriterResult<()> {
        self.curr_byte |= (bit as u8) << (7u8 - self.nth_bit);
        self.nth_bit += 1;

        if self.nth_bit == 8 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        Ok(())
    }

    /// Writes whole bytes. The writer has to be byte aligned.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> BitWriterResult<()> {
        if self.has_data_pending() {
            return Err(BitWriterError::InvalidBitCount);
        }

        self.out.write_all(bytes)?;
        Ok(())
    }

    /// Immediately outputs any cached bits to [`std::io::Write`]
    pub fn flush(&mut self) -> BitWriterResult<()> {
        if self.nth_bit != 0 {
            self.out.write_all(&[self.curr_byte])?;
            self.nth_bit = 0;
            self.curr_byte = 0;
        }

        self.out.flush()?;
        Ok(())
    }

    /// Returns `true` if ['Self`] hold data that wasn't written to [`std::io::Write`]
    pub fn has_data_pending(&self) -> bool {
        self.nth_bit != 0
    }
}

impl<W: Write> Drop for BitWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Unable to flush bits {e:?}");
        }
    }
}
