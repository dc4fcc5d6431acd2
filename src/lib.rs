// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! AV1 frame header and reference management for hardware-accelerated codecs.
//!
//! The [decoder](crate::decoder::stateless) resolves the state each frame inherits from its
//! references, locates its tiles and drives a hardware backend through the decoding of each
//! frame. The [encoder](crate::encoder) side produces the matching syntax elements.

pub mod bitstream_utils;
pub mod codec;
pub mod decoder;
pub mod encoder;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// Pixel formats decoded frames can be output in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DecodedFormat {
    /// Y, U and V planes, 4:2:0 sampling, 8 bits per sample.
    I420,
    /// Y, U and V planes, 4:2:2 sampling, 8 bits per sample.
    I422,
    /// Y, U and V planes, 4:4:4 sampling, 8 bits per sample.
    I444,
    /// Y, U and V planes, 4:2:0 sampling, 16 bits per sample, LE. Only the 10 LSBs are used.
    I010,
    /// Y, U and V planes, 4:2:0 sampling, 16 bits per sample, LE. Only the 12 LSBs are used.
    I012,
    /// Y, U and V planes, 4:2:2 sampling, 16 bits per sample, LE. Only the 10 LSBs are used.
    I210,
    /// Y, U and V planes, 4:2:2 sampling, 16 bits per sample, LE. Only the 12 LSBs are used.
    I212,
    /// Y, U and V planes, 4:4:4 sampling, 16 bits per sample, LE. Only the 10 LSBs are used.
    I410,
    /// Y, U and V planes, 4:4:4 sampling, 16 bits per sample, LE. Only the 12 LSBs are used.
    I412,
    /// Luma only, 8 bits per sample.
    Gray8,
    /// Luma only, 16 bits per sample, LE. Only the 10 LSBs are used.
    Gray10,
    /// Luma only, 16 bits per sample, LE. Only the 12 LSBs are used.
    Gray12,
}

impl DecodedFormat {
    /// Number of bits of each sample.
    pub fn bit_depth(&self) -> u32 {
        match self {
            DecodedFormat::I420
            | DecodedFormat::I422
            | DecodedFormat::I444
            | DecodedFormat::Gray8 => 8,
            DecodedFormat::I010
            | DecodedFormat::I210
            | DecodedFormat::I410
            | DecodedFormat::Gray10 => 10,
            DecodedFormat::I012
            | DecodedFormat::I212
            | DecodedFormat::I412
            | DecodedFormat::Gray12 => 12,
        }
    }
}
