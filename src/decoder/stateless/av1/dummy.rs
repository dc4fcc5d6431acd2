// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the decoder
//! run so we can test it in isolation. It records the calls it receives, and
//! identifies tiles by the CRC32 of their payload.

use anyhow::anyhow;

use crate::codec::av1::obu::FrameType;
use crate::codec::av1::obu::NUM_REF_FRAMES;
use crate::codec::av1::state::ResolvedFrameState;
use crate::codec::av1::tiles::TileGroupInfo;
use crate::decoder::stateless::av1::Av1;
use crate::decoder::stateless::av1::PictureParams;
use crate::decoder::stateless::av1::StatelessAV1DecoderBackend;
use crate::decoder::stateless::StatelessBackendError;
use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessDecoder;
use crate::decoder::stateless::StatelessDecoderBackend;
use crate::decoder::DecoderConfig;
use crate::decoder::StreamInfo;
use crate::DecodedFormat;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    ChangeStreamInfo(DecodedFormat),
    StartFrame {
        surface: u32,
        frame_type: FrameType,
        /// Surface in each reference slot.
        references: [Option<u32>; NUM_REF_FRAMES],
        state: ResolvedFrameState,
    },
    DecodeSlice {
        /// CRC32 of each tile payload.
        tiles: Vec<u32>,
    },
    EndFrame,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePoint {
    StartFrame,
    DecodeSlice,
    EndFrame,
}

pub struct Backend {
    /// Calls that succeeded, in order.
    pub calls: Vec<BackendCall>,
    pub supported_formats: Vec<DecodedFormat>,
    /// Makes the next call of that kind fail.
    pub fail_next: Option<FailurePoint>,
}

impl Backend {
    pub fn new() -> Self {
        Self {
            calls: Default::default(),
            supported_formats: vec![DecodedFormat::I420, DecodedFormat::I010],
            fail_next: None,
        }
    }

    fn check_failure(&mut self, point: FailurePoint) -> StatelessBackendResult<()> {
        if self.fail_next == Some(point) {
            self.fail_next = None;
            return Err(StatelessBackendError::Other(anyhow!("{:?} failed", point)));
        }

        Ok(())
    }
}

impl StatelessDecoderBackend for Backend {
    type Surface = u32;

    fn supports_format(&self, format: DecodedFormat) -> bool {
        self.supported_formats.contains(&format)
    }
}

impl StatelessAV1DecoderBackend for Backend {
    fn change_stream_info(&mut self, stream_info: &StreamInfo) -> StatelessBackendResult<()> {
        self.calls
            .push(BackendCall::ChangeStreamInfo(stream_info.format));
        Ok(())
    }

    fn start_frame(&mut self, picture: &PictureParams<u32>) -> StatelessBackendResult<()> {
        self.check_failure(FailurePoint::StartFrame)?;

        self.calls.push(BackendCall::StartFrame {
            surface: **picture.surface,
            frame_type: picture.header.frame_type,
            references: std::array::from_fn(|i| {
                picture.reference_frames.get(i).map(|frame| *frame.surface)
            }),
            state: picture.state.clone(),
        });
        Ok(())
    }

    fn decode_slice(&mut self, data: &[u8], tiles: &[TileGroupInfo]) -> StatelessBackendResult<()> {
        self.check_failure(FailurePoint::DecodeSlice)?;

        let tiles = tiles
            .iter()
            .map(|tile| {
                let start = tile.tile_group_offset + tile.tile_offset;
                data.get(start..start + tile.tile_size)
                    .map(crc32fast::hash)
                    .ok_or(anyhow!("tile {}x{} out of bounds", tile.tile_row, tile.tile_col))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        self.calls.push(BackendCall::DecodeSlice { tiles });
        Ok(())
    }

    fn end_frame(&mut self) -> StatelessBackendResult<()> {
        self.check_failure(FailurePoint::EndFrame)?;

        self.calls.push(BackendCall::EndFrame);
        Ok(())
    }
}

impl StatelessDecoder<Av1, Backend> {
    // Creates a new instance of the decoder using the dummy backend.
    pub fn new_dummy(config: DecoderConfig) -> Self {
        Self::new(Backend::new(), config)
    }
}
