// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::rc::Rc;

use anyhow::anyhow;

use crate::codec::av1::helpers;
use crate::codec::av1::obu::FrameHeaderObu;
use crate::codec::av1::obu::FrameObu;
use crate::codec::av1::obu::FrameType;
use crate::codec::av1::obu::ObuHeader;
use crate::codec::av1::obu::ObuType;
use crate::codec::av1::obu::ParsedObu;
use crate::codec::av1::obu::Profile;
use crate::codec::av1::obu::SequenceHeaderObu;
use crate::codec::av1::obu::TileGroupObu;
use crate::codec::av1::obu::MAX_NUM_OPERATING_POINTS;
use crate::codec::av1::state::derive_frame_state;
use crate::codec::av1::state::ResolvedFrameState;
use crate::codec::av1::tiles::compute_tile_info;
use crate::codec::av1::tiles::TileGroupInfo;
use crate::decoder::stateless::DecodeError;
use crate::decoder::stateless::DecodingState;
use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessCodec;
use crate::decoder::stateless::StatelessDecoder;
use crate::decoder::stateless::StatelessDecoderBackend;
use crate::decoder::DecodedFrame;
use crate::decoder::DecoderEvent;
use crate::decoder::StreamInfo;
use crate::DecodedFormat;
use crate::Resolution;

pub mod refs;

#[cfg(test)]
mod dummy;

use refs::Av1Frame;
use refs::ReferenceFrames;

/// Refresh mask covering all the reference slots.
const ALL_FRAMES: u32 = 0xff;

/// Everything the backend needs to program the hardware for a new frame.
pub struct PictureParams<'a, S> {
    pub sequence: &'a SequenceHeaderObu,
    pub header: &'a FrameHeaderObu,
    /// State inherited from the reference frames, with the frame header updates applied.
    pub state: &'a ResolvedFrameState,
    /// Surface the frame is to be decoded into.
    pub surface: &'a Rc<S>,
    pub reference_frames: &'a ReferenceFrames<S>,
}

/// Stateless backend methods specific to AV1.
///
/// For each frame the decoder calls `start_frame` once, `decode_slice` once per tile group and
/// finally `end_frame`, which must not return before the frame is fully decoded.
pub trait StatelessAV1DecoderBackend: StatelessDecoderBackend {
    /// Called when a new Sequence Header OBU is parsed.
    fn change_stream_info(&mut self, stream_info: &StreamInfo) -> StatelessBackendResult<()>;

    /// Called when the decoder determines that a new picture was found.
    fn start_frame(&mut self, picture: &PictureParams<Self::Surface>)
        -> StatelessBackendResult<()>;

    /// Called to dispatch the tiles of a tile group. `data` is the compressed buffer the tile
    /// group was found in, and `tiles` locates each tile inside it.
    fn decode_slice(&mut self, data: &[u8], tiles: &[TileGroupInfo]) -> StatelessBackendResult<()>;

    /// Called once all the tiles of the current frame have been submitted.
    fn end_frame(&mut self) -> StatelessBackendResult<()>;
}

/// Where the decoder is in the processing of the current frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePhase {
    /// No frame in progress.
    #[default]
    Idle,
    HeaderParsed,
    SurfaceAllocated,
    /// `start_frame` succeeded, tiles are being submitted.
    HwSubmitted,
    /// `end_frame` succeeded.
    Decoded,
    ReferencesUpdated,
}

/// Unit of input of the decoder, usually one temporal unit.
#[derive(Clone, Debug, Default)]
pub struct Packet<'a> {
    /// Presentation timestamp, attached to the frames output while processing this packet.
    pub pts: u64,
    /// Decode timestamp, attached to the frames output while processing this packet.
    pub dts: u64,
    pub obus: Vec<ParsedObu<'a>>,
}

/// State of the picture being currently decoded.
///
/// Stored between calls to [`StatelessDecoder::decode`] as the tile groups of a frame may span
/// several packets.
struct CurrentPicture<S> {
    /// Data for the current picture as extracted from the stream.
    header: FrameHeaderObu,
    frame: Av1Frame<S>,
    /// Number of tiles submitted to the backend so far.
    tiles_decoded: u32,
}

pub struct AV1DecoderState<S> {
    /// The reference frames in use.
    reference_frames: ReferenceFrames<S>,

    /// Parameters of the current sequence, `None` until a sequence header is seen.
    stream_info: Option<StreamInfo>,

    /// The picture currently being decoded.
    current_pic: Option<CurrentPicture<S>>,

    phase: FramePhase,

    /// Keep track of the number of frames we've processed for logging purposes.
    frame_count: u32,

    /// For SVC streams, we only want to output the highest layer possible given
    /// the choice of operating point.
    highest_spatial_layer: Option<u32>,
}

impl<S> Default for AV1DecoderState<S> {
    fn default() -> Self {
        Self {
            reference_frames: Default::default(),
            stream_info: Default::default(),
            current_pic: Default::default(),
            phase: Default::default(),
            frame_count: Default::default(),
            highest_spatial_layer: Default::default(),
        }
    }
}

/// [`StatelessCodec`] structure to use in order to create an AV1 stateless decoder.
///
/// # Accepted input
///
/// The decoder consumes [`Packet`]s of already parsed OBUs. The tile groups of a frame may be
/// split across several packets, the frame is submitted once its last tile has been received.
pub struct Av1;

impl StatelessCodec for Av1 {
    type DecoderState<B: StatelessDecoderBackend> = AV1DecoderState<B::Surface>;
}

/// Returns the format of the frames of `sequence`.
pub fn pixel_format(sequence: &SequenceHeaderObu) -> anyhow::Result<DecodedFormat> {
    let profile = sequence
        .profile()
        .ok_or(anyhow!("Unsupported profile {}", sequence.seq_profile))?;
    let cc = &sequence.color_config;

    let bit_depth = match (profile, cc.high_bitdepth, cc.twelve_bit) {
        (Profile::Profile2, true, true) => 12,
        (_, true, _) => 10,
        (_, false, _) => 8,
    };

    let format = match (cc.mono_chrome, cc.subsampling_x, cc.subsampling_y, bit_depth) {
        (true, true, true, 8) => DecodedFormat::Gray8,
        (true, true, true, 10) => DecodedFormat::Gray10,
        (true, true, true, 12) => DecodedFormat::Gray12,
        (false, true, true, 8) => DecodedFormat::I420,
        (false, true, true, 10) => DecodedFormat::I010,
        (false, true, true, 12) => DecodedFormat::I012,
        (false, true, false, 8) => DecodedFormat::I422,
        (false, true, false, 10) => DecodedFormat::I210,
        (false, true, false, 12) => DecodedFormat::I212,
        (false, false, false, 8) => DecodedFormat::I444,
        (false, false, false, 10) => DecodedFormat::I410,
        (false, false, false, 12) => DecodedFormat::I412,
        (mono_chrome, subsampling_x, subsampling_y, _) => {
            return Err(anyhow!(
                "Unsupported subsampling {}x{} (mono_chrome: {})",
                subsampling_x as u32,
                subsampling_y as u32,
                mono_chrome
            ))
        }
    };

    Ok(format)
}

/// The spatial layer whose frames are output, if the operating point selects spatial layers.
fn highest_spatial_layer(sequence: &SequenceHeaderObu, operating_point: usize) -> Option<u32> {
    let spatial_layers = sequence.operating_points[operating_point].idc >> 8;

    if spatial_layers == 0 {
        None
    } else {
        Some(helpers::floor_log2(spatial_layers))
    }
}

impl<B> StatelessDecoder<Av1, B>
where
    B: StatelessAV1DecoderBackend,
{
    /// Decodes the OBUs of `packet`.
    ///
    /// `alloc_cb` is called to obtain the surface of each new frame. If it returns `None`,
    /// [`DecodeError::NotEnoughOutputBuffers`] is returned and the frame is dropped.
    ///
    /// On error the frame in progress, if any, is dropped and the reference frames are left
    /// untouched. Decoding can resume with the next packet.
    pub fn decode(
        &mut self,
        packet: Packet,
        alloc_cb: &mut dyn FnMut() -> Option<B::Surface>,
    ) -> Result<(), DecodeError> {
        let Packet { pts, dts, obus } = packet;

        for obu in obus {
            if let Err(err) = self.process_obu(obu, pts, dts, alloc_cb) {
                self.drop_current_frame(&err);
                return Err(err);
            }
        }

        Ok(())
    }

    /// Drops the frame in progress and the reference frames. A key frame is needed to resume
    /// decoding afterwards.
    ///
    /// Frames are submitted as soon as their last tile is received, so all the frames that could
    /// be completed are already waiting in the event queue.
    pub fn flush(&mut self) {
        if self.codec.current_pic.take().is_some() {
            log::debug!("Dropping incomplete frame {} on flush", self.codec.frame_count);
        }

        self.codec.reference_frames.clear();
        self.set_phase(FramePhase::Idle);

        if self.decoding_state == DecodingState::Decoding {
            self.decoding_state = DecodingState::Reset;
        }
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.codec.stream_info.as_ref()
    }

    pub fn frame_phase(&self) -> FramePhase {
        self.codec.phase
    }

    fn set_phase(&mut self, phase: FramePhase) {
        if self.codec.phase != phase {
            log::debug!(
                "Frame {}: {:?} -> {:?}",
                self.codec.frame_count,
                self.codec.phase,
                phase
            );
            self.codec.phase = phase;
        }
    }

    fn drop_current_frame(&mut self, err: &DecodeError) {
        match err {
            DecodeError::BackendError(_) => log::error!(
                "hardware submission failed for frame {}: {}",
                self.codec.frame_count,
                err
            ),
            // Already reported when the sequence header was processed.
            DecodeError::NoHardwareSupport(_) => (),
            _ => log::warn!("Error while decoding frame {}: {}", self.codec.frame_count, err),
        }

        if self.codec.current_pic.take().is_some() {
            log::debug!("Dropping frame {}", self.codec.frame_count);
        }

        self.set_phase(FramePhase::Idle);
    }

    /// The operating point selected by the client, clamped to the ones of `sequence`.
    fn operating_point(&self, sequence: &SequenceHeaderObu) -> usize {
        self.config
            .operating_point
            .min(sequence.operating_points_cnt_minus_1 as usize)
            .min(MAX_NUM_OPERATING_POINTS - 1)
    }

    /// Whether the OBU with `header` belongs to the selected operating point, see 7.5.
    fn in_operating_point(&self, header: &ObuHeader) -> bool {
        let Some(stream_info) = &self.codec.stream_info else {
            return true;
        };

        let sequence = &stream_info.sequence;
        let idc = sequence.operating_points[self.operating_point(sequence)].idc;

        if idc == 0
            || !header.extension_flag
            || matches!(
                header.obu_type,
                ObuType::SequenceHeader | ObuType::TemporalDelimiter
            )
        {
            return true;
        }

        let in_temporal_layer = idc.checked_shr(header.temporal_id).unwrap_or(0) & 1 == 1;
        let in_spatial_layer = idc.checked_shr(header.spatial_id + 8).unwrap_or(0) & 1 == 1;

        in_temporal_layer && in_spatial_layer
    }

    fn process_obu(
        &mut self,
        obu: ParsedObu,
        pts: u64,
        dts: u64,
        alloc_cb: &mut dyn FnMut() -> Option<B::Surface>,
    ) -> Result<(), DecodeError> {
        if !self.in_operating_point(obu.obu_header()) {
            log::debug!(
                "Dropping {:?} OBU of temporal layer {} and spatial layer {}",
                obu.obu_type(),
                obu.obu_header().temporal_id,
                obu.obu_header().spatial_id
            );
            return Ok(());
        }

        if let DecodingState::Unsupported(format) = self.decoding_state {
            if !matches!(obu, ParsedObu::SequenceHeader(_)) {
                return Err(DecodeError::NoHardwareSupport(format));
            }
        }

        match obu {
            ParsedObu::SequenceHeader(sequence) => self.decode_sequence_header(sequence),
            ParsedObu::FrameHeader(header) => {
                self.decode_frame_header(header, pts, dts, alloc_cb)?;
                Ok(())
            }
            ParsedObu::RedundantFrameHeader(header) => {
                if self.codec.current_pic.is_some() {
                    log::debug!("Ignoring redundant frame header");
                    Ok(())
                } else {
                    self.decode_frame_header(header, pts, dts, alloc_cb)?;
                    Ok(())
                }
            }
            ParsedObu::TileGroup(tile_group) => self.decode_tile_group(tile_group, pts, dts),
            ParsedObu::Frame(FrameObu { header, tile_group }) => {
                if self.decode_frame_header(header, pts, dts, alloc_cb)? {
                    self.decode_tile_group(tile_group, pts, dts)?;
                }
                Ok(())
            }
            ParsedObu::TileList(_) => Err(DecodeError::UnsupportedStream(
                "large scale tile not supported".into(),
            )),
            other => {
                log::debug!("Skipping OBU of type {:?}", other.obu_type());
                Ok(())
            }
        }
    }

    fn decode_sequence_header(
        &mut self,
        sequence: Rc<SequenceHeaderObu>,
    ) -> Result<(), DecodeError> {
        if let Some(stream_info) = &self.codec.stream_info {
            if *stream_info.sequence == *sequence
                && !matches!(self.decoding_state, DecodingState::Unsupported(_))
            {
                log::trace!("Sequence header unchanged");
                return Ok(());
            }
        }

        if self.codec.current_pic.is_some() {
            return Err(anyhow!(
                "Broken stream: new sequence header while frame {} is incomplete",
                self.codec.frame_count
            )
            .into());
        }

        // Frames are refused until a usable sequence header shows up.
        let format = match pixel_format(&sequence) {
            Ok(format) => format,
            Err(e) => {
                self.codec.stream_info = None;
                self.decoding_state = DecodingState::AwaitingStreamInfo;
                return Err(DecodeError::UnsupportedStream(e.to_string()));
            }
        };

        if !self.backend.supports_format(format) {
            log::error!("The hardware cannot decode into {:?}", format);
            self.decoding_state = DecodingState::Unsupported(format);
            return Err(DecodeError::NoHardwareSupport(format));
        }

        let stream_info = StreamInfo {
            sequence: Rc::clone(&sequence),
            format,
            coded_resolution: Resolution::from((
                sequence.max_frame_width_minus_1 + 1,
                sequence.max_frame_height_minus_1 + 1,
            )),
        };

        self.backend.change_stream_info(&stream_info)?;

        log::debug!(
            "New sequence: {:?} ({} bits), {}x{}",
            stream_info.format,
            stream_info.format.bit_depth(),
            stream_info.coded_resolution.width,
            stream_info.coded_resolution.height
        );

        self.codec.highest_spatial_layer =
            highest_spatial_layer(&sequence, self.operating_point(&sequence));
        self.coded_resolution = stream_info.coded_resolution;
        self.codec.stream_info = Some(stream_info.clone());
        self.event_queue.push(DecoderEvent::FormatChanged(stream_info));

        if matches!(
            self.decoding_state,
            DecodingState::AwaitingStreamInfo | DecodingState::Unsupported(_)
        ) {
            self.decoding_state = DecodingState::Decoding;
        }

        Ok(())
    }

    /// Starts processing the frame described by `header`. Returns whether tile groups are now
    /// expected for it.
    fn decode_frame_header(
        &mut self,
        header: FrameHeaderObu,
        pts: u64,
        dts: u64,
        alloc_cb: &mut dyn FnMut() -> Option<B::Surface>,
    ) -> Result<bool, DecodeError> {
        let Some(stream_info) = self.codec.stream_info.clone() else {
            return Err(DecodeError::ParseFrameError(
                "frame header received before any sequence header".into(),
            ));
        };

        if self.codec.current_pic.is_some() {
            return Err(anyhow!(
                "Broken stream: new frame header while frame {} is incomplete",
                self.codec.frame_count
            )
            .into());
        }

        if self.decoding_state == DecodingState::Reset {
            if header.frame_type != FrameType::KeyFrame || header.show_existing_frame {
                log::debug!(
                    "Skipping {:?} frame while waiting for a key frame",
                    header.frame_type
                );
                return Ok(false);
            }

            self.decoding_state = DecodingState::Decoding;
        }

        log::debug!(
            "Processing frame {} with timestamp {}",
            self.codec.frame_count,
            pts
        );
        self.set_phase(FramePhase::HeaderParsed);

        if header.show_existing_frame {
            self.show_existing_frame(&header, pts, dts)?;
            self.set_phase(FramePhase::Idle);
            return Ok(false);
        }

        let surface = alloc_cb().ok_or(DecodeError::NotEnoughOutputBuffers(1))?;
        self.set_phase(FramePhase::SurfaceAllocated);

        let state = derive_frame_state(
            &stream_info.sequence,
            &header,
            &self.codec.reference_frames.resolved_states(),
        )?;

        let frame = Av1Frame {
            surface: Rc::new(surface),
            state,
            frame_type: header.frame_type,
            spatial_id: header.obu_header.spatial_id,
            resolution: Resolution::from((header.upscaled_width, header.frame_height)),
        };

        self.backend.start_frame(&PictureParams {
            sequence: &stream_info.sequence,
            header: &header,
            state: &frame.state,
            surface: &frame.surface,
            reference_frames: &self.codec.reference_frames,
        })?;
        self.set_phase(FramePhase::HwSubmitted);

        self.codec.current_pic = Some(CurrentPicture {
            header,
            frame,
            tiles_decoded: 0,
        });

        Ok(true)
    }

    /// Outputs the frame in the slot selected by `header`. Key frames shown this way also
    /// refresh all the slots, see 7.21.
    fn show_existing_frame(
        &mut self,
        header: &FrameHeaderObu,
        pts: u64,
        dts: u64,
    ) -> Result<(), DecodeError> {
        let slot = header.frame_to_show_map_idx as usize;
        let frame = self
            .codec
            .reference_frames
            .get(slot)
            .cloned()
            .ok_or(anyhow!(
                "Broken stream: no reference picture to display in slot {}",
                slot
            ))?;

        log::debug!("Showing existing frame from slot {}", slot);
        self.output_frame(&frame, header.obu_header.spatial_id, pts, dts);

        if frame.frame_type == FrameType::KeyFrame {
            self.codec.reference_frames.update(&frame, ALL_FRAMES);
            self.set_phase(FramePhase::ReferencesUpdated);
        }

        self.codec.frame_count += 1;
        Ok(())
    }

    fn decode_tile_group(
        &mut self,
        tile_group: TileGroupObu,
        pts: u64,
        dts: u64,
    ) -> Result<(), DecodeError> {
        let Some(stream_info) = &self.codec.stream_info else {
            return Err(DecodeError::ParseFrameError(
                "tile group received before any sequence header".into(),
            ));
        };

        let Some(picture) = self.codec.current_pic.as_mut() else {
            if self.decoding_state == DecodingState::Reset {
                log::debug!("Skipping tile group while waiting for a key frame");
                return Ok(());
            }

            return Err(anyhow!(
                "Broken stream: cannot decode a tile group without first decoding a frame header"
            )
            .into());
        };

        if tile_group.tg_start != picture.tiles_decoded {
            return Err(anyhow!(
                "Broken stream: tile group starts at tile {}, expected {}",
                tile_group.tg_start,
                picture.tiles_decoded
            )
            .into());
        }

        let tiles = compute_tile_info(&stream_info.sequence, &picture.header, &tile_group)
            .map_err(|e| DecodeError::ParseFrameError(format!("{:#}", e)))?;

        self.backend.decode_slice(tile_group.data, &tiles)?;

        picture.tiles_decoded += tiles.len() as u32;
        log::trace!(
            "Decoded tiles {}..={} of frame {}",
            tile_group.tg_start,
            tile_group.tg_end,
            self.codec.frame_count
        );

        if picture.tiles_decoded >= picture.header.tile_info.num_tiles() {
            self.finish_frame(pts, dts)?;
        }

        Ok(())
    }

    fn finish_frame(&mut self, pts: u64, dts: u64) -> Result<(), DecodeError> {
        let picture = self
            .codec
            .current_pic
            .take()
            .ok_or(anyhow!("Broken stream: no picture to submit"))?;

        self.backend.end_frame()?;
        self.set_phase(FramePhase::Decoded);

        let refresh_frame_flags = if picture.header.frame_type == FrameType::KeyFrame {
            ALL_FRAMES
        } else {
            picture.header.refresh_frame_flags
        };

        self.codec
            .reference_frames
            .update(&picture.frame, refresh_frame_flags);
        self.set_phase(FramePhase::ReferencesUpdated);

        if picture.header.show_frame {
            self.output_frame(&picture.frame, picture.header.obu_header.spatial_id, pts, dts);
        }

        log::debug!(
            "Finished frame {} with timestamp {}",
            self.codec.frame_count,
            pts
        );

        self.codec.frame_count += 1;
        self.set_phase(FramePhase::Idle);
        Ok(())
    }

    fn output_frame(&mut self, frame: &Av1Frame<B::Surface>, spatial_id: u32, pts: u64, dts: u64) {
        if let Some(highest_spatial_layer) = self.codec.highest_spatial_layer {
            if spatial_id < highest_spatial_layer {
                log::debug!("Dropping frame with spatial_id {}", spatial_id);
                return;
            }
        }

        self.event_queue
            .push(DecoderEvent::FrameReady(DecodedFrame {
                surface: Rc::clone(&frame.surface),
                pts,
                dts,
                spatial_id,
                resolution: frame.resolution,
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::av1::obu::ColorConfig;
    use crate::codec::av1::obu::LoopFilterParams;
    use crate::codec::av1::obu::OperatingPoint;
    use crate::codec::av1::obu::TileInfo;
    use crate::codec::av1::obu::NUM_REF_FRAMES;
    use crate::codec::av1::obu::PRIMARY_REF_NONE;
    use crate::codec::av1::synthesizer::CodedTileGroup;
    use crate::codec::av1::synthesizer::Synthesizer;
    use crate::decoder::stateless::av1::dummy::Backend;
    use crate::decoder::stateless::av1::dummy::BackendCall;
    use crate::decoder::stateless::av1::dummy::FailurePoint;

    fn decoder() -> StatelessDecoder<Av1, Backend> {
        StatelessDecoder::new_dummy(Default::default())
    }

    fn sequence() -> SequenceHeaderObu {
        SequenceHeaderObu {
            obu_header: ObuHeader::new(ObuType::SequenceHeader),
            max_frame_width_minus_1: 639,
            max_frame_height_minus_1: 479,
            enable_order_hint: true,
            order_hint_bits: 7,
            color_config: ColorConfig {
                subsampling_x: true,
                subsampling_y: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn key_frame() -> FrameHeaderObu {
        FrameHeaderObu {
            obu_header: ObuHeader::new(ObuType::Frame),
            frame_type: FrameType::KeyFrame,
            show_frame: true,
            primary_ref_frame: PRIMARY_REF_NONE,
            refresh_frame_flags: ALL_FRAMES,
            frame_width: 640,
            frame_height: 480,
            upscaled_width: 640,
            ..Default::default()
        }
    }

    fn inter_frame(order_hint: u32, refresh_frame_flags: u32) -> FrameHeaderObu {
        FrameHeaderObu {
            frame_type: FrameType::InterFrame,
            primary_ref_frame: 0,
            refresh_frame_flags,
            order_hint,
            ..key_frame()
        }
    }

    fn two_columns() -> TileInfo {
        TileInfo {
            tile_cols_log2: 1,
            tile_cols: 2,
            tile_size_bytes_minus_1: 0,
            ..Default::default()
        }
    }

    /// Writes a TileGroupOBU holding `tiles`.
    fn coded_tile_group(tile_info: &TileInfo, tg_start: u32, tiles: &[&[u8]]) -> Vec<u8> {
        let tg = CodedTileGroup {
            obu_header: ObuHeader::new(ObuType::TileGroup),
            tile_start_and_end_present_flag: tiles.len() as u32 != tile_info.num_tiles(),
            tg_start,
            tg_end: tg_start + tiles.len() as u32 - 1,
            tiles: tiles.to_vec(),
        };

        let mut buf = Vec::new();
        Synthesizer::<'_, CodedTileGroup, _>::synthesize(&tg, tile_info, &mut buf).unwrap();
        buf
    }

    fn parse_tile_group<'a>(buf: &'a [u8], tile_info: &TileInfo) -> TileGroupObu<'a> {
        TileGroupObu::parse(
            ObuHeader::new(ObuType::TileGroup),
            buf,
            2,
            buf.len() - 2,
            tile_info,
        )
        .unwrap()
    }

    fn sequence_packet(sequence: SequenceHeaderObu) -> Packet<'static> {
        Packet {
            obus: vec![ParsedObu::SequenceHeader(Rc::new(sequence))],
            ..Default::default()
        }
    }

    fn frame_packet<'a>(pts: u64, header: FrameHeaderObu, buf: &'a [u8]) -> Packet<'a> {
        let tile_group = parse_tile_group(buf, &header.tile_info);

        Packet {
            pts,
            dts: pts,
            obus: vec![ParsedObu::Frame(FrameObu { header, tile_group })],
        }
    }

    /// Hands out surfaces 0, 1, 2...
    fn surfaces() -> impl FnMut() -> Option<u32> {
        let mut next = 0;
        move || {
            let surface = next;
            next += 1;
            Some(surface)
        }
    }

    fn no_surface() -> Option<u32> {
        None
    }

    /// Surface and pts of each frame output by `decoder`.
    fn output_frames(decoder: &mut StatelessDecoder<Av1, Backend>) -> Vec<(u32, u64)> {
        std::iter::from_fn(|| decoder.next_event())
            .filter_map(|event| match event {
                DecoderEvent::FrameReady(frame) => Some((*frame.surface, frame.pts)),
                DecoderEvent::FormatChanged(_) => None,
            })
            .collect()
    }

    /// The `start_frame` calls received by the backend.
    fn started_frames(decoder: &StatelessDecoder<Av1, Backend>) -> Vec<&BackendCall> {
        decoder
            .backend()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::StartFrame { .. }))
            .collect()
    }

    fn references_of(call: &BackendCall) -> [Option<u32>; NUM_REF_FRAMES] {
        match call {
            BackendCall::StartFrame { references, .. } => *references,
            _ => panic!("not a start_frame call: {:?}", call),
        }
    }

    #[test]
    fn pixel_formats() {
        let mut seq = sequence();
        assert_eq!(pixel_format(&seq).unwrap(), DecodedFormat::I420);

        seq.color_config.high_bitdepth = true;
        assert_eq!(pixel_format(&seq).unwrap(), DecodedFormat::I010);

        // twelve_bit only matters for profile 2.
        seq.color_config.twelve_bit = true;
        assert_eq!(pixel_format(&seq).unwrap(), DecodedFormat::I010);
        seq.seq_profile = 2;
        assert_eq!(pixel_format(&seq).unwrap(), DecodedFormat::I012);
        assert_eq!(pixel_format(&seq).unwrap().bit_depth(), 12);

        seq.color_config.subsampling_y = false;
        assert_eq!(pixel_format(&seq).unwrap(), DecodedFormat::I212);

        seq.color_config.subsampling_x = false;
        assert_eq!(pixel_format(&seq).unwrap(), DecodedFormat::I412);

        seq.color_config.mono_chrome = true;
        assert!(pixel_format(&seq).is_err());

        seq.color_config.subsampling_x = true;
        seq.color_config.subsampling_y = true;
        assert_eq!(pixel_format(&seq).unwrap(), DecodedFormat::Gray12);

        seq.seq_profile = 3;
        assert!(pixel_format(&seq).is_err());
    }

    #[test]
    fn key_frame_then_inter_frame() {
        let _ = env_logger::try_init();

        let mut decoder = decoder();
        let mut alloc = surfaces();

        let tile_info = TileInfo::default();
        let key_tiles = coded_tile_group(&tile_info, 0, &[&[0x11, 0x22, 0x33]]);
        let inter_tiles = coded_tile_group(&tile_info, 0, &[&[0x44]]);

        let inter = FrameHeaderObu {
            loop_filter_params: LoopFilterParams {
                loop_filter_delta_enabled: true,
                loop_filter_delta_update: true,
                update_ref_delta: [false, true, false, false, false, false, false, false],
                loop_filter_ref_deltas: [0, 3, 0, 0, 0, 0, 0, 0],
                ..Default::default()
            },
            ..inter_frame(1, 0x01)
        };

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(0, key_frame(), &key_tiles), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(1, inter, &inter_tiles), &mut alloc)
            .unwrap();

        assert_eq!(decoder.frame_phase(), FramePhase::Idle);
        assert_eq!(decoder.coded_resolution(), Resolution::from((640, 480)));

        match decoder.next_event() {
            Some(DecoderEvent::FormatChanged(info)) => {
                assert_eq!(info.format, DecodedFormat::I420);
                assert_eq!(info.coded_resolution, Resolution::from((640, 480)));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(output_frames(&mut decoder), vec![(0, 0), (1, 1)]);

        let calls = &decoder.backend().calls;
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[0], BackendCall::ChangeStreamInfo(DecodedFormat::I420));
        assert_eq!(
            calls[2],
            BackendCall::DecodeSlice {
                tiles: vec![crc32fast::hash(&[0x11, 0x22, 0x33])]
            }
        );
        assert_eq!(calls[3], BackendCall::EndFrame);
        assert_eq!(calls[6], BackendCall::EndFrame);

        match &calls[4] {
            BackendCall::StartFrame {
                surface,
                frame_type,
                references,
                state,
            } => {
                assert_eq!(*surface, 1);
                assert_eq!(*frame_type, FrameType::InterFrame);
                assert_eq!(*references, [Some(0); NUM_REF_FRAMES]);
                assert_eq!(state.loop_filter_ref_deltas, [1, 3, 0, 0, -1, 0, -1, -1]);
                assert_eq!(state.order_hint, 1);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn inter_frame_inherits_and_refreshes_one_slot() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        let inter = inter_frame(1, 0x01);
        assert!(!inter.loop_filter_params.loop_filter_delta_update);

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(0, key_frame(), &tiles), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(1, inter, &tiles), &mut alloc)
            .unwrap();

        let started = started_frames(&decoder);
        assert_eq!(started.len(), 2);
        match started[1] {
            BackendCall::StartFrame { state, .. } => {
                assert_eq!(state.loop_filter_ref_deltas, [1, 0, 0, 0, -1, 0, -1, -1]);
                assert_eq!(state.loop_filter_mode_deltas, [0, 0]);
            }
            other => panic!("unexpected call {:?}", other),
        }

        let refs = &decoder.codec.reference_frames;

        let slot0 = refs.get(0).unwrap();
        assert_eq!(*slot0.surface, 1);
        assert_eq!(slot0.frame_type, FrameType::InterFrame);
        assert_eq!(slot0.state.order_hint, 1);

        for slot in 1..NUM_REF_FRAMES {
            let frame = refs.get(slot).unwrap();
            assert_eq!(*frame.surface, 0, "slot {}", slot);
            assert_eq!(frame.frame_type, FrameType::KeyFrame);
            assert_eq!(frame.state, ResolvedFrameState::default());
        }
    }

    #[test]
    fn refresh_flags_select_slots() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(0, key_frame(), &tiles), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(1, inter_frame(1, 0b1000_0010), &tiles), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(2, inter_frame(2, 0), &tiles), &mut alloc)
            .unwrap();

        let started = started_frames(&decoder);
        assert_eq!(started.len(), 3);
        assert_eq!(
            references_of(started[2]),
            [
                Some(0),
                Some(1),
                Some(0),
                Some(0),
                Some(0),
                Some(0),
                Some(0),
                Some(1)
            ]
        );
    }

    #[test]
    fn backend_failure_drops_frame() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(0, key_frame(), &tiles), &mut alloc)
            .unwrap();

        decoder.backend_mut().fail_next = Some(FailurePoint::EndFrame);
        let res = decoder.decode(frame_packet(1, inter_frame(1, ALL_FRAMES), &tiles), &mut alloc);
        assert!(matches!(res, Err(DecodeError::BackendError(_))));
        assert_eq!(decoder.frame_phase(), FramePhase::Idle);

        decoder
            .decode(frame_packet(2, inter_frame(2, 0), &tiles), &mut alloc)
            .unwrap();

        // The failed frame did not replace anything.
        let started = started_frames(&decoder);
        assert_eq!(references_of(started[2]), [Some(0); NUM_REF_FRAMES]);
        assert_eq!(output_frames(&mut decoder), vec![(0, 0), (2, 2)]);
    }

    #[test]
    fn failed_start_frame_leaves_no_reference() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();

        decoder.backend_mut().fail_next = Some(FailurePoint::StartFrame);
        let res = decoder.decode(frame_packet(0, key_frame(), &tiles), &mut alloc);
        assert!(matches!(res, Err(DecodeError::BackendError(_))));
        assert_eq!(decoder.frame_phase(), FramePhase::Idle);

        // The following inter frame has no primary reference to inherit from.
        let res = decoder.decode(frame_packet(1, inter_frame(1, 0), &tiles), &mut alloc);
        assert!(matches!(res, Err(DecodeError::DecoderError(_))));
        assert!(output_frames(&mut decoder).is_empty());
    }

    #[test]
    fn show_existing_frame() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        let hidden = FrameHeaderObu {
            show_frame: false,
            showable_frame: true,
            ..inter_frame(4, 0b0000_0100)
        };

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(0, key_frame(), &tiles), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(1, hidden, &tiles), &mut alloc)
            .unwrap();

        let show_existing = |slot| Packet {
            pts: 5,
            dts: 5,
            obus: vec![ParsedObu::FrameHeader(FrameHeaderObu {
                obu_header: ObuHeader::new(ObuType::FrameHeader),
                show_existing_frame: true,
                frame_to_show_map_idx: slot,
                ..Default::default()
            })],
        };

        decoder.decode(show_existing(2), &mut alloc).unwrap();
        assert_eq!(decoder.frame_phase(), FramePhase::Idle);
        assert_eq!(output_frames(&mut decoder), vec![(0, 0), (1, 5)]);

        // Showing the key frame again puts it back in all the slots.
        decoder.decode(show_existing(0), &mut alloc).unwrap();
        assert_eq!(output_frames(&mut decoder), vec![(0, 5)]);

        decoder
            .decode(frame_packet(6, inter_frame(6, 0), &tiles), &mut alloc)
            .unwrap();
        let started = started_frames(&decoder);
        assert_eq!(started.len(), 3);
        assert_eq!(references_of(started[2]), [Some(0); NUM_REF_FRAMES]);

        // Nothing can be shown after a flush until a new key frame is decoded.
        decoder.flush();
        decoder.decode(show_existing(1), &mut alloc).unwrap();
        assert_eq!(output_frames(&mut decoder), vec![(2, 6)]);

        decoder
            .decode(frame_packet(7, key_frame(), &tiles), &mut alloc)
            .unwrap();
        decoder.decode(show_existing(1), &mut alloc).unwrap();
        assert_eq!(output_frames(&mut decoder), vec![(3, 7), (3, 5)]);
    }

    #[test]
    fn tiles_split_across_packets() {
        let _ = env_logger::try_init();

        let mut decoder = decoder();
        let mut alloc = surfaces();

        let tile_info = two_columns();
        let first = coded_tile_group(&tile_info, 0, &[&[0xa0, 0xa1]]);
        let second = coded_tile_group(&tile_info, 1, &[&[0xb0, 0xb1, 0xb2]]);

        let header = FrameHeaderObu {
            obu_header: ObuHeader::new(ObuType::FrameHeader),
            tile_info: tile_info.clone(),
            ..key_frame()
        };

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(
                Packet {
                    pts: 0,
                    dts: 0,
                    obus: vec![
                        ParsedObu::FrameHeader(header.clone()),
                        ParsedObu::TileGroup(parse_tile_group(&first, &tile_info)),
                        ParsedObu::RedundantFrameHeader(header),
                    ],
                },
                &mut alloc,
            )
            .unwrap();

        assert_eq!(decoder.frame_phase(), FramePhase::HwSubmitted);
        assert!(output_frames(&mut decoder).is_empty());
        assert!(!decoder.backend().calls.contains(&BackendCall::EndFrame));

        decoder
            .decode(
                Packet {
                    pts: 1,
                    dts: 1,
                    obus: vec![ParsedObu::TileGroup(parse_tile_group(&second, &tile_info))],
                },
                &mut alloc,
            )
            .unwrap();

        assert_eq!(decoder.frame_phase(), FramePhase::Idle);
        assert_eq!(output_frames(&mut decoder), vec![(0, 1)]);
        assert_eq!(
            decoder.backend().calls[2..],
            [
                BackendCall::DecodeSlice {
                    tiles: vec![crc32fast::hash(&[0xa0, 0xa1])]
                },
                BackendCall::DecodeSlice {
                    tiles: vec![crc32fast::hash(&[0xb0, 0xb1, 0xb2])]
                },
                BackendCall::EndFrame,
            ]
        );
    }

    #[test]
    fn failed_tile_group_drops_frame() {
        let mut decoder = decoder();
        let mut alloc = surfaces();

        let tile_info = two_columns();
        let first = coded_tile_group(&tile_info, 0, &[&[0xa0]]);
        let second = coded_tile_group(&tile_info, 1, &[&[0xb0]]);

        let header = FrameHeaderObu {
            obu_header: ObuHeader::new(ObuType::FrameHeader),
            tile_info: tile_info.clone(),
            ..key_frame()
        };

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();

        decoder.backend_mut().fail_next = Some(FailurePoint::DecodeSlice);
        let res = decoder.decode(
            Packet {
                obus: vec![ParsedObu::FrameHeader(header.clone())],
                ..Default::default()
            },
            &mut alloc,
        );
        assert!(res.is_ok());
        assert_eq!(decoder.frame_phase(), FramePhase::HwSubmitted);

        let res = decoder.decode(
            Packet {
                obus: vec![ParsedObu::TileGroup(parse_tile_group(&first, &tile_info))],
                ..Default::default()
            },
            &mut alloc,
        );
        assert!(matches!(res, Err(DecodeError::BackendError(_))));
        assert_eq!(decoder.frame_phase(), FramePhase::Idle);

        // The rest of the dropped frame is rejected.
        let res = decoder.decode(
            Packet {
                obus: vec![ParsedObu::TileGroup(parse_tile_group(&second, &tile_info))],
                ..Default::default()
            },
            &mut alloc,
        );
        assert!(matches!(res, Err(DecodeError::DecoderError(_))));

        assert!(output_frames(&mut decoder).is_empty());
        assert!(!decoder.backend().calls.contains(&BackendCall::EndFrame));
    }

    #[test]
    fn tile_group_out_of_order() {
        let mut decoder = decoder();
        let mut alloc = surfaces();

        let tile_info = two_columns();
        let second = coded_tile_group(&tile_info, 1, &[&[0xb0]]);

        let header = FrameHeaderObu {
            obu_header: ObuHeader::new(ObuType::FrameHeader),
            tile_info: tile_info.clone(),
            ..key_frame()
        };

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        let res = decoder.decode(
            Packet {
                obus: vec![
                    ParsedObu::FrameHeader(header),
                    ParsedObu::TileGroup(parse_tile_group(&second, &tile_info)),
                ],
                ..Default::default()
            },
            &mut alloc,
        );

        assert!(matches!(res, Err(DecodeError::DecoderError(_))));
        assert_eq!(decoder.frame_phase(), FramePhase::Idle);
        assert!(output_frames(&mut decoder).is_empty());
    }

    #[test]
    fn new_frame_header_while_frame_incomplete() {
        let mut decoder = decoder();
        let mut alloc = surfaces();

        let tile_info = two_columns();
        let first = coded_tile_group(&tile_info, 0, &[&[0xa0]]);

        let header = FrameHeaderObu {
            obu_header: ObuHeader::new(ObuType::FrameHeader),
            tile_info: tile_info.clone(),
            ..key_frame()
        };

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        let res = decoder.decode(
            Packet {
                obus: vec![
                    ParsedObu::FrameHeader(header.clone()),
                    ParsedObu::TileGroup(parse_tile_group(&first, &tile_info)),
                    ParsedObu::FrameHeader(header),
                ],
                ..Default::default()
            },
            &mut alloc,
        );

        assert!(matches!(res, Err(DecodeError::DecoderError(_))));
        assert_eq!(decoder.frame_phase(), FramePhase::Idle);
        assert!(output_frames(&mut decoder).is_empty());
    }

    #[test]
    fn frame_before_sequence_header() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        let res = decoder.decode(frame_packet(0, key_frame(), &tiles), &mut alloc);
        assert!(matches!(res, Err(DecodeError::ParseFrameError(_))));
        assert!(decoder.backend().calls.is_empty());
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn unsupported_format() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        let mut seq = sequence();
        seq.color_config.mono_chrome = true;
        seq.color_config.high_bitdepth = true;

        let res = decoder.decode(sequence_packet(seq), &mut alloc);
        assert!(matches!(
            res,
            Err(DecodeError::NoHardwareSupport(DecodedFormat::Gray10))
        ));

        let res = decoder.decode(frame_packet(0, key_frame(), &tiles), &mut alloc);
        assert!(matches!(
            res,
            Err(DecodeError::NoHardwareSupport(DecodedFormat::Gray10))
        ));

        assert!(decoder.backend().calls.is_empty());
        assert!(decoder.stream_info().is_none());

        // A supported sequence makes the decoder usable again.
        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(1, key_frame(), &tiles), &mut alloc)
            .unwrap();
        assert_eq!(output_frames(&mut decoder), vec![(0, 1)]);
    }

    #[test]
    fn invalid_subsampling() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();

        let mut seq = sequence();
        seq.color_config.subsampling_x = false;
        let res = decoder.decode(sequence_packet(seq), &mut alloc);
        assert!(matches!(res, Err(DecodeError::UnsupportedStream(_))));

        let res = decoder.decode(frame_packet(0, key_frame(), &tiles), &mut alloc);
        assert!(matches!(res, Err(DecodeError::ParseFrameError(_))));
        assert_eq!(started_frames(&decoder).len(), 0);
    }

    #[test]
    fn flush_waits_for_key_frame() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(frame_packet(0, key_frame(), &tiles), &mut alloc)
            .unwrap();

        decoder.flush();

        decoder
            .decode(frame_packet(1, inter_frame(1, 0x01), &tiles), &mut alloc)
            .unwrap();
        assert_eq!(started_frames(&decoder).len(), 1);

        decoder
            .decode(frame_packet(2, key_frame(), &tiles), &mut alloc)
            .unwrap();

        let started = started_frames(&decoder);
        assert_eq!(started.len(), 2);
        assert_eq!(references_of(started[1]), [None; NUM_REF_FRAMES]);
        assert_eq!(output_frames(&mut decoder), vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn no_surface_available() {
        let mut decoder = decoder();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        decoder
            .decode(sequence_packet(sequence()), &mut no_surface)
            .unwrap();

        let res = decoder.decode(frame_packet(0, key_frame(), &tiles), &mut no_surface);
        assert!(matches!(res, Err(DecodeError::NotEnoughOutputBuffers(1))));
        assert_eq!(decoder.frame_phase(), FramePhase::Idle);

        decoder
            .decode(frame_packet(0, key_frame(), &tiles), &mut surfaces())
            .unwrap();
        assert_eq!(output_frames(&mut decoder), vec![(0, 0)]);
    }

    #[test]
    fn tile_list_is_unsupported() {
        let mut decoder = decoder();

        let res = decoder.decode(
            Packet {
                obus: vec![
                    ParsedObu::TemporalDelimiter(ObuHeader::new(ObuType::TemporalDelimiter)),
                    ParsedObu::TileList(ObuHeader::new(ObuType::TileList)),
                ],
                ..Default::default()
            },
            &mut surfaces(),
        );

        assert!(matches!(res, Err(DecodeError::UnsupportedStream(_))));
    }

    #[test]
    fn operating_point_selects_layers() {
        let mut decoder = decoder();
        let mut alloc = surfaces();
        let tiles = coded_tile_group(&TileInfo::default(), 0, &[&[0x01]]);

        let mut seq = sequence();
        // Temporal layer 0, spatial layers 0 and 1.
        seq.operating_points[0] = OperatingPoint {
            idc: 0x301,
            ..Default::default()
        };

        let layer = |spatial_id| FrameHeaderObu {
            obu_header: ObuHeader {
                extension_flag: true,
                spatial_id,
                ..ObuHeader::new(ObuType::Frame)
            },
            ..key_frame()
        };

        decoder.decode(sequence_packet(seq), &mut alloc).unwrap();
        for spatial_id in 0..3 {
            decoder
                .decode(frame_packet(0, layer(spatial_id), &tiles), &mut alloc)
                .unwrap();
        }

        // Spatial layer 2 is not part of the operating point.
        assert_eq!(started_frames(&decoder).len(), 2);

        // Only the highest spatial layer is output.
        let frames: Vec<_> = std::iter::from_fn(|| decoder.next_event())
            .filter_map(|event| match event {
                DecoderEvent::FrameReady(frame) => Some(frame),
                DecoderEvent::FormatChanged(_) => None,
            })
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].spatial_id, 1);
        assert_eq!(*frames[0].surface, 1);
    }

    #[test]
    fn sequence_change() {
        let mut decoder = decoder();
        let mut alloc = surfaces();

        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();
        decoder
            .decode(sequence_packet(sequence()), &mut alloc)
            .unwrap();

        let mut seq = sequence();
        seq.max_frame_width_minus_1 = 1279;
        seq.max_frame_height_minus_1 = 719;
        decoder.decode(sequence_packet(seq), &mut alloc).unwrap();

        assert_eq!(decoder.num_pending_events(), 2);
        assert_eq!(decoder.backend().calls.len(), 2);
        assert_eq!(decoder.coded_resolution(), Resolution::from((1280, 720)));

        let resolutions: Vec<_> = std::iter::from_fn(|| decoder.next_event())
            .map(|event| match event {
                DecoderEvent::FormatChanged(info) => info.coded_resolution,
                DecoderEvent::FrameReady(frame) => panic!("unexpected frame {:?}", frame),
            })
            .collect();
        assert_eq!(
            resolutions,
            vec![Resolution::from((640, 480)), Resolution::from((1280, 720))]
        );
    }
}
