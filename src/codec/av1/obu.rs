// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsed AV1 syntax structures.
//!
//! Header fields are filled by an OBU parser living outside of this crate. Only the syntax
//! elements the frame state machine consumes are represented. Values are raw, i.e. as coded in
//! the bitstream: loop filter deltas are only meaningful where their update flag is set, and
//! global motion parameters hold the subexponential codes, not the resolved warp matrices.

use std::rc::Rc;

use anyhow::anyhow;
use enumn::N;

use crate::codec::av1::reader::Reader;

pub const TOTAL_REFS_PER_FRAME: usize = 8;
pub const NUM_REF_FRAMES: usize = 8;
pub const REFS_PER_FRAME: usize = 7;
pub const MAX_TILE_COLS: usize = 64;
pub const MAX_TILE_ROWS: usize = 64;
pub const MAX_TILE_WIDTH: u32 = 4096;
pub const MAX_TILE_AREA: u32 = 4096 * 2304;
pub const MAX_NUM_OPERATING_POINTS: usize = 32;
pub const MAX_NUM_Y_POINTS: usize = 16;
pub const MAX_NUM_CB_POINTS: usize = 16;
pub const MAX_NUM_CR_POINTS: usize = 16;
pub const MAX_NUM_POS_LUMA: usize = 25;
pub const PRIMARY_REF_NONE: u32 = 7;
pub const WARPEDMODEL_PREC_BITS: u32 = 16;
pub const GM_ABS_ALPHA_BITS: u32 = 12;
pub const GM_ALPHA_PREC_BITS: u32 = 15;
pub const GM_ABS_TRANS_ONLY_BITS: u32 = 9;
pub const GM_TRANS_ONLY_PREC_BITS: u32 = 3;
pub const GM_ABS_TRANS_BITS: u32 = 12;
pub const GM_TRANS_PREC_BITS: u32 = 6;

/// Default loop filter reference deltas, see setup_past_independence() in 7.20.
pub const DEFAULT_LOOP_FILTER_REF_DELTAS: [i8; TOTAL_REFS_PER_FRAME] = [1, 0, 0, 0, -1, 0, -1, -1];

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObuType {
    #[default]
    Reserved = 0,
    SequenceHeader = 1,
    TemporalDelimiter = 2,
    FrameHeader = 3,
    TileGroup = 4,
    Metadata = 5,
    Frame = 6,
    RedundantFrameHeader = 7,
    TileList = 8,
    Padding = 15,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Profile {
    #[default]
    Profile0 = 0,
    Profile1 = 1,
    Profile2 = 2,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameType {
    #[default]
    KeyFrame = 0,
    InterFrame = 1,
    IntraOnlyFrame = 2,
    SwitchFrame = 3,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReferenceFrameType {
    #[default]
    Intra = 0,
    Last = 1,
    Last2 = 2,
    Last3 = 3,
    Golden = 4,
    BwdRef = 5,
    AltRef2 = 6,
    AltRef = 7,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarpModelType {
    #[default]
    Identity = 0,
    Translation = 1,
    RotZoom = 2,
    Affine = 3,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObuHeader {
    pub obu_type: ObuType,
    pub extension_flag: bool,
    pub has_size_field: bool,
    pub temporal_id: u32,
    pub spatial_id: u32,
}

impl ObuHeader {
    pub fn new(obu_type: ObuType) -> Self {
        Self {
            obu_type,
            has_size_field: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperatingPoint {
    pub seq_level_idx: u32,
    pub seq_tier: u32,
    /// Which temporal (low byte) and spatial (high byte) layers the operating point decodes.
    pub idc: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColorConfig {
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub mono_chrome: bool,
    pub subsampling_x: bool,
    pub subsampling_y: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceHeaderObu {
    pub obu_header: ObuHeader,
    /// Raw seq_profile. Values above 2 are reserved.
    pub seq_profile: u32,
    pub still_picture: bool,
    pub reduced_still_picture_header: bool,
    pub max_frame_width_minus_1: u32,
    pub max_frame_height_minus_1: u32,
    /// When set, superblocks contain 128x128 luma samples, 64x64 otherwise.
    pub use_128x128_superblock: bool,
    pub enable_warped_motion: bool,
    pub enable_order_hint: bool,
    /// Number of bits used for the order_hint syntax element.
    pub order_hint_bits: u32,
    pub film_grain_params_present: bool,
    pub operating_points_cnt_minus_1: u32,
    pub operating_points: [OperatingPoint; MAX_NUM_OPERATING_POINTS],
    pub color_config: ColorConfig,
}

impl SequenceHeaderObu {
    pub fn profile(&self) -> Option<Profile> {
        Profile::n(self.seq_profile)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopFilterParams {
    pub loop_filter_level: [u8; 4],
    pub loop_filter_sharpness: u8,
    pub loop_filter_delta_enabled: bool,
    /// When set, `update_ref_delta` and `update_mode_delta` are present.
    pub loop_filter_delta_update: bool,
    pub update_ref_delta: [bool; TOTAL_REFS_PER_FRAME],
    /// Coded reference deltas. Only the entries whose `update_ref_delta` flag is set are
    /// present in the bitstream.
    pub loop_filter_ref_deltas: [i8; TOTAL_REFS_PER_FRAME],
    pub update_mode_delta: [bool; 2],
    /// Coded mode deltas, see `loop_filter_ref_deltas`.
    pub loop_filter_mode_deltas: [i8; 2],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileInfo {
    /// If set, all tiles are the same size except for the ones at the right and bottom edges.
    pub uniform_tile_spacing_flag: bool,
    pub tile_cols_log2: u32,
    pub tile_rows_log2: u32,
    pub tile_cols: u32,
    pub tile_rows: u32,
    /// Width of each tile column minus 1, in superblocks.
    pub width_in_sbs_minus_1: [u32; MAX_TILE_COLS],
    /// Height of each tile row minus 1, in superblocks.
    pub height_in_sbs_minus_1: [u32; MAX_TILE_ROWS],
    pub context_update_tile_id: u32,
    /// Number of bytes minus 1 of each tile size field in tile groups.
    pub tile_size_bytes_minus_1: u32,
}

impl Default for TileInfo {
    fn default() -> Self {
        Self {
            uniform_tile_spacing_flag: true,
            tile_cols_log2: 0,
            tile_rows_log2: 0,
            tile_cols: 1,
            tile_rows: 1,
            width_in_sbs_minus_1: [0; MAX_TILE_COLS],
            height_in_sbs_minus_1: [0; MAX_TILE_ROWS],
            context_update_tile_id: 0,
            tile_size_bytes_minus_1: 3,
        }
    }
}

impl TileInfo {
    pub fn num_tiles(&self) -> u32 {
        self.tile_cols * self.tile_rows
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalMotionParams {
    pub is_global: [bool; NUM_REF_FRAMES],
    pub is_rot_zoom: [bool; NUM_REF_FRAMES],
    pub is_translation: [bool; NUM_REF_FRAMES],
    /// Subexponential codes as read by decode_subexp(), before recentering around the
    /// reference parameters.
    pub gm_params: [[i32; 6]; NUM_REF_FRAMES],
}

impl GlobalMotionParams {
    /// The warp model signalled for `ref_frame`.
    pub fn gm_type(&self, ref_frame: usize) -> WarpModelType {
        match (
            self.is_global[ref_frame],
            self.is_rot_zoom[ref_frame],
            self.is_translation[ref_frame],
        ) {
            (false, _, _) => WarpModelType::Identity,
            (true, true, _) => WarpModelType::RotZoom,
            (true, false, true) => WarpModelType::Translation,
            (true, false, false) => WarpModelType::Affine,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilmGrainParams {
    pub apply_grain: bool,
    pub grain_seed: u16,
    /// If not set, the parameters are loaded from `film_grain_params_ref_idx`.
    pub update_grain: bool,
    pub film_grain_params_ref_idx: u8,
    pub num_y_points: u8,
    pub point_y_value: [u8; MAX_NUM_Y_POINTS],
    pub point_y_scaling: [u8; MAX_NUM_Y_POINTS],
    pub chroma_scaling_from_luma: bool,
    pub num_cb_points: u8,
    pub point_cb_value: [u8; MAX_NUM_CB_POINTS],
    pub point_cb_scaling: [u8; MAX_NUM_CB_POINTS],
    pub num_cr_points: u8,
    pub point_cr_value: [u8; MAX_NUM_CR_POINTS],
    pub point_cr_scaling: [u8; MAX_NUM_CR_POINTS],
    pub grain_scaling_minus_8: u8,
    pub ar_coeff_lag: u32,
    pub ar_coeffs_y_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeffs_cb_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeffs_cr_plus_128: [u8; MAX_NUM_POS_LUMA],
    pub ar_coeff_shift_minus_6: u8,
    pub grain_scale_shift: u8,
    pub cb_mult: u8,
    pub cb_luma_mult: u8,
    pub cb_offset: u16,
    pub cr_mult: u8,
    pub cr_luma_mult: u8,
    pub cr_offset: u16,
    pub overlap_flag: bool,
    pub clip_to_restricted_range: bool,
}

/// A FrameHeaderOBU
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameHeaderObu {
    /// The original OBU header. This may be from a FrameOBU or a FrameHeaderOBU
    /// directly.
    pub obu_header: ObuHeader,
    /// If set, the frame in slot `frame_to_show_map_idx` is output and nothing is decoded.
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: u32,
    pub frame_type: FrameType,
    pub show_frame: bool,
    pub showable_frame: bool,
    pub error_resilient_mode: bool,
    /// Index into `ref_frame_idx` of the frame whose state is inherited, or
    /// [`PRIMARY_REF_NONE`].
    pub primary_ref_frame: u32,
    /// Bitmask of the reference slots replaced by this frame once decoded.
    pub refresh_frame_flags: u32,
    /// Slot used by each of the LAST_FRAME..ALTREF_FRAME references.
    pub ref_frame_idx: [u8; REFS_PER_FRAME],
    pub order_hint: u32,
    pub allow_high_precision_mv: bool,
    pub reference_select: bool,
    pub skip_mode_present: bool,
    pub frame_width: u32,
    pub frame_height: u32,
    pub upscaled_width: u32,
    pub render_width: u32,
    pub render_height: u32,
    pub loop_filter_params: LoopFilterParams,
    pub tile_info: TileInfo,
    pub global_motion_params: GlobalMotionParams,
    pub film_grain_params: FilmGrainParams,
}

impl FrameHeaderObu {
    /// Same as FrameIsIntra.
    pub fn frame_is_intra(&self) -> bool {
        matches!(
            self.frame_type,
            FrameType::KeyFrame | FrameType::IntraOnlyFrame
        )
    }
}

/// A TileGroupOBU. The tile payloads are not copied: `data` is the compressed buffer the OBU
/// was found in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileGroupObu<'a> {
    pub obu_header: ObuHeader,
    /// If not set, the tile group covers the entire frame.
    pub tile_start_and_end_present_flag: bool,
    /// Zero-based index of the first tile in the tile group.
    pub tg_start: u32,
    /// Zero-based index of the last tile in the tile group.
    pub tg_end: u32,
    /// Buffer backing the OBU.
    pub data: &'a [u8],
    /// Where the tile data starts in `data`, right after the tile group header.
    pub tile_data_offset: usize,
    /// Size of the tile data, including the tile size fields.
    pub tile_data_size: usize,
}

impl<'a> TileGroupObu<'a> {
    /// Parses the tile group header (5.11.1) of the OBU payload found at
    /// `data[offset..offset + size]`.
    pub fn parse(
        obu_header: ObuHeader,
        data: &'a [u8],
        offset: usize,
        size: usize,
        tile_info: &TileInfo,
    ) -> anyhow::Result<Self> {
        let payload = offset
            .checked_add(size)
            .and_then(|end| data.get(offset..end))
            .ok_or(anyhow!(
                "Tile group payload {}+{} is out of the {} bytes buffer",
                offset,
                size,
                data.len()
            ))?;

        let mut r = Reader::new(payload);
        let num_tiles = tile_info.num_tiles();

        let mut tg = TileGroupObu {
            obu_header,
            data,
            ..Default::default()
        };

        if num_tiles > 1 {
            tg.tile_start_and_end_present_flag = r.read_bit()?;
        }

        if num_tiles == 1 || !tg.tile_start_and_end_present_flag {
            tg.tg_start = 0;
            tg.tg_end = num_tiles.saturating_sub(1);
        } else {
            let tile_bits = (tile_info.tile_cols_log2 + tile_info.tile_rows_log2) as usize;
            tg.tg_start = r.read_bits(tile_bits)?;
            tg.tg_end = r.read_bits(tile_bits)?;
        }

        r.byte_alignment()?;

        let header_bytes = r.position() / 8;
        tg.tile_data_offset = offset + header_bytes;
        tg.tile_data_size = size - header_bytes;

        Ok(tg)
    }

    /// The tile data of this tile group, size fields included.
    pub fn tile_data(&self) -> Option<&'a [u8]> {
        let end = self.tile_data_offset.checked_add(self.tile_data_size)?;
        self.data.get(self.tile_data_offset..end)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameObu<'a> {
    pub header: FrameHeaderObu,
    pub tile_group: TileGroupObu<'a>,
}

/// An OBU as handed over by the OBU parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedObu<'a> {
    SequenceHeader(Rc<SequenceHeaderObu>),
    TemporalDelimiter(ObuHeader),
    FrameHeader(FrameHeaderObu),
    RedundantFrameHeader(FrameHeaderObu),
    TileGroup(TileGroupObu<'a>),
    Metadata(ObuHeader),
    Frame(FrameObu<'a>),
    TileList(ObuHeader),
    Padding(ObuHeader),
    Reserved(ObuHeader),
}

impl<'a> ParsedObu<'a> {
    pub fn obu_header(&self) -> &ObuHeader {
        match self {
            ParsedObu::SequenceHeader(seq) => &seq.obu_header,
            ParsedObu::FrameHeader(fh) | ParsedObu::RedundantFrameHeader(fh) => &fh.obu_header,
            ParsedObu::TileGroup(tg) => &tg.obu_header,
            ParsedObu::Frame(frame) => &frame.header.obu_header,
            ParsedObu::TemporalDelimiter(header)
            | ParsedObu::Metadata(header)
            | ParsedObu::TileList(header)
            | ParsedObu::Padding(header)
            | ParsedObu::Reserved(header) => header,
        }
    }

    pub fn obu_type(&self) -> ObuType {
        self.obu_header().obu_type
    }
}
