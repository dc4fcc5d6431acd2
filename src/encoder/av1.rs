// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::av1::helpers;
use crate::codec::av1::obu::ColorConfig;
use crate::codec::av1::obu::FrameHeaderObu;
use crate::codec::av1::obu::FrameType;
use crate::codec::av1::obu::ObuHeader;
use crate::codec::av1::obu::ObuType;
use crate::codec::av1::obu::OperatingPoint;
use crate::codec::av1::obu::ReferenceFrameType;
use crate::codec::av1::obu::SequenceHeaderObu;
use crate::codec::av1::obu::TileInfo;
use crate::codec::av1::obu::WarpModelType;
use crate::codec::av1::obu::MAX_NUM_OPERATING_POINTS;
use crate::codec::av1::obu::MAX_TILE_COLS;
use crate::codec::av1::obu::MAX_TILE_ROWS;
use crate::codec::av1::obu::NUM_REF_FRAMES;
use crate::codec::av1::obu::PRIMARY_REF_NONE;
use crate::codec::av1::obu::TOTAL_REFS_PER_FRAME;
use crate::codec::av1::state::GlobalParamPrecision;
use crate::codec::av1::state::ResolvedFrameState;
use crate::codec::av1::state::IDENTITY_GM_PARAMS;
use crate::codec::av1::synthesizer::Synthesizer;
use crate::codec::av1::tiles::SuperblockGrid;
use crate::encoder::EncodeError;
use crate::encoder::EncodeResult;
use crate::Resolution;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderConfig {
    pub resolution: Resolution,
    pub use_128x128_superblock: bool,
    /// Number of tile columns, 0 to let the encoder pick the smallest valid one.
    pub tile_cols: u32,
    /// Number of tile rows, 0 to let the encoder pick the smallest valid one.
    pub tile_rows: u32,
    /// Use uniform tile spacing when it can produce the requested tile counts.
    pub uniform_tile_spacing: bool,
    /// Size of the tile size fields of tile groups, 1 to 4.
    pub tile_size_bytes: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        // Single tile 320x240, for the widest hardware support.
        Self {
            resolution: Resolution {
                width: 320,
                height: 240,
            },
            use_128x128_superblock: false,
            tile_cols: 1,
            tile_rows: 1,
            uniform_tile_spacing: true,
            tile_size_bytes: 4,
        }
    }
}

impl EncoderConfig {
    /// 8-bit 4:2:0 sequence whose maximum frame size is the configured resolution.
    pub fn sequence_header(&self) -> SequenceHeaderObu {
        SequenceHeaderObu {
            obu_header: ObuHeader::new(ObuType::SequenceHeader),

            enable_order_hint: true,
            order_hint_bits: 8,

            // Current resolution is the maximum resolution
            max_frame_width_minus_1: self.resolution.width.saturating_sub(1),
            max_frame_height_minus_1: self.resolution.height.saturating_sub(1),
            use_128x128_superblock: self.use_128x128_superblock,

            operating_points: {
                let mut ops: [OperatingPoint; MAX_NUM_OPERATING_POINTS] = Default::default();
                ops[0].seq_level_idx = 23;
                ops
            },

            color_config: ColorConfig {
                subsampling_x: true,
                subsampling_y: true,
                ..Default::default()
            },

            ..Default::default()
        }
    }
}

/// `value` clipped to `low..=high`, `low` winning when the range is empty.
fn clip(value: u32, low: u32, high: u32) -> u32 {
    if value < low {
        low
    } else if value > high {
        high
    } else {
        value
    }
}

/// Splits `sbs` superblocks evenly in `count` tiles.
fn even_split(sbs: u32, count: u32) -> Vec<u32> {
    (0..count)
        .map(|i| (i + 1) * sbs / count - i * sbs / count - 1)
        .collect()
}

/// Sizes of `count` uniform tiles of `size` superblocks, the last one taking the remainder.
fn uniform_split(sbs: u32, size: u32, count: u32) -> Vec<u32> {
    (0..count)
        .map(|i| {
            if i == count - 1 {
                sbs - (count - 1) * size - 1
            } else {
                size - 1
            }
        })
        .collect()
}

/// The tiling of the frames of an encoded stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileLayout {
    pub grid: SuperblockGrid,
    pub uniform: bool,
    pub tile_cols_log2: u32,
    pub tile_rows_log2: u32,
    pub width_in_sbs_minus_1: Vec<u32>,
    pub height_in_sbs_minus_1: Vec<u32>,
    pub tile_size_bytes_minus_1: u32,
}

impl TileLayout {
    /// Picks the tiling requested by `config`. Uniform spacing is preferred, otherwise the
    /// superblocks are split as evenly as possible. If `config` leaves the number of rows open,
    /// the smallest number that satisfies the tile size limits is used.
    pub fn new(config: &EncoderConfig) -> EncodeResult<Self> {
        if config.tile_cols as usize > MAX_TILE_COLS || config.tile_rows as usize > MAX_TILE_ROWS {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid tile number {}x{}, should be less than {}x{}",
                config.tile_cols, config.tile_rows, MAX_TILE_COLS, MAX_TILE_ROWS
            )));
        }

        if !(1..=4).contains(&config.tile_size_bytes) {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid tile size field length {}",
                config.tile_size_bytes
            )));
        }

        let grid = SuperblockGrid::new(
            config.resolution.width,
            config.resolution.height,
            config.use_128x128_superblock,
        );

        let min_tile_cols = grid.sb_cols.div_ceil(grid.max_tile_width_sb());
        let tile_cols = clip(config.tile_cols, min_tile_cols, grid.sb_cols);
        if config.tile_cols != 0 && config.tile_cols != tile_cols {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid tile cols {}, should be in range of {}~{}",
                config.tile_cols, min_tile_cols, grid.sb_cols
            )));
        }

        if config.tile_rows > grid.sb_rows {
            return Err(EncodeError::InvalidConfig(format!(
                "invalid tile rows {}, should be less than {}",
                config.tile_rows, grid.sb_rows
            )));
        }

        let tile_cols_log2 = helpers::tile_log2(1, tile_cols);
        let tile_width_sb = SuperblockGrid::uniform_tile_size(grid.sb_cols, tile_cols_log2);
        let min_log2_tiles = grid.min_log2_tiles();

        let mut tile_rows = config.tile_rows.max(1);
        while tile_rows <= grid.sb_rows && tile_rows as usize <= MAX_TILE_ROWS {
            let tile_rows_log2 = helpers::tile_log2(1, tile_rows);

            let layout = |uniform, width_in_sbs_minus_1, height_in_sbs_minus_1| Self {
                grid,
                uniform,
                tile_cols_log2,
                tile_rows_log2,
                width_in_sbs_minus_1,
                height_in_sbs_minus_1,
                tile_size_bytes_minus_1: config.tile_size_bytes - 1,
            };

            if config.uniform_tile_spacing && grid.sb_cols.div_ceil(tile_width_sb) == tile_cols {
                let tile_height_sb =
                    SuperblockGrid::uniform_tile_size(grid.sb_rows, tile_rows_log2);

                if grid.sb_rows.div_ceil(tile_height_sb) == tile_rows
                    && tile_height_sb <= grid.max_tile_area_sb() / tile_width_sb
                {
                    return Ok(layout(
                        true,
                        uniform_split(grid.sb_cols, tile_width_sb, tile_cols),
                        uniform_split(grid.sb_rows, tile_height_sb, tile_rows),
                    ));
                }
            }

            let widths = even_split(grid.sb_cols, tile_cols);
            let widest_tile_sb = widths.iter().max().map_or(1, |w| w + 1);

            let max_tile_area_sb = if min_log2_tiles > 0 {
                (grid.sb_rows * grid.sb_cols) >> (min_log2_tiles + 1)
            } else {
                grid.sb_rows * grid.sb_cols
            };
            let max_tile_height_sb = std::cmp::max(1, max_tile_area_sb / widest_tile_sb);
            let min_tile_rows = grid.sb_rows.div_ceil(max_tile_height_sb);

            if tile_rows == clip(tile_rows, min_tile_rows, grid.sb_rows) {
                return Ok(layout(false, widths, even_split(grid.sb_rows, tile_rows)));
            }

            if config.tile_rows != 0 {
                return Err(EncodeError::InvalidConfig(format!(
                    "invalid tile rows {}, at least {} are needed",
                    config.tile_rows, min_tile_rows
                )));
            }

            tile_rows += 1;
        }

        Err(EncodeError::InvalidConfig(format!(
            "no valid tiling for {}x{} superblocks",
            grid.sb_cols, grid.sb_rows
        )))
    }

    pub fn tile_cols(&self) -> u32 {
        self.width_in_sbs_minus_1.len() as u32
    }

    pub fn tile_rows(&self) -> u32 {
        self.height_in_sbs_minus_1.len() as u32
    }

    /// The tile info syntax elements describing this layout.
    pub fn tile_info(&self) -> TileInfo {
        let mut tile_info = TileInfo {
            uniform_tile_spacing_flag: self.uniform,
            tile_cols_log2: self.tile_cols_log2,
            tile_rows_log2: self.tile_rows_log2,
            tile_cols: self.tile_cols(),
            tile_rows: self.tile_rows(),
            context_update_tile_id: 0,
            tile_size_bytes_minus_1: self.tile_size_bytes_minus_1,
            ..Default::default()
        };

        for (dst, src) in tile_info
            .width_in_sbs_minus_1
            .iter_mut()
            .zip(&self.width_in_sbs_minus_1)
        {
            *dst = *src;
        }

        for (dst, src) in tile_info
            .height_in_sbs_minus_1
            .iter_mut()
            .zip(&self.height_in_sbs_minus_1)
        {
            *dst = *src;
        }

        tile_info
    }
}

/// Tracks the state the decoder keeps in its reference slots, so frame headers can be coded
/// against it.
#[derive(Clone, Debug, Default)]
pub struct FrameStateTracker {
    slots: [Option<ResolvedFrameState>; NUM_REF_FRAMES],
}

impl FrameStateTracker {
    /// The state of each slot, as a decoder sees it.
    pub fn slots(&self) -> [Option<&ResolvedFrameState>; NUM_REF_FRAMES] {
        std::array::from_fn(|i| self.slots[i].as_ref())
    }

    fn primary(&self, header: &FrameHeaderObu) -> EncodeResult<Option<&ResolvedFrameState>> {
        if header.primary_ref_frame == PRIMARY_REF_NONE {
            return Ok(None);
        }

        let slot = header
            .ref_frame_idx
            .get(header.primary_ref_frame as usize)
            .ok_or_else(|| {
                EncodeError::InvalidConfig(format!(
                    "invalid primary_ref_frame {}",
                    header.primary_ref_frame
                ))
            })?;

        self.slots
            .get(usize::from(*slot))
            .and_then(Option::as_ref)
            .map(Some)
            .ok_or(EncodeError::InvalidInternalState)
    }

    /// Fills the loop filter delta and global motion syntax elements of `header` so that a
    /// decoder resolves the loop filter deltas and global motion of `target`.
    ///
    /// Deltas are only coded where they differ from the primary reference frame. The primary
    /// reference and the frame type of `header` must already be set.
    pub fn code_frame_state(
        &self,
        header: &mut FrameHeaderObu,
        target: &ResolvedFrameState,
    ) -> EncodeResult<()> {
        let primary = self.primary(header)?;

        self.code_loop_filter_deltas(header, primary, target)?;
        self.code_global_motion(header, primary, target)
    }

    fn code_loop_filter_deltas(
        &self,
        header: &mut FrameHeaderObu,
        primary: Option<&ResolvedFrameState>,
        target: &ResolvedFrameState,
    ) -> EncodeResult<()> {
        let lf = &mut header.loop_filter_params;
        lf.loop_filter_delta_update = false;
        lf.update_ref_delta = [false; TOTAL_REFS_PER_FRAME];
        lf.update_mode_delta = [false; 2];

        let Some(primary) = primary else {
            let defaults = ResolvedFrameState::default();
            if target.loop_filter_delta_enabled != defaults.loop_filter_delta_enabled
                || target.loop_filter_ref_deltas != defaults.loop_filter_ref_deltas
                || target.loop_filter_mode_deltas != defaults.loop_filter_mode_deltas
            {
                return Err(EncodeError::InvalidConfig(
                    "loop filter deltas are reset without a primary reference frame".into(),
                ));
            }

            lf.loop_filter_delta_enabled = defaults.loop_filter_delta_enabled;
            return Ok(());
        };

        lf.loop_filter_delta_enabled = target.loop_filter_delta_enabled;

        for i in 0..TOTAL_REFS_PER_FRAME {
            if target.loop_filter_ref_deltas[i] != primary.loop_filter_ref_deltas[i] {
                lf.update_ref_delta[i] = true;
                lf.loop_filter_ref_deltas[i] = target.loop_filter_ref_deltas[i];
            }
        }

        for i in 0..2 {
            if target.loop_filter_mode_deltas[i] != primary.loop_filter_mode_deltas[i] {
                lf.update_mode_delta[i] = true;
                lf.loop_filter_mode_deltas[i] = target.loop_filter_mode_deltas[i];
            }
        }

        lf.loop_filter_delta_update =
            lf.update_ref_delta.iter().chain(&lf.update_mode_delta).any(|u| *u);

        if lf.loop_filter_delta_update && !lf.loop_filter_delta_enabled {
            return Err(EncodeError::InvalidConfig(
                "loop filter deltas cannot change while disabled".into(),
            ));
        }

        Ok(())
    }

    fn code_global_motion(
        &self,
        header: &mut FrameHeaderObu,
        primary: Option<&ResolvedFrameState>,
        target: &ResolvedFrameState,
    ) -> EncodeResult<()> {
        let refs = ReferenceFrameType::Last as usize..=ReferenceFrameType::AltRef as usize;

        if header.frame_is_intra() {
            let identity = refs.clone().all(|r| {
                target.gm_type[r] == WarpModelType::Identity
                    && target.gm_params[r] == IDENTITY_GM_PARAMS
            });

            if !identity {
                return Err(EncodeError::InvalidConfig(
                    "intra frames cannot use global motion".into(),
                ));
            }

            header.global_motion_params = Default::default();
            return Ok(());
        }

        let prev_gm_params = match primary {
            Some(primary) => primary.gm_params,
            None => [IDENTITY_GM_PARAMS; NUM_REF_FRAMES],
        };

        let allow_high_precision_mv = header.allow_high_precision_mv;
        let gm = &mut header.global_motion_params;

        for ref_ in refs {
            let gm_type = target.gm_type[ref_];
            let params = &target.gm_params[ref_];

            gm.is_global[ref_] = gm_type != WarpModelType::Identity;
            gm.is_rot_zoom[ref_] = gm_type == WarpModelType::RotZoom;
            gm.is_translation[ref_] = gm_type == WarpModelType::Translation;
            gm.gm_params[ref_] = [0; 6];

            let coded: &[usize] = match gm_type {
                WarpModelType::Identity => &[],
                WarpModelType::Translation => &[0, 1],
                WarpModelType::RotZoom => &[0, 1, 2, 3],
                WarpModelType::Affine => &[0, 1, 2, 3, 4, 5],
            };

            let rot_zoom = params[4] == -params[3] && params[5] == params[2];
            if gm_type == WarpModelType::RotZoom && !rot_zoom {
                return Err(EncodeError::InvalidConfig(format!(
                    "parameters {:?} of reference {} are not a rotation and zoom",
                    params, ref_
                )));
            }

            for idx in 0..6 {
                if !coded.contains(&idx) {
                    let derived = gm_type == WarpModelType::RotZoom && idx >= 4;
                    if !derived && params[idx] != IDENTITY_GM_PARAMS[idx] {
                        return Err(EncodeError::InvalidConfig(format!(
                            "parameter {} of reference {} cannot be coded with {:?}",
                            idx, ref_, gm_type
                        )));
                    }

                    continue;
                }

                let precision = GlobalParamPrecision::new(gm_type, idx, allow_high_precision_mv);
                let value = (params[idx] - precision.round) >> precision.prec_diff;

                if (value << precision.prec_diff) + precision.round != params[idx]
                    || !(-precision.mx..=precision.mx).contains(&value)
                {
                    return Err(EncodeError::InvalidConfig(format!(
                        "parameter {} of reference {} cannot be coded: {}",
                        idx, ref_, params[idx]
                    )));
                }

                gm.gm_params[ref_][idx] = helpers::encode_signed_subexp_with_ref(
                    value,
                    -precision.mx,
                    precision.mx + 1,
                    precision.reference(prev_gm_params[ref_][idx]),
                );
            }

            if gm_type != WarpModelType::Identity {
                log::trace!("Coded global motion for reference {}: {:?}", ref_, gm.gm_params[ref_]);
            }
        }

        Ok(())
    }

    /// Stores `state` in the slots refreshed by `header`, as the decoder does once the frame is
    /// decoded.
    pub fn update(&mut self, header: &FrameHeaderObu, state: &ResolvedFrameState) {
        let refresh_frame_flags = if header.frame_type == FrameType::KeyFrame {
            0xff
        } else {
            header.refresh_frame_flags
        };

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if (refresh_frame_flags >> i) & 1 == 1 {
                log::debug!("Replacing reference frame {}", i);
                *slot = Some(state.clone());
            }
        }
    }
}

/// Packed syntax structures of a frame header that depend on the reference state. Each one is
/// padded to a byte boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodedFrameState {
    pub loop_filter_params: Vec<u8>,
    pub tile_info: Vec<u8>,
    pub global_motion_params: Vec<u8>,
}

/// Writes the loop filter, tile info and global motion syntax of `header`.
pub fn synthesize_frame_state(
    sequence: &SequenceHeaderObu,
    header: &FrameHeaderObu,
) -> EncodeResult<CodedFrameState> {
    let mut coded = CodedFrameState::default();

    Synthesizer::<'_, FrameHeaderObu, _>::synthesize_loop_filter_params(
        header,
        sequence,
        &mut coded.loop_filter_params,
    )?;
    Synthesizer::<'_, FrameHeaderObu, _>::synthesize_tile_info(
        header,
        sequence,
        &mut coded.tile_info,
    )?;
    Synthesizer::<'_, FrameHeaderObu, _>::synthesize_global_motion_params(
        header,
        &mut coded.global_motion_params,
    )?;

    Ok(coded)
}
