// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;
use std::num::TryFromIntError;

use thiserror::Error;

use crate::codec::av1::helpers;
use crate::codec::av1::obu::FrameHeaderObu;
use crate::codec::av1::obu::MAX_TILE_COLS;
use crate::codec::av1::obu::MAX_TILE_ROWS;
use crate::codec::av1::obu::ObuHeader;
use crate::codec::av1::obu::ObuType;
use crate::codec::av1::obu::ReferenceFrameType;
use crate::codec::av1::obu::SequenceHeaderObu;
use crate::codec::av1::obu::TileInfo;
use crate::codec::av1::obu::WarpModelType;
use crate::codec::av1::obu::TOTAL_REFS_PER_FRAME;
use crate::codec::av1::state::GlobalParamPrecision;
use crate::codec::av1::tiles::SuperblockGrid;
use crate::codec::av1::writer::ObuWriter;
use crate::codec::av1::writer::ObuWriterError;

mod private {
    pub trait ObuStruct {}
}

impl private::ObuStruct for FrameHeaderObu {}

impl<'a> private::ObuStruct for CodedTileGroup<'a> {}

/// A tile group to be written as a TileGroupOBU, with the tiles already encoded.
#[derive(Clone, Debug, Default)]
pub struct CodedTileGroup<'a> {
    pub obu_header: ObuHeader,
    pub tile_start_and_end_present_flag: bool,
    pub tg_start: u32,
    pub tg_end: u32,
    /// Payload of the tiles `tg_start..=tg_end`.
    pub tiles: Vec<&'a [u8]>,
}

#[derive(Error, Debug)]
pub enum SynthesizerError {
    #[error("tried to synthesize unsupported settings")]
    Unsupported,
    #[error("invalid syntax element value {0}")]
    InvalidSyntaxElementValue(&'static str),
    #[error(transparent)]
    ConversionError(#[from] TryFromIntError),
    #[error(transparent)]
    ObuWriter(#[from] ObuWriterError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SynthesizerResult<T> = Result<T, SynthesizerError>;

pub struct Synthesizer<'o, O: private::ObuStruct, W: Write> {
    writer: ObuWriter<W>,
    obu: &'o O,
}

impl<'o, O, W> Synthesizer<'o, O, W>
where
    O: private::ObuStruct,
    W: Write,
{
    fn new(writer: W, obu: &'o O) -> Self {
        Self {
            writer: ObuWriter::new(writer),
            obu,
        }
    }

    fn f<T: Into<u32>>(&mut self, bits: usize, value: T) -> SynthesizerResult<()> {
        let value: u32 = value.into();
        self.writer.write_f(bits, value)?;
        Ok(())
    }

    fn leb128<T: Into<u32>>(&mut self, value: T) -> SynthesizerResult<()> {
        let value: u32 = value.into();
        self.writer.write_leb128(value, 0)?;
        Ok(())
    }

    fn su<T: Into<i32>>(&mut self, bits: usize, value: T) -> SynthesizerResult<()> {
        self.writer.write_su(bits, value)?;
        Ok(())
    }

    fn ns(&mut self, n: u32, value: u32) -> SynthesizerResult<()> {
        self.writer.write_ns(n, value)?;
        Ok(())
    }

    #[cfg(any(test, debug_assertions))]
    fn invalid_element_value(&mut self, element: &'static str) -> SynthesizerResult<()> {
        Err(SynthesizerError::InvalidSyntaxElementValue(element))
    }

    #[cfg(not(any(test, debug_assertions)))]
    fn invalid_element_value(&mut self, element: &'static str) -> SynthesizerResult<()> {
        log::error!("Invalid syntax element value: '{element}', expect corrupted bitstream");
        Ok(())
    }

    /// Writes 5.3.2. OBU header syntax
    fn obu_header(&mut self, obu: &ObuHeader) -> SynthesizerResult<()> {
        self.f(1, /* obu_forbidden_bit */ 0u32)?;
        self.f(4, obu.obu_type as u32)?;
        self.f(1, obu.extension_flag)?;
        self.f(1, obu.has_size_field)?;
        self.f(1, /* obu_reserved_1bit */ 0u32)?;

        if obu.extension_flag {
            self.obu_extension_header(obu)?;
        }

        Ok(())
    }

    /// Writes AV1 5.3.3. OBU extension header syntax
    fn obu_extension_header(&mut self, obu: &ObuHeader) -> SynthesizerResult<()> {
        self.f(3, obu.temporal_id)?;
        self.f(2, obu.spatial_id)?;
        self.f(3, /* extension_header_reserved_3bits */ 0u32)?;

        Ok(())
    }

    fn obu_size(&mut self, size: u32) -> SynthesizerResult<()> {
        self.leb128(size)
    }

    /// Writes AV1 5.3.5. Byte alignment syntax
    fn byte_alignment(&mut self) -> SynthesizerResult<()> {
        while !self.writer.aligned() {
            self.f(1, /* zero_bit */ 0u32)?;
        }

        Ok(())
    }
}

/// The frame header syntax structures carrying state that is inherited between frames. Each one
/// is written on its own and padded to a byte boundary, for the encoder to insert at the matching
/// position of the uncompressed header.
impl<'o, W> Synthesizer<'o, FrameHeaderObu, W>
where
    W: Write,
{
    /// Writes AV1 5.9.11. Loop filter params syntax
    pub fn synthesize_loop_filter_params(
        obu: &'o FrameHeaderObu,
        sequence: &SequenceHeaderObu,
        writer: W,
    ) -> SynthesizerResult<()> {
        let mut s = Self::new(writer, obu);
        s.loop_filter_params(sequence)
    }

    /// Writes AV1 5.9.15. Tile info syntax
    pub fn synthesize_tile_info(
        obu: &'o FrameHeaderObu,
        sequence: &SequenceHeaderObu,
        writer: W,
    ) -> SynthesizerResult<()> {
        let mut s = Self::new(writer, obu);
        s.tile_info(sequence)
    }

    /// Writes AV1 5.9.24. Global motion params syntax
    pub fn synthesize_global_motion_params(
        obu: &'o FrameHeaderObu,
        writer: W,
    ) -> SynthesizerResult<()> {
        let mut s = Self::new(writer, obu);
        s.global_motion_params()
    }

    fn loop_filter_params(&mut self, sequence: &SequenceHeaderObu) -> SynthesizerResult<()> {
        let obu = self.obu;
        let lf = &obu.loop_filter_params;
        let num_planes = if sequence.color_config.mono_chrome { 1 } else { 3 };

        self.f(6, lf.loop_filter_level[0])?;
        self.f(6, lf.loop_filter_level[1])?;
        if num_planes > 1 && (lf.loop_filter_level[0] != 0 || lf.loop_filter_level[1] != 0) {
            self.f(6, lf.loop_filter_level[2])?;
            self.f(6, lf.loop_filter_level[3])?;
        }

        self.f(3, lf.loop_filter_sharpness)?;
        self.f(1, lf.loop_filter_delta_enabled)?;
        if lf.loop_filter_delta_enabled {
            self.f(1, lf.loop_filter_delta_update)?;
            if lf.loop_filter_delta_update {
                for i in 0..TOTAL_REFS_PER_FRAME {
                    self.f(1, lf.update_ref_delta[i])?;
                    if lf.update_ref_delta[i] {
                        self.su(1 + 6, lf.loop_filter_ref_deltas[i])?;
                    }
                }

                for i in 0..2 {
                    self.f(1, lf.update_mode_delta[i])?;
                    if lf.update_mode_delta[i] {
                        self.su(1 + 6, lf.loop_filter_mode_deltas[i])?;
                    }
                }
            }
        }

        Ok(())
    }

    fn tile_info(&mut self, sequence: &SequenceHeaderObu) -> SynthesizerResult<()> {
        let obu = self.obu;
        let tile_info = &obu.tile_info;
        let grid = SuperblockGrid::new(
            obu.frame_width,
            obu.frame_height,
            sequence.use_128x128_superblock,
        );

        self.f(1, tile_info.uniform_tile_spacing_flag)?;
        if tile_info.uniform_tile_spacing_flag {
            self.uniform_tile_spacing(&grid)?;
        } else {
            self.explicit_tile_spacing(&grid)?;
        }

        if tile_info.tile_cols_log2 > 0 || tile_info.tile_rows_log2 > 0 {
            let tile_bits = (tile_info.tile_cols_log2 + tile_info.tile_rows_log2) as usize;
            self.f(tile_bits, tile_info.context_update_tile_id)?;
            self.f(2, tile_info.tile_size_bytes_minus_1)?;
        }

        Ok(())
    }

    /// Writes the increment_tile_{cols,rows}_log2 flags reaching `log2` from `min_log2`.
    fn tile_log2_increments(
        &mut self,
        log2: u32,
        min_log2: u32,
        max_log2: u32,
    ) -> SynthesizerResult<()> {
        for _ in min_log2..log2 {
            self.f(1, /* increment */ 1u32)?;
        }

        if log2 < max_log2 {
            self.f(1, /* increment */ 0u32)?;
        }

        Ok(())
    }

    fn uniform_tile_spacing(&mut self, grid: &SuperblockGrid) -> SynthesizerResult<()> {
        let obu = self.obu;
        let tile_info = &obu.tile_info;

        let min_log2_tile_cols = grid.min_log2_tile_cols();
        let max_log2_tile_cols = grid.max_log2_tile_cols();
        if !(min_log2_tile_cols..=max_log2_tile_cols).contains(&tile_info.tile_cols_log2) {
            self.invalid_element_value("tile_cols_log2")?;
        }

        let tile_width_sb =
            SuperblockGrid::uniform_tile_size(grid.sb_cols, tile_info.tile_cols_log2);
        if tile_info.tile_cols != grid.sb_cols.div_ceil(tile_width_sb) {
            self.invalid_element_value("tile_cols")?;
        }

        let min_log2_tile_rows = grid.min_log2_tiles().saturating_sub(tile_info.tile_cols_log2);
        let max_log2_tile_rows = grid.max_log2_tile_rows();
        if !(min_log2_tile_rows..=max_log2_tile_rows).contains(&tile_info.tile_rows_log2) {
            self.invalid_element_value("tile_rows_log2")?;
        }

        let tile_height_sb =
            SuperblockGrid::uniform_tile_size(grid.sb_rows, tile_info.tile_rows_log2);
        if tile_info.tile_rows != grid.sb_rows.div_ceil(tile_height_sb) {
            self.invalid_element_value("tile_rows")?;
        }

        self.tile_log2_increments(
            tile_info.tile_cols_log2,
            min_log2_tile_cols,
            max_log2_tile_cols,
        )?;
        self.tile_log2_increments(
            tile_info.tile_rows_log2,
            min_log2_tile_rows,
            max_log2_tile_rows,
        )
    }

    fn explicit_tile_spacing(&mut self, grid: &SuperblockGrid) -> SynthesizerResult<()> {
        let obu = self.obu;
        let tile_info = &obu.tile_info;

        if tile_info.tile_cols as usize > MAX_TILE_COLS {
            self.invalid_element_value("tile_cols")?;
            return Err(SynthesizerError::Unsupported);
        }

        if tile_info.tile_rows as usize > MAX_TILE_ROWS {
            self.invalid_element_value("tile_rows")?;
            return Err(SynthesizerError::Unsupported);
        }

        let mut widest_tile_sb = 0;
        let mut start_sb = 0;
        for i in 0..tile_info.tile_cols as usize {
            if start_sb >= grid.sb_cols {
                self.invalid_element_value("tile_cols")?;
                return Err(SynthesizerError::Unsupported);
            }

            let max_width = std::cmp::min(grid.sb_cols - start_sb, grid.max_tile_width_sb());
            let width_in_sbs_minus_1 = tile_info.width_in_sbs_minus_1[i];
            if width_in_sbs_minus_1 >= max_width {
                self.invalid_element_value("width_in_sbs_minus_1")?;
                return Err(SynthesizerError::Unsupported);
            }

            self.ns(max_width, width_in_sbs_minus_1)?;

            let size_sb = width_in_sbs_minus_1 + 1;
            widest_tile_sb = std::cmp::max(size_sb, widest_tile_sb);
            start_sb += size_sb;
        }

        if start_sb != grid.sb_cols
            || tile_info.tile_cols_log2 != helpers::tile_log2(1, tile_info.tile_cols)
        {
            self.invalid_element_value("tile_cols")?;
        }

        let min_log2_tiles = grid.min_log2_tiles();
        let max_tile_area_sb = if min_log2_tiles > 0 {
            (grid.sb_rows * grid.sb_cols) >> (min_log2_tiles + 1)
        } else {
            grid.sb_rows * grid.sb_cols
        };
        let max_tile_height_sb = std::cmp::max(max_tile_area_sb / widest_tile_sb.max(1), 1);

        let mut start_sb = 0;
        for i in 0..tile_info.tile_rows as usize {
            if start_sb >= grid.sb_rows {
                self.invalid_element_value("tile_rows")?;
                return Err(SynthesizerError::Unsupported);
            }

            let max_height = std::cmp::min(grid.sb_rows - start_sb, max_tile_height_sb);
            let height_in_sbs_minus_1 = tile_info.height_in_sbs_minus_1[i];
            if height_in_sbs_minus_1 >= max_height {
                self.invalid_element_value("height_in_sbs_minus_1")?;
                return Err(SynthesizerError::Unsupported);
            }

            self.ns(max_height, height_in_sbs_minus_1)?;
            start_sb += height_in_sbs_minus_1 + 1;
        }

        if start_sb != grid.sb_rows
            || tile_info.tile_rows_log2 != helpers::tile_log2(1, tile_info.tile_rows)
        {
            self.invalid_element_value("tile_rows")?;
        }

        Ok(())
    }

    fn global_motion_params(&mut self) -> SynthesizerResult<()> {
        if self.obu.frame_is_intra() {
            return Ok(());
        }

        for ref_ in ReferenceFrameType::Last as usize..=ReferenceFrameType::AltRef as usize {
            let is_global = self.obu.global_motion_params.is_global[ref_];
            let is_rot_zoom = self.obu.global_motion_params.is_rot_zoom[ref_];
            let is_translation = self.obu.global_motion_params.is_translation[ref_];
            let gm_type = self.obu.global_motion_params.gm_type(ref_);

            self.f(1, is_global)?;
            if is_global {
                self.f(1, is_rot_zoom)?;
                if !is_rot_zoom {
                    self.f(1, is_translation)?;
                }
            }

            if gm_type >= WarpModelType::RotZoom {
                self.global_param(gm_type, ref_, 2)?;
                self.global_param(gm_type, ref_, 3)?;
                if gm_type == WarpModelType::Affine {
                    self.global_param(gm_type, ref_, 4)?;
                    self.global_param(gm_type, ref_, 5)?;
                }
            }

            if gm_type >= WarpModelType::Translation {
                self.global_param(gm_type, ref_, 0)?;
                self.global_param(gm_type, ref_, 1)?;
            }
        }

        Ok(())
    }

    /// Writes the subexponential code read by AV1 5.9.25. Global param syntax
    fn global_param(
        &mut self,
        gm_type: WarpModelType,
        ref_: usize,
        idx: usize,
    ) -> SynthesizerResult<()> {
        let precision =
            GlobalParamPrecision::new(gm_type, idx, self.obu.allow_high_precision_mv);
        let num_syms = 2 * precision.mx + 1;

        let mut code = self.obu.global_motion_params.gm_params[ref_][idx];
        if !(0..num_syms).contains(&code) {
            self.invalid_element_value("gm_params")?;
            code = code.clamp(0, num_syms - 1);
        }

        self.writer
            .write_subexp(u32::try_from(num_syms)?, u32::try_from(code)?)?;

        Ok(())
    }
}

impl<'o, 'a, W> Synthesizer<'o, CodedTileGroup<'a>, W>
where
    W: Write,
{
    /// Writes a complete TileGroupOBU, see AV1 5.11.1. `tile_info` is the one of the frame the
    /// tiles belong to.
    pub fn synthesize(
        obu: &'o CodedTileGroup<'a>,
        tile_info: &TileInfo,
        mut writer: W,
    ) -> SynthesizerResult<()> {
        let mut s = Synthesizer::new(&mut writer, obu);

        if obu.obu_header.obu_type != ObuType::TileGroup {
            s.invalid_element_value("obu_type")?;
        }

        s.obu_header(&obu.obu_header)?;

        if !obu.obu_header.has_size_field {
            return s.tile_group_obu(tile_info);
        }

        let mut buf = Vec::<u8>::new();
        let mut buffered = Synthesizer::new(&mut buf, obu);
        buffered.tile_group_obu(tile_info)?;
        drop(buffered);

        s.obu_size(u32::try_from(buf.len())?)?;
        drop(s);

        writer.write_all(&buf)?;

        Ok(())
    }

    fn tile_group_obu(&mut self, tile_info: &TileInfo) -> SynthesizerResult<()> {
        let obu = self.obu;
        let num_tiles = tile_info.num_tiles();

        if num_tiles > 1 {
            self.f(1, obu.tile_start_and_end_present_flag)?;
        }

        if num_tiles == 1 || !obu.tile_start_and_end_present_flag {
            if obu.tg_start != 0 || obu.tg_end + 1 != num_tiles {
                self.invalid_element_value("tile_start_and_end_present_flag")?;
            }
        } else {
            let tile_bits = (tile_info.tile_cols_log2 + tile_info.tile_rows_log2) as usize;
            self.f(tile_bits, obu.tg_start)?;
            self.f(tile_bits, obu.tg_end)?;
        }

        if obu.tg_start > obu.tg_end
            || obu.tiles.len() != (obu.tg_end - obu.tg_start + 1) as usize
        {
            self.invalid_element_value("tg_end")?;
            return Err(SynthesizerError::Unsupported);
        }

        self.byte_alignment()?;

        let size_bytes = tile_info.tile_size_bytes_minus_1 as usize + 1;
        let max_tile_size = 1u64 << (8 * size_bytes);
        let last = obu.tiles.len() - 1;

        for (i, tile) in obu.tiles.iter().enumerate() {
            if i != last {
                if tile.is_empty() || tile.len() as u64 > max_tile_size {
                    self.invalid_element_value("tile_size_minus_1")?;
                    return Err(SynthesizerError::Unsupported);
                }

                self.writer
                    .write_le(size_bytes, u32::try_from(tile.len() - 1)?)?;
            }

            self.writer.write_bytes(tile)?;
        }

        Ok(())
    }
}
