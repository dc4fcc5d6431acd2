// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::anyhow;
use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::codec::av1::helpers;
use crate::codec::av1::obu::FrameHeaderObu;
use crate::codec::av1::obu::SequenceHeaderObu;
use crate::codec::av1::obu::TileGroupObu;
use crate::codec::av1::obu::MAX_TILE_AREA;
use crate::codec::av1::obu::MAX_TILE_COLS;
use crate::codec::av1::obu::MAX_TILE_ROWS;
use crate::codec::av1::obu::MAX_TILE_WIDTH;

/// Maximum number of tiles a tile group may describe.
pub const MAX_TILES: usize = 128;

/// Location and extent of one tile of a tile group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileGroupInfo {
    /// Offset of the tile group data in the buffer backing the OBU.
    pub tile_group_offset: usize,
    /// Offset of the tile payload, relative to `tile_group_offset`.
    pub tile_offset: usize,
    pub tile_size: usize,
    pub tile_row: u32,
    pub tile_col: u32,
    pub tile_width_sb: u32,
    pub tile_height_sb: u32,
}

/// The superblock grid of a frame and the tiling limits derived from it, see 5.9.15.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuperblockGrid {
    pub sb_cols: u32,
    pub sb_rows: u32,
    /// Log2 of the superblock size in luma samples.
    pub sb_size_log2: u32,
}

impl SuperblockGrid {
    pub fn new(width: u32, height: u32, use_128x128_superblock: bool) -> Self {
        let mi_cols = 2 * ((width + 7) >> 3);
        let mi_rows = 2 * ((height + 7) >> 3);

        if use_128x128_superblock {
            Self {
                sb_cols: (mi_cols + 31) >> 5,
                sb_rows: (mi_rows + 31) >> 5,
                sb_size_log2: 7,
            }
        } else {
            Self {
                sb_cols: (mi_cols + 15) >> 4,
                sb_rows: (mi_rows + 15) >> 4,
                sb_size_log2: 6,
            }
        }
    }

    /// The grid of the largest frame allowed by `sequence`.
    pub fn from_sequence(sequence: &SequenceHeaderObu) -> Self {
        Self::new(
            sequence.max_frame_width_minus_1 + 1,
            sequence.max_frame_height_minus_1 + 1,
            sequence.use_128x128_superblock,
        )
    }

    pub fn max_tile_width_sb(&self) -> u32 {
        MAX_TILE_WIDTH >> self.sb_size_log2
    }

    pub fn max_tile_area_sb(&self) -> u32 {
        MAX_TILE_AREA >> (2 * self.sb_size_log2)
    }

    pub fn min_log2_tile_cols(&self) -> u32 {
        helpers::tile_log2(self.max_tile_width_sb(), self.sb_cols)
    }

    pub fn max_log2_tile_cols(&self) -> u32 {
        helpers::tile_log2(1, std::cmp::min(self.sb_cols, MAX_TILE_COLS as u32))
    }

    pub fn max_log2_tile_rows(&self) -> u32 {
        helpers::tile_log2(1, std::cmp::min(self.sb_rows, MAX_TILE_ROWS as u32))
    }

    pub fn min_log2_tiles(&self) -> u32 {
        std::cmp::max(
            self.min_log2_tile_cols(),
            helpers::tile_log2(self.max_tile_area_sb(), self.sb_rows * self.sb_cols),
        )
    }

    /// Size in superblocks of all but the last tile when `log2` uniform tiles span `sbs`.
    pub fn uniform_tile_size(sbs: u32, log2: u32) -> u32 {
        (sbs + (1 << log2) - 1) >> log2
    }
}

/// Computes the position and size of every tile in `tile_group`.
///
/// The size of each tile but the last is read from the tile data. The last tile uses all the
/// remaining data.
pub fn compute_tile_info(
    sequence: &SequenceHeaderObu,
    header: &FrameHeaderObu,
    tile_group: &TileGroupObu,
) -> anyhow::Result<Vec<TileGroupInfo>> {
    let tile_info = &header.tile_info;

    let data = tile_group.tile_data().ok_or(anyhow!(
        "Tile data {}+{} is out of the {} bytes buffer",
        tile_group.tile_data_offset,
        tile_group.tile_data_size,
        tile_group.data.len()
    ))?;

    if tile_info.tile_cols == 0
        || tile_info.tile_rows == 0
        || tile_info.tile_cols as usize > MAX_TILE_COLS
        || tile_info.tile_rows as usize > MAX_TILE_ROWS
        || 1usize.checked_shl(tile_info.tile_cols_log2).map_or(true, |n| n > MAX_TILE_COLS)
        || 1usize.checked_shl(tile_info.tile_rows_log2).map_or(true, |n| n > MAX_TILE_ROWS)
    {
        return Err(anyhow!(
            "Invalid tile layout {}x{} (log2 {}x{})",
            tile_info.tile_cols,
            tile_info.tile_rows,
            tile_info.tile_cols_log2,
            tile_info.tile_rows_log2
        ));
    }

    if tile_group.tg_start > tile_group.tg_end || tile_group.tg_end >= tile_info.num_tiles() {
        return Err(anyhow!(
            "Invalid tile group range {}..={} for {} tiles",
            tile_group.tg_start,
            tile_group.tg_end,
            tile_info.num_tiles()
        ));
    }

    let num_tiles = (tile_group.tg_end - tile_group.tg_start + 1) as usize;
    if num_tiles > MAX_TILES {
        return Err(anyhow!("Tile group has too many tiles: {}", num_tiles));
    }

    let grid = SuperblockGrid::from_sequence(sequence);
    let tile_width_sb = SuperblockGrid::uniform_tile_size(grid.sb_cols, tile_info.tile_cols_log2);
    let tile_height_sb =
        SuperblockGrid::uniform_tile_size(grid.sb_rows, tile_info.tile_rows_log2);
    let size_bytes = tile_info.tile_size_bytes_minus_1 as usize + 1;

    let mut tiles = Vec::with_capacity(num_tiles);
    let mut pos = 0;

    for tile_num in tile_group.tg_start..=tile_group.tg_end {
        let tile_row = tile_num / tile_info.tile_cols;
        let tile_col = tile_num % tile_info.tile_cols;

        let tile_size = if tile_num == tile_group.tg_end {
            data.len() - pos
        } else {
            let bytes_left = data.len() - pos;
            if bytes_left < size_bytes {
                return Err(anyhow!(
                    "Tile {} size field needs {} bytes, {} left",
                    tile_num,
                    size_bytes,
                    bytes_left
                ));
            }

            let tile_size_minus_1 = LittleEndian::read_uint(&data[pos..], size_bytes) as usize;
            pos += size_bytes;

            if tile_size_minus_1 >= data.len() - pos {
                return Err(anyhow!(
                    "Tile {} has size {} but only {} bytes are left",
                    tile_num,
                    tile_size_minus_1 + 1,
                    data.len() - pos
                ));
            }

            tile_size_minus_1 + 1
        };

        let (tile_width_sb, tile_height_sb) = if tile_info.uniform_tile_spacing_flag {
            let width = if tile_col == tile_info.tile_cols - 1 {
                grid.sb_cols.saturating_sub(tile_col * tile_width_sb)
            } else {
                tile_width_sb
            };

            let height = if tile_row == tile_info.tile_rows - 1 {
                grid.sb_rows.saturating_sub(tile_row * tile_height_sb)
            } else {
                tile_height_sb
            };

            (width, height)
        } else {
            (
                tile_info.width_in_sbs_minus_1[tile_col as usize] + 1,
                tile_info.height_in_sbs_minus_1[tile_row as usize] + 1,
            )
        };

        let tile = TileGroupInfo {
            tile_group_offset: tile_group.tile_data_offset,
            tile_offset: pos,
            tile_size,
            tile_row,
            tile_col,
            tile_width_sb,
            tile_height_sb,
        };

        log::trace!("Tile {}: {:?}", tile_num, tile);

        tiles.push(tile);
        pos += tile_size;
    }

    Ok(tiles)
}
