//! Tiling: walk a raster in interior blocks, each padded with a halo of
//! neighbouring cells so a kernel can look past its own tile's edge.
//! Only the interior rectangle is ever written back to the sink; any
//! mutation a stage makes to the halo is discarded.

use crate::raster::{RasterSink, RasterSource};

/// The interior rectangle a single tile owns, in raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub row0: usize,
    pub col0: usize,
    pub nrows: usize,
    pub ncols: usize,
}

impl TileBounds {
    #[inline]
    pub fn row1(&self) -> usize {
        self.row0 + self.nrows
    }

    #[inline]
    pub fn col1(&self) -> usize {
        self.col0 + self.ncols
    }
}

/// How a raster is divided into tiles. `Single` runs the whole raster as
/// one tile with no halo bookkeeping — both a fast path and the
/// reference case for the tiled/untiled equivalence property.
#[derive(Debug, Clone, Copy)]
pub enum Tiling {
    Chunked { chunk_size: usize, halo: usize },
    Single,
}

impl Tiling {
    pub fn halo(&self) -> usize {
        match self {
            Tiling::Chunked { halo, .. } => *halo,
            Tiling::Single => 0,
        }
    }
}

/// Iterates the interior `TileBounds` of a raster of size `width x height`
/// under a `Tiling` policy, row-major, left to right then top to bottom.
pub struct TileIterator {
    width: usize,
    height: usize,
    chunk_size: usize,
    next_row: usize,
    next_col: usize,
    done: bool,
}

impl TileIterator {
    pub fn new(width: usize, height: usize, tiling: Tiling) -> Self {
        let chunk_size = match tiling {
            Tiling::Chunked { chunk_size, .. } => chunk_size.max(1),
            Tiling::Single => width.max(height).max(1),
        };
        Self {
            width,
            height,
            chunk_size,
            next_row: 0,
            next_col: 0,
            done: width == 0 || height == 0,
        }
    }

    pub fn tile_count(width: usize, height: usize, tiling: Tiling) -> usize {
        if width == 0 || height == 0 {
            return 0;
        }
        let chunk_size = match tiling {
            Tiling::Chunked { chunk_size, .. } => chunk_size.max(1),
            Tiling::Single => width.max(height).max(1),
        };
        let tiles_x = (width + chunk_size - 1) / chunk_size;
        let tiles_y = (height + chunk_size - 1) / chunk_size;
        tiles_x * tiles_y
    }
}

impl Iterator for TileIterator {
    type Item = TileBounds;

    fn next(&mut self) -> Option<TileBounds> {
        if self.done {
            return None;
        }
        let row0 = self.next_row;
        let col0 = self.next_col;
        let nrows = self.chunk_size.min(self.height - row0);
        let ncols = self.chunk_size.min(self.width - col0);

        self.next_col += self.chunk_size;
        if self.next_col >= self.width {
            self.next_col = 0;
            self.next_row += self.chunk_size;
            if self.next_row >= self.height {
                self.done = true;
            }
        }

        Some(TileBounds { row0, col0, nrows, ncols })
    }
}

/// A tile's buffer: the interior plus a `halo`-cell border on every side,
/// addressed in local coordinates where `(halo, halo)` is the interior's
/// top-left cell. Local coordinates may be negative or beyond the
/// interior to reach into the halo.
pub struct Tile<T> {
    pub bounds: TileBounds,
    pub halo: usize,
    pub buf_width: usize,
    pub buf_height: usize,
    pub data: Vec<T>,
}

impl<T: Copy> Tile<T> {
    #[inline]
    fn buf_index(&self, local_row: isize, local_col: isize) -> usize {
        let r = (local_row + self.halo as isize) as usize;
        let c = (local_col + self.halo as isize) as usize;
        r * self.buf_width + c
    }

    #[inline]
    pub fn get(&self, local_row: isize, local_col: isize) -> T {
        self.data[self.buf_index(local_row, local_col)]
    }

    #[inline]
    pub fn set(&mut self, local_row: isize, local_col: isize, value: T) {
        let idx = self.buf_index(local_row, local_col);
        self.data[idx] = value;
    }

    /// Raster-global coordinates for a local coordinate pair.
    #[inline]
    pub fn to_global(&self, local_row: isize, local_col: isize) -> (isize, isize) {
        (
            self.bounds.row0 as isize + local_row,
            self.bounds.col0 as isize + local_col,
        )
    }
}

/// Reads the haloed buffer for `bounds` from `source`, padding with
/// `out_of_bounds` past the raster's edges.
pub fn read_tile<T: Copy>(
    source: &dyn RasterSource<T>,
    bounds: TileBounds,
    halo: usize,
    out_of_bounds: T,
) -> Tile<T> {
    let buf_width = bounds.ncols + 2 * halo;
    let buf_height = bounds.nrows + 2 * halo;
    let data = source.read_window(
        bounds.row0 as isize - halo as isize,
        bounds.col0 as isize - halo as isize,
        buf_height,
        buf_width,
        out_of_bounds,
    );
    Tile {
        bounds,
        halo,
        buf_width,
        buf_height,
        data,
    }
}

/// Writes only the interior of `tile` back to `sink`.
pub fn write_interior<T: Copy>(sink: &mut dyn RasterSink<T>, tile: &Tile<T>) {
    let mut interior = Vec::with_capacity(tile.bounds.nrows * tile.bounds.ncols);
    for r in 0..tile.bounds.nrows as isize {
        for c in 0..tile.bounds.ncols as isize {
            interior.push(tile.get(r, c));
        }
    }
    sink.write_window(tile.bounds.row0, tile.bounds.col0, tile.bounds.nrows, tile.bounds.ncols, &interior);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::MemRaster;

    #[test]
    fn iterator_covers_every_cell_exactly_once() {
        let tiling = Tiling::Chunked { chunk_size: 3, halo: 1 };
        let mut covered = vec![false; 7 * 5];
        let mut count = 0;
        for b in TileIterator::new(5, 7, tiling) {
            count += 1;
            for r in b.row0..b.row1() {
                for c in b.col0..b.col1() {
                    assert!(!covered[r * 5 + c], "cell ({r},{c}) covered twice");
                    covered[r * 5 + c] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
        assert_eq!(count, TileIterator::tile_count(5, 7, tiling));
    }

    #[test]
    fn halo_reads_past_raster_edge_as_sentinel() {
        let r = MemRaster::new(4, 4, 1.0f32, Some(-1.0));
        let bounds = TileBounds { row0: 0, col0: 0, nrows: 2, ncols: 2 };
        let tile = read_tile(&r, bounds, 1, -1.0);
        assert_eq!(tile.get(-1, -1), -1.0);
        assert_eq!(tile.get(0, 0), 1.0);
    }

    #[test]
    fn write_interior_only_touches_interior_cells() {
        let mut sink = MemRaster::new(4, 4, 0.0f32, Some(-1.0));
        let source = MemRaster::new(4, 4, 5.0f32, Some(-1.0));
        let bounds = TileBounds { row0: 1, col0: 1, nrows: 2, ncols: 2 };
        let mut tile = read_tile(&source, bounds, 1, -1.0);
        // Mutate the halo; it must not leak into the sink.
        tile.set(-1, -1, 99.0);
        write_interior(&mut sink, &tile);
        assert_eq!(sink.get_direct(0, 0), 0.0);
        assert_eq!(sink.get_direct(1, 1), 5.0);
    }
}
