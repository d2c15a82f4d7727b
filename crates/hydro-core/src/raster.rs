//! Raster abstraction: THE CORE's only contract with storage. Concrete
//! file-backed rasters (GeoTIFF, a flat binary format, ...) live outside
//! this crate; `MemRaster` is the in-memory reference implementation used
//! by every stage's tests and by the tiled/untiled equivalence property.

use serde::{Deserialize, Serialize};

/// Affine georeferencing, GDAL's 6-parameter convention:
/// `x = origin_x + col * px_w + row * rot1`
/// `y = origin_y + col * rot2 + row * px_h`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub px_w: f64,
    pub rot1: f64,
    pub origin_y: f64,
    pub rot2: f64,
    pub px_h: f64,
}

impl GeoTransform {
    /// An axis-aligned transform with the given pixel size (px_h is
    /// negative, matching north-up rasters).
    pub fn axis_aligned(origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        Self {
            origin_x,
            px_w: pixel_size,
            rot1: 0.0,
            origin_y,
            rot2: 0.0,
            px_h: -pixel_size,
        }
    }

    pub fn identity() -> Self {
        Self::axis_aligned(0.0, 0.0, 1.0)
    }

    #[inline]
    pub fn pixel_size_x(&self) -> f64 {
        self.px_w.abs()
    }

    #[inline]
    pub fn pixel_size_y(&self) -> f64 {
        self.px_h.abs()
    }

    /// Geographic (or projected) coordinate of the center of cell (row, col).
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.origin_x + c * self.px_w + r * self.rot1,
            self.origin_y + c * self.rot2 + r * self.px_h,
        )
    }
}

/// Metadata shared by every raster: dimensions, nodata sentinel,
/// georeferencing, and whether coordinates are geographic (lon/lat) as
/// opposed to a projected CRS.
#[derive(Debug, Clone)]
pub struct RasterMeta<T> {
    pub width: usize,
    pub height: usize,
    pub nodata: Option<T>,
    pub geotransform: GeoTransform,
    pub is_geographic: bool,
}

/// Read-only windowed access to a raster of cell type `T`.
pub trait RasterSource<T: Copy> {
    fn meta(&self) -> &RasterMeta<T>;

    #[inline]
    fn width(&self) -> usize {
        self.meta().width
    }

    #[inline]
    fn height(&self) -> usize {
        self.meta().height
    }

    #[inline]
    fn nodata(&self) -> Option<T> {
        self.meta().nodata
    }

    /// Reads a `nrows x ncols` window starting at (row0, col0) in
    /// row-major order. Cells outside the raster extent are filled with
    /// `nodata` (or `T::default` behavior supplied by the caller via
    /// `out_of_bounds`) rather than erroring, so callers can request
    /// halo windows near raster edges.
    fn read_window(&self, row0: isize, col0: isize, nrows: usize, ncols: usize, out_of_bounds: T) -> Vec<T>;
}

/// Write-only windowed access. `write_window` writes the interior of a
/// tile back; it must never be called with coordinates outside the
/// raster extent.
pub trait RasterSink<T: Copy> {
    fn write_window(&mut self, row0: usize, col0: usize, nrows: usize, ncols: usize, data: &[T]);

    #[inline]
    fn set(&mut self, row: usize, col: usize, value: T) {
        self.write_window(row, col, 1, 1, &[value]);
    }
}

/// A row-major in-memory raster. The reference implementation backing
/// every unit test and the tiled/untiled equivalence property.
#[derive(Debug, Clone)]
pub struct MemRaster<T> {
    pub data: Vec<T>,
    pub meta: RasterMeta<T>,
}

impl<T: Copy> MemRaster<T> {
    pub fn new(width: usize, height: usize, fill: T, nodata: Option<T>) -> Self {
        Self {
            data: vec![fill; width * height],
            meta: RasterMeta {
                width,
                height,
                nodata,
                geotransform: GeoTransform::identity(),
                is_geographic: false,
            },
        }
    }

    pub fn with_geotransform(mut self, gt: GeoTransform, is_geographic: bool) -> Self {
        self.meta.geotransform = gt;
        self.meta.is_geographic = is_geographic;
        self
    }

    #[inline]
    pub fn get_direct(&self, row: usize, col: usize) -> T {
        self.data[row * self.meta.width + col]
    }

    #[inline]
    pub fn set_direct(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.meta.width + col] = value;
    }

    pub fn in_bounds(&self, row: isize, col: isize) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.meta.height && (col as usize) < self.meta.width
    }
}

impl<T: Copy> RasterSource<T> for MemRaster<T> {
    fn meta(&self) -> &RasterMeta<T> {
        &self.meta
    }

    fn read_window(&self, row0: isize, col0: isize, nrows: usize, ncols: usize, out_of_bounds: T) -> Vec<T> {
        let mut out = Vec::with_capacity(nrows * ncols);
        for dr in 0..nrows as isize {
            for dc in 0..ncols as isize {
                let r = row0 + dr;
                let c = col0 + dc;
                if self.in_bounds(r, c) {
                    out.push(self.get_direct(r as usize, c as usize));
                } else {
                    out.push(out_of_bounds);
                }
            }
        }
        out
    }
}

impl<T: Copy> RasterSink<T> for MemRaster<T> {
    fn write_window(&mut self, row0: usize, col0: usize, nrows: usize, ncols: usize, data: &[T]) {
        debug_assert_eq!(data.len(), nrows * ncols);
        for dr in 0..nrows {
            for dc in 0..ncols {
                let r = row0 + dr;
                let c = col0 + dc;
                if r < self.meta.height && c < self.meta.width {
                    self.set_direct(r, c, data[dr * ncols + dc]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_window_fills_out_of_bounds_with_sentinel() {
        let r = MemRaster::new(2, 2, 5.0f32, Some(-9999.0));
        let w = r.read_window(-1, -1, 3, 3, -9999.0);
        assert_eq!(w[0], -9999.0); // (-1,-1)
        assert_eq!(w[4], 5.0); // (0,0) -> center of 3x3
    }

    #[test]
    fn write_window_clips_to_extent() {
        let mut r = MemRaster::new(2, 2, 0u8, None);
        r.write_window(1, 1, 2, 2, &[9, 9, 9, 9]);
        assert_eq!(r.get_direct(1, 1), 9);
    }

    #[test]
    fn cell_center_matches_axis_aligned_transform() {
        let gt = GeoTransform::axis_aligned(0.0, 10.0, 1.0);
        let (x, y) = gt.cell_center(0, 0);
        assert!((x - 0.5).abs() < 1e-9);
        assert!((y - 9.5).abs() < 1e-9);
    }
}
