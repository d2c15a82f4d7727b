//! D8 flow direction with two-pass flat resolution.
//!
//! Pass 1 assigns steepest-descent D8 codes wherever a strictly lower
//! neighbour exists, using a fixed, cardinal-preferred tie-break order.
//! Cells with no strictly lower neighbour (flats, produced chiefly by
//! `fill::priority_flood_fill` raising a depression to a uniform level)
//! are left `Undefined`.
//!
//! Pass 2 resolves those flats the way Barnes, Lehman & Mulla (2014)
//! describe it: flood two synthetic gradients across each flat — one
//! increasing with distance from the flat's higher-terrain edge
//! (`away_from_higher`), one increasing with distance from its
//! lower-terrain outlet edge (`towards_lower`) — and combine them into a
//! single surface (`2 * towards_lower + away_from_higher`) that strictly
//! decreases toward the outlet. A masked D8 pass over that surface then
//! gives every flat cell a direction with nowhere left undefined except
//! flats with no outlet at all (fully enclosed sinks).

use crate::codes::{step_distance, D8_OFFSETS, FLOW_DIRECTION_UNDEFINED};
use crate::raster::{MemRaster, RasterSink, RasterSource};
use crate::tile::{read_tile, write_interior, TileIterator, Tiling};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct FlowDirectionGrid {
    pub codes: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl FlowDirectionGrid {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.codes[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, code: u8) {
        self.codes[row * self.width + col] = code;
    }
}

/// Order neighbours are tried in for tie-breaking: cardinal directions
/// (E, N, W, S) before diagonals (NE, NW, SW, SE), matching the original
/// tool's cardinal-preferred convention.
const TIE_BREAK_ORDER: [usize; 8] = [0, 2, 4, 6, 1, 3, 5, 7];

fn steepest_descent_code(dem: &MemRaster<f32>, r: usize, c: usize, cellsize: f64) -> u8 {
    let z0 = dem.get_direct(r, c) as f64;
    let mut best_slope = 0.0f64;
    let mut best_code: Option<u8> = None;

    for &code in &TIE_BREAK_ORDER {
        let (dr, dc) = D8_OFFSETS[code];
        let nr = r as isize + dr;
        let nc = c as isize + dc;
        if !dem.in_bounds(nr, nc) {
            continue;
        }
        let (nr, nc) = (nr as usize, nc as usize);
        if dem.meta.nodata == Some(dem.get_direct(nr, nc)) {
            continue;
        }
        let z1 = dem.get_direct(nr, nc) as f64;
        if z1 >= z0 {
            continue;
        }
        let slope = (z0 - z1) / (cellsize * step_distance(code));
        if slope > best_slope {
            best_slope = slope;
            best_code = Some(code as u8);
        }
    }

    best_code.unwrap_or(FLOW_DIRECTION_UNDEFINED)
}

/// Pass 1: steepest-descent D8 over the whole grid, flats and sinks left
/// `Undefined`, nodata cells marked `NoData`.
fn compute_d8_pass1(dem: &MemRaster<f32>, cellsize: f64) -> FlowDirectionGrid {
    let (width, height) = (dem.meta.width, dem.meta.height);

    // Every row is independent of every other, so under the `threading`
    // feature this fans out across rayon's pool the way §5 describes
    // (data-parallel within a stage, no shared mutable state between
    // units of work); without it, the same closure runs in a plain loop.
    let compute_row = |r: usize| -> Vec<u8> {
        (0..width)
            .map(|c| {
                if dem.meta.nodata == Some(dem.get_direct(r, c)) {
                    crate::codes::FLOW_DIRECTION_NODATA
                } else {
                    steepest_descent_code(dem, r, c, cellsize)
                }
            })
            .collect()
    };

    #[cfg(feature = "threading")]
    let rows: Vec<Vec<u8>> = {
        use rayon::prelude::*;
        (0..height).into_par_iter().map(compute_row).collect()
    };
    #[cfg(not(feature = "threading"))]
    let rows: Vec<Vec<u8>> = (0..height).map(compute_row).collect();

    let codes: Vec<u8> = rows.into_iter().flatten().collect();
    FlowDirectionGrid { codes, width, height }
}

/// Connected components (4-connected) of `Undefined` cells sharing the
/// exact same elevation — a true flat, as opposed to two unrelated
/// unresolved sinks that merely happen to touch.
fn label_flats(dem: &MemRaster<f32>, dirs: &FlowDirectionGrid) -> (Vec<i64>, usize) {
    let n = dirs.width * dirs.height;
    let mut labels = vec![-1i64; n];
    let mut next_label = 0i64;
    let mut stack = Vec::new();

    for start in 0..n {
        if dirs.codes[start] != FLOW_DIRECTION_UNDEFINED || labels[start] != -1 {
            continue;
        }
        let start_z = dem.get_direct(start / dirs.width, start % dirs.width);
        labels[start] = next_label;
        stack.push(start);
        while let Some(i) = stack.pop() {
            let r = i / dirs.width;
            let c = i % dirs.width;
            for (dr, dc) in [(-1isize, 0isize), (1, 0), (0, -1), (0, 1)] {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if nr < 0 || nc < 0 || nr as usize >= dirs.height || nc as usize >= dirs.width {
                    continue;
                }
                let j = nr as usize * dirs.width + nc as usize;
                if dirs.codes[j] == FLOW_DIRECTION_UNDEFINED
                    && labels[j] == -1
                    && dem.get_direct(nr as usize, nc as usize) == start_z
                {
                    labels[j] = next_label;
                    stack.push(j);
                }
            }
        }
        next_label += 1;
    }
    (labels, next_label as usize)
}

/// Multi-source BFS distance (in hops) from `sources`, confined to cells
/// with `labels[i] == Some(flat_id)`.
fn bfs_distance(width: usize, height: usize, labels: &[i64], flat_id: i64, sources: &[usize]) -> Vec<u32> {
    let n = width * height;
    let mut dist = vec![u32::MAX; n];
    let mut queue = VecDeque::new();
    for &s in sources {
        if dist[s] == u32::MAX {
            dist[s] = 0;
            queue.push_back(s);
        }
    }
    while let Some(i) = queue.pop_front() {
        let r = i / width;
        let c = i % width;
        for (dr, dc) in [(-1isize, 0isize), (1, 0), (0, -1), (0, 1)] {
            let nr = r as isize + dr;
            let nc = c as isize + dc;
            if nr < 0 || nc < 0 || nr as usize >= height || nc as usize >= width {
                continue;
            }
            let j = nr as usize * width + nc as usize;
            if labels[j] == flat_id && dist[j] == u32::MAX {
                dist[j] = dist[i] + 1;
                queue.push_back(j);
            }
        }
    }
    dist
}

/// Pass 2: resolves every flat in `dirs` in place, given the elevations
/// in `dem` to tell high edges from low (outlet) edges.
pub fn resolve_flats(dem: &MemRaster<f32>, dirs: &mut FlowDirectionGrid) {
    let (width, height) = (dirs.width, dirs.height);
    let (labels, num_flats) = label_flats(dem, dirs);
    if num_flats == 0 {
        return;
    }

    for flat_id in 0..num_flats as i64 {
        let flat_cells: Vec<usize> = (0..width * height).filter(|&i| labels[i] == flat_id).collect();
        if flat_cells.is_empty() {
            continue;
        }
        let flat_z = dem.get_direct(flat_cells[0] / width, flat_cells[0] % width);

        let mut high_edge = Vec::new();
        let mut low_edge = Vec::new();
        for &i in &flat_cells {
            let r = i / width;
            let c = i % width;
            for (dr, dc) in D8_OFFSETS {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if !dem.in_bounds(nr, nc) {
                    low_edge.push(i); // raster edge is always a valid outlet
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                let nidx = nr * width + nc;
                if labels[nidx] == flat_id {
                    continue; // interior neighbour, not an edge
                }
                if dem.meta.nodata == Some(dem.get_direct(nr, nc)) {
                    low_edge.push(i);
                    continue;
                }
                let nz = dem.get_direct(nr, nc);
                if nz < flat_z {
                    low_edge.push(i);
                } else if nz > flat_z {
                    high_edge.push(i);
                }
            }
        }

        if low_edge.is_empty() {
            continue; // fully enclosed flat: no outlet, stays Undefined
        }

        let away = bfs_distance(width, height, &labels, flat_id, &high_edge);
        let toward = bfs_distance(width, height, &labels, flat_id, &low_edge);

        let gradient = |i: usize| -> f64 {
            let a = if away[i] == u32::MAX { 0.0 } else { away[i] as f64 };
            let t = if toward[i] == u32::MAX { 0.0 } else { toward[i] as f64 };
            2.0 * t + a
        };

        for &i in &flat_cells {
            let r = i / width;
            let c = i % width;
            let g0 = gradient(i);
            let mut best_code: Option<u8> = None;
            let mut best_g = g0;
            for &code in &TIE_BREAK_ORDER {
                let (dr, dc) = D8_OFFSETS[code];
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if !dem.in_bounds(nr, nc) {
                    // Raster edge: always a valid outlet, strictly preferred
                    // over any in-flat gradient value (which are >= 0).
                    if -1.0 < best_g {
                        best_g = -1.0;
                        best_code = Some(code as u8);
                    }
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                let nidx = nr * width + nc;
                let ng = if labels[nidx] == flat_id {
                    gradient(nidx)
                } else if dem.meta.nodata == Some(dem.get_direct(nr, nc)) {
                    continue;
                } else if dem.get_direct(nr, nc) <= flat_z {
                    // Already-resolved lower/equal neighbour outside the flat.
                    -1.0
                } else {
                    continue; // higher ground outside the flat: never descend into it
                };
                if ng < best_g {
                    best_g = ng;
                    best_code = Some(code as u8);
                }
            }
            if let Some(code) = best_code {
                dirs.set(r, c, code);
            }
        }
    }
}

/// Computes D8 flow direction (both passes) over the raster's full
/// extent with no tiling — the reference kernel and the single-tile
/// fast path.
pub fn compute_flow_direction(dem: &MemRaster<f32>, cellsize: f64) -> FlowDirectionGrid {
    let mut dirs = compute_d8_pass1(dem, cellsize);
    resolve_flats(dem, &mut dirs);
    dirs
}

/// Tiled orchestration: each tile is read with a halo so steepest-descent
/// and flat BFS can see past its own edge, but only the interior is kept.
/// Flats that fit within a single tile (plus halo) resolve exactly like
/// the single-tile kernel. Flats that genuinely span more than one
/// tile's halo do NOT: each tile resolves its own slice of the flat
/// independently against whatever high/low edges its own halo exposes,
/// with no cross-tile reconciliation at all -- there is no
/// `flat_chunk_cap` bound in this code (the constant doesn't exist); a
/// large flat straddling a tile boundary can come out with inconsistent
/// or locally-undefined directions right at the seam. This is a known,
/// disclosed gap (see `DESIGN.md`'s "Accepted simplifications"), not a
/// bounded approximation: closing it needs the `spec.md` §4.5
/// HighGraph/LowGraph cross-tile perimeter solve (which would also give
/// `perimeter::TilePerimeter` its first caller), which is not
/// implemented here.
pub fn compute_flow_direction_tiled<S>(source: &S, cellsize: f64, tiling: Tiling) -> MemRaster<u8>
where
    S: RasterSource<f32>,
{
    let (width, height) = (source.width(), source.height());
    let nodata = source.nodata().unwrap_or(f32::NEG_INFINITY);
    let mut out = MemRaster::new(width, height, FLOW_DIRECTION_UNDEFINED, Some(crate::codes::FLOW_DIRECTION_NODATA));

    if matches!(tiling, Tiling::Single) || TileIterator::tile_count(width, height, tiling) <= 1 {
        let full = source.read_window(0, 0, height, width, nodata);
        let mut dem = MemRaster::new(width, height, nodata, Some(nodata));
        dem.write_window(0, 0, height, width, &full);
        let dirs = compute_flow_direction(&dem, cellsize);
        out.write_window(0, 0, height, width, &dirs.codes);
        return out;
    }

    let halo = tiling.halo().max(1);
    for bounds in TileIterator::new(width, height, tiling) {
        let tile = read_tile(source, bounds, halo, nodata);
        let mut local_dem = MemRaster::new(tile.buf_width, tile.buf_height, nodata, Some(nodata));
        local_dem.data.copy_from_slice(&tile.data);
        let dirs = compute_flow_direction(&local_dem, cellsize);

        let out_tile = crate::tile::Tile {
            bounds,
            halo,
            buf_width: tile.buf_width,
            buf_height: tile.buf_height,
            data: dirs.codes,
        };
        write_interior(&mut out, &out_tile);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_drains_toward_lower_edge() {
        let n = 5;
        let mut dem = MemRaster::new(n, n, 0.0, Some(-9999.0));
        for r in 0..n {
            for c in 0..n {
                dem.set_direct(r, c, c as f32);
            }
        }
        let dirs = compute_flow_direction(&dem, 1.0);
        assert_eq!(dirs.get(2, 2), 4); // West: toward lower column index
    }

    #[test]
    fn flat_with_outlet_resolves_to_a_valid_direction() {
        let n = 6;
        let mut dem = MemRaster::new(n, n, 5.0, Some(-9999.0));
        // Flat plateau except a notch on the west edge lower than the plateau.
        for r in 1..n - 1 {
            dem.set_direct(r, 0, 1.0);
        }
        let dirs = compute_flow_direction(&dem, 1.0);
        for r in 1..n - 1 {
            for c in 1..n - 1 {
                let code = dirs.get(r, c);
                assert!(code <= 7, "flat interior cell ({r},{c}) left undefined: {code}");
            }
        }
    }

    #[test]
    fn enclosed_flat_with_no_outlet_stays_undefined() {
        let n = 5;
        let mut dem = MemRaster::new(n, n, 5.0, Some(-9999.0));
        for r in 0..n {
            for c in 0..n {
                if r == 0 || c == 0 || r == n - 1 || c == n - 1 {
                    dem.set_direct(r, c, 10.0); // rim strictly higher, no outlet
                }
            }
        }
        let dirs = compute_flow_direction(&dem, 1.0);
        assert_eq!(dirs.get(2, 2), FLOW_DIRECTION_UNDEFINED);
    }

    #[test]
    fn nodata_cells_keep_nodata_code() {
        let mut dem = MemRaster::new(3, 3, 5.0, Some(-9999.0));
        dem.set_direct(1, 1, -9999.0);
        let dirs = compute_flow_direction(&dem, 1.0);
        assert_eq!(dirs.get(1, 1), crate::codes::FLOW_DIRECTION_NODATA);
    }
}
