//! Tiled hydrological terrain analysis engine.
//!
//! Seven pipeline stages - breach, fill, flow direction, accumulation,
//! basins, streams, flow length - are independent and composable; a
//! typical run chains `breach -> fill -> flow_direction -> accumulation ->
//! {streams, basins, flow_length}` by handing the output raster of one
//! stage to the next. Each stage function here is a thin wrapper around
//! the module that owns its algorithm, attaching progress reporting at the
//! orchestrator boundary the way a caller chaining several stages expects.

pub mod accumulation;
pub mod basins;
pub mod breach;
pub mod codes;
pub mod error;
pub mod fill;
pub mod flow_direction;
pub mod flow_length;
pub mod global_state;
pub mod perimeter;
pub mod pq;
pub mod progress;
pub mod raster;
pub mod streams;
pub mod tile;

use basins::{BasinLabels, DrainagePoint};
use breach::{BreachParams, BreachStats};
use error::HydroResult;
use fill::{FillParams, FillStats};
use flow_direction::FlowDirectionGrid;
use flow_length::{FlowLengthParams, FlowLengthResult};
use progress::{ProgressCallback, ProgressTracker};
use raster::{MemRaster, RasterSource};
use streams::{JunctionFeature, StreamFeature};
use tile::Tiling;

/// Breaches every pit in `dem` in place.
///
/// `chunk_size <= 1` in `params` has no tiled counterpart yet (see
/// `DESIGN.md`): breaching always runs over the whole grid, the same
/// kernel a tiled caller would get as its single-tile fast path.
pub fn breach(dem: &mut MemRaster<f32>, params: &BreachParams, progress: Option<&mut ProgressCallback<'_>>) -> BreachStats {
    let mut tracker = ProgressTracker::new(progress, "breach", 1);
    tracker.update(1, "breach_pits", None, 0.0);
    let stats = breach::breach_pits(dem, params);
    tracker.update(1, "breach_pits", Some("done"), 1.0);
    stats
}

/// Fills every depression in `source`, writing the conditioned DEM to `sink`.
pub fn fill<S>(source: &S, sink: &mut MemRaster<f32>, params: &FillParams, progress: Option<&mut ProgressCallback<'_>>) -> FillStats
where
    S: RasterSource<f32>,
{
    let mut tracker = ProgressTracker::new(progress, "fill", 1);
    tracker.update(1, "priority_flood", None, 0.0);
    let stats = fill::fill_depressions(source, sink, params);
    tracker.update(1, "priority_flood", Some("done"), 1.0);
    stats
}

/// Computes D8 flow direction (with flat resolution) over `source`.
pub fn flow_direction<S>(source: &S, cellsize: f64, tiling: Tiling, progress: Option<&mut ProgressCallback<'_>>) -> MemRaster<u8>
where
    S: RasterSource<f32>,
{
    let mut tracker = ProgressTracker::new(progress, "flow_direction", 1);
    tracker.update(1, "d8_and_flats", None, 0.0);
    let dirs = flow_direction::compute_flow_direction_tiled(source, cellsize, tiling);
    tracker.update(1, "d8_and_flats", Some("done"), 1.0);
    dirs
}

/// Computes flow accumulation over `dirs_source`.
pub fn accumulation(dirs_source: &MemRaster<u8>, tiling: Tiling, progress: Option<&mut ProgressCallback<'_>>) -> MemRaster<u32> {
    let mut tracker = ProgressTracker::new(progress, "accumulation", 1);
    tracker.update(1, "join_count", None, 0.0);
    let fac = accumulation::compute_accumulation_tiled(dirs_source, tiling);
    tracker.update(1, "join_count", Some("done"), 1.0);
    fac
}

/// Labels every cell in `dirs` with the drainage point its downstream
/// chain terminates at.
///
/// `all_basins` controls what happens to cells no drainage point's
/// search reaches (zeroed when `false`, folded into synthetic
/// pseudo-basins when `true`); `fac`/`snap_radius` optionally snap every
/// point onto the nearest higher-accumulation cell before the search
/// runs. See `basins::delineate_basins`.
pub fn basins(
    dirs: &FlowDirectionGrid,
    points: &[DrainagePoint],
    all_basins: bool,
    fac: Option<&[u32]>,
    snap_radius: usize,
    progress: Option<&mut ProgressCallback<'_>>,
) -> HydroResult<BasinLabels> {
    let mut tracker = ProgressTracker::new(progress, "basins", 1);
    tracker.update(1, "upstream_bfs", None, 0.0);
    let result = basins::delineate_basins(dirs, points, all_basins, fac, snap_radius);
    tracker.update(1, "upstream_bfs", Some("done"), 1.0);
    result
}

/// Extracts a stream network from `fac`/`dirs` at `threshold`, returning
/// the traced polylines and the synthesized downstream junctions.
///
/// `tiling` is accepted to match the other stages' tiled entry points;
/// `spec.md` §4.8 describes no cross-tile stream-tracing algorithm, so a
/// chunked `tiling` currently runs the identical whole-grid trace (see
/// `DESIGN.md`).
pub fn streams(
    dirs: &FlowDirectionGrid,
    fac: &[u32],
    threshold: u32,
    _tiling: Tiling,
    progress: Option<&mut ProgressCallback<'_>>,
) -> (Vec<StreamFeature>, Vec<JunctionFeature>) {
    let mut tracker = ProgressTracker::new(progress, "streams", 3);
    tracker.update(1, "mask", None, 0.0);
    let mask = streams::stream_mask(fac, threshold);
    tracker.update(2, "nodes_and_trace", None, 0.33);
    let nodes = streams::find_node_cells(dirs, &mask);
    let lines = streams::draw_lines(dirs, &mask, &nodes);
    tracker.update(3, "junctions", None, 0.67);
    let junctions = streams::add_downstream_junctions(&lines);
    tracker.update(3, "junctions", Some("done"), 1.0);
    (lines, junctions)
}

/// Computes upstream flow length from every drainage point in `points`.
///
/// `fac`/`snap_radius` snap every point the same way `basins` does,
/// before the upstream search runs.
pub fn flow_length(
    dirs: &FlowDirectionGrid,
    points: &[DrainagePoint],
    params: &FlowLengthParams,
    fac: Option<&[u32]>,
    snap_radius: usize,
    progress: Option<&mut ProgressCallback<'_>>,
) -> HydroResult<FlowLengthResult> {
    let mut tracker = ProgressTracker::new(progress, "flow_length", 1);
    tracker.update(1, "upstream_bfs", None, 0.0);
    let result = flow_length::compute_flow_length(dirs, points, params, fac, snap_radius);
    tracker.update(1, "upstream_bfs", Some("done"), 1.0);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_pipeline_produces_consistent_flow_direction_and_accumulation() {
        let n = 6;
        let mut dem = MemRaster::new(n, n, 0.0f32, Some(-9999.0));
        for r in 0..n {
            for c in 0..n {
                dem.set_direct(r, c, c as f32);
            }
        }

        let mut breached = dem.clone();
        breach(&mut breached, &BreachParams::default(), None);

        let mut filled = MemRaster::new(0, 0, 0.0, None);
        fill(&breached, &mut filled, &FillParams::default(), None);

        let dirs_raster = flow_direction(&filled, 1.0, Tiling::Single, None);
        let dirs = FlowDirectionGrid {
            codes: dirs_raster.data.clone(),
            width: n,
            height: n,
        };

        let fac = accumulation(&dirs_raster, Tiling::Single, None);
        for r in 0..n {
            assert_eq!(fac.get_direct(r, 0), n as u32, "row {r} outlet should carry the whole row");
        }

        let points = vec![DrainagePoint { id: 1, row: 0, col: 0 }];
        let labels = basins(&dirs, &points, false, None, 0, None).unwrap();
        assert_eq!(labels.get(0, n - 1), 1);

        let length = flow_length(&dirs, &points, &FlowLengthParams::default(), None, 0, None).unwrap();
        assert_eq!(length.get(0, n - 1), Some((n - 1) as f64));

        let (lines, _junctions) = streams(&dirs, &fac.data, 3, Tiling::Single, None);
        assert!(!lines.is_empty());
    }
}
