//! Upstream flow length: cumulative D8 distance from every cell to the
//! drainage point its downstream chain terminates at, plus the longest
//! upstream flow-path polyline per drainage point.
//!
//! Every drainage point pre-claims its own cell, then BFSes upstream
//! exactly like `basins::delineate_basins`, carrying cumulative physical
//! distance instead of just an owning id. A basin is "terminal" (a
//! candidate source for the longest path) iff it has no recorded
//! upstream basin at all -- an empty upstream set, not merely "has no
//! unclaimed upstream neighbour". A basin with exactly one upstream
//! connection is therefore not terminal.

use crate::basins::{snap_to_channel, DrainagePoint};
use crate::codes::D8_OFFSETS;
use crate::error::{HydroError, HydroResult};
use crate::flow_direction::FlowDirectionGrid;
use crate::raster::GeoTransform;
use std::collections::{HashMap, HashSet, VecDeque};

/// WGS84 semi-major axis, meters. Used as the Haversine radius when
/// `is_geographic` is set and the caller doesn't supply a CRS-specific one.
pub const WGS84_SEMI_MAJOR_M: f64 = 6_378_137.0;

#[derive(Debug, Clone, Copy)]
pub struct FlowLengthParams {
    pub geotransform: GeoTransform,
    /// Geographic (lat/lon) rasters use Haversine distance; projected
    /// rasters use Euclidean distance scaled by pixel size.
    pub is_geographic: bool,
    pub semi_major: f64,
}

impl Default for FlowLengthParams {
    fn default() -> Self {
        Self {
            geotransform: GeoTransform::identity(),
            is_geographic: false,
            semi_major: WGS84_SEMI_MAJOR_M,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowLengthResult {
    /// Cumulative upstream distance to the owning drainage point, or
    /// `None` for cells no basin's search ever reached.
    pub distance: Vec<Option<f64>>,
    pub owner: Vec<Option<i64>>,
    pub width: usize,
    pub height: usize,
    /// Per drainage point, the farthest cell its own search reached and
    /// the distance to it: `(row, col, distance)`.
    pub farthest_cell: HashMap<i64, (usize, usize, f64)>,
    /// Inverted flow graph between drainage points: `basin_graph[id]` is
    /// every drainage point whose own basin flows directly into `id`'s.
    pub basin_graph: HashMap<i64, Vec<i64>>,
}

impl FlowLengthResult {
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.distance[row * self.width + col]
    }
}

/// Straight-line physical distance of one D8 step in projected
/// (Euclidean) coordinates, in the geotransform's map units.
fn step_distance_projected(from: (usize, usize), to: (usize, usize), px_w: f64, px_h: f64) -> f64 {
    let dr = to.0 as isize - from.0 as isize;
    let dc = to.1 as isize - from.1 as isize;
    let dx = (dc as f64 * px_w).abs();
    let dy = (dr as f64 * px_h).abs();
    (dx * dx + dy * dy).sqrt()
}

/// Great-circle distance in meters between two (lat, lon) pairs in
/// degrees, using `semi_major` as the sphere's radius.
fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64, semi_major: f64) -> f64 {
    let (lat1r, lon1r) = (lat1.to_radians(), lon1.to_radians());
    let (lat2r, lon2r) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2r - lat1r;
    let dlon = lon2r - lon1r;
    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    semi_major * c
}

/// Physical distance of the single D8 step from `(from_row, from_col)`
/// to `(to_row, to_col)`. `to_*` must be a D8 neighbour of `from_*`.
fn step_distance(params: &FlowLengthParams, from: (usize, usize), to: (usize, usize)) -> f64 {
    if params.is_geographic {
        let (lon1, lat1) = params.geotransform.cell_center(from.0, from.1);
        let (lon2, lat2) = params.geotransform.cell_center(to.0, to.1);
        haversine_m(lat1, lon1, lat2, lon2, params.semi_major)
    } else {
        step_distance_projected(from, to, params.geotransform.px_w, params.geotransform.px_h)
    }
}

/// Computes upstream flow length from every drainage point, following
/// the same pre-claim + simultaneous-BFS partition as
/// [`crate::basins::delineate_basins`], and the cross-basin flow graph
/// used to find terminal (most-upstream) basins for the longest-path
/// search.
///
/// When `fac` is `Some` and `snap_radius > 0`, every point is first
/// snapped onto the highest-accumulation cell within `snap_radius`
/// (Chebyshev), identical to `basins::delineate_basins`'s snap handling.
pub fn compute_flow_length(
    dirs: &FlowDirectionGrid,
    points: &[DrainagePoint],
    params: &FlowLengthParams,
    fac: Option<&[u32]>,
    snap_radius: usize,
) -> HydroResult<FlowLengthResult> {
    if points.is_empty() {
        return Err(HydroError::NoDrainagePoints);
    }
    let (width, height) = (dirs.width, dirs.height);
    for p in points {
        if p.row >= height || p.col >= width {
            return Err(HydroError::DrainagePointOutOfBounds { row: p.row, col: p.col });
        }
    }

    let snapped_points: Vec<DrainagePoint> = match (fac, snap_radius) {
        (Some(fac), radius) if radius > 0 => points
            .iter()
            .map(|p| {
                let (row, col) = snap_to_channel(fac, width, height, p.row, p.col, radius);
                DrainagePoint { id: p.id, row, col }
            })
            .collect(),
        _ => points.to_vec(),
    };

    let mut donors: Vec<Vec<usize>> = vec![Vec::new(); width * height];
    for r in 0..height {
        for c in 0..width {
            let code = dirs.get(r, c);
            if code > 7 {
                continue;
            }
            let (dr, dc) = D8_OFFSETS[code as usize];
            let nr = r as isize + dr;
            let nc = c as isize + dc;
            if nr >= 0 && nc >= 0 && (nr as usize) < height && (nc as usize) < width {
                donors[nr as usize * width + nc as usize].push(r * width + c);
            }
        }
    }

    let mut owner: Vec<Option<i64>> = vec![None; width * height];
    let mut distance: Vec<Option<f64>> = vec![None; width * height];
    let mut queue: VecDeque<usize> = VecDeque::new();

    let mut sorted_points = snapped_points.clone();
    sorted_points.sort_by_key(|p| p.id);
    for p in &sorted_points {
        let idx = p.row * width + p.col;
        if owner[idx].is_none() {
            owner[idx] = Some(p.id);
            distance[idx] = Some(0.0);
            queue.push_back(idx);
        }
    }

    while let Some(i) = queue.pop_front() {
        let id = owner[i].expect("queued cell always carries a label");
        let cur_dist = distance[i].expect("queued cell always carries a distance");
        let (r, c) = (i / width, i % width);
        for &donor in &donors[i] {
            let (dr, dc) = (donor / width, donor % width);
            let new_dist = cur_dist + step_distance(params, (r, c), (dr, dc));
            match owner[donor] {
                None => {
                    owner[donor] = Some(id);
                    distance[donor] = Some(new_dist);
                    queue.push_back(donor);
                }
                Some(existing) if existing == id => {
                    // Unreachable for a strict D8 donor tree, but the
                    // source re-pushes on a longer path to the same
                    // basin defensively; mirror that here.
                    if new_dist > distance[donor].unwrap_or(f64::MIN) {
                        distance[donor] = Some(new_dist);
                        queue.push_back(donor);
                    }
                }
                Some(_) => {} // already claimed by a different basin
            }
        }
    }

    let mut farthest_cell: HashMap<i64, (usize, usize, f64)> = HashMap::new();
    for p in &sorted_points {
        farthest_cell.insert(p.id, (p.row, p.col, 0.0));
    }
    for idx in 0..width * height {
        if let (Some(id), Some(d)) = (owner[idx], distance[idx]) {
            let entry = farthest_cell.entry(id).or_insert((idx / width, idx % width, 0.0));
            if d > entry.2 {
                *entry = (idx / width, idx % width, d);
            }
        }
    }

    // Inverted flow graph: basin_graph[downstream_id] holds every
    // drainage point whose own outlet cell flows directly into a cell
    // owned by a different (necessarily downstream) basin.
    let mut basin_graph: HashMap<i64, Vec<i64>> = sorted_points.iter().map(|p| (p.id, Vec::new())).collect();
    for p in &sorted_points {
        let code = dirs.get(p.row, p.col);
        if code > 7 {
            continue;
        }
        let (dr, dc) = D8_OFFSETS[code as usize];
        let nr = p.row as isize + dr;
        let nc = p.col as isize + dc;
        if nr < 0 || nc < 0 || nr as usize >= height || nc as usize >= width {
            continue;
        }
        if let Some(downstream_id) = owner[nr as usize * width + nc as usize] {
            if downstream_id != p.id {
                if let Some(list) = basin_graph.get_mut(&downstream_id) {
                    list.push(p.id);
                }
            }
        }
    }

    Ok(FlowLengthResult {
        distance,
        owner,
        width,
        height,
        farthest_cell,
        basin_graph,
    })
}

/// Every basin that must be checked for the longest upstream path from
/// `dp_id`: the basin itself, plus every ancestor basin (direct or
/// transitive, via `basin_graph`) that is itself terminal -- has no
/// recorded upstream basin of its own. A basin with exactly one upstream
/// connection is not terminal and is excluded, matching the source's
/// `len(basin_graph[id]) > 0` check exactly.
pub fn find_all_most_upstream_basins(dp_id: i64, basin_graph: &HashMap<i64, Vec<i64>>) -> Vec<i64> {
    let mut result = vec![dp_id];
    let mut all_upstream: HashSet<i64> = HashSet::from([dp_id]);
    let mut to_visit = vec![dp_id];

    while let Some(current) = to_visit.pop() {
        if let Some(upstream) = basin_graph.get(&current) {
            for &u in upstream {
                if all_upstream.insert(u) {
                    to_visit.push(u);
                }
            }
        }
    }

    for &basin_id in &all_upstream {
        if basin_id == dp_id {
            continue;
        }
        let has_upstream = basin_graph.get(&basin_id).map_or(false, |v| !v.is_empty());
        if !has_upstream {
            result.push(basin_id);
        }
    }
    result
}

/// Traces a path downstream from `start` along `dirs` until `target` is
/// reached or the chain runs off the raster / hits an undefined cell.
/// Bounded by `width * height` so a direction-field bug can't spin this
/// into an infinite loop.
pub fn trace_path_from_cell(dirs: &FlowDirectionGrid, start: (usize, usize), target: (usize, usize)) -> Vec<(usize, usize)> {
    let max_iterations = dirs.width * dirs.height;
    let mut path = vec![start];
    let mut cur = start;

    for _ in 0..max_iterations {
        if cur == target {
            break;
        }
        let code = dirs.get(cur.0, cur.1);
        if code > 7 {
            break;
        }
        let (dr, dc) = D8_OFFSETS[code as usize];
        let nr = cur.0 as isize + dr;
        let nc = cur.1 as isize + dc;
        if nr < 0 || nc < 0 || nr as usize >= dirs.height || nc as usize >= dirs.width {
            break;
        }
        cur = (nr as usize, nc as usize);
        path.push(cur);
    }
    path
}

/// Total physical distance along a traced path, summing the same
/// per-step metric `compute_flow_length` used.
pub fn path_distance(path: &[(usize, usize)], params: &FlowLengthParams) -> f64 {
    path.windows(2).map(|w| {
        if params.is_geographic {
            let (lon1, lat1) = params.geotransform.cell_center(w[0].0, w[0].1);
            let (lon2, lat2) = params.geotransform.cell_center(w[1].0, w[1].1);
            haversine_m(lat1, lon1, lat2, lon2, params.semi_major)
        } else {
            step_distance_projected(w[0], w[1], params.geotransform.px_w, params.geotransform.px_h)
        }
    }).sum()
}

/// The longest upstream flow-path polyline ending at `drainage_point`:
/// tries the drainage point's own farthest cell plus the farthest cell
/// of every terminal ancestor basin (per
/// [`find_all_most_upstream_basins`]), traces each candidate downstream,
/// and keeps the path with the greatest traced distance (not the
/// greatest straight-basin distance, since an upstream terminal basin's
/// path continues across basin boundaries down to `drainage_point`).
pub fn trace_longest_flow_path(
    dirs: &FlowDirectionGrid,
    drainage_point: (usize, usize),
    dp_id: i64,
    result: &FlowLengthResult,
    params: &FlowLengthParams,
) -> Vec<(usize, usize)> {
    let most_upstream = find_all_most_upstream_basins(dp_id, &result.basin_graph);

    let mut longest_path = vec![drainage_point];
    let mut max_dist = 0.0f64;

    for basin_id in most_upstream {
        let Some(&(max_row, max_col, basin_dist)) = result.farthest_cell.get(&basin_id) else { continue };
        if basin_dist == 0.0 {
            continue;
        }
        let path = trace_path_from_cell(dirs, (max_row, max_col), drainage_point);
        let dist = path_distance(&path, params);
        if dist > max_dist {
            max_dist = dist;
            longest_path = path;
        }
    }
    longest_path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_chain_dirs(n: usize) -> FlowDirectionGrid {
        // Single row flowing West toward the drainage point at col 0.
        let mut codes = vec![4u8; n]; // West
        codes[0] = 8; // sink
        FlowDirectionGrid { codes, width: n, height: 1 }
    }

    #[test]
    fn distance_increases_by_one_pixel_per_step() {
        let dirs = straight_chain_dirs(5);
        let points = vec![DrainagePoint { id: 1, row: 0, col: 0 }];
        let params = FlowLengthParams::default();
        let result = compute_flow_length(&dirs, &points, &params, None, 0).unwrap();
        for c in 0..5 {
            assert_eq!(result.get(0, c), Some(c as f64));
        }
    }

    #[test]
    fn empty_drainage_points_is_an_error() {
        let dirs = straight_chain_dirs(3);
        let err = compute_flow_length(&dirs, &[], &FlowLengthParams::default(), None, 0).unwrap_err();
        assert!(matches!(err, HydroError::NoDrainagePoints));
    }

    #[test]
    fn nested_basins_two_points_partition_like_basins_stage() {
        // Tributary (id 2) joins the mainstem at col 2; mainstem outlet
        // (id 1) sits at col 0.
        let width = 5;
        let mut codes = vec![4u8; width]; // West
        codes[0] = 8; // mainstem outlet: sink
        let dirs = FlowDirectionGrid { codes, width, height: 1 };
        let points = vec![
            DrainagePoint { id: 1, row: 0, col: 0 },
            DrainagePoint { id: 2, row: 0, col: 2 },
        ];
        let result = compute_flow_length(&dirs, &points, &FlowLengthParams::default(), None, 0).unwrap();
        assert_eq!(result.owner[0], Some(1));
        assert_eq!(result.owner[1], Some(1));
        assert_eq!(result.owner[2], Some(2));
        assert_eq!(result.owner[4], Some(2));
        assert_eq!(result.get(0, 4), Some(2.0));
        // point 2 flows into a cell owned by point 1.
        assert_eq!(result.basin_graph.get(&1), Some(&vec![2]));
    }

    #[test]
    fn terminal_basin_excludes_basin_with_one_upstream_connection() {
        // Chain of three drainage points: 3 -> 2 -> 1. Basin 2 has one
        // upstream connection (3), so it is not terminal; only 1 (itself)
        // and 3 are candidates for basin 1's longest path.
        let mut graph = HashMap::new();
        graph.insert(1i64, vec![2i64]);
        graph.insert(2i64, vec![3i64]);
        graph.insert(3i64, vec![]);
        let candidates = find_all_most_upstream_basins(1, &graph);
        assert!(candidates.contains(&1));
        assert!(candidates.contains(&3));
        assert!(!candidates.contains(&2));
    }

    #[test]
    fn longest_path_crosses_basin_boundary() {
        let width = 5;
        let mut codes = vec![4u8; width];
        codes[0] = 8;
        let dirs = FlowDirectionGrid { codes, width, height: 1 };
        let points = vec![
            DrainagePoint { id: 1, row: 0, col: 0 },
            DrainagePoint { id: 2, row: 0, col: 2 },
        ];
        let result = compute_flow_length(&dirs, &points, &FlowLengthParams::default(), None, 0).unwrap();
        let path = trace_longest_flow_path(&dirs, (0, 0), 1, &result, &FlowLengthParams::default());
        // Farthest cell overall is (0,4), owned by basin 2, which is
        // terminal relative to basin 1 -- the longest path for basin 1
        // must trace all the way from there, not stop at its own basin.
        assert_eq!(path.first(), Some(&(0, 4)));
        assert_eq!(path.last(), Some(&(0, 0)));
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn snap_radius_pulls_point_onto_higher_accumulation_cell() {
        let dirs = straight_chain_dirs(5);
        let mut fac = vec![1u32; 5];
        fac[0] = 50;
        let points = vec![DrainagePoint { id: 1, row: 0, col: 1 }];
        let result = compute_flow_length(&dirs, &points, &FlowLengthParams::default(), Some(&fac), 2).unwrap();
        // Snapped onto (0,0), the search should reach all the way to (0,4).
        assert_eq!(result.get(0, 4), Some(4.0));
    }
}
