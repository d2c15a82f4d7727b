//! Stream network extraction: threshold the accumulation raster into a
//! boolean stream mask, find node cells (sources and confluences), and
//! trace each node's downstream polyline until it reaches another node
//! or the raster edge.

use crate::codes::D8_OFFSETS;
use crate::flow_direction::FlowDirectionGrid;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Source,
    Confluence,
}

#[derive(Debug, Clone)]
pub struct StreamFeature {
    pub points: Vec<Cell>,
}

#[derive(Debug, Clone)]
pub struct JunctionFeature {
    pub cell: Cell,
}

/// `true` for every cell whose accumulation is at or above `threshold`.
pub fn stream_mask(fac: &[u32], threshold: u32) -> Vec<bool> {
    fac.iter().map(|&a| a >= threshold).collect()
}

fn downstream_cell(dirs: &FlowDirectionGrid, row: usize, col: usize) -> Option<(usize, usize)> {
    let code = dirs.get(row, col);
    if code > 7 {
        return None;
    }
    let (dr, dc) = D8_OFFSETS[code as usize];
    let nr = row as isize + dr;
    let nc = col as isize + dc;
    if nr < 0 || nc < 0 || nr as usize >= dirs.height || nc as usize >= dirs.width {
        return None;
    }
    Some((nr as usize, nc as usize))
}

/// Number of stream-mask cells whose D8 direction points at `(row, col)`.
fn upstream_stream_count(dirs: &FlowDirectionGrid, mask: &[bool], row: usize, col: usize) -> usize {
    let width = dirs.width;
    let mut count = 0;
    for (dr, dc) in D8_OFFSETS {
        let nr = row as isize - dr;
        let nc = col as isize - dc;
        if nr < 0 || nc < 0 || nr as usize >= dirs.height || nc as usize >= width {
            continue;
        }
        let (nr, nc) = (nr as usize, nc as usize);
        if !mask[nr * width + nc] {
            continue;
        }
        if downstream_cell(dirs, nr, nc) == Some((row, col)) {
            count += 1;
        }
    }
    count
}

/// Finds every stream-mask cell that is a source (no upstream stream
/// cells) or a confluence (more than one upstream stream cell).
pub fn find_node_cells(dirs: &FlowDirectionGrid, mask: &[bool]) -> Vec<(Cell, NodeKind)> {
    let (width, height) = (dirs.width, dirs.height);
    let mut nodes = Vec::new();
    for r in 0..height {
        for c in 0..width {
            if !mask[r * width + c] {
                continue;
            }
            let count = upstream_stream_count(dirs, mask, r, c);
            if count == 0 {
                nodes.push((Cell { row: r, col: c }, NodeKind::Source));
            } else if count > 1 {
                nodes.push((Cell { row: r, col: c }, NodeKind::Confluence));
            }
        }
    }
    nodes
}

/// Traces downstream from `start` along the stream mask until another
/// node cell is reached or the trace runs off the stream mask / raster
/// edge. Bounded by `rows * cols` so a direction-field bug can never
/// spin this into an infinite loop.
fn trace_downstream(
    dirs: &FlowDirectionGrid,
    mask: &[bool],
    node_cells: &HashSet<(usize, usize)>,
    start: Cell,
) -> StreamFeature {
    let max_iterations = dirs.width * dirs.height;
    let mut points = vec![start];
    let mut cur = (start.row, start.col);

    for _ in 0..max_iterations {
        let Some(next) = downstream_cell(dirs, cur.0, cur.1) else { break };
        if !mask[next.0 * dirs.width + next.1] {
            break;
        }
        points.push(Cell { row: next.0, col: next.1 });
        cur = next;
        if node_cells.contains(&cur) {
            break;
        }
    }
    StreamFeature { points }
}

/// Builds every stream polyline, one per node cell, by tracing
/// downstream until another node or the mask's edge.
pub fn draw_lines(dirs: &FlowDirectionGrid, mask: &[bool], nodes: &[(Cell, NodeKind)]) -> Vec<StreamFeature> {
    let node_cells: HashSet<(usize, usize)> = nodes.iter().map(|(c, _)| (c.row, c.col)).collect();
    nodes
        .iter()
        .map(|(cell, _)| trace_downstream(dirs, mask, &node_cells, *cell))
        .collect()
}

/// Synthesizes a junction one cell upstream of each stream's downstream
/// terminus (its polyline's second-to-last point), skipping streams with
/// fewer than two points and de-duplicating by cell so a terminus shared
/// by multiple streams gets only one junction.
pub fn add_downstream_junctions(streams: &[StreamFeature]) -> Vec<JunctionFeature> {
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut junctions = Vec::new();
    for s in streams {
        if s.points.len() < 2 {
            continue;
        }
        let terminus = s.points[s.points.len() - 1];
        if seen.contains(&(terminus.row, terminus.col)) {
            continue;
        }
        let candidate = s.points[s.points.len() - 2];
        seen.insert((terminus.row, terminus.col));
        junctions.push(JunctionFeature { cell: candidate });
    }
    junctions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confluence_dirs() -> FlowDirectionGrid {
        // Two tributaries at (0,0) and (0,2) meet at (1,1), then flow
        // south to the outlet (3,1).
        let width = 3;
        let height = 4;
        let idx = |r: usize, c: usize| r * width + c;
        let mut codes = vec![8u8; width * height];
        codes[idx(0, 0)] = 7; // SE, into the confluence at (1,1)
        codes[idx(0, 2)] = 5; // SW, into the confluence at (1,1)
        codes[idx(1, 1)] = 6; // South
        codes[idx(2, 1)] = 6; // South
        FlowDirectionGrid { codes, width, height }
    }

    #[test]
    fn source_and_confluence_are_identified() {
        let dirs = confluence_dirs();
        let mask = vec![true; dirs.width * dirs.height];
        let nodes = find_node_cells(&dirs, &mask);
        let confluence = nodes.iter().find(|(c, k)| *k == NodeKind::Confluence && c.row == 1 && c.col == 1);
        assert!(confluence.is_some(), "expected a confluence at (1,1), got {nodes:?}");
    }

    #[test]
    fn junction_is_second_to_last_point_and_skips_short_streams() {
        let streams = vec![
            StreamFeature {
                points: vec![Cell { row: 0, col: 0 }, Cell { row: 1, col: 0 }, Cell { row: 2, col: 0 }],
            },
            StreamFeature {
                points: vec![Cell { row: 5, col: 5 }], // single point: no junction
            },
        ];
        let junctions = add_downstream_junctions(&streams);
        assert_eq!(junctions.len(), 1);
        assert_eq!(junctions[0].cell, Cell { row: 1, col: 0 });
    }

    #[test]
    fn shared_terminus_produces_one_junction_not_two() {
        let streams = vec![
            StreamFeature { points: vec![Cell { row: 0, col: 0 }, Cell { row: 1, col: 1 }, Cell { row: 2, col: 2 }] },
            StreamFeature { points: vec![Cell { row: 0, col: 4 }, Cell { row: 1, col: 3 }, Cell { row: 2, col: 2 }] },
        ];
        let junctions = add_downstream_junctions(&streams);
        assert_eq!(junctions.len(), 1);
    }
}
