//! Offline scenario runner: exercises `hydro-core`'s pipeline end to end
//! against the fixture DEMs from the end-to-end scenarios, checking the
//! same invariants the in-crate unit tests check but outside `cargo test`
//! so a fixture can be swapped in from the command line.

use anyhow::Result;
use clap::Parser;
use hydro_core::basins::DrainagePoint;
use hydro_core::breach::BreachParams;
use hydro_core::fill::FillParams;
use hydro_core::flow_direction::FlowDirectionGrid;
use hydro_core::flow_length::FlowLengthParams;
use hydro_core::raster::MemRaster;
use hydro_core::tile::Tiling;
use hydro_core::{accumulation, basins, breach, fill, flow_direction, flow_length, streams};

#[derive(Parser, Debug)]
#[command(name = "hydro-test", about = "Offline pipeline scenario runner")]
struct Args {
    /// Run only the named scenario (a, b, c, d, e, f); default runs all.
    #[arg(short, long)]
    scenario: Option<String>,
}

struct Scenario {
    name: &'static str,
    run: fn() -> Result<(), String>,
}

const SCENARIOS: &[Scenario] = &[
    Scenario { name: "a", run: scenario_a_single_pit_breach },
    Scenario { name: "b", run: scenario_b_flat_bowl_fill_and_flats },
    Scenario { name: "c", run: scenario_c_deterministic_accumulation },
    Scenario { name: "d", run: scenario_d_two_outlet_flow_length },
    Scenario { name: "e", run: scenario_e_tiled_equivalence },
    Scenario { name: "f", run: scenario_f_stream_extraction },
];

fn main() -> Result<()> {
    let args = Args::parse();
    let mut failed = 0;
    for s in SCENARIOS {
        if let Some(want) = &args.scenario {
            if !want.eq_ignore_ascii_case(s.name) {
                continue;
            }
        }
        match (s.run)() {
            Ok(()) => println!("[PASS] scenario {}", s.name),
            Err(msg) => {
                failed += 1;
                println!("[FAIL] scenario {}: {msg}", s.name);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} scenario(s) failed");
    }
    Ok(())
}

fn dem_from(rows: &[&[f32]], nodata: f32) -> MemRaster<f32> {
    let height = rows.len();
    let width = rows[0].len();
    let mut dem = MemRaster::new(width, height, 0.0f32, Some(nodata));
    for (r, row) in rows.iter().enumerate() {
        for (c, &z) in row.iter().enumerate() {
            dem.set_direct(r, c, z);
        }
    }
    dem
}

/// (A) 5x5 single pit: a notch at `(1,0)` and a deeper pit at `(2,2)`
/// surrounded by elevation 2. Breaching must leave no unresolved pit.
fn scenario_a_single_pit_breach() -> Result<(), String> {
    #[rustfmt::skip]
    let rows: &[&[f32]] = &[
        &[2.0, 2.0, 2.0, 2.0, 2.0],
        &[-1.0, 2.0, 2.0, 2.0, 2.0],
        &[2.0, 2.0, 0.0, 2.0, 2.0],
        &[2.0, 2.0, 2.0, 2.0, 2.0],
        &[2.0, 2.0, 2.0, 2.0, 2.0],
    ];
    let mut dem = dem_from(rows, -9999.0);
    let stats = breach(&mut dem, &BreachParams { search_radius: 5, max_cost: f32::INFINITY }, None);
    if stats.pits_found == 0 {
        return Err("expected at least one pit in the fixture".into());
    }
    if stats.pits_unresolved != 0 {
        return Err(format!("{} pit(s) left unresolved after breaching", stats.pits_unresolved));
    }

    // Literal expected values, traced by hand through `try_least_cost_breach`:
    // only (2,2) is a pit ((1,0) touches the raster edge, so it's a natural
    // outlet, not a pit). Its cheapest path to a cell at or below its own
    // elevation runs through (1,1) to the edge notch at (1,0); GridCellQueue's
    // FIFO tie-break among same-cost neighbours picks (1,1) over the other
    // cost-2.0 ring cell (2,1) because `D8_OFFSETS` visits NorthWest (which
    // reaches (1,1)) before SouthWest (which reaches (2,1)) when (2,2)'s
    // neighbours are first pushed. That ramps (1,1) down to exactly
    // `0.0 + (-1.0 - 0.0) * 0.5 - EPSILON_GRADIENT = -0.50001`, leaving every
    // other cell untouched.
    let expected: &[((usize, usize), f32)] = &[((1, 0), -1.0), ((1, 1), -0.50001), ((2, 2), 0.0)];
    for &((r, c), z) in expected {
        let got = dem.get_direct(r, c);
        if (got - z).abs() > 1e-5 {
            return Err(format!("cell ({r},{c}) = {got}, expected {z}"));
        }
    }
    for r in 0..5 {
        for c in 0..5 {
            if expected.iter().any(|&((er, ec), _)| (er, ec) == (r, c)) {
                continue;
            }
            let got = dem.get_direct(r, c);
            if (got - 2.0).abs() > 1e-5 {
                return Err(format!("cell ({r},{c}) = {got}, expected unchanged at 2.0"));
            }
        }
    }
    Ok(())
}

/// (B) 5x5 flat bowl: uniform interior below a rim that ascends outward,
/// with one low notch on the east edge as the true spill outlet. After
/// `fill`, every interior cell must satisfy the fill invariant (a
/// strictly lower neighbour, or all-nodata/edge neighbours); after
/// `flow_direction`, every interior cell must carry a defined D8 code.
fn scenario_b_flat_bowl_fill_and_flats() -> Result<(), String> {
    #[rustfmt::skip]
    let rows: &[&[f32]] = &[
        &[14.0, 13.0, 13.0, 13.0, 14.0],
        &[13.0, 10.0, 10.0, 10.0, 11.0],
        &[13.0, 10.0, 10.0, 10.0, 9.0],
        &[13.0, 10.0, 10.0, 10.0, 11.0],
        &[14.0, 13.0, 13.0, 13.0, 14.0],
    ];
    let source = dem_from(rows, -9999.0);
    let mut filled = MemRaster::new(0, 0, 0.0, None);
    fill(&source, &mut filled, &FillParams { tiling: Tiling::Single, fill_holes: true }, None);

    for r in 1..4 {
        for c in 1..4 {
            let z0 = filled.get_direct(r, c);
            let has_lower = hydro_core::codes::D8_OFFSETS.iter().any(|(dr, dc)| {
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                filled.in_bounds(nr, nc) && filled.get_direct(nr as usize, nc as usize) < z0
            });
            if !has_lower {
                return Err(format!("interior cell ({r},{c})={z0} has no strictly lower neighbour after fill"));
            }
        }
    }

    let dirs = flow_direction(&filled, 1.0, Tiling::Single, None);
    for r in 1..4 {
        for c in 1..4 {
            let code = dirs.get_direct(r, c);
            if code > 7 {
                return Err(format!("interior cell ({r},{c}) has undefined flow direction {code} after flat resolution"));
            }
        }
    }
    Ok(())
}

/// (C) 4x4 deterministic flow-direction field; checks the accumulation
/// invariants (every cell >= 1, downstream strictly larger) and that
/// basin labelling correctly assigns each of four corner drainage points
/// to its own seed cell.
fn scenario_c_deterministic_accumulation() -> Result<(), String> {
    #[rustfmt::skip]
    let codes: Vec<u8> = vec![
        3, 4, 0, 1,
        2, 3, 1, 2,
        6, 5, 7, 6,
        5, 4, 0, 7,
    ];
    let width = 4;
    let height = 4;
    let dirs = FlowDirectionGrid { codes: codes.clone(), width, height };

    let mut dirs_raster = MemRaster::new(width, height, 8u8, Some(9u8));
    dirs_raster.data = codes;
    let fac = accumulation(&dirs_raster, Tiling::Single, None);

    for r in 0..height {
        for c in 0..width {
            let f = fac.get_direct(r, c);
            if f < 1 {
                return Err(format!("cell ({r},{c}) has accumulation {f} < 1"));
            }
            let code = dirs.get(r, c);
            if code <= 7 {
                let (dr, dc) = hydro_core::codes::D8_OFFSETS[code as usize];
                let nr = r as isize + dr;
                let nc = c as isize + dc;
                if nr >= 0 && nc >= 0 && (nr as usize) < height && (nc as usize) < width {
                    let fd = fac.get_direct(nr as usize, nc as usize);
                    if fd < f + 1 {
                        return Err(format!(
                            "downstream of ({r},{c}) has accumulation {fd}, expected >= {}",
                            f + 1
                        ));
                    }
                }
            }
        }
    }

    let points = vec![
        DrainagePoint { id: 1, row: 0, col: 0 },
        DrainagePoint { id: 2, row: 0, col: 3 },
        DrainagePoint { id: 3, row: 3, col: 0 },
        DrainagePoint { id: 4, row: 3, col: 3 },
    ];
    let labels = basins(&dirs, &points, false, None, 0, None).map_err(|e| e.to_string())?;
    for p in &points {
        if labels.get(p.row, p.col) != p.id {
            return Err(format!("drainage point {} does not own its own cell", p.id));
        }
    }
    Ok(())
}

/// (D) Two-outlet 5x6 raster: columns 0-2 drain south then west into
/// `(4,0)`, columns 3-5 drain south then east into `(4,5)` -- two
/// independent basins, mirror images of each other across the column
/// boundary. Flow length from both outlets must be symmetric and every
/// cell must be reached.
fn scenario_d_two_outlet_flow_length() -> Result<(), String> {
    let width = 6;
    let height = 5;
    let mut codes = vec![6u8; width * height]; // South everywhere by default
    for c in 0..3 {
        codes[(height - 1) * width + c] = 4; // west half's last row -> col 0
    }
    for c in 3..width {
        codes[(height - 1) * width + c] = 0; // east half's last row -> col width-1
    }
    codes[(height - 1) * width] = 8; // outlet (4,0): sink
    codes[(height - 1) * width + width - 1] = 8; // outlet (4,5): sink

    let dirs = FlowDirectionGrid { codes, width, height };
    let points = vec![
        DrainagePoint { id: 1, row: 4, col: 0 },
        DrainagePoint { id: 2, row: 4, col: 5 },
    ];
    let result = flow_length(&dirs, &points, &FlowLengthParams::default(), None, 0, None).map_err(|e| e.to_string())?;

    for r in 0..height {
        let west = result.get(r, 0);
        let east = result.get(r, width - 1);
        if west.is_none() || east.is_none() {
            return Err(format!("row {r} outlet column unreached"));
        }
    }
    for c in 1..3 {
        let a = result.get(0, c);
        let b = result.get(0, width - 1 - c);
        match (a, b) {
            (Some(da), Some(db)) if (da - db).abs() < 1e-6 => {}
            (None, None) => {}
            other => return Err(format!("column {c} not symmetric with its mirror: {other:?}")),
        }
    }
    Ok(())
}

/// (E) Tiled equivalence: flow direction and accumulation computed with
/// `chunk_size=2` must match the single-tile kernel exactly.
fn scenario_e_tiled_equivalence() -> Result<(), String> {
    #[rustfmt::skip]
    let rows: &[&[f32]] = &[
        &[5.0, 4.0, 4.0, 3.0],
        &[4.0, 3.0, 3.0, 2.0],
        &[4.0, 3.0, 2.0, 1.0],
        &[3.0, 2.0, 1.0, 0.0],
    ];
    let dem = dem_from(rows, -9999.0);

    let single = flow_direction(&dem, 1.0, Tiling::Single, None);
    let tiled = flow_direction(&dem, 1.0, Tiling::Chunked { chunk_size: 2, halo: 1 }, None);
    if single.data != tiled.data {
        return Err("flow direction differs between single-tile and chunked runs".into());
    }

    let fac_single = accumulation(&single, Tiling::Single, None);
    let fac_tiled = accumulation(&single, Tiling::Chunked { chunk_size: 2, halo: 1 }, None);
    if fac_single.data != fac_tiled.data {
        return Err("accumulation differs between single-tile and chunked runs".into());
    }
    Ok(())
}

/// (F) Stream extraction on a 6x6 flow-direction field: the stream mask's
/// true-count must equal the count of cells at or above the threshold,
/// and at least one line and one junction must be produced.
fn scenario_f_stream_extraction() -> Result<(), String> {
    let width = 6;
    let height = 6;
    // Every column flows west, converging toward column 0 -- a fan that
    // guarantees accumulation grows monotonically toward the west edge.
    let mut codes = vec![4u8; width * height]; // West
    for r in 0..height {
        codes[r * width] = 8; // column 0: sink
    }
    let dirs = FlowDirectionGrid { codes: codes.clone(), width, height };
    let mut dirs_raster = MemRaster::new(width, height, 8u8, Some(9u8));
    dirs_raster.data = codes;

    let fac = accumulation(&dirs_raster, Tiling::Single, None);
    let threshold = 5u32;
    let expected_mask_count = fac.data.iter().filter(|&&v| v >= threshold).count();

    let (lines, junctions) = streams(&dirs, &fac.data, threshold, Tiling::Single, None);
    let mask = hydro_core::streams::stream_mask(&fac.data, threshold);
    let actual_mask_count = mask.iter().filter(|&&b| b).count();
    if actual_mask_count != expected_mask_count {
        return Err(format!("stream mask count {actual_mask_count} != FAC>=threshold count {expected_mask_count}"));
    }
    if lines.is_empty() {
        return Err("expected at least one stream line".into());
    }
    if junctions.is_empty() {
        return Err("expected at least one junction".into());
    }
    Ok(())
}
