//! Thin CLI over `hydro-core`'s pipeline stages. Argument parsing, file
//! I/O and progress printing live here; every hydrological decision is
//! made by the library.

mod io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hydro_core::basins::DrainagePoint;
use hydro_core::flow_direction::FlowDirectionGrid;
use hydro_core::flow_length::FlowLengthParams;
use hydro_core::progress::ProgressEvent;
use hydro_core::raster::MemRaster;
use hydro_core::tile::Tiling;
use hydro_core::{breach, basins, accumulation, fill, flow_direction, flow_length, streams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hydro-cli", about = "Tiled hydrological terrain analysis pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Breach pits in a DEM.
    Breach {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = hydro_core::breach::DEFAULT_SEARCH_RADIUS)]
        search_radius: usize,
        #[arg(long, default_value_t = f32::INFINITY)]
        max_cost: f32,
    },
    /// Fill depressions in a DEM.
    Fill {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        chunk_size: usize,
        #[arg(long, default_value_t = 1)]
        halo: usize,
        #[arg(long, default_value_t = true)]
        fill_holes: bool,
    },
    /// Compute D8 flow direction with flat resolution.
    FlowDirection {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        chunk_size: usize,
        #[arg(long, default_value_t = 1)]
        halo: usize,
        #[arg(long, default_value_t = 1.0)]
        cellsize: f64,
    },
    /// Compute flow accumulation from a flow-direction raster.
    Accumulation {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        chunk_size: usize,
        #[arg(long, default_value_t = 1)]
        halo: usize,
    },
    /// Label drainage basins from a flow-direction raster and drainage points.
    Basins {
        #[arg(long)]
        fdr: PathBuf,
        /// JSON array of `{"id": i64, "row": usize, "col": usize}`.
        #[arg(long)]
        points: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Fold cells no drainage point reaches into synthetic pseudo-basins
        /// instead of leaving them at `0`.
        #[arg(long, default_value_t = false)]
        all_basins: bool,
        /// Flow-accumulation raster to snap drainage points onto before
        /// delineating; required for `--snap-radius` to have any effect.
        #[arg(long)]
        fac: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        snap_radius: usize,
    },
    /// Extract a stream network from a flow-accumulation raster.
    Streams {
        #[arg(long)]
        fdr: PathBuf,
        #[arg(long)]
        fac: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long)]
        threshold: u32,
        #[arg(long, default_value_t = 0)]
        chunk_size: usize,
        #[arg(long, default_value_t = 1)]
        halo: usize,
    },
    /// Compute upstream flow length from drainage points.
    FlowLength {
        #[arg(long)]
        fdr: PathBuf,
        #[arg(long)]
        points: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        is_geographic: bool,
        /// Flow-accumulation raster to snap drainage points onto before
        /// tracing; required for `--snap-radius` to have any effect.
        #[arg(long)]
        fac: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        snap_radius: usize,
    },
    /// Unpack a `.tar.gz` bundle of reference DEMs into a directory.
    ExtractBundle {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        dest: PathBuf,
    },
}

/// Loads a DEM, decoding a real GeoTIFF via `tiff` when the extension
/// says so, falling back to the sidecar flat-file format otherwise.
fn load_dem(path: &PathBuf) -> Result<MemRaster<f32>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("tif") | Some("tiff") => io::load_geotiff_dem(path),
        _ => io::load_f32(path),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PointSpec {
    id: i64,
    row: usize,
    col: usize,
}

fn load_points(path: &PathBuf) -> Result<Vec<DrainagePoint>> {
    let specs: Vec<PointSpec> =
        serde_json::from_slice(&std::fs::read(path).with_context(|| format!("reading {}", path.display()))?)?;
    Ok(specs.into_iter().map(|s| DrainagePoint { id: s.id, row: s.row, col: s.col }).collect())
}

fn tiling_from(chunk_size: usize, halo: usize) -> Tiling {
    if chunk_size <= 1 {
        Tiling::Single
    } else {
        Tiling::Chunked { chunk_size, halo }
    }
}

fn print_progress(event: ProgressEvent) {
    let phase = event.phase.unwrap_or_default();
    let step = event.step_name.unwrap_or_default();
    let pct = event.progress.unwrap_or(0.0) * 100.0;
    eprint!("[{phase}] {step}: {pct:.0}%");
    if let Some(msg) = event.message {
        eprint!(" ({msg})");
    }
    eprintln!();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Breach { input, output, search_radius, max_cost } => {
            let mut dem = load_dem(&input)?;
            let params = hydro_core::breach::BreachParams { search_radius, max_cost };
            let stats = breach(&mut dem, &params, Some(&mut print_progress));
            io::save_f32(&output, &dem)?;
            eprintln!(
                "pits found={} single_cell={} least_cost={} unresolved={}",
                stats.pits_found, stats.pits_resolved_single_cell, stats.pits_resolved_least_cost, stats.pits_unresolved
            );
        }

        Command::Fill { input, output, chunk_size, halo, fill_holes } => {
            let source = load_dem(&input)?;
            let mut sink = MemRaster::new(0, 0, 0.0, None);
            let params = hydro_core::fill::FillParams { tiling: tiling_from(chunk_size, halo), fill_holes };
            let stats = fill(&source, &mut sink, &params, Some(&mut print_progress));
            io::save_f32(&output, &sink)?;
            eprintln!("cells_raised={} max_raise={}", stats.cells_raised, stats.max_raise);
        }

        Command::FlowDirection { input, output, chunk_size, halo, cellsize } => {
            let source = load_dem(&input)?;
            let dirs = flow_direction(&source, cellsize, tiling_from(chunk_size, halo), Some(&mut print_progress));
            io::save_u8(&output, &dirs)?;
        }

        Command::Accumulation { input, output, chunk_size, halo } => {
            let dirs_source = io::load_u8(&input)?;
            let fac = accumulation(&dirs_source, tiling_from(chunk_size, halo), Some(&mut print_progress));
            io::save_u32(&output, &fac)?;
        }

        Command::Basins { fdr, points, output, all_basins, fac, snap_radius } => {
            let dirs_raster = io::load_u8(&fdr)?;
            let dirs = FlowDirectionGrid { codes: dirs_raster.data.clone(), width: dirs_raster.meta.width, height: dirs_raster.meta.height };
            let points = load_points(&points)?;
            let fac_raster = fac.as_ref().map(|p| io::load_u32(p)).transpose()?;
            let labels = basins(
                &dirs,
                &points,
                all_basins,
                fac_raster.as_ref().map(|r| r.data.as_slice()),
                snap_radius,
                Some(&mut print_progress),
            )?;
            io::save_i64(&output, labels.width, labels.height, &labels.labels)?;
        }

        Command::Streams { fdr, fac, output_dir, threshold, chunk_size, halo } => {
            let dirs_raster = io::load_u8(&fdr)?;
            let dirs = FlowDirectionGrid { codes: dirs_raster.data.clone(), width: dirs_raster.meta.width, height: dirs_raster.meta.height };
            let fac_raster = io::load_u32(&fac)?;
            let (lines, junctions) =
                streams(&dirs, &fac_raster.data, threshold, tiling_from(chunk_size, halo), Some(&mut print_progress));

            std::fs::create_dir_all(&output_dir)?;
            let lines_json: Vec<Vec<(usize, usize)>> =
                lines.iter().map(|f| f.points.iter().map(|c| (c.row, c.col)).collect()).collect();
            let junctions_json: Vec<(usize, usize)> = junctions.iter().map(|j| (j.cell.row, j.cell.col)).collect();
            std::fs::write(output_dir.join("streams.json"), serde_json::to_vec_pretty(&lines_json)?)?;
            std::fs::write(output_dir.join("junctions.json"), serde_json::to_vec_pretty(&junctions_json)?)?;
            eprintln!("{} stream lines, {} junctions", lines_json.len(), junctions_json.len());
        }

        Command::FlowLength { fdr, points, output, is_geographic, fac, snap_radius } => {
            let dirs_raster = io::load_u8(&fdr)?;
            let dirs = FlowDirectionGrid { codes: dirs_raster.data.clone(), width: dirs_raster.meta.width, height: dirs_raster.meta.height };
            let points = load_points(&points)?;
            let params = FlowLengthParams {
                geotransform: dirs_raster.meta.geotransform,
                is_geographic,
                ..FlowLengthParams::default()
            };
            let fac_raster = fac.as_ref().map(|p| io::load_u32(p)).transpose()?;
            let result = flow_length(
                &dirs,
                &points,
                &params,
                fac_raster.as_ref().map(|r| r.data.as_slice()),
                snap_radius,
                Some(&mut print_progress),
            )?;
            let mut out = MemRaster::new(result.width, result.height, 0.0f32, Some(-9999.0));
            out.data = result.distance.iter().map(|d| d.map(|v| v as f32).unwrap_or(-9999.0)).collect();
            io::save_f32(&output, &out)?;
        }

        Command::ExtractBundle { bundle, dest } => {
            let extracted = io::extract_fixture_bundle(&bundle, &dest)?;
            eprintln!("extracted {} files to {}", extracted.len(), dest.display());
        }
    }

    Ok(())
}
