//! File-backed raster I/O: the external collaborator the core crate
//! never links against. A row-major flat binary payload plus a small
//! JSON sidecar header (geotransform, nodata, dtype) stands in for a
//! production GDAL/GeoTIFF layer; `load_geotiff_dem` additionally reads a
//! real single-band GeoTIFF DEM via the `tiff` crate, and
//! `extract_fixture_bundle` unpacks a `.tar.gz` bundle of reference
//! rasters for batch runs.

use anyhow::{Context, Result};
use hydro_core::raster::{GeoTransform, MemRaster};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct RasterHeader {
    width: usize,
    height: usize,
    dtype: String,
    nodata_bits: Option<u32>,
    geotransform: [f64; 6],
    is_geographic: bool,
}

fn header_path(data_path: &Path) -> std::path::PathBuf {
    let mut p = data_path.as_os_str().to_owned();
    p.push(".json");
    std::path::PathBuf::from(p)
}

fn gt_to_array(gt: &GeoTransform) -> [f64; 6] {
    [gt.origin_x, gt.px_w, gt.rot1, gt.origin_y, gt.rot2, gt.px_h]
}

fn gt_from_array(a: [f64; 6]) -> GeoTransform {
    GeoTransform {
        origin_x: a[0],
        px_w: a[1],
        rot1: a[2],
        origin_y: a[3],
        rot2: a[4],
        px_h: a[5],
    }
}

/// Writes `raster` to `path` as a flat row-major `f32` payload with a
/// `.json` sidecar header next to it.
pub fn save_f32(path: &Path, raster: &MemRaster<f32>) -> Result<()> {
    let header = RasterHeader {
        width: raster.meta.width,
        height: raster.meta.height,
        dtype: "f32".to_string(),
        nodata_bits: raster.meta.nodata.map(|n| n.to_bits()),
        geotransform: gt_to_array(&raster.meta.geotransform),
        is_geographic: raster.meta.is_geographic,
    };
    std::fs::write(header_path(path), serde_json::to_vec_pretty(&header)?).context("writing raster sidecar header")?;

    let mut w = BufWriter::new(File::create(path).with_context(|| format!("creating {}", path.display()))?);
    for &v in &raster.data {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

/// Reads a raster previously written by [`save_f32`].
pub fn load_f32(path: &Path) -> Result<MemRaster<f32>> {
    let header: RasterHeader = serde_json::from_slice(
        &std::fs::read(header_path(path)).with_context(|| format!("reading sidecar header for {}", path.display()))?,
    )?;
    let mut r = BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?);
    let mut data = Vec::with_capacity(header.width * header.height);
    let mut buf = [0u8; 4];
    for _ in 0..header.width * header.height {
        r.read_exact(&mut buf)?;
        data.push(f32::from_le_bytes(buf));
    }
    let nodata = header.nodata_bits.map(f32::from_bits);
    let mut raster = MemRaster::new(header.width, header.height, 0.0, nodata);
    raster.data = data;
    raster.meta.geotransform = gt_from_array(header.geotransform);
    raster.meta.is_geographic = header.is_geographic;
    Ok(raster)
}

/// Writes a flow-direction (`u8`) raster in the same sidecar format.
pub fn save_u8(path: &Path, raster: &MemRaster<u8>) -> Result<()> {
    let header = RasterHeader {
        width: raster.meta.width,
        height: raster.meta.height,
        dtype: "u8".to_string(),
        nodata_bits: raster.meta.nodata.map(|n| n as u32),
        geotransform: gt_to_array(&raster.meta.geotransform),
        is_geographic: raster.meta.is_geographic,
    };
    std::fs::write(header_path(path), serde_json::to_vec_pretty(&header)?)?;
    std::fs::write(path, &raster.data).with_context(|| format!("writing {}", path.display()))
}

pub fn load_u8(path: &Path) -> Result<MemRaster<u8>> {
    let header: RasterHeader = serde_json::from_slice(&std::fs::read(header_path(path))?)?;
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let nodata = header.nodata_bits.map(|n| n as u8);
    let mut raster = MemRaster::new(header.width, header.height, 0u8, nodata);
    raster.data = data;
    raster.meta.geotransform = gt_from_array(header.geotransform);
    raster.meta.is_geographic = header.is_geographic;
    Ok(raster)
}

/// Writes a flow-accumulation (`u32`) raster in the same sidecar format.
pub fn save_u32(path: &Path, raster: &MemRaster<u32>) -> Result<()> {
    let header = RasterHeader {
        width: raster.meta.width,
        height: raster.meta.height,
        dtype: "u32".to_string(),
        nodata_bits: raster.meta.nodata,
        geotransform: gt_to_array(&raster.meta.geotransform),
        is_geographic: raster.meta.is_geographic,
    };
    std::fs::write(header_path(path), serde_json::to_vec_pretty(&header)?)?;
    let mut w = BufWriter::new(File::create(path)?);
    for &v in &raster.data {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

pub fn load_u32(path: &Path) -> Result<MemRaster<u32>> {
    let header: RasterHeader = serde_json::from_slice(&std::fs::read(header_path(path))?)?;
    let mut r = BufReader::new(File::open(path)?);
    let mut data = Vec::with_capacity(header.width * header.height);
    let mut buf = [0u8; 4];
    for _ in 0..header.width * header.height {
        r.read_exact(&mut buf)?;
        data.push(u32::from_le_bytes(buf));
    }
    let mut raster = MemRaster::new(header.width, header.height, 0u32, header.nodata_bits);
    raster.data = data;
    raster.meta.geotransform = gt_from_array(header.geotransform);
    raster.meta.is_geographic = header.is_geographic;
    Ok(raster)
}

/// Writes a drainage-basin-label (`i64`) raster in the same sidecar format.
pub fn save_i64(path: &Path, width: usize, height: usize, data: &[i64]) -> Result<()> {
    let header = RasterHeader {
        width,
        height,
        dtype: "i64".to_string(),
        nodata_bits: Some(0),
        geotransform: gt_to_array(&GeoTransform::identity()),
        is_geographic: false,
    };
    std::fs::write(header_path(path), serde_json::to_vec_pretty(&header)?)?;
    let mut w = BufWriter::new(File::create(path)?);
    for &v in data {
        w.write_all(&v.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

pub fn load_i64(path: &Path) -> Result<(usize, usize, Vec<i64>)> {
    let header: RasterHeader = serde_json::from_slice(&std::fs::read(header_path(path))?)?;
    let mut r = BufReader::new(File::open(path)?);
    let mut data = Vec::with_capacity(header.width * header.height);
    let mut buf = [0u8; 8];
    for _ in 0..header.width * header.height {
        r.read_exact(&mut buf)?;
        data.push(i64::from_le_bytes(buf));
    }
    Ok((header.width, header.height, data))
}

/// Decodes a single-band 32-bit-float GeoTIFF DEM via the `tiff` crate.
/// The geotransform comes back as the identity; callers that need real
/// georeferencing should prefer the sidecar format produced by `save_f32`.
pub fn load_geotiff_dem(path: &Path) -> Result<MemRaster<f32>> {
    use tiff::decoder::{Decoder, DecodingResult};

    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).context("reading GeoTIFF header")?;
    let (width, height) = decoder.dimensions().context("reading GeoTIFF dimensions")?;
    let image = decoder.read_image().context("decoding GeoTIFF raster band")?;

    let data: Vec<f32> = match image {
        DecodingResult::F32(v) => v,
        DecodingResult::U8(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        other => anyhow::bail!("unsupported GeoTIFF sample format: {other:?}"),
    };

    let mut raster = MemRaster::new(width as usize, height as usize, 0.0, None);
    raster.data = data;
    Ok(raster)
}

/// Extracts every entry of a `.tar.gz` fixture bundle into `dest_dir`,
/// returning the extracted paths. Used to stage a batch of reference DEMs
/// before running the pipeline over each.
pub fn extract_fixture_bundle(bundle: &Path, dest_dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    std::fs::create_dir_all(dest_dir)?;
    let file = File::open(bundle).with_context(|| format!("opening {}", bundle.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut extracted = Vec::new();
    for entry in archive.entries().context("reading tar entries")? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let out_path = dest_dir.join(&entry_path);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&out_path)?;
        extracted.push(out_path);
    }
    Ok(extracted)
}
