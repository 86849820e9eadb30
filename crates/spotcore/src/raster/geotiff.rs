//! Pure-Rust GeoTIFF engine.
//!
//! Reads single-image, chunky GeoTIFFs with the `tiff` crate: pixel scale,
//! tiepoint or transformation matrix for georeferencing, `GDAL_NODATA`, the
//! EPSG code from the GeoKey directory and `DateTime`. Pixels are decoded one
//! strip or tile at a time through a byte-bounded LRU cache, so memory use does
//! not grow with the image. `.vrt` paths open as [`VrtDataset`] mosaics and
//! [`RasterEngine::build_mosaic`] writes one.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;
use tiff::decoder::{ChunkType, Decoder, DecodingResult};
use tiff::tags::Tag;

use super::vrt::{self, VrtDataset};
use super::{
    check_band, check_row, ColorRole, GeoTransform, MosaicRequest, RasterDataset, RasterEngine,
    RasterError, RasterResult,
};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const PROJECTED_CS_TYPE_KEY: u32 = 3072;
const GEOGRAPHIC_TYPE_KEY: u32 = 2048;
const USER_DEFINED: u32 = 32767;

/// Decoded chunks kept per open dataset.
pub const DEFAULT_CHUNK_CACHE_BYTES: usize = 64 * 1024 * 1024;

fn tiff_err(path: &Path, e: tiff::TiffError) -> RasterError {
    RasterError::Open(format!("{}: {e}", path.display()))
}

fn decoder(path: &Path) -> RasterResult<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    Decoder::new(BufReader::new(file)).map_err(|e| tiff_err(path, e))
}

/// Look up an optional tag. Decoding errors on a present tag still surface.
fn find(dec: &mut Decoder<BufReader<File>>, code: u16) -> tiff::TiffResult<Option<tiff::decoder::ifd::Value>> {
    dec.find_tag(Tag::from_u16_exhaustive(code))
}

pub struct GeoTiffDataset {
    path: PathBuf,
    width: usize,
    height: usize,
    samples: usize,
    roles: Vec<ColorRole>,
    no_data: Option<f64>,
    transform: GeoTransform,
    epsg: Option<u32>,
    metadata: BTreeMap<String, String>,
    chunks: Mutex<ChunkReader>,
}

/// One decoded strip or tile, samples interleaved.
struct Chunk {
    width: usize,
    values: Vec<f64>,
}

impl Chunk {
    fn size_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<f64>()
    }
}

/// Strip/tile access over an open decoder.
struct ChunkReader {
    decoder: Decoder<BufReader<File>>,
    tiled: bool,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    cache: LruCache<u32, Arc<Chunk>>,
    cached_bytes: usize,
    capacity_bytes: usize,
}

impl ChunkReader {
    fn new(decoder: Decoder<BufReader<File>>, image_width: usize) -> Self {
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let tiled = matches!(decoder.get_chunk_type(), ChunkType::Tile);
        let chunk_width = (chunk_width as usize).max(1);
        let chunks_across = if tiled { image_width.div_ceil(chunk_width) } else { 1 };

        Self {
            decoder,
            tiled,
            chunk_width,
            chunk_height: (chunk_height as usize).max(1),
            chunks_across,
            cache: LruCache::unbounded(),
            cached_bytes: 0,
            capacity_bytes: DEFAULT_CHUNK_CACHE_BYTES,
        }
    }

    fn chunk(&mut self, index: u32, path: &Path) -> RasterResult<Arc<Chunk>> {
        if let Some(chunk) = self.cache.get(&index) {
            return Ok(Arc::clone(chunk));
        }

        let read_err = |e: tiff::TiffError| RasterError::Read(format!("{}: {e}", path.display()));
        let data = self.decoder.read_chunk(index).map_err(read_err)?;
        let (width, _) = self.decoder.chunk_data_dimensions(index);
        let chunk = Arc::new(Chunk {
            width: width as usize,
            values: samples_to_f64(data, path)?,
        });

        let size = chunk.size_bytes();
        if size <= self.capacity_bytes {
            while self.cached_bytes + size > self.capacity_bytes {
                match self.cache.pop_lru() {
                    Some((_, old)) => self.cached_bytes = self.cached_bytes.saturating_sub(old.size_bytes()),
                    None => break,
                }
            }
            self.cached_bytes += size;
            self.cache.put(index, Arc::clone(&chunk));
        }

        Ok(chunk)
    }

    /// Copy `band` of image row `row` into `out[..width]`.
    fn read_row(
        &mut self,
        path: &Path,
        samples: usize,
        band: usize,
        row: usize,
        out: &mut [f64],
    ) -> RasterResult<()> {
        let chunk_row = row / self.chunk_height;
        let local_row = row % self.chunk_height;

        for across in 0..self.chunks_across {
            let index = (chunk_row * self.chunks_across + across) as u32;
            let chunk = self.chunk(index, path)?;
            let x0 = if self.tiled { across * self.chunk_width } else { 0 };

            let start = local_row * chunk.width * samples;
            let line = chunk
                .values
                .get(start..start + chunk.width * samples)
                .ok_or_else(|| RasterError::Read(format!("{}: short chunk {index}", path.display())))?;

            for (col, pixel) in line.chunks_exact(samples).enumerate() {
                if let Some(slot) = out.get_mut(x0 + col) {
                    *slot = pixel[band - 1];
                }
            }
        }

        Ok(())
    }
}

fn samples_to_f64(data: DecodingResult, path: &Path) -> RasterResult<Vec<f64>> {
    Ok(match data {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => {
            return Err(RasterError::Unsupported(format!(
                "{}: 64-bit integer samples",
                path.display()
            )))
        }
    })
}

impl GeoTiffDataset {
    pub fn open(path: &Path) -> RasterResult<Self> {
        let mut dec = decoder(path)?;
        let err = |e: tiff::TiffError| tiff_err(path, e);

        let (width, height) = dec.dimensions().map_err(err)?;
        let samples = find(&mut dec, Tag::SamplesPerPixel.to_u16())
            .map_err(err)?
            .map(|v| v.into_u32())
            .transpose()
            .map_err(err)?
            .unwrap_or(1) as usize;
        if samples == 0 {
            return Err(RasterError::Open(format!("{}: no samples per pixel", path.display())));
        }

        let planar = find(&mut dec, Tag::PlanarConfiguration.to_u16())
            .map_err(err)?
            .map(|v| v.into_u32())
            .transpose()
            .map_err(err)?
            .unwrap_or(1);
        if planar == 2 {
            return Err(RasterError::Unsupported(format!(
                "{}: planar (band-separate) layout",
                path.display()
            )));
        }

        let photometric = find(&mut dec, Tag::PhotometricInterpretation.to_u16())
            .map_err(err)?
            .map(|v| v.into_u32())
            .transpose()
            .map_err(err)?
            .unwrap_or(1);
        let extra = find(&mut dec, Tag::ExtraSamples.to_u16())
            .map_err(err)?
            .map(|v| v.into_u32_vec())
            .transpose()
            .map_err(err)?;
        let roles = band_roles(samples, photometric, extra.as_deref());

        let transform = read_transform(&mut dec).map_err(err)?;

        let no_data = find(&mut dec, GDAL_NODATA)
            .map_err(err)?
            .map(|v| v.into_string())
            .transpose()
            .map_err(err)?
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

        let epsg = find(&mut dec, GEO_KEY_DIRECTORY)
            .map_err(err)?
            .map(|v| v.into_u32_vec())
            .transpose()
            .map_err(err)?
            .and_then(|keys| epsg_from_geokeys(&keys));

        let mut metadata = BTreeMap::new();
        if let Some(date) = find(&mut dec, Tag::DateTime.to_u16())
            .map_err(err)?
            .map(|v| v.into_string())
            .transpose()
            .map_err(err)?
        {
            metadata.insert(
                "TIFFTAG_DATETIME".to_string(),
                date.trim_matches(char::from(0)).to_string(),
            );
        }

        debug!(
            "opened {} ({width}x{height}, {samples} samples, epsg {:?})",
            path.display(),
            epsg
        );

        Ok(Self {
            path: path.to_path_buf(),
            width: width as usize,
            height: height as usize,
            samples,
            roles,
            no_data,
            transform,
            epsg,
            metadata,
            chunks: Mutex::new(ChunkReader::new(dec, width as usize)),
        })
    }

    /// Cap the decoded-chunk cache at `bytes`.
    pub fn with_chunk_cache(self, bytes: usize) -> Self {
        self.chunks.lock().capacity_bytes = bytes;
        self
    }
}

fn band_roles(samples: usize, photometric: u32, extra: Option<&[u32]>) -> Vec<ColorRole> {
    let base: &[ColorRole] = match photometric {
        0 | 1 => &[ColorRole::Gray],
        2 => &[ColorRole::Red, ColorRole::Green, ColorRole::Blue],
        3 => &[ColorRole::Palette],
        _ => &[],
    };

    let mut roles: Vec<ColorRole> = (0..samples)
        .map(|i| base.get(i).copied().unwrap_or(ColorRole::Undefined))
        .collect();

    // ExtraSamples 1 (associated) and 2 (unassociated) are alpha. RGB with an
    // unspecified fourth sample is treated as RGBA too.
    let extra_count = samples.saturating_sub(base.len());
    if extra_count > 0 {
        let last_is_alpha = extra
            .and_then(|values| values.last())
            .map_or(false, |v| *v == 1 || *v == 2)
            || (photometric == 2 && samples == 4);
        if last_is_alpha {
            if let Some(last) = roles.last_mut() {
                *last = ColorRole::Alpha;
            }
        }
    }

    roles
}

fn read_transform(dec: &mut Decoder<BufReader<File>>) -> tiff::TiffResult<GeoTransform> {
    if let Some(matrix) = find(dec, MODEL_TRANSFORMATION)? {
        let m = matrix.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(GeoTransform::from_coefficients([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let scale = find(dec, MODEL_PIXEL_SCALE)?.map(|v| v.into_f64_vec()).transpose()?;
    let tiepoint = find(dec, MODEL_TIEPOINT)?.map(|v| v.into_f64_vec()).transpose()?;

    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let (sx, sy) = (s[0], s[1]);
            let (i, j, x, y) = (t[0], t[1], t[3], t[4]);
            Ok(GeoTransform::from_coefficients([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
        }
        _ => Ok(GeoTransform::IDENTITY),
    }
}

/// EPSG code from a GeoKey directory: projected CRS first, then geographic.
fn epsg_from_geokeys(keys: &[u32]) -> Option<u32> {
    let header_count = *keys.get(3)? as usize;
    let entries: Vec<&[u32]> = keys[4..].chunks_exact(4).take(header_count).collect();

    [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY].into_iter().find_map(|wanted| {
        entries
            .iter()
            .find(|e| e[0] == wanted && e[1] == 0)
            .map(|e| e[3])
            .filter(|code| *code != 0 && *code != USER_DEFINED)
    })
}

impl RasterDataset for GeoTiffDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn band_count(&self) -> usize {
        self.samples
    }

    fn color_role(&self, band: usize) -> RasterResult<ColorRole> {
        check_band(band, self.samples)?;
        Ok(self.roles[band - 1])
    }

    fn no_data_value(&self, band: usize) -> RasterResult<Option<f64>> {
        check_band(band, self.samples)?;
        Ok(self.no_data)
    }

    fn geo_transform(&self) -> RasterResult<GeoTransform> {
        Ok(self.transform)
    }

    fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    fn metadata_item(&self, key: &str) -> Option<String> {
        self.metadata.get(key).cloned()
    }

    fn read_scanline(&self, band: usize, row: usize, out: &mut [f64]) -> RasterResult<()> {
        check_band(band, self.samples)?;
        check_row(row, self.height)?;
        if out.len() < self.width {
            return Err(RasterError::Read(format!(
                "scanline buffer holds {} values, need {}",
                out.len(),
                self.width
            )));
        }

        self.chunks
            .lock()
            .read_row(&self.path, self.samples, band, row, &mut out[..self.width])
    }

    fn resample(&self, resolution: f64) -> RasterResult<Box<dyn RasterDataset>> {
        Ok(Box::new(super::memory::resample_nearest(self, resolution)?))
    }
}

/// Default engine of the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoTiffEngine;

impl GeoTiffEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RasterEngine for GeoTiffEngine {
    fn name(&self) -> &'static str {
        "geotiff"
    }

    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterDataset>> {
        let is_vrt = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("vrt"));

        if is_vrt {
            let tiles = |p: &Path| self.open(p);
            Ok(Box::new(VrtDataset::open(path, &tiles)?))
        } else {
            Ok(Box::new(GeoTiffDataset::open(path)?))
        }
    }

    fn build_mosaic(&self, request: &MosaicRequest<'_>) -> RasterResult<()> {
        let tiles = |p: &Path| self.open(p);
        vrt::write_vrt(request, &tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    fn write_dem(path: &Path) {
        let mut file = File::create(path).unwrap();
        let mut tiff = TiffEncoder::new(&mut file).unwrap();
        let mut image = tiff.new_image::<colortype::Gray32Float>(3, 2).unwrap();

        let encoder = image.encoder();
        encoder
            .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &[0.5f64, 0.5, 0.0][..])
            .unwrap();
        encoder
            .write_tag(
                Tag::from_u16_exhaustive(MODEL_TIEPOINT),
                &[0.0f64, 0.0, 0.0, 500_000.0, 4_600_000.0, 0.0][..],
            )
            .unwrap();
        encoder
            .write_tag(
                Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY),
                &[1u16, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 25830][..],
            )
            .unwrap();
        encoder
            .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), "-9999")
            .unwrap();
        encoder.write_tag(Tag::DateTime, "2024:05:01 10:30:00").unwrap();

        image
            .write_data(&[1.0f32, 2.0, 3.0, 4.0, 5.0, -9999.0])
            .unwrap();
    }

    #[test]
    fn reads_georeferenced_float_dem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SITE01_A1.tif");
        write_dem(&path);

        let ds = GeoTiffEngine.open(&path).unwrap();
        assert_eq!(ds.size(), (3, 2));
        assert_eq!(ds.band_count(), 1);
        assert_eq!(ds.color_role(1).unwrap(), ColorRole::Gray);
        assert_eq!(ds.no_data_value(1).unwrap(), Some(-9999.0));
        assert_eq!(ds.epsg(), Some(25830));
        assert_eq!(
            ds.metadata_item("TIFFTAG_DATETIME").as_deref(),
            Some("2024:05:01 10:30:00")
        );

        let gt = ds.geo_transform().unwrap();
        assert_eq!(gt.coefficients(), [500_000.0, 0.5, 0.0, 4_600_000.0, 0.0, -0.5]);

        let mut line = vec![0.0; 3];
        ds.read_scanline(1, 1, &mut line).unwrap();
        assert_eq!(line, vec![4.0, 5.0, -9999.0]);
    }

    #[test]
    fn rgba_last_band_is_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ortho.tif");
        {
            let mut file = File::create(&path).unwrap();
            let mut tiff = TiffEncoder::new(&mut file).unwrap();
            tiff.write_image::<colortype::RGBA8>(2, 1, &[10, 20, 30, 255, 40, 50, 60, 0])
                .unwrap();
        }

        let ds = GeoTiffDataset::open(&path).unwrap();
        assert_eq!(ds.band_count(), 4);
        assert_eq!(ds.color_role(1).unwrap(), ColorRole::Red);
        assert_eq!(ds.color_role(4).unwrap(), ColorRole::Alpha);
        assert_eq!(ds.geo_transform().unwrap(), GeoTransform::IDENTITY);

        let mut alpha = vec![0.0; 2];
        ds.read_scanline(4, 0, &mut alpha).unwrap();
        assert_eq!(alpha, vec![255.0, 0.0]);
    }

    #[test]
    fn rows_span_strips_through_a_bounded_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strips.tif");
        {
            let mut file = File::create(&path).unwrap();
            let mut tiff = TiffEncoder::new(&mut file).unwrap();
            let mut image = tiff.new_image::<colortype::Gray32Float>(4, 10).unwrap();
            image.rows_per_strip(3).unwrap();
            let data: Vec<f32> = (0..40).map(|v| v as f32).collect();
            image.write_data(&data).unwrap();
        }

        // Room for one full strip of 3 rows x 4 f64.
        let budget = 3 * 4 * 8;
        let ds = GeoTiffDataset::open(&path).unwrap().with_chunk_cache(budget);

        let mut line = vec![0.0; 4];
        for row in [0usize, 9, 4, 9] {
            ds.read_scanline(1, row, &mut line).unwrap();
            let expected: Vec<f64> = (0..4).map(|c| (row * 4 + c) as f64).collect();
            assert_eq!(line, expected, "row {row}");
        }

        let chunks = ds.chunks.lock();
        assert!(chunks.cached_bytes <= budget);
        assert_eq!(chunks.cache.len(), 1);
    }

    #[test]
    fn mosaic_of_two_tiles_opens_as_vrt() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tif");
        let b = dir.path().join("b.tif");
        write_dem(&a);
        write_dem(&b);

        let output = dir.path().join("block.vrt");
        let tiles = vec![a, b];
        GeoTiffEngine
            .build_mosaic(&MosaicRequest {
                output: &output,
                manifest: &output,
                tiles: &tiles,
                allow_projection_difference: true,
            })
            .unwrap();

        // Identical tiles overlap completely.
        let vrt = GeoTiffEngine.open(&output).unwrap();
        assert_eq!(vrt.size(), (3, 2));
        assert_eq!(vrt.epsg(), Some(25830));
    }

    #[test]
    fn geokeys_prefer_projected_and_skip_user_defined() {
        let keys = [1, 1, 0, 2, 2048, 0, 1, 4258, 3072, 0, 1, 32767];
        assert_eq!(epsg_from_geokeys(&keys), Some(4258));
        let keys = [1, 1, 0, 2, 2048, 0, 1, 4258, 3072, 0, 1, 25830];
        assert_eq!(epsg_from_geokeys(&keys), Some(25830));
        assert_eq!(epsg_from_geokeys(&[1, 1, 0]), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(GeoTiffEngine.open(Path::new("/nonexistent/x.tif")).is_err());
    }
}
