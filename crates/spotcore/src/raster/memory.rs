//! In-memory raster engine.
//!
//! Datasets are registered by path and cloned on open. Also provides the
//! nearest-neighbour resampler the file-backed engines use for their coarse
//! working copies.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use super::{
    check_band, check_row, ColorRole, GeoTransform, MosaicRequest, RasterDataset, RasterEngine,
    RasterError, RasterResult,
};

#[derive(Debug, Clone)]
pub struct MemoryBand {
    pub role: ColorRole,
    pub no_data: Option<f64>,
    /// Row-major, `width * height` values.
    pub data: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct MemoryDataset {
    path: PathBuf,
    width: usize,
    height: usize,
    transform: GeoTransform,
    bands: Vec<MemoryBand>,
    epsg: Option<u32>,
    metadata: BTreeMap<String, String>,
}

impl MemoryDataset {
    pub fn new(path: impl Into<PathBuf>, width: usize, height: usize, transform: GeoTransform) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            transform,
            bands: Vec::new(),
            epsg: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Append a band. `data` must hold exactly `width * height` values.
    pub fn with_band(mut self, role: ColorRole, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            self.width * self.height,
            "band data does not match {}x{}",
            self.width,
            self.height
        );
        self.bands.push(MemoryBand {
            role,
            no_data: None,
            data,
        });
        self
    }

    /// Append a band with every pixel set to `value`.
    pub fn with_constant_band(self, role: ColorRole, value: f64) -> Self {
        let len = self.width * self.height;
        self.with_band(role, vec![value; len])
    }

    /// Set the nodata value of the most recently added band.
    pub fn with_no_data(mut self, value: f64) -> Self {
        if let Some(band) = self.bands.last_mut() {
            band.no_data = Some(value);
        }
        self
    }

    pub fn with_epsg(mut self, epsg: u32) -> Self {
        self.epsg = Some(epsg);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn band(&self, band: usize) -> RasterResult<&MemoryBand> {
        check_band(band, self.bands.len())?;
        Ok(&self.bands[band - 1])
    }
}

impl RasterDataset for MemoryDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn color_role(&self, band: usize) -> RasterResult<ColorRole> {
        Ok(self.band(band)?.role)
    }

    fn no_data_value(&self, band: usize) -> RasterResult<Option<f64>> {
        Ok(self.band(band)?.no_data)
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
        let data = &self.band(band)?.data;
        check_row(row, self.height)?;
        if out.len() < self.width {
            return Err(RasterError::Read(format!(
                "scanline buffer holds {} values, need {}",
                out.len(),
                self.width
            )));
        }

        let start = row * self.width;
        out[..self.width].copy_from_slice(&data[start..start + self.width]);
        Ok(())
    }

    fn resample(&self, resolution: f64) -> RasterResult<Box<dyn RasterDataset>> {
        Ok(Box::new(resample_nearest(self, resolution)?))
    }
}

/// Nearest-neighbour copy of `source` at `resolution` units per pixel.
///
/// The output grid keeps the source origin and covers the source extent,
/// rounded to whole pixels (at least one in each direction). Band roles,
/// nodata values, EPSG and `TIFFTAG_DATETIME` carry over.
pub fn resample_nearest(source: &dyn RasterDataset, resolution: f64) -> RasterResult<MemoryDataset> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(RasterError::Unsupported(format!("resolution {resolution} is not positive")));
    }

    let transform = source.geo_transform()?;
    if !transform.is_north_up() {
        return Err(RasterError::Unsupported(
            "resampling rotated rasters is not supported".into(),
        ));
    }

    let (width, height) = source.size();
    let (px, py) = (transform.pixel_width.abs(), transform.pixel_height.abs());

    let out_w = ((width as f64 * px / resolution).round() as usize).max(1);
    let out_h = ((height as f64 * py / resolution).round() as usize).max(1);

    // Source column/row sampled by each output pixel centre.
    let src_col: Vec<usize> = (0..out_w)
        .map(|i| ((((i as f64) + 0.5) * resolution / px) as usize).min(width.saturating_sub(1)))
        .collect();
    let src_row: Vec<usize> = (0..out_h)
        .map(|j| ((((j as f64) + 0.5) * resolution / py) as usize).min(height.saturating_sub(1)))
        .collect();

    let out_transform = GeoTransform {
        origin_x: transform.origin_x,
        pixel_width: resolution * transform.pixel_width.signum(),
        row_rotation: 0.0,
        origin_y: transform.origin_y,
        col_rotation: 0.0,
        pixel_height: resolution * transform.pixel_height.signum(),
    };

    let mut out = MemoryDataset::new(source.path(), out_w, out_h, out_transform);
    out.epsg = source.epsg();
    if let Some(date) = source.metadata_item("TIFFTAG_DATETIME") {
        out.metadata.insert("TIFFTAG_DATETIME".to_string(), date);
    }

    let mut line = vec![0.0; width];
    for band in 1..=source.band_count() {
        let mut data = Vec::with_capacity(out_w * out_h);
        let mut loaded_row = None;

        for &row in &src_row {
            if loaded_row != Some(row) {
                source.read_scanline(band, row, &mut line)?;
                loaded_row = Some(row);
            }
            data.extend(src_col.iter().map(|&col| line[col]));
        }

        out.bands.push(MemoryBand {
            role: source.color_role(band)?,
            no_data: source.no_data_value(band)?,
            data,
        });
    }

    Ok(out)
}

/// A mosaic request seen by [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltMosaic {
    pub output: PathBuf,
    /// Tile list as read back from the manifest file.
    pub tiles: Vec<PathBuf>,
}

/// Engine serving registered [`MemoryDataset`]s.
#[derive(Default)]
pub struct MemoryEngine {
    datasets: RwLock<HashMap<PathBuf, MemoryDataset>>,
    mosaics: Mutex<Vec<BuiltMosaic>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dataset: MemoryDataset) {
        self.datasets.write().insert(dataset.path.clone(), dataset);
    }

    pub fn mosaics(&self) -> Vec<BuiltMosaic> {
        self.mosaics.lock().clone()
    }
}

impl RasterEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterDataset>> {
        self.datasets
            .read()
            .get(path)
            .cloned()
            .map(|ds| Box::new(ds) as Box<dyn RasterDataset>)
            .ok_or_else(|| RasterError::Open(format!("no raster registered at {}", path.display())))
    }

    fn build_mosaic(&self, request: &MosaicRequest<'_>) -> RasterResult<()> {
        let manifest = fs::read_to_string(request.manifest)?;
        let tiles = manifest
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(PathBuf::from)
            .collect();

        self.mosaics.lock().push(BuiltMosaic {
            output: request.output.to_path_buf(),
            tiles,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize, res: f64) -> MemoryDataset {
        let data = (0..width * height).map(|i| i as f64).collect();
        MemoryDataset::new("/mem/g.tif", width, height, GeoTransform::north_up(0.0, 0.0, res, res))
            .with_band(ColorRole::Gray, data)
            .with_no_data(-9999.0)
            .with_epsg(25830)
    }

    #[test]
    fn scanline_reads_row() {
        let ds = gradient(4, 3, 1.0);
        let mut line = vec![0.0; 4];
        ds.read_scanline(1, 2, &mut line).unwrap();
        assert_eq!(line, vec![8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn scanline_rejects_bad_band_and_row() {
        let ds = gradient(4, 3, 1.0);
        let mut line = vec![0.0; 4];
        assert!(ds.read_scanline(2, 0, &mut line).is_err());
        assert!(ds.read_scanline(1, 3, &mut line).is_err());
    }

    #[test]
    fn resample_halves_grid() {
        let ds = gradient(4, 4, 1.0);
        let coarse = resample_nearest(&ds, 2.0).unwrap();

        assert_eq!(coarse.size(), (2, 2));
        assert_eq!(coarse.geo_transform().unwrap().pixel_size(), (2.0, 2.0));
        assert_eq!(coarse.band(1).unwrap().data, vec![5.0, 7.0, 13.0, 15.0]);
        assert_eq!(coarse.no_data_value(1).unwrap(), Some(-9999.0));
        assert_eq!(coarse.epsg(), Some(25830));
    }

    #[test]
    fn resample_never_produces_empty_grid() {
        let ds = gradient(3, 3, 1.0);
        let coarse = resample_nearest(&ds, 100.0).unwrap();
        assert_eq!(coarse.size(), (1, 1));
    }

    #[test]
    fn resample_rejects_zero_resolution() {
        let ds = gradient(3, 3, 1.0);
        assert!(resample_nearest(&ds, 0.0).is_err());
    }

    #[test]
    fn engine_opens_registered_paths_only() {
        let engine = MemoryEngine::new();
        engine.insert(gradient(2, 2, 1.0));

        assert!(engine.open(Path::new("/mem/g.tif")).is_ok());
        let err = engine.open(Path::new("/mem/missing.tif")).err().unwrap();
        assert!(matches!(err, RasterError::Open(_)));
    }
}
