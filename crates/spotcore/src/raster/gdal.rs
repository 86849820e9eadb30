//! GDAL-backed engine (`gdal` feature).
//!
//! Needs the system GDAL library. Mosaics go through `gdalbuildvrt` with
//! `-allow_projection_difference` when requested; the coarse working copies
//! reuse the nearest-neighbour resampler of the in-memory engine.

use std::fs;
use std::path::{Path, PathBuf};

use gdal::programs::raster::{build_vrt, BuildVRTOptions};
use gdal::raster::ColorInterpretation;
use gdal::{Dataset, DatasetOptions, GdalOpenFlags, Metadata};
use log::debug;

use super::{
    check_band, check_row, ColorRole, GeoTransform, MosaicRequest, RasterDataset, RasterEngine,
    RasterError, RasterResult,
};

fn gdal_err(path: &Path, e: gdal::errors::GdalError) -> RasterError {
    RasterError::Open(format!("{}: {e}", path.display()))
}

pub struct GdalDataset {
    path: PathBuf,
    dataset: Dataset,
}

impl GdalDataset {
    pub fn open(path: &Path) -> RasterResult<Self> {
        let options = DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_READONLY | GdalOpenFlags::GDAL_OF_RASTER,
            ..Default::default()
        };
        let dataset = Dataset::open_ex(path, options).map_err(|e| gdal_err(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            dataset,
        })
    }
}

impl RasterDataset for GdalDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> (usize, usize) {
        self.dataset.raster_size()
    }

    fn band_count(&self) -> usize {
        self.dataset.raster_count() as usize
    }

    fn color_role(&self, band: usize) -> RasterResult<ColorRole> {
        check_band(band, self.band_count())?;
        let rb = self
            .dataset
            .rasterband(band as _)
            .map_err(|e| gdal_err(&self.path, e))?;

        Ok(match rb.color_interpretation() {
            ColorInterpretation::Undefined => ColorRole::Undefined,
            ColorInterpretation::GrayIndex => ColorRole::Gray,
            ColorInterpretation::PaletteIndex => ColorRole::Palette,
            ColorInterpretation::RedBand => ColorRole::Red,
            ColorInterpretation::GreenBand => ColorRole::Green,
            ColorInterpretation::BlueBand => ColorRole::Blue,
            ColorInterpretation::AlphaBand => ColorRole::Alpha,
            _ => ColorRole::Other,
        })
    }

    fn no_data_value(&self, band: usize) -> RasterResult<Option<f64>> {
        check_band(band, self.band_count())?;
        let rb = self
            .dataset
            .rasterband(band as _)
            .map_err(|e| gdal_err(&self.path, e))?;
        Ok(rb.no_data_value())
    }

    fn geo_transform(&self) -> RasterResult<GeoTransform> {
        let gt = self
            .dataset
            .geo_transform()
            .map_err(|e| gdal_err(&self.path, e))?;
        Ok(GeoTransform::from_coefficients(gt))
    }

    fn epsg(&self) -> Option<u32> {
        let srs = self.dataset.spatial_ref().ok()?;
        srs.auth_code().ok().and_then(|code| u32::try_from(code).ok())
    }

    fn metadata_item(&self, key: &str) -> Option<String> {
        self.dataset.metadata_item(key, "")
    }

    fn read_scanline(&self, band: usize, row: usize, out: &mut [f64]) -> RasterResult<()> {
        check_band(band, self.band_count())?;
        let (width, height) = self.size();
        check_row(row, height)?;
        if out.len() < width {
            return Err(RasterError::Read(format!(
                "scanline buffer holds {} values, need {width}",
                out.len()
            )));
        }

        let rb = self
            .dataset
            .rasterband(band as _)
            .map_err(|e| gdal_err(&self.path, e))?;
        let buffer = rb
            .read_as::<f64>((0, row as isize), (width, 1), (width, 1), None)
            .map_err(|e| RasterError::Read(format!("{}: {e}", self.path.display())))?;

        out[..width].copy_from_slice(&buffer.data()[..width]);
        Ok(())
    }

    fn resample(&self, resolution: f64) -> RasterResult<Box<dyn RasterDataset>> {
        Ok(Box::new(super::memory::resample_nearest(self, resolution)?))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GdalEngine;

impl GdalEngine {
    /// Rasters with an internal mask keep it inside the GeoTIFF.
    pub fn new() -> RasterResult<Self> {
        gdal::config::set_config_option("GDAL_TIFF_INTERNAL_MASK", "YES")
            .map_err(|e| RasterError::Open(format!("GDAL configuration: {e}")))?;
        Ok(Self)
    }
}

impl RasterEngine for GdalEngine {
    fn name(&self) -> &'static str {
        "gdal"
    }

    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterDataset>> {
        Ok(Box::new(GdalDataset::open(path)?))
    }

    fn build_mosaic(&self, request: &MosaicRequest<'_>) -> RasterResult<()> {
        let manifest = fs::read_to_string(request.manifest)?;
        let mut datasets = Vec::new();
        for line in manifest.lines().filter(|l| !l.trim().is_empty()) {
            let tile = Path::new(line.trim());
            datasets.push(Dataset::open(tile).map_err(|e| gdal_err(tile, e))?);
        }

        let args: Vec<&str> = if request.allow_projection_difference {
            vec!["-allow_projection_difference"]
        } else {
            Vec::new()
        };
        let options = BuildVRTOptions::new(args)
            .map_err(|e| RasterError::Mosaic(e.to_string()))?;

        debug!(
            "gdalbuildvrt {} from {} tiles",
            request.output.display(),
            datasets.len()
        );
        build_vrt(Some(request.output), &datasets, Some(options))
            .map_err(|e| RasterError::Mosaic(format!("{}: {e}", request.output.display())))?;
        Ok(())
    }
}
