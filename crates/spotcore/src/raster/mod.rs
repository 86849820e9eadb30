//! Raster engine abstraction.
//!
//! The ingestion core only needs a narrow slice of a raster library: open a
//! file, inspect its bands and geotransform, read scanlines, make a resampled
//! copy, and stitch tiles into a mosaic descriptor. Three engines implement it:
//!
//! - [`memory`]: in-memory datasets, for tests and embedding.
//! - [`geotiff`]: pure-Rust GeoTIFF reader plus VRT mosaics (default CLI engine).
//! - `gdal`: the system GDAL library, behind the `gdal` cargo feature.
//!
//! Band indices are 1-based throughout, as in GDAL.

use std::path::{Path, PathBuf};

pub mod geotiff;
pub mod memory;
pub mod vrt;

#[cfg(feature = "gdal")]
pub mod gdal;

/// Errors reported by raster engines.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("{0}")]
    Open(String),

    #[error("band {band} out of range (dataset has {count})")]
    BandOutOfRange { band: usize, count: usize },

    #[error("row {row} out of range (height {height})")]
    RowOutOfRange { row: usize, height: usize },

    #[error("unsupported raster: {0}")]
    Unsupported(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("mosaic failed: {0}")]
    Mosaic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type RasterResult<T> = std::result::Result<T, RasterError>;

/// Affine transform in GDAL coefficient order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    /// Negative for north-up rasters.
    pub pixel_height: f64,
}

impl GeoTransform {
    pub const IDENTITY: GeoTransform = GeoTransform {
        origin_x: 0.0,
        pixel_width: 1.0,
        row_rotation: 0.0,
        origin_y: 0.0,
        col_rotation: 0.0,
        pixel_height: 1.0,
    };

    pub fn from_coefficients(c: [f64; 6]) -> Self {
        Self {
            origin_x: c[0],
            pixel_width: c[1],
            row_rotation: c[2],
            origin_y: c[3],
            col_rotation: c[4],
            pixel_height: c[5],
        }
    }

    pub fn coefficients(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    /// North-up transform with square-or-not pixels of the given size.
    pub fn north_up(origin_x: f64, origin_y: f64, res_x: f64, res_y: f64) -> Self {
        Self {
            origin_x,
            pixel_width: res_x,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height: -res_y.abs(),
        }
    }

    /// `(x, y)` pixel size with Y sign-flipped, so north-up is positive.
    #[inline]
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.pixel_width, -self.pixel_height)
    }

    /// Ground area of one pixel: `pixelSizeX * |pixelSizeY|`.
    #[inline]
    pub fn pixel_area(&self) -> f64 {
        self.pixel_width * self.pixel_height.abs()
    }

    pub fn is_north_up(&self) -> bool {
        self.row_rotation == 0.0 && self.col_rotation == 0.0
    }
}

/// Declared color role of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRole {
    Undefined,
    Gray,
    Palette,
    Red,
    Green,
    Blue,
    Alpha,
    Other,
}

impl ColorRole {
    /// Name used in VRT `<ColorInterp>` elements.
    pub fn vrt_name(self) -> &'static str {
        match self {
            ColorRole::Undefined | ColorRole::Other => "Undefined",
            ColorRole::Gray => "Gray",
            ColorRole::Palette => "Palette",
            ColorRole::Red => "Red",
            ColorRole::Green => "Green",
            ColorRole::Blue => "Blue",
            ColorRole::Alpha => "Alpha",
        }
    }

    pub fn from_vrt_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gray" | "grey" => ColorRole::Gray,
            "palette" => ColorRole::Palette,
            "red" => ColorRole::Red,
            "green" => ColorRole::Green,
            "blue" => ColorRole::Blue,
            "alpha" => ColorRole::Alpha,
            "undefined" => ColorRole::Undefined,
            _ => ColorRole::Other,
        }
    }
}

/// An open raster.
pub trait RasterDataset: Send {
    fn path(&self) -> &Path;

    /// `(width, height)` in pixels.
    fn size(&self) -> (usize, usize);

    fn band_count(&self) -> usize;

    fn color_role(&self, band: usize) -> RasterResult<ColorRole>;

    fn no_data_value(&self, band: usize) -> RasterResult<Option<f64>>;

    fn geo_transform(&self) -> RasterResult<GeoTransform>;

    /// EPSG code of the spatial reference, when it has one.
    fn epsg(&self) -> Option<u32>;

    /// Free-form metadata from the default domain (e.g. `TIFFTAG_DATETIME`).
    fn metadata_item(&self, key: &str) -> Option<String>;

    /// Read row `row` of `band` into `out`, which must hold `width` values.
    fn read_scanline(&self, band: usize, row: usize, out: &mut [f64]) -> RasterResult<()>;

    /// A copy resampled to `resolution` source units per pixel.
    ///
    /// The copy is owned by the caller and released when dropped.
    fn resample(&self, resolution: f64) -> RasterResult<Box<dyn RasterDataset>>;
}

/// Input to [`RasterEngine::build_mosaic`].
#[derive(Debug, Clone, Copy)]
pub struct MosaicRequest<'a> {
    /// Descriptor file to write.
    pub output: &'a Path,
    /// Newline-separated list of `tiles`, for engines that take a file list.
    pub manifest: &'a Path,
    pub tiles: &'a [PathBuf],
    /// Accept tiles whose spatial references differ.
    pub allow_projection_difference: bool,
}

pub trait RasterEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterDataset>>;

    fn build_mosaic(&self, request: &MosaicRequest<'_>) -> RasterResult<()>;
}

pub(crate) fn check_band(band: usize, count: usize) -> RasterResult<()> {
    if band == 0 || band > count {
        Err(RasterError::BandOutOfRange { band, count })
    } else {
        Ok(())
    }
}

pub(crate) fn check_row(row: usize, height: usize) -> RasterResult<()> {
    if row >= height {
        Err(RasterError::RowOutOfRange { row, height })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_size_flips_y() {
        let gt = GeoTransform::from_coefficients([500_000.0, 0.05, 0.0, 4_600_000.0, 0.0, -0.05]);
        assert_eq!(gt.pixel_size(), (0.05, 0.05));
        assert!(gt.is_north_up());
        assert_eq!(gt.coefficients()[5], -0.05);
    }

    #[test]
    fn north_up_always_negative_height() {
        let gt = GeoTransform::north_up(0.0, 100.0, 2.0, 2.0);
        assert_eq!(gt.pixel_height, -2.0);
        assert_eq!(gt.pixel_area(), 4.0);
    }

    #[test]
    fn vrt_names_round_trip_for_known_roles() {
        for role in [ColorRole::Gray, ColorRole::Red, ColorRole::Alpha, ColorRole::Palette] {
            assert_eq!(ColorRole::from_vrt_name(role.vrt_name()), role);
        }
        assert_eq!(ColorRole::from_vrt_name("YCbCr_Y"), ColorRole::Other);
    }

    #[test]
    fn band_bounds() {
        assert!(check_band(1, 1).is_ok());
        assert!(matches!(check_band(0, 3), Err(RasterError::BandOutOfRange { .. })));
        assert!(check_band(4, 3).is_err());
        assert!(check_row(9, 10).is_ok());
        assert!(check_row(10, 10).is_err());
    }
}
