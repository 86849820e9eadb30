//! Input classification: skip, 3D mesh, DEM or RGB raster.

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};

use crate::config::ExtensionsConfig;
use crate::error::{Result, SpotError};
use crate::raster::{ColorRole, RasterDataset, RasterEngine, RasterError};
use crate::record::{FileKind, RasterMeta};

/// Outcome of [`Classifier::classify`].
pub enum Classification {
    /// Extension not configured (or a mesh while mesh export is off).
    Skipped,
    Mesh { extension: String },
    Raster {
        kind: FileKind,
        meta: RasterMeta,
        /// Kept open for the area estimator and exporters.
        dataset: Box<dyn RasterDataset>,
    },
}

impl Classification {
    pub fn kind(&self) -> Option<FileKind> {
        match self {
            Classification::Skipped => None,
            Classification::Mesh { .. } => Some(FileKind::Mesh3D),
            Classification::Raster { kind, .. } => Some(*kind),
        }
    }
}

/// Lower-cased extension without the dot.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// NaN nodata, as written by some capture tools, becomes `0`.
pub fn normalize_no_data(path: &Path, value: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if v.is_nan() => {
            warn!("{}: nodata is NaN, using 0", path.display());
            Some(0.0)
        }
        other => other,
    }
}

/// Capture date from a `TIFFTAG_DATETIME` value.
///
/// Accepts the TIFF form `YYYY:MM:DD HH:MM:SS`, ISO-8601 date-times and plain
/// dates in either separator style.
pub fn parse_capture_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim().trim_matches(char::from(0));
    if raw.is_empty() {
        return None;
    }

    const DATE_TIMES: [&str; 3] = ["%Y:%m:%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    for format in DATE_TIMES {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }

    // Trailing time zone or fractional seconds: the date part is enough.
    let date_part = raw.get(..10)?;
    ["%Y:%m:%d", "%Y-%m-%d"]
        .into_iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

/// `round((px + py) / 2 * 100, 2)`: mean pixel size in centimetres.
pub fn gsd_cm(pixel_size_x: f64, pixel_size_y: f64) -> f64 {
    let cm = (pixel_size_x + pixel_size_y) / 2.0 * 100.0;
    (cm * 100.0).round() / 100.0
}

pub struct Classifier {
    engine: Arc<dyn RasterEngine>,
    extensions: ExtensionsConfig,
    mesh_enabled: bool,
}

impl Classifier {
    pub fn new(engine: Arc<dyn RasterEngine>, extensions: ExtensionsConfig, mesh_enabled: bool) -> Self {
        Self {
            engine,
            extensions,
            mesh_enabled,
        }
    }

    /// Classify one input file.
    ///
    /// Rasters are opened read-only and kept open in the result. Open and read
    /// failures are [`SpotError::Open`]; a raster without bands is
    /// [`SpotError::ClassificationAmbiguous`].
    pub fn classify(&self, path: &Path) -> Result<Classification> {
        let extension = extension_of(path);

        // Raster extensions win when a list overlaps.
        if !self.extensions.is_raster(&extension) {
            if self.extensions.is_mesh(&extension) {
                if self.mesh_enabled {
                    return Ok(Classification::Mesh { extension });
                }
                debug!("{}: mesh export disabled, skipping", path.display());
            }
            return Ok(Classification::Skipped);
        }

        let dataset = self.engine.open(path).map_err(|source| SpotError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let meta = read_meta(path, dataset.as_ref())?;

        let kind = if meta.band_count <= 2 { FileKind::Dem } else { FileKind::Rgb };
        debug!(
            "{}: {kind}, {} bands, alpha={}, nodata={:?}, pixel={}x{}, epsg={:?}, date={:?}",
            path.display(),
            meta.band_count,
            meta.has_alpha,
            meta.no_data_value,
            meta.pixel_size_x,
            meta.pixel_size_y,
            meta.epsg,
            meta.capture_date
        );

        Ok(Classification::Raster { kind, meta, dataset })
    }
}

fn read_meta(path: &Path, dataset: &dyn RasterDataset) -> Result<RasterMeta> {
    let open_err = |source: RasterError| SpotError::Open {
        path: path.to_path_buf(),
        source,
    };

    let band_count = dataset.band_count();
    if band_count == 0 {
        return Err(SpotError::ClassificationAmbiguous {
            path: path.to_path_buf(),
            reason: "raster has no bands".into(),
        });
    }

    let has_alpha = dataset.color_role(band_count).map_err(open_err)? == ColorRole::Alpha;
    let no_data_value = normalize_no_data(path, dataset.no_data_value(band_count).map_err(open_err)?);

    let (pixel_size_x, pixel_size_y) = dataset.geo_transform().map_err(open_err)?.pixel_size();
    let (width, height) = dataset.size();

    let capture_date = dataset
        .metadata_item("TIFFTAG_DATETIME")
        .as_deref()
        .and_then(parse_capture_date);

    Ok(RasterMeta {
        width,
        height,
        band_count,
        has_alpha,
        no_data_value,
        pixel_size_x,
        pixel_size_y,
        epsg: dataset.epsg(),
        capture_date,
        gsd_cm: gsd_cm(pixel_size_x, pixel_size_y),
    })
}
