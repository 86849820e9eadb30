//! Per-file data model threaded through classification, measurement and export.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

/// What an input file is. Assigned once by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Elevation raster: one value band plus an optional mask band.
    Dem,
    /// Color orthomosaic: three or more bands.
    Rgb,
    /// Textured 3D model.
    Mesh3D,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileKind::Dem => "DEM",
            FileKind::Rgb => "RGB",
            FileKind::Mesh3D => "3D mesh",
        };

        f.write_str(s)
    }
}

/// Where a file's outputs go and under which ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub registry_id: String,
    pub map_id: String,
    /// `registryId + marker + mapId`; also the output folder name.
    pub output_name: String,
    pub output_folder: PathBuf,
    /// `output_name`, plus the DEM suffix for elevation rasters.
    pub output_filename: String,
    /// True when `map_id` was generated because the filename had no marker.
    pub generated: bool,
}

/// Raster metadata read by the classifier. Absent for meshes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RasterMeta {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub has_alpha: bool,
    /// Nodata of the last band; NaN has already been replaced by `0`.
    pub no_data_value: Option<f64>,
    pub pixel_size_x: f64,
    /// Sign-flipped from the geotransform, so north-up rasters are positive.
    pub pixel_size_y: f64,
    pub epsg: Option<u32>,
    pub capture_date: Option<NaiveDate>,
    /// Mean ground sample distance in centimetres, rounded to 2 decimals.
    pub gsd_cm: f64,
}

impl RasterMeta {
    /// Ground area covered by one pixel, in square source units.
    #[inline]
    pub fn pixel_area(&self) -> f64 {
        self.pixel_size_x * self.pixel_size_y.abs()
    }
}

/// Everything known about one input file once it has been measured.
///
/// Built after classification, identity resolution and area estimation, then
/// handed read-only to the export router and its sinks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: PathBuf,
    pub extension: String,
    pub kind: FileKind,
    pub identity: Identity,
    pub raster: Option<RasterMeta>,
    /// `None` for meshes; `Some(0.0)` is a valid, fully masked raster.
    pub area_hectares: Option<f64>,
    /// Global `key=value` entries followed by `registroId=` and `mapId=`.
    pub extra_metadata: Vec<String>,
}

impl FileRecord {
    pub fn new(
        path: PathBuf,
        extension: String,
        kind: FileKind,
        identity: Identity,
        raster: Option<RasterMeta>,
        area_hectares: Option<f64>,
        global_metadata: &[String],
    ) -> Self {
        let mut extra_metadata = global_metadata.to_vec();
        extra_metadata.push(format!("registroId={}", identity.registry_id));
        extra_metadata.push(format!("mapId={}", identity.map_id));

        Self {
            path,
            extension,
            kind,
            identity,
            raster,
            area_hectares,
            extra_metadata,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
