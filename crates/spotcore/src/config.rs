//! Run configuration, loaded from a JSON file.
//!
//! Every section has defaults, so a config file only needs the keys it wants
//! to change:
//!
//! ```json
//! {
//!   "paths": { "input": "/data/in", "output": "/data/out" },
//!   "naming": { "prefix_marker": "_MAP_" },
//!   "exports": { "map_server_rgb": { "enabled": true } }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpotError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotConfig {
    pub paths: PathsConfig,
    pub naming: NamingConfig,
    pub extensions: ExtensionsConfig,
    /// Free-form `key=value` entries handed to every exporter.
    pub metadata: Vec<String>,
    pub exports: ExportsConfig,
    pub working_raster: WorkingRasterConfig,
    pub area: AreaConfig,
    pub run: RunConfig,
    pub mesh: MeshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Scratch space for manifests and mesh intermediates; removed after a run.
    pub tmp: PathBuf,
    /// Remove the whole output folder before the run starts.
    pub clean_output: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("input"),
            output: PathBuf::from("output"),
            tmp: PathBuf::from("tmp"),
            clean_output: false,
        }
    }
}

/// What to do when two prefixed files resolve to the same `(registryId, mapId)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixedCollision {
    /// Both write to the same folder; the later file wins.
    #[default]
    Overwrite,
    /// The later file gets `-v2`, `-v3`, ... appended to its map id.
    Version,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Literal substring separating the registry id from the map id.
    pub prefix_marker: String,
    /// Appended to DEM output names and stripped from DEM input names.
    pub dem_suffix: String,
    pub prefixed_collision: PrefixedCollision,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix_marker: "_".to_string(),
            dem_suffix: "_dem".to_string(),
            prefixed_collision: PrefixedCollision::Overwrite,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Top-level files opened as rasters.
    pub raster: Vec<String>,
    /// Files collected from sub-folders into a VRT mosaic.
    pub mosaic_tiles: Vec<String>,
    /// Files sent to the mesh pipeline when it is enabled.
    pub mesh: Vec<String>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            raster: list(&["tif", "tiff", "vrt"]),
            mosaic_tiles: list(&["tif", "tiff"]),
            mesh: list(&["obj", "gltf", "glb"]),
        }
    }
}

impl ExtensionsConfig {
    pub fn is_raster(&self, ext: &str) -> bool {
        contains_ext(&self.raster, ext)
    }

    pub fn is_mosaic_tile(&self, ext: &str) -> bool {
        contains_ext(&self.mosaic_tiles, ext)
    }

    pub fn is_mesh(&self, ext: &str) -> bool {
        contains_ext(&self.mesh, ext)
    }
}

fn contains_ext(list: &[String], ext: &str) -> bool {
    list.iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle {
    pub enabled: bool,
}

impl Toggle {
    pub const ON: Toggle = Toggle { enabled: true };
    pub const OFF: Toggle = Toggle { enabled: false };
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemCacheToggle {
    pub enabled: bool,
    /// Write volume/statistics reports; independent of `enabled`.
    pub quantities: bool,
}

/// Per-pipeline switches. Any subset may be enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportsConfig {
    pub dem_cache: DemCacheToggle,
    pub rgb_cache: Toggle,
    pub previews: Toggle,
    pub outlines: Toggle,
    pub map_server_rgb: Toggle,
    pub map_server_dem: Toggle,
    /// Colorized (hillshade-style) DEM layer for the map server.
    pub map_server_dem_rgb: Toggle,
    pub mesh: Toggle,
}

impl Default for ExportsConfig {
    fn default() -> Self {
        Self {
            dem_cache: DemCacheToggle {
                enabled: true,
                quantities: true,
            },
            rgb_cache: Toggle::ON,
            previews: Toggle::ON,
            outlines: Toggle::ON,
            map_server_rgb: Toggle::OFF,
            map_server_dem: Toggle::OFF,
            map_server_dem_rgb: Toggle::OFF,
            mesh: Toggle::OFF,
        }
    }
}

impl ExportsConfig {
    /// Everything off; handy as a starting point for tests and dry runs.
    pub fn none() -> Self {
        Self {
            dem_cache: DemCacheToggle::default(),
            rgb_cache: Toggle::OFF,
            previews: Toggle::OFF,
            outlines: Toggle::OFF,
            map_server_rgb: Toggle::OFF,
            map_server_dem: Toggle::OFF,
            map_server_dem_rgb: Toggle::OFF,
            mesh: Toggle::OFF,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingRasterConfig {
    /// Longest side, in pixels, of the downsampled raster shared by previews,
    /// outlines and elevation color values.
    pub max_dimension: usize,
}

impl Default for WorkingRasterConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// Ground resolution, in source units per pixel, of the copy used to count
    /// valid pixels when an alpha band is present.
    pub coarse_resolution: f64,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            coarse_resolution: crate::area::COARSE_RESOLUTION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure, skip the rest of that file, keep going.
    #[default]
    Isolate,
    /// Stop the whole run at the first failing file.
    FailFast,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub failure_policy: FailurePolicy,
    /// Process files on the rayon thread pool instead of one at a time.
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Command turning a non-glTF mesh into `.gltf`. `{input}`/`{output}` are substituted.
    pub converter: String,
    /// Command unpacking a `.glb` into `.gltf`.
    pub unpacker: String,
    /// Command producing the final compressed `.glb`.
    pub compressor: String,
    /// Inject a directional and a point light.
    pub lights: bool,
    /// Rotation about the X axis applied to the whole scene, in degrees.
    pub rotate_x_degrees: f64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            converter: "obj2gltf -i {input} -o {output}".to_string(),
            unpacker: "gltf-pipeline -i {input} -o {output}".to_string(),
            compressor: "gltf-pipeline -i {input} -o {output} --draco.compressMeshes".to_string(),
            lights: true,
            rotate_x_degrees: 0.0,
        }
    }
}

/// Map-server layer folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapServerLayer {
    Rgb,
    Dem,
    DemRgb,
}

impl MapServerLayer {
    pub fn folder_name(self) -> &'static str {
        match self {
            MapServerLayer::Rgb => "rgb",
            MapServerLayer::Dem => "dem",
            MapServerLayer::DemRgb => "demrgb",
        }
    }
}

impl SpotConfig {
    /// Read and validate a JSON config file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| SpotError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SpotConfig = serde_json::from_str(text)
            .map_err(|e| SpotError::Config(format!("malformed JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.naming.prefix_marker.is_empty() {
            return Err(SpotError::Config("naming.prefix_marker must not be empty".into()));
        }

        if !(self.area.coarse_resolution.is_finite() && self.area.coarse_resolution > 0.0) {
            return Err(SpotError::Config(format!(
                "area.coarse_resolution must be > 0 (got {})",
                self.area.coarse_resolution
            )));
        }

        if self.working_raster.max_dimension == 0 {
            return Err(SpotError::Config("working_raster.max_dimension must be > 0".into()));
        }

        if self.extensions.raster.is_empty() && self.extensions.mesh.is_empty() {
            return Err(SpotError::Config("no raster or mesh extensions configured".into()));
        }

        Ok(())
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.paths.output.join("storage")
    }

    pub fn database_dir(&self) -> PathBuf {
        self.paths.output.join("database")
    }

    pub fn map_server_dir(&self, layer: MapServerLayer) -> PathBuf {
        self.paths.output.join("geoserver").join(layer.folder_name())
    }

    /// Folders created before the first file is processed.
    pub fn output_folders(&self) -> Vec<PathBuf> {
        let database = self.database_dir();
        vec![
            self.paths.tmp.clone(),
            database.join("jsondata"),
            database.join("mdevalues"),
            database.join("outlines"),
            database,
            self.storage_dir(),
            self.map_server_dir(MapServerLayer::Rgb),
            self.map_server_dir(MapServerLayer::Dem),
            self.map_server_dir(MapServerLayer::DemRgb),
        ]
    }
}
