//! Default export sink: JSON descriptors on disk.
//!
//! Every export writes `<outputFolder>/<outputFilename>.<stage>.json` with
//! the file's identity, metadata list, raster metadata, area and (for DEMs)
//! elevation color values, for downstream tile writers to pick up. Database
//! and map-server stages also drop a copy into their shared folders. Meshes
//! go through the [`MeshPipeline`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::config::{MapServerLayer, SpotConfig};
use crate::elevation::ElevationColors;
use crate::error::{Result, SpotError};
use crate::export::{ExportSink, MapServerDem};
use crate::mesh::MeshPipeline;
use crate::raster::RasterDataset;
use crate::record::{FileKind, FileRecord, Identity, RasterMeta};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RasterSummary {
    path: PathBuf,
    width: usize,
    height: usize,
    geo_transform: Option<[f64; 6]>,
}

impl RasterSummary {
    fn of(dataset: &dyn RasterDataset) -> Self {
        let (width, height) = dataset.size();
        Self {
            path: dataset.path().to_path_buf(),
            width,
            height,
            geo_transform: dataset.geo_transform().ok().map(|gt| gt.coefficients()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor<'a> {
    stage: &'static str,
    source_file: &'a Path,
    kind: FileKind,
    identity: &'a Identity,
    metadata: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    raster_meta: Option<&'a RasterMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    area_hectares: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    colors: Option<&'a ElevationColors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raster: Option<RasterSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    layer: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
    written_at: DateTime<Utc>,
}

impl<'a> Descriptor<'a> {
    fn new(stage: &'static str, record: &'a FileRecord) -> Self {
        Self {
            stage,
            source_file: &record.path,
            kind: record.kind,
            identity: &record.identity,
            metadata: &record.extra_metadata,
            raster_meta: record.raster.as_ref(),
            area_hectares: record.area_hectares,
            colors: None,
            raster: None,
            layer: None,
            artifact: None,
            written_at: Utc::now(),
        }
    }

    fn colors(mut self, colors: Option<&'a ElevationColors>) -> Self {
        self.colors = colors;
        self
    }

    fn raster(mut self, dataset: &dyn RasterDataset) -> Self {
        self.raster = Some(RasterSummary::of(dataset));
        self
    }
}

pub struct ManifestSink {
    database_dir: PathBuf,
    map_server_rgb: PathBuf,
    map_server_dem: PathBuf,
    map_server_dem_rgb: PathBuf,
    mesh: MeshPipeline,
}

impl ManifestSink {
    pub fn new(config: &SpotConfig) -> Self {
        Self {
            database_dir: config.database_dir(),
            map_server_rgb: config.map_server_dir(MapServerLayer::Rgb),
            map_server_dem: config.map_server_dir(MapServerLayer::Dem),
            map_server_dem_rgb: config.map_server_dir(MapServerLayer::DemRgb),
            mesh: MeshPipeline::new(config.mesh.clone(), config.paths.tmp.clone()),
        }
    }

    /// `<outputFolder>/<outputFilename>.<stage>.json`
    pub fn descriptor_path(record: &FileRecord, stage: &str) -> PathBuf {
        let slug = stage.replace(' ', "-");
        record
            .identity
            .output_folder
            .join(format!("{}.{slug}.json", record.identity.output_filename))
    }

    fn write(&self, stage: &'static str, path: &Path, descriptor: &Descriptor<'_>) -> Result<()> {
        write_json(path, descriptor).map_err(|e| SpotError::writer(stage, e))?;
        debug!("{stage}: wrote {}", path.display());
        Ok(())
    }

    fn write_own(&self, record: &FileRecord, descriptor: &Descriptor<'_>) -> Result<()> {
        let path = Self::descriptor_path(record, descriptor.stage);
        self.write(descriptor.stage, &path, descriptor)
    }

    fn database_copy(&self, folder: &str, record: &FileRecord, descriptor: &Descriptor<'_>) -> Result<()> {
        let path = self
            .database_dir
            .join(folder)
            .join(format!("{}.json", record.identity.output_name));
        self.write(descriptor.stage, &path, descriptor)
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

impl ExportSink for ManifestSink {
    fn dem_cache(
        &self,
        record: &FileRecord,
        source: &dyn RasterDataset,
        colors: Option<&ElevationColors>,
    ) -> Result<()> {
        let descriptor = Descriptor::new("dem cache", record).colors(colors).raster(source);
        self.write_own(record, &descriptor)?;
        // Elevation ramp values shared with the viewers.
        self.database_copy("mdevalues", record, &descriptor)
    }

    fn quantities(&self, record: &FileRecord, colors: Option<&ElevationColors>) -> Result<()> {
        let descriptor = Descriptor::new("quantities", record).colors(colors);
        self.write_own(record, &descriptor)?;
        self.database_copy("jsondata", record, &descriptor)
    }

    fn preview(
        &self,
        record: &FileRecord,
        working: &dyn RasterDataset,
        colors: Option<&ElevationColors>,
    ) -> Result<()> {
        let descriptor = Descriptor::new("preview", record).colors(colors).raster(working);
        self.write_own(record, &descriptor)
    }

    fn outline(&self, record: &FileRecord, working: &dyn RasterDataset) -> Result<()> {
        let descriptor = Descriptor::new("outline", record).raster(working);
        self.write_own(record, &descriptor)?;
        self.database_copy("outlines", record, &descriptor)
    }

    fn rgb_cache(&self, record: &FileRecord, source: &dyn RasterDataset) -> Result<()> {
        let descriptor = Descriptor::new("rgb cache", record).raster(source);
        self.write_own(record, &descriptor)
    }

    fn map_server_dem(
        &self,
        record: &FileRecord,
        source: &dyn RasterDataset,
        layers: MapServerDem,
    ) -> Result<()> {
        let targets = [
            (layers.plain, MapServerLayer::Dem, &self.map_server_dem),
            (layers.colorized, MapServerLayer::DemRgb, &self.map_server_dem_rgb),
        ];

        for (enabled, layer, dir) in targets {
            if !enabled {
                continue;
            }
            let mut descriptor = Descriptor::new("map server dem", record).raster(source);
            descriptor.layer = Some(layer.folder_name());
            let path = dir.join(format!("{}.json", record.identity.output_filename));
            self.write(descriptor.stage, &path, &descriptor)?;
        }
        Ok(())
    }

    fn map_server_rgb(&self, record: &FileRecord, source: &dyn RasterDataset) -> Result<()> {
        let mut descriptor = Descriptor::new("map server rgb", record).raster(source);
        descriptor.layer = Some(MapServerLayer::Rgb.folder_name());
        let path = self
            .map_server_rgb
            .join(format!("{}.json", record.identity.output_filename));
        self.write(descriptor.stage, &path, &descriptor)
    }

    fn mesh(&self, record: &FileRecord) -> Result<()> {
        let glb = self.mesh.export(
            &record.path,
            &record.identity.output_folder,
            &record.identity.output_filename,
        )?;

        let mut descriptor = Descriptor::new("mesh", record);
        descriptor.artifact = Some(glb);
        self.write_own(record, &descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use crate::raster::memory::MemoryDataset;
    use crate::raster::{ColorRole, GeoTransform};
    use serde_json::Value;

    fn setup() -> (tempfile::TempDir, SpotConfig, FileRecord) {
        let dir = tempfile::tempdir().unwrap();
        let config = SpotConfig {
            paths: PathsConfig {
                input: dir.path().join("in"),
                output: dir.path().join("out"),
                tmp: dir.path().join("tmp"),
                clean_output: false,
            },
            ..SpotConfig::default()
        };

        let folder = config.storage_dir().join("SITE01_A1B2");
        let identity = Identity {
            registry_id: "SITE01".into(),
            map_id: "A1B2".into(),
            output_name: "SITE01_A1B2".into(),
            output_folder: folder,
            output_filename: "SITE01_A1B2_dem".into(),
            generated: false,
        };
        let record = FileRecord::new(
            dir.path().join("in/SITE01_A1B2.tif"),
            "tif".into(),
            FileKind::Dem,
            identity,
            None,
            Some(1.5),
            &["project=north".to_string()],
        );
        (dir, config, record)
    }

    fn read(path: &Path) -> Value {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn quantities_land_in_folder_and_database() {
        let (_dir, config, record) = setup();
        let sink = ManifestSink::new(&config);
        let colors = ElevationColors {
            min: 1.0,
            max: 9.0,
            mean: 5.0,
            low: 1.5,
            high: 8.5,
            valid_pixels: 10,
        };

        sink.quantities(&record, Some(&colors)).unwrap();

        let own = read(&ManifestSink::descriptor_path(&record, "quantities"));
        assert_eq!(own["stage"], "quantities");
        assert_eq!(own["identity"]["registryId"], "SITE01");
        assert_eq!(own["areaHectares"], 1.5);
        assert_eq!(own["colors"]["high"], 8.5);
        assert_eq!(
            own["metadata"],
            serde_json::json!(["project=north", "registroId=SITE01", "mapId=A1B2"])
        );

        let db = read(&config.database_dir().join("jsondata/SITE01_A1B2.json"));
        assert_eq!(db["identity"]["mapId"], "A1B2");
    }

    #[test]
    fn map_server_dem_writes_selected_layers() {
        let (_dir, config, record) = setup();
        let sink = ManifestSink::new(&config);
        let source = MemoryDataset::new("/mem/d.tif", 2, 2, GeoTransform::north_up(0.0, 2.0, 1.0, 1.0))
            .with_constant_band(ColorRole::Gray, 1.0);

        sink.map_server_dem(
            &record,
            &source,
            MapServerDem {
                plain: false,
                colorized: true,
            },
        )
        .unwrap();

        assert!(!config.map_server_dir(MapServerLayer::Dem).join("SITE01_A1B2_dem.json").exists());
        let d = read(&config.map_server_dir(MapServerLayer::DemRgb).join("SITE01_A1B2_dem.json"));
        assert_eq!(d["layer"], "demrgb");
        assert_eq!(d["raster"]["width"], 2);
    }

    #[test]
    fn stage_names_become_file_slugs() {
        let (_dir, _config, record) = setup();
        let path = ManifestSink::descriptor_path(&record, "rgb cache");
        assert!(path.ends_with("SITE01_A1B2/SITE01_A1B2_dem.rgb-cache.json"));
    }
}
