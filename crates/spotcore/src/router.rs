//! Per-file export routing.
//!
//! [`plan`] turns a file kind and the export switches into an ordered list of
//! steps; [`Router`] executes it against an [`ExportSink`]. The downsampled
//! working raster and the elevation color values are produced at most once
//! per file and live until the last step has run.

use std::sync::Arc;

use log::{debug, info};

use crate::config::{ExportsConfig, WorkingRasterConfig};
use crate::elevation::{elevation_colors, ElevationColors};
use crate::error::{Result, SpotError};
use crate::export::{ExportSink, MapServerDem};
use crate::raster::{RasterDataset, RasterError};
use crate::record::{FileKind, FileRecord, RasterMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStep {
    DemCache,
    Quantities,
    Preview,
    Outline,
    RgbCache,
    MapServerDem { plain: bool, colorized: bool },
    MapServerRgb,
    Mesh,
}

impl ExportStep {
    pub fn name(self) -> &'static str {
        match self {
            ExportStep::DemCache => "dem cache",
            ExportStep::Quantities => "quantities",
            ExportStep::Preview => "preview",
            ExportStep::Outline => "outline",
            ExportStep::RgbCache => "rgb cache",
            ExportStep::MapServerDem { .. } => "map server dem",
            ExportStep::MapServerRgb => "map server rgb",
            ExportStep::Mesh => "mesh",
        }
    }

    /// Whether the step reads the downsampled working raster.
    pub fn uses_working_raster(self) -> bool {
        matches!(self, ExportStep::Preview | ExportStep::Outline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPlan {
    /// Materialize the working raster (and, for DEMs, the color values) first.
    pub working_raster: bool,
    pub steps: Vec<ExportStep>,
}

/// Ordered export steps for one file.
pub fn plan(kind: FileKind, exports: &ExportsConfig) -> ExportPlan {
    let mut steps = Vec::new();

    match kind {
        FileKind::Dem => {
            let cache = exports.dem_cache.enabled;
            let quantities = exports.dem_cache.quantities;
            let preview = exports.previews.enabled;

            if cache {
                steps.push(ExportStep::DemCache);
            }
            if quantities {
                steps.push(ExportStep::Quantities);
            }
            if preview {
                steps.push(ExportStep::Preview);
            }

            let plain = exports.map_server_dem.enabled;
            let colorized = exports.map_server_dem_rgb.enabled;
            if plain || colorized {
                steps.push(ExportStep::MapServerDem { plain, colorized });
            }

            ExportPlan {
                working_raster: cache || quantities || preview,
                steps,
            }
        }
        FileKind::Rgb => {
            let outline = exports.outlines.enabled;
            let preview = exports.previews.enabled;

            if outline {
                steps.push(ExportStep::Outline);
            }
            if exports.rgb_cache.enabled {
                steps.push(ExportStep::RgbCache);
            }
            if preview {
                steps.push(ExportStep::Preview);
            }
            if exports.map_server_rgb.enabled {
                steps.push(ExportStep::MapServerRgb);
            }

            ExportPlan {
                working_raster: outline || preview,
                steps,
            }
        }
        FileKind::Mesh3D => ExportPlan {
            working_raster: false,
            steps: vec![ExportStep::Mesh],
        },
    }
}

/// Resolution giving a working raster whose longest side is at most
/// `max_dimension` pixels, never finer than the source.
pub fn working_resolution(meta: &RasterMeta, max_dimension: usize) -> f64 {
    let px = meta.pixel_size_x.abs();
    let py = meta.pixel_size_y.abs();
    let extent = (meta.width as f64 * px).max(meta.height as f64 * py);
    (extent / max_dimension.max(1) as f64).max(px.max(py))
}

pub struct Router {
    exports: ExportsConfig,
    working: WorkingRasterConfig,
    sink: Arc<dyn ExportSink>,
}

impl Router {
    pub fn new(exports: ExportsConfig, working: WorkingRasterConfig, sink: Arc<dyn ExportSink>) -> Self {
        Self {
            exports,
            working,
            sink,
        }
    }

    /// Run every enabled export for `record`, in plan order.
    ///
    /// `source` is the open raster for DEM and RGB records and `None` for
    /// meshes. Returns the steps that ran; the first failing step ends the
    /// file.
    pub fn route(&self, record: &FileRecord, source: Option<&dyn RasterDataset>) -> Result<Vec<ExportStep>> {
        let plan = plan(record.kind, &self.exports);

        if plan.steps.is_empty() {
            info!("{}: no exports enabled for {}", record.file_name(), record.kind);
            return Ok(Vec::new());
        }

        let raster_missing = || SpotError::ClassificationAmbiguous {
            path: record.path.clone(),
            reason: format!("{} record has no open raster", record.kind),
        };
        let open_err = |source: RasterError| SpotError::Open {
            path: record.path.clone(),
            source,
        };

        // -----------------------------------------------------------------
        // Shared working raster and color values.
        // -----------------------------------------------------------------
        let working: Option<Box<dyn RasterDataset>> = if plan.working_raster {
            let source = source.ok_or_else(raster_missing)?;
            let meta = record.raster.as_ref().ok_or_else(raster_missing)?;
            let resolution = working_resolution(meta, self.working.max_dimension);
            let working = source.resample(resolution).map_err(open_err)?;
            let (w, h) = working.size();
            debug!("{}: working raster {w}x{h} at {resolution}", record.file_name());
            Some(working)
        } else {
            None
        };

        let colors: Option<ElevationColors> = match (&working, record.kind) {
            (Some(working), FileKind::Dem) => {
                let no_data = record.raster.as_ref().and_then(|meta| meta.no_data_value);
                elevation_colors(working.as_ref(), no_data).map_err(open_err)?
            }
            _ => None,
        };

        // -----------------------------------------------------------------
        // Steps.
        // -----------------------------------------------------------------
        let mut ran = Vec::with_capacity(plan.steps.len());
        for step in plan.steps {
            info!("{}: {}", record.file_name(), step.name());

            let sink = self.sink.as_ref();
            match step {
                ExportStep::DemCache => {
                    sink.dem_cache(record, source.ok_or_else(raster_missing)?, colors.as_ref())?
                }
                ExportStep::Quantities => sink.quantities(record, colors.as_ref())?,
                ExportStep::Preview => {
                    let working = working.as_deref().ok_or_else(raster_missing)?;
                    sink.preview(record, working, colors.as_ref())?
                }
                ExportStep::Outline => {
                    let working = working.as_deref().ok_or_else(raster_missing)?;
                    sink.outline(record, working)?
                }
                ExportStep::RgbCache => sink.rgb_cache(record, source.ok_or_else(raster_missing)?)?,
                ExportStep::MapServerDem { plain, colorized } => sink.map_server_dem(
                    record,
                    source.ok_or_else(raster_missing)?,
                    MapServerDem { plain, colorized },
                )?,
                ExportStep::MapServerRgb => {
                    sink.map_server_rgb(record, source.ok_or_else(raster_missing)?)?
                }
                ExportStep::Mesh => sink.mesh(record)?,
            }

            ran.push(step);
        }

        drop(working);
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DemCacheToggle, Toggle};

    fn all_on() -> ExportsConfig {
        ExportsConfig {
            dem_cache: DemCacheToggle {
                enabled: true,
                quantities: true,
            },
            rgb_cache: Toggle::ON,
            previews: Toggle::ON,
            outlines: Toggle::ON,
            map_server_rgb: Toggle::ON,
            map_server_dem: Toggle::ON,
            map_server_dem_rgb: Toggle::ON,
            mesh: Toggle::ON,
        }
    }

    #[test]
    fn dem_order() {
        let p = plan(FileKind::Dem, &all_on());
        assert!(p.working_raster);
        assert_eq!(
            p.steps,
            vec![
                ExportStep::DemCache,
                ExportStep::Quantities,
                ExportStep::Preview,
                ExportStep::MapServerDem {
                    plain: true,
                    colorized: true
                },
            ]
        );
    }

    #[test]
    fn rgb_order() {
        let p = plan(FileKind::Rgb, &all_on());
        assert!(p.working_raster);
        assert_eq!(
            p.steps,
            vec![
                ExportStep::Outline,
                ExportStep::RgbCache,
                ExportStep::Preview,
                ExportStep::MapServerRgb
            ]
        );
    }

    #[test]
    fn mesh_ignores_raster_switches() {
        let p = plan(FileKind::Mesh3D, &all_on());
        assert!(!p.working_raster);
        assert_eq!(p.steps, vec![ExportStep::Mesh]);
    }

    #[test]
    fn map_server_dem_alone_needs_no_working_raster() {
        let exports = ExportsConfig {
            map_server_dem_rgb: Toggle::ON,
            ..ExportsConfig::none()
        };
        let p = plan(FileKind::Dem, &exports);
        assert!(!p.working_raster);
        assert_eq!(
            p.steps,
            vec![ExportStep::MapServerDem {
                plain: false,
                colorized: true
            }]
        );
    }

    #[test]
    fn quantities_alone_still_gets_colors() {
        let exports = ExportsConfig {
            dem_cache: DemCacheToggle {
                enabled: false,
                quantities: true,
            },
            ..ExportsConfig::none()
        };
        let p = plan(FileKind::Dem, &exports);
        assert!(p.working_raster);
        assert_eq!(p.steps, vec![ExportStep::Quantities]);
    }

    #[test]
    fn rgb_outline_alone_materializes_working_raster() {
        let exports = ExportsConfig {
            outlines: Toggle::ON,
            ..ExportsConfig::none()
        };
        let p = plan(FileKind::Rgb, &exports);
        assert!(p.working_raster);
        assert!(p.steps.iter().all(|s| s.uses_working_raster()));
    }

    #[test]
    fn nothing_enabled_is_empty() {
        assert!(plan(FileKind::Dem, &ExportsConfig::none()).steps.is_empty());
        assert!(plan(FileKind::Rgb, &ExportsConfig::none()).steps.is_empty());
    }

    #[test]
    fn working_resolution_caps_longest_side() {
        let meta = RasterMeta {
            width: 20_000,
            height: 10_000,
            band_count: 1,
            has_alpha: false,
            no_data_value: None,
            pixel_size_x: 0.05,
            pixel_size_y: 0.05,
            epsg: None,
            capture_date: None,
            gsd_cm: 5.0,
        };
        // 1000 m across / 1024 px.
        assert!((working_resolution(&meta, 1024) - 1000.0 / 1024.0).abs() < 1e-12);
        // Small rasters keep their native resolution.
        let small = RasterMeta { width: 100, height: 100, ..meta };
        assert_eq!(working_resolution(&small, 1024), 0.05);
    }
}
