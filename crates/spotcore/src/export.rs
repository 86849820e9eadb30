//! Export collaborators.
//!
//! The router decides which exports run for a file; an [`ExportSink`] does the
//! writing. Each method receives the measured [`FileRecord`] (identity, output
//! folder and filename, metadata list) plus whichever raster or derived values
//! that export needs. Sinks never mutate the record.

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::elevation::ElevationColors;
use crate::error::{Result, SpotError};
use crate::raster::RasterDataset;
use crate::record::FileRecord;
use crate::router::ExportStep;

/// Which map-server DEM layers to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapServerDem {
    pub plain: bool,
    /// Colorized (shaded) layer.
    pub colorized: bool,
}

pub trait ExportSink: Send + Sync {
    /// Low-resolution DEM tiles for cloud storage.
    fn dem_cache(
        &self,
        record: &FileRecord,
        source: &dyn RasterDataset,
        colors: Option<&ElevationColors>,
    ) -> Result<()>;

    /// Volume and statistics report.
    fn quantities(&self, record: &FileRecord, colors: Option<&ElevationColors>) -> Result<()>;

    /// Preview image rendered from the working raster.
    fn preview(
        &self,
        record: &FileRecord,
        working: &dyn RasterDataset,
        colors: Option<&ElevationColors>,
    ) -> Result<()>;

    /// Footprint polygon vectorized from the working raster.
    fn outline(&self, record: &FileRecord, working: &dyn RasterDataset) -> Result<()>;

    fn rgb_cache(&self, record: &FileRecord, source: &dyn RasterDataset) -> Result<()>;

    fn map_server_dem(
        &self,
        record: &FileRecord,
        source: &dyn RasterDataset,
        layers: MapServerDem,
    ) -> Result<()>;

    fn map_server_rgb(&self, record: &FileRecord, source: &dyn RasterDataset) -> Result<()>;

    /// Convert, normalize and compress a 3D model.
    fn mesh(&self, record: &FileRecord) -> Result<()>;
}

/// One call seen by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedExport {
    pub path: PathBuf,
    pub step: ExportStep,
    pub output_filename: String,
    /// Size of the raster handed to the call, if any.
    pub raster_size: Option<(usize, usize)>,
    pub colors: Option<ElevationColors>,
}

/// Sink that only records what would have been exported.
///
/// Backs `--dry-run` and the orchestration tests. Steps listed with
/// [`RecordingSink::failing`] return an export error instead.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<RecordedExport>>,
    failing: Vec<&'static str>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of the named step fail.
    pub fn failing(mut self, step: &'static str) -> Self {
        self.failing.push(step);
        self
    }

    pub fn calls(&self) -> Vec<RecordedExport> {
        self.calls.lock().clone()
    }

    /// Steps recorded for the file at `path`, in call order.
    pub fn steps_for(&self, path: &std::path::Path) -> Vec<ExportStep> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .map(|c| c.step)
            .collect()
    }

    fn record(
        &self,
        record: &FileRecord,
        step: ExportStep,
        raster: Option<&dyn RasterDataset>,
        colors: Option<&ElevationColors>,
    ) -> Result<()> {
        if self.failing.contains(&step.name()) {
            return Err(SpotError::writer(
                step.name(),
                anyhow::anyhow!("{} rejected by test sink", record.file_name()),
            ));
        }

        self.calls.lock().push(RecordedExport {
            path: record.path.clone(),
            step,
            output_filename: record.identity.output_filename.clone(),
            raster_size: raster.map(|r| r.size()),
            colors: colors.copied(),
        });
        Ok(())
    }
}

impl ExportSink for RecordingSink {
    fn dem_cache(
        &self,
        record: &FileRecord,
        source: &dyn RasterDataset,
        colors: Option<&ElevationColors>,
    ) -> Result<()> {
        self.record(record, ExportStep::DemCache, Some(source), colors)
    }

    fn quantities(&self, record: &FileRecord, colors: Option<&ElevationColors>) -> Result<()> {
        self.record(record, ExportStep::Quantities, None, colors)
    }

    fn preview(
        &self,
        record: &FileRecord,
        working: &dyn RasterDataset,
        colors: Option<&ElevationColors>,
    ) -> Result<()> {
        self.record(record, ExportStep::Preview, Some(working), colors)
    }

    fn outline(&self, record: &FileRecord, working: &dyn RasterDataset) -> Result<()> {
        self.record(record, ExportStep::Outline, Some(working), None)
    }

    fn rgb_cache(&self, record: &FileRecord, source: &dyn RasterDataset) -> Result<()> {
        self.record(record, ExportStep::RgbCache, Some(source), None)
    }

    fn map_server_dem(
        &self,
        record: &FileRecord,
        source: &dyn RasterDataset,
        layers: MapServerDem,
    ) -> Result<()> {
        let step = ExportStep::MapServerDem {
            plain: layers.plain,
            colorized: layers.colorized,
        };
        self.record(record, step, Some(source), None)
    }

    fn map_server_rgb(&self, record: &FileRecord, source: &dyn RasterDataset) -> Result<()> {
        self.record(record, ExportStep::MapServerRgb, Some(source), None)
    }

    fn mesh(&self, record: &FileRecord) -> Result<()> {
        self.record(record, ExportStep::Mesh, None, None)
    }
}
