//! SPOT core: ingestion of aerial-survey rasters and meshes.
//!
//! A run walks one input folder and, for every eligible file:
//!
//! 1. classifies it as a DEM, an RGB orthomosaic or a 3D mesh ([`classify`]),
//! 2. derives its registry id, map id and output location ([`identity`],
//!    with [`tracker`] guarding auto-generated ids),
//! 3. measures its ground area in hectares ([`area`]),
//! 4. routes it through the enabled export pipelines ([`router`]).
//!
//! Tiled datasets living in sub-folders are first stitched into one VRT mosaic
//! descriptor per folder ([`mosaic`]). Raster I/O goes through the
//! [`raster::RasterEngine`] trait; exporters implement [`export::ExportSink`].

pub mod area;
pub mod classify;
pub mod config;
pub mod elevation;
pub mod error;
pub mod export;
pub mod identity;
pub mod mesh;
pub mod mosaic;
pub mod orchestrator;
pub mod raster;
pub mod record;
pub mod router;
pub mod sinks;
pub mod tracker;

pub use config::{FailurePolicy, PrefixedCollision, SpotConfig};
pub use error::{Result, SpotError};
pub use export::{ExportSink, RecordingSink};
pub use identity::{IdentityResolver, MapIdGenerator, UuidMapIds};
pub use mesh::MeshPipeline;
pub use orchestrator::{CancelToken, Orchestrator, RunFailure, RunReport};
pub use raster::{RasterDataset, RasterEngine, RasterError};
pub use record::{FileKind, FileRecord, Identity, RasterMeta};
pub use sinks::ManifestSink;
pub use tracker::DuplicateTracker;
