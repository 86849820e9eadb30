//! Mosaic descriptors for tiled datasets.
//!
//! Each top-level sub-folder of the input directory is one tiled dataset. Its
//! tiles are collected recursively into a manifest and handed to the raster
//! engine, which writes `<input>/<folder>.vrt`. The descriptor then shows up
//! in the top-level listing and is processed like any other raster.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::config::ExtensionsConfig;
use crate::error::{Result, SpotError};
use crate::raster::{MosaicRequest, RasterEngine};

/// Extension of the descriptors this module writes.
pub const MOSAIC_EXTENSION: &str = "vrt";

/// Outcome of [`build_mosaics`].
#[derive(Debug, Default)]
pub struct MosaicOutcome {
    pub built: Vec<PathBuf>,
    /// Sub-folders without a single tile.
    pub empty: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, SpotError)>,
}

/// Tiles under `dir` with a mosaic-tile extension, sorted.
pub fn collect_tiles(dir: &Path, extensions: &ExtensionsConfig) -> Vec<PathBuf> {
    let mut tiles: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("skipping unreadable entry under {}: {e}", dir.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| extensions.is_mosaic_tile(e))
        })
        .collect();

    tiles.sort();
    tiles
}

/// Top-level sub-folders of `input`, sorted.
pub fn tile_folders(input: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(input).map_err(|e| SpotError::io(input, e))? {
        let entry = entry.map_err(|e| SpotError::io(input, e))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Descriptor written for the tiled sub-folder `dir` of `input`.
pub fn mosaic_path(input: &Path, dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mosaic".to_string());
    input.join(format!("{name}.{MOSAIC_EXTENSION}"))
}

/// Descriptors [`build_mosaics`] would write, without touching the disk.
pub fn planned_mosaics(input: &Path, extensions: &ExtensionsConfig) -> Result<Vec<PathBuf>> {
    Ok(tile_folders(input)?
        .into_iter()
        .filter(|dir| !collect_tiles(dir, extensions).is_empty())
        .map(|dir| mosaic_path(input, &dir))
        .collect())
}

/// Build one descriptor per tiled sub-folder of `input`.
///
/// Manifests are temporary files in `tmp`, removed once the engine is done
/// with them. A failing folder is reported and does not stop the others.
pub fn build_mosaics(
    input: &Path,
    tmp: &Path,
    extensions: &ExtensionsConfig,
    engine: &dyn RasterEngine,
) -> Result<MosaicOutcome> {
    let mut outcome = MosaicOutcome::default();

    for dir in tile_folders(input)? {
        let tiles = collect_tiles(&dir, extensions);
        if tiles.is_empty() {
            info!("{}: no tiles, skipping mosaic", dir.display());
            outcome.empty.push(dir);
            continue;
        }

        let output = mosaic_path(input, &dir);
        match build_one(&output, tmp, &tiles, engine) {
            Ok(()) => {
                info!("{}: mosaic of {} tiles", output.display(), tiles.len());
                outcome.built.push(output);
            }
            Err(e) => {
                warn!("{}: mosaic failed: {e}", dir.display());
                outcome.failures.push((dir, e));
            }
        }
    }

    Ok(outcome)
}

fn build_one(output: &Path, tmp: &Path, tiles: &[PathBuf], engine: &dyn RasterEngine) -> Result<()> {
    // Removed on drop, including when the engine fails.
    let mut manifest = tempfile::Builder::new()
        .prefix("mosaic-")
        .suffix(".txt")
        .tempfile_in(tmp)
        .map_err(|e| SpotError::io(tmp, e))?;

    for tile in tiles {
        writeln!(manifest, "{}", tile.display()).map_err(|e| SpotError::io(manifest.path(), e))?;
    }
    manifest.flush().map_err(|e| SpotError::io(manifest.path(), e))?;

    let request = MosaicRequest {
        output,
        manifest: manifest.path(),
        tiles,
        allow_projection_difference: true,
    };

    engine.build_mosaic(&request).map_err(|source| SpotError::Open {
        path: output.to_path_buf(),
        source,
    })
}
