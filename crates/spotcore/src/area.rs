//! Ground area estimation.
//!
//! Without an alpha band the whole raster extent counts. With one, the
//! bounding rectangle includes transparent padding from mosaicking, so valid
//! pixels are counted exactly on a coarse copy whose size no longer depends on
//! the original resolution.

use log::debug;

use crate::raster::{RasterDataset, RasterResult};
use crate::record::RasterMeta;

/// Ground resolution, in source units per pixel, of the counting copy.
pub const COARSE_RESOLUTION: f64 = 20.0;

pub const M2_PER_HECTARE: f64 = 10_000.0;

/// `width * height * pixelArea / 10000`.
pub fn full_extent_hectares(meta: &RasterMeta) -> f64 {
    (meta.width * meta.height) as f64 * meta.pixel_area() / M2_PER_HECTARE
}

/// Pixels of `band` whose value is strictly greater than zero.
pub fn count_valid_pixels(dataset: &dyn RasterDataset, band: usize) -> RasterResult<u64> {
    let (width, height) = dataset.size();
    let mut line = vec![0.0; width];
    let mut valid = 0u64;

    for row in 0..height {
        dataset.read_scanline(band, row, &mut line)?;
        valid += line.iter().filter(|v| **v > 0.0).count() as u64;
    }

    Ok(valid)
}

/// Area in hectares covered by `dataset`.
///
/// `meta` must describe `dataset`. The coarse copy is dropped before this
/// returns, whether counting succeeded or not.
pub fn estimate_area(
    dataset: &dyn RasterDataset,
    meta: &RasterMeta,
    coarse_resolution: f64,
) -> RasterResult<f64> {
    if !meta.has_alpha {
        return Ok(full_extent_hectares(meta));
    }

    let coarse = dataset.resample(coarse_resolution)?;
    let valid = count_valid_pixels(coarse.as_ref(), meta.band_count)?;
    let pixel_area = coarse.geo_transform()?.pixel_area().abs();

    let (w, h) = coarse.size();
    debug!(
        "{}: {valid} of {} coarse pixels valid at {coarse_resolution} units/pixel",
        dataset.path().display(),
        w * h
    );

    Ok(valid as f64 * pixel_area / M2_PER_HECTARE)
}
