//! Representative elevation values for color ramps.

use serde::Serialize;

use crate::raster::{RasterDataset, RasterResult};

/// Low/high percentiles clip outliers (spikes, pits) from color ramps.
pub const LOW_PERCENTILE: f64 = 2.0;
pub const HIGH_PERCENTILE: f64 = 98.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevationColors {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// 2nd percentile.
    pub low: f64,
    /// 98th percentile.
    pub high: f64,
    pub valid_pixels: u64,
}

/// Nearest-rank percentile of sorted, non-empty `values`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64 / 100.0).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Compute color values from band 1 of `working`.
///
/// `no_data` is the file's normalized nodata value, not the band's raw one.
/// Nodata and NaN are excluded, as are pixels masked out by a second band
/// equal to zero. `None` when no pixel is valid.
pub fn elevation_colors(
    working: &dyn RasterDataset,
    no_data: Option<f64>,
) -> RasterResult<Option<ElevationColors>> {
    let (width, height) = working.size();
    let has_mask = working.band_count() >= 2;

    let mut values = Vec::with_capacity(width * height);
    let mut line = vec![0.0; width];
    let mut mask = vec![1.0; width];

    for row in 0..height {
        working.read_scanline(1, row, &mut line)?;
        if has_mask {
            working.read_scanline(2, row, &mut mask)?;
        }

        for (v, m) in line.iter().zip(&mask) {
            if v.is_nan() || no_data == Some(*v) || *m == 0.0 {
                continue;
            }
            values.push(*v);
        }
    }

    if values.is_empty() {
        return Ok(None);
    }

    values.sort_by(f64::total_cmp);
    let sum: f64 = values.iter().sum();

    Ok(Some(ElevationColors {
        min: values[0],
        max: values[values.len() - 1],
        mean: sum / values.len() as f64,
        low: percentile(&values, LOW_PERCENTILE),
        high: percentile(&values, HIGH_PERCENTILE),
        valid_pixels: values.len() as u64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::memory::MemoryDataset;
    use crate::raster::{ColorRole, GeoTransform};
    use approx::assert_relative_eq;

    #[test]
    fn ramp_statistics() {
        let data: Vec<f64> = (1..=100).map(f64::from).collect();
        let ds = MemoryDataset::new("/mem/dem.tif", 10, 10, GeoTransform::IDENTITY)
            .with_band(ColorRole::Gray, data);

        let colors = elevation_colors(&ds, None).unwrap().unwrap();
        assert_eq!(colors.min, 1.0);
        assert_eq!(colors.max, 100.0);
        assert_relative_eq!(colors.mean, 50.5);
        assert_eq!(colors.low, 2.0);
        assert_eq!(colors.high, 98.0);
        assert_eq!(colors.valid_pixels, 100);
    }

    #[test]
    fn nodata_nan_and_mask_are_ignored() {
        let ds = MemoryDataset::new("/mem/dem.tif", 4, 1, GeoTransform::IDENTITY)
            .with_band(ColorRole::Gray, vec![-9999.0, f64::NAN, 12.0, 40.0])
            .with_no_data(-9999.0)
            .with_band(ColorRole::Alpha, vec![255.0, 255.0, 255.0, 0.0]);

        let colors = elevation_colors(&ds, Some(-9999.0)).unwrap().unwrap();
        assert_eq!(colors.valid_pixels, 1);
        assert_eq!(colors.min, 12.0);
        assert_eq!(colors.max, 12.0);
    }

    #[test]
    fn nothing_valid_is_none() {
        let ds = MemoryDataset::new("/mem/dem.tif", 2, 1, GeoTransform::IDENTITY)
            .with_band(ColorRole::Gray, vec![0.0, 0.0])
            .with_no_data(0.0);
        assert!(elevation_colors(&ds, Some(0.0)).unwrap().is_none());
    }

    #[test]
    fn normalized_nodata_wins_over_the_band_value() {
        // Raw nodata is NaN; the file-level value after normalization is 0.
        let ds = MemoryDataset::new("/mem/dem.tif", 4, 1, GeoTransform::IDENTITY)
            .with_band(ColorRole::Gray, vec![0.0, 0.0, 8.0, 10.0])
            .with_no_data(f64::NAN);

        let colors = elevation_colors(&ds, Some(0.0)).unwrap().unwrap();
        assert_eq!(colors.valid_pixels, 2);
        assert_eq!(colors.min, 8.0);
        assert_relative_eq!(colors.mean, 9.0);
    }
}
