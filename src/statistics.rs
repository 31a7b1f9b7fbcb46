//! Statistics engine: per-band summary statistics, histograms and percentiles

use crate::cube::RasterCube;
use crate::error::Result;
use crate::request::{AccessRequest, AxisSpan};
use crate::types::{ComplexComponent, EncodingType, InterleaveFormat};
use crate::view::BadValueSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Bins of the fine histogram gathered during the second pass
pub const FINE_BINS: usize = 65536;

/// Bins of the reported histogram
pub const DISPLAY_BINS: usize = 256;

/// Percentile table entries, 0.1 % apart
pub const PERCENTILE_COUNT: usize = 1001;

/// Display histogram of one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub bin_centers: Vec<f64>,
    pub bin_counts: Vec<u64>,
}

impl Histogram {
    fn empty() -> Self {
        Self {
            bin_centers: vec![0.0; DISPLAY_BINS],
            bin_counts: vec![0; DISPLAY_BINS],
        }
    }

    pub fn total(&self) -> u64 {
        self.bin_counts.iter().sum()
    }
}

/// Summary statistics of one band.
///
/// A band whose every value is bad or non-finite reports a zero count and NaN aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    /// Values included in the aggregates
    pub count: u64,
    /// Values skipped as bad or non-finite
    pub bad_value_count: u64,
    pub histogram: Histogram,
    /// Value at each 0.1 % step from 0 % to 100 %
    pub percentiles: Vec<f64>,
}

impl Statistics {
    /// Value at `percent` (0.0..=100.0), rounded to the table's resolution
    pub fn percentile(&self, percent: f64) -> f64 {
        let index = (percent.clamp(0.0, 100.0) * 10.0).round() as usize;
        self.percentiles[index.min(PERCENTILE_COUNT - 1)]
    }
}

/// Everything a cached result depends on besides the data itself
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatisticsKey {
    pub cube: Uuid,
    /// On-disk band
    pub band: u32,
    pub component: ComplexComponent,
    pub bad_values: BadValueSet,
    pub resolution: u32,
}

/// Cache of computed statistics.
///
/// Entries are dropped when data changes, never on reads. Every invalidation bumps an epoch;
/// a result computed across an invalidation of its band is returned but not stored.
#[derive(Debug, Default)]
pub struct StatisticsCache {
    inner: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<StatisticsKey, Arc<Statistics>>,
    /// Bumped by `invalidate_all`
    epoch: u64,
    /// Bumped by `invalidate_band`, per on-disk band
    band_epochs: HashMap<u32, u64>,
}

impl CacheState {
    fn epoch_of(&self, band: u32) -> (u64, u64) {
        (self.epoch, self.band_epochs.get(&band).copied().unwrap_or(0))
    }
}

impl StatisticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &StatisticsKey) -> Option<Arc<Statistics>> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Cached statistics for `key`, computing and storing them on a miss.
    ///
    /// The lock is not held while computing.
    pub fn get_or_compute<F>(&self, key: StatisticsKey, compute: F) -> Result<Arc<Statistics>>
    where
        F: FnOnce() -> Result<Statistics>,
    {
        let started = {
            let state = self.inner.lock();
            if let Some(hit) = state.entries.get(&key) {
                debug!(band = key.band, "statistics cache hit");
                return Ok(hit.clone());
            }
            state.epoch_of(key.band)
        };

        let computed = Arc::new(compute()?);
        let mut state = self.inner.lock();
        if state.epoch_of(key.band) == started {
            state.entries.insert(key, computed.clone());
        } else {
            debug!(band = key.band, "band changed during computation, result not cached");
        }
        Ok(computed)
    }

    pub fn invalidate_all(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.epoch += 1;
    }

    /// Drop every entry for on-disk band `band`
    pub fn invalidate_band(&self, band: u32) {
        let mut state = self.inner.lock();
        state.entries.retain(|key, _| key.band != band);
        *state.band_epochs.entry(band).or_insert(0) += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

/// First-pass accumulators
#[derive(Debug, Default)]
struct Moments {
    count: u64,
    skipped: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Moments {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        // abs keeps rounding from going negative on a constant band
        let numerator = (n * self.sum_sq - self.sum * self.sum).abs();
        ((numerator / n) / (n - 1.0)).sqrt()
    }
}

/// Compute statistics for active band `band` in two passes over the data.
///
/// Values of `bad_values` and non-finite values are excluded. `resolution` samples every
/// n-th row and column. Windows are single-band BSQ, paged to fit `ceiling` bytes.
pub(crate) fn compute(
    cube: &RasterCube,
    band: u32,
    component: ComplexComponent,
    bad_values: &BadValueSet,
    resolution: u32,
    ceiling: u64,
) -> Result<Statistics> {
    let resolution = resolution.max(1);
    let view = cube.view();
    let rows = view.rows().len() as u32;
    let columns = view.columns().len() as u32;
    let encoding = view.encoding();

    let sampled_columns = AxisSpan::new(0, columns - 1, resolution).count() as u64;
    let row_bytes = (sampled_columns * encoding.bytes_per_element() as u64).max(1);
    let page_rows = (ceiling / row_bytes).clamp(1, u32::MAX as u64) as u32;
    let request = AccessRequest::new()
        .with_rows(AxisSpan::new(0, rows - 1, resolution))
        .with_columns(AxisSpan::new(0, columns - 1, resolution))
        .with_bands(AxisSpan::single(band))
        .with_interleave(InterleaveFormat::Bsq)
        .with_concurrent_rows(page_rows);

    let include = |value: f64| value.is_finite() && !bad_values.contains(value);

    let mut moments = Moments::default();
    scan(cube, &request, encoding, component, |value| {
        if include(value) {
            moments.add(value);
        } else {
            moments.skipped += 1;
        }
    })?;

    if moments.count == 0 {
        info!(cube = %cube.id(), band, skipped = moments.skipped, "band has no valid values");
        return Ok(Statistics {
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            std_dev: f64::NAN,
            count: 0,
            bad_value_count: moments.skipped,
            histogram: Histogram::empty(),
            percentiles: vec![f64::NAN; PERCENTILE_COUNT],
        });
    }

    let (min, max) = (moments.min, moments.max);
    let to_bin = if max != min {
        0.999999999 * FINE_BINS as f64 / (max - min)
    } else {
        0.0
    };
    let mut fine = vec![0u64; FINE_BINS];
    scan(cube, &request, encoding, component, |value| {
        if include(value) {
            let bin = ((value - min) * to_bin) as i64;
            fine[bin.clamp(0, FINE_BINS as i64 - 1) as usize] += 1;
        }
    })?;

    let integer = encoding.is_integer_valued(component);
    let bin_centers = bin_centers(min, max, integer);
    let bin_counts = fold_histogram(&fine, min, max, &bin_centers, integer);
    let percentiles = percentiles(&fine, min, max);

    info!(
        cube = %cube.id(),
        band,
        count = moments.count,
        skipped = moments.skipped,
        "computed band statistics"
    );

    Ok(Statistics {
        min,
        max,
        mean: moments.mean(),
        std_dev: moments.std_dev(),
        count: moments.count,
        bad_value_count: moments.skipped,
        histogram: Histogram {
            bin_centers,
            bin_counts,
        },
        percentiles,
    })
}

/// Visit every value selected by `request`, row by row
fn scan<F>(
    cube: &RasterCube,
    request: &AccessRequest,
    encoding: EncodingType,
    component: ComplexComponent,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(f64),
{
    let element = encoding.bytes_per_element();
    let mut accessor = cube.accessor(Some(request.clone()))?;
    while accessor.is_valid() {
        for raw in accessor.row()?.chunks_exact(element) {
            visit(encoding.decode(raw, component));
        }
        accessor.next_row(true)?;
    }
    accessor.release()
}

/// Centers of the display bins.
///
/// Integer data gets whole-number bin widths so that each bin covers the same count of
/// representable values.
fn bin_centers(min: f64, max: f64, integer: bool) -> Vec<f64> {
    let mut range = max - min;
    let one_bin = range == 0.0;
    if one_bin {
        range = 1.0;
    }
    let width = if integer {
        ((range + 0.5) / DISPLAY_BINS as f64).ceil()
    } else {
        range / DISPLAY_BINS as f64
    };

    (0..DISPLAY_BINS)
        .map(|bin| {
            let base = min + bin as f64 * width;
            if integer {
                base + (width - 1.0) / 2.0
            } else if one_bin {
                base
            } else {
                base + width / 2.0
            }
        })
        .collect()
}

/// Fold the fine histogram into the display bins
fn fold_histogram(fine: &[u64], min: f64, max: f64, centers: &[f64], integer: bool) -> Vec<u64> {
    let overall = max - min;
    let mut result_range = centers[DISPLAY_BINS - 1] - centers[0];
    if !integer {
        result_range += overall / DISPLAY_BINS as f64;
    }

    let mut counts = vec![0u64; DISPLAY_BINS];
    if result_range <= 0.0 || overall <= 0.0 {
        counts[0] = fine.iter().sum();
        return counts;
    }

    let conversion = (DISPLAY_BINS as f64 / result_range) * (overall / FINE_BINS as f64);
    for (source, &count) in fine.iter().enumerate() {
        let dest = ((source as f64 * conversion) as usize).min(DISPLAY_BINS - 1);
        counts[dest] += count;
    }
    counts
}

/// Percentile table from the fine histogram, linearly interpolated over steps that fall
/// inside a single fine bin.
fn percentiles(fine: &[u64], min: f64, max: f64) -> Vec<f64> {
    let total: u64 = fine.iter().sum();
    let range = max - min;
    let mut table = vec![0.0; PERCENTILE_COUNT];
    table[0] = min;

    let mut count = 0u64;
    let mut bin: i64 = -1;
    let mut previous = 0usize;
    for percentile in 1..PERCENTILE_COUNT {
        let cutoff = (0.001 * percentile as f64 * total as f64) as u64;
        let mut hit = false;
        while count < cutoff && bin < FINE_BINS as i64 - 1 {
            bin += 1;
            count += fine[bin as usize];
            hit = true;
        }
        table[percentile] = range * bin as f64 / FINE_BINS as f64 + min;
        if hit {
            let span = (percentile - previous) as f64;
            for gap in previous + 1..percentile {
                table[gap] = table[previous]
                    + (table[percentile] - table[previous]) * (gap - previous) as f64 / span;
            }
            previous = percentile;
        }
    }
    table
}
