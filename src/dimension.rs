//! Three-tier dimension numbering: original, on-disk and active identities per axis index

use crate::error::{CubeError, Result};
use crate::request::AxisSpan;
use crate::types::Axis;
use crate::utils::{coalesce_runs, Run};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identity of one index along one axis.
///
/// The *original* number is the index in the data set as first imported, the *on-disk* number
/// addresses the backing store and is absent if the index was never materialized, and the
/// *active* number is the position in the view exposed to callers, absent if excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DimensionDescriptor {
    original: Option<u32>,
    on_disk: Option<u32>,
    active: Option<u32>,
}

impl DimensionDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor numbered `number` in all three spaces
    pub fn uniform(number: u32) -> Self {
        Self {
            original: Some(number),
            on_disk: Some(number),
            active: Some(number),
        }
    }

    pub fn with_original(mut self, number: u32) -> Self {
        self.original = Some(number);
        self
    }

    pub fn with_on_disk(mut self, number: u32) -> Self {
        self.on_disk = Some(number);
        self
    }

    pub fn with_active(mut self, number: u32) -> Self {
        self.active = Some(number);
        self
    }

    pub fn original(&self) -> Option<u32> {
        self.original
    }

    pub fn on_disk(&self) -> Option<u32> {
        self.on_disk
    }

    pub fn active(&self) -> Option<u32> {
        self.active
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// A descriptor needs at least one identity to mean anything.
    pub fn is_valid(&self) -> bool {
        self.original.is_some() || self.on_disk.is_some() || self.active.is_some()
    }
}

/// `count` descriptors numbered identically in every space
pub fn descriptors(count: u32) -> Vec<DimensionDescriptor> {
    (0..count).map(DimensionDescriptor::uniform).collect()
}

/// Renumber an active list so that its on-disk numbers match its active numbers.
///
/// Used when the active subset becomes the full extent of a new backing store. Original
/// numbers are preserved so data stays addressable across cubes.
pub fn renumber_on_disk(list: &[DimensionDescriptor]) -> Vec<DimensionDescriptor> {
    list.iter()
        .enumerate()
        .map(|(index, dim)| {
            let mut renumbered = DimensionDescriptor::uniform(index as u32);
            renumbered.original = dim.original;
            renumbered
        })
        .collect()
}

/// Lookup tables for one axis, indexed by active number.
#[derive(Debug, Clone, Default)]
pub struct AxisIndex {
    on_disk: Vec<u32>,
    original: Vec<Option<u32>>,
    by_original: HashMap<u32, u32>,
}

impl AxisIndex {
    /// Build the tables for an active list.
    ///
    /// Active numbers must run `0..n` in list order and every entry must carry an
    /// on-disk number.
    pub fn build(axis: Axis, list: &[DimensionDescriptor]) -> Result<Self> {
        let mut on_disk = Vec::with_capacity(list.len());
        let mut original = Vec::with_capacity(list.len());
        let mut by_original = HashMap::with_capacity(list.len());

        for (index, dim) in list.iter().enumerate() {
            if dim.active != Some(index as u32) {
                return Err(CubeError::invalid(format!(
                    "{} active numbers must be contiguous from 0: entry {} is {:?}",
                    axis, index, dim.active
                )));
            }
            let disk = dim.on_disk.ok_or_else(|| {
                CubeError::invalid(format!(
                    "active {} {} has no on-disk number",
                    axis, index
                ))
            })?;
            on_disk.push(disk);
            original.push(dim.original);
            if let Some(number) = dim.original {
                by_original.insert(number, index as u32);
            }
        }

        Ok(Self {
            on_disk,
            original,
            by_original,
        })
    }

    pub fn len(&self) -> usize {
        self.on_disk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.on_disk.is_empty()
    }

    pub fn on_disk(&self, active: u32) -> Option<u32> {
        self.on_disk.get(active as usize).copied()
    }

    pub fn original(&self, active: u32) -> Option<u32> {
        self.original.get(active as usize).copied().flatten()
    }

    pub fn active_for_original(&self, original: u32) -> Option<u32> {
        self.by_original.get(&original).copied()
    }
}

/// On-disk numbers backing an active span, with their contiguous runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnDiskRange {
    pub numbers: Vec<u32>,
    pub runs: Vec<Run>,
}

impl OnDiskRange {
    pub fn first(&self) -> u32 {
        self.numbers[0]
    }

    pub fn last(&self) -> u32 {
        self.numbers[self.numbers.len() - 1]
    }

    pub fn is_contiguous(&self) -> bool {
        self.runs.len() == 1
    }
}

/// Translates among original, on-disk and active numbering for all three axes.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    rows: AxisIndex,
    columns: AxisIndex,
    bands: AxisIndex,
}

impl Resolver {
    pub fn build(
        rows: &[DimensionDescriptor],
        columns: &[DimensionDescriptor],
        bands: &[DimensionDescriptor],
    ) -> Result<Self> {
        Ok(Self {
            rows: AxisIndex::build(Axis::Row, rows)?,
            columns: AxisIndex::build(Axis::Column, columns)?,
            bands: AxisIndex::build(Axis::Band, bands)?,
        })
    }

    pub fn axis(&self, axis: Axis) -> &AxisIndex {
        match axis {
            Axis::Row => &self.rows,
            Axis::Column => &self.columns,
            Axis::Band => &self.bands,
        }
    }

    /// Map the inclusive active span `start..=stop` to the on-disk numbers backing it.
    pub fn resolve_range(&self, axis: Axis, start: u32, stop: u32) -> Result<OnDiskRange> {
        let index = self.axis(axis);
        if start > stop {
            return Err(CubeError::out_of_bounds(format!(
                "{} range {}..={} is reversed",
                axis, start, stop
            )));
        }
        for endpoint in [start, stop] {
            if index.on_disk(endpoint).is_none() {
                return Err(CubeError::out_of_bounds(format!(
                    "active {} {} has no on-disk identity ({} active)",
                    axis,
                    endpoint,
                    index.len()
                )));
            }
        }

        let numbers = index.on_disk[start as usize..=stop as usize].to_vec();
        let runs = coalesce_runs(&numbers, 0);
        Ok(OnDiskRange { numbers, runs })
    }

    /// On-disk numbers of every active index selected by a strided span.
    ///
    /// Contiguous spans go through [`resolve_range`](Self::resolve_range).
    pub fn resolve_selection(&self, axis: Axis, span: AxisSpan) -> Result<Vec<u32>> {
        if span.stride == 1 && span.start <= span.stop {
            return self
                .resolve_range(axis, span.start, span.stop)
                .map(|range| range.numbers);
        }
        let index = self.axis(axis);
        span.indices()
            .map(|active| {
                index.on_disk(active).ok_or_else(|| {
                    CubeError::out_of_bounds(format!(
                        "active {} {} has no on-disk identity ({} active)",
                        axis,
                        active,
                        index.len()
                    ))
                })
            })
            .collect()
    }

    pub fn on_disk_for_active(&self, axis: Axis, active: u32) -> Option<u32> {
        self.axis(axis).on_disk(active)
    }

    pub fn original_for_active(&self, axis: Axis, active: u32) -> Option<u32> {
        self.axis(axis).original(active)
    }

    pub fn active_for_original(&self, axis: Axis, original: u32) -> Option<u32> {
        self.axis(axis).active_for_original(original)
    }
}
