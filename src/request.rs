//! Access requests - what window of a cube a caller wants, and in which ordering

use crate::error::{CubeError, Result};
use crate::types::{Axis, InterleaveFormat};
use crate::view::ViewDescriptor;
use serde::{Deserialize, Serialize};

/// Inclusive, strided span of active numbers along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisSpan {
    pub start: u32,
    /// Inclusive; need not lie on the stride lattice
    pub stop: u32,
    pub stride: u32,
}

impl AxisSpan {
    pub fn new(start: u32, stop: u32, stride: u32) -> Self {
        Self {
            start,
            stop,
            stride,
        }
    }

    /// Contiguous span `start..=stop`
    pub fn range(start: u32, stop: u32) -> Self {
        Self::new(start, stop, 1)
    }

    pub fn single(index: u32) -> Self {
        Self::new(index, index, 1)
    }

    /// Number of selected indices
    pub fn count(&self) -> usize {
        if self.stride == 0 || self.start > self.stop {
            0
        } else {
            ((self.stop - self.start) / self.stride) as usize + 1
        }
    }

    /// Every selected active number, in order
    pub fn indices(&self) -> impl Iterator<Item = u32> {
        let (start, stop) = (self.start, self.stop);
        let step = self.stride.max(1) as usize;
        let upper = (start <= stop).then_some(stop);
        upper
            .into_iter()
            .flat_map(move |stop| (start..=stop).step_by(step))
    }

    /// Selection index of `active`, if it lies on this span's lattice
    pub fn position_of(&self, active: u32) -> Option<usize> {
        if self.stride == 0 || active < self.start || active > self.stop {
            return None;
        }
        let offset = active - self.start;
        (offset % self.stride == 0).then(|| (offset / self.stride) as usize)
    }

    /// Active number of the selection index `position`
    pub fn active_at(&self, position: usize) -> u32 {
        self.start + position as u32 * self.stride
    }
}

/// A caller's description of the window it wants.
///
/// Unset axes default to the entire active extent, an unset ordering defaults to the cube's
/// storage ordering, and requests are read-only unless marked writable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRequest {
    rows: Option<AxisSpan>,
    columns: Option<AxisSpan>,
    bands: Option<AxisSpan>,
    interleave: Option<InterleaveFormat>,
    writable: bool,
    concurrent_rows: Option<u32>,
}

impl AccessRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// One element at active `(row, column, band)`
    pub fn pixel(row: u32, column: u32, band: u32) -> Self {
        Self::new()
            .with_rows(AxisSpan::single(row))
            .with_columns(AxisSpan::single(column))
            .with_bands(AxisSpan::single(band))
    }

    pub fn with_rows(mut self, span: AxisSpan) -> Self {
        self.rows = Some(span);
        self
    }

    pub fn with_columns(mut self, span: AxisSpan) -> Self {
        self.columns = Some(span);
        self
    }

    pub fn with_bands(mut self, span: AxisSpan) -> Self {
        self.bands = Some(span);
        self
    }

    pub fn with_interleave(mut self, interleave: InterleaveFormat) -> Self {
        self.interleave = Some(interleave);
        self
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Serve the request incrementally, `rows` selected rows per window
    pub fn with_concurrent_rows(mut self, rows: u32) -> Self {
        self.concurrent_rows = Some(rows);
        self
    }

    /// Drop any concurrent-row count so the request is served as one window
    pub fn single_window(mut self) -> Self {
        self.concurrent_rows = None;
        self
    }

    pub fn span(&self, axis: Axis) -> Option<AxisSpan> {
        match axis {
            Axis::Row => self.rows,
            Axis::Column => self.columns,
            Axis::Band => self.bands,
        }
    }

    pub fn interleave(&self) -> Option<InterleaveFormat> {
        self.interleave
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn concurrent_rows(&self) -> Option<u32> {
        self.concurrent_rows
    }

    /// Fill unset fields from the view: full active extents, stride 1, `native` ordering.
    pub fn polish(mut self, view: &ViewDescriptor, native: InterleaveFormat) -> Self {
        let full = |count: usize| AxisSpan::range(0, (count as u32).saturating_sub(1));
        self.rows.get_or_insert(full(view.rows().len()));
        self.columns.get_or_insert(full(view.columns().len()));
        self.bands.get_or_insert(full(view.bands().len()));
        self.interleave.get_or_insert(native);
        self
    }

    /// Check a polished request against the view's active extents.
    pub fn validate(&self, view: &ViewDescriptor) -> Result<()> {
        for axis in [Axis::Row, Axis::Column, Axis::Band] {
            let span = self.span(axis).ok_or_else(|| {
                CubeError::invalid(format!("request has no {} span; polish it first", axis))
            })?;
            if span.stride == 0 {
                return Err(CubeError::invalid(format!("{} stride must be >= 1", axis)));
            }
            if span.start > span.stop {
                return Err(CubeError::out_of_bounds(format!(
                    "{} start {} is after stop {}",
                    axis, span.start, span.stop
                )));
            }
            let active = view.active(axis).len();
            if span.stop as usize >= active {
                return Err(CubeError::out_of_bounds(format!(
                    "{} {} is outside the {} active {}s",
                    axis, span.stop, active, axis
                )));
            }
        }
        if self.concurrent_rows == Some(0) {
            return Err(CubeError::invalid("concurrent rows must be >= 1"));
        }
        Ok(())
    }
}
