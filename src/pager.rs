//! Paging and transcoding engine.
//!
//! Turns a polished [`AccessRequest`] into an [`AccessPlan`] of on-disk selections, then
//! materializes windows of that plan in the requested element ordering and writes dirty
//! windows back. The unit of I/O is the *paging unit*: one contiguous byte extent of one
//! backing file that serves one row of the window (for band-sequential and line-interleaved
//! storage, one row of one band). When the storage ordering equals the target ordering and
//! the whole window is one extent, the window is a single unit.

use crate::config::EngineConfig;
use crate::dimension::Resolver;
use crate::error::{CubeError, Result};
use crate::layout::LayoutDescriptor;
use crate::request::{AccessRequest, AxisSpan};
use crate::store::BackingStore;
use crate::types::{Axis, InterleaveFormat};
use crate::utils::{coalesce_runs, format_bytes, Run};
use tracing::{debug, warn};

/// A resolved request: what to read, from where, in which ordering and how many rows at once.
#[derive(Debug, Clone)]
pub struct AccessPlan {
    /// Active spans as requested
    pub row_span: AxisSpan,
    pub column_span: AxisSpan,
    pub band_span: AxisSpan,
    /// On-disk numbers of the selected indices, in selection order
    pub rows: Vec<u32>,
    pub columns: Vec<u32>,
    pub bands: Vec<u32>,
    pub target: InterleaveFormat,
    pub writable: bool,
    /// Selected rows per window
    pub page_rows: usize,
    column_runs: Vec<Run>,
    bytes_per_element: usize,
}

impl AccessPlan {
    /// Resolve a polished, validated request.
    ///
    /// Fails with `ResourceExhausted` when one window of the plan would exceed the memory
    /// ceiling. A request without a concurrent-row count is served as a single window.
    pub fn build(
        request: &AccessRequest,
        resolver: &Resolver,
        layout: &LayoutDescriptor,
        config: &EngineConfig,
    ) -> Result<Self> {
        let span = |axis: Axis| {
            request
                .span(axis)
                .ok_or_else(|| CubeError::invalid(format!("request has no {} span", axis)))
        };
        let row_span = span(Axis::Row)?;
        let column_span = span(Axis::Column)?;
        let band_span = span(Axis::Band)?;

        let rows = resolver.resolve_selection(Axis::Row, row_span)?;
        let columns = resolver.resolve_selection(Axis::Column, column_span)?;
        let bands = resolver.resolve_selection(Axis::Band, band_span)?;
        let target = request.interleave().unwrap_or(layout.interleave);

        let total_rows = rows.len();
        let page_rows = request
            .concurrent_rows()
            .map(|n| (n as usize).min(total_rows))
            .unwrap_or(total_rows)
            .max(1);

        let column_runs = coalesce_runs(&columns, config.column_run_gap as u32);
        let plan = Self {
            row_span,
            column_span,
            band_span,
            rows,
            columns,
            bands,
            target,
            writable: request.is_writable(),
            page_rows,
            column_runs,
            bytes_per_element: layout.bytes_per_element(),
        };

        let requested = plan.window_bytes(page_rows);
        let ceiling = config.memory_ceiling_bytes();
        if requested > ceiling {
            warn!(
                requested = %format_bytes(requested as usize),
                ceiling = %format_bytes(ceiling as usize),
                rows = page_rows,
                "window exceeds memory ceiling"
            );
            return Err(CubeError::ResourceExhausted { requested, ceiling });
        }

        Ok(plan)
    }

    /// Elements selected by the whole plan
    pub fn element_count(&self) -> u64 {
        self.rows.len() as u64 * self.columns.len() as u64 * self.bands.len() as u64
    }

    /// Bytes of a window holding `rows` selected rows
    pub fn window_bytes(&self, rows: usize) -> u64 {
        rows as u64
            * self.columns.len() as u64
            * self.bands.len() as u64
            * self.bytes_per_element as u64
    }

    pub fn column_runs(&self) -> &[Run] {
        &self.column_runs
    }

    /// Number of rows in the window beginning at selection index `first_row`
    pub fn rows_in_window(&self, first_row: usize) -> usize {
        self.page_rows.min(self.rows.len().saturating_sub(first_row))
    }
}

/// Rows of `columns` x `bands` elements `element_bytes` wide that fit the global ceiling
pub(crate) fn rows_per_page(columns: usize, bands: usize, element_bytes: usize) -> u32 {
    let row_bytes = (columns * bands * element_bytes).max(1) as u64;
    (crate::config::global().memory_ceiling_bytes() / row_bytes).clamp(1, u32::MAX as u64) as u32
}

/// Materialized block of a plan in the target ordering.
#[derive(Debug)]
pub struct Window {
    first_row: usize,
    rows: usize,
    columns: usize,
    bands: usize,
    bytes_per_element: usize,
    interleave: InterleaveFormat,
    data: Vec<u8>,
    dirty: bool,
    read_operations: usize,
}

impl Window {
    fn new(plan: &AccessPlan, first_row: usize, rows: usize) -> Self {
        Self {
            first_row,
            rows,
            columns: plan.columns.len(),
            bands: plan.bands.len(),
            bytes_per_element: plan.bytes_per_element,
            interleave: plan.target,
            data: vec![0u8; plan.window_bytes(rows) as usize],
            dirty: false,
            read_operations: 0,
        }
    }

    /// Dirty window of `plan` at `first_row` holding `data`, already in target ordering
    pub(crate) fn with_data(plan: &AccessPlan, first_row: usize, data: Vec<u8>) -> Result<Self> {
        let rows = plan.rows_in_window(first_row);
        let expected = plan.window_bytes(rows) as usize;
        if rows == 0 || data.len() != expected {
            return Err(CubeError::invalid(format!(
                "window at row {} needs {} bytes, got {}",
                first_row,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            rows,
            data,
            dirty: true,
            ..Self::new(plan, first_row, 0)
        })
    }

    /// Selection index of the window's first row
    pub fn first_row(&self) -> usize {
        self.first_row
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether selection row `row` lies in this window
    pub fn contains_row(&self, row: usize) -> bool {
        row >= self.first_row && row < self.first_row + self.rows
    }

    /// Byte offset of window element `(row, col, band)`, row relative to the window
    pub fn offset(&self, row: usize, col: usize, band: usize) -> usize {
        let (rows, cols, bands) = (self.rows, self.columns, self.bands);
        let element = match self.interleave {
            InterleaveFormat::Bip => (row * cols + col) * bands + band,
            InterleaveFormat::Bil => (row * bands + band) * cols + col,
            InterleaveFormat::Bsq => (band * rows + row) * cols + col,
        };
        element * self.bytes_per_element
    }

    /// Bytes from one row's first element to the next row's
    pub fn row_size(&self) -> usize {
        let e = self.bytes_per_element;
        match self.interleave {
            InterleaveFormat::Bip | InterleaveFormat::Bil => self.columns * self.bands * e,
            InterleaveFormat::Bsq => self.columns * e,
        }
    }

    /// Bytes from one column's first element to the next column's
    pub fn column_size(&self) -> usize {
        match self.interleave {
            InterleaveFormat::Bip => self.bands * self.bytes_per_element,
            InterleaveFormat::Bil | InterleaveFormat::Bsq => self.bytes_per_element,
        }
    }

    /// Bytes between the same element of consecutive bands
    pub fn band_step(&self) -> usize {
        let e = self.bytes_per_element;
        match self.interleave {
            InterleaveFormat::Bip => e,
            InterleaveFormat::Bil => self.columns * e,
            InterleaveFormat::Bsq => self.rows * self.columns * e,
        }
    }

    /// Bytes making up the element group at one position: all bands for BIP, one element otherwise
    pub fn column_group_len(&self) -> usize {
        match self.interleave {
            InterleaveFormat::Bip => self.bands * self.bytes_per_element,
            InterleaveFormat::Bil | InterleaveFormat::Bsq => self.bytes_per_element,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Reads issued to fill this window
    pub fn read_operations(&self) -> usize {
        self.read_operations
    }
}

/// One contiguous extent of one backing file serving part of a window row.
struct Unit {
    file: usize,
    offset: u64,
    len: usize,
    /// Window-relative row
    row: usize,
    run: Run,
    /// `None` for every selected band, else one band's selection index
    band: Option<usize>,
}

/// Enumerate the paging units of the window rows `first_row..first_row + rows`.
fn units(
    layout: &LayoutDescriptor,
    plan: &AccessPlan,
    first_row: usize,
    rows: usize,
) -> Result<Vec<Unit>> {
    let e = layout.bytes_per_element() as u64;
    let mut units = Vec::new();

    for local in 0..rows {
        let disk_row = plan.rows[first_row + local];
        for run in plan.column_runs() {
            let first_col = plan.columns[run.first];
            let last_col = plan.columns[run.last()];
            match layout.interleave {
                InterleaveFormat::Bip => {
                    let low = plan.bands.iter().copied().min().unwrap_or(0);
                    let high = plan.bands.iter().copied().max().unwrap_or(0);
                    let (file, start) = layout.byte_offset_of(disk_row, first_col, low)?;
                    let (_, end) = layout.byte_offset_of(disk_row, last_col, high)?;
                    units.push(Unit {
                        file,
                        offset: start,
                        len: (end - start + e) as usize,
                        row: local,
                        run: *run,
                        band: None,
                    });
                }
                InterleaveFormat::Bsq | InterleaveFormat::Bil => {
                    for (band_index, &disk_band) in plan.bands.iter().enumerate() {
                        let (file, start) = layout.byte_offset_of(disk_row, first_col, disk_band)?;
                        let (_, end) = layout.byte_offset_of(disk_row, last_col, disk_band)?;
                        units.push(Unit {
                            file,
                            offset: start,
                            len: (end - start + e) as usize,
                            row: local,
                            run: *run,
                            band: Some(band_index),
                        });
                    }
                }
            }
        }
    }

    Ok(units)
}

/// Visit every selected element of a unit with (offset within the unit, offset within the window).
fn for_each_element<F>(
    layout: &LayoutDescriptor,
    plan: &AccessPlan,
    window: &Window,
    unit: &Unit,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(usize, usize),
{
    let disk_row = plan.rows[window.first_row + unit.row];
    let bands = match unit.band {
        Some(index) => index..index + 1,
        None => 0..plan.bands.len(),
    };
    for col in unit.run.first..=unit.run.last() {
        for band in bands.clone() {
            let (_, source) = layout.byte_offset_of(disk_row, plan.columns[col], plan.bands[band])?;
            visit(
                (source - unit.offset) as usize,
                window.offset(unit.row, col, band),
            );
        }
    }
    Ok(())
}

/// Selected elements served by a unit
fn unit_elements(plan: &AccessPlan, unit: &Unit) -> usize {
    let bands = if unit.band.is_some() {
        1
    } else {
        plan.bands.len()
    };
    unit.run.len * bands
}

/// The single extent holding the whole window, when the window needs no reordering.
fn contiguous_extent(
    layout: &LayoutDescriptor,
    plan: &AccessPlan,
    first_row: usize,
    rows: usize,
) -> Result<Option<(usize, u64, usize)>> {
    if plan.target != layout.interleave {
        return Ok(None);
    }
    let consecutive = |values: &[u32]| values.windows(2).all(|w| w[1] == w[0] + 1);
    let window_rows = &plan.rows[first_row..first_row + rows];
    if !consecutive(window_rows) || !consecutive(&plan.columns) || !consecutive(&plan.bands) {
        return Ok(None);
    }

    let e = layout.bytes_per_element() as u64;
    let (Some(&r0), Some(&r1)) = (window_rows.first(), window_rows.last()) else {
        return Ok(None);
    };
    let (c0, c1) = (plan.columns[0], plan.columns[plan.columns.len() - 1]);
    let (b0, b1) = (plan.bands[0], plan.bands[plan.bands.len() - 1]);

    let (file, start) = layout.byte_offset_of(r0, c0, b0)?;
    let (last_file, end) = layout.byte_offset_of(r1, c1, b1)?;
    let len = plan.window_bytes(rows);
    if file == last_file && end >= start && end - start + e == len {
        Ok(Some((file, start, len as usize)))
    } else {
        Ok(None)
    }
}

/// Read the window of `plan` that starts at selection row `first_row`.
pub fn materialize(
    layout: &LayoutDescriptor,
    store: &mut dyn BackingStore,
    plan: &AccessPlan,
    first_row: usize,
) -> Result<Window> {
    let rows = plan.rows_in_window(first_row);
    if rows == 0 {
        return Err(CubeError::out_of_bounds(format!(
            "window start {} is past the {} selected rows",
            first_row,
            plan.rows.len()
        )));
    }
    let mut window = Window::new(plan, first_row, rows);

    if let Some((file, offset, _)) = contiguous_extent(layout, plan, first_row, rows)? {
        store.read_at(file, offset, &mut window.data)?;
        window.read_operations = 1;
        debug!(
            first_row,
            rows,
            bytes = window.data.len(),
            "materialized window as one extent"
        );
        return Ok(window);
    }

    let units = units(layout, plan, first_row, rows)?;
    let shape = window_shape(&window);
    let mut scratch = Vec::new();
    let e = layout.bytes_per_element();
    for unit in &units {
        scratch.resize(unit.len, 0);
        store.read_at(unit.file, unit.offset, &mut scratch)?;
        let data = &mut window.data;
        for_each_element(layout, plan, &shape, unit, |src, dst| {
            data[dst..dst + e].copy_from_slice(&scratch[src..src + e]);
        })?;
    }
    window.read_operations = units.len();
    debug!(
        first_row,
        rows,
        units = units.len(),
        storage = %layout.interleave,
        target = %plan.target,
        "materialized window"
    );
    Ok(window)
}

/// Write a window back to its store. Each paging unit is persisted with one write.
pub fn flush(
    layout: &LayoutDescriptor,
    store: &mut dyn BackingStore,
    plan: &AccessPlan,
    window: &Window,
) -> Result<()> {
    if !store.is_writable() {
        return Err(CubeError::invalid("backing store is read-only"));
    }

    if let Some((file, offset, _)) = contiguous_extent(layout, plan, window.first_row, window.rows)? {
        store.write_at(file, offset, &window.data)?;
        store.sync()?;
        debug!(first_row = window.first_row, rows = window.rows, "flushed window as one extent");
        return Ok(());
    }

    let units = units(layout, plan, window.first_row, window.rows)?;
    let e = layout.bytes_per_element();
    let mut scratch = Vec::new();
    for unit in &units {
        scratch.resize(unit.len, 0);
        // bridged gaps and unselected bands keep their stored bytes
        if unit_elements(plan, unit) * e != unit.len {
            store.read_at(unit.file, unit.offset, &mut scratch)?;
        }
        for_each_element(layout, plan, window, unit, |src, dst| {
            scratch[src..src + e].copy_from_slice(&window.data[dst..dst + e]);
        })?;
        store.write_at(unit.file, unit.offset, &scratch)?;
    }
    store.sync()?;
    debug!(
        first_row = window.first_row,
        rows = window.rows,
        units = units.len(),
        "flushed window"
    );
    Ok(())
}

/// Geometry-only copy of a window, so its buffer can be borrowed mutably while addressing.
fn window_shape(window: &Window) -> Window {
    Window {
        first_row: window.first_row,
        rows: window.rows,
        columns: window.columns,
        bands: window.bands,
        bytes_per_element: window.bytes_per_element,
        interleave: window.interleave,
        data: Vec::new(),
        dirty: false,
        read_operations: 0,
    }
}
