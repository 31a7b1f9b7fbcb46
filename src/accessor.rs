//! Accessor - a cursor over a materialized window of a cube

use crate::cube::RasterCube;
use crate::error::{CubeError, Result};
use crate::pager::{self, AccessPlan, Window};
use crate::types::{ComplexComponent, EncodingType, InterleaveFormat};
use tracing::{debug, error};

/// Cursor over the elements selected by an [`AccessRequest`](crate::AccessRequest).
///
/// The cursor addresses one pixel (row, column) of the selection at a time; all selected
/// bands of that pixel are reachable through [`element`](Self::element). Positions are
/// selection indices internally and active numbers at the API. Moving past the last row or
/// column invalidates the accessor.
///
/// Dirty windows are written back when the cursor leaves them, on [`release`](Self::release)
/// and on drop.
pub struct Accessor<'a> {
    cube: &'a RasterCube,
    plan: AccessPlan,
    window: Option<Window>,
    encoding: EncodingType,
    row: usize,
    column: usize,
    generation: u64,
    valid: bool,
}

impl<'a> Accessor<'a> {
    pub(crate) fn new(
        cube: &'a RasterCube,
        plan: AccessPlan,
        window: Window,
        encoding: EncodingType,
        generation: u64,
    ) -> Self {
        Self {
            cube,
            plan,
            window: Some(window),
            encoding,
            row: 0,
            column: 0,
            generation,
            valid: true,
        }
    }

    /// Whether the cursor designates an element
    pub fn is_valid(&self) -> bool {
        self.valid && self.cube.generation() == self.generation
    }

    /// Active row number under the cursor
    pub fn current_row(&self) -> u32 {
        self.plan.row_span.active_at(self.row)
    }

    /// Active column number under the cursor
    pub fn current_column(&self) -> u32 {
        self.plan.column_span.active_at(self.column)
    }

    /// Selected rows
    pub fn row_count(&self) -> usize {
        self.plan.rows.len()
    }

    /// Selected columns
    pub fn column_count(&self) -> usize {
        self.plan.columns.len()
    }

    /// Selected bands
    pub fn band_count(&self) -> usize {
        self.plan.bands.len()
    }

    /// Ordering of the elements handed out by this accessor
    pub fn interleave(&self) -> InterleaveFormat {
        self.plan.target
    }

    pub fn encoding(&self) -> EncodingType {
        self.encoding
    }

    pub fn is_writable(&self) -> bool {
        self.plan.writable
    }

    /// Bytes between the same element of consecutive bands
    pub fn band_step(&self) -> usize {
        self.window.as_ref().map(Window::band_step).unwrap_or(0)
    }

    /// Move to active `(row, column)`.
    ///
    /// Both must be selected by the request; nothing is clamped. A valid move revalidates an
    /// accessor that ran off the end.
    pub fn to_pixel(&mut self, row: u32, column: u32) -> Result<()> {
        self.check_generation()?;
        let row_pos = self.plan.row_span.position_of(row).ok_or_else(|| {
            CubeError::out_of_bounds(format!(
                "row {} is not selected by {:?}",
                row, self.plan.row_span
            ))
        })?;
        let column_pos = self.plan.column_span.position_of(column).ok_or_else(|| {
            CubeError::out_of_bounds(format!(
                "column {} is not selected by {:?}",
                column, self.plan.column_span
            ))
        })?;
        if row_pos >= self.plan.rows.len() || column_pos >= self.plan.columns.len() {
            return Err(CubeError::out_of_bounds(format!(
                "pixel ({}, {}) lies beyond the selection",
                row, column
            )));
        }

        self.page_to(row_pos)?;
        self.row = row_pos;
        self.column = column_pos;
        self.valid = true;
        Ok(())
    }

    /// Advance one selected row, optionally back to the first selected column.
    pub fn next_row(&mut self, reset_column: bool) -> Result<()> {
        self.next_rows(1, reset_column)
    }

    pub fn next_rows(&mut self, count: usize, reset_column: bool) -> Result<()> {
        self.ensure_on_rows()?;
        let target = self.row + count;
        if reset_column {
            self.column = 0;
        }
        if target >= self.plan.rows.len() {
            self.flush_window()?;
            self.row = self.plan.rows.len();
            self.valid = false;
            return Ok(());
        }
        self.page_to(target)?;
        self.row = target;
        self.valid = self.column < self.plan.columns.len();
        Ok(())
    }

    /// Advance one selected column within the current row.
    pub fn next_column(&mut self) -> Result<()> {
        self.next_columns(1)
    }

    pub fn next_columns(&mut self, count: usize) -> Result<()> {
        self.ensure_on_rows()?;
        self.column += count;
        self.valid = self.column < self.plan.columns.len();
        Ok(())
    }

    /// The current row of the window.
    ///
    /// Every selected column and band for BIP and BIL; the first selected band's row for BSQ,
    /// whose other bands lie [`band_step`](Self::band_step) bytes apart.
    pub fn row(&self) -> Result<&[u8]> {
        let (window, local) = self.current()?;
        let start = window.offset(local, 0, 0);
        Ok(&window.data()[start..start + window.row_size()])
    }

    pub fn row_mut(&mut self) -> Result<&mut [u8]> {
        self.ensure_writable()?;
        let (window, local) = self.current_mut()?;
        let start = window.offset(local, 0, 0);
        let len = window.row_size();
        Ok(&mut window.data_mut()[start..start + len])
    }

    /// Elements of the current pixel: every selected band for BIP, the first band otherwise
    pub fn column(&self) -> Result<&[u8]> {
        let (window, local) = self.current()?;
        let start = window.offset(local, self.column, 0);
        Ok(&window.data()[start..start + window.column_group_len()])
    }

    pub fn column_mut(&mut self) -> Result<&mut [u8]> {
        self.ensure_writable()?;
        let column = self.column;
        let (window, local) = self.current_mut()?;
        let start = window.offset(local, column, 0);
        let len = window.column_group_len();
        Ok(&mut window.data_mut()[start..start + len])
    }

    /// Raw bytes of the current pixel's element in selected band `band`
    pub fn element(&self, band: usize) -> Result<&[u8]> {
        self.check_band(band)?;
        let (window, local) = self.current()?;
        let start = window.offset(local, self.column, band);
        Ok(&window.data()[start..start + self.encoding.bytes_per_element()])
    }

    pub fn element_mut(&mut self, band: usize) -> Result<&mut [u8]> {
        self.ensure_writable()?;
        self.check_band(band)?;
        let column = self.column;
        let len = self.encoding.bytes_per_element();
        let (window, local) = self.current_mut()?;
        let start = window.offset(local, column, band);
        Ok(&mut window.data_mut()[start..start + len])
    }

    /// Decoded value of the current pixel in selected band `band`
    pub fn value(&self, band: usize, component: ComplexComponent) -> Result<f64> {
        let encoding = self.encoding;
        Ok(encoding.decode(self.element(band)?, component))
    }

    /// Encode `value` into the current pixel in selected band `band`
    pub fn set_value(&mut self, band: usize, value: f64) -> Result<()> {
        let encoding = self.encoding;
        encoding.encode(value, self.element_mut(band)?);
        Ok(())
    }

    /// Flush any pending writes and give up the window.
    pub fn release(mut self) -> Result<()> {
        let result = self.flush_window();
        self.window = None;
        self.valid = false;
        result
    }

    fn check_generation(&self) -> Result<()> {
        if self.cube.generation() != self.generation {
            return Err(CubeError::stale(
                "cube storage or active subset changed since the accessor was created",
            ));
        }
        Ok(())
    }

    fn ensure_valid(&self) -> Result<()> {
        self.check_generation()?;
        if !self.valid {
            return Err(CubeError::stale("accessor has moved past the end of its selection"));
        }
        Ok(())
    }

    /// Row advances stay legal after running off the end of a row
    fn ensure_on_rows(&self) -> Result<()> {
        self.check_generation()?;
        if self.row >= self.plan.rows.len() {
            return Err(CubeError::stale("accessor has moved past the last selected row"));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.plan.writable {
            return Err(CubeError::invalid("accessor was not requested as writable"));
        }
        Ok(())
    }

    fn check_band(&self, band: usize) -> Result<()> {
        if band >= self.plan.bands.len() {
            return Err(CubeError::out_of_bounds(format!(
                "band {} of {} selected",
                band,
                self.plan.bands.len()
            )));
        }
        Ok(())
    }

    fn current(&self) -> Result<(&Window, usize)> {
        self.ensure_valid()?;
        let window = self
            .window
            .as_ref()
            .ok_or_else(|| CubeError::stale("accessor has no window"))?;
        Ok((window, self.row - window.first_row()))
    }

    fn current_mut(&mut self) -> Result<(&mut Window, usize)> {
        self.ensure_valid()?;
        let row = self.row;
        let window = self
            .window
            .as_mut()
            .ok_or_else(|| CubeError::stale("accessor has no window"))?;
        let local = row - window.first_row();
        Ok((window, local))
    }

    /// Make `row` resident, writing back the window being left.
    fn page_to(&mut self, row: usize) -> Result<()> {
        if self
            .window
            .as_ref()
            .map(|window| window.contains_row(row))
            .unwrap_or(false)
        {
            return Ok(());
        }
        self.flush_window()?;
        let plan = &self.plan;
        let window = self.cube.page(self.generation, |layout, store| {
            pager::materialize(layout, store, plan, row)
        })?;
        debug!(cube = %self.cube.id(), row, rows = window.rows(), "paged window");
        self.window = Some(window);
        Ok(())
    }

    fn flush_window(&mut self) -> Result<()> {
        let Some(window) = self.window.as_mut() else {
            return Ok(());
        };
        if !window.is_dirty() {
            return Ok(());
        }
        let plan = &self.plan;
        self.cube.page(self.generation, |layout, store| {
            pager::flush(layout, store, plan, window)
        })?;
        window.mark_clean();
        self.cube.data_written(&self.plan.bands);
        Ok(())
    }
}

impl Drop for Accessor<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush_window() {
            error!(cube = %self.cube.id(), error = %e, "failed to flush accessor window on drop");
        }
    }
}

impl std::fmt::Debug for Accessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("cube", &self.cube.id())
            .field("row", &self.row)
            .field("column", &self.column)
            .field("valid", &self.valid)
            .field("interleave", &self.plan.target)
            .finish()
    }
}
