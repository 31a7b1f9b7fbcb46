//! Temporary-store manager: disk-backed copies of a cube's active data

use crate::config;
use crate::cube::{RasterCube, Replacement};
use crate::dimension::{renumber_on_disk, Resolver};
use crate::error::{CubeError, Result};
use crate::layout::{BandFile, FileLayout, LayoutDescriptor};
use crate::metadata::CubeMetadata;
use crate::pager::{self, AccessPlan, Window};
use crate::request::AccessRequest;
use crate::store::{BackingStore, FileStore};
use crate::types::{Axis, ComplexComponent, EncodingType, ProcessingLocation};
use crate::utils::{format_bytes, temporary_store_path};
use crate::view::{BadValues, ViewDescriptor};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "rastercube";

/// A file removed when dropped
#[derive(Debug)]
pub struct TemporaryFile {
    path: PathBuf,
}

impl TemporaryFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed temporary store"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temporary store"),
        }
    }
}

/// Creates disk-backed stores holding a cube's active data.
pub struct TemporaryStore;

impl TemporaryStore {
    /// Move `cube` onto a fresh temporary file; false if that failed, in which case the cube
    /// is unchanged.
    pub fn materialize(cube: &RasterCube) -> bool {
        match Self::try_materialize(cube) {
            Ok(()) => true,
            Err(e) => {
                warn!(cube = %cube.id(), error = %e, "temporary store creation failed");
                false
            }
        }
    }

    /// Copy the active data of `cube` into a temporary file and page from it from now on.
    ///
    /// The active subset becomes the full on-disk extent of the new store. Original numbers
    /// are kept; outstanding accessors become stale. Paging on the cube waits until the new
    /// store is in place, so a write is either copied or fails as stale.
    pub fn try_materialize(cube: &RasterCube) -> Result<()> {
        cube.replace_contents(|view, layout, resolver, store| {
            let encoding = view.encoding();
            let mut target = Target::allocate(view, layout, encoding)?;
            let (columns, bands) = (view.columns().len(), view.bands().len());
            let request = AccessRequest::new()
                .with_concurrent_rows(pager::rows_per_page(columns, bands, encoding.bytes_per_element()))
                .with_interleave(target.layout.interleave)
                .polish(view, layout.interleave);
            let plan = AccessPlan::build(&request, resolver, layout, &config::global())?;
            copy_windows(&plan, encoding, &target.layout, &mut target.store, |first_row| {
                pager::materialize(layout, store, &plan, first_row)
            })?;
            target.store.sync()?;

            info!(
                cube = %cube.id(),
                path = %target.file.path().display(),
                size = %format_bytes(target.layout.total_data_bytes() as usize),
                "created temporary store"
            );
            Ok(Replacement {
                layout: target.layout,
                view: target.view,
                store: Box::new(target.store),
                temporary: Some(target.file),
            })
        })
    }

    /// New disk-backed cube holding a copy of `cube`'s active data.
    pub fn duplicate(cube: &RasterCube, name: impl Into<String>) -> Result<RasterCube> {
        let encoding = cube.view().encoding();
        Self::copy_into(cube, encoding, name.into())
    }

    /// New disk-backed cube holding `cube`'s active data re-encoded as `encoding`.
    ///
    /// Integer targets saturate. Complex to complex conversion keeps both parts; any other
    /// conversion from complex data keeps the magnitude.
    pub fn convert(
        cube: &RasterCube,
        encoding: EncodingType,
        name: impl Into<String>,
    ) -> Result<RasterCube> {
        Self::copy_into(cube, encoding, name.into())
    }

    fn copy_into(cube: &RasterCube, encoding: EncodingType, name: String) -> Result<RasterCube> {
        let source_view = cube.view();
        let mut target = Target::allocate(&source_view, &cube.layout(), encoding)?;
        let widest = encoding
            .bytes_per_element()
            .max(source_view.encoding().bytes_per_element());
        let request = cube.paged_request(AccessRequest::new(), widest);
        copy_active_data(cube, request, &target.layout, &mut target.store)?;
        target.store.sync()?;

        info!(source = %cube.id(), name = %name, encoding = %encoding, "copied cube to disk");
        RasterCube::from_parts(
            CubeMetadata::new(name),
            target.layout,
            target.view,
            Box::new(target.store),
            Some(target.file),
        )
    }
}

/// Freshly allocated single-file store sized for a cube's active extents
struct Target {
    layout: LayoutDescriptor,
    view: ViewDescriptor,
    store: FileStore,
    file: TemporaryFile,
}

impl Target {
    fn allocate(
        view: &ViewDescriptor,
        source_layout: &LayoutDescriptor,
        encoding: EncodingType,
    ) -> Result<Self> {
        let config = config::global();
        let path = temporary_store_path(&config.temp_dir, FILE_PREFIX);
        let handle = std::fs::File::create(&path)?;
        let file = TemporaryFile::new(path.clone());

        let layout = LayoutDescriptor::new(
            source_layout.interleave,
            encoding,
            view.rows().len() as u32,
            view.columns().len() as u32,
            view.bands().len() as u32,
            FileLayout::Single(BandFile::new(&path, 0)),
        )?;
        handle.set_len(layout.file_len(0))?;
        drop(handle);

        let mut target_view = ViewDescriptor::for_layout(&layout, ProcessingLocation::OnDisk);
        for axis in [Axis::Row, Axis::Column, Axis::Band] {
            target_view.set_active(axis, renumber_on_disk(view.active(axis)), &layout)?;
        }
        target_view.set_bad_values(renumber_bad_values(view), &layout)?;

        let store = FileStore::open(&layout, true)?;
        debug!(path = %path.display(), layout = %layout.summary(), "allocated temporary store");
        Ok(Self {
            layout,
            view: target_view,
            store,
            file,
        })
    }
}

/// Per-band bad values keyed by the band's index in the active list
fn renumber_bad_values(view: &ViewDescriptor) -> BadValues {
    let source = view.bad_values();
    let mut renumbered = BadValues {
        global: source.global.clone(),
        ..BadValues::default()
    };
    for (index, band) in view.bands().iter().enumerate() {
        if let Some(set) = band.on_disk().and_then(|disk| source.per_band.get(&disk)) {
            renumbered.per_band.insert(index as u32, set.clone());
        }
    }
    renumbered
}

/// Copy the selection of `request` from `source` into the full extent of `layout`.
///
/// Each source window is paged separately, so writes to `source` may interleave with the copy.
pub(crate) fn copy_active_data(
    source: &RasterCube,
    request: AccessRequest,
    layout: &LayoutDescriptor,
    store: &mut dyn BackingStore,
) -> Result<()> {
    let request = request.with_interleave(layout.interleave);
    let (source_plan, generation) = source.plan(request)?;
    let source_encoding = source.view().encoding();
    copy_windows(&source_plan, source_encoding, layout, store, |first_row| {
        source.page(generation, |source_layout, source_store| {
            pager::materialize(source_layout, source_store, &source_plan, first_row)
        })
    })
}

/// Write every window of `source_plan`, as produced by `read`, into the full extent of `layout`.
///
/// Works in the destination's ordering, re-encoding when the encodings differ. Each
/// destination window is written with the paging engine's flush.
fn copy_windows<R>(
    source_plan: &AccessPlan,
    source_encoding: EncodingType,
    layout: &LayoutDescriptor,
    store: &mut dyn BackingStore,
    mut read: R,
) -> Result<()>
where
    R: FnMut(usize) -> Result<Window>,
{
    let extents = (
        source_plan.rows.len(),
        source_plan.columns.len(),
        source_plan.bands.len(),
    );
    if extents != (layout.rows as usize, layout.columns as usize, layout.bands as usize) {
        return Err(CubeError::invalid(format!(
            "selection of {:?} does not fill a {} x {} x {} destination",
            extents, layout.rows, layout.columns, layout.bands
        )));
    }

    let target_view = ViewDescriptor::for_layout(layout, ProcessingLocation::OnDisk);
    let resolver = Resolver::build(target_view.rows(), target_view.columns(), target_view.bands())?;
    let target_request = AccessRequest::new()
        .with_concurrent_rows(source_plan.page_rows as u32)
        .writable(true)
        .polish(&target_view, layout.interleave);
    let target_plan = AccessPlan::build(&target_request, &resolver, layout, &config::global())?;

    let mut first_row = 0;
    while first_row < source_plan.rows.len() {
        let window = read(first_row)?;
        let rows = window.rows();
        let data = if source_encoding == layout.encoding {
            window.into_data()
        } else {
            transcode(window.data(), source_encoding, layout.encoding)
        };
        let out = Window::with_data(&target_plan, first_row, data)?;
        pager::flush(layout, store, &target_plan, &out)?;
        first_row += rows;
    }
    Ok(())
}

/// Scalar encoding of each part of a complex encoding
fn complex_part(encoding: EncodingType) -> Option<EncodingType> {
    match encoding {
        EncodingType::Int4SComplex => Some(EncodingType::Int2S),
        EncodingType::Flt8Complex => Some(EncodingType::Flt4),
        _ => None,
    }
}

fn transcode(data: &[u8], from: EncodingType, to: EncodingType) -> Vec<u8> {
    let (from_width, to_width) = (from.bytes_per_element(), to.bytes_per_element());
    let mut out = vec![0u8; data.len() / from_width * to_width];
    match (complex_part(from), complex_part(to)) {
        (Some(from_part), Some(to_part)) => {
            let parts = data
                .chunks_exact(from_width / 2)
                .zip(out.chunks_exact_mut(to_width / 2));
            for (raw, slot) in parts {
                to_part.encode(from_part.decode(raw, ComplexComponent::InPhase), slot);
            }
        }
        _ => {
            for (raw, slot) in data.chunks_exact(from_width).zip(out.chunks_exact_mut(to_width)) {
                to.encode(from.decode(raw, ComplexComponent::Magnitude), slot);
            }
        }
    }
    out
}
