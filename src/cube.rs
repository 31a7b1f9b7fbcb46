//! Raster cube - the main API for reading and writing cube data

use crate::accessor::Accessor;
use crate::config;
use crate::dimension::{renumber_on_disk, DimensionDescriptor, Resolver};
use crate::error::{CubeError, Result};
use crate::layout::LayoutDescriptor;
use crate::metadata::{CubeDescriptor, CubeMetadata, DescriptorVersion};
use crate::pager::{self, AccessPlan, Window};
use crate::request::{AccessRequest, AxisSpan};
use crate::statistics::{self, Statistics, StatisticsCache, StatisticsKey};
use crate::store::{open_store, BackingStore, FileStore, MemoryStore};
use crate::tempstore::{self, TemporaryFile, TemporaryStore};
use crate::types::{Axis, ComplexComponent, EncodingType, InterleaveFormat, ProcessingLocation};
use crate::utils::format_bytes;
use crate::view::{BadValues, ViewDescriptor};
use bytes::Bytes;
use ndarray::Array2;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Store and numbering that paging works against; one paging operation at a time.
struct PagingState {
    store: Box<dyn BackingStore>,
    resolver: Resolver,
}

/// Contents swapped into a cube by [`RasterCube::replace_contents`]
pub(crate) struct Replacement {
    pub layout: LayoutDescriptor,
    pub view: ViewDescriptor,
    pub store: Box<dyn BackingStore>,
    pub temporary: Option<TemporaryFile>,
}

/// A row x column x band cube of numeric elements.
///
/// The cube owns its backing store. Any number of [`Accessor`]s may be outstanding, each with
/// its own window; paging against the store is serialized per cube. Changing the storage or the
/// active subset bumps the cube's generation, which makes outstanding accessors stale.
pub struct RasterCube {
    id: Uuid,
    layout: RwLock<Arc<LayoutDescriptor>>,
    view: RwLock<ViewDescriptor>,
    paging: Mutex<PagingState>,
    generation: AtomicU64,
    statistics: StatisticsCache,
    metadata: RwLock<CubeMetadata>,
    temporary: Mutex<Option<TemporaryFile>>,
}

impl RasterCube {
    /// Import a cube from its layout and view.
    ///
    /// Resident cubes load their file images; on-disk cubes open the files read-only or
    /// read-write according to the view's processing location.
    pub fn import(
        name: impl Into<String>,
        layout: LayoutDescriptor,
        view: ViewDescriptor,
    ) -> Result<Self> {
        Self::import_with_metadata(CubeMetadata::new(name), layout, view)
    }

    fn import_with_metadata(
        metadata: CubeMetadata,
        layout: LayoutDescriptor,
        view: ViewDescriptor,
    ) -> Result<Self> {
        view.validate(&layout)?;
        let store = open_store(&layout, view.processing_location())?;
        info!(
            name = %metadata.name,
            layout = %layout.summary(),
            location = ?view.processing_location(),
            "imported cube"
        );
        Self::from_parts(metadata, layout, view, store, None)
    }

    /// Zero-filled resident cube
    pub fn new_in_memory(
        name: impl Into<String>,
        rows: u32,
        columns: u32,
        bands: u32,
        encoding: EncodingType,
        interleave: InterleaveFormat,
    ) -> Result<Self> {
        let layout = LayoutDescriptor::in_memory(interleave, encoding, rows, columns, bands)?;
        let view = ViewDescriptor::for_layout(&layout, ProcessingLocation::InMemory);
        let store = Box::new(MemoryStore::zeroed(&layout));
        Self::from_parts(CubeMetadata::new(name), layout, view, store, None)
    }

    pub(crate) fn from_parts(
        metadata: CubeMetadata,
        layout: LayoutDescriptor,
        view: ViewDescriptor,
        store: Box<dyn BackingStore>,
        temporary: Option<TemporaryFile>,
    ) -> Result<Self> {
        let resolver = Resolver::build(view.rows(), view.columns(), view.bands())?;
        Ok(Self {
            id: Uuid::new_v4(),
            layout: RwLock::new(Arc::new(layout)),
            view: RwLock::new(view),
            paging: Mutex::new(PagingState { store, resolver }),
            generation: AtomicU64::new(0),
            statistics: StatisticsCache::new(),
            metadata: RwLock::new(metadata),
            temporary: Mutex::new(temporary),
        })
    }

    /// Reopen a cube from a descriptor sidecar written by [`save_descriptor`](Self::save_descriptor).
    pub fn open_descriptor(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let descriptor: CubeDescriptor = serde_json::from_slice(&bytes)?;
        if !descriptor.version.is_compatible(&DescriptorVersion::CURRENT) {
            return Err(CubeError::Serialization(format!(
                "descriptor version {}.{} is not readable by {}.{}",
                descriptor.version.major,
                descriptor.version.minor,
                DescriptorVersion::CURRENT.major,
                DescriptorVersion::CURRENT.minor
            )));
        }
        debug!(path = %path.display(), "read cube descriptor");
        Self::import_with_metadata(descriptor.metadata, descriptor.layout, descriptor.view)
    }

    /// Write the layout, view and metadata as a JSON sidecar.
    ///
    /// Only cubes whose every file has a path can be reopened from a sidecar.
    pub fn save_descriptor(&self, path: impl AsRef<Path>) -> Result<()> {
        let layout = self.layout();
        if layout.files.files().iter().any(|file| file.path.is_none()) {
            return Err(CubeError::invalid(
                "cube has memory-only images; materialize it before saving a descriptor",
            ));
        }
        if self.temporary.lock().is_some() {
            warn!(cube = %self.id, "descriptor refers to a temporary store removed with the cube");
        }
        let descriptor =
            CubeDescriptor::new(self.metadata(), layout.as_ref().clone(), self.view());
        let json = serde_json::to_vec_pretty(&descriptor)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> String {
        self.metadata.read().name.clone()
    }

    /// Current physical layout
    pub fn layout(&self) -> Arc<LayoutDescriptor> {
        self.layout.read().clone()
    }

    /// Snapshot of the view descriptor
    pub fn view(&self) -> ViewDescriptor {
        self.view.read().clone()
    }

    pub fn metadata(&self) -> CubeMetadata {
        self.metadata.read().clone()
    }

    pub fn processing_location(&self) -> ProcessingLocation {
        self.view.read().processing_location()
    }

    /// Active (rows, columns, bands)
    pub fn extents(&self) -> (usize, usize, usize) {
        let view = self.view.read();
        (view.rows().len(), view.columns().len(), view.bands().len())
    }

    /// Temporary file backing the cube, if it pages from one
    pub fn temporary_path(&self) -> Option<std::path::PathBuf> {
        self.temporary
            .lock()
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Open an accessor over `request`, or over the whole active cube in storage order.
    pub fn accessor(&self, request: Option<AccessRequest>) -> Result<Accessor<'_>> {
        let view = self.view.read();
        let (plan, generation, window) = {
            let layout = self.layout();
            let mut state = self.paging.lock();
            let plan = self.plan_locked(&view, &layout, &state.resolver, request)?;
            let generation = self.generation();
            let window = pager::materialize(&layout, state.store.as_mut(), &plan, 0)?;
            (plan, generation, window)
        };
        Ok(Accessor::new(self, plan, window, view.encoding(), generation))
    }

    /// Resolve a request against the current view and layout
    pub(crate) fn plan(&self, request: AccessRequest) -> Result<(AccessPlan, u64)> {
        let view = self.view.read();
        let layout = self.layout();
        let state = self.paging.lock();
        let plan = self.plan_locked(&view, &layout, &state.resolver, Some(request))?;
        Ok((plan, self.generation()))
    }

    fn plan_locked(
        &self,
        view: &ViewDescriptor,
        layout: &LayoutDescriptor,
        resolver: &Resolver,
        request: Option<AccessRequest>,
    ) -> Result<AccessPlan> {
        let request = request.unwrap_or_default().polish(view, layout.interleave);
        if let Err(e) = request.validate(view) {
            warn!(cube = %self.id, error = %e, "rejected access request");
            return Err(e);
        }
        if request.is_writable() && !view.processing_location().is_writable() {
            return Err(CubeError::invalid(format!(
                "cube is {:?}; writable access is not allowed",
                view.processing_location()
            )));
        }
        AccessPlan::build(&request, resolver, layout, &config::global())
    }

    /// Run one paging operation against the store, if the cube is still at `generation`.
    pub(crate) fn page<T, F>(&self, generation: u64, operation: F) -> Result<T>
    where
        F: FnOnce(&LayoutDescriptor, &mut dyn BackingStore) -> Result<T>,
    {
        let mut state = self.paging.lock();
        if self.generation() != generation {
            return Err(CubeError::stale(format!(
                "cube {} changed storage or active subset since the window was planned",
                self.id
            )));
        }
        let layout = self.layout();
        operation(&layout, state.store.as_mut())
    }

    /// Record that a flushed window modified on-disk bands `bands`
    pub(crate) fn data_written(&self, bands: &[u32]) {
        for &band in bands {
            self.statistics.invalidate_band(band);
        }
        self.metadata.write().touch();
    }

    /// Decoded value at active `(column, row, band)`
    pub fn pixel_value(
        &self,
        column: u32,
        row: u32,
        band: u32,
        component: ComplexComponent,
    ) -> Result<f64> {
        let accessor = self.accessor(Some(AccessRequest::pixel(row, column, band)))?;
        accessor.value(0, component)
    }

    /// Statistics of active band `band` at full resolution
    pub fn statistics(&self, band: u32) -> Result<Arc<Statistics>> {
        self.statistics_with(band, ComplexComponent::default(), 1)
    }

    /// Statistics of active band `band`, sampling every `resolution`-th row and column.
    ///
    /// Results are cached until the band's data changes.
    pub fn statistics_with(
        &self,
        band: u32,
        component: ComplexComponent,
        resolution: u32,
    ) -> Result<Arc<Statistics>> {
        let (on_disk, bad_values) = {
            let view = self.view.read();
            let dim = view.bands().get(band as usize).ok_or_else(|| {
                CubeError::out_of_bounds(format!(
                    "band {} outside the {} active bands",
                    band,
                    view.bands().len()
                ))
            })?;
            let on_disk = dim
                .on_disk()
                .ok_or_else(|| CubeError::invalid(format!("active band {} is not on disk", band)))?;
            (on_disk, view.bad_values().for_band(on_disk).clone())
        };

        let key = StatisticsKey {
            cube: self.id,
            band: on_disk,
            component,
            bad_values: bad_values.clone(),
            resolution: resolution.max(1),
        };
        self.statistics.get_or_compute(key, || {
            let ceiling = config::global().memory_ceiling_bytes();
            statistics::compute(self, band, component, &bad_values, resolution, ceiling)
        })
    }

    /// Copy the active data into a fresh temporary file and page from it from now on.
    ///
    /// Returns false, leaving the cube untouched, if the copy fails.
    pub fn create_temporary_store(&self) -> bool {
        TemporaryStore::materialize(self)
    }

    /// Declare that the data changed through means other than an accessor.
    pub fn update_data(&self) {
        self.statistics.invalidate_all();
        self.metadata.write().touch();
        debug!(cube = %self.id, "data updated, statistics invalidated");
    }

    pub fn set_active_rows(&self, rows: Vec<DimensionDescriptor>) -> Result<()> {
        self.set_active(Axis::Row, rows)
    }

    pub fn set_active_columns(&self, columns: Vec<DimensionDescriptor>) -> Result<()> {
        self.set_active(Axis::Column, columns)
    }

    pub fn set_active_bands(&self, bands: Vec<DimensionDescriptor>) -> Result<()> {
        self.set_active(Axis::Band, bands)
    }

    fn set_active(&self, axis: Axis, list: Vec<DimensionDescriptor>) -> Result<()> {
        let layout = self.layout();
        let mut view = self.view.write();
        let mut candidate = view.clone();
        candidate.set_active(axis, list, &layout)?;
        let resolver = Resolver::build(candidate.rows(), candidate.columns(), candidate.bands())?;

        let mut state = self.paging.lock();
        *view = candidate;
        state.resolver = resolver;
        self.generation.fetch_add(1, Ordering::SeqCst);
        drop(state);
        drop(view);

        self.statistics.invalidate_all();
        debug!(cube = %self.id, %axis, "active subset changed");
        Ok(())
    }

    pub fn set_bad_values(&self, bad_values: BadValues) -> Result<()> {
        let layout = self.layout();
        self.view.write().set_bad_values(bad_values, &layout)
    }

    /// Only the stored encoding is accepted; see [`TemporaryStore::convert`].
    pub fn set_encoding(&self, encoding: EncodingType) -> Result<()> {
        let layout = self.layout();
        self.view.write().set_encoding(encoding, &layout)
    }

    /// Move the cube between memory and disk.
    ///
    /// Resident cubes go to disk through a temporary store; disk-backed cubes load their
    /// files, which must fit in the memory ceiling. Switching between writable and read-only
    /// disk access reopens the same files. Outstanding accessors become stale.
    pub fn set_processing_location(&self, location: ProcessingLocation) -> Result<()> {
        let current = self.processing_location();
        if current == location {
            return Ok(());
        }

        match (current, location) {
            (ProcessingLocation::InMemory, _) => {
                TemporaryStore::try_materialize(self)?;
                if location == ProcessingLocation::OnDiskReadOnly {
                    let store = FileStore::open(&self.layout(), false)?;
                    self.install_store(Box::new(store), location);
                }
            }
            (_, ProcessingLocation::InMemory) => {
                let layout = self.layout();
                let requested: u64 = (0..layout.file_count()).map(|i| layout.file_len(i)).sum();
                let ceiling = config::global().memory_ceiling_bytes();
                if requested > ceiling {
                    warn!(
                        cube = %self.id,
                        requested = %format_bytes(requested as usize),
                        "cube does not fit in memory"
                    );
                    return Err(CubeError::ResourceExhausted { requested, ceiling });
                }
                let store = MemoryStore::load(&layout)?;
                self.install_store(Box::new(store), location);
            }
            (_, _) => {
                let store = FileStore::open(&self.layout(), location.is_writable())?;
                self.install_store(Box::new(store), location);
            }
        }

        info!(cube = %self.id, from = ?current, to = ?location, "processing location changed");
        Ok(())
    }

    fn install_store(&self, store: Box<dyn BackingStore>, location: ProcessingLocation) {
        let mut view = self.view.write();
        let mut state = self.paging.lock();
        view.set_processing_location(location);
        state.store = store;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Build a replacement layout, view and store from the current data, then swap it in.
    ///
    /// The view and the paging critical section are held from the first read of `build` until
    /// the swap, so no write can land in the old store after it was copied. Accessors waiting
    /// to flush meanwhile find the cube stale. The cube is untouched if `build` fails.
    pub(crate) fn replace_contents<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&ViewDescriptor, &LayoutDescriptor, &Resolver, &mut dyn BackingStore) -> Result<Replacement>,
    {
        {
            let mut view = self.view.write();
            let mut guard = self.paging.lock();
            let layout = self.layout();
            let state = &mut *guard;
            let replacement = build(&*view, &*layout, &state.resolver, state.store.as_mut())?;
            let resolver = Resolver::build(
                replacement.view.rows(),
                replacement.view.columns(),
                replacement.view.bands(),
            )?;

            *self.layout.write() = Arc::new(replacement.layout);
            *view = replacement.view;
            state.store = replacement.store;
            state.resolver = resolver;
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(file) = replacement.temporary {
                *self.temporary.lock() = Some(file);
            }
        }
        self.statistics.invalidate_all();
        Ok(())
    }

    /// Replace every non-finite float value with `replacement`; returns the count replaced.
    ///
    /// Integer cubes have nothing to sanitize.
    pub fn sanitize_data(&self, replacement: f64) -> Result<u64> {
        let encoding = self.view.read().encoding();
        // complex floats are sanitized component by component
        let scalar = match encoding {
            EncodingType::Flt4 | EncodingType::Flt8Complex => EncodingType::Flt4,
            EncodingType::Flt8 => EncodingType::Flt8,
            _ => return Ok(0),
        };
        let width = scalar.bytes_per_element();
        let request = self
            .paged_request(AccessRequest::new(), encoding.bytes_per_element())
            .with_interleave(InterleaveFormat::Bip)
            .writable(true);

        let mut replaced = 0u64;
        let mut accessor = self.accessor(Some(request))?;
        while accessor.is_valid() {
            let dirty = accessor
                .row()?
                .chunks_exact(width)
                .any(|raw| !scalar.decode(raw, ComplexComponent::InPhase).is_finite());
            if dirty {
                for raw in accessor.row_mut()?.chunks_exact_mut(width) {
                    if !scalar.decode(raw, ComplexComponent::InPhase).is_finite() {
                        scalar.encode(replacement, raw);
                        replaced += 1;
                    }
                }
            }
            accessor.next_row(true)?;
        }
        accessor.release()?;

        if replaced > 0 {
            info!(cube = %self.id, replaced, "sanitized non-finite values");
        }
        Ok(replaced)
    }

    /// Resident copy of the elements selected by `request`.
    ///
    /// The chip keeps the storage ordering and encoding; its dimensions remember the source's
    /// original numbers.
    pub fn create_chip(&self, name: impl Into<String>, request: AccessRequest) -> Result<RasterCube> {
        let (view, layout) = (self.view(), self.layout());
        let request = request.polish(&view, layout.interleave);
        request.validate(&view)?;

        let selected = |axis: Axis| -> Result<Vec<DimensionDescriptor>> {
            let span = request
                .span(axis)
                .ok_or_else(|| CubeError::invalid(format!("chip has no {} span", axis)))?;
            let active = view.active(axis);
            Ok(renumber_on_disk(
                &span.indices().map(|i| active[i as usize]).collect::<Vec<_>>(),
            ))
        };
        let (rows, columns, bands) = (selected(Axis::Row)?, selected(Axis::Column)?, selected(Axis::Band)?);

        let chip_layout = LayoutDescriptor::in_memory(
            layout.interleave,
            view.encoding(),
            rows.len() as u32,
            columns.len() as u32,
            bands.len() as u32,
        )?;
        let mut chip_view = ViewDescriptor::for_layout(&chip_layout, ProcessingLocation::InMemory);
        chip_view.set_active(Axis::Row, rows, &chip_layout)?;
        chip_view.set_active(Axis::Column, columns, &chip_layout)?;
        chip_view.set_active(Axis::Band, bands, &chip_layout)?;

        let mut store = MemoryStore::zeroed(&chip_layout);
        let request = self.paged_request(request, view.encoding().bytes_per_element());
        tempstore::copy_active_data(self, request, &chip_layout, &mut store)?;

        info!(source = %self.id, layout = %chip_layout.summary(), "created chip");
        Self::from_parts(CubeMetadata::new(name), chip_layout, chip_view, Box::new(store), None)
    }

    /// Active band `band` as a rows x columns array of decoded values
    pub fn band_plane(&self, band: u32) -> Result<Array2<f64>> {
        let encoding = self.view.read().encoding();
        let request = self
            .paged_request(
                AccessRequest::new().with_bands(AxisSpan::single(band)),
                encoding.bytes_per_element(),
            )
            .with_interleave(InterleaveFormat::Bsq);

        let mut accessor = self.accessor(Some(request))?;
        let mut plane = Array2::<f64>::zeros((accessor.row_count(), accessor.column_count()));
        let width = encoding.bytes_per_element();
        let mut row = 0;
        while accessor.is_valid() {
            for (column, raw) in accessor.row()?.chunks_exact(width).enumerate() {
                plane[[row, column]] = encoding.decode(raw, ComplexComponent::default());
            }
            row += 1;
            accessor.next_row(true)?;
        }
        accessor.release()?;
        Ok(plane)
    }

    /// The whole selection of `request` as one buffer in the requested ordering.
    ///
    /// The selection must fit in a single window under the memory ceiling.
    pub fn read_window(&self, request: AccessRequest) -> Result<Bytes> {
        let (plan, generation) = self.plan(request.single_window())?;
        let window = self.page(generation, |layout, store| {
            pager::materialize(layout, store, &plan, 0)
        })?;
        Ok(Bytes::from(window.into_data()))
    }

    /// Write `data`, laid out in the requested ordering, over the selection of `request`.
    ///
    /// The counterpart of [`read_window`](Self::read_window): the selection is written as one
    /// window, so `data` must hold exactly its elements and fit under the memory ceiling.
    /// Unselected elements between selected ones keep their stored values.
    pub fn write_window(&self, request: AccessRequest, data: &[u8]) -> Result<()> {
        let (plan, generation) = self.plan(request.single_window().writable(true))?;
        let window = Window::with_data(&plan, 0, data.to_vec())?;
        self.page(generation, |layout, store| {
            pager::flush(layout, store, &plan, &window)
        })?;
        self.data_written(&plan.bands);
        debug!(cube = %self.id, bytes = data.len(), target = %plan.target, "wrote window");
        Ok(())
    }

    /// `request` paged so that each window of `element_bytes`-wide elements fits the ceiling
    pub(crate) fn paged_request(&self, request: AccessRequest, element_bytes: usize) -> AccessRequest {
        let (_, columns, bands) = self.extents();
        request.with_concurrent_rows(pager::rows_per_page(columns, bands, element_bytes))
    }
}

impl std::fmt::Debug for RasterCube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterCube")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("layout", &self.layout().summary())
            .field("location", &self.processing_location())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionDescriptor;
    use tempfile::TempDir;

    fn filled(interleave: InterleaveFormat) -> RasterCube {
        let cube =
            RasterCube::new_in_memory("cube", 3, 4, 2, EncodingType::Flt4, interleave).unwrap();
        let mut acc = cube.accessor(Some(AccessRequest::new().writable(true))).unwrap();
        while acc.is_valid() {
            while acc.is_valid() {
                let (r, c) = (acc.current_row(), acc.current_column());
                acc.set_value(0, (r * 10 + c) as f64).unwrap();
                acc.set_value(1, -((r * 10 + c) as f64)).unwrap();
                acc.next_column().unwrap();
            }
            acc.next_row(true).unwrap();
        }
        acc.release().unwrap();
        cube
    }

    #[test]
    fn test_pixel_value_argument_order() {
        let cube = filled(InterleaveFormat::Bsq);
        // column first, then row
        assert_eq!(cube.pixel_value(3, 1, 0, ComplexComponent::Magnitude).unwrap(), 13.0);
        assert_eq!(cube.pixel_value(3, 1, 1, ComplexComponent::InPhase).unwrap(), -13.0);
        assert!(matches!(
            cube.pixel_value(4, 0, 0, ComplexComponent::Magnitude),
            Err(CubeError::OutOfBounds(_))
        ));
    }

    #[test]
    fn test_active_subset_makes_accessors_stale() {
        let cube = filled(InterleaveFormat::Bip);
        let acc = cube.accessor(None).unwrap();
        cube.set_active_rows(vec![DimensionDescriptor::uniform(2).with_active(0)])
            .unwrap();
        assert!(!acc.is_valid());
        assert!(matches!(acc.row(), Err(CubeError::StaleWindow(_))));
        drop(acc);

        assert_eq!(cube.extents(), (1, 4, 2));
        assert_eq!(cube.pixel_value(1, 0, 0, ComplexComponent::Magnitude).unwrap(), 21.0);
    }

    #[test]
    fn test_rejected_mutation_keeps_view() {
        let cube = filled(InterleaveFormat::Bil);
        let before = cube.view();
        assert!(cube
            .set_active_bands(vec![DimensionDescriptor::uniform(5).with_active(0)])
            .is_err());
        assert!(cube.set_encoding(EncodingType::Int2S).is_err());
        assert_eq!(cube.view(), before);
    }

    #[test]
    fn test_sanitize_and_band_plane() {
        let cube = filled(InterleaveFormat::Bil);
        {
            let mut acc = cube
                .accessor(Some(AccessRequest::pixel(2, 1, 1).writable(true)))
                .unwrap();
            acc.set_value(0, f64::NAN).unwrap();
        }
        assert_eq!(cube.sanitize_data(0.5).unwrap(), 1);
        assert_eq!(cube.sanitize_data(0.5).unwrap(), 0);

        let plane = cube.band_plane(1).unwrap();
        assert_eq!(plane.dim(), (3, 4));
        assert_eq!(plane[[2, 1]], 0.5);
        assert_eq!(plane[[1, 3]], -13.0);
    }

    #[test]
    fn test_chip_keeps_original_numbers() {
        let cube = filled(InterleaveFormat::Bip);
        let request = AccessRequest::new()
            .with_rows(AxisSpan::range(1, 2))
            .with_columns(AxisSpan::new(0, 3, 3))
            .with_bands(AxisSpan::single(1));
        let chip = cube.create_chip("chip", request).unwrap();
        assert_eq!(chip.extents(), (2, 2, 1));
        assert_eq!(chip.pixel_value(1, 1, 0, ComplexComponent::InPhase).unwrap(), -23.0);
        assert_eq!(chip.view().columns()[1].original(), Some(3));
        assert_eq!(chip.view().rows()[0].original(), Some(1));
    }

    #[test]
    fn test_read_window_bytes() {
        let cube = filled(InterleaveFormat::Bsq);
        let bytes = cube
            .read_window(
                AccessRequest::new()
                    .with_rows(AxisSpan::single(0))
                    .with_interleave(InterleaveFormat::Bip),
            )
            .unwrap();
        assert_eq!(bytes.len(), 4 * 2 * 4);
        let first = f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(first, 1.0);
    }

    #[test]
    fn test_descriptor_requires_paths() {
        let dir = TempDir::new().unwrap();
        let cube = filled(InterleaveFormat::Bsq);
        assert!(cube.save_descriptor(dir.path().join("cube.json")).is_err());
    }

    #[test]
    fn test_statistics_cache_follows_writes() {
        let cube = filled(InterleaveFormat::Bsq);
        let first = cube.statistics(0).unwrap();
        assert_eq!(first.max, 23.0);
        assert!(Arc::ptr_eq(&first, &cube.statistics(0).unwrap()));

        {
            let mut acc = cube
                .accessor(Some(AccessRequest::pixel(0, 0, 0).writable(true)))
                .unwrap();
            acc.set_value(0, 99.0).unwrap();
            acc.release().unwrap();
        }
        assert_eq!(cube.statistics(0).unwrap().max, 99.0);
        let modified = cube.metadata().modified_at;
        assert!(modified >= cube.metadata().created_at);
    }
}
