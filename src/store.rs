//! Backing stores: the byte images a cube's layout addresses

use crate::error::{CubeError, Result};
use crate::layout::LayoutDescriptor;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tracing::debug;

/// Backing store kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Whole file images resident in memory
    Memory,
    /// Paged from files on disk
    File { writable: bool },
}

/// Positioned byte I/O against the files described by a layout.
///
/// File indices and offsets always come from `LayoutDescriptor::byte_offset_of`.
pub trait BackingStore: Send {
    /// Fill `buf` from `offset` of file `file`
    fn read_at(&mut self, file: usize, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset` of file `file` in one operation
    fn write_at(&mut self, file: usize, offset: u64, data: &[u8]) -> Result<()>;

    /// Make written data durable on the underlying medium
    fn sync(&mut self) -> Result<()>;

    fn is_writable(&self) -> bool;

    fn kind(&self) -> StoreKind;
}

/// Resident store: one byte image per layout file, headers included.
pub struct MemoryStore {
    images: Vec<Vec<u8>>,
}

impl MemoryStore {
    /// Zero-filled images sized for `layout`
    pub fn zeroed(layout: &LayoutDescriptor) -> Self {
        let images = (0..layout.file_count())
            .map(|index| vec![0u8; layout.file_len(index) as usize])
            .collect();
        Self { images }
    }

    /// Read every file of `layout` into memory.
    pub fn load(layout: &LayoutDescriptor) -> Result<Self> {
        let mut images = Vec::with_capacity(layout.file_count());
        for (index, file) in layout.files.files().iter().enumerate() {
            let expected = layout.file_len(index) as usize;
            let image = match &file.path {
                Some(path) => {
                    let mut data = std::fs::read(path)?;
                    if data.len() < expected {
                        return Err(CubeError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!(
                                "{} holds {} bytes, layout needs {}",
                                path.display(),
                                data.len(),
                                expected
                            ),
                        )));
                    }
                    data.truncate(expected);
                    data
                }
                None => vec![0u8; expected],
            };
            images.push(image);
        }
        debug!(files = images.len(), "loaded resident images");
        Ok(Self { images })
    }

    fn image(&mut self, file: usize, offset: u64, len: usize) -> Result<&mut [u8]> {
        let image = self.images.get_mut(file).ok_or_else(|| {
            CubeError::out_of_bounds(format!("resident store has no file {}", file))
        })?;
        let start = offset as usize;
        let end = start + len;
        if end > image.len() {
            return Err(CubeError::out_of_bounds(format!(
                "bytes {}..{} beyond resident image of {} bytes",
                start,
                end,
                image.len()
            )));
        }
        Ok(&mut image[start..end])
    }
}

impl BackingStore for MemoryStore {
    fn read_at(&mut self, file: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        buf.copy_from_slice(self.image(file, offset, len)?);
        Ok(())
    }

    fn write_at(&mut self, file: usize, offset: u64, data: &[u8]) -> Result<()> {
        self.image(file, offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }
}

/// Lazily opened handles for a cube's files, keyed by file index.
///
/// Owned by exactly one store and released with it.
pub struct FilePool {
    paths: Vec<PathBuf>,
    handles: Vec<Option<File>>,
    writable: bool,
}

impl FilePool {
    pub fn new(paths: Vec<PathBuf>, writable: bool) -> Self {
        let handles = paths.iter().map(|_| None).collect();
        Self {
            paths,
            handles,
            writable,
        }
    }

    /// Handle for file `index`, opened on first use
    pub fn handle(&mut self, index: usize) -> Result<&mut File> {
        let path = self
            .paths
            .get(index)
            .ok_or_else(|| CubeError::out_of_bounds(format!("no backing file {}", index)))?;
        let slot = &mut self.handles[index];
        if slot.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(self.writable)
                .open(path)?;
            debug!(path = %path.display(), writable = self.writable, "opened backing file");
            *slot = Some(file);
        }
        match slot {
            Some(file) => Ok(file),
            None => Err(CubeError::stale("backing file handle vanished")),
        }
    }

    /// Number of handles currently open
    pub fn open_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_some()).count()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Store paging directly against the layout's files on disk.
pub struct FileStore {
    pool: FilePool,
}

impl FileStore {
    /// Open the files named by `layout`; every file must have a path.
    pub fn open(layout: &LayoutDescriptor, writable: bool) -> Result<Self> {
        let paths = layout
            .files
            .files()
            .iter()
            .enumerate()
            .map(|(index, file)| {
                file.path.clone().ok_or_else(|| {
                    CubeError::invalid(format!("file {} of the layout has no path", index))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            pool: FilePool::new(paths, writable),
        })
    }

    pub fn pool(&self) -> &FilePool {
        &self.pool
    }
}

impl BackingStore for FileStore {
    fn read_at(&mut self, file: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        let handle = self.pool.handle(file)?;
        handle.seek(SeekFrom::Start(offset))?;
        handle.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, file: usize, offset: u64, data: &[u8]) -> Result<()> {
        if !self.pool.writable {
            return Err(CubeError::invalid("backing store is read-only"));
        }
        let handle = self.pool.handle(file)?;
        handle.seek(SeekFrom::Start(offset))?;
        handle.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if !self.pool.writable {
            return Ok(());
        }
        for handle in self.pool.handles.iter_mut().flatten() {
            handle.sync_data()?;
        }
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.pool.writable
    }

    fn kind(&self) -> StoreKind {
        StoreKind::File {
            writable: self.pool.writable,
        }
    }
}

/// Open the store matching a residency mode
pub fn open_store(
    layout: &LayoutDescriptor,
    location: crate::types::ProcessingLocation,
) -> Result<Box<dyn BackingStore>> {
    use crate::types::ProcessingLocation;

    match location {
        ProcessingLocation::InMemory => Ok(Box::new(MemoryStore::load(layout)?)),
        ProcessingLocation::OnDisk => Ok(Box::new(FileStore::open(layout, true)?)),
        ProcessingLocation::OnDiskReadOnly => Ok(Box::new(FileStore::open(layout, false)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BandFile, FileLayout};
    use crate::types::{EncodingType, InterleaveFormat};
    use tempfile::TempDir;

    fn per_band_layout(dir: &TempDir) -> LayoutDescriptor {
        let files = (0..2)
            .map(|band| {
                let path = dir.path().join(format!("band{}.raw", band));
                std::fs::write(&path, vec![band as u8 + 1; 8 + 6]).unwrap();
                BandFile::new(path, 8)
            })
            .collect();
        LayoutDescriptor::new(
            InterleaveFormat::Bsq,
            EncodingType::Int1U,
            2,
            3,
            2,
            FileLayout::PerBand(files),
        )
        .unwrap()
    }

    #[test]
    fn test_file_store_lazy_handles() {
        let dir = TempDir::new().unwrap();
        let layout = per_band_layout(&dir);
        let mut store = FileStore::open(&layout, true).unwrap();
        assert_eq!(store.pool().open_count(), 0);

        let mut buf = [0u8; 3];
        let (file, offset) = layout.byte_offset_of(1, 0, 1).unwrap();
        store.read_at(file, offset, &mut buf).unwrap();
        assert_eq!(buf, [2, 2, 2]);
        assert_eq!(store.pool().open_count(), 1);

        store.write_at(0, 8, &[9, 9]).unwrap();
        store.sync().unwrap();
        let written = std::fs::read(dir.path().join("band0.raw")).unwrap();
        assert_eq!(&written[8..11], &[9, 9, 1]);
    }

    #[test]
    fn test_read_only_file_store() {
        let dir = TempDir::new().unwrap();
        let layout = per_band_layout(&dir);
        let mut store = FileStore::open(&layout, false).unwrap();
        assert!(!store.is_writable());
        assert!(store.write_at(0, 8, &[1]).is_err());
        let mut buf = [0u8; 1];
        store.read_at(0, 8, &mut buf).unwrap();
        store.sync().unwrap();
    }

    #[test]
    fn test_sync_covers_every_open_file() {
        let dir = TempDir::new().unwrap();
        let layout = per_band_layout(&dir);
        let mut store = FileStore::open(&layout, true).unwrap();
        store.write_at(0, 13, &[7]).unwrap();
        store.write_at(1, 8, &[5, 5, 5, 5, 5, 5]).unwrap();
        assert_eq!(store.pool().open_count(), 2);
        store.sync().unwrap();
        drop(store);

        let first = std::fs::read(dir.path().join("band0.raw")).unwrap();
        let second = std::fs::read(dir.path().join("band1.raw")).unwrap();
        assert_eq!(first[13], 7);
        assert_eq!(&second[8..], &[5; 6]);
    }

    #[test]
    fn test_short_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let layout = per_band_layout(&dir);
        let mut store = FileStore::open(&layout, false).unwrap();
        let mut buf = [0u8; 32];
        assert!(matches!(
            store.read_at(0, 8, &mut buf),
            Err(CubeError::Io(_))
        ));
        assert!(matches!(MemoryStore::load(&LayoutDescriptor {
            rows: 4,
            ..layout
        }), Err(CubeError::Io(_))));
    }

    #[test]
    fn test_memory_store_bounds() {
        let layout =
            LayoutDescriptor::in_memory(InterleaveFormat::Bip, EncodingType::Int2S, 2, 2, 2).unwrap();
        let mut store = MemoryStore::zeroed(&layout);
        store.write_at(0, 14, &[1, 2]).unwrap();
        let mut buf = [0u8; 2];
        store.read_at(0, 14, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert!(store.write_at(0, 15, &[1, 2]).is_err());
        assert!(store.read_at(1, 0, &mut buf).is_err());
    }

    #[test]
    fn test_paths_required_on_disk() {
        let layout =
            LayoutDescriptor::in_memory(InterleaveFormat::Bip, EncodingType::Int2S, 2, 2, 2).unwrap();
        assert!(FileStore::open(&layout, false).is_err());
    }
}
