//! Layout descriptor - how a cube's elements are physically laid out in its backing files

use crate::error::{CubeError, Result};
use crate::types::{EncodingType, InterleaveFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One physical file (or in-memory image) holding cube elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandFile {
    /// Location on disk; `None` for stores that only ever lived in memory
    pub path: Option<PathBuf>,
    /// Bytes to skip before the first element
    pub header_bytes: u64,
}

impl BandFile {
    pub fn new(path: impl AsRef<Path>, header_bytes: u64) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            header_bytes,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            header_bytes: 0,
        }
    }
}

/// Whether the cube lives in one file or in one file per band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileLayout {
    Single(BandFile),
    /// Ordered by on-disk band number; band-sequential storage only
    PerBand(Vec<BandFile>),
}

impl FileLayout {
    pub fn files(&self) -> &[BandFile] {
        match self {
            FileLayout::Single(file) => std::slice::from_ref(file),
            FileLayout::PerBand(files) => files,
        }
    }
}

/// Physical description of a cube, fixed once the data has been imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    pub interleave: InterleaveFormat,
    pub encoding: EncodingType,
    /// On-disk row count
    pub rows: u32,
    /// On-disk column count
    pub columns: u32,
    /// On-disk band count
    pub bands: u32,
    pub files: FileLayout,
}

impl LayoutDescriptor {
    /// Create a new layout descriptor
    pub fn new(
        interleave: InterleaveFormat,
        encoding: EncodingType,
        rows: u32,
        columns: u32,
        bands: u32,
        files: FileLayout,
    ) -> Result<Self> {
        if rows == 0 || columns == 0 || bands == 0 {
            return Err(CubeError::invalid(format!(
                "cube extents must be non-zero, got {} x {} x {}",
                rows, columns, bands
            )));
        }

        if let FileLayout::PerBand(list) = &files {
            if interleave != InterleaveFormat::Bsq {
                return Err(CubeError::invalid(format!(
                    "per-band files require BSQ storage, not {}",
                    interleave
                )));
            }
            if list.len() != bands as usize {
                return Err(CubeError::invalid(format!(
                    "{} band files given for {} bands",
                    list.len(),
                    bands
                )));
            }
        }

        Ok(Self {
            interleave,
            encoding,
            rows,
            columns,
            bands,
            files,
        })
    }

    /// Single memory-only image with no header
    pub fn in_memory(
        interleave: InterleaveFormat,
        encoding: EncodingType,
        rows: u32,
        columns: u32,
        bands: u32,
    ) -> Result<Self> {
        Self::new(
            interleave,
            encoding,
            rows,
            columns,
            bands,
            FileLayout::Single(BandFile::in_memory()),
        )
    }

    pub fn bytes_per_element(&self) -> usize {
        self.encoding.bytes_per_element()
    }

    pub fn file_count(&self) -> usize {
        self.files.files().len()
    }

    pub fn is_multi_file(&self) -> bool {
        matches!(self.files, FileLayout::PerBand(_))
    }

    /// Elements stored in each file, headers excluded
    fn elements_in_file(&self) -> u64 {
        let plane = self.rows as u64 * self.columns as u64;
        if self.is_multi_file() {
            plane
        } else {
            plane * self.bands as u64
        }
    }

    /// Full byte length of file `index`, header included
    pub fn file_len(&self, index: usize) -> u64 {
        let header = self
            .files
            .files()
            .get(index)
            .map(|file| file.header_bytes)
            .unwrap_or(0);
        header + self.elements_in_file() * self.bytes_per_element() as u64
    }

    /// Bytes of element data across all files
    pub fn total_data_bytes(&self) -> u64 {
        self.rows as u64 * self.columns as u64 * self.bands as u64 * self.bytes_per_element() as u64
    }

    /// Physical address of the element at on-disk `(row, col, band)`: file index and byte offset.
    ///
    /// Every physical access in the crate goes through here.
    pub fn byte_offset_of(&self, row: u32, col: u32, band: u32) -> Result<(usize, u64)> {
        if row >= self.rows || col >= self.columns || band >= self.bands {
            return Err(CubeError::out_of_bounds(format!(
                "on-disk ({}, {}, {}) outside {} x {} x {}",
                row, col, band, self.rows, self.columns, self.bands
            )));
        }

        let (row, col, band) = (row as u64, col as u64, band as u64);
        let (rows, columns, bands) = (self.rows as u64, self.columns as u64, self.bands as u64);

        let (file, element) = match (&self.files, self.interleave) {
            (FileLayout::PerBand(_), _) => (band as usize, row * columns + col),
            (FileLayout::Single(_), InterleaveFormat::Bsq) => {
                (0, (band * rows + row) * columns + col)
            }
            (FileLayout::Single(_), InterleaveFormat::Bip) => {
                (0, (row * columns + col) * bands + band)
            }
            (FileLayout::Single(_), InterleaveFormat::Bil) => {
                (0, (row * bands + band) * columns + col)
            }
        };

        let header = self.files.files()[file].header_bytes;
        Ok((file, header + element * self.bytes_per_element() as u64))
    }

    /// Get a summary string of the layout
    pub fn summary(&self) -> String {
        format!(
            "{} x {} x {} {} ({}), {} file(s), {:.2} MB",
            self.rows,
            self.columns,
            self.bands,
            self.interleave,
            self.encoding,
            self.file_count(),
            self.total_data_bytes() as f64 / (1024.0 * 1024.0)
        )
    }
}
