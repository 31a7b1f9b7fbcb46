//! Fixtures shared by the integration tests

#![allow(dead_code)]

use rastercube::{
    AccessRequest, BandFile, ComplexComponent, EncodingType, FileLayout, InterleaveFormat,
    LayoutDescriptor, RasterCube,
};
use std::path::Path;

/// Distinct value for every on-disk element of the small fixtures
pub fn value(row: u32, col: u32, band: u32) -> f64 {
    (row * 1000 + col * 10 + band) as f64
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write every file of `layout`, headers filled with 0xAB, elements from `f`
pub fn write_layout(layout: &LayoutDescriptor, f: impl Fn(u32, u32, u32) -> f64) {
    let mut images: Vec<Vec<u8>> = (0..layout.file_count())
        .map(|i| vec![0xABu8; layout.file_len(i) as usize])
        .collect();
    let width = layout.bytes_per_element();
    for row in 0..layout.rows {
        for col in 0..layout.columns {
            for band in 0..layout.bands {
                let (file, offset) = layout.byte_offset_of(row, col, band).unwrap();
                let offset = offset as usize;
                layout
                    .encoding
                    .encode(f(row, col, band), &mut images[file][offset..offset + width]);
            }
        }
    }
    for (file, image) in layout.files.files().iter().zip(images) {
        std::fs::write(file.path.as_ref().unwrap(), image).unwrap();
    }
}

/// Single-file cube on disk
pub fn single_file(
    dir: &Path,
    name: &str,
    interleave: InterleaveFormat,
    encoding: EncodingType,
    (rows, columns, bands): (u32, u32, u32),
    header: u64,
) -> LayoutDescriptor {
    let layout = LayoutDescriptor::new(
        interleave,
        encoding,
        rows,
        columns,
        bands,
        FileLayout::Single(BandFile::new(dir.join(name), header)),
    )
    .unwrap();
    write_layout(&layout, value);
    layout
}

/// Band-sequential cube with one file per band, header `16 * band` bytes
pub fn per_band_files(
    dir: &Path,
    encoding: EncodingType,
    (rows, columns, bands): (u32, u32, u32),
) -> LayoutDescriptor {
    let files = (0..bands)
        .map(|band| BandFile::new(dir.join(format!("band{:02}.raw", band)), 16 * band as u64))
        .collect();
    let layout = LayoutDescriptor::new(
        InterleaveFormat::Bsq,
        encoding,
        rows,
        columns,
        bands,
        FileLayout::PerBand(files),
    )
    .unwrap();
    write_layout(&layout, value);
    layout
}

/// Every active element in (row, column, band) order, read through `target` ordering
pub fn read_all(cube: &RasterCube, target: InterleaveFormat) -> Vec<f64> {
    let request = AccessRequest::new()
        .with_interleave(target)
        .with_concurrent_rows(3);
    let mut acc = cube.accessor(Some(request)).unwrap();
    let (columns, bands) = (acc.column_count(), acc.band_count());
    let mut out = vec![0.0; acc.row_count() * columns * bands];

    let mut row = 0;
    while acc.is_valid() {
        let mut col = 0;
        while acc.is_valid() {
            for band in 0..bands {
                out[(row * columns + col) * bands + band] =
                    acc.value(band, ComplexComponent::InPhase).unwrap();
            }
            col += 1;
            acc.next_column().unwrap();
        }
        row += 1;
        acc.next_row(true).unwrap();
    }
    acc.release().unwrap();
    out
}

/// Fill every active element with `f` of its active coordinates
pub fn fill(cube: &RasterCube, f: impl Fn(u32, u32, u32) -> f64) {
    let mut acc = cube
        .accessor(Some(AccessRequest::new().writable(true).with_concurrent_rows(8)))
        .unwrap();
    let bands = acc.band_count();
    while acc.is_valid() {
        while acc.is_valid() {
            let (row, col) = (acc.current_row(), acc.current_column());
            for band in 0..bands {
                acc.set_value(band, f(row, col, band as u32)).unwrap();
            }
            acc.next_column().unwrap();
        }
        acc.next_row(true).unwrap();
    }
    acc.release().unwrap();
}
