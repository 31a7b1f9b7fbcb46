//! Temporary stores, duplicates and conversions

mod common;

use common::{fill, single_file, value};
use rastercube::{
    AccessRequest, ComplexComponent, CubeError, DimensionDescriptor, EncodingType, InterleaveFormat,
    ProcessingLocation, RasterCube, TemporaryStore, ViewDescriptor,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use tempfile::TempDir;

const SCENE: (u32, u32, u32) = (512, 512, 10);

fn scene_value(row: u32, col: u32, band: u32) -> u32 {
    (row * SCENE.1 + col) * SCENE.2 + band
}

/// Fill a resident scene row by row through pixel-interleaved windows
fn scene(interleave: InterleaveFormat) -> RasterCube {
    let (rows, cols, bands) = SCENE;
    let cube = RasterCube::new_in_memory("scene", rows, cols, bands, EncodingType::Int4U, interleave)
        .unwrap();
    let request = AccessRequest::new()
        .with_interleave(InterleaveFormat::Bip)
        .writable(true)
        .with_concurrent_rows(64);
    let mut acc = cube.accessor(Some(request)).unwrap();
    while acc.is_valid() {
        let row = acc.current_row();
        for (i, raw) in acc.row_mut().unwrap().chunks_exact_mut(4).enumerate() {
            let (col, band) = (i as u32 / bands, i as u32 % bands);
            raw.copy_from_slice(&scene_value(row, col, band).to_le_bytes());
        }
        acc.next_row(true).unwrap();
    }
    acc.release().unwrap();
    cube
}

fn band_sequential(cube: &RasterCube) -> Vec<u8> {
    cube.read_window(AccessRequest::new().with_interleave(InterleaveFormat::Bsq))
        .unwrap()
        .to_vec()
}

#[test]
fn test_scene_storage_orderings_agree() {
    common::init_tracing();
    let bsq = scene(InterleaveFormat::Bsq);
    let bip = scene(InterleaveFormat::Bip);
    let before = band_sequential(&bsq);
    assert_eq!(before, band_sequential(&bip));

    let plane = (SCENE.0 * SCENE.1) as usize * 4;
    let at = |bytes: &[u8], row: u32, col: u32, band: u32| {
        let offset = band as usize * plane + ((row * SCENE.1 + col) as usize) * 4;
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    };
    assert_eq!(at(&before, 0, 0, 0), 0);
    assert_eq!(at(&before, 300, 17, 9), scene_value(300, 17, 9));
    assert_eq!(at(&before, 511, 511, 4), scene_value(511, 511, 4));

    assert!(bsq.create_temporary_store());
    assert!(bip.create_temporary_store());
    assert_eq!(bsq.processing_location(), ProcessingLocation::OnDisk);
    assert_eq!(band_sequential(&bsq), before);
    assert_eq!(band_sequential(&bip), before);
}

#[test]
fn test_temporary_store_round_trip() {
    let dims = (6, 11, 3);
    for interleave in [InterleaveFormat::Bip, InterleaveFormat::Bsq, InterleaveFormat::Bil] {
        let cube = RasterCube::new_in_memory("round", dims.0, dims.1, dims.2, EncodingType::Int2S, interleave)
            .unwrap();
        fill(&cube, |r, c, b| -(value(r, c, b)));
        assert!(cube.create_temporary_store());
        let path = cube.temporary_path().unwrap();
        assert!(path.exists());

        // row-sequential
        let mut acc = cube.accessor(None).unwrap();
        while acc.is_valid() {
            while acc.is_valid() {
                let (r, c) = (acc.current_row(), acc.current_column());
                for b in 0..dims.2 {
                    let got = acc.value(b as usize, ComplexComponent::InPhase).unwrap();
                    assert_eq!(got, cube.pixel_value(c, r, b, ComplexComponent::InPhase).unwrap());
                    assert_eq!(got, -value(r, c, b));
                }
                acc.next_column().unwrap();
            }
            acc.next_row(true).unwrap();
        }
        drop(acc);

        // column-sequential
        let mut acc = cube
            .accessor(Some(AccessRequest::new().with_concurrent_rows(2)))
            .unwrap();
        for c in 0..dims.1 {
            for r in 0..dims.0 {
                acc.to_pixel(r, c).unwrap();
                assert_eq!(
                    acc.value(1, ComplexComponent::InPhase).unwrap(),
                    -value(r, c, 1)
                );
            }
        }
        drop(acc);

        drop(cube);
        assert!(!path.exists());
    }
}

#[test]
fn test_temporary_store_from_sparse_subset() {
    let dir = TempDir::new().unwrap();
    let layout = single_file(
        dir.path(),
        "sparse.raw",
        InterleaveFormat::Bil,
        EncodingType::Int2U,
        (5, 6, 3),
        8,
    );
    let view = ViewDescriptor::for_layout(&layout, ProcessingLocation::OnDiskReadOnly);
    let cube = RasterCube::import("sparse", layout, view).unwrap();
    cube.set_active_columns(vec![
        DimensionDescriptor::uniform(4).with_active(0),
        DimensionDescriptor::uniform(1).with_active(1),
    ])
    .unwrap();
    cube.set_active_bands(vec![DimensionDescriptor::uniform(2).with_active(0)])
        .unwrap();

    assert!(cube.create_temporary_store());
    let layout = cube.layout();
    assert_eq!((layout.rows, layout.columns, layout.bands), (5, 2, 1));
    let view = cube.view();
    assert_eq!(view.columns()[0].on_disk(), Some(0));
    assert_eq!(view.columns()[0].original(), Some(4));
    assert_eq!(view.columns()[1].original(), Some(1));
    assert_eq!(view.bands()[0].original(), Some(2));

    for r in 0..5 {
        assert_eq!(cube.pixel_value(0, r, 0, ComplexComponent::Magnitude).unwrap(), value(r, 4, 2));
        assert_eq!(cube.pixel_value(1, r, 0, ComplexComponent::Magnitude).unwrap(), value(r, 1, 2));
    }

    // the temporary store is writable even though the source was not
    let mut acc = cube
        .accessor(Some(AccessRequest::pixel(3, 1, 0).writable(true)))
        .unwrap();
    acc.set_value(0, 9.0).unwrap();
    acc.release().unwrap();
    assert_eq!(cube.pixel_value(1, 3, 0, ComplexComponent::Magnitude).unwrap(), 9.0);
}

#[test]
fn test_duplicate_leaves_source_alone() {
    let cube = RasterCube::new_in_memory("source", 4, 4, 2, EncodingType::Flt4, InterleaveFormat::Bip)
        .unwrap();
    fill(&cube, |r, c, b| value(r, c, b) / 4.0);

    let copy = TemporaryStore::duplicate(&cube, "copy").unwrap();
    assert_eq!(copy.name(), "copy");
    assert_ne!(copy.id(), cube.id());
    assert_eq!(cube.processing_location(), ProcessingLocation::InMemory);

    fill(&copy, |_, _, _| 0.0);
    assert_eq!(copy.pixel_value(3, 2, 1, ComplexComponent::Magnitude).unwrap(), 0.0);
    assert_eq!(
        cube.pixel_value(3, 2, 1, ComplexComponent::Magnitude).unwrap(),
        value(2, 3, 1) / 4.0
    );
}

#[test]
fn test_convert_saturates_integers() {
    let cube = RasterCube::new_in_memory("wide", 3, 3, 1, EncodingType::Int2S, InterleaveFormat::Bsq)
        .unwrap();
    fill(&cube, |r, c, _| (r as f64 - 1.0) * 200.0 + c as f64);

    let narrow = TemporaryStore::convert(&cube, EncodingType::Int1U, "narrow").unwrap();
    assert_eq!(narrow.view().encoding(), EncodingType::Int1U);
    let at = |c, r| narrow.pixel_value(c, r, 0, ComplexComponent::Magnitude).unwrap();
    assert_eq!(at(2, 0), 0.0);
    assert_eq!(at(2, 1), 2.0);
    assert_eq!(at(2, 2), 202.0);

    let float = TemporaryStore::convert(&cube, EncodingType::Flt8, "float").unwrap();
    assert_eq!(
        float.pixel_value(1, 0, 0, ComplexComponent::Magnitude).unwrap(),
        -199.0
    );
}

#[test]
fn test_convert_complex_keeps_parts() {
    let cube = RasterCube::new_in_memory("iq", 2, 2, 1, EncodingType::Int4SComplex, InterleaveFormat::Bip)
        .unwrap();
    {
        let mut acc = cube
            .accessor(Some(AccessRequest::pixel(1, 1, 0).writable(true)))
            .unwrap();
        let raw = acc.element_mut(0).unwrap();
        raw[..2].copy_from_slice(&3i16.to_le_bytes());
        raw[2..].copy_from_slice(&(-4i16).to_le_bytes());
        acc.release().unwrap();
    }

    let complex = TemporaryStore::convert(&cube, EncodingType::Flt8Complex, "complex").unwrap();
    assert_eq!(complex.pixel_value(1, 1, 0, ComplexComponent::InPhase).unwrap(), 3.0);
    assert_eq!(complex.pixel_value(1, 1, 0, ComplexComponent::Quadrature).unwrap(), -4.0);

    let magnitude = TemporaryStore::convert(&cube, EncodingType::Flt4, "magnitude").unwrap();
    assert_eq!(magnitude.pixel_value(1, 1, 0, ComplexComponent::Magnitude).unwrap(), 5.0);
}

#[test]
fn test_writes_racing_temporary_store_are_kept_or_rejected() {
    let cube = RasterCube::new_in_memory("racing", 64, 64, 2, EncodingType::Int4U, InterleaveFormat::Bil)
        .unwrap();
    let progress = AtomicU32::new(0);
    let stop = AtomicBool::new(false);

    let last_kept = thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let mut kept = 0u32;
            let mut next = 0u32;
            while !stop.load(Ordering::Acquire) {
                next += 1;
                let mut acc = cube
                    .accessor(Some(AccessRequest::pixel(0, 0, 0).writable(true)))
                    .unwrap();
                let outcome = match acc.set_value(0, next as f64) {
                    Ok(()) => acc.release(),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(()) => kept = next,
                    Err(e) => assert!(matches!(e, CubeError::StaleWindow(_)), "{}", e),
                }
                progress.store(next, Ordering::Release);
            }
            kept
        });

        while progress.load(Ordering::Acquire) < 20 && !writer.is_finished() {
            thread::yield_now();
        }
        assert!(cube.create_temporary_store());
        let switched = progress.load(Ordering::Acquire);
        while progress.load(Ordering::Acquire) < switched + 20 && !writer.is_finished() {
            thread::yield_now();
        }
        stop.store(true, Ordering::Release);
        writer.join().unwrap()
    });

    assert_eq!(cube.processing_location(), ProcessingLocation::OnDisk);
    assert!(last_kept > 0);
    assert_eq!(
        cube.pixel_value(0, 0, 0, ComplexComponent::Magnitude).unwrap(),
        last_kept as f64
    );
}
