//! Memory ceiling enforcement.
//!
//! The ceiling is process-wide, so everything runs in one test.

mod common;

use rastercube::config::{self, EngineConfig};
use rastercube::{
    AccessRequest, ComplexComponent, CubeError, EncodingType, InterleaveFormat,
    ProcessingLocation, RasterCube,
};

const MB: u64 = 1024 * 1024;

#[test]
fn test_memory_ceiling() {
    common::init_tracing();
    let saved = config::global();
    let tight = EngineConfig {
        memory_ceiling_mb: 1,
        ..saved.clone()
    };
    config::set_global(tight.clone()).unwrap();

    // 2 MB resident cube
    let cube =
        RasterCube::new_in_memory("large", 1024, 1024, 2, EncodingType::Int1U, InterleaveFormat::Bip)
            .unwrap();
    {
        let mut acc = cube
            .accessor(Some(AccessRequest::pixel(700, 33, 1).writable(true)))
            .unwrap();
        acc.set_value(0, 99.0).unwrap();
        acc.release().unwrap();
    }

    // a whole-cube window is refused before any data is touched
    match cube.accessor(None) {
        Err(CubeError::ResourceExhausted { requested, ceiling }) => {
            assert_eq!(requested, 2 * MB);
            assert_eq!(ceiling, MB);
        }
        other => panic!("expected ResourceExhausted, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        cube.read_window(AccessRequest::new().with_concurrent_rows(16)),
        Err(CubeError::ResourceExhausted { .. })
    ));

    // the same selection paged a quarter at a time fits
    let mut acc = cube
        .accessor(Some(AccessRequest::new().with_concurrent_rows(256)))
        .unwrap();
    let mut rows = 0;
    while acc.is_valid() {
        rows += 1;
        acc.next_row(true).unwrap();
    }
    assert_eq!(rows, 1024);
    drop(acc);

    // statistics page themselves under the ceiling
    let stats = cube.statistics(1).unwrap();
    assert_eq!(stats.max, 99.0);
    assert_eq!(stats.count, 1024 * 1024);

    // a temporary store that cannot be created leaves the cube untouched
    config::set_global(EngineConfig {
        temp_dir: std::env::temp_dir().join("rastercube-missing").join("nested"),
        ..tight.clone()
    })
    .unwrap();
    assert!(!cube.create_temporary_store());
    assert_eq!(cube.processing_location(), ProcessingLocation::InMemory);
    assert!(cube.temporary_path().is_none());
    assert_eq!(
        cube.pixel_value(33, 700, 1, ComplexComponent::Magnitude).unwrap(),
        99.0
    );

    // with a usable directory it succeeds, paging the copy
    config::set_global(tight).unwrap();
    assert!(cube.create_temporary_store());
    assert_eq!(cube.processing_location(), ProcessingLocation::OnDisk);
    assert_eq!(
        cube.pixel_value(33, 700, 1, ComplexComponent::Magnitude).unwrap(),
        99.0
    );

    // promoting the 2 MB file back into memory would exceed the ceiling
    assert!(matches!(
        cube.set_processing_location(ProcessingLocation::InMemory),
        Err(CubeError::ResourceExhausted { .. })
    ));
    assert_eq!(cube.processing_location(), ProcessingLocation::OnDisk);

    config::set_global(saved.clone()).unwrap();
    cube.set_processing_location(ProcessingLocation::InMemory)
        .unwrap();
    assert_eq!(config::global(), saved);
}
