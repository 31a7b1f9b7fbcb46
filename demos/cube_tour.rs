//! Example: import a band-sequential scene, read it pixel-interleaved and summarize a band
//!
//! Run with: cargo run --example cube_tour

use rastercube::{
    AccessRequest, AxisSpan, BandFile, ComplexComponent, DimensionDescriptor, EncodingType,
    FileLayout, InterleaveFormat, LayoutDescriptor, ProcessingLocation, RasterCube,
    TemporaryStore, ViewDescriptor,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("rastercube tour");
    println!("===============\n");

    let (rows, columns, bands) = (400u32, 300u32, 6u32);
    let temp_dir = tempfile::tempdir()?;
    let path = temp_dir.path().join("scene.bsq");

    // write a synthetic 16-bit scene with a 128 byte header
    let header = 128u64;
    let plane = (rows * columns) as usize;
    let mut image = vec![0u8; header as usize + plane * bands as usize * 2];
    for band in 0..bands as usize {
        for row in 0..rows as usize {
            for col in 0..columns as usize {
                let value = (row + col * (band + 1)) as u16;
                let offset = header as usize + (band * plane + row * columns as usize + col) * 2;
                image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            }
        }
    }
    std::fs::write(&path, image)?;

    let layout = LayoutDescriptor::new(
        InterleaveFormat::Bsq,
        EncodingType::Int2U,
        rows,
        columns,
        bands,
        FileLayout::Single(BandFile::new(&path, header)),
    )?;
    println!("Layout: {}", layout.summary());

    let view = ViewDescriptor::for_layout(&layout, ProcessingLocation::OnDiskReadOnly);
    let cube = RasterCube::import("tour", layout, view)?;

    // keep the even bands only
    cube.set_active_bands(
        (0..bands)
            .step_by(2)
            .enumerate()
            .map(|(active, disk)| DimensionDescriptor::uniform(disk).with_active(active as u32))
            .collect(),
    )?;
    let (active_rows, active_columns, active_bands) = cube.extents();
    println!(
        "Active subset: {} x {} x {}",
        active_rows, active_columns, active_bands
    );

    // pixel-interleaved pass over a strided window, 32 rows resident at a time
    let request = AccessRequest::new()
        .with_rows(AxisSpan::new(0, 399, 4))
        .with_columns(AxisSpan::range(100, 199))
        .with_interleave(InterleaveFormat::Bip)
        .with_concurrent_rows(32);
    let mut accessor = cube.accessor(Some(request))?;
    let mut sum = 0.0;
    let mut samples = 0u64;
    while accessor.is_valid() {
        while accessor.is_valid() {
            for band in 0..accessor.band_count() {
                sum += accessor.value(band, ComplexComponent::Magnitude)?;
                samples += 1;
            }
            accessor.next_column()?;
        }
        accessor.next_row(true)?;
    }
    accessor.release()?;
    println!("Window mean over {} samples: {:.2}", samples, sum / samples as f64);

    let stats = cube.statistics(1)?;
    println!("\nActive band 1 (on-disk band 2):");
    println!("  min {} max {} mean {:.2} std dev {:.2}", stats.min, stats.max, stats.mean, stats.std_dev);
    println!(
        "  5% {:.1}  50% {:.1}  95% {:.1}",
        stats.percentile(5.0),
        stats.percentile(50.0),
        stats.percentile(95.0)
    );

    // resident chip of the upper-left corner, re-encoded to floats on disk
    let chip = cube.create_chip(
        "corner",
        AccessRequest::new()
            .with_rows(AxisSpan::range(0, 63))
            .with_columns(AxisSpan::range(0, 63)),
    )?;
    let floats = TemporaryStore::convert(&chip, EncodingType::Flt4, "corner-f32")?;
    println!("\nChip: {}", chip.layout().summary());
    println!("Converted: {}", floats.layout().summary());
    println!(
        "Pixel (10, 20) band 0: {}",
        floats.pixel_value(10, 20, 0, ComplexComponent::Magnitude)?
    );

    Ok(())
}
