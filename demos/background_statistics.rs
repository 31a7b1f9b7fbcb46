//! Example: compute statistics for every band on tokio's blocking pool
//!
//! Run with: cargo run --example background_statistics

use rastercube::worker::{all_band_statistics, temporary_store_on_worker};
use rastercube::{AccessRequest, EncodingType, InterleaveFormat, RasterCube};
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("rastercube background statistics");
    println!("================================\n");

    let cube = RasterCube::new_in_memory(
        "spectra",
        256,
        256,
        32,
        EncodingType::Flt4,
        InterleaveFormat::Bip,
    )?;

    // each band is a ramp scaled by its band number
    let mut accessor = cube.accessor(Some(
        AccessRequest::new().writable(true).with_concurrent_rows(64),
    ))?;
    let bands = accessor.band_count();
    while accessor.is_valid() {
        while accessor.is_valid() {
            let base = (accessor.current_row() + accessor.current_column()) as f64;
            for band in 0..bands {
                accessor.set_value(band, base * (band + 1) as f64)?;
            }
            accessor.next_column()?;
        }
        accessor.next_row(true)?;
    }
    accessor.release()?;

    let cube = Arc::new(cube);
    let moved = temporary_store_on_worker(cube.clone()).await?;
    println!("Moved to temporary store: {}", moved);

    let start = Instant::now();
    let stats = all_band_statistics(cube.clone()).await?;
    println!("Computed {} bands in {:?}\n", stats.len(), start.elapsed());

    for (band, s) in stats.iter().enumerate().step_by(8) {
        println!(
            "  band {:2}: min {:8.1} max {:8.1} mean {:8.2} median {:8.1}",
            band,
            s.min,
            s.max,
            s.mean,
            s.percentile(50.0)
        );
    }

    // the second request is served from the cache
    let start = Instant::now();
    all_band_statistics(cube).await?;
    println!("\nCached pass took {:?}", start.elapsed());

    Ok(())
}
