//! Background helpers that run blocking cube work on tokio's blocking pool

use crate::cube::RasterCube;
use crate::error::{CubeError, Result};
use crate::statistics::Statistics;
use crate::types::ComplexComponent;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

async fn on_worker<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CubeError::Worker(e.to_string()))?
}

/// Statistics of active band `band`, computed off the async runtime
pub async fn statistics_on_worker(cube: Arc<RasterCube>, band: u32) -> Result<Arc<Statistics>> {
    statistics_with_on_worker(cube, band, ComplexComponent::default(), 1).await
}

pub async fn statistics_with_on_worker(
    cube: Arc<RasterCube>,
    band: u32,
    component: ComplexComponent,
    resolution: u32,
) -> Result<Arc<Statistics>> {
    on_worker(move || cube.statistics_with(band, component, resolution)).await
}

/// Statistics of every active band, one worker per band
pub async fn all_band_statistics(cube: Arc<RasterCube>) -> Result<Vec<Arc<Statistics>>> {
    let (_, _, bands) = cube.extents();
    debug!(cube = %cube.id(), bands, "computing statistics for all bands");
    try_join_all((0..bands as u32).map(|band| statistics_on_worker(cube.clone(), band))).await
}

/// [`RasterCube::create_temporary_store`] off the async runtime
pub async fn temporary_store_on_worker(cube: Arc<RasterCube>) -> Result<bool> {
    on_worker(move || Ok(cube.create_temporary_store())).await
}
