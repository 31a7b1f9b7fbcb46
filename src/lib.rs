//! rastercube - storage and access engine for raster data cubes
//!
//! A cube is a rows x columns x bands grid of numeric elements. It may be resident in memory,
//! stored in one file, or stored in one file per band, and its elements may be laid out
//! band-interleaved-by-pixel (BIP), band-sequential (BSQ) or band-interleaved-by-line (BIL).
//! Callers ask for any ordering regardless of how the data is stored.
//!
//! # Features
//!
//! - Three-tier dimension numbering: original, on-disk and active identities per index
//! - Active subsets, strides and sparse selections, coalesced into few large reads
//! - Paged windows bounded by a process-wide memory ceiling
//! - Writable accessors with read-modify-write flushing
//! - Temporary disk-backed copies, encoding conversion and resident chips
//! - Per-band statistics with histograms and percentiles, cached until data changes
//!
//! # Example
//!
//! ```rust,no_run
//! use rastercube::{AccessRequest, AxisSpan, EncodingType, InterleaveFormat, RasterCube};
//!
//! # fn example() -> rastercube::Result<()> {
//! let cube = RasterCube::new_in_memory("scene", 512, 512, 10, EncodingType::Int4U, InterleaveFormat::Bsq)?;
//!
//! // read band 3 of rows 100..=199 pixel-interleaved, 16 rows at a time
//! let request = AccessRequest::new()
//!     .with_rows(AxisSpan::range(100, 199))
//!     .with_bands(AxisSpan::single(3))
//!     .with_interleave(InterleaveFormat::Bip)
//!     .with_concurrent_rows(16);
//! let mut accessor = cube.accessor(Some(request))?;
//! while accessor.is_valid() {
//!     let row = accessor.row()?;
//!     # let _ = row;
//!     accessor.next_row(true)?;
//! }
//!
//! let stats = cube.statistics(3)?;
//! println!("mean {} std dev {}", stats.mean, stats.std_dev);
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod config;
pub mod cube;
pub mod dimension;
pub mod error;
pub mod layout;
pub mod metadata;
pub mod pager;
pub mod request;
pub mod statistics;
pub mod store;
pub mod tempstore;
pub mod types;
pub mod utils;
pub mod view;
pub mod worker;

// Re-exports
pub use accessor::Accessor;
pub use config::EngineConfig;
pub use cube::RasterCube;
pub use dimension::{DimensionDescriptor, OnDiskRange, Resolver};
pub use error::{CubeError, Result};
pub use layout::{BandFile, FileLayout, LayoutDescriptor};
pub use metadata::{CubeDescriptor, CubeMetadata};
pub use request::{AccessRequest, AxisSpan};
pub use statistics::{Histogram, Statistics};
pub use store::{BackingStore, StoreKind};
pub use tempstore::TemporaryStore;
pub use types::{Axis, ComplexComponent, EncodingType, InterleaveFormat, ProcessingLocation};
pub use view::{BadValueSet, BadValues, ViewDescriptor};

/// Version of the rastercube crate
pub const RASTERCUBE_VERSION: &str = env!("CARGO_PKG_VERSION");
