//! eobands: uniform band access over optical and SAR satellite products
//!
//! Sentinel-2, Sentinel-3, SPOT 6/7 and Pléiades (DIMAP), RADARSAT-2 and
//! COSMO-SkyMed products are opened through one [`Product`] type. Bands are
//! requested by abstract name (`RED`, `NIR`, `VV`, `CLOUDS`) and come back
//! in physical units on a common pixel grid, with invalid pixels set to the
//! nodata sentinel. Spectral indices are evaluated from those bands.

pub mod config;
pub mod core;
pub mod io;
pub mod products;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::config::ReaderConfig;
pub use crate::core::bands::{BandDescriptor, BandMap, BandName, Wavelength};
pub use crate::core::index::{all_index_names, get_index, SpectralIndex};
pub use crate::core::product::{
    Constellation, FamilyKind, IoBackends, Product, ProductContext, ProductState, SensorFamily, SensorProduct,
};
pub use crate::io::raster::{FlagRaster, PixelRequest, RasterData, RasterInfo, RasterIo, ReadOptions, Resampling};
pub use crate::types::{
    BandArray, BoundingBox, Crs, GeoTransform, GridSpec, OrbitDirection, ProductError, ProductResult, SunAngles, NODATA,
};
