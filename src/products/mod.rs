//! Sensor families

pub mod cosmo_skymed;
pub mod dimap;
pub mod radarsat2;
pub mod sar;
pub mod sentinel2;
pub mod sentinel3;

pub use cosmo_skymed::CosmoSkymedProduct;
pub use dimap::DimapProduct;
pub use radarsat2::Radarsat2Product;
pub use sentinel2::Sentinel2Product;
pub use sentinel3::Sentinel3Product;
