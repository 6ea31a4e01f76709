//! Sensor-independent band processing

pub mod bands;
pub mod cache;
pub mod calibrate;
pub mod geocode;
pub mod index;
pub mod masks;
pub mod product;
pub mod rasterize;
pub mod resample;

// Re-export main types
pub use bands::{resolve, BandDescriptor, BandMap, BandName};
pub use calibrate::{to_physical_units, Calibration, CalibrationType, OpticalCalibration, SarCalibration};
pub use geocode::{orthorectify, Binning, TiePoint, TiePointGrid};
pub use masks::{apply_invalid_pixel_mask, cloud_band, invalid_pixel_mask, CloudRules, MaskProvider, MaskStrategy};
pub use product::{FamilyKind, Product, ProductState, SensorFamily};
