//! Product storage and file-format access

pub mod annotation;
pub mod archive;
pub mod raster;
pub mod vector;
pub mod xml;

pub use annotation::{AnnotationParser, CalibrationLut};
pub use archive::ProductSource;
pub use raster::{FlagRaster, PixelRequest, RasterData, RasterInfo, RasterIo, ReadOptions, Resampling};
pub use vector::{GmlVectorIo, MaskFeature, VectorIo};
pub use xml::XmlElement;
