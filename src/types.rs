use geo::{Coord, LineString, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::core::bands::BandName;

/// Sentinel written into every invalid pixel of a `BandArray`
pub const NODATA: f32 = f32::NAN;

/// EPSG code of geographic WGS84 coordinates
pub const WGS84_EPSG: u32 = 4326;

/// Coordinate reference system, identified by its EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: u32,
}

impl Crs {
    pub fn from_epsg(epsg: u32) -> Self {
        Self { epsg }
    }

    pub fn wgs84() -> Self {
        Self { epsg: WGS84_EPSG }
    }

    pub fn is_geographic(&self) -> bool {
        self.epsg == WGS84_EPSG
    }

    /// UTM zone number and hemisphere (`true` for north) of a WGS84 / UTM code
    pub fn utm_zone(&self) -> Option<(u32, bool)> {
        match self.epsg {
            32601..=32660 => Some((self.epsg - 32600, true)),
            32701..=32760 => Some((self.epsg - 32700, false)),
            _ => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = ProductError;

    /// Accepts `EPSG:32630`, `urn:ogc:def:crs:EPSG::32630`, `urn:ogc:def:crs:EPSG:6.6:32630`
    /// or a bare code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().rsplit(':').next().unwrap_or_default();
        code.parse::<u32>()
            .map(Crs::from_epsg)
            .map_err(|_| ProductError::invalid_metadata("crs", format!("cannot parse EPSG code from '{}'", s)))
    }
}

/// Geospatial bounding box in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Smallest box containing every point, `None` for an empty iterator
    pub fn from_points<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let mut bbox = Self::new(x0, y0, x0, y0);
        for (x, y) in iter {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        let ring = vec![
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
            Coord { x: self.min_x, y: self.max_y },
            Coord { x: self.min_x, y: self.min_y },
        ];
        Polygon::new(LineString::from(ring), vec![])
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn new(top_left_x: f64, pixel_width: f64, top_left_y: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// World coordinates of a (fractional) pixel position
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of world coordinates. Rotation terms are ignored.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }

    pub fn resolution(&self) -> f64 {
        self.pixel_width.abs()
    }

    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(width as f64, 0.0),
            self.pixel_to_world(0.0, height as f64),
            self.pixel_to_world(width as f64, height as f64),
        ];
        BoundingBox::from_points(corners).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Same origin, pixel sizes multiplied by the given factors
    pub fn scaled(&self, factor_x: f64, factor_y: f64) -> Self {
        Self {
            pixel_width: self.pixel_width * factor_x,
            rotation_x: self.rotation_x * factor_y,
            rotation_y: self.rotation_y * factor_x,
            pixel_height: self.pixel_height * factor_y,
            ..*self
        }
    }

    fn approx_eq(&self, other: &Self) -> bool {
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= 1e-6 * a.abs().max(1.0))
    }
}

/// Pixel grid of a band: transform, dimensions and CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub crs: Option<Crs>,
}

impl GridSpec {
    pub fn new(transform: GeoTransform, width: usize, height: usize, crs: Option<Crs>) -> Self {
        Self { transform, width, height, crs }
    }

    /// North-up grid covering `bbox` at `resolution`
    pub fn from_bounds(bbox: &BoundingBox, resolution: f64, crs: Option<Crs>) -> Self {
        let width = ((bbox.width() / resolution).ceil() as usize).max(1);
        let height = ((bbox.height() / resolution).ceil() as usize).max(1);
        let transform = GeoTransform::new(bbox.min_x, resolution, bbox.max_y, -resolution);
        Self { transform, width, height, crs }
    }

    /// `(rows, cols)`, the ndarray shape of a band on this grid
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Same footprint sampled with `width` x `height` pixels
    pub fn resized(&self, width: usize, height: usize) -> Self {
        let fx = self.width as f64 / width.max(1) as f64;
        let fy = self.height as f64 / height.max(1) as f64;
        Self {
            transform: self.transform.scaled(fx, fy),
            width,
            height,
            crs: self.crs,
        }
    }

    pub fn same_grid(&self, other: &GridSpec) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.crs == other.crs
            && self.transform.approx_eq(&other.transform)
    }
}

/// Georeferenced grid of physical-unit samples for one band.
///
/// Invalid pixels hold [`NODATA`]. Arrays are owned by the caller; the
/// product cache only ever hands out clones.
#[derive(Debug, Clone, PartialEq)]
pub struct BandArray {
    pub data: Array2<f32>,
    pub grid: GridSpec,
}

impl BandArray {
    pub fn new(data: Array2<f32>, grid: GridSpec) -> ProductResult<Self> {
        if data.dim() != grid.shape() {
            return Err(ProductError::GridMismatch(format!(
                "array shape {:?} does not match grid {}x{}",
                data.dim(),
                grid.height,
                grid.width
            )));
        }
        Ok(Self { data, grid })
    }

    pub fn nodata(&self) -> f32 {
        NODATA
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn crs(&self) -> Option<Crs> {
        self.grid.crs
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.grid.transform
    }

    /// `true` where the pixel carries a value
    pub fn valid_mask(&self) -> Array2<bool> {
        self.data.mapv(|v| !v.is_nan())
    }

    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Writes the nodata sentinel wherever `invalid` is set
    pub fn set_invalid(&mut self, invalid: &Array2<bool>) {
        ndarray::Zip::from(&mut self.data)
            .and(invalid)
            .for_each(|v, &bad| {
                if bad {
                    *v = NODATA;
                }
            });
    }
}

/// Satellite pass direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitDirection {
    Ascending,
    Descending,
}

impl fmt::Display for OrbitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrbitDirection::Ascending => write!(f, "ASCENDING"),
            OrbitDirection::Descending => write!(f, "DESCENDING"),
        }
    }
}

impl FromStr for OrbitDirection {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASCENDING" | "ASC" | "A" => Ok(OrbitDirection::Ascending),
            "DESCENDING" | "DESC" | "D" => Ok(OrbitDirection::Descending),
            other => Err(ProductError::invalid_metadata(
                "orbit_direction",
                format!("unknown pass direction '{}'", other),
            )),
        }
    }
}

/// Mean solar angles of a scene, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunAngles {
    pub azimuth: f64,
    pub zenith: f64,
}

/// Error types for product access
#[derive(Debug, thiserror::Error)]
pub enum ProductError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid product {path}: {reason}")]
    InvalidProduct { path: String, reason: String },

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Band {band} is not produced by {family}")]
    UnsupportedBand { band: BandName, family: String },

    #[error("Unknown band {band} for product {product}")]
    UnknownBand { band: BandName, product: String },

    #[error("Band {band} not found in {path}")]
    BandNotFound { band: BandName, path: String },

    #[error("Invalid metadata field '{field}': {reason}")]
    InvalidMetadata { field: String, reason: String },

    #[error("Band {band} is required to compute {index}")]
    MissingBand { band: BandName, index: String },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Raster error: {0}")]
    Raster(String),
}

impl ProductError {
    pub fn invalid_product(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        ProductError::InvalidProduct {
            path: path.as_ref().display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_metadata(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProductError::InvalidMetadata {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Requested band or mask is outside what the family/operation supports
    pub fn is_invalid_type(&self) -> bool {
        matches!(
            self,
            ProductError::InvalidType(_) | ProductError::UnsupportedBand { .. } | ProductError::UnknownBand { .. }
        )
    }

    /// Wraps low-level I/O failures into `InvalidProduct` for `path`.
    /// Errors that already belong to the product taxonomy are returned unchanged.
    pub fn at_product(self, path: impl AsRef<Path>) -> Self {
        match self {
            ProductError::Io(e) => Self::invalid_product(path, e.to_string()),
            ProductError::XmlParsing(e) | ProductError::Archive(e) | ProductError::Raster(e) => {
                Self::invalid_product(path, e)
            }
            #[cfg(feature = "gdal")]
            ProductError::Gdal(e) => Self::invalid_product(path, e.to_string()),
            other => other,
        }
    }
}

/// Result type for product operations
pub type ProductResult<T> = Result<T, ProductError>;
