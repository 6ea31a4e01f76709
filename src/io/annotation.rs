use quick_xml::de::from_str;
use serde::Deserialize;

use crate::core::geocode::TiePoint;
use crate::io::xml::XmlElement;
use crate::types::{ProductError, ProductResult};

#[derive(Debug, Deserialize)]
struct LutDocument {
    #[serde(rename = "productId", default)]
    product_id: Option<String>,
    offset: f32,
    gains: String,
}

#[derive(Debug, Deserialize)]
struct ProductDocument {
    #[serde(rename = "imageAttributes")]
    image_attributes: ImageAttributes,
}

#[derive(Debug, Deserialize)]
struct ImageAttributes {
    #[serde(rename = "geographicInformation")]
    geographic_information: GeographicInformation,
}

#[derive(Debug, Deserialize)]
struct GeographicInformation {
    #[serde(rename = "geolocationGrid")]
    geolocation_grid: GeolocationGrid,
}

#[derive(Debug, Deserialize)]
struct GeolocationGrid {
    #[serde(rename = "imageTiePoint", default)]
    tie_points: Vec<ImageTiePoint>,
}

#[derive(Debug, Deserialize)]
struct ImageTiePoint {
    #[serde(rename = "imageCoordinate")]
    image: ImageCoordinate,
    #[serde(rename = "geodeticCoordinate")]
    geodetic: GeodeticCoordinate,
}

#[derive(Debug, Deserialize)]
struct ImageCoordinate {
    line: f64,
    pixel: f64,
}

#[derive(Debug, Deserialize)]
struct GeodeticCoordinate {
    latitude: f64,
    longitude: f64,
}

/// RADARSAT-2 calibration look-up table (`lutSigma.xml`, `lutBeta.xml`, `lutGamma.xml`)
#[derive(Debug, Clone)]
pub struct CalibrationLut {
    pub product_id: Option<String>,
    pub offset: f32,
    /// One gain per range sample
    pub gains: Vec<f32>,
}

impl CalibrationLut {
    /// Gain applying to column `col` of an image `width` samples wide.
    /// Tables sampled differently from the image are indexed proportionally.
    pub fn gain_at(&self, col: usize, width: usize) -> f32 {
        let n = self.gains.len();
        if n == width || width == 0 {
            return self.gains[col.min(n - 1)];
        }
        let idx = (col as f64 * n as f64 / width as f64).floor() as usize;
        self.gains[idx.min(n - 1)]
    }
}

/// Parser for SAR annotation documents
pub struct AnnotationParser;

impl AnnotationParser {
    /// Parse a calibration LUT.
    ///
    /// A document that is not well-formed XML fails with `XmlParsing`
    /// (the file is corrupted). Well-formed XML with missing or
    /// mistyped fields fails with `InvalidMetadata`.
    pub fn parse_lut(xml_content: &str) -> ProductResult<CalibrationLut> {
        XmlElement::parse(xml_content)?;

        let document = from_str::<LutDocument>(xml_content)
            .map_err(|e| ProductError::invalid_metadata("lut", format!("Failed to parse calibration LUT: {}", e)))?;
        let gains = document
            .gains
            .split_whitespace()
            .map(|g| {
                g.parse::<f32>()
                    .map_err(|_| ProductError::invalid_metadata("gains", format!("cannot parse gain '{}'", g)))
            })
            .collect::<ProductResult<Vec<f32>>>()?;
        let lut = CalibrationLut {
            product_id: document.product_id,
            offset: document.offset,
            gains,
        };

        if lut.gains.is_empty() {
            return Err(ProductError::invalid_metadata("gains", "calibration LUT has no gains"));
        }
        if let Some(bad) = lut.gains.iter().find(|g| !g.is_finite() || **g <= 0.0) {
            return Err(ProductError::invalid_metadata("gains", format!("non-positive gain {}", bad)));
        }
        log::debug!("Parsed calibration LUT with {} gains", lut.gains.len());
        Ok(lut)
    }

    /// Geolocation grid of a RADARSAT-2 `product.xml`
    pub fn parse_tie_points(xml_content: &str) -> ProductResult<Vec<TiePoint>> {
        XmlElement::parse(xml_content)?;

        let document = from_str::<ProductDocument>(xml_content).map_err(|e| {
            ProductError::invalid_metadata("geolocationGrid", format!("Failed to parse geolocation grid: {}", e))
        })?;
        let points: Vec<TiePoint> = document
            .image_attributes
            .geographic_information
            .geolocation_grid
            .tie_points
            .into_iter()
            .map(|p| TiePoint {
                line: p.image.line,
                pixel: p.image.pixel,
                lat: p.geodetic.latitude,
                lon: p.geodetic.longitude,
            })
            .collect();
        if points.is_empty() {
            return Err(ProductError::invalid_metadata("geolocationGrid", "no image tie point"));
        }
        log::debug!("Parsed {} geolocation tie points", points.len());
        Ok(points)
    }
}
