//! Vector I/O collaborator and a GML reader for mask layers.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use std::fs;
use std::path::Path;

use crate::io::xml::XmlElement;
use crate::types::{Crs, ProductError, ProductResult};

/// One polygon feature of a mask layer
#[derive(Debug, Clone, PartialEq)]
pub struct MaskFeature {
    /// `gml:id` of the feature
    pub id: String,
    /// Category attribute (`maskType`), when the layer has one
    pub category: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl MaskFeature {
    /// Category equals `token`, or the feature id starts with it
    pub fn matches(&self, token: &str) -> bool {
        self.category.as_deref() == Some(token) || self.id.starts_with(token)
    }
}

pub trait VectorIo: Send + Sync {
    /// Read every polygon feature of `path`, expressed in `target_crs`
    fn read(&self, path: &Path, target_crs: Option<Crs>) -> ProductResult<Vec<MaskFeature>>;
}

/// Pure-Rust reader for the GML mask files shipped in product archives
#[derive(Debug, Default, Clone, Copy)]
pub struct GmlVectorIo;

impl VectorIo for GmlVectorIo {
    fn read(&self, path: &Path, target_crs: Option<Crs>) -> ProductResult<Vec<MaskFeature>> {
        let xml = fs::read_to_string(path)?;
        let (features, crs) = parse_gml(&xml)?;
        if let (Some(from), Some(to)) = (crs, target_crs) {
            if from != to && !features.is_empty() {
                return Err(ProductError::GridMismatch(format!(
                    "{} is in {}, expected {}",
                    path.display(),
                    from,
                    to
                )));
            }
        }
        log::debug!("Read {} features from {}", features.len(), path.display());
        Ok(features)
    }
}

/// Parse a GML document into features and the CRS it declares.
/// A document without any feature (an empty mask) is valid.
pub fn parse_gml(xml: &str) -> ProductResult<(Vec<MaskFeature>, Option<Crs>)> {
    let root = XmlElement::parse(xml)?;

    let crs = root
        .descendants()
        .into_iter()
        .find_map(|e| e.attr("srsName"))
        .map(|s| s.parse::<Crs>())
        .transpose()?;
    let swap_axes = crs.map(|c| c.is_geographic()).unwrap_or(false);

    let mut feature_elements: Vec<&XmlElement> = root.find_all(".//MaskFeature");
    if feature_elements.is_empty() {
        feature_elements = root
            .find_all(".//featureMember")
            .into_iter()
            .filter_map(|m| m.children.first())
            .collect();
    }

    let mut features = Vec::new();
    if feature_elements.is_empty() {
        for (i, polygon) in root.find_all(".//Polygon").into_iter().enumerate() {
            features.push(MaskFeature {
                id: format!("polygon_{}", i),
                category: None,
                geometry: MultiPolygon::new(vec![parse_polygon(polygon, swap_axes)?]),
            });
        }
        return Ok((features, crs));
    }

    for element in feature_elements {
        let polygons = element
            .find_all(".//Polygon")
            .into_iter()
            .map(|p| parse_polygon(p, swap_axes))
            .collect::<ProductResult<Vec<_>>>()?;
        if polygons.is_empty() {
            continue;
        }
        features.push(MaskFeature {
            id: element.attr("id").unwrap_or_default().to_string(),
            category: element.find_text(".//maskType").map(str::to_string),
            geometry: MultiPolygon::new(polygons),
        });
    }
    Ok((features, crs))
}

fn parse_polygon(element: &XmlElement, swap_axes: bool) -> ProductResult<Polygon<f64>> {
    let exterior = element
        .find("exterior/LinearRing")
        .or_else(|| element.find("outerBoundaryIs/LinearRing"))
        .ok_or_else(|| ProductError::XmlParsing("polygon without exterior ring".to_string()))?;
    let interiors = element
        .find_all("interior/LinearRing")
        .into_iter()
        .chain(element.find_all("innerBoundaryIs/LinearRing"))
        .map(|r| parse_ring(r, swap_axes))
        .collect::<ProductResult<Vec<_>>>()?;
    Ok(Polygon::new(parse_ring(exterior, swap_axes)?, interiors))
}

fn parse_ring(ring: &XmlElement, swap_axes: bool) -> ProductResult<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::new();

    if let Some(pos_list) = ring.find("posList") {
        let dim: usize = pos_list
            .attr("srsDimension")
            .and_then(|d| d.parse().ok())
            .unwrap_or(2);
        let values: Vec<f64> = pos_list.parse_list()?;
        if dim < 2 || values.len() % dim != 0 {
            return Err(ProductError::XmlParsing(format!(
                "posList of {} values is not a multiple of dimension {}",
                values.len(),
                dim
            )));
        }
        coords.extend(values.chunks(dim).map(|c| Coord { x: c[0], y: c[1] }));
    } else if let Some(text) = ring.find_text("coordinates") {
        for tuple in text.split_whitespace() {
            let mut parts = tuple.split(',').map(str::parse::<f64>);
            match (parts.next(), parts.next()) {
                (Some(Ok(x)), Some(Ok(y))) => coords.push(Coord { x, y }),
                _ => {
                    return Err(ProductError::XmlParsing(format!("invalid coordinate tuple '{}'", tuple)))
                }
            }
        }
    } else {
        for pos in ring.find_all("pos") {
            let values: Vec<f64> = pos.parse_list()?;
            if values.len() >= 2 {
                coords.push(Coord { x: values[0], y: values[1] });
            }
        }
    }

    if swap_axes {
        coords = coords.into_iter().map(|c| Coord { x: c.y, y: c.x }).collect();
    }
    if coords.len() < 3 {
        return Err(ProductError::XmlParsing(format!("ring with {} points", coords.len())));
    }
    Ok(LineString::from(coords))
}
