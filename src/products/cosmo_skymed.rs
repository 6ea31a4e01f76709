//! COSMO-SkyMed first generation products.
//!
//! Images are HDF5 datasets, one subgroup per polarization. Metadata
//! used here comes from the XML companion of the HDF5 file. Geocoded
//! products (GEC, GTC) carrying a CRS are read directly; the others are
//! located from their corner coordinates and orthorectified like
//! RADARSAT-2.

use chrono::NaiveDateTime;
use geo::Polygon;
use std::fmt;
use std::sync::Arc;

use crate::core::bands::{BandDescriptor, BandMap, BandName};
use crate::core::cache::Memo;
use crate::core::calibrate::{Calibration, CalibrationType, SarCalibration};
use crate::core::geocode::{Binning, TiePoint, TiePointGrid};
use crate::core::masks::{CloudRules, MaskStrategy};
use crate::core::product::{parse_datetime, Constellation, FamilyKind, ProductContext, SensorFamily, DATETIME_FMT};
use crate::io::raster::{RasterInfo, ReadOptions};
use crate::io::xml::XmlElement;
use crate::products::sar::{amplitude, cached_file_name, calibrate_sar, not_optical, polarization, preprocess_band, sar_band_map};
use crate::types::{BoundingBox, Crs, GridSpec, OrbitDirection, ProductError, ProductResult, SunAngles};

const H5_MEMBER: &str = r"(^|/)CSKS[1-4]_[^/]*\.h5$";
const XML_MEMBER: &str = r"(^|/)CSKS[1-4]_[^/]*(\.h5)?\.xml$";
const NAME_DATETIME_FMT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CskMode {
    /// Himage
    Himage,
    PingPong,
    WideRegion,
    HugeRegion,
    Spotlight2,
}

impl CskMode {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "HI" => Some(CskMode::Himage),
            "PP" => Some(CskMode::PingPong),
            "WR" => Some(CskMode::WideRegion),
            "HR" => Some(CskMode::HugeRegion),
            "S2" => Some(CskMode::Spotlight2),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CskMode::Himage => "HI",
            CskMode::PingPong => "PP",
            CskMode::WideRegion => "WR",
            CskMode::HugeRegion => "HR",
            CskMode::Spotlight2 => "S2",
        }
    }

    /// Nominal ground resolution in metres
    pub fn resolution(&self) -> f64 {
        match self {
            CskMode::Himage => 3.0,
            CskMode::PingPong => 15.0,
            CskMode::WideRegion => 30.0,
            CskMode::HugeRegion => 100.0,
            CskMode::Spotlight2 => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CskProductType {
    Raw,
    /// Single-look complex slant
    Scs,
    /// Detected ground multi-look
    Dgm,
    /// Geocoded ellipsoid corrected
    Gec,
    /// Geocoded terrain corrected
    Gtc,
}

impl CskProductType {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "RAW" => Some(CskProductType::Raw),
            "SCS" => Some(CskProductType::Scs),
            "DGM" => Some(CskProductType::Dgm),
            "GEC" => Some(CskProductType::Gec),
            "GTC" => Some(CskProductType::Gtc),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CskProductType::Raw => "RAW",
            CskProductType::Scs => "SCS",
            CskProductType::Dgm => "DGM",
            CskProductType::Gec => "GEC",
            CskProductType::Gtc => "GTC",
        }
    }

    fn is_geocoded(&self) -> bool {
        matches!(self, CskProductType::Gec | CskProductType::Gtc)
    }

    /// Image dataset inside each polarization subgroup
    fn dataset(&self) -> &'static str {
        match self {
            CskProductType::Scs => "SBI",
            _ => "MBI",
        }
    }
}

impl fmt::Display for CskProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bands of a polarization code, co-polarized first
fn polarizations(code: &str) -> Vec<BandName> {
    match code {
        "CO" => vec![BandName::Hh, BandName::Vv],
        "CH" => vec![BandName::Hh, BandName::Hv],
        "CV" => vec![BandName::Vv, BandName::Vh],
        other => polarization(other).into_iter().collect(),
    }
}

/// `(lat, lon)` of a `"lat lon [height]"` corner field
fn corner(xml: &XmlElement, field: &str) -> ProductResult<(f64, f64)> {
    let values: Vec<f64> = xml
        .find(&format!(".//{}", field))
        .ok_or_else(|| ProductError::invalid_metadata(field, "required field is missing"))?
        .parse_list()?;
    match values.as_slice() {
        [lat, lon, ..] => Ok((*lat, *lon)),
        _ => Err(ProductError::invalid_metadata(field, "expected latitude and longitude")),
    }
}

pub struct CosmoSkymedProduct {
    name: String,
    mode: CskMode,
    product_type: CskProductType,
    datetime: NaiveDateTime,
    bands: BandMap,
    h5_member: String,
    georeferenced: bool,
    orbit: Option<OrbitDirection>,
    image_info: Memo<(), RasterInfo>,
    geolocation: Memo<(), Arc<TiePointGrid>>,
}

impl CosmoSkymedProduct {
    pub fn new(ctx: &ProductContext) -> ProductResult<Self> {
        let h5_member = ctx.source.find_one(H5_MEMBER)?;
        let file_name = h5_member.rsplit('/').next().unwrap_or(&h5_member);
        let name = file_name.trim_end_matches(".h5").to_string();

        let tokens: Vec<&str> = name.split('_').collect();
        let invalid = |what: &str| ProductError::invalid_product(ctx.path(), format!("{} in COSMO-SkyMed name {}", what, name));
        if tokens.len() < 9 {
            return Err(invalid("too few fields"));
        }
        let product_type = CskProductType::from_token(tokens[1]).ok_or_else(|| invalid("unknown product type"))?;
        if product_type == CskProductType::Raw {
            return Err(ProductError::InvalidType(format!("{}: RAW products are not focused images", name)));
        }
        let mode = CskMode::from_token(tokens[3]).ok_or_else(|| invalid("unknown imaging mode"))?;
        let bands = polarizations(tokens[5]);
        if bands.is_empty() {
            return Err(invalid("unknown polarization"));
        }
        let datetime = parse_datetime(tokens[8], NAME_DATETIME_FMT, "datetime")?;

        Ok(Self {
            bands: sar_band_map(&bands, mode.resolution()),
            name,
            mode,
            product_type,
            datetime,
            h5_member,
            georeferenced: false,
            orbit: None,
            image_info: Memo::new(),
            geolocation: Memo::new(),
        })
    }

    pub fn mode(&self) -> CskMode {
        self.mode
    }

    fn metadata(&self, ctx: &ProductContext) -> ProductResult<Arc<XmlElement>> {
        ctx.find_xml(XML_MEMBER)
    }

    /// HDF5 subdataset of a polarization: `S01` for the first, `S02` for the second
    fn image_path(&self, ctx: &ProductContext, band: BandName) -> ProductResult<String> {
        let position = self
            .bands
            .names()
            .position(|b| b == band)
            .ok_or_else(|| ProductError::UnknownBand {
                band,
                product: self.name.clone(),
            })?;
        Ok(format!(
            "HDF5:\"{}\"://S{:02}/{}",
            ctx.raster_path(&self.h5_member),
            position + 1,
            self.product_type.dataset()
        ))
    }

    fn image_info(&self, ctx: &ProductContext) -> ProductResult<RasterInfo> {
        self.image_info.get_or_try_insert_with((), || {
            ctx.raster_io().info(&self.image_path(ctx, self.default_band())?)
        })
    }

    /// 2x2 geolocation grid from the image corners
    fn geolocation(&self, ctx: &ProductContext) -> ProductResult<Arc<TiePointGrid>> {
        self.geolocation.get_or_try_insert_with((), || {
            let xml = self.metadata(ctx)?;
            let info = self.image_info(ctx)?;
            let last_line = info.height.saturating_sub(1) as f64;
            let last_pixel = info.width.saturating_sub(1) as f64;
            let corners = [
                ("GeoCoordTopLeft", 0.0, 0.0),
                ("GeoCoordTopRight", 0.0, last_pixel),
                ("GeoCoordBottomLeft", last_line, 0.0),
                ("GeoCoordBottomRight", last_line, last_pixel),
            ];
            let points = corners
                .iter()
                .map(|(field, line, pixel)| {
                    let (lat, lon) = corner(&xml, field)?;
                    Ok(TiePoint {
                        line: *line,
                        pixel: *pixel,
                        lat,
                        lon,
                    })
                })
                .collect::<ProductResult<Vec<_>>>()?;
            Ok(Arc::new(TiePointGrid::from_points(&points)?))
        })
    }

    /// `(DN / F)² / K` from the rescaling factor and calibration constant
    fn sar_calibration(&self, ctx: &ProductContext) -> ProductResult<Calibration> {
        let constants = self.metadata(ctx).and_then(|xml| {
            Ok((
                xml.require::<f64>(".//Rescaling_Factor")?,
                xml.require::<f64>(".//Calibration_Constant")?,
            ))
        });
        match constants {
            Ok((rescaling_factor, calibration_constant)) => Ok(Calibration::Sar(SarCalibration::Constant {
                rescaling_factor,
                calibration_constant,
                kind: CalibrationType::Sigma0,
            })),
            Err(e) if ctx.config.strict => Err(e),
            Err(e) => {
                log::warn!(
                    "Calibration constants of {} unavailable ({}): bands stay uncalibrated intensities, \
                     backscatter comparisons with other products will be unreliable",
                    self.name,
                    e
                );
                Ok(Calibration::Sar(SarCalibration::Uncalibrated))
            }
        }
    }
}

impl SensorFamily for CosmoSkymedProduct {
    fn kind(&self) -> FamilyKind {
        FamilyKind::CosmoSkymed
    }

    fn constellation(&self) -> Constellation {
        Constellation::CosmoSkymed
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn product_type(&self) -> &str {
        self.product_type.as_str()
    }

    fn band_map(&self) -> &BandMap {
        &self.bands
    }

    fn default_resolution(&self) -> f64 {
        self.mode.resolution()
    }

    fn default_band(&self) -> BandName {
        self.bands.names().next().unwrap_or(BandName::Hh)
    }

    fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    fn condensed_name(&self) -> String {
        format!(
            "{}_CSK_{}_{}",
            self.datetime.format(DATETIME_FMT),
            self.mode.code(),
            self.product_type
        )
    }

    fn load_metadata(&mut self, ctx: &ProductContext) -> ProductResult<()> {
        if self.product_type.is_geocoded() {
            let info = self.image_info(ctx)?;
            self.georeferenced = info.crs.is_some() && info.transform.is_some();
        }
        self.orbit = Some(self.metadata(ctx)?.require(".//Orbit_Direction")?);
        Ok(())
    }

    fn band_path(&self, ctx: &ProductContext, desc: &BandDescriptor, target: &GridSpec) -> ProductResult<String> {
        let image = self.image_path(ctx, desc.name)?;
        if self.georeferenced {
            return Ok(image);
        }
        let file_name = cached_file_name(&self.condensed_name(), &desc.native_name, target);
        preprocess_band(ctx, &file_name, target, Binning::Average, || {
            let raster = ctx.read_raster(&image, &ReadOptions::native())?;
            let calibration = self.sar_calibration(ctx)?;
            let sigma0 = calibrate_sar(&amplitude(&raster)?, desc.name, &calibration)?;
            Ok((sigma0, (*self.geolocation(ctx)?).clone()))
        })
    }

    fn calibration(&self, ctx: &ProductContext, _desc: &BandDescriptor) -> ProductResult<Calibration> {
        if self.georeferenced {
            self.sar_calibration(ctx)
        } else {
            Ok(Calibration::Identity)
        }
    }

    fn mask_strategy(&self) -> MaskStrategy {
        if self.georeferenced {
            MaskStrategy::RawZero
        } else {
            MaskStrategy::NodataOnly
        }
    }

    fn cloud_rules(&self) -> CloudRules {
        CloudRules::Unsupported
    }

    fn reference_grid(&self, ctx: &ProductContext) -> ProductResult<GridSpec> {
        if self.georeferenced {
            if let Some(grid) = self.image_info(ctx)?.grid() {
                return Ok(grid);
            }
        }
        let tie_points = self.geolocation(ctx)?;
        tie_points.target_grid(tie_points.crs(), self.default_resolution())
    }

    fn crs(&self, ctx: &ProductContext) -> ProductResult<Crs> {
        if self.georeferenced {
            if let Some(crs) = self.image_info(ctx)?.crs {
                return Ok(crs);
            }
        }
        Ok(self.geolocation(ctx)?.crs())
    }

    fn extent(&self, ctx: &ProductContext) -> ProductResult<BoundingBox> {
        if self.georeferenced {
            return Ok(self.reference_grid(ctx)?.bounds());
        }
        let tie_points = self.geolocation(ctx)?;
        tie_points.extent(tie_points.crs())
    }

    fn footprint(&self, ctx: &ProductContext) -> ProductResult<Polygon<f64>> {
        let crs = self.crs(ctx)?;
        self.geolocation(ctx)?.footprint(crs)
    }

    fn sun_angles(&self, _ctx: &ProductContext) -> ProductResult<SunAngles> {
        Err(not_optical(self.kind(), "sun angles"))
    }

    fn cloud_cover(&self, _ctx: &ProductContext) -> ProductResult<f64> {
        Err(not_optical(self.kind(), "cloud cover"))
    }

    fn orbit_direction(&self, ctx: &ProductContext) -> ProductResult<OrbitDirection> {
        match self.orbit {
            Some(orbit) => Ok(orbit),
            None => self.metadata(ctx)?.require(".//Orbit_Direction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polarization_codes() {
        assert_eq!(polarizations("CO"), vec![BandName::Hh, BandName::Vv]);
        assert_eq!(polarizations("CV"), vec![BandName::Vv, BandName::Vh]);
        assert_eq!(polarizations("HV"), vec![BandName::Hv]);
        assert!(polarizations("XX").is_empty());
    }

    #[test]
    fn test_modes_and_types() {
        assert_eq!(CskMode::from_token("HI"), Some(CskMode::Himage));
        assert_eq!(CskMode::Spotlight2.resolution(), 1.0);
        assert_eq!(CskMode::HugeRegion.code(), "HR");
        assert_eq!(CskProductType::from_token("GTC"), Some(CskProductType::Gtc));
        assert!(CskProductType::Gec.is_geocoded());
        assert!(!CskProductType::Dgm.is_geocoded());
        assert_eq!(CskProductType::Scs.dataset(), "SBI");
        assert_eq!(CskProductType::Dgm.dataset(), "MBI");
    }

    #[test]
    fn test_corner_parsing() {
        let xml = XmlElement::parse(
            r#"<DeliveryNote><ProductInfo>
                <GeoCoordTopLeft>41.95 12.40 0.0</GeoCoordTopLeft>
                <GeoCoordBottomRight>bad</GeoCoordBottomRight>
                <GeoCoordTopRight>42.0</GeoCoordTopRight>
            </ProductInfo></DeliveryNote>"#,
        )
        .unwrap();
        assert_eq!(corner(&xml, "GeoCoordTopLeft").unwrap(), (41.95, 12.40));
        assert!(corner(&xml, "GeoCoordBottomRight").is_err());
        assert!(corner(&xml, "GeoCoordTopRight").is_err());
        assert!(corner(&xml, "GeoCoordBottomLeft").is_err());
    }
}
