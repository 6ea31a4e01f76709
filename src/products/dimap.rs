//! SPOT-6/7 and Pléiades products in DIMAP v2 format.

use chrono::{Datelike, NaiveDateTime};
use ndarray::Array2;
use std::sync::Arc;

use crate::core::bands::{BandDescriptor, BandMap, BandName, Wavelength};
use crate::core::calibrate::{Calibration, OpticalCalibration};
use crate::core::geocode::{project, utm_crs};
use crate::core::masks::{CloudRules, MaskStrategy, VectorLayer, VectorRule};
use crate::core::product::{parse_datetime, Constellation, FamilyKind, ProductContext, SensorFamily, DATETIME_FMT};
use crate::io::raster::ReadOptions;
use crate::io::vector::MaskFeature;
use crate::io::xml::XmlElement;
use crate::types::{BoundingBox, Crs, GeoTransform, GridSpec, OrbitDirection, ProductError, ProductResult, SunAngles};

const DIM_MTD: &str = r"(^|/)DIM_(SPOT[67]|PHR1[AB])_[^/]*\.XML$";
const NAME_DATETIME_FMT: &str = "%Y%m%d%H%M%S";

/// Lost and defective detector pixels. The footprint layer is the ROI mask.
const MASK_LAYERS: &[VectorRule] = &[VectorRule {
    layer: VectorLayer::Defect,
    keep: &[],
}];

/// Earth eccentricity term of the Earth-Sun distance
const ORBIT_ECCENTRICITY: f64 = 0.01672;

/// Abstract band, metadata band id, 1-based raster index, spectral range
type BandRow = (BandName, &'static str, &'static str, f64, f64);

struct DimapSpec {
    pan_gsd: f64,
    ms_gsd: f64,
    pan: BandRow,
    ms: [BandRow; 4],
}

// Multispectral rasters are stored red, green, blue, near-infrared
const SPOT: DimapSpec = DimapSpec {
    pan_gsd: 1.5,
    ms_gsd: 6.0,
    pan: (BandName::Pan, "P", "1", 455.0, 744.0),
    ms: [
        (BandName::Red, "B2", "1", 624.0, 694.0),
        (BandName::Green, "B1", "2", 527.0, 587.0),
        (BandName::Blue, "B0", "3", 454.0, 519.0),
        (BandName::Nir, "B3", "4", 760.0, 900.0),
    ],
};

const PLEIADES: DimapSpec = DimapSpec {
    pan_gsd: 0.5,
    ms_gsd: 2.0,
    pan: (BandName::Pan, "P", "1", 480.0, 830.0),
    ms: [
        (BandName::Red, "B2", "1", 600.0, 720.0),
        (BandName::Green, "B1", "2", 490.0, 610.0),
        (BandName::Blue, "B0", "3", 430.0, 550.0),
        (BandName::Nir, "B3", "4", 750.0, 830.0),
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandCombination {
    /// Panchromatic
    P,
    /// Multispectral
    Ms,
    /// Pansharpened multispectral
    Pms,
}

impl BandCombination {
    fn from_token(token: &str) -> Option<Self> {
        // Bundles and natural-color variants carry a suffix (`PMS-N`)
        match token.split('-').next().unwrap_or_default() {
            "P" => Some(BandCombination::P),
            "MS" => Some(BandCombination::Ms),
            "PMS" => Some(BandCombination::Pms),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            BandCombination::P => "P",
            BandCombination::Ms => "MS",
            BandCombination::Pms => "PMS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimapProductType {
    /// Primary product in sensor geometry
    Sen,
    /// Projected
    Prj,
    /// Orthorectified
    Ort,
}

impl DimapProductType {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "SEN" => Some(DimapProductType::Sen),
            "PRJ" => Some(DimapProductType::Prj),
            "ORT" => Some(DimapProductType::Ort),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            DimapProductType::Sen => "SEN",
            DimapProductType::Prj => "PRJ",
            DimapProductType::Ort => "ORT",
        }
    }
}

fn constellation_of(token: &str) -> Option<Constellation> {
    match token {
        "SPOT6" => Some(Constellation::Spot6),
        "SPOT7" => Some(Constellation::Spot7),
        "PHR1A" | "PHR1B" => Some(Constellation::Pleiades),
        _ => None,
    }
}

fn spec_of(constellation: Constellation) -> &'static DimapSpec {
    match constellation {
        Constellation::Pleiades => &PLEIADES,
        _ => &SPOT,
    }
}

fn band_map(constellation: Constellation, combination: BandCombination) -> BandMap {
    let spec = spec_of(constellation);
    let descriptor = |(name, mtd_id, index, min_nm, max_nm): &BandRow, gsd: f64| {
        let mut desc = BandDescriptor::spectral(*name, mtd_id, index, gsd, Wavelength::Range {
            min_nm: *min_nm,
            max_nm: *max_nm,
        });
        desc.native_name = mtd_id.to_string();
        desc
    };
    match combination {
        BandCombination::P => BandMap::new([descriptor(&spec.pan, spec.pan_gsd)]),
        BandCombination::Ms => BandMap::new(spec.ms.iter().map(|row| descriptor(row, spec.ms_gsd))),
        BandCombination::Pms => BandMap::new(spec.ms.iter().map(|row| descriptor(row, spec.pan_gsd))),
    }
}

/// Earth-Sun distance in astronomical units on day-of-year `doy`
fn earth_sun_distance(doy: u32) -> f64 {
    1.0 - ORBIT_ECCENTRICITY * (0.9856 * (doy as f64 - 4.0)).to_radians().cos()
}

pub struct DimapProduct {
    name: String,
    constellation: Constellation,
    combination: BandCombination,
    product_type: DimapProductType,
    datetime: NaiveDateTime,
    bands: BandMap,
    mtd_member: String,
    sun: Option<SunAngles>,
    projected_crs: Option<Crs>,
}

impl DimapProduct {
    pub fn new(ctx: &ProductContext) -> ProductResult<Self> {
        let mtd_member = ctx.source.find_one(DIM_MTD)?;
        let file_name = mtd_member.rsplit('/').next().unwrap_or(&mtd_member);
        let name = file_name.trim_end_matches(".XML").to_string();

        let tokens: Vec<&str> = name.trim_start_matches("DIM_").split('_').collect();
        let invalid = |what: &str| ProductError::invalid_product(ctx.path(), format!("{} in DIMAP name {}", what, name));
        if tokens.len() < 4 {
            return Err(invalid("too few fields"));
        }
        let constellation = constellation_of(tokens[0]).ok_or_else(|| invalid("unknown satellite"))?;
        let combination = BandCombination::from_token(tokens[1]).ok_or_else(|| invalid("unknown band combination"))?;
        let datetime_token = tokens[2].get(..14).ok_or_else(|| invalid("truncated datetime"))?;
        let datetime = parse_datetime(datetime_token, NAME_DATETIME_FMT, "datetime")?;
        let product_type = DimapProductType::from_token(tokens[3]).ok_or_else(|| invalid("unknown processing level"))?;

        Ok(Self {
            bands: band_map(constellation, combination),
            name,
            constellation,
            combination,
            product_type,
            datetime,
            mtd_member,
            sun: None,
            projected_crs: None,
        })
    }

    pub fn combination(&self) -> BandCombination {
        self.combination
    }

    fn mtd(&self, ctx: &ProductContext) -> ProductResult<Arc<XmlElement>> {
        ctx.read_xml(&self.mtd_member)
    }

    fn read_sun_angles(&self, mtd: &XmlElement) -> ProductResult<SunAngles> {
        // Center values when the product lists several locations
        let located = mtd
            .find(".//Located_Geometric_Values[LOCATION_TYPE='Center']")
            .unwrap_or(mtd);
        let elevation: f64 = located.require(".//SUN_ELEVATION")?;
        let azimuth: f64 = located.require(".//SUN_AZIMUTH")?;
        Ok(SunAngles {
            azimuth,
            zenith: 90.0 - elevation,
        })
    }

    fn read_projected_crs(&self, mtd: &XmlElement) -> ProductResult<Option<Crs>> {
        match mtd.find_text(".//PROJECTED_CRS_CODE") {
            Some(code) => Ok(Some(code.parse()?)),
            None => Ok(None),
        }
    }

    /// `(lon, lat)` corners of the dataset
    fn vertices(&self, mtd: &XmlElement) -> ProductResult<Vec<(f64, f64)>> {
        let vertices = mtd
            .find_all(".//Dataset_Extent/Vertex")
            .into_iter()
            .map(|vertex| Ok((vertex.require::<f64>("LON")?, vertex.require::<f64>("LAT")?)))
            .collect::<ProductResult<Vec<_>>>()?;
        if vertices.len() < 3 {
            return Err(ProductError::invalid_metadata("Dataset_Extent", "fewer than 3 vertices"));
        }
        Ok(vertices)
    }

    /// WGS84 / UTM zone of the dataset center, for products without a map projection
    fn sensor_crs(&self, mtd: &XmlElement) -> ProductResult<Crs> {
        let vertices = self.vertices(mtd)?;
        let n = vertices.len() as f64;
        let lon = vertices.iter().map(|v| v.0).sum::<f64>() / n;
        let lat = vertices.iter().map(|v| v.1).sum::<f64>() / n;
        Ok(utm_crs(lon, lat))
    }

    fn image_path(&self, ctx: &ProductContext) -> ProductResult<String> {
        let images = ctx.source.find(r"(^|/)IMG_[^/]*\.(TIF|JP2)$")?;
        match images.as_slice() {
            [] => Err(ProductError::BandNotFound {
                band: self.default_band(),
                path: ctx.path().display().to_string(),
            }),
            [single] => Ok(ctx.raster_path(single)),
            // Tiled images are mosaicked by opening the metadata file itself
            _ => Ok(ctx.raster_path(&self.mtd_member)),
        }
    }

    fn mask_member(&self, ctx: &ProductContext, code: &str, band: BandName) -> ProductResult<Option<String>> {
        let members = ctx.source.find(&format!(r"(^|/)MASKS/{}_[^/]*_MSK\.GML$", code))?;
        let token = if band == BandName::Pan { "_P_" } else { "_MS_" };
        Ok(members
            .iter()
            .find(|m| m.contains(token))
            .or_else(|| members.first())
            .cloned())
    }
}

impl SensorFamily for DimapProduct {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Dimap
    }

    fn constellation(&self) -> Constellation {
        self.constellation
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
        let spec = spec_of(self.constellation);
        match self.combination {
            BandCombination::Ms => spec.ms_gsd,
            _ => spec.pan_gsd,
        }
    }

    fn default_band(&self) -> BandName {
        match self.combination {
            BandCombination::P => BandName::Pan,
            _ => BandName::Red,
        }
    }

    fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    fn condensed_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.datetime.format(DATETIME_FMT),
            self.constellation,
            self.combination.as_str(),
            self.product_type.as_str()
        )
    }

    fn load_metadata(&mut self, ctx: &ProductContext) -> ProductResult<()> {
        let mtd = self.mtd(ctx)?;
        self.sun = Some(self.read_sun_angles(&mtd)?);
        self.projected_crs = self.read_projected_crs(&mtd)?;
        Ok(())
    }

    fn band_path(&self, ctx: &ProductContext, _desc: &BandDescriptor, _target: &GridSpec) -> ProductResult<String> {
        self.image_path(ctx)
    }

    fn read_band(
        &self,
        ctx: &ProductContext,
        desc: &BandDescriptor,
        path: &str,
        options: &ReadOptions,
    ) -> ProductResult<Array2<f32>> {
        let index = desc
            .index()
            .ok_or_else(|| ProductError::invalid_metadata("band index", format!("no raster index for {}", desc.name)))?;
        ctx.read_raster(path, &options.clone().with_indexes(vec![index]))?.band(1)
    }

    /// `reflectance = (DN / GAIN + BIAS) · π · d² / (E0 · cos(θs))`
    fn calibration(&self, ctx: &ProductContext, desc: &BandDescriptor) -> ProductResult<Calibration> {
        let mtd = self.mtd(ctx)?;
        let id = &desc.native_name;
        let gain: f64 = mtd.require(&format!(".//Band_Radiance[BAND_ID='{}']/GAIN", id))?;
        let bias: f64 = mtd.require(&format!(".//Band_Radiance[BAND_ID='{}']/BIAS", id))?;
        let e0: f64 = mtd.require(&format!(".//Band_Solar_Irradiance[BAND_ID='{}']/VALUE", id))?;
        let zenith = match self.sun {
            Some(sun) => sun.zenith,
            None => self.read_sun_angles(&mtd)?.zenith,
        };
        let d = earth_sun_distance(self.datetime.ordinal());
        let quantification = gain * e0 * zenith.to_radians().cos() / (std::f64::consts::PI * d * d);
        Ok(Calibration::Optical(OpticalCalibration::new(bias * gain, quantification)?))
    }

    fn mask_strategy(&self) -> MaskStrategy {
        MaskStrategy::Vector {
            footprint: VectorLayer::DetectorFootprint,
            layers: MASK_LAYERS,
        }
    }

    fn vector_mask(
        &self,
        ctx: &ProductContext,
        layer: VectorLayer,
        band: BandName,
    ) -> ProductResult<Option<Vec<MaskFeature>>> {
        let code = match layer {
            VectorLayer::DetectorFootprint => "ROI",
            VectorLayer::Defect => "DET",
            VectorLayer::Clouds => "CLD",
            _ => return Ok(None),
        };
        match self.mask_member(ctx, code, band)? {
            Some(member) => {
                let crs = match self.product_type {
                    DimapProductType::Sen => None,
                    _ => self.projected_crs,
                };
                Ok(Some(ctx.read_vector(&member, crs)?))
            }
            None => Ok(None),
        }
    }

    fn cloud_rules(&self) -> CloudRules {
        CloudRules::VectorUncategorized
    }

    fn reference_grid(&self, ctx: &ProductContext) -> ProductResult<GridSpec> {
        let info = ctx.raster_io().info(&self.image_path(ctx)?)?;
        if self.product_type != DimapProductType::Sen {
            if let Some(grid) = info.grid() {
                return Ok(GridSpec {
                    crs: grid.crs.or(self.projected_crs),
                    ..grid
                });
            }
        }
        // Sensor geometry: the image is laid over the extent of its corners
        let extent = self.extent(ctx)?;
        let transform = GeoTransform::new(
            extent.min_x,
            extent.width() / info.width.max(1) as f64,
            extent.max_y,
            -extent.height() / info.height.max(1) as f64,
        );
        Ok(GridSpec::new(transform, info.width, info.height, Some(self.crs(ctx)?)))
    }

    fn crs(&self, ctx: &ProductContext) -> ProductResult<Crs> {
        if self.product_type != DimapProductType::Sen {
            if let Some(crs) = self.projected_crs {
                return Ok(crs);
            }
        }
        self.sensor_crs(&*self.mtd(ctx)?)
    }

    fn extent(&self, ctx: &ProductContext) -> ProductResult<BoundingBox> {
        let crs = self.crs(ctx)?;
        let points = self
            .vertices(&*self.mtd(ctx)?)?
            .into_iter()
            .map(|(lon, lat)| project(crs, lon, lat))
            .collect::<ProductResult<Vec<_>>>()?;
        BoundingBox::from_points(points).ok_or_else(|| ProductError::invalid_metadata("Dataset_Extent", "no vertex"))
    }

    fn footprint(&self, ctx: &ProductContext) -> ProductResult<geo::Polygon<f64>> {
        let crs = self.crs(ctx)?;
        let coords = self
            .vertices(&*self.mtd(ctx)?)?
            .into_iter()
            .map(|(lon, lat)| project(crs, lon, lat).map(|(x, y)| geo::Coord { x, y }))
            .collect::<ProductResult<Vec<_>>>()?;
        Ok(geo::Polygon::new(geo::LineString::from(coords), vec![]))
    }

    fn sun_angles(&self, ctx: &ProductContext) -> ProductResult<SunAngles> {
        match self.sun {
            Some(sun) => Ok(sun),
            None => self.read_sun_angles(&*self.mtd(ctx)?),
        }
    }

    fn cloud_cover(&self, ctx: &ProductContext) -> ProductResult<f64> {
        self.mtd(ctx)?.require(".//CLOUD_COVERAGE")
    }

    fn orbit_direction(&self, _ctx: &ProductContext) -> ProductResult<OrbitDirection> {
        // Both constellations image on the descending pass
        Ok(OrbitDirection::Descending)
    }

    fn quicklook(&self, ctx: &ProductContext) -> ProductResult<Option<String>> {
        Ok(ctx
            .source
            .find(r"(^|/)PREVIEW_[^/]*\.JPG$")?
            .first()
            .map(|member| ctx.raster_path(member)))
    }
}
