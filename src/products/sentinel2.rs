//! Sentinel-2 MSI products (L1C, L2A and the early L2Ap).
//!
//! The processing baseline in the product name selects, once, how invalid
//! pixels and clouds are encoded: GML polygons before 4.0, JP2 rasters
//! from 4.0 on.

use chrono::NaiveDateTime;
use geo::{ConvexHull, MultiPolygon, Polygon};
use std::sync::Arc;

use crate::core::bands::{BandDescriptor, BandMap, BandName, Wavelength};
use crate::core::calibrate::{generation_default, Calibration, GenerationDefault, OpticalCalibration};
use crate::core::masks::{CloudRules, MaskStrategy, QualityFlags, RasterLayer, RasterRules, VectorLayer, VectorRule};
use crate::core::product::{
    parse_datetime, Constellation, FamilyKind, ProductContext, SensorFamily, DATETIME_FMT,
};
use crate::core::rasterize::valid_area_hull;
use crate::io::raster::{PixelRequest, RasterData, ReadOptions, Resampling};
use crate::io::vector::MaskFeature;
use crate::io::xml::XmlElement;
use crate::types::{Crs, GeoTransform, GridSpec, OrbitDirection, ProductError, ProductResult, SunAngles};

/// Baseline from which masks are JP2 rasters and reflectances carry an offset
const RASTER_MASK_BASELINE: f64 = 4.0;
/// Baseline before which L2A bands are not georeferenced
const GEOREFERENCED_BASELINE: f64 = 2.07;

const GENERATION_DEFAULTS: [GenerationDefault; 2] = [
    GenerationDefault { min_baseline: 0.0, offset: 0.0, quantification: 10000.0 },
    GenerationDefault { min_baseline: RASTER_MASK_BASELINE, offset: -1000.0, quantification: 10000.0 },
];

const VECTOR_LAYERS: &[VectorRule] = &[
    VectorRule { layer: VectorLayer::Nodata, keep: &["QT_NODATA_PIXELS"] },
    VectorRule { layer: VectorLayer::Defect, keep: &[] },
    VectorRule { layer: VectorLayer::Saturation, keep: &[] },
    VectorRule { layer: VectorLayer::TechnicalQuality, keep: &["MSI_LOST", "MSI_DEG"] },
];

// Lost, degraded, defective, nodata, saturated
const QUALITY_PLANES: [usize; 5] = [3, 4, 5, 6, 8];

const DATATAKE_MTD: &str = r"(^|/)MTD_MSIL(1C|2A)\.xml$";
const GRANULE_MTD: &str = r"GRANULE/[^/]+/[^/]+\.xml$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S2ProductType {
    L1C,
    L2A,
    /// L2A processed before baseline 2.07, bands lack georeferencing
    L2Ap,
}

impl S2ProductType {
    fn as_str(&self) -> &'static str {
        match self {
            S2ProductType::L1C => "L1C",
            S2ProductType::L2A => "L2A",
            S2ProductType::L2Ap => "L2Ap",
        }
    }

    fn is_l2a(&self) -> bool {
        !matches!(self, S2ProductType::L1C)
    }
}

// (band, native id, GSD, center, FWHM, L2A resolution folders)
const BAND_TABLE: [(BandName, &str, f64, f64, f64, &[&str]); 13] = [
    (BandName::CoastalAerosol, "01", 60.0, 442.0, 21.0, &["R60m"]),
    (BandName::Blue, "02", 10.0, 492.0, 66.0, &["R10m", "R20m", "R60m"]),
    (BandName::Green, "03", 10.0, 560.0, 36.0, &["R10m", "R20m", "R60m"]),
    (BandName::Red, "04", 10.0, 665.0, 31.0, &["R10m", "R20m", "R60m"]),
    (BandName::Vre1, "05", 20.0, 704.0, 15.0, &["R20m", "R60m"]),
    (BandName::Vre2, "06", 20.0, 740.0, 15.0, &["R20m", "R60m"]),
    (BandName::Vre3, "07", 20.0, 781.0, 20.0, &["R20m", "R60m"]),
    (BandName::Nir, "08", 10.0, 833.0, 106.0, &["R10m"]),
    (BandName::NarrowNir, "8A", 20.0, 864.0, 21.0, &["R20m", "R60m"]),
    (BandName::WaterVapour, "09", 60.0, 944.0, 20.0, &["R60m"]),
    (BandName::SwirCirrus, "10", 60.0, 1380.0, 30.0, &[]),
    (BandName::Swir1, "11", 20.0, 1612.0, 92.0, &["R20m", "R60m"]),
    (BandName::Swir2, "12", 20.0, 2190.0, 180.0, &["R20m", "R60m"]),
];

/// 0-based physical band index, as keyed in the datatake metadata
fn physical_index(id: &str) -> Option<usize> {
    match id {
        "8A" => Some(8),
        "09" | "10" | "11" | "12" => id.parse().ok(),
        _ => id.parse::<usize>().ok().map(|i| i - 1),
    }
}

fn band_map(product_type: S2ProductType) -> BandMap {
    BandMap::new(
        BAND_TABLE
            .iter()
            .filter(|(name, ..)| !(product_type.is_l2a() && *name == BandName::SwirCirrus))
            .map(|(name, id, gsd, center, fwhm, _)| {
                BandDescriptor::spectral(
                    *name,
                    &format!("B{}", id),
                    id,
                    *gsd,
                    Wavelength::Center { center_nm: *center, fwhm_nm: *fwhm },
                )
            }),
    )
}

fn resolution_folders(id: &str) -> &'static [&'static str] {
    BAND_TABLE
        .iter()
        .find(|(_, band_id, ..)| *band_id == id)
        .map(|(.., folders)| *folders)
        .unwrap_or(&[])
}

/// Fields of a Sentinel-2 product name
#[derive(Debug, Clone, PartialEq)]
pub struct S2Name {
    pub name: String,
    pub product_type: S2ProductType,
    pub datatake: NaiveDateTime,
    pub baseline: f64,
    pub tile: String,
    /// `HHMMSS` of the generation time
    pub generation_time: String,
}

impl S2Name {
    /// `S2x_MSIL1C_<datatake>_N<baseline>_R<orbit>_T<tile>_<generation>`
    pub fn parse(name: &str) -> ProductResult<Self> {
        let tokens: Vec<&str> = name.split('_').filter(|t| !t.is_empty()).collect();
        if tokens.len() < 7 {
            return Err(ProductError::invalid_product(name, "not a Sentinel-2 product name"));
        }
        let product_type = match tokens[1] {
            "MSIL1C" => S2ProductType::L1C,
            "MSIL2A" => S2ProductType::L2A,
            "MSIL2Ap" => S2ProductType::L2Ap,
            other => {
                return Err(ProductError::invalid_product(
                    name,
                    format!("unknown Sentinel-2 product type {}", other),
                ))
            }
        };
        let baseline = tokens[3]
            .strip_prefix('N')
            .and_then(|b| b.parse::<f64>().ok())
            .map(|b| b / 100.0)
            .ok_or_else(|| ProductError::invalid_product(name, format!("invalid processing baseline {}", tokens[3])))?;
        let datatake = parse_datetime(tokens[2], DATETIME_FMT, "datatake")?;
        let generation = tokens[tokens.len() - 1];
        let generation_time = generation
            .split_once('T')
            .map(|(_, time)| time.chars().take(6).collect::<String>())
            .ok_or_else(|| ProductError::invalid_product(name, format!("invalid generation time {}", generation)))?;

        // Early L2A products are named MSIL2A too
        let product_type = if product_type == S2ProductType::L2A && baseline < GEOREFERENCED_BASELINE {
            S2ProductType::L2Ap
        } else {
            product_type
        };

        Ok(Self {
            name: name.to_string(),
            product_type,
            datatake,
            baseline,
            tile: tokens[tokens.len() - 2].to_string(),
            generation_time,
        })
    }
}

pub struct Sentinel2Product {
    meta: S2Name,
    bands: BandMap,
    mask_strategy: MaskStrategy,
    cloud_rules: CloudRules,
    datatake_mtd: Option<Arc<XmlElement>>,
    granule_mtd: Option<Arc<XmlElement>>,
}

impl Sentinel2Product {
    pub fn new(ctx: &ProductContext) -> ProductResult<Self> {
        let meta = match S2Name::parse(&ctx.name) {
            Ok(meta) => meta,
            Err(_) => {
                let real_name = recover_name(ctx)?;
                log::info!("{} was renamed, real name is {}", ctx.name, real_name);
                S2Name::parse(&real_name)?
            }
        };

        let (mask_strategy, cloud_rules) = if meta.baseline < RASTER_MASK_BASELINE {
            (
                MaskStrategy::Vector {
                    footprint: VectorLayer::DetectorFootprint,
                    layers: VECTOR_LAYERS,
                },
                CloudRules::Vector { opaque: "OPAQUE", cirrus: "CIRRUS" },
            )
        } else {
            (
                MaskStrategy::Raster(RasterRules {
                    footprint_outside: Some(0.0),
                    quality: Some(QualityFlags::Planes(QUALITY_PLANES.to_vec())),
                }),
                CloudRules::RasterPlanes { opaque: 1, cirrus: 2 },
            )
        };
        log::debug!(
            "{}: baseline {:.2}, {} masks",
            meta.name,
            meta.baseline,
            if meta.baseline < RASTER_MASK_BASELINE { "vector" } else { "raster" }
        );

        Ok(Self {
            bands: band_map(meta.product_type),
            meta,
            mask_strategy,
            cloud_rules,
            datatake_mtd: None,
            granule_mtd: None,
        })
    }

    pub fn baseline(&self) -> f64 {
        self.meta.baseline
    }

    fn s2_type(&self) -> S2ProductType {
        self.meta.product_type
    }

    fn unavailable(&self, ctx: &ProductContext, what: &str) -> ProductError {
        ProductError::invalid_product(ctx.path(), format!("{} metadata is unavailable", what))
    }

    fn datatake(&self, ctx: &ProductContext) -> ProductResult<&XmlElement> {
        self.datatake_mtd
            .as_deref()
            .ok_or_else(|| self.unavailable(ctx, "datatake"))
    }

    fn granule(&self, ctx: &ProductContext) -> ProductResult<&XmlElement> {
        self.granule_mtd.as_deref().ok_or_else(|| self.unavailable(ctx, "granule"))
    }

    fn tile_crs(&self) -> Option<Crs> {
        self.granule_mtd
            .as_ref()
            .and_then(|mtd| mtd.find_text(".//HORIZONTAL_CS_CODE"))
            .and_then(|code| code.parse().ok())
    }

    /// CRS from the tile id: `T31UDQ` is zone 31, latitude band U (north)
    fn crs_from_tile(&self) -> ProductResult<Crs> {
        let tile = self.meta.tile.trim_start_matches('T');
        let zone: u32 = tile
            .get(0..2)
            .and_then(|z| z.parse().ok())
            .ok_or_else(|| ProductError::invalid_product(&self.meta.name, format!("invalid tile {}", tile)))?;
        let north = tile.chars().nth(2).map(|band| band >= 'N').unwrap_or(true);
        Ok(Crs::from_epsg(if north { 32600 + zone } else { 32700 + zone }))
    }

    /// Band member for reads at `resolution`
    fn band_member(&self, ctx: &ProductContext, desc: &BandDescriptor, resolution: f64) -> ProductResult<String> {
        let folder = if self.s2_type().is_l2a() {
            let folders = resolution_folders(&desc.id);
            let wanted = format!("R{}m", resolution.round() as u32);
            if resolution.fract() == 0.0 && folders.contains(&wanted.as_str()) {
                Some(wanted)
            } else {
                folders.first().map(|f| f.to_string())
            }
        } else {
            None
        };
        let pattern = match &folder {
            Some(folder) => format!(r"IMG_DATA/{}/[^/]*_B{}[^/]*\.jp2$", folder, desc.id),
            None => format!(r"IMG_DATA/[^/]*_B{}[^/]*\.jp2$", desc.id),
        };
        ctx.source
            .find(&pattern)?
            .into_iter()
            .next()
            .ok_or_else(|| ProductError::BandNotFound {
                band: desc.name,
                path: ctx.path().display().to_string(),
            })
    }

    /// Transform of a non-georeferenced L2Ap band from the granule metadata
    fn l2ap_grid(&self, ctx: &ProductContext, resolution: u32) -> ProductResult<GridSpec> {
        let mtd = self.granule(ctx)?;
        let width: usize = mtd.require(&format!(".//Size[@resolution='{}']/NCOLS", resolution))?;
        let height: usize = mtd.require(&format!(".//Size[@resolution='{}']/NROWS", resolution))?;
        let ulx: f64 = mtd.require(&format!(".//Geoposition[@resolution='{}']/ULX", resolution))?;
        let uly: f64 = mtd.require(&format!(".//Geoposition[@resolution='{}']/ULY", resolution))?;
        let crs = match self.tile_crs() {
            Some(crs) => crs,
            None => self.crs_from_tile()?,
        };
        let res = resolution as f64;
        Ok(GridSpec::new(GeoTransform::new(ulx, res, uly, -res), width, height, Some(crs)))
    }

    fn mask_member(&self, ctx: &ProductContext, code: &str, band_id: &str, extension: &str) -> ProductResult<Option<String>> {
        let pattern = format!(
            r"GRANULE/[^/]+/QI_DATA/MSK_{}_B{}\.{}$",
            code, band_id, extension
        );
        Ok(ctx.source.find(&pattern)?.into_iter().next())
    }

    fn mask_band_id(&self, band: BandName) -> ProductResult<String> {
        if band.is_cloud() {
            return Ok("00".to_string());
        }
        self.bands
            .get(band)
            .map(|d| d.id.clone())
            .ok_or_else(|| ProductError::UnknownBand {
                band,
                product: self.meta.name.clone(),
            })
    }
}

/// Real name of a renamed product, from the datatake metadata or `tileInfo.json`
fn recover_name(ctx: &ProductContext) -> ProductResult<String> {
    if let Ok(mtd) = ctx.find_xml(DATATAKE_MTD) {
        if let Some(uri) = mtd
            .find_text(".//PRODUCT_URI")
            .or_else(|| mtd.find_text(".//PRODUCT_URI_2A"))
        {
            return Ok(uri.trim_end_matches(".SAFE").to_string());
        }
    }
    if let Ok(member) = ctx.source.find_one(r"(^|/)tileInfo\.json$") {
        let content = ctx.source.read_to_string(&member)?;
        let info: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| ProductError::invalid_metadata("tileInfo.json", e.to_string()))?;
        if let Some(name) = info.get("productName").and_then(|v| v.as_str()) {
            return Ok(name.to_string());
        }
    }
    Err(ProductError::invalid_product(
        ctx.path(),
        "not a Sentinel-2 name and no PRODUCT_URI or tileInfo.json to recover it",
    ))
}

impl SensorFamily for Sentinel2Product {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Sentinel2
    }

    fn constellation(&self) -> Constellation {
        Constellation::S2
    }

    fn name(&self) -> &str {
        &self.meta.name
    }

    fn product_type(&self) -> &str {
        self.s2_type().as_str()
    }

    fn band_map(&self) -> &BandMap {
        &self.bands
    }

    fn default_resolution(&self) -> f64 {
        10.0
    }

    fn default_band(&self) -> BandName {
        BandName::Red
    }

    /// Datatake sensing time from the name, not the per-granule sensing time
    fn datetime(&self) -> NaiveDateTime {
        self.meta.datatake
    }

    fn condensed_name(&self) -> String {
        format!(
            "{}_S2_{}_{}_{}",
            self.meta.datatake.format(DATETIME_FMT),
            self.meta.tile,
            self.product_type(),
            self.meta.generation_time
        )
    }

    fn load_metadata(&mut self, ctx: &ProductContext) -> ProductResult<()> {
        let datatake = ctx.find_xml(DATATAKE_MTD);
        let granule = ctx.find_xml(GRANULE_MTD);
        self.datatake_mtd = datatake.as_ref().ok().cloned();
        self.granule_mtd = granule.as_ref().ok().cloned();
        datatake?;
        granule?;
        Ok(())
    }

    fn band_path(&self, ctx: &ProductContext, desc: &BandDescriptor, target: &GridSpec) -> ProductResult<String> {
        let member = self.band_member(ctx, desc, target.transform.resolution())?;
        Ok(ctx.raster_path(&member))
    }

    fn calibration(&self, ctx: &ProductContext, desc: &BandDescriptor) -> ProductResult<Calibration> {
        let mtd = match self.datatake(ctx) {
            Ok(mtd) => mtd,
            Err(e) if ctx.config.strict => return Err(e),
            Err(_) => {
                let default = generation_default(&GENERATION_DEFAULTS, self.meta.baseline).ok_or_else(|| {
                    ProductError::invalid_metadata("baseline", format!("no default for {}", self.meta.baseline))
                })?;
                log::warn!(
                    "No datatake metadata in {}: {} uses the baseline {:.2} defaults (offset {}, quantification {}), \
                     reflectances may be biased",
                    self.meta.name,
                    desc.name,
                    self.meta.baseline,
                    default.offset,
                    default.quantification
                );
                return Ok(Calibration::Optical(OpticalCalibration::from_generation_default(default)));
            }
        };

        let quantification_tag = if self.s2_type().is_l2a() {
            ".//BOA_QUANTIFICATION_VALUE"
        } else {
            ".//QUANTIFICATION_VALUE"
        };
        let quantification: f64 = mtd.require(quantification_tag)?;
        let offset = if self.meta.baseline < RASTER_MASK_BASELINE {
            0.0
        } else {
            let prefix = if self.s2_type().is_l2a() { "BOA" } else { "RADIO" };
            let index = physical_index(&desc.id).ok_or_else(|| {
                ProductError::invalid_metadata("band_id", format!("no physical index for {}", desc.native_name))
            })?;
            mtd.require(&format!(".//{}_ADD_OFFSET[@band_id='{}']", prefix, index))?
        };
        Ok(Calibration::Optical(OpticalCalibration::new(offset, quantification)?))
    }

    fn mask_strategy(&self) -> MaskStrategy {
        self.mask_strategy.clone()
    }

    fn vector_mask(
        &self,
        ctx: &ProductContext,
        layer: VectorLayer,
        band: BandName,
    ) -> ProductResult<Option<Vec<MaskFeature>>> {
        let band_id = self.mask_band_id(band)?;
        match self.mask_member(ctx, layer.code(), &band_id, "gml")? {
            Some(member) => Ok(Some(ctx.read_vector(&member, self.tile_crs())?)),
            None => Ok(None),
        }
    }

    fn raster_mask(
        &self,
        ctx: &ProductContext,
        layer: RasterLayer,
        band: BandName,
        grid: &GridSpec,
    ) -> ProductResult<RasterData> {
        let (code, band_id) = match layer {
            RasterLayer::DetectorFootprint => ("DETFOO", self.mask_band_id(band)?),
            RasterLayer::Quality => ("QUALIT", self.mask_band_id(band)?),
            RasterLayer::Clouds => ("CLASSI", "00".to_string()),
        };
        let member = self.mask_member(ctx, code, &band_id, "jp2")?.ok_or_else(|| {
            ProductError::invalid_product(ctx.path(), format!("MSK_{}_B{}.jp2 not found", code, band_id))
        })?;
        let options = ReadOptions::new(
            PixelRequest::Size {
                width: grid.width,
                height: grid.height,
            },
            Resampling::Nearest,
        );
        ctx.read_raster(&ctx.raster_path(&member), &options)
    }

    fn cloud_rules(&self) -> CloudRules {
        self.cloud_rules.clone()
    }

    fn reference_grid(&self, ctx: &ProductContext) -> ProductResult<GridSpec> {
        if self.s2_type() == S2ProductType::L2Ap {
            return self.l2ap_grid(ctx, self.default_resolution() as u32);
        }
        let desc = self.bands.get(self.default_band()).ok_or_else(|| ProductError::UnknownBand {
            band: self.default_band(),
            product: self.meta.name.clone(),
        })?;
        let path = ctx.raster_path(&self.band_member(ctx, desc, self.default_resolution())?);
        ctx.raster_io()
            .info(&path)?
            .grid()
            .ok_or_else(|| ProductError::invalid_product(ctx.path(), format!("{} is not georeferenced", path)))
    }

    fn footprint(&self, ctx: &ProductContext) -> ProductResult<Polygon<f64>> {
        let band = self.default_band();
        let hull = if self.meta.baseline < RASTER_MASK_BASELINE {
            self.vector_mask(ctx, VectorLayer::DetectorFootprint, band)?
                .filter(|features| !features.is_empty())
                .map(|features| {
                    let polygons: Vec<Polygon<f64>> = features.into_iter().flat_map(|f| f.geometry.0).collect();
                    MultiPolygon::new(polygons).convex_hull()
                })
        } else {
            let grid = self.reference_grid(ctx)?;
            let detfoo = self.raster_mask(ctx, RasterLayer::DetectorFootprint, band, &grid)?;
            let valid = detfoo.band(1)?.mapv(|v| v != 0.0);
            if valid.dim() == grid.shape() {
                valid_area_hull(&valid, &grid)
            } else {
                None
            }
        };
        match hull {
            Some(polygon) => Ok(polygon),
            None => {
                log::warn!("No detector footprint in {}: footprint is the tile extent", self.meta.name);
                Ok(self.extent(ctx)?.to_polygon())
            }
        }
    }

    fn sun_angles(&self, ctx: &ProductContext) -> ProductResult<SunAngles> {
        let mtd = self.granule(ctx)?;
        Ok(SunAngles {
            azimuth: mtd.require(".//Mean_Sun_Angle/AZIMUTH_ANGLE")?,
            zenith: mtd.require(".//Mean_Sun_Angle/ZENITH_ANGLE")?,
        })
    }

    fn cloud_cover(&self, ctx: &ProductContext) -> ProductResult<f64> {
        self.granule(ctx)?.require(".//CLOUDY_PIXEL_PERCENTAGE")
    }

    fn orbit_direction(&self, ctx: &ProductContext) -> ProductResult<OrbitDirection> {
        self.datatake(ctx)?.require(".//SENSING_ORBIT_DIRECTION")
    }

    fn quicklook(&self, ctx: &ProductContext) -> ProductResult<Option<String>> {
        let tci = if self.s2_type().is_l2a() { r".*TCI_60m\.jp2$" } else { r".*TCI\.jp2$" };
        for pattern in [r".*ql\.jpg$", r".*preview\.jpg$", tci] {
            if let Some(member) = ctx.source.find(pattern)?.into_iter().next() {
                return Ok(Some(ctx.raster_path(&member)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_parsing() {
        let meta = S2Name::parse("S2A_MSIL1C_20200824T110631_N0209_R137_T30TTK_20200824T150432").unwrap();
        assert_eq!(meta.product_type, S2ProductType::L1C);
        assert!((meta.baseline - 2.09).abs() < 1e-9);
        assert_eq!(meta.tile, "T30TTK");
        assert_eq!(meta.generation_time, "150432");
        assert_eq!(meta.datatake.format(DATETIME_FMT).to_string(), "20200824T110631");

        let early = S2Name::parse("S2A_MSIL2A_20180101T101401_N0206_R022_T32TLR_20180101T121001").unwrap();
        assert_eq!(early.product_type, S2ProductType::L2Ap);

        assert!(S2Name::parse("S2A_MSIL9Z_20200824T110631_N0209_R137_T30TTK_20200824T150432").is_err());
        assert!(S2Name::parse("S2A_MSIL1C").is_err());
    }

    #[test]
    fn test_band_maps() {
        let l1c = band_map(S2ProductType::L1C);
        let l2a = band_map(S2ProductType::L2A);
        assert!(l1c.contains(BandName::SwirCirrus));
        assert!(!l2a.contains(BandName::SwirCirrus));
        assert_eq!(l2a.len(), 12);
        assert_eq!(l2a.get(BandName::NarrowNir).unwrap().native_name, "B8A");
        assert_eq!(l2a.get(BandName::Nir).unwrap().gsd, 10.0);
    }

    #[test]
    fn test_physical_index() {
        assert_eq!(physical_index("01"), Some(0));
        assert_eq!(physical_index("08"), Some(7));
        assert_eq!(physical_index("8A"), Some(8));
        assert_eq!(physical_index("09"), Some(9));
        assert_eq!(physical_index("12"), Some(12));
    }

    #[test]
    fn test_resolution_folders() {
        assert_eq!(resolution_folders("08"), &["R10m"]);
        assert_eq!(resolution_folders("8A"), &["R20m", "R60m"]);
        assert!(resolution_folders("10").is_empty());
    }
}
