//! RADARSAT-2 products (SLC, SGX, SGF, ScanSAR and precision-geocoded).
//!
//! Each polarization ships as `imagery_<POL>.tif` with a `product.xml`
//! holding the geolocation grid and the calibration look-up tables next
//! to it. Bands are converted to sigma nought, orthorectified from the
//! geolocation grid and cached in the output directory.

use chrono::NaiveDateTime;
use geo::Polygon;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::bands::{BandDescriptor, BandMap, BandName};
use crate::core::cache::Memo;
use crate::core::calibrate::{Calibration, CalibrationType, SarCalibration};
use crate::core::geocode::{Binning, TiePointGrid};
use crate::core::masks::{CloudRules, MaskStrategy};
use crate::core::product::{parse_datetime, Constellation, FamilyKind, ProductContext, SensorFamily, DATETIME_FMT};
use crate::io::annotation::AnnotationParser;
use crate::io::raster::ReadOptions;
use crate::products::sar::{amplitude, cached_file_name, calibrate_sar, not_optical, polarization, preprocess_band, sar_band_map};
use crate::types::{BoundingBox, Crs, GridSpec, OrbitDirection, ProductError, ProductResult, SunAngles};

const PRODUCT_XML: &str = r"(^|/)product\.xml$";
const NAME_DATETIME_FMT: &str = "%Y%m%d%H%M%S";

/// Beam modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rs2Mode {
    Spotlight,
    UltraFine,
    WideUltraFine,
    ExtraFine,
    Fine,
    WideFine,
    MultiLookFine,
    WideMultiLookFine,
    Standard,
    Wide,
    ExtendedHigh,
    ExtendedLow,
    FineQuadPol,
    WideFineQuadPol,
    StandardQuadPol,
    WideStandardQuadPol,
    ScanSarNarrow,
    ScanSarWide,
}

// (mode, beam prefix, acquisition type, ground pixel spacing)
const MODES: &[(Rs2Mode, &str, &str, Option<f64>)] = &[
    (Rs2Mode::Spotlight, "SLA", "Spotlight", Some(0.5)),
    (Rs2Mode::UltraFine, "U", "Ultra-Fine", Some(1.0)),
    (Rs2Mode::WideUltraFine, "WU", "Wide Ultra-Fine", Some(1.0)),
    (Rs2Mode::ExtraFine, "XF", "Extra-Fine", Some(3.13)),
    (Rs2Mode::Fine, "F", "Fine", Some(6.25)),
    (Rs2Mode::WideFine, "WF", "Wide Fine", Some(6.25)),
    (Rs2Mode::MultiLookFine, "MF", "Multi-Look Fine", Some(6.25)),
    (Rs2Mode::WideMultiLookFine, "WMF", "Wide Multi-Look Fine", Some(6.25)),
    (Rs2Mode::Standard, "S", "Standard", Some(12.5)),
    (Rs2Mode::Wide, "W", "Wide", Some(12.5)),
    (Rs2Mode::ExtendedHigh, "EH", "Extended High", Some(12.5)),
    (Rs2Mode::ExtendedLow, "EL", "Extended Low", Some(12.5)),
    (Rs2Mode::FineQuadPol, "FQ", "Fine Quad-Pol", Some(6.25)),
    (Rs2Mode::WideFineQuadPol, "WFQ", "Wide Fine Quad-Pol", Some(6.25)),
    // Quad-pol standard beams have no ground-range pixel spacing
    (Rs2Mode::StandardQuadPol, "SQ", "Standard Quad-Pol", None),
    (Rs2Mode::WideStandardQuadPol, "WSQ", "Wide Standard Quad-Pol", None),
    (Rs2Mode::ScanSarNarrow, "SCN", "ScanSAR Narrow", Some(25.0)),
    (Rs2Mode::ScanSarWide, "SCW", "ScanSAR Wide", Some(50.0)),
];

impl Rs2Mode {
    /// Mode of a beam token (`U25W2`, `FQ8W`, `SCWA`), longest prefix first
    pub fn from_beam(beam: &str) -> Option<Self> {
        let beam = beam.to_ascii_uppercase();
        MODES
            .iter()
            .filter(|(_, prefix, _, _)| beam.starts_with(prefix))
            .max_by_key(|(_, prefix, _, _)| prefix.len())
            .map(|(mode, _, _, _)| *mode)
    }

    fn entry(&self) -> &'static (Rs2Mode, &'static str, &'static str, Option<f64>) {
        // Every variant has a row
        MODES.iter().find(|row| row.0 == *self).unwrap_or(&MODES[0])
    }

    pub fn code(&self) -> &'static str {
        self.entry().1
    }

    pub fn pixel_spacing(&self) -> Option<f64> {
        self.entry().3
    }
}

impl FromStr for Rs2Mode {
    type Err = ProductError;

    /// Acquisition type as written in `product.xml`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        MODES
            .iter()
            .find(|(_, _, label, _)| label.eq_ignore_ascii_case(s))
            .map(|(mode, _, _, _)| *mode)
            .ok_or_else(|| ProductError::invalid_metadata("acquisitionType", format!("unknown beam mode '{}'", s)))
    }
}

impl fmt::Display for Rs2Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entry().2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rs2ProductType {
    Slc,
    Sgx,
    Sgf,
    Scn,
    Scw,
    Scf,
    Scs,
    Ssg,
    Spg,
}

impl Rs2ProductType {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "SLC" => Some(Rs2ProductType::Slc),
            "SGX" => Some(Rs2ProductType::Sgx),
            "SGF" => Some(Rs2ProductType::Sgf),
            "SCN" => Some(Rs2ProductType::Scn),
            "SCW" => Some(Rs2ProductType::Scw),
            "SCF" => Some(Rs2ProductType::Scf),
            "SCS" => Some(Rs2ProductType::Scs),
            "SSG" => Some(Rs2ProductType::Ssg),
            "SPG" => Some(Rs2ProductType::Spg),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Rs2ProductType::Slc => "SLC",
            Rs2ProductType::Sgx => "SGX",
            Rs2ProductType::Sgf => "SGF",
            Rs2ProductType::Scn => "SCN",
            Rs2ProductType::Scw => "SCW",
            Rs2ProductType::Scf => "SCF",
            Rs2ProductType::Scs => "SCS",
            Rs2ProductType::Ssg => "SSG",
            Rs2ProductType::Spg => "SPG",
        }
    }
}

pub struct Radarsat2Product {
    name: String,
    mode: Rs2Mode,
    product_type: Rs2ProductType,
    datetime: NaiveDateTime,
    bands: BandMap,
    resolution: f64,
    orbit: Option<OrbitDirection>,
    geolocation: Memo<(), Arc<TiePointGrid>>,
}

impl Radarsat2Product {
    pub fn new(ctx: &ProductContext) -> ProductResult<Self> {
        let name = ctx.name.clone();
        let tokens: Vec<&str> = name.split('_').collect();
        let invalid = |what: &str| ProductError::invalid_product(ctx.path(), format!("{} in RADARSAT-2 name {}", what, name));
        if tokens.len() < 9 {
            return Err(invalid("too few fields"));
        }
        let product_type = tokens
            .last()
            .and_then(|t| Rs2ProductType::from_token(t))
            .ok_or_else(|| invalid("unknown product type"))?;
        let datetime = parse_datetime(&format!("{}{}", tokens[5], tokens[6]), NAME_DATETIME_FMT, "datetime")?;

        // product.xml refines the name when it is readable
        let product_xml = ctx.find_xml(PRODUCT_XML).ok();
        let mode = match product_xml.as_ref().and_then(|xml| xml.find_text(".//acquisitionType")) {
            Some(label) => label.parse()?,
            None => Rs2Mode::from_beam(tokens[4]).ok_or_else(|| invalid("unknown beam mode"))?,
        };

        let mut polarizations: Vec<BandName> = product_xml
            .as_ref()
            .and_then(|xml| xml.find_text(".//polarizations"))
            .map(|text| text.split_whitespace().filter_map(polarization).collect())
            .unwrap_or_default();
        if polarizations.is_empty() {
            polarizations = tokens[7..tokens.len() - 1].iter().filter_map(|t| polarization(t)).collect();
        }
        if polarizations.is_empty() {
            return Err(invalid("no polarization"));
        }

        let resolution = match product_xml
            .as_ref()
            .map(|xml| xml.parse_field::<f64>(".//sampledPixelSpacing"))
            .transpose()?
            .flatten()
        {
            Some(spacing) => spacing,
            None => mode.pixel_spacing().ok_or_else(|| ProductError::UnsupportedBand {
                band: polarizations[0],
                family: format!("RADARSAT-2 {} mode", mode),
            })?,
        };

        Ok(Self {
            bands: sar_band_map(&polarizations, resolution),
            name,
            mode,
            product_type,
            datetime,
            resolution,
            orbit: None,
            geolocation: Memo::new(),
        })
    }

    pub fn mode(&self) -> Rs2Mode {
        self.mode
    }

    fn geolocation(&self, ctx: &ProductContext) -> ProductResult<Arc<TiePointGrid>> {
        self.geolocation.get_or_try_insert_with((), || {
            let member = ctx.source.find_one(PRODUCT_XML)?;
            let points = AnnotationParser::parse_tie_points(&ctx.source.read_to_string(&member)?)?;
            Ok(Arc::new(TiePointGrid::from_points(&points)?))
        })
    }

    fn sar_calibration(&self, ctx: &ProductContext) -> ProductResult<Calibration> {
        let kind = CalibrationType::Sigma0;
        let lut_name = kind.lut_file_name().unwrap_or("lutSigma.xml");
        let lut = ctx
            .source
            .find_one(&format!(r"(^|/){}$", regex::escape(lut_name)))
            .and_then(|member| ctx.source.read_to_string(&member))
            .and_then(|content| AnnotationParser::parse_lut(&content));
        match lut {
            Ok(lut) => Ok(Calibration::Sar(SarCalibration::RangeLut { lut, kind })),
            Err(e) if ctx.config.strict => Err(e),
            Err(e) => {
                log::warn!(
                    "Calibration table {} of {} unavailable ({}): bands stay uncalibrated intensities, \
                     backscatter comparisons with other products will be unreliable",
                    lut_name,
                    self.name,
                    e
                );
                Ok(Calibration::Sar(SarCalibration::Uncalibrated))
            }
        }
    }
}

impl SensorFamily for Radarsat2Product {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Radarsat2
    }

    fn constellation(&self) -> Constellation {
        Constellation::Radarsat2
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
        self.resolution
    }

    fn default_band(&self) -> BandName {
        self.bands.names().next().unwrap_or(BandName::Hh)
    }

    fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    fn condensed_name(&self) -> String {
        format!(
            "{}_RS2_{}_{}",
            self.datetime.format(DATETIME_FMT),
            self.mode.code(),
            self.product_type.as_str()
        )
    }

    fn load_metadata(&mut self, ctx: &ProductContext) -> ProductResult<()> {
        let product = ctx.find_xml(PRODUCT_XML)?;
        self.orbit = Some(product.require(".//passDirection")?);
        Ok(())
    }

    fn band_path(&self, ctx: &ProductContext, desc: &BandDescriptor, target: &GridSpec) -> ProductResult<String> {
        let image = ctx
            .source
            .find(&format!(r"(^|/)imagery_{}\.tif$", desc.native_name))?
            .into_iter()
            .next()
            .ok_or_else(|| ProductError::BandNotFound {
                band: desc.name,
                path: ctx.path().display().to_string(),
            })?;
        let file_name = cached_file_name(&self.condensed_name(), &desc.native_name, target);
        preprocess_band(ctx, &file_name, target, Binning::Average, || {
            let raster = ctx.read_raster(&ctx.raster_path(&image), &ReadOptions::native())?;
            let calibration = self.sar_calibration(ctx)?;
            let sigma0 = calibrate_sar(&amplitude(&raster)?, desc.name, &calibration)?;
            Ok((sigma0, (*self.geolocation(ctx)?).clone()))
        })
    }

    fn calibration(&self, _ctx: &ProductContext, _desc: &BandDescriptor) -> ProductResult<Calibration> {
        Ok(Calibration::Identity)
    }

    fn mask_strategy(&self) -> MaskStrategy {
        MaskStrategy::NodataOnly
    }

    fn cloud_rules(&self) -> CloudRules {
        CloudRules::Unsupported
    }

    fn reference_grid(&self, ctx: &ProductContext) -> ProductResult<GridSpec> {
        let tie_points = self.geolocation(ctx)?;
        tie_points.target_grid(tie_points.crs(), self.resolution)
    }

    fn crs(&self, ctx: &ProductContext) -> ProductResult<Crs> {
        Ok(self.geolocation(ctx)?.crs())
    }

    fn extent(&self, ctx: &ProductContext) -> ProductResult<BoundingBox> {
        let tie_points = self.geolocation(ctx)?;
        tie_points.extent(tie_points.crs())
    }

    fn footprint(&self, ctx: &ProductContext) -> ProductResult<Polygon<f64>> {
        let tie_points = self.geolocation(ctx)?;
        tie_points.footprint(tie_points.crs())
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
            None => ctx.find_xml(PRODUCT_XML)?.require(".//passDirection"),
        }
    }

    fn quicklook(&self, ctx: &ProductContext) -> ProductResult<Option<String>> {
        Ok(ctx
            .source
            .find(r"(^|/)BrowseImage\.tif$")?
            .first()
            .map(|member| ctx.raster_path(member)))
    }
}
