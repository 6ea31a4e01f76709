//! Sentinel-3 OLCI (EFR, ERR) and SLSTR (RBT) level-1 products.
//!
//! Level-1 radiances come in sensor geometry with a full-resolution
//! geolocation grid. Bands and quality flags are orthorectified into the
//! UTM zone of the scene center and cached on disk, then converted to
//! reflectance with the mean solar flux and sun zenith.

use chrono::NaiveDateTime;
use geo::Polygon;
use ndarray::Array2;
use std::sync::Arc;

use crate::core::bands::{BandDescriptor, BandMap, BandName, Wavelength};
use crate::core::cache::Memo;
use crate::core::calibrate::{Calibration, OpticalCalibration};
use crate::core::geocode::{Binning, TiePointGrid};
use crate::core::masks::{CloudRules, MaskStrategy, QualityFlags, RasterLayer, RasterRules};
use crate::core::product::{parse_datetime, Constellation, FamilyKind, ProductContext, SensorFamily, DATETIME_FMT};
use crate::io::raster::{FlagRaster, PixelRequest, ReadOptions, Resampling};
use crate::products::sar::{cached_file_name, preprocess_band, preprocess_flags};
use crate::types::{BoundingBox, Crs, GridSpec, OrbitDirection, ProductError, ProductResult, SunAngles};

/// OLCI quality flag marking invalid pixels
const OLCI_INVALID_BIT: u32 = 25;
/// SLSTR cloud flag bit for cirrus
const SLSTR_CIRRUS_BIT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3ProductType {
    OlciEfr,
    OlciErr,
    SlstrRbt,
}

impl S3ProductType {
    fn from_token(token: &str) -> Option<Self> {
        match token.trim_end_matches('_') {
            "OL_1_EFR" => Some(S3ProductType::OlciEfr),
            "OL_1_ERR" => Some(S3ProductType::OlciErr),
            "SL_1_RBT" => Some(S3ProductType::SlstrRbt),
            _ => None,
        }
    }

    fn is_olci(&self) -> bool {
        !matches!(self, S3ProductType::SlstrRbt)
    }

    fn instrument(&self) -> &'static str {
        if self.is_olci() {
            "OLCI"
        } else {
            "SLSTR"
        }
    }

    fn code(&self) -> &'static str {
        match self {
            S3ProductType::OlciEfr => "EFR",
            S3ProductType::OlciErr => "ERR",
            S3ProductType::SlstrRbt => "RBT",
        }
    }

    fn resolution(&self) -> f64 {
        match self {
            S3ProductType::OlciEfr => 300.0,
            S3ProductType::OlciErr => 1200.0,
            S3ProductType::SlstrRbt => 500.0,
        }
    }
}

// (band, native name, center, FWHM)
const OLCI_BANDS: [(BandName, &str, f64, f64); 10] = [
    (BandName::CoastalAerosol, "Oa02", 412.5, 10.0),
    (BandName::Blue, "Oa03", 442.5, 10.0),
    (BandName::Green, "Oa06", 560.0, 10.0),
    (BandName::Red, "Oa08", 665.0, 10.0),
    (BandName::Vre1, "Oa11", 708.75, 10.0),
    (BandName::Vre2, "Oa12", 753.75, 7.5),
    (BandName::Vre3, "Oa16", 778.75, 15.0),
    (BandName::Nir, "Oa17", 865.0, 20.0),
    (BandName::NarrowNir, "Oa17", 865.0, 20.0),
    (BandName::WaterVapour, "Oa20", 940.0, 20.0),
];

const SLSTR_BANDS: [(BandName, &str, f64, f64); 7] = [
    (BandName::Green, "S1", 554.27, 19.26),
    (BandName::Red, "S2", 659.47, 19.25),
    (BandName::Nir, "S3", 868.0, 20.6),
    (BandName::NarrowNir, "S3", 868.0, 20.6),
    (BandName::SwirCirrus, "S4", 1374.8, 20.8),
    (BandName::Swir1, "S5", 1613.4, 60.68),
    (BandName::Swir2, "S6", 2255.7, 50.15),
];

/// Files and variables of one instrument
struct Layout {
    geo_file: &'static str,
    lat_var: &'static str,
    lon_var: &'static str,
    geometry_file: &'static str,
    saa_var: &'static str,
    sza_var: &'static str,
}

const OLCI_LAYOUT: Layout = Layout {
    geo_file: "geo_coordinates.nc",
    lat_var: "latitude",
    lon_var: "longitude",
    geometry_file: "tie_geometries.nc",
    saa_var: "SAA",
    sza_var: "SZA",
};

const SLSTR_LAYOUT: Layout = Layout {
    geo_file: "geodetic_an.nc",
    lat_var: "latitude_an",
    lon_var: "longitude_an",
    geometry_file: "geometry_tn.nc",
    saa_var: "solar_azimuth_tn",
    sza_var: "solar_zenith_tn",
};

fn band_map(product_type: S3ProductType) -> BandMap {
    let table: &[(BandName, &str, f64, f64)] = if product_type.is_olci() { &OLCI_BANDS } else { &SLSTR_BANDS };
    let gsd = product_type.resolution();
    BandMap::new(table.iter().map(|(name, native, center, fwhm)| {
        BandDescriptor::spectral(
            *name,
            native,
            native.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
            gsd,
            Wavelength::Center { center_nm: *center, fwhm_nm: *fwhm },
        )
    }))
}

/// Mean of the non-nodata samples
fn nan_mean(values: &Array2<f32>) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0usize), |(s, n), v| (s + *v as f64, n + 1));
    (count > 0).then(|| sum / count as f64)
}

pub struct Sentinel3Product {
    name: String,
    product_type: S3ProductType,
    datetime: NaiveDateTime,
    bands: BandMap,
    sun: Option<SunAngles>,
    geolocation: Memo<(), Arc<TiePointGrid>>,
}

impl Sentinel3Product {
    pub fn new(ctx: &ProductContext) -> ProductResult<Self> {
        let name = ctx.name.clone();
        let product_type = name
            .get(4..15)
            .and_then(S3ProductType::from_token)
            .ok_or_else(|| ProductError::invalid_product(ctx.path(), format!("unknown Sentinel-3 product type in {}", name)))?;
        let start = name
            .get(16..31)
            .ok_or_else(|| ProductError::invalid_product(ctx.path(), "no sensing start time in the name"))?;
        let datetime = parse_datetime(start, DATETIME_FMT, "start_time")?;
        Ok(Self {
            bands: band_map(product_type),
            name,
            product_type,
            datetime,
            sun: None,
            geolocation: Memo::new(),
        })
    }

    fn layout(&self) -> &'static Layout {
        if self.product_type.is_olci() {
            &OLCI_LAYOUT
        } else {
            &SLSTR_LAYOUT
        }
    }

    fn radiance_var(&self, desc: &BandDescriptor) -> String {
        if self.product_type.is_olci() {
            format!("{}_radiance", desc.native_name)
        } else {
            format!("{}_radiance_an", desc.native_name)
        }
    }

    /// GDAL subdataset path of `var` in the product file `file`
    fn nc_path(&self, ctx: &ProductContext, file: &str, var: &str) -> ProductResult<String> {
        let member = ctx
            .source
            .find_one(&format!(r"(^|/){}$", regex::escape(file)))?;
        Ok(format!("NETCDF:\"{}\":{}", ctx.raster_path(&member), var))
    }

    /// Variable with fill values as nodata and scale/offset applied
    fn read_nc(&self, ctx: &ProductContext, file: &str, var: &str) -> ProductResult<Array2<f32>> {
        let path = self.nc_path(ctx, file, var)?;
        let raster = ctx.read_raster(&path, &ReadOptions::native().with_indexes(vec![1]))?;
        let mut values = raster.scaled_band(1)?;
        if let Some(fill) = raster.nodata {
            let raw = raster.band(1)?;
            ndarray::Zip::from(&mut values).and(&raw).for_each(|v, &r| {
                if r as f64 == fill {
                    *v = f32::NAN;
                }
            });
        }
        Ok(values)
    }

    /// Integer flag variable, bits untouched
    fn read_nc_flags(&self, ctx: &ProductContext, file: &str, var: &str) -> ProductResult<Array2<u32>> {
        let path = self.nc_path(ctx, file, var)?;
        ctx.read_flags(&path, &ReadOptions::native().with_indexes(vec![1]))?
            .band(1)
    }

    fn geolocation(&self, ctx: &ProductContext) -> ProductResult<Arc<TiePointGrid>> {
        self.geolocation.get_or_try_insert_with((), || {
            let layout = self.layout();
            let lat = self.read_nc(ctx, layout.geo_file, layout.lat_var)?;
            let lon = self.read_nc(ctx, layout.geo_file, layout.lon_var)?;
            let grid = TiePointGrid::from_arrays(lat.mapv(f64::from), lon.mapv(f64::from))?;
            Ok(Arc::new(grid))
        })
    }

    fn read_sun_angles(&self, ctx: &ProductContext) -> ProductResult<SunAngles> {
        let layout = self.layout();
        let saa = self.read_nc(ctx, layout.geometry_file, layout.saa_var)?;
        let sza = self.read_nc(ctx, layout.geometry_file, layout.sza_var)?;
        match (nan_mean(&saa), nan_mean(&sza)) {
            (Some(azimuth), Some(zenith)) => Ok(SunAngles {
                azimuth: azimuth.rem_euclid(360.0),
                zenith,
            }),
            _ => Err(ProductError::invalid_metadata(layout.sza_var, "no valid sun angle")),
        }
    }

    /// Mean extra-terrestrial solar flux of a band
    fn solar_flux(&self, ctx: &ProductContext, desc: &BandDescriptor) -> ProductResult<f64> {
        let flux = if self.product_type.is_olci() {
            // One row per OLCI band, one column per detector
            let all = self.read_nc(ctx, "instrument_data.nc", "solar_flux")?;
            let row = desc
                .index()
                .filter(|i| *i >= 1 && *i <= all.nrows())
                .ok_or_else(|| ProductError::invalid_metadata("solar_flux", format!("no row for {}", desc.native_name)))?;
            let values = all.row(row - 1).to_owned().insert_axis(ndarray::Axis(0));
            nan_mean(&values)
        } else {
            let file = format!("{}_quality_an.nc", desc.native_name);
            let var = format!("{}_solar_irradiance_an", desc.native_name);
            nan_mean(&self.read_nc(ctx, &file, &var)?)
        };
        flux.ok_or_else(|| ProductError::invalid_metadata("solar_flux", format!("no valid value for {}", desc.native_name)))
    }

    /// Orthorectified copy of `var` on `target`, written once
    fn preprocessed(
        &self,
        ctx: &ProductContext,
        file: &str,
        var: &str,
        label: &str,
        target: &GridSpec,
        binning: Binning,
    ) -> ProductResult<String> {
        let file_name = cached_file_name(&self.condensed_name(), label, target);
        preprocess_band(ctx, &file_name, target, binning, || {
            let image = self.read_nc(ctx, file, var)?;
            let tie_points = self.geolocation(ctx)?;
            Ok((image, (*tie_points).clone()))
        })
    }

    /// Orthorectified flag words of `var` on `grid`, written once and read back
    fn preprocessed_flags(
        &self,
        ctx: &ProductContext,
        file: &str,
        var: &str,
        label: &str,
        grid: &GridSpec,
    ) -> ProductResult<FlagRaster> {
        let file_name = cached_file_name(&self.condensed_name(), label, grid);
        let path = preprocess_flags(ctx, &file_name, grid, || {
            let flags = self.read_nc_flags(ctx, file, var)?;
            let tie_points = self.geolocation(ctx)?;
            Ok((flags, (*tie_points).clone()))
        })?;
        let options = ReadOptions::new(
            PixelRequest::Size {
                width: grid.width,
                height: grid.height,
            },
            Resampling::Nearest,
        );
        ctx.read_flags(&path, &options)
    }
}

impl SensorFamily for Sentinel3Product {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Sentinel3
    }

    fn constellation(&self) -> Constellation {
        Constellation::S3
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn product_type(&self) -> &str {
        self.product_type.code()
    }

    fn band_map(&self) -> &BandMap {
        &self.bands
    }

    fn default_resolution(&self) -> f64 {
        self.product_type.resolution()
    }

    fn default_band(&self) -> BandName {
        BandName::Red
    }

    fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    fn condensed_name(&self) -> String {
        format!(
            "{}_S3_{}_{}",
            self.datetime.format(DATETIME_FMT),
            self.product_type.instrument(),
            self.product_type.code()
        )
    }

    fn load_metadata(&mut self, ctx: &ProductContext) -> ProductResult<()> {
        self.sun = Some(self.read_sun_angles(ctx)?);
        Ok(())
    }

    fn band_path(&self, ctx: &ProductContext, desc: &BandDescriptor, target: &GridSpec) -> ProductResult<String> {
        let file = format!("{}.nc", self.radiance_var(desc));
        if ctx.source.find(&format!(r"(^|/){}$", regex::escape(&file)))?.is_empty() {
            return Err(ProductError::BandNotFound {
                band: desc.name,
                path: ctx.path().display().to_string(),
            });
        }
        self.preprocessed(
            ctx,
            &file,
            &self.radiance_var(desc),
            desc.name.as_str(),
            target,
            Binning::Average,
        )
    }

    /// `reflectance = radiance · π / (E0 · cos(SZA))`
    fn calibration(&self, ctx: &ProductContext, desc: &BandDescriptor) -> ProductResult<Calibration> {
        let zenith = match self.sun {
            Some(sun) => sun.zenith,
            None => self.read_sun_angles(ctx)?.zenith,
        };
        let e0 = self.solar_flux(ctx, desc)?;
        let quantification = e0 * zenith.to_radians().cos() / std::f64::consts::PI;
        Ok(Calibration::Optical(OpticalCalibration::new(0.0, quantification)?))
    }

    fn mask_strategy(&self) -> MaskStrategy {
        let quality = if self.product_type.is_olci() {
            QualityFlags::Bits(vec![OLCI_INVALID_BIT])
        } else {
            QualityFlags::NonZero
        };
        MaskStrategy::Raster(RasterRules {
            footprint_outside: None,
            quality: Some(quality),
        })
    }

    fn flag_mask(
        &self,
        ctx: &ProductContext,
        layer: RasterLayer,
        band: BandName,
        grid: &GridSpec,
    ) -> ProductResult<FlagRaster> {
        let (file, var, label) = match (layer, self.product_type.is_olci()) {
            (RasterLayer::Quality, true) => (
                "qualityFlags.nc".to_string(),
                "quality_flags".to_string(),
                "quality_flags".to_string(),
            ),
            (RasterLayer::Quality, false) => {
                let native = &self
                    .bands
                    .get(band)
                    .ok_or_else(|| ProductError::UnknownBand {
                        band,
                        product: self.name.clone(),
                    })?
                    .native_name;
                (
                    format!("{}_radiance_an.nc", native),
                    format!("{}_exception_an", native),
                    format!("{}_exception", native),
                )
            }
            (RasterLayer::Clouds, false) => ("flags_an.nc".to_string(), "cloud_an".to_string(), "cloud_an".to_string()),
            _ => {
                return Err(ProductError::InvalidType(format!(
                    "{} {} has no {:?} mask",
                    self.product_type.instrument(),
                    self.product_type.code(),
                    layer
                )))
            }
        };
        self.preprocessed_flags(ctx, &file, &var, &label, grid)
    }

    /// Invalid bit plus the saturation bit of the band (bit 0 is Oa21)
    fn quality_flags(&self, band: BandName, default: &QualityFlags) -> QualityFlags {
        if !self.product_type.is_olci() {
            return default.clone();
        }
        match self.bands.get(band).and_then(|d| d.index()) {
            Some(oa) if (1..=21).contains(&oa) => QualityFlags::Bits(vec![OLCI_INVALID_BIT, 21 - oa as u32]),
            _ => default.clone(),
        }
    }

    fn cloud_rules(&self) -> CloudRules {
        if self.product_type.is_olci() {
            CloudRules::Unsupported
        } else {
            CloudRules::RasterBits {
                cirrus: vec![SLSTR_CIRRUS_BIT],
            }
        }
    }

    fn reference_grid(&self, ctx: &ProductContext) -> ProductResult<GridSpec> {
        let tie_points = self.geolocation(ctx)?;
        tie_points.target_grid(tie_points.crs(), self.default_resolution())
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

    fn sun_angles(&self, ctx: &ProductContext) -> ProductResult<SunAngles> {
        match self.sun {
            Some(sun) => Ok(sun),
            None => self.read_sun_angles(ctx),
        }
    }

    fn cloud_cover(&self, _ctx: &ProductContext) -> ProductResult<f64> {
        Err(ProductError::InvalidType(format!(
            "{} level-1 products carry no cloud cover",
            self.product_type.instrument()
        )))
    }

    fn orbit_direction(&self, _ctx: &ProductContext) -> ProductResult<OrbitDirection> {
        // Sentinel-3 images the day side on the descending pass
        Ok(OrbitDirection::Descending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_product_types() {
        assert_eq!(S3ProductType::from_token("OL_1_EFR___"), Some(S3ProductType::OlciEfr));
        assert_eq!(S3ProductType::from_token("SL_1_RBT___"), Some(S3ProductType::SlstrRbt));
        assert_eq!(S3ProductType::from_token("SR_2_LAN___"), None);
        assert_eq!(S3ProductType::OlciErr.resolution(), 1200.0);
    }

    #[test]
    fn test_band_maps() {
        let olci = band_map(S3ProductType::OlciEfr);
        assert_eq!(olci.get(BandName::Nir).unwrap().native_name, "Oa17");
        assert_eq!(olci.get(BandName::Nir).unwrap().index(), Some(17));
        assert!(!olci.contains(BandName::Swir1));

        let slstr = band_map(S3ProductType::SlstrRbt);
        assert_eq!(slstr.get(BandName::Swir2).unwrap().native_name, "S6");
        assert_eq!(slstr.get(BandName::Swir2).unwrap().gsd, 500.0);
        assert!(!slstr.contains(BandName::Blue));
    }

    #[test]
    fn test_nan_mean() {
        let values = array![[1.0f32, f32::NAN], [3.0, 5.0]];
        assert_eq!(nan_mean(&values), Some(3.0));
        assert_eq!(nan_mean(&array![[f32::NAN]]), None);
    }
}
