//! Invalid-pixel mask engine.
//!
//! Families describe where their validity information lives with a
//! [`MaskStrategy`] chosen once at construction, and give access to the
//! auxiliary files through [`MaskProvider`]. The engine turns both into a
//! boolean mask on the exact grid of the band (`true` = invalid).

use geo::Polygon;
use ndarray::{Array2, Zip};

use crate::core::bands::BandName;
use crate::core::rasterize::rasterize;
use crate::core::resample::{resample, resample_mask};
use crate::io::raster::{FlagRaster, RasterData, Resampling};
use crate::io::vector::MaskFeature;
use crate::types::{BandArray, GridSpec, ProductError, ProductResult, NODATA};

/// Auxiliary vector mask layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorLayer {
    DetectorFootprint,
    Nodata,
    Defect,
    Saturation,
    TechnicalQuality,
    Clouds,
}

impl VectorLayer {
    pub fn code(&self) -> &'static str {
        match self {
            VectorLayer::DetectorFootprint => "DETFOO",
            VectorLayer::Nodata => "NODATA",
            VectorLayer::Defect => "DEFECT",
            VectorLayer::Saturation => "SATURA",
            VectorLayer::TechnicalQuality => "TECQUA",
            VectorLayer::Clouds => "CLOUDS",
        }
    }
}

/// Auxiliary raster mask layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterLayer {
    DetectorFootprint,
    Quality,
    Clouds,
}

/// A vector layer whose polygons mark invalid pixels. With a non-empty
/// `keep`, only features whose category or id matches one of the tokens count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorRule {
    pub layer: VectorLayer,
    pub keep: &'static [&'static str],
}

/// How a quality raster flags invalid pixels
#[derive(Debug, Clone, PartialEq)]
pub enum QualityFlags {
    /// Any of these 1-based bands is non-zero
    Planes(Vec<usize>),
    /// Any of these bits of the integer flag band is set
    Bits(Vec<u32>),
    /// The integer flag band is non-zero
    NonZero,
}

fn bit_mask(bits: &[u32]) -> u32 {
    bits.iter().fold(0, |acc, b| acc | (1u32 << b))
}

impl QualityFlags {
    fn invalid(&self, provider: &dyn MaskProvider, band: BandName, grid: &GridSpec) -> ProductResult<Array2<bool>> {
        let shape = grid.shape();
        match self {
            QualityFlags::Planes(planes) => {
                let raster = provider.raster_layer(RasterLayer::Quality, band, grid)?;
                let mut invalid = Array2::from_elem(shape, false);
                for plane in planes {
                    let values = conform(raster.band(*plane)?, shape);
                    union_into(&mut invalid, &values.mapv(|v| v != 0.0));
                }
                Ok(invalid)
            }
            QualityFlags::Bits(bits) => {
                let mask = bit_mask(bits);
                let flags = conform_flags(provider.flag_layer(RasterLayer::Quality, band, grid)?, shape)?;
                Ok(flags.mapv(|v| v & mask != 0))
            }
            QualityFlags::NonZero => {
                let flags = conform_flags(provider.flag_layer(RasterLayer::Quality, band, grid)?, shape)?;
                Ok(flags.mapv(|v| v != 0))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterRules {
    /// Value of the footprint raster outside the detector area
    pub footprint_outside: Option<f32>,
    pub quality: Option<QualityFlags>,
}

/// Validity source of a family, resolved once per product
#[derive(Debug, Clone, PartialEq)]
pub enum MaskStrategy {
    /// Polygon layers. A pixel outside the footprint is invalid, a pixel
    /// inside any polygon of the other layers is invalid.
    Vector {
        footprint: VectorLayer,
        layers: &'static [VectorRule],
    },
    /// Categorical rasters on (or resampled to) the band grid
    Raster(RasterRules),
    /// Raw samples equal to the raw zero value are invalid
    RawZero,
    /// Only samples already holding the nodata sentinel are invalid
    NodataOnly,
}

/// Access to a product's auxiliary mask files
pub trait MaskProvider {
    /// Features of `layer` for `band`, `Ok(None)` when the layer file does not exist
    fn vector_layer(&self, layer: VectorLayer, band: BandName) -> ProductResult<Option<Vec<MaskFeature>>>;

    /// Raster `layer` for `band`, read at the size of `grid` when possible
    fn raster_layer(&self, layer: RasterLayer, band: BandName, grid: &GridSpec) -> ProductResult<RasterData>;

    /// Integer bitfield `layer` for `band`, read at the size of `grid` when possible
    fn flag_layer(&self, layer: RasterLayer, band: BandName, grid: &GridSpec) -> ProductResult<FlagRaster>;

    /// Quality flags for `band`, for families whose flags differ per band
    fn quality_flags(&self, _band: BandName, default: &QualityFlags) -> QualityFlags {
        default.clone()
    }
}

fn conform(values: Array2<f32>, shape: (usize, usize)) -> Array2<f32> {
    if values.dim() == shape {
        return values;
    }
    log::debug!("Resampling mask from {:?} to {:?}", values.dim(), shape);
    resample(&values, shape, Resampling::Nearest)
}

fn conform_flags(raster: FlagRaster, shape: (usize, usize)) -> ProductResult<Array2<u32>> {
    let flags = raster.band(1)?;
    if flags.dim() == shape {
        return Ok(flags);
    }
    log::debug!("Resampling flags from {:?} to {:?}", flags.dim(), shape);
    Ok(resample_mask(&flags, shape))
}

fn union_into(target: &mut Array2<bool>, other: &Array2<bool>) {
    #[cfg(feature = "parallel")]
    Zip::from(target).and(other).par_for_each(|t, &o| *t |= o);
    #[cfg(not(feature = "parallel"))]
    Zip::from(target).and(other).for_each(|t, &o| *t |= o);
}

fn polygons(features: &[MaskFeature]) -> impl Iterator<Item = &Polygon<f64>> {
    features.iter().flat_map(|f| f.geometry.0.iter())
}

fn filter_features(features: Vec<MaskFeature>, keep: &[&str]) -> Vec<MaskFeature> {
    if keep.is_empty() {
        return features;
    }
    features
        .into_iter()
        .filter(|f| keep.iter().any(|token| f.matches(token)))
        .collect()
}

/// Boolean invalid mask of `band` on `grid`.
///
/// `raw` holds the band's raw samples on the same grid, `raw_zero` the
/// raw value meaning "no data" for this processing generation.
pub fn invalid_pixel_mask(
    raw: &Array2<f32>,
    grid: &GridSpec,
    band: BandName,
    strategy: &MaskStrategy,
    provider: &dyn MaskProvider,
    raw_zero: f32,
) -> ProductResult<Array2<bool>> {
    let shape = grid.shape();
    if raw.dim() != shape {
        return Err(ProductError::GridMismatch(format!(
            "raw samples {:?} do not match the band grid {:?}",
            raw.dim(),
            shape
        )));
    }
    let raw_invalid = raw.mapv(|v| v.is_nan());

    let mut invalid = match strategy {
        MaskStrategy::Vector { footprint, layers } => {
            vector_mask(raw, grid, band, *footprint, layers, provider, raw_zero)?
        }
        MaskStrategy::Raster(rules) => raster_mask(grid, band, rules, provider)?,
        MaskStrategy::RawZero => raw.mapv(|v| v == raw_zero),
        MaskStrategy::NodataOnly => Array2::from_elem(shape, false),
    };
    union_into(&mut invalid, &raw_invalid);
    Ok(invalid)
}

fn vector_mask(
    raw: &Array2<f32>,
    grid: &GridSpec,
    band: BandName,
    footprint: VectorLayer,
    layers: &[VectorRule],
    provider: &dyn MaskProvider,
    raw_zero: f32,
) -> ProductResult<Array2<bool>> {
    let mut invalid = match provider.vector_layer(footprint, band)? {
        Some(features) if !features.is_empty() => rasterize(polygons(&features), grid).mapv(|inside| !inside),
        _ => {
            log::warn!(
                "{} mask of {} is empty or missing: pixels equal to raw value {} are flagged invalid instead, \
                 invalid areas inside the swath may be missed",
                footprint.code(),
                band,
                raw_zero
            );
            raw.mapv(|v| v == raw_zero)
        }
    };

    for rule in layers {
        match provider.vector_layer(rule.layer, band)? {
            None => {
                log::warn!(
                    "{} mask of {} is missing: treating every pixel as valid for this layer",
                    rule.layer.code(),
                    band
                );
            }
            Some(features) => {
                let kept = filter_features(features, rule.keep);
                if kept.is_empty() {
                    log::warn!(
                        "{} mask of {} is empty: treating every pixel as valid for this layer",
                        rule.layer.code(),
                        band
                    );
                    continue;
                }
                union_into(&mut invalid, &rasterize(polygons(&kept), grid));
            }
        }
    }
    Ok(invalid)
}

fn raster_mask(
    grid: &GridSpec,
    band: BandName,
    rules: &RasterRules,
    provider: &dyn MaskProvider,
) -> ProductResult<Array2<bool>> {
    let shape = grid.shape();
    let mut invalid = Array2::from_elem(shape, false);

    if let Some(outside) = rules.footprint_outside {
        let footprint = provider.raster_layer(RasterLayer::DetectorFootprint, band, grid)?;
        let values = conform(footprint.band(1)?, shape);
        union_into(&mut invalid, &values.mapv(|v| v == outside));
    }
    if let Some(default_flags) = &rules.quality {
        let flags = provider.quality_flags(band, default_flags);
        union_into(&mut invalid, &flags.invalid(provider, band, grid)?);
    }
    Ok(invalid)
}

/// Null out the invalid pixels of `band_array`. The array keeps its dimensions.
pub fn apply_invalid_pixel_mask(
    mut band_array: BandArray,
    raw: &Array2<f32>,
    band: BandName,
    strategy: &MaskStrategy,
    provider: &dyn MaskProvider,
    raw_zero: f32,
) -> ProductResult<BandArray> {
    let invalid = invalid_pixel_mask(raw, &band_array.grid, band, strategy, provider, raw_zero)?;
    band_array.set_invalid(&invalid);
    log::debug!(
        "{}: {} of {} pixels invalid",
        band,
        invalid.iter().filter(|v| **v).count(),
        invalid.len()
    );
    Ok(band_array)
}

/// Where a family keeps its cloud information
#[derive(Debug, Clone, PartialEq)]
pub enum CloudRules {
    /// Cloud polygons carrying an opaque/cirrus category
    Vector { opaque: &'static str, cirrus: &'static str },
    /// Cloud polygons without category: all are opaque clouds
    VectorUncategorized,
    /// One raster plane per category
    RasterPlanes { opaque: usize, cirrus: usize },
    /// Bit flags in band 1: cirrus bits, every other set bit is an opaque cloud
    RasterBits { cirrus: Vec<u32> },
    Unsupported,
}

impl CloudRules {
    pub fn supports(&self, band: BandName) -> bool {
        match self {
            CloudRules::Unsupported => false,
            CloudRules::VectorUncategorized => {
                matches!(band, BandName::RawClouds | BandName::Clouds | BandName::AllClouds)
            }
            _ => matches!(
                band,
                BandName::RawClouds | BandName::Clouds | BandName::Cirrus | BandName::AllClouds
            ),
        }
    }
}

/// Cloud mask band: 1 for cloud, 0 for clear, nodata where `nodata` is set.
///
/// `RAW_CLOUDS` keeps the native coding (raster flags, or 1 inside any
/// cloud polygon). Bands the family does not produce fail with
/// `UnsupportedBand`, never with an empty mask.
pub fn cloud_band(
    band: BandName,
    rules: &CloudRules,
    provider: &dyn MaskProvider,
    grid: &GridSpec,
    nodata: Option<&Array2<bool>>,
    family: &str,
) -> ProductResult<BandArray> {
    if !band.is_cloud() {
        return Err(ProductError::InvalidType(format!("{} is not a cloud band", band)));
    }
    if !rules.supports(band) {
        return Err(ProductError::UnsupportedBand {
            band,
            family: family.to_string(),
        });
    }
    let shape = grid.shape();

    let mut values: Array2<f32> = match rules {
        CloudRules::Vector { opaque, cirrus } => {
            let features = provider
                .vector_layer(VectorLayer::Clouds, band)?
                .unwrap_or_default();
            let tokens: Vec<&str> = match band {
                BandName::Clouds => vec![*opaque],
                BandName::Cirrus => vec![*cirrus],
                _ => vec![],
            };
            let kept = filter_features(features, &tokens);
            rasterize(polygons(&kept), grid).mapv(|v| if v { 1.0 } else { 0.0 })
        }
        CloudRules::VectorUncategorized => {
            let features = provider
                .vector_layer(VectorLayer::Clouds, band)?
                .unwrap_or_default();
            rasterize(polygons(&features), grid).mapv(|v| if v { 1.0 } else { 0.0 })
        }
        CloudRules::RasterPlanes { opaque, cirrus } => {
            let raster = provider.raster_layer(RasterLayer::Clouds, band, grid)?;
            let opaque = conform(raster.band(*opaque)?, shape).mapv(|v| v != 0.0);
            let cirrus = conform(raster.band(*cirrus)?, shape).mapv(|v| v != 0.0);
            Zip::from(&opaque).and(&cirrus).map_collect(|&o, &c| match band {
                BandName::RawClouds => (o as u8 + 2 * c as u8) as f32,
                BandName::Clouds => o as u8 as f32,
                BandName::Cirrus => c as u8 as f32,
                _ => (o || c) as u8 as f32,
            })
        }
        CloudRules::RasterBits { cirrus } => {
            let flags = conform_flags(provider.flag_layer(RasterLayer::Clouds, band, grid)?, shape)?;
            let cirrus_mask = bit_mask(cirrus);
            flags.mapv(|bits| match band {
                BandName::RawClouds => bits as f32,
                BandName::Clouds => (bits & !cirrus_mask != 0) as u8 as f32,
                BandName::Cirrus => (bits & cirrus_mask != 0) as u8 as f32,
                _ => (bits != 0) as u8 as f32,
            })
        }
        CloudRules::Unsupported => {
            return Err(ProductError::UnsupportedBand {
                band,
                family: family.to_string(),
            })
        }
    };

    if let Some(nodata) = nodata {
        let nodata = if nodata.dim() == shape {
            nodata.clone()
        } else {
            resample_mask(nodata, shape)
        };
        Zip::from(&mut values).and(&nodata).for_each(|v, &n| {
            if n {
                *v = NODATA;
            }
        });
    }
    BandArray::new(values, *grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use geo::{LineString, MultiPolygon};
    use ndarray::Array3;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeProvider {
        vectors: HashMap<VectorLayer, Vec<MaskFeature>>,
        rasters: HashMap<RasterLayer, Array3<f32>>,
        flags: HashMap<RasterLayer, Array2<u32>>,
    }

    impl MaskProvider for FakeProvider {
        fn vector_layer(&self, layer: VectorLayer, _band: BandName) -> ProductResult<Option<Vec<MaskFeature>>> {
            Ok(self.vectors.get(&layer).cloned())
        }

        fn raster_layer(&self, layer: RasterLayer, _band: BandName, grid: &GridSpec) -> ProductResult<RasterData> {
            let data = self
                .rasters
                .get(&layer)
                .cloned()
                .ok_or_else(|| ProductError::Raster(format!("no {:?} raster", layer)))?;
            Ok(RasterData {
                data,
                transform: grid.transform,
                crs: grid.crs,
                nodata: None,
                scale: None,
                offset: None,
            })
        }

        fn flag_layer(&self, layer: RasterLayer, _band: BandName, grid: &GridSpec) -> ProductResult<FlagRaster> {
            let data = self
                .flags
                .get(&layer)
                .cloned()
                .ok_or_else(|| ProductError::Raster(format!("no {:?} flags", layer)))?;
            Ok(FlagRaster::from_band(data, grid.transform, grid.crs))
        }
    }

    fn grid() -> GridSpec {
        GridSpec::new(GeoTransform::new(0.0, 1.0, 4.0, -1.0), 4, 4, None)
    }

    fn feature(id: &str, category: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> MaskFeature {
        let ring = LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]);
        MaskFeature {
            id: id.to_string(),
            category: Some(category.to_string()),
            geometry: MultiPolygon::new(vec![Polygon::new(ring, vec![])]),
        }
    }

    const LAYERS: &[VectorRule] = &[
        VectorRule { layer: VectorLayer::Nodata, keep: &["QT_NODATA_PIXELS"] },
        VectorRule { layer: VectorLayer::Saturation, keep: &[] },
    ];

    #[test]
    fn test_vector_strategy_union() {
        let mut vectors = HashMap::new();
        // Footprint covers the left 3 columns
        vectors.insert(VectorLayer::DetectorFootprint, vec![feature("d1", "DETECTOR_FOOTPRINT", 0.0, 0.0, 3.0, 4.0)]);
        // Nodata feature of another category is ignored
        vectors.insert(
            VectorLayer::Nodata,
            vec![
                feature("n1", "QT_NODATA_PIXELS", 0.0, 3.0, 1.0, 4.0),
                feature("n2", "QT_PARTIALLY_CORRECTED_PIXELS", 1.0, 0.0, 2.0, 1.0),
            ],
        );
        let provider = FakeProvider { vectors, ..Default::default() };
        let strategy = MaskStrategy::Vector { footprint: VectorLayer::DetectorFootprint, layers: LAYERS };

        let raw = Array2::from_elem((4, 4), 100.0f32);
        let invalid = invalid_pixel_mask(&raw, &grid(), BandName::Red, &strategy, &provider, 0.0).unwrap();
        assert_eq!(invalid.dim(), (4, 4));
        assert!(invalid.column(3).iter().all(|v| *v));
        assert!(invalid[[0, 0]]);
        assert!(!invalid[[3, 1]]);
        assert_eq!(invalid.iter().filter(|v| **v).count(), 5);
    }

    #[test]
    fn test_raster_strategy_flags_and_footprint() {
        let mut footprint = Array3::<f32>::from_elem((1, 2, 2), 1.0);
        footprint[[0, 0, 0]] = 0.0;
        let mut quality = Array3::<f32>::zeros((8, 4, 4));
        quality[[5, 3, 3]] = 1.0; // plane 6
        quality[[1, 2, 2]] = 1.0; // plane 2, not checked
        let mut rasters = HashMap::new();
        rasters.insert(RasterLayer::DetectorFootprint, footprint);
        rasters.insert(RasterLayer::Quality, quality);
        let provider = FakeProvider { rasters, ..Default::default() };
        let strategy = MaskStrategy::Raster(RasterRules {
            footprint_outside: Some(0.0),
            quality: Some(QualityFlags::Planes(vec![3, 4, 5, 6, 8])),
        });

        let raw = Array2::from_elem((4, 4), 10.0f32);
        let invalid = invalid_pixel_mask(&raw, &grid(), BandName::Red, &strategy, &provider, 0.0).unwrap();
        // The 2x2 footprint is resampled: its outside cell covers the top-left 2x2 block
        assert!(invalid[[0, 0]] && invalid[[1, 1]]);
        assert!(invalid[[3, 3]]);
        assert!(!invalid[[2, 2]]);
        assert_eq!(invalid.iter().filter(|v| **v).count(), 5);
    }

    #[test]
    fn test_raw_zero_strategy_keeps_shape() {
        let provider = FakeProvider::default();
        let mut raw = Array2::from_elem((4, 4), 3.0f32);
        raw[[1, 1]] = 0.0;
        let band = BandArray::new(raw.mapv(|v| v * v), grid()).unwrap();
        let masked = apply_invalid_pixel_mask(band, &raw, BandName::Hh, &MaskStrategy::RawZero, &provider, 0.0).unwrap();
        assert_eq!(masked.shape(), (4, 4));
        assert!(masked.data[[1, 1]].is_nan());
        assert_eq!(masked.count_valid(), 15);
    }

    #[test]
    fn test_cloud_bands() {
        let mut vectors = HashMap::new();
        vectors.insert(
            VectorLayer::Clouds,
            vec![
                feature("OPAQUE.0", "OPAQUE", 0.0, 3.0, 1.0, 4.0),
                feature("CIRRUS.0", "CIRRUS", 3.0, 0.0, 4.0, 1.0),
            ],
        );
        let provider = FakeProvider { vectors, ..Default::default() };
        let rules = CloudRules::Vector { opaque: "OPAQUE", cirrus: "CIRRUS" };

        let clouds = cloud_band(BandName::Clouds, &rules, &provider, &grid(), None, "S2").unwrap();
        assert_eq!(clouds.data[[0, 0]], 1.0);
        assert_eq!(clouds.data[[3, 3]], 0.0);
        let all = cloud_band(BandName::AllClouds, &rules, &provider, &grid(), None, "S2").unwrap();
        assert_eq!(all.data.sum(), 2.0);

        let err = cloud_band(BandName::Shadows, &rules, &provider, &grid(), None, "S2").unwrap_err();
        assert!(matches!(err, ProductError::UnsupportedBand { band: BandName::Shadows, .. }));
    }

    #[test]
    fn test_raster_cloud_planes_with_nodata() {
        let mut classi = Array3::<f32>::zeros((3, 4, 4));
        classi[[0, 0, 0]] = 1.0;
        classi[[1, 0, 1]] = 1.0;
        let mut rasters = HashMap::new();
        rasters.insert(RasterLayer::Clouds, classi);
        let provider = FakeProvider { rasters, ..Default::default() };
        let rules = CloudRules::RasterPlanes { opaque: 1, cirrus: 2 };
        let mut nodata = Array2::from_elem((4, 4), false);
        nodata[[3, 3]] = true;

        let raw = cloud_band(BandName::RawClouds, &rules, &provider, &grid(), Some(&nodata), "S2").unwrap();
        assert_eq!(raw.data[[0, 0]], 1.0);
        assert_eq!(raw.data[[0, 1]], 2.0);
        assert!(raw.data[[3, 3]].is_nan());
        let cirrus = cloud_band(BandName::Cirrus, &rules, &provider, &grid(), Some(&nodata), "S2").unwrap();
        assert_eq!(cirrus.data[[0, 0]], 0.0);
        assert_eq!(cirrus.data[[0, 1]], 1.0);
    }

    #[test]
    fn test_high_flag_bits_keep_low_bits() {
        // Land (bit 31) with saturation bit 4: f32 would round bit 4 away
        let mut quality = Array2::<u32>::zeros((4, 4));
        quality[[0, 0]] = (1 << 31) | (1 << 4);
        quality[[0, 1]] = 1 << 31;
        quality[[1, 1]] = 1 << 25;
        let mut flags = HashMap::new();
        flags.insert(RasterLayer::Quality, quality);
        let provider = FakeProvider { flags, ..Default::default() };
        let strategy = MaskStrategy::Raster(RasterRules {
            footprint_outside: None,
            quality: Some(QualityFlags::Bits(vec![25, 4])),
        });

        let raw = Array2::from_elem((4, 4), 10.0f32);
        let invalid = invalid_pixel_mask(&raw, &grid(), BandName::Nir, &strategy, &provider, 0.0).unwrap();
        assert!(invalid[[0, 0]], "saturated land pixel must be invalid");
        assert!(!invalid[[0, 1]], "land alone is valid");
        assert!(invalid[[1, 1]]);
        assert_eq!(invalid.iter().filter(|v| **v).count(), 2);
    }

    #[test]
    fn test_raster_cloud_bits() {
        let mut cloud = Array2::<u32>::zeros((4, 4));
        cloud[[0, 0]] = 1 << 0;
        cloud[[0, 1]] = 1 << 1;
        cloud[[0, 2]] = (1 << 1) | (1 << 30);
        let mut flags = HashMap::new();
        flags.insert(RasterLayer::Clouds, cloud);
        let provider = FakeProvider { flags, ..Default::default() };
        let rules = CloudRules::RasterBits { cirrus: vec![1] };

        let clouds = cloud_band(BandName::Clouds, &rules, &provider, &grid(), None, "S3").unwrap();
        assert_eq!(clouds.data.row(0).to_vec(), vec![1.0, 0.0, 1.0, 0.0]);
        let cirrus = cloud_band(BandName::Cirrus, &rules, &provider, &grid(), None, "S3").unwrap();
        assert_eq!(cirrus.data.row(0).to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
        let all = cloud_band(BandName::AllClouds, &rules, &provider, &grid(), None, "S3").unwrap();
        assert_eq!(all.data.sum(), 3.0);
    }
}
