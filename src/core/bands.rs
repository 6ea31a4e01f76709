//! Band identity registry
//!
//! Abstract, sensor-independent band names and the per-product map from
//! those names to native band descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::types::{ProductError, ProductResult};

/// Closed set of abstract band names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BandName {
    // Spectral
    CoastalAerosol,
    Blue,
    Green,
    Red,
    Vre1,
    Vre2,
    Vre3,
    Nir,
    NarrowNir,
    WaterVapour,
    SwirCirrus,
    Swir1,
    Swir2,
    Pan,
    // SAR polarizations
    Hh,
    Vv,
    Hv,
    Vh,
    // Synthetic mask bands
    RawClouds,
    Clouds,
    Shadows,
    Cirrus,
    AllClouds,
}

/// Kind of quantity a band carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandCategory {
    Spectral,
    Sar,
    Cloud,
}

const ALL_BANDS: [BandName; 23] = [
    BandName::CoastalAerosol,
    BandName::Blue,
    BandName::Green,
    BandName::Red,
    BandName::Vre1,
    BandName::Vre2,
    BandName::Vre3,
    BandName::Nir,
    BandName::NarrowNir,
    BandName::WaterVapour,
    BandName::SwirCirrus,
    BandName::Swir1,
    BandName::Swir2,
    BandName::Pan,
    BandName::Hh,
    BandName::Vv,
    BandName::Hv,
    BandName::Vh,
    BandName::RawClouds,
    BandName::Clouds,
    BandName::Shadows,
    BandName::Cirrus,
    BandName::AllClouds,
];

impl BandName {
    pub fn all() -> &'static [BandName] {
        &ALL_BANDS
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BandName::CoastalAerosol => "CA",
            BandName::Blue => "BLUE",
            BandName::Green => "GREEN",
            BandName::Red => "RED",
            BandName::Vre1 => "VRE_1",
            BandName::Vre2 => "VRE_2",
            BandName::Vre3 => "VRE_3",
            BandName::Nir => "NIR",
            BandName::NarrowNir => "NARROW_NIR",
            BandName::WaterVapour => "WV",
            BandName::SwirCirrus => "SWIR_CIRRUS",
            BandName::Swir1 => "SWIR_1",
            BandName::Swir2 => "SWIR_2",
            BandName::Pan => "PAN",
            BandName::Hh => "HH",
            BandName::Vv => "VV",
            BandName::Hv => "HV",
            BandName::Vh => "VH",
            BandName::RawClouds => "RAW_CLOUDS",
            BandName::Clouds => "CLOUDS",
            BandName::Shadows => "SHADOWS",
            BandName::Cirrus => "CIRRUS",
            BandName::AllClouds => "ALL_CLOUDS",
        }
    }

    pub fn category(&self) -> BandCategory {
        match self {
            BandName::Hh | BandName::Vv | BandName::Hv | BandName::Vh => BandCategory::Sar,
            BandName::RawClouds
            | BandName::Clouds
            | BandName::Shadows
            | BandName::Cirrus
            | BandName::AllClouds => BandCategory::Cloud,
            _ => BandCategory::Spectral,
        }
    }

    pub fn is_spectral(&self) -> bool {
        self.category() == BandCategory::Spectral
    }

    pub fn is_sar(&self) -> bool {
        self.category() == BandCategory::Sar
    }

    pub fn is_cloud(&self) -> bool {
        self.category() == BandCategory::Cloud
    }
}

impl fmt::Display for BandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BandName {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        let alias = match wanted.as_str() {
            "COASTAL_AEROSOL" => "CA",
            "NNIR" => "NARROW_NIR",
            "WATER_VAPOUR" => "WV",
            "SWIR1" => "SWIR_1",
            "SWIR2" => "SWIR_2",
            other => other,
        };
        ALL_BANDS
            .iter()
            .find(|b| b.as_str() == alias)
            .copied()
            .ok_or_else(|| ProductError::InvalidType(format!("'{}' is not a band name", s)))
    }
}

/// Spectral extent of an optical band, in nanometres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Wavelength {
    Center { center_nm: f64, fwhm_nm: f64 },
    Range { min_nm: f64, max_nm: f64 },
}

impl Wavelength {
    pub fn center(&self) -> f64 {
        match self {
            Wavelength::Center { center_nm, .. } => *center_nm,
            Wavelength::Range { min_nm, max_nm } => (min_nm + max_nm) / 2.0,
        }
    }
}

/// Per-product metadata for one abstract band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandDescriptor {
    pub name: BandName,
    /// Native identifier used in filenames (`B8A`, `Oa17`, `HH`)
    pub native_name: String,
    /// Native id, either a filename token (`8A`) or a 1-based band index (`3`)
    pub id: String,
    /// Nominal ground sampling distance in metres
    pub gsd: f64,
    pub wavelength: Option<Wavelength>,
}

impl BandDescriptor {
    pub fn spectral(name: BandName, native_name: &str, id: &str, gsd: f64, wavelength: Wavelength) -> Self {
        Self {
            name,
            native_name: native_name.to_string(),
            id: id.to_string(),
            gsd,
            wavelength: Some(wavelength),
        }
    }

    pub fn sar(name: BandName, id: &str, gsd: f64) -> Self {
        Self {
            name,
            native_name: name.as_str().to_string(),
            id: id.to_string(),
            gsd,
            wavelength: None,
        }
    }

    /// 1-based raster band index when the native id is numeric
    pub fn index(&self) -> Option<usize> {
        self.id.parse().ok()
    }
}

/// Map from abstract band name to the product's native descriptor.
/// Built once during band mapping, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandMap {
    bands: BTreeMap<BandName, BandDescriptor>,
}

impl BandMap {
    pub fn new<I: IntoIterator<Item = BandDescriptor>>(descriptors: I) -> Self {
        Self {
            bands: descriptors.into_iter().map(|d| (d.name, d)).collect(),
        }
    }

    pub fn contains(&self, band: BandName) -> bool {
        self.bands.contains_key(&band)
    }

    pub fn get(&self, band: BandName) -> Option<&BandDescriptor> {
        self.bands.get(&band)
    }

    pub fn names(&self) -> impl Iterator<Item = BandName> + '_ {
        self.bands.keys().copied()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BandDescriptor> {
        self.bands.values()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

/// Looks up `band` in a product's band map.
///
/// Fails with `UnknownBand` when the family does not define the band at
/// all. A defined band whose file is missing is reported later, by path
/// resolution, as `BandNotFound`.
pub fn resolve<'a>(band_map: &'a BandMap, band: BandName, product: &str) -> ProductResult<&'a BandDescriptor> {
    band_map.get(band).ok_or_else(|| ProductError::UnknownBand {
        band,
        product: product.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> BandMap {
        BandMap::new(vec![
            BandDescriptor::spectral(
                BandName::Red,
                "B04",
                "04",
                10.0,
                Wavelength::Center { center_nm: 665.0, fwhm_nm: 30.0 },
            ),
            BandDescriptor::sar(BandName::Hh, "HH", 8.0),
        ])
    }

    #[test]
    fn test_band_name_parsing() {
        for band in BandName::all() {
            assert_eq!(band.as_str().parse::<BandName>().unwrap(), *band);
        }
        assert_eq!("swir1".parse::<BandName>().unwrap(), BandName::Swir1);
        assert!("B04".parse::<BandName>().unwrap_err().is_invalid_type());
    }

    #[test]
    fn test_resolve_unknown_band() {
        let map = sample_map();
        assert_eq!(resolve(&map, BandName::Red, "S2").unwrap().native_name, "B04");
        let err = resolve(&map, BandName::SwirCirrus, "S2B_MSIL2A").unwrap_err();
        assert!(err.to_string().contains("SWIR_CIRRUS"));
        assert!(matches!(err, ProductError::UnknownBand { band: BandName::SwirCirrus, .. }));
    }

    #[test]
    fn test_descriptor_index() {
        let map = sample_map();
        assert_eq!(map.get(BandName::Red).unwrap().index(), Some(4));
        assert!(map.get(BandName::Red).unwrap().wavelength.is_some());
        assert_eq!(map.get(BandName::Hh).unwrap().index(), None);
    }

    #[test]
    fn test_categories() {
        assert!(BandName::Vh.is_sar());
        assert!(BandName::AllClouds.is_cloud());
        assert!(BandName::NarrowNir.is_spectral());
    }
}
