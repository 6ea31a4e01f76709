//! Spectral index evaluator.
//!
//! Every index is a pixelwise formula over an explicit list of bands.
//! Operands are passed to the formula in the order of that list.

use ndarray::{Array2, Zip};
use std::collections::BTreeMap;

use crate::core::bands::BandName;
use crate::types::{BandArray, ProductError, ProductResult, NODATA};

use BandName::{Blue, Green, NarrowNir, Nir, Red, Swir1, Swir2, Vre1, Vre2};

const MAX_OPERANDS: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct SpectralIndex {
    pub name: &'static str,
    pub bands: &'static [BandName],
    formula: fn(&[f32]) -> f32,
}

impl SpectralIndex {
    /// Value of the index for one pixel, operands in `bands` order
    pub fn compute(&self, operands: &[f32]) -> f32 {
        (self.formula)(operands)
    }
}

fn normalized_difference(a: f32, b: f32) -> f32 {
    (a - b) / (a + b)
}

pub static INDICES: &[SpectralIndex] = &[
    SpectralIndex { name: "NDVI", bands: &[Nir, Red], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "NDWI", bands: &[Green, Nir], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "MNDWI", bands: &[Green, Swir1], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "NBR", bands: &[NarrowNir, Swir2], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "NDMI", bands: &[Nir, Swir1], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "GNDVI", bands: &[Nir, Green], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "NDRE2", bands: &[Nir, Vre1], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "NDRE3", bands: &[Nir, Vre2], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "NDGRI", bands: &[Green, Red], formula: |v| normalized_difference(v[0], v[1]) },
    SpectralIndex { name: "RGI", bands: &[Red, Green], formula: |v| v[0] / v[1] },
    SpectralIndex { name: "CIG", bands: &[Nir, Green], formula: |v| v[0] / v[1] - 1.0 },
    SpectralIndex { name: "DSWI", bands: &[Nir, Green, Swir1, Red], formula: |v| (v[0] + v[1]) / (v[2] + v[3]) },
    SpectralIndex { name: "SRSWIR", bands: &[Swir1, Swir2], formula: |v| v[0] / v[1] },
    SpectralIndex { name: "RDI", bands: &[Swir2, NarrowNir], formula: |v| v[0] / v[1] },
    SpectralIndex {
        name: "BAI",
        bands: &[Red, Nir],
        formula: |v| 1.0 / ((0.1 - v[0]).powi(2) + (0.06 - v[1]).powi(2)),
    },
    SpectralIndex {
        name: "AWEINSH",
        bands: &[Green, Swir1, Nir, Swir2],
        formula: |v| 4.0 * (v[0] - v[1]) - (0.25 * v[2] + 2.75 * v[3]),
    },
    SpectralIndex {
        name: "AWEISH",
        bands: &[Blue, Green, Nir, Swir1, Swir2],
        formula: |v| v[0] + 2.5 * v[1] - 1.5 * (v[2] + v[3]) - 0.25 * v[4],
    },
    SpectralIndex {
        name: "WI",
        bands: &[Green, Red, Nir, Swir1, Swir2],
        formula: |v| 1.7204 + 171.0 * v[0] + 3.0 * v[1] - 70.0 * v[2] - 45.0 * v[3] - 71.0 * v[4],
    },
    SpectralIndex {
        name: "AFRI_1_6",
        bands: &[Nir, Swir1],
        formula: |v| normalized_difference(v[0], 0.66 * v[1]),
    },
    SpectralIndex {
        name: "AFRI_2_1",
        bands: &[Nir, Swir2],
        formula: |v| normalized_difference(v[0], 0.5 * v[1]),
    },
    SpectralIndex {
        name: "BSI",
        bands: &[Swir1, Red, Nir, Blue],
        formula: |v| normalized_difference(v[0] + v[1], v[2] + v[3]),
    },
    SpectralIndex {
        name: "TCBRI",
        bands: &[Blue, Green, Red, Nir, Swir1, Swir2],
        formula: |v| 0.3037 * v[0] + 0.2793 * v[1] + 0.4743 * v[2] + 0.5585 * v[3] + 0.5082 * v[4] + 0.1863 * v[5],
    },
    SpectralIndex {
        name: "TCGRE",
        bands: &[Blue, Green, Red, Nir, Swir1, Swir2],
        formula: |v| -0.2848 * v[0] - 0.2435 * v[1] - 0.5436 * v[2] + 0.7243 * v[3] + 0.0840 * v[4] - 0.1800 * v[5],
    },
    SpectralIndex {
        name: "TCWET",
        bands: &[Blue, Green, Red, Nir, Swir1, Swir2],
        formula: |v| 0.1509 * v[0] + 0.1973 * v[1] + 0.3279 * v[2] + 0.3406 * v[3] - 0.7112 * v[4] - 0.4572 * v[5],
    },
    SpectralIndex {
        name: "GLI",
        bands: &[Green, Red, Blue],
        formula: |v| (2.0 * v[0] - v[1] - v[2]) / (2.0 * v[0] + v[1] + v[2]),
    },
    // Redness index, red edge against green
    SpectralIndex { name: "RI", bands: &[Vre1, Green], formula: |v| normalized_difference(v[0], v[1]) },
];

/// Index definition by case-insensitive name
pub fn get_index(name: &str) -> ProductResult<&'static SpectralIndex> {
    INDICES
        .iter()
        .find(|idx| idx.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| ProductError::InvalidType(format!("unknown spectral index '{}'", name)))
}

pub fn all_index_names() -> Vec<&'static str> {
    INDICES.iter().map(|idx| idx.name).collect()
}

/// Bands an index needs
pub fn needed_bands(name: &str) -> ProductResult<&'static [BandName]> {
    Ok(get_index(name)?.bands)
}

/// Evaluate index `name` over `bands`.
///
/// The result is nodata wherever an operand is nodata or the formula is
/// not finite (division by zero included).
pub fn evaluate(name: &str, bands: &BTreeMap<BandName, BandArray>) -> ProductResult<BandArray> {
    let index = get_index(name)?;

    let operands = index
        .bands
        .iter()
        .map(|band| {
            bands.get(band).ok_or_else(|| ProductError::MissingBand {
                band: *band,
                index: index.name.to_string(),
            })
        })
        .collect::<ProductResult<Vec<&BandArray>>>()?;

    let reference = operands[0];
    if let Some(other) = operands.iter().find(|b| !b.grid.same_grid(&reference.grid)) {
        return Err(ProductError::GridMismatch(format!(
            "{} operands are on different grids: {:?} vs {:?}",
            index.name,
            reference.shape(),
            other.shape()
        )));
    }

    log::debug!("Computing {} from {:?}", index.name, index.bands);
    let arrays: Vec<&Array2<f32>> = operands.iter().map(|b| &b.data).collect();
    let mut result = Array2::<f32>::from_elem(reference.shape(), NODATA);

    let compute = |(r, c): (usize, usize), out: &mut f32| {
        let mut values = [0.0f32; MAX_OPERANDS];
        for (i, array) in arrays.iter().enumerate() {
            let v = array[[r, c]];
            if v.is_nan() {
                return;
            }
            values[i] = v;
        }
        let value = index.compute(&values[..arrays.len()]);
        if value.is_finite() {
            *out = value;
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut result).par_for_each(compute);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut result).for_each(compute);

    BandArray::new(result, reference.grid)
}
