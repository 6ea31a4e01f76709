//! Radiometric converter: raw digital numbers to physical units.

use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::core::bands::BandName;
use crate::io::annotation::CalibrationLut;
use crate::types::{ProductError, ProductResult, NODATA};

/// Backscatter convention of a SAR calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationType {
    Sigma0,
    Beta0,
    Gamma0,
    Dn,
}

impl CalibrationType {
    /// RADARSAT-2 look-up table holding the gains for this convention
    pub fn lut_file_name(&self) -> Option<&'static str> {
        match self {
            CalibrationType::Sigma0 => Some("lutSigma.xml"),
            CalibrationType::Beta0 => Some("lutBeta.xml"),
            CalibrationType::Gamma0 => Some("lutGamma.xml"),
            CalibrationType::Dn => None,
        }
    }
}

/// Fallback constants of one processing generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefault {
    /// First baseline this entry applies to
    pub min_baseline: f64,
    pub offset: f64,
    pub quantification: f64,
}

/// Entry of `table` for `baseline`: the last one whose `min_baseline` is not above it
pub fn generation_default(table: &[GenerationDefault], baseline: f64) -> Option<&GenerationDefault> {
    table.iter().rev().find(|d| d.min_baseline <= baseline)
}

/// Origin of the numbers in an [`OpticalCalibration`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSource {
    Metadata,
    GenerationDefault,
}

/// `physical = (raw + offset) / quantification`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticalCalibration {
    pub offset: f64,
    pub quantification: f64,
    pub source: CalibrationSource,
}

impl OpticalCalibration {
    pub fn new(offset: f64, quantification: f64) -> ProductResult<Self> {
        if !quantification.is_finite() || quantification <= 0.0 {
            return Err(ProductError::invalid_metadata(
                "quantification",
                format!("quantification value must be strictly positive, got {}", quantification),
            ));
        }
        if !offset.is_finite() {
            return Err(ProductError::invalid_metadata("offset", format!("offset must be finite, got {}", offset)));
        }
        Ok(Self {
            offset,
            quantification,
            source: CalibrationSource::Metadata,
        })
    }

    pub fn from_generation_default(default: &GenerationDefault) -> Self {
        Self {
            offset: default.offset,
            quantification: default.quantification,
            source: CalibrationSource::GenerationDefault,
        }
    }

    pub fn to_physical(&self, raw: f32) -> f32 {
        ((raw as f64 + self.offset) / self.quantification) as f32
    }

    pub fn to_raw(&self, physical: f32) -> f32 {
        (physical as f64 * self.quantification - self.offset) as f32
    }
}

#[derive(Debug, Clone)]
pub enum SarCalibration {
    /// `(DN² + offset) / gain[col]`
    RangeLut { lut: CalibrationLut, kind: CalibrationType },
    /// `(DN / rescaling_factor)² / calibration_constant`
    Constant {
        rescaling_factor: f64,
        calibration_constant: f64,
        kind: CalibrationType,
    },
    /// Plain intensity `DN²`, used when calibration metadata is unavailable
    Uncalibrated,
}

/// Calibration of one band, as resolved by its sensor family
#[derive(Debug, Clone)]
pub enum Calibration {
    Optical(OpticalCalibration),
    Sar(SarCalibration),
    /// Samples are already in physical units (preprocessed bands)
    Identity,
}

/// Converted samples plus the physical value a raw zero maps to
#[derive(Debug, Clone)]
pub struct Calibrated {
    pub data: Array2<f32>,
    pub physical_nodata: f32,
}

/// Convert `raw` to physical units.
///
/// Optical: reflectance. SAR: backscatter intensity, with `raw` holding
/// amplitude digital numbers.
pub fn to_physical_units(raw: &Array2<f32>, band: BandName, calibration: &Calibration) -> ProductResult<Calibrated> {
    match calibration {
        Calibration::Optical(cal) => {
            if band.is_sar() {
                return Err(ProductError::InvalidType(format!(
                    "optical calibration cannot be applied to SAR band {}",
                    band
                )));
            }
            log::debug!(
                "Converting {} to reflectance: offset {}, quantification {}",
                band,
                cal.offset,
                cal.quantification
            );
            let offset = cal.offset;
            let quantification = cal.quantification;
            Ok(Calibrated {
                data: raw.mapv(|v| ((v as f64 + offset) / quantification) as f32),
                physical_nodata: cal.to_physical(0.0),
            })
        }
        Calibration::Sar(cal) => {
            if !band.is_sar() {
                return Err(ProductError::InvalidType(format!(
                    "SAR calibration cannot be applied to band {}",
                    band
                )));
            }
            Ok(Calibrated {
                data: apply_sar_calibration(raw, cal)?,
                physical_nodata: NODATA,
            })
        }
        Calibration::Identity => Ok(Calibrated {
            data: raw.clone(),
            physical_nodata: NODATA,
        }),
    }
}

fn apply_sar_calibration(raw: &Array2<f32>, cal: &SarCalibration) -> ProductResult<Array2<f32>> {
    match cal {
        SarCalibration::RangeLut { lut, kind } => {
            log::info!("Applying radiometric calibration: {:?}", kind);
            let (_, cols) = raw.dim();
            let gains: Array1<f32> = (0..cols).map(|c| lut.gain_at(c, cols)).collect();
            let offset = lut.offset;
            let calibrate = |dn: &f32, gain: &f32| (dn * dn + offset) / gain;

            #[cfg(feature = "parallel")]
            let calibrated = Zip::from(raw).and_broadcast(&gains).par_map_collect(calibrate);
            #[cfg(not(feature = "parallel"))]
            let calibrated = Zip::from(raw).and_broadcast(&gains).map_collect(calibrate);

            Ok(calibrated)
        }
        SarCalibration::Constant {
            rescaling_factor,
            calibration_constant,
            kind,
        } => {
            if *rescaling_factor <= 0.0 || *calibration_constant <= 0.0 {
                return Err(ProductError::invalid_metadata(
                    "calibration_constant",
                    format!(
                        "rescaling factor {} and calibration constant {} must be positive",
                        rescaling_factor, calibration_constant
                    ),
                ));
            }
            log::info!("Applying radiometric calibration: {:?}", kind);
            let f = *rescaling_factor as f32;
            let k = *calibration_constant as f32;
            Ok(raw.mapv(|dn| (dn / f).powi(2) / k))
        }
        SarCalibration::Uncalibrated => Ok(raw.mapv(|dn| dn * dn)),
    }
}
