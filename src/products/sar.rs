//! Helpers shared by the SAR families.
//!
//! SAR rasters are not delivered on a map grid. Each band is calibrated,
//! its raw zeros masked, then orthorectified from the geolocation grid
//! onto the product grid and written to the output directory. Later reads
//! use the written file.

use ndarray::{Array2, Zip};
use num_complex::Complex32;

use crate::core::bands::{BandDescriptor, BandMap, BandName};
use crate::core::calibrate::{to_physical_units, Calibration};
use crate::core::geocode::{orthorectify_flags, orthorectify_onto, Binning, TiePointGrid};
use crate::core::masks::{invalid_pixel_mask, MaskProvider, MaskStrategy, RasterLayer, VectorLayer};
use crate::core::product::{FamilyKind, ProductContext};
use crate::io::raster::{FlagRaster, RasterData};
use crate::io::vector::MaskFeature;
use crate::types::{BandArray, GeoTransform, GridSpec, ProductError, ProductResult};

/// Polarization band of a name or metadata token
pub fn polarization(token: &str) -> Option<BandName> {
    match token.trim().to_ascii_uppercase().as_str() {
        "HH" => Some(BandName::Hh),
        "VV" => Some(BandName::Vv),
        "HV" => Some(BandName::Hv),
        "VH" => Some(BandName::Vh),
        _ => None,
    }
}

pub fn sar_band_map(polarizations: &[BandName], gsd: f64) -> BandMap {
    BandMap::new(
        polarizations
            .iter()
            .map(|pol| BandDescriptor::sar(*pol, pol.as_str(), gsd)),
    )
}

/// Amplitude samples: band 1 of a detected raster, `|I + jQ|` of a complex one
pub fn amplitude(raster: &RasterData) -> ProductResult<Array2<f32>> {
    if raster.count() < 2 {
        return raster.band(1);
    }
    let re = raster.band(1)?;
    let im = raster.band(2)?;
    Ok(Zip::from(&re).and(&im).map_collect(|&i, &q| Complex32::new(i, q).norm()))
}

fn pixel_size(size: f64) -> String {
    if size.fract() == 0.0 {
        format!("{:.0}", size)
    } else {
        format!("{:.2}", size)
    }
}

/// Name of a preprocessed file in the output directory, keyed by both
/// pixel sizes of `target`
pub fn cached_file_name(condensed_name: &str, label: &str, target: &GridSpec) -> String {
    let x = target.transform.pixel_width.abs();
    let y = target.transform.pixel_height.abs();
    let res = if x == y {
        pixel_size(x)
    } else {
        format!("{}x{}", pixel_size(x), pixel_size(y))
    };
    format!("{}_{}_{}m.tif", condensed_name, label, res)
}

struct NoAuxiliaryMasks;

impl MaskProvider for NoAuxiliaryMasks {
    fn vector_layer(&self, _layer: VectorLayer, _band: BandName) -> ProductResult<Option<Vec<MaskFeature>>> {
        Ok(None)
    }

    fn raster_layer(&self, layer: RasterLayer, band: BandName, _grid: &GridSpec) -> ProductResult<RasterData> {
        Err(ProductError::InvalidType(format!("no {:?} mask for {}", layer, band)))
    }

    fn flag_layer(&self, layer: RasterLayer, band: BandName, _grid: &GridSpec) -> ProductResult<FlagRaster> {
        Err(ProductError::InvalidType(format!("no {:?} flags for {}", layer, band)))
    }
}

/// Backscatter of `raw` amplitudes with raw zeros set to nodata
pub fn calibrate_sar(raw: &Array2<f32>, band: BandName, calibration: &Calibration) -> ProductResult<Array2<f32>> {
    let calibrated = to_physical_units(raw, band, calibration)?;
    let (rows, cols) = raw.dim();
    // Image geometry: one unit per pixel, no CRS
    let grid = GridSpec::new(GeoTransform::new(0.0, 1.0, 0.0, 1.0), cols, rows, None);
    let invalid = invalid_pixel_mask(raw, &grid, band, &MaskStrategy::RawZero, &NoAuxiliaryMasks, 0.0)?;
    let mut array = BandArray::new(calibrated.data, grid)?;
    array.set_invalid(&invalid);
    Ok(array.data)
}

/// Path of `file_name` in the output directory, produced on first use.
///
/// `produce` returns the image in sensor geometry with its geolocation
/// grid. An existing file is reused as is.
pub fn preprocess_band<F>(
    ctx: &ProductContext,
    file_name: &str,
    target: &GridSpec,
    binning: Binning,
    produce: F,
) -> ProductResult<String>
where
    F: FnOnce() -> ProductResult<(Array2<f32>, TiePointGrid)>,
{
    let path = ctx.output_path(file_name)?;
    let path_str = path.to_string_lossy().into_owned();
    if path.exists() {
        log::debug!("Reusing preprocessed {}", path_str);
        return Ok(path_str);
    }

    let (image, tie_points) = produce()?;
    let binned = orthorectify_onto(&image, &tie_points, target, binning)?;
    let mut raster = RasterData::from_band(binned, target.transform, target.crs);
    raster.nodata = Some(f64::NAN);
    ctx.raster_io().write(&path, &raster)?;
    log::info!("Wrote preprocessed band {}", path_str);
    Ok(path_str)
}

/// Integer counterpart of [`preprocess_band`] for quality and cloud
/// bitfields, written as a UInt32 raster
pub fn preprocess_flags<F>(ctx: &ProductContext, file_name: &str, target: &GridSpec, produce: F) -> ProductResult<String>
where
    F: FnOnce() -> ProductResult<(Array2<u32>, TiePointGrid)>,
{
    let path = ctx.output_path(file_name)?;
    let path_str = path.to_string_lossy().into_owned();
    if path.exists() {
        log::debug!("Reusing preprocessed {}", path_str);
        return Ok(path_str);
    }

    let (flags, tie_points) = produce()?;
    let binned = orthorectify_flags(&flags, &tie_points, target)?;
    ctx.raster_io()
        .write_flags(&path, &FlagRaster::from_band(binned, target.transform, target.crs))?;
    log::info!("Wrote preprocessed flags {}", path_str);
    Ok(path_str)
}

/// Error for optical-only metadata requested on a SAR product
pub fn not_optical(kind: FamilyKind, what: &str) -> ProductError {
    ProductError::InvalidType(format!("{} products have no {}", kind, what))
}
