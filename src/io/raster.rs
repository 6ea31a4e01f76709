//! Raster I/O collaborator.
//!
//! Products never open raster files themselves; they go through a
//! [`RasterIo`] implementation. The GDAL backend is available with the
//! `gdal` cargo feature, tests plug in in-memory fakes.

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{Crs, GeoTransform, GridSpec, ProductError, ProductResult};

/// Resampling kernel used when a read changes the pixel size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resampling {
    Nearest,
    Bilinear,
    Average,
}

/// Output pixel grid of a read. Resolution and size are two views of the
/// same request, so only one of them can be given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PixelRequest {
    Native,
    Resolution(f64),
    Size { width: usize, height: usize },
}

impl PixelRequest {
    /// Output dimensions for a raster of `width` x `height` at `native_resolution`
    pub fn target_size(&self, width: usize, height: usize, native_resolution: f64) -> (usize, usize) {
        match *self {
            PixelRequest::Native => (width, height),
            PixelRequest::Resolution(res) => {
                let factor = native_resolution / res;
                (
                    ((width as f64 * factor).round() as usize).max(1),
                    ((height as f64 * factor).round() as usize).max(1),
                )
            }
            PixelRequest::Size { width, height } => (width, height),
        }
    }

    /// Hashable form used as a cache key
    pub fn key(&self) -> (u8, u64, u64) {
        match *self {
            PixelRequest::Native => (0, 0, 0),
            PixelRequest::Resolution(res) => (1, res.to_bits(), 0),
            PixelRequest::Size { width, height } => (2, width as u64, height as u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOptions {
    pub request: PixelRequest,
    pub resampling: Resampling,
    /// 1-based band indexes, all bands when `None`
    pub indexes: Option<Vec<usize>>,
}

impl ReadOptions {
    pub fn new(request: PixelRequest, resampling: Resampling) -> Self {
        Self { request, resampling, indexes: None }
    }

    pub fn native() -> Self {
        Self::new(PixelRequest::Native, Resampling::Nearest)
    }

    pub fn with_indexes(mut self, indexes: Vec<usize>) -> Self {
        self.indexes = Some(indexes);
        self
    }
}

/// Header information of a raster file
#[derive(Debug, Clone, PartialEq)]
pub struct RasterInfo {
    pub width: usize,
    pub height: usize,
    pub count: usize,
    pub transform: Option<GeoTransform>,
    pub crs: Option<Crs>,
    pub nodata: Option<f64>,
}

impl RasterInfo {
    pub fn grid(&self) -> Option<GridSpec> {
        self.transform
            .map(|t| GridSpec::new(t, self.width, self.height, self.crs))
    }
}

/// Samples read from a raster, shaped `(bands, rows, cols)`
#[derive(Debug, Clone, PartialEq)]
pub struct RasterData {
    pub data: Array3<f32>,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
    pub nodata: Option<f64>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
}

impl RasterData {
    /// Single-band raster from a 2-D array
    pub fn from_band(data: Array2<f32>, transform: GeoTransform, crs: Option<Crs>) -> Self {
        Self {
            data: data.insert_axis(Axis(0)),
            transform,
            crs,
            nodata: None,
            scale: None,
            offset: None,
        }
    }

    pub fn count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn grid(&self) -> GridSpec {
        let (_, rows, cols) = self.data.dim();
        GridSpec::new(self.transform, cols, rows, self.crs)
    }

    /// Copy of band `index` (1-based)
    pub fn band(&self, index: usize) -> ProductResult<Array2<f32>> {
        if index == 0 || index > self.count() {
            return Err(ProductError::Raster(format!(
                "band index {} out of range (raster has {} bands)",
                index,
                self.count()
            )));
        }
        Ok(self.data.index_axis(Axis(0), index - 1).to_owned())
    }

    /// Band `index` with scale and offset applied
    pub fn scaled_band(&self, index: usize) -> ProductResult<Array2<f32>> {
        let scale = self.scale.unwrap_or(1.0) as f32;
        let offset = self.offset.unwrap_or(0.0) as f32;
        Ok(self.band(index)?.mapv(|v| v * scale + offset))
    }
}

/// Integer flag samples, shaped `(bands, rows, cols)`.
///
/// Quality and cloud bitfields stay unsigned from the file to the bit
/// test: a 32-bit flag word does not survive a trip through `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagRaster {
    pub data: Array3<u32>,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
}

impl FlagRaster {
    pub fn from_band(data: Array2<u32>, transform: GeoTransform, crs: Option<Crs>) -> Self {
        Self {
            data: data.insert_axis(Axis(0)),
            transform,
            crs,
        }
    }

    pub fn count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// Copy of band `index` (1-based)
    pub fn band(&self, index: usize) -> ProductResult<Array2<u32>> {
        if index == 0 || index > self.count() {
            return Err(ProductError::Raster(format!(
                "flag band index {} out of range (raster has {} bands)",
                index,
                self.count()
            )));
        }
        Ok(self.data.index_axis(Axis(0), index - 1).to_owned())
    }
}

pub trait RasterIo: Send + Sync {
    fn info(&self, path: &str) -> ProductResult<RasterInfo>;

    fn read(&self, path: &str, options: &ReadOptions) -> ProductResult<RasterData>;

    /// Read as unsigned integers, without scale or offset
    fn read_flags(&self, path: &str, options: &ReadOptions) -> ProductResult<FlagRaster>;

    fn write(&self, path: &Path, raster: &RasterData) -> ProductResult<()>;

    /// Write a UInt32 raster
    fn write_flags(&self, path: &Path, raster: &FlagRaster) -> ProductResult<()>;
}

#[cfg(feature = "gdal")]
pub use self::gdal_backend::GdalRasterIo;

#[cfg(feature = "gdal")]
mod gdal_backend {
    use super::*;
    use gdal::raster::ResampleAlg;
    use gdal::spatial_ref::SpatialRef;
    use gdal::{Dataset, DriverManager};

    /// Raster backend on top of GDAL, handles `/vsizip/` and NetCDF/HDF5 subdataset paths
    #[derive(Debug, Default, Clone, Copy)]
    pub struct GdalRasterIo;

    fn crs_of(dataset: &Dataset) -> Option<Crs> {
        let srs = dataset.spatial_ref().ok()?;
        let code = srs.auth_code().ok()?;
        u32::try_from(code).ok().map(Crs::from_epsg)
    }

    fn resample_alg(resampling: Resampling) -> ResampleAlg {
        match resampling {
            Resampling::Nearest => ResampleAlg::NearestNeighbour,
            Resampling::Bilinear => ResampleAlg::Bilinear,
            Resampling::Average => ResampleAlg::Average,
        }
    }

    fn band_indexes(dataset: &Dataset, options: &ReadOptions) -> Vec<usize> {
        options
            .indexes
            .clone()
            .unwrap_or_else(|| (1..=dataset.raster_count() as usize).collect())
    }

    fn geo_transform(dataset: &Dataset) -> GeoTransform {
        dataset
            .geo_transform()
            .map(GeoTransform::from_gdal)
            .unwrap_or_else(|_| GeoTransform::new(0.0, 1.0, 0.0, 1.0))
    }

    impl RasterIo for GdalRasterIo {
        fn info(&self, path: &str) -> ProductResult<RasterInfo> {
            let dataset = Dataset::open(path)?;
            let (width, height) = dataset.raster_size();
            let nodata = dataset.rasterband(1)?.no_data_value();
            Ok(RasterInfo {
                width,
                height,
                count: dataset.raster_count() as usize,
                transform: dataset.geo_transform().ok().map(GeoTransform::from_gdal),
                crs: crs_of(&dataset),
                nodata,
            })
        }

        fn read(&self, path: &str, options: &ReadOptions) -> ProductResult<RasterData> {
            let dataset = Dataset::open(path)?;
            let (width, height) = dataset.raster_size();
            let transform = geo_transform(&dataset);

            let (out_w, out_h) = options
                .request
                .target_size(width, height, transform.resolution());
            let alg = resample_alg(options.resampling);
            let indexes = band_indexes(&dataset, options);

            let mut data = Array3::<f32>::zeros((indexes.len(), out_h, out_w));
            let mut nodata = None;
            let mut scale = None;
            let mut offset = None;
            for (i, index) in indexes.iter().enumerate() {
                let band = dataset.rasterband(*index as isize)?;
                nodata = nodata.or(band.no_data_value());
                scale = scale.or(band.scale());
                offset = offset.or(band.offset());
                let buffer = band.read_as::<f32>((0, 0), (width, height), (out_w, out_h), Some(alg))?;
                let array = Array2::from_shape_vec((out_h, out_w), buffer.data)
                    .map_err(|e| ProductError::Raster(format!("Shape error: {}", e)))?;
                data.index_axis_mut(Axis(0), i).assign(&array);
            }

            log::debug!("Read {} band(s) of {} at {}x{}", indexes.len(), path, out_w, out_h);
            Ok(RasterData {
                data,
                transform: transform.scaled(width as f64 / out_w as f64, height as f64 / out_h as f64),
                crs: crs_of(&dataset),
                nodata,
                scale,
                offset,
            })
        }

        fn read_flags(&self, path: &str, options: &ReadOptions) -> ProductResult<FlagRaster> {
            let dataset = Dataset::open(path)?;
            let (width, height) = dataset.raster_size();
            let transform = geo_transform(&dataset);
            let (out_w, out_h) = options
                .request
                .target_size(width, height, transform.resolution());
            let indexes = band_indexes(&dataset, options);

            let mut data = Array3::<u32>::zeros((indexes.len(), out_h, out_w));
            for (i, index) in indexes.iter().enumerate() {
                let band = dataset.rasterband(*index as isize)?;
                // Flags are categorical: never interpolate them
                let buffer = band.read_as::<u32>(
                    (0, 0),
                    (width, height),
                    (out_w, out_h),
                    Some(ResampleAlg::NearestNeighbour),
                )?;
                let array = Array2::from_shape_vec((out_h, out_w), buffer.data)
                    .map_err(|e| ProductError::Raster(format!("Shape error: {}", e)))?;
                data.index_axis_mut(Axis(0), i).assign(&array);
            }

            log::debug!("Read {} flag band(s) of {} at {}x{}", indexes.len(), path, out_w, out_h);
            Ok(FlagRaster {
                data,
                transform: transform.scaled(width as f64 / out_w as f64, height as f64 / out_h as f64),
                crs: crs_of(&dataset),
            })
        }

        fn write_flags(&self, path: &Path, raster: &FlagRaster) -> ProductResult<()> {
            let (count, rows, cols) = raster.data.dim();
            let driver = DriverManager::get_driver_by_name("GTiff")?;
            let mut dataset = driver.create_with_band_type::<u32, _>(path, cols as isize, rows as isize, count as isize)?;
            dataset.set_geo_transform(&raster.transform.to_gdal())?;
            if let Some(crs) = raster.crs {
                dataset.set_spatial_ref(&SpatialRef::from_epsg(crs.epsg)?)?;
            }
            for i in 0..count {
                let mut band = dataset.rasterband(i as isize + 1)?;
                let values: Vec<u32> = raster.data.index_axis(Axis(0), i).iter().copied().collect();
                let mut buffer = gdal::raster::Buffer::new((cols, rows), values);
                band.write((0, 0), (cols, rows), &mut buffer)?;
            }
            Ok(())
        }

        fn write(&self, path: &Path, raster: &RasterData) -> ProductResult<()> {
            let (count, rows, cols) = raster.data.dim();
            let driver = DriverManager::get_driver_by_name("GTiff")?;
            let mut dataset = driver.create_with_band_type::<f32, _>(path, cols as isize, rows as isize, count as isize)?;
            dataset.set_geo_transform(&raster.transform.to_gdal())?;
            if let Some(crs) = raster.crs {
                dataset.set_spatial_ref(&SpatialRef::from_epsg(crs.epsg)?)?;
            }
            for i in 0..count {
                let mut band = dataset.rasterband(i as isize + 1)?;
                band.set_no_data_value(Some(f64::NAN))?;
                let values: Vec<f32> = raster.data.index_axis(Axis(0), i).iter().copied().collect();
                let mut buffer = gdal::raster::Buffer::new((cols, rows), values);
                band.write((0, 0), (cols, rows), &mut buffer)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_size() {
        assert_eq!(PixelRequest::Native.target_size(100, 50, 10.0), (100, 50));
        assert_eq!(PixelRequest::Resolution(20.0).target_size(100, 50, 10.0), (50, 25));
        assert_eq!(PixelRequest::Size { width: 7, height: 3 }.target_size(100, 50, 10.0), (7, 3));
        assert_ne!(PixelRequest::Resolution(20.0).key(), PixelRequest::Resolution(10.0).key());
    }

    #[test]
    fn test_band_access() {
        let raster = RasterData::from_band(
            Array2::from_elem((2, 3), 5.0),
            GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            None,
        );
        assert_eq!(raster.count(), 1);
        assert_eq!(raster.band(1).unwrap()[[1, 2]], 5.0);
        assert!(raster.band(2).is_err());
        assert_eq!(raster.grid().shape(), (2, 3));
    }

    #[test]
    fn test_flag_band_keeps_every_bit() {
        let word = (1u32 << 31) | (1 << 4);
        let flags = FlagRaster::from_band(Array2::from_elem((1, 1), word), GeoTransform::new(0.0, 1.0, 0.0, -1.0), None);
        assert_eq!(flags.count(), 1);
        assert_eq!(flags.band(1).unwrap()[[0, 0]], word);
        assert!(flags.band(0).is_err());
    }
}
