//! Shared fixtures for the integration tests: an in-memory raster backend
//! that counts its calls, a log capture and synthetic product folders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use eobands::{
    Crs, FlagRaster, GeoTransform, IoBackends, Product, ProductError, ProductResult, RasterData, RasterInfo,
    RasterIo, ReadOptions, ReaderConfig,
};
use ndarray::{Array2, Array3, Axis};
use tempfile::TempDir;

/// Raster backend serving registered arrays, keyed by path
#[derive(Default)]
pub struct MemoryRasterIo {
    rasters: Mutex<HashMap<String, RasterData>>,
    flags: Mutex<HashMap<String, FlagRaster>>,
    info_calls: Mutex<HashMap<String, usize>>,
    read_calls: Mutex<HashMap<String, usize>>,
}

impl MemoryRasterIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, raster: RasterData) {
        self.rasters.lock().expect("raster store poisoned").insert(path.into(), raster);
    }

    pub fn insert_flags(&self, path: impl Into<String>, raster: FlagRaster) {
        self.flags.lock().expect("flag store poisoned").insert(path.into(), raster);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.rasters.lock().expect("raster store poisoned").contains_key(path)
    }

    pub fn contains_flags(&self, path: &str) -> bool {
        self.flags.lock().expect("flag store poisoned").contains_key(path)
    }

    pub fn info_count(&self, path: &str) -> usize {
        *self.info_calls.lock().expect("counter poisoned").get(path).unwrap_or(&0)
    }

    pub fn read_count(&self, path: &str) -> usize {
        *self.read_calls.lock().expect("counter poisoned").get(path).unwrap_or(&0)
    }

    fn count(counter: &Mutex<HashMap<String, usize>>, path: &str) {
        *counter.lock().expect("counter poisoned").entry(path.to_string()).or_insert(0) += 1;
    }

    fn get(&self, path: &str) -> ProductResult<RasterData> {
        self.rasters
            .lock()
            .expect("raster store poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| ProductError::Raster(format!("{} is not registered", path)))
    }

    fn get_flags(&self, path: &str) -> ProductResult<FlagRaster> {
        self.flags
            .lock()
            .expect("flag store poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| ProductError::Raster(format!("{} has no flag raster registered", path)))
    }
}

fn zero_based(indexes: &[usize]) -> Vec<usize> {
    indexes.iter().map(|i| i - 1).collect()
}

impl RasterIo for MemoryRasterIo {
    fn info(&self, path: &str) -> ProductResult<RasterInfo> {
        Self::count(&self.info_calls, path);
        let raster = self.get(path)?;
        let (count, height, width) = raster.data.dim();
        Ok(RasterInfo {
            width,
            height,
            count,
            transform: Some(raster.transform),
            crs: raster.crs,
            nodata: raster.nodata,
        })
    }

    /// Stored samples as is: resampling to the requested size is left to the caller
    fn read(&self, path: &str, options: &ReadOptions) -> ProductResult<RasterData> {
        Self::count(&self.read_calls, path);
        let mut raster = self.get(path)?;
        if let Some(indexes) = &options.indexes {
            raster.data = raster.data.select(Axis(0), &zero_based(indexes));
        }
        Ok(raster)
    }

    fn read_flags(&self, path: &str, options: &ReadOptions) -> ProductResult<FlagRaster> {
        Self::count(&self.read_calls, path);
        let mut raster = self.get_flags(path)?;
        if let Some(indexes) = &options.indexes {
            raster.data = raster.data.select(Axis(0), &zero_based(indexes));
        }
        Ok(raster)
    }

    /// Samples are registered before the placeholder file appears
    fn write(&self, path: &Path, raster: &RasterData) -> ProductResult<()> {
        self.insert(path.to_string_lossy().into_owned(), raster.clone());
        fs::write(path, b"")?;
        Ok(())
    }

    fn write_flags(&self, path: &Path, raster: &FlagRaster) -> ProductResult<()> {
        self.insert_flags(path.to_string_lossy().into_owned(), raster.clone());
        fs::write(path, b"")?;
        Ok(())
    }
}

struct CaptureBuffer;

static CAPTURED: Mutex<Vec<u8>> = Mutex::new(Vec::new());
static LOGGER: Once = Once::new();

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        CAPTURED.lock().expect("log capture poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Route log records of this test binary to an in-memory buffer
pub fn init_capture_logger() {
    LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .format(|buf, record| writeln!(buf, "{} {}", record.level(), record.args()))
            .target(env_logger::Target::Pipe(Box::new(CaptureBuffer)))
            .try_init();
    });
}

/// Warnings captured so far containing `needle`
pub fn captured_warnings(needle: &str) -> Vec<String> {
    let captured = CAPTURED.lock().expect("log capture poisoned");
    String::from_utf8_lossy(&captured)
        .lines()
        .filter(|line| line.starts_with("WARN") && line.contains(needle))
        .map(str::to_string)
        .collect()
}

pub const S2_L1C_NAME: &str = "S2A_MSIL1C_20200824T110631_N0209_R137_T30TTK_20200824T150432";
pub const S2_L2A_NAME: &str = "S2B_MSIL2A_20210415T105619_N0300_R094_T31UDQ_20210415T135853";

pub const S2_CRS: u32 = 32630;
pub const ORIGIN_X: f64 = 300000.0;
pub const ORIGIN_Y: f64 = 5000060.0;
/// Side of the synthetic tile in 10 m pixels
pub const TILE_SIZE: usize = 6;

/// Rectangle `(min_x, min_y, max_x, max_y)` covering pixels `rows` x `cols` of the 10 m grid
pub fn pixel_box(rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> [f64; 4] {
    [
        ORIGIN_X + 10.0 * cols.start as f64,
        ORIGIN_Y - 10.0 * rows.end as f64,
        ORIGIN_X + 10.0 * cols.end as f64,
        ORIGIN_Y - 10.0 * rows.start as f64,
    ]
}

pub fn tile_box() -> [f64; 4] {
    pixel_box(0..TILE_SIZE, 0..TILE_SIZE)
}

/// GML mask document with one rectangular feature per `(id, maskType, box)`
pub fn gml_mask(features: &[(&str, &str, [f64; 4])]) -> String {
    let mut members = String::new();
    for (id, mask_type, [x0, y0, x1, y1]) in features {
        members.push_str(&format!(
            r#"
    <eop:MaskFeature gml:id="{id}">
      <eop:maskType codeSpace="urn:gs2:S2PDGS:maskType">{mask_type}</eop:maskType>
      <eop:extentOf>
        <gml:Polygon gml:id="{id}.polygon">
          <gml:exterior>
            <gml:LinearRing>
              <gml:posList srsDimension="3">{x0} {y1} 0 {x1} {y1} 0 {x1} {y0} 0 {x0} {y0} 0 {x0} {y1} 0</gml:posList>
            </gml:LinearRing>
          </gml:exterior>
        </gml:Polygon>
      </eop:extentOf>
    </eop:MaskFeature>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<eop:Mask xmlns:eop="http://www.opengis.net/eop/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" gml:id="mask">
  <gml:boundedBy>
    <gml:Envelope srsName="urn:ogc:def:crs:EPSG::{S2_CRS}">
      <gml:lowerCorner>{ORIGIN_X} 5000000 0</gml:lowerCorner>
      <gml:upperCorner>300060 {ORIGIN_Y} 0</gml:upperCorner>
    </gml:Envelope>
  </gml:boundedBy>
  <eop:maskMembers>{members}
  </eop:maskMembers>
</eop:Mask>
"#
    )
}

/// Mask document of a layer with no feature at all
pub fn empty_gml_mask() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<eop:Mask xmlns:eop="http://www.opengis.net/eop/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" gml:id="mask">
  <gml:boundedBy>
    <gml:Null>Empty</gml:Null>
  </gml:boundedBy>
  <eop:maskMembers/>
</eop:Mask>
"#
    .to_string()
}

fn l1c_datatake_mtd() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_User_Product xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/User_Product_Level-1C.xsd">
  <n1:General_Info>
    <Product_Info>
      <PRODUCT_URI>{S2_L1C_NAME}.SAFE</PRODUCT_URI>
      <PROCESSING_BASELINE>02.09</PROCESSING_BASELINE>
      <Datatake datatakeIdentifier="GS2A_20200824T110631_026977_N02.09">
        <SPACECRAFT_NAME>Sentinel-2A</SPACECRAFT_NAME>
        <SENSING_ORBIT_NUMBER>137</SENSING_ORBIT_NUMBER>
        <SENSING_ORBIT_DIRECTION>DESCENDING</SENSING_ORBIT_DIRECTION>
      </Datatake>
    </Product_Info>
    <Product_Image_Characteristics>
      <QUANTIFICATION_VALUE unit="none">10000</QUANTIFICATION_VALUE>
    </Product_Image_Characteristics>
  </n1:General_Info>
</n1:Level-1C_User_Product>
"#
    )
}

fn l1c_granule_mtd() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-1C_Tile_Metadata.xsd">
  <n1:Geometric_Info>
    <Tile_Geocoding metadataLevel="Brief">
      <HORIZONTAL_CS_NAME>WGS84 / UTM zone 30N</HORIZONTAL_CS_NAME>
      <HORIZONTAL_CS_CODE>EPSG:{S2_CRS}</HORIZONTAL_CS_CODE>
    </Tile_Geocoding>
    <Tile_Angles>
      <Mean_Sun_Angle>
        <ZENITH_ANGLE unit="deg">35.2</ZENITH_ANGLE>
        <AZIMUTH_ANGLE unit="deg">152.8</AZIMUTH_ANGLE>
      </Mean_Sun_Angle>
    </Tile_Angles>
  </n1:Geometric_Info>
  <n1:Quality_Indicators_Info metadataLevel="Standard">
    <Image_Content_QI>
      <CLOUDY_PIXEL_PERCENTAGE>12.5</CLOUDY_PIXEL_PERCENTAGE>
    </Image_Content_QI>
  </n1:Quality_Indicators_Info>
</n1:Level-1C_Tile_ID>
"#
    )
}

const GRANULE: &str = "GRANULE/L1C_T30TTK_A026977_20200824T110631";

/// Unpacked Sentinel-2 L1C product (baseline 2.09, GML masks) in a temporary directory
pub struct S2Fixture {
    _dir: TempDir,
    output: TempDir,
    pub path: PathBuf,
    pub io: Arc<MemoryRasterIo>,
}

impl S2Fixture {
    /// Product with both metadata files and no band yet
    pub fn new() -> Self {
        let fixture = Self::bare(S2_L1C_NAME);
        fixture.write_member("MTD_MSIL1C.xml", &l1c_datatake_mtd());
        fixture.write_member(&format!("{}/MTD_TL.xml", GRANULE), &l1c_granule_mtd());
        fixture
    }

    /// Product folder named `name` holding no file
    pub fn bare(name: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create product directory");
        let output = TempDir::new().expect("Failed to create output directory");
        let path = dir.path().join(format!("{}.SAFE", name));
        fs::create_dir_all(&path).expect("Failed to create product folder");
        Self {
            _dir: dir,
            output,
            path,
            io: Arc::new(MemoryRasterIo::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }

    pub fn write_member(&self, member: &str, content: &str) {
        let target = self.path.join(member);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("Failed to create member folder");
        }
        fs::write(target, content).expect("Failed to write member");
    }

    pub fn remove_member(&self, member: &str) {
        fs::remove_file(self.path.join(member)).expect("Failed to remove member");
    }

    pub fn band_member(id: &str) -> String {
        format!("{}/IMG_DATA/T30TTK_20200824T110631_B{}.jp2", GRANULE, id)
    }

    pub fn mask_member(code: &str, id: &str) -> String {
        format!("{}/QI_DATA/MSK_{}_B{}.gml", GRANULE, code, id)
    }

    /// Path the product hands to the raster backend for `member`
    pub fn raster_path(&self, member: &str) -> String {
        self.path.join(member).to_string_lossy().into_owned()
    }

    /// Band `id` with raw digital numbers `data` at `resolution` metres,
    /// with a detector footprint covering the whole tile
    pub fn add_band(&self, id: &str, data: Array2<f32>, resolution: f64) {
        self.add_band_with_footprint(id, data, resolution, &gml_mask(&[("detector_footprint-1", "DETECTOR_FOOTPRINT", tile_box())]));
    }

    pub fn add_band_with_footprint(&self, id: &str, data: Array2<f32>, resolution: f64, footprint: &str) {
        let member = Self::band_member(id);
        self.write_member(&member, "");
        self.write_member(&Self::mask_member("DETFOO", id), footprint);
        let raster = RasterData::from_band(
            data,
            GeoTransform::new(ORIGIN_X, resolution, ORIGIN_Y, -resolution),
            Some(Crs::from_epsg(S2_CRS)),
        );
        self.io.insert(self.raster_path(&member), raster);
    }

    pub fn config(&self) -> ReaderConfig {
        ReaderConfig::default().with_output_dir(self.output_dir())
    }

    pub fn open(&self) -> Product {
        self.open_with(self.config())
    }

    pub fn open_with(&self, config: ReaderConfig) -> Product {
        Product::open(&self.path, IoBackends::new(self.io.clone()), config).expect("Failed to open product")
    }
}

/// Raw digital numbers `base + 10 * row + col` on the 10 m tile
pub fn ramp(base: f32) -> Array2<f32> {
    Array2::from_shape_fn((TILE_SIZE, TILE_SIZE), |(r, c)| base + 10.0 * r as f32 + c as f32)
}

/// Product folder in a temporary directory served by an in-memory raster backend
pub struct ProductFolder {
    _dir: TempDir,
    output: TempDir,
    pub path: PathBuf,
    pub io: Arc<MemoryRasterIo>,
}

impl ProductFolder {
    pub fn new(name: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create product directory");
        let output = TempDir::new().expect("Failed to create output directory");
        let path = dir.path().join(name);
        fs::create_dir_all(&path).expect("Failed to create product folder");
        Self {
            _dir: dir,
            output,
            path,
            io: Arc::new(MemoryRasterIo::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        self.output.path()
    }

    pub fn write_member(&self, member: &str, content: &str) {
        let target = self.path.join(member);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("Failed to create member folder");
        }
        fs::write(target, content).expect("Failed to write member");
    }

    pub fn raster_path(&self, member: &str) -> String {
        self.path.join(member).to_string_lossy().into_owned()
    }

    /// NetCDF variable path as handed to the raster backend
    pub fn netcdf_path(&self, member: &str, var: &str) -> String {
        format!("NETCDF:\"{}\":{}", self.raster_path(member), var)
    }

    pub fn open(&self) -> Product {
        let config = ReaderConfig::default().with_output_dir(self.output_dir());
        Product::open(&self.path, IoBackends::new(self.io.clone()), config).expect("Failed to open product")
    }
}

/// OGR-style GML collection with one `layer` feature per box, in EPSG `epsg`
pub fn ogr_gml_mask(epsg: u32, layer: &str, boxes: &[[f64; 4]]) -> String {
    let mut members = String::new();
    for (i, [x0, y0, x1, y1]) in boxes.iter().enumerate() {
        members.push_str(&format!(
            r#"
  <gml:featureMember>
    <ogr:{layer} fid="{layer}.{i}">
      <ogr:geometryProperty>
        <gml:Polygon srsName="EPSG:{epsg}">
          <gml:outerBoundaryIs>
            <gml:LinearRing>
              <gml:coordinates>{x0},{y1} {x1},{y1} {x1},{y0} {x0},{y0} {x0},{y1}</gml:coordinates>
            </gml:LinearRing>
          </gml:outerBoundaryIs>
        </gml:Polygon>
      </ogr:geometryProperty>
    </ogr:{layer}>
  </gml:featureMember>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<ogr:FeatureCollection xmlns:ogr="http://ogr.maptools.org/" xmlns:gml="http://www.opengis.net/gml">{members}
</ogr:FeatureCollection>
"#
    )
}

pub const DIMAP_NAME: &str = "DIM_PHR1A_MS_201202250025329_ORT_2189001101";
pub const DIMAP_CRS: u32 = 32631;
pub const DIMAP_X: f64 = 500000.0;
pub const DIMAP_Y: f64 = 4800012.0;
/// Side of the synthetic Pléiades image in 2 m pixels
pub const DIMAP_SIZE: usize = 6;

/// Rectangle covering pixels `rows` x `cols` of the 2 m DIMAP image
pub fn dimap_box(rows: std::ops::Range<usize>, cols: std::ops::Range<usize>) -> [f64; 4] {
    [
        DIMAP_X + 2.0 * cols.start as f64,
        DIMAP_Y - 2.0 * rows.end as f64,
        DIMAP_X + 2.0 * cols.end as f64,
        DIMAP_Y - 2.0 * rows.start as f64,
    ]
}

fn dimap_band_radiometry(id: &str, gain: f64, e0: f64) -> String {
    format!(
        r#"
      <Band_Radiance><BAND_ID>{id}</BAND_ID><MEASURE_UNIT>watt/m2/sr/micron</MEASURE_UNIT><GAIN>{gain}</GAIN><BIAS>0</BIAS></Band_Radiance>
      <Band_Solar_Irradiance><BAND_ID>{id}</BAND_ID><MEASURE_UNIT>watt/m2/micron</MEASURE_UNIT><VALUE>{e0}</VALUE></Band_Solar_Irradiance>"#
    )
}

fn dimap_mtd() -> String {
    let radiometry = [
        dimap_band_radiometry("B0", 9.0, 1915.0),
        dimap_band_radiometry("B1", 9.5, 1830.0),
        dimap_band_radiometry("B2", 10.0, 1600.0),
        dimap_band_radiometry("B3", 15.0, 1060.0),
    ]
    .concat();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Dimap_Document name="{DIMAP_NAME}.XML">
  <Dataset_Identification><DATASET_NAME>{DIMAP_NAME}</DATASET_NAME></Dataset_Identification>
  <Dataset_Content><CLOUD_COVERAGE unit="percent">3.5</CLOUD_COVERAGE></Dataset_Content>
  <Dataset_Extent>
    <Vertex><LON>3.0</LON><LAT>43.352</LAT></Vertex>
    <Vertex><LON>3.0002</LON><LAT>43.352</LAT></Vertex>
    <Vertex><LON>3.0002</LON><LAT>43.3519</LAT></Vertex>
    <Vertex><LON>3.0</LON><LAT>43.3519</LAT></Vertex>
  </Dataset_Extent>
  <Coordinate_Reference_System>
    <Projected_CRS><PROJECTED_CRS_CODE>urn:ogc:def:crs:EPSG::{DIMAP_CRS}</PROJECTED_CRS_CODE></Projected_CRS>
  </Coordinate_Reference_System>
  <Radiometric_Data>
    <Radiometric_Calibration><Instrument_Calibration>
      <Band_Measurement_List>{radiometry}
      </Band_Measurement_List>
    </Instrument_Calibration></Radiometric_Calibration>
  </Radiometric_Data>
  <Geometric_Data><Use_Area>
    <Located_Geometric_Values><LOCATION_TYPE>Center</LOCATION_TYPE>
      <Solar_Incidences><SUN_AZIMUTH>150.0</SUN_AZIMUTH><SUN_ELEVATION>60.0</SUN_ELEVATION></Solar_Incidences>
    </Located_Geometric_Values>
  </Use_Area></Geometric_Data>
</Dimap_Document>
"#
    )
}

/// Raw digital numbers of the four multispectral bands, in raster order Red, Green, Blue, NIR
pub fn dimap_counts() -> Array3<f32> {
    Array3::from_shape_fn((4, DIMAP_SIZE, DIMAP_SIZE), |(b, r, c)| {
        100.0 * (b + 1) as f32 + 10.0 * r as f32 + c as f32
    })
}

/// Orthorectified Pléiades MS product: the ROI leaves out the last
/// column, one detector defect sits on pixel (2, 2) and a cloud covers
/// the top-left 2x2 block
pub fn dimap_fixture() -> ProductFolder {
    let folder = ProductFolder::new(DIMAP_NAME);
    folder.write_member(&format!("{}.XML", DIMAP_NAME), &dimap_mtd());

    let image = "IMG_PHR1A_MS_001/IMG_PHR1A_MS_201202250025329_ORT_R1C1.TIF";
    folder.write_member(image, "");
    folder.io.insert(
        folder.raster_path(image),
        RasterData {
            data: dimap_counts(),
            transform: GeoTransform::new(DIMAP_X, 2.0, DIMAP_Y, -2.0),
            crs: Some(Crs::from_epsg(DIMAP_CRS)),
            nodata: None,
            scale: None,
            offset: None,
        },
    );

    let roi = dimap_box(0..DIMAP_SIZE, 0..DIMAP_SIZE - 1);
    folder.write_member(
        "MASKS/ROI_PHR1A_MS_201202250025329_ORT_MSK.GML",
        &ogr_gml_mask(DIMAP_CRS, "ROI", &[roi]),
    );
    folder.write_member(
        "MASKS/DET_PHR1A_MS_201202250025329_ORT_MSK.GML",
        &ogr_gml_mask(DIMAP_CRS, "DET", &[dimap_box(2..3, 2..3)]),
    );
    folder.write_member(
        "MASKS/CLD_PHR1A_MS_201202250025329_ORT_MSK.GML",
        &ogr_gml_mask(DIMAP_CRS, "CLD", &[dimap_box(0..2, 0..2)]),
    );
    folder
}

pub const OLCI_NAME: &str =
    "S3A_OL_1_EFR____20191215T105023_20191215T105323_20191216T153115_0179_052_322_2160_LN1_O_NT_002";
/// Side of the synthetic OLCI swath in 300 m samples
pub const OLCI_SIZE: usize = 20;
/// Swath lines carrying the saturation flag of Oa17 (bit 4)
pub const OLCI_SATURATED_LINES: usize = 10;
pub const OLCI_RADIANCE: f32 = 50.0;
pub const OLCI_SOLAR_FLUX: f32 = 1000.0;
pub const OLCI_SZA: f32 = 60.0;

/// Geolocated OLCI full-resolution product near 43°N 3°E, with a
/// quality flag word whose land bit (31) sits above the saturation bit
/// of Oa17 on the northern half of the swath
pub fn olci_fixture() -> ProductFolder {
    let folder = ProductFolder::new(&format!("{}.SEN3", OLCI_NAME));
    let origin = GeoTransform::new(0.0, 1.0, 0.0, 1.0);
    let insert = |member: &str, var: &str, data: Array2<f32>| {
        folder.io.insert(folder.netcdf_path(member, var), RasterData::from_band(data, origin, None));
    };

    for member in [
        "geo_coordinates.nc",
        "tie_geometries.nc",
        "instrument_data.nc",
        "qualityFlags.nc",
        "Oa08_radiance.nc",
        "Oa17_radiance.nc",
        "xfdumanifest.xml",
    ] {
        folder.write_member(member, "");
    }

    let shape = (OLCI_SIZE, OLCI_SIZE);
    insert("geo_coordinates.nc", "latitude", Array2::from_shape_fn(shape, |(r, _)| 43.0 - 0.0027 * r as f32));
    insert("geo_coordinates.nc", "longitude", Array2::from_shape_fn(shape, |(_, c)| 2.97 + 0.0037 * c as f32));
    insert("tie_geometries.nc", "SAA", Array2::from_elem((2, 2), 150.0));
    insert("tie_geometries.nc", "SZA", Array2::from_elem((2, 2), OLCI_SZA));
    // One row per band, one column per camera detector
    insert("instrument_data.nc", "solar_flux", Array2::from_elem((21, 3), OLCI_SOLAR_FLUX));
    insert("Oa08_radiance.nc", "Oa08_radiance", Array2::from_elem(shape, OLCI_RADIANCE));
    insert("Oa17_radiance.nc", "Oa17_radiance", Array2::from_elem(shape, OLCI_RADIANCE));

    let flags = Array2::from_shape_fn(shape, |(r, _)| {
        if r < OLCI_SATURATED_LINES {
            (1u32 << 31) | (1 << 4)
        } else {
            1u32 << 31
        }
    });
    folder.io.insert_flags(
        folder.netcdf_path("qualityFlags.nc", "quality_flags"),
        FlagRaster::from_band(flags, origin, None),
    );
    folder
}

pub const CSK_GEC_NAME: &str = "CSKS2_GEC_B_PP_01_CO_RA_FF_20201028224625_20201028224632";
pub const CSK_DGM_NAME: &str = "CSKS1_DGM_B_HR_00_HH_RA_SF_20201028224625_20201028224632";
pub const CSK_CRS: u32 = 32633;
/// Side of the synthetic COSMO-SkyMed images in samples
pub const CSK_SIZE: usize = 30;
pub const CSK_DN: f32 = 10.0;

fn csk_attributes() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<DeliveryNote>
  <ProductInfo>
    <Orbit_Direction>ASCENDING</Orbit_Direction>
    <Rescaling_Factor>2.0</Rescaling_Factor>
    <Calibration_Constant>5.0</Calibration_Constant>
    <GeoCoordTopLeft>41.900 12.400 0.0</GeoCoordTopLeft>
    <GeoCoordTopRight>41.900 12.436 0.0</GeoCoordTopRight>
    <GeoCoordBottomLeft>41.873 12.400 0.0</GeoCoordBottomLeft>
    <GeoCoordBottomRight>41.873 12.436 0.0</GeoCoordBottomRight>
  </ProductInfo>
</DeliveryNote>
"#
    .to_string()
}

/// COSMO-SkyMed product `name` holding the HDF5 file and its XML
/// companion. Each polarization subgroup is a `CSK_SIZE` square of
/// `CSK_DN` counts. Geocoded products carry a UTM 33N transform at 15 m
/// and a zero first row, others no CRS.
pub fn csk_fixture(name: &str, polarizations: usize) -> ProductFolder {
    let folder = ProductFolder::new(name);
    let h5 = format!("{}.h5", name);
    folder.write_member(&h5, "");
    folder.write_member(&format!("{}.h5.xml", name), &csk_attributes());

    let georeferenced = name.contains("_GEC_") || name.contains("_GTC_");
    let (transform, crs) = if georeferenced {
        (GeoTransform::new(290000.0, 15.0, 4640000.0, -15.0), Some(Crs::from_epsg(CSK_CRS)))
    } else {
        (GeoTransform::new(0.0, 1.0, 0.0, 1.0), None)
    };
    for subgroup in 1..=polarizations {
        let mut counts = Array2::from_elem((CSK_SIZE, CSK_SIZE), CSK_DN);
        if georeferenced {
            counts.row_mut(0).fill(0.0);
        }
        folder.io.insert(
            format!("HDF5:\"{}\"://S{:02}/MBI", folder.raster_path(&h5), subgroup),
            RasterData::from_band(counts, transform, crs),
        );
    }
    folder
}

/// HDF5 subdataset path of polarization subgroup `subgroup` in `folder`
pub fn csk_image_path(folder: &ProductFolder, name: &str, subgroup: usize) -> String {
    format!("HDF5:\"{}\"://S{:02}/MBI", folder.raster_path(&format!("{}.h5", name)), subgroup)
}
