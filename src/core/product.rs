//! Product: uniform band access over every supported sensor family.
//!
//! A [`Product`] owns the storage location, the I/O collaborators and one
//! [`SensorProduct`] variant holding the family-specific rules. Bands go
//! through the same pipeline whatever the family: path resolution, raw
//! read at the requested pixel grid, radiometric conversion, invalid-pixel
//! masking. Derived values are memoized per instance, keyed by the
//! arguments they depend on.

use chrono::NaiveDateTime;
use geo::Polygon;
use ndarray::Array2;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::ReaderConfig;
use crate::core::bands::{resolve, BandDescriptor, BandMap, BandName};
use crate::core::cache::Memo;
use crate::core::calibrate::{to_physical_units, Calibration};
use crate::core::index;
use crate::core::masks::{
    apply_invalid_pixel_mask, cloud_band, CloudRules, MaskProvider, MaskStrategy, QualityFlags, RasterLayer,
    VectorLayer,
};
use crate::core::resample::resample;
use crate::io::archive::ProductSource;
use crate::io::raster::{FlagRaster, PixelRequest, RasterData, RasterIo, ReadOptions};
use crate::io::vector::{GmlVectorIo, MaskFeature, VectorIo};
use crate::io::xml::XmlElement;
use crate::products::{
    cosmo_skymed::CosmoSkymedProduct, dimap::DimapProduct, radarsat2::Radarsat2Product,
    sentinel2::Sentinel2Product, sentinel3::Sentinel3Product,
};
use crate::types::{BandArray, BoundingBox, Crs, GridSpec, OrbitDirection, ProductError, ProductResult, SunAngles};

/// Datetime format of condensed names and `get_datetime_str`
pub const DATETIME_FMT: &str = "%Y%m%dT%H%M%S";

/// Supported sensor families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FamilyKind {
    Sentinel2,
    Sentinel3,
    Dimap,
    Radarsat2,
    CosmoSkymed,
}

const NAME_PATTERNS: &[(FamilyKind, &str)] = &[
    (
        FamilyKind::Sentinel2,
        r"^S2[ABCD]_MSIL(1C|2A|2Ap)_\d{8}T\d{6}_N\d{4}_R\d{3}_T\d{2}[A-Z]{3}_\d{8}T\d{6}",
    ),
    (FamilyKind::Sentinel3, r"^S3[AB]_(OL_1_E[FR]R|SL_1_RBT)_"),
    (FamilyKind::Dimap, r"^(DIM_)?(SPOT[67]|PHR1[AB])_"),
    (FamilyKind::Radarsat2, r"^RS2_"),
    (FamilyKind::CosmoSkymed, r"^CSKS[1-4]_"),
];

// Files identifying a product whose folder was renamed
const MEMBER_PATTERNS: &[(FamilyKind, &str)] = &[
    (FamilyKind::Dimap, r"(^|/)DIM_(SPOT[67]|PHR1[AB])_[^/]*\.XML$"),
    (FamilyKind::CosmoSkymed, r"(^|/)CSKS[1-4]_[^/]*\.h5$"),
    (FamilyKind::Sentinel2, r"(^|/)MTD_MSIL(1C|2A)\.xml$"),
];

static NAME_REGEXES: OnceLock<Vec<(FamilyKind, Regex)>> = OnceLock::new();

/// Naming conventions, compiled on first use
fn name_regexes() -> &'static [(FamilyKind, Regex)] {
    NAME_REGEXES.get_or_init(|| {
        NAME_PATTERNS
            .iter()
            .filter_map(|(kind, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((*kind, re)),
                Err(e) => {
                    log::error!("Invalid {} naming pattern: {}", kind, e);
                    None
                }
            })
            .collect()
    })
}

impl FamilyKind {
    /// Family whose naming convention `name` follows
    pub fn detect(name: &str) -> Option<FamilyKind> {
        name_regexes()
            .iter()
            .find(|(_, re)| re.is_match(name))
            .map(|(kind, _)| *kind)
    }

    /// Family from the product name, then from the files it holds
    pub fn detect_source(name: &str, source: &ProductSource) -> Option<FamilyKind> {
        if let Some(kind) = Self::detect(name) {
            return Some(kind);
        }
        MEMBER_PATTERNS
            .iter()
            .find(|(_, pattern)| source.find(pattern).map(|m| !m.is_empty()).unwrap_or(false))
            .map(|(kind, _)| *kind)
    }
}

impl fmt::Display for FamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FamilyKind::Sentinel2 => "Sentinel-2",
            FamilyKind::Sentinel3 => "Sentinel-3",
            FamilyKind::Dimap => "DIMAP",
            FamilyKind::Radarsat2 => "RADARSAT-2",
            FamilyKind::CosmoSkymed => "COSMO-SkyMed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constellation {
    S2,
    S3,
    Spot6,
    Spot7,
    Pleiades,
    Radarsat2,
    CosmoSkymed,
}

impl fmt::Display for Constellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Constellation::S2 => "S2",
            Constellation::S3 => "S3",
            Constellation::Spot6 => "SPOT6",
            Constellation::Spot7 => "SPOT7",
            Constellation::Pleiades => "PLD",
            Constellation::Radarsat2 => "RS2",
            Constellation::CosmoSkymed => "CSK",
        };
        write!(f, "{}", code)
    }
}

/// Lifecycle of a product instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductState {
    Constructed,
    BandMapped,
    Ready,
    /// Metadata could not be read. Values needing it fall back to defaults.
    Degraded { reason: String },
}

/// Raster and vector collaborators used by a product
#[derive(Clone)]
pub struct IoBackends {
    pub raster: Arc<dyn RasterIo>,
    pub vector: Arc<dyn VectorIo>,
}

impl IoBackends {
    /// `raster` for rasters, the built-in GML reader for vector masks
    pub fn new(raster: Arc<dyn RasterIo>) -> Self {
        Self {
            raster,
            vector: Arc::new(GmlVectorIo),
        }
    }

    pub fn with_vector(mut self, vector: Arc<dyn VectorIo>) -> Self {
        self.vector = vector;
        self
    }

    #[cfg(feature = "gdal")]
    pub fn gdal() -> Self {
        Self::new(Arc::new(crate::io::raster::GdalRasterIo))
    }
}

impl fmt::Debug for IoBackends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBackends").finish_non_exhaustive()
    }
}

/// Everything a family needs to reach the product's files
pub struct ProductContext {
    /// Product name with archive suffixes stripped
    pub name: String,
    pub source: ProductSource,
    pub config: ReaderConfig,
    backends: IoBackends,
    xml: Memo<String, Arc<XmlElement>>,
}

impl ProductContext {
    pub fn new<P: AsRef<Path>>(path: P, backends: IoBackends, config: ReaderConfig) -> ProductResult<Self> {
        let path = path.as_ref();
        let source = ProductSource::open(path)?;
        Ok(Self {
            name: product_name(path),
            source,
            config,
            backends,
            xml: Memo::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.source.path()
    }

    pub fn raster_io(&self) -> &dyn RasterIo {
        self.backends.raster.as_ref()
    }

    /// Parsed XML member, parsed once per product
    pub fn read_xml(&self, member: &str) -> ProductResult<Arc<XmlElement>> {
        self.xml.get_or_try_insert_with(member.to_string(), || {
            log::debug!("Parsing {}", member);
            let content = self.source.read_to_string(member)?;
            Ok(Arc::new(XmlElement::parse(&content)?))
        })
    }

    /// First XML member matching the regex `pattern`
    pub fn find_xml(&self, pattern: &str) -> ProductResult<Arc<XmlElement>> {
        let member = self.source.find_one(pattern)?;
        self.read_xml(&member)
    }

    /// Features of a vector member. Archive members are extracted for the
    /// duration of the read only.
    pub fn read_vector(&self, member: &str, crs: Option<Crs>) -> ProductResult<Vec<MaskFeature>> {
        self.source
            .with_extracted(member, |path| self.backends.vector.read(path, crs))
    }

    pub fn raster_path(&self, member: &str) -> String {
        self.source.raster_path(member)
    }

    pub fn read_raster(&self, path: &str, options: &ReadOptions) -> ProductResult<RasterData> {
        self.backends.raster.read(path, options)
    }

    pub fn read_flags(&self, path: &str, options: &ReadOptions) -> ProductResult<FlagRaster> {
        self.backends.raster.read_flags(path, options)
    }

    /// Location of a derived file under the output directory, which is created if needed
    pub fn output_path(&self, file_name: &str) -> ProductResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        Ok(self.config.output_dir.join(file_name))
    }
}

fn product_name(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".zip", ".ZIP", ".SAFE", ".SEN3"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped.to_string();
        }
    }
    name
}

/// Family-specific rules behind the uniform product contract
pub trait SensorFamily: Send + Sync {
    fn kind(&self) -> FamilyKind;

    fn constellation(&self) -> Constellation;

    /// Real product name, which may differ from the folder name
    fn name(&self) -> &str;

    fn product_type(&self) -> &str;

    fn band_map(&self) -> &BandMap;

    /// Default pixel size in metres
    fn default_resolution(&self) -> f64;

    /// Band whose nodata area is also the nodata area of cloud bands
    fn default_band(&self) -> BandName;

    /// Acquisition datetime, decided when the product is constructed
    fn datetime(&self) -> NaiveDateTime;

    fn condensed_name(&self) -> String;

    /// Read the metadata not needed to map bands. A failure puts the
    /// product in degraded mode.
    fn load_metadata(&mut self, ctx: &ProductContext) -> ProductResult<()>;

    /// Path of the file holding `desc` for reads onto `target`
    fn band_path(&self, ctx: &ProductContext, desc: &BandDescriptor, target: &GridSpec) -> ProductResult<String>;

    /// Raw samples of `desc` from `path`
    fn read_band(
        &self,
        ctx: &ProductContext,
        _desc: &BandDescriptor,
        path: &str,
        options: &ReadOptions,
    ) -> ProductResult<Array2<f32>> {
        ctx.read_raster(path, &options.clone().with_indexes(vec![1]))?.band(1)
    }

    fn calibration(&self, ctx: &ProductContext, desc: &BandDescriptor) -> ProductResult<Calibration>;

    fn mask_strategy(&self) -> MaskStrategy;

    /// Raw value meaning "no data"
    fn raw_zero(&self) -> f32 {
        0.0
    }

    fn vector_mask(
        &self,
        _ctx: &ProductContext,
        _layer: VectorLayer,
        _band: BandName,
    ) -> ProductResult<Option<Vec<MaskFeature>>> {
        Ok(None)
    }

    fn raster_mask(
        &self,
        _ctx: &ProductContext,
        layer: RasterLayer,
        band: BandName,
        _grid: &GridSpec,
    ) -> ProductResult<RasterData> {
        Err(ProductError::InvalidType(format!(
            "{} has no {:?} raster mask for {}",
            self.kind(),
            layer,
            band
        )))
    }

    /// Integer bitfield layers, for families whose masks are flag words
    fn flag_mask(
        &self,
        _ctx: &ProductContext,
        layer: RasterLayer,
        band: BandName,
        _grid: &GridSpec,
    ) -> ProductResult<FlagRaster> {
        Err(ProductError::InvalidType(format!(
            "{} has no {:?} flags for {}",
            self.kind(),
            layer,
            band
        )))
    }

    fn quality_flags(&self, _band: BandName, default: &QualityFlags) -> QualityFlags {
        default.clone()
    }

    fn cloud_rules(&self) -> CloudRules;

    /// Pixel grid of the default band at the default resolution
    fn reference_grid(&self, ctx: &ProductContext) -> ProductResult<GridSpec>;

    fn crs(&self, ctx: &ProductContext) -> ProductResult<Crs> {
        self.reference_grid(ctx)?
            .crs
            .ok_or_else(|| ProductError::invalid_product(ctx.path(), "the default band has no CRS"))
    }

    fn extent(&self, ctx: &ProductContext) -> ProductResult<BoundingBox> {
        Ok(self.reference_grid(ctx)?.bounds())
    }

    fn footprint(&self, ctx: &ProductContext) -> ProductResult<Polygon<f64>> {
        Ok(self.extent(ctx)?.to_polygon())
    }

    fn sun_angles(&self, ctx: &ProductContext) -> ProductResult<SunAngles>;

    /// Cloud cover in percent
    fn cloud_cover(&self, ctx: &ProductContext) -> ProductResult<f64>;

    fn orbit_direction(&self, ctx: &ProductContext) -> ProductResult<OrbitDirection>;

    fn quicklook(&self, _ctx: &ProductContext) -> ProductResult<Option<String>> {
        Ok(None)
    }
}

/// Mask files of a family, seen by the mask engine
struct FamilyMasks<'a> {
    family: &'a dyn SensorFamily,
    ctx: &'a ProductContext,
}

impl MaskProvider for FamilyMasks<'_> {
    fn vector_layer(&self, layer: VectorLayer, band: BandName) -> ProductResult<Option<Vec<MaskFeature>>> {
        self.family.vector_mask(self.ctx, layer, band)
    }

    fn raster_layer(&self, layer: RasterLayer, band: BandName, grid: &GridSpec) -> ProductResult<RasterData> {
        self.family.raster_mask(self.ctx, layer, band, grid)
    }

    fn flag_layer(&self, layer: RasterLayer, band: BandName, grid: &GridSpec) -> ProductResult<FlagRaster> {
        self.family.flag_mask(self.ctx, layer, band, grid)
    }

    fn quality_flags(&self, band: BandName, default: &QualityFlags) -> QualityFlags {
        self.family.quality_flags(band, default)
    }
}

/// One variant per sensor family, chosen once at construction
pub enum SensorProduct {
    Sentinel2(Sentinel2Product),
    Sentinel3(Sentinel3Product),
    Dimap(DimapProduct),
    Radarsat2(Radarsat2Product),
    CosmoSkymed(CosmoSkymedProduct),
}

impl SensorProduct {
    /// Parse the product name and map the bands of `kind`
    pub fn new(kind: FamilyKind, ctx: &ProductContext) -> ProductResult<Self> {
        Ok(match kind {
            FamilyKind::Sentinel2 => SensorProduct::Sentinel2(Sentinel2Product::new(ctx)?),
            FamilyKind::Sentinel3 => SensorProduct::Sentinel3(Sentinel3Product::new(ctx)?),
            FamilyKind::Dimap => SensorProduct::Dimap(DimapProduct::new(ctx)?),
            FamilyKind::Radarsat2 => SensorProduct::Radarsat2(Radarsat2Product::new(ctx)?),
            FamilyKind::CosmoSkymed => SensorProduct::CosmoSkymed(CosmoSkymedProduct::new(ctx)?),
        })
    }

    pub fn family(&self) -> &dyn SensorFamily {
        match self {
            SensorProduct::Sentinel2(p) => p,
            SensorProduct::Sentinel3(p) => p,
            SensorProduct::Dimap(p) => p,
            SensorProduct::Radarsat2(p) => p,
            SensorProduct::CosmoSkymed(p) => p,
        }
    }

    fn family_mut(&mut self) -> &mut dyn SensorFamily {
        match self {
            SensorProduct::Sentinel2(p) => p,
            SensorProduct::Sentinel3(p) => p,
            SensorProduct::Dimap(p) => p,
            SensorProduct::Radarsat2(p) => p,
            SensorProduct::CosmoSkymed(p) => p,
        }
    }
}

type RequestKey = (u8, u64, u64);

/// One satellite acquisition
pub struct Product {
    ctx: ProductContext,
    sensor: SensorProduct,
    state: ProductState,
    reference: Memo<(), GridSpec>,
    crs: Memo<(), Crs>,
    extent: Memo<(), BoundingBox>,
    footprint: Memo<(), Polygon<f64>>,
    transforms: Memo<RequestKey, GridSpec>,
    bands: Memo<(BandName, RequestKey), BandArray>,
}

impl fmt::Debug for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Product")
            .field("name", &self.name())
            .field("family", &self.family().kind())
            .field("state", &self.state)
            .finish()
    }
}

impl Product {
    /// Open the product at `path`, detecting its family from its name or files
    pub fn open<P: AsRef<Path>>(path: P, backends: IoBackends, config: ReaderConfig) -> ProductResult<Self> {
        let path = path.as_ref();
        let ctx = ProductContext::new(path, backends, config).map_err(|e| e.at_product(path))?;
        let kind = FamilyKind::detect_source(&ctx.name, &ctx.source).ok_or_else(|| {
            ProductError::invalid_product(path, format!("'{}' matches no supported product naming", ctx.name))
        })?;
        Self::with_context(ctx, kind)
    }

    /// Open the product at `path` as a product of `kind`
    pub fn open_as<P: AsRef<Path>>(
        path: P,
        kind: FamilyKind,
        backends: IoBackends,
        config: ReaderConfig,
    ) -> ProductResult<Self> {
        let path = path.as_ref();
        let ctx = ProductContext::new(path, backends, config).map_err(|e| e.at_product(path))?;
        Self::with_context(ctx, kind)
    }

    fn with_context(ctx: ProductContext, kind: FamilyKind) -> ProductResult<Self> {
        let path = ctx.path().to_path_buf();
        log::debug!("{}: {:?}", ctx.name, ProductState::Constructed);

        let mut sensor = SensorProduct::new(kind, &ctx).map_err(|e| e.at_product(&path))?;
        log::debug!(
            "{}: {:?} ({} bands)",
            ctx.name,
            ProductState::BandMapped,
            sensor.family().band_map().len()
        );

        let state = match sensor.family_mut().load_metadata(&ctx) {
            Ok(()) => ProductState::Ready,
            Err(e) if ctx.config.strict => return Err(e.at_product(&path)),
            Err(e) => {
                log::warn!(
                    "Metadata of {} could not be read ({}): the product is in degraded mode, \
                     calibration, sun angles, cloud cover and orbit direction fall back to defaults",
                    ctx.name,
                    e
                );
                ProductState::Degraded { reason: e.to_string() }
            }
        };
        log::info!("Opened {} product {} ({:?})", kind, sensor.family().name(), state);

        Ok(Self {
            ctx,
            sensor,
            state,
            reference: Memo::new(),
            crs: Memo::new(),
            extent: Memo::new(),
            footprint: Memo::new(),
            transforms: Memo::new(),
            bands: Memo::new(),
        })
    }

    fn family(&self) -> &dyn SensorFamily {
        self.sensor.family()
    }

    fn wrap<T>(&self, result: ProductResult<T>) -> ProductResult<T> {
        result.map_err(|e| e.at_product(self.ctx.path()))
    }

    pub fn name(&self) -> &str {
        self.family().name()
    }

    pub fn path(&self) -> &Path {
        self.ctx.path()
    }

    pub fn sensor(&self) -> &SensorProduct {
        &self.sensor
    }

    pub fn kind(&self) -> FamilyKind {
        self.family().kind()
    }

    pub fn constellation(&self) -> Constellation {
        self.family().constellation()
    }

    pub fn product_type(&self) -> &str {
        self.family().product_type()
    }

    pub fn state(&self) -> &ProductState {
        &self.state
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.state, ProductState::Degraded { .. })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.ctx.config
    }

    pub fn band_map(&self) -> &BandMap {
        self.family().band_map()
    }

    pub fn default_resolution(&self) -> f64 {
        self.family().default_resolution()
    }

    /// The product can load `band`: it is mapped, or it is a cloud band the family produces
    pub fn has_band(&self, band: BandName) -> bool {
        if band.is_cloud() {
            self.family().cloud_rules().supports(band)
        } else {
            self.band_map().contains(band)
        }
    }

    pub fn resolve(&self, band: BandName) -> ProductResult<&BandDescriptor> {
        resolve(self.band_map(), band, self.name())
    }

    pub fn get_datetime(&self) -> NaiveDateTime {
        self.family().datetime()
    }

    /// Acquisition datetime as `YYYYMMDDTHHMMSS`
    pub fn get_datetime_str(&self) -> String {
        self.get_datetime().format(DATETIME_FMT).to_string()
    }

    pub fn condensed_name(&self) -> String {
        self.family().condensed_name()
    }

    fn reference_grid(&self) -> ProductResult<GridSpec> {
        self.reference
            .get_or_try_insert_with((), || self.family().reference_grid(&self.ctx))
    }

    /// Output grid of a read: the default grid resized to `request`
    pub fn default_transform(&self, request: PixelRequest) -> ProductResult<GridSpec> {
        let result = self.transforms.get_or_try_insert_with(request.key(), || {
            let reference = self.reference_grid()?;
            let (width, height) = request.target_size(reference.width, reference.height, self.default_resolution());
            Ok(reference.resized(width, height))
        });
        self.wrap(result)
    }

    pub fn crs(&self) -> ProductResult<Crs> {
        let result = self.crs.get_or_try_insert_with((), || self.family().crs(&self.ctx));
        self.wrap(result)
    }

    pub fn extent(&self) -> ProductResult<BoundingBox> {
        let result = self.extent.get_or_try_insert_with((), || self.family().extent(&self.ctx));
        self.wrap(result)
    }

    pub fn footprint(&self) -> ProductResult<Polygon<f64>> {
        let result = self
            .footprint
            .get_or_try_insert_with((), || self.family().footprint(&self.ctx));
        self.wrap(result)
    }

    /// Native file of every band, for reads at `resolution` (default resolution when `None`)
    pub fn get_band_paths(&self, bands: &[BandName], resolution: Option<f64>) -> ProductResult<BTreeMap<BandName, String>> {
        let request = resolution.map(PixelRequest::Resolution).unwrap_or(PixelRequest::Native);
        let target = self.default_transform(request)?;
        let result = bands
            .iter()
            .map(|band| {
                if band.is_cloud() {
                    return Err(ProductError::InvalidType(format!(
                        "{} is computed from mask files and has no band file",
                        band
                    )));
                }
                let desc = self.resolve(*band)?;
                Ok((*band, self.family().band_path(&self.ctx, desc, &target)?))
            })
            .collect();
        self.wrap(result)
    }

    /// Physical-unit arrays of `bands`, all on the grid of `request`.
    ///
    /// Invalid pixels hold the nodata sentinel. Every call returns its own
    /// arrays, cached copies are never handed out.
    pub fn load_bands(&self, bands: &[BandName], request: PixelRequest) -> ProductResult<BTreeMap<BandName, BandArray>> {
        let result = self.load_bands_inner(bands, request);
        self.wrap(result)
    }

    fn load_bands_inner(&self, bands: &[BandName], request: PixelRequest) -> ProductResult<BTreeMap<BandName, BandArray>> {
        let unique: Vec<BandName> = bands.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let (clouds, others): (Vec<BandName>, Vec<BandName>) = unique.into_iter().partition(|b| b.is_cloud());

        // Unknown bands fail before anything is read
        for band in &others {
            self.resolve(*band)?;
        }
        let rules = self.family().cloud_rules();
        if let Some(band) = clouds.iter().find(|b| !rules.supports(**b)) {
            return Err(ProductError::UnsupportedBand {
                band: *band,
                family: self.family().kind().to_string(),
            });
        }

        let target = self.default_transform(request)?;
        let key = request.key();
        log::info!(
            "Loading {:?} from {} on a {}x{} grid",
            bands,
            self.name(),
            target.width,
            target.height
        );

        #[cfg(feature = "parallel")]
        let loaded = others
            .par_iter()
            .map(|band| self.load_cached(*band, &target, key).map(|array| (*band, array)))
            .collect::<ProductResult<Vec<_>>>()?;
        #[cfg(not(feature = "parallel"))]
        let loaded = others
            .iter()
            .map(|band| self.load_cached(*band, &target, key).map(|array| (*band, array)))
            .collect::<ProductResult<Vec<_>>>()?;

        let mut result: BTreeMap<BandName, BandArray> = loaded.into_iter().collect();
        if !clouds.is_empty() {
            let default_band = self.family().default_band();
            let nodata = match result.get(&default_band) {
                Some(array) => array.data.mapv(|v| v.is_nan()),
                None => self.load_cached(default_band, &target, key)?.data.mapv(|v| v.is_nan()),
            };
            for band in clouds {
                let array = self.cached(band, key, || {
                    let masks = FamilyMasks {
                        family: self.family(),
                        ctx: &self.ctx,
                    };
                    let family_name = self.family().kind().to_string();
                    cloud_band(band, &rules, &masks, &target, Some(&nodata), &family_name)
                })?;
                result.insert(band, array);
            }
        }
        Ok(result)
    }

    pub fn load_band(&self, band: BandName, request: PixelRequest) -> ProductResult<BandArray> {
        let mut bands = self.load_bands(&[band], request)?;
        bands
            .remove(&band)
            .ok_or_else(|| ProductError::invalid_product(self.path(), format!("{} was not loaded", band)))
    }

    /// Spectral indices by name, each computed from freshly loaded bands
    pub fn load_indices(&self, names: &[&str], request: PixelRequest) -> ProductResult<BTreeMap<String, BandArray>> {
        let mut needed = BTreeSet::new();
        for name in names {
            needed.extend(index::needed_bands(name)?.iter().copied());
        }
        let bands: Vec<BandName> = needed.into_iter().collect();
        let loaded = self.load_bands(&bands, request)?;
        names
            .iter()
            .map(|name| Ok((name.to_ascii_uppercase(), index::evaluate(name, &loaded)?)))
            .collect()
    }

    fn cached<F>(&self, band: BandName, key: RequestKey, compute: F) -> ProductResult<BandArray>
    where
        F: FnOnce() -> ProductResult<BandArray>,
    {
        if self.ctx.config.cache_bands {
            self.bands.get_or_try_insert_with((band, key), compute)
        } else {
            compute()
        }
    }

    fn load_cached(&self, band: BandName, target: &GridSpec, key: RequestKey) -> ProductResult<BandArray> {
        self.cached(band, key, || self.load_one(band, target))
    }

    fn load_one(&self, band: BandName, target: &GridSpec) -> ProductResult<BandArray> {
        let family = self.family();
        let desc = self.resolve(band)?;
        let path = family.band_path(&self.ctx, desc, target)?;
        log::debug!("Reading {} from {}", band, path);

        let options = ReadOptions::new(
            PixelRequest::Size {
                width: target.width,
                height: target.height,
            },
            self.ctx.config.resampling,
        );
        let mut raw = family.read_band(&self.ctx, desc, &path, &options)?;
        if raw.dim() != target.shape() {
            raw = resample(&raw, target.shape(), self.ctx.config.resampling);
        }

        let calibration = family.calibration(&self.ctx, desc)?;
        let calibrated = to_physical_units(&raw, band, &calibration)?;
        let array = BandArray::new(calibrated.data, *target)?;

        let masks = FamilyMasks { family, ctx: &self.ctx };
        apply_invalid_pixel_mask(array, &raw, band, &family.mask_strategy(), &masks, family.raw_zero())
    }

    fn with_fallback<T: fmt::Debug>(&self, what: &str, affected: &str, result: ProductResult<T>, fallback: T) -> ProductResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if self.ctx.config.strict => Err(e.at_product(self.path())),
            Err(e) => {
                log::warn!(
                    "{} of {} unavailable ({}): using {:?}, {} will be unreliable",
                    what,
                    self.name(),
                    e,
                    fallback,
                    affected
                );
                Ok(fallback)
            }
        }
    }

    /// Mean solar azimuth and zenith, `(0, 0)` when unavailable
    pub fn get_mean_sun_angles(&self) -> ProductResult<SunAngles> {
        self.with_fallback(
            "Mean sun angles",
            "illumination-dependent computations (reflectance, hillshade)",
            self.family().sun_angles(&self.ctx),
            SunAngles { azimuth: 0.0, zenith: 0.0 },
        )
    }

    /// Cloud cover in percent, 0 when unavailable
    pub fn get_cloud_cover(&self) -> ProductResult<f64> {
        self.with_fallback(
            "Cloud cover",
            "cloud-based product filtering",
            self.family().cloud_cover(&self.ctx),
            0.0,
        )
    }

    /// Pass direction, descending when unavailable
    pub fn get_orbit_direction(&self) -> ProductResult<OrbitDirection> {
        self.with_fallback(
            "Orbit direction",
            "geometry-dependent computations (layover, shadow)",
            self.family().orbit_direction(&self.ctx),
            OrbitDirection::Descending,
        )
    }

    pub fn quicklook_path(&self) -> ProductResult<Option<String>> {
        let result = self.family().quicklook(&self.ctx);
        self.wrap(result)
    }
}

/// Parse a datetime, reporting `field` on failure
pub fn parse_datetime(value: &str, format: &str, field: &str) -> ProductResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, format)
        .map_err(|e| ProductError::invalid_metadata(field, format!("'{}' is not a {} datetime: {}", value, format, e)))
}
