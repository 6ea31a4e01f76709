//! Geolocation of products whose rasters are not georeferenced.
//!
//! Such products ship latitude/longitude tie points instead of a map
//! transform. Their CRS is the WGS84 / UTM zone holding the scene
//! center, and bands are binned onto a regular grid in that CRS.

use geo::{Coord, LineString, Polygon};
use ndarray::Array2;

use crate::types::{BoundingBox, Crs, GridSpec, ProductError, ProductResult};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// UTM zone number of a WGS84 position, with the Norway and Svalbard exceptions
pub fn utm_zone(lon: f64, lat: f64) -> u32 {
    let lon = ((lon + 180.0).rem_euclid(360.0)) - 180.0;
    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        return 32;
    }
    if (72.0..84.0).contains(&lat) {
        if (0.0..9.0).contains(&lon) {
            return 31;
        } else if (9.0..21.0).contains(&lon) {
            return 33;
        } else if (21.0..33.0).contains(&lon) {
            return 35;
        } else if (33.0..42.0).contains(&lon) {
            return 37;
        }
    }
    ((((lon + 180.0) / 6.0).floor() as u32) % 60) + 1
}

/// WGS84 / UTM CRS containing a position: EPSG 326zz north, 327zz south
pub fn utm_crs(lon: f64, lat: f64) -> Crs {
    let zone = utm_zone(lon, lat);
    if lat >= 0.0 {
        Crs::from_epsg(32600 + zone)
    } else {
        Crs::from_epsg(32700 + zone)
    }
}

/// Project geographic coordinates into `crs` (geographic or WGS84 / UTM)
pub fn project(crs: Crs, lon: f64, lat: f64) -> ProductResult<(f64, f64)> {
    if crs.is_geographic() {
        return Ok((lon, lat));
    }
    let (zone, north) = crs.utm_zone().ok_or_else(|| {
        ProductError::InvalidType(format!("cannot project coordinates into {}", crs))
    })?;
    Ok(transverse_mercator(zone, north, lon, lat))
}

fn transverse_mercator(zone: u32, north: bool, lon: f64, lat: f64) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);

    let lon0 = ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians();
    let phi = lat.to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lon.to_radians() - lon0);
    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

    let x = UTM_K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;
    let mut y = UTM_K0
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    if !north {
        y += UTM_FALSE_NORTHING_SOUTH;
    }
    (x, y)
}

/// One geolocated image position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiePoint {
    pub line: f64,
    pub pixel: f64,
    pub lat: f64,
    pub lon: f64,
}

/// Regular grid of latitude/longitude tie points over image lines and pixels
#[derive(Debug, Clone, PartialEq)]
pub struct TiePointGrid {
    /// Image line of every grid row, increasing
    pub lines: Vec<f64>,
    /// Image pixel of every grid column, increasing
    pub pixels: Vec<f64>,
    pub lat: Array2<f64>,
    pub lon: Array2<f64>,
}

/// How samples falling into the same output cell are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binning {
    /// Mean of the valid samples, for continuous values
    Average,
    /// Last sample wins, for flags and categories
    Nearest,
}

impl TiePointGrid {
    /// Grid covering every pixel of a full-resolution latitude/longitude pair
    pub fn from_arrays(lat: Array2<f64>, lon: Array2<f64>) -> ProductResult<Self> {
        if lat.dim() != lon.dim() {
            return Err(ProductError::GridMismatch(format!(
                "latitude {:?} and longitude {:?} grids differ",
                lat.dim(),
                lon.dim()
            )));
        }
        let (rows, cols) = lat.dim();
        Self::new(
            (0..rows).map(|r| r as f64).collect(),
            (0..cols).map(|c| c as f64).collect(),
            lat,
            lon,
        )
    }

    /// Grid from scattered tie points forming a complete line x pixel lattice
    pub fn from_points(points: &[TiePoint]) -> ProductResult<Self> {
        let mut lines: Vec<f64> = points.iter().map(|p| p.line).collect();
        let mut pixels: Vec<f64> = points.iter().map(|p| p.pixel).collect();
        for axis in [&mut lines, &mut pixels] {
            axis.sort_by(|a, b| a.total_cmp(b));
            axis.dedup();
        }
        if lines.len() * pixels.len() != points.len() {
            return Err(ProductError::invalid_metadata(
                "geolocationGrid",
                format!(
                    "{} tie points do not form a {}x{} grid",
                    points.len(),
                    lines.len(),
                    pixels.len()
                ),
            ));
        }

        let mut lat = Array2::<f64>::zeros((lines.len(), pixels.len()));
        let mut lon = Array2::<f64>::zeros((lines.len(), pixels.len()));
        for p in points {
            let r = lines.iter().position(|l| *l == p.line).unwrap_or(0);
            let c = pixels.iter().position(|x| *x == p.pixel).unwrap_or(0);
            lat[[r, c]] = p.lat;
            lon[[r, c]] = p.lon;
        }
        Self::new(lines, pixels, lat, lon)
    }

    fn new(lines: Vec<f64>, pixels: Vec<f64>, lat: Array2<f64>, lon: Array2<f64>) -> ProductResult<Self> {
        if lines.len() < 2 || pixels.len() < 2 {
            return Err(ProductError::invalid_metadata(
                "geolocationGrid",
                "at least 2x2 tie points are needed",
            ));
        }
        Ok(Self { lines, pixels, lat, lon })
    }

    /// Latitude and longitude at an image position, bilinear between tie points
    pub fn locate(&self, line: f64, pixel: f64) -> (f64, f64) {
        let (r0, fy) = segment(&self.lines, line);
        let (c0, fx) = segment(&self.pixels, pixel);
        (
            interpolate(&self.lat, r0, c0, fy, fx),
            interpolate(&self.lon, r0, c0, fy, fx),
        )
    }

    /// `(lon, lat)` of the scene center
    pub fn center(&self) -> (f64, f64) {
        let line = (self.lines[0] + self.lines[self.lines.len() - 1]) / 2.0;
        let pixel = (self.pixels[0] + self.pixels[self.pixels.len() - 1]) / 2.0;
        let (lat, lon) = self.locate(line, pixel);
        (lon, lat)
    }

    /// UTM zone of the scene center
    pub fn crs(&self) -> Crs {
        let (lon, lat) = self.center();
        utm_crs(lon, lat)
    }

    /// `(lon, lat)` along the grid border, clockwise from the first tie point
    pub fn outline(&self) -> Vec<(f64, f64)> {
        let (rows, cols) = self.lat.dim();
        let mut ring = Vec::with_capacity(2 * (rows + cols));
        let at = |r: usize, c: usize| (self.lon[[r, c]], self.lat[[r, c]]);
        ring.extend((0..cols).map(|c| at(0, c)));
        ring.extend((1..rows).map(|r| at(r, cols - 1)));
        ring.extend((0..cols - 1).rev().map(|c| at(rows - 1, c)));
        ring.extend((1..rows - 1).rev().map(|r| at(r, 0)));
        ring
    }

    pub fn footprint(&self, crs: Crs) -> ProductResult<Polygon<f64>> {
        let coords = self
            .outline()
            .into_iter()
            .map(|(lon, lat)| project(crs, lon, lat).map(|(x, y)| Coord { x, y }))
            .collect::<ProductResult<Vec<_>>>()?;
        Ok(Polygon::new(LineString::from(coords), vec![]))
    }

    pub fn extent(&self, crs: Crs) -> ProductResult<BoundingBox> {
        let points = self
            .lat
            .iter()
            .zip(self.lon.iter())
            .map(|(lat, lon)| project(crs, *lon, *lat))
            .collect::<ProductResult<Vec<_>>>()?;
        BoundingBox::from_points(points)
            .ok_or_else(|| ProductError::invalid_metadata("geolocationGrid", "empty tie point grid"))
    }

    /// Output grid at `resolution`, snapped to multiples of it
    pub fn target_grid(&self, crs: Crs, resolution: f64) -> ProductResult<GridSpec> {
        let bbox = self.extent(crs)?;
        let snapped = BoundingBox::new(
            (bbox.min_x / resolution).floor() * resolution,
            (bbox.min_y / resolution).floor() * resolution,
            (bbox.max_x / resolution).ceil() * resolution,
            (bbox.max_y / resolution).ceil() * resolution,
        );
        Ok(GridSpec::from_bounds(&snapped, resolution, Some(crs)))
    }
}

fn segment(axis: &[f64], value: f64) -> (usize, f64) {
    let n = axis.len();
    let idx = match axis.iter().position(|v| *v > value) {
        Some(0) => 0,
        Some(i) => i - 1,
        None => n - 2,
    }
    .min(n - 2);
    let span = axis[idx + 1] - axis[idx];
    let frac = if span == 0.0 { 0.0 } else { (value - axis[idx]) / span };
    (idx, frac)
}

fn interpolate(grid: &Array2<f64>, r0: usize, c0: usize, fy: f64, fx: f64) -> f64 {
    grid[[r0, c0]] * (1.0 - fy) * (1.0 - fx)
        + grid[[r0 + 1, c0]] * fy * (1.0 - fx)
        + grid[[r0, c0 + 1]] * (1.0 - fy) * fx
        + grid[[r0 + 1, c0 + 1]] * fy * fx
}

/// Bin an image located by `tie_points` onto a north-up grid in `crs`
/// at `resolution`, snapped to multiples of it.
pub fn orthorectify(
    data: &Array2<f32>,
    tie_points: &TiePointGrid,
    crs: Crs,
    resolution: f64,
    binning: Binning,
) -> ProductResult<(Array2<f32>, GridSpec)> {
    let grid = tie_points.target_grid(crs, resolution)?;
    let binned = orthorectify_onto(data, tie_points, &grid, binning)?;
    Ok((binned, grid))
}

/// Call `visit(row, col, out_row, out_col)` for every image pixel of a
/// `rows` x `cols` image located by `tie_points` that falls on `grid`
fn for_each_cell<F>(dim: (usize, usize), tie_points: &TiePointGrid, grid: &GridSpec, mut visit: F) -> ProductResult<()>
where
    F: FnMut(usize, usize, usize, usize),
{
    let crs = grid
        .crs
        .ok_or_else(|| ProductError::GridMismatch("orthorectification target grid has no CRS".to_string()))?;
    let (rows, cols) = dim;
    log::info!(
        "Orthorectifying {}x{} image onto {}x{} grid in {} at {} m",
        rows,
        cols,
        grid.height,
        grid.width,
        crs,
        grid.transform.resolution()
    );

    // Tie points projected once, then interpolated per pixel
    let mut xs = Array2::<f64>::zeros(tie_points.lat.dim());
    let mut ys = Array2::<f64>::zeros(tie_points.lat.dim());
    for ((idx, lat), lon) in tie_points.lat.indexed_iter().zip(tie_points.lon.iter()) {
        let (x, y) = project(crs, *lon, *lat)?;
        xs[idx] = x;
        ys[idx] = y;
    }

    let line_of = |r: usize| {
        let first = tie_points.lines[0];
        let last = tie_points.lines[tie_points.lines.len() - 1];
        if rows > 1 { first + (last - first) * r as f64 / (rows - 1) as f64 } else { first }
    };
    let pixel_of = |c: usize| {
        let first = tie_points.pixels[0];
        let last = tie_points.pixels[tie_points.pixels.len() - 1];
        if cols > 1 { first + (last - first) * c as f64 / (cols - 1) as f64 } else { first }
    };
    let col_segments: Vec<(usize, f64)> = (0..cols).map(|c| segment(&tie_points.pixels, pixel_of(c))).collect();
    let t = grid.transform;

    for r in 0..rows {
        let (r0, fy) = segment(&tie_points.lines, line_of(r));
        for (c, &(c0, fx)) in col_segments.iter().enumerate() {
            let x = interpolate(&xs, r0, c0, fy, fx);
            let y = interpolate(&ys, r0, c0, fy, fx);
            let (col, row) = t.world_to_pixel(x, y);
            // Unlocated samples (NaN tie points) go nowhere
            if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
                continue;
            }
            let (row, col) = (row as usize, col as usize);
            if row >= grid.height || col >= grid.width {
                continue;
            }
            visit(r, c, row, col);
        }
    }
    Ok(())
}

/// Bin an image located by `tie_points` onto `grid`.
///
/// Nodata input samples are skipped. Output cells receiving no sample
/// are filled from their neighbours when most of those are valid, and
/// left as nodata otherwise.
pub fn orthorectify_onto(
    data: &Array2<f32>,
    tie_points: &TiePointGrid,
    grid: &GridSpec,
    binning: Binning,
) -> ProductResult<Array2<f32>> {
    let mut sum = Array2::<f64>::zeros(grid.shape());
    let mut count = Array2::<u32>::zeros(grid.shape());

    for_each_cell(data.dim(), tie_points, grid, |r, c, row, col| {
        let value = data[[r, c]];
        if value.is_nan() {
            return;
        }
        match binning {
            Binning::Average => {
                sum[[row, col]] += value as f64;
                count[[row, col]] += 1;
            }
            Binning::Nearest => {
                sum[[row, col]] = value as f64;
                count[[row, col]] = 1;
            }
        }
    })?;

    let binned = Array2::from_shape_fn(grid.shape(), |idx| {
        if count[idx] > 0 {
            (sum[idx] / count[idx] as f64) as f32
        } else {
            f32::NAN
        }
    });
    Ok(fill_holes(&binned, binning))
}

/// Bin an integer flag image onto `grid`, last sample wins.
///
/// Cells receiving no sample take the flags of their first located
/// neighbour when most neighbours are located, and 0 otherwise.
pub fn orthorectify_flags(data: &Array2<u32>, tie_points: &TiePointGrid, grid: &GridSpec) -> ProductResult<Array2<u32>> {
    let mut flags = Array2::<u32>::zeros(grid.shape());
    let mut located = Array2::from_elem(grid.shape(), false);
    for_each_cell(data.dim(), tie_points, grid, |r, c, row, col| {
        flags[[row, col]] = data[[r, c]];
        located[[row, col]] = true;
    })?;

    let (rows, cols) = flags.dim();
    let mut filled = flags.clone();
    for ((r, c), is_located) in located.indexed_iter() {
        if *is_located {
            continue;
        }
        let neighbours: Vec<u32> = neighbourhood(r, c, rows, cols)
            .filter(|idx| located[*idx])
            .map(|idx| flags[idx])
            .collect();
        if neighbours.len() >= 5 {
            filled[[r, c]] = neighbours[0];
        }
    }
    Ok(filled)
}

/// The up to 8 cells around `(r, c)`
fn neighbourhood(r: usize, c: usize, rows: usize, cols: usize) -> impl Iterator<Item = (usize, usize)> {
    (-1i64..=1)
        .flat_map(|dr| (-1i64..=1).map(move |dc| (dr, dc)))
        .filter(|d| *d != (0, 0))
        .map(move |(dr, dc)| (r as i64 + dr, c as i64 + dc))
        .filter(move |(nr, nc)| *nr >= 0 && *nc >= 0 && *nr < rows as i64 && *nc < cols as i64)
        .map(|(nr, nc)| (nr as usize, nc as usize))
}

fn fill_holes(binned: &Array2<f32>, binning: Binning) -> Array2<f32> {
    let (rows, cols) = binned.dim();
    let mut filled = binned.clone();
    for ((r, c), value) in binned.indexed_iter() {
        if !value.is_nan() {
            continue;
        }
        let neighbours: Vec<f32> = neighbourhood(r, c, rows, cols)
            .map(|idx| binned[idx])
            .filter(|v| !v.is_nan())
            .collect();
        if neighbours.len() >= 5 {
            filled[[r, c]] = match binning {
                Binning::Average => neighbours.iter().sum::<f32>() / neighbours.len() as f32,
                Binning::Nearest => neighbours[0],
            };
        }
    }
    filled
}
