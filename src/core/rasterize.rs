//! Burning polygons onto a pixel grid, and the reverse hull of a valid area.

use geo::{BoundingRect, ConvexHull, Coord, MultiPoint, Point, Polygon};
use ndarray::Array2;

use crate::types::GridSpec;

/// Pixels of `grid` whose center lies inside any of `polygons`.
///
/// Rings are filled with the even-odd rule, so interior rings cut holes.
/// The grid is assumed north-up.
pub fn rasterize<'a, I>(polygons: I, grid: &GridSpec) -> Array2<bool>
where
    I: IntoIterator<Item = &'a Polygon<f64>>,
{
    let mut burned = Array2::from_elem(grid.shape(), false);
    let t = &grid.transform;
    if grid.width == 0 || grid.height == 0 || t.pixel_width == 0.0 || t.pixel_height == 0.0 {
        return burned;
    }

    for polygon in polygons {
        let Some(rect) = polygon.bounding_rect() else {
            continue;
        };
        let r_a = (rect.min().y - t.top_left_y) / t.pixel_height - 0.5;
        let r_b = (rect.max().y - t.top_left_y) / t.pixel_height - 0.5;
        let row_start = r_a.min(r_b).ceil().max(0.0) as usize;
        let row_end = (r_a.max(r_b).floor() + 1.0).clamp(0.0, grid.height as f64) as usize;

        let rings: Vec<&geo::LineString<f64>> = std::iter::once(polygon.exterior())
            .chain(polygon.interiors().iter())
            .collect();

        let mut crossings: Vec<f64> = Vec::new();
        for row in row_start..row_end {
            let y = t.top_left_y + (row as f64 + 0.5) * t.pixel_height;
            crossings.clear();
            for ring in &rings {
                for line in ring.lines() {
                    let (p, q) = (line.start, line.end);
                    if (p.y > y) != (q.y > y) {
                        crossings.push(p.x + (y - p.y) * (q.x - p.x) / (q.y - p.y));
                    }
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));

            for pair in crossings.chunks_exact(2) {
                let (x0, x1) = (pair[0], pair[1]);
                let c_a = (x0 - t.top_left_x) / t.pixel_width - 0.5;
                let c_b = (x1 - t.top_left_x) / t.pixel_width - 0.5;
                let col_start = c_a.min(c_b).ceil().max(0.0) as usize;
                let col_end = c_a.max(c_b).ceil().clamp(0.0, grid.width as f64) as usize;
                for col in col_start..col_end {
                    burned[[row, col]] = true;
                }
            }
        }
    }
    burned
}

/// Convex hull of the valid pixels of a grid, in world coordinates
pub fn valid_area_hull(valid: &Array2<bool>, grid: &GridSpec) -> Option<Polygon<f64>> {
    let t = &grid.transform;
    let mut corners: Vec<Point<f64>> = Vec::new();

    for (row, line) in valid.rows().into_iter().enumerate() {
        let first = line.iter().position(|v| *v);
        let last = line.iter().rposition(|v| *v);
        if let (Some(first), Some(last)) = (first, last) {
            for (col, row_edge) in [(first, row), (first, row + 1), (last + 1, row), (last + 1, row + 1)] {
                let (x, y) = t.pixel_to_world(col as f64, row_edge as f64);
                corners.push(Point(Coord { x, y }));
            }
        }
    }

    if corners.is_empty() {
        return None;
    }
    Some(MultiPoint::new(corners).convex_hull())
}
