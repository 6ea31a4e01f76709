//! In-memory resampling of band and mask grids.

use ndarray::Array2;

use crate::io::raster::Resampling;
use crate::types::{ProductError, ProductResult};

/// Multilooking parameters: block size of the averaging window
#[derive(Debug, Clone, Copy)]
pub struct MultilookParams {
    pub row_looks: usize,
    pub col_looks: usize,
}

/// Block-average `data` by the given looks, ignoring nodata samples.
/// A block with no valid sample stays nodata.
pub fn multilook(data: &Array2<f32>, params: MultilookParams) -> ProductResult<Array2<f32>> {
    let (rows, cols) = data.dim();
    let out_rows = rows / params.row_looks.max(1);
    let out_cols = cols / params.col_looks.max(1);

    if out_rows == 0 || out_cols == 0 {
        return Err(ProductError::Raster(
            "Multilook parameters too large for input image".to_string(),
        ));
    }

    log::debug!(
        "Applying multilook: {}x{} looks to {}x{} image",
        params.row_looks,
        params.col_looks,
        rows,
        cols
    );

    let mut output = Array2::<f32>::from_elem((out_rows, out_cols), f32::NAN);
    for out_row in 0..out_rows {
        for out_col in 0..out_cols {
            let mut sum = 0.0f32;
            let mut count = 0;
            for r in 0..params.row_looks {
                for c in 0..params.col_looks {
                    let value = data[[out_row * params.row_looks + r, out_col * params.col_looks + c]];
                    if !value.is_nan() {
                        sum += value;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                output[[out_row, out_col]] = sum / (count as f32);
            }
        }
    }
    Ok(output)
}

/// Resample `data` to `shape` over the same footprint
pub fn resample(data: &Array2<f32>, shape: (usize, usize), method: Resampling) -> Array2<f32> {
    if data.dim() == shape {
        return data.clone();
    }
    let (rows, cols) = data.dim();
    let (out_rows, out_cols) = shape;

    if let Resampling::Average = method {
        if rows % out_rows == 0 && cols % out_cols == 0 {
            let params = MultilookParams {
                row_looks: rows / out_rows,
                col_looks: cols / out_cols,
            };
            if let Ok(out) = multilook(data, params) {
                return out;
            }
        }
    }

    let sy = rows as f64 / out_rows as f64;
    let sx = cols as f64 / out_cols as f64;
    Array2::from_shape_fn(shape, |(r, c)| {
        let y = (r as f64 + 0.5) * sy - 0.5;
        let x = (c as f64 + 0.5) * sx - 0.5;
        match method {
            Resampling::Bilinear => bilinear(data, y, x),
            _ => nearest(data, y, x),
        }
    })
}

/// Nearest-neighbour resampling of a mask or flag grid to `shape`
pub fn resample_mask<T: Copy>(mask: &Array2<T>, shape: (usize, usize)) -> Array2<T> {
    if mask.dim() == shape {
        return mask.clone();
    }
    let (rows, cols) = mask.dim();
    let sy = rows as f64 / shape.0 as f64;
    let sx = cols as f64 / shape.1 as f64;
    Array2::from_shape_fn(shape, |(r, c)| {
        let y = (((r as f64 + 0.5) * sy) as usize).min(rows - 1);
        let x = (((c as f64 + 0.5) * sx) as usize).min(cols - 1);
        mask[[y, x]]
    })
}

fn nearest(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (rows, cols) = data.dim();
    let r = (y.round().max(0.0) as usize).min(rows - 1);
    let c = (x.round().max(0.0) as usize).min(cols - 1);
    data[[r, c]]
}

/// Bilinear sample at fractional pixel position. Nodata neighbours make the sample nodata.
pub fn bilinear(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (rows, cols) = data.dim();
    let y = y.clamp(0.0, (rows - 1) as f64);
    let x = x.clamp(0.0, (cols - 1) as f64);
    let r0 = y.floor() as usize;
    let c0 = x.floor() as usize;
    let r1 = (r0 + 1).min(rows - 1);
    let c1 = (c0 + 1).min(cols - 1);
    let fy = (y - r0 as f64) as f32;
    let fx = (x - c0 as f64) as f32;

    data[[r0, c0]] * (1.0 - fy) * (1.0 - fx)
        + data[[r1, c0]] * fy * (1.0 - fx)
        + data[[r0, c1]] * (1.0 - fy) * fx
        + data[[r1, c1]] * fy * fx
}
