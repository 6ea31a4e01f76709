mod common;

use common::*;
use eobands::{BandName, PixelRequest, ReaderConfig};
use ndarray::Array2;

/// Footprint missing the last column, one nodata pixel at the top-left corner
/// and a partially corrected pixel which must stay valid
fn masked_fixture() -> S2Fixture {
    let fixture = S2Fixture::new();
    fixture.add_band_with_footprint(
        "04",
        ramp(1000.0),
        10.0,
        &gml_mask(&[("detector_footprint-B04-1", "DETECTOR_FOOTPRINT", pixel_box(0..TILE_SIZE, 0..TILE_SIZE - 1))]),
    );
    fixture.write_member(
        &S2Fixture::mask_member("NODATA", "04"),
        &gml_mask(&[
            ("nodata.0", "QT_NODATA_PIXELS", pixel_box(0..1, 0..1)),
            ("partially_corrected.0", "QT_PARTIALLY_CORRECTED_PIXELS", pixel_box(2..3, 2..3)),
        ]),
    );
    fixture
}

fn expected_invalid() -> Array2<bool> {
    Array2::from_shape_fn((TILE_SIZE, TILE_SIZE), |(r, c)| c == TILE_SIZE - 1 || (r, c) == (0, 0))
}

#[test]
fn test_vector_masks_null_invalid_pixels() {
    let fixture = masked_fixture();
    let product = fixture.open();

    let red = product
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("Failed to load red");
    let invalid = red.data.mapv(|v| v.is_nan());
    assert_eq!(invalid, expected_invalid());
    assert_eq!(red.count_valid(), TILE_SIZE * TILE_SIZE - TILE_SIZE - 1);
    assert_eq!(red.shape(), (TILE_SIZE, TILE_SIZE));
    assert!(red.nodata().is_nan());
    assert!(!red.data[[2, 2]].is_nan(), "partially corrected pixels are valid");
}

#[test]
fn test_masks_are_deterministic() {
    let fixture = masked_fixture();
    let config = ReaderConfig {
        cache_bands: false,
        ..fixture.config()
    };
    let product = fixture.open_with(config);

    let first = product
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("Failed to load red")
        .valid_mask();
    for _ in 0..3 {
        let again = product
            .load_band(BandName::Red, PixelRequest::Native)
            .expect("Failed to reload red")
            .valid_mask();
        assert_eq!(first, again);
    }

    let reopened = fixture
        .open()
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("Failed to load red from a new instance")
        .valid_mask();
    assert_eq!(first, reopened);
}

#[test]
fn test_empty_detector_footprint_falls_back_to_raw_zero() {
    init_capture_logger();
    let fixture = S2Fixture::new();
    let mut raw = ramp(1000.0);
    raw.row_mut(TILE_SIZE - 1).fill(0.0);
    fixture.add_band_with_footprint("04", raw, 10.0, &empty_gml_mask());
    let product = fixture.open();

    let red = product
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("An empty footprint must not fail the load");
    let invalid = red.data.mapv(|v| v.is_nan());
    let expected = Array2::from_shape_fn((TILE_SIZE, TILE_SIZE), |(r, _)| r == TILE_SIZE - 1);
    assert_eq!(invalid, expected);

    let warnings = captured_warnings("DETFOO mask of RED is empty or missing");
    assert!(!warnings.is_empty(), "the fallback must be reported");
    println!("Fallback warning: {}", warnings[0]);
}
