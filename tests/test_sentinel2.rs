mod common;

use approx::assert_relative_eq;
use common::*;
use eobands::core::calibrate::OpticalCalibration;
use eobands::{BandName, Crs, FamilyKind, OrbitDirection, PixelRequest, ProductError};
use ndarray::Array2;

#[test]
fn test_product_identity() {
    let fixture = S2Fixture::new();
    fixture.add_band("04", ramp(1000.0), 10.0);
    let product = fixture.open();

    assert_eq!(product.kind(), FamilyKind::Sentinel2);
    assert_eq!(product.name(), S2_L1C_NAME);
    assert_eq!(product.product_type(), "L1C");
    assert!(!product.is_degraded());
    assert_eq!(product.get_datetime_str(), "20200824T110631");
    assert_eq!(product.condensed_name(), "20200824T110631_S2_T30TTK_L1C_150432");
    assert!(product.has_band(BandName::SwirCirrus));
    assert!(product.has_band(BandName::Clouds));
    assert!(!product.has_band(BandName::Shadows));
    assert!(!product.has_band(BandName::Vv));
    println!("Opened {:?}", product);
}

#[test]
fn test_metadata_values() {
    let fixture = S2Fixture::new();
    let product = fixture.open();

    let sun = product.get_mean_sun_angles().expect("Failed to read sun angles");
    assert_relative_eq!(sun.azimuth, 152.8);
    assert_relative_eq!(sun.zenith, 35.2);
    assert_relative_eq!(product.get_cloud_cover().expect("Failed to read cloud cover"), 12.5);
    assert_eq!(
        product.get_orbit_direction().expect("Failed to read orbit direction"),
        OrbitDirection::Descending
    );
}

#[test]
fn test_bands_share_the_requested_grid() {
    let fixture = S2Fixture::new();
    fixture.add_band("04", ramp(1000.0), 10.0);
    fixture.add_band("11", Array2::from_elem((TILE_SIZE / 2, TILE_SIZE / 2), 2000.0), 20.0);
    let product = fixture.open();

    let bands = product
        .load_bands(&[BandName::Red, BandName::Swir1], PixelRequest::Native)
        .expect("Failed to load bands");
    let red = &bands[&BandName::Red];
    let swir = &bands[&BandName::Swir1];
    assert_eq!(red.shape(), (TILE_SIZE, TILE_SIZE));
    assert_eq!(red.grid, swir.grid);
    assert_eq!(red.crs(), Some(Crs::from_epsg(S2_CRS)));
    assert_relative_eq!(red.transform().pixel_width, 10.0);
    for value in swir.data.iter() {
        assert_relative_eq!(*value, 0.2, epsilon = 1e-6);
    }

    let coarse = product
        .load_bands(&[BandName::Red, BandName::Swir1], PixelRequest::Resolution(20.0))
        .expect("Failed to load bands at 20 m");
    assert_eq!(coarse[&BandName::Red].shape(), (TILE_SIZE / 2, TILE_SIZE / 2));
    assert_eq!(coarse[&BandName::Red].grid, coarse[&BandName::Swir1].grid);
    assert_relative_eq!(coarse[&BandName::Red].transform().pixel_width, 20.0);
    assert_relative_eq!(coarse[&BandName::Red].transform().top_left_x, ORIGIN_X);

    let sized = product
        .load_band(BandName::Red, PixelRequest::Size { width: 3, height: 2 })
        .expect("Failed to load band by size");
    assert_eq!(sized.shape(), (2, 3));
}

#[test]
fn test_reflectance_round_trip() {
    let fixture = S2Fixture::new();
    let raw = ramp(1000.0);
    fixture.add_band("04", raw.clone(), 10.0);
    let product = fixture.open();

    let red = product
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("Failed to load red");
    let calibration = OpticalCalibration::new(0.0, 10000.0).expect("Invalid calibration");
    for (reflectance, dn) in red.data.iter().zip(raw.iter()) {
        assert_relative_eq!(*reflectance, dn / 10000.0, epsilon = 1e-7);
        assert_relative_eq!(calibration.to_raw(*reflectance), *dn, epsilon = 1e-2);
    }
}

#[test]
fn test_loaded_arrays_are_owned_by_the_caller() {
    let fixture = S2Fixture::new();
    fixture.add_band("04", ramp(1000.0), 10.0);
    let product = fixture.open();
    let path = fixture.raster_path(&S2Fixture::band_member("04"));

    let mut first = product
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("Failed to load red");
    first.data.fill(-1.0);
    let second = product
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("Failed to reload red");

    assert_relative_eq!(second.data[[0, 0]], 0.1, epsilon = 1e-7);
    assert_eq!(fixture.io.read_count(&path), 1, "second load should come from the band cache");
}

#[test]
fn test_crs_is_computed_once() {
    let fixture = S2Fixture::new();
    fixture.add_band("04", ramp(1000.0), 10.0);
    let product = fixture.open();
    let path = fixture.raster_path(&S2Fixture::band_member("04"));

    for _ in 0..3 {
        assert_eq!(product.crs().expect("Failed to get CRS"), Crs::from_epsg(S2_CRS));
    }
    assert_eq!(fixture.io.info_count(&path), 1);

    let extent = product.extent().expect("Failed to get extent");
    assert_relative_eq!(extent.min_x, ORIGIN_X);
    assert_relative_eq!(extent.max_y, ORIGIN_Y);
    assert_relative_eq!(extent.width(), 60.0);
}

#[test]
fn test_band_paths() {
    let fixture = S2Fixture::new();
    fixture.add_band("04", ramp(1000.0), 10.0);
    fixture.add_band("08", ramp(3000.0), 10.0);
    let product = fixture.open();

    let paths = product
        .get_band_paths(&[BandName::Red, BandName::Nir], None)
        .expect("Failed to resolve band paths");
    assert_eq!(paths[&BandName::Red], fixture.raster_path(&S2Fixture::band_member("04")));
    assert_eq!(paths[&BandName::Nir], fixture.raster_path(&S2Fixture::band_member("08")));

    // Mapped, but the file is not in the product
    match product.get_band_paths(&[BandName::Green], None) {
        Err(ProductError::BandNotFound { band, .. }) => assert_eq!(band, BandName::Green),
        other => panic!("expected BandNotFound, got {:?}", other),
    }
}

#[test]
fn test_cirrus_band_is_unknown_on_l2a() {
    let fixture = S2Fixture::bare(S2_L2A_NAME);
    let product = fixture.open();

    assert_eq!(product.product_type(), "L2A");
    assert!(!product.has_band(BandName::SwirCirrus));
    match product.load_bands(&[BandName::Red, BandName::SwirCirrus], PixelRequest::Native) {
        Err(ProductError::UnknownBand { band, .. }) => assert_eq!(band, BandName::SwirCirrus),
        other => panic!("expected UnknownBand, got {:?}", other),
    }
}

#[test]
fn test_shadows_are_not_produced() {
    let fixture = S2Fixture::new();
    fixture.add_band("04", ramp(1000.0), 10.0);
    let product = fixture.open();

    let err = product
        .load_band(BandName::Shadows, PixelRequest::Native)
        .expect_err("SHADOWS should be unsupported");
    assert!(matches!(
        err,
        ProductError::UnsupportedBand { band: BandName::Shadows, .. }
    ));
    assert!(err.is_invalid_type());
}

#[test]
fn test_cloud_bands_from_gml() {
    let fixture = S2Fixture::new();
    fixture.add_band("04", ramp(1000.0), 10.0);
    fixture.write_member(
        &S2Fixture::mask_member("CLOUDS", "00"),
        &gml_mask(&[
            ("OPAQUE.0", "OPAQUE", pixel_box(0..2, 0..2)),
            ("CIRRUS.0", "CIRRUS", pixel_box(4..6, 4..6)),
        ]),
    );
    let product = fixture.open();

    let clouds = product
        .load_bands(&[BandName::Clouds, BandName::Cirrus, BandName::AllClouds], PixelRequest::Native)
        .expect("Failed to load cloud bands");
    let opaque = &clouds[&BandName::Clouds];
    let cirrus = &clouds[&BandName::Cirrus];
    let all = &clouds[&BandName::AllClouds];

    assert_eq!(opaque.data[[0, 0]], 1.0);
    assert_eq!(opaque.data[[5, 5]], 0.0);
    assert_eq!(cirrus.data[[5, 5]], 1.0);
    assert_eq!(cirrus.data[[0, 0]], 0.0);
    assert_eq!(opaque.data.sum(), 4.0);
    assert_eq!(cirrus.data.sum(), 4.0);
    assert_eq!(all.data.sum(), 8.0);
    assert_eq!(opaque.grid, product.default_transform(PixelRequest::Native).expect("No grid"));
}

#[test]
fn test_degraded_mode_falls_back() {
    init_capture_logger();
    let fixture = S2Fixture::bare(S2_L1C_NAME);
    fixture.write_member("MTD_MSIL1C.xml", "<n1:Level-1C_User_Product><n1:General_Info>");
    fixture.add_band("04", ramp(1000.0), 10.0);

    let product = fixture.open();
    assert!(product.is_degraded());

    assert_eq!(product.get_cloud_cover().expect("Cloud cover should fall back"), 0.0);
    let sun = product.get_mean_sun_angles().expect("Sun angles should fall back");
    assert_eq!((sun.azimuth, sun.zenith), (0.0, 0.0));
    assert_eq!(
        product.get_orbit_direction().expect("Orbit should fall back"),
        OrbitDirection::Descending
    );
    assert!(!captured_warnings("Cloud cover of").is_empty());

    let paths = product
        .get_band_paths(&[BandName::Red], None)
        .expect("Band paths do not need metadata");
    assert!(paths[&BandName::Red].ends_with("_B04.jp2"));

    // Generation defaults of baseline 2.09
    let red = product
        .load_band(BandName::Red, PixelRequest::Native)
        .expect("Bands load without metadata");
    assert_relative_eq!(red.data[[0, 0]], 0.1, epsilon = 1e-7);
}

#[test]
fn test_strict_mode_rejects_missing_metadata() {
    let fixture = S2Fixture::bare(S2_L1C_NAME);
    fixture.add_band("04", ramp(1000.0), 10.0);
    let config = fixture.config().strict(true);

    let result = eobands::Product::open(&fixture.path, eobands::IoBackends::new(fixture.io.clone()), config);
    assert!(result.is_err());
}

#[test]
fn test_renamed_product_is_recovered() {
    let fixture = S2Fixture::bare("renamed_product");
    fixture.write_member(
        "MTD_MSIL1C.xml",
        &format!("<Level-1C_User_Product><PRODUCT_URI>{}.SAFE</PRODUCT_URI></Level-1C_User_Product>", S2_L1C_NAME),
    );
    let product = fixture.open();
    assert_eq!(product.kind(), FamilyKind::Sentinel2);
    assert_eq!(product.name(), S2_L1C_NAME);
}
