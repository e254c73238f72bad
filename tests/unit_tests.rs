// Unit tests for imcui-api

use image::{DynamicImage, GrayImage, Luma};
use imcui_api::config::{ApiSettings, FeatureSettings, MatcherSettings};
use imcui_api::core::{
    array_to_json, build_engine, postprocess, Device, EngineValue, FastEngine, FeatureEngine,
    MATCH_SKIP_KEYS,
};
use imcui_api::services::client::json_to_array;
use ndarray::{ArrayD, IxDyn};
use serde_json::Value;

fn create_blocks_image(width: u32, height: u32) -> DynamicImage {
    let mut img = GrayImage::from_pixel(width, height, Luma([20]));
    for (x0, y0, size) in [(12u32, 12u32, 14u32), (36, 20, 12), (18, 40, 10)] {
        for y in y0..(y0 + size).min(height) {
            for x in x0..(x0 + size).min(width) {
                img.put_pixel(x, y, Luma([200]));
            }
        }
    }
    DynamicImage::ImageLuma8(img)
}

fn default_engine() -> FastEngine {
    FastEngine::new(FeatureSettings::default(), MatcherSettings::default(), Device::Cpu).unwrap()
}

#[test]
fn test_build_engine_from_default_settings() {
    let settings = ApiSettings::default();
    let engine = build_engine(&settings, Device::Cpu).unwrap();
    let output = engine.extract(&create_blocks_image(64, 64), 10, false).unwrap();
    assert!(output.iter().any(|(k, _)| k == "keypoints"));
}

#[test]
fn test_extract_caps_every_array() {
    let engine = default_engine();
    let output = engine.extract(&create_blocks_image(64, 64), 50, false).unwrap();

    for (key, value) in &output {
        if let Some(rows) = value.leading_dim() {
            assert!(rows <= 50, "{} has {} rows", key, rows);
        }
    }
}

#[test]
fn test_zero_cap_uses_configured_limit() {
    let feature = FeatureSettings { max_keypoints: 2, ..FeatureSettings::default() };
    let engine = FastEngine::new(feature, MatcherSettings::default(), Device::Cpu).unwrap();
    let output = engine.extract(&create_blocks_image(64, 64), 0, false).unwrap();

    let keypoints = output.iter().find(|(k, _)| k == "keypoints").unwrap();
    assert!(keypoints.1.leading_dim().unwrap() <= 2);
}

#[test]
fn test_include_image_attaches_pixels() {
    let feature = FeatureSettings { include_image: true, ..FeatureSettings::default() };
    let engine = FastEngine::new(feature, MatcherSettings::default(), Device::Cpu).unwrap();
    let output = engine.extract(&create_blocks_image(64, 48), 10, false).unwrap();

    let (_, image) = output.iter().find(|(k, _)| k == "image_orig").unwrap();
    match image {
        EngineValue::Pixels(p) => assert_eq!(p.shape(), &[48, 64]),
        other => panic!("unexpected image value {:?}", other),
    }
}

#[test]
fn test_match_response_excludes_original_images() {
    let engine = default_engine();
    let image = create_blocks_image(64, 64);
    let pred = postprocess(engine.match_pair(&image, &image).unwrap(), &MATCH_SKIP_KEYS);

    assert!(!pred.contains_key("image0_orig"));
    assert!(!pred.contains_key("image1_orig"));
    assert!(pred.contains_key("mkeypoints0"));
}

#[test]
fn test_matches_point_at_valid_indices() {
    let engine = default_engine();
    let image = create_blocks_image(64, 64);
    let pred = postprocess(engine.match_pair(&image, &image).unwrap(), &MATCH_SKIP_KEYS);

    let n1 = pred["keypoints1"].as_array().unwrap().len() as i64;
    for m in pred["matches0"].as_array().unwrap() {
        let m = m.as_i64().unwrap();
        assert!(m == -1 || (0..n1).contains(&m));
    }
}

#[test]
fn test_array_json_round_trip_keeps_values() {
    let original = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.1, -2.5, 3.0, 1e-9, 42.0, 7.125]).unwrap();
    let json: Value = array_to_json(&original);
    let text = serde_json::to_string(&json).unwrap();
    let decoded = json_to_array(&serde_json::from_str(&text).unwrap()).unwrap();
    assert_eq!(decoded, original);
}
