use crate::config::{FeatureSettings, MatcherSettings};
use crate::core::codec::image_to_pixels;
use crate::core::engine::{Device, EngineError, EngineOutput, EngineValue, FeatureEngine};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use imageproc::corners::{corners_fast9, Corner};
use ndarray::{Array1, Array2};
use std::cmp::Ordering;

/// Samples per axis of the descriptor grid
const GRID: usize = 8;

/// Dimension of every descriptor
pub const DESCRIPTOR_DIM: usize = GRID * GRID;

/// Keypoints and descriptors of one image
#[derive(Debug, Clone)]
struct Features {
    /// Coordinates in the detector's (possibly downscaled) frame
    keypoints: Vec<[f64; 2]>,
    /// Coordinates in the input image's frame
    keypoints_orig: Vec<[f64; 2]>,
    scores: Vec<f64>,
    descriptors: Vec<Vec<f64>>,
}

/// FAST-9 corner detector with normalized patch descriptors and
/// mutual-nearest-neighbour matching
///
/// # Pipeline
/// 1. Grayscale conversion and optional downscale to `resize_max`
/// 2. FAST-9 detection, border rejection, strongest-first ordering
/// 3. Zero-mean, unit-norm descriptors sampled on an 8×8 grid
/// 4. Mutual nearest neighbours filtered by similarity and ratio test
#[derive(Debug, Clone)]
pub struct FastEngine {
    feature: FeatureSettings,
    matcher: MatcherSettings,
}

impl FastEngine {
    pub fn new(
        feature: FeatureSettings,
        matcher: MatcherSettings,
        device: Device,
    ) -> Result<Self, EngineError> {
        if matcher.name != "mutual-nn" {
            return Err(EngineError::UnsupportedModel(matcher.name));
        }
        if feature.descriptor_radius == 0 {
            return Err(EngineError::InvalidInput(
                "descriptor_radius must be positive".to_string(),
            ));
        }
        if device != Device::Cpu {
            tracing::warn!("FAST engine has no {} backend, running on cpu", device);
        }

        Ok(Self { feature, matcher })
    }

    fn cap(&self, max_keypoints: i64) -> usize {
        if max_keypoints <= 0 {
            self.feature.max_keypoints
        } else {
            max_keypoints as usize
        }
    }

    /// Downscale so the longest side fits `resize_max`, returning the
    /// per-axis factor mapping detector coordinates back to the input
    fn prepare(&self, gray: GrayImage) -> (GrayImage, f64, f64) {
        let (w, h) = gray.dimensions();
        match self.feature.resize_max {
            Some(limit) if limit > 0 && w.max(h) > limit => {
                let scale = limit as f64 / w.max(h) as f64;
                let nw = ((w as f64 * scale).round() as u32).max(1);
                let nh = ((h as f64 * scale).round() as u32).max(1);
                let resized = imageops::resize(&gray, nw, nh, FilterType::Triangle);
                (resized, w as f64 / nw as f64, h as f64 / nh as f64)
            }
            _ => (gray, 1.0, 1.0),
        }
    }

    fn detect(&self, image: &DynamicImage, cap: usize) -> Result<Features, EngineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::InvalidInput("image has no pixels".to_string()));
        }

        let (gray, sx, sy) = self.prepare(image.to_luma8());
        let (w, h) = gray.dimensions();
        let r = self.feature.descriptor_radius;

        let mut corners: Vec<Corner> = corners_fast9(&gray, self.feature.threshold)
            .into_iter()
            .filter(|c| c.x >= r && c.y >= r && c.x + r < w && c.y + r < h)
            .collect();

        corners.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.y.cmp(&b.y))
                .then_with(|| a.x.cmp(&b.x))
        });
        corners.truncate(cap);

        tracing::debug!("Detected {} keypoints on {}x{} image", corners.len(), w, h);

        let mut features = Features {
            keypoints: Vec::with_capacity(corners.len()),
            keypoints_orig: Vec::with_capacity(corners.len()),
            scores: Vec::with_capacity(corners.len()),
            descriptors: Vec::with_capacity(corners.len()),
        };

        for corner in &corners {
            let (x, y) = (corner.x as f64, corner.y as f64);
            features.keypoints.push([x, y]);
            features.keypoints_orig.push([(x + 0.5) * sx - 0.5, (y + 0.5) * sy - 0.5]);
            features.scores.push(corner.score as f64);
            features.descriptors.push(describe(&gray, corner.x, corner.y, r));
        }

        Ok(features)
    }
}

/// Sample a GRID×GRID patch around (x, y), normalized to zero mean and unit norm
fn describe(gray: &GrayImage, x: u32, y: u32, radius: u32) -> Vec<f64> {
    let r = radius as i64;
    let offset = |k: usize| (k as i64 * 2 * r) / (GRID as i64 - 1) - r;

    let mut values = Vec::with_capacity(DESCRIPTOR_DIM);
    for gy in 0..GRID {
        for gx in 0..GRID {
            let px = (x as i64 + offset(gx)) as u32;
            let py = (y as i64 + offset(gy)) as u32;
            values.push(gray.get_pixel(px, py)[0] as f64);
        }
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter_mut().for_each(|v| *v -= mean);

    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > f64::EPSILON {
        values.iter_mut().for_each(|v| *v /= norm);
    }

    values
}

fn points_to_array(points: &[[f64; 2]]) -> Array2<f64> {
    let flat: Vec<f64> = points.iter().flat_map(|p| p.iter().copied()).collect();
    Array2::from_shape_vec((points.len(), 2), flat).unwrap_or_else(|_| Array2::zeros((0, 2)))
}

fn descriptors_to_array(descriptors: &[Vec<f64>], binarize: bool) -> Array2<f64> {
    let flat: Vec<f64> = descriptors
        .iter()
        .flatten()
        .map(|&v| if !binarize { v } else if v > 0.0 { 1.0 } else { 0.0 })
        .collect();
    Array2::from_shape_vec((descriptors.len(), DESCRIPTOR_DIM), flat)
        .unwrap_or_else(|_| Array2::zeros((0, DESCRIPTOR_DIM)))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Best and second-best similarity of `query` against `candidates`
fn nearest(query: &[f64], candidates: &[Vec<f64>]) -> Option<(usize, f64, Option<f64>)> {
    let mut best: Option<(usize, f64)> = None;
    let mut second: Option<f64> = None;

    for (j, candidate) in candidates.iter().enumerate() {
        let sim = dot(query, candidate);
        match best {
            Some((_, b)) if sim <= b => {
                if second.map_or(true, |s| sim > s) {
                    second = Some(sim);
                }
            }
            _ => {
                second = best.map(|(_, b)| b);
                best = Some((j, sim));
            }
        }
    }

    best.map(|(j, sim)| (j, sim, second))
}

/// Euclidean distance between unit vectors with cosine similarity `sim`
fn unit_distance(sim: f64) -> f64 {
    (2.0 - 2.0 * sim).max(0.0).sqrt()
}

impl FeatureEngine for FastEngine {
    fn extract(
        &self,
        image: &DynamicImage,
        max_keypoints: i64,
        binarize: bool,
    ) -> Result<EngineOutput, EngineError> {
        let features = self.detect(image, self.cap(max_keypoints))?;

        let mut output: EngineOutput = vec![
            ("keypoints".to_string(), EngineValue::Float(points_to_array(&features.keypoints).into_dyn())),
            ("keypoints_orig".to_string(), EngineValue::Float(points_to_array(&features.keypoints_orig).into_dyn())),
            ("descriptors".to_string(), EngineValue::Float(descriptors_to_array(&features.descriptors, binarize).into_dyn())),
            ("scores".to_string(), EngineValue::Float(Array1::from(features.scores).into_dyn())),
            (
                "image_size".to_string(),
                EngineValue::Int(Array1::from(vec![image.width() as i64, image.height() as i64]).into_dyn()),
            ),
            ("feature_type".to_string(), EngineValue::Text(self.feature.name.clone())),
        ];

        if self.feature.include_image {
            let pixels = image_to_pixels(image)
                .map_err(|e| EngineError::Inference(e.to_string()))?;
            output.push(("image_orig".to_string(), EngineValue::Pixels(pixels)));
        }

        Ok(output)
    }

    fn match_pair(
        &self,
        image0: &DynamicImage,
        image1: &DynamicImage,
    ) -> Result<EngineOutput, EngineError> {
        let cap = self.feature.max_keypoints;
        let f0 = self.detect(image0, cap)?;
        let f1 = self.detect(image1, cap)?;

        // Reverse lookup for the mutual check
        let backward: Vec<Option<usize>> = f1
            .descriptors
            .iter()
            .map(|d| nearest(d, &f0.descriptors).map(|(i, _, _)| i))
            .collect();

        let mut matches0 = vec![-1i64; f0.descriptors.len()];
        let mut mkpts0 = Vec::new();
        let mut mkpts1 = Vec::new();
        let mut mconf = Vec::new();

        for (i, descriptor) in f0.descriptors.iter().enumerate() {
            let Some((j, sim, second)) = nearest(descriptor, &f1.descriptors) else {
                continue;
            };
            if backward[j] != Some(i) || sim < self.matcher.min_similarity {
                continue;
            }
            if let Some(second) = second {
                if unit_distance(sim) > self.matcher.ratio_threshold * unit_distance(second) {
                    continue;
                }
            }

            matches0[i] = j as i64;
            mkpts0.push(f0.keypoints_orig[i]);
            mkpts1.push(f1.keypoints_orig[j]);
            mconf.push(sim.clamp(0.0, 1.0));
        }

        tracing::debug!(
            "Matched {} of {}/{} keypoints",
            mconf.len(),
            f0.keypoints.len(),
            f1.keypoints.len()
        );

        let pixels0 = image_to_pixels(image0).map_err(|e| EngineError::Inference(e.to_string()))?;
        let pixels1 = image_to_pixels(image1).map_err(|e| EngineError::Inference(e.to_string()))?;

        Ok(vec![
            ("keypoints0".to_string(), EngineValue::Float(points_to_array(&f0.keypoints_orig).into_dyn())),
            ("keypoints1".to_string(), EngineValue::Float(points_to_array(&f1.keypoints_orig).into_dyn())),
            ("mkeypoints0".to_string(), EngineValue::Float(points_to_array(&mkpts0).into_dyn())),
            ("mkeypoints1".to_string(), EngineValue::Float(points_to_array(&mkpts1).into_dyn())),
            ("mconf".to_string(), EngineValue::Float(Array1::from(mconf).into_dyn())),
            ("matches0".to_string(), EngineValue::Int(Array1::from(matches0).into_dyn())),
            ("image0_orig".to_string(), EngineValue::Pixels(pixels0)),
            ("image1_orig".to_string(), EngineValue::Pixels(pixels1)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

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

    fn create_engine() -> FastEngine {
        FastEngine::new(FeatureSettings::default(), MatcherSettings::default(), Device::Cpu).unwrap()
    }

    fn value<'a>(output: &'a EngineOutput, key: &str) -> &'a EngineValue {
        &output.iter().find(|(k, _)| k == key).unwrap().1
    }

    #[test]
    fn test_extract_finds_block_corners() {
        let engine = create_engine();
        let output = engine.extract(&create_blocks_image(64, 64), 50, false).unwrap();

        let keypoints = value(&output, "keypoints").leading_dim().unwrap();
        assert!(keypoints > 0, "expected corners on the synthetic blocks");
        assert!(keypoints <= 50);
        assert_eq!(value(&output, "descriptors").leading_dim(), Some(keypoints));
        assert_eq!(value(&output, "scores").leading_dim(), Some(keypoints));
    }

    #[test]
    fn test_extract_respects_cap() {
        let engine = create_engine();
        let output = engine.extract(&create_blocks_image(64, 64), 3, false).unwrap();
        assert!(value(&output, "keypoints").leading_dim().unwrap() <= 3);
    }

    #[test]
    fn test_single_keypoint_cap() {
        let engine = create_engine();
        let output = engine.extract(&create_blocks_image(64, 64), 1, false).unwrap();

        for key in ["keypoints", "keypoints_orig", "descriptors", "scores"] {
            assert!(value(&output, key).leading_dim().unwrap() <= 1, "{} exceeds cap", key);
        }
        // width and height, independent of the cap
        assert_eq!(value(&output, "image_size").leading_dim(), Some(2));
    }

    #[test]
    fn test_binarized_descriptors_are_bits() {
        let engine = create_engine();
        let output = engine.extract(&create_blocks_image(64, 64), 20, true).unwrap();

        match value(&output, "descriptors") {
            EngineValue::Float(d) => assert!(d.iter().all(|&v| v == 0.0 || v == 1.0)),
            other => panic!("unexpected descriptor value {:?}", other),
        }
    }

    #[test]
    fn test_flat_image_has_no_keypoints() {
        let engine = create_engine();
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(32, 32, Luma([128])));
        let output = engine.extract(&flat, 10, false).unwrap();
        assert_eq!(value(&output, "keypoints").leading_dim(), Some(0));
    }

    #[test]
    fn test_match_identical_images() {
        let engine = create_engine();
        let image = create_blocks_image(64, 64);
        let output = engine.match_pair(&image, &image).unwrap();

        let matched = value(&output, "mkeypoints0").leading_dim().unwrap();
        assert!(matched > 0);
        assert_eq!(value(&output, "mkeypoints1").leading_dim(), Some(matched));
        assert_eq!(value(&output, "mconf").leading_dim(), Some(matched));
        assert!(output.iter().any(|(k, _)| k == "image0_orig"));
    }

    #[test]
    fn test_downscale_maps_keypoints_back() {
        let feature = FeatureSettings { resize_max: Some(32), ..FeatureSettings::default() };
        let engine = FastEngine::new(feature, MatcherSettings::default(), Device::Cpu).unwrap();
        let (_, sx, sy) = engine.prepare(create_blocks_image(64, 64).to_luma8());
        assert_eq!((sx, sy), (2.0, 2.0));
    }

    #[test]
    fn test_rejects_unknown_matcher() {
        let matcher = MatcherSettings { name: "lightglue".to_string(), ..MatcherSettings::default() };
        assert!(FastEngine::new(FeatureSettings::default(), matcher, Device::Cpu).is_err());
    }
}
