use crate::config::ApiSettings;
use crate::core::reference::FastEngine;
use image::DynamicImage;
use ndarray::ArrayD;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by a feature engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// A single named output of an engine call
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    Pixels(ArrayD<u8>),
    Scalar(f64),
    Text(String),
}

impl EngineValue {
    /// First dimension of an array value; `None` for scalars and text
    pub fn leading_dim(&self) -> Option<usize> {
        let shape = match self {
            EngineValue::Float(a) => a.shape(),
            EngineValue::Int(a) => a.shape(),
            EngineValue::Pixels(a) => a.shape(),
            EngineValue::Scalar(_) | EngineValue::Text(_) => return None,
        };
        Some(shape.first().copied().unwrap_or(1))
    }

    pub fn is_array(&self) -> bool {
        self.leading_dim().is_some()
    }
}

/// Ordered mapping from field name to engine value
pub type EngineOutput = Vec<(String, EngineValue)>;

/// Compute device the engine is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    /// Resolve the configured device preference
    ///
    /// `auto` picks CUDA when `CUDA_VISIBLE_DEVICES` names at least one device.
    pub fn detect(preference: &str) -> Device {
        match preference.trim().to_lowercase().as_str() {
            "cpu" => Device::Cpu,
            "cuda" | "gpu" => Device::Cuda,
            _ => {
                let visible = std::env::var("CUDA_VISIBLE_DEVICES").unwrap_or_default();
                if visible.trim().is_empty() || visible.trim() == "-1" {
                    Device::Cpu
                } else {
                    Device::Cuda
                }
            }
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

/// Feature extraction and matching capability consumed by the HTTP layer
///
/// Implementations are shared read-only across worker threads.
pub trait FeatureEngine: Send + Sync {
    /// Detect keypoints and describe them for a single image
    ///
    /// A `max_keypoints` of zero or less falls back to the engine's configured cap.
    fn extract(
        &self,
        image: &DynamicImage,
        max_keypoints: i64,
        binarize: bool,
    ) -> Result<EngineOutput, EngineError>;

    /// Match two images, returning keypoints, correspondences and confidences
    fn match_pair(
        &self,
        image0: &DynamicImage,
        image1: &DynamicImage,
    ) -> Result<EngineOutput, EngineError>;
}

/// Build the engine named by the configuration
pub fn build_engine(
    settings: &ApiSettings,
    device: Device,
) -> Result<Arc<dyn FeatureEngine>, EngineError> {
    match settings.feature.name.as_str() {
        "fast" => Ok(Arc::new(FastEngine::new(
            settings.feature.clone(),
            settings.matcher.clone(),
            device,
        )?)),
        other => Err(EngineError::UnsupportedModel(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_device_detect_explicit() {
        assert_eq!(Device::detect("cpu"), Device::Cpu);
        assert_eq!(Device::detect("CUDA"), Device::Cuda);
        assert_eq!(Device::Cuda.to_string(), "cuda");
    }

    #[test]
    fn test_value_len() {
        let value = EngineValue::Float(ArrayD::zeros(IxDyn(&[7, 2])));
        assert_eq!(value.leading_dim(), Some(7));
        assert!(value.is_array());
        assert_eq!(EngineValue::Text("fast".into()).leading_dim(), None);
        assert!(!EngineValue::Scalar(1.0).is_array());
    }

    #[test]
    fn test_build_engine_rejects_unknown_model() {
        let mut settings = ApiSettings::default();
        settings.feature.name = "superpoint".to_string();
        let err = build_engine(&settings, Device::Cpu).err().unwrap();
        assert!(matches!(err, EngineError::UnsupportedModel(name) if name == "superpoint"));
    }
}
