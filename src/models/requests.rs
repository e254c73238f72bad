use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Batch extraction request
///
/// `data` and `max_keypoints` are parallel lists; `binarize` applies to the
/// whole batch. The remaining fields are accepted for wire compatibility
/// with existing clients and are not interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagesInput {
    /// Base64-encoded images
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub max_keypoints: Vec<i64>,
    #[serde(default)]
    pub binarize: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grayscale: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotates: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scales: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_points: Option<Value>,
}

impl ImagesInput {
    /// Keypoint cap for image `index`
    pub fn max_keypoints_for(&self, index: usize) -> Option<i64> {
        self.max_keypoints.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pass_through_fields_are_accepted() {
        let input: ImagesInput = serde_json::from_value(json!({
            "data": ["aGVsbG8="],
            "max_keypoints": [100, 100],
            "timestamps": ["0", "1"],
            "grayscale": 0,
            "image_hw": [[640, 480], [320, 240]],
            "feature_type": 0,
            "rotates": [0.0, 0.0],
            "scales": [1.0, 1.0],
            "reference_points": [[640, 480], [320, 240]],
            "binarize": true
        }))
        .unwrap();

        assert_eq!(input.data.len(), 1);
        assert!(input.binarize);
        assert_eq!(input.max_keypoints_for(1), Some(100));
        assert_eq!(input.max_keypoints_for(2), None);
        assert_eq!(input.grayscale, Some(json!(0)));
    }

    #[test]
    fn test_minimal_body() {
        let input: ImagesInput = serde_json::from_value(json!({})).unwrap();
        assert!(input.data.is_empty());
        assert!(!input.binarize);
    }
}
