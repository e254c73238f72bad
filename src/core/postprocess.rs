use crate::core::engine::{EngineOutput, EngineValue};
use ndarray::{ArrayD, ArrayViewD};
use serde_json::{Map, Value};

/// Original-resolution buffers the match endpoint never returns
pub const MATCH_SKIP_KEYS: [&str; 2] = ["image0_orig", "image1_orig"];

/// Convert an array of any rank into nested JSON lists
///
/// Non-finite floats become `null`, as JSON has no representation for them.
pub fn array_to_json<T>(array: &ArrayD<T>) -> Value
where
    T: Copy + Into<Value>,
{
    nested(array.view())
}

fn nested<T>(view: ArrayViewD<'_, T>) -> Value
where
    T: Copy + Into<Value>,
{
    if view.ndim() == 0 {
        return view.first().map(|&v| v.into()).unwrap_or(Value::Null);
    }
    Value::Array(view.outer_iter().map(nested).collect())
}

/// Keep only array-valued fields not listed in `skip_keys`, as JSON lists
pub fn postprocess(output: EngineOutput, skip_keys: &[&str]) -> Map<String, Value> {
    let mut pred = Map::new();

    for (key, value) in output {
        if skip_keys.contains(&key.as_str()) {
            continue;
        }
        let json = match &value {
            EngineValue::Float(a) => array_to_json(a),
            EngineValue::Int(a) => array_to_json(a),
            EngineValue::Pixels(a) => array_to_json(a),
            EngineValue::Scalar(_) | EngineValue::Text(_) => {
                tracing::trace!("Dropping non-array field {}", key);
                continue;
            }
        };
        pred.insert(key, json);
    }

    pred
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, IxDyn};
    use serde_json::json;

    #[test]
    fn test_nested_lists() {
        let a = arr2(&[[1.5, 2.0], [3.0, -4.25]]).into_dyn();
        assert_eq!(array_to_json(&a), json!([[1.5, 2.0], [3.0, -4.25]]));

        let ints = arr1(&[3i64, -1, 0]).into_dyn();
        assert_eq!(array_to_json(&ints), json!([3, -1, 0]));
    }

    #[test]
    fn test_empty_and_zero_dim_arrays() {
        let empty: ArrayD<f64> = ArrayD::zeros(IxDyn(&[0, 2]));
        assert_eq!(array_to_json(&empty), json!([]));

        let scalar = ArrayD::from_elem(IxDyn(&[]), 7u8);
        assert_eq!(array_to_json(&scalar), json!(7));
    }

    #[test]
    fn test_nan_becomes_null() {
        let a = arr1(&[f64::NAN, 1.0]).into_dyn();
        assert_eq!(array_to_json(&a), json!([null, 1.0]));
    }

    #[test]
    fn test_postprocess_filters() {
        let output: EngineOutput = vec![
            ("keypoints0".into(), EngineValue::Float(arr2(&[[1.0, 2.0]]).into_dyn())),
            ("image0_orig".into(), EngineValue::Pixels(ArrayD::zeros(IxDyn(&[2, 2])))),
            ("image1_orig".into(), EngineValue::Pixels(ArrayD::zeros(IxDyn(&[2, 2])))),
            ("num_matches".into(), EngineValue::Scalar(1.0)),
            ("model".into(), EngineValue::Text("fast".into())),
            ("matches0".into(), EngineValue::Int(arr1(&[0i64]).into_dyn())),
        ];

        let pred = postprocess(output, &MATCH_SKIP_KEYS);
        let keys: Vec<&str> = pred.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["keypoints0", "matches0"]);
    }
}
