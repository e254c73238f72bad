// Core exports
pub mod codec;
pub mod engine;
pub mod postprocess;
pub mod reference;

pub use codec::{decode_base64_image, decode_image, encode_png_base64, image_to_pixels, DecodeError};
pub use engine::{build_engine, Device, EngineError, EngineOutput, EngineValue, FeatureEngine};
pub use postprocess::{array_to_json, postprocess, MATCH_SKIP_KEYS};
pub use reference::FastEngine;
