//! imcui-api - HTTP gateway and client for image feature extraction and matching
//!
//! The server exposes keypoint extraction and pairwise matching over an
//! injected [`FeatureEngine`]; the client encodes local images, posts them and
//! decodes the returned arrays.

pub mod config;
pub mod core;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{build_engine, Device, EngineError, EngineOutput, EngineValue, FeatureEngine, FastEngine};
pub use models::{ErrorResponse, ImagesInput, VersionResponse};
pub use routes::AppState;
pub use services::{ApiClient, ExtractRequestBody, ResultArrays};
