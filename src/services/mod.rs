// Service exports
pub mod client;
pub mod viz;

pub use client::{read_image, ApiClient, ClientError, ExtractRequestBody, Preds, ResultArrays};
