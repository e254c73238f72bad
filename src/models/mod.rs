// Model exports
pub mod requests;
pub mod responses;

pub use requests::ImagesInput;
pub use responses::{ErrorResponse, VersionResponse};
