// Route exports
pub mod api;
pub mod error;

pub use api::AppState;
pub use error::{handle_json_payload_error, json_config, ApiError};

use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(api::configure);
}
