use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use imcui_api::config::Settings;
use imcui_api::core::{build_engine, Device};
use imcui_api::logging;
use imcui_api::routes::{self, json_config, AppState};
use tracing::{error, info};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    // Load configuration
    let settings = match Settings::load_configured() {
        Ok(settings) => {
            logging::init(&settings.logging.level, &settings.logging.format);
            settings
        }
        Err(e) => {
            logging::init("info", "json");
            error!("Failed to load configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    info!("Starting image matching API...");

    // Initialize the engine once; handlers share it read-only
    let device = Device::detect(&settings.api.device);
    let engine = build_engine(&settings.api, device).map_err(|e| {
        error!("Failed to build engine: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    info!(
        "Engine initialized (feature: {}, matcher: {}, device: {})",
        settings.api.feature.name, settings.api.matcher.name, device
    );

    let max_payload_bytes = settings.server.max_payload_bytes;
    let app_state = AppState {
        engine,
        max_payload_bytes,
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(json_config(max_payload_bytes))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
