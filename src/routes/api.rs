use crate::core::{decode_base64_image, decode_image, postprocess, FeatureEngine, MATCH_SKIP_KEYS};
use crate::models::{ImagesInput, VersionResponse};
use crate::routes::error::ApiError;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn FeatureEngine>,
    /// Per-file limit for multipart uploads
    pub max_payload_bytes: usize,
}

/// Configure all engine routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/", web::get().to(root))
        .route("/version", web::get().to(version))
        .service(
            web::scope("/v1")
                .route("/match", web::post().to(match_images))
                .route("/extract", web::post().to(extract)),
        );
}

/// Liveness check
async fn root() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Hello, world!")
}

/// GET /version
async fn version() -> impl Responder {
    HttpResponse::Ok().json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Match two uploaded images
///
/// POST /v1/match
///
/// Multipart form with file fields `image0` and `image1`. Responds with the
/// engine's array outputs, minus the original-resolution image buffers.
async fn match_images(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut files = read_fields(&mut payload, &["image0", "image1"], state.max_payload_bytes).await?;

    let bytes0 = files
        .remove("image0")
        .ok_or_else(|| ApiError::InvalidRequest("missing file field image0".to_string()))?;
    let bytes1 = files
        .remove("image1")
        .ok_or_else(|| ApiError::InvalidRequest("missing file field image1".to_string()))?;

    tracing::info!("Matching images ({} + {} bytes)", bytes0.len(), bytes1.len());

    let engine = state.engine.clone();
    let output = web::block(move || -> Result<_, ApiError> {
        let image0 = decode_image(&bytes0)?;
        let image1 = decode_image(&bytes1)?;
        Ok(engine.match_pair(&image0, &image1)?)
    })
    .await
    .map_err(|e| ApiError::Blocking(e.to_string()))?
    .map_err(|e| {
        tracing::error!("Match failed: {}", e);
        e
    })?;

    Ok(HttpResponse::Ok().json(postprocess(output, &MATCH_SKIP_KEYS)))
}

/// Extract keypoints and descriptors from a batch of images
///
/// POST /v1/extract
///
/// Request body:
/// ```json
/// {
///   "data": ["<base64 png>"],
///   "max_keypoints": [100],
///   "binarize": true
/// }
/// ```
async fn extract(
    state: web::Data<AppState>,
    body: web::Json<ImagesInput>,
) -> Result<HttpResponse, ApiError> {
    let input = body.into_inner();

    tracing::info!(
        "Extracting features from {} image(s), binarize: {}",
        input.data.len(),
        input.binarize
    );
    tracing::debug!(
        "Pass-through fields: timestamps={:?}, grayscale={:?}, image_hw={:?}, rotates={:?}, scales={:?}",
        input.timestamps,
        input.grayscale,
        input.image_hw,
        input.rotates,
        input.scales
    );

    let engine = state.engine.clone();
    let preds = web::block(move || extract_batch(engine.as_ref(), &input))
        .await
        .map_err(|e| ApiError::Blocking(e.to_string()))?
        .map_err(|e| {
            tracing::error!("Extraction failed: {}", e);
            e
        })?;

    Ok(HttpResponse::Ok().json(preds))
}

/// Run extraction image by image, in input order; the first failure aborts the batch
fn extract_batch(
    engine: &dyn FeatureEngine,
    input: &ImagesInput,
) -> Result<Vec<Map<String, Value>>, ApiError> {
    input
        .data
        .iter()
        .enumerate()
        .map(|(i, data)| {
            let max_keypoints = input.max_keypoints_for(i).ok_or_else(|| {
                ApiError::InvalidRequest(format!("max_keypoints has no entry for image {}", i))
            })?;
            let image = decode_base64_image(data)?;
            let output = engine.extract(&image, max_keypoints, input.binarize)?;
            Ok(postprocess(output, &[]))
        })
        .collect()
}

/// Collect the named multipart fields into memory, ignoring any others
async fn read_fields(
    payload: &mut Multipart,
    wanted: &[&str],
    limit: usize,
) -> Result<HashMap<String, Vec<u8>>, ApiError> {
    let mut files = HashMap::new();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let keep = wanted.contains(&name.as_str());

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::Multipart(e.to_string()))?
        {
            if !keep {
                continue;
            }
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::PayloadTooLarge(name));
            }
            bytes.extend_from_slice(&chunk);
        }

        if keep {
            files.insert(name, bytes);
        }
    }

    Ok(files)
}
