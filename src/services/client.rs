use crate::core::{encode_png_base64, DecodeError};
use crate::services::viz;
use ndarray::{ArrayD, IxDyn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Server used when `IMCUI_ENDPOINT` is not set
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8001";

/// Environment variable overriding the server base URL
pub const ENDPOINT_ENV: &str = "IMCUI_ENDPOINT";

/// Where `send_request_extract` writes its keypoint rendering
pub const VIZ_OUTPUT: &str = "demo_match.jpg";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur on the client side
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot decode image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[from] DecodeError),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Dump failed: {0}")]
    Dump(#[from] bincode::Error),
}

/// Field name to decoded array
pub type ResultArrays = BTreeMap<String, ArrayD<f64>>;

/// Last response kept by the CLI for dumping to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Preds {
    Match(ResultArrays),
    Extract(Vec<ResultArrays>),
}

impl Preds {
    /// Field names of the match result, or of the first extraction result
    pub fn keys(&self) -> Vec<String> {
        let arrays = match self {
            Preds::Match(arrays) => Some(arrays),
            Preds::Extract(list) => list.first(),
        };
        arrays.map(|a| a.keys().cloned().collect()).unwrap_or_default()
    }
}

/// JSON body for `/v1/extract`
///
/// Defaults describe a two-image batch; override any field before sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequestBody {
    /// Base64-encoded images
    pub data: Vec<String>,
    /// Maximum number of keypoints per image
    pub max_keypoints: Vec<i64>,
    pub timestamps: Vec<String>,
    pub grayscale: i64,
    /// Height and width per image
    pub image_hw: Vec<[u32; 2]>,
    pub feature_type: i64,
    /// Rotation angle per image
    pub rotates: Vec<f64>,
    /// Scale factor per image
    pub scales: Vec<f64>,
    pub reference_points: Vec<[u32; 2]>,
    /// Whether to binarize the descriptors
    pub binarize: bool,
}

impl Default for ExtractRequestBody {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            max_keypoints: vec![100, 100],
            timestamps: vec!["0".to_string(), "1".to_string()],
            grayscale: 0,
            image_hw: vec![[640, 480], [320, 240]],
            feature_type: 0,
            rotates: vec![0.0, 0.0],
            scales: vec![1.0, 1.0],
            reference_points: vec![[640, 480], [320, 240]],
            binarize: true,
        }
    }
}

impl ExtractRequestBody {
    pub fn with_data(mut self, data: Vec<String>) -> Self {
        self.data = data;
        self
    }

    pub fn with_max_keypoints(mut self, max_keypoints: Vec<i64>) -> Self {
        self.max_keypoints = max_keypoints;
        self
    }

    pub fn with_binarize(mut self, binarize: bool) -> Self {
        self.binarize = binarize;
        self
    }

    pub fn with_grayscale(mut self, grayscale: i64) -> Self {
        self.grayscale = grayscale;
        self
    }

    pub fn with_image_hw(mut self, image_hw: Vec<[u32; 2]>) -> Self {
        self.image_hw = image_hw;
        self
    }

    pub fn with_timestamps(mut self, timestamps: Vec<String>) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_feature_type(mut self, feature_type: i64) -> Self {
        self.feature_type = feature_type;
        self
    }

    pub fn with_rotates(mut self, rotates: Vec<f64>) -> Self {
        self.rotates = rotates;
        self
    }

    pub fn with_scales(mut self, scales: Vec<f64>) -> Self {
        self.scales = scales;
        self
    }

    pub fn with_reference_points(mut self, reference_points: Vec<[u32; 2]>) -> Self {
        self.reference_points = reference_points;
        self
    }
}

/// Read an image as grayscale and return it PNG-encoded, as base64
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<String, ClientError> {
    let path = path.as_ref();
    let image = image::ImageReader::open(path)
        .map_err(|source| ClientError::Io {
            path: path.display().to_string(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| ClientError::Io {
            path: path.display().to_string(),
            source,
        })?
        .decode()
        .map_err(|source| ClientError::Image {
            path: path.display().to_string(),
            source,
        })?;

    Ok(encode_png_base64(&image.to_luma8())?)
}

/// Convert a rectangular nested JSON list of numbers into an array
///
/// `null` maps to NaN and booleans to 0/1.
pub fn json_to_array(value: &Value) -> Result<ArrayD<f64>, ClientError> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut data = Vec::new();
    flatten(value, &shape, 0, &mut data)?;

    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

fn flatten(value: &Value, shape: &[usize], depth: usize, out: &mut Vec<f64>) -> Result<(), ClientError> {
    match value {
        Value::Array(items) => {
            if shape.get(depth) != Some(&items.len()) {
                return Err(ClientError::InvalidResponse(format!(
                    "ragged array at depth {}",
                    depth
                )));
            }
            items.iter().try_for_each(|item| flatten(item, shape, depth + 1, out))
        }
        leaf if depth != shape.len() => Err(ClientError::InvalidResponse(format!(
            "unexpected scalar {} at depth {}",
            leaf, depth
        ))),
        Value::Number(n) => {
            let v = n
                .as_f64()
                .ok_or_else(|| ClientError::InvalidResponse(format!("number {} out of range", n)))?;
            out.push(v);
            Ok(())
        }
        Value::Bool(b) => {
            out.push(if *b { 1.0 } else { 0.0 });
            Ok(())
        }
        Value::Null => {
            out.push(f64::NAN);
            Ok(())
        }
        other => Err(ClientError::InvalidResponse(format!(
            "non-numeric value {}",
            other
        ))),
    }
}

/// Decode every field of a response object, skipping those that are not numeric arrays
pub fn decode_arrays(object: &Map<String, Value>) -> ResultArrays {
    object
        .iter()
        .filter_map(|(key, value)| match json_to_array(value) {
            Ok(array) => Some((key.clone(), array)),
            Err(e) => {
                tracing::warn!("Skipping field {}: {}", key, e);
                None
            }
        })
        .collect()
}

/// Decode each object of an extraction response, skipping anything else
pub fn decode_items(items: &[Value]) -> Vec<ResultArrays> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item.as_object() {
            Some(object) => Some(decode_arrays(object)),
            None => {
                tracing::warn!("Skipping response item {}: expected an object, got {}", i, item);
                None
            }
        })
        .collect()
}

/// Write predictions to a bincode file
pub fn dump_preds<P: AsRef<Path>>(path: P, preds: &Preds) -> Result<(), ClientError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| ClientError::Io {
        path: path.display().to_string(),
        source,
    })?;
    bincode::serialize_into(BufWriter::new(file), preds)?;
    Ok(())
}

/// Read predictions written by [`dump_preds`]
pub fn load_preds<P: AsRef<Path>>(path: P) -> Result<Preds, ClientError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ClientError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(bincode::deserialize_from(BufReader::new(file))?)
}

async fn read_file(path: &Path) -> Result<Vec<u8>, ClientError> {
    tokio::fs::read(path).await.map_err(|source| ClientError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Image matching API client
///
/// Handles all communication with the image matching server:
/// - Querying the API version
/// - Sending image pairs for matching
/// - Sending images for feature extraction
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Create a new client for the server at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { base_url, client })
    }

    /// Create a client for `IMCUI_ENDPOINT`, or the local default server
    pub fn from_env() -> Result<Self, ClientError> {
        let endpoint = std::env::var(ENDPOINT_ENV).unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn version_url(&self) -> String {
        format!("{}/version", self.base_url)
    }

    pub fn match_url(&self) -> String {
        format!("{}/v1/match", self.base_url)
    }

    pub fn extract_url(&self) -> String {
        format!("{}/v1/extract", self.base_url)
    }

    /// Fetch the server's version string
    pub async fn get_api_version(&self) -> Result<String, ClientError> {
        let json: Value = self
            .client
            .get(self.version_url())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        json.get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidResponse("Missing version field".into()))
    }

    /// Post an extraction body as JSON to `url` (the extract endpoint by default)
    ///
    /// Returns `None` after logging when the server answers with anything but
    /// 200 or the request cannot be completed.
    pub async fn do_api_request(&self, url: Option<&str>, body: &ExtractRequestBody) -> Option<Value> {
        let url = url.map(str::to_string).unwrap_or_else(|| self.extract_url());

        let response = match self.client.post(&url).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("An error occurred: {}", e);
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Error: Response code {} - {}", status.as_u16(), text);
            return None;
        }

        match response.json().await {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!("An error occurred: {}", e);
                None
            }
        }
    }

    /// Match two image files on the server
    ///
    /// Both files are read into memory before the request is sent.
    pub async fn send_request_match<P: AsRef<Path>>(
        &self,
        path0: P,
        path1: P,
    ) -> Result<Option<ResultArrays>, ClientError> {
        let (path0, path1) = (path0.as_ref(), path1.as_ref());
        let form = Form::new()
            .part("image0", file_part(path0, read_file(path0).await?))
            .part("image1", file_part(path1, read_file(path1).await?));

        let response = match self.client.post(self.match_url()).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("An error occurred: {}", e);
                return Ok(None);
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Error: Response code {} - {}", status.as_u16(), text);
            return Ok(None);
        }

        match response.json::<Map<String, Value>>().await {
            Ok(object) => Ok(Some(decode_arrays(&object))),
            Err(e) => {
                tracing::error!("An error occurred: {}", e);
                Ok(None)
            }
        }
    }

    /// Extract features from one image file on the server
    ///
    /// With `viz`, keypoints are drawn onto the returned (or local) image and
    /// written to [`VIZ_OUTPUT`].
    pub async fn send_request_extract<P: AsRef<Path>>(
        &self,
        path: P,
        viz: bool,
    ) -> Result<Option<Vec<ResultArrays>>, ClientError> {
        let path = path.as_ref();
        let body = ExtractRequestBody::default().with_data(vec![read_image(path)?]);

        let Some(json) = self.do_api_request(None, &body).await else {
            return Ok(None);
        };

        let items = match json {
            Value::Array(items) => items,
            other => {
                tracing::error!("Unexpected extraction response: {}", other);
                return Ok(None);
            }
        };

        let preds = decode_items(&items);

        if viz {
            if let Some(first) = preds.first() {
                match viz::save_keypoints(first, path, VIZ_OUTPUT) {
                    Ok(()) => tracing::info!("Image saved to {}", VIZ_OUTPUT),
                    Err(e) => tracing::error!("An error occurred: {}", e),
                }
            }
        }

        Ok(Some(preds))
    }
}

fn file_part(path: &Path, bytes: Vec<u8>) -> Part {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Part::bytes(bytes).file_name(name)
}
