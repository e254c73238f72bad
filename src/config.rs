use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming a configuration file to use instead of `config/`
pub const CONFIG_ENV: &str = "IMCUI_CONFIG";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
    /// Upper bound for JSON bodies and for each multipart file, in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8001 }
fn default_max_payload_bytes() -> usize { 64 * 1024 * 1024 }

/// Engine section: which detector/matcher to build and on which device
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub feature: FeatureSettings,
    #[serde(default)]
    pub matcher: MatcherSettings,
}

fn default_device() -> String { "auto".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSettings {
    #[serde(default = "default_feature_name")]
    pub name: String,
    /// FAST intensity threshold
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    /// Cap used for matching and for extraction requests asking for `<= 0`
    #[serde(default = "default_max_keypoints")]
    pub max_keypoints: usize,
    #[serde(default = "default_descriptor_radius")]
    pub descriptor_radius: u32,
    /// Longest image side fed to the detector; larger inputs are downscaled
    pub resize_max: Option<u32>,
    /// Attach the decoded pixels as `image_orig` to extraction results
    #[serde(default)]
    pub include_image: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            name: default_feature_name(),
            threshold: default_threshold(),
            max_keypoints: default_max_keypoints(),
            descriptor_radius: default_descriptor_radius(),
            resize_max: None,
            include_image: false,
        }
    }
}

fn default_feature_name() -> String { "fast".to_string() }
fn default_threshold() -> u8 { 20 }
fn default_max_keypoints() -> usize { 1024 }
fn default_descriptor_radius() -> u32 { 8 }

#[derive(Debug, Clone, Deserialize)]
pub struct MatcherSettings {
    #[serde(default = "default_matcher_name")]
    pub name: String,
    /// Lowe ratio between best and second best descriptor distance
    #[serde(default = "default_ratio_threshold")]
    pub ratio_threshold: f64,
    /// Minimum cosine similarity for an accepted match
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            name: default_matcher_name(),
            ratio_threshold: default_ratio_threshold(),
            min_similarity: default_min_similarity(),
        }
    }
}

fn default_matcher_name() -> String { "mutual-nn".to_string() }
fn default_ratio_threshold() -> f64 { 0.9 }
fn default_min_similarity() -> f64 { 0.5 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/api.yaml)
    /// 3. Local override file (config/local.yaml)
    /// 4. Environment variables (prefixed with IMCUI_)
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/api").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., IMCUI__SERVER__PORT -> server.port
            .add_source(env_source())
            .build()?
            .try_deserialize()
    }

    /// Load from `IMCUI_CONFIG` when it is set, otherwise from `config/`
    pub fn load_configured() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(path),
            Err(_) => Self::load(),
        }
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()?
            .try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("IMCUI")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_feature_settings() {
        let feature = FeatureSettings::default();
        assert_eq!(feature.name, "fast");
        assert_eq!(feature.threshold, 20);
        assert_eq!(feature.max_keypoints, 1024);
        assert!(!feature.include_image);
    }

    #[test]
    fn test_default_logging() {
        let level = default_log_level();
        let format = default_log_format();
        assert_eq!(level, "info");
        assert_eq!(format, "json");
    }

    #[test]
    fn test_load_from_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 9100\napi:\n  device: cpu\n  feature:\n    max_keypoints: 64\n  matcher:\n    ratio_threshold: 0.75\n"
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.api.device, "cpu");
        assert_eq!(settings.api.feature.max_keypoints, 64);
        assert_eq!(settings.api.feature.name, "fast");
        assert_eq!(settings.api.matcher.ratio_threshold, 0.75);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn test_env_overlay_and_config_path() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 9200\n").unwrap();

        std::env::set_var(CONFIG_ENV, file.path());
        std::env::set_var("IMCUI__SERVER__WORKERS", "3");
        std::env::set_var("IMCUI_ENDPOINT", "http://example.test:8001");

        let settings = Settings::load_configured();
        let raw = Config::builder().add_source(env_source()).build();

        std::env::remove_var(CONFIG_ENV);
        std::env::remove_var("IMCUI__SERVER__WORKERS");
        std::env::remove_var("IMCUI_ENDPOINT");

        let settings = settings.unwrap();
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.server.workers, Some(3));

        // single-underscore variables belong to the binaries, not the overlay
        let raw = raw.unwrap();
        assert_eq!(raw.get_int("server.workers").unwrap(), 3);
        assert!(raw.get_string("config").is_err());
        assert!(raw.get_string("endpoint").is_err());
    }
}
