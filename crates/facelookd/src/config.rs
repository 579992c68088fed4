use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_DATABASE_DIR: &str = "face_database";
const DEFAULT_BIND: &str = "127.0.0.1:5000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Service configuration.
///
/// Sources, later ones winning: built-in defaults, the TOML file named by
/// `FACELOOK_CONFIG`, then `FACELOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory of labeled reference images; also holds the cache file.
    pub database_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Listen address for the HTTP server.
    pub bind: String,
    /// Request body limit for uploads.
    pub max_upload_bytes: usize,
}

/// Optional overrides read from the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    database_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    bind: Option<String>,
    max_upload_bytes: Option<usize>,
}

impl Config {
    /// Load configuration from the optional config file and the environment.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("FACELOOK_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Ok(Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let database_dir = env("FACELOOK_DATABASE_DIR")
            .map(PathBuf::from)
            .or(file.database_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_DIR));

        let model_dir = env("FACELOOK_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(facelook_core::default_model_dir);

        let bind = env("FACELOOK_BIND")
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let max_upload_bytes = env("FACELOOK_MAX_UPLOAD_BYTES")
            .and_then(|v| v.parse().ok())
            .or(file.max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        Self {
            database_dir,
            model_dir,
            bind,
            max_upload_bytes,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(facelook_core::SCRFD_MODEL_FILE)
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}
